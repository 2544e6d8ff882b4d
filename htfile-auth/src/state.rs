//! The state published to the proxy: validated configuration plus whether the
//! vault file exists. Vault contents never go through here.

use std::path::PathBuf;

use serde::Serialize;

use crate::config::{AuthenticationScheme, SchemeConfig};
use crate::vault::{CredentialVault, VaultStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct PublishedState {
    pub scheme: AuthenticationScheme,
    pub realm: String,
    pub vault_path: PathBuf,
    pub vault_exists: bool,
    pub workers_max: u32,
    pub workers_startup: u32,
    pub workers_idle: u32,
    /// Minutes.
    pub nonce_garbage_interval: u32,
    /// Minutes.
    pub nonce_max_duration: u32,
    pub nonce_max_count: u32,
}

/// Builds a fresh snapshot. Only a validated config can be passed in, so an
/// invalid configuration can never be published.
pub fn assemble<S: VaultStore>(
    config: &SchemeConfig,
    vault: &CredentialVault<S>,
) -> PublishedState {
    let workers = config.workers();
    let nonce = config.nonce();
    PublishedState {
        scheme: config.scheme(),
        realm: config.realm().to_string(),
        vault_path: vault.path().to_path_buf(),
        vault_exists: vault.exists(),
        workers_max: workers.max,
        workers_startup: workers.startup,
        workers_idle: workers.idle,
        nonce_garbage_interval: nonce.garbage_interval_minutes,
        nonce_max_duration: nonce.max_duration_minutes,
        nonce_max_count: nonce.max_count,
    }
}
