//! Event and action handling on behalf of the host.
//!
//! Each call re-reads the configuration, opens the vault at the configured
//! path, does its work, and republishes the relation data when there is a
//! related proxy. An invalid configuration or a corrupted vault blocks the
//! unit and nothing is published.

use std::fmt;
use std::path::PathBuf;

use serde::{Serialize, Serializer};
use tracing::{error, info, warn};
use zeroize::Zeroizing;

use crate::config::{ConfigSource, SchemeConfig};
use crate::error::AppError;
use crate::relation::{export, RelationChannel};
use crate::squid::{locate_tools_dir, render_auth_params};
use crate::state::assemble;
use crate::status::{StatusSink, UnitStatus, WAITING_FOR_RELATION};
use crate::vault::{CredentialVault, VaultError, VaultStore};

/// Result of `create-user`. The password is only ever available here.
#[derive(Serialize)]
pub struct CreatedUser {
    pub username: String,
    pub realm: String,
    #[serde(serialize_with = "expose_password")]
    pub password: Zeroizing<String>,
}

impl fmt::Debug for CreatedUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreatedUser")
            .field("username", &self.username)
            .field("realm", &self.realm)
            .field("password", &"<redacted>")
            .finish()
    }
}

fn expose_password<S: Serializer>(
    password: &Zeroizing<String>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(password)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemovedUser {
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserList {
    pub users: Vec<String>,
}

pub struct AuthHelper<C, R, T> {
    config: C,
    relation: R,
    status: T,
}

impl<C, R, T> AuthHelper<C, R, T>
where
    C: ConfigSource,
    R: RelationChannel,
    T: StatusSink,
{
    pub fn new(config: C, relation: R, status: T) -> Self {
        Self {
            config,
            relation,
            status,
        }
    }

    pub fn relation(&self) -> &R {
        &self.relation
    }

    pub fn relation_mut(&mut self) -> &mut R {
        &mut self.relation
    }

    pub fn status(&self) -> &T {
        &self.status
    }

    /// Validates the configuration, blocking the unit when it is invalid.
    pub fn validate_config(&mut self) -> Result<SchemeConfig, AppError> {
        self.config_or_block()
    }

    /// Configuration changed: drop a vault left over from the other scheme,
    /// then publish if a proxy is related.
    pub fn on_config_changed(&mut self) -> Result<(), AppError> {
        let config = self.config_or_block()?;
        let mut vault = CredentialVault::open(&config);
        vault.discard_foreign_scheme()?;
        self.check_vault(&vault)?;

        if !self.relation.is_related() {
            self.status.set_status(UnitStatus::blocked(WAITING_FOR_RELATION));
            return Ok(());
        }
        self.publish(&config, &vault);
        self.status.set_status(UnitStatus::Active);
        Ok(())
    }

    /// A proxy was related. Publishes the current state; the unit only goes
    /// active once something was actually published.
    pub fn on_relation_created(&mut self) -> Result<(), AppError> {
        let config = self.config_or_block()?;
        let vault = CredentialVault::open(&config);
        self.check_vault(&vault)?;

        if !self.relation.is_related() {
            self.status.set_status(UnitStatus::blocked(WAITING_FOR_RELATION));
            return Ok(());
        }
        self.publish(&config, &vault);
        self.status.set_status(UnitStatus::Active);
        Ok(())
    }

    pub fn on_relation_broken(&mut self) {
        self.status.set_status(UnitStatus::blocked(WAITING_FOR_RELATION));
    }

    pub fn create_user(&mut self, username: &str) -> Result<CreatedUser, AppError> {
        let config = self.action_config()?;
        let mut vault = CredentialVault::open(&config);
        let password = vault.create_user(username)?;
        self.publish(&config, &vault);
        Ok(CreatedUser {
            username: username.to_string(),
            realm: config.realm().to_string(),
            password,
        })
    }

    pub fn remove_user(&mut self, username: &str) -> Result<RemovedUser, AppError> {
        let config = self.action_config()?;
        let mut vault = CredentialVault::open(&config);
        vault.remove_user(username)?;
        self.publish(&config, &vault);
        Ok(RemovedUser { success: true })
    }

    pub fn list_users(&mut self) -> Result<UserList, AppError> {
        let config = self.action_config()?;
        let users = CredentialVault::open(&config).list_users()?;
        Ok(UserList { users })
    }

    pub fn verify_user(&mut self, username: &str, password: &str) -> Result<bool, AppError> {
        let config = self.config_or_block()?;
        Ok(CredentialVault::open(&config).verify_user(username, password)?)
    }

    /// `auth_param` lines for the current state, using the first existing
    /// directory of `tools_dirs` for the helper program.
    pub fn render_squid_config(
        &mut self,
        tools_dirs: &[PathBuf],
    ) -> Result<Vec<String>, AppError> {
        let config = self.config_or_block()?;
        let vault = CredentialVault::open(&config);
        let tools_dir = locate_tools_dir(tools_dirs)?;
        Ok(render_auth_params(&assemble(&config, &vault), &tools_dir))
    }

    fn config_or_block(&mut self) -> Result<SchemeConfig, AppError> {
        self.config.scheme_config().map_err(|err| {
            error!(error = %err, "invalid configuration");
            self.status.set_status(UnitStatus::blocked(err.to_string()));
            AppError::from(err)
        })
    }

    fn action_config(&mut self) -> Result<SchemeConfig, AppError> {
        if !self.relation.is_related() {
            self.status.set_status(UnitStatus::blocked(WAITING_FOR_RELATION));
            return Err(AppError::RelationMissing);
        }
        self.config_or_block()
    }

    fn check_vault<S: VaultStore>(&mut self, vault: &CredentialVault<S>) -> Result<(), AppError> {
        if !vault.exists() {
            return Ok(());
        }
        match vault.load() {
            Ok(_) => Ok(()),
            Err(err @ VaultError::Format { .. }) => {
                warn!(error = %err, "vault is unusable");
                self.status.set_status(UnitStatus::blocked(err.to_string()));
                Err(err.into())
            }
            Err(err) => Err(err.into()),
        }
    }

    fn publish<S: VaultStore>(&mut self, config: &SchemeConfig, vault: &CredentialVault<S>) {
        if !self.relation.is_related() {
            return;
        }
        let state = assemble(config, vault);
        self.relation.publish(&export(&state));
        info!(
            scheme = %state.scheme,
            vault_exists = state.vault_exists,
            "relation data published"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RawConfig;
    use crate::relation::{MemoryChannel, VAULT_EXISTS};
    use crate::status::MemoryStatus;
    use tempfile::{tempdir, TempDir};

    fn raw(dir: &TempDir) -> RawConfig {
        RawConfig::new()
            .set("realm", "proxy")
            .set(
                "vault-filepath",
                dir.path().join("passwords").display().to_string(),
            )
    }

    fn helper(raw: RawConfig) -> AuthHelper<RawConfig, MemoryChannel, MemoryStatus> {
        AuthHelper::new(raw, MemoryChannel::related(), MemoryStatus::default())
    }

    #[test]
    fn blocks_without_relation() {
        let dir = tempdir().unwrap();
        let mut helper =
            AuthHelper::new(raw(&dir), MemoryChannel::unrelated(), MemoryStatus::default());
        helper.on_config_changed().expect("config is valid");
        assert_eq!(
            helper.status().current(),
            Some(&UnitStatus::blocked(WAITING_FOR_RELATION))
        );
        assert!(helper.relation().published().is_empty());

        let err = helper.create_user("bob").unwrap_err();
        assert!(matches!(err, AppError::RelationMissing));
        assert_eq!(err.to_string(), crate::error::RELATION_MISSING_MESSAGE);
    }

    #[test]
    fn relation_lifecycle_drives_status() {
        let dir = tempdir().unwrap();
        let mut helper = helper(raw(&dir));
        helper.on_relation_created().expect("publish");
        assert_eq!(helper.status().current(), Some(&UnitStatus::Active));
        assert_eq!(helper.relation().last_value(VAULT_EXISTS), Some("false"));

        helper.on_relation_broken();
        assert!(helper.status().current().unwrap().is_blocked());
    }

    #[test]
    fn relation_created_without_peer_stays_blocked() {
        let dir = tempdir().unwrap();
        let mut helper =
            AuthHelper::new(raw(&dir), MemoryChannel::unrelated(), MemoryStatus::default());
        helper.on_relation_created().expect("config is valid");
        assert_eq!(
            helper.status().current(),
            Some(&UnitStatus::blocked(WAITING_FOR_RELATION))
        );
        assert!(helper.relation().published().is_empty());
    }

    #[test]
    fn create_user_republishes_state() {
        let dir = tempdir().unwrap();
        let mut helper = helper(raw(&dir));
        let created = helper.create_user("bob").expect("create");
        assert_eq!(created.username, "bob");
        assert_eq!(created.realm, "proxy");
        assert!(!format!("{created:?}").contains(created.password.as_str()));
        assert_eq!(helper.relation().last_value(VAULT_EXISTS), Some("true"));

        let json = serde_json::to_value(&created).unwrap();
        assert_eq!(json["password"], created.password.as_str());
    }

    #[test]
    fn invalid_config_blocks_and_publishes_nothing() {
        let dir = tempdir().unwrap();
        let mut helper = helper(raw(&dir).set("workers-startup", 50).set("workers-max", 10));
        let err = helper.on_config_changed().unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
        assert!(helper.status().current().unwrap().is_blocked());
        assert!(helper.relation().published().is_empty());
        assert!(helper.list_users().is_err());
    }

    #[test]
    fn corrupted_vault_blocks_publication() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("passwords"), "bob:proxy:nothex\n").unwrap();
        let mut helper = helper(raw(&dir));
        assert!(helper.on_config_changed().is_err());
        assert!(helper.status().current().unwrap().is_blocked());
        assert!(helper.relation().published().is_empty());
    }

    #[test]
    fn renders_squid_config_from_state() {
        let dir = tempdir().unwrap();
        let tools = dir.path().join("squid");
        std::fs::create_dir(&tools).unwrap();
        let mut helper = helper(raw(&dir));
        let lines = helper.render_squid_config(&[tools.clone()]).expect("render");
        assert!(lines[0].contains("digest_file_auth -c"));

        let err = helper
            .render_squid_config(&[dir.path().join("missing")])
            .unwrap_err();
        assert!(matches!(err, AppError::Squid(_)));
    }
}
