//! The credential vault: the single file Squid's auth helper reads users from.
//!
//! Every operation re-reads the store; nothing is cached between calls. A
//! mutation renders the whole file and hands it to [`VaultStore::replace`],
//! which is all-or-nothing, so a failed write leaves the previous vault intact.

pub mod format;
pub mod store;

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::config::{AuthenticationScheme, SchemeConfig};
use crate::crypto::digest::{ha1, sha256_hex};
use crate::crypto::passwords::{generate_password, hash_basic, verify_basic, PasswordError};

pub use format::{detect_scheme, validate_username, CredentialEntry, SecretHash, Vault};
pub use store::{FileStore, MemoryStore, VaultStore};

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("vault file {} is missing", .path.display())]
    Missing { path: PathBuf },
    #[error("vault file {} is corrupted at line {line}: {reason}", .path.display())]
    Format {
        path: PathBuf,
        line: usize,
        reason: String,
    },
    #[error("User {username} already exists.")]
    DuplicateUser { username: String },
    #[error("User {username} doesn't exist.")]
    UserNotFound { username: String },
    #[error("invalid username {username:?}: {reason}")]
    InvalidUsername {
        username: String,
        reason: &'static str,
    },
    #[error("unable to read vault file {}: {source}", .path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("unable to save vault file {}: {source}", .path.display())]
    Write { path: PathBuf, source: io::Error },
    #[error(transparent)]
    Hash(#[from] PasswordError),
}

/// Scheme of a vault, with what each scheme needs to hash a secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VaultScheme {
    Basic,
    Digest { realm: String },
}

impl VaultScheme {
    pub fn from_config(config: &SchemeConfig) -> Self {
        match config.scheme() {
            AuthenticationScheme::Basic => VaultScheme::Basic,
            AuthenticationScheme::Digest => VaultScheme::Digest {
                realm: config.realm().to_string(),
            },
        }
    }

    pub fn kind(&self) -> AuthenticationScheme {
        match self {
            VaultScheme::Basic => AuthenticationScheme::Basic,
            VaultScheme::Digest { .. } => AuthenticationScheme::Digest,
        }
    }

    fn hash(&self, username: &str, password: &str) -> Result<SecretHash, VaultError> {
        Ok(match self {
            VaultScheme::Basic => SecretHash::Basic {
                hash: hash_basic(password)?,
            },
            VaultScheme::Digest { realm } => SecretHash::Digest {
                realm: realm.clone(),
                ha1: ha1(username, realm, password),
            },
        })
    }
}

/// Owns the vault storage and the active scheme.
#[derive(Debug)]
pub struct CredentialVault<S = FileStore> {
    store: S,
    scheme: VaultScheme,
}

impl CredentialVault<FileStore> {
    /// Vault at the configured path, in the configured scheme.
    pub fn open(config: &SchemeConfig) -> Self {
        Self::with_store(
            FileStore::new(config.vault_path()),
            VaultScheme::from_config(config),
        )
    }
}

impl<S: VaultStore> CredentialVault<S> {
    pub fn with_store(store: S, scheme: VaultScheme) -> Self {
        Self { store, scheme }
    }

    pub fn scheme(&self) -> &VaultScheme {
        &self.scheme
    }

    pub fn path(&self) -> &Path {
        self.store.location()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// True when the vault file is present, even if it holds no users.
    pub fn exists(&self) -> bool {
        self.store.exists()
    }

    /// Reads and parses the vault in the active scheme's layout.
    pub fn load(&self) -> Result<Vault, VaultError> {
        let text = self.read_text()?.ok_or_else(|| VaultError::Missing {
            path: self.path().to_path_buf(),
        })?;
        let vault = Vault::parse(self.scheme.kind(), &text).map_err(|err| VaultError::Format {
            path: self.path().to_path_buf(),
            line: err.line,
            reason: err.reason,
        })?;

        if let VaultScheme::Digest { realm } = &self.scheme {
            let stale = stale_realm_users(&vault, realm);
            if !stale.is_empty() {
                warn!(
                    path = %self.path().display(),
                    realm = %realm,
                    users = ?stale,
                    "vault holds users hashed for another realm; their credentials no longer verify"
                );
            }
        }
        Ok(vault)
    }

    fn load_or_empty(&self) -> Result<Vault, VaultError> {
        match self.load() {
            Err(VaultError::Missing { .. }) => Ok(Vault::empty(self.scheme.kind())),
            other => other,
        }
    }

    /// Adds a user with a freshly generated password and returns that
    /// password. It is not stored anywhere and cannot be recovered later.
    pub fn create_user(&mut self, username: &str) -> Result<Zeroizing<String>, VaultError> {
        check_username(username)?;
        let mut vault = self.load_or_empty()?;
        if vault.contains(username) {
            return Err(VaultError::DuplicateUser {
                username: username.to_string(),
            });
        }

        let password = generate_password();
        let secret = self.scheme.hash(username, &password)?;
        vault.insert(CredentialEntry {
            username: username.to_string(),
            secret,
        });
        self.persist(&vault)?;

        info!(
            username = %username,
            scheme = %self.scheme.kind(),
            path = %self.path().display(),
            "user created"
        );
        Ok(password)
    }

    /// Removes a user. Removing the last user leaves an empty vault file.
    pub fn remove_user(&mut self, username: &str) -> Result<(), VaultError> {
        let mut vault = self.load_or_empty()?;
        if vault.remove(username).is_none() {
            return Err(VaultError::UserNotFound {
                username: username.to_string(),
            });
        }
        self.persist(&vault)?;

        info!(username = %username, path = %self.path().display(), "user removed");
        Ok(())
    }

    /// Sorted usernames; empty when the vault does not exist yet.
    pub fn list_users(&self) -> Result<Vec<String>, VaultError> {
        Ok(self.load_or_empty()?.usernames())
    }

    /// Checks a password the way the auth helper would.
    pub fn verify_user(&self, username: &str, password: &str) -> Result<bool, VaultError> {
        let vault = self.load_or_empty()?;
        let entry = vault.get(username).ok_or_else(|| VaultError::UserNotFound {
            username: username.to_string(),
        })?;
        Ok(match &entry.secret {
            SecretHash::Basic { hash } => verify_basic(password, hash),
            SecretHash::Digest { realm, ha1: stored } => ha1(username, realm, password) == *stored,
        })
    }

    /// Digest users whose stored realm is not the active realm.
    pub fn stale_realm_users(&self) -> Result<Vec<String>, VaultError> {
        match &self.scheme {
            VaultScheme::Basic => Ok(Vec::new()),
            VaultScheme::Digest { realm } => Ok(stale_realm_users(&self.load_or_empty()?, realm)),
        }
    }

    /// Layout of the file currently on disk, if it exists and is recognisable.
    pub fn on_disk_scheme(&self) -> Result<Option<AuthenticationScheme>, VaultError> {
        Ok(self.read_text()?.as_deref().and_then(detect_scheme))
    }

    /// Changes the active scheme. Credentials cannot be carried across
    /// schemes, so a scheme change deletes the existing vault. Returns whether
    /// a vault was deleted.
    pub fn switch_scheme(&mut self, scheme: VaultScheme) -> Result<bool, VaultError> {
        let previous = self.scheme.kind();
        self.scheme = scheme;
        if previous == self.scheme.kind() {
            return Ok(false);
        }
        self.discard(previous)
    }

    /// Deletes the vault when the file on disk is in the other scheme's
    /// layout, e.g. after `authentication-type` was changed. Returns whether a
    /// vault was deleted.
    pub fn discard_foreign_scheme(&mut self) -> Result<bool, VaultError> {
        match self.on_disk_scheme()? {
            Some(found) if found != self.scheme.kind() => self.discard(found),
            _ => Ok(false),
        }
    }

    /// SHA-256 of the vault bytes, for change detection in logs.
    pub fn fingerprint(&self) -> Result<Option<String>, VaultError> {
        Ok(self.read_bytes()?.map(|bytes| sha256_hex(&bytes)))
    }

    fn discard(&mut self, previous: AuthenticationScheme) -> Result<bool, VaultError> {
        let deleted = self.store.discard().map_err(|source| VaultError::Write {
            path: self.path().to_path_buf(),
            source,
        })?;
        if deleted {
            warn!(
                path = %self.path().display(),
                from = %previous,
                to = %self.scheme.kind(),
                "authentication scheme changed; existing vault and all its users were deleted"
            );
        }
        Ok(deleted)
    }

    fn persist(&mut self, vault: &Vault) -> Result<(), VaultError> {
        let rendered = vault.render();
        self.store
            .replace(rendered.as_bytes())
            .map_err(|source| VaultError::Write {
                path: self.path().to_path_buf(),
                source,
            })?;
        debug!(
            path = %self.path().display(),
            users = vault.len(),
            sha256 = %sha256_hex(rendered.as_bytes()),
            "vault persisted"
        );
        Ok(())
    }

    fn read_bytes(&self) -> Result<Option<Vec<u8>>, VaultError> {
        self.store.read().map_err(|source| VaultError::Read {
            path: self.path().to_path_buf(),
            source,
        })
    }

    fn read_text(&self) -> Result<Option<String>, VaultError> {
        match self.read_bytes()? {
            None => Ok(None),
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|err| VaultError::Format {
                    path: self.path().to_path_buf(),
                    line: 0,
                    reason: format!("not valid UTF-8: {err}"),
                }),
        }
    }
}

fn check_username(username: &str) -> Result<(), VaultError> {
    validate_username(username).map_err(|reason| VaultError::InvalidUsername {
        username: username.to_string(),
        reason,
    })
}

fn stale_realm_users(vault: &Vault, realm: &str) -> Vec<String> {
    vault
        .entries()
        .filter_map(|entry| match &entry.secret {
            SecretHash::Digest { realm: stored, .. } if stored != realm => {
                Some(entry.username.clone())
            }
            _ => None,
        })
        .collect()
}
