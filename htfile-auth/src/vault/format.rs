//! The two on-disk vault layouts, byte-compatible with the Squid helpers:
//!
//! - basic (`basic_ncsa_auth`): `username:hash` per line
//! - digest (`digest_file_auth -c`): `username:realm:ha1` per line

use std::collections::BTreeMap;

use crate::config::AuthenticationScheme;
use crate::crypto::digest::is_ha1;

/// The stored secret of one user. Never a plaintext password.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretHash {
    Basic { hash: String },
    Digest { realm: String, ha1: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialEntry {
    pub username: String,
    pub secret: SecretHash,
}

impl CredentialEntry {
    fn render(&self) -> String {
        match &self.secret {
            SecretHash::Basic { hash } => format!("{}:{}", self.username, hash),
            SecretHash::Digest { realm, ha1 } => format!("{}:{}:{}", self.username, realm, ha1),
        }
    }
}

/// A line that could not be parsed. Lines are numbered from 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatError {
    pub line: usize,
    pub reason: String,
}

/// Checks a username against what both file formats can carry.
pub fn validate_username(username: &str) -> Result<(), &'static str> {
    if username.is_empty() {
        return Err("must not be empty");
    }
    if username.contains(':') {
        return Err("must not contain ':'");
    }
    if username.chars().any(char::is_control) {
        return Err("must not contain control characters");
    }
    Ok(())
}

/// Parsed vault contents, keyed (and therefore sorted) by username.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vault {
    scheme: AuthenticationScheme,
    entries: BTreeMap<String, CredentialEntry>,
}

impl Vault {
    pub fn empty(scheme: AuthenticationScheme) -> Self {
        Self {
            scheme,
            entries: BTreeMap::new(),
        }
    }

    pub fn parse(scheme: AuthenticationScheme, text: &str) -> Result<Self, FormatError> {
        let mut vault = Self::empty(scheme);
        for (index, raw_line) in text.lines().enumerate() {
            let line = raw_line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            let fail = |reason: String| FormatError {
                line: index + 1,
                reason,
            };
            let entry = parse_line(scheme, line).map_err(fail)?;
            if vault.entries.contains_key(&entry.username) {
                return Err(fail(format!("duplicate entry for user {}", entry.username)));
            }
            vault.entries.insert(entry.username.clone(), entry);
        }
        Ok(vault)
    }

    pub fn scheme(&self) -> AuthenticationScheme {
        self.scheme
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, username: &str) -> bool {
        self.entries.contains_key(username)
    }

    pub fn get(&self, username: &str) -> Option<&CredentialEntry> {
        self.entries.get(username)
    }

    /// Usernames in sorted order.
    pub fn usernames(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = &CredentialEntry> {
        self.entries.values()
    }

    pub(crate) fn insert(&mut self, entry: CredentialEntry) {
        self.entries.insert(entry.username.clone(), entry);
    }

    pub(crate) fn remove(&mut self, username: &str) -> Option<CredentialEntry> {
        self.entries.remove(username)
    }

    /// File contents for this vault. An empty vault renders as an empty file.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for entry in self.entries.values() {
            out.push_str(&entry.render());
            out.push('\n');
        }
        out
    }
}

fn parse_line(scheme: AuthenticationScheme, line: &str) -> Result<CredentialEntry, String> {
    match scheme {
        AuthenticationScheme::Basic => {
            let (username, hash) = line
                .split_once(':')
                .ok_or_else(|| "expected username:hash".to_string())?;
            check_username(username)?;
            if hash.is_empty() {
                return Err(format!("empty hash for user {username}"));
            }
            if hash.contains(':') {
                return Err("expected username:hash, found an extra field".to_string());
            }
            Ok(CredentialEntry {
                username: username.to_string(),
                secret: SecretHash::Basic {
                    hash: hash.to_string(),
                },
            })
        }
        AuthenticationScheme::Digest => {
            let mut fields = line.splitn(3, ':');
            let (Some(username), Some(realm), Some(ha1)) =
                (fields.next(), fields.next(), fields.next())
            else {
                return Err("expected username:realm:ha1".to_string());
            };
            check_username(username)?;
            if realm.is_empty() {
                return Err(format!("empty realm for user {username}"));
            }
            if !is_ha1(ha1) {
                return Err(format!("malformed digest hash for user {username}"));
            }
            Ok(CredentialEntry {
                username: username.to_string(),
                secret: SecretHash::Digest {
                    realm: realm.to_string(),
                    ha1: ha1.to_string(),
                },
            })
        }
    }
}

fn check_username(username: &str) -> Result<(), String> {
    validate_username(username).map_err(|reason| format!("invalid username {username:?}: {reason}"))
}

/// Which layout a vault file is written in. `None` for an empty file or one
/// that matches neither layout.
pub fn detect_scheme(text: &str) -> Option<AuthenticationScheme> {
    if text.trim().is_empty() {
        return None;
    }
    [AuthenticationScheme::Digest, AuthenticationScheme::Basic]
        .into_iter()
        .find(|scheme| Vault::parse(*scheme, text).is_ok())
}
