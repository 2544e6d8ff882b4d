//! One-time password generation and the salted SHA-256-crypt hashes stored in
//! basic-scheme vaults.
//! `basic_ncsa_auth` hands each stored hash to the system `crypt(3)`, so the
//! `$5$` format is dictated by the helper program.

use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::Rng;
use sha_crypt::{sha256_check, sha256_simple, Sha256Params, ROUNDS_DEFAULT};
use thiserror::Error;
use zeroize::Zeroizing;

/// Length of every generated password.
pub const GENERATED_PASSWORD_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("sha256-crypt parameters rejected: {0}")]
    InvalidParams(String),
    #[error("sha256-crypt hashing failed: {0}")]
    HashFailed(String),
}

/// Generates a random alphanumeric password with at least one lowercase
/// letter, one uppercase letter and one digit.
/// The buffer is wiped when dropped, so callers should hand it out once and
/// let it go.
pub fn generate_password() -> Zeroizing<String> {
    loop {
        let candidate: Zeroizing<String> = Zeroizing::new(
            OsRng
                .sample_iter(Alphanumeric)
                .take(GENERATED_PASSWORD_LEN)
                .map(char::from)
                .collect(),
        );
        if meets_policy(&candidate) {
            return candidate;
        }
    }
}

fn meets_policy(password: &str) -> bool {
    password.chars().any(|c| c.is_ascii_lowercase())
        && password.chars().any(|c| c.is_ascii_uppercase())
        && password.chars().any(|c| c.is_ascii_digit())
}

/// Hashes a password into a `$5$` SHA-256-crypt string with a fresh random salt.
pub fn hash_basic(plaintext: &str) -> Result<String, PasswordError> {
    let params = Sha256Params::new(ROUNDS_DEFAULT)
        .map_err(|e| PasswordError::InvalidParams(format!("{e:?}")))?;
    sha256_simple(plaintext, &params).map_err(|e| PasswordError::HashFailed(format!("{e:?}")))
}

/// Checks a plaintext password against a stored SHA-256-crypt hash.
/// Malformed hashes never verify.
pub fn verify_basic(plaintext: &str, stored_hash: &str) -> bool {
    sha256_check(plaintext, stored_hash).is_ok()
}
