//! Digest-scheme hashing and byte fingerprints.
//!
//! `digest_file_auth -c` recomputes `MD5(username:realm:password)` for every
//! challenge and compares it with the stored HA1, so the realm used here must
//! be the realm Squid advertises.

use md5::Md5;
use sha2::{Digest, Sha256};

/// Length of a hex-encoded MD5 digest.
pub const HA1_HEX_LEN: usize = 32;

/// Computes the htdigest `HA1` value for a user in a realm.
pub fn ha1(username: &str, realm: &str, password: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(username.as_bytes());
    hasher.update(b":");
    hasher.update(realm.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    to_hex(&hasher.finalize())
}

/// True when `value` looks like a stored HA1: 32 lowercase hex characters.
pub fn is_ha1(value: &str) -> bool {
    value.len() == HA1_HEX_LEN
        && value
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Returns the hexadecimal SHA-256 digest of the provided bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    to_hex(&hasher.finalize())
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
