//! Hashing and secret generation for the credential vault. Each scheme keeps
//! its hash function in its own submodule so a vault line is never produced by
//! the other scheme's algorithm.

pub mod digest;
pub mod passwords;
