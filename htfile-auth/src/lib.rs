//! Credential vault for Squid's basic and digest auth helpers.
//!
//! The crate validates the helper configuration, owns the htpasswd/htdigest
//! vault file, and publishes a flat snapshot of both for the proxy. Hosts drive
//! it through [`helper::AuthHelper`]; the binary is a thin CLI over that.

pub mod config;
pub mod crypto;
pub mod error;
pub mod helper;
pub mod relation;
pub mod squid;
pub mod state;
pub mod status;
pub mod telemetry;
pub mod vault;

pub use config::{validate, AuthenticationScheme, ConfigError, RawConfig, SchemeConfig};
pub use error::AppError;
pub use vault::{CredentialVault, VaultError};
