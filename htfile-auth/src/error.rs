//! Crate-level error combining configuration, vault and Squid failures.

use thiserror::Error;

use crate::config::ConfigError;
use crate::squid::SquidError;
use crate::telemetry::TelemetryError;
use crate::vault::VaultError;

pub const RELATION_MISSING_MESSAGE: &str =
    "Integrate with a Squid proxy before running this action.";

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Vault(#[from] VaultError),
    #[error(transparent)]
    Squid(#[from] SquidError),
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    #[error("{}", RELATION_MISSING_MESSAGE)]
    RelationMissing,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::AppError;
    use crate::telemetry::{init_logging, LoggingConfig};

    #[test]
    fn logging_failure_becomes_an_app_error() {
        let _ = init_logging(&LoggingConfig::default());
        let err: AppError = init_logging(&LoggingConfig::default())
            .map_err(AppError::from)
            .unwrap_err();
        assert!(matches!(err, AppError::Telemetry(_)));
        assert!(err.to_string().contains("tracing subscriber"));
    }
}
