//! Scheme configuration. The deployment collaborator hands over a flat map of
//! scalar settings; [`validate`] walks it in a fixed order and either returns
//! an immutable [`SchemeConfig`] or the first violation it found. A config that
//! failed validation never reaches the vault.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

pub const WORKERS_MAX: &str = "workers-max";
pub const WORKERS_STARTUP: &str = "workers-startup";
pub const WORKERS_IDLE: &str = "workers-idle";
pub const VAULT_FILEPATH: &str = "vault-filepath";
pub const NONCE_GARBAGE_INTERVAL: &str = "nonce-garbage-interval";
pub const NONCE_MAX_DURATION: &str = "nonce-max-duration";
pub const NONCE_MAX_COUNT: &str = "nonce-max-count";
pub const REALM: &str = "realm";
pub const AUTHENTICATION_TYPE: &str = "authentication-type";

const KNOWN_KEYS: [&str; 9] = [
    WORKERS_MAX,
    WORKERS_STARTUP,
    WORKERS_IDLE,
    VAULT_FILEPATH,
    NONCE_GARBAGE_INTERVAL,
    NONCE_MAX_DURATION,
    NONCE_MAX_COUNT,
    REALM,
    AUTHENTICATION_TYPE,
];

/// Numeric settings in validation order, with the default used when absent.
const NUMERIC_FIELDS: [(&str, u32); 6] = [
    (WORKERS_MAX, 20),
    (WORKERS_STARTUP, 1),
    (WORKERS_IDLE, 1),
    (NONCE_GARBAGE_INTERVAL, 5),
    (NONCE_MAX_DURATION, 30),
    (NONCE_MAX_COUNT, 50),
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("config file unreadable: {0}")]
    Io(String),
    #[error("config parse failed: {0}")]
    Parse(String),
    #[error("invalid configuration: {field} is required")]
    Missing { field: &'static str },
    #[error("invalid configuration: {field} must be an integer")]
    NotAnInteger { field: &'static str },
    #[error("invalid configuration: {field} must be a positive integer, got {value}")]
    NotPositive { field: &'static str, value: i64 },
    #[error("invalid configuration: {field} is out of range, got {value}")]
    OutOfRange { field: &'static str, value: String },
    #[error("invalid configuration: {field} ({value}) must not exceed {bound} ({max})")]
    ExceedsMax {
        field: &'static str,
        value: u32,
        bound: &'static str,
        max: u32,
    },
    #[error("invalid configuration: {field} must be a string")]
    NotAString { field: &'static str },
    #[error("invalid configuration: realm must not be empty")]
    EmptyRealm,
    #[error("invalid configuration: realm must not contain ':' or control characters")]
    InvalidRealm,
    #[error("invalid configuration: vault-filepath must not be empty")]
    EmptyVaultPath,
    #[error("invalid configuration: vault-filepath must be an absolute path, got {path}")]
    RelativeVaultPath { path: String },
    #[error("invalid configuration: authentication-type must be basic or digest, got {value:?}")]
    UnknownScheme { value: String },
}

impl ConfigError {
    /// The configuration key this error refers to, if any.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            ConfigError::Io(_) | ConfigError::Parse(_) => None,
            ConfigError::Missing { field }
            | ConfigError::NotAnInteger { field }
            | ConfigError::NotPositive { field, .. }
            | ConfigError::OutOfRange { field, .. }
            | ConfigError::ExceedsMax { field, .. }
            | ConfigError::NotAString { field } => Some(*field),
            ConfigError::EmptyRealm | ConfigError::InvalidRealm => Some(REALM),
            ConfigError::EmptyVaultPath | ConfigError::RelativeVaultPath { .. } => {
                Some(VAULT_FILEPATH)
            }
            ConfigError::UnknownScheme { .. } => Some(AUTHENTICATION_TYPE),
        }
    }
}

/// The authentication mode; it decides the vault file format and hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthenticationScheme {
    Basic,
    Digest,
}

impl AuthenticationScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthenticationScheme::Basic => "basic",
            AuthenticationScheme::Digest => "digest",
        }
    }
}

impl fmt::Display for AuthenticationScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthenticationScheme {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.eq_ignore_ascii_case("basic") {
            Ok(AuthenticationScheme::Basic)
        } else if value.eq_ignore_ascii_case("digest") {
            Ok(AuthenticationScheme::Digest)
        } else {
            Err(ConfigError::UnknownScheme {
                value: value.to_string(),
            })
        }
    }
}

/// Sizing of the external auth-helper worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WorkerPool {
    pub max: u32,
    pub startup: u32,
    pub idle: u32,
}

/// Digest nonce lifecycle. Durations are whole minutes, as Squid takes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NonceLifecycle {
    pub garbage_interval_minutes: u32,
    pub max_duration_minutes: u32,
    pub max_count: u32,
}

/// A validated configuration snapshot. Only [`validate`] builds one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemeConfig {
    scheme: AuthenticationScheme,
    realm: String,
    vault_path: PathBuf,
    workers: WorkerPool,
    nonce: NonceLifecycle,
}

impl SchemeConfig {
    pub fn scheme(&self) -> AuthenticationScheme {
        self.scheme
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }

    pub fn vault_path(&self) -> &Path {
        &self.vault_path
    }

    pub fn workers(&self) -> WorkerPool {
        self.workers
    }

    pub fn nonce(&self) -> NonceLifecycle {
        self.nonce
    }
}

/// Unvalidated configuration as received: key to scalar JSON value.
/// `null` values count as absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawConfig {
    values: BTreeMap<String, Value>,
}

impl RawConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let parsed: Value =
            serde_json::from_str(text).map_err(|e| ConfigError::Parse(format!("{e}")))?;
        match parsed {
            Value::Object(map) => Ok(Self {
                values: map.into_iter().collect(),
            }),
            other => Err(ConfigError::Parse(format!(
                "expected a JSON object of settings, found {}",
                json_kind(&other)
            ))),
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&text)
    }

    /// Sets a value, replacing any previous one.
    pub fn set(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.values.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key).filter(|value| !value.is_null())
    }
}

/// Anything that can produce a fresh [`SchemeConfig`] for one event.
pub trait ConfigSource {
    fn scheme_config(&self) -> Result<SchemeConfig, ConfigError>;
}

impl ConfigSource for RawConfig {
    fn scheme_config(&self) -> Result<SchemeConfig, ConfigError> {
        validate(self)
    }
}

impl ConfigSource for Path {
    fn scheme_config(&self) -> Result<SchemeConfig, ConfigError> {
        load_config(self)
    }
}

impl ConfigSource for PathBuf {
    fn scheme_config(&self) -> Result<SchemeConfig, ConfigError> {
        load_config(self)
    }
}

/// Reads a JSON settings file and validates it.
pub fn load_config(path: impl AsRef<Path>) -> Result<SchemeConfig, ConfigError> {
    validate(&RawConfig::load(path)?)
}

/// Validates raw settings. Checks run in this order and the first failure is
/// returned: each numeric field, the worker pool bounds, the realm, the vault
/// path, then the authentication type.
pub fn validate(raw: &RawConfig) -> Result<SchemeConfig, ConfigError> {
    for key in raw.values.keys() {
        if !KNOWN_KEYS.contains(&key.as_str()) {
            debug!(key = %key, "ignoring unknown configuration key");
        }
    }

    let mut numbers = [0u32; NUMERIC_FIELDS.len()];
    for (slot, (field, default)) in numbers.iter_mut().zip(NUMERIC_FIELDS) {
        *slot = positive_integer(raw, field, default)?;
    }
    let [max, startup, idle, garbage_interval, max_duration, max_count] = numbers;

    for (field, value) in [(WORKERS_STARTUP, startup), (WORKERS_IDLE, idle)] {
        if value > max {
            return Err(ConfigError::ExceedsMax {
                field,
                value,
                bound: WORKERS_MAX,
                max,
            });
        }
    }

    let realm = required_string(raw, REALM)?;
    if realm.trim().is_empty() {
        return Err(ConfigError::EmptyRealm);
    }
    if realm.chars().any(|c| c == ':' || c.is_control()) {
        return Err(ConfigError::InvalidRealm);
    }

    let vault_path = required_string(raw, VAULT_FILEPATH)?;
    if vault_path.is_empty() {
        return Err(ConfigError::EmptyVaultPath);
    }
    let vault_path = PathBuf::from(vault_path);
    if !vault_path.is_absolute() {
        return Err(ConfigError::RelativeVaultPath {
            path: vault_path.display().to_string(),
        });
    }

    let scheme = match raw.get(AUTHENTICATION_TYPE) {
        None => AuthenticationScheme::Digest,
        Some(Value::String(text)) => text.parse()?,
        Some(_) => {
            return Err(ConfigError::NotAString {
                field: AUTHENTICATION_TYPE,
            })
        }
    };

    Ok(SchemeConfig {
        scheme,
        realm: realm.to_string(),
        vault_path,
        workers: WorkerPool { max, startup, idle },
        nonce: NonceLifecycle {
            garbage_interval_minutes: garbage_interval,
            max_duration_minutes: max_duration,
            max_count,
        },
    })
}

fn positive_integer(
    raw: &RawConfig,
    field: &'static str,
    default: u32,
) -> Result<u32, ConfigError> {
    let value = match raw.get(field) {
        None => return Ok(default),
        Some(Value::Number(number)) => number,
        Some(_) => return Err(ConfigError::NotAnInteger { field }),
    };

    if let Some(signed) = value.as_i64() {
        if signed <= 0 {
            return Err(ConfigError::NotPositive {
                field,
                value: signed,
            });
        }
    }
    let unsigned = value
        .as_u64()
        .ok_or(ConfigError::NotAnInteger { field })?;
    u32::try_from(unsigned).map_err(|_| ConfigError::OutOfRange {
        field,
        value: unsigned.to_string(),
    })
}

fn required_string<'a>(raw: &'a RawConfig, field: &'static str) -> Result<&'a str, ConfigError> {
    match raw.get(field) {
        None => Err(ConfigError::Missing { field }),
        Some(Value::String(text)) => Ok(text.as_str()),
        Some(_) => Err(ConfigError::NotAString { field }),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::NamedTempFile;

    fn base() -> RawConfig {
        RawConfig::new()
            .set(REALM, "proxy")
            .set(VAULT_FILEPATH, "/var/lib/squid/passwords")
    }

    #[test]
    fn applies_defaults() {
        let config = validate(&base()).expect("config should validate");
        assert_eq!(config.scheme(), AuthenticationScheme::Digest);
        assert_eq!(config.realm(), "proxy");
        assert_eq!(config.vault_path(), Path::new("/var/lib/squid/passwords"));
        assert_eq!(
            config.workers(),
            WorkerPool {
                max: 20,
                startup: 1,
                idle: 1
            }
        );
        assert_eq!(config.nonce().garbage_interval_minutes, 5);
        assert_eq!(config.nonce().max_duration_minutes, 30);
        assert_eq!(config.nonce().max_count, 50);
    }

    #[test]
    fn scheme_matches_case_insensitively() {
        let config = validate(&base().set(AUTHENTICATION_TYPE, "BaSiC")).expect("valid");
        assert_eq!(config.scheme(), AuthenticationScheme::Basic);
        let config = validate(&base().set(AUTHENTICATION_TYPE, "DIGEST")).expect("valid");
        assert_eq!(config.scheme(), AuthenticationScheme::Digest);
    }

    #[test]
    fn rejects_startup_above_max() {
        let raw = base().set(WORKERS_STARTUP, 50).set(WORKERS_MAX, 10);
        let err = validate(&raw).unwrap_err();
        assert_eq!(err.field(), Some(WORKERS_STARTUP));
        assert!(matches!(
            err,
            ConfigError::ExceedsMax {
                value: 50,
                max: 10,
                ..
            }
        ));
    }

    #[test]
    fn rejects_idle_above_max() {
        let raw = base().set(WORKERS_IDLE, 11).set(WORKERS_MAX, 10);
        assert_eq!(validate(&raw).unwrap_err().field(), Some(WORKERS_IDLE));
    }

    #[test]
    fn bounds_are_inclusive() {
        let raw = base()
            .set(WORKERS_MAX, 5)
            .set(WORKERS_STARTUP, 5)
            .set(WORKERS_IDLE, 5);
        assert!(validate(&raw).is_ok());
    }

    #[test]
    fn rejects_non_positive_numbers() {
        for field in [
            WORKERS_MAX,
            WORKERS_STARTUP,
            WORKERS_IDLE,
            NONCE_GARBAGE_INTERVAL,
            NONCE_MAX_DURATION,
            NONCE_MAX_COUNT,
        ] {
            let err = validate(&base().set(field, 0)).unwrap_err();
            assert_eq!(err, ConfigError::NotPositive { field, value: 0 });
            let err = validate(&base().set(field, -3)).unwrap_err();
            assert_eq!(err, ConfigError::NotPositive { field, value: -3 });
        }
    }

    #[test]
    fn rejects_strings_and_floats_for_numbers() {
        let err = validate(&base().set(WORKERS_MAX, "20")).unwrap_err();
        assert_eq!(err, ConfigError::NotAnInteger { field: WORKERS_MAX });
        let err = validate(&base().set(NONCE_MAX_COUNT, 2.5)).unwrap_err();
        assert_eq!(
            err,
            ConfigError::NotAnInteger {
                field: NONCE_MAX_COUNT
            }
        );
    }

    #[test]
    fn rejects_values_beyond_u32() {
        let err = validate(&base().set(NONCE_MAX_COUNT, u64::from(u32::MAX) + 1)).unwrap_err();
        assert_eq!(err.field(), Some(NONCE_MAX_COUNT));
        assert!(matches!(err, ConfigError::OutOfRange { .. }));
    }

    #[test]
    fn numeric_checks_run_before_bounds_and_strings() {
        let raw = RawConfig::new()
            .set(WORKERS_STARTUP, 50)
            .set(WORKERS_MAX, 10)
            .set(NONCE_MAX_COUNT, 0);
        let err = validate(&raw).unwrap_err();
        assert_eq!(err.field(), Some(NONCE_MAX_COUNT));

        let raw = RawConfig::new().set(WORKERS_STARTUP, 50).set(WORKERS_MAX, 10);
        assert_eq!(validate(&raw).unwrap_err().field(), Some(WORKERS_STARTUP));
    }

    #[test]
    fn realm_checked_before_vault_path() {
        let err = validate(&RawConfig::new()).unwrap_err();
        assert_eq!(err, ConfigError::Missing { field: REALM });

        let raw = RawConfig::new()
            .set(REALM, "  ")
            .set(VAULT_FILEPATH, "relative/path");
        assert_eq!(validate(&raw).unwrap_err(), ConfigError::EmptyRealm);
    }

    #[test]
    fn rejects_realm_that_would_break_the_vault_format() {
        let err = validate(&base().set(REALM, "a:b")).unwrap_err();
        assert_eq!(err, ConfigError::InvalidRealm);
        let err = validate(&base().set(REALM, "line\nbreak")).unwrap_err();
        assert_eq!(err, ConfigError::InvalidRealm);
    }

    #[test]
    fn vault_path_must_be_absolute() {
        let err = validate(&base().set(VAULT_FILEPATH, "")).unwrap_err();
        assert_eq!(err, ConfigError::EmptyVaultPath);
        let err = validate(&base().set(VAULT_FILEPATH, "etc/squid/passwords")).unwrap_err();
        assert_eq!(err.field(), Some(VAULT_FILEPATH));
        let err = validate(&RawConfig::new().set(REALM, "proxy")).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Missing {
                field: VAULT_FILEPATH
            }
        );
    }

    #[test]
    fn rejects_unknown_scheme_last() {
        let err = validate(&base().set(AUTHENTICATION_TYPE, "ntlm")).unwrap_err();
        assert_eq!(
            err,
            ConfigError::UnknownScheme {
                value: "ntlm".to_string()
            }
        );
        let raw = base()
            .set(AUTHENTICATION_TYPE, "ntlm")
            .set(VAULT_FILEPATH, "relative");
        assert_eq!(validate(&raw).unwrap_err().field(), Some(VAULT_FILEPATH));
    }

    #[test]
    fn null_values_fall_back_to_defaults() {
        let raw = base().set(WORKERS_MAX, Value::Null);
        assert_eq!(validate(&raw).expect("valid").workers().max, 20);
    }

    #[test]
    fn loads_config_from_json_file() {
        let payload = json!({
            "authentication-type": "basic",
            "realm": "office",
            "vault-filepath": "/etc/squid/htpasswd",
            "workers-max": 8,
            "workers-startup": 2,
            "workers-idle": 3,
            "unrelated": true
        });
        let file = NamedTempFile::new().expect("temp file");
        fs::write(file.path(), serde_json::to_vec(&payload).unwrap()).unwrap();

        let config = load_config(file.path()).expect("config should load");
        assert_eq!(config.scheme(), AuthenticationScheme::Basic);
        assert_eq!(config.realm(), "office");
        assert_eq!(config.workers().idle, 3);
        assert_eq!(file.path().to_path_buf().scheme_config().unwrap(), config);
    }

    #[test]
    fn reports_unreadable_and_malformed_files() {
        let err = load_config("/nonexistent/htfile-auth/config.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
        assert_eq!(err.field(), None);

        let err = RawConfig::from_json_str("[1, 2]").unwrap_err();
        assert!(format!("{err}").contains("an array"));
        let err = RawConfig::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
