//! Flattens a [`PublishedState`] into the ordered key/value records the proxy
//! reads from the relation.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::state::PublishedState;

pub const SCHEME: &str = "scheme";
pub const REALM: &str = "realm";
pub const VAULT_PATH: &str = "vault-path";
pub const VAULT_EXISTS: &str = "vault-exists";
pub const WORKERS_MAX: &str = "workers-max";
pub const WORKERS_STARTUP: &str = "workers-startup";
pub const WORKERS_IDLE: &str = "workers-idle";
pub const NONCE_GARBAGE_INTERVAL: &str = "nonce-garbage-interval";
pub const NONCE_MAX_DURATION: &str = "nonce-max-duration";
pub const NONCE_MAX_COUNT: &str = "nonce-max-count";

/// Wire order of the relation keys.
pub const KEYS: [&str; 10] = [
    SCHEME,
    REALM,
    VAULT_PATH,
    VAULT_EXISTS,
    WORKERS_MAX,
    WORKERS_STARTUP,
    WORKERS_IDLE,
    NONCE_GARBAGE_INTERVAL,
    NONCE_MAX_DURATION,
    NONCE_MAX_COUNT,
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelationRecord {
    pub key: &'static str,
    pub value: String,
}

/// Records in [`KEYS`] order. Equal states give equal output.
pub fn export(state: &PublishedState) -> Vec<RelationRecord> {
    let values = [
        state.scheme.to_string(),
        state.realm.clone(),
        state.vault_path.display().to_string(),
        state.vault_exists.to_string(),
        state.workers_max.to_string(),
        state.workers_startup.to_string(),
        state.workers_idle.to_string(),
        state.nonce_garbage_interval.to_string(),
        state.nonce_max_duration.to_string(),
        state.nonce_max_count.to_string(),
    ];
    KEYS.into_iter()
        .zip(values)
        .map(|(key, value)| RelationRecord { key, value })
        .collect()
}

/// JSON object with keys in record order.
pub fn to_json(records: &[RelationRecord]) -> Value {
    let mut map = Map::new();
    for record in records {
        map.insert(record.key.to_string(), Value::String(record.value.clone()));
    }
    Value::Object(map)
}

/// The peer-facing data channel.
pub trait RelationChannel {
    /// Whether a proxy is currently related.
    fn is_related(&self) -> bool;

    fn publish(&mut self, records: &[RelationRecord]);
}

/// Keeps every publication in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryChannel {
    related: bool,
    published: Vec<Vec<RelationRecord>>,
}

impl MemoryChannel {
    pub fn related() -> Self {
        Self {
            related: true,
            published: Vec::new(),
        }
    }

    pub fn unrelated() -> Self {
        Self::default()
    }

    pub fn set_related(&mut self, related: bool) {
        self.related = related;
    }

    pub fn published(&self) -> &[Vec<RelationRecord>] {
        &self.published
    }

    pub fn last(&self) -> Option<&[RelationRecord]> {
        self.published.last().map(Vec::as_slice)
    }

    /// Value of `key` in the latest publication.
    pub fn last_value(&self, key: &str) -> Option<&str> {
        self.last()?
            .iter()
            .find(|record| record.key == key)
            .map(|record| record.value.as_str())
    }
}

impl RelationChannel for MemoryChannel {
    fn is_related(&self) -> bool {
        self.related
    }

    fn publish(&mut self, records: &[RelationRecord]) {
        self.published.push(records.to_vec());
    }
}
