//! Status reported to the host: active, or blocked with a reason.

use serde::Serialize;

pub const WAITING_FOR_RELATION: &str = "Waiting for integration with Squid proxy...";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "message", rename_all = "lowercase")]
pub enum UnitStatus {
    Active,
    Blocked(String),
}

impl UnitStatus {
    pub fn blocked(message: impl Into<String>) -> Self {
        UnitStatus::Blocked(message.into())
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, UnitStatus::Blocked(_))
    }
}

pub trait StatusSink {
    fn set_status(&mut self, status: UnitStatus);
}

/// Remembers the latest status.
#[derive(Debug, Clone, Default)]
pub struct MemoryStatus {
    current: Option<UnitStatus>,
}

impl MemoryStatus {
    pub fn current(&self) -> Option<&UnitStatus> {
        self.current.as_ref()
    }
}

impl StatusSink for MemoryStatus {
    fn set_status(&mut self, status: UnitStatus) {
        self.current = Some(status);
    }
}

#[cfg(test)]
mod tests {
    use super::UnitStatus;

    #[test]
    fn serializes_for_the_host() {
        assert_eq!(
            serde_json::to_string(&UnitStatus::Active).unwrap(),
            r#"{"status":"active"}"#
        );
        assert_eq!(
            serde_json::to_string(&UnitStatus::blocked("no relation")).unwrap(),
            r#"{"status":"blocked","message":"no relation"}"#
        );
    }
}
