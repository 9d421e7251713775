//! Durable timer entries.

// Layer 1: Standard library imports
use std::time::Duration;

// Layer 2: Third-party crate imports
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// Layer 3: Internal module imports
use crate::util::TimerId;

/// Storage-key prefix for timer entries.
pub const TIMER_KEY_PREFIX: &str = "timer/";

/// One durable scheduled delivery.
///
/// The payload is stored serialized so the entry survives process
/// restarts; the target is a registry name, resolved again at fire time
/// (a dead or unregistered target makes the fire a no-op).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerEntry {
    /// Unique timer id.
    pub id: TimerId,

    /// When the entry is due, as unix milliseconds on the wire.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub fire_at: DateTime<Utc>,

    /// Registry name of the target server.
    pub target: String,

    /// Serialized cast payload.
    pub message: Value,

    /// Repeat interval for recurring timers.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub repeat_interval_ms: Option<u64>,
}

impl TimerEntry {
    /// Whether the entry is due at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.fire_at <= now
    }

    /// Repeat interval as a `Duration`, if recurring.
    pub fn repeat_interval(&self) -> Option<Duration> {
        self.repeat_interval_ms.map(Duration::from_millis)
    }

    /// Adapter key this entry is stored under.
    pub fn storage_key(&self) -> String {
        storage_key(self.id)
    }
}

/// Adapter key for a timer id.
pub fn storage_key(id: TimerId) -> String {
    format!("{TIMER_KEY_PREFIX}{id}")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(fire_at: DateTime<Utc>) -> TimerEntry {
        TimerEntry {
            id: TimerId::new(),
            fire_at,
            target: "worker".into(),
            message: json!({"kind": "refresh"}),
            repeat_interval_ms: None,
        }
    }

    #[test]
    fn test_due_when_fire_time_passed() {
        let now = Utc::now();
        assert!(entry(now - chrono::Duration::seconds(1)).is_due(now));
        assert!(entry(now).is_due(now));
        assert!(!entry(now + chrono::Duration::seconds(1)).is_due(now));
    }

    #[test]
    fn test_repeat_interval_conversion() {
        let mut e = entry(Utc::now());
        assert_eq!(e.repeat_interval(), None);

        e.repeat_interval_ms = Some(1500);
        assert_eq!(e.repeat_interval(), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_storage_key_includes_prefix_and_id() {
        let e = entry(Utc::now());
        let key = e.storage_key();
        assert!(key.starts_with(TIMER_KEY_PREFIX));
        assert!(key.contains(&e.id.to_string()));
    }

    #[test]
    fn test_wire_format_roundtrip() {
        let e = TimerEntry {
            id: TimerId::new(),
            fire_at: Utc::now(),
            target: "cache".into(),
            message: json!("expire"),
            repeat_interval_ms: Some(60_000),
        };

        let value = serde_json::to_value(&e).unwrap();
        assert!(value["fire_at"].is_i64()); // unix millis
        let back: TimerEntry = serde_json::from_value(value).unwrap();
        assert_eq!(back.id, e.id);
        assert_eq!(back.repeat_interval_ms, Some(60_000));
        // Millisecond encoding keeps ordering even if sub-ms precision drops.
        assert_eq!(
            back.fire_at.timestamp_millis(),
            e.fire_at.timestamp_millis()
        );
    }
}
