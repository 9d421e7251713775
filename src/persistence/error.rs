//! Error types for snapshot persistence.

// Layer 1: Standard library imports
use std::time::Duration;

// Layer 2: Third-party crate imports
use thiserror::Error;

// Layer 3: Internal module imports
// (none)

/// Error raised by a storage adapter backend.
///
/// Adapters report the failed operation by name (`save`, `load`,
/// `delete`, ...) so callers can log and retry without knowing the
/// backend.
#[derive(Debug, Error)]
#[error("storage operation '{operation}' failed: {message}")]
pub struct StorageError {
    /// Adapter operation that failed.
    pub operation: String,

    /// Backend-specific failure description.
    pub message: String,
}

impl StorageError {
    /// Create a new storage error for the given operation.
    pub fn new(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

/// Errors that can occur during snapshot save, restore or cleanup.
///
/// Background saves surface these through the binding's `on_error`
/// callback; explicit calls (`checkpoint`, manager methods) return them
/// directly.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// No snapshot exists under the requested key.
    #[error("no persisted state found for key '{key}'")]
    StateNotFound { key: String },

    /// The stored payload could not be interpreted as a snapshot.
    #[error("persisted state for key '{key}' is corrupted: {reason}")]
    CorruptedState { key: String, reason: String },

    /// The stored checksum does not match the canonical state bytes.
    #[error("checksum mismatch for key '{key}': expected {expected}, computed {actual}")]
    ChecksumMismatch {
        key: String,
        expected: String,
        actual: String,
    },

    /// The snapshot is older than the configured maximum age.
    #[error("persisted state for key '{key}' is stale: age {age:?} exceeds {max_age:?}")]
    StaleState {
        key: String,
        age: Duration,
        max_age: Duration,
    },

    /// The in-memory state could not be serialized.
    #[error("failed to serialize state: {source}")]
    Serialization {
        #[source]
        source: serde_json::Error,
    },

    /// The stored state could not be deserialized back into the state type.
    #[error("failed to deserialize state: {source}")]
    Deserialization {
        #[source]
        source: serde_json::Error,
    },

    /// Schema migration was required but missing or failed.
    #[error("migration from schema v{from} to v{to} failed for key '{key}': {reason}")]
    Migration {
        key: String,
        from: u32,
        to: u32,
        reason: String,
    },

    /// The storage adapter failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl PersistenceError {
    /// Returns `true` when the key simply has no snapshot yet.
    ///
    /// Restore treats this as "start fresh", not as a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, PersistenceError::StateNotFound { .. })
    }

    /// Returns `true` when the stored payload should not be trusted.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            PersistenceError::CorruptedState { .. } | PersistenceError::ChecksumMismatch { .. }
        )
    }
}
