//! Pluggable storage-adapter contract.
//!
//! The runtime defines the contract; backends (memory, file, database)
//! live with their consumers. Adapters store opaque [`PersistedState`]
//! payloads under string keys. The runtime serializes its own access per
//! key; adapters must tolerate concurrent access to *different* keys.

// Layer 1: Standard library imports
use std::time::Duration;

// Layer 2: Third-party crate imports
use async_trait::async_trait;

// Layer 3: Internal module imports
use super::error::StorageError;
use super::snapshot::PersistedState;

/// Contract every storage backend implements.
///
/// # Example
///
/// ```rust,ignore
/// struct MemoryAdapter {
///     entries: tokio::sync::Mutex<HashMap<String, PersistedState>>,
/// }
///
/// #[async_trait]
/// impl StorageAdapter for MemoryAdapter {
///     async fn save(&self, key: &str, state: PersistedState) -> Result<(), StorageError> {
///         self.entries.lock().await.insert(key.to_string(), state);
///         Ok(())
///     }
///     // ...
/// }
/// ```
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Store a snapshot under `key`, replacing any previous value.
    async fn save(&self, key: &str, state: PersistedState) -> Result<(), StorageError>;

    /// Load the snapshot stored under `key`, if any.
    async fn load(&self, key: &str) -> Result<Option<PersistedState>, StorageError>;

    /// Delete the snapshot stored under `key`. Returns `true` if a value
    /// was removed.
    async fn delete(&self, key: &str) -> Result<bool, StorageError>;

    /// Whether a snapshot exists under `key`.
    async fn exists(&self, key: &str) -> Result<bool, StorageError>;

    /// List stored keys, optionally filtered by prefix.
    async fn list_keys(&self, prefix: Option<&str>) -> Result<Vec<String>, StorageError>;

    /// Remove snapshots older than `max_age`, returning how many were
    /// deleted, or `None` when the backend has no native sweep (the
    /// manager then sweeps manually via `list_keys` + `load`).
    async fn cleanup(&self, _max_age: Duration) -> Result<Option<usize>, StorageError> {
        Ok(None)
    }

    /// Release backend resources. Called at most once, on shutdown.
    async fn close(&self) -> Result<(), StorageError> {
        Ok(())
    }
}
