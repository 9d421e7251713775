//! Snapshot save/restore orchestration over a storage adapter.
//!
//! The manager wraps user state values into [`PersistedState`] payloads,
//! computes and verifies checksums, drives schema migration, rejects
//! stale snapshots and sweeps expired keys.

// Layer 1: Standard library imports
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use chrono::Utc;
use serde_json::Value;
use tracing::{debug, warn};

// Layer 3: Internal module imports
use super::adapter::StorageAdapter;
use super::error::PersistenceError;
use super::snapshot::{checksum_of, PersistedState, SnapshotMetadata};
use crate::util::ServerId;

/// Schema migration hook: `(old_state, old_version) -> new_state`.
///
/// Must return the state in the manager's current schema version.
pub type MigrateFn = dyn Fn(Value, u32) -> Result<Value, PersistenceError> + Send + Sync;

/// Configuration for a [`PersistenceManager`].
#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    /// Schema version written into new snapshots.
    pub schema_version: u32,

    /// Whether to compute and verify checksums.
    pub checksum: bool,

    /// Snapshots older than this are rejected at restore.
    pub max_state_age: Option<Duration>,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            schema_version: 1,
            checksum: true,
            max_state_age: None,
        }
    }
}

/// Wraps a storage adapter with snapshot semantics.
///
/// # Example
///
/// ```rust,ignore
/// let manager = PersistenceManager::new(adapter, PersistenceConfig::default());
/// let meta = manager.save("counter", json!({"count": 5}), server_id, None).await?;
/// let (state, meta) = manager.load("counter", None).await?;
/// ```
pub struct PersistenceManager {
    adapter: Arc<dyn StorageAdapter>,
    config: PersistenceConfig,
}

impl PersistenceManager {
    /// Create a manager over `adapter`.
    pub fn new(adapter: Arc<dyn StorageAdapter>, config: PersistenceConfig) -> Self {
        Self { adapter, config }
    }

    /// The manager's configuration.
    pub fn config(&self) -> &PersistenceConfig {
        &self.config
    }

    /// The underlying adapter.
    pub fn adapter(&self) -> &Arc<dyn StorageAdapter> {
        &self.adapter
    }

    /// Wrap `state` in a snapshot and store it under `key`.
    ///
    /// Returns the metadata that was written.
    pub async fn save(
        &self,
        key: &str,
        state: Value,
        server_id: ServerId,
        server_name: Option<&str>,
    ) -> Result<SnapshotMetadata, PersistenceError> {
        let checksum = if self.config.checksum {
            Some(checksum_of(&state)?)
        } else {
            None
        };

        let metadata = SnapshotMetadata {
            persisted_at: Utc::now(),
            server_id,
            server_name: server_name.map(str::to_owned),
            schema_version: self.config.schema_version,
            checksum,
        };

        self.adapter
            .save(
                key,
                PersistedState {
                    state,
                    metadata: metadata.clone(),
                },
            )
            .await?;

        debug!(key, schema_version = metadata.schema_version, "snapshot saved");
        Ok(metadata)
    }

    /// Load, verify and (if needed) migrate the snapshot under `key`.
    ///
    /// Verification order: checksum, schema migration, staleness. The
    /// returned metadata is the stored one; after a migration its
    /// `schema_version` still reports the version found on disk.
    pub async fn load(
        &self,
        key: &str,
        migrate: Option<&MigrateFn>,
    ) -> Result<(Value, SnapshotMetadata), PersistenceError> {
        let snapshot = self
            .adapter
            .load(key)
            .await?
            .ok_or_else(|| PersistenceError::StateNotFound { key: key.into() })?;

        if self.config.checksum {
            if let Some(expected) = &snapshot.metadata.checksum {
                let actual = checksum_of(&snapshot.state)?;
                if &actual != expected {
                    return Err(PersistenceError::ChecksumMismatch {
                        key: key.into(),
                        expected: expected.clone(),
                        actual,
                    });
                }
            }
        }

        if let Some(max_age) = self.config.max_state_age {
            let age = snapshot.age(Utc::now());
            if age > max_age {
                return Err(PersistenceError::StaleState {
                    key: key.into(),
                    age,
                    max_age,
                });
            }
        }

        let stored_version = snapshot.metadata.schema_version;
        let current = self.config.schema_version;
        let state = if stored_version == current {
            snapshot.state
        } else {
            let migrate = migrate.ok_or_else(|| PersistenceError::Migration {
                key: key.into(),
                from: stored_version,
                to: current,
                reason: "no migration hook configured".into(),
            })?;
            migrate(snapshot.state, stored_version).map_err(|e| PersistenceError::Migration {
                key: key.into(),
                from: stored_version,
                to: current,
                reason: e.to_string(),
            })?
        };

        Ok((state, snapshot.metadata))
    }

    /// Delete the snapshot under `key`. Returns `true` if one existed.
    pub async fn delete(&self, key: &str) -> Result<bool, PersistenceError> {
        Ok(self.adapter.delete(key).await?)
    }

    /// Whether a snapshot exists under `key`.
    pub async fn exists(&self, key: &str) -> Result<bool, PersistenceError> {
        Ok(self.adapter.exists(key).await?)
    }

    /// List stored keys, optionally filtered by prefix.
    pub async fn list_keys(&self, prefix: Option<&str>) -> Result<Vec<String>, PersistenceError> {
        Ok(self.adapter.list_keys(prefix).await?)
    }

    /// Remove snapshots older than `max_age`, returning the count.
    ///
    /// Prefers the adapter's native sweep; otherwise walks every key and
    /// deletes expired entries one by one. Unreadable entries are skipped
    /// and logged, not deleted.
    pub async fn cleanup(&self, max_age: Duration) -> Result<usize, PersistenceError> {
        if let Some(count) = self.adapter.cleanup(max_age).await? {
            return Ok(count);
        }

        let now = Utc::now();
        let mut removed = 0usize;
        for key in self.adapter.list_keys(None).await? {
            match self.adapter.load(&key).await {
                Ok(Some(snapshot)) if snapshot.age(now) > max_age => {
                    if self.adapter.delete(&key).await? {
                        removed += 1;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(key = %key, error = %e, "skipping unreadable snapshot during cleanup");
                }
            }
        }
        Ok(removed)
    }
}
