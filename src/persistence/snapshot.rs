//! Persisted snapshot format and checksum helpers.
//!
//! A snapshot wraps the serialized user state together with metadata
//! (timestamp, owning server, schema version, checksum). The canonical
//! byte sequence covered by the checksum is the `serde_json` encoding of
//! the state value; `serde_json`'s map type keeps keys sorted, so the
//! encoding is stable across processes.

// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

// Layer 3: Internal module imports
use super::error::PersistenceError;
use crate::util::ServerId;

/// Metadata attached to every persisted snapshot.
///
/// # Wire format
///
/// `persisted_at` serializes as unix milliseconds; `checksum` is the hex
/// SHA-256 of the canonical state bytes when checksums are enabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    /// When the snapshot was written.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub persisted_at: DateTime<Utc>,

    /// Server that owned the state.
    pub server_id: ServerId,

    /// Registered name of the server, if any.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub server_name: Option<String>,

    /// Schema version of the state payload.
    pub schema_version: u32,

    /// Hex SHA-256 over the canonical state bytes.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub checksum: Option<String>,
}

/// A serialized user state plus its metadata, as handed to adapters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedState {
    /// Serialized user state.
    pub state: Value,

    /// Snapshot metadata.
    pub metadata: SnapshotMetadata,
}

impl PersistedState {
    /// Age of this snapshot relative to `now`.
    ///
    /// Clock skew can make `persisted_at` sit in the future; that counts
    /// as zero age.
    pub fn age(&self, now: DateTime<Utc>) -> std::time::Duration {
        now.signed_duration_since(self.metadata.persisted_at)
            .to_std()
            .unwrap_or(std::time::Duration::ZERO)
    }
}

/// Canonical byte encoding of a state value.
pub fn canonical_bytes(state: &Value) -> Result<Vec<u8>, PersistenceError> {
    serde_json::to_vec(state).map_err(|source| PersistenceError::Serialization { source })
}

/// Hex SHA-256 over the canonical encoding of `state`.
pub fn checksum_of(state: &Value) -> Result<String, PersistenceError> {
    let bytes = canonical_bytes(state)?;
    let digest = Sha256::digest(&bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    Ok(out)
}
