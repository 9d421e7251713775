//! Snapshot persistence: adapter contract, snapshot format, manager and
//! per-server bindings.
//!
//! The engine calls into this module at three points of a server's life:
//! restore during init, debounced saves after state transitions, and the
//! final flush/cleanup during shutdown.

pub mod adapter;
pub mod binding;
pub mod error;
pub mod manager;
pub mod snapshot;

pub use adapter::StorageAdapter;
pub use binding::{PersistAction, PersistenceBinding};
pub use error::{PersistenceError, StorageError};
pub use manager::{MigrateFn, PersistenceConfig, PersistenceManager};
pub use snapshot::{canonical_bytes, checksum_of, PersistedState, SnapshotMetadata};
