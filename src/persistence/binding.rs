//! Per-server persistence binding.
//!
//! A binding connects one server to one storage key and carries the
//! serialization closures, lifecycle flags and hooks the engine needs.
//! The closures are captured where `S: Serialize + DeserializeOwned`
//! holds, so the `GenServer` trait itself stays free of serde bounds.

// Layer 1: Standard library imports
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

// Layer 3: Internal module imports
use super::error::PersistenceError;
use super::manager::{MigrateFn, PersistenceManager};

/// What to do with the state after a successful transition.
///
/// Returned by `GenServer::before_persist`.
pub enum PersistAction<S> {
    /// Persist the state as-is (the default).
    Save,

    /// Skip persistence for this transition.
    Skip,

    /// Persist a transformed value instead of the live state.
    Replace(S),
}

impl<S> fmt::Debug for PersistAction<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersistAction::Save => write!(f, "Save"),
            PersistAction::Skip => write!(f, "Skip"),
            PersistAction::Replace(_) => write!(f, "Replace(..)"),
        }
    }
}

type SerializeFn<S> = dyn Fn(&S) -> Result<Value, PersistenceError> + Send + Sync;
type DeserializeFn<S> = dyn Fn(Value) -> Result<S, PersistenceError> + Send + Sync;
type OnErrorFn = dyn Fn(&PersistenceError) + Send + Sync;

/// Binds a server's state to a storage key.
///
/// # Defaults
///
/// - `restore_on_start`: true
/// - `persist_on_shutdown`: true
/// - `cleanup_on_terminate`: false
/// - `debounce`: 100 ms (zero means write-through)
/// - `snapshot_interval`: none
///
/// # Example
///
/// ```rust,ignore
/// let binding = PersistenceBinding::<CounterState>::new(manager, "counter")
///     .debounce(Duration::from_millis(250))
///     .cleanup_on_terminate(true)
///     .migrate(|old, from| { /* ... */ });
/// ```
pub struct PersistenceBinding<S> {
    manager: Arc<PersistenceManager>,
    key: String,
    restore_on_start: bool,
    persist_on_shutdown: bool,
    cleanup_on_terminate: bool,
    debounce: Duration,
    snapshot_interval: Option<Duration>,
    serialize: Box<SerializeFn<S>>,
    deserialize: Box<DeserializeFn<S>>,
    migrate: Option<Box<MigrateFn>>,
    on_error: Option<Box<OnErrorFn>>,
}

impl<S> PersistenceBinding<S>
where
    S: Serialize + DeserializeOwned + Send + 'static,
{
    /// Bind state type `S` to `key` on the given manager.
    pub fn new(manager: Arc<PersistenceManager>, key: impl Into<String>) -> Self {
        Self {
            manager,
            key: key.into(),
            restore_on_start: true,
            persist_on_shutdown: true,
            cleanup_on_terminate: false,
            debounce: Duration::from_millis(100),
            snapshot_interval: None,
            serialize: Box::new(|state: &S| {
                serde_json::to_value(state)
                    .map_err(|source| PersistenceError::Serialization { source })
            }),
            deserialize: Box::new(|value: Value| {
                serde_json::from_value(value)
                    .map_err(|source| PersistenceError::Deserialization { source })
            }),
            migrate: None,
            on_error: None,
        }
    }
}

impl<S> PersistenceBinding<S> {
    /// Whether a valid snapshot replaces the init state. Default true.
    pub fn restore_on_start(mut self, enabled: bool) -> Self {
        self.restore_on_start = enabled;
        self
    }

    /// Whether a final flush runs before terminate. Default true.
    pub fn persist_on_shutdown(mut self, enabled: bool) -> Self {
        self.persist_on_shutdown = enabled;
        self
    }

    /// Whether the snapshot is deleted after terminate. Default false.
    pub fn cleanup_on_terminate(mut self, enabled: bool) -> Self {
        self.cleanup_on_terminate = enabled;
        self
    }

    /// Coalescing window for background saves. Zero writes through.
    pub fn debounce(mut self, window: Duration) -> Self {
        self.debounce = window;
        self
    }

    /// Periodic forced-flush interval.
    pub fn snapshot_interval(mut self, interval: Duration) -> Self {
        self.snapshot_interval = Some(interval);
        self
    }

    /// Schema migration hook invoked when the stored version differs
    /// from the manager's current version.
    pub fn migrate<F>(mut self, f: F) -> Self
    where
        F: Fn(Value, u32) -> Result<Value, PersistenceError> + Send + Sync + 'static,
    {
        self.migrate = Some(Box::new(f));
        self
    }

    /// Callback for background persistence failures.
    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&PersistenceError) + Send + Sync + 'static,
    {
        self.on_error = Some(Box::new(f));
        self
    }

    // ------------------------------------------------------------------
    // Engine-facing accessors
    // ------------------------------------------------------------------

    pub(crate) fn manager(&self) -> &Arc<PersistenceManager> {
        &self.manager
    }

    pub(crate) fn key(&self) -> &str {
        &self.key
    }

    pub(crate) fn restores_on_start(&self) -> bool {
        self.restore_on_start
    }

    pub(crate) fn persists_on_shutdown(&self) -> bool {
        self.persist_on_shutdown
    }

    pub(crate) fn cleans_up_on_terminate(&self) -> bool {
        self.cleanup_on_terminate
    }

    pub(crate) fn debounce_window(&self) -> Duration {
        self.debounce
    }

    pub(crate) fn snapshot_every(&self) -> Option<Duration> {
        self.snapshot_interval
    }

    pub(crate) fn serialize_state(&self, state: &S) -> Result<Value, PersistenceError> {
        (self.serialize)(state)
    }

    pub(crate) fn deserialize_state(&self, value: Value) -> Result<S, PersistenceError> {
        (self.deserialize)(value)
    }

    pub(crate) fn migrate_hook(&self) -> Option<&MigrateFn> {
        self.migrate.as_deref()
    }

    pub(crate) fn report_error(&self, error: &PersistenceError) {
        if let Some(hook) = &self.on_error {
            hook(error);
        }
    }
}

impl<S> fmt::Debug for PersistenceBinding<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistenceBinding")
            .field("key", &self.key)
            .field("restore_on_start", &self.restore_on_start)
            .field("persist_on_shutdown", &self.persist_on_shutdown)
            .field("cleanup_on_terminate", &self.cleanup_on_terminate)
            .field("debounce", &self.debounce)
            .field("snapshot_interval", &self.snapshot_interval)
            .finish()
    }
}
