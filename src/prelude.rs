//! Convenience re-exports for the common case.
//!
//! ```rust
//! use gensrv::prelude::*;
//! ```

pub use crate::events::{LifecycleEvent, LifecycleEventKind};
pub use crate::persistence::{
    PersistAction, PersistenceBinding, PersistenceConfig, PersistenceManager, SnapshotMetadata,
    StorageAdapter,
};
pub use crate::registry::Registry;
pub use crate::server::{
    self, CallError, ExitReason, GenServer, ServerContext, ServerHandle, ServerOptions, ServerRef,
    ServerStatus, SpawnError,
};
pub use crate::supervisor::{
    AutoShutdown, ChildSpec, ChildTemplate, RestartIntensity, RestartPolicy, Strategy, Supervisor,
    SupervisorError, SupervisorOptions,
};
pub use crate::timer::{TimerService, TimerServiceOptions};
pub use crate::util::{ServerId, TimerId};
