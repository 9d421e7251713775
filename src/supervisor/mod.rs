//! Supervisor engine: child lifecycle management under restart
//! strategies, restart-intensity throttling and auto-shutdown.

pub mod behavior;
pub mod error;
pub mod handle;
pub mod intensity;
pub mod types;

pub use error::SupervisorError;
pub use handle::{Supervisor, SupervisorOptions, DEFAULT_SUPERVISOR_SHUTDOWN_TIMEOUT};
pub use types::{
    AutoShutdown, ChildInfo, ChildSpec, ChildTemplate, RestartIntensity, RestartPolicy, Strategy,
    DEFAULT_CHILD_SHUTDOWN_TIMEOUT,
};
