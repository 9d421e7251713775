//! Server engine: behavior trait, handles, context, lifecycle and the
//! worker that serializes handler execution.

pub mod context;
pub mod engine;
pub mod error;
pub mod handle;
pub mod lifecycle;
pub mod traits;

pub use context::ServerContext;
pub use engine::{
    start, start_with, ServerOptions, DEFAULT_INIT_TIMEOUT, DEFAULT_SHUTDOWN_TIMEOUT,
};
pub use error::{CallError, SpawnError};
pub use handle::{Caster, ServerHandle, ServerRef, ServerStats, TimerToken, DEFAULT_CALL_TIMEOUT};
pub use lifecycle::{ExitReason, ServerStatus};
pub use traits::GenServer;
