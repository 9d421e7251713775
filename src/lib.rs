//! # gensrv - GenServer + Supervisor Runtime for Tokio
//!
//! An in-process actor runtime modeled on Erlang/OTP: isolated stateful
//! servers with serialized message handling, supervision trees with
//! configurable restart strategies, a process-wide named registry,
//! durable timers, and snapshot persistence with checksums and schema
//! migration.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use gensrv::prelude::*;
//! use async_trait::async_trait;
//! use std::convert::Infallible;
//!
//! struct Counter;
//!
//! enum CounterCall { Get }
//! enum CounterCast { Increment }
//!
//! #[async_trait]
//! impl GenServer for Counter {
//!     type State = u64;
//!     type Call = CounterCall;
//!     type Cast = CounterCast;
//!     type Reply = u64;
//!     type Error = Infallible;
//!
//!     async fn init(&mut self, _ctx: &mut ServerContext<Self>) -> Result<u64, Infallible> {
//!         Ok(0)
//!     }
//!
//!     async fn handle_call(
//!         &mut self,
//!         _request: CounterCall,
//!         state: &mut u64,
//!         _ctx: &mut ServerContext<Self>,
//!     ) -> Result<u64, Infallible> {
//!         Ok(*state)
//!     }
//!
//!     async fn handle_cast(
//!         &mut self,
//!         _message: CounterCast,
//!         state: &mut u64,
//!         _ctx: &mut ServerContext<Self>,
//!     ) -> Result<(), Infallible> {
//!         *state += 1;
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let counter = server::start(Counter).await?;
//!     counter.cast(CounterCast::Increment);
//!     counter.cast(CounterCast::Increment);
//!     let value = counter.call(CounterCall::Get).await?;
//!     assert_eq!(value, 2);
//!     counter.stop(ExitReason::Normal).await;
//!     Ok(())
//! }
//! ```
//!
//! # Execution model
//!
//! Every server owns a mailbox and a dedicated worker task. The worker
//! dequeues one envelope at a time and awaits the handler to completion
//! before touching the next, so handlers for one server never overlap
//! and each state transition is atomic to outside observers. Different
//! servers run independently; all cross-server communication is message
//! passing.
//!
//! Handler errors follow three regimes:
//!
//! - a `handle_call` error is returned to the caller; the server keeps
//!   running
//! - a `handle_cast` or `init` error terminates the server with an error
//!   reason and notifies its supervisor
//! - engine errors (timeouts, not-running, name conflicts) surface from
//!   the public API and never kill a server
//!
//! # Supervision
//!
//! [`supervisor::Supervisor`] manages children under four strategies
//! (OneForOne, OneForAll, RestForOne, SimpleOneForOne) with per-child
//! restart policies (Permanent, Transient, Temporary), sliding-window
//! restart-intensity throttling, significant-child auto-shutdown, and
//! reverse-start-order shutdown. The supervisor is itself a server, so
//! its child table enjoys the same serialization guarantees.
//!
//! # Module Organization
//!
//! ## Core
//! - [`server`] - GenServer trait, handles, context, lifecycle, engine
//! - [`message`] - envelope types carried by mailboxes
//! - [`mailbox`] - unbounded MPSC mailbox with atomic metrics
//! - [`registry`] - process-wide name -> handle table
//!
//! ## Fault tolerance
//! - [`supervisor`] - supervision trees and restart strategies
//! - [`events`] - lifecycle-event broadcast hub
//!
//! ## Durability
//! - [`persistence`] - storage-adapter contract, snapshots, manager,
//!   per-server bindings
//! - [`timer`] - durable scheduled/repeating cast delivery
//!
//! ## Infrastructure
//! - [`util`] - identifier newtypes
//!
//! # See Also
//!
//! - [Erlang/OTP Documentation](https://www.erlang.org/doc/) - the
//!   semantics this runtime mirrors

pub mod events;
pub mod mailbox;
pub mod message;
pub mod persistence;
pub mod prelude;
pub mod registry;
pub mod server;
pub mod supervisor;
pub mod timer;
pub mod util;

// Re-export commonly used types
pub use events::{LifecycleEvent, LifecycleEventKind};
pub use mailbox::MailboxMetrics;
pub use persistence::{
    PersistAction, PersistedState, PersistenceBinding, PersistenceConfig, PersistenceError,
    PersistenceManager, SnapshotMetadata, StorageAdapter, StorageError,
};
pub use registry::{Registry, RegistryError};
pub use server::{
    start, start_with, CallError, Caster, ExitReason, GenServer, ServerContext, ServerHandle,
    ServerOptions, ServerRef, ServerStats, ServerStatus, SpawnError, TimerToken,
};
pub use supervisor::{
    AutoShutdown, ChildInfo, ChildSpec, ChildTemplate, RestartIntensity, RestartPolicy, Strategy,
    Supervisor, SupervisorError, SupervisorOptions,
};
pub use timer::{TimerEntry, TimerError, TimerService, TimerServiceOptions};
pub use util::{CallId, ServerId, TimerId};
