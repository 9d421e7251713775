//! Core GenServer behavior trait.
//!
//! A behavior bundles the handler set of one server: init, call/cast
//! handlers, and the optional terminate and persistence hooks. The
//! engine owns the state value and feeds it to handlers one envelope at
//! a time, so a transition is atomic from any other observer's
//! perspective.
//!
//! # Example
//!
//! ```rust
//! use gensrv::prelude::*;
//! use async_trait::async_trait;
//! use std::convert::Infallible;
//!
//! struct Counter;
//!
//! enum CounterCall {
//!     Get,
//! }
//!
//! enum CounterCast {
//!     Increment,
//! }
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
//! ```

// Layer 1: Standard library imports
use std::error::Error;

// Layer 2: Third-party crate imports
use async_trait::async_trait;

// Layer 3: Internal module imports
use super::context::ServerContext;
use super::lifecycle::ExitReason;
use crate::persistence::{PersistAction, SnapshotMetadata};

/// Handler set for one server.
///
/// # Associated Types
///
/// - `State`: server-private state, owned by the engine, mutated only by
///   this behavior's handlers
/// - `Call`: request payload of synchronous calls
/// - `Cast`: payload of one-way messages
/// - `Reply`: call response payload
/// - `Error`: the behavior's error type
///
/// # Error regimes
///
/// An `Err` from `handle_call` is returned to the caller as a typed
/// result; the server keeps running. An `Err` from `handle_cast` or
/// `init` terminates the server with an error reason and notifies its
/// supervisor. An `Err` from `terminate` is logged and does not prevent
/// shutdown.
#[async_trait]
pub trait GenServer: Sized + Send + 'static {
    /// Server-private state.
    type State: Send + 'static;

    /// Synchronous request payload.
    type Call: Send + 'static;

    /// One-way message payload.
    type Cast: Send + 'static;

    /// Call response payload.
    type Reply: Send + 'static;

    /// Behavior error type.
    type Error: Error + Send + Sync + 'static;

    /// Produce the initial state. Runs under the start deadline; an
    /// error or timeout fails the start.
    async fn init(&mut self, ctx: &mut ServerContext<Self>) -> Result<Self::State, Self::Error>;

    /// Handle a synchronous request and produce a reply.
    async fn handle_call(
        &mut self,
        request: Self::Call,
        state: &mut Self::State,
        ctx: &mut ServerContext<Self>,
    ) -> Result<Self::Reply, Self::Error>;

    /// Handle a one-way message.
    async fn handle_cast(
        &mut self,
        message: Self::Cast,
        state: &mut Self::State,
        ctx: &mut ServerContext<Self>,
    ) -> Result<(), Self::Error>;

    /// Cleanup hook, run exactly once during shutdown, bounded by the
    /// server's shutdown timeout. Errors are logged, not propagated.
    async fn terminate(
        &mut self,
        _reason: &ExitReason,
        _state: &mut Self::State,
    ) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Transform a restored snapshot before it replaces the init state.
    ///
    /// Runs after checksum verification and schema migration. An error
    /// fails the start.
    async fn on_restore(
        &mut self,
        restored: Self::State,
        _meta: &SnapshotMetadata,
    ) -> Result<Self::State, Self::Error> {
        Ok(restored)
    }

    /// Decide what to persist after a successful transition.
    ///
    /// Only consulted when the server was started with a persistence
    /// binding. The default persists the live state.
    fn before_persist(&self, _state: &Self::State) -> PersistAction<Self::State> {
        PersistAction::Save
    }
}
