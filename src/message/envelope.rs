//! Envelope wrapper for mailbox traffic.
//!
//! Every message a server receives travels as one envelope: a call with
//! its reply sink, a cast, a stop request, or an engine-internal signal.
//! The worker processes exactly one envelope to completion before
//! dequeuing the next.

// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

// Layer 3: Internal module imports
use crate::persistence::{PersistenceError, SnapshotMetadata};
use crate::server::{CallError, ExitReason, GenServer};
use crate::util::CallId;

/// Reply sink type for a call envelope.
///
/// A oneshot sender cannot be resolved twice, which upholds the
/// single-reply guarantee; a reply sent after the caller's deadline is
/// dropped because the receiving half is gone.
pub type CallReply<B> =
    oneshot::Sender<Result<<B as GenServer>::Reply, CallError<<B as GenServer>::Error>>>;

/// One unit of mailbox traffic.
pub(crate) enum Envelope<B: GenServer> {
    /// Synchronous request with a reply sink.
    Call {
        id: CallId,
        request: B::Call,
        reply: CallReply<B>,
        enqueued_at: DateTime<Utc>,
    },

    /// One-way message.
    Cast { message: B::Cast },

    /// Termination request. `done` is acknowledged once the server has
    /// fully terminated.
    Stop {
        reason: ExitReason,
        done: Option<oneshot::Sender<()>>,
    },

    /// Engine-internal signal.
    Internal(Internal),
}

/// Engine-internal signals delivered through the mailbox so they
/// serialize with handler execution.
pub(crate) enum Internal {
    /// Debounced persistence flush is due.
    PersistFlush,

    /// Periodic snapshot tick.
    SnapshotTick,

    /// Forced immediate flush requested by `checkpoint`.
    Checkpoint {
        ack: oneshot::Sender<Result<SnapshotMetadata, PersistenceError>>,
    },

    /// Delete the persisted snapshot, requested by `clear_persisted_state`.
    ClearPersisted {
        ack: oneshot::Sender<Result<bool, PersistenceError>>,
    },
}

impl<B: GenServer> Envelope<B> {
    /// Short tag for logging.
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Envelope::Call { .. } => "call",
            Envelope::Cast { .. } => "cast",
            Envelope::Stop { .. } => "stop",
            Envelope::Internal(_) => "internal",
        }
    }
}
