//! Lifecycle-event subscription.
//!
//! The engine publishes an event whenever a server starts, crashes or
//! terminates. Subscribers receive them over a process-wide broadcast
//! channel; a slow subscriber only loses its own backlog, never the
//! publisher. Every event is also emitted through `tracing`.

// Layer 1: Standard library imports
use std::sync::OnceLock;

// Layer 2: Third-party crate imports
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{error, info};

// Layer 3: Internal module imports
use crate::server::ExitReason;
use crate::util::ServerId;

/// Buffered events per subscriber before lagging drops old ones.
const HUB_CAPACITY: usize = 256;

/// What happened to a server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleEventKind {
    /// Server finished init and entered the running state.
    Started,

    /// Server terminated abnormally (handler or init failure, panic,
    /// or a forced kill).
    Crashed {
        /// Stringified failure cause.
        error: String,
    },

    /// Server terminated normally or by shutdown request.
    Terminated {
        /// Final exit reason.
        reason: ExitReason,
    },
}

/// A lifecycle event for one server.
#[derive(Debug, Clone, Serialize)]
pub struct LifecycleEvent {
    /// When the transition happened.
    pub timestamp: DateTime<Utc>,

    /// The server the event concerns.
    pub server_id: ServerId,

    /// Registered name, if the server had one.
    pub server_name: Option<String>,

    /// What happened.
    pub kind: LifecycleEventKind,
}

impl LifecycleEvent {
    pub(crate) fn now(
        server_id: ServerId,
        server_name: Option<String>,
        kind: LifecycleEventKind,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            server_id,
            server_name,
            kind,
        }
    }
}

fn hub() -> &'static broadcast::Sender<LifecycleEvent> {
    static HUB: OnceLock<broadcast::Sender<LifecycleEvent>> = OnceLock::new();
    HUB.get_or_init(|| broadcast::channel(HUB_CAPACITY).0)
}

/// Subscribe to lifecycle events of every server in the process.
///
/// Events published before the subscription are not replayed.
///
/// # Example
///
/// ```rust,ignore
/// let mut events = gensrv::events::subscribe();
/// while let Ok(event) = events.recv().await {
///     println!("{:?} {:?}", event.server_id, event.kind);
/// }
/// ```
pub fn subscribe() -> broadcast::Receiver<LifecycleEvent> {
    hub().subscribe()
}

/// Publish an event to all subscribers and to `tracing`.
pub(crate) fn publish(event: LifecycleEvent) {
    match &event.kind {
        LifecycleEventKind::Started => {
            info!(server_id = %event.server_id, name = ?event.server_name, "server started");
        }
        LifecycleEventKind::Crashed { error: cause } => {
            error!(server_id = %event.server_id, name = ?event.server_name, %cause, "server crashed");
        }
        LifecycleEventKind::Terminated { reason } => {
            info!(server_id = %event.server_id, name = ?event.server_name, %reason, "server terminated");
        }
    }
    // A send error only means nobody is subscribed right now.
    let _ = hub().send(event);
}
