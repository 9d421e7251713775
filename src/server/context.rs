//! Per-server execution context handed to behavior hooks.

// Layer 1: Standard library imports
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use chrono::{DateTime, Utc};

// Layer 3: Internal module imports
use super::handle::{Caster, ServerHandle, ServerShared, TimerToken};
use super::lifecycle::ExitReason;
use super::traits::GenServer;
use crate::mailbox::MailboxSender;
use crate::message::Envelope;
use crate::util::ServerId;

/// Context passed to every behavior hook.
///
/// Exposes the server's identity and the two things a handler may do
/// besides mutating state: cast to itself (directly or after a delay)
/// and request its own termination.
pub struct ServerContext<B: GenServer> {
    shared: Arc<ServerShared>,
    sender: MailboxSender<B>,
    pending_stop: Option<ExitReason>,
}

impl<B: GenServer> ServerContext<B> {
    pub(crate) fn new(handle: &ServerHandle<B>) -> Self {
        Self {
            shared: Arc::clone(handle.shared()),
            sender: handle.sender().clone(),
            pending_stop: None,
        }
    }

    /// The server's unique id.
    pub fn server_id(&self) -> ServerId {
        self.shared.id()
    }

    /// The server's registered name, if any.
    pub fn name(&self) -> Option<&str> {
        self.shared.name()
    }

    /// When the server record was created.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.shared.started_at()
    }

    /// Request termination once the current handler returns.
    ///
    /// Mirrors GenServer's stop return: the in-flight transition still
    /// completes, then the server drains and terminates with `reason`.
    pub fn stop(&mut self, reason: ExitReason) {
        // First request wins; a handler asking twice keeps the original reason.
        if self.pending_stop.is_none() {
            self.pending_stop = Some(reason);
        }
    }

    /// Cast capability addressing this server itself.
    ///
    /// Survives the handler invocation, so it can be moved into spawned
    /// tasks (exit monitors, tickers).
    pub fn caster(&self) -> Caster<B::Cast> {
        let sender = self.sender.clone();
        let shared = Arc::clone(&self.shared);
        Caster::new(
            self.shared.id(),
            Arc::new(move |message: B::Cast| {
                if shared.status().is_stopped() {
                    return false;
                }
                sender.send(Envelope::Cast { message })
            }),
        )
    }

    /// Schedule a non-durable cast to this server after `delay`.
    pub fn send_after(&self, message: B::Cast, delay: Duration) -> TimerToken {
        let caster = self.caster();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            caster.cast(message);
        });
        TimerToken::from_abort(task.abort_handle())
    }

    pub(crate) fn take_pending_stop(&mut self) -> Option<ExitReason> {
        self.pending_stop.take()
    }
}
