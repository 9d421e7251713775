//! Server handles and the shared server record.
//!
//! A [`ServerHandle`] is an opaque, cloneable capability to address one
//! server; it does not own the server. The typed handle carries the
//! behavior type, so call, cast and reply payloads are checked at
//! compile time. [`ServerRef`] is the type-erased view supervisors and
//! the registry work with.

// Layer 1: Standard library imports
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::{oneshot, Notify};
use tokio::task::AbortHandle;

// Layer 3: Internal module imports
use super::error::CallError;
use super::lifecycle::{ExitReason, ServerStatus};
use super::traits::GenServer;
use crate::events::{self, LifecycleEvent, LifecycleEventKind};
use crate::mailbox::{MailboxMetrics, MailboxSender};
use crate::message::{Envelope, Internal};
use crate::persistence::{PersistenceError, SnapshotMetadata, StorageError};
use crate::util::{CallId, ServerId};

/// Default deadline for `call`.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared record for one server: status, exit reason, stats and the
/// worker's abort handle. Referenced by every handle, the registry and
/// the worker itself.
pub(crate) struct ServerShared {
    id: ServerId,
    name: Option<String>,
    started_at: DateTime<Utc>,
    status: RwLock<ServerStatus>,
    exit_reason: RwLock<Option<ExitReason>>,
    exit_notify: Notify,
    metrics: Arc<MailboxMetrics>,
    last_checkpoint: RwLock<Option<SnapshotMetadata>>,
    abort: RwLock<Option<AbortHandle>>,
}

impl ServerShared {
    pub(crate) fn new(id: ServerId, name: Option<String>, metrics: Arc<MailboxMetrics>) -> Self {
        Self {
            id,
            name,
            started_at: Utc::now(),
            status: RwLock::new(ServerStatus::Initializing),
            exit_reason: RwLock::new(None),
            exit_notify: Notify::new(),
            metrics,
            last_checkpoint: RwLock::new(None),
            abort: RwLock::new(None),
        }
    }

    pub(crate) fn id(&self) -> ServerId {
        self.id
    }

    pub(crate) fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub(crate) fn status(&self) -> ServerStatus {
        *self.status.read()
    }

    pub(crate) fn set_status(&self, status: ServerStatus) {
        *self.status.write() = status;
    }

    pub(crate) fn exit_reason(&self) -> Option<ExitReason> {
        self.exit_reason.read().clone()
    }

    pub(crate) fn metrics(&self) -> &Arc<MailboxMetrics> {
        &self.metrics
    }

    pub(crate) fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub(crate) fn set_abort_handle(&self, handle: AbortHandle) {
        *self.abort.write() = Some(handle);
    }

    pub(crate) fn abort_handle(&self) -> Option<AbortHandle> {
        self.abort.read().clone()
    }

    pub(crate) fn last_checkpoint(&self) -> Option<SnapshotMetadata> {
        self.last_checkpoint.read().clone()
    }

    pub(crate) fn set_last_checkpoint(&self, meta: Option<SnapshotMetadata>) {
        *self.last_checkpoint.write() = meta;
    }

    /// Mark the server stopped with `reason` and wake every waiter.
    ///
    /// First caller wins; later calls (worker finalization racing a
    /// kill, say) are no-ops. Publishes the lifecycle event exactly once.
    pub(crate) fn finalize(&self, reason: ExitReason) -> bool {
        {
            let mut status = self.status.write();
            if *status == ServerStatus::Stopped {
                return false;
            }
            *status = ServerStatus::Stopped;
            *self.exit_reason.write() = Some(reason.clone());
        }
        self.exit_notify.notify_waiters();

        let kind = match &reason {
            ExitReason::Error(cause) => LifecycleEventKind::Crashed {
                error: cause.clone(),
            },
            _ => LifecycleEventKind::Terminated { reason },
        };
        events::publish(LifecycleEvent::now(
            self.id,
            self.name.clone(),
            kind,
        ));
        true
    }

    /// Wait until the server has terminated and return its exit reason.
    pub(crate) async fn wait_exit(&self) -> ExitReason {
        loop {
            let notified = self.exit_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(reason) = self.exit_reason() {
                return reason;
            }
            notified.await;
        }
    }
}

impl fmt::Debug for ServerShared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerShared")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("status", &self.status())
            .finish()
    }
}

/// Point-in-time view of a server's observable stats.
#[derive(Debug, Clone)]
pub struct ServerStats {
    /// When the server entered the running state.
    pub started_at: DateTime<Utc>,

    /// Envelopes fully handled so far.
    pub messages_processed: u64,

    /// Approximate mailbox backlog.
    pub queue_depth: u64,

    /// Envelopes dropped during shutdown drain.
    pub dropped: u64,

    /// When the worker last finished an envelope.
    pub last_message_at: Option<DateTime<Utc>>,
}

/// Type-erased cast capability for one server.
///
/// Lets components that do not know the behavior type (supervisors, the
/// timer service, contexts handing out self-cast hooks) deliver cast
/// messages of a known payload type `M`.
pub struct Caster<M> {
    server_id: ServerId,
    send: Arc<dyn Fn(M) -> bool + Send + Sync>,
}

impl<M> Caster<M> {
    pub(crate) fn new(server_id: ServerId, send: Arc<dyn Fn(M) -> bool + Send + Sync>) -> Self {
        Self { server_id, send }
    }

    /// Id of the target server.
    pub fn server_id(&self) -> ServerId {
        self.server_id
    }

    /// Deliver a cast. Returns `false` if the target is no longer
    /// accepting messages.
    pub fn cast(&self, message: M) -> bool {
        (self.send)(message)
    }
}

impl<M> Clone for Caster<M> {
    fn clone(&self) -> Self {
        Self {
            server_id: self.server_id,
            send: Arc::clone(&self.send),
        }
    }
}

impl<M> fmt::Debug for Caster<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Caster")
            .field("server_id", &self.server_id)
            .finish()
    }
}

/// Cancellation token for a non-durable `send_after` timer.
///
/// Dropping the token does not cancel the timer; call
/// [`TimerToken::cancel`].
#[derive(Debug)]
pub struct TimerToken {
    task: AbortHandle,
}

impl TimerToken {
    pub(crate) fn from_abort(task: AbortHandle) -> Self {
        Self { task }
    }

    /// Cancel the pending delivery. A message already in flight is not
    /// recalled.
    pub fn cancel(&self) {
        self.task.abort();
    }

    /// Whether the timer has fired or been cancelled.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Typed, cloneable capability to address one server.
pub struct ServerHandle<B: GenServer> {
    shared: Arc<ServerShared>,
    sender: MailboxSender<B>,
}

impl<B: GenServer> ServerHandle<B> {
    pub(crate) fn new(shared: Arc<ServerShared>, sender: MailboxSender<B>) -> Self {
        Self { shared, sender }
    }

    pub(crate) fn shared(&self) -> &Arc<ServerShared> {
        &self.shared
    }

    pub(crate) fn sender(&self) -> &MailboxSender<B> {
        &self.sender
    }

    /// The server's unique id.
    pub fn id(&self) -> ServerId {
        self.shared.id()
    }

    /// The server's registered name, if any.
    pub fn name(&self) -> Option<&str> {
        self.shared.name()
    }

    /// Current lifecycle status.
    pub fn status(&self) -> ServerStatus {
        self.shared.status()
    }

    /// Non-blocking status probe.
    pub fn is_running(&self) -> bool {
        self.shared.status().is_running()
    }

    /// Observable stats snapshot.
    pub fn stats(&self) -> ServerStats {
        let metrics = self.shared.metrics();
        ServerStats {
            started_at: self.shared.started_at(),
            messages_processed: metrics.processed_count(),
            queue_depth: metrics.queue_depth(),
            dropped: metrics.dropped_count(),
            last_message_at: metrics.last_message_at(),
        }
    }

    /// Synchronous request with the default 5 second deadline.
    pub async fn call(&self, request: B::Call) -> Result<B::Reply, CallError<B::Error>> {
        self.call_timeout(request, DEFAULT_CALL_TIMEOUT).await
    }

    /// Synchronous request with an explicit deadline.
    ///
    /// The deadline bounds only this caller's wait: the server may still
    /// process the envelope afterwards, in which case the reply is
    /// discarded.
    pub async fn call_timeout(
        &self,
        request: B::Call,
        timeout: Duration,
    ) -> Result<B::Reply, CallError<B::Error>> {
        let server_id = self.id();
        if !self.is_running() {
            return Err(CallError::NotRunning { server_id });
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        let accepted = self.sender.send(Envelope::Call {
            id: CallId::new(),
            request,
            reply: reply_tx,
            enqueued_at: Utc::now(),
        });
        if !accepted {
            return Err(CallError::NotRunning { server_id });
        }

        match tokio::time::timeout(timeout, reply_rx).await {
            Err(_) => Err(CallError::Timeout { server_id, timeout }),
            // Reply sink dropped: the server terminated before replying.
            Ok(Err(_)) => Err(CallError::NotRunning { server_id }),
            Ok(Ok(result)) => result,
        }
    }

    /// One-way message. Silent no-op once the server has left the
    /// running state.
    pub fn cast(&self, message: B::Cast) {
        if !self.is_running() {
            return;
        }
        let _ = self.sender.send(Envelope::Cast { message });
    }

    /// Request termination and wait until the server has fully stopped
    /// (terminate hook done, persistence flushed).
    pub async fn stop(&self, reason: ExitReason) {
        let _ = self.sender.send(Envelope::Stop {
            reason,
            done: None,
        });
        self.shared.wait_exit().await;
    }

    /// Wait for the server to terminate without requesting it.
    pub async fn wait_exit(&self) -> ExitReason {
        self.shared.wait_exit().await
    }

    /// Schedule a non-durable local cast after `delay`.
    pub fn send_after(&self, message: B::Cast, delay: Duration) -> TimerToken {
        let caster = self.caster();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            caster.cast(message);
        });
        TimerToken::from_abort(task.abort_handle())
    }

    /// Force an immediate snapshot flush, bypassing the debounce window.
    ///
    /// Fails with a storage error if the server has no persistence
    /// binding or is no longer running.
    pub async fn checkpoint(&self) -> Result<SnapshotMetadata, PersistenceError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        let accepted = self
            .sender
            .send(Envelope::Internal(Internal::Checkpoint { ack: ack_tx }));
        if !accepted {
            return Err(StorageError::new("checkpoint", "server is not running").into());
        }
        ack_rx.await.unwrap_or_else(|_| {
            Err(StorageError::new("checkpoint", "server stopped before flushing").into())
        })
    }

    /// Metadata of the most recent snapshot written (or restored) for
    /// this server.
    pub fn last_checkpoint_meta(&self) -> Option<SnapshotMetadata> {
        self.shared.last_checkpoint()
    }

    /// Delete this server's persisted snapshot. Returns `true` if one
    /// existed.
    pub async fn clear_persisted_state(&self) -> Result<bool, PersistenceError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        let accepted = self
            .sender
            .send(Envelope::Internal(Internal::ClearPersisted { ack: ack_tx }));
        if !accepted {
            return Err(StorageError::new("delete", "server is not running").into());
        }
        ack_rx.await.unwrap_or_else(|_| {
            Err(StorageError::new("delete", "server stopped before deleting").into())
        })
    }

    /// Type-erased cast capability for this server.
    pub fn caster(&self) -> Caster<B::Cast> {
        let sender = self.sender.clone();
        let shared = Arc::clone(&self.shared);
        Caster::new(
            self.id(),
            Arc::new(move |message: B::Cast| {
                if !shared.status().is_running() {
                    return false;
                }
                sender.send(Envelope::Cast { message })
            }),
        )
    }

    /// Type-erased view of this server for supervisors and registries.
    pub fn server_ref(&self) -> ServerRef {
        let sender = self.sender.clone();
        ServerRef {
            shared: Arc::clone(&self.shared),
            stop_fn: Arc::new(move |reason, done| sender.send(Envelope::Stop { reason, done })),
        }
    }
}

impl<B: GenServer> Clone for ServerHandle<B> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            sender: self.sender.clone(),
        }
    }
}

impl<B: GenServer> fmt::Debug for ServerHandle<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerHandle")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("status", &self.status())
            .finish()
    }
}

type StopFn = dyn Fn(ExitReason, Option<oneshot::Sender<()>>) -> bool + Send + Sync;

/// Type-erased view of a server: identity, status and termination
/// control, without the message types.
pub struct ServerRef {
    shared: Arc<ServerShared>,
    stop_fn: Arc<StopFn>,
}

impl ServerRef {
    /// The server's unique id.
    pub fn id(&self) -> ServerId {
        self.shared.id()
    }

    /// The server's registered name, if any.
    pub fn name(&self) -> Option<&str> {
        self.shared.name()
    }

    /// Current lifecycle status.
    pub fn status(&self) -> ServerStatus {
        self.shared.status()
    }

    /// Non-blocking status probe.
    pub fn is_running(&self) -> bool {
        self.shared.status().is_running()
    }

    /// Exit reason, once terminated.
    pub fn exit_reason(&self) -> Option<ExitReason> {
        self.shared.exit_reason()
    }

    /// Enqueue a stop request without waiting.
    pub fn request_stop(&self, reason: ExitReason) -> bool {
        (self.stop_fn)(reason, None)
    }

    /// Request termination and wait until the server has stopped.
    pub async fn stop(&self, reason: ExitReason) -> ExitReason {
        (self.stop_fn)(reason, None);
        self.shared.wait_exit().await
    }

    /// Wait for termination without requesting it.
    pub async fn wait_exit(&self) -> ExitReason {
        self.shared.wait_exit().await
    }

    /// Abort the server's worker outright and finalize the record.
    ///
    /// Last resort for a worker stuck past its shutdown timeout: the
    /// terminate hook does not get to finish.
    pub fn kill(&self, reason: ExitReason) {
        if let Some(abort) = self.shared.abort_handle() {
            abort.abort();
        }
        self.shared.finalize(reason);
    }

    pub(crate) fn shared(&self) -> &Arc<ServerShared> {
        &self.shared
    }
}

impl Clone for ServerRef {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            stop_fn: Arc::clone(&self.stop_fn),
        }
    }
}

impl fmt::Debug for ServerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerRef")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("status", &self.status())
            .finish()
    }
}
