//! Server engine: start sequence and the per-server worker loop.
//!
//! Each server runs one dedicated Tokio task. The worker dequeues one
//! envelope at a time and awaits the handler to completion before
//! touching the next, so no two handlers for the same server ever
//! overlap and every state transition is atomic to outside observers.

// Layer 1: Standard library imports
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use chrono::Utc;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{trace, warn};

// Layer 3: Internal module imports
use super::context::ServerContext;
use super::error::{CallError, SpawnError};
use super::handle::{ServerHandle, ServerShared};
use super::lifecycle::{ExitReason, ServerStatus};
use super::traits::GenServer;
use crate::events::{self, LifecycleEvent, LifecycleEventKind};
use crate::mailbox::{mailbox, Mailbox, MailboxMetrics, MailboxSender};
use crate::message::{Envelope, Internal};
use crate::persistence::{PersistAction, PersistenceBinding, SnapshotMetadata, StorageError};
use crate::registry::Registry;
use crate::util::ServerId;

/// Default deadline for the init hook.
pub const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default bound on the terminate hook.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Start-time configuration for one server.
pub struct ServerOptions<S> {
    /// Registry name to claim before init runs.
    pub name: Option<String>,

    /// Deadline for the init hook.
    pub init_timeout: Duration,

    /// Bound on the terminate hook during shutdown.
    pub shutdown_timeout: Duration,

    /// Snapshot binding, if this server persists its state.
    pub persistence: Option<PersistenceBinding<S>>,
}

impl<S> ServerOptions<S> {
    /// Options with all defaults and no name.
    pub fn new() -> Self {
        Self {
            name: None,
            init_timeout: DEFAULT_INIT_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            persistence: None,
        }
    }

    /// Claim a registry name at start.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Override the init deadline.
    pub fn init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = timeout;
        self
    }

    /// Override the terminate bound.
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Attach a persistence binding.
    pub fn persistence(mut self, binding: PersistenceBinding<S>) -> Self {
        self.persistence = Some(binding);
        self
    }
}

impl<S> Default for ServerOptions<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// Start a server with default options.
pub async fn start<B: GenServer>(behavior: B) -> Result<ServerHandle<B>, SpawnError> {
    start_with(behavior, ServerOptions::new()).await
}

/// Start a server: claim its name, run init (restoring a snapshot when
/// configured), then hand the behavior to a dedicated worker task.
pub async fn start_with<B: GenServer>(
    mut behavior: B,
    options: ServerOptions<B::State>,
) -> Result<ServerHandle<B>, SpawnError> {
    let id = ServerId::new();
    let metrics = Arc::new(MailboxMetrics::new());
    let shared = Arc::new(ServerShared::new(
        id,
        options.name.clone(),
        Arc::clone(&metrics),
    ));
    let (sender, mbox) = mailbox::<B>(metrics);
    let handle = ServerHandle::new(Arc::clone(&shared), sender);

    if let Some(name) = &options.name {
        if Registry::global().register(name.as_str(), &handle).is_err() {
            return Err(SpawnError::AlreadyRegistered { name: name.clone() });
        }
    }

    let mut ctx = ServerContext::new(&handle);
    let mut state = match timeout(options.init_timeout, behavior.init(&mut ctx)).await {
        Err(_) => {
            shared.finalize(ExitReason::Error("init timed out".into()));
            return Err(SpawnError::InitTimeout {
                server_id: id,
                timeout: options.init_timeout,
            });
        }
        Ok(Err(e)) => {
            shared.finalize(ExitReason::from_error(&e));
            return Err(SpawnError::InitFailed {
                server_id: id,
                source: Box::new(e),
            });
        }
        Ok(Ok(state)) => state,
    };

    if let Some(binding) = options.persistence.as_ref() {
        if binding.restores_on_start() {
            match restore_state(&mut behavior, binding, &shared).await {
                Ok(Some(restored)) => state = restored,
                Ok(None) => {}
                Err(e) => {
                    shared.finalize(ExitReason::from_error(&e));
                    return Err(e);
                }
            }
        }
    }

    shared.set_status(ServerStatus::Running);
    events::publish(LifecycleEvent::now(
        id,
        options.name.clone(),
        LifecycleEventKind::Started,
    ));

    if let Some(every) = options.persistence.as_ref().and_then(|b| b.snapshot_every()) {
        spawn_snapshot_ticker(handle.sender().clone(), every);
    }

    let worker = Worker {
        behavior,
        state,
        ctx,
        mailbox: mbox,
        shared: Arc::clone(&shared),
        binding: options.persistence,
        shutdown_timeout: options.shutdown_timeout,
        internal_tx: handle.sender().clone(),
        pending_snapshot: None,
        flush_scheduled: false,
    };
    let join = tokio::spawn(worker.run());
    shared.set_abort_handle(join.abort_handle());

    // A panicking handler must not leave waiters hanging on a record
    // stuck in Running.
    let panic_shared = Arc::clone(&shared);
    tokio::spawn(async move {
        if let Err(e) = join.await {
            if e.is_panic() {
                panic_shared.finalize(ExitReason::Error("handler panicked".into()));
            }
        }
    });

    Ok(handle)
}

/// Restore a snapshot into the init state, if a valid one exists.
///
/// A missing snapshot starts fresh; an unreadable one is reported and
/// also starts fresh. Only a failing `on_restore` hook aborts the start.
async fn restore_state<B: GenServer>(
    behavior: &mut B,
    binding: &PersistenceBinding<B::State>,
    shared: &ServerShared,
) -> Result<Option<B::State>, SpawnError> {
    let loaded = binding
        .manager()
        .load(binding.key(), binding.migrate_hook())
        .await;
    let (value, meta) = match loaded {
        Ok(found) => found,
        Err(e) if e.is_not_found() => return Ok(None),
        Err(e) => {
            binding.report_error(&e);
            warn!(key = binding.key(), error = %e, "snapshot restore failed, starting from init state");
            return Ok(None);
        }
    };

    let restored = match binding.deserialize_state(value) {
        Ok(state) => state,
        Err(e) => {
            binding.report_error(&e);
            warn!(key = binding.key(), error = %e, "snapshot did not deserialize, starting from init state");
            return Ok(None);
        }
    };

    match behavior.on_restore(restored, &meta).await {
        Ok(state) => {
            shared.set_last_checkpoint(Some(meta));
            Ok(Some(state))
        }
        Err(e) => Err(SpawnError::InitFailed {
            server_id: shared.id(),
            source: Box::new(e),
        }),
    }
}

fn spawn_snapshot_ticker<B: GenServer>(sender: MailboxSender<B>, every: Duration) {
    tokio::spawn(async move {
        let start = tokio::time::Instant::now() + every;
        let mut ticks = tokio::time::interval_at(start, every);
        loop {
            ticks.tick().await;
            if !sender.send(Envelope::Internal(Internal::SnapshotTick)) {
                break;
            }
        }
    });
}

/// The per-server worker: owns the behavior, the state and the mailbox
/// consumer half.
struct Worker<B: GenServer> {
    behavior: B,
    state: B::State,
    ctx: ServerContext<B>,
    mailbox: Mailbox<B>,
    shared: Arc<ServerShared>,
    binding: Option<PersistenceBinding<B::State>>,
    shutdown_timeout: Duration,
    internal_tx: MailboxSender<B>,
    pending_snapshot: Option<Value>,
    flush_scheduled: bool,
}

impl<B: GenServer> Worker<B> {
    async fn run(mut self) {
        let (reason, done) = self.serve().await;
        self.shutdown(reason, done).await;
    }

    /// Process envelopes until something ends the server's life.
    async fn serve(&mut self) -> (ExitReason, Option<oneshot::Sender<()>>) {
        loop {
            let Some(envelope) = self.mailbox.recv().await else {
                return (ExitReason::Normal, None);
            };
            trace!(server_id = %self.shared.id(), kind = envelope.kind(), "dequeued");

            match envelope {
                Envelope::Call {
                    id,
                    request,
                    reply,
                    enqueued_at,
                } => {
                    trace!(
                        server_id = %self.shared.id(),
                        call_id = %id,
                        queued_for = ?(Utc::now() - enqueued_at),
                        "handling call"
                    );
                    match self
                        .behavior
                        .handle_call(request, &mut self.state, &mut self.ctx)
                        .await
                    {
                        Ok(response) => {
                            // A caller past its deadline dropped the sink;
                            // nothing to do then.
                            let _ = reply.send(Ok(response));
                            self.shared.metrics().record_processed();
                            self.after_transition().await;
                        }
                        Err(e) => {
                            let _ = reply.send(Err(CallError::Handler(e)));
                            self.shared.metrics().record_processed();
                        }
                    }
                }
                Envelope::Cast { message } => {
                    match self
                        .behavior
                        .handle_cast(message, &mut self.state, &mut self.ctx)
                        .await
                    {
                        Ok(()) => {
                            self.shared.metrics().record_processed();
                            self.after_transition().await;
                        }
                        Err(e) => {
                            warn!(server_id = %self.shared.id(), error = %e, "cast handler failed, server terminating");
                            return (ExitReason::from_error(&e), None);
                        }
                    }
                }
                Envelope::Stop { reason, done } => return (reason, done),
                Envelope::Internal(signal) => self.handle_internal(signal).await,
            }

            if let Some(reason) = self.ctx.take_pending_stop() {
                return (reason, None);
            }
        }
    }

    async fn handle_internal(&mut self, signal: Internal) {
        match signal {
            Internal::PersistFlush => {
                self.flush_scheduled = false;
                self.flush_pending().await;
            }
            Internal::SnapshotTick => {
                let Some(binding) = self.binding.as_ref() else {
                    return;
                };
                self.pending_snapshot = None;
                let value = match self.behavior.before_persist(&self.state) {
                    PersistAction::Skip => return,
                    PersistAction::Save => binding.serialize_state(&self.state),
                    PersistAction::Replace(s) => binding.serialize_state(&s),
                };
                match value {
                    Ok(value) => Self::save_snapshot(binding, &self.shared, value).await,
                    Err(e) => {
                        binding.report_error(&e);
                        warn!(server_id = %self.shared.id(), error = %e, "snapshot serialization failed");
                    }
                }
            }
            Internal::Checkpoint { ack } => {
                let result = self.force_checkpoint().await;
                let _ = ack.send(result);
            }
            Internal::ClearPersisted { ack } => {
                let result = match self.binding.as_ref() {
                    Some(binding) => {
                        self.pending_snapshot = None;
                        let deleted = binding.manager().delete(binding.key()).await;
                        if deleted.is_ok() {
                            self.shared.set_last_checkpoint(None);
                        }
                        deleted
                    }
                    None => Err(StorageError::new("delete", "no persistence binding").into()),
                };
                let _ = ack.send(result);
            }
        }
    }

    /// Immediate flush for `checkpoint`: persists the live state,
    /// bypassing both the debounce window and `before_persist`.
    async fn force_checkpoint(
        &mut self,
    ) -> Result<SnapshotMetadata, crate::persistence::PersistenceError> {
        let Some(binding) = self.binding.as_ref() else {
            return Err(StorageError::new("checkpoint", "no persistence binding").into());
        };
        self.pending_snapshot = None;
        let value = binding.serialize_state(&self.state)?;
        let meta = binding
            .manager()
            .save(
                binding.key(),
                value,
                self.shared.id(),
                self.shared.name(),
            )
            .await?;
        self.shared.set_last_checkpoint(Some(meta.clone()));
        Ok(meta)
    }

    /// Persistence hook after every successful transition.
    ///
    /// With a zero debounce window the snapshot writes through; otherwise
    /// the serialized value parks as pending and a single flush signal is
    /// scheduled (later transitions inside the window just replace the
    /// pending value).
    async fn after_transition(&mut self) {
        let Some(binding) = self.binding.as_ref() else {
            return;
        };
        let value = match self.behavior.before_persist(&self.state) {
            PersistAction::Skip => return,
            PersistAction::Save => binding.serialize_state(&self.state),
            PersistAction::Replace(s) => binding.serialize_state(&s),
        };
        let value = match value {
            Ok(value) => value,
            Err(e) => {
                binding.report_error(&e);
                warn!(server_id = %self.shared.id(), error = %e, "state serialization failed, skipping persist");
                return;
            }
        };

        let window = binding.debounce_window();
        if window.is_zero() {
            Self::save_snapshot(binding, &self.shared, value).await;
            return;
        }

        self.pending_snapshot = Some(value);
        if !self.flush_scheduled {
            self.flush_scheduled = true;
            let tx = self.internal_tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(window).await;
                let _ = tx.send(Envelope::Internal(Internal::PersistFlush));
            });
        }
    }

    async fn flush_pending(&mut self) {
        let Some(value) = self.pending_snapshot.take() else {
            return;
        };
        if let Some(binding) = self.binding.as_ref() {
            Self::save_snapshot(binding, &self.shared, value).await;
        }
    }

    async fn save_snapshot(
        binding: &PersistenceBinding<B::State>,
        shared: &ServerShared,
        value: Value,
    ) {
        match binding
            .manager()
            .save(binding.key(), value, shared.id(), shared.name())
            .await
        {
            Ok(meta) => shared.set_last_checkpoint(Some(meta)),
            Err(e) => {
                binding.report_error(&e);
                warn!(server_id = %shared.id(), key = binding.key(), error = %e, "snapshot save failed");
            }
        }
    }

    /// Drain the mailbox, flush, run terminate, clean up, finalize.
    async fn shutdown(mut self, reason: ExitReason, done: Option<oneshot::Sender<()>>) {
        let server_id = self.shared.id();
        self.shared.set_status(ServerStatus::Stopping);
        self.mailbox.close();

        let mut done_acks = Vec::new();
        if let Some(ack) = done {
            done_acks.push(ack);
        }
        while let Some(envelope) = self.mailbox.try_recv() {
            match envelope {
                Envelope::Call { reply, .. } => {
                    let _ = reply.send(Err(CallError::NotRunning { server_id }));
                    self.shared.metrics().record_dropped();
                }
                Envelope::Cast { .. } => self.shared.metrics().record_dropped(),
                Envelope::Stop { done, .. } => {
                    if let Some(ack) = done {
                        done_acks.push(ack);
                    }
                }
                Envelope::Internal(Internal::Checkpoint { ack }) => {
                    let _ =
                        ack.send(Err(StorageError::new("checkpoint", "server stopping").into()));
                }
                Envelope::Internal(Internal::ClearPersisted { ack }) => {
                    let _ = ack.send(Err(StorageError::new("delete", "server stopping").into()));
                }
                Envelope::Internal(_) => {}
            }
        }

        if let Some(binding) = self.binding.as_ref() {
            if binding.persists_on_shutdown() {
                // Flush whatever was pending, otherwise take a final
                // snapshot of the closing state.
                match self.pending_snapshot.take() {
                    Some(value) => Self::save_snapshot(binding, &self.shared, value).await,
                    None => {
                        match self.behavior.before_persist(&self.state) {
                            PersistAction::Skip => {}
                            PersistAction::Save => match binding.serialize_state(&self.state) {
                                Ok(value) => {
                                    Self::save_snapshot(binding, &self.shared, value).await;
                                }
                                Err(e) => binding.report_error(&e),
                            },
                            PersistAction::Replace(s) => match binding.serialize_state(&s) {
                                Ok(value) => {
                                    Self::save_snapshot(binding, &self.shared, value).await;
                                }
                                Err(e) => binding.report_error(&e),
                            },
                        }
                    }
                }
            }
        }

        match timeout(
            self.shutdown_timeout,
            self.behavior.terminate(&reason, &mut self.state),
        )
        .await
        {
            Err(_) => {
                warn!(server_id = %server_id, timeout = ?self.shutdown_timeout, "terminate hook timed out");
            }
            Ok(Err(e)) => {
                warn!(server_id = %server_id, error = %e, "terminate hook failed");
            }
            Ok(Ok(())) => {}
        }

        if let Some(binding) = self.binding.as_ref() {
            if binding.cleans_up_on_terminate() {
                if let Err(e) = binding.manager().delete(binding.key()).await {
                    binding.report_error(&e);
                    warn!(server_id = %server_id, key = binding.key(), error = %e, "snapshot cleanup failed");
                }
                self.shared.set_last_checkpoint(None);
            }
        }

        self.shared.finalize(reason);
        for ack in done_acks {
            let _ = ack.send(());
        }
    }
}
