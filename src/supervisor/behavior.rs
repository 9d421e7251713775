//! The supervisor behavior: a GenServer whose state is the child table.
//!
//! Running the supervisor on the server engine gives it the engine's
//! guarantees for free: the child table is only ever touched by the
//! supervisor's own worker, public operations are calls into its
//! mailbox, and child-exit notifications arrive as casts from per-child
//! monitor tasks. A restart-intensity breach is simply the cast handler
//! returning an error, which terminates the supervisor through the
//! normal crash path and stops its children in reverse start order.

// Layer 1: Standard library imports
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use tokio::task::AbortHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

// Layer 3: Internal module imports
use super::error::SupervisorError;
use super::intensity::RestartLog;
use super::types::{
    AutoShutdown, ChildInfo, ChildSpec, ChildTemplate, RestartIntensity, RestartPolicy, StartFn,
    Strategy,
};
use crate::server::{Caster, ExitReason, GenServer, ServerContext, ServerRef};
use crate::util::ServerId;

/// Requests accepted by a supervisor.
pub(crate) enum SupervisorCall {
    StartChild(ChildSpec),
    StartSimpleChild(Box<dyn Any + Send>),
    TerminateChild(String),
    RestartChild(String),
    GetChildren,
    GetChild(String),
    CountChildren,
}

/// Replies produced by a supervisor.
pub(crate) enum SupervisorReply {
    Started(ServerRef),
    Terminated,
    Children(Vec<ChildInfo>),
    Child(Option<ChildInfo>),
    Count(usize),
}

/// Internal notifications cast to the supervisor by its monitor tasks.
pub(crate) enum SupervisorCast {
    ChildExited {
        child_id: String,
        server_id: ServerId,
        reason: ExitReason,
    },
}

/// Runtime record of one supervised child.
pub(crate) struct ChildRecord {
    id: String,
    start: StartFn,
    restart: RestartPolicy,
    shutdown_timeout: Duration,
    significant: bool,
    current: Option<ServerRef>,
    monitor: Option<AbortHandle>,
    restart_count: u32,
    start_order: usize,
}

/// Supervisor state: the child table plus the restart log.
pub(crate) struct SupervisorState {
    children: HashMap<String, ChildRecord>,
    order: Vec<String>,
    restart_log: RestartLog,
}

/// The supervisor behavior. Configuration lives here; the mutable child
/// table lives in the state.
pub(crate) struct SupervisorBehavior {
    strategy: Strategy,
    template: Option<ChildTemplate>,
    intensity: RestartIntensity,
    auto_shutdown: AutoShutdown,
    initial: Vec<ChildSpec>,
    simple_seq: u64,
}

impl SupervisorBehavior {
    pub(crate) fn new(
        strategy: Strategy,
        template: Option<ChildTemplate>,
        intensity: RestartIntensity,
        auto_shutdown: AutoShutdown,
        initial: Vec<ChildSpec>,
    ) -> Self {
        Self {
            strategy,
            template,
            intensity,
            auto_shutdown,
            initial,
            simple_seq: 0,
        }
    }

    fn validate(&self, supervisor_id: ServerId) -> Result<(), SupervisorError> {
        match self.strategy {
            Strategy::SimpleOneForOne => {
                if self.template.is_none() {
                    return Err(SupervisorError::MissingChildTemplate { supervisor_id });
                }
                if !self.initial.is_empty() {
                    return Err(SupervisorError::InvalidSimpleOneForOneConfig {
                        supervisor_id,
                        reason: "static children are not allowed with SimpleOneForOne".into(),
                    });
                }
            }
            _ => {
                if self.template.is_some() {
                    return Err(SupervisorError::InvalidSimpleOneForOneConfig {
                        supervisor_id,
                        reason: "a child template requires the SimpleOneForOne strategy".into(),
                    });
                }
            }
        }
        Ok(())
    }

    fn spawn_monitor(
        caster: Caster<SupervisorCast>,
        child_id: String,
        server: ServerRef,
    ) -> AbortHandle {
        let task = tokio::spawn(async move {
            let reason = server.wait_exit().await;
            caster.cast(SupervisorCast::ChildExited {
                child_id,
                server_id: server.id(),
                reason,
            });
        });
        task.abort_handle()
    }

    /// Add a new record to the table and start its server.
    ///
    /// On start failure the record is not kept.
    #[allow(clippy::too_many_arguments)]
    async fn start_new_child(
        &mut self,
        state: &mut SupervisorState,
        ctx: &mut ServerContext<Self>,
        id: String,
        start: StartFn,
        restart: RestartPolicy,
        shutdown_timeout: Duration,
        significant: bool,
    ) -> Result<ServerRef, SupervisorError> {
        let supervisor_id = ctx.server_id();
        if state.children.contains_key(&id) {
            return Err(SupervisorError::DuplicateChild {
                supervisor_id,
                child_id: id,
            });
        }

        let server = start().await.map_err(|source| SupervisorError::StartChildFailed {
            supervisor_id,
            child_id: id.clone(),
            source,
        })?;

        let monitor = Self::spawn_monitor(ctx.caster(), id.clone(), server.clone());
        debug!(supervisor_id = %supervisor_id, child_id = %id, server_id = %server.id(), "child started");
        state.order.push(id.clone());
        state.children.insert(
            id.clone(),
            ChildRecord {
                id,
                start,
                restart,
                shutdown_timeout,
                significant,
                current: Some(server.clone()),
                monitor: Some(monitor),
                restart_count: 0,
                start_order: state.order.len() - 1,
            },
        );
        Ok(server)
    }

    /// Stop one child: cancel its monitor, then shut the server down
    /// bounded by the child's shutdown timeout; kill on breach.
    async fn stop_child_record(rec: &mut ChildRecord) {
        if let Some(monitor) = rec.monitor.take() {
            monitor.abort();
        }
        let Some(server) = rec.current.take() else {
            return;
        };
        if server.status().is_stopped() {
            return;
        }
        if timeout(rec.shutdown_timeout, server.stop(ExitReason::Shutdown))
            .await
            .is_err()
        {
            warn!(child_id = %rec.id, timeout = ?rec.shutdown_timeout, "child ignored shutdown, killing");
            server.kill(ExitReason::Shutdown);
        }
    }

    /// Stop the given children in reverse start order.
    async fn stop_children_reverse(state: &mut SupervisorState, ids: &[String]) {
        for id in ids.iter().rev() {
            if let Some(rec) = state.children.get_mut(id) {
                Self::stop_child_record(rec).await;
            }
        }
    }

    /// Restart the given children in order. A failed attempt consumes
    /// restart intensity and is retried until it succeeds or the log
    /// breaches.
    async fn restart_children(
        &mut self,
        state: &mut SupervisorState,
        ctx: &mut ServerContext<Self>,
        ids: Vec<String>,
    ) -> Result<(), SupervisorError> {
        let supervisor_id = ctx.server_id();
        for id in ids {
            loop {
                let start = {
                    let Some(rec) = state.children.get_mut(&id) else {
                        break;
                    };
                    rec.restart_count += 1;
                    Arc::clone(&rec.start)
                };

                match start().await {
                    Ok(server) => {
                        if let Some(rec) = state.children.get_mut(&id) {
                            rec.monitor = Some(Self::spawn_monitor(
                                ctx.caster(),
                                id.clone(),
                                server.clone(),
                            ));
                            rec.current = Some(server);
                        }
                        break;
                    }
                    Err(e) => {
                        warn!(supervisor_id = %supervisor_id, child_id = %id, error = %e, "child restart failed");
                        state.restart_log.record();
                        if state.restart_log.is_exceeded() {
                            let RestartIntensity {
                                max_restarts,
                                within,
                            } = state.restart_log.intensity();
                            return Err(SupervisorError::MaxRestartsExceeded {
                                supervisor_id,
                                max_restarts,
                                within,
                            });
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// React to a significant child terminating without restart.
    fn maybe_auto_shutdown(&self, state: &SupervisorState, ctx: &mut ServerContext<Self>) {
        match self.auto_shutdown {
            AutoShutdown::Never => {}
            AutoShutdown::AnySignificant => {
                info!(supervisor_id = %ctx.server_id(), "significant child exited, supervisor shutting down");
                ctx.stop(ExitReason::Normal);
            }
            AutoShutdown::AllSignificant => {
                let any_left = state
                    .children
                    .values()
                    .any(|rec| rec.significant && rec.current.is_some());
                if !any_left {
                    info!(supervisor_id = %ctx.server_id(), "last significant child exited, supervisor shutting down");
                    ctx.stop(ExitReason::Normal);
                }
            }
        }
    }

    async fn handle_child_exit(
        &mut self,
        state: &mut SupervisorState,
        ctx: &mut ServerContext<Self>,
        child_id: String,
        server_id: ServerId,
        reason: ExitReason,
    ) -> Result<(), SupervisorError> {
        let supervisor_id = ctx.server_id();

        let (eligible, significant, failed_order) = {
            let Some(rec) = state.children.get_mut(&child_id) else {
                return Ok(());
            };
            // Ignore events for anything but the current incarnation.
            match rec.current.as_ref() {
                Some(current) if current.id() == server_id => {}
                _ => return Ok(()),
            }
            rec.current = None;
            rec.monitor = None;
            (
                rec.restart.should_restart(reason.is_error()),
                rec.significant,
                rec.start_order,
            )
        };
        debug!(supervisor_id = %supervisor_id, child_id = %child_id, %reason, "child exited");

        if !eligible {
            if significant {
                self.maybe_auto_shutdown(state, ctx);
            }
            return Ok(());
        }

        // One intensity record per exit event, before anything restarts.
        state.restart_log.record();
        if state.restart_log.is_exceeded() {
            let RestartIntensity {
                max_restarts,
                within,
            } = state.restart_log.intensity();
            warn!(supervisor_id = %supervisor_id, max_restarts, ?within, "restart intensity exceeded");
            return Err(SupervisorError::MaxRestartsExceeded {
                supervisor_id,
                max_restarts,
                within,
            });
        }

        match self.strategy {
            Strategy::OneForOne | Strategy::SimpleOneForOne => {
                self.restart_children(state, ctx, vec![child_id]).await
            }
            Strategy::OneForAll => {
                let affected: Vec<String> = state
                    .order
                    .iter()
                    .filter(|id| {
                        **id == child_id
                            || state
                                .children
                                .get(*id)
                                .is_some_and(|rec| rec.current.is_some())
                    })
                    .cloned()
                    .collect();
                let to_stop: Vec<String> = affected
                    .iter()
                    .filter(|id| **id != child_id)
                    .cloned()
                    .collect();
                Self::stop_children_reverse(state, &to_stop).await;
                self.restart_children(state, ctx, affected).await
            }
            Strategy::RestForOne => {
                let affected: Vec<String> = state
                    .order
                    .iter()
                    .filter(|id| {
                        **id == child_id
                            || state.children.get(*id).is_some_and(|rec| {
                                rec.start_order > failed_order && rec.current.is_some()
                            })
                    })
                    .cloned()
                    .collect();
                let to_stop: Vec<String> = affected
                    .iter()
                    .filter(|id| **id != child_id)
                    .cloned()
                    .collect();
                Self::stop_children_reverse(state, &to_stop).await;
                self.restart_children(state, ctx, affected).await
            }
        }
    }

    /// Restart after an explicit request (`terminate_child` on a
    /// Permanent child, `restart_child`). A breach here must still bring
    /// the supervisor down, so the crash is requested through the
    /// context while the error also goes back to the caller.
    async fn forced_restart(
        &mut self,
        state: &mut SupervisorState,
        ctx: &mut ServerContext<Self>,
        child_id: String,
    ) -> Result<(), SupervisorError> {
        let supervisor_id = ctx.server_id();
        state.restart_log.record();
        if state.restart_log.is_exceeded() {
            let RestartIntensity {
                max_restarts,
                within,
            } = state.restart_log.intensity();
            let err = SupervisorError::MaxRestartsExceeded {
                supervisor_id,
                max_restarts,
                within,
            };
            ctx.stop(ExitReason::from_error(&err));
            return Err(err);
        }
        self.restart_children(state, ctx, vec![child_id])
            .await
            .map_err(|e| {
                ctx.stop(ExitReason::from_error(&e));
                e
            })
    }

    fn info(rec: &ChildRecord) -> ChildInfo {
        ChildInfo {
            id: rec.id.clone(),
            server_id: rec.current.as_ref().map(ServerRef::id),
            running: rec.current.as_ref().is_some_and(ServerRef::is_running),
            restart_count: rec.restart_count,
            restart_policy: rec.restart,
            significant: rec.significant,
            start_order: rec.start_order,
        }
    }

    fn infos(state: &SupervisorState) -> Vec<ChildInfo> {
        state
            .order
            .iter()
            .filter_map(|id| state.children.get(id))
            .map(Self::info)
            .collect()
    }
}

#[async_trait]
impl GenServer for SupervisorBehavior {
    type State = SupervisorState;
    type Call = SupervisorCall;
    type Cast = SupervisorCast;
    type Reply = SupervisorReply;
    type Error = SupervisorError;

    async fn init(
        &mut self,
        ctx: &mut ServerContext<Self>,
    ) -> Result<SupervisorState, SupervisorError> {
        self.validate(ctx.server_id())?;

        let mut state = SupervisorState {
            children: HashMap::new(),
            order: Vec::new(),
            restart_log: RestartLog::new(self.intensity),
        };

        // Declared order; unwind in reverse if any start fails.
        let initial = std::mem::take(&mut self.initial);
        for spec in initial {
            let ChildSpec {
                id,
                start,
                restart,
                shutdown_timeout,
                significant,
            } = spec;
            if let Err(e) = self
                .start_new_child(&mut state, ctx, id, start, restart, shutdown_timeout, significant)
                .await
            {
                let order = state.order.clone();
                Self::stop_children_reverse(&mut state, &order).await;
                return Err(e);
            }
        }
        Ok(state)
    }

    async fn handle_call(
        &mut self,
        request: SupervisorCall,
        state: &mut SupervisorState,
        ctx: &mut ServerContext<Self>,
    ) -> Result<SupervisorReply, SupervisorError> {
        let supervisor_id = ctx.server_id();
        match request {
            SupervisorCall::StartChild(spec) => {
                if self.strategy == Strategy::SimpleOneForOne {
                    return Err(SupervisorError::InvalidSimpleOneForOneConfig {
                        supervisor_id,
                        reason: "static child specs are not accepted; use start_child_with".into(),
                    });
                }
                let ChildSpec {
                    id,
                    start,
                    restart,
                    shutdown_timeout,
                    significant,
                } = spec;
                let server = self
                    .start_new_child(state, ctx, id, start, restart, shutdown_timeout, significant)
                    .await?;
                Ok(SupervisorReply::Started(server))
            }

            SupervisorCall::StartSimpleChild(args) => {
                let template = self
                    .template
                    .as_ref()
                    .ok_or(SupervisorError::MissingChildTemplate { supervisor_id })?;
                let start = (template.make)(args).map_err(|reason| {
                    SupervisorError::InvalidSimpleOneForOneConfig {
                        supervisor_id,
                        reason,
                    }
                })?;
                let restart = template.restart;
                let shutdown_timeout = template.shutdown_timeout;
                let significant = template.significant;
                self.simple_seq += 1;
                let id = format!("child-{}", self.simple_seq);
                let server = self
                    .start_new_child(state, ctx, id, start, restart, shutdown_timeout, significant)
                    .await?;
                Ok(SupervisorReply::Started(server))
            }

            SupervisorCall::TerminateChild(child_id) => {
                let restart = {
                    let rec = state.children.get_mut(&child_id).ok_or_else(|| {
                        SupervisorError::ChildNotFound {
                            supervisor_id,
                            child_id: child_id.clone(),
                        }
                    })?;
                    Self::stop_child_record(rec).await;
                    rec.restart
                };
                // A Permanent child comes straight back; Transient and
                // Temporary stay terminated in the table.
                if restart == RestartPolicy::Permanent {
                    self.forced_restart(state, ctx, child_id).await?;
                }
                Ok(SupervisorReply::Terminated)
            }

            SupervisorCall::RestartChild(child_id) => {
                {
                    let rec = state.children.get_mut(&child_id).ok_or_else(|| {
                        SupervisorError::ChildNotFound {
                            supervisor_id,
                            child_id: child_id.clone(),
                        }
                    })?;
                    Self::stop_child_record(rec).await;
                }
                self.forced_restart(state, ctx, child_id.clone()).await?;
                state
                    .children
                    .get(&child_id)
                    .and_then(|rec| rec.current.clone())
                    .map(SupervisorReply::Started)
                    .ok_or_else(|| SupervisorError::Protocol {
                        reason: format!("child '{child_id}' missing after restart"),
                    })
            }

            SupervisorCall::GetChildren => Ok(SupervisorReply::Children(Self::infos(state))),

            SupervisorCall::GetChild(child_id) => Ok(SupervisorReply::Child(
                state.children.get(&child_id).map(Self::info),
            )),

            SupervisorCall::CountChildren => {
                Ok(SupervisorReply::Count(state.children.len()))
            }
        }
    }

    async fn handle_cast(
        &mut self,
        message: SupervisorCast,
        state: &mut SupervisorState,
        ctx: &mut ServerContext<Self>,
    ) -> Result<(), SupervisorError> {
        match message {
            SupervisorCast::ChildExited {
                child_id,
                server_id,
                reason,
            } => {
                self.handle_child_exit(state, ctx, child_id, server_id, reason)
                    .await
            }
        }
    }

    async fn terminate(
        &mut self,
        _reason: &ExitReason,
        state: &mut SupervisorState,
    ) -> Result<(), SupervisorError> {
        let order = state.order.clone();
        Self::stop_children_reverse(state, &order).await;
        Ok(())
    }
}
