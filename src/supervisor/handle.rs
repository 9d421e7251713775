//! Public supervisor API.
//!
//! Wraps the supervisor server handle with typed operations; every
//! method is a call into the supervisor's own mailbox.

// Layer 1: Standard library imports
use std::time::Duration;

// Layer 2: Third-party crate imports
// (none)

// Layer 3: Internal module imports
use super::behavior::{SupervisorBehavior, SupervisorCall, SupervisorReply};
use super::error::SupervisorError;
use super::types::{AutoShutdown, ChildInfo, ChildSpec, ChildTemplate, RestartIntensity, Strategy};
use crate::server::{
    self, CallError, ExitReason, ServerHandle, ServerOptions, ServerRef, ServerStatus,
};
use crate::util::ServerId;

/// Default bound on the supervisor's own terminate hook. Generous,
/// because it covers stopping every child sequentially.
pub const DEFAULT_SUPERVISOR_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Start-time configuration for a supervisor.
///
/// # Example
///
/// ```rust,ignore
/// let sup = Supervisor::start(
///     SupervisorOptions::new()
///         .strategy(Strategy::RestForOne)
///         .restart_intensity(RestartIntensity::new(3, Duration::from_secs(5)))
///         .child(ChildSpec::new("config", || server::start(ConfigServer)))
///         .child(ChildSpec::new("store", || server::start(StoreServer))),
/// )
/// .await?;
/// ```
#[derive(Debug, Default)]
pub struct SupervisorOptions {
    strategy: Strategy,
    children: Vec<ChildSpec>,
    template: Option<ChildTemplate>,
    intensity: RestartIntensity,
    auto_shutdown: AutoShutdown,
    name: Option<String>,
    shutdown_timeout: Option<Duration>,
}

impl SupervisorOptions {
    /// Options with every default: OneForOne, no children, 3 restarts
    /// per 5 seconds, no auto-shutdown.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the supervision strategy. Default `OneForOne`.
    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Append one child spec (started in declared order).
    pub fn child(mut self, spec: ChildSpec) -> Self {
        self.children.push(spec);
        self
    }

    /// Replace the child list.
    pub fn children(mut self, specs: Vec<ChildSpec>) -> Self {
        self.children = specs;
        self
    }

    /// Template for `SimpleOneForOne` children. Required for that
    /// strategy, forbidden otherwise.
    pub fn child_template(mut self, template: ChildTemplate) -> Self {
        self.template = Some(template);
        self
    }

    /// Restart-intensity bound. Default 3 restarts per 5 seconds.
    pub fn restart_intensity(mut self, intensity: RestartIntensity) -> Self {
        self.intensity = intensity;
        self
    }

    /// Auto-shutdown rule. Default `Never`.
    pub fn auto_shutdown(mut self, auto_shutdown: AutoShutdown) -> Self {
        self.auto_shutdown = auto_shutdown;
        self
    }

    /// Registry name for the supervisor itself.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Bound on the supervisor's terminate hook (the reverse-order child
    /// shutdown runs inside it). Default 30 seconds.
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = Some(timeout);
        self
    }
}

/// A running supervisor.
///
/// Cloneable; all clones address the same supervisor server.
#[derive(Debug, Clone)]
pub struct Supervisor {
    handle: ServerHandle<SupervisorBehavior>,
}

impl Supervisor {
    /// Start a supervisor and its declared children, in order.
    ///
    /// If any child fails to start, the already-started children are
    /// stopped in reverse order and the start fails.
    pub async fn start(options: SupervisorOptions) -> Result<Self, SupervisorError> {
        let behavior = SupervisorBehavior::new(
            options.strategy,
            options.template,
            options.intensity,
            options.auto_shutdown,
            options.children,
        );

        let mut server_options = ServerOptions::new().shutdown_timeout(
            options
                .shutdown_timeout
                .unwrap_or(DEFAULT_SUPERVISOR_SHUTDOWN_TIMEOUT),
        );
        if let Some(name) = options.name {
            server_options = server_options.name(name);
        }

        let handle = server::start_with(behavior, server_options).await?;
        Ok(Self { handle })
    }

    /// The supervisor's server id.
    pub fn id(&self) -> ServerId {
        self.handle.id()
    }

    /// The supervisor's registered name, if any.
    pub fn name(&self) -> Option<&str> {
        self.handle.name()
    }

    /// Current lifecycle status.
    pub fn status(&self) -> ServerStatus {
        self.handle.status()
    }

    /// Non-blocking status probe.
    pub fn is_running(&self) -> bool {
        self.handle.is_running()
    }

    /// Type-erased view, for nesting under a parent supervisor.
    pub fn server_ref(&self) -> ServerRef {
        self.handle.server_ref()
    }

    /// Add and start a child from a spec (non-Simple strategies).
    pub async fn start_child(&self, spec: ChildSpec) -> Result<ServerRef, SupervisorError> {
        match self.request(SupervisorCall::StartChild(spec)).await? {
            SupervisorReply::Started(server) => Ok(server),
            _ => Err(self.protocol_error("start_child")),
        }
    }

    /// Start a `SimpleOneForOne` child from the template, applied to
    /// `args`. The child id is generated.
    pub async fn start_child_with<A: Send + 'static>(
        &self,
        args: A,
    ) -> Result<ServerRef, SupervisorError> {
        match self
            .request(SupervisorCall::StartSimpleChild(Box::new(args)))
            .await?
        {
            SupervisorReply::Started(server) => Ok(server),
            _ => Err(self.protocol_error("start_child_with")),
        }
    }

    /// Stop a child. A Permanent child is restarted immediately;
    /// Transient and Temporary children stay terminated in the table.
    pub async fn terminate_child(&self, child_id: &str) -> Result<(), SupervisorError> {
        match self
            .request(SupervisorCall::TerminateChild(child_id.into()))
            .await?
        {
            SupervisorReply::Terminated => Ok(()),
            _ => Err(self.protocol_error("terminate_child")),
        }
    }

    /// Force a restart regardless of the child's restart policy.
    pub async fn restart_child(&self, child_id: &str) -> Result<ServerRef, SupervisorError> {
        match self
            .request(SupervisorCall::RestartChild(child_id.into()))
            .await?
        {
            SupervisorReply::Started(server) => Ok(server),
            _ => Err(self.protocol_error("restart_child")),
        }
    }

    /// Snapshot of every child, in start order.
    pub async fn children(&self) -> Result<Vec<ChildInfo>, SupervisorError> {
        match self.request(SupervisorCall::GetChildren).await? {
            SupervisorReply::Children(children) => Ok(children),
            _ => Err(self.protocol_error("children")),
        }
    }

    /// Snapshot of one child, if present.
    pub async fn child(&self, child_id: &str) -> Result<Option<ChildInfo>, SupervisorError> {
        match self
            .request(SupervisorCall::GetChild(child_id.into()))
            .await?
        {
            SupervisorReply::Child(child) => Ok(child),
            _ => Err(self.protocol_error("child")),
        }
    }

    /// Number of children in the table (running or terminated).
    pub async fn count_children(&self) -> Result<usize, SupervisorError> {
        match self.request(SupervisorCall::CountChildren).await? {
            SupervisorReply::Count(count) => Ok(count),
            _ => Err(self.protocol_error("count_children")),
        }
    }

    /// Stop the supervisor: children go down in reverse start order,
    /// each bounded by its own shutdown timeout.
    pub async fn stop(&self, reason: ExitReason) {
        self.handle.stop(reason).await;
    }

    /// Wait for the supervisor to terminate without requesting it.
    pub async fn wait_exit(&self) -> ExitReason {
        self.handle.wait_exit().await
    }

    async fn request(&self, call: SupervisorCall) -> Result<SupervisorReply, SupervisorError> {
        self.handle.call(call).await.map_err(|e| match e {
            CallError::Handler(err) => err,
            CallError::Timeout { timeout, .. } => SupervisorError::CallTimeout {
                supervisor_id: self.id(),
                timeout,
            },
            CallError::NotRunning { .. } => SupervisorError::NotRunning {
                supervisor_id: self.id(),
            },
        })
    }

    fn protocol_error(&self, operation: &str) -> SupervisorError {
        SupervisorError::Protocol {
            reason: format!("unexpected reply to {operation}"),
        }
    }
}
