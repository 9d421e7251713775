//! Type definitions for the supervisor engine: strategies, restart
//! policies, child specifications and templates.

// Layer 1: Standard library imports
use std::any::{type_name, Any};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

// Layer 2: Third-party crate imports
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

// Layer 3: Internal module imports
use crate::server::{GenServer, ServerHandle, ServerRef, SpawnError};
use crate::util::ServerId;

/// Default bound on one child's graceful shutdown.
pub const DEFAULT_CHILD_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Supervision strategy: which children react when one exits.
///
/// | Strategy | Siblings affected |
/// |---|---|
/// | `OneForOne` | none |
/// | `OneForAll` | all running siblings stopped, then restarted in start order |
/// | `RestForOne` | siblings started after the failed child stopped, then restarted in start order |
/// | `SimpleOneForOne` | none; all children share one template |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strategy {
    /// Restart only the failed child.
    OneForOne,

    /// Stop and restart every child when one fails.
    OneForAll,

    /// Restart the failed child and every child started after it.
    RestForOne,

    /// Homogeneous dynamic children stamped from a single template.
    SimpleOneForOne,
}

impl Default for Strategy {
    fn default() -> Self {
        Self::OneForOne
    }
}

/// Restart policy for supervised children.
///
/// Based on Erlang/OTP supervisor restart policies.
///
/// # Examples
///
/// ```rust
/// use gensrv::supervisor::RestartPolicy;
///
/// assert!(RestartPolicy::Permanent.should_restart(false));
/// assert!(RestartPolicy::Transient.should_restart(true));
/// assert!(!RestartPolicy::Transient.should_restart(false));
/// assert!(!RestartPolicy::Temporary.should_restart(true));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestartPolicy {
    /// Always restart, regardless of exit reason.
    Permanent,

    /// Restart only after an error exit.
    Transient,

    /// Never restart.
    Temporary,
}

impl RestartPolicy {
    /// Whether this policy calls for a restart given how the child exited.
    pub fn should_restart(&self, exit_was_error: bool) -> bool {
        match self {
            RestartPolicy::Permanent => true,
            RestartPolicy::Transient => exit_was_error,
            RestartPolicy::Temporary => false,
        }
    }
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self::Permanent
    }
}

/// When a supervisor shuts itself down in reaction to significant
/// children terminating without restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AutoShutdown {
    /// Run regardless of child population.
    Never,

    /// Stop when any significant child terminates unrestarted.
    AnySignificant,

    /// Stop when the last significant child terminates unrestarted.
    AllSignificant,
}

impl Default for AutoShutdown {
    fn default() -> Self {
        Self::Never
    }
}

/// Upper bound on restart frequency before the supervisor gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartIntensity {
    /// Restarts tolerated inside the window.
    pub max_restarts: u32,

    /// Sliding window length.
    pub within: Duration,
}

impl RestartIntensity {
    /// `max_restarts` restarts per `within`.
    pub fn new(max_restarts: u32, within: Duration) -> Self {
        Self {
            max_restarts,
            within,
        }
    }
}

impl Default for RestartIntensity {
    fn default() -> Self {
        Self {
            max_restarts: 3,
            within: Duration::from_secs(5),
        }
    }
}

/// Reinvocable child start factory, type-erased to a [`ServerRef`].
pub(crate) type StartFn =
    Arc<dyn Fn() -> BoxFuture<'static, Result<ServerRef, SpawnError>> + Send + Sync>;

/// Declaration of one supervised child.
///
/// # Example
///
/// ```rust,ignore
/// let spec = ChildSpec::new("worker", || server::start(Worker::default()))
///     .restart(RestartPolicy::Transient)
///     .shutdown_timeout(Duration::from_secs(2))
///     .significant(true);
/// ```
pub struct ChildSpec {
    /// Unique id within the owning supervisor.
    pub id: String,

    pub(crate) start: StartFn,

    /// When to restart this child.
    pub restart: RestartPolicy,

    /// Bound on this child's graceful shutdown.
    pub shutdown_timeout: Duration,

    /// Whether this child participates in auto-shutdown.
    pub significant: bool,
}

impl ChildSpec {
    /// Declare a child started from a typed server factory.
    pub fn new<F, Fut, B>(id: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ServerHandle<B>, SpawnError>> + Send + 'static,
        B: GenServer,
    {
        Self::from_start_fn(
            id,
            Arc::new(
                move || -> BoxFuture<'static, Result<ServerRef, SpawnError>> {
                    let fut = factory();
                    Box::pin(async move { fut.await.map(|handle| handle.server_ref()) })
                },
            ),
        )
    }

    /// Declare a child from a factory that already yields a type-erased
    /// [`ServerRef`] (nested supervisors use this).
    pub fn new_erased<F, Fut>(id: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ServerRef, SpawnError>> + Send + 'static,
    {
        Self::from_start_fn(
            id,
            Arc::new(
                move || -> BoxFuture<'static, Result<ServerRef, SpawnError>> {
                    Box::pin(factory())
                },
            ),
        )
    }

    pub(crate) fn from_start_fn(id: impl Into<String>, start: StartFn) -> Self {
        Self {
            id: id.into(),
            start,
            restart: RestartPolicy::default(),
            shutdown_timeout: DEFAULT_CHILD_SHUTDOWN_TIMEOUT,
            significant: false,
        }
    }

    /// Set the restart policy. Default `Permanent`.
    pub fn restart(mut self, policy: RestartPolicy) -> Self {
        self.restart = policy;
        self
    }

    /// Set the shutdown bound. Default 5 seconds.
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Mark the child significant for auto-shutdown. Default false.
    pub fn significant(mut self, significant: bool) -> Self {
        self.significant = significant;
        self
    }
}

impl fmt::Debug for ChildSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChildSpec")
            .field("id", &self.id)
            .field("restart", &self.restart)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("significant", &self.significant)
            .finish()
    }
}

type MakeStartFn = dyn Fn(Box<dyn Any + Send>) -> Result<StartFn, String> + Send + Sync;

/// Template for `SimpleOneForOne` children.
///
/// Every dynamic child is stamped from the same factory, applied to the
/// argument value passed to `start_child_with`. The argument type is
/// erased here and checked again at start time.
pub struct ChildTemplate {
    pub(crate) make: Arc<MakeStartFn>,

    /// Restart policy shared by every stamped child.
    pub restart: RestartPolicy,

    /// Shutdown bound shared by every stamped child.
    pub shutdown_timeout: Duration,

    /// Significance shared by every stamped child.
    pub significant: bool,
}

impl ChildTemplate {
    /// Build a template from a typed factory `Fn(Args) -> Future<Handle>`.
    ///
    /// `Args` must be `Clone` so restarts can re-apply the original
    /// arguments.
    pub fn new<A, F, Fut, B>(factory: F) -> Self
    where
        A: Clone + Send + Sync + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ServerHandle<B>, SpawnError>> + Send + 'static,
        B: GenServer,
    {
        let factory = Arc::new(factory);
        Self {
            make: Arc::new(move |args: Box<dyn Any + Send>| {
                let args = args.downcast::<A>().map_err(|_| {
                    format!("argument type mismatch: template expects {}", type_name::<A>())
                })?;
                let args = *args;
                let factory = Arc::clone(&factory);
                let start: StartFn = Arc::new(
                    move || -> BoxFuture<'static, Result<ServerRef, SpawnError>> {
                        let fut = factory(args.clone());
                        Box::pin(async move { fut.await.map(|handle| handle.server_ref()) })
                    },
                );
                Ok(start)
            }),
            restart: RestartPolicy::Transient,
            shutdown_timeout: DEFAULT_CHILD_SHUTDOWN_TIMEOUT,
            significant: false,
        }
    }

    /// Set the restart policy. Default `Transient`.
    pub fn restart(mut self, policy: RestartPolicy) -> Self {
        self.restart = policy;
        self
    }

    /// Set the shutdown bound. Default 5 seconds.
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Mark stamped children significant. Default false.
    pub fn significant(mut self, significant: bool) -> Self {
        self.significant = significant;
        self
    }
}

impl fmt::Debug for ChildTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChildTemplate")
            .field("restart", &self.restart)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("significant", &self.significant)
            .finish()
    }
}

/// Observable snapshot of one supervised child.
#[derive(Debug, Clone, Serialize)]
pub struct ChildInfo {
    /// Child id, unique within the supervisor.
    pub id: String,

    /// Id of the currently running server, if the child is up.
    pub server_id: Option<ServerId>,

    /// Whether the child is currently running.
    pub running: bool,

    /// How many times this child has been restarted.
    pub restart_count: u32,

    /// The child's restart policy.
    pub restart_policy: RestartPolicy,

    /// Whether the child participates in auto-shutdown.
    pub significant: bool,

    /// Position in start order (shutdown runs in reverse).
    pub start_order: usize,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_default() {
        assert_eq!(Strategy::default(), Strategy::OneForOne);
    }

    #[test]
    fn test_restart_policy_permanent() {
        let policy = RestartPolicy::Permanent;
        assert!(policy.should_restart(true)); // Error exit
        assert!(policy.should_restart(false)); // Normal exit
    }

    #[test]
    fn test_restart_policy_transient() {
        let policy = RestartPolicy::Transient;
        assert!(policy.should_restart(true)); // Error exit
        assert!(!policy.should_restart(false)); // Normal exit
    }

    #[test]
    fn test_restart_policy_temporary() {
        let policy = RestartPolicy::Temporary;
        assert!(!policy.should_restart(true)); // Error exit
        assert!(!policy.should_restart(false)); // Normal exit
    }

    #[test]
    fn test_restart_intensity_default() {
        let intensity = RestartIntensity::default();
        assert_eq!(intensity.max_restarts, 3);
        assert_eq!(intensity.within, Duration::from_secs(5));
    }

    #[test]
    fn test_auto_shutdown_default() {
        assert_eq!(AutoShutdown::default(), AutoShutdown::Never);
    }

    #[test]
    fn test_child_info_serializes() {
        let info = ChildInfo {
            id: "worker-1".into(),
            server_id: None,
            running: false,
            restart_count: 2,
            restart_policy: RestartPolicy::Permanent,
            significant: false,
            start_order: 0,
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["id"], "worker-1");
        assert_eq!(json["restart_count"], 2);
    }
}
