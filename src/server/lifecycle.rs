//! Server lifecycle state machine and exit reasons.
//!
//! Provides the server state machine used for status probes and
//! supervision decisions.

// Layer 1: Standard library imports
use std::fmt;

// Layer 2: Third-party crate imports
use serde::{Deserialize, Serialize};

// Layer 3: Internal module imports
// (none)

/// Server state in the lifecycle state machine.
///
/// # State Transitions
///
/// ```text
/// Initializing -> Running -> Stopping -> Stopped
/// ```
///
/// Only `Running` servers accept calls and casts. A crash enters
/// `Stopping` with an error reason and drains to `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerStatus {
    /// Server is running its init hook (or restoring a snapshot).
    Initializing,

    /// Server is processing messages.
    Running,

    /// Server is draining its mailbox and running terminate.
    Stopping,

    /// Server has fully terminated.
    Stopped,
}

impl ServerStatus {
    /// Returns `true` if the server accepts new calls and casts.
    pub fn is_running(&self) -> bool {
        matches!(self, ServerStatus::Running)
    }

    /// Returns `true` if the server has fully terminated.
    pub fn is_stopped(&self) -> bool {
        matches!(self, ServerStatus::Stopped)
    }
}

impl Default for ServerStatus {
    fn default() -> Self {
        Self::Initializing
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServerStatus::Initializing => "initializing",
            ServerStatus::Running => "running",
            ServerStatus::Stopping => "stopping",
            ServerStatus::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

/// Why a server exited.
///
/// Supervisors use the reason to decide restart eligibility:
/// `Transient` children restart only on [`ExitReason::Error`].
///
/// # Examples
///
/// ```rust
/// use gensrv::server::ExitReason;
///
/// assert!(!ExitReason::Normal.is_error());
/// assert!(!ExitReason::Shutdown.is_error());
/// assert!(ExitReason::Error("boom".into()).is_error());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "detail", rename_all = "snake_case")]
pub enum ExitReason {
    /// Clean, voluntary termination.
    Normal,

    /// Termination requested by a supervisor or the runtime.
    Shutdown,

    /// Termination caused by a handler or init failure.
    Error(String),
}

impl ExitReason {
    /// Returns `true` for error exits (abnormal termination).
    pub fn is_error(&self) -> bool {
        matches!(self, ExitReason::Error(_))
    }

    /// Build an error reason from any error value.
    pub fn from_error<E: fmt::Display>(error: &E) -> Self {
        Self::Error(error.to_string())
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::Normal => write!(f, "normal"),
            ExitReason::Shutdown => write!(f, "shutdown"),
            ExitReason::Error(detail) => write!(f, "error: {detail}"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_status_default() {
        assert_eq!(ServerStatus::default(), ServerStatus::Initializing);
    }

    #[test]
    fn test_status_predicates() {
        assert!(ServerStatus::Running.is_running());
        assert!(!ServerStatus::Stopping.is_running());
        assert!(!ServerStatus::Initializing.is_running());

        assert!(ServerStatus::Stopped.is_stopped());
        assert!(!ServerStatus::Running.is_stopped());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(format!("{}", ServerStatus::Running), "running");
        assert_eq!(format!("{}", ServerStatus::Stopped), "stopped");
    }

    #[test]
    fn test_exit_reason_is_error() {
        assert!(!ExitReason::Normal.is_error());
        assert!(!ExitReason::Shutdown.is_error());
        assert!(ExitReason::Error("x".into()).is_error());
    }

    #[test]
    fn test_exit_reason_from_error() {
        let err = std::io::Error::other("disk gone");
        let reason = ExitReason::from_error(&err);
        assert!(reason.is_error());
        assert!(format!("{reason}").contains("disk gone"));
    }

    #[test]
    fn test_exit_reason_serde_roundtrip() {
        let reason = ExitReason::Error("boom".into());
        let json = serde_json::to_string(&reason).unwrap();
        let back: ExitReason = serde_json::from_str(&json).unwrap();
        assert_eq!(reason, back);
    }
}
