//! Error types for supervisor operations.

// Layer 1: Standard library imports
use std::time::Duration;

// Layer 2: Third-party crate imports
use thiserror::Error;

// Layer 3: Internal module imports
use crate::server::SpawnError;
use crate::util::ServerId;

/// Errors raised by supervisor operations.
///
/// Child failures themselves never surface here; they are absorbed by
/// the restart policy. Only policy breaches, configuration mistakes and
/// request-level problems cross the supervisor boundary.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// Restart frequency breached the configured intensity. The
    /// supervisor terminates with this reason and its parent, if any,
    /// observes an error exit.
    #[error(
        "supervisor {supervisor_id} exceeded {max_restarts} restarts within {within:?}"
    )]
    MaxRestartsExceeded {
        supervisor_id: ServerId,
        max_restarts: u32,
        within: Duration,
    },

    /// A child spec reused an id already present in the child table.
    #[error("supervisor {supervisor_id} already has a child '{child_id}'")]
    DuplicateChild {
        supervisor_id: ServerId,
        child_id: String,
    },

    /// No child with the given id exists in the table.
    #[error("supervisor {supervisor_id} has no child '{child_id}'")]
    ChildNotFound {
        supervisor_id: ServerId,
        child_id: String,
    },

    /// `SimpleOneForOne` requires a child template.
    #[error("supervisor {supervisor_id} has no child template")]
    MissingChildTemplate { supervisor_id: ServerId },

    /// The simple-one-for-one configuration or start request is invalid.
    #[error("invalid simple-one-for-one configuration for supervisor {supervisor_id}: {reason}")]
    InvalidSimpleOneForOneConfig {
        supervisor_id: ServerId,
        reason: String,
    },

    /// A child's start factory failed.
    #[error("supervisor {supervisor_id} failed to start child '{child_id}': {source}")]
    StartChildFailed {
        supervisor_id: ServerId,
        child_id: String,
        #[source]
        source: SpawnError,
    },

    /// The supervisor itself is not running.
    #[error("supervisor {supervisor_id} is not running")]
    NotRunning { supervisor_id: ServerId },

    /// A request to the supervisor timed out.
    #[error("request to supervisor {supervisor_id} timed out after {timeout:?}")]
    CallTimeout {
        supervisor_id: ServerId,
        timeout: Duration,
    },

    /// Starting the supervisor server itself failed.
    #[error(transparent)]
    Spawn(#[from] SpawnError),

    /// Internal request/reply shape violation. Indicates a bug in the
    /// supervisor protocol, not in caller code.
    #[error("supervisor protocol violation: {reason}")]
    Protocol { reason: String },
}

impl SupervisorError {
    /// Returns `true` for failures that terminate the supervisor.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SupervisorError::MaxRestartsExceeded { .. })
    }

    /// Returns the child id this error concerns, if any.
    pub fn child_id(&self) -> Option<&str> {
        match self {
            SupervisorError::DuplicateChild { child_id, .. }
            | SupervisorError::ChildNotFound { child_id, .. }
            | SupervisorError::StartChildFailed { child_id, .. } => Some(child_id),
            _ => None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_max_restarts_is_fatal() {
        let err = SupervisorError::MaxRestartsExceeded {
            supervisor_id: ServerId::new(),
            max_restarts: 3,
            within: Duration::from_secs(5),
        };

        assert!(err.is_fatal());
        assert_eq!(err.child_id(), None);
        assert!(err.to_string().contains('3'));
    }

    #[test]
    fn test_duplicate_child_carries_id() {
        let err = SupervisorError::DuplicateChild {
            supervisor_id: ServerId::new(),
            child_id: "worker-1".into(),
        };

        assert!(!err.is_fatal());
        assert_eq!(err.child_id(), Some("worker-1"));
        assert!(err.to_string().contains("worker-1"));
    }

    #[test]
    fn test_child_not_found_display() {
        let id = ServerId::new();
        let err = SupervisorError::ChildNotFound {
            supervisor_id: id,
            child_id: "missing".into(),
        };

        assert!(err.to_string().contains(&id.to_string()));
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_spawn_error_wraps() {
        let err: SupervisorError = SpawnError::AlreadyRegistered {
            name: "sup".into(),
        }
        .into();

        assert!(matches!(err, SupervisorError::Spawn(_)));
    }
}
