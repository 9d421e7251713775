//! Error types for server engine operations.
//!
//! Engine errors are thrown synchronously from the public API and never
//! kill the server they address; handler errors travel inside
//! [`CallError::Handler`] or become an error exit reason.

// Layer 1: Standard library imports
use std::error::Error;
use std::time::Duration;

// Layer 2: Third-party crate imports
use thiserror::Error;

// Layer 3: Internal module imports
use crate::util::ServerId;

/// Errors that can occur while starting a server.
#[derive(Debug, Error)]
pub enum SpawnError {
    /// The init hook returned an error.
    #[error("server {server_id} failed to initialize: {source}")]
    InitFailed {
        server_id: ServerId,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },

    /// The init hook did not complete within the configured deadline.
    #[error("server {server_id} did not initialize within {timeout:?}")]
    InitTimeout {
        server_id: ServerId,
        timeout: Duration,
    },

    /// The requested registry name is already taken.
    #[error("name '{name}' is already registered")]
    AlreadyRegistered { name: String },
}

impl SpawnError {
    /// Returns `true` if the failure came from the init hook itself.
    pub fn is_init_failure(&self) -> bool {
        matches!(
            self,
            SpawnError::InitFailed { .. } | SpawnError::InitTimeout { .. }
        )
    }

    /// Returns the id of the server that failed to start, if known.
    pub fn server_id(&self) -> Option<&ServerId> {
        match self {
            SpawnError::InitFailed { server_id, .. }
            | SpawnError::InitTimeout { server_id, .. } => Some(server_id),
            SpawnError::AlreadyRegistered { .. } => None,
        }
    }
}

/// Outcome of a failed call.
///
/// A call resolves to exactly one of: the handler's reply, a timeout, a
/// not-running rejection, or the handler's own error. A reply arriving
/// after the deadline is dropped; it is never delivered late.
#[derive(Debug, Error)]
pub enum CallError<E>
where
    E: Error + Send + Sync + 'static,
{
    /// No reply arrived within the caller's deadline. The envelope may
    /// still be processed; the reply is discarded.
    #[error("call to server {server_id} timed out after {timeout:?}")]
    Timeout {
        server_id: ServerId,
        timeout: Duration,
    },

    /// The server had already left the running state at enqueue time, or
    /// terminated before replying.
    #[error("server {server_id} is not running")]
    NotRunning { server_id: ServerId },

    /// The handler rejected the request with its own error. The server
    /// keeps running.
    #[error("call handler failed: {0}")]
    Handler(#[source] E),
}

impl<E> CallError<E>
where
    E: Error + Send + Sync + 'static,
{
    /// Returns `true` for the client-side deadline case.
    pub fn is_timeout(&self) -> bool {
        matches!(self, CallError::Timeout { .. })
    }

    /// Returns `true` if the server was unavailable.
    pub fn is_not_running(&self) -> bool {
        matches!(self, CallError::NotRunning { .. })
    }

    /// Returns the handler error, if that is what failed.
    pub fn into_handler_error(self) -> Option<E> {
        match self {
            CallError::Handler(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_spawn_error_init_failed() {
        let id = ServerId::new();
        let err = SpawnError::InitFailed {
            server_id: id,
            source: Box::new(io::Error::other("no database")),
        };

        assert!(err.is_init_failure());
        assert_eq!(err.server_id(), Some(&id));
        assert!(err.to_string().contains("no database"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_spawn_error_init_timeout() {
        let id = ServerId::new();
        let err = SpawnError::InitTimeout {
            server_id: id,
            timeout: Duration::from_secs(5),
        };

        assert!(err.is_init_failure());
        assert!(err.to_string().contains('5'));
    }

    #[test]
    fn test_spawn_error_already_registered() {
        let err = SpawnError::AlreadyRegistered {
            name: "cache".into(),
        };

        assert!(!err.is_init_failure());
        assert_eq!(err.server_id(), None);
        assert!(err.to_string().contains("cache"));
    }

    #[test]
    fn test_call_error_predicates() {
        let id = ServerId::new();
        let timeout: CallError<io::Error> = CallError::Timeout {
            server_id: id,
            timeout: Duration::from_millis(50),
        };
        let not_running: CallError<io::Error> = CallError::NotRunning { server_id: id };
        let handler: CallError<io::Error> = CallError::Handler(io::Error::other("rejected"));

        assert!(timeout.is_timeout());
        assert!(!timeout.is_not_running());
        assert!(not_running.is_not_running());
        assert!(handler.into_handler_error().is_some());
    }

    #[test]
    fn test_call_error_display() {
        let id = ServerId::new();
        let err: CallError<io::Error> = CallError::Timeout {
            server_id: id,
            timeout: Duration::from_millis(50),
        };
        assert!(err.to_string().contains(&id.to_string()));
    }
}
