//! Session error types

use contracts::StreamError;
use thiserror::Error;

use crate::{SessionHandle, SessionState};

/// Errors surfaced by lifecycle and query operations
///
/// `draw_frame` never returns these; it reports through `DrawStatus`.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Operation not allowed in the current lifecycle state
    #[error("{operation} not allowed while {state}")]
    InvalidTransition {
        operation: &'static str,
        state: SessionState,
    },

    /// Handle was never issued or its session is gone
    #[error("unknown session handle {0}")]
    UnknownHandle(SessionHandle),

    /// Acquiring a session resource failed
    #[error("failed to acquire {resource}: {source}")]
    Acquire {
        resource: &'static str,
        #[source]
        source: StreamError,
    },

    /// Launch arguments or configuration rejected
    #[error(transparent)]
    Config(StreamError),
}

impl SessionError {
    pub fn invalid_transition(operation: &'static str, state: SessionState) -> Self {
        Self::InvalidTransition { operation, state }
    }

    pub fn acquire(resource: &'static str, source: StreamError) -> Self {
        Self::Acquire { resource, source }
    }
}

impl From<SessionError> for StreamError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::InvalidTransition { operation, state } => StreamError::InvalidTransition {
                operation,
                state: state.as_str(),
            },
            SessionError::UnknownHandle(handle) => StreamError::UnknownSession { handle: handle.raw() },
            SessionError::Acquire { source, .. } | SessionError::Config(source) => source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::ErrorKind;

    #[test]
    fn test_converts_into_taxonomy() {
        let err: StreamError = SessionError::invalid_transition("resume", SessionState::Destroyed).into();
        assert_eq!(err.kind(), ErrorKind::Lifecycle);
        assert_eq!(err.to_string(), "invalid transition: resume while destroyed");

        let err: StreamError = SessionError::acquire("transport", StreamError::connection_lost("refused")).into();
        assert_eq!(err.kind(), ErrorKind::TransportTerminal);
    }

    #[test]
    fn test_display() {
        let err = SessionError::invalid_transition("pause", SessionState::Destroyed);
        assert_eq!(err.to_string(), "pause not allowed while destroyed");
    }
}
