//! Gateway client error types.
//!
//! Every failure the client layer surfaces is a [`GatewayError`]. The
//! [`ErrorKind`] classification decides whether the executor and the
//! stream supervisor recover locally (reconnect and retry) or propagate.

use termlink_domain::DomainError;
use thiserror::Error;

/// Errors that can occur while talking to the gateway.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// Network unreachable, transport unavailable or stale session
    #[error("Connection error: {0}")]
    Connection(String),

    /// The server ended a push subscription the caller did not cancel
    #[error("Stream closed by server")]
    StreamClosedByServer,

    /// Invalid credentials or revoked session
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Malformed or rejected request
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The effective deadline of the current attempt elapsed
    #[error("Deadline exceeded")]
    DeadlineExceeded,

    /// The caller's cancellation token fired
    #[error("Cancelled by caller")]
    CancelledByCaller,

    /// Retry budget spent; wraps the last underlying failure
    #[error("Retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Attempts made before giving up
        attempts: u32,
        /// Last underlying error
        #[source]
        last: Box<GatewayError>,
    },

    /// The session was closed; no further use is valid
    #[error("Session closed")]
    SessionClosed,
}

/// Coarse classification of a [`GatewayError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Recovered locally by reconnecting
    Transient,
    /// Never retried (authentication, protocol)
    Fatal,
    /// Attempt deadline elapsed
    Deadline,
    /// Caller cancelled
    Cancelled,
    /// Retry budget spent
    Exhausted,
    /// Session closed
    Closed,
}

impl GatewayError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::Connection(_) | GatewayError::StreamClosedByServer => ErrorKind::Transient,
            GatewayError::Authentication(_) | GatewayError::Protocol(_) => ErrorKind::Fatal,
            GatewayError::DeadlineExceeded => ErrorKind::Deadline,
            GatewayError::CancelledByCaller => ErrorKind::Cancelled,
            GatewayError::RetriesExhausted { .. } => ErrorKind::Exhausted,
            GatewayError::SessionClosed => ErrorKind::Closed,
        }
    }

    /// Whether the client recovers from this error by reconnecting.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// Innermost cause, looking through `RetriesExhausted`.
    pub fn root_cause(&self) -> &GatewayError {
        match self {
            GatewayError::RetriesExhausted { last, .. } => last.root_cause(),
            other => other,
        }
    }
}

impl From<DomainError> for GatewayError {
    fn from(err: DomainError) -> Self {
        GatewayError::Protocol(err.to_string())
    }
}

/// Result type for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_connection_and_stream_close_are_retryable() {
        assert!(GatewayError::Connection("reset".into()).is_retryable());
        assert!(GatewayError::StreamClosedByServer.is_retryable());

        assert!(!GatewayError::Authentication("bad password".into()).is_retryable());
        assert!(!GatewayError::Protocol("bad symbol".into()).is_retryable());
        assert!(!GatewayError::DeadlineExceeded.is_retryable());
        assert!(!GatewayError::CancelledByCaller.is_retryable());
        assert!(!GatewayError::SessionClosed.is_retryable());
    }

    #[test]
    fn test_exhausted_wraps_last_error() {
        let err = GatewayError::RetriesExhausted {
            attempts: 3,
            last: Box::new(GatewayError::Connection("refused".into())),
        };

        assert_eq!(err.kind(), ErrorKind::Exhausted);
        assert!(!err.is_retryable());
        assert!(matches!(err.root_cause(), GatewayError::Connection(_)));
        assert_eq!(err.to_string(), "Retries exhausted after 3 attempts: Connection error: refused");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_domain_error_maps_to_protocol() {
        let err: GatewayError = DomainError::InvalidSymbol("".into()).into();
        assert_eq!(err.kind(), ErrorKind::Fatal);
    }
}
