//! Error kinds shared by every layer of the runtime.
//!
//! Input validation errors are returned synchronously before any network call
//! is made.  Everything that happens after a request is in flight (transport
//! failures, server errors, decode failures) is routed through the request
//! state machine and reaches the caller as an `on_error(code, message)`
//! callback instead of a returned `Err`.

use thiserror::Error;

use crate::request::RequestState;

// ---------------------------------------------------------------------------
// RuntimeError
// ---------------------------------------------------------------------------

/// Every failure the runtime can surface.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RuntimeError {
    /// The service endpoint is not configured (empty base URL or path).
    #[error("no service configuration available")]
    NoConfiguration,

    /// No access token is available for the `Authorization` header.
    #[error("no access token configured")]
    NoCredential,

    /// The caller supplied input the service would reject (empty or
    /// over-length text, wrong input type for the operation, …).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The service host could not be reached.
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    /// No data and no progress arrived within the request timeout.
    #[error("request timed out")]
    Timeout,

    /// The service answered with a non-success status or reported an error
    /// inside the response body.
    #[error("server error ({status}): {message}")]
    ServerError { status: u16, message: String },

    /// A response (JSON or audio) could not be decoded.
    #[error("decode failure: {0}")]
    DecodeFailure(String),

    /// An operation was attempted in a state that does not allow it.
    #[error("invalid state transition: cannot {operation} while {from}")]
    InvalidStateTransition {
        from: RequestState,
        operation: &'static str,
    },

    /// The request was cancelled by the caller.
    #[error("request cancelled: {0}")]
    Cancelled(String),

    /// Local file-system failure (download temp file handling).
    #[error("I/O error: {0}")]
    Io(String),
}

impl RuntimeError {
    /// Numeric code delivered alongside the message in `on_error`.
    ///
    /// Server errors report their HTTP status; client-side kinds use stable
    /// negative codes so they can never collide with a status.
    pub fn code(&self) -> i32 {
        match self {
            RuntimeError::NoConfiguration => -1,
            RuntimeError::NoCredential => -2,
            RuntimeError::InvalidInput(_) => -3,
            RuntimeError::NetworkUnreachable(_) => -4,
            RuntimeError::Timeout => -5,
            RuntimeError::ServerError { status, .. } => i32::from(*status),
            RuntimeError::DecodeFailure(_) => -6,
            RuntimeError::InvalidStateTransition { .. } => -7,
            RuntimeError::Cancelled(_) => -8,
            RuntimeError::Io(_) => -9,
        }
    }

    /// `true` for failures a caller may reasonably retry.  The runtime itself
    /// never retries.
    pub fn is_retryable(&self) -> bool {
        match self {
            RuntimeError::Timeout | RuntimeError::NetworkUnreachable(_) => true,
            RuntimeError::ServerError { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for RuntimeError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RuntimeError::Timeout
        } else if e.is_connect() {
            RuntimeError::NetworkUnreachable(e.to_string())
        } else if e.is_decode() {
            RuntimeError::DecodeFailure(e.to_string())
        } else if let Some(status) = e.status() {
            RuntimeError::ServerError {
                status: status.as_u16(),
                message: e.to_string(),
            }
        } else {
            RuntimeError::NetworkUnreachable(e.to_string())
        }
    }
}

impl From<std::io::Error> for RuntimeError {
    fn from(e: std::io::Error) -> Self {
        RuntimeError::Io(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_error_code_is_http_status() {
        let e = RuntimeError::ServerError {
            status: 503,
            message: "busy".into(),
        };
        assert_eq!(e.code(), 503);
        assert!(e.to_string().contains("busy"));
    }

    #[test]
    fn client_side_codes_are_negative_and_distinct() {
        let errors = [
            RuntimeError::NoConfiguration,
            RuntimeError::NoCredential,
            RuntimeError::InvalidInput("x".into()),
            RuntimeError::NetworkUnreachable("x".into()),
            RuntimeError::Timeout,
            RuntimeError::DecodeFailure("x".into()),
            RuntimeError::InvalidStateTransition {
                from: RequestState::Completed,
                operation: "send",
            },
            RuntimeError::Cancelled("x".into()),
            RuntimeError::Io("x".into()),
        ];
        let mut codes: Vec<i32> = errors.iter().map(RuntimeError::code).collect();
        assert!(codes.iter().all(|c| *c < 0));
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn retryable_kinds() {
        assert!(RuntimeError::Timeout.is_retryable());
        assert!(RuntimeError::NetworkUnreachable("down".into()).is_retryable());
        assert!(RuntimeError::ServerError {
            status: 500,
            message: String::new()
        }
        .is_retryable());
        assert!(!RuntimeError::ServerError {
            status: 400,
            message: String::new()
        }
        .is_retryable());
        assert!(!RuntimeError::InvalidInput("empty".into()).is_retryable());
    }

    #[test]
    fn invalid_transition_message_names_state_and_operation() {
        let e = RuntimeError::InvalidStateTransition {
            from: RequestState::Cancelled,
            operation: "send",
        };
        let msg = e.to_string();
        assert!(msg.contains("send"));
        assert!(msg.contains("Cancelled"));
    }

    #[test]
    fn io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let e: RuntimeError = io.into();
        assert!(matches!(e, RuntimeError::Io(ref m) if m.contains("gone")));
    }
}
