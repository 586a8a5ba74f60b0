// ── Core error types ──
//
// `CoreError` is what fallible hub operations return. `StreamError` is what
// a running connection reports to its consumer's `on_error` callback; the
// read loop itself never returns errors to anyone.

use std::fmt;

use strum::{Display, EnumString, IntoStaticStr};
use thiserror::Error;

/// Classification carried by every [`StreamError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Credential refused. Terminal: the connection is closed and not retried.
    AuthRejected,
    /// Connection failed or dropped. Transient while reconnection continues.
    TransportError,
    /// A malformed record was dropped. The connection stays open.
    ParseWarning,
}

impl ErrorKind {
    /// `true` if the consumer has to act before the stream can resume.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::AuthRejected)
    }
}

/// A fault observed on one entity's stream, delivered to `on_error`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamError {
    pub key: String,
    pub kind: ErrorKind,
    pub message: String,
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.key, self.kind, self.message)
    }
}

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Input errors ─────────────────────────────────────────────────
    #[error("Invalid entity key {key:?}: {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Connection errors ────────────────────────────────────────────
    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Connection failed: {reason}")]
    ConnectionFailed { reason: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<livefeed_api::Error> for CoreError {
    fn from(err: livefeed_api::Error) -> Self {
        use livefeed_api::Error as ApiError;

        match err {
            ApiError::AuthRejected { .. } | ApiError::Credentials { .. } => {
                CoreError::AuthenticationFailed {
                    message: err.to_string(),
                }
            }
            ApiError::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            ApiError::Tls(msg) => CoreError::Config {
                message: format!("TLS error: {msg}"),
            },
            ApiError::InvalidHeader { name } => CoreError::Config {
                message: format!("Invalid header value for {name}"),
            },
            ApiError::Transport(_)
            | ApiError::Status { .. }
            | ApiError::Stream(_)
            | ApiError::Idle { .. } => CoreError::ConnectionFailed {
                reason: err.to_string(),
            },
            ApiError::Cancelled => CoreError::Internal("stream request cancelled".into()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn error_kind_uses_wire_style_names() {
        assert_eq!(ErrorKind::AuthRejected.to_string(), "AUTH_REJECTED");
        assert_eq!(ErrorKind::TransportError.to_string(), "TRANSPORT_ERROR");
        assert_eq!(
            ErrorKind::from_str("PARSE_WARNING").unwrap(),
            ErrorKind::ParseWarning
        );
    }

    #[test]
    fn only_auth_rejection_is_terminal() {
        assert!(ErrorKind::AuthRejected.is_terminal());
        assert!(!ErrorKind::TransportError.is_terminal());
        assert!(!ErrorKind::ParseWarning.is_terminal());
    }

    #[test]
    fn stream_error_display() {
        let err = StreamError {
            key: "press-01".into(),
            kind: ErrorKind::TransportError,
            message: "connection reset".into(),
        };
        assert_eq!(err.to_string(), "[press-01] TRANSPORT_ERROR: connection reset");
    }

    #[test]
    fn api_auth_rejection_maps_to_authentication_failed() {
        let err: CoreError = livefeed_api::Error::AuthRejected { status: 401 }.into();
        assert!(matches!(err, CoreError::AuthenticationFailed { .. }));
    }

    #[test]
    fn api_status_maps_to_connection_failed() {
        let err: CoreError = livefeed_api::Error::Status { status: 502 }.into();
        assert!(matches!(err, CoreError::ConnectionFailed { .. }));
    }
}
