use thiserror::Error;

/// Top-level error type for the `livefeed-api` crate.
///
/// Covers every failure mode of a single stream attempt: credential lookup,
/// request construction, the HTTP exchange, and reading the response body.
/// `livefeed-core` classifies these into termination reasons.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// The server refused the bearer credential (HTTP 401 / 403).
    #[error("Credential rejected by server (HTTP {status})")]
    AuthRejected { status: u16 },

    /// The credential provider could not produce a token.
    #[error("No credential available: {message}")]
    Credentials { message: String },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, reset, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Non-success status other than an auth rejection.
    #[error("Unexpected HTTP status {status}")]
    Status { status: u16 },

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Header value could not be encoded (e.g. a token with control characters).
    #[error("Invalid header value for {name}")]
    InvalidHeader { name: &'static str },

    /// TLS setup or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// The body stream failed mid-read for a reason other than reqwest.
    #[error("Stream error: {0}")]
    Stream(String),

    /// No bytes arrived within the configured idle window.
    #[error("Stream idle for {idle_secs}s")]
    Idle { idle_secs: u64 },

    // ── Lifecycle ───────────────────────────────────────────────────
    /// The caller cancelled the request.
    #[error("Stream request cancelled")]
    Cancelled,
}

impl Error {
    /// Returns `true` if the server rejected the credential.
    ///
    /// Retrying with the same credential is pointless; a refresh
    /// collaborator has to act first.
    pub fn is_auth_rejected(&self) -> bool {
        matches!(self, Self::AuthRejected { .. } | Self::Credentials { .. })
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Status { .. } | Self::Stream(_) | Self::Idle { .. } => true,
            Self::AuthRejected { .. }
            | Self::Credentials { .. }
            | Self::InvalidUrl(_)
            | Self::InvalidHeader { .. }
            | Self::Tls(_)
            | Self::Cancelled => false,
        }
    }
}
