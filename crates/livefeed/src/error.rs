//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use livefeed_config::ConfigError;
use livefeed_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────

    #[error("Could not reach the event server: {reason}")]
    #[diagnostic(
        code(livefeed::connection_failed),
        help("Check that the server is running and the URL is correct.")
    )]
    ConnectionFailed { reason: String },

    #[error("Every stream closed: {keys}")]
    #[diagnostic(
        code(livefeed::streams_closed),
        help("Run with -v to see why each stream gave up.")
    )]
    StreamsClosed { keys: String },

    // ── Authentication ───────────────────────────────────────────────

    #[error("The server rejected the token for profile '{profile}'")]
    #[diagnostic(
        code(livefeed::auth_failed),
        help(
            "Verify the token, or supply a fresh one with --token\n\
             or the LIVEFEED_TOKEN environment variable."
        )
    )]
    AuthFailed { profile: String },

    #[error("No token configured for profile '{profile}'")]
    #[diagnostic(
        code(livefeed::no_credentials),
        help(
            "Set `token`, `token_env` or `keyring = true` in the profile,\n\
             or pass --token / set LIVEFEED_TOKEN."
        )
    )]
    NoCredentials { profile: String },

    // ── Configuration ────────────────────────────────────────────────

    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(livefeed::profile_not_found),
        help("Available profiles: {available}")
    )]
    ProfileNotFound { name: String, available: String },

    #[error("No server configured")]
    #[diagnostic(
        code(livefeed::no_config),
        help(
            "Pass --server, or create a profile in the config file.\n\
             Expected at: {path}"
        )
    )]
    NoConfig { path: String },

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(livefeed::validation))]
    Validation { field: String, reason: String },

    #[error(transparent)]
    #[diagnostic(code(livefeed::config))]
    Config(ConfigError),

    // ── IO / Serialization ────────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::StreamsClosed { .. } => exit_code::CONNECTION,
            Self::AuthFailed { .. } | Self::NoCredentials { .. } => exit_code::AUTH,
            Self::Validation { .. } | Self::NoConfig { .. } | Self::ProfileNotFound { .. } => {
                exit_code::USAGE
            }
            _ => exit_code::GENERAL,
        }
    }
}

// ── Library error mapping ────────────────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::NoCredentials { profile } => CliError::NoCredentials { profile },
            ConfigError::UnknownProfile { profile } => CliError::ProfileNotFound {
                name: profile,
                available: "(none)".into(),
            },
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            other => CliError::Config(other),
        }
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidKey { key, reason } => CliError::Validation {
                field: format!("entity key '{key}'"),
                reason,
            },
            CoreError::Config { message } => CliError::Validation {
                field: "configuration".into(),
                reason: message,
            },
            CoreError::AuthenticationFailed { message: _ } => CliError::AuthFailed {
                profile: "current".into(),
            },
            CoreError::ConnectionFailed { reason } | CoreError::Internal(reason) => {
                CliError::ConnectionFailed { reason }
            }
        }
    }
}
