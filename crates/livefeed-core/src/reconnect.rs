// ── Reconnection policy ──
//
// Decides, for each terminated stream attempt, whether to reconnect and
// after how long. The policy is pure bookkeeping; the read loop owns the
// timer and re-checks the registry when it fires.

use std::time::Duration;

use rand::Rng;

/// Why a stream attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// The server closed the stream (idle timeout, deploy, ...).
    NormalEnd,
    /// Connection failed, dropped, or returned a non-success status.
    TransportError(String),
    /// The credential was refused, unavailable, or unusable.
    AuthRejected(String),
    /// The request can never succeed as configured (bad URL, TLS setup).
    Misconfigured(String),
    /// The consumer disconnected.
    Cancelled,
}

impl Termination {
    /// Classify a transport-layer error.
    pub fn from_error(err: &livefeed_api::Error) -> Self {
        use livefeed_api::Error as ApiError;

        match err {
            ApiError::Cancelled => Self::Cancelled,
            // A token that cannot be put in a header is as useless as a refused one.
            ApiError::InvalidHeader {
                name: "Authorization",
            } => Self::AuthRejected(err.to_string()),
            _ if err.is_auth_rejected() => Self::AuthRejected(err.to_string()),
            _ if err.is_transient() => Self::TransportError(err.to_string()),
            _ => Self::Misconfigured(err.to_string()),
        }
    }

    /// `true` for reasons the policy may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NormalEnd | Self::TransportError(_))
    }
}

/// Outcome of [`ReconnectPolicy::on_terminated`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    RetryAfter(Duration),
    Abandon,
}

// ── ReconnectConfig ──────────────────────────────────────────────────

/// Exponential backoff configuration for stream reconnection.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay before jitter. Default: 30s.
    pub max_delay: Duration,

    /// Growth factor per consecutive failure. Default: 2.0.
    pub multiplier: f64,

    /// Relative jitter, `0.25` means ±25%. Default: 0.25.
    pub jitter: f64,

    /// Maximum consecutive reconnection attempts before giving up.
    /// `None` means retry forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.25,
            max_retries: None,
        }
    }
}

impl ReconnectConfig {
    /// Constant delay, no growth, no jitter, unbounded retries.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
            jitter: 0.0,
            max_retries: None,
        }
    }
}

// ── ReconnectPolicy ──────────────────────────────────────────────────

/// Per-connection retry state.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempt: u32,
}

impl ReconnectPolicy {
    pub fn new(config: ReconnectConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Consecutive failed attempts since the last received frame.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Forget earlier failures. Called on every received frame.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Decide what to do about a terminated attempt.
    ///
    /// `retry_hint` is the server's `retry:` suggestion. When present it
    /// replaces the computed backoff for this one reconnection.
    pub fn on_terminated(&mut self, reason: &Termination, retry_hint: Option<Duration>) -> Decision {
        if !reason.is_retryable() {
            return Decision::Abandon;
        }

        if let Some(max) = self.config.max_retries {
            if self.attempt >= max {
                return Decision::Abandon;
            }
        }

        let delay = retry_hint.unwrap_or_else(|| self.backoff(self.attempt));
        self.attempt = self.attempt.saturating_add(1);
        Decision::RetryAfter(delay)
    }

    /// Exponential backoff with jitter.
    ///
    /// `delay = min(initial * multiplier^attempt, max) * (1 ± jitter)`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.min(64)).unwrap_or(64);
        let base = self.config.initial_delay.as_secs_f64() * self.config.multiplier.powi(exponent);
        let capped = base.min(self.config.max_delay.as_secs_f64());

        let jitter = self.config.jitter.clamp(0.0, 1.0);
        let factor = if jitter > 0.0 {
            1.0 + rand::rng().random_range(-jitter..=jitter)
        } else {
            1.0
        };

        Duration::try_from_secs_f64((capped * factor).max(0.0)).unwrap_or(self.config.max_delay)
    }
}

// ── Tests ────────────────────────────────────────────────────────────
