// ── Runtime feed configuration ──
//
// Describes *where* entity streams live and how to keep them alive.
// Carries no credentials and never touches disk; `livefeed-config`
// builds one from a profile and hands it in.

use std::time::Duration;

use livefeed_api::{DEFAULT_MAX_RECORD_BYTES, TransportConfig};
use url::Url;

use crate::error::CoreError;
use crate::reconnect::ReconnectConfig;

/// Placeholder substituted with the entity key in [`FeedConfig::path_template`].
pub const KEY_PLACEHOLDER: &str = "{key}";

/// Default stream path, relative to the base URL.
pub const DEFAULT_PATH_TEMPLATE: &str = "/machines/{key}/events";

/// Configuration shared by every connection of a hub.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Server base URL (e.g., `https://telemetry.example.com/api`).
    pub base_url: Url,
    /// Path appended to the base URL; must contain [`KEY_PLACEHOLDER`].
    pub path_template: String,
    /// HTTP client settings.
    pub transport: TransportConfig,
    /// Backoff between reconnection attempts.
    pub reconnect: ReconnectConfig,
    /// Treat a stream with no bytes for this long as dead. `None` = never.
    pub idle_timeout: Option<Duration>,
    /// Records larger than this are dropped and reported as parse warnings.
    pub max_record_bytes: usize,
}

impl FeedConfig {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            path_template: DEFAULT_PATH_TEMPLATE.into(),
            transport: TransportConfig::default(),
            reconnect: ReconnectConfig::default(),
            idle_timeout: None,
            max_record_bytes: DEFAULT_MAX_RECORD_BYTES,
        }
    }

    /// Check invariants that would otherwise only fail at connect time.
    pub fn validate(&self) -> Result<(), CoreError> {
        if !self.path_template.contains(KEY_PLACEHOLDER) {
            return Err(CoreError::Config {
                message: format!("path template {:?} has no {KEY_PLACEHOLDER}", self.path_template),
            });
        }
        if self.base_url.cannot_be_a_base() {
            return Err(CoreError::Config {
                message: format!("{} cannot be used as a base URL", self.base_url),
            });
        }
        if self.max_record_bytes == 0 {
            return Err(CoreError::Config {
                message: "max record size must be positive".into(),
            });
        }
        if self.reconnect.multiplier < 1.0 || !self.reconnect.multiplier.is_finite() {
            return Err(CoreError::Config {
                message: "reconnect multiplier must be a finite number >= 1".into(),
            });
        }
        Ok(())
    }

    /// Stream URL for one entity.
    ///
    /// The key is inserted as a single percent-encoded path segment, so keys
    /// containing `/`, `?` or spaces cannot escape their segment. Query
    /// parameters on the base URL are kept.
    pub fn stream_url(&self, key: &str) -> Result<Url, CoreError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|()| CoreError::Config {
                message: format!("{} cannot be used as a base URL", self.base_url),
            })?;
            segments.pop_if_empty();
            for part in self.path_template.split('/').filter(|s| !s.is_empty()) {
                segments.push(&part.replace(KEY_PLACEHOLDER, key));
            }
        }
        Ok(url)
    }
}
