//! Profile configuration for livefeed.
//!
//! TOML profiles, token resolution (env + keyring + plaintext), and
//! translation to `livefeed_core::FeedConfig`. The CLI layers its flag
//! overrides on top of what this crate resolves.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use livefeed_core::{FeedConfig, ReconnectConfig, TlsMode};

/// Environment variable consulted for the token when a profile names none.
pub const TOKEN_ENV: &str = "LIVEFEED_TOKEN";

/// Keyring service under which per-profile tokens are stored.
pub const KEYRING_SERVICE: &str = "livefeed";

const ENV_PREFIX: &str = "LIVEFEED_";
const REDACTED: &str = "********";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("profile '{profile}' not found")]
    UnknownProfile { profile: String },

    #[error("no token configured for profile '{profile}'")]
    NoCredentials { profile: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Profile used when none is named on the command line.
    pub default_profile: Option<String>,

    #[serde(default)]
    pub defaults: Defaults,

    /// Named server profiles.
    #[serde(default)]
    pub profiles: BTreeMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Name of the profile to use: `explicit`, else `default_profile`, else `"default"`.
    pub fn active_profile_name(&self, explicit: Option<&str>) -> String {
        explicit
            .map(str::to_owned)
            .or_else(|| self.default_profile.clone())
            .unwrap_or_else(|| "default".into())
    }

    pub fn profile(&self, name: &str) -> Result<&Profile, ConfigError> {
        self.profiles
            .get(name)
            .ok_or_else(|| ConfigError::UnknownProfile {
                profile: name.into(),
            })
    }

    /// Copy with plaintext tokens masked, for display.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        for profile in copy.profiles.values_mut() {
            if profile.token.is_some() {
                profile.token = Some(REDACTED.into());
            }
        }
        copy
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Settings applied to every profile unless the profile overrides them.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Defaults {
    /// Connect timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    #[serde(default)]
    pub insecure: bool,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            insecure: false,
        }
    }
}

fn default_timeout() -> u64 {
    10
}

/// A named server profile.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Profile {
    /// Server base URL (e.g., "https://telemetry.example.com").
    pub server: String,

    /// Stream path relative to `server`; must contain `{key}`.
    pub path_template: Option<String>,

    /// Bearer token (plaintext; prefer keyring or env var).
    pub token: Option<String>,

    /// Environment variable name containing the token.
    pub token_env: Option<String>,

    /// Look the token up in the system keyring.
    #[serde(default)]
    pub keyring: bool,

    /// Path to a PEM CA certificate to trust.
    pub ca_cert: Option<PathBuf>,

    /// Override `defaults.insecure`.
    pub insecure: Option<bool>,

    /// Override `defaults.timeout`, in seconds.
    pub connect_timeout: Option<u64>,

    /// Drop and reconnect a stream silent for this many seconds.
    pub idle_timeout: Option<u64>,

    #[serde(default)]
    pub reconnect: ReconnectSection,
}

/// `[profiles.<name>.reconnect]`; unset fields keep the built-in defaults.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ReconnectSection {
    pub initial_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub multiplier: Option<f64>,
    pub jitter: Option<f64>,
    pub max_retries: Option<u32>,
}

impl ReconnectSection {
    pub fn to_reconnect_config(&self) -> Result<ReconnectConfig, ConfigError> {
        let base = ReconnectConfig::default();
        let config = ReconnectConfig {
            initial_delay: self
                .initial_delay_ms
                .map_or(base.initial_delay, Duration::from_millis),
            max_delay: self.max_delay_ms.map_or(base.max_delay, Duration::from_millis),
            multiplier: self.multiplier.unwrap_or(base.multiplier),
            jitter: self.jitter.unwrap_or(base.jitter),
            max_retries: self.max_retries.or(base.max_retries),
        };

        if config.max_delay < config.initial_delay {
            return Err(ConfigError::Validation {
                field: "reconnect.max_delay_ms".into(),
                reason: "must not be smaller than initial_delay_ms".into(),
            });
        }
        if !(0.0..=1.0).contains(&config.jitter) {
            return Err(ConfigError::Validation {
                field: "reconnect.jitter".into(),
                reason: format!("expected a fraction between 0 and 1, got {}", config.jitter),
            });
        }
        Ok(config)
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("rs", "livefeed", "livefeed").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("livefeed");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical path + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load the full Config from `path` + environment.
///
/// A missing file is not an error. Environment variables use `__` as the
/// nesting separator, e.g. `LIVEFEED_PROFILES__PLANT__SERVER`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

// ── Token resolution ────────────────────────────────────────────────

/// Resolve the bearer token for a profile from the process environment,
/// the keyring, and the config file, in that order.
pub fn resolve_token(profile: &Profile, profile_name: &str) -> Result<SecretString, ConfigError> {
    resolve_token_with(profile, profile_name, |name| std::env::var(name).ok())
}

/// [`resolve_token`] with an injectable environment lookup.
pub fn resolve_token_with(
    profile: &Profile,
    profile_name: &str,
    env: impl Fn(&str) -> Option<String>,
) -> Result<SecretString, ConfigError> {
    // 1. Profile's token_env → env var lookup
    if let Some(value) = profile.token_env.as_deref().and_then(&env) {
        return Ok(SecretString::from(value));
    }

    // 2. Global token variable
    if let Some(value) = env(TOKEN_ENV) {
        return Ok(SecretString::from(value));
    }

    // 3. System keyring, when enabled for the profile
    if profile.keyring {
        let entry = keyring::Entry::new(KEYRING_SERVICE, profile_name)?;
        match entry.get_password() {
            Ok(secret) => return Ok(SecretString::from(secret)),
            Err(keyring::Error::NoEntry) => {}
            Err(e) => return Err(e.into()),
        }
    }

    // 4. Plaintext in config
    if let Some(ref token) = profile.token {
        return Ok(SecretString::from(token.clone()));
    }

    Err(ConfigError::NoCredentials {
        profile: profile_name.into(),
    })
}

// ── Profile → FeedConfig ────────────────────────────────────────────

/// Build a `FeedConfig` from a profile. No credentials involved.
pub fn profile_to_feed_config(
    profile: &Profile,
    defaults: &Defaults,
) -> Result<FeedConfig, ConfigError> {
    let base_url: url::Url = profile
        .server
        .parse()
        .map_err(|e| ConfigError::Validation {
            field: "server".into(),
            reason: format!("invalid URL '{}': {e}", profile.server),
        })?;

    let mut feed = FeedConfig::new(base_url);
    if let Some(ref template) = profile.path_template {
        feed.path_template.clone_from(template);
    }

    feed.transport.tls = if profile.insecure.unwrap_or(defaults.insecure) {
        TlsMode::DangerAcceptInvalid
    } else if let Some(ref ca_path) = profile.ca_cert {
        TlsMode::CustomCa(ca_path.clone())
    } else {
        TlsMode::System
    };
    feed.transport.connect_timeout =
        Duration::from_secs(profile.connect_timeout.unwrap_or(defaults.timeout));
    feed.idle_timeout = profile.idle_timeout.map(Duration::from_secs);
    feed.reconnect = profile.reconnect.to_reconnect_config()?;

    feed.validate().map_err(|e| ConfigError::Validation {
        field: "profile".into(),
        reason: e.to_string(),
    })?;
    Ok(feed)
}

/// Resolve a named profile (or the default one) into a feed config and token.
pub fn resolve_profile(
    config: &Config,
    profile_name: Option<&str>,
) -> Result<(FeedConfig, SecretString), ConfigError> {
    let name = config.active_profile_name(profile_name);
    let profile = config.profile(&name)?;
    let feed = profile_to_feed_config(profile, &config.defaults)?;
    let token = resolve_token(profile, &name)?;
    Ok((feed, token))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use secrecy::ExposeSecret;

    use super::*;

    const SAMPLE: &str = r#"
default_profile = "plant"

[defaults]
timeout = 7

[profiles.plant]
server = "https://telemetry.example.com/api"
token = "plain-token"
idle_timeout = 45

[profiles.plant.reconnect]
initial_delay_ms = 500
max_retries = 12

[profiles.lab]
server = "http://10.0.0.5:8080"
path_template = "/v2/devices/{key}/stream"
token_env = "LAB_TOKEN"
insecure = true
"#;

    fn load(contents: &str) -> Config {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, contents).unwrap();
        load_config_from(&path).unwrap()
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.default_profile.as_deref(), Some("default"));
        assert_eq!(config.defaults.timeout, 10);
        assert!(config.profiles.is_empty());
    }

    #[test]
    fn parses_profiles_and_defaults() {
        let config = load(SAMPLE);
        assert_eq!(config.active_profile_name(None), "plant");
        assert_eq!(config.active_profile_name(Some("lab")), "lab");
        assert_eq!(config.defaults.timeout, 7);

        let plant = config.profile("plant").unwrap();
        assert_eq!(plant.reconnect.initial_delay_ms, Some(500));
        assert!(!plant.keyring);
    }

    #[test]
    fn unknown_profile_is_an_error() {
        let config = load(SAMPLE);
        let err = config.profile("nope").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownProfile { .. }));
    }

    #[test]
    fn profile_translates_to_feed_config() {
        let config = load(SAMPLE);
        let feed = profile_to_feed_config(config.profile("plant").unwrap(), &config.defaults).unwrap();

        assert_eq!(feed.base_url.as_str(), "https://telemetry.example.com/api");
        assert_eq!(feed.transport.connect_timeout, Duration::from_secs(7));
        assert_eq!(feed.transport.tls, TlsMode::System);
        assert_eq!(feed.idle_timeout, Some(Duration::from_secs(45)));
        assert_eq!(feed.reconnect.initial_delay, Duration::from_millis(500));
        assert_eq!(feed.reconnect.max_delay, Duration::from_secs(30));
        assert_eq!(feed.reconnect.max_retries, Some(12));
        assert_eq!(
            feed.stream_url("m-7").unwrap().as_str(),
            "https://telemetry.example.com/api/machines/m-7/events"
        );
    }

    #[test]
    fn insecure_profile_with_custom_template() {
        let config = load(SAMPLE);
        let feed = profile_to_feed_config(config.profile("lab").unwrap(), &config.defaults).unwrap();

        assert_eq!(feed.transport.tls, TlsMode::DangerAcceptInvalid);
        assert_eq!(
            feed.stream_url("d1").unwrap().as_str(),
            "http://10.0.0.5:8080/v2/devices/d1/stream"
        );
    }

    #[test]
    fn template_without_placeholder_is_rejected() {
        let profile = Profile {
            server: "https://example.com".into(),
            path_template: Some("/events".into()),
            ..Profile::default()
        };
        let err = profile_to_feed_config(&profile, &Defaults::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { .. }));
    }

    #[test]
    fn bad_server_url_is_rejected() {
        let profile = Profile {
            server: "not a url".into(),
            ..Profile::default()
        };
        let err = profile_to_feed_config(&profile, &Defaults::default()).unwrap_err();
        assert!(err.to_string().contains("server"));
    }

    #[test]
    fn inverted_delays_are_rejected() {
        let section = ReconnectSection {
            initial_delay_ms: Some(5_000),
            max_delay_ms: Some(1_000),
            ..ReconnectSection::default()
        };
        assert!(section.to_reconnect_config().is_err());
    }

    #[test]
    fn token_env_wins_over_global_and_plaintext() {
        let profile = Profile {
            token: Some("plain".into()),
            token_env: Some("LAB_TOKEN".into()),
            ..Profile::default()
        };
        let env = |name: &str| match name {
            "LAB_TOKEN" => Some("from-profile-env".to_string()),
            TOKEN_ENV => Some("from-global-env".to_string()),
            _ => None,
        };
        let token = resolve_token_with(&profile, "lab", env).unwrap();
        assert_eq!(token.expose_secret(), "from-profile-env");
    }

    #[test]
    fn global_env_used_when_profile_env_unset() {
        let profile = Profile {
            token: Some("plain".into()),
            token_env: Some("UNSET_VAR".into()),
            ..Profile::default()
        };
        let env = |name: &str| (name == TOKEN_ENV).then(|| "from-global-env".to_string());
        let token = resolve_token_with(&profile, "lab", env).unwrap();
        assert_eq!(token.expose_secret(), "from-global-env");
    }

    #[test]
    fn plaintext_is_the_last_resort() {
        let profile = Profile {
            token: Some("plain".into()),
            ..Profile::default()
        };
        let token = resolve_token_with(&profile, "plant", no_env).unwrap();
        assert_eq!(token.expose_secret(), "plain");
    }

    #[test]
    fn no_token_anywhere_is_an_error() {
        let err = resolve_token_with(&Profile::default(), "empty", no_env).unwrap_err();
        assert!(matches!(err, ConfigError::NoCredentials { ref profile } if profile == "empty"));
    }

    #[test]
    fn redacted_masks_plaintext_tokens() {
        let config = load(SAMPLE);
        let shown = config.redacted().to_toml().unwrap();
        assert!(!shown.contains("plain-token"));
        assert!(shown.contains(REDACTED));
        assert!(shown.contains("LAB_TOKEN"));
    }
}
