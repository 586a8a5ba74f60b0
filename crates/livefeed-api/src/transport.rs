// Streaming transport: opens one authenticated, long-lived HTTP response
// and hands back its body as a byte stream.
//
// The connection engine only sees the `Transport` trait, so tests can drive
// it with scripted byte streams instead of a real server.

use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::Error;

const EVENT_STREAM_MIME: &str = "text/event-stream";
const LAST_EVENT_ID: &str = "Last-Event-ID";

/// Body of an open stream, yielded chunk by chunk as it arrives.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, Error>> + Send>>;

// ── Request ──────────────────────────────────────────────────────────

/// Everything needed to open one stream attempt.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub url: Url,
    /// Bearer token read from the credential provider for this attempt.
    pub token: SecretString,
    /// Id of the last frame seen on a previous attempt, replayed as `Last-Event-ID`.
    pub last_event_id: Option<String>,
}

/// Opens long-lived streaming responses.
///
/// Implementations must fail with [`Error::AuthRejected`] when the server
/// refuses the credential, and with a transient error for anything else
/// that went wrong. The returned future must finish promptly with
/// [`Error::Cancelled`] once `cancel` fires.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open_stream(
        &self,
        request: StreamRequest,
        cancel: &CancellationToken,
    ) -> Result<ByteStream, Error>;
}

// ── Configuration ────────────────────────────────────────────────────

/// TLS verification mode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsMode {
    /// Use the system certificate store.
    #[default]
    System,
    /// Use a custom CA certificate from the given PEM file.
    CustomCa(PathBuf),
    /// Accept any certificate (for self-signed development servers).
    DangerAcceptInvalid,
}

/// Settings for building the HTTP client behind [`HttpTransport`].
///
/// There is deliberately no whole-request timeout: a stream stays open for
/// hours. Only connection setup is bounded.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub tls: TlsMode,
    pub connect_timeout: Duration,
    pub tcp_keepalive: Option<Duration>,
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            tls: TlsMode::System,
            connect_timeout: Duration::from_secs(10),
            tcp_keepalive: Some(Duration::from_secs(30)),
            user_agent: concat!("livefeed/", env!("CARGO_PKG_VERSION")).into(),
        }
    }
}

impl TransportConfig {
    /// Build a `reqwest::Client` from this config.
    pub fn build_client(&self) -> Result<reqwest::Client, Error> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .tcp_keepalive(self.tcp_keepalive)
            .user_agent(self.user_agent.as_str());

        match &self.tls {
            TlsMode::System => {}
            TlsMode::CustomCa(path) => {
                let cert_pem = std::fs::read(path)
                    .map_err(|e| Error::Tls(format!("failed to read CA cert: {e}")))?;
                let cert = reqwest::Certificate::from_pem(&cert_pem)
                    .map_err(|e| Error::Tls(format!("invalid CA cert: {e}")))?;
                builder = builder.add_root_certificate(cert);
            }
            TlsMode::DangerAcceptInvalid => {
                builder = builder.danger_accept_invalid_certs(true);
            }
        }

        builder
            .build()
            .map_err(|e| Error::Tls(format!("failed to build HTTP client: {e}")))
    }
}

// ── HttpTransport ────────────────────────────────────────────────────

/// [`Transport`] over a chunked HTTP response.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: &TransportConfig) -> Result<Self, Error> {
        Ok(Self {
            http: config.build_client()?,
        })
    }

    /// Wrap an already-configured client.
    pub fn from_reqwest(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn open_stream(
        &self,
        request: StreamRequest,
        cancel: &CancellationToken,
    ) -> Result<ByteStream, Error> {
        let mut bearer = HeaderValue::from_str(&format!("Bearer {}", request.token.expose_secret()))
            .map_err(|_| Error::InvalidHeader {
                name: "Authorization",
            })?;
        bearer.set_sensitive(true);

        let mut builder = self
            .http
            .get(request.url.clone())
            .header(AUTHORIZATION, bearer)
            .header(ACCEPT, EVENT_STREAM_MIME)
            .header(CACHE_CONTROL, "no-cache");

        if let Some(ref id) = request.last_event_id {
            let value = HeaderValue::from_str(id).map_err(|_| Error::InvalidHeader {
                name: LAST_EVENT_ID,
            })?;
            builder = builder.header(LAST_EVENT_ID, value);
        }

        tracing::debug!(url = %request.url, resume = request.last_event_id.is_some(), "opening event stream");

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            result = builder.send() => result?,
        };

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(Error::AuthRejected {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(Error::Status {
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if !content_type.starts_with(EVENT_STREAM_MIME) {
            tracing::warn!(content_type, "stream response is not text/event-stream");
        }

        Ok(Box::pin(response.bytes_stream().map(|chunk| chunk.map_err(Error::from))))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_transport_config() {
        let config = TransportConfig::default();
        assert!(matches!(config.tls, TlsMode::System));
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert!(config.user_agent.starts_with("livefeed/"));
    }

    #[test]
    fn missing_ca_file_is_a_tls_error() {
        let config = TransportConfig {
            tls: TlsMode::CustomCa(PathBuf::from("/nonexistent/ca.pem")),
            ..TransportConfig::default()
        };
        let err = config.build_client().unwrap_err();
        assert!(matches!(err, Error::Tls(_)));
    }

    #[test]
    fn build_client_accepting_invalid_certs() {
        let config = TransportConfig {
            tls: TlsMode::DangerAcceptInvalid,
            ..TransportConfig::default()
        };
        assert!(config.build_client().is_ok());
    }
}
