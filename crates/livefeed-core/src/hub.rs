// ── Subscription hub ──
//
// The public entry point: connect an entity key to a set of handlers,
// disconnect it, observe its status. Owns no transport details; it wires
// the registry, credential provider and transport together and spawns one
// read loop per newly created connection.

use std::sync::Arc;

use tokio::sync::watch;

use livefeed_api::{CredentialProvider, HttpTransport, Transport};

use crate::config::FeedConfig;
use crate::connection::{ConnectionStatus, EntityConnection, ReadLoop};
use crate::error::CoreError;
use crate::handlers::Handlers;
use crate::registry::StreamRegistry;

/// Outcome of [`FeedHub::connect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connected {
    /// A new physical connection was created.
    Opened,
    /// The key was already connected; its handlers were replaced.
    Reused,
}

/// Subscription API over a [`StreamRegistry`].
///
/// Cheaply cloneable via `Arc<HubInner>`. `connect` and `disconnect` only
/// touch the registry and return immediately; all network work happens on
/// spawned tasks, so both must be called from inside a Tokio runtime.
#[derive(Clone)]
pub struct FeedHub {
    inner: Arc<HubInner>,
}

struct HubInner {
    config: FeedConfig,
    registry: StreamRegistry,
    credentials: Arc<dyn CredentialProvider>,
    transport: Arc<dyn Transport>,
}

impl FeedHub {
    /// Create a hub with a fresh registry.
    pub fn new(
        config: FeedConfig,
        credentials: Arc<dyn CredentialProvider>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self::with_registry(config, credentials, transport, StreamRegistry::new())
    }

    /// Create a hub over an existing registry.
    pub fn with_registry(
        config: FeedConfig,
        credentials: Arc<dyn CredentialProvider>,
        transport: Arc<dyn Transport>,
        registry: StreamRegistry,
    ) -> Self {
        Self {
            inner: Arc::new(HubInner {
                config,
                registry,
                credentials,
                transport,
            }),
        }
    }

    /// Create a hub that streams over HTTP using `config.transport`.
    pub fn http(
        config: FeedConfig,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self, CoreError> {
        config.validate()?;
        let transport = HttpTransport::new(&config.transport)?;
        Ok(Self::new(config, credentials, Arc::new(transport)))
    }

    pub fn config(&self) -> &FeedConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &StreamRegistry {
        &self.inner.registry
    }

    // ── Subscription lifecycle ───────────────────────────────────

    /// Subscribe `key` with `handlers`.
    ///
    /// Idempotent per key: if the key already has a live connection, its
    /// handler set is replaced and no second physical connection is opened.
    pub fn connect(&self, key: &str, handlers: Handlers) -> Result<Connected, CoreError> {
        if key.trim().is_empty() {
            return Err(CoreError::InvalidKey {
                key: key.to_owned(),
                reason: "entity key must not be empty".into(),
            });
        }

        let url = self.inner.config.stream_url(key)?;
        let handlers = Arc::new(handlers);

        let (connection, created) = self.inner.registry.connect_or_reuse(key, |generation| {
            Arc::new(EntityConnection::new(
                key,
                generation,
                url,
                Arc::clone(&handlers),
            ))
        });

        if !created {
            connection.replace_handlers(handlers);
            tracing::debug!(key, "already connected, handlers replaced");
            return Ok(Connected::Reused);
        }

        let read_loop = ReadLoop::new(
            &connection,
            self.inner.registry.downgrade(),
            Arc::clone(&self.inner.credentials),
            Arc::clone(&self.inner.transport),
            &self.inner.config,
        );
        tokio::spawn(read_loop.run());

        tracing::debug!(key, generation = connection.generation(), "subscription created");
        Ok(Connected::Opened)
    }

    /// Unsubscribe `key`. Safe to call for keys that were never connected.
    ///
    /// The transport read is cancelled; frames already buffered but not
    /// yet dispatched are discarded.
    pub fn disconnect(&self, key: &str) {
        if self.inner.registry.disconnect(key) {
            tracing::info!(key, "disconnected");
        } else {
            tracing::trace!(key, "disconnect for unknown key ignored");
        }
    }

    /// Disconnect every key.
    pub fn shutdown(&self) {
        let connections = self.inner.registry.drain();
        for connection in &connections {
            connection.close();
        }
        tracing::info!(count = connections.len(), "all subscriptions closed");
    }

    // ── Observation ──────────────────────────────────────────────

    /// Watch status transitions for `key`, if it is connected.
    pub fn status(&self, key: &str) -> Option<watch::Receiver<ConnectionStatus>> {
        self.inner
            .registry
            .get(key)
            .map(|connection| connection.subscribe_status())
    }

    /// Current status of `key`; [`ConnectionStatus::Closed`] if unknown.
    pub fn current_status(&self, key: &str) -> ConnectionStatus {
        self.inner
            .registry
            .get(key)
            .map_or(ConnectionStatus::Closed, |connection| connection.status())
    }

    pub fn is_connected(&self, key: &str) -> bool {
        self.current_status(key).is_live()
    }

    /// Subscribed keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.inner.registry.keys()
    }
}

impl std::fmt::Debug for FeedHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedHub")
            .field("base_url", &self.inner.config.base_url.as_str())
            .field("registry", &self.inner.registry)
            .finish_non_exhaustive()
    }
}
