// livefeed-core: authenticated, multiplexed, self-healing event-stream
// subscriptions, one physical connection per entity key.

pub mod config;
pub mod connection;
pub mod error;
pub mod handlers;
pub mod hub;
pub mod reconnect;
pub mod registry;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{DEFAULT_PATH_TEMPLATE, FeedConfig, KEY_PLACEHOLDER};
pub use connection::{ConnectionStatus, EntityConnection};
pub use error::{CoreError, ErrorKind, StreamError};
pub use handlers::{ErrorCallback, EventCallback, Handlers};
pub use hub::{Connected, FeedHub};
pub use reconnect::{Decision, ReconnectConfig, ReconnectPolicy, Termination};
pub use registry::StreamRegistry;

// Wire-level types consumers commonly need alongside the hub.
pub use livefeed_api::{
    CredentialProvider, DEFAULT_EVENT, Frame, HttpTransport, SharedToken, StaticToken, TlsMode,
    Transport, TransportConfig,
};
