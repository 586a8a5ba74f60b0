// livefeed-api: event-stream wire format, bearer credentials, and the
// streaming HTTP transport.

pub mod auth;
pub mod error;
pub mod frame;
pub mod transport;

pub use auth::{CredentialProvider, SharedToken, StaticToken};
pub use error::Error;
pub use frame::{DEFAULT_EVENT, DEFAULT_MAX_RECORD_BYTES, Frame, FrameParser};
pub use transport::{
    ByteStream, HttpTransport, StreamRequest, TlsMode, Transport, TransportConfig,
};
