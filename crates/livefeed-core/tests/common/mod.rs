// Shared fixtures for hub tests: a scripted in-memory transport, a
// counting credential provider, and a handler recorder.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{StreamExt, stream};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use url::Url;

use livefeed_api::{ByteStream, CredentialProvider, Error, StreamRequest, Transport};
use livefeed_core::{ErrorKind, FeedConfig, FeedHub, Handlers, ReconnectConfig, StreamError};

pub const BASE_URL: &str = "http://feeds.test";

// ── ScriptedTransport ───────────────────────────────────────────────

/// What one `open_stream` call for a key does.
pub enum Script {
    /// Fail with an auth rejection carrying this status.
    Reject(u16),
    /// Fail with a 503.
    Refuse,
    /// Fail with this error.
    Fail(Error),
    /// Never answer; only cancellation ends the open. The sender is
    /// dropped when the open returns.
    Stall(oneshot::Sender<()>),
    /// Succeed, yield these chunks, then behave per the tail.
    Chunks(Vec<&'static [u8]>, Tail),
    /// Succeed and yield whatever the test sends; ends when the sender drops.
    Live(mpsc::UnboundedReceiver<Bytes>),
}

pub enum Tail {
    /// Server closes the stream.
    End,
    /// Stream stays open and silent.
    Hang,
    /// Connection drops with an error.
    Reset,
}

#[derive(Debug, Clone)]
pub struct Recorded {
    pub key: String,
    pub token: String,
    pub last_event_id: Option<String>,
}

/// Per-key queue of scripted outcomes. Once a key's queue is empty every
/// further open succeeds with a stream that never yields.
#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<HashMap<String, VecDeque<Script>>>,
    requests: Mutex<Vec<Recorded>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, key: &str, script: Script) {
        self.scripts
            .lock()
            .unwrap()
            .entry(key.to_owned())
            .or_default()
            .push_back(script);
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    pub fn opens(&self, key: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.key == key)
            .count()
    }
}

fn key_of(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.nth(1))
        .unwrap_or_default()
        .to_owned()
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn open_stream(
        &self,
        request: StreamRequest,
        cancel: &CancellationToken,
    ) -> Result<ByteStream, Error> {
        let key = key_of(&request.url);
        self.requests.lock().unwrap().push(Recorded {
            key: key.clone(),
            token: request.token.expose_secret().to_owned(),
            last_event_id: request.last_event_id.clone(),
        });

        let next = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&key)
            .and_then(VecDeque::pop_front);

        match next {
            None => Ok(Box::pin(stream::pending())),
            Some(Script::Reject(status)) => Err(Error::AuthRejected { status }),
            Some(Script::Refuse) => Err(Error::Status { status: 503 }),
            Some(Script::Fail(err)) => Err(err),
            Some(Script::Stall(held)) => {
                cancel.cancelled().await;
                drop(held);
                Err(Error::Cancelled)
            }
            Some(Script::Chunks(chunks, tail)) => {
                let head = stream::iter(
                    chunks
                        .into_iter()
                        .map(|chunk| Ok::<_, Error>(Bytes::from_static(chunk))),
                );
                let stream: ByteStream = match tail {
                    Tail::End => Box::pin(head),
                    Tail::Hang => Box::pin(head.chain(stream::pending())),
                    Tail::Reset => Box::pin(head.chain(stream::once(async {
                        Err(Error::Stream("connection reset by peer".into()))
                    }))),
                };
                Ok(stream)
            }
            Some(Script::Live(rx)) => Ok(Box::pin(stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|chunk| (Ok(chunk), rx))
            }))),
        }
    }
}

// ── CountingToken ───────────────────────────────────────────────────

#[derive(Default)]
pub struct CountingToken {
    pub reads: AtomicUsize,
    pub rejections: AtomicUsize,
}

impl CountingToken {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn rejections(&self) -> usize {
        self.rejections.load(Ordering::SeqCst)
    }
}

impl CredentialProvider for CountingToken {
    fn current_token(&self) -> Result<SecretString, Error> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(SecretString::from("test-token".to_string()))
    }

    fn rejected(&self) {
        self.rejections.fetch_add(1, Ordering::SeqCst);
    }
}

// ── Recorder ────────────────────────────────────────────────────────

/// Collects every callback invocation for later assertions.
#[derive(Clone, Default)]
pub struct Recorder {
    frames: Arc<Mutex<Vec<(String, String)>>>,
    errors: Arc<Mutex<Vec<StreamError>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handlers recording `events` plus errors.
    pub fn handlers(&self, events: &[&str]) -> Handlers {
        let mut handlers = Handlers::new();
        for event in events {
            let frames = Arc::clone(&self.frames);
            let name = (*event).to_owned();
            handlers = handlers.on(*event, move |data| {
                frames.lock().unwrap().push((name.clone(), data.to_owned()));
            });
        }
        let errors = Arc::clone(&self.errors);
        handlers.on_error(move |err| errors.lock().unwrap().push(err.clone()))
    }

    pub fn frames(&self) -> Vec<(String, String)> {
        self.frames.lock().unwrap().clone()
    }

    pub fn payloads(&self) -> Vec<String> {
        self.frames().into_iter().map(|(_, data)| data).collect()
    }

    pub fn errors(&self) -> Vec<StreamError> {
        self.errors.lock().unwrap().clone()
    }

    pub fn error_kinds(&self) -> Vec<ErrorKind> {
        self.errors().into_iter().map(|e| e.kind).collect()
    }
}

// ── Hub construction ────────────────────────────────────────────────

/// Config with jitter disabled so backoff delays are exact.
pub fn test_config() -> FeedConfig {
    let mut config = FeedConfig::new(Url::parse(BASE_URL).unwrap());
    config.reconnect = ReconnectConfig {
        jitter: 0.0,
        ..ReconnectConfig::default()
    };
    config
}

pub fn hub(transport: &Arc<ScriptedTransport>) -> FeedHub {
    hub_with(transport, CountingToken::new(), test_config())
}

pub fn hub_with(
    transport: &Arc<ScriptedTransport>,
    credentials: Arc<dyn CredentialProvider>,
    config: FeedConfig,
) -> FeedHub {
    let transport: Arc<dyn Transport> = transport.clone();
    FeedHub::new(config, credentials, transport)
}

/// Let spawned read loops run until they block.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

pub async fn advance(duration: Duration) {
    tokio::time::sleep(duration).await;
}
