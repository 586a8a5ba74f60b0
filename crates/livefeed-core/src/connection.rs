// ── Entity connection ──
//
// One physical stream for one entity key. The `EntityConnection` value is
// the registry's record of the stream; the `ReadLoop` task does the network
// work and holds only a weak reference back to it, so dropping the record
// (disconnect, hub dropped) is enough to stop the loop.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use arc_swap::{ArcSwap, ArcSwapOption};
use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use url::Url;

use livefeed_api::{ByteStream, CredentialProvider, Frame, FrameParser, StreamRequest, Transport};

use crate::config::FeedConfig;
use crate::error::{ErrorKind, StreamError};
use crate::handlers::Handlers;
use crate::reconnect::{Decision, ReconnectConfig, ReconnectPolicy, Termination};
use crate::registry::WeakRegistry;

// ── ConnectionStatus ─────────────────────────────────────────────────

/// Lifecycle state of an entity connection, observable by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Opening the stream (first attempt or after a backoff).
    Connecting,
    /// The server accepted the request; frames are flowing.
    Open,
    /// Waiting out a backoff delay before the next attempt.
    Reconnecting { attempt: u32, delay: Duration },
    /// Disconnected, abandoned, or rejected. Terminal.
    Closed,
}

impl ConnectionStatus {
    /// `true` for every state except [`Closed`](Self::Closed).
    pub fn is_live(self) -> bool {
        !matches!(self, Self::Closed)
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => f.write_str("connecting"),
            Self::Open => f.write_str("open"),
            Self::Reconnecting { attempt, delay } => {
                write!(f, "reconnecting (attempt {attempt}, in {}ms)", delay.as_millis())
            }
            Self::Closed => f.write_str("closed"),
        }
    }
}

// ── EntityConnection ─────────────────────────────────────────────────

/// Registry record for one entity's stream.
pub struct EntityConnection {
    key: String,
    generation: u64,
    url: Url,
    handlers: ArcSwap<Handlers>,
    status: watch::Sender<ConnectionStatus>,
    cancel: CancellationToken,
    attempt: AtomicU32,
    last_error: ArcSwapOption<StreamError>,
}

impl EntityConnection {
    pub(crate) fn new(key: &str, generation: u64, url: Url, handlers: Arc<Handlers>) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Connecting);
        Self {
            key: key.to_owned(),
            generation,
            url,
            handlers: ArcSwap::new(handlers),
            status,
            cancel: CancellationToken::new(),
            attempt: AtomicU32::new(0),
            last_error: ArcSwapOption::empty(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Monotonic id distinguishing successive connections for the same key.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// Watch status transitions.
    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    /// Consecutive failed attempts since the last received frame.
    pub fn reconnect_attempt(&self) -> u32 {
        self.attempt.load(Ordering::Relaxed)
    }

    /// Most recent fault reported on this connection.
    pub fn last_error(&self) -> Option<Arc<StreamError>> {
        self.last_error.load_full()
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Swap the dispatch table. Takes effect from the next frame.
    pub(crate) fn replace_handlers(&self, handlers: Arc<Handlers>) {
        self.handlers.store(handlers);
    }

    /// Cancel the transport and mark the connection closed.
    pub(crate) fn close(&self) {
        self.cancel.cancel();
        self.status.send_replace(ConnectionStatus::Closed);
    }

    pub(crate) fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Publish a non-terminal status. Never overrides `Closed`.
    fn set_status(&self, next: ConnectionStatus) {
        self.status.send_if_modified(|current| {
            if *current == ConnectionStatus::Closed || *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    /// Remember `message` as the latest fault and return it for delivery.
    fn record_error(&self, kind: ErrorKind, message: String) -> StreamError {
        let error = StreamError {
            key: self.key.clone(),
            kind,
            message,
        };
        self.last_error.store(Some(Arc::new(error.clone())));
        error
    }
}

impl Drop for EntityConnection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for EntityConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityConnection")
            .field("key", &self.key)
            .field("generation", &self.generation)
            .field("status", &self.status())
            .field("attempt", &self.reconnect_attempt())
            .finish_non_exhaustive()
    }
}

// ── Dispatcher ───────────────────────────────────────────────────────

/// Bounded so a slow consumer throttles its own stream instead of
/// buffering it without limit.
const DELIVERY_QUEUE: usize = 256;

/// What the read loop hands to the consumer, in arrival order.
enum Delivery {
    Frame(Frame),
    Fault(StreamError),
}

/// Runs one key's callbacks in order on the blocking pool, so a slow
/// handler stalls only its own key and never a runtime worker.
struct Dispatcher {
    key: String,
    connection: Weak<EntityConnection>,
    cancel: CancellationToken,
    inbox: mpsc::Receiver<Delivery>,
}

impl Dispatcher {
    async fn run(mut self) {
        loop {
            // Checked before every delivery: nothing runs after a disconnect.
            let delivery = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                next = self.inbox.recv() => match next {
                    Some(delivery) => delivery,
                    None => break,
                },
            };

            let Some(handlers) = self.connection.upgrade().map(|conn| conn.handlers.load_full())
            else {
                break;
            };
            if let Delivery::Frame(ref frame) = delivery {
                if !handlers.handles(&frame.event) {
                    tracing::trace!(key = %self.key, event = %frame.event, "no handler, discarding frame");
                    continue;
                }
            }

            let key = self.key.clone();
            let invoked = tokio::task::spawn_blocking(move || match delivery {
                Delivery::Frame(frame) => {
                    handlers.dispatch(&key, &frame);
                }
                Delivery::Fault(error) => handlers.report(&error),
            })
            .await;
            if let Err(e) = invoked {
                tracing::error!(key = %self.key, error = %e, "handler task failed");
            }
        }
        tracing::trace!(key = %self.key, "dispatcher exiting");
    }
}

// ── ReadLoop ─────────────────────────────────────────────────────────

/// Background task driving one entity connection:
/// connect → read → on termination, backoff → reconnect.
pub(crate) struct ReadLoop {
    key: String,
    generation: u64,
    url: Url,
    connection: Weak<EntityConnection>,
    registry: WeakRegistry,
    cancel: CancellationToken,
    credentials: Arc<dyn CredentialProvider>,
    transport: Arc<dyn Transport>,
    reconnect: ReconnectConfig,
    idle_timeout: Option<Duration>,
    max_record_bytes: usize,
}

impl ReadLoop {
    pub(crate) fn new(
        connection: &Arc<EntityConnection>,
        registry: WeakRegistry,
        credentials: Arc<dyn CredentialProvider>,
        transport: Arc<dyn Transport>,
        config: &FeedConfig,
    ) -> Self {
        Self {
            key: connection.key().to_owned(),
            generation: connection.generation(),
            url: connection.url().clone(),
            connection: Arc::downgrade(connection),
            registry,
            cancel: connection.cancel_token(),
            credentials,
            transport,
            reconnect: config.reconnect.clone(),
            idle_timeout: config.idle_timeout,
            max_record_bytes: config.max_record_bytes,
        }
    }

    pub(crate) async fn run(self) {
        let (outlet, inbox) = mpsc::channel(DELIVERY_QUEUE);
        let dispatcher = tokio::spawn(
            Dispatcher {
                key: self.key.clone(),
                connection: self.connection.clone(),
                cancel: self.cancel.clone(),
                inbox,
            }
            .run(),
        );

        let terminal = self.drive(&outlet).await;

        // A terminal fault reaches `on_error` before the status flips to
        // `Closed`, so watchers of the status see the cause first.
        if let Some(ref error) = terminal {
            let _ = outlet.send(Delivery::Fault(error.clone())).await;
        }
        drop(outlet);
        if let Err(e) = dispatcher.await {
            tracing::error!(key = %self.key, error = %e, "dispatcher task failed");
        }

        if terminal.is_some() {
            if let Some(conn) = self.connection.upgrade() {
                conn.close();
            }
            if let Some(registry) = self.registry.upgrade() {
                registry.remove_if_current(&self.key, self.generation);
            }
        }

        tracing::debug!(key = %self.key, generation = self.generation, "read loop exiting");
    }

    /// Attempt, back off, and reconnect until cancelled or abandoned.
    ///
    /// Returns the fault that ended the connection, or `None` if it was
    /// cancelled or superseded.
    async fn drive(&self, outlet: &mpsc::Sender<Delivery>) -> Option<StreamError> {
        let mut parser = FrameParser::with_max_record_size(self.max_record_bytes);
        let mut policy = ReconnectPolicy::new(self.reconnect.clone());

        loop {
            let termination = self.attempt(&mut parser, &mut policy, outlet).await;
            let retry_hint = parser.take_retry_hint().map(Duration::from_millis);
            parser.reset();

            match &termination {
                Termination::Cancelled => {
                    tracing::debug!(key = %self.key, "stream cancelled");
                    return None;
                }
                Termination::AuthRejected(message) => {
                    tracing::warn!(key = %self.key, error = %message, "credential rejected, not retrying");
                    self.credentials.rejected();
                    return self.terminal(ErrorKind::AuthRejected, message.clone());
                }
                Termination::Misconfigured(message) => {
                    tracing::error!(key = %self.key, error = %message, "stream cannot be opened, not retrying");
                    return self.terminal(ErrorKind::TransportError, message.clone());
                }
                Termination::NormalEnd => {
                    tracing::info!(key = %self.key, "stream ended by server");
                }
                Termination::TransportError(message) => {
                    tracing::warn!(key = %self.key, error = %message, attempt = policy.attempt(), "stream error");
                }
            }

            let delay = match policy.on_terminated(&termination, retry_hint) {
                Decision::RetryAfter(delay) => delay,
                Decision::Abandon => {
                    let message = format!(
                        "giving up after {} reconnection attempts: {}",
                        policy.attempt(),
                        describe(&termination)
                    );
                    tracing::error!(key = %self.key, "{message}");
                    return self.terminal(ErrorKind::TransportError, message);
                }
            };

            let attempt = policy.attempt();
            if let Termination::TransportError(ref message) = termination {
                if !self.fault(outlet, ErrorKind::TransportError, message.clone()).await {
                    return None;
                }
            }
            {
                let conn = self.connection.upgrade()?;
                conn.attempt.store(attempt, Ordering::Relaxed);
                conn.set_status(ConnectionStatus::Reconnecting { attempt, delay });
            }

            tracing::debug!(
                key = %self.key,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                attempt,
                "waiting before reconnect"
            );

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return None,
                () = tokio::time::sleep(delay) => {}
            }

            // A disconnect (or a newer connection for the key) may have
            // landed while we slept.
            let still_current = self
                .registry
                .upgrade()
                .is_some_and(|registry| registry.is_current(&self.key, self.generation));
            if !still_current {
                tracing::debug!(key = %self.key, "connection superseded, dropping scheduled reconnect");
                return None;
            }
        }
    }

    /// One physical connection: open, then read until it ends.
    async fn attempt(
        &self,
        parser: &mut FrameParser,
        policy: &mut ReconnectPolicy,
        outlet: &mpsc::Sender<Delivery>,
    ) -> Termination {
        match self.connection.upgrade() {
            Some(conn) => conn.set_status(ConnectionStatus::Connecting),
            None => return Termination::Cancelled,
        }

        // Re-read on every attempt: the token may have rotated.
        let token = match self.credentials.current_token() {
            Ok(token) => token,
            Err(e) => return Termination::AuthRejected(e.to_string()),
        };

        let request = StreamRequest {
            url: self.url.clone(),
            token,
            last_event_id: parser.last_event_id().map(String::from),
        };

        tracing::info!(key = %self.key, url = %self.url, "connecting to event stream");

        let mut stream = match self.transport.open_stream(request, &self.cancel).await {
            Ok(stream) => stream,
            Err(e) => return Termination::from_error(&e),
        };

        match self.connection.upgrade() {
            Some(conn) if !self.cancel.is_cancelled() => conn.set_status(ConnectionStatus::Open),
            _ => return Termination::Cancelled,
        }
        tracing::info!(key = %self.key, "event stream open");

        loop {
            let next = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Termination::Cancelled,
                next = next_chunk(&mut stream, self.idle_timeout) => next,
            };

            match next {
                Ok(Some(chunk)) => {
                    let frames = parser.feed(&chunk);
                    if !self.deliver(frames, parser, policy, outlet).await {
                        return Termination::Cancelled;
                    }
                }
                Ok(None) => {
                    let tail: Vec<Frame> = parser.finish().into_iter().collect();
                    if !self.deliver(tail, parser, policy, outlet).await {
                        return Termination::Cancelled;
                    }
                    return Termination::NormalEnd;
                }
                Err(e) => return Termination::from_error(&e),
            }
        }
    }

    /// Queue decoded frames for the consumer, in order.
    ///
    /// Returns `false` once the connection has been cancelled or dropped;
    /// frames still queued at that point are discarded.
    async fn deliver(
        &self,
        frames: Vec<Frame>,
        parser: &mut FrameParser,
        policy: &mut ReconnectPolicy,
        outlet: &mpsc::Sender<Delivery>,
    ) -> bool {
        if !frames.is_empty() && policy.attempt() > 0 {
            policy.reset();
            match self.connection.upgrade() {
                Some(conn) => conn.attempt.store(0, Ordering::Relaxed),
                None => return false,
            }
        }

        for frame in frames {
            tracing::trace!(key = %self.key, event = %frame.event, bytes = frame.data.len(), "frame");
            if !self.emit(outlet, Delivery::Frame(frame)).await {
                return false;
            }
        }

        let warnings = parser.take_warnings();
        if warnings > 0 {
            tracing::warn!(key = %self.key, warnings, "dropped malformed records");
            let message = format!("dropped {warnings} malformed record(s)");
            if !self.fault(outlet, ErrorKind::ParseWarning, message).await {
                return false;
            }
        }

        !self.cancel.is_cancelled()
    }

    /// Record and queue a non-terminal fault.
    async fn fault(&self, outlet: &mpsc::Sender<Delivery>, kind: ErrorKind, message: String) -> bool {
        let Some(conn) = self.connection.upgrade() else {
            return false;
        };
        let error = conn.record_error(kind, message);
        drop(conn);
        self.emit(outlet, Delivery::Fault(error)).await
    }

    /// Record the fault that ends this connection; `run` delivers it.
    fn terminal(&self, kind: ErrorKind, message: String) -> Option<StreamError> {
        let conn = self.connection.upgrade()?;
        Some(conn.record_error(kind, message))
    }

    /// Queue one delivery, waiting for room unless cancelled first.
    async fn emit(&self, outlet: &mpsc::Sender<Delivery>, delivery: Delivery) -> bool {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => false,
            sent = outlet.send(delivery) => sent.is_ok(),
        }
    }
}

async fn next_chunk(
    stream: &mut ByteStream,
    idle_timeout: Option<Duration>,
) -> Result<Option<Bytes>, livefeed_api::Error> {
    let next = match idle_timeout {
        Some(limit) => tokio::time::timeout(limit, stream.next())
            .await
            .map_err(|_| livefeed_api::Error::Idle {
                idle_secs: limit.as_secs(),
            })?,
        None => stream.next().await,
    };
    next.transpose()
}

fn describe(termination: &Termination) -> &str {
    match termination {
        Termination::NormalEnd => "stream ended",
        Termination::TransportError(message)
        | Termination::AuthRejected(message)
        | Termination::Misconfigured(message) => message,
        Termination::Cancelled => "cancelled",
    }
}
