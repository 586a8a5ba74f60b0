//! # Frame Parser
//!
//! Incremental decoder for the text event-stream wire format.
//!
//! Bytes arrive in arbitrary chunks: a chunk may end mid-line, mid-field, or
//! in the middle of a multi-byte UTF-8 sequence, or it may carry many records
//! at once. The parser buffers raw bytes and only decodes a record once its
//! terminating blank line has been seen, so the decoded frames are identical
//! no matter how the input was split.
//!
//! Recognized fields:
//! - `event:` sets the frame's event type (default [`DEFAULT_EVENT`])
//! - `data:` appends to the payload, multiple lines joined with `\n`
//! - `id:` opaque token, remembered as [`FrameParser::last_event_id`]
//! - `retry:` server-suggested reconnect delay in milliseconds
//!
//! Lines starting with `:` are comments. Unknown fields are ignored.
//! A record that is not valid UTF-8, or that grows past the record size
//! limit, is dropped and counted as a warning; the parser itself never fails.

use bytes::{Buf, Bytes, BytesMut};

/// Event type used when a record carries no `event:` field.
pub const DEFAULT_EVENT: &str = "message";

/// Default cap on the bytes of one record, field names included.
pub const DEFAULT_MAX_RECORD_BYTES: usize = 1024 * 1024;

const INITIAL_CAPACITY: usize = 8192;

/// One decoded record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Event type, [`DEFAULT_EVENT`] if the record named none.
    pub event: String,
    /// Payload; multi-line data is joined with `\n`.
    pub data: String,
    /// Value of the record's `id:` field, if any.
    pub id: Option<String>,
    /// Value of the record's `retry:` field, if it was a valid integer.
    pub retry: Option<u64>,
}

impl Frame {
    /// Convenience constructor used mostly in tests.
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: data.into(),
            id: None,
            retry: None,
        }
    }
}

/// Stateful, incremental event-stream decoder.
///
/// One parser belongs to exactly one connection and is never shared.
#[derive(Debug)]
pub struct FrameParser {
    /// Bytes received but not yet terminated by a line break.
    buffer: BytesMut,
    /// Prefix of `buffer` already known to hold no line terminator.
    scanned: usize,
    /// The last line ended in `\r`; a leading `\n` belongs to that terminator.
    skip_lf: bool,
    /// Complete lines of the record currently being assembled.
    record: Vec<Bytes>,
    record_len: usize,
    max_record: usize,
    /// Dropping an oversized record until its terminating blank line.
    discarding: bool,
    /// The head of the next line was already thrown away.
    dropping_line: bool,
    last_event_id: Option<String>,
    retry_hint: Option<u64>,
    warnings: u32,
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameParser {
    pub fn new() -> Self {
        Self::with_max_record_size(DEFAULT_MAX_RECORD_BYTES)
    }

    /// Parser that drops any record larger than `limit` bytes.
    pub fn with_max_record_size(limit: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(INITIAL_CAPACITY.min(limit.max(1))),
            scanned: 0,
            skip_lf: false,
            record: Vec::new(),
            record_len: 0,
            max_record: limit,
            discarding: false,
            dropping_line: false,
            last_event_id: None,
            retry_hint: None,
            warnings: 0,
        }
    }

    /// Feed the next chunk and return every frame it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(line) = self.next_line() {
            if std::mem::take(&mut self.dropping_line) {
                continue;
            }
            if line.is_empty() {
                if std::mem::take(&mut self.discarding) {
                    continue;
                }
                if let Some(frame) = self.dispatch() {
                    frames.push(frame);
                }
            } else if !self.discarding {
                self.record_len += line.len();
                self.record.push(line);
                self.enforce_limit(0);
            }
        }

        self.enforce_limit(self.buffer.len());
        if self.discarding && !self.buffer.is_empty() {
            // Only an unterminated line is left, and it belongs to the
            // record being dropped.
            self.buffer.clear();
            self.scanned = 0;
            self.dropping_line = true;
        }
        frames
    }

    /// Decode whatever is left once the server has ended the stream.
    ///
    /// A final record without its trailing blank line is still delivered.
    pub fn finish(&mut self) -> Option<Frame> {
        self.skip_lf = false;
        self.scanned = 0;
        self.dropping_line = false;
        if std::mem::take(&mut self.discarding) {
            self.buffer.clear();
            return None;
        }
        if !self.buffer.is_empty() {
            let line = self.buffer.split().freeze();
            self.record_len += line.len();
            self.record.push(line);
        }
        self.dispatch()
    }

    /// Discard buffered bytes before a new physical connection.
    ///
    /// The last event id survives so it can be replayed to the server.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.scanned = 0;
        self.skip_lf = false;
        self.record.clear();
        self.record_len = 0;
        self.discarding = false;
        self.dropping_line = false;
    }

    /// Number of malformed records dropped since the last call.
    pub fn take_warnings(&mut self) -> u32 {
        std::mem::take(&mut self.warnings)
    }

    /// Most recent `retry:` value seen, cleared by this call.
    pub fn take_retry_hint(&mut self) -> Option<u64> {
        self.retry_hint.take()
    }

    /// Id of the most recent record that carried one.
    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    /// Bytes held back waiting for a line terminator.
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    /// Split the next complete line off the buffer, without its terminator.
    ///
    /// Accepts `\n`, `\r\n` and a bare `\r`. A line ending in `\r` is
    /// returned at once; a `\n` arriving right after it is swallowed later.
    /// Bytes already scanned are not searched again.
    fn next_line(&mut self) -> Option<Bytes> {
        if self.skip_lf {
            let first = self.buffer.first().copied();
            match first {
                None => return None,
                Some(b'\n') => self.buffer.advance(1),
                Some(_) => {}
            }
            self.skip_lf = false;
        }

        let unscanned = self.buffer.get(self.scanned..).unwrap_or_default();
        let Some(offset) = unscanned.iter().position(|&b| b == b'\n' || b == b'\r') else {
            self.scanned = self.buffer.len();
            return None;
        };
        let pos = self.scanned + offset;

        self.skip_lf = self.buffer.get(pos) == Some(&b'\r');
        self.scanned = 0;
        let mut line = self.buffer.split_to(pos + 1);
        line.truncate(pos);
        Some(line.freeze())
    }

    /// Start dropping the current record once it, plus `pending` bytes of
    /// an unfinished line, exceeds the size limit.
    fn enforce_limit(&mut self, pending: usize) {
        if self.discarding || self.record_len + pending <= self.max_record {
            return;
        }
        tracing::debug!(
            limit = self.max_record,
            size = self.record_len + pending,
            "dropping oversized record"
        );
        self.record.clear();
        self.record_len = 0;
        self.discarding = true;
        self.warnings += 1;
    }

    /// Decode the accumulated record, if it yields a dispatchable frame.
    fn dispatch(&mut self) -> Option<Frame> {
        self.record_len = 0;
        let lines = std::mem::take(&mut self.record);
        if lines.is_empty() {
            return None;
        }

        let mut text = Vec::with_capacity(lines.len());
        for line in &lines {
            if let Ok(s) = std::str::from_utf8(line) {
                text.push(s);
            } else {
                self.warnings += 1;
                tracing::debug!(lines = lines.len(), "dropping record with invalid UTF-8");
                return None;
            }
        }

        let mut event: Option<String> = None;
        let mut data: Option<String> = None;
        let mut id: Option<String> = None;
        let mut retry: Option<u64> = None;

        for line in text {
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };

            match field {
                "event" => {
                    let name = value.trim();
                    event = (!name.is_empty()).then(|| name.to_owned());
                }
                "data" => match data.as_mut() {
                    Some(buf) => {
                        buf.push('\n');
                        buf.push_str(value);
                    }
                    None => data = Some(value.to_owned()),
                },
                "id" => {
                    if !value.contains('\0') {
                        id = Some(value.to_owned());
                    }
                }
                "retry" => {
                    if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
                        retry = value.parse().ok();
                    }
                }
                other => {
                    tracing::trace!(field = other, "ignoring unknown field");
                }
            }
        }

        if let Some(ref id) = id {
            self.last_event_id = Some(id.clone());
        }
        if retry.is_some() {
            self.retry_hint = retry;
        }

        if event.is_none() && data.is_none() {
            return None;
        }

        Some(Frame {
            event: event.unwrap_or_else(|| DEFAULT_EVENT.to_owned()),
            data: data.unwrap_or_default(),
            id,
            retry,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
