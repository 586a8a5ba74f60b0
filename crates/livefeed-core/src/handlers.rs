// ── Consumer callbacks ──
//
// One `Handlers` set per entity connection: a table of per-event-type
// callbacks plus an optional error callback. Event types the table does
// not name are discarded, so servers can add new ones freely.

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use livefeed_api::{DEFAULT_EVENT, Frame};

use crate::error::StreamError;

/// Callback receiving a frame's payload.
pub type EventCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Callback receiving stream faults.
pub type ErrorCallback = Arc<dyn Fn(&StreamError) + Send + Sync>;

/// Dispatch table for one subscription.
#[derive(Clone, Default)]
pub struct Handlers {
    events: HashMap<String, EventCallback>,
    on_error: Option<ErrorCallback>,
}

impl Handlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for frames whose event type is `event`.
    /// A later registration for the same type replaces the earlier one.
    pub fn on<F>(mut self, event: impl Into<String>, callback: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.events.insert(event.into(), Arc::new(callback));
        self
    }

    /// Register `callback` for frames with no explicit event type.
    pub fn on_message<F>(self, callback: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on(DEFAULT_EVENT, callback)
    }

    /// Register the fault callback.
    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&StreamError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(callback));
        self
    }

    /// `true` if a callback is registered for `event`.
    pub fn handles(&self, event: &str) -> bool {
        self.events.contains_key(event)
    }

    /// Registered event types, sorted.
    pub fn event_types(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.events.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Invoke the callback registered for `frame.event`.
    ///
    /// Returns `false` if no callback matched. A panicking callback is
    /// contained here so it cannot take the read loop down with it.
    pub(crate) fn dispatch(&self, key: &str, frame: &Frame) -> bool {
        let Some(callback) = self.events.get(&frame.event) else {
            tracing::trace!(key, event = %frame.event, "no handler, discarding frame");
            return false;
        };

        if catch_unwind(AssertUnwindSafe(|| callback(&frame.data))).is_err() {
            tracing::error!(key, event = %frame.event, "event handler panicked");
        }
        true
    }

    /// Invoke the error callback, if any.
    pub(crate) fn report(&self, error: &StreamError) {
        if let Some(ref callback) = self.on_error {
            if catch_unwind(AssertUnwindSafe(|| callback(error))).is_err() {
                tracing::error!(key = %error.key, "error handler panicked");
            }
        }
    }
}

impl fmt::Debug for Handlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handlers")
            .field("events", &self.event_types())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}
