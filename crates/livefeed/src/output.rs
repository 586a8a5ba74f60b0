//! Terminal rendering for streamed events and status changes.
//!
//! Events go to stdout (text or JSON lines), everything else to stderr so
//! the event output stays pipeable.

use std::io::{self, IsTerminal, Write};

use chrono::{DateTime, Local, SecondsFormat, Utc};
use owo_colors::{OwoColorize, Style};
use serde_json::{Value, json};

use livefeed_core::{ConnectionStatus, ErrorKind, StreamError};

use crate::cli::ColorMode;

/// Determine whether color output should be enabled.
pub fn should_color(mode: ColorMode) -> bool {
    match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => io::stdout().is_terminal() && std::env::var("NO_COLOR").is_err(),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Printer {
    color: bool,
    json: bool,
}

impl Printer {
    pub fn new(mode: ColorMode, json: bool) -> Self {
        Self {
            color: should_color(mode),
            json,
        }
    }

    pub fn event(&self, key: &str, event: &str, data: &str) {
        let line = if self.json {
            render_json(Utc::now(), key, event, data)
        } else {
            self.render_text(Local::now(), key, event, data)
        };
        // A closed stdout (e.g. `| head`) is not worth failing the stream over.
        let _ = writeln!(io::stdout().lock(), "{line}");
    }

    pub fn status(&self, key: &str, status: ConnectionStatus) {
        let style = match status {
            ConnectionStatus::Open => Style::new().green(),
            ConnectionStatus::Reconnecting { .. } => Style::new().yellow(),
            ConnectionStatus::Closed => Style::new().red(),
            ConnectionStatus::Connecting => Style::new().dimmed(),
        };
        let _ = writeln!(
            io::stderr().lock(),
            "{} {}",
            self.paint(key, Style::new().bold()),
            self.paint(&status.to_string(), style)
        );
    }

    pub fn fault(&self, error: &StreamError) {
        let style = match error.kind {
            ErrorKind::ParseWarning => Style::new().yellow(),
            ErrorKind::AuthRejected | ErrorKind::TransportError => Style::new().red(),
        };
        let _ = writeln!(
            io::stderr().lock(),
            "{} {} {}",
            self.paint(&error.key, Style::new().bold()),
            self.paint(error.kind.into(), style),
            error.message
        );
    }

    fn render_text(&self, at: DateTime<Local>, key: &str, event: &str, data: &str) -> String {
        format!(
            "{} {} {} {data}",
            self.paint(&at.format("%H:%M:%S%.3f").to_string(), Style::new().dimmed()),
            self.paint(key, Style::new().cyan()),
            self.paint(event, Style::new().magenta()),
        )
    }

    fn paint(&self, text: &str, style: Style) -> String {
        if self.color {
            text.style(style).to_string()
        } else {
            text.to_owned()
        }
    }
}

/// One JSON object per event. Payloads that are themselves JSON are
/// embedded as values rather than strings.
fn render_json(at: DateTime<Utc>, key: &str, event: &str, data: &str) -> String {
    let payload = serde_json::from_str::<Value>(data).unwrap_or_else(|_| Value::from(data));
    json!({
        "ts": at.to_rfc3339_opts(SecondsFormat::Millis, true),
        "key": key,
        "event": event,
        "data": payload,
    })
    .to_string()
}
