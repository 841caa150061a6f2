//! Incremental `text/event-stream` parser.
//!
//! Bytes arrive in arbitrary chunks; the parser keeps partial lines between
//! calls and yields a [`Message::Event`] each time a blank line terminates an
//! event with at least one `data:` field.
//!
//! Supported fields: `data`, `event`, `id`. `retry` and unknown fields are
//! ignored, lines starting with `:` are comments.

// ============================================================================
// Imports
// ============================================================================

use super::{Message, StreamEvent};

// ============================================================================
// EventStreamParser
// ============================================================================

/// Stateful parser for one event stream.
#[derive(Debug, Default)]
pub struct EventStreamParser {
    /// Bytes of the current incomplete line.
    line: Vec<u8>,
    /// Data lines of the event being assembled.
    data: Vec<String>,
    /// Event type of the event being assembled.
    event: Option<String>,
    /// Last event ID, persists across events.
    last_event_id: Option<String>,
}

impl EventStreamParser {
    /// Creates a parser, optionally resuming from a known event ID.
    #[inline]
    #[must_use]
    pub fn new(last_event_id: Option<String>) -> Self {
        Self {
            last_event_id,
            ..Self::default()
        }
    }

    /// Returns the last event ID seen.
    #[inline]
    #[must_use]
    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    /// Feeds a chunk and returns the events it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Message> {
        let mut out = Vec::new();

        for &byte in chunk {
            if byte == b'\n' {
                let mut line = std::mem::take(&mut self.line);
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                let line = String::from_utf8_lossy(&line).into_owned();
                if let Some(message) = self.process_line(&line) {
                    out.push(message);
                }
            } else {
                self.line.push(byte);
            }
        }

        out
    }

    /// Applies one complete line.
    fn process_line(&mut self, line: &str) -> Option<Message> {
        if line.is_empty() {
            return self.dispatch();
        }

        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "data" => self.data.push(value.to_owned()),
            "event" => self.event = Some(value.to_owned()),
            "id" if !value.contains('\0') => self.last_event_id = Some(value.to_owned()),
            _ => {}
        }

        None
    }

    /// Emits the assembled event, if any.
    fn dispatch(&mut self) -> Option<Message> {
        let event = self.event.take();

        if self.data.is_empty() {
            return None;
        }

        let data = std::mem::take(&mut self.data).join("\n");

        Some(Message::Event(StreamEvent {
            event: event.filter(|name| !name.is_empty() && name != "message"),
            data,
            id: self.last_event_id.clone(),
        }))
    }
}

// ============================================================================
// Tests
// ============================================================================
