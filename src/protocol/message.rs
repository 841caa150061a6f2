//! Inbound and outbound message payloads.
//!
//! Messages are opaque to the multiplexer. The JSON helpers exist for
//! consumers; nothing in the fan-out path parses payloads.

// ============================================================================
// Imports
// ============================================================================

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::Result;

// ============================================================================
// StreamEvent
// ============================================================================

/// One dispatched server-push event.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StreamEvent {
    /// Event type from the `event:` field, `None` for the default `message`.
    pub event: Option<String>,

    /// Joined `data:` lines.
    pub data: String,

    /// Last event ID seen on the stream.
    pub id: Option<String>,
}

// ============================================================================
// Message
// ============================================================================

/// A message received from or sent to a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// UTF-8 text frame.
    Text(String),

    /// Binary frame.
    Binary(Vec<u8>),

    /// Event from an event-stream transport.
    Event(StreamEvent),
}

impl Message {
    /// Creates a text message.
    #[inline]
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Creates a binary message.
    #[inline]
    #[must_use]
    pub fn binary(bytes: impl Into<Vec<u8>>) -> Self {
        Self::Binary(bytes.into())
    }

    /// Serializes `value` into a JSON text message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`](crate::Error::Json) if serialization fails.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        Ok(Self::Text(serde_json::to_string(value)?))
    }

    /// Returns the textual payload, if any.
    ///
    /// Stream events expose their `data` field.
    #[inline]
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Event(event) => Some(&event.data),
            Self::Binary(_) => None,
        }
    }

    /// Returns the raw bytes of the payload.
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(bytes) => bytes,
            Self::Event(event) => event.data.as_bytes(),
        }
    }

    /// Parses the payload as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`](crate::Error::Json) if the payload is not
    /// valid JSON for `T`.
    pub fn parse_json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(self.as_bytes())?)
    }

    /// Returns the payload size in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Returns `true` if the payload is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<Vec<u8>> for Message {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Tick {
        symbol: String,
        price: u64,
    }

    #[test]
    fn test_json_helpers() {
        let tick = Tick {
            symbol: "BTC".into(),
            price: 42,
        };
        let message = Message::json(&tick).expect("serialize");
        assert_eq!(message.as_text(), Some(r#"{"symbol":"BTC","price":42}"#));
        let parsed: Tick = message.parse_json().expect("parse");
        assert_eq!(parsed, tick);
    }

    #[test]
    fn test_parse_json_from_stream_event() {
        let message = Message::Event(StreamEvent {
            event: Some("tick".into()),
            data: r#"{"symbol":"ETH","price":7}"#.into(),
            id: None,
        });
        let parsed: Tick = message.parse_json().expect("parse");
        assert_eq!(parsed.symbol, "ETH");
    }

    #[test]
    fn test_parse_json_rejects_garbage() {
        let message = Message::text("not json");
        assert!(message.parse_json::<Tick>().is_err());
    }

    #[test]
    fn test_binary_has_no_text() {
        let message = Message::binary(vec![1, 2, 3]);
        assert_eq!(message.as_text(), None);
        assert_eq!(message.len(), 3);
    }
}
