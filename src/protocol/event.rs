//! Transport lifecycle events.
//!
//! Every transport reports what happens on the wire as a sequence of
//! [`TransportEvent`]s. A well-behaved transport emits at most one
//! [`TransportEvent::Close`] per connection, but listeners do not rely on it.
//!
//! # Event Types
//!
//! | Event | Meaning |
//! |-------|---------|
//! | `Open` | Handshake completed |
//! | `Message` | Inbound payload |
//! | `Error` | Runtime failure, usually followed by `Close` |
//! | `Closing` | Close initiated by either side |
//! | `Close` | Connection finished |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};

use super::Message;

// ============================================================================
// Close Codes
// ============================================================================

/// Normal closure.
pub const CLOSE_NORMAL: u16 = 1000;

/// No status code was present in the close frame.
pub const CLOSE_NO_STATUS: u16 = 1005;

/// Connection dropped without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;

// ============================================================================
// CloseEvent
// ============================================================================

/// Details of a finished connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseEvent {
    /// WebSocket close code.
    pub code: u16,

    /// Close reason sent by the peer, empty if none.
    pub reason: String,

    /// `true` if the closing handshake completed.
    #[serde(rename = "wasClean")]
    pub was_clean: bool,
}

impl CloseEvent {
    /// Creates a close event.
    #[inline]
    #[must_use]
    pub fn new(code: u16, reason: impl Into<String>, was_clean: bool) -> Self {
        Self {
            code,
            reason: reason.into(),
            was_clean,
        }
    }

    /// Clean close with code 1000.
    #[inline]
    #[must_use]
    pub fn normal() -> Self {
        Self::new(CLOSE_NORMAL, "", true)
    }

    /// Unclean close with code 1006.
    #[inline]
    #[must_use]
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self::new(CLOSE_ABNORMAL, reason, false)
    }
}

// ============================================================================
// TransportError
// ============================================================================

/// Runtime failure reported by a transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportError {
    /// Human-readable description.
    pub message: String,
}

impl TransportError {
    /// Creates a transport error.
    #[inline]
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

// ============================================================================
// TransportEvent
// ============================================================================

/// Event emitted by a transport to its listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Connection established.
    Open,

    /// Inbound message.
    Message(Message),

    /// Runtime failure.
    Error(TransportError),

    /// Close initiated.
    Closing,

    /// Connection finished.
    Close(CloseEvent),
}

impl TransportEvent {
    /// Returns a short name for logging.
    #[inline]
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Message(_) => "message",
            Self::Error(_) => "error",
            Self::Closing => "closing",
            Self::Close(_) => "close",
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
