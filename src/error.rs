//! Error types for the shared connection multiplexer.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use shared_socket::{Error, Result};
//!
//! fn example(mux: &Multiplexer, options: &OptionsRef) -> Result<()> {
//!     let attachment = mux.attach("wss://feed.example/ws", options, Subscriber::new())?;
//!     attachment.send_text("hello")?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`], [`Error::InvalidHeader`] |
//! | Attach | [`Error::UnsupportedTransport`], [`Error::ConnectionCreation`] |
//! | Connection | [`Error::NotConnected`], [`Error::ConnectionClosed`], [`Error::SendUnsupported`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`] |

// ============================================================================
// Imports
// ============================================================================

use std::fmt::Display;
use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::transport::TransportKind;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Attach-time faults are returned synchronously from
/// [`Multiplexer::attach`](crate::Multiplexer::attach). Runtime transport
/// faults never surface here; they are delivered to subscribers as events.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when multiplexer or subscriber options are invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// Header name or value cannot be sent on the wire.
    #[error("Invalid header {name:?}: {message}")]
    InvalidHeader {
        /// Offending header name.
        name: String,
        /// Why it was rejected.
        message: String,
    },

    // ========================================================================
    // Attach Errors
    // ========================================================================
    /// Requested transport is not available on this host.
    ///
    /// Returned when stream options are set but the connector has no
    /// event-stream support.
    #[error("{transport} transport is not supported in {host}")]
    UnsupportedTransport {
        /// Transport that was requested.
        transport: TransportKind,
        /// Host environment description.
        host: String,
    },

    /// Underlying transport constructor failed.
    #[error("Failed to create connection to {endpoint}: {message}")]
    ConnectionCreation {
        /// Endpoint the connection was created for.
        endpoint: String,
        /// Description of the failure.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Connection is not open yet.
    ///
    /// Returned when sending before the handshake completed.
    #[error("Connection is not open")]
    NotConnected,

    /// Transport cannot send (event streams are receive-only).
    #[error("{transport} transport does not support sending")]
    SendUnsupported {
        /// Transport kind of the handle.
        transport: TransportKind,
    },

    /// Connection already closed or closing.
    #[error("Connection closed")]
    ConnectionClosed,

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// HTTP error from the event-stream client.
    #[cfg(feature = "event-stream")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an invalid header error.
    #[inline]
    pub fn invalid_header(name: impl Into<String>, message: impl Display) -> Self {
        Self::InvalidHeader {
            name: name.into(),
            message: message.to_string(),
        }
    }

    /// Creates an unsupported transport error.
    #[inline]
    pub fn unsupported_transport(transport: TransportKind, host: impl Into<String>) -> Self {
        Self::UnsupportedTransport {
            transport,
            host: host.into(),
        }
    }

    /// Creates a connection creation error.
    ///
    /// An error that already is a creation error is passed through unchanged.
    #[inline]
    pub fn connection_creation(endpoint: impl Into<String>, source: Self) -> Self {
        match source {
            Self::ConnectionCreation { .. } => source,
            other => Self::ConnectionCreation {
                endpoint: endpoint.into(),
                message: other.to_string(),
            },
        }
    }

    /// Creates a send unsupported error.
    #[inline]
    pub fn send_unsupported(transport: TransportKind) -> Self {
        Self::SendUnsupported { transport }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this error is raised by `attach`.
    #[inline]
    #[must_use]
    pub fn is_attach_error(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedTransport { .. } | Self::ConnectionCreation { .. }
        )
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::NotConnected
                | Self::ConnectionClosed
                | Self::ConnectionCreation { .. }
                | Self::WebSocket(_)
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
