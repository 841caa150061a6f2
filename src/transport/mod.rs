//! Transport layer.
//!
//! A transport is one physical connection to one endpoint. The multiplexer
//! only sees the capability interface in [`Transport`]; concrete transports
//! live in the submodules.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐   set_listener   ┌─────────────────────┐
//! │ ConnectionHandle │ ───────────────► │ dyn Transport       │
//! │  id, kind, intent│                  │  socket / stream /  │
//! │                  │ ◄─────────────── │  memory             │
//! └──────────────────┘  TransportEvent  └─────────────────────┘
//! ```
//!
//! # Listener Contract
//!
//! - A transport performs no I/O before its first listener is installed, so
//!   no event can be lost between construction and wiring.
//! - Events are delivered to the listener installed at emission time; the
//!   listener is cloned out of its lock before being called, so a listener
//!   may clear itself or close the transport from inside a callback.
//! - `set_listener` itself never emits.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connector` | Constructor policy ([`Connector`]) and the tokio implementation |
//! | `handle` | Shared [`ConnectionHandle`] |
//! | `memory` | In-process transport for tests and embedding |
//! | `socket` | WebSocket transport over tokio-tungstenite |
//! | `stream` | `text/event-stream` transport over reqwest |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::protocol::{Message, ReadyState, TransportEvent};

// ============================================================================
// Submodules
// ============================================================================

/// Transport constructors.
pub mod connector;

/// Shared connection handle.
pub mod handle;

/// In-process transport.
pub mod memory;

/// WebSocket transport.
pub mod socket;

/// Event-stream transport.
#[cfg(feature = "event-stream")]
pub mod stream;

// ============================================================================
// Re-exports
// ============================================================================

pub use connector::{Connector, Headers, SocketRequest, StreamRequest, TokioConnector};
pub use handle::ConnectionHandle;
pub use memory::{MemoryConnector, MemoryTransport};
pub use socket::SocketTransport;
#[cfg(feature = "event-stream")]
pub use stream::StreamTransport;

// ============================================================================
// Types
// ============================================================================

/// Listener callback installed on a transport.
pub type EventListener = Arc<dyn Fn(TransportEvent) + Send + Sync>;

// ============================================================================
// TransportKind
// ============================================================================

/// Which kind of physical connection a handle wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportKind {
    /// Bidirectional WebSocket.
    Socket,
    /// Receive-only server-push event stream.
    Stream,
}

impl TransportKind {
    /// Returns `true` if the transport can send messages.
    #[inline]
    #[must_use]
    pub const fn can_send(self) -> bool {
        matches!(self, Self::Socket)
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Socket => f.write_str("WebSocket"),
            Self::Stream => f.write_str("Event stream"),
        }
    }
}

// ============================================================================
// Transport
// ============================================================================

/// Capability interface shared by all physical connections.
pub trait Transport: Send + Sync {
    /// Current ready state.
    fn ready_state(&self) -> ReadyState;

    /// Queues a message for sending.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`](crate::Error::NotConnected) before open
    /// - [`Error::ConnectionClosed`](crate::Error::ConnectionClosed) after close
    /// - [`Error::SendUnsupported`](crate::Error::SendUnsupported) on receive-only transports
    fn send(&self, message: Message) -> Result<()>;

    /// Starts closing the connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`](crate::Error::ConnectionClosed) if
    /// the connection is already closing or closed.
    fn close(&self) -> Result<()>;

    /// Installs the event listener, replacing any previous one.
    fn set_listener(&self, listener: EventListener);

    /// Removes the event listener. Later events are dropped.
    fn clear_listener(&self);
}

// ============================================================================
// ListenerSlot
// ============================================================================

/// Listener storage shared between a transport and its I/O task.
#[derive(Clone, Default)]
pub(crate) struct ListenerSlot(Arc<Mutex<Option<EventListener>>>);

impl ListenerSlot {
    /// Replaces the listener. Returns `true` if none was installed before.
    pub(crate) fn set(&self, listener: EventListener) -> bool {
        self.0.lock().replace(listener).is_none()
    }

    /// Removes the listener.
    pub(crate) fn clear(&self) {
        self.0.lock().take();
    }

    /// Returns `true` if a listener is installed.
    pub(crate) fn is_set(&self) -> bool {
        self.0.lock().is_some()
    }

    /// Delivers `event` to the current listener without holding the lock.
    pub(crate) fn emit(&self, event: TransportEvent) {
        let listener = self.0.lock().clone();
        if let Some(listener) = listener {
            listener(event);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
