//! Shared connection handle.
//!
//! A [`ConnectionHandle`] is the cheap, cloneable face of one physical
//! connection. Every subscriber of a shared endpoint holds a clone; the
//! registry holds one more. The transport is closed by whoever removes the
//! last subscriber, never by `Drop`.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use crate::error::{Error, Result};
use crate::identifiers::ConnectionId;
use crate::protocol::{Message, ReadyState};

use super::{EventListener, Transport, TransportKind};

// ============================================================================
// CloseIntent
// ============================================================================

/// Flag raised when the multiplexer closes a connection on purpose.
///
/// Listeners hold a clone instead of the handle so the transport never owns
/// a reference back to itself.
#[derive(Debug, Clone, Default)]
pub(crate) struct CloseIntent(Arc<AtomicBool>);

impl CloseIntent {
    /// Marks the upcoming close as intentional.
    #[inline]
    pub(crate) fn mark(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns `true` if the close was requested by the multiplexer.
    #[inline]
    pub(crate) fn is_marked(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ============================================================================
// ConnectionHandle
// ============================================================================

/// Internal shared state for a handle.
struct HandleInner {
    /// Unique identifier of this physical connection.
    id: ConnectionId,
    /// Endpoint the connection targets.
    endpoint: String,
    /// Socket or stream.
    kind: TransportKind,
    /// The physical transport.
    transport: Arc<dyn Transport>,
    /// Set before an intentional close.
    intent: CloseIntent,
}

/// Cloneable handle to one physical connection.
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<HandleInner>,
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.inner.id)
            .field("endpoint", &self.inner.endpoint)
            .field("kind", &self.inner.kind)
            .field("ready_state", &self.ready_state())
            .finish_non_exhaustive()
    }
}

impl ConnectionHandle {
    /// Wraps a freshly constructed transport.
    pub fn new(
        endpoint: impl Into<String>,
        kind: TransportKind,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                id: ConnectionId::next(),
                endpoint: endpoint.into(),
                kind,
                transport,
                intent: CloseIntent::default(),
            }),
        }
    }

    /// Returns the connection ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    /// Returns the endpoint.
    #[inline]
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    /// Returns the transport kind.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> TransportKind {
        self.inner.kind
    }

    /// Returns the transport's current ready state.
    #[inline]
    #[must_use]
    pub fn ready_state(&self) -> ReadyState {
        self.inner.transport.ready_state()
    }

    /// Returns `true` if both handles wrap the same physical connection.
    #[inline]
    #[must_use]
    pub fn same_connection(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Sends a message.
    ///
    /// # Errors
    ///
    /// - [`Error::SendUnsupported`] on event streams
    /// - [`Error::NotConnected`] before open
    /// - [`Error::ConnectionClosed`] after close
    pub fn send(&self, message: Message) -> Result<()> {
        if !self.inner.kind.can_send() {
            return Err(Error::send_unsupported(self.inner.kind));
        }
        self.inner.transport.send(message)
    }

    /// Closes the connection.
    ///
    /// This close counts as unintentional: subscribers' reconnection policy
    /// still applies. Detaching is the way to end interest in a connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if already closing or closed.
    pub fn close(&self) -> Result<()> {
        self.inner.transport.close()
    }

    /// Closes the connection on behalf of the multiplexer.
    ///
    /// Errors are logged and discarded.
    pub(crate) fn close_intentionally(&self) {
        self.inner.intent.mark();
        if let Err(e) = self.inner.transport.close() {
            debug!(
                connection_id = %self.inner.id,
                endpoint = %self.inner.endpoint,
                error = %e,
                "Ignoring close error during teardown"
            );
        }
    }

    /// Returns the close intent flag shared with listeners.
    #[inline]
    pub(crate) fn intent(&self) -> CloseIntent {
        self.inner.intent.clone()
    }

    /// Installs the transport listener.
    #[inline]
    pub(crate) fn set_listener(&self, listener: EventListener) {
        self.inner.transport.set_listener(listener);
    }

    /// Removes the transport listener.
    #[inline]
    pub(crate) fn clear_listener(&self) {
        self.inner.transport.clear_listener();
    }
}

// ============================================================================
// Tests
// ============================================================================
