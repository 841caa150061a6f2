//! In-process transport.
//!
//! [`MemoryTransport`] performs no I/O: the owner drives it by calling
//! [`open`](MemoryTransport::open), [`push`](MemoryTransport::push),
//! [`fail`](MemoryTransport::fail) and
//! [`remote_close`](MemoryTransport::remote_close). Events are delivered
//! synchronously on the calling thread, which makes fan-out behavior fully
//! deterministic.
//!
//! [`MemoryConnector`] hands out memory transports and records them, so a
//! test can reach the transport behind any handle the multiplexer created.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::trace;

use crate::error::{Error, Result};
use crate::protocol::{
    AtomicReadyState, CloseEvent, Message, ReadyState, TransportError, TransportEvent,
};

use super::connector::{Connector, Headers, SocketRequest, StreamRequest};
use super::{EventListener, ListenerSlot, Transport, TransportKind};

// ============================================================================
// MemoryTransport
// ============================================================================

/// Transport driven entirely by its owner.
pub struct MemoryTransport {
    /// Endpoint the transport was created for.
    endpoint: String,
    /// Socket or stream.
    kind: TransportKind,
    /// Subprotocols passed at construction.
    protocols: Vec<String>,
    /// Headers passed at construction, `None` if omitted.
    headers: Option<Headers>,
    /// Current ready state.
    state: AtomicReadyState,
    /// Installed listener.
    listener: ListenerSlot,
    /// Messages sent through the transport.
    sent: Mutex<Vec<Message>>,
    /// Number of `close` calls, successful or not.
    close_calls: AtomicUsize,
}

impl MemoryTransport {
    /// Creates a transport in `Connecting` state.
    #[must_use]
    pub fn new(endpoint: impl Into<String>, kind: TransportKind) -> Self {
        Self {
            endpoint: endpoint.into(),
            kind,
            protocols: Vec::new(),
            headers: None,
            state: AtomicReadyState::new(ReadyState::Connecting),
            listener: ListenerSlot::default(),
            sent: Mutex::new(Vec::new()),
            close_calls: AtomicUsize::new(0),
        }
    }

    /// Creates a transport from a socket request.
    #[must_use]
    pub fn from_socket_request(request: SocketRequest<'_>) -> Self {
        Self {
            protocols: request.protocols.to_vec(),
            headers: request.headers.cloned(),
            ..Self::new(request.endpoint, TransportKind::Socket)
        }
    }

    /// Returns the endpoint.
    #[inline]
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Returns the transport kind.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    /// Returns the subprotocols passed at construction.
    #[inline]
    #[must_use]
    pub fn protocols(&self) -> &[String] {
        &self.protocols
    }

    /// Returns the headers passed at construction.
    #[inline]
    #[must_use]
    pub fn headers(&self) -> Option<&Headers> {
        self.headers.as_ref()
    }

    /// Returns a copy of every message sent so far.
    #[must_use]
    pub fn sent(&self) -> Vec<Message> {
        self.sent.lock().clone()
    }

    /// Returns how many times `close` was called.
    #[inline]
    #[must_use]
    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    /// Returns `true` if a listener is installed.
    #[inline]
    #[must_use]
    pub fn has_listener(&self) -> bool {
        self.listener.is_set()
    }

    /// Completes the handshake.
    pub fn open(&self) {
        if self.state.advance(ReadyState::Open) {
            self.emit(TransportEvent::Open);
        }
    }

    /// Delivers an inbound message.
    pub fn push(&self, message: impl Into<Message>) {
        self.emit(TransportEvent::Message(message.into()));
    }

    /// Reports a runtime error without closing.
    pub fn fail(&self, message: impl Into<String>) {
        self.emit(TransportEvent::Error(TransportError::new(message)));
    }

    /// Simulates the peer closing the connection.
    pub fn remote_close(&self, close: CloseEvent) {
        if self.state.advance(ReadyState::Closing) {
            self.emit(TransportEvent::Closing);
        }
        if self.state.advance(ReadyState::Closed) {
            self.emit(TransportEvent::Close(close));
        }
    }

    /// Simulates a dropped connection.
    pub fn drop_connection(&self) {
        self.fail("connection reset");
        self.remote_close(CloseEvent::abnormal("connection reset"));
    }

    /// Emits an arbitrary event without touching the ready state.
    pub fn emit(&self, event: TransportEvent) {
        trace!(endpoint = %self.endpoint, event = event.name(), "Memory transport event");
        self.listener.emit(event);
    }
}

impl Transport for MemoryTransport {
    fn ready_state(&self) -> ReadyState {
        self.state.load()
    }

    fn send(&self, message: Message) -> Result<()> {
        match self.state.load() {
            ReadyState::Open => {
                self.sent.lock().push(message);
                Ok(())
            }
            ReadyState::Closing | ReadyState::Closed => Err(Error::ConnectionClosed),
            ReadyState::Connecting | ReadyState::Uninstantiated => Err(Error::NotConnected),
        }
    }

    fn close(&self) -> Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);

        if self.state.load().is_closed() {
            return Err(Error::ConnectionClosed);
        }

        self.remote_close(CloseEvent::normal());
        Ok(())
    }

    fn set_listener(&self, listener: EventListener) {
        self.listener.set(listener);
    }

    fn clear_listener(&self) {
        self.listener.clear();
    }
}

// ============================================================================
// MemoryConnector
// ============================================================================

/// Connector that creates and records [`MemoryTransport`]s.
pub struct MemoryConnector {
    /// Whether stream transports are available.
    streams: bool,
    /// Whether socket constructors accept headers.
    headers: bool,
    /// Error message for the next construction, if set.
    fail_next: Mutex<Option<String>>,
    /// Every transport handed out, in creation order.
    created: Mutex<Vec<Arc<MemoryTransport>>>,
    /// Whether any construction has failed.
    failed: AtomicBool,
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryConnector {
    /// Creates a connector with stream and header support.
    #[must_use]
    pub fn new() -> Self {
        Self {
            streams: true,
            headers: true,
            fail_next: Mutex::new(None),
            created: Mutex::new(Vec::new()),
            failed: AtomicBool::new(false),
        }
    }

    /// Toggles event-stream support.
    #[inline]
    #[must_use]
    pub fn with_streams(mut self, enabled: bool) -> Self {
        self.streams = enabled;
        self
    }

    /// Toggles header support for sockets.
    #[inline]
    #[must_use]
    pub fn with_headers(mut self, enabled: bool) -> Self {
        self.headers = enabled;
        self
    }

    /// Makes the next construction fail with `message`.
    pub fn fail_next(&self, message: impl Into<String>) {
        *self.fail_next.lock() = Some(message.into());
    }

    /// Returns every transport created so far.
    #[must_use]
    pub fn transports(&self) -> Vec<Arc<MemoryTransport>> {
        self.created.lock().clone()
    }

    /// Returns the most recently created transport.
    #[must_use]
    pub fn last(&self) -> Option<Arc<MemoryTransport>> {
        self.created.lock().last().cloned()
    }

    /// Returns how many transports were created.
    #[inline]
    #[must_use]
    pub fn created_count(&self) -> usize {
        self.created.lock().len()
    }

    /// Returns `true` if a construction has failed.
    #[inline]
    #[must_use]
    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    /// Records `transport` unless a failure is pending.
    fn register(&self, transport: MemoryTransport) -> Result<Arc<dyn Transport>> {
        if let Some(message) = self.fail_next.lock().take() {
            self.failed.store(true, Ordering::SeqCst);
            return Err(Error::config(message));
        }

        let transport = Arc::new(transport);
        self.created.lock().push(Arc::clone(&transport));
        Ok(transport)
    }
}

impl Connector for MemoryConnector {
    fn supports_streams(&self) -> bool {
        self.streams
    }

    fn supports_headers(&self) -> bool {
        self.headers
    }

    fn host_name(&self) -> &str {
        "memory host"
    }

    fn connect_socket(&self, request: SocketRequest<'_>) -> Result<Arc<dyn Transport>> {
        self.register(MemoryTransport::from_socket_request(request))
    }

    fn connect_stream(&self, request: StreamRequest<'_>) -> Result<Arc<dyn Transport>> {
        self.register(MemoryTransport::new(request.endpoint, TransportKind::Stream))
    }
}

// ============================================================================
// Tests
// ============================================================================
