//! Server-push event-stream transport.
//!
//! Opens an HTTP `GET` with `Accept: text/event-stream` and turns the
//! response body into [`TransportEvent::Message`]s. The transport is
//! receive-only; reconnection after the body ends is left to subscribers'
//! reconnect triggers.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use futures_util::StreamExt;
use parking_lot::Mutex;
use reqwest::header::{ACCEPT, CACHE_CONTROL, HeaderName, HeaderValue};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::protocol::{
    AtomicReadyState, CloseEvent, EventStreamParser, Message, ReadyState, TransportError,
    TransportEvent,
};
use crate::transport::connector::StreamOptions;

use super::{EventListener, ListenerSlot, Transport};

// ============================================================================
// Constants
// ============================================================================

/// Header carrying the resume point.
const LAST_EVENT_ID: &str = "Last-Event-ID";

// ============================================================================
// Types
// ============================================================================

/// Everything the event loop needs, held until the first listener arrives.
struct PendingStart {
    runtime: Handle,
    client: reqwest::Client,
    request: reqwest::Request,
    last_event_id: Option<String>,
    shutdown_rx: mpsc::UnboundedReceiver<()>,
}

// ============================================================================
// StreamTransport
// ============================================================================

/// `text/event-stream` connection backed by reqwest.
pub struct StreamTransport {
    /// Endpoint for logging.
    endpoint: String,
    /// Ready state shared with the event loop.
    state: Arc<AtomicReadyState>,
    /// Listener shared with the event loop.
    listener: ListenerSlot,
    /// Close signal for the event loop.
    shutdown_tx: mpsc::UnboundedSender<()>,
    /// Present until the event loop is spawned.
    pending: Mutex<Option<PendingStart>>,
}

impl StreamTransport {
    /// Prepares a stream request without touching the network.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidHeader`] if a header is not valid HTTP
    /// - [`Error::Http`] if the request cannot be built
    pub fn new(
        runtime: Handle,
        client: reqwest::Client,
        url: Url,
        options: &StreamOptions,
    ) -> Result<Self> {
        let endpoint = url.to_string();
        let mut builder = client
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache");

        for (name, value) in &options.headers {
            let header_name =
                HeaderName::from_bytes(name.as_bytes()).map_err(|e| Error::invalid_header(name, e))?;
            let header_value =
                HeaderValue::from_str(value).map_err(|e| Error::invalid_header(name, e))?;
            builder = builder.header(header_name, header_value);
        }

        if let Some(id) = &options.last_event_id {
            let value = HeaderValue::from_str(id).map_err(|e| Error::invalid_header(LAST_EVENT_ID, e))?;
            builder = builder.header(LAST_EVENT_ID, value);
        }

        let request = builder.build()?;
        let (shutdown_tx, shutdown_rx) = mpsc::unbounded_channel();

        Ok(Self {
            endpoint,
            state: Arc::new(AtomicReadyState::new(ReadyState::Connecting)),
            listener: ListenerSlot::default(),
            shutdown_tx,
            pending: Mutex::new(Some(PendingStart {
                runtime,
                client,
                request,
                last_event_id: options.last_event_id.clone(),
                shutdown_rx,
            })),
        })
    }

    /// Spawns the event loop if it has not been started yet.
    fn start(&self) {
        let Some(pending) = self.pending.lock().take() else {
            return;
        };

        debug!(endpoint = %self.endpoint, "Starting event-stream loop");

        let runtime = pending.runtime.clone();
        runtime.spawn(run_event_loop(
            self.endpoint.clone(),
            pending,
            Arc::clone(&self.state),
            self.listener.clone(),
        ));
    }
}

impl Transport for StreamTransport {
    fn ready_state(&self) -> ReadyState {
        self.state.load()
    }

    fn send(&self, _message: Message) -> Result<()> {
        Err(Error::send_unsupported(super::TransportKind::Stream))
    }

    fn close(&self) -> Result<()> {
        if self.state.load().is_closed() {
            return Err(Error::ConnectionClosed);
        }

        if self.pending.lock().take().is_some() {
            self.state.store(ReadyState::Closed);
            return Ok(());
        }

        self.shutdown_tx.send(()).map_err(|_| Error::ConnectionClosed)
    }

    fn set_listener(&self, listener: EventListener) {
        self.listener.set(listener);
        self.start();
    }

    fn clear_listener(&self) {
        self.listener.clear();
    }
}

// ============================================================================
// Event Loop
// ============================================================================

/// Drives one event stream from request to close.
async fn run_event_loop(
    endpoint: String,
    pending: PendingStart,
    state: Arc<AtomicReadyState>,
    listener: ListenerSlot,
) {
    let PendingStart {
        client,
        request,
        last_event_id,
        mut shutdown_rx,
        ..
    } = pending;

    let response = tokio::select! {
        result = client.execute(request) => match result.and_then(reqwest::Response::error_for_status) {
            Ok(response) => response,
            Err(e) => {
                warn!(endpoint = %endpoint, error = %e, "Event-stream request failed");
                finish(
                    &state,
                    &listener,
                    Some(TransportError::new(e.to_string())),
                    CloseEvent::abnormal(e.to_string()),
                );
                return;
            }
        },

        _ = shutdown_rx.recv() => {
            debug!(endpoint = %endpoint, "Closed before stream opened");
            finish(&state, &listener, None, CloseEvent::abnormal("closed before open"));
            return;
        }
    };

    state.store(ReadyState::Open);
    debug!(endpoint = %endpoint, "Event stream open");
    listener.emit(TransportEvent::Open);

    let mut parser = EventStreamParser::new(last_event_id);
    let mut body = response.bytes_stream();

    let close_event = loop {
        tokio::select! {
            chunk = body.next() => match chunk {
                Some(Ok(bytes)) => {
                    for message in parser.feed(&bytes) {
                        listener.emit(TransportEvent::Message(message));
                    }
                }

                Some(Err(e)) => {
                    warn!(endpoint = %endpoint, error = %e, "Event-stream read failed");
                    listener.emit(TransportEvent::Error(TransportError::new(e.to_string())));
                    break CloseEvent::abnormal(e.to_string());
                }

                None => {
                    debug!(endpoint = %endpoint, "Event stream ended by server");
                    listener.emit(TransportEvent::Error(TransportError::new("event stream ended")));
                    break CloseEvent::abnormal("event stream ended");
                }
            },

            _ = shutdown_rx.recv() => {
                if state.advance(ReadyState::Closing) {
                    listener.emit(TransportEvent::Closing);
                }
                break CloseEvent::normal();
            }
        }
    };

    finish(&state, &listener, None, close_event);
    debug!(endpoint = %endpoint, "Event-stream loop terminated");
}

/// Emits the optional error and the single close event.
fn finish(
    state: &AtomicReadyState,
    listener: &ListenerSlot,
    error: Option<TransportError>,
    close: CloseEvent,
) {
    state.store(ReadyState::Closed);
    if let Some(error) = error {
        listener.emit(TransportEvent::Error(error));
    }
    listener.emit(TransportEvent::Close(close));
}

// ============================================================================
// Tests
// ============================================================================
