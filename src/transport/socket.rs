//! WebSocket transport and event loop.
//!
//! The transport owns a tokio task that performs the handshake, reads frames
//! and writes queued messages. The task is spawned when the first listener is
//! installed.
//!
//! # Event Loop
//!
//! - Handshake via `connect_async` (a close request aborts it)
//! - Incoming text/binary frames become [`TransportEvent::Message`]
//! - Outgoing messages arrive through an unbounded command channel
//! - Exactly one [`TransportEvent::Close`] is emitted when the loop ends

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::protocol::{
    AtomicReadyState, CLOSE_NO_STATUS, CloseEvent, Message, ReadyState, TransportError,
    TransportEvent,
};

use super::connector::SocketRequest;
use super::{EventListener, ListenerSlot, Transport};

// ============================================================================
// Constants
// ============================================================================

/// How long to wait for the peer's close frame after sending ours.
const CLOSE_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Types
// ============================================================================

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWrite = SplitSink<WsStream, WsMessage>;
type WsRead = SplitStream<WsStream>;

/// Internal commands for the event loop.
enum SocketCommand {
    /// Write a message.
    Send(Message),
    /// Start the closing handshake.
    Close,
}

/// Everything the event loop needs, held until the first listener arrives.
struct PendingStart {
    runtime: Handle,
    request: Request,
    command_rx: mpsc::UnboundedReceiver<SocketCommand>,
}

// ============================================================================
// SocketTransport
// ============================================================================

/// WebSocket connection backed by tokio-tungstenite.
pub struct SocketTransport {
    /// Endpoint for logging.
    endpoint: String,
    /// Ready state shared with the event loop.
    state: Arc<AtomicReadyState>,
    /// Listener shared with the event loop.
    listener: ListenerSlot,
    /// Channel for sending commands to the event loop.
    command_tx: mpsc::UnboundedSender<SocketCommand>,
    /// Present until the event loop is spawned.
    pending: Mutex<Option<PendingStart>>,
}

impl SocketTransport {
    /// Prepares a connection without touching the network.
    ///
    /// # Errors
    ///
    /// - [`Error::WebSocket`] if the URL cannot form a handshake request
    /// - [`Error::InvalidHeader`] if a header or protocol is not valid HTTP
    pub fn new(runtime: Handle, request: SocketRequest<'_>) -> Result<Self> {
        let handshake = build_request(request)?;
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        Ok(Self {
            endpoint: request.endpoint.to_owned(),
            state: Arc::new(AtomicReadyState::new(ReadyState::Connecting)),
            listener: ListenerSlot::default(),
            command_tx,
            pending: Mutex::new(Some(PendingStart {
                runtime,
                request: handshake,
                command_rx,
            })),
        })
    }

    /// Spawns the event loop if it has not been started yet.
    fn start(&self) {
        let Some(pending) = self.pending.lock().take() else {
            return;
        };

        debug!(endpoint = %self.endpoint, "Starting WebSocket event loop");

        pending.runtime.spawn(run_event_loop(
            self.endpoint.clone(),
            pending.request,
            pending.command_rx,
            Arc::clone(&self.state),
            self.listener.clone(),
        ));
    }
}

impl Transport for SocketTransport {
    fn ready_state(&self) -> ReadyState {
        self.state.load()
    }

    fn send(&self, message: Message) -> Result<()> {
        match self.state.load() {
            ReadyState::Open => self
                .command_tx
                .send(SocketCommand::Send(message))
                .map_err(|_| Error::ConnectionClosed),
            ReadyState::Closing | ReadyState::Closed => Err(Error::ConnectionClosed),
            ReadyState::Connecting | ReadyState::Uninstantiated => Err(Error::NotConnected),
        }
    }

    fn close(&self) -> Result<()> {
        if self.state.load().is_closed() {
            return Err(Error::ConnectionClosed);
        }

        // Never started: nothing on the wire, nobody listening.
        if self.pending.lock().take().is_some() {
            self.state.store(ReadyState::Closed);
            return Ok(());
        }

        self.command_tx
            .send(SocketCommand::Close)
            .map_err(|_| Error::ConnectionClosed)
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
// Handshake Request
// ============================================================================

/// Builds the client handshake request with protocols and headers.
fn build_request(request: SocketRequest<'_>) -> Result<Request> {
    let mut handshake = request.endpoint.into_client_request()?;
    let headers = handshake.headers_mut();

    if !request.protocols.is_empty() {
        let joined = request.protocols.join(", ");
        let value = HeaderValue::from_str(&joined)
            .map_err(|e| Error::invalid_header("Sec-WebSocket-Protocol", e))?;
        headers.insert("Sec-WebSocket-Protocol", value);
    }

    if let Some(extra) = request.headers {
        for (name, value) in extra {
            let header_name =
                HeaderName::from_bytes(name.as_bytes()).map_err(|e| Error::invalid_header(name, e))?;
            let header_value =
                HeaderValue::from_str(value).map_err(|e| Error::invalid_header(name, e))?;
            headers.insert(header_name, header_value);
        }
    }

    Ok(handshake)
}

// ============================================================================
// Event Loop
// ============================================================================

/// Drives one WebSocket connection from handshake to close.
async fn run_event_loop(
    endpoint: String,
    request: Request,
    mut command_rx: mpsc::UnboundedReceiver<SocketCommand>,
    state: Arc<AtomicReadyState>,
    listener: ListenerSlot,
) {
    let ws_stream = tokio::select! {
        result = tokio_tungstenite::connect_async(request) => match result {
            Ok((ws_stream, _response)) => ws_stream,
            Err(e) => {
                warn!(endpoint = %endpoint, error = %e, "WebSocket handshake failed");
                finish(
                    &state,
                    &listener,
                    Some(TransportError::new(e.to_string())),
                    CloseEvent::abnormal(e.to_string()),
                );
                return;
            }
        },

        () = wait_for_close(&mut command_rx) => {
            debug!(endpoint = %endpoint, "Closed before handshake completed");
            finish(&state, &listener, None, CloseEvent::abnormal("closed before open"));
            return;
        }
    };

    state.store(ReadyState::Open);
    debug!(endpoint = %endpoint, "WebSocket open");
    listener.emit(TransportEvent::Open);

    let (mut ws_write, mut ws_read) = ws_stream.split();

    let close_event = loop {
        tokio::select! {
            // Incoming frames
            frame = ws_read.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        listener.emit(TransportEvent::Message(Message::Text(text.as_str().to_owned())));
                    }

                    Some(Ok(WsMessage::Binary(bytes))) => {
                        listener.emit(TransportEvent::Message(Message::Binary(bytes.to_vec())));
                    }

                    Some(Ok(WsMessage::Close(frame))) => {
                        debug!(endpoint = %endpoint, "WebSocket closed by remote");
                        if state.advance(ReadyState::Closing) {
                            listener.emit(TransportEvent::Closing);
                        }
                        let _ = ws_write.close().await;
                        break match frame {
                            Some(frame) => CloseEvent::new(
                                u16::from(frame.code),
                                frame.reason.as_str(),
                                true,
                            ),
                            None => CloseEvent::new(CLOSE_NO_STATUS, "", true),
                        };
                    }

                    Some(Err(e)) => {
                        warn!(endpoint = %endpoint, error = %e, "WebSocket error");
                        listener.emit(TransportEvent::Error(TransportError::new(e.to_string())));
                        break CloseEvent::abnormal(e.to_string());
                    }

                    None => {
                        debug!(endpoint = %endpoint, "WebSocket stream ended");
                        break CloseEvent::abnormal("stream ended");
                    }

                    // Ping/Pong are answered by tungstenite
                    _ => {}
                }
            }

            // Commands from handles
            command = command_rx.recv() => {
                match command {
                    Some(SocketCommand::Send(message)) => {
                        if let Err(e) = ws_write.send(to_ws_message(message)).await {
                            warn!(endpoint = %endpoint, error = %e, "Failed to send message");
                            listener.emit(TransportEvent::Error(TransportError::new(e.to_string())));
                        } else {
                            trace!(endpoint = %endpoint, "Message sent");
                        }
                    }

                    Some(SocketCommand::Close) | None => {
                        debug!(endpoint = %endpoint, "Closing WebSocket");
                        if state.advance(ReadyState::Closing) {
                            listener.emit(TransportEvent::Closing);
                        }
                        break close_handshake(&mut ws_write, &mut ws_read).await;
                    }
                }
            }
        }
    };

    finish(&state, &listener, None, close_event);
    debug!(endpoint = %endpoint, "Event loop terminated");
}

/// Resolves once a close command arrives or every sender is gone.
async fn wait_for_close(command_rx: &mut mpsc::UnboundedReceiver<SocketCommand>) {
    loop {
        match command_rx.recv().await {
            Some(SocketCommand::Close) | None => return,
            // Sends are rejected before open; anything queued is stale.
            Some(SocketCommand::Send(_)) => {}
        }
    }
}

/// Sends our close frame and waits briefly for the peer's reply.
async fn close_handshake(ws_write: &mut WsWrite, ws_read: &mut WsRead) -> CloseEvent {
    if let Err(e) = ws_write.close().await {
        debug!(error = %e, "Close frame not sent");
        return CloseEvent::abnormal(e.to_string());
    }

    let reply = timeout(CLOSE_HANDSHAKE_TIMEOUT, async {
        while let Some(frame) = ws_read.next().await {
            match frame {
                Ok(WsMessage::Close(frame)) => {
                    return frame.map_or_else(CloseEvent::normal, |frame| {
                        CloseEvent::new(u16::from(frame.code), frame.reason.as_str(), true)
                    });
                }
                Ok(_) => {}
                Err(e) => return CloseEvent::abnormal(e.to_string()),
            }
        }
        CloseEvent::normal()
    })
    .await;

    reply.unwrap_or_else(|_| CloseEvent::abnormal("close handshake timed out"))
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

/// Converts an outbound message into a WebSocket frame.
fn to_ws_message(message: Message) -> WsMessage {
    match message {
        Message::Text(text) => WsMessage::Text(text.into()),
        Message::Binary(bytes) => WsMessage::Binary(bytes.into()),
        Message::Event(event) => WsMessage::Text(event.data.into()),
    }
}

// ============================================================================
// Tests
// ============================================================================
