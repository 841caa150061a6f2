//! Connection listeners.
//!
//! A listener turns one connection's [`TransportEvent`]s into subscriber
//! callbacks. Exclusive listeners serve one record; shared listeners look up
//! the endpoint's current subscribers in the registry at every event, so a
//! subscriber that joins late receives everything emitted after it joined.
//!
//! | Event | Subscriber effect |
//! |-------|-------------------|
//! | `Open` | reconnect counter reset, `on_open`, state `OPEN` |
//! | `Message` | `on_message`, last-message time, filtered delivery |
//! | `Error` | `on_error` |
//! | `Closing` | state `CLOSING` |
//! | `Close` | `on_close`, state `CLOSED`, reconnect or stream retry (once per connection) |

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, trace};

use crate::identifiers::ConnectionId;
use crate::protocol::{ReadyState, TransportEvent};
use crate::transport::{ConnectionHandle, TransportKind};
use crate::transport::handle::CloseIntent;

use super::heartbeat::{self, KeepAlive, Liveness};
use super::options::HeartbeatOptions;
use super::subscriber::{CloseCause, SubscriberRecord};

// ============================================================================
// Submodules
// ============================================================================

/// One connection, one subscriber.
pub(crate) mod exclusive;

/// One connection, every subscriber of the endpoint.
pub(crate) mod shared;

// ============================================================================
// ConnectionEvents
// ============================================================================

/// Per-connection dispatch state shared by both listener kinds.
pub(crate) struct ConnectionEvents {
    connection_id: ConnectionId,
    kind: TransportKind,
    intent: CloseIntent,
    /// Raised by the first `Close`.
    closed: AtomicBool,
    /// Raised by any `Error`.
    errored: AtomicBool,
    liveness: Liveness,
    heartbeat_reply: Option<String>,
}

impl ConnectionEvents {
    pub(crate) fn new(handle: &ConnectionHandle, heartbeat: Option<&HeartbeatOptions>) -> Self {
        Self {
            connection_id: handle.id(),
            kind: handle.kind(),
            intent: handle.intent(),
            closed: AtomicBool::new(false),
            errored: AtomicBool::new(false),
            liveness: Liveness::default(),
            heartbeat_reply: heartbeat.and_then(|options| options.return_message.clone()),
        }
    }

    /// Dispatches `event` to `records`.
    pub(crate) fn dispatch(&self, event: TransportEvent, records: &[Arc<SubscriberRecord>]) {
        trace!(
            connection_id = %self.connection_id,
            event = event.name(),
            subscribers = records.len(),
            "Dispatching connection event"
        );

        match event {
            TransportEvent::Open => {
                self.liveness.touch();
                for record in records {
                    record.on_open();
                }
            }

            TransportEvent::Message(message) => {
                self.liveness.touch();
                let reply = self.heartbeat_reply.as_deref();
                for record in records {
                    record.deliver(&message, reply);
                }
            }

            TransportEvent::Error(error) => {
                debug!(connection_id = %self.connection_id, error = %error, "Connection error");
                self.errored.store(true, Ordering::SeqCst);
                for record in records {
                    record.on_error(&error);
                }
            }

            TransportEvent::Closing => {
                for record in records {
                    record.report_state(ReadyState::Closing);
                }
            }

            TransportEvent::Close(close) => {
                if self.closed.swap(true, Ordering::SeqCst) {
                    return;
                }

                let cause = CloseCause {
                    kind: self.kind,
                    intentional: self.intent.is_marked(),
                    after_error: self.errored.load(Ordering::SeqCst),
                };
                debug!(
                    connection_id = %self.connection_id,
                    code = close.code,
                    clean = close.was_clean,
                    intentional = cause.intentional,
                    after_error = cause.after_error,
                    "Connection closed"
                );

                for record in records {
                    record.on_close(&close, cause);
                }
            }
        }
    }

    /// Starts the keep-alive task if `heartbeat` applies to this connection.
    pub(crate) fn keep_alive(
        &self,
        handle: &ConnectionHandle,
        heartbeat: Option<HeartbeatOptions>,
    ) -> Option<KeepAlive> {
        let options = heartbeat?;
        if self.kind != TransportKind::Socket {
            return None;
        }
        heartbeat::spawn(handle.clone(), options, self.liveness.clone())
    }
}
