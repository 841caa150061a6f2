//! Shared listener attachment.

use std::sync::Arc;

use crate::protocol::TransportEvent;
use crate::transport::ConnectionHandle;

use super::ConnectionEvents;
use crate::mux::heartbeat::KeepAlive;
use crate::mux::options::HeartbeatOptions;
use crate::mux::registry::Registry;

/// Wires `handle` to every current subscriber of its endpoint.
///
/// Subscribers are looked up in `registry` when each event fires. A `Close`
/// retires the connection from the registry before subscribers hear of it,
/// so a reconnect trigger that re-attaches gets a fresh connection.
///
/// Returns the keep-alive task for the orchestrator to stop on teardown.
pub(crate) fn attach(
    registry: &Registry,
    handle: &ConnectionHandle,
    heartbeat: Option<HeartbeatOptions>,
) -> Option<KeepAlive> {
    let events = Arc::new(ConnectionEvents::new(handle, heartbeat.as_ref()));
    let registry_ref = registry.downgrade();
    let endpoint = handle.endpoint().to_string();
    let connection_id = handle.id();

    let dispatcher = Arc::clone(&events);
    handle.set_listener(Arc::new(move |event| {
        let records = match event {
            TransportEvent::Close(_) => registry_ref.retire(&endpoint, connection_id),
            _ => registry_ref.subscribers_of(&endpoint, connection_id),
        };
        dispatcher.dispatch(event, &records);
    }));

    events.keep_alive(handle, heartbeat)
}
