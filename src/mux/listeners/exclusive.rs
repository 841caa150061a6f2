//! Exclusive listener attachment.

use std::sync::Arc;

use crate::transport::ConnectionHandle;

use super::ConnectionEvents;
use crate::mux::heartbeat::KeepAlive;
use crate::mux::options::HeartbeatOptions;
use crate::mux::subscriber::SubscriberRecord;

/// Undoes an exclusive attachment.
pub(crate) struct Teardown {
    handle: ConnectionHandle,
    keep_alive: Option<KeepAlive>,
}

impl Teardown {
    /// Removes the listener and stops the keep-alive task.
    pub(crate) fn run(self) {
        self.handle.clear_listener();
        if let Some(keep_alive) = self.keep_alive {
            keep_alive.stop();
        }
    }
}

/// Wires `handle` directly to `record`.
pub(crate) fn attach(
    handle: &ConnectionHandle,
    record: Arc<SubscriberRecord>,
    heartbeat: Option<HeartbeatOptions>,
) -> Teardown {
    let events = Arc::new(ConnectionEvents::new(handle, heartbeat.as_ref()));

    let dispatcher = Arc::clone(&events);
    let records = [record];
    handle.set_listener(Arc::new(move |event| dispatcher.dispatch(event, &records)));

    Teardown {
        handle: handle.clone(),
        keep_alive: events.keep_alive(handle, heartbeat),
    }
}
