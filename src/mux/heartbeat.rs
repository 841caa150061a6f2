//! Keep-alive task for socket connections.
//!
//! While a connection is open, the task sends the heartbeat message every
//! `interval`. Any inbound message refreshes the connection's [`Liveness`];
//! if nothing arrives for longer than `timeout` the task closes the
//! connection. That close is not marked intentional, so subscribers'
//! reconnect policy applies.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, trace, warn};

use crate::protocol::{Message, ReadyState};
use crate::transport::ConnectionHandle;

use super::options::HeartbeatOptions;

// ============================================================================
// Liveness
// ============================================================================

/// Time of the last sign of life on a connection.
#[derive(Debug, Clone)]
pub(crate) struct Liveness(Arc<Mutex<Instant>>);

impl Default for Liveness {
    fn default() -> Self {
        Self(Arc::new(Mutex::new(Instant::now())))
    }
}

impl Liveness {
    /// Records activity now.
    #[inline]
    pub(crate) fn touch(&self) {
        *self.0.lock() = Instant::now();
    }

    /// Time since the last activity.
    #[inline]
    pub(crate) fn elapsed(&self) -> Duration {
        self.0.lock().elapsed()
    }
}

// ============================================================================
// KeepAlive
// ============================================================================

/// Running keep-alive task. Stopped on drop.
#[derive(Debug)]
pub struct KeepAlive(AbortHandle);

impl KeepAlive {
    /// Stops the task.
    #[inline]
    pub fn stop(self) {
        drop(self);
    }

    /// Returns `true` once the task has exited.
    #[inline]
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.0.is_finished()
    }
}

impl Drop for KeepAlive {
    fn drop(&mut self) {
        self.0.abort();
    }
}

// ============================================================================
// Spawn
// ============================================================================

/// Starts the keep-alive task for `handle`.
///
/// Returns `None` when called outside a tokio runtime.
pub(crate) fn spawn(
    handle: ConnectionHandle,
    options: HeartbeatOptions,
    liveness: Liveness,
) -> Option<KeepAlive> {
    let runtime = match Handle::try_current() {
        Ok(runtime) => runtime,
        Err(_) => {
            warn!(endpoint = %handle.endpoint(), "No tokio runtime, heartbeat disabled");
            return None;
        }
    };

    debug!(
        endpoint = %handle.endpoint(),
        connection_id = %handle.id(),
        interval_ms = options.interval.as_millis() as u64,
        "Starting heartbeat"
    );

    let task = runtime.spawn(run(handle, options, liveness));
    Some(KeepAlive(task.abort_handle()))
}

async fn run(handle: ConnectionHandle, options: HeartbeatOptions, liveness: Liveness) {
    let mut ticker = interval_at(Instant::now() + options.interval, options.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        match handle.ready_state() {
            ReadyState::Uninstantiated | ReadyState::Connecting => continue,
            ReadyState::Closing | ReadyState::Closed => break,
            ReadyState::Open => {}
        }

        let silent = liveness.elapsed();
        if silent > options.timeout {
            warn!(
                endpoint = %handle.endpoint(),
                connection_id = %handle.id(),
                silent_ms = silent.as_millis() as u64,
                "Heartbeat timed out, closing connection"
            );
            if let Err(e) = handle.close() {
                debug!(error = %e, "Close after heartbeat timeout failed");
            }
            break;
        }

        trace!(connection_id = %handle.id(), "Sending heartbeat");
        if let Err(e) = handle.send(Message::text(options.message.clone())) {
            debug!(connection_id = %handle.id(), error = %e, "Heartbeat send failed");
        }
    }

    debug!(connection_id = %handle.id(), "Heartbeat stopped");
}

// ============================================================================
// Tests
// ============================================================================
