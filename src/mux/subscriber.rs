//! Subscribers and their per-connection records.
//!
//! A [`Subscriber`] is what a consumer hands to
//! [`Multiplexer::attach`](super::Multiplexer::attach): a message callback,
//! a state callback and an optional reconnect trigger. Each attach wraps it
//! in a `SubscriberRecord` that also tracks the consumer's reported ready
//! state, reconnect counter and last-message time.
//!
//! # Reporting
//!
//! Ready states only move forward. A record forwards a state only if it is
//! later than the last one it reported, so a stale report racing a newer one
//! is dropped. The report lock is re-entrant: a callback may detach its own
//! subscriber without deadlocking.

// ============================================================================
// Imports
// ============================================================================

use std::cell::Cell;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::{Mutex, ReentrantMutex};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::identifiers::SubscriberId;
use crate::protocol::{CloseEvent, Message, ReadyState, TransportError};
use crate::transport::TransportKind;

use super::options::OptionsRef;

// ============================================================================
// Callback Types
// ============================================================================

/// Receives messages that pass the subscriber's filter.
pub type DeliverCallback = Arc<dyn Fn(&Message) + Send + Sync>;

/// Receives ready-state transitions.
pub type StateCallback = Arc<dyn Fn(ReadyState) + Send + Sync>;

/// Starts a reconnection. Delay and backoff are the caller's concern.
pub type ReconnectTrigger = Arc<dyn Fn() + Send + Sync>;

// ============================================================================
// ReconnectCounter
// ============================================================================

/// Consecutive reconnect triggers, shared across a consumer's attachments.
///
/// Clones share the same count. Reusing one [`Subscriber`] (or its counter)
/// for the re-attach a trigger starts keeps the attempt limit effective.
#[derive(Debug, Clone, Default)]
pub struct ReconnectCounter(Arc<AtomicU32>);

impl ReconnectCounter {
    /// Creates a counter at zero.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current count.
    #[inline]
    #[must_use]
    pub fn get(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }

    /// Resets the count to zero.
    #[inline]
    pub fn reset(&self) {
        self.0.store(0, Ordering::SeqCst);
    }

    /// Increments the count if it is below `limit`.
    ///
    /// Returns the new count, or the unchanged count as `Err` at the limit.
    fn try_increment(&self, limit: u32) -> Result<u32, u32> {
        self.0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < limit).then_some(n + 1)
            })
            .map(|n| n + 1)
    }
}

// ============================================================================
// Subscriber
// ============================================================================

/// One consumer's callbacks.
#[derive(Clone, Default)]
pub struct Subscriber {
    on_message: Option<DeliverCallback>,
    on_state: Option<StateCallback>,
    reconnect: Option<ReconnectTrigger>,
    counter: ReconnectCounter,
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("on_message", &self.on_message.is_some())
            .field("on_state", &self.on_state.is_some())
            .field("reconnect", &self.reconnect.is_some())
            .field("counter", &self.counter.get())
            .finish()
    }
}

impl Subscriber {
    /// Creates a subscriber with no callbacks.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the message callback.
    #[inline]
    #[must_use]
    pub fn with_message<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.on_message = Some(Arc::new(callback));
        self
    }

    /// Sets the state callback.
    #[inline]
    #[must_use]
    pub fn with_state<F>(mut self, callback: F) -> Self
    where
        F: Fn(ReadyState) + Send + Sync + 'static,
    {
        self.on_state = Some(Arc::new(callback));
        self
    }

    /// Sets the reconnect trigger.
    #[inline]
    #[must_use]
    pub fn with_reconnect<F>(mut self, trigger: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.reconnect = Some(Arc::new(trigger));
        self
    }

    /// Shares `counter` instead of the subscriber's own.
    #[inline]
    #[must_use]
    pub fn with_counter(mut self, counter: ReconnectCounter) -> Self {
        self.counter = counter;
        self
    }

    /// Returns the reconnect counter.
    #[inline]
    #[must_use]
    pub fn counter(&self) -> &ReconnectCounter {
        &self.counter
    }
}

// ============================================================================
// CloseCause
// ============================================================================

/// How a connection came to close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CloseCause {
    pub(crate) kind: TransportKind,
    /// Closed by a detach or shutdown.
    pub(crate) intentional: bool,
    /// An `Error` event preceded the close.
    pub(crate) after_error: bool,
}

// ============================================================================
// SubscriberRecord
// ============================================================================

/// Per-attach state for one subscriber.
pub(crate) struct SubscriberRecord {
    id: SubscriberId,
    endpoint: String,
    callbacks: Subscriber,
    options: OptionsRef,
    /// Last state forwarded to `on_state`.
    reported: ReentrantMutex<Cell<ReadyState>>,
    last_message_at: Mutex<Option<Instant>>,
    active: AtomicBool,
}

impl SubscriberRecord {
    /// Creates an active record.
    pub(crate) fn new(endpoint: &str, callbacks: Subscriber, options: OptionsRef) -> Self {
        Self {
            id: SubscriberId::next(),
            endpoint: endpoint.to_string(),
            callbacks,
            options,
            reported: ReentrantMutex::new(Cell::new(ReadyState::Uninstantiated)),
            last_message_at: Mutex::new(None),
            active: AtomicBool::new(true),
        }
    }

    #[inline]
    pub(crate) fn id(&self) -> SubscriberId {
        self.id
    }

    #[inline]
    pub(crate) fn options(&self) -> &OptionsRef {
        &self.options
    }

    #[inline]
    pub(crate) fn counter(&self) -> &ReconnectCounter {
        &self.callbacks.counter
    }

    #[inline]
    pub(crate) fn reported_state(&self) -> ReadyState {
        self.reported.lock().get()
    }

    #[inline]
    pub(crate) fn last_message_at(&self) -> Option<Instant> {
        *self.last_message_at.lock()
    }

    #[inline]
    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Stops all further delivery to this record.
    #[inline]
    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    // ========================================================================
    // Reporting
    // ========================================================================

    /// Forwards `state` if it is later than the last reported state.
    ///
    /// `before` runs first while the report lock is held.
    fn forward(&self, state: ReadyState, before: impl FnOnce()) -> bool {
        let reported = self.reported.lock();
        if state <= reported.get() {
            return false;
        }
        reported.set(state);

        before();
        if let Some(on_state) = &self.callbacks.on_state {
            on_state(state);
        }
        true
    }

    /// Reports a state transition.
    pub(crate) fn report_state(&self, state: ReadyState) -> bool {
        self.is_active() && self.forward(state, || {})
    }

    /// Reports the state of a connection this record just joined.
    ///
    /// Joining an open connection opens it for this subscriber, since the
    /// connection's own `Open` may already have been dispatched.
    pub(crate) fn report_join(&self, state: ReadyState) {
        if state == ReadyState::Open {
            self.on_open();
        } else {
            self.report_state(state);
        }
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Handles the connection opening.
    pub(crate) fn on_open(&self) {
        if !self.is_active() {
            return;
        }

        self.callbacks.counter.reset();
        let on_open = self.options.read().on_open.clone();
        self.forward(ReadyState::Open, || {
            if let Some(on_open) = on_open {
                on_open();
            }
        });
    }

    /// Handles an inbound message.
    ///
    /// `heartbeat_reply` is consumed without reaching the message callback.
    pub(crate) fn deliver(&self, message: &Message, heartbeat_reply: Option<&str>) {
        if !self.is_active() {
            return;
        }

        let (on_message, filter) = {
            let options = self.options.read();
            (options.on_message.clone(), options.filter.clone())
        };

        if let Some(on_message) = on_message {
            on_message(message);
        }

        *self.last_message_at.lock() = Some(Instant::now());

        if filter.is_some_and(|filter| !filter(message)) {
            return;
        }

        if heartbeat_reply.is_some_and(|reply| message.as_text() == Some(reply)) {
            return;
        }

        if let Some(deliver) = &self.callbacks.on_message {
            deliver(message);
        }
    }

    /// Handles a runtime transport error.
    pub(crate) fn on_error(&self, error: &TransportError) {
        if !self.is_active() {
            return;
        }

        let on_error = self.options.read().on_error.clone();
        if let Some(on_error) = on_error {
            on_error(error);
        }
    }

    /// Handles the connection closing.
    ///
    /// Nothing reconnects after an intentional close. Otherwise a socket asks
    /// the options' reconnect decision, and a stream retries only if it failed
    /// with an error and `retry_on_error` is set.
    pub(crate) fn on_close(&self, close: &CloseEvent, cause: CloseCause) {
        if !self.is_active() || !self.close_out(close) {
            return;
        }

        if cause.intentional {
            return;
        }

        let wanted = {
            let options = self.options.read();
            match cause.kind {
                TransportKind::Socket => options.wants_reconnect(close),
                TransportKind::Stream => cause.after_error && options.retry_on_error,
            }
        };

        if wanted {
            self.try_reconnect();
        }
    }

    /// Reports a final close, even after deactivation.
    ///
    /// Returns `false` if this record already reported `Closed`.
    pub(crate) fn close_out(&self, close: &CloseEvent) -> bool {
        let on_close = self.options.read().on_close.clone();
        self.forward(ReadyState::Closed, || {
            if let Some(on_close) = on_close {
                on_close(close);
            }
        })
    }

    /// Fires the reconnect trigger unless the attempt limit is reached.
    pub(crate) fn try_reconnect(&self) {
        let Some(trigger) = &self.callbacks.reconnect else {
            return;
        };

        let (limit, on_stop) = {
            let options = self.options.read();
            (options.reconnect_attempts, options.on_reconnect_stop.clone())
        };

        match self.callbacks.counter.try_increment(limit) {
            Ok(attempt) => {
                debug!(endpoint = %self.endpoint, subscriber_id = %self.id, attempt, "Reconnecting");
                trigger();
            }
            Err(attempts) => {
                warn!(
                    endpoint = %self.endpoint,
                    subscriber_id = %self.id,
                    attempts,
                    "Reconnect attempt limit reached"
                );
                if let Some(on_stop) = on_stop {
                    on_stop(attempts);
                }
            }
        }
    }
}

impl fmt::Debug for SubscriberRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberRecord")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("reported", &self.reported_state())
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================
