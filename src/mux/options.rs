//! Per-subscriber options.
//!
//! Options are held behind [`OptionsRef`], a live reference the owner may
//! update at any time. Connection-shaping fields (`share`, `protocols`,
//! `headers`, `stream_options`, `heartbeat`) are read once when a connection
//! is created. Callbacks and reconnect policy are read at every event.
//!
//! # Example
//!
//! ```ignore
//! use shared_socket::Options;
//!
//! let options = Options::new()
//!     .with_share()
//!     .with_protocol("graphql-ws")
//!     .with_header("Authorization", "Bearer token")
//!     .with_reconnect_attempts(5)
//!     .on_open(|| println!("connected"))
//!     .into_shared();
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::protocol::{CloseEvent, Message, TransportError};
use crate::transport::Headers;
use crate::transport::connector::StreamOptions;

// ============================================================================
// Constants
// ============================================================================

/// Default reconnect attempt limit.
pub const DEFAULT_RECONNECT_ATTEMPTS: u32 = 20;

/// Default heartbeat message.
pub const DEFAULT_HEARTBEAT_MESSAGE: &str = "ping";

/// Default heartbeat interval.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);

/// Default heartbeat timeout.
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(60);

// ============================================================================
// Callback Types
// ============================================================================

/// Called when a connection opens.
pub type OpenCallback = Arc<dyn Fn() + Send + Sync>;

/// Called for every inbound message, before filtering.
pub type MessageCallback = Arc<dyn Fn(&Message) + Send + Sync>;

/// Called when a connection closes.
pub type CloseCallback = Arc<dyn Fn(&CloseEvent) + Send + Sync>;

/// Called on runtime transport errors.
pub type ErrorCallback = Arc<dyn Fn(&TransportError) + Send + Sync>;

/// Decides whether a close should trigger reconnection.
pub type ReconnectPredicate = Arc<dyn Fn(&CloseEvent) -> bool + Send + Sync>;

/// Decides whether a message reaches the subscriber.
pub type MessageFilter = Arc<dyn Fn(&Message) -> bool + Send + Sync>;

/// Called with the attempt count when the reconnect limit is reached.
pub type ReconnectStopCallback = Arc<dyn Fn(u32) + Send + Sync>;

/// Live, shared reference to a subscriber's options.
pub type OptionsRef = Arc<RwLock<Options>>;

// ============================================================================
// HeartbeatOptions
// ============================================================================

/// Keep-alive configuration for socket connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HeartbeatOptions {
    /// Payload sent every `interval`.
    pub message: String,

    /// Reply payload that is consumed instead of delivered.
    pub return_message: Option<String>,

    /// Delay between pings.
    pub interval: Duration,

    /// Silence after which the connection is closed.
    pub timeout: Duration,
}

impl Default for HeartbeatOptions {
    fn default() -> Self {
        Self {
            message: DEFAULT_HEARTBEAT_MESSAGE.to_string(),
            return_message: None,
            interval: DEFAULT_HEARTBEAT_INTERVAL,
            timeout: DEFAULT_HEARTBEAT_TIMEOUT,
        }
    }
}

impl HeartbeatOptions {
    /// Sets the ping payload.
    #[inline]
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Sets the reply payload to swallow.
    #[inline]
    #[must_use]
    pub fn with_return_message(mut self, message: impl Into<String>) -> Self {
        self.return_message = Some(message.into());
        self
    }

    /// Sets the ping interval.
    #[inline]
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sets the silence timeout.
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

// ============================================================================
// Options
// ============================================================================

/// Options for one subscriber.
#[derive(Clone)]
pub struct Options {
    /// Join the endpoint's shared connection instead of opening a private one.
    pub share: bool,

    /// WebSocket subprotocols.
    pub protocols: Vec<String>,

    /// Handshake headers for sockets.
    pub headers: Option<Headers>,

    /// Selects the event-stream transport when set.
    pub stream_options: Option<StreamOptions>,

    /// Keep-alive for socket connections.
    pub heartbeat: Option<HeartbeatOptions>,

    /// Maximum consecutive reconnect triggers.
    pub reconnect_attempts: u32,

    /// Reconnect event streams that close after an error.
    pub retry_on_error: bool,

    /// Reconnect decision. Exclusive connections default to "close was not
    /// clean"; shared subscribers reconnect only when this is set.
    pub should_reconnect: Option<ReconnectPredicate>,

    /// Message filter for the subscriber callback.
    pub filter: Option<MessageFilter>,

    /// Open callback.
    pub on_open: Option<OpenCallback>,

    /// Raw message callback.
    pub on_message: Option<MessageCallback>,

    /// Close callback.
    pub on_close: Option<CloseCallback>,

    /// Error callback.
    pub on_error: Option<ErrorCallback>,

    /// Reconnect limit callback.
    pub on_reconnect_stop: Option<ReconnectStopCallback>,
}

impl Default for Options {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("share", &self.share)
            .field("protocols", &self.protocols)
            .field("headers", &self.headers)
            .field("stream_options", &self.stream_options)
            .field("heartbeat", &self.heartbeat)
            .field("reconnect_attempts", &self.reconnect_attempts)
            .field("retry_on_error", &self.retry_on_error)
            .field("should_reconnect", &self.should_reconnect.is_some())
            .field("filter", &self.filter.is_some())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl Options {
    /// Creates exclusive-mode options with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            share: false,
            protocols: Vec::new(),
            headers: None,
            stream_options: None,
            heartbeat: None,
            reconnect_attempts: DEFAULT_RECONNECT_ATTEMPTS,
            retry_on_error: false,
            should_reconnect: None,
            filter: None,
            on_open: None,
            on_message: None,
            on_close: None,
            on_error: None,
            on_reconnect_stop: None,
        }
    }

    /// Creates shared-mode options with defaults.
    #[inline]
    #[must_use]
    pub fn shared() -> Self {
        Self::new().with_share()
    }

    /// Wraps the options in a live reference.
    #[inline]
    #[must_use]
    pub fn into_shared(self) -> OptionsRef {
        Arc::new(RwLock::new(self))
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl Options {
    /// Enables shared mode.
    #[inline]
    #[must_use]
    pub fn with_share(mut self) -> Self {
        self.share = true;
        self
    }

    /// Adds a subprotocol.
    #[inline]
    #[must_use]
    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocols.push(protocol.into());
        self
    }

    /// Adds a handshake header.
    #[inline]
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .get_or_insert_with(Headers::new)
            .insert(name.into(), value.into());
        self
    }

    /// Selects the event-stream transport.
    #[inline]
    #[must_use]
    pub fn with_stream(mut self, options: StreamOptions) -> Self {
        self.stream_options = Some(options);
        self
    }

    /// Enables keep-alive.
    #[inline]
    #[must_use]
    pub fn with_heartbeat(mut self, heartbeat: HeartbeatOptions) -> Self {
        self.heartbeat = Some(heartbeat);
        self
    }

    /// Sets the reconnect attempt limit.
    #[inline]
    #[must_use]
    pub fn with_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.reconnect_attempts = attempts;
        self
    }

    /// Reconnects event streams that close after an error.
    #[inline]
    #[must_use]
    pub fn with_retry_on_error(mut self) -> Self {
        self.retry_on_error = true;
        self
    }

    /// Sets the reconnect decision.
    #[inline]
    #[must_use]
    pub fn should_reconnect<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CloseEvent) -> bool + Send + Sync + 'static,
    {
        self.should_reconnect = Some(Arc::new(predicate));
        self
    }

    /// Sets the message filter.
    #[inline]
    #[must_use]
    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&Message) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }

    /// Sets the open callback.
    #[inline]
    #[must_use]
    pub fn on_open<F>(mut self, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_open = Some(Arc::new(callback));
        self
    }

    /// Sets the raw message callback.
    #[inline]
    #[must_use]
    pub fn on_message<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.on_message = Some(Arc::new(callback));
        self
    }

    /// Sets the close callback.
    #[inline]
    #[must_use]
    pub fn on_close<F>(mut self, callback: F) -> Self
    where
        F: Fn(&CloseEvent) + Send + Sync + 'static,
    {
        self.on_close = Some(Arc::new(callback));
        self
    }

    /// Sets the error callback.
    #[inline]
    #[must_use]
    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&TransportError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(callback));
        self
    }

    /// Sets the reconnect limit callback.
    #[inline]
    #[must_use]
    pub fn on_reconnect_stop<F>(mut self, callback: F) -> Self
    where
        F: Fn(u32) + Send + Sync + 'static,
    {
        self.on_reconnect_stop = Some(Arc::new(callback));
        self
    }
}

// ============================================================================
// Queries
// ============================================================================

impl Options {
    /// Returns `true` if `close` should trigger reconnection.
    ///
    /// Without a `should_reconnect` predicate an exclusive connection
    /// reconnects after an unclean close. Shared subscribers only reconnect
    /// when a predicate opts them in.
    #[must_use]
    pub fn wants_reconnect(&self, close: &CloseEvent) -> bool {
        match &self.should_reconnect {
            Some(predicate) => predicate(close),
            None => !self.share && !close.was_clean,
        }
    }

    /// Returns `true` if the message passes the filter.
    #[inline]
    #[must_use]
    pub fn accepts(&self, message: &Message) -> bool {
        self.filter.as_ref().is_none_or(|filter| filter(message))
    }

    /// Validates the options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if validation fails.
    pub fn validate(&self) -> Result<()> {
        if self.protocols.iter().any(String::is_empty) {
            return Err(Error::config("Subprotocol names must not be empty"));
        }

        if let Some(headers) = &self.headers
            && headers.keys().any(String::is_empty)
        {
            return Err(Error::config("Header names must not be empty"));
        }

        if let Some(heartbeat) = &self.heartbeat {
            if heartbeat.interval.is_zero() {
                return Err(Error::config("Heartbeat interval must be greater than zero"));
            }
            if heartbeat.timeout < heartbeat.interval {
                return Err(Error::config(
                    "Heartbeat timeout must not be shorter than its interval",
                ));
            }
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
