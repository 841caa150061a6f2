//! Shared socket - one physical real-time connection per endpoint, many
//! subscribers.
//!
//! Independent consumers attach to an endpoint (a WebSocket or a
//! `text/event-stream` URL). In shared mode they all ride the same physical
//! connection: messages and ready-state transitions fan out to every current
//! subscriber, and the connection closes when the last one detaches. In
//! exclusive mode each consumer gets its own connection.
//!
//! # Architecture
//!
//! - **Registry**: endpoint → connection, endpoint → subscriber records,
//!   under one lock, injected rather than global
//! - **Factory**: picks socket or stream, applies platform header defaults
//! - **Listeners**: dispatch transport events to the current subscribers,
//!   once per logical close
//! - **Transports**: tokio-tungstenite sockets, reqwest event streams and an
//!   in-memory transport for tests
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use shared_socket::{Multiplexer, Options, Result, Subscriber, TokioConnector};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let mux = Multiplexer::builder()
//!         .connector(Arc::new(TokioConnector::new()))
//!         .build()?;
//!
//!     let options = Options::shared().with_protocol("json").into_shared();
//!     let subscriber = Subscriber::new()
//!         .with_state(|state| println!("state: {state}"))
//!         .with_message(|message| println!("message: {:?}", message.as_text()));
//!
//!     let feed = mux.attach("wss://feed.example/live", &options, subscriber.clone())?;
//!     let ticker = mux.attach("wss://feed.example/live", &options, subscriber)?;
//!     assert!(feed.handle().same_connection(ticker.handle()));
//!
//!     feed.detach();
//!     ticker.detach();
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Connection and subscriber IDs |
//! | [`mux`] | [`Multiplexer`], [`Registry`], options and subscribers |
//! | [`protocol`] | Messages, events and ready states |
//! | [`transport`] | [`Transport`] trait, connectors and transports |
//!
//! # Features
//!
//! - `event-stream` (default): server-push streams over reqwest

// ============================================================================
// Modules
// ============================================================================

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
pub mod identifiers;

/// Shared connection multiplexer.
///
/// Use [`Multiplexer::builder()`] to create one.
pub mod mux;

/// Message, event and state types.
pub mod protocol;

/// Physical connections.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{ConnectionId, SubscriberId};

// Multiplexer types
pub use mux::{
    Attachment, ConnectionFactory, HeaderPolicy, HeartbeatOptions, Host, Multiplexer,
    MultiplexerBuilder, Options, OptionsRef, Os, Platform, ReconnectCounter, Registry, Subscriber,
};

// Protocol types
pub use protocol::{CloseEvent, Message, ReadyState, StreamEvent, TransportError, TransportEvent};

// Transport types
pub use transport::connector::StreamOptions;
pub use transport::{
    ConnectionHandle, Connector, Headers, MemoryConnector, MemoryTransport, TokioConnector,
    Transport, TransportKind,
};
