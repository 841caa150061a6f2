//! Wire-level value types shared by transports and the multiplexer.
//!
//! Nothing here knows about registries or subscribers.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `event` | Transport events, close details, runtime errors |
//! | `event_stream` | Incremental `text/event-stream` parser |
//! | `message` | Message payloads |
//! | `state` | Ready state and its atomic cell |

// ============================================================================
// Submodules
// ============================================================================

/// Transport lifecycle events.
pub mod event;

/// Server-push stream parser.
pub mod event_stream;

/// Message payloads.
pub mod message;

/// Connection ready state.
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use event::{
    CLOSE_ABNORMAL, CLOSE_NO_STATUS, CLOSE_NORMAL, CloseEvent, TransportError, TransportEvent,
};
pub use event_stream::EventStreamParser;
pub use message::{Message, StreamEvent};
pub use state::{AtomicReadyState, ReadyState};
