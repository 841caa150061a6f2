//! Shared connection multiplexer.
//!
//! Many subscribers, one physical connection per endpoint.
//!
//! # Architecture
//!
//! ```text
//!  attach ──► Multiplexer ──► Registry ──────────────┐
//!                 │            (endpoint → entry,     │
//!                 │             endpoint → records)   │
//!                 ▼                                   ▼
//!          ConnectionFactory ──► Connector    shared listener ──► records
//!            (platform headers)      │                 ▲
//!                                    ▼                 │
//!                              dyn Transport ──────────┘ TransportEvent
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `builder` | [`MultiplexerBuilder`] |
//! | `core` | [`Multiplexer`] and [`Attachment`] |
//! | `factory` | [`ConnectionFactory`] transport selection |
//! | `heartbeat` | Keep-alive task |
//! | `listeners` | Exclusive and shared event dispatch |
//! | `options` | [`Options`] and [`HeartbeatOptions`] |
//! | `platform` | [`Platform`] and [`HeaderPolicy`] |
//! | `registry` | [`Registry`] of shared connections |
//! | `subscriber` | [`Subscriber`] callbacks and reconnect counter |

// ============================================================================
// Submodules
// ============================================================================

/// Multiplexer builder.
pub mod builder;

/// Attach and detach.
pub mod core;

/// Connection factory.
pub mod factory;

/// Keep-alive task.
pub mod heartbeat;

/// Connection event dispatch.
mod listeners;

/// Subscriber options.
pub mod options;

/// Platform and header policy.
pub mod platform;

/// Shared connection registry.
pub mod registry;

/// Subscribers.
pub mod subscriber;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::MultiplexerBuilder;
pub use core::{Attachment, Multiplexer};
pub use factory::ConnectionFactory;
pub use heartbeat::KeepAlive;
pub use options::{HeartbeatOptions, Options, OptionsRef};
pub use platform::{HeaderPolicy, Host, Os, Platform};
pub use registry::Registry;
pub use subscriber::{ReconnectCounter, Subscriber};
