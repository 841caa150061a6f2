//! Connection ready state.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicI8, Ordering};

use serde::{Deserialize, Serialize};

// ============================================================================
// ReadyState
// ============================================================================

/// Lifecycle state of a connection as observed by a subscriber.
///
/// Numeric values follow the WebSocket `readyState` convention, with
/// `Uninstantiated` (-1) for a subscriber that has not seen any state yet.
///
/// Within one physical connection the state only moves forward:
/// `Connecting < Open < Closing < Closed`. The derived ordering encodes that.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[repr(i8)]
pub enum ReadyState {
    /// No connection has been associated yet.
    #[default]
    Uninstantiated = -1,
    /// Handshake in progress.
    Connecting = 0,
    /// Connection established.
    Open = 1,
    /// Close initiated, waiting for the transport to finish.
    Closing = 2,
    /// Connection closed.
    Closed = 3,
}

impl ReadyState {
    /// Converts a raw value back into a state.
    #[inline]
    #[must_use]
    pub const fn from_i8(raw: i8) -> Option<Self> {
        match raw {
            -1 => Some(Self::Uninstantiated),
            0 => Some(Self::Connecting),
            1 => Some(Self::Open),
            2 => Some(Self::Closing),
            3 => Some(Self::Closed),
            _ => None,
        }
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_i8(self) -> i8 {
        self as i8
    }

    /// Returns `true` if messages can be sent.
    #[inline]
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }

    /// Returns `true` if the connection is closing or closed.
    #[inline]
    #[must_use]
    pub const fn is_closed(self) -> bool {
        matches!(self, Self::Closing | Self::Closed)
    }
}

impl fmt::Display for ReadyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninstantiated => "UNINSTANTIATED",
            Self::Connecting => "CONNECTING",
            Self::Open => "OPEN",
            Self::Closing => "CLOSING",
            Self::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

// ============================================================================
// AtomicReadyState
// ============================================================================

/// Lock-free ready state cell used by transports.
#[derive(Debug)]
pub struct AtomicReadyState(AtomicI8);

impl AtomicReadyState {
    /// Creates a cell holding `state`.
    #[inline]
    #[must_use]
    pub const fn new(state: ReadyState) -> Self {
        Self(AtomicI8::new(state.as_i8()))
    }

    /// Reads the current state.
    #[inline]
    pub fn load(&self) -> ReadyState {
        ReadyState::from_i8(self.0.load(Ordering::Acquire)).unwrap_or(ReadyState::Closed)
    }

    /// Overwrites the current state.
    #[inline]
    pub fn store(&self, state: ReadyState) {
        self.0.store(state.as_i8(), Ordering::Release);
    }

    /// Moves to `state` only if it is ahead of the current one.
    ///
    /// Returns `true` if the state changed.
    #[inline]
    pub fn advance(&self, state: ReadyState) -> bool {
        self.0.fetch_max(state.as_i8(), Ordering::AcqRel) < state.as_i8()
    }
}

impl Default for AtomicReadyState {
    fn default() -> Self {
        Self::new(ReadyState::Connecting)
    }
}

// ============================================================================
// Tests
// ============================================================================
