//! Type-safe identifiers for connections and subscribers.
//!
//! Newtype wrappers prevent mixing a connection ID with a subscriber ID.
//! Both are process-unique, monotonically allocated and never zero.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

// ============================================================================
// Macro
// ============================================================================

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $counter:ident, $prefix:literal) => {
        static $counter: AtomicU64 = AtomicU64::new(1);

        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(NonZeroU64);

        impl $name {
            /// Allocates the next process-unique identifier.
            #[inline]
            #[must_use]
            pub fn next() -> Self {
                let raw = $counter.fetch_add(1, Ordering::Relaxed);
                Self(NonZeroU64::new(raw).unwrap_or(NonZeroU64::MIN))
            }

            /// Creates an identifier from a raw value.
            ///
            /// Returns `None` for zero.
            #[inline]
            #[must_use]
            pub fn from_u64(raw: u64) -> Option<Self> {
                NonZeroU64::new(raw).map(Self)
            }

            /// Returns the raw value.
            #[inline]
            #[must_use]
            pub const fn as_u64(self) -> u64 {
                self.0.get()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "-{}"), self.0)
            }
        }
    };
}

// ============================================================================
// Identifiers
// ============================================================================

define_id!(
    /// Identifies one physical connection.
    ///
    /// Two handles to the same endpoint created at different times have
    /// different IDs, which lets stale events be told apart from live ones.
    ConnectionId,
    NEXT_CONNECTION_ID,
    "conn"
);

define_id!(
    /// Identifies one subscriber record.
    SubscriberId,
    NEXT_SUBSCRIBER_ID,
    "sub"
);

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_is_unique() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn test_from_u64_rejects_zero() {
        assert!(SubscriberId::from_u64(0).is_none());
        assert_eq!(SubscriberId::from_u64(7).map(SubscriberId::as_u64), Some(7));
    }

    #[test]
    fn test_display() {
        let id = ConnectionId::from_u64(42).expect("non-zero");
        assert_eq!(id.to_string(), "conn-42");
    }
}
