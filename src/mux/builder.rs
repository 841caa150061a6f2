//! Builder for multiplexer configuration.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use shared_socket::{HeaderPolicy, Multiplexer, TokioConnector};
//!
//! # fn example() -> shared_socket::Result<()> {
//! let mux = Multiplexer::builder()
//!     .connector(Arc::new(TokioConnector::new()))
//!     .header_policy(HeaderPolicy::default().with_origin("https://app.example"))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::transport::Connector;

use super::core::Multiplexer;
use super::factory::ConnectionFactory;
use super::platform::{HeaderPolicy, Platform};
use super::registry::Registry;

// ============================================================================
// MultiplexerBuilder
// ============================================================================

/// Builder for a [`Multiplexer`].
///
/// Use [`Multiplexer::builder()`] to create one.
#[derive(Default, Clone)]
pub struct MultiplexerBuilder {
    /// Host runtime constructor.
    connector: Option<Arc<dyn Connector>>,
    /// Host description, detected when unset.
    platform: Option<Platform>,
    /// Header defaults.
    policy: HeaderPolicy,
    /// Registry to share, fresh when unset.
    registry: Option<Registry>,
}

impl fmt::Debug for MultiplexerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiplexerBuilder")
            .field("connector", &self.connector.as_ref().map(|c| c.host_name().to_string()))
            .field("platform", &self.platform)
            .field("policy", &self.policy)
            .field("registry", &self.registry)
            .finish()
    }
}

// ============================================================================
// MultiplexerBuilder Implementation
// ============================================================================

impl MultiplexerBuilder {
    /// Creates an empty builder.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the connector used to build transports.
    #[inline]
    #[must_use]
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Overrides platform detection.
    #[inline]
    #[must_use]
    pub fn platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }

    /// Sets the header policy.
    #[inline]
    #[must_use]
    pub fn header_policy(mut self, policy: HeaderPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Shares an existing registry.
    ///
    /// Multiplexers built over one registry share connections.
    #[inline]
    #[must_use]
    pub fn registry(mut self, registry: Registry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Builds the multiplexer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if no connector was set.
    pub fn build(self) -> Result<Multiplexer> {
        let connector = self.connector.ok_or_else(|| {
            Error::config(
                "A connector is required. Use .connector() to set it.\n\
                 Example: Multiplexer::builder().connector(Arc::new(TokioConnector::new()))",
            )
        })?;

        let platform = self.platform.unwrap_or_else(Platform::detect);
        let factory = ConnectionFactory::new(connector, platform, self.policy);

        Ok(Multiplexer::new(factory, self.registry.unwrap_or_default()))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::mux::platform::{Host, Os};
    use crate::transport::MemoryConnector;

    #[test]
    fn test_new_creates_empty_builder() {
        let builder = MultiplexerBuilder::new();
        assert!(builder.connector.is_none());
        assert!(builder.platform.is_none());
        assert!(builder.registry.is_none());
    }

    #[test]
    fn test_build_requires_connector() {
        let result = MultiplexerBuilder::new().build();
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[test]
    fn test_build_with_overrides() {
        let registry = Registry::new();
        let platform = Platform::new(Os::Android, Host::Native);

        let mux = MultiplexerBuilder::new()
            .connector(Arc::new(MemoryConnector::new()))
            .platform(platform)
            .registry(registry.clone())
            .build()
            .expect("build");

        assert_eq!(mux.factory().platform(), platform);
        assert_eq!(mux.registry().connection_count(), registry.connection_count());
    }
}
