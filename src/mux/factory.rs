//! Connection factory.
//!
//! Turns an endpoint and an options snapshot into a [`ConnectionHandle`] in
//! `Connecting` state. Transport selection: stream options present means an
//! event stream, otherwise a socket.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use tracing::debug;

use crate::error::{Error, Result};
use crate::transport::{
    ConnectionHandle, Connector, Headers, SocketRequest, StreamRequest, TransportKind,
};

use super::options::Options;
use super::platform::{HeaderPolicy, Platform};

// ============================================================================
// ConnectionFactory
// ============================================================================

/// Builds connection handles through a [`Connector`].
#[derive(Clone)]
pub struct ConnectionFactory {
    /// Host runtime constructor.
    connector: Arc<dyn Connector>,
    /// Host description.
    platform: Platform,
    /// Header defaults.
    policy: HeaderPolicy,
}

impl ConnectionFactory {
    /// Creates a factory.
    #[must_use]
    pub fn new(connector: Arc<dyn Connector>, platform: Platform, policy: HeaderPolicy) -> Self {
        Self {
            connector,
            platform,
            policy,
        }
    }

    /// Returns the platform.
    #[inline]
    #[must_use]
    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Returns the header policy.
    #[inline]
    #[must_use]
    pub fn header_policy(&self) -> &HeaderPolicy {
        &self.policy
    }

    /// Returns the transport kind `options` select.
    #[inline]
    #[must_use]
    pub fn kind_for(options: &Options) -> TransportKind {
        if options.stream_options.is_some() {
            TransportKind::Stream
        } else {
            TransportKind::Socket
        }
    }

    /// Creates a new connection.
    ///
    /// # Errors
    ///
    /// - [`Error::UnsupportedTransport`] if an event stream is requested and
    ///   the host cannot open one
    /// - [`Error::ConnectionCreation`] if the connector fails
    pub fn create(&self, endpoint: &str, options: &Options) -> Result<ConnectionHandle> {
        let kind = Self::kind_for(options);

        let transport = match &options.stream_options {
            Some(stream_options) => {
                if !self.connector.supports_streams() {
                    return Err(Error::unsupported_transport(kind, self.connector.host_name()));
                }
                self.connector.connect_stream(StreamRequest {
                    endpoint,
                    options: stream_options,
                })
            }

            None => {
                let headers = self.prepare_headers(endpoint, options);
                self.connector.connect_socket(SocketRequest {
                    endpoint,
                    protocols: &options.protocols,
                    headers: headers.as_ref(),
                })
            }
        }
        .map_err(|e| Error::connection_creation(endpoint, e))?;

        let handle = ConnectionHandle::new(endpoint, kind, transport);
        debug!(endpoint, connection_id = %handle.id(), %kind, "Connection created");
        Ok(handle)
    }

    /// Returns the socket headers to pass, or `None` to omit the argument.
    #[must_use]
    pub fn prepare_headers(&self, endpoint: &str, options: &Options) -> Option<Headers> {
        if !self.connector.supports_headers() {
            return None;
        }

        let mut headers = options.headers.clone().unwrap_or_default();
        self.policy.apply(self.platform, endpoint, &mut headers);

        (!headers.is_empty()).then_some(headers)
    }
}

// ============================================================================
// Tests
// ============================================================================
