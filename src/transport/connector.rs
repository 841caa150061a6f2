//! Transport constructors.
//!
//! A [`Connector`] is the host runtime's way of building physical
//! connections. The multiplexer's factory decides *what* to build (socket or
//! stream, which headers); the connector decides *how*.
//!
//! [`TokioConnector`] is the production connector. Tests and embedders use
//! [`MemoryConnector`](super::MemoryConnector).

// ============================================================================
// Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use url::Url;

use crate::error::{Error, Result};

use super::{SocketTransport, Transport};

// ============================================================================
// Types
// ============================================================================

/// Header name → value mapping.
///
/// Names are compared case-insensitively by the header policy.
pub type Headers = BTreeMap<String, String>;

/// Returns `true` if `headers` contains `name`, ignoring ASCII case.
#[inline]
#[must_use]
pub fn has_header(headers: &Headers, name: &str) -> bool {
    headers.keys().any(|key| key.eq_ignore_ascii_case(name))
}

// ============================================================================
// StreamOptions
// ============================================================================

/// Options for event-stream connections.
///
/// Presence of these options on a subscriber selects the stream transport.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StreamOptions {
    /// Extra request headers.
    pub headers: Headers,

    /// Resume point sent as `Last-Event-ID`.
    pub last_event_id: Option<String>,
}

impl StreamOptions {
    /// Creates empty stream options.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a request header.
    #[inline]
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Sets the resume point.
    #[inline]
    #[must_use]
    pub fn with_last_event_id(mut self, id: impl Into<String>) -> Self {
        self.last_event_id = Some(id.into());
        self
    }
}

// ============================================================================
// Requests
// ============================================================================

/// Parameters for a WebSocket connection.
#[derive(Debug, Clone, Copy)]
pub struct SocketRequest<'a> {
    /// Target URL.
    pub endpoint: &'a str,
    /// Requested subprotocols, in preference order.
    pub protocols: &'a [String],
    /// Handshake headers. `None` means the argument is omitted entirely.
    pub headers: Option<&'a Headers>,
}

/// Parameters for an event-stream connection.
#[derive(Debug, Clone, Copy)]
pub struct StreamRequest<'a> {
    /// Target URL.
    pub endpoint: &'a str,
    /// Stream options.
    pub options: &'a StreamOptions,
}

// ============================================================================
// Connector
// ============================================================================

/// Builds physical connections for the host runtime.
///
/// Constructors must not perform I/O or emit events; transports start when
/// their first listener is installed.
pub trait Connector: Send + Sync {
    /// Returns `true` if the host can open event streams.
    fn supports_streams(&self) -> bool;

    /// Returns `true` if socket constructors accept handshake headers.
    fn supports_headers(&self) -> bool {
        true
    }

    /// Describes the host for error messages.
    fn host_name(&self) -> &str {
        "this runtime"
    }

    /// Builds a WebSocket transport in `Connecting` state.
    ///
    /// # Errors
    ///
    /// Any error; the factory reports it as a creation failure.
    fn connect_socket(&self, request: SocketRequest<'_>) -> Result<Arc<dyn Transport>>;

    /// Builds an event-stream transport in `Connecting` state.
    ///
    /// # Errors
    ///
    /// Any error; the factory reports it as a creation failure.
    fn connect_stream(&self, request: StreamRequest<'_>) -> Result<Arc<dyn Transport>>;
}

// ============================================================================
// TokioConnector
// ============================================================================

/// Connector backed by tokio-tungstenite and (with `event-stream`) reqwest.
///
/// I/O tasks are spawned on the configured runtime, or on the runtime that is
/// current when a connection is created.
#[derive(Debug, Clone, Default)]
pub struct TokioConnector {
    /// Runtime for I/O tasks.
    runtime: Option<Handle>,
    /// HTTP client for event streams.
    #[cfg(feature = "event-stream")]
    client: Option<reqwest::Client>,
}

impl TokioConnector {
    /// Creates a connector that uses the current runtime.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pins I/O tasks to `runtime`.
    #[inline]
    #[must_use]
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Uses `client` for event streams.
    #[cfg(feature = "event-stream")]
    #[inline]
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Resolves the runtime for a new connection.
    fn runtime(&self) -> Result<Handle> {
        match &self.runtime {
            Some(runtime) => Ok(runtime.clone()),
            None => Handle::try_current()
                .map_err(|e| Error::config(format!("No tokio runtime available: {e}"))),
        }
    }
}

impl Connector for TokioConnector {
    fn supports_streams(&self) -> bool {
        cfg!(feature = "event-stream")
    }

    fn host_name(&self) -> &str {
        if cfg!(feature = "event-stream") {
            "this runtime"
        } else {
            "builds without the `event-stream` feature"
        }
    }

    fn connect_socket(&self, request: SocketRequest<'_>) -> Result<Arc<dyn Transport>> {
        parse_endpoint(request.endpoint, &["ws", "wss"])?;
        let runtime = self.runtime()?;
        Ok(Arc::new(SocketTransport::new(runtime, request)?))
    }

    #[cfg(feature = "event-stream")]
    fn connect_stream(&self, request: StreamRequest<'_>) -> Result<Arc<dyn Transport>> {
        let url = parse_endpoint(request.endpoint, &["http", "https"])?;
        let runtime = self.runtime()?;
        let client = self.client.clone().unwrap_or_default();
        Ok(Arc::new(super::StreamTransport::new(
            runtime,
            client,
            url,
            request.options,
        )?))
    }

    #[cfg(not(feature = "event-stream"))]
    fn connect_stream(&self, _request: StreamRequest<'_>) -> Result<Arc<dyn Transport>> {
        Err(Error::unsupported_transport(
            super::TransportKind::Stream,
            self.host_name(),
        ))
    }
}

/// Parses `endpoint` and checks its scheme.
fn parse_endpoint(endpoint: &str, schemes: &[&str]) -> Result<Url> {
    let url = Url::parse(endpoint)
        .map_err(|e| Error::config(format!("Invalid endpoint URL {endpoint:?}: {e}")))?;

    if !schemes.contains(&url.scheme()) {
        return Err(Error::config(format!(
            "Unsupported URL scheme {:?} for {endpoint}, expected one of {schemes:?}",
            url.scheme()
        )));
    }

    Ok(url)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_header_ignores_case() {
        let mut headers = Headers::new();
        headers.insert("user-agent".into(), "x".into());
        assert!(has_header(&headers, "User-Agent"));
        assert!(!has_header(&headers, "Origin"));
    }

    #[test]
    fn test_parse_endpoint_checks_scheme() {
        assert!(parse_endpoint("wss://feed.example/ws", &["ws", "wss"]).is_ok());
        assert!(parse_endpoint("https://feed.example/ws", &["ws", "wss"]).is_err());
        assert!(parse_endpoint("not a url", &["ws"]).is_err());
    }

    #[test]
    fn test_socket_without_runtime_fails() {
        let connector = TokioConnector::new();
        let request = SocketRequest {
            endpoint: "ws://127.0.0.1:9/",
            protocols: &[],
            headers: None,
        };
        let err = connector.connect_socket(request).err().expect("no runtime");
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_stream_options_serde() {
        let options = StreamOptions::new().with_last_event_id("41");
        let json = serde_json::to_string(&options).expect("serialize");
        assert_eq!(json, r#"{"headers":{},"lastEventId":"41"}"#);
    }
}
