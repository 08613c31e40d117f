//! Collaborator seams for the two transports.
//!
//! The engine never opens sockets itself: polling goes through an injected
//! [`Requestor`] and streaming through an [`EventSource`] built by an injected
//! factory. TLS, timeouts, and retry backoff all live behind these traits.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

/// Header carrying the legacy-protocol fallback signal.
pub const HEADER_FDV1_FALLBACK: &str = "x-ld-fd-fallback";

/// Header carrying the environment id for diagnostics.
pub const HEADER_ENVIRONMENT_ID: &str = "x-ld-envid";

/// Query parameter carrying the resumption token.
pub const QUERY_BASIS: &str = "basis";

/// Selector for the resumption basis. Read immediately before each request so
/// a transfer completed elsewhere is picked up by the next one.
pub type BasisFn = Arc<dyn Fn() -> Option<String> + Send + Sync>;

/// A basis selector that never yields a token.
pub fn no_basis() -> BasisFn {
    Arc::new(|| None)
}

// =============================================================================
// Polling collaborator
// =============================================================================

/// Failure of the request itself, before any HTTP status exists.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct RequestError {
    pub message: String,
}

impl RequestError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Raw response from the polling endpoint.
#[derive(Debug, Clone, Default)]
pub struct PollResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl PollResponse {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        header_lookup(&self.headers, name)
    }
}

/// HTTP collaborator for the polling transport. One call per poll; the
/// `basis` resumption token is appended as a query parameter when present.
#[async_trait]
pub trait Requestor: Send + Sync {
    async fn poll(&self, basis: Option<&str>) -> Result<PollResponse, RequestError>;
}

// =============================================================================
// Streaming collaborator
// =============================================================================

/// Connection parameters handed to the event-source factory.
#[derive(Debug, Clone, Default)]
pub struct ConnectParams {
    pub headers: HashMap<String, String>,
    pub initial_retry_delay_millis: u64,
    pub read_timeout_millis: u64,
    pub retry_reset_interval_millis: u64,
}

/// A connection-level failure reported by the event source.
#[derive(Debug, Clone)]
pub struct StreamError {
    /// HTTP status of the failed connection attempt, if one was received.
    pub status: Option<u16>,
    pub headers: HashMap<String, String>,
    pub message: String,
}

impl StreamError {
    pub fn header(&self, name: &str) -> Option<&str> {
        header_lookup(&self.headers, name)
    }
}

/// What a persistent connection yields, one event at a time.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// The connection (re)opened.
    Opened,
    /// A named event with its raw data body.
    Message { name: String, data: String },
    /// A connection attempt or the connection itself failed. The source
    /// applies its own backoff and reconnects unless it is closed.
    Failed(StreamError),
    /// The source will produce no further events.
    Closed,
}

/// One persistent event connection. Reconnect backoff is owned by the
/// implementation; the caller only decides whether to keep reading or close.
#[async_trait]
pub trait EventSource: Send {
    async fn next_event(&mut self) -> StreamEvent;

    fn close(&mut self);
}

/// Builds event sources. Injected so tests and alternative transports can
/// supply their own connections.
pub trait EventSourceFactory: Send + Sync {
    fn create(&self, uri: &str, params: &ConnectParams) -> Box<dyn EventSource>;
}

// =============================================================================
// Helpers
// =============================================================================

fn header_lookup<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// Interprets the fallback header: present and "true" means fall back.
pub(crate) fn fallback_from_header(value: Option<&str>) -> Option<bool> {
    value.map(|v| v.eq_ignore_ascii_case("true"))
}

/// Recoverable HTTP statuses: request timeout, rate limiting, server errors,
/// and status 0 (no response received).
pub(crate) fn is_recoverable_status(status: u16) -> bool {
    matches!(status, 0 | 408 | 429) || status >= 500
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_lookup_case_insensitive() {
        let mut response = PollResponse::default();
        response
            .headers
            .insert("X-LD-EnvID".to_string(), "env-1".to_string());
        assert_eq!(response.header("x-ld-envid"), Some("env-1"));
        assert_eq!(response.header("x-ld-fd-fallback"), None);
    }

    #[test]
    fn test_fallback_header_parsing() {
        assert_eq!(fallback_from_header(None), None);
        assert_eq!(fallback_from_header(Some("true")), Some(true));
        assert_eq!(fallback_from_header(Some("TRUE")), Some(true));
        assert_eq!(fallback_from_header(Some("false")), Some(false));
    }

    #[test]
    fn test_recoverable_statuses() {
        for status in [0, 408, 429, 500, 503, 599] {
            assert!(is_recoverable_status(status), "{status} should be recoverable");
        }
        for status in [400, 401, 403, 404] {
            assert!(!is_recoverable_status(status), "{status} should be terminal");
        }
    }
}
