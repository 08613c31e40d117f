//! Persistent-connection manager for the streaming transport.
//!
//! A reader task pulls events off the injected connection, runs them through
//! the protocol engine, and queues translated results. Reconnect backoff is
//! owned by the connection; this layer only classifies failures and decides
//! whether the connection keeps living.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::protocol::{EngineAction, EventEngine};
use crate::queue::AsyncQueue;
use crate::result::{ErrorInfo, SourceResult};
use crate::transport::{
    fallback_from_header, is_recoverable_status, BasisFn, ConnectParams, EventSource,
    EventSourceFactory, RequestError, StreamError, StreamEvent, HEADER_FDV1_FALLBACK, QUERY_BASIS,
};

/// Legacy event instructing the client to run a one-shot poll.
pub const EVENT_NAME_PING: &str = "ping";

#[derive(Debug, Clone)]
pub struct StreamingConfig {
    /// Streaming endpoint; the `basis` query parameter is appended when a
    /// resumption token exists.
    pub uri: String,
    pub headers: std::collections::HashMap<String, String>,
    pub initial_retry_delay_millis: u64,
    pub read_timeout_millis: u64,
    pub retry_reset_interval_millis: u64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            uri: String::new(),
            headers: std::collections::HashMap::new(),
            initial_retry_delay_millis: 1_000,
            read_timeout_millis: 300_000,
            retry_reset_interval_millis: 60_000,
        }
    }
}

/// Reaction to a legacy `ping`: expected to run a one-shot poll and report
/// its result. A transport-level failure is reported as `Err`.
#[async_trait]
pub trait PingHandler: Send + Sync {
    async fn on_ping(&self) -> Result<SourceResult, RequestError>;
}

/// Manages one persistent event connection and feeds its events through the
/// protocol engine into a result queue.
pub struct StreamingBase {
    factory: Arc<dyn EventSourceFactory>,
    config: StreamingConfig,
    basis: BasisFn,
    ping_handler: Option<Arc<dyn PingHandler>>,
    queue: Arc<AsyncQueue<SourceResult>>,
    closed: watch::Sender<bool>,
    // Sender handed to the reader task on start; set once the reader exits
    // and no further results will ever be produced.
    stopped_tx: Mutex<Option<watch::Sender<bool>>>,
    stopped: watch::Receiver<bool>,
    started: AtomicBool,
}

impl StreamingBase {
    pub fn new(
        factory: Arc<dyn EventSourceFactory>,
        config: StreamingConfig,
        basis: BasisFn,
        ping_handler: Option<Arc<dyn PingHandler>>,
    ) -> Self {
        let (stopped_tx, stopped) = watch::channel(false);
        Self {
            factory,
            config,
            basis,
            ping_handler,
            queue: Arc::new(AsyncQueue::new()),
            closed: watch::channel(false).0,
            stopped_tx: Mutex::new(Some(stopped_tx)),
            stopped,
            started: AtomicBool::new(false),
        }
    }

    /// Opens the connection and spawns the reader task. No-op once started
    /// or closed.
    pub fn start(&self) {
        if *self.closed.borrow() || self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        // The started guard makes this the only pass through here.
        let Some(stopped) = self.stopped_tx.lock().expect("stopped lock poisoned").take() else {
            return;
        };

        let uri = compute_uri(&self.config.uri, (self.basis)());
        let params = ConnectParams {
            headers: self.config.headers.clone(),
            initial_retry_delay_millis: self.config.initial_retry_delay_millis,
            read_timeout_millis: self.config.read_timeout_millis,
            retry_reset_interval_millis: self.config.retry_reset_interval_millis,
        };
        debug!(%uri, "opening stream");
        let source = self.factory.create(&uri, &params);

        tokio::spawn(read_loop(
            source,
            Arc::clone(&self.queue),
            self.closed.subscribe(),
            self.ping_handler.clone(),
            stopped,
        ));
    }

    /// Next queued result, in production order.
    pub async fn take_result(&self) -> SourceResult {
        self.queue.take().await
    }

    pub fn try_take_result(&self) -> Option<SourceResult> {
        self.queue.try_take()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// True once the reader task has exited; no further results will arrive.
    pub fn is_stopped(&self) -> bool {
        *self.stopped.borrow()
    }

    pub(crate) fn stopped_signal(&self) -> watch::Receiver<bool> {
        self.stopped.clone()
    }

    /// Signals the reader task to close the transport and queues `shutdown`
    /// exactly once. Idempotent.
    pub fn close(&self) {
        let was_closed = self.closed.send_replace(true);
        if !was_closed {
            self.queue.put(SourceResult::shutdown());
        }
    }
}

async fn read_loop(
    mut source: Box<dyn EventSource>,
    queue: Arc<AsyncQueue<SourceResult>>,
    mut closed: watch::Receiver<bool>,
    ping_handler: Option<Arc<dyn PingHandler>>,
    stopped: watch::Sender<bool>,
) {
    let mut engine = EventEngine::new();
    let mut attempt_started = Instant::now();

    loop {
        let event = tokio::select! {
            event = source.next_event() => event,
            _ = closed.wait_for(|closed| *closed) => {
                source.close();
                break;
            }
        };
        if *closed.borrow() {
            // Raced with close(); discard whatever arrived.
            source.close();
            break;
        }

        match event {
            StreamEvent::Opened => {
                debug!(elapsed = ?attempt_started.elapsed(), "stream connection opened");
                // Never stitch a half-received transfer across a reconnect.
                engine.reset();
            }
            StreamEvent::Message { name, data } => {
                if name == EVENT_NAME_PING {
                    handle_ping(&ping_handler, &queue, &closed);
                } else {
                    handle_message(&mut engine, &queue, &name, &data);
                }
            }
            StreamEvent::Failed(error) => {
                attempt_started = Instant::now();
                if classify_failure(&queue, error) == FailureOutcome::Stop {
                    source.close();
                    break;
                }
            }
            StreamEvent::Closed => {
                debug!("stream source closed");
                break;
            }
        }
    }

    // Any queued result (terminal error, shutdown) is still consumable; the
    // signal only resolves takes that would otherwise pend forever.
    stopped.send_replace(true);
}

fn handle_message(
    engine: &mut EventEngine,
    queue: &AsyncQueue<SourceResult>,
    name: &str,
    data: &str,
) {
    // Liveness events may carry an empty data body.
    let data: Value = if data.is_empty() {
        Value::Null
    } else {
        match serde_json::from_str(data) {
            Ok(data) => data,
            Err(e) => {
                queue.put(SourceResult::interrupted(ErrorInfo::from_invalid_data(
                    format!("malformed data in '{name}' event: {e}"),
                )));
                return;
            }
        }
    };

    match engine.handle_event(name, &data) {
        EngineAction::Payload(payload) => {
            debug!(
                payload_id = %payload.id,
                updates = payload.updates.len(),
                "stream payload received"
            );
            queue.put(SourceResult::change_set(payload));
        }
        EngineAction::Goodbye(goodbye) => {
            queue.put(SourceResult::goodbye(goodbye.reason));
        }
        EngineAction::ServerError { reason } => {
            queue.put(SourceResult::interrupted(ErrorInfo::from_unknown(reason)));
        }
        EngineAction::Error(e) if e.is_actionable() => {
            queue.put(SourceResult::interrupted(ErrorInfo::from_invalid_data(
                e.to_string(),
            )));
        }
        // Heart-beats, accumulated objects, unknown events.
        EngineAction::Error(_) | EngineAction::None => {}
    }
}

fn handle_ping(
    ping_handler: &Option<Arc<dyn PingHandler>>,
    queue: &Arc<AsyncQueue<SourceResult>>,
    closed: &watch::Receiver<bool>,
) {
    let Some(handler) = ping_handler else {
        warn!("received ping but no ping handler is configured");
        return;
    };
    let handler = Arc::clone(handler);
    let queue = Arc::clone(queue);
    let closed = closed.clone();
    tokio::spawn(async move {
        let result = match handler.on_ping().await {
            Ok(result) => result,
            Err(e) => SourceResult::interrupted(ErrorInfo::from_network_error(e.to_string())),
        };
        if !*closed.borrow() {
            queue.put(result);
        }
    });
}

#[derive(Debug, PartialEq, Eq)]
enum FailureOutcome {
    /// The connection keeps retrying with its own backoff.
    Retry,
    /// The connection must not be retried.
    Stop,
}

/// The error-filter role: the fallback header always wins, then retryability
/// of the HTTP status decides between interruption and termination.
fn classify_failure(queue: &AsyncQueue<SourceResult>, error: StreamError) -> FailureOutcome {
    if fallback_from_header(error.header(HEADER_FDV1_FALLBACK)) == Some(true) {
        warn!("stream received fallback signal, switching to legacy protocol");
        queue.put(
            SourceResult::terminal_error(ErrorInfo::from_unknown(
                "service requested fallback to the legacy protocol",
            ))
            .with_fallback(Some(true)),
        );
        return FailureOutcome::Stop;
    }

    match error.status {
        Some(status) if !is_recoverable_status(status) => {
            warn!(status, "stream connection failed permanently");
            queue.put(SourceResult::terminal_error(ErrorInfo::from_http_error(
                status,
                error.message,
            )));
            FailureOutcome::Stop
        }
        Some(status) => {
            debug!(status, "stream connection interrupted, will retry");
            queue.put(SourceResult::interrupted(ErrorInfo::from_http_error(
                status,
                error.message,
            )));
            FailureOutcome::Retry
        }
        None => {
            debug!(message = %error.message, "stream network error, will retry");
            queue.put(SourceResult::interrupted(ErrorInfo::from_network_error(
                error.message,
            )));
            FailureOutcome::Retry
        }
    }
}

fn compute_uri(base: &str, basis: Option<String>) -> String {
    match basis {
        Some(token) => {
            let separator = if base.contains('?') { '&' } else { '?' };
            format!(
                "{base}{separator}{QUERY_BASIS}={}",
                encode_query_value(&token)
            )
        }
        None => base.to_string(),
    }
}

/// Minimal percent-encoding for an opaque token in a query value.
fn encode_query_value(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char);
            }
            _ => {
                encoded.push('%');
                encoded.push_str(&format!("{byte:02X}"));
            }
        }
    }
    encoded
}

// =============================================================================
// Tests
// =============================================================================
