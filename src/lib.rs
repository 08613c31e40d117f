//! Feature-data synchronization engine for the FDv2 delta protocol.
//!
//! Keeps a client's local flag state current with a remote service over two
//! interchangeable transports, each available in a one-shot and a continuous
//! flavor:
//!
//! ```text
//!                  +-------------------+
//!   Requestor ---> |   PollingBase     | --> PollingInitializer (run once)
//!   (HTTP)         | (poll -> engine)  | --> PollingSynchronizer (loop)
//!                  +-------------------+
//!                  +-------------------+
//!   EventSource -> |  StreamingBase    | --> StreamingInitializer (run once)
//!   (persistent)   | (events ->engine) | --> StreamingSynchronizer (stream)
//!                  +-------------------+
//!                            |
//!                     protocol engine
//!              (server-intent / put / delete /
//!               payload-transferred assembly)
//! ```
//!
//! Both bases feed the same protocol engine and surface everything - payloads,
//! goodbyes, transport failures - through the uniform [`SourceResult`]
//! envelope, bridged from push to pull by [`AsyncQueue`]. The consuming data
//! manager loops `run()`/`next()`, applies change sets via [`mapper`], and
//! maps status results to connectivity state.
//!
//! Network mechanics (TLS, timeouts, reconnect backoff) are owned by the
//! injected [`Requestor`] and [`EventSource`] collaborators.

pub mod mapper;
pub mod polling;
pub mod protocol;
pub mod queue;
pub mod result;
pub mod streaming;
pub mod transport;

use async_trait::async_trait;

pub use mapper::{
    flag_eval_payload_to_item_descriptors, flag_eval_update_to_item_descriptor, kind_processors,
    ItemDescriptor, KIND_FLAG_EVAL,
};
pub use polling::{PollingInitializer, PollingSynchronizer, PollingSynchronizerConfig};
pub use protocol::{EngineAction, EventEngine, Goodbye, Payload, PayloadType, ProtocolError, Update};
pub use queue::AsyncQueue;
pub use result::{ErrorInfo, ErrorKind, SourceResult, StatusState};
pub use streaming::{
    PingHandler, StreamingBase, StreamingConfig, StreamingInitializer, StreamingSynchronizer,
};
pub use transport::{
    no_basis, BasisFn, ConnectParams, EventSource, EventSourceFactory, PollResponse, RequestError,
    Requestor, StreamError, StreamEvent,
};

/// One-shot data-source strategy: a single result, then done.
///
/// `run()` resolves exactly once per source. A `close()` before completion
/// races the in-flight run and resolves it with shutdown; running after a
/// close resolves immediately with shutdown.
#[async_trait]
pub trait Initializer: Send + Sync {
    async fn run(&self) -> SourceResult;

    /// Idempotent.
    fn close(&self);
}

/// Continuous data-source strategy: a result stream consumed by repeated
/// pulls from a single outstanding caller.
///
/// After `close()` the current or next `next()` resolves with shutdown and
/// every later call resolves immediately; no results are produced after a
/// terminal error or shutdown.
#[async_trait]
pub trait Synchronizer: Send + Sync {
    async fn next(&self) -> SourceResult;

    /// Idempotent.
    fn close(&self);
}
