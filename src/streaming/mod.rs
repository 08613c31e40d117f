//! Streaming transport: one persistent event connection per base.
//!
//! The base owns the connection and the protocol engine and bridges their
//! push-style events into a pull-style result queue; the initializer consumes
//! exactly one result, the synchronizer a stream of them.

pub mod base;
pub mod initializer;
pub mod synchronizer;

#[cfg(test)]
pub(crate) mod testutil;

pub use base::{PingHandler, StreamingBase, StreamingConfig};
pub use initializer::StreamingInitializer;
pub use synchronizer::StreamingSynchronizer;
