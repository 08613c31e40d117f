//! Polling transport: one HTTP request per cycle through the protocol engine.
//!
//! `base` turns a single poll into a [`crate::SourceResult`]; the initializer
//! runs exactly one, the synchronizer loops with overlap-free scheduling.

pub mod base;
pub mod initializer;
pub mod synchronizer;

pub use base::poll;
pub use initializer::PollingInitializer;
pub use synchronizer::{PollingSynchronizer, PollingSynchronizerConfig};
