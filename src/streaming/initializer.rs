//! One-shot streaming driver.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::result::SourceResult;
use crate::streaming::base::StreamingBase;
use crate::Initializer;

/// Opens the stream, takes the first result, and immediately tears the
/// connection down; a one-shot source never consumes more than one result.
pub struct StreamingInitializer {
    base: Arc<StreamingBase>,
    ran: AtomicBool,
}

impl StreamingInitializer {
    pub fn new(base: StreamingBase) -> Self {
        Self {
            base: Arc::new(base),
            ran: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Initializer for StreamingInitializer {
    async fn run(&self) -> SourceResult {
        if self.base.is_closed() || self.ran.swap(true, Ordering::SeqCst) {
            return SourceResult::shutdown();
        }

        self.base.start();
        // close() queues a shutdown result, so a close racing this take
        // resolves it promptly; the stopped arm covers a reader that exits
        // without producing anything.
        let mut stopped = self.base.stopped_signal();
        let result = tokio::select! {
            biased;
            result = self.base.take_result() => result,
            _ = stopped.wait_for(|stopped| *stopped) => SourceResult::shutdown(),
        };
        self.base.close();
        result
    }

    fn close(&self) {
        self.base.close();
    }
}
