//! Continuous polling driver.
//!
//! A worker task polls in a loop and buffers results; `next()` pulls them in
//! production order. Scheduling subtracts the elapsed poll duration from the
//! interval so requests never overlap.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::polling::base;
use crate::queue::AsyncQueue;
use crate::result::SourceResult;
use crate::transport::{BasisFn, Requestor};
use crate::Synchronizer;

#[derive(Debug, Clone)]
pub struct PollingSynchronizerConfig {
    /// Target spacing between poll starts.
    pub interval: Duration,
}

impl Default for PollingSynchronizerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
        }
    }
}

/// Continuous polling source. Polling starts immediately at construction; a
/// terminal error stops the loop for good, `close()` stops it and resolves
/// the consumer with shutdown.
pub struct PollingSynchronizer {
    queue: Arc<AsyncQueue<SourceResult>>,
    closed: watch::Sender<bool>,
    stopped: watch::Receiver<bool>,
}

impl PollingSynchronizer {
    pub fn new(
        requestor: Arc<dyn Requestor>,
        basis: BasisFn,
        config: PollingSynchronizerConfig,
    ) -> Self {
        let queue = Arc::new(AsyncQueue::new());
        let (closed, _) = watch::channel(false);
        let (stopped_tx, stopped) = watch::channel(false);

        tokio::spawn(poll_loop(
            requestor,
            basis,
            config,
            Arc::clone(&queue),
            closed.subscribe(),
            stopped_tx,
        ));

        Self {
            queue,
            closed,
            stopped,
        }
    }
}

async fn poll_loop(
    requestor: Arc<dyn Requestor>,
    basis: BasisFn,
    config: PollingSynchronizerConfig,
    queue: Arc<AsyncQueue<SourceResult>>,
    mut closed: watch::Receiver<bool>,
    stopped: watch::Sender<bool>,
) {
    loop {
        if *closed.borrow() {
            break;
        }

        let token = (basis)();
        let started = Instant::now();
        let result = base::poll(requestor.as_ref(), token.as_deref(), false).await;
        let elapsed = started.elapsed();

        if *closed.borrow() {
            // Stray in-flight result; the consumer has already been promised
            // shutdown.
            break;
        }

        let terminal = result.is_terminal();
        queue.put(result);

        if terminal {
            warn!("polling stopped by terminal error");
            stopped.send_replace(true);
            break;
        }

        let delay = config.interval.saturating_sub(elapsed);
        debug!(?elapsed, ?delay, "poll complete, next scheduled");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = closed.wait_for(|closed| *closed) => break,
        }
    }
}

#[async_trait]
impl Synchronizer for PollingSynchronizer {
    async fn next(&self) -> SourceResult {
        if *self.closed.borrow() {
            return SourceResult::shutdown();
        }
        // Buffered results win over a concurrent stop so a queued terminal
        // error is still delivered once.
        if let Some(result) = self.queue.try_take() {
            return result;
        }
        if *self.stopped.borrow() {
            return SourceResult::shutdown();
        }

        let mut closed = self.closed.subscribe();
        let mut stopped = self.stopped.clone();
        tokio::select! {
            // Biased: the loop queues its terminal result before resolving the
            // stop signal, so when both arms are ready the take must win or
            // that result is lost.
            biased;
            result = self.queue.take() => result,
            _ = closed.wait_for(|closed| *closed) => SourceResult::shutdown(),
            _ = stopped.wait_for(|stopped| *stopped) => SourceResult::shutdown(),
        }
    }

    fn close(&self) {
        self.closed.send_replace(true);
    }
}

// =============================================================================
// Tests
// =============================================================================
