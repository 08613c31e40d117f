//! One-shot polling driver.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::debug;

use crate::polling::base;
use crate::result::SourceResult;
use crate::transport::{BasisFn, Requestor};
use crate::Initializer;

/// Runs a single one-shot poll, racing it against `close()`. The in-flight
/// HTTP request is never cancelled, only discarded.
pub struct PollingInitializer {
    requestor: Arc<dyn Requestor>,
    basis: BasisFn,
    closed: watch::Sender<bool>,
    ran: AtomicBool,
}

impl PollingInitializer {
    pub fn new(requestor: Arc<dyn Requestor>, basis: BasisFn) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            requestor,
            basis,
            closed,
            ran: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Initializer for PollingInitializer {
    async fn run(&self) -> SourceResult {
        if *self.closed.borrow() || self.ran.swap(true, Ordering::SeqCst) {
            return SourceResult::shutdown();
        }

        // Read the selector fresh for this attempt.
        let basis = (self.basis)();
        let mut closed = self.closed.subscribe();

        tokio::select! {
            result = base::poll(self.requestor.as_ref(), basis.as_deref(), true) => result,
            _ = closed.wait_for(|closed| *closed) => {
                debug!("polling initializer closed mid-run");
                SourceResult::shutdown()
            }
        }
    }

    fn close(&self) {
        self.closed.send_replace(true);
    }
}

// =============================================================================
// Tests
// =============================================================================
