//! Continuous streaming driver.

use std::sync::Arc;

use async_trait::async_trait;

use crate::result::SourceResult;
use crate::streaming::base::StreamingBase;
use crate::Synchronizer;

/// Pull interface over a lazily-opened persistent connection. The connection
/// is created on the first `next()` and reused for every later call.
pub struct StreamingSynchronizer {
    base: Arc<StreamingBase>,
}

impl StreamingSynchronizer {
    pub fn new(base: StreamingBase) -> Self {
        Self {
            base: Arc::new(base),
        }
    }
}

#[async_trait]
impl Synchronizer for StreamingSynchronizer {
    async fn next(&self) -> SourceResult {
        if self.base.is_closed() {
            return SourceResult::shutdown();
        }
        self.base.start();

        // Buffered results win over a concurrent stop so a queued terminal
        // error is still delivered once.
        if let Some(result) = self.base.try_take_result() {
            return result;
        }
        if self.base.is_stopped() {
            return SourceResult::shutdown();
        }

        let mut stopped = self.base.stopped_signal();
        tokio::select! {
            // Biased: the reader queues its last result before resolving the
            // stop signal, so when both arms are ready the take must win.
            biased;
            result = self.base.take_result() => result,
            _ = stopped.wait_for(|stopped| *stopped) => SourceResult::shutdown(),
        }
    }

    fn close(&self) {
        self.base.close();
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::{ErrorKind, StatusState};
    use crate::streaming::base::{PingHandler, StreamingBase, StreamingConfig};
    use crate::streaming::testutil::CountingFactory;
    use crate::transport::{no_basis, BasisFn, RequestError, StreamError, StreamEvent};
    use std::collections::HashMap;
    use std::time::Duration;

    fn message(name: &str, data: &str) -> StreamEvent {
        StreamEvent::Message {
            name: name.to_string(),
            data: data.to_string(),
        }
    }

    fn full_transfer_script() -> Vec<StreamEvent> {
        vec![
            StreamEvent::Opened,
            message(
                "server-intent",
                r#"{"payloads":[{"id":"p1","target":1,"intentCode":"xfer-full","reason":"t"}]}"#,
            ),
            message(
                "put-object",
                r#"{"kind":"flagEval","key":"flagA","version":1,"object":{"value":true}}"#,
            ),
            message("payload-transferred", r#"{"state":"s1","version":1}"#),
        ]
    }

    fn synchronizer_with(
        factory: Arc<CountingFactory>,
        basis: BasisFn,
        ping_handler: Option<Arc<dyn PingHandler>>,
    ) -> StreamingSynchronizer {
        let config = StreamingConfig {
            uri: "https://stream.example/fdv2".to_string(),
            ..Default::default()
        };
        StreamingSynchronizer::new(StreamingBase::new(factory, config, basis, ping_handler))
    }

    #[tokio::test]
    async fn test_lazy_single_connection() {
        let factory = CountingFactory::new(full_transfer_script());
        let synchronizer = synchronizer_with(factory.clone(), no_basis(), None);

        // No connection until the first next().
        assert_eq!(factory.created(), 0);

        let first = synchronizer.next().await;
        assert!(matches!(first, SourceResult::ChangeSet { .. }));
        assert_eq!(factory.created(), 1);

        // A pending second next() must not open a second connection.
        tokio::select! {
            _ = synchronizer.next() => panic!("no further results scripted"),
            _ = tokio::time::sleep(Duration::from_millis(20)) => {}
        }
        assert_eq!(factory.created(), 1);
        synchronizer.close();
    }

    #[tokio::test]
    async fn test_close_resolves_next_and_closes_connection_once() {
        let factory = CountingFactory::new(vec![StreamEvent::Opened]);
        let synchronizer = Arc::new(synchronizer_with(factory.clone(), no_basis(), None));

        let pending = {
            let synchronizer = Arc::clone(&synchronizer);
            tokio::spawn(async move { synchronizer.next().await })
        };
        tokio::task::yield_now().await;
        synchronizer.close();
        synchronizer.close();

        assert!(pending.await.unwrap().is_shutdown());
        assert!(synchronizer.next().await.is_shutdown());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(factory.close_count(), 1);
    }

    #[tokio::test]
    async fn test_basis_appended_to_stream_uri() {
        let factory = CountingFactory::new(full_transfer_script());
        let basis: BasisFn = Arc::new(|| Some("token-1".to_string()));
        let synchronizer = synchronizer_with(factory.clone(), basis, None);

        let _ = synchronizer.next().await;
        assert_eq!(
            factory.last_uri().as_deref(),
            Some("https://stream.example/fdv2?basis=token-1")
        );
        synchronizer.close();
    }

    #[tokio::test]
    async fn test_fallback_header_forces_terminal() {
        let mut headers = HashMap::new();
        headers.insert("x-ld-fd-fallback".to_string(), "true".to_string());
        let factory = CountingFactory::new(vec![StreamEvent::Failed(StreamError {
            // Even a retryable status must not be retried under fallback.
            status: Some(503),
            headers,
            message: "unavailable".to_string(),
        })]);
        let synchronizer = synchronizer_with(factory.clone(), no_basis(), None);

        let result = synchronizer.next().await;
        assert!(result.is_terminal());
        assert_eq!(result.fdv1_fallback(), Some(true));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(factory.close_count(), 1);
        synchronizer.close();
    }

    #[tokio::test]
    async fn test_retryable_failure_interrupts_and_keeps_reading() {
        let mut script = vec![StreamEvent::Failed(StreamError {
            status: Some(503),
            headers: HashMap::new(),
            message: "bad gateway".to_string(),
        })];
        script.extend(full_transfer_script());
        let factory = CountingFactory::new(script);
        let synchronizer = synchronizer_with(factory.clone(), no_basis(), None);

        match synchronizer.next().await {
            SourceResult::Status {
                state, error_info, ..
            } => {
                assert_eq!(state, StatusState::Interrupted);
                assert_eq!(error_info.unwrap().status_code, Some(503));
            }
            other => panic!("expected interruption, got {other:?}"),
        }
        // The same connection recovers and delivers the payload.
        assert!(matches!(
            synchronizer.next().await,
            SourceResult::ChangeSet { .. }
        ));
        assert_eq!(factory.created(), 1);
        synchronizer.close();
    }

    #[tokio::test]
    async fn test_unauthorized_failure_terminal() {
        let factory = CountingFactory::new(vec![StreamEvent::Failed(StreamError {
            status: Some(401),
            headers: HashMap::new(),
            message: "unauthorized".to_string(),
        })]);
        let synchronizer = synchronizer_with(factory.clone(), no_basis(), None);

        let result = synchronizer.next().await;
        assert!(result.is_terminal());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(factory.close_count(), 1);
        synchronizer.close();
    }

    #[tokio::test]
    async fn test_next_after_terminal_resolves_shutdown() {
        let factory = CountingFactory::new(vec![StreamEvent::Failed(StreamError {
            status: Some(401),
            headers: HashMap::new(),
            message: "unauthorized".to_string(),
        })]);
        let synchronizer = synchronizer_with(factory.clone(), no_basis(), None);

        assert!(synchronizer.next().await.is_terminal());
        // The reader has exited; further calls must not pend forever.
        assert!(synchronizer.next().await.is_shutdown());
        assert!(synchronizer.next().await.is_shutdown());
        synchronizer.close();
    }

    #[tokio::test]
    async fn test_source_closed_resolves_shutdown() {
        let factory =
            CountingFactory::new(vec![StreamEvent::Opened, StreamEvent::Closed]);
        let synchronizer = synchronizer_with(factory.clone(), no_basis(), None);

        assert!(synchronizer.next().await.is_shutdown());
        synchronizer.close();
    }

    #[tokio::test]
    async fn test_malformed_event_data_interrupts() {
        let factory = CountingFactory::new(vec![
            StreamEvent::Opened,
            message("server-intent", "{not json"),
        ]);
        let synchronizer = synchronizer_with(factory.clone(), no_basis(), None);

        match synchronizer.next().await {
            SourceResult::Status {
                state, error_info, ..
            } => {
                assert_eq!(state, StatusState::Interrupted);
                assert_eq!(error_info.unwrap().kind, ErrorKind::InvalidData);
            }
            other => panic!("expected interruption, got {other:?}"),
        }
        synchronizer.close();
    }

    #[tokio::test]
    async fn test_goodbye_queued() {
        let factory = CountingFactory::new(vec![
            StreamEvent::Opened,
            message("goodbye", r#"{"reason":"maintenance","silent":true}"#),
        ]);
        let synchronizer = synchronizer_with(factory.clone(), no_basis(), None);

        match synchronizer.next().await {
            SourceResult::Status { state, reason, .. } => {
                assert_eq!(state, StatusState::Goodbye);
                assert_eq!(reason.as_deref(), Some("maintenance"));
            }
            other => panic!("expected goodbye, got {other:?}"),
        }
        synchronizer.close();
    }

    struct FixedPingHandler {
        result: Result<SourceResult, RequestError>,
    }

    #[async_trait]
    impl PingHandler for FixedPingHandler {
        async fn on_ping(&self) -> Result<SourceResult, RequestError> {
            self.result.clone()
        }
    }

    #[tokio::test]
    async fn test_ping_invokes_handler() {
        let factory = CountingFactory::new(vec![StreamEvent::Opened, message("ping", "")]);
        let handler: Arc<dyn PingHandler> = Arc::new(FixedPingHandler {
            result: Ok(SourceResult::change_set(crate::protocol::Payload::none())),
        });
        let synchronizer = synchronizer_with(factory.clone(), no_basis(), Some(handler));

        assert!(matches!(
            synchronizer.next().await,
            SourceResult::ChangeSet { .. }
        ));
        synchronizer.close();
    }

    #[tokio::test]
    async fn test_ping_handler_failure_interrupts() {
        let factory = CountingFactory::new(vec![StreamEvent::Opened, message("ping", "")]);
        let handler: Arc<dyn PingHandler> = Arc::new(FixedPingHandler {
            result: Err(RequestError::new("poll failed")),
        });
        let synchronizer = synchronizer_with(factory.clone(), no_basis(), Some(handler));

        match synchronizer.next().await {
            SourceResult::Status {
                state, error_info, ..
            } => {
                assert_eq!(state, StatusState::Interrupted);
                assert_eq!(error_info.unwrap().kind, ErrorKind::NetworkError);
            }
            other => panic!("expected interruption, got {other:?}"),
        }
        synchronizer.close();
    }

    #[tokio::test]
    async fn test_ping_without_handler_dropped() {
        let mut script = vec![StreamEvent::Opened, message("ping", "")];
        script.extend(full_transfer_script());
        let factory = CountingFactory::new(script);
        let synchronizer = synchronizer_with(factory.clone(), no_basis(), None);

        // The ping produces nothing; the transfer payload is the first result.
        assert!(matches!(
            synchronizer.next().await,
            SourceResult::ChangeSet { .. }
        ));
        synchronizer.close();
    }

    #[tokio::test]
    async fn test_reconnect_resets_engine() {
        let factory = CountingFactory::new(vec![
            StreamEvent::Opened,
            message(
                "server-intent",
                r#"{"payloads":[{"id":"p1","target":1,"intentCode":"xfer-full","reason":"t"}]}"#,
            ),
            message(
                "put-object",
                r#"{"kind":"flagEval","key":"half","version":1,"object":{}}"#,
            ),
            // Reconnect mid-transfer; the completion afterwards must not
            // resurrect the earlier updates.
            StreamEvent::Opened,
            message("payload-transferred", r#"{"state":"s1","version":1}"#),
        ]);
        let synchronizer = synchronizer_with(factory.clone(), no_basis(), None);

        match synchronizer.next().await {
            SourceResult::Status {
                state, error_info, ..
            } => {
                assert_eq!(state, StatusState::Interrupted);
                assert_eq!(error_info.unwrap().kind, ErrorKind::InvalidData);
            }
            other => panic!("expected interruption from orphaned completion, got {other:?}"),
        }
        synchronizer.close();
    }
}
