use super::channel::{ChannelError, ProgressChannel, ProgressSubscription};
use super::types::{ChannelEvent, FormattingSession};
use crate::client::DocumentService;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc as tokio_mpsc;
use tracing::{debug, trace, warn};

/// Progress channel that polls the service's session endpoint.
///
/// Only changed documents are delivered. A failed poll is reported once as a
/// channel error and polling stops; there is no automatic reconnect.
pub struct PollingChannel {
    service: Arc<dyn DocumentService>,
    interval: Duration,
}

impl PollingChannel {
    pub fn new(service: Arc<dyn DocumentService>, interval: Duration) -> Self {
        Self { service, interval }
    }
}

#[async_trait]
impl ProgressChannel for PollingChannel {
    async fn subscribe(&self, session_id: &str) -> Result<ProgressSubscription, ChannelError> {
        if session_id.trim().is_empty() {
            return Err(ChannelError::InvalidSession);
        }

        let (tx, rx) = tokio_mpsc::unbounded_channel();
        let service = self.service.clone();
        let interval = self.interval;
        let session = session_id.to_string();

        let poller = tokio::spawn(async move {
            let mut last: Option<FormattingSession> = None;

            loop {
                match service.get_formatting_session(&session).await {
                    Ok(Some(snapshot)) => {
                        if last.as_ref() != Some(&snapshot) {
                            if tx.send(ChannelEvent::Snapshot(snapshot.clone())).is_err() {
                                break;
                            }
                            last = Some(snapshot);
                        }
                    }
                    Ok(None) => {
                        trace!("No progress document for {} yet", session);
                    }
                    Err(e) => {
                        warn!("Polling formatting session {} failed: {}", session, e);
                        let _ = tx.send(ChannelEvent::Error(e.to_string()));
                        break;
                    }
                }

                if tx.is_closed() {
                    break;
                }
                tokio::time::sleep(interval).await;
            }

            debug!("Stopped polling formatting session {}", session);
        });

        Ok(ProgressSubscription::new(session_id, rx, move || {
            poller.abort();
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockDocumentService;

    #[tokio::test]
    async fn test_delivers_changes_only() {
        let service = Arc::new(MockDocumentService::new());
        service.set_session(FormattingSession::new("s1", "Aligning tables"));

        let channel = PollingChannel::new(service.clone(), Duration::from_millis(5));
        let mut subscription = channel.subscribe("s1").await.unwrap();

        assert_eq!(
            subscription.next_event().await,
            Some(ChannelEvent::Snapshot(FormattingSession::new(
                "s1",
                "Aligning tables"
            )))
        );

        // Several polls of the unchanged document pass before the update
        tokio::time::sleep(Duration::from_millis(30)).await;
        service.set_session(FormattingSession::new("s1", "Formatting complete, ready for download"));

        match subscription.next_event().await {
            Some(ChannelEvent::Snapshot(s)) => {
                assert_eq!(s.current_action, "Formatting complete, ready for download")
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_poll_failure_is_terminal() {
        let service = Arc::new(MockDocumentService::new());
        service.fail_session_polls();

        let channel = PollingChannel::new(service, Duration::from_millis(5));
        let mut subscription = channel.subscribe("s1").await.unwrap();

        assert!(matches!(
            subscription.next_event().await,
            Some(ChannelEvent::Error(_))
        ));
        assert_eq!(subscription.next_event().await, None);
    }
}
