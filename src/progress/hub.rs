use super::channel::{ChannelError, ProgressChannel, ProgressSubscription};
use super::types::{ChannelEvent, FormattingSession};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, MutexGuard, PoisonError,
};
use tokio::sync::mpsc as tokio_mpsc;
use tracing::{debug, trace};

type SubscriptionId = u64;

struct Subscription {
    session_id: String,
    tx: tokio_mpsc::UnboundedSender<ChannelEvent>,
}

#[derive(Default)]
struct HubState {
    /// Latest progress document per session
    documents: HashMap<String, FormattingSession>,
    subscriptions: HashMap<SubscriptionId, Subscription>,
}

/// In-process publish/subscribe store of formatting progress documents.
///
/// Behaves like a document store: subscribing to a session that already has
/// a document delivers it immediately, and every publish replaces the
/// document and fans it out to that session's subscribers.
#[derive(Clone, Default)]
pub struct ProgressHub {
    state: Arc<Mutex<HubState>>,
    next_id: Arc<AtomicU64>,
}

fn lock(state: &Mutex<HubState>) -> MutexGuard<'_, HubState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ProgressHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the session's document and deliver it to subscribers
    pub fn publish(&self, snapshot: FormattingSession) {
        let mut state = lock(&self.state);
        let session_id = snapshot.session_id.clone();
        trace!(
            "Publishing snapshot for {}: {}",
            session_id,
            snapshot.current_action
        );

        Self::dispatch(&mut state, &session_id, ChannelEvent::Snapshot(snapshot.clone()));
        state.documents.insert(session_id, snapshot);
    }

    /// Report a channel failure to the session's subscribers
    pub fn fail(&self, session_id: &str, message: impl Into<String>) {
        let mut state = lock(&self.state);
        Self::dispatch(&mut state, session_id, ChannelEvent::Error(message.into()));
    }

    /// Delete the session's document; existing subscribers keep what they received
    pub fn prune(&self, session_id: &str) {
        lock(&self.state).documents.remove(session_id);
    }

    pub fn document(&self, session_id: &str) -> Option<FormattingSession> {
        lock(&self.state).documents.get(session_id).cloned()
    }

    pub fn subscriber_count(&self, session_id: &str) -> usize {
        lock(&self.state)
            .subscriptions
            .values()
            .filter(|s| s.session_id == session_id)
            .count()
    }

    fn dispatch(state: &mut HubState, session_id: &str, event: ChannelEvent) {
        let mut to_remove = Vec::new();

        for (id, subscription) in state.subscriptions.iter() {
            if subscription.session_id == session_id {
                // If send fails, receiver was dropped - mark for removal
                if subscription.tx.send(event.clone()).is_err() {
                    to_remove.push(*id);
                }
            }
        }

        for id in to_remove {
            state.subscriptions.remove(&id);
        }
    }
}

#[async_trait]
impl ProgressChannel for ProgressHub {
    async fn subscribe(&self, session_id: &str) -> Result<ProgressSubscription, ChannelError> {
        if session_id.trim().is_empty() {
            return Err(ChannelError::InvalidSession);
        }

        let (tx, rx) = tokio_mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        {
            let mut state = lock(&self.state);
            if let Some(current) = state.documents.get(session_id) {
                // Receiver is alive in this scope, so the send cannot fail
                let _ = tx.send(ChannelEvent::Snapshot(current.clone()));
            }
            state.subscriptions.insert(
                id,
                Subscription {
                    session_id: session_id.to_string(),
                    tx,
                },
            );
        }
        debug!("Subscription {} opened for session {}", id, session_id);

        let state = self.state.clone();
        Ok(ProgressSubscription::new(session_id, rx, move || {
            lock(&state).subscriptions.remove(&id);
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_existing_document_delivered_on_subscribe() {
        let hub = ProgressHub::new();
        hub.publish(FormattingSession::new("s1", "Aligning tables"));

        let mut subscription = hub.subscribe("s1").await.unwrap();
        assert_eq!(
            subscription.next_event().await,
            Some(ChannelEvent::Snapshot(FormattingSession::new(
                "s1",
                "Aligning tables"
            )))
        );
    }

    #[tokio::test]
    async fn test_only_matching_session_receives() {
        let hub = ProgressHub::new();
        let mut s1 = hub.subscribe("s1").await.unwrap();
        let mut s2 = hub.subscribe("s2").await.unwrap();

        hub.publish(FormattingSession::new("s2", "Step A"));
        hub.publish(FormattingSession::new("s1", "Step B"));

        match s1.next_event().await {
            Some(ChannelEvent::Snapshot(s)) => assert_eq!(s.current_action, "Step B"),
            other => panic!("unexpected event: {:?}", other),
        }
        match s2.next_event().await {
            Some(ChannelEvent::Snapshot(s)) => assert_eq!(s.current_action, "Step A"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unsubscribe_removes_subscription() {
        let hub = ProgressHub::new();
        let subscription = hub.subscribe("s1").await.unwrap();
        assert_eq!(hub.subscriber_count("s1"), 1);

        subscription.unsubscribe();
        assert_eq!(hub.subscriber_count("s1"), 0);
    }

    #[tokio::test]
    async fn test_prune_keeps_delivered_events() {
        let hub = ProgressHub::new();
        let mut subscription = hub.subscribe("s1").await.unwrap();
        hub.publish(FormattingSession::new("s1", "done, ready for download").with_artifact_url("u1"));
        hub.prune("s1");

        assert!(hub.document("s1").is_none());
        assert!(matches!(
            subscription.next_event().await,
            Some(ChannelEvent::Snapshot(_))
        ));
    }

    #[tokio::test]
    async fn test_blank_session_rejected() {
        let hub = ProgressHub::new();
        assert_eq!(
            hub.subscribe("  ").await.err(),
            Some(ChannelError::InvalidSession)
        );
    }
}
