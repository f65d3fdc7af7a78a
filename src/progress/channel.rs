use super::types::ChannelEvent;
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Progress channel unavailable: {0}")]
    Unavailable(String),
    #[error("Invalid session id")]
    InvalidSession,
}

/// Push-based delivery of formatting progress, keyed by session id
#[async_trait]
pub trait ProgressChannel: Send + Sync {
    async fn subscribe(&self, session_id: &str) -> Result<ProgressSubscription, ChannelError>;
}

type Unsubscribe = Box<dyn FnOnce() + Send>;

/// Live subscription to one session's progress document.
///
/// Yields snapshots in delivery order. The unsubscribe hook runs exactly
/// once: on `unsubscribe()` or on drop, whichever comes first.
pub struct ProgressSubscription {
    session_id: String,
    events: UnboundedReceiverStream<ChannelEvent>,
    unsubscribe: Option<Unsubscribe>,
}

impl ProgressSubscription {
    pub fn new(
        session_id: impl Into<String>,
        rx: mpsc::UnboundedReceiver<ChannelEvent>,
        on_unsubscribe: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            events: UnboundedReceiverStream::new(rx),
            unsubscribe: Some(Box::new(on_unsubscribe)),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_active(&self) -> bool {
        self.unsubscribe.is_some()
    }

    /// Next event, or `None` once the channel has closed
    pub async fn next_event(&mut self) -> Option<ChannelEvent> {
        if !self.is_active() {
            return None;
        }
        self.events.next().await
    }

    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            debug!("Unsubscribing from formatting session {}", self.session_id);
            unsubscribe();
            self.events.close();
        }
    }
}

impl Drop for ProgressSubscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl Stream for ProgressSubscription {
    type Item = ChannelEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}
