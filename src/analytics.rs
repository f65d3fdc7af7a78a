// # Analytics
//
// Side-channel notifications about workflow milestones. `track` is
// synchronous and infallible: stages call it and move on, they never wait
// for it or branch on it.

use serde::Serialize;
use tokio::sync::mpsc as tokio_mpsc;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkflowEvent {
    UploadAccepted {
        file_name: String,
        size: u64,
    },
    DetectionCompleted {
        simple_count: usize,
        section_count: usize,
    },
    MergeSubmitted {
        template_id: String,
        document_id: Option<String>,
    },
    ExportDownloaded {
        format: String,
    },
    FormattingStarted {
        session_id: String,
    },
    FormattingCompleted {
        session_id: String,
    },
    FormattingFailed {
        session_id: String,
        message: String,
    },
}

/// One tracked event, tagged with the generation flow it belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackedEvent {
    pub flow_id: Uuid,
    #[serde(flatten)]
    pub event: WorkflowEvent,
}

pub trait EventSink: Send + Sync {
    fn track(&self, event: TrackedEvent);
}

/// Writes events to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn track(&self, event: TrackedEvent) {
        match serde_json::to_string(&event) {
            Ok(json) => info!(target: "docflow::analytics", "📈 {}", json),
            Err(_) => info!(target: "docflow::analytics", "📈 {:?}", event),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn track(&self, _event: TrackedEvent) {}
}

/// Forwards events to a background consumer; events are dropped once it is gone
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    tx: tokio_mpsc::UnboundedSender<TrackedEvent>,
}

impl ChannelEventSink {
    pub fn new() -> (Self, tokio_mpsc::UnboundedReceiver<TrackedEvent>) {
        let (tx, rx) = tokio_mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelEventSink {
    fn track(&self, event: TrackedEvent) {
        let _ = self.tx.send(event);
    }
}
