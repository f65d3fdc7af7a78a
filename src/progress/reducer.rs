use super::types::{ChannelEvent, FormattingSession, HistoryEntry};

/// Marker in `current_action` announcing a finished job
pub const READY_MARKER: &str = "ready for download";
/// Markers in `current_action` announcing a failed job (case-insensitive)
pub const FAILURE_MARKERS: [&str; 2] = ["error", "failed"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCause {
    /// The formatting job reported a failure
    Job,
    /// The progress channel itself broke
    Connection,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatPhase {
    AwaitingFirstUpdate,
    InProgress,
    Complete,
    Failed { cause: FailureCause, message: String },
}

impl FormatPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, FormatPhase::Complete | FormatPhase::Failed { .. })
    }
}

/// What the live-format screen shows.
///
/// `artifact_url` and `result_document_id` are kept apart from `session`:
/// the external job may prune its progress document after completion, and
/// the download actions must keep working when later snapshots lack them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatView {
    pub phase: FormatPhase,
    pub session: Option<FormattingSession>,
    pub artifact_url: Option<String>,
    pub result_document_id: Option<String>,
    pub snapshots_applied: usize,
}

impl Default for FormatView {
    fn default() -> Self {
        Self {
            phase: FormatPhase::AwaitingFirstUpdate,
            session: None,
            artifact_url: None,
            result_document_id: None,
            snapshots_applied: 0,
        }
    }
}

impl FormatView {
    pub fn current_action(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.current_action.as_str())
    }

    pub fn progress_log(&self) -> &[HistoryEntry] {
        self.session
            .as_ref()
            .map(|s| s.history.as_slice())
            .unwrap_or_default()
    }

    pub fn failure_message(&self) -> Option<&str> {
        match &self.phase {
            FormatPhase::Failed { message, .. } => Some(message),
            _ => None,
        }
    }
}

/// Phase implied by a single `current_action`
pub fn classify_action(action: &str) -> FormatPhase {
    let lowered = action.to_lowercase();
    if lowered.contains(READY_MARKER) {
        FormatPhase::Complete
    } else if FAILURE_MARKERS.iter().any(|m| lowered.contains(m)) {
        FormatPhase::Failed {
            cause: FailureCause::Job,
            message: action.to_string(),
        }
    } else {
        FormatPhase::InProgress
    }
}

/// Apply one channel event to the view.
///
/// Snapshots replace the session wholesale. Once a terminal phase is reached
/// it is kept; later snapshots only refresh the session and cached links.
pub fn reduce(mut view: FormatView, event: &ChannelEvent) -> FormatView {
    match event {
        ChannelEvent::Snapshot(snapshot) => {
            if let Some(url) = snapshot.artifact_url() {
                view.artifact_url = Some(url.to_string());
            }
            if let Some(document_id) = snapshot.result_document() {
                view.result_document_id = Some(document_id.to_string());
            }
            if !view.phase.is_terminal() {
                view.phase = classify_action(&snapshot.current_action);
            }
            view.session = Some(snapshot.clone());
            view.snapshots_applied += 1;
        }
        ChannelEvent::Error(message) => {
            if !view.phase.is_terminal() {
                view.phase = FormatPhase::Failed {
                    cause: FailureCause::Connection,
                    message: format!("Lost connection to formatting progress: {}", message),
                };
            }
        }
    }
    view
}
