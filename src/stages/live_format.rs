use super::{DownloadArtifact, Route, StageEntry, Workflow, WorkflowError};
use crate::analytics::WorkflowEvent;
use crate::progress::{
    reduce, ChannelEvent, FailureCause, FormatPhase, FormatView, HistoryEntry,
    ProgressSubscription,
};
use tracing::{debug, info, warn};

/// Download name used when the service sends no Content-Disposition
pub const FORMATTED_FALLBACK_FILENAME: &str = "formatted-document.docx";

/// Live view of a running formatting job.
///
/// Holds the progress subscription for as long as the stage exists; leaving
/// the stage (or dropping it) unsubscribes.
pub struct LiveFormatStage {
    workflow: Workflow,
    session_id: String,
    template_id: Option<String>,
    view: FormatView,
    subscription: Option<ProgressSubscription>,
    outcome_tracked: bool,
}

impl LiveFormatStage {
    pub(super) async fn enter(
        workflow: Workflow,
        session_id: Option<String>,
        template_id: Option<String>,
    ) -> StageEntry<Self> {
        let Some(session_id) = session_id else {
            debug!("Live format entered without a session, redirecting");
            return StageEntry::Redirect(match template_id {
                Some(template_id) => Route::Export { template_id },
                None => Route::Upload,
            });
        };

        let mut stage = Self {
            workflow,
            session_id,
            template_id,
            view: FormatView::default(),
            subscription: None,
            outcome_tracked: false,
        };

        match stage.workflow.channel.subscribe(&stage.session_id).await {
            Ok(subscription) => {
                info!("📡 Following formatting session {}", stage.session_id);
                stage.subscription = Some(subscription);
            }
            Err(e) => {
                warn!("✗ Could not subscribe to session {}: {}", stage.session_id, e);
                stage.apply(ChannelEvent::Error(e.to_string()));
            }
        }

        StageEntry::Ready(stage)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn view(&self) -> &FormatView {
        &self.view
    }

    pub fn phase(&self) -> &FormatPhase {
        &self.view.phase
    }

    pub fn progress_log(&self) -> &[HistoryEntry] {
        self.view.progress_log()
    }

    /// Last rendered-artifact URL seen, kept after the progress document is pruned
    pub fn artifact_url(&self) -> Option<&str> {
        self.view.artifact_url.as_deref()
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_some()
    }

    /// Wait for the next delivery and apply it.
    ///
    /// Returns `false` once nothing more will arrive. A channel that closes
    /// without reporting an error is treated as a lost connection.
    pub async fn next_update(&mut self) -> bool {
        let Some(subscription) = self.subscription.as_mut() else {
            return false;
        };

        match subscription.next_event().await {
            Some(ChannelEvent::Error(message)) => {
                self.release();
                self.apply(ChannelEvent::Error(message));
                false
            }
            Some(event) => {
                self.apply(event);
                true
            }
            None => {
                self.release();
                self.apply(ChannelEvent::Error("progress channel closed".to_string()));
                false
            }
        }
    }

    /// Apply deliveries until the job completes or fails
    pub async fn run_to_completion(&mut self) -> &FormatPhase {
        while !self.view.phase.is_terminal() && self.next_update().await {}
        &self.view.phase
    }

    fn apply(&mut self, event: ChannelEvent) {
        let view = std::mem::take(&mut self.view);
        self.view = reduce(view, &event);

        if self.outcome_tracked || !self.view.phase.is_terminal() {
            return;
        }
        self.outcome_tracked = true;

        match &self.view.phase {
            FormatPhase::Complete => {
                info!("✓ Formatting session {} complete", self.session_id);
                self.workflow.track(WorkflowEvent::FormattingCompleted {
                    session_id: self.session_id.clone(),
                });
            }
            FormatPhase::Failed { cause, message } => {
                warn!(
                    "✗ Formatting session {} failed ({:?}): {}",
                    self.session_id, cause, message
                );
                self.workflow.track(WorkflowEvent::FormattingFailed {
                    session_id: self.session_id.clone(),
                    message: message.clone(),
                });
            }
            FormatPhase::AwaitingFirstUpdate | FormatPhase::InProgress => {}
        }
    }

    /// Fetch the formatted document by its result id.
    ///
    /// Only available once the job is `Complete`, even if an earlier snapshot
    /// already named a result document.
    pub async fn download_result(&self) -> Result<DownloadArtifact, WorkflowError> {
        let document_id = match (&self.view.phase, self.view.result_document_id.as_deref()) {
            (FormatPhase::Complete, Some(document_id)) => document_id,
            (FormatPhase::Complete, None) => return Err(WorkflowError::MissingDocumentId),
            (
                FormatPhase::Failed {
                    cause: FailureCause::Connection,
                    message,
                },
                _,
            ) => return Err(WorkflowError::Channel(message.clone())),
            (FormatPhase::Failed { message, .. }, _) => {
                return Err(WorkflowError::Transport {
                    message: message.clone(),
                    retryable: false,
                })
            }
            (FormatPhase::AwaitingFirstUpdate | FormatPhase::InProgress, _) => {
                return Err(WorkflowError::ArtifactPending)
            }
        };

        let document = self.workflow.service.download_document(document_id).await?;
        self.workflow.track(WorkflowEvent::ExportDownloaded {
            format: "formatted".to_string(),
        });

        Ok(DownloadArtifact {
            filename: document
                .filename
                .unwrap_or_else(|| FORMATTED_FALLBACK_FILENAME.to_string()),
            content_type: document.content_type,
            bytes: document.bytes,
        })
    }

    /// Discard the session and go back to editing values
    pub fn start_over(mut self) -> Route {
        self.release();
        match self.template_id.take() {
            Some(template_id) => Route::Fill { template_id },
            None => Route::Upload,
        }
    }

    pub fn leave(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }
}
