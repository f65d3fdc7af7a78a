// # Stages
//
// The document generation flow as independently enterable screens:
//
//   Upload -> Fill -> Export -> (LiveFormat) -> download
//
// Stages share nothing in memory. Each one is entered through `Workflow`,
// reads the artifacts it depends on from the stage store, and redirects to
// the producing stage when one is missing.

mod error;
mod export;
mod fill;
mod live_format;
mod route;
mod upload;

pub use error::WorkflowError;
pub use export::{DownloadArtifact, DownloadFormat, ExportStage, PreviewState};
pub use fill::{FillStage, FillState, SubmitOutcome};
pub use live_format::{LiveFormatStage, FORMATTED_FALLBACK_FILENAME};
pub use route::{Route, StageEntry};
pub use upload::{DetectionSummary, UploadStage, UploadState, DOCX_MIME_TYPE, MAX_UPLOAD_BYTES};

use crate::analytics::{EventSink, NoopEventSink, TrackedEvent, WorkflowEvent};
use crate::client::{DocumentService, DocumentServiceClient, RetryPolicy, TemplateMetadataCache};
use crate::config::Config;
use crate::progress::{PollingChannel, ProgressChannel};
use crate::stage_store::StageStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Collaborators shared by every stage of one generation flow
#[derive(Clone)]
pub struct Workflow {
    store: StageStore,
    service: Arc<dyn DocumentService>,
    templates: Arc<TemplateMetadataCache>,
    channel: Arc<dyn ProgressChannel>,
    events: Arc<dyn EventSink>,
    flow_id: Uuid,
    max_upload_bytes: u64,
}

impl Workflow {
    pub fn new(
        store: StageStore,
        service: Arc<dyn DocumentService>,
        channel: Arc<dyn ProgressChannel>,
    ) -> Self {
        let templates = Arc::new(TemplateMetadataCache::new(
            service.clone(),
            Duration::from_secs(30),
            RetryPolicy::default(),
        ));

        Self {
            store,
            service,
            templates,
            channel,
            events: Arc::new(NoopEventSink),
            flow_id: Uuid::new_v4(),
            max_upload_bytes: MAX_UPLOAD_BYTES,
        }
    }

    /// HTTP service client and polling progress channel, both from `config`
    pub fn from_config(config: &Config, store: StageStore) -> Self {
        let service: Arc<dyn DocumentService> = Arc::new(DocumentServiceClient::from_config(config));
        let channel = Arc::new(PollingChannel::new(
            service.clone(),
            config.progress_poll_interval,
        ));

        Self::new(store, service, channel)
            .with_template_cache(
                config.template_cache_ttl,
                RetryPolicy {
                    max_retries: config.template_retries,
                    interval: config.template_retry_interval,
                },
            )
            .with_max_upload_bytes(config.max_upload_bytes)
    }

    pub fn with_template_cache(mut self, ttl: Duration, retry: RetryPolicy) -> Self {
        self.templates = Arc::new(TemplateMetadataCache::new(self.service.clone(), ttl, retry));
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn with_max_upload_bytes(mut self, limit: u64) -> Self {
        self.max_upload_bytes = limit;
        self
    }

    pub fn store(&self) -> &StageStore {
        &self.store
    }

    pub fn flow_id(&self) -> Uuid {
        self.flow_id
    }

    pub fn upload_stage(&self) -> UploadStage {
        UploadStage::new(self.clone())
    }

    /// Fill needs a template reference; without one the flow restarts at Upload
    pub fn enter_fill(&self, template_id: Option<&str>) -> StageEntry<FillStage> {
        match non_blank(template_id) {
            Some(template_id) => StageEntry::Ready(FillStage::new(self.clone(), template_id)),
            None => {
                debug!("Fill entered without a template, redirecting to upload");
                StageEntry::Redirect(Route::Upload)
            }
        }
    }

    pub async fn enter_export(&self, template_id: Option<&str>) -> StageEntry<ExportStage> {
        ExportStage::enter(self.clone(), non_blank(template_id)).await
    }

    pub async fn enter_live_format(
        &self,
        session_id: Option<&str>,
        template_id: Option<&str>,
    ) -> StageEntry<LiveFormatStage> {
        LiveFormatStage::enter(self.clone(), non_blank(session_id), non_blank(template_id)).await
    }

    pub(crate) fn track(&self, event: WorkflowEvent) {
        self.events.track(TrackedEvent {
            flow_id: self.flow_id,
            event,
        });
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
