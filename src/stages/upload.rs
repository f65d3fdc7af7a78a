use super::{Route, Workflow, WorkflowError};
use crate::analytics::WorkflowEvent;
use crate::client::DocumentFile;
use crate::stage_store::{StageBatch, StageKey, UploadedFileDescriptor};
use tracing::{debug, info, warn};

pub const DOCX_MIME_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Upload ceiling: 10 MB
pub const MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;

/// What the upload screen shows after a successful detection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectionSummary {
    pub file_name: String,
    pub simple_count: usize,
    pub section_count: usize,
    /// Present when the detector also registered the file as a template
    pub template_id: Option<String>,
}

impl DetectionSummary {
    pub fn total(&self) -> usize {
        self.simple_count + self.section_count
    }

    /// Fill screen for the detected template, once it has an id
    pub fn next_route(&self) -> Option<Route> {
        self.template_id.as_ref().map(|template_id| Route::Fill {
            template_id: template_id.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadState {
    Idle,
    Detecting,
    Detected(DetectionSummary),
    Error(WorkflowError),
}

pub struct UploadStage {
    workflow: Workflow,
    state: UploadState,
}

impl UploadStage {
    pub(super) fn new(workflow: Workflow) -> Self {
        Self {
            workflow,
            state: UploadState::Idle,
        }
    }

    pub fn state(&self) -> &UploadState {
        &self.state
    }

    /// Type and size checks done before anything is sent
    pub fn check_file(&self, file: &DocumentFile) -> Result<(), WorkflowError> {
        let declared = file
            .content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim();
        if !declared.eq_ignore_ascii_case(DOCX_MIME_TYPE) {
            return Err(WorkflowError::InvalidFileType(file.content_type.clone()));
        }

        let size = file.bytes.len() as u64;
        if size > self.workflow.max_upload_bytes {
            return Err(WorkflowError::FileTooLarge {
                size,
                limit: self.workflow.max_upload_bytes,
            });
        }

        Ok(())
    }

    /// Detect the file's variables and hand file and variables to the Fill stage.
    ///
    /// Nothing is written unless detection succeeds, and the descriptor and
    /// variable set are committed together. Values and merged bytes left by a
    /// previous document are cleared in the same commit.
    pub async fn submit(&mut self, file: DocumentFile) -> Result<DetectionSummary, WorkflowError> {
        let result = self.detect_and_store(&file).await;
        self.state = match &result {
            Ok(summary) => UploadState::Detected(summary.clone()),
            Err(e) => {
                warn!("✗ Upload of '{}' failed: {}", file.name, e);
                UploadState::Error(e.clone())
            }
        };
        result
    }

    async fn detect_and_store(&mut self, file: &DocumentFile) -> Result<DetectionSummary, WorkflowError> {
        self.check_file(file)?;
        self.workflow.track(WorkflowEvent::UploadAccepted {
            file_name: file.name.clone(),
            size: file.bytes.len() as u64,
        });

        self.state = UploadState::Detecting;
        let detected = self.workflow.service.detect_variables(file).await?;
        let (variables, template_id) = detected.into_variable_set()?;

        let batch = StageBatch::new()
            .put(&UploadedFileDescriptor::from_file(file))?
            .put(&variables)?
            .remove(StageKey::VariableValues)
            .remove(StageKey::MergedDocument);
        self.workflow.store.commit(batch).await?;
        debug!("Stored descriptor and {} variable(s)", variables.total_count());
        if let Some(template_id) = &template_id {
            self.workflow.templates.invalidate(template_id).await;
        }

        let summary = DetectionSummary {
            file_name: file.name.clone(),
            simple_count: variables.simple().len(),
            section_count: variables.sections().len(),
            template_id,
        };
        self.workflow.track(WorkflowEvent::DetectionCompleted {
            simple_count: summary.simple_count,
            section_count: summary.section_count,
        });

        info!(
            "✓ '{}' has {} simple and {} section variable(s)",
            summary.file_name, summary.simple_count, summary.section_count
        );
        Ok(summary)
    }
}
