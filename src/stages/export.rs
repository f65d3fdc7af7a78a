use super::{Route, StageEntry, Workflow, WorkflowError, DOCX_MIME_TYPE};
use crate::analytics::WorkflowEvent;
use crate::client::DocumentFile;
use crate::stage_store::{MergedDocument, MergedSlot, StageStoreError, UploadedFileDescriptor};
use crate::template::{TemplateVariableSet, VariableValues};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadFormat {
    /// The merged document as produced by the merge
    Original,
    /// Converted by the service's conversion endpoint
    Converted,
}

impl DownloadFormat {
    fn label(&self) -> &'static str {
        match self {
            DownloadFormat::Original => "original",
            DownloadFormat::Converted => "converted",
        }
    }
}

/// A file ready to be saved by the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadArtifact {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreviewState {
    /// The merged document has not reached the stage store yet
    Pending,
    Ready(MergedDocument),
    /// Stored bytes could not be decoded; export actions stay available
    Corrupted(WorkflowError),
    /// The merged document was never stored, e.g. it did not fit the quota
    Unavailable(WorkflowError),
}

pub struct ExportStage {
    workflow: Workflow,
    template_id: String,
    variables: TemplateVariableSet,
    descriptor: UploadedFileDescriptor,
    values: VariableValues,
}

impl ExportStage {
    pub(super) async fn enter(workflow: Workflow, template_id: Option<String>) -> StageEntry<Self> {
        let Some(template_id) = template_id else {
            debug!("Export entered without a template, redirecting to upload");
            return StageEntry::Redirect(Route::Upload);
        };

        let store = &workflow.store;
        let (variables, descriptor, values) = (
            store.get::<TemplateVariableSet>().await,
            store.get::<UploadedFileDescriptor>().await,
            store.get::<VariableValues>().await,
        );

        match (variables, descriptor, values) {
            (Some(variables), Some(descriptor), Some(values)) => StageEntry::Ready(Self {
                workflow,
                template_id,
                variables,
                descriptor,
                values,
            }),
            _ => {
                debug!("Export is missing fill artifacts, redirecting to fill");
                StageEntry::Redirect(Route::Fill { template_id })
            }
        }
    }

    pub fn template_id(&self) -> &str {
        &self.template_id
    }

    pub fn variables(&self) -> &TemplateVariableSet {
        &self.variables
    }

    pub fn values(&self) -> &VariableValues {
        &self.values
    }

    pub fn descriptor(&self) -> &UploadedFileDescriptor {
        &self.descriptor
    }

    pub async fn preview(&self) -> PreviewState {
        match self.workflow.store.try_get::<MergedSlot>().await {
            Ok(Some(MergedSlot::Document(document))) => PreviewState::Ready(document),
            Ok(Some(MergedSlot::WriteFailed(failure))) => {
                warn!("Merged document was not stored: {:?}", failure);
                PreviewState::Unavailable(StageStoreError::from(failure).into())
            }
            Ok(None) => PreviewState::Pending,
            Err(e) => {
                warn!("Merged document preview unavailable: {}", e);
                PreviewState::Corrupted(WorkflowError::PreviewCorrupted(e.to_string()))
            }
        }
    }

    async fn merged_document(&self) -> Result<MergedDocument, WorkflowError> {
        match self.workflow.store.try_get::<MergedSlot>().await {
            Ok(Some(MergedSlot::Document(document))) => Ok(document),
            Ok(Some(MergedSlot::WriteFailed(failure))) => {
                Err(StageStoreError::from(failure).into())
            }
            Ok(None) => Err(WorkflowError::ArtifactPending),
            Err(StageStoreError::Backend(e)) => Err(WorkflowError::Storage(e)),
            Err(e) => Err(WorkflowError::PreviewCorrupted(e.to_string())),
        }
    }

    fn merged_file(&self, document: MergedDocument) -> DocumentFile {
        DocumentFile {
            name: format!("{}.docx", self.descriptor.stem()),
            content_type: document.content_type,
            bytes: document.bytes,
        }
    }

    /// Produce the merged document for saving, as-is or converted
    pub async fn download(&self, format: DownloadFormat) -> Result<DownloadArtifact, WorkflowError> {
        let document = self.merged_document().await?;

        let artifact = match format {
            DownloadFormat::Original => DownloadArtifact {
                filename: format!("{}.docx", self.descriptor.stem()),
                content_type: document.content_type,
                bytes: document.bytes,
            },
            DownloadFormat::Converted => {
                let converted = self
                    .workflow
                    .service
                    .convert_document(&self.merged_file(document))
                    .await?;
                let filename = converted.filename.unwrap_or_else(|| {
                    format!(
                        "{}.{}",
                        self.descriptor.stem(),
                        extension_for(&converted.content_type)
                    )
                });
                DownloadArtifact {
                    filename,
                    content_type: converted.content_type,
                    bytes: converted.bytes,
                }
            }
        };

        self.workflow.track(WorkflowEvent::ExportDownloaded {
            format: format.label().to_string(),
        });
        info!("✓ Prepared {} ({} bytes)", artifact.filename, artifact.bytes.len());
        Ok(artifact)
    }

    /// Start the formatting job and hand off to the live-format screen
    pub async fn start_formatting(&self) -> Result<Route, WorkflowError> {
        let document = self.merged_document().await?;
        let session_id = self
            .workflow
            .service
            .start_formatting(&self.merged_file(document))
            .await?;

        self.workflow.track(WorkflowEvent::FormattingStarted {
            session_id: session_id.clone(),
        });
        Ok(Route::LiveFormat {
            session_id,
            template_id: Some(self.template_id.clone()),
        })
    }

    /// Clear every artifact of this flow and return to the dashboard
    pub async fn start_new_document(self) -> Result<Route, WorkflowError> {
        self.workflow.store.clear_flow().await?;
        info!("Started a new document");
        Ok(Route::Dashboard)
    }
}

/// File extension for a converted document's content type
fn extension_for(content_type: &str) -> &'static str {
    let essence = content_type.split(';').next().unwrap_or_default().trim();
    match essence.to_ascii_lowercase().as_str() {
        "application/pdf" => "pdf",
        "application/msword" => "doc",
        "text/html" => "html",
        "text/plain" => "txt",
        t if t == DOCX_MIME_TYPE => "docx",
        _ => "pdf",
    }
}
