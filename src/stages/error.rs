use crate::client::ServiceError;
use crate::progress::ChannelError;
use crate::stage_store::StageStoreError;
use crate::template::{FieldErrors, TemplateError};
use thiserror::Error;

/// Everything a stage can report to the user.
///
/// Missing stage artifacts never show up here; they become redirects.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("Invalid file type: {0}")]
    InvalidFileType(String),
    #[error("File is {size} bytes, limit is {limit} bytes")]
    FileTooLarge { size: u64, limit: u64 },
    #[error("{} field(s) need attention", .0.len())]
    Validation(FieldErrors),
    #[error("Document service error: {message}")]
    Transport { message: String, retryable: bool },
    #[error("Storage quota exceeded: {requested} bytes requested, {available} bytes available")]
    StorageQuotaExceeded { requested: usize, available: usize },
    #[error("Malformed detection result: {0}")]
    MalformedDetectionResult(String),
    #[error("Merge response did not include a document id")]
    MissingDocumentId,
    #[error("Preview corrupted: {0}")]
    PreviewCorrupted(String),
    #[error("Merged document has not been stored yet")]
    ArtifactPending,
    #[error("Progress channel error: {0}")]
    Channel(String),
    #[error("Stage storage error: {0}")]
    Storage(String),
    #[error("Template error: {0}")]
    Template(String),
}

impl WorkflowError {
    /// Text with the recovery action for this kind of failure
    pub fn user_message(&self) -> String {
        match self {
            WorkflowError::InvalidFileType(_) => {
                "Please upload a Word document (.docx).".to_string()
            }
            WorkflowError::FileTooLarge { limit, .. } => format!(
                "This file is too large. Please upload a document smaller than {}.",
                display_size(*limit)
            ),
            WorkflowError::Validation(errors) => {
                let fields: Vec<&str> = errors.keys().map(String::as_str).collect();
                format!("Please fill in the required fields: {}.", fields.join(", "))
            }
            WorkflowError::Transport { retryable: true, .. } => {
                "The document service could not be reached. Please try again.".to_string()
            }
            WorkflowError::Transport { message, .. } => {
                format!("The document service rejected the request: {}", message)
            }
            WorkflowError::StorageQuotaExceeded { .. } => {
                "Not enough storage for this document. Please reduce the file size and try again."
                    .to_string()
            }
            WorkflowError::MalformedDetectionResult(_) => {
                "Variable detection returned an inconsistent result. Please upload the file again."
                    .to_string()
            }
            WorkflowError::MissingDocumentId => {
                "Your document was generated but could not be registered. Please contact support if this keeps happening."
                    .to_string()
            }
            WorkflowError::PreviewCorrupted(_) => {
                "The preview could not be displayed, but you can still download or format the document."
                    .to_string()
            }
            WorkflowError::ArtifactPending => {
                "Your document is still being prepared. Please try again in a moment.".to_string()
            }
            WorkflowError::Channel(_) => {
                "Lost connection to formatting progress. Start over to try again.".to_string()
            }
            WorkflowError::Storage(_) | WorkflowError::Template(_) => {
                "Something went wrong while saving your progress. Please start a new document."
                    .to_string()
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WorkflowError::Transport {
                retryable: true,
                ..
            } | WorkflowError::ArtifactPending
        )
    }
}

/// Whole MB when the size is an exact multiple, KB or bytes otherwise
fn display_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    if bytes >= MB && bytes % MB == 0 {
        format!("{} MB", bytes / MB)
    } else if bytes >= KB {
        format!("{} KB", bytes / KB)
    } else {
        format!("{} bytes", bytes)
    }
}

impl From<ServiceError> for WorkflowError {
    fn from(e: ServiceError) -> Self {
        WorkflowError::Transport {
            retryable: e.is_retryable(),
            message: e.to_string(),
        }
    }
}

impl From<StageStoreError> for WorkflowError {
    fn from(e: StageStoreError) -> Self {
        match e {
            StageStoreError::QuotaExceeded {
                requested,
                available,
            } => WorkflowError::StorageQuotaExceeded {
                requested,
                available,
            },
            other => WorkflowError::Storage(other.to_string()),
        }
    }
}

impl From<TemplateError> for WorkflowError {
    fn from(e: TemplateError) -> Self {
        match e {
            TemplateError::MalformedDetectionResult { .. } | TemplateError::DuplicateVariable(_) => {
                WorkflowError::MalformedDetectionResult(e.to_string())
            }
            other => WorkflowError::Template(other.to_string()),
        }
    }
}

impl From<ChannelError> for WorkflowError {
    fn from(e: ChannelError) -> Self {
        WorkflowError::Channel(e.to_string())
    }
}
