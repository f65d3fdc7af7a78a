use crate::stage_store::MergedDocument;
use crate::template::{RawVariableSet, TemplateError, TemplateVariableSet};
use serde::{Deserialize, Serialize};

/// A document travelling to the service (upload, format, convert)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentFile {
    pub name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Detector response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedTemplate {
    #[serde(flatten)]
    pub variables: RawVariableSet,
    /// Set when the detector also registered the file as a stored template
    #[serde(default)]
    pub template_id: Option<String>,
}

impl DetectedTemplate {
    pub fn into_variable_set(self) -> Result<(TemplateVariableSet, Option<String>), TemplateError> {
        let set = TemplateVariableSet::from_detection(self.variables)?;
        Ok((set, self.template_id))
    }
}

/// Stored template metadata from the template service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateMetadata {
    pub id: String,
    pub name: String,
    pub original_filename: String,
    pub file_size_bytes: u64,
    pub variables_detected: TemplateVariableSet,
}

/// Merge result: document bytes plus the id announced in `X-Document-ID`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeResponse {
    pub document: MergedDocument,
    pub document_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct FormatJobStarted {
    pub session_id: String,
}

/// Binary payload returned by convert/download endpoints
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedDocument {
    /// Parsed from `Content-Disposition`, if the service sent one
    pub filename: Option<String>,
    pub content_type: String,
    pub bytes: Vec<u8>,
}
