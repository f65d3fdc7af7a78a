use super::{StageKey, StageStoreError};
use crate::client::DocumentFile;
use crate::template::{TemplateVariableSet, VariableValues};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

/// An artifact that one stage leaves in the stage store for the next.
///
/// Every artifact has a fixed slot and a text encoding.
pub trait StageArtifact: Sized {
    const KEY: StageKey;

    fn encode(&self) -> Result<String, StageStoreError>;
    fn decode(raw: &str) -> Result<Self, StageStoreError>;
}

/// The template file as uploaded, bytes included
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedFileDescriptor {
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    /// Base64 of the original file bytes
    pub raw_bytes_encoded: String,
}

impl UploadedFileDescriptor {
    pub fn from_file(file: &DocumentFile) -> Self {
        Self {
            name: file.name.clone(),
            size: file.bytes.len() as u64,
            mime_type: file.content_type.clone(),
            raw_bytes_encoded: STANDARD.encode(&file.bytes),
        }
    }

    pub fn decode_bytes(&self) -> Result<Vec<u8>, StageStoreError> {
        STANDARD
            .decode(&self.raw_bytes_encoded)
            .map_err(|e| StageStoreError::Encoding(format!("uploaded file bytes: {}", e)))
    }

    /// File name without its extension, used to name exports
    pub fn stem(&self) -> &str {
        std::path::Path::new(&self.name)
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .unwrap_or("document")
    }
}

/// Merged document bytes with their declared content type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedDocument {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl MergedDocument {
    pub fn to_data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.content_type,
            STANDARD.encode(&self.bytes)
        )
    }

    pub fn from_data_url(url: &str) -> Result<Self, StageStoreError> {
        let rest = url
            .strip_prefix("data:")
            .ok_or_else(|| StageStoreError::Encoding("merged document is not a data URL".into()))?;
        let (content_type, payload) = rest.split_once(";base64,").ok_or_else(|| {
            StageStoreError::Encoding("merged document data URL is not base64".into())
        })?;
        let bytes = STANDARD
            .decode(payload.trim())
            .map_err(|e| StageStoreError::Encoding(format!("merged document payload: {}", e)))?;

        Ok(Self {
            content_type: content_type.to_string(),
            bytes,
        })
    }
}

/// Marker left in the merged-document slot when storing the merged bytes failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum MergedWriteFailure {
    QuotaExceeded { requested: usize, available: usize },
    Backend { message: String },
}

impl From<&StageStoreError> for MergedWriteFailure {
    fn from(e: &StageStoreError) -> Self {
        match e {
            StageStoreError::QuotaExceeded {
                requested,
                available,
            } => MergedWriteFailure::QuotaExceeded {
                requested: *requested,
                available: *available,
            },
            other => MergedWriteFailure::Backend {
                message: other.to_string(),
            },
        }
    }
}

impl From<MergedWriteFailure> for StageStoreError {
    fn from(failure: MergedWriteFailure) -> Self {
        match failure {
            MergedWriteFailure::QuotaExceeded {
                requested,
                available,
            } => StageStoreError::QuotaExceeded {
                requested,
                available,
            },
            MergedWriteFailure::Backend { message } => StageStoreError::Backend(message),
        }
    }
}

const WRITE_FAILED_PREFIX: &str = "write-failed:";

/// Contents of the merged-document slot: the document, or why it is not there
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergedSlot {
    Document(MergedDocument),
    WriteFailed(MergedWriteFailure),
}

impl StageArtifact for UploadedFileDescriptor {
    const KEY: StageKey = StageKey::UploadedFile;

    fn encode(&self) -> Result<String, StageStoreError> {
        Ok(serde_json::to_string(self)?)
    }

    fn decode(raw: &str) -> Result<Self, StageStoreError> {
        Ok(serde_json::from_str(raw)?)
    }
}

impl StageArtifact for TemplateVariableSet {
    const KEY: StageKey = StageKey::TemplateVariables;

    fn encode(&self) -> Result<String, StageStoreError> {
        Ok(serde_json::to_string(self)?)
    }

    fn decode(raw: &str) -> Result<Self, StageStoreError> {
        Ok(serde_json::from_str(raw)?)
    }
}

impl StageArtifact for VariableValues {
    const KEY: StageKey = StageKey::VariableValues;

    fn encode(&self) -> Result<String, StageStoreError> {
        Ok(serde_json::to_string(self)?)
    }

    fn decode(raw: &str) -> Result<Self, StageStoreError> {
        Ok(serde_json::from_str(raw)?)
    }
}

impl StageArtifact for MergedDocument {
    const KEY: StageKey = StageKey::MergedDocument;

    fn encode(&self) -> Result<String, StageStoreError> {
        Ok(self.to_data_url())
    }

    fn decode(raw: &str) -> Result<Self, StageStoreError> {
        Self::from_data_url(raw)
    }
}

impl StageArtifact for MergedSlot {
    const KEY: StageKey = StageKey::MergedDocument;

    fn encode(&self) -> Result<String, StageStoreError> {
        match self {
            MergedSlot::Document(document) => document.encode(),
            MergedSlot::WriteFailed(failure) => Ok(format!(
                "{}{}",
                WRITE_FAILED_PREFIX,
                serde_json::to_string(failure)?
            )),
        }
    }

    fn decode(raw: &str) -> Result<Self, StageStoreError> {
        match raw.strip_prefix(WRITE_FAILED_PREFIX) {
            Some(json) => Ok(MergedSlot::WriteFailed(serde_json::from_str(json)?)),
            None => MergedDocument::decode(raw).map(MergedSlot::Document),
        }
    }
}
