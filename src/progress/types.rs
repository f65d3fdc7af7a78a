use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One entry of a formatting job's action log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub action: String,
    pub timestamp: DateTime<Utc>,
}

/// Full progress document of a formatting job, as written by the job itself.
///
/// Every delivery is the complete state; there are no partial updates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormattingSession {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub current_action: String,
    #[serde(default, rename = "latest_pdf_url", skip_serializing_if = "Option::is_none")]
    pub latest_artifact_url: Option<String>,
    #[serde(default, rename = "document_id", skip_serializing_if = "Option::is_none")]
    pub result_document_id: Option<String>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

impl FormattingSession {
    pub fn new(session_id: impl Into<String>, current_action: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            current_action: current_action.into(),
            ..Default::default()
        }
    }

    pub fn with_artifact_url(mut self, url: impl Into<String>) -> Self {
        self.latest_artifact_url = Some(url.into());
        self
    }

    pub fn with_result_document(mut self, document_id: impl Into<String>) -> Self {
        self.result_document_id = Some(document_id.into());
        self
    }

    /// Artifact URL, treating an empty string as absent
    pub fn artifact_url(&self) -> Option<&str> {
        self.latest_artifact_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
    }

    /// Result document id, treating an empty string as absent
    pub fn result_document(&self) -> Option<&str> {
        self.result_document_id
            .as_deref()
            .filter(|d| !d.trim().is_empty())
    }
}

/// What a progress subscription delivers
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Snapshot(FormattingSession),
    /// The channel failed; nothing further will be delivered
    Error(String),
}
