// Test support utilities for both unit and integration tests

use crate::analytics::{EventSink, TrackedEvent};
use crate::client::{
    DetectedTemplate, DocumentFile, DocumentService, DownloadedDocument, MergeResponse,
    ServiceError, TemplateMetadata,
};
use crate::progress::FormattingSession;
use crate::stage_store::MergedDocument;
use crate::stages::DOCX_MIME_TYPE;
use crate::template::{RawVariableSet, TemplateVariableSet, VariableValues};
use std::collections::HashMap;
use std::sync::Mutex;

/// Initialize tracing for tests with proper test output handling
pub fn tracing_init() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Template with two simple variables (`client_name`, `date`) and one section (`items`)
pub fn sample_template(id: &str) -> TemplateMetadata {
    let variables = TemplateVariableSet::from_detection(RawVariableSet {
        simple: vec!["client_name".to_string(), "date".to_string()],
        sections: vec!["items".to_string()],
        total_count: 3,
    })
    .expect("sample variable set is consistent");

    TemplateMetadata {
        id: id.to_string(),
        name: "Offer letter".to_string(),
        original_filename: "offer.docx".to_string(),
        file_size_bytes: 2048,
        variables_detected: variables,
    }
}

/// A DOCX upload of `size` filler bytes
pub fn docx_file(name: &str, size: usize) -> DocumentFile {
    DocumentFile {
        name: name.to_string(),
        content_type: DOCX_MIME_TYPE.to_string(),
        bytes: vec![b'x'; size],
    }
}

fn unavailable() -> ServiceError {
    ServiceError::Status {
        status: 503,
        body: "service unavailable".to_string(),
    }
}

#[derive(Default)]
struct MockState {
    templates: HashMap<String, TemplateMetadata>,
    template_failures: usize,
    detection: Option<DetectedTemplate>,
    merge: Option<MergeResponse>,
    merged_values: Vec<VariableValues>,
    format_session: Option<String>,
    conversion: Option<DownloadedDocument>,
    downloads: HashMap<String, DownloadedDocument>,
    session: Option<FormattingSession>,
    fail_session_polls: bool,
    calls: HashMap<&'static str, usize>,
}

/// Scripted in-memory document service.
///
/// Anything not scripted answers with a retryable 503, except template
/// lookups and downloads of unknown ids, which answer "not found".
#[derive(Default)]
pub struct MockDocumentService {
    state: Mutex<MockState>,
}

impl MockDocumentService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_template(&self, template: TemplateMetadata) {
        let mut state = self.state.lock().unwrap();
        state.templates.insert(template.id.clone(), template);
    }

    /// Fail the next `count` template lookups with a 503
    pub fn fail_template_fetches(&self, count: usize) {
        self.state.lock().unwrap().template_failures = count;
    }

    pub fn set_detection(&self, detected: DetectedTemplate) {
        self.state.lock().unwrap().detection = Some(detected);
    }

    pub fn set_merge_result(&self, bytes: Vec<u8>, document_id: Option<&str>) {
        self.state.lock().unwrap().merge = Some(MergeResponse {
            document: MergedDocument {
                content_type: DOCX_MIME_TYPE.to_string(),
                bytes,
            },
            document_id: document_id.map(str::to_string),
        });
    }

    pub fn set_format_session(&self, session_id: &str) {
        self.state.lock().unwrap().format_session = Some(session_id.to_string());
    }

    pub fn set_conversion(&self, filename: Option<&str>, content_type: &str, bytes: Vec<u8>) {
        self.state.lock().unwrap().conversion = Some(DownloadedDocument {
            filename: filename.map(str::to_string),
            content_type: content_type.to_string(),
            bytes,
        });
    }

    pub fn set_download(&self, document_id: &str, filename: Option<&str>, bytes: Vec<u8>) {
        self.state.lock().unwrap().downloads.insert(
            document_id.to_string(),
            DownloadedDocument {
                filename: filename.map(str::to_string),
                content_type: DOCX_MIME_TYPE.to_string(),
                bytes,
            },
        );
    }

    /// Replace the progress document served for polling
    pub fn set_session(&self, session: FormattingSession) {
        self.state.lock().unwrap().session = Some(session);
    }

    pub fn fail_session_polls(&self) {
        self.state.lock().unwrap().fail_session_polls = true;
    }

    pub fn call_count(&self, operation: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .get(operation)
            .copied()
            .unwrap_or(0)
    }

    /// Values received by every merge call, in order
    pub fn merged_values(&self) -> Vec<VariableValues> {
        self.state.lock().unwrap().merged_values.clone()
    }

    fn record(&self, operation: &'static str) -> std::sync::MutexGuard<'_, MockState> {
        let mut state = self.state.lock().unwrap();
        *state.calls.entry(operation).or_insert(0) += 1;
        state
    }
}

#[async_trait::async_trait]
impl DocumentService for MockDocumentService {
    async fn detect_variables(&self, _file: &DocumentFile) -> Result<DetectedTemplate, ServiceError> {
        self.record("detect_variables")
            .detection
            .clone()
            .ok_or_else(unavailable)
    }

    async fn get_template(&self, template_id: &str) -> Result<TemplateMetadata, ServiceError> {
        let mut state = self.record("get_template");
        if state.template_failures > 0 {
            state.template_failures -= 1;
            return Err(unavailable());
        }
        state
            .templates
            .get(template_id)
            .cloned()
            .ok_or(ServiceError::NotFound)
    }

    async fn merge_variables(
        &self,
        _template_id: &str,
        values: &VariableValues,
    ) -> Result<MergeResponse, ServiceError> {
        let mut state = self.record("merge_variables");
        state.merged_values.push(values.clone());
        state.merge.clone().ok_or_else(unavailable)
    }

    async fn start_formatting(&self, _document: &DocumentFile) -> Result<String, ServiceError> {
        self.record("start_formatting")
            .format_session
            .clone()
            .ok_or_else(unavailable)
    }

    async fn convert_document(
        &self,
        _document: &DocumentFile,
    ) -> Result<DownloadedDocument, ServiceError> {
        self.record("convert_document")
            .conversion
            .clone()
            .ok_or_else(unavailable)
    }

    async fn download_document(
        &self,
        document_id: &str,
    ) -> Result<DownloadedDocument, ServiceError> {
        self.record("download_document")
            .downloads
            .get(document_id)
            .cloned()
            .ok_or(ServiceError::NotFound)
    }

    async fn get_formatting_session(
        &self,
        session_id: &str,
    ) -> Result<Option<FormattingSession>, ServiceError> {
        let state = self.record("get_formatting_session");
        if state.fail_session_polls {
            return Err(unavailable());
        }
        Ok(state
            .session
            .clone()
            .filter(|s| s.session_id == session_id))
    }
}

/// Event sink that keeps everything it is given
#[derive(Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<TrackedEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TrackedEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Event tags in the order they were tracked
    pub fn names(&self) -> Vec<String> {
        self.events()
            .iter()
            .filter_map(|e| {
                serde_json::to_value(&e.event)
                    .ok()
                    .and_then(|v| v["event"].as_str().map(str::to_string))
            })
            .collect()
    }
}

impl EventSink for RecordingEventSink {
    fn track(&self, event: TrackedEvent) {
        self.events.lock().unwrap().push(event);
    }
}
