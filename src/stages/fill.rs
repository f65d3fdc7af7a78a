use super::{Route, Workflow, WorkflowError, DOCX_MIME_TYPE};
use crate::analytics::WorkflowEvent;
use crate::client::{ServiceError, TemplateMetadata};
use crate::stage_store::{
    MergedSlot, MergedWriteFailure, StageBatch, StageKey, StageStoreError, UploadedFileDescriptor,
};
use crate::template::{
    validate_for_fill, FieldErrors, SectionInstance, TemplateVariableSet, VariableValues,
};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FillState {
    Loading,
    Ready,
    Submitting,
    Success { document_id: Option<String> },
    Error(WorkflowError),
}

/// Result of a merge submission.
///
/// The flow always advances to `next`, even when `warning` carries a
/// `MissingDocumentId`. The merged bytes reach the stage store through
/// `artifact_write`, which may still be running when Export opens. When the
/// write fails, a `MergedSlot::WriteFailed` marker takes the bytes' place.
#[derive(Debug)]
pub struct SubmitOutcome {
    pub next: Route,
    pub document_id: Option<String>,
    pub warning: Option<WorkflowError>,
    pub artifact_write: JoinHandle<Result<(), StageStoreError>>,
}

/// Form over one template's variables
pub struct FillStage {
    workflow: Workflow,
    template_id: String,
    state: FillState,
    metadata: Option<TemplateMetadata>,
    values: VariableValues,
    field_errors: FieldErrors,
}

impl FillStage {
    pub(super) fn new(workflow: Workflow, template_id: String) -> Self {
        Self {
            workflow,
            template_id,
            state: FillState::Loading,
            metadata: None,
            values: VariableValues::default(),
            field_errors: FieldErrors::new(),
        }
    }

    pub fn template_id(&self) -> &str {
        &self.template_id
    }

    pub fn state(&self) -> &FillState {
        &self.state
    }

    pub fn metadata(&self) -> Option<&TemplateMetadata> {
        self.metadata.as_ref()
    }

    pub fn variables(&self) -> Option<&TemplateVariableSet> {
        self.metadata.as_ref().map(|m| &m.variables_detected)
    }

    pub fn values(&self) -> &VariableValues {
        &self.values
    }

    pub fn field_errors(&self) -> &FieldErrors {
        &self.field_errors
    }

    /// Fetch the template and prepare the form.
    ///
    /// Returns the route to leave for when the template does not exist.
    /// Transport failures leave the stage in `Error` with a retryable error;
    /// calling `load` again retries.
    pub async fn load(&mut self) -> Option<Route> {
        self.state = FillState::Loading;

        let metadata = match self.workflow.templates.get(&self.template_id).await {
            Ok(metadata) => metadata,
            Err(ServiceError::NotFound) => {
                info!("Template {} not found, redirecting to upload", self.template_id);
                return Some(Route::Upload);
            }
            Err(e) => {
                warn!("✗ Failed to load template {}: {}", self.template_id, e);
                self.state = FillState::Error(e.into());
                return None;
            }
        };

        self.values = self.restore_values(&metadata.variables_detected).await;
        self.metadata = Some(metadata);
        self.field_errors.clear();
        self.state = FillState::Ready;
        debug!("Fill stage ready for template {}", self.template_id);
        None
    }

    /// Values left by an earlier visit, fitted to the template; fresh ones otherwise
    async fn restore_values(&self, variables: &TemplateVariableSet) -> VariableValues {
        let Some(mut stored) = self.workflow.store.get::<VariableValues>().await else {
            return VariableValues::initialize(variables);
        };

        for name in stored.reconcile(variables) {
            warn!("Stored value for '{}' no longer matches its kind, resetting it", name);
        }
        stored
    }

    pub fn set_simple(&mut self, name: &str, value: impl Into<String>) -> Result<(), WorkflowError> {
        self.values.set_simple(name, value)?;
        self.clear_field_error(name);
        Ok(())
    }

    pub fn add_section_instance(&mut self, section: &str) -> Result<usize, WorkflowError> {
        let index = self.values.add_section_instance(section)?;
        self.clear_field_error(section);
        Ok(index)
    }

    pub fn remove_section_instance(
        &mut self,
        section: &str,
        index: usize,
    ) -> Result<SectionInstance, WorkflowError> {
        Ok(self.values.remove_section_instance(section, index)?)
    }

    pub fn can_remove_section_instance(&self, section: &str) -> bool {
        self.values.can_remove_section_instance(section)
    }

    pub fn set_section_title(
        &mut self,
        section: &str,
        instance: usize,
        title: impl Into<String>,
    ) -> Result<(), WorkflowError> {
        self.values.set_section_title(section, instance, title)?;
        self.clear_field_error(section);
        Ok(())
    }

    pub fn add_table_row(&mut self, section: &str, instance: usize) -> Result<usize, WorkflowError> {
        Ok(self.values.add_table_row(section, instance)?)
    }

    pub fn remove_table_row(
        &mut self,
        section: &str,
        instance: usize,
        row: usize,
    ) -> Result<(), WorkflowError> {
        self.values.remove_table_row(section, instance, row)?;
        Ok(())
    }

    pub fn can_remove_table_row(&self, section: &str, instance: usize) -> bool {
        self.values
            .section(section)
            .and_then(|instances| instances.get(instance))
            .map(|inst| inst.table_rows.len() > 1)
            .unwrap_or(false)
    }

    pub fn set_table_row(
        &mut self,
        section: &str,
        instance: usize,
        row: usize,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), WorkflowError> {
        self.values.set_table_row(section, instance, row, key, value)?;
        self.clear_field_error(section);
        Ok(())
    }

    fn clear_field_error(&mut self, name: &str) {
        if self.field_errors.remove(name).is_some() && self.field_errors.is_empty() {
            if let FillState::Error(WorkflowError::Validation(_)) = self.state {
                self.state = FillState::Ready;
            }
        }
    }

    /// Validate, persist the form's artifacts, and merge.
    ///
    /// Invalid input never reaches the service. Merge failures are not
    /// retried here; the stage stays in `Error` and the caller may submit again.
    pub async fn submit(&mut self) -> Result<SubmitOutcome, WorkflowError> {
        let Some(metadata) = self.metadata.clone() else {
            return Err(WorkflowError::Template(
                "template has not been loaded".to_string(),
            ));
        };

        let errors = validate_for_fill(&metadata.variables_detected, &self.values);
        if !errors.is_empty() {
            debug!("{} field(s) failed validation", errors.len());
            self.field_errors = errors.clone();
            self.state = FillState::Error(WorkflowError::Validation(errors));
            return Err(WorkflowError::Validation(self.field_errors.clone()));
        }

        self.state = FillState::Submitting;
        match self.persist_and_merge(&metadata).await {
            Ok(outcome) => {
                self.state = FillState::Success {
                    document_id: outcome.document_id.clone(),
                };
                Ok(outcome)
            }
            Err(e) => {
                warn!("✗ Merge for template {} failed: {}", self.template_id, e);
                self.state = FillState::Error(e.clone());
                Err(e)
            }
        }
    }

    async fn persist_and_merge(
        &self,
        metadata: &TemplateMetadata,
    ) -> Result<SubmitOutcome, WorkflowError> {
        let store = &self.workflow.store;

        let descriptor = match store.get::<UploadedFileDescriptor>().await {
            Some(descriptor) => descriptor,
            None => descriptor_for_template(metadata),
        };
        let batch = StageBatch::new()
            .put(&self.values)?
            .put(&metadata.variables_detected)?
            .put(&descriptor)?
            .remove(StageKey::MergedDocument);
        store.commit(batch).await?;

        let response = self
            .workflow
            .service
            .merge_variables(&self.template_id, &self.values)
            .await?;

        let warning = if response.document_id.is_none() {
            warn!("Merged document for {} has no id, continuing to export", self.template_id);
            Some(WorkflowError::MissingDocumentId)
        } else {
            None
        };

        self.workflow.track(WorkflowEvent::MergeSubmitted {
            template_id: self.template_id.clone(),
            document_id: response.document_id.clone(),
        });

        let document = response.document;
        let writer = store.clone();
        let artifact_write = tokio::spawn(async move {
            let result = writer.put(&document).await;
            if let Err(e) = &result {
                warn!("✗ Failed to store merged document: {}", e);
                let marker = MergedSlot::WriteFailed(MergedWriteFailure::from(e));
                if let Err(marker_err) = writer.put(&marker).await {
                    warn!("✗ Failed to record merged document failure: {}", marker_err);
                }
            }
            result
        });

        info!("✓ Merged template {}", self.template_id);
        Ok(SubmitOutcome {
            next: Route::Export {
                template_id: self.template_id.clone(),
            },
            document_id: response.document_id,
            warning,
            artifact_write,
        })
    }
}

/// Descriptor for a flow that started from a stored template instead of an upload
fn descriptor_for_template(metadata: &TemplateMetadata) -> UploadedFileDescriptor {
    UploadedFileDescriptor {
        name: metadata.original_filename.clone(),
        size: metadata.file_size_bytes,
        mime_type: DOCX_MIME_TYPE.to_string(),
        raw_bytes_encoded: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::ProgressHub;
    use crate::stage_store::{MergedDocument, StageStore};
    use crate::test_support::{sample_template, MockDocumentService};
    use std::sync::Arc;

    fn setup() -> (Arc<MockDocumentService>, StageStore, Workflow) {
        let service = Arc::new(MockDocumentService::new());
        service.add_template(sample_template("t1"));
        let store = StageStore::in_memory(1024 * 1024);
        let workflow = Workflow::new(store.clone(), service.clone(), Arc::new(ProgressHub::new()));
        (service, store, workflow)
    }

    async fn ready_stage(workflow: &Workflow) -> FillStage {
        let mut stage = workflow.enter_fill(Some("t1")).ready().unwrap();
        assert_eq!(stage.load().await, None);
        assert_eq!(stage.state(), &FillState::Ready);
        stage
    }

    #[tokio::test]
    async fn test_missing_template_reference_redirects_to_upload() {
        let (_, _, workflow) = setup();
        assert_eq!(
            workflow.enter_fill(None).redirect_target(),
            Some(&Route::Upload)
        );
        assert_eq!(
            workflow.enter_fill(Some(" ")).redirect_target(),
            Some(&Route::Upload)
        );
    }

    #[tokio::test]
    async fn test_unknown_template_redirects_without_retry() {
        let (service, _, workflow) = setup();
        let mut stage = workflow.enter_fill(Some("missing")).ready().unwrap();

        assert_eq!(stage.load().await, Some(Route::Upload));
        assert_eq!(service.call_count("get_template"), 1);
    }

    #[tokio::test]
    async fn test_fresh_values_fail_validation() {
        let (service, _, workflow) = setup();
        let mut stage = ready_stage(&workflow).await;

        let err = stage.submit().await.unwrap_err();
        match &err {
            WorkflowError::Validation(errors) => {
                assert_eq!(errors.get("client_name").map(String::as_str), Some("client_name is required"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(matches!(stage.state(), FillState::Error(_)));
        assert_eq!(service.call_count("merge_variables"), 0);

        stage.set_simple("client_name", "Acme").unwrap();
        stage.set_simple("date", "2024-05-01").unwrap();
        assert!(stage.field_errors().is_empty());
        assert_eq!(stage.state(), &FillState::Ready);
    }

    #[tokio::test]
    async fn test_section_minimums() {
        let (_, _, workflow) = setup();
        let mut stage = ready_stage(&workflow).await;

        assert!(!stage.can_remove_section_instance("items"));
        assert!(stage.remove_section_instance("items", 0).is_err());
        assert!(!stage.can_remove_table_row("items", 0));

        let added = stage.add_section_instance("items").unwrap();
        assert_eq!(added, 1);
        assert!(stage.can_remove_section_instance("items"));
        stage.remove_section_instance("items", 1).unwrap();
        assert_eq!(stage.values().section("items").map(|s| s.len()), Some(1));
    }

    #[tokio::test]
    async fn test_submit_persists_and_stores_merged_bytes() {
        let (service, store, workflow) = setup();
        service.set_merge_result(b"merged".to_vec(), Some("d1"));
        let mut stage = ready_stage(&workflow).await;
        stage.set_simple("client_name", "Acme").unwrap();
        stage.set_simple("date", "2024-05-01").unwrap();

        let outcome = stage.submit().await.unwrap();
        assert_eq!(
            outcome.next,
            Route::Export {
                template_id: "t1".to_string()
            }
        );
        assert_eq!(outcome.document_id.as_deref(), Some("d1"));
        assert!(outcome.warning.is_none());

        outcome.artifact_write.await.unwrap().unwrap();
        let merged: MergedDocument = store.get().await.unwrap();
        assert_eq!(merged.bytes, b"merged");

        let values: VariableValues = store.get().await.unwrap();
        assert_eq!(values.simple("client_name"), Some("Acme"));
        assert!(store.contains(StageKey::UploadedFile).await);
    }

    #[tokio::test]
    async fn test_missing_document_id_still_advances() {
        let (service, _, workflow) = setup();
        service.set_merge_result(b"merged".to_vec(), None);
        let mut stage = ready_stage(&workflow).await;
        stage.set_simple("client_name", "Acme").unwrap();
        stage.set_simple("date", "2024-05-01").unwrap();

        let outcome = stage.submit().await.unwrap();
        assert_eq!(outcome.warning, Some(WorkflowError::MissingDocumentId));
        assert!(matches!(outcome.next, Route::Export { .. }));
        assert_eq!(stage.state(), &FillState::Success { document_id: None });
    }

    #[tokio::test]
    async fn test_stored_values_survive_reentry() {
        let (service, _, workflow) = setup();
        service.set_merge_result(b"merged".to_vec(), Some("d1"));
        let mut stage = ready_stage(&workflow).await;
        stage.set_simple("client_name", "Acme").unwrap();
        stage.set_simple("date", "2024-05-01").unwrap();
        stage.set_table_row("items", 0, 0, "k1", "v1").unwrap();
        stage.submit().await.unwrap();

        let again = ready_stage(&workflow).await;
        assert_eq!(again.values().simple("client_name"), Some("Acme"));
        assert_eq!(
            again.values().section("items").unwrap()[0].table_rows[0].key,
            "k1"
        );
    }

    #[tokio::test]
    async fn test_wrong_kind_value_resets_alone() {
        let (_, store, workflow) = setup();
        let stored: VariableValues = serde_json::from_value(serde_json::json!({
            "client_name": "Acme",
            "date": [],
            "items": [{"title": "Kept", "table_rows": [{"key": "k1", "value": "v1"}]}]
        }))
        .unwrap();
        store.put(&stored).await.unwrap();

        let stage = ready_stage(&workflow).await;
        assert_eq!(stage.values().simple("client_name"), Some("Acme"));
        assert_eq!(stage.values().simple("date"), Some(""));
        assert_eq!(stage.values().section("items").unwrap()[0].title, "Kept");
    }

    #[tokio::test]
    async fn test_oversized_merge_result_leaves_failure_marker() {
        let service = Arc::new(MockDocumentService::new());
        service.add_template(sample_template("t1"));
        service.set_merge_result(vec![b'x'; 4096], Some("d1"));
        let store = StageStore::in_memory(2048);
        let workflow = Workflow::new(store.clone(), service.clone(), Arc::new(ProgressHub::new()));

        let mut stage = ready_stage(&workflow).await;
        stage.set_simple("client_name", "Acme").unwrap();
        stage.set_simple("date", "2024-05-01").unwrap();

        let outcome = stage.submit().await.unwrap();
        assert!(matches!(
            outcome.artifact_write.await.unwrap(),
            Err(StageStoreError::QuotaExceeded { .. })
        ));
        assert!(matches!(
            store.get::<MergedSlot>().await,
            Some(MergedSlot::WriteFailed(MergedWriteFailure::QuotaExceeded { .. }))
        ));
    }
}
