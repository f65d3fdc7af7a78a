// End-to-end generation flow against a mock document service over HTTP

mod support;

use docflow::config::Config;
use docflow::progress::FormatPhase;
use docflow::stage_store::{SqliteStorage, StageKey, StageStore};
use docflow::stages::{DownloadFormat, FillState, PreviewState, Route, WorkflowError};
use docflow::Workflow;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use support::{docx, spawn_mock_service, tracing_init};
use tempfile::TempDir;

async fn workflow_for(base_url: &str, dir: &TempDir) -> (Workflow, StageStore) {
    let config = Config {
        api_base_url: base_url.to_string(),
        store_path: dir.path().join("stage_store.db"),
        progress_poll_interval: Duration::from_millis(10),
        template_retry_interval: Duration::from_millis(10),
        ..Config::default()
    };

    let storage = SqliteStorage::open(&config.store_path, config.store_quota_bytes)
        .await
        .unwrap();
    let store = StageStore::new(Arc::new(storage));
    (Workflow::from_config(&config, store.clone()), store)
}

#[tokio::test]
async fn test_upload_fill_export_format_download() {
    tracing_init();
    let (base_url, service) = spawn_mock_service().await;
    let dir = TempDir::new().unwrap();
    let (workflow, store) = workflow_for(&base_url, &dir).await;

    // Upload
    let summary = workflow
        .upload_stage()
        .submit(docx("Offer.docx", 256))
        .await
        .unwrap();
    assert_eq!((summary.simple_count, summary.section_count), (2, 1));
    let Some(Route::Fill { template_id }) = summary.next_route() else {
        panic!("detection should name the template");
    };

    // Fill
    let mut fill = workflow.enter_fill(Some(template_id.as_str())).ready().unwrap();
    assert_eq!(fill.load().await, None);
    fill.set_simple("client_name", "Acme").unwrap();
    fill.set_simple("date", "2024-05-01").unwrap();
    fill.set_section_title("items", 0, "A").unwrap();
    fill.set_table_row("items", 0, 0, "k1", "v1").unwrap();

    let outcome = fill.submit().await.unwrap();
    assert_eq!(outcome.document_id.as_deref(), Some("d1"));
    assert_eq!(fill.state(), &FillState::Success { document_id: Some("d1".to_string()) });
    outcome.artifact_write.await.unwrap().unwrap();

    assert_eq!(
        service.merge_bodies.lock().unwrap()[0],
        json!({
            "variables": {
                "client_name": "Acme",
                "date": "2024-05-01",
                "items": [{"title": "A", "table_rows": [{"key": "k1", "value": "v1"}]}]
            }
        })
    );

    // Export
    let Route::Export { template_id } = outcome.next else {
        panic!("fill should hand off to export");
    };
    let export = workflow.enter_export(Some(template_id.as_str())).await.ready().unwrap();
    match export.preview().await {
        PreviewState::Ready(document) => assert_eq!(document.bytes, b"merged document"),
        other => panic!("unexpected preview: {:?}", other),
    }

    let converted = export.download(DownloadFormat::Converted).await.unwrap();
    assert_eq!(converted.filename, "converted.pdf");

    // Live format
    let Route::LiveFormat {
        session_id,
        template_id,
    } = export.start_formatting().await.unwrap()
    else {
        panic!("export should hand off to live format");
    };
    let mut live = workflow
        .enter_live_format(Some(session_id.as_str()), template_id.as_deref())
        .await
        .ready()
        .unwrap();

    assert_eq!(live.run_to_completion().await, &FormatPhase::Complete);
    assert_eq!(live.artifact_url(), Some("http://cdn.example.com/u1.pdf"));
    assert_eq!(live.progress_log().len(), 2);

    let result = live.download_result().await.unwrap();
    assert_eq!(result.filename, "Final Offer.docx");
    assert_eq!(result.bytes, b"formatted document");
    live.leave();

    // Start a new document
    let export = workflow.enter_export(Some("t1")).await.ready().unwrap();
    assert_eq!(export.start_new_document().await.unwrap(), Route::Dashboard);
    for key in StageKey::ALL {
        assert!(!store.contains(key).await);
    }
}

#[tokio::test]
async fn test_out_of_order_entry_redirects() {
    tracing_init();
    let (base_url, _service) = spawn_mock_service().await;
    let dir = TempDir::new().unwrap();
    let (workflow, _) = workflow_for(&base_url, &dir).await;

    assert_eq!(workflow.enter_fill(None).redirect_target(), Some(&Route::Upload));
    assert_eq!(
        workflow.enter_export(Some("t1")).await.redirect_target(),
        Some(&Route::Fill {
            template_id: "t1".to_string()
        })
    );
    assert_eq!(
        workflow.enter_live_format(None, Some("t1")).await.redirect_target(),
        Some(&Route::Export {
            template_id: "t1".to_string()
        })
    );

    let mut fill = workflow.enter_fill(Some("unknown")).ready().unwrap();
    assert_eq!(fill.load().await, Some(Route::Upload));
}

#[tokio::test]
async fn test_missing_document_id_advances_with_warning() {
    tracing_init();
    let (base_url, service) = spawn_mock_service().await;
    *service.omit_document_id.lock().unwrap() = true;
    let dir = TempDir::new().unwrap();
    let (workflow, _) = workflow_for(&base_url, &dir).await;

    workflow
        .upload_stage()
        .submit(docx("Offer.docx", 64))
        .await
        .unwrap();
    let mut fill = workflow.enter_fill(Some("t1")).ready().unwrap();
    fill.load().await;
    fill.set_simple("client_name", "Acme").unwrap();
    fill.set_simple("date", "today").unwrap();

    let outcome = fill.submit().await.unwrap();
    assert_eq!(outcome.warning, Some(WorkflowError::MissingDocumentId));
    outcome.artifact_write.await.unwrap().unwrap();

    let export = workflow.enter_export(Some("t1")).await.ready().unwrap();
    let original = export.download(DownloadFormat::Original).await.unwrap();
    assert_eq!(original.filename, "Offer.docx");
}

#[tokio::test]
async fn test_quota_rejection_leaves_previous_upload() {
    tracing_init();
    let (base_url, _service) = spawn_mock_service().await;
    let dir = TempDir::new().unwrap();
    let config = Config {
        api_base_url: base_url,
        store_quota_bytes: 4096,
        ..Config::default()
    };
    let storage = SqliteStorage::open(&dir.path().join("small.db"), config.store_quota_bytes)
        .await
        .unwrap();
    let store = StageStore::new(Arc::new(storage));
    let workflow = Workflow::from_config(&config, store.clone());

    workflow
        .upload_stage()
        .submit(docx("small.docx", 128))
        .await
        .unwrap();

    let err = workflow
        .upload_stage()
        .submit(docx("large.docx", 8192))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::StorageQuotaExceeded { .. }));
    assert!(err.user_message().contains("reduce the file size"));

    let descriptor: docflow::stage_store::UploadedFileDescriptor = store.get().await.unwrap();
    assert_eq!(descriptor.name, "small.docx");
}
