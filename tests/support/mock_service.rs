use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

/// What the mock document service has seen, plus knobs for its answers
#[derive(Default)]
pub struct MockServiceState {
    pub merge_bodies: Mutex<Vec<Value>>,
    pub session_polls: Mutex<usize>,
    /// Leave out the X-Document-ID header on merge responses
    pub omit_document_id: Mutex<bool>,
}

/// Start the mock service on an ephemeral port, returning its base URL
pub async fn spawn_mock_service() -> (String, Arc<MockServiceState>) {
    let state = Arc::new(MockServiceState::default());

    let app = Router::new()
        .route("/templates/detect-variables", post(detect_variables))
        .route("/templates/:id", get(get_template))
        .route("/templates/:id/merge", post(merge))
        .route("/documents/format", post(start_format))
        .route("/documents/convert", post(convert))
        .route("/documents/:id/download", get(download))
        .route("/format/sessions/:id", get(session))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock service");
    let addr = listener.local_addr().expect("mock service address");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("mock service");
    });

    (format!("http://{}", addr), state)
}

fn variables() -> Value {
    json!({
        "simple": ["client_name", "date"],
        "sections": ["items"],
        "total_count": 3
    })
}

async fn detect_variables(_body: Bytes) -> Json<Value> {
    let mut detected = variables();
    detected["template_id"] = json!("t1");
    Json(detected)
}

async fn get_template(Path(id): Path<String>) -> Response {
    if id != "t1" {
        return (StatusCode::NOT_FOUND, "template not found").into_response();
    }
    Json(json!({
        "id": "t1",
        "name": "Offer letter",
        "original_filename": "offer.docx",
        "file_size_bytes": 2048,
        "variables_detected": variables()
    }))
    .into_response()
}

async fn merge(
    State(state): State<Arc<MockServiceState>>,
    Path(_id): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    state.merge_bodies.lock().unwrap().push(body);

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(super::DOCX));
    if !*state.omit_document_id.lock().unwrap() {
        headers.insert("X-Document-ID", HeaderValue::from_static("d1"));
    }
    (headers, b"merged document".to_vec()).into_response()
}

async fn start_format(_body: Bytes) -> Response {
    (StatusCode::ACCEPTED, Json(json!({ "session_id": "s1" }))).into_response()
}

async fn convert(_body: Bytes) -> Response {
    (
        [
            (header::CONTENT_TYPE, "application/pdf"),
            (header::CONTENT_DISPOSITION, "attachment; filename=\"converted.pdf\""),
        ],
        b"%PDF-1.7".to_vec(),
    )
        .into_response()
}

async fn download(Path(id): Path<String>) -> Response {
    if id != "d1" {
        return StatusCode::NOT_FOUND.into_response();
    }
    (
        [
            (header::CONTENT_TYPE, super::DOCX),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename*=UTF-8''Final%20Offer.docx",
            ),
        ],
        b"formatted document".to_vec(),
    )
        .into_response()
}

/// Progresses one step per poll, then disappears as if pruned
async fn session(State(state): State<Arc<MockServiceState>>, Path(id): Path<String>) -> Response {
    let poll = {
        let mut polls = state.session_polls.lock().unwrap();
        *polls += 1;
        *polls
    };

    let body = match poll {
        1 => json!({ "session_id": id, "current_action": "Aligning tables", "history": [] }),
        2 => json!({
            "session_id": id,
            "current_action": "Formatting complete, ready for download",
            "latest_pdf_url": "http://cdn.example.com/u1.pdf",
            "document_id": "d1",
            "history": [
                { "action": "Aligning tables", "timestamp": "2024-05-01T10:00:00Z" },
                { "action": "Formatting complete, ready for download", "timestamp": "2024-05-01T10:00:05Z" }
            ]
        }),
        _ => return StatusCode::NOT_FOUND.into_response(),
    };
    Json(body).into_response()
}
