#![allow(dead_code)]

pub mod mock_service;

pub use mock_service::{spawn_mock_service, MockServiceState};

use docflow::client::DocumentFile;

pub const DOCX: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Initialize tracing for tests with proper test output handling
pub fn tracing_init() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub fn docx(name: &str, size: usize) -> DocumentFile {
    DocumentFile {
        name: name.to_string(),
        content_type: DOCX.to_string(),
        bytes: vec![b'x'; size],
    }
}
