mod disposition;
mod models;
mod service;
mod template_cache;

pub use disposition::filename_from_content_disposition;
pub use models::{
    DetectedTemplate, DocumentFile, DownloadedDocument, MergeResponse, TemplateMetadata,
};
pub use service::{DocumentService, DocumentServiceClient, ServiceError, DOCUMENT_ID_HEADER};
pub use template_cache::{RetryPolicy, TemplateMetadataCache};
