use super::disposition::filename_from_content_disposition;
use super::models::{
    DetectedTemplate, DocumentFile, DownloadedDocument, FormatJobStarted, MergeResponse,
    TemplateMetadata,
};
use crate::config::Config;
use crate::progress::FormattingSession;
use crate::stage_store::MergedDocument;
use crate::template::VariableValues;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, CONTENT_DISPOSITION, CONTENT_TYPE};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Error as ReqwestError, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Header carrying the id of a freshly merged document
pub const DOCUMENT_ID_HEADER: &str = "X-Document-ID";

const USER_AGENT: &str = "docflow/0.1";
const DEFAULT_BINARY_TYPE: &str = "application/octet-stream";

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] ReqwestError),
    #[error("Service returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Resource not found")]
    NotFound,
    #[error("Not authorized")]
    Unauthorized,
    #[error("Invalid response: {0}")]
    Decode(String),
}

impl ServiceError {
    /// Transport failures and server-side errors may succeed on a later attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            ServiceError::Request(e) => !e.is_decode() && !e.is_builder(),
            ServiceError::Status { status, .. } => *status >= 500 || *status == 429,
            ServiceError::NotFound | ServiceError::Unauthorized | ServiceError::Decode(_) => false,
        }
    }
}

/// Operations of the remote document-processing service
#[async_trait]
pub trait DocumentService: Send + Sync {
    async fn detect_variables(&self, file: &DocumentFile) -> Result<DetectedTemplate, ServiceError>;

    async fn get_template(&self, template_id: &str) -> Result<TemplateMetadata, ServiceError>;

    async fn merge_variables(
        &self,
        template_id: &str,
        values: &VariableValues,
    ) -> Result<MergeResponse, ServiceError>;

    /// Start an asynchronous formatting job, returning its session id
    async fn start_formatting(&self, document: &DocumentFile) -> Result<String, ServiceError>;

    async fn convert_document(
        &self,
        document: &DocumentFile,
    ) -> Result<DownloadedDocument, ServiceError>;

    async fn download_document(&self, document_id: &str)
        -> Result<DownloadedDocument, ServiceError>;

    /// Current progress document of a formatting session; `None` once pruned
    async fn get_formatting_session(
        &self,
        session_id: &str,
    ) -> Result<Option<FormattingSession>, ServiceError>;
}

/// HTTP client for the document-processing service
#[derive(Clone)]
pub struct DocumentServiceClient {
    client: Client,
    base_url: String,
    api_token: Option<String>,
}

impl DocumentServiceClient {
    pub fn new(base_url: impl Into<String>, api_token: Option<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client: Client::new(),
            base_url,
            api_token,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.api_base_url.clone(), config.api_token.clone())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        debug!("{} {}", method, url);

        let builder = self
            .client
            .request(method, url)
            .header("User-Agent", USER_AGENT);

        match &self.api_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn file_form(file: &DocumentFile) -> Result<Form, ServiceError> {
        let part = Part::bytes(file.bytes.clone())
            .file_name(file.name.clone())
            .mime_str(&file.content_type)?;
        Ok(Form::new().part("file", part))
    }

    /// Map non-success statuses to errors, passing successful responses through
    async fn check_status(response: Response) -> Result<Response, ServiceError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        match status {
            StatusCode::NOT_FOUND => Err(ServiceError::NotFound),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                warn!("✗ Document service rejected credentials ({})", status);
                Err(ServiceError::Unauthorized)
            }
            _ => {
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                warn!("✗ Document service error ({}): {}", status, body);
                Err(ServiceError::Status {
                    status: status.as_u16(),
                    body,
                })
            }
        }
    }

    async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, ServiceError> {
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| ServiceError::Decode(e.to_string()))
    }

    async fn read_binary(response: Response) -> Result<DownloadedDocument, ServiceError> {
        let headers = response.headers().clone();
        let bytes = response.bytes().await?.to_vec();

        Ok(DownloadedDocument {
            filename: header_str(&headers, CONTENT_DISPOSITION.as_str())
                .and_then(filename_from_content_disposition),
            content_type: content_type(&headers),
            bytes,
        })
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn content_type(headers: &HeaderMap) -> String {
    header_str(headers, CONTENT_TYPE.as_str())
        .unwrap_or(DEFAULT_BINARY_TYPE)
        .to_string()
}

#[async_trait]
impl DocumentService for DocumentServiceClient {
    async fn detect_variables(&self, file: &DocumentFile) -> Result<DetectedTemplate, ServiceError> {
        info!(
            "📡 Detecting variables in '{}' ({} bytes)",
            file.name,
            file.bytes.len()
        );

        let response = self
            .request(Method::POST, "/templates/detect-variables")
            .multipart(Self::file_form(file)?)
            .send()
            .await?;
        let detected: DetectedTemplate = Self::read_json(Self::check_status(response).await?).await?;

        info!(
            "✓ Detected {} simple and {} section variable(s)",
            detected.variables.simple.len(),
            detected.variables.sections.len()
        );
        Ok(detected)
    }

    async fn get_template(&self, template_id: &str) -> Result<TemplateMetadata, ServiceError> {
        let path = format!("/templates/{}", urlencoding::encode(template_id));
        let response = self.request(Method::GET, &path).send().await?;
        Self::read_json(Self::check_status(response).await?).await
    }

    async fn merge_variables(
        &self,
        template_id: &str,
        values: &VariableValues,
    ) -> Result<MergeResponse, ServiceError> {
        info!(
            "📡 Merging {} value(s) into template {}",
            values.len(),
            template_id
        );

        let path = format!("/templates/{}/merge", urlencoding::encode(template_id));
        let response = self
            .request(Method::POST, &path)
            .json(&serde_json::json!({ "variables": values }))
            .send()
            .await?;
        let response = Self::check_status(response).await?;

        let headers = response.headers().clone();
        let document_id = header_str(&headers, DOCUMENT_ID_HEADER).map(str::to_string);
        let bytes = response.bytes().await?.to_vec();

        if document_id.is_none() {
            warn!("Merge response for template {} has no {}", template_id, DOCUMENT_ID_HEADER);
        }

        Ok(MergeResponse {
            document: MergedDocument {
                content_type: content_type(&headers),
                bytes,
            },
            document_id,
        })
    }

    async fn start_formatting(&self, document: &DocumentFile) -> Result<String, ServiceError> {
        info!("📡 Starting formatting job for '{}'", document.name);

        let response = self
            .request(Method::POST, "/documents/format")
            .multipart(Self::file_form(document)?)
            .send()
            .await?;
        let response = Self::check_status(response).await?;
        if response.status() != StatusCode::ACCEPTED {
            debug!(
                "Formatting job started with status {} (expected 202)",
                response.status()
            );
        }

        let started: FormatJobStarted = Self::read_json(response).await?;
        if started.session_id.trim().is_empty() {
            return Err(ServiceError::Decode(
                "formatting job returned an empty session_id".to_string(),
            ));
        }

        info!("✓ Formatting session {} started", started.session_id);
        Ok(started.session_id)
    }

    async fn convert_document(
        &self,
        document: &DocumentFile,
    ) -> Result<DownloadedDocument, ServiceError> {
        info!("📡 Converting '{}'", document.name);

        let response = self
            .request(Method::POST, "/documents/convert")
            .multipart(Self::file_form(document)?)
            .send()
            .await?;
        Self::read_binary(Self::check_status(response).await?).await
    }

    async fn download_document(
        &self,
        document_id: &str,
    ) -> Result<DownloadedDocument, ServiceError> {
        info!("📡 Downloading document {}", document_id);

        let path = format!("/documents/{}/download", urlencoding::encode(document_id));
        let response = self.request(Method::GET, &path).send().await?;
        Self::read_binary(Self::check_status(response).await?).await
    }

    async fn get_formatting_session(
        &self,
        session_id: &str,
    ) -> Result<Option<FormattingSession>, ServiceError> {
        let path = format!("/format/sessions/{}", urlencoding::encode(session_id));
        let response = self.request(Method::GET, &path).send().await?;

        match Self::check_status(response).await {
            Ok(response) => Self::read_json(response).await.map(Some),
            Err(ServiceError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = DocumentServiceClient::new("http://localhost:8000/", Some("t".to_string()));
        assert_eq!(client.base_url(), "http://localhost:8000");
        assert_eq!(client.api_token.as_deref(), Some("t"));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(ServiceError::Status {
            status: 503,
            body: String::new()
        }
        .is_retryable());
        assert!(!ServiceError::Status {
            status: 422,
            body: String::new()
        }
        .is_retryable());
        assert!(!ServiceError::NotFound.is_retryable());
        assert!(!ServiceError::Decode("bad".to_string()).is_retryable());
    }
}
