//! reqwest-based client for the document-processing REST API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{multipart, Client, Method, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::config::BackendConfig;
use crate::library::DocumentFilters;
use crate::queue::FileHandle;

use super::{
    BackendClient, BackendError, BatchProcessResponse, ClearResponse, DocumentsResponse,
    ExtractionResult, HealthResponse, ProgressCallback, StatsResponse, StatusResponse,
    UploadQueueResponse, UploadResponse,
};

/// Upload body chunk size; each chunk sent produces one progress report.
const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// HTTP implementation of [`BackendClient`].
pub struct HttpBackendClient {
    client: Client,
    config: BackendConfig,
}

impl HttpBackendClient {
    /// Create a new client for the configured backend.
    pub fn new(config: BackendConfig) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs as u64))
            .build()
            .map_err(|e| BackendError::ConnectionFailed(e.to_string()))?;

        Ok(Self { client, config })
    }

    /// Get the base URL without trailing slash.
    fn base_url(&self) -> &str {
        self.config.url.trim_end_matches('/')
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url(), path)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        path: &str,
    ) -> Result<T, BackendError> {
        let response = request.send().await.map_err(map_request_error)?;
        let response = check_status(response, path).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, BackendError> {
        debug!(path, "GET");
        let request = self.client.get(self.url(path)).query(query);
        self.send_json(request, path).await
    }

    async fn delete_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, BackendError> {
        debug!(path, "DELETE");
        let request = self.client.request(Method::DELETE, self.url(path));
        self.send_json(request, path).await
    }
}

/// Map a transport-level reqwest error.
fn map_request_error(e: reqwest::Error) -> BackendError {
    if e.is_timeout() {
        BackendError::Timeout
    } else if e.is_connect() {
        BackendError::ConnectionFailed(e.to_string())
    } else if e.is_decode() {
        BackendError::InvalidResponse(e.to_string())
    } else {
        BackendError::ConnectionFailed(e.to_string())
    }
}

/// Turn a non-2xx response into a [`BackendError`].
async fn check_status(response: Response, path: &str) -> Result<Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = error_message(&body).unwrap_or_else(|| {
        status
            .canonical_reason()
            .map(str::to_string)
            .unwrap_or_else(|| format!("HTTP {}", status.as_u16()))
    });

    warn!(path, status = status.as_u16(), %message, "Backend request failed");

    if status.as_u16() == 404 {
        Err(BackendError::NotFound(message))
    } else {
        Err(BackendError::Http {
            status: status.as_u16(),
            message,
        })
    }
}

/// Extract a human-readable message from a backend error body.
///
/// The backend answers with either `{"detail": ...}` or
/// `{"error": ..., "detail": ...}`.
fn error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    for key in ["detail", "error"] {
        match value.get(key) {
            Some(serde_json::Value::String(s)) if !s.is_empty() => return Some(s.clone()),
            Some(serde_json::Value::Null) | None => continue,
            Some(other) => return Some(other.to_string()),
        }
    }
    None
}

/// Rounded upload percentage.
fn percent(sent: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((sent as f64 * 100.0 / total as f64).round() as u8).min(100)
}

/// Split an upload body into chunks, reporting progress as each one is read.
fn progress_chunks(
    file: &FileHandle,
    progress: Option<ProgressCallback>,
) -> impl Iterator<Item = Result<Vec<u8>, std::io::Error>> + Send + 'static {
    let total = file.bytes.len();
    let bytes = file.bytes.clone();

    (0..total).step_by(UPLOAD_CHUNK_SIZE).map(move |start| {
        let end = (start + UPLOAD_CHUNK_SIZE).min(total);
        if let Some(cb) = &progress {
            cb(percent(end, total));
        }
        Ok(bytes[start..end].to_vec())
    })
}

/// Build the multipart form for `POST /upload`.
fn upload_form(
    file: &FileHandle,
    progress: Option<ProgressCallback>,
) -> Result<multipart::Form, BackendError> {
    let body = reqwest::Body::wrap_stream(futures::stream::iter(progress_chunks(file, progress)));

    let part = multipart::Part::stream_with_length(body, file.size())
        .file_name(file.name.clone())
        .mime_str(&file.mime_type)
        .map_err(|e| BackendError::InvalidUpload(e.to_string()))?;

    Ok(multipart::Form::new().part("file", part))
}

#[async_trait]
impl BackendClient for HttpBackendClient {
    fn name(&self) -> &str {
        "http"
    }

    async fn upload(
        &self,
        file: &FileHandle,
        progress: Option<ProgressCallback>,
    ) -> Result<UploadResponse, BackendError> {
        debug!(file = %file.name, size = file.size(), "Uploading file");

        let form = upload_form(file, progress)?;
        let request = self.client.post(self.url("/upload")).multipart(form);
        self.send_json(request, "/upload").await
    }

    async fn get_status(&self, document_id: &str) -> Result<StatusResponse, BackendError> {
        let path = format!("/status/{}", urlencoding::encode(document_id));
        self.get_json(&path, &[]).await
    }

    async fn get_results(
        &self,
        document_id: &str,
        include_raw: bool,
    ) -> Result<ExtractionResult, BackendError> {
        let path = format!("/results/{}", urlencoding::encode(document_id));
        self.get_json(&path, &[("include_raw", include_raw.to_string())])
            .await
    }

    async fn list_documents(
        &self,
        filters: &DocumentFilters,
    ) -> Result<DocumentsResponse, BackendError> {
        self.get_json("/documents", &filters.query_params()).await
    }

    async fn delete_document(&self, document_id: &str) -> Result<(), BackendError> {
        let path = format!("/documents/{}", urlencoding::encode(document_id));
        let _: serde_json::Value = self.delete_json(&path).await?;
        Ok(())
    }

    async fn health(&self) -> Result<HealthResponse, BackendError> {
        self.get_json("/health", &[]).await
    }

    async fn stats(&self) -> Result<StatsResponse, BackendError> {
        self.get_json("/stats", &[]).await
    }

    async fn process_batch(
        &self,
        document_ids: &[String],
    ) -> Result<BatchProcessResponse, BackendError> {
        debug!(count = document_ids.len(), "Submitting batch");
        let body = serde_json::json!({ "document_ids": document_ids });
        let request = self.client.post(self.url("/process-batch")).json(&body);
        self.send_json(request, "/process-batch").await
    }

    async fn clear_queue(&self) -> Result<ClearResponse, BackendError> {
        self.delete_json("/clear-queue").await
    }

    async fn clear_results(&self) -> Result<ClearResponse, BackendError> {
        self.delete_json("/clear-results").await
    }

    async fn upload_queue(&self) -> Result<UploadQueueResponse, BackendError> {
        self.get_json("/upload-queue", &[]).await
    }
}
