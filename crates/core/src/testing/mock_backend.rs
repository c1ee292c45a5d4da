//! Mock document-processing backend for testing.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::backend::{
    BackendClient, BackendError, BackendStatus, BatchProcessResponse, ClearResponse,
    DocumentSummary, DocumentsResponse, ExtractionResult, FailedDocument, HealthResponse,
    ProgressCallback, StatsResponse, StatusResponse, UploadQueueResponse, UploadResponse,
};
use crate::library::DocumentFilters;
use crate::queue::FileHandle;

use super::fixtures;

/// A recorded upload for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedUpload {
    pub file_name: String,
    pub size: u64,
    /// Document id handed back, if the upload succeeded.
    pub document_id: Option<String>,
    pub timestamp: chrono::DateTime<Utc>,
}

/// Mock implementation of the BackendClient trait.
///
/// Provides controllable behavior for testing:
/// - Record uploads, status queries and batch submissions
/// - Script per-document statuses and per-file upload failures
/// - Simulate request-level failures
///
/// # Example
///
/// ```rust,ignore
/// let backend = MockBackendClient::new();
///
/// backend.fail_upload_for("broken.pdf").await;
/// backend.set_status("doc-1", BackendStatus::Completed).await;
///
/// // Next call of any kind fails
/// backend.set_next_error(BackendError::Timeout).await;
/// ```
#[derive(Debug)]
pub struct MockBackendClient {
    uploads: Arc<RwLock<Vec<RecordedUpload>>>,
    failing_uploads: Arc<RwLock<HashSet<String>>>,
    progress_steps: Arc<RwLock<Vec<u8>>>,
    upload_delay: Arc<RwLock<Option<Duration>>>,
    statuses: Arc<RwLock<HashMap<String, Result<StatusResponse, BackendError>>>>,
    status_calls: Arc<RwLock<Vec<String>>>,
    batch_calls: Arc<RwLock<Vec<Vec<String>>>>,
    batch_failures: Arc<RwLock<Vec<FailedDocument>>>,
    results: Arc<RwLock<HashMap<String, ExtractionResult>>>,
    documents: Arc<RwLock<Vec<DocumentSummary>>>,
    health: Arc<RwLock<Result<HealthResponse, BackendError>>>,
    clear_calls: Arc<RwLock<Vec<&'static str>>>,
    /// If set, the next operation will fail with this error.
    next_error: Arc<RwLock<Option<BackendError>>>,
    doc_counter: Arc<RwLock<u32>>,
}

impl Default for MockBackendClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackendClient {
    pub fn new() -> Self {
        Self {
            uploads: Arc::new(RwLock::new(Vec::new())),
            failing_uploads: Arc::new(RwLock::new(HashSet::new())),
            progress_steps: Arc::new(RwLock::new(vec![50])),
            upload_delay: Arc::new(RwLock::new(None)),
            statuses: Arc::new(RwLock::new(HashMap::new())),
            status_calls: Arc::new(RwLock::new(Vec::new())),
            batch_calls: Arc::new(RwLock::new(Vec::new())),
            batch_failures: Arc::new(RwLock::new(Vec::new())),
            results: Arc::new(RwLock::new(HashMap::new())),
            documents: Arc::new(RwLock::new(Vec::new())),
            health: Arc::new(RwLock::new(Ok(fixtures::health_response("healthy")))),
            clear_calls: Arc::new(RwLock::new(Vec::new())),
            next_error: Arc::new(RwLock::new(None)),
            doc_counter: Arc::new(RwLock::new(0)),
        }
    }

    /// All recorded uploads, successful or not.
    pub async fn recorded_uploads(&self) -> Vec<RecordedUpload> {
        self.uploads.read().await.clone()
    }

    /// Make every upload of a file with this name fail.
    pub async fn fail_upload_for(&self, file_name: &str) {
        self.failing_uploads
            .write()
            .await
            .insert(file_name.to_string());
    }

    pub async fn clear_upload_failures(&self) {
        self.failing_uploads.write().await.clear();
    }

    /// Progress percentages reported before the final 100.
    pub async fn set_progress_steps(&self, steps: Vec<u8>) {
        *self.progress_steps.write().await = steps;
    }

    /// Delay every upload, to observe in-flight state.
    pub async fn set_upload_delay(&self, delay: Duration) {
        *self.upload_delay.write().await = Some(delay);
    }

    /// Script the status reported for a document.
    pub async fn set_status(&self, document_id: &str, status: BackendStatus) {
        self.statuses.write().await.insert(
            document_id.to_string(),
            Ok(fixtures::status_response(document_id, status)),
        );
    }

    /// Report `failed` with the given error details.
    pub async fn set_failed(&self, document_id: &str, details: Vec<String>) {
        let mut response = fixtures::status_response(document_id, BackendStatus::Failed);
        response.error_details = Some(details);
        self.statuses
            .write()
            .await
            .insert(document_id.to_string(), Ok(response));
    }

    /// Make status queries for a document fail.
    pub async fn set_status_error(&self, document_id: &str, error: BackendError) {
        self.statuses
            .write()
            .await
            .insert(document_id.to_string(), Err(error));
    }

    /// Document ids queried via `get_status`, in call order.
    pub async fn status_calls(&self) -> Vec<String> {
        self.status_calls.read().await.clone()
    }

    pub async fn clear_status_calls(&self) {
        self.status_calls.write().await.clear();
    }

    /// Id lists submitted via `process_batch`.
    pub async fn batch_calls(&self) -> Vec<Vec<String>> {
        self.batch_calls.read().await.clone()
    }

    /// Documents the next batch responses will report as failed.
    pub async fn set_batch_failures(&self, failures: Vec<FailedDocument>) {
        *self.batch_failures.write().await = failures;
    }

    pub async fn add_result(&self, document_id: &str, result: ExtractionResult) {
        self.results
            .write()
            .await
            .insert(document_id.to_string(), result);
    }

    pub async fn add_document(&self, summary: DocumentSummary) {
        self.documents.write().await.push(summary);
    }

    pub async fn set_health(&self, health: Result<HealthResponse, BackendError>) {
        *self.health.write().await = health;
    }

    /// Clear endpoints called, in order (`"queue"` or `"results"`).
    pub async fn clear_calls(&self) -> Vec<&'static str> {
        self.clear_calls.read().await.clone()
    }

    /// Configure the next operation to fail with the given error.
    pub async fn set_next_error(&self, error: BackendError) {
        *self.next_error.write().await = Some(error);
    }

    pub async fn clear_next_error(&self) {
        *self.next_error.write().await = None;
    }

    /// Take the next error if set.
    async fn take_error(&self) -> Option<BackendError> {
        self.next_error.write().await.take()
    }

    async fn generate_document_id(&self, file_name: &str) -> String {
        let mut counter = self.doc_counter.write().await;
        *counter += 1;
        format!("{}_{:04}", file_name.trim_end_matches(".pdf"), *counter)
    }
}

#[async_trait]
impl BackendClient for MockBackendClient {
    fn name(&self) -> &str {
        "mock"
    }

    async fn upload(
        &self,
        file: &FileHandle,
        progress: Option<ProgressCallback>,
    ) -> Result<UploadResponse, BackendError> {
        let delay = *self.upload_delay.read().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failing = self.failing_uploads.read().await.contains(&file.name);
        let error = match self.take_error().await {
            Some(e) => Some(e),
            None if failing => Some(BackendError::Http {
                status: 500,
                message: format!("Upload failed: {}", file.name),
            }),
            None => None,
        };

        if let Some(cb) = &progress {
            for step in self.progress_steps.read().await.iter() {
                cb(*step);
            }
        }

        let document_id = match error {
            Some(_) => None,
            None => Some(self.generate_document_id(&file.name).await),
        };

        self.uploads.write().await.push(RecordedUpload {
            file_name: file.name.clone(),
            size: file.size(),
            document_id: document_id.clone(),
            timestamp: Utc::now(),
        });

        match (error, document_id) {
            (Some(e), _) => Err(e),
            (None, Some(document_id)) => {
                if let Some(cb) = &progress {
                    cb(100);
                }
                self.statuses.write().await.insert(
                    document_id.clone(),
                    Ok(fixtures::status_response(&document_id, BackendStatus::Uploaded)),
                );
                Ok(UploadResponse {
                    document_id,
                    filename: file.name.clone(),
                    message: "File uploaded successfully".to_string(),
                    status: "uploaded".to_string(),
                })
            }
            (None, None) => Err(BackendError::InvalidResponse("no document id".to_string())),
        }
    }

    async fn get_status(&self, document_id: &str) -> Result<StatusResponse, BackendError> {
        self.status_calls
            .write()
            .await
            .push(document_id.to_string());

        if let Some(e) = self.take_error().await {
            return Err(e);
        }

        self.statuses
            .read()
            .await
            .get(document_id)
            .cloned()
            .unwrap_or_else(|| Err(BackendError::NotFound("Document not found".to_string())))
    }

    async fn get_results(
        &self,
        document_id: &str,
        _include_raw: bool,
    ) -> Result<ExtractionResult, BackendError> {
        if let Some(e) = self.take_error().await {
            return Err(e);
        }
        self.results
            .read()
            .await
            .get(document_id)
            .cloned()
            .ok_or_else(|| BackendError::NotFound("Results not found".to_string()))
    }

    async fn list_documents(
        &self,
        filters: &DocumentFilters,
    ) -> Result<DocumentsResponse, BackendError> {
        if let Some(e) = self.take_error().await {
            return Err(e);
        }

        // The backend never sees the client-side search.
        let server_side = DocumentFilters {
            search: None,
            ..filters.clone()
        };
        let documents = self.documents.read().await;
        let matching: Vec<_> = documents
            .iter()
            .filter(|d| server_side.matches(d))
            .cloned()
            .collect();
        let total = matching.len() as u64;
        let page: Vec<_> = matching
            .into_iter()
            .skip(filters.skip as usize)
            .take(filters.limit as usize)
            .collect();

        Ok(DocumentsResponse {
            returned: page.len() as u64,
            documents: page,
            total,
            limit: filters.limit,
            skip: filters.skip,
        })
    }

    async fn delete_document(&self, document_id: &str) -> Result<(), BackendError> {
        if let Some(e) = self.take_error().await {
            return Err(e);
        }
        let mut documents = self.documents.write().await;
        let before = documents.len();
        documents.retain(|d| d.document_id != document_id);
        if documents.len() == before {
            return Err(BackendError::NotFound("Document not found".to_string()));
        }
        self.results.write().await.remove(document_id);
        Ok(())
    }

    async fn health(&self) -> Result<HealthResponse, BackendError> {
        if let Some(e) = self.take_error().await {
            return Err(e);
        }
        self.health.read().await.clone()
    }

    async fn stats(&self) -> Result<StatsResponse, BackendError> {
        if let Some(e) = self.take_error().await {
            return Err(e);
        }
        let documents = self.documents.read().await;
        Ok(StatsResponse {
            total_documents: documents.len() as u64,
            ..Default::default()
        })
    }

    async fn process_batch(
        &self,
        document_ids: &[String],
    ) -> Result<BatchProcessResponse, BackendError> {
        self.batch_calls.write().await.push(document_ids.to_vec());

        if let Some(e) = self.take_error().await {
            return Err(e);
        }

        let failures = self.batch_failures.read().await.clone();
        let processed: Vec<String> = document_ids
            .iter()
            .filter(|id| !failures.iter().any(|f| &f.doc_id == *id))
            .cloned()
            .collect();

        let mut statuses = self.statuses.write().await;
        for id in &processed {
            statuses.insert(
                id.clone(),
                Ok(fixtures::status_response(id, BackendStatus::Processing)),
            );
        }

        Ok(BatchProcessResponse {
            message: format!("Started processing {} documents", processed.len()),
            processed_documents: processed,
            failed_documents: failures
                .into_iter()
                .filter(|f| document_ids.contains(&f.doc_id))
                .collect(),
        })
    }

    async fn clear_queue(&self) -> Result<ClearResponse, BackendError> {
        self.clear_calls.write().await.push("queue");
        if let Some(e) = self.take_error().await {
            return Err(e);
        }
        let cleared = self.uploads.read().await.len() as u64;
        Ok(ClearResponse {
            message: "Upload queue cleared".to_string(),
            cleared_count: cleared,
        })
    }

    async fn clear_results(&self) -> Result<ClearResponse, BackendError> {
        self.clear_calls.write().await.push("results");
        if let Some(e) = self.take_error().await {
            return Err(e);
        }
        let mut results = self.results.write().await;
        let cleared = results.len() as u64;
        results.clear();
        Ok(ClearResponse {
            message: "Extraction results cleared".to_string(),
            cleared_count: cleared,
        })
    }

    async fn upload_queue(&self) -> Result<UploadQueueResponse, BackendError> {
        if let Some(e) = self.take_error().await {
            return Err(e);
        }
        let statuses = self.statuses.read().await;
        let queue: Vec<_> = statuses
            .iter()
            .filter_map(|(id, s)| match s {
                Ok(s) if s.status == BackendStatus::Uploaded => {
                    Some(serde_json::json!({ "document_id": id, "filename": s.filename }))
                }
                _ => None,
            })
            .collect();
        Ok(UploadQueueResponse {
            count: queue.len() as u64,
            queue,
        })
    }
}
