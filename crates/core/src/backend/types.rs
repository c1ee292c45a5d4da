//! Types for document-processing backend operations.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::library::DocumentFilters;
use crate::queue::FileHandle;

/// Errors that can occur talking to the backend.
///
/// Every transport or server failure is surfaced through this one type.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid upload: {0}")]
    InvalidUpload(String),
}

impl BackendError {
    /// HTTP status code, if the backend answered at all.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            BackendError::Http { status, .. } => Some(*status),
            BackendError::NotFound(_) => Some(404),
            _ => None,
        }
    }

    /// Whether the failure happened before the backend could answer.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            BackendError::ConnectionFailed(_) | BackendError::Timeout
        )
    }
}

/// Receives upload progress as a whole percentage (0-100).
pub type ProgressCallback = Arc<dyn Fn(u8) + Send + Sync>;

/// Processing status as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendStatus {
    /// Stored, not yet submitted for extraction.
    Uploaded,
    /// Extraction running.
    Processing,
    /// Extraction finished.
    Completed,
    /// Extraction failed.
    Failed,
    /// Anything this client does not know about.
    #[serde(other)]
    Unknown,
}

impl BackendStatus {
    /// Returns the wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendStatus::Uploaded => "uploaded",
            BackendStatus::Processing => "processing",
            BackendStatus::Completed => "completed",
            BackendStatus::Failed => "failed",
            BackendStatus::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for BackendStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response to `POST /upload`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    /// Backend-assigned document identifier.
    pub document_id: String,
    /// Name the backend stored the file under.
    pub filename: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub status: String,
}

/// Response to `GET /status/{document_id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub document_id: String,
    #[serde(default)]
    pub filename: String,
    pub status: BackendStatus,
    /// Backend-side progress (0-100).
    #[serde(default)]
    pub progress: u32,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<Vec<String>>,
}

impl StatusResponse {
    /// Error details joined for display, if any were reported.
    pub fn joined_errors(&self) -> Option<String> {
        self.error_details
            .as_ref()
            .filter(|d| !d.is_empty())
            .map(|d| d.join(", "))
    }
}

/// One labelled row of a financial statement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LineItem {
    pub label: String,
    /// Values keyed by financial year.
    pub values: BTreeMap<String, f64>,
    #[serde(default)]
    pub note_references: Vec<String>,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

/// An extracted financial statement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FinancialStatement {
    pub statement_type: String,
    pub company_name: String,
    pub currency: String,
    pub rounding: String,
    #[serde(default)]
    pub financial_years: Vec<String>,
    #[serde(default)]
    pub line_items: Vec<LineItem>,
    #[serde(default = "default_confidence")]
    pub extraction_confidence: f64,
    /// Only present when requested with `include_raw`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_text: Option<String>,
}

fn default_confidence() -> f64 {
    1.0
}

/// Response to `GET /results/{document_id}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractionResult {
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    #[serde(default)]
    pub upload_timestamp: String,
    #[serde(default)]
    pub processing_time: f64,
    #[serde(default)]
    pub statements: Vec<FinancialStatement>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub errors: Vec<String>,
}

/// One entry of `GET /documents`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentSummary {
    pub document_id: String,
    pub filename: String,
    #[serde(default)]
    pub upload_timestamp: String,
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extraction_quality: Option<f64>,
    #[serde(default)]
    pub statement_count: u32,
    #[serde(default)]
    pub currencies: Vec<String>,
    #[serde(default)]
    pub rounding_scales: Vec<String>,
}

/// Response to `GET /documents`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentsResponse {
    pub documents: Vec<DocumentSummary>,
    pub total: u64,
    #[serde(default)]
    pub returned: u64,
    #[serde(default)]
    pub limit: u64,
    #[serde(default)]
    pub skip: u64,
}

/// Response to `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub database: DatabaseHealth,
    #[serde(default)]
    pub models_loaded: bool,
    #[serde(default)]
    pub pipeline_ready: bool,
}

/// Database section of the health response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseHealth {
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Response to `GET /stats`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatsResponse {
    #[serde(default)]
    pub total_documents: u64,
    #[serde(default)]
    pub avg_quality: Option<f64>,
    #[serde(default)]
    pub avg_processing_time: Option<f64>,
    #[serde(default)]
    pub currency_distribution: HashMap<String, u64>,
    #[serde(default)]
    pub rounding_distribution: HashMap<String, u64>,
    #[serde(default)]
    pub high_quality_documents: u64,
    #[serde(default)]
    pub low_quality_documents: u64,
}

/// A document the backend refused to process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailedDocument {
    pub doc_id: String,
    pub error: String,
}

/// Response to `POST /process-batch`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchProcessResponse {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub processed_documents: Vec<String>,
    #[serde(default)]
    pub failed_documents: Vec<FailedDocument>,
}

/// Response to `DELETE /clear-queue` and `DELETE /clear-results`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClearResponse {
    #[serde(default)]
    pub message: String,
    pub cleared_count: u64,
}

/// Response to `GET /upload-queue`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadQueueResponse {
    #[serde(default)]
    pub queue: Vec<serde_json::Value>,
    #[serde(default)]
    pub count: u64,
}

/// Trait for document-processing backends.
#[async_trait]
pub trait BackendClient: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// Upload one file. `progress` receives non-decreasing percentages.
    async fn upload(
        &self,
        file: &FileHandle,
        progress: Option<ProgressCallback>,
    ) -> Result<UploadResponse, BackendError>;

    /// Current processing status of a document.
    async fn get_status(&self, document_id: &str) -> Result<StatusResponse, BackendError>;

    /// Extraction results of a completed document.
    async fn get_results(
        &self,
        document_id: &str,
        include_raw: bool,
    ) -> Result<ExtractionResult, BackendError>;

    /// List stored documents.
    async fn list_documents(
        &self,
        filters: &DocumentFilters,
    ) -> Result<DocumentsResponse, BackendError>;

    /// Permanently delete a document.
    async fn delete_document(&self, document_id: &str) -> Result<(), BackendError>;

    /// Backend health.
    async fn health(&self) -> Result<HealthResponse, BackendError>;

    /// Aggregate extraction statistics.
    async fn stats(&self) -> Result<StatsResponse, BackendError>;

    /// Submit uploaded documents for extraction.
    async fn process_batch(
        &self,
        document_ids: &[String],
    ) -> Result<BatchProcessResponse, BackendError>;

    /// Drop every queued upload on the backend.
    async fn clear_queue(&self) -> Result<ClearResponse, BackendError>;

    /// Drop every stored extraction result on the backend.
    async fn clear_results(&self) -> Result<ClearResponse, BackendError>;

    /// Documents the backend holds but has not processed yet.
    async fn upload_queue(&self) -> Result<UploadQueueResponse, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_status_as_str() {
        assert_eq!(BackendStatus::Uploaded.as_str(), "uploaded");
        assert_eq!(BackendStatus::Processing.as_str(), "processing");
        assert_eq!(BackendStatus::Completed.as_str(), "completed");
        assert_eq!(BackendStatus::Failed.as_str(), "failed");
        assert_eq!(BackendStatus::Unknown.as_str(), "unknown");
    }

    #[test]
    fn test_backend_status_unknown_value() {
        let status: BackendStatus = serde_json::from_str("\"queued_for_ocr\"").unwrap();
        assert_eq!(status, BackendStatus::Unknown);
    }

    #[test]
    fn test_status_response_null_error_details() {
        let json = r#"{
            "document_id": "report_1700000000",
            "filename": "report.pdf",
            "status": "processing",
            "progress": 10,
            "message": "Starting extraction process",
            "processing_time": null,
            "error_details": null
        }"#;
        let status: StatusResponse = serde_json::from_str(json).unwrap();
        assert_eq!(status.status, BackendStatus::Processing);
        assert_eq!(status.progress, 10);
        assert!(status.error_details.is_none());
        assert!(status.joined_errors().is_none());
    }

    #[test]
    fn test_status_response_joined_errors() {
        let json = r#"{
            "document_id": "d1",
            "status": "failed",
            "error_details": ["no tables found", "ocr timeout"]
        }"#;
        let status: StatusResponse = serde_json::from_str(json).unwrap();
        assert_eq!(
            status.joined_errors().as_deref(),
            Some("no tables found, ocr timeout")
        );
    }

    #[test]
    fn test_batch_response_parsing() {
        let json = r#"{
            "message": "Started processing 1 documents",
            "processed_documents": ["d1"],
            "failed_documents": [{"doc_id": "d2", "error": "corrupt"}]
        }"#;
        let response: BatchProcessResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.processed_documents, vec!["d1"]);
        assert_eq!(
            response.failed_documents,
            vec![FailedDocument {
                doc_id: "d2".to_string(),
                error: "corrupt".to_string()
            }]
        );
    }

    #[test]
    fn test_extraction_result_defaults() {
        let json = r#"{
            "filename": "annual.pdf",
            "statements": [{
                "statement_type": "balance_sheet",
                "company_name": "Acme Ltd",
                "currency": "AUD",
                "rounding": "thousands",
                "line_items": [{"label": "Cash", "values": {"2023": 12.5}}]
            }]
        }"#;
        let result: ExtractionResult = serde_json::from_str(json).unwrap();
        assert_eq!(result.statements.len(), 1);
        let item = &result.statements[0].line_items[0];
        assert_eq!(item.confidence, 1.0);
        assert!(item.note_references.is_empty());
        assert!(result.errors.is_empty());
    }

    #[test]
    fn test_backend_error_status_code() {
        let err = BackendError::Http {
            status: 500,
            message: "boom".to_string(),
        };
        assert_eq!(err.status_code(), Some(500));
        assert_eq!(err.to_string(), "HTTP 500: boom");
        assert!(!err.is_transport());

        assert_eq!(BackendError::NotFound("/status/x".into()).status_code(), Some(404));
        assert!(BackendError::Timeout.is_transport());
        assert_eq!(BackendError::Timeout.status_code(), None);
    }
}
