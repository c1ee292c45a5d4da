//! Testing utilities and mock implementations.
//!
//! This module provides a mock of the backend trait, allowing the whole upload
//! and processing lifecycle to be exercised without a running backend.
//!
//! # Example
//!
//! ```rust,ignore
//! use ledgerdash_core::testing::{pdf_file, MockBackendClient};
//!
//! let backend = Arc::new(MockBackendClient::new());
//! backend.set_status("report_0001", BackendStatus::Completed).await;
//!
//! let orchestrator = UploadOrchestrator::new(backend.clone(), queue, notifier, config);
//! orchestrator.handle_file_add(vec![pdf_file("report.pdf")]).await;
//! ```

mod mock_backend;

pub use fixtures::pdf_file;
pub use mock_backend::{MockBackendClient, RecordedUpload};

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::collections::BTreeMap;

    use crate::backend::{
        BackendStatus, DatabaseHealth, DocumentSummary, ExtractionResult, FinancialStatement,
        HealthResponse, LineItem, StatusResponse,
    };
    use crate::queue::FileHandle;

    /// A small, valid PDF file handle.
    pub fn pdf_file(name: &str) -> FileHandle {
        FileHandle::new(name, "application/pdf", b"%PDF-1.4\n%test\n".to_vec())
    }

    pub fn status_response(document_id: &str, status: BackendStatus) -> StatusResponse {
        let progress = match status {
            BackendStatus::Completed | BackendStatus::Failed => 100,
            BackendStatus::Processing => 50,
            _ => 0,
        };
        StatusResponse {
            document_id: document_id.to_string(),
            filename: format!("{}.pdf", document_id),
            status,
            progress,
            message: String::new(),
            processing_time: None,
            error_details: None,
        }
    }

    pub fn health_response(status: &str) -> HealthResponse {
        HealthResponse {
            status: status.to_string(),
            timestamp: "2024-01-01T00:00:00".to_string(),
            database: DatabaseHealth {
                status: "healthy".to_string(),
                error: None,
            },
            models_loaded: true,
            pipeline_ready: true,
        }
    }

    /// An extraction result with one balance sheet of two line items over two years.
    pub fn extraction_result(filename: &str) -> ExtractionResult {
        let item = |label: &str, a: f64, b: f64| LineItem {
            label: label.to_string(),
            values: BTreeMap::from([("2022".to_string(), a), ("2023".to_string(), b)]),
            note_references: vec![],
            confidence: 0.95,
        };

        ExtractionResult {
            filename: filename.to_string(),
            document_id: Some(format!("{}_0001", filename.trim_end_matches(".pdf"))),
            upload_timestamp: "2024-01-01T00:00:00".to_string(),
            processing_time: 12.5,
            statements: vec![FinancialStatement {
                statement_type: "balance_sheet".to_string(),
                company_name: "Acme Holdings".to_string(),
                currency: "AUD".to_string(),
                rounding: "thousands".to_string(),
                financial_years: vec!["2022".to_string(), "2023".to_string()],
                line_items: vec![item("Cash", 100.0, 120.5), item("Receivables", 40.0, 38.0)],
                extraction_confidence: 0.9,
                raw_text: None,
            }],
            status: "completed".to_string(),
            errors: vec![],
        }
    }

    pub fn document_summary(
        document_id: &str,
        currency: &str,
        rounding: &str,
        quality: Option<f64>,
    ) -> DocumentSummary {
        DocumentSummary {
            document_id: document_id.to_string(),
            filename: format!("{}.pdf", document_id),
            upload_timestamp: "2024-01-01T00:00:00".to_string(),
            status: "completed".to_string(),
            extraction_quality: quality,
            statement_count: 1,
            currencies: vec![currency.to_string()],
            rounding_scales: vec![rounding.to_string()],
        }
    }
}
