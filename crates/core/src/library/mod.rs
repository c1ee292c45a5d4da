//! Browsing and exporting processed documents.

mod export;
mod filters;
mod format;

pub use export::{export_file_name, export_result, ExportFormat};
pub use filters::{sort_documents, DocumentFilters, SortDirection, SortField};
pub use format::{format_duration, format_file_size, format_quality_score};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Failed to serialize export: {0}")]
    Serialize(#[from] serde_json::Error),
}
