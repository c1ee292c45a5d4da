//! Batch processing: submit uploaded documents and clear backend state.

mod processor;

pub use processor::{BatchOutcome, BatchProcessor};

use thiserror::Error;

use crate::backend::BackendError;

/// Errors from batch operations.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("No files ready for processing")]
    NothingToProcess,

    #[error("A clear operation is already in progress")]
    ClearInProgress,

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
}
