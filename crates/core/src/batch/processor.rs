//! Batch processing orchestrator.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::backend::{BackendClient, ClearResponse, FailedDocument};
use crate::metrics;
use crate::notify::Notifier;
use crate::poller::StatusPoller;
use crate::queue::UploadQueue;

use super::BatchError;

/// Result of a batch submission the backend accepted.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchOutcome {
    /// Document ids submitted.
    pub submitted: Vec<String>,
    /// Document ids now being polled.
    pub accepted: Vec<String>,
    /// Documents the backend refused.
    pub failed: Vec<FailedDocument>,
}

/// Submits uploaded documents for extraction and hands them to the poller.
#[derive(Clone)]
pub struct BatchProcessor {
    backend: Arc<dyn BackendClient>,
    queue: UploadQueue,
    poller: StatusPoller,
    notifier: Notifier,
    clearing: Arc<AtomicBool>,
}

/// Releases the clear guard on drop.
struct ClearGuard(Arc<AtomicBool>);

impl Drop for ClearGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl BatchProcessor {
    pub fn new(
        backend: Arc<dyn BackendClient>,
        queue: UploadQueue,
        poller: StatusPoller,
        notifier: Notifier,
    ) -> Self {
        Self {
            backend,
            queue,
            poller,
            notifier,
            clearing: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Submit every processable record in one batch.
    ///
    /// Records are moved to `processing` before the request; a request failure
    /// moves them back to `success`.
    pub async fn start_processing(&self) -> Result<BatchOutcome, BatchError> {
        let Some(staged) = self.queue.stage_processing() else {
            self.notifier.error("No files ready for processing");
            return Err(BatchError::NothingToProcess);
        };

        let document_ids = staged.document_ids();
        info!(count = document_ids.len(), "Submitting documents for processing");

        let response = match self.backend.process_batch(&document_ids).await {
            Ok(response) => response,
            Err(e) => {
                error!(error = %e, "Batch submission failed, rolling back");
                metrics::BATCH_DOCUMENTS
                    .with_label_values(&["request_failed"])
                    .inc_by(document_ids.len() as u64);
                self.queue.rollback_processing(staged);
                self.notifier
                    .error(format!("Failed to start processing: {}", e));
                return Err(BatchError::Backend(e));
            }
        };

        let names: Vec<(String, String)> = staged
            .record_ids()
            .iter()
            .filter_map(|id| self.queue.get(id))
            .filter_map(|r| r.document_id.map(|d| (d, r.file.name)))
            .collect();

        let accepted = self
            .queue
            .commit_processing(staged, &response.failed_documents);

        metrics::BATCH_DOCUMENTS
            .with_label_values(&["accepted"])
            .inc_by(accepted.len() as u64);

        if !accepted.is_empty() {
            self.notifier
                .success(format!("Started processing {} documents", accepted.len()));
        }

        let failed: Vec<FailedDocument> = response
            .failed_documents
            .into_iter()
            .filter(|f| document_ids.contains(&f.doc_id))
            .collect();
        for failure in &failed {
            metrics::BATCH_DOCUMENTS
                .with_label_values(&["rejected"])
                .inc();
            let name = names
                .iter()
                .find(|(d, _)| d == &failure.doc_id)
                .map(|(_, n)| n.as_str())
                .unwrap_or(failure.doc_id.as_str());
            warn!(document_id = %failure.doc_id, error = %failure.error, "Backend refused document");
            self.notifier
                .error(format!("{} processing failed: {}", name, failure.error));
        }

        self.poller.track(accepted.iter().cloned());

        Ok(BatchOutcome {
            submitted: document_ids,
            accepted,
            failed,
        })
    }

    fn begin_clear(&self) -> Result<ClearGuard, BatchError> {
        if self.clearing.swap(true, Ordering::SeqCst) {
            return Err(BatchError::ClearInProgress);
        }
        Ok(ClearGuard(self.clearing.clone()))
    }

    /// Clear the backend upload queue, then the local queue.
    ///
    /// On failure local state is left untouched.
    pub async fn clear_upload_queue(&self) -> Result<ClearResponse, BatchError> {
        let _guard = self.begin_clear()?;

        match self.backend.clear_queue().await {
            Ok(response) => {
                let removed = self.queue.clear_all();
                info!(
                    cleared = response.cleared_count,
                    local = removed,
                    "Upload queue cleared"
                );
                self.notifier.success(format!(
                    "Queue cleared: {} files removed",
                    response.cleared_count
                ));
                Ok(response)
            }
            Err(e) => {
                error!(error = %e, "Failed to clear queue");
                self.notifier.error("Failed to clear queue");
                Err(BatchError::Backend(e))
            }
        }
    }

    /// Delete every stored extraction result on the backend.
    pub async fn clear_extraction_results(&self) -> Result<ClearResponse, BatchError> {
        let _guard = self.begin_clear()?;

        match self.backend.clear_results().await {
            Ok(response) => {
                info!(cleared = response.cleared_count, "Extraction results cleared");
                self.notifier.success(format!(
                    "Results cleared: {} results removed",
                    response.cleared_count
                ));
                Ok(response)
            }
            Err(e) => {
                error!(error = %e, "Failed to clear results");
                self.notifier.error("Failed to clear results");
                Err(BatchError::Backend(e))
            }
        }
    }

    pub fn is_clearing(&self) -> bool {
        self.clearing.load(Ordering::SeqCst)
    }
}
