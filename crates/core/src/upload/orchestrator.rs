//! Upload orchestrator: validates files, queues them and uploads them concurrently.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::backend::{BackendClient, BackendError, ProgressCallback};
use crate::config::UploadConfig;
use crate::metrics;
use crate::notify::Notifier;
use crate::queue::{FileHandle, RecordId, UploadQueue, UploadStatus};

use super::{validate_file, ValidationError};

/// Errors from upload operations.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Upload record not found: {0}")]
    NotFound(RecordId),

    #[error("Cannot retry {id}: status is {status}")]
    NotRetryable { id: RecordId, status: UploadStatus },

    #[error("Upload failed: {0}")]
    Backend(#[from] BackendError),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A file that failed validation and was never queued.
#[derive(Debug, Clone)]
pub struct RejectedFile {
    pub name: String,
    pub error: ValidationError,
}

/// Result of [`UploadOrchestrator::handle_file_add`].
#[derive(Debug, Clone, Default)]
pub struct AddFilesOutcome {
    /// Records created, in input order.
    pub accepted: Vec<RecordId>,
    pub rejected: Vec<RejectedFile>,
    /// Accepted records whose upload succeeded.
    pub uploaded: usize,
    /// Accepted records whose upload failed.
    pub failed: usize,
}

/// Upload counts for display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UploadStats {
    pub total: usize,
    pub uploaded: usize,
    pub pending: usize,
    pub failed: usize,
    pub processable: usize,
}

/// Releases in-flight uploads on drop, lowering the uploading flag with the last.
struct UploadingGuard {
    in_flight: Arc<AtomicUsize>,
    queue: UploadQueue,
    n: usize,
}

impl Drop for UploadingGuard {
    fn drop(&mut self) {
        if self.in_flight.fetch_sub(self.n, Ordering::SeqCst) == self.n {
            self.queue.set_uploading(false);
        }
    }
}

/// Turns raw files into queued, uploaded records.
#[derive(Clone)]
pub struct UploadOrchestrator {
    backend: Arc<dyn BackendClient>,
    queue: UploadQueue,
    notifier: Notifier,
    constraints: UploadConfig,
    /// Uploads currently in flight, across all calls.
    in_flight: Arc<AtomicUsize>,
}

impl UploadOrchestrator {
    pub fn new(
        backend: Arc<dyn BackendClient>,
        queue: UploadQueue,
        notifier: Notifier,
        constraints: UploadConfig,
    ) -> Self {
        Self {
            backend,
            queue,
            notifier,
            constraints,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn queue(&self) -> &UploadQueue {
        &self.queue
    }

    /// Validate, queue and upload a batch of files.
    ///
    /// Invalid files are reported one notification each and never queued.
    /// Valid files upload concurrently; one failure never affects siblings.
    pub async fn handle_file_add(&self, files: Vec<FileHandle>) -> AddFilesOutcome {
        let mut outcome = AddFilesOutcome::default();
        let mut valid = Vec::new();

        for file in files {
            match validate_file(&file, &self.constraints) {
                Ok(()) => valid.push(file),
                Err(error) => {
                    metrics::UPLOADS_TOTAL.with_label_values(&["rejected"]).inc();
                    self.notifier.error(format!("{}: {}", file.name, error));
                    outcome.rejected.push(RejectedFile {
                        name: file.name,
                        error,
                    });
                }
            }
        }

        if valid.is_empty() {
            return outcome;
        }

        let ids = self.queue.add_files(valid.clone());
        info!(count = ids.len(), "Uploading files");

        let results = {
            let _uploading = self.begin_uploads(ids.len());
            join_all(
                ids.iter()
                    .zip(valid.iter())
                    .map(|(id, file)| self.upload_one(id, file)),
            )
            .await
        };

        for result in results {
            match result {
                Ok(_) => outcome.uploaded += 1,
                Err(_) => outcome.failed += 1,
            }
        }
        outcome.accepted = ids;
        outcome
    }

    /// Re-upload a failed record under the same id.
    ///
    /// Returns the new document id. A failed attempt leaves the record in
    /// `error` and is also returned as an error.
    pub async fn retry_upload(&self, id: &RecordId) -> Result<String, UploadError> {
        let record = match self.queue.begin_retry(id) {
            Some(Ok(record)) => record,
            Some(Err(status)) => {
                return Err(UploadError::NotRetryable {
                    id: id.clone(),
                    status,
                })
            }
            None => return Err(UploadError::NotFound(id.clone())),
        };

        info!(record_id = %id, file = %record.file.name, "Retrying upload");
        let _uploading = self.begin_uploads(1);
        Ok(self.upload_one(id, &record.file).await?)
    }

    pub fn upload_stats(&self) -> UploadStats {
        UploadStats {
            total: self.queue.len(),
            uploaded: self.queue.uploaded_files().len(),
            pending: self.queue.pending_files().len(),
            failed: self.queue.failed_files().len(),
            processable: self.queue.processable_files().len(),
        }
    }

    fn begin_uploads(&self, n: usize) -> UploadingGuard {
        self.in_flight.fetch_add(n, Ordering::SeqCst);
        self.queue.set_uploading(true);
        UploadingGuard {
            in_flight: self.in_flight.clone(),
            queue: self.queue.clone(),
            n,
        }
    }

    /// Upload a single queued file and record the outcome.
    async fn upload_one(&self, id: &RecordId, file: &FileHandle) -> Result<String, BackendError> {
        self.queue
            .update_file_status(id, UploadStatus::Uploading, None, None);

        let progress: ProgressCallback = {
            let queue = self.queue.clone();
            let id = id.clone();
            Arc::new(move |p| queue.update_file_progress(&id, p))
        };

        let start = Instant::now();
        match self.backend.upload(file, Some(progress)).await {
            Ok(response) => {
                metrics::UPLOADS_TOTAL.with_label_values(&["success"]).inc();
                metrics::UPLOAD_BYTES.inc_by(file.size());
                metrics::UPLOAD_DURATION
                    .with_label_values(&["success"])
                    .observe(start.elapsed().as_secs_f64());

                debug!(
                    record_id = %id,
                    document_id = %response.document_id,
                    "Upload succeeded"
                );
                self.queue.update_file_status(
                    id,
                    UploadStatus::Success,
                    None,
                    Some(response.document_id.clone()),
                );
                Ok(response.document_id)
            }
            Err(e) => {
                metrics::UPLOADS_TOTAL.with_label_values(&["error"]).inc();
                metrics::UPLOAD_DURATION
                    .with_label_values(&["error"])
                    .observe(start.elapsed().as_secs_f64());

                let still_queued =
                    self.queue
                        .update_file_status(id, UploadStatus::Error, Some(e.to_string()), None);
                if still_queued {
                    warn!(record_id = %id, file = %file.name, error = %e, "Upload failed");
                    self.notifier.error(format!("{}: Upload failed", file.name));
                } else {
                    debug!(record_id = %id, "Upload failed after record was removed");
                }
                Err(e)
            }
        }
    }
}

/// Guess a MIME type from a file extension.
pub fn mime_for_path(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("pdf") => "application/pdf",
        _ => "application/octet-stream",
    }
}

/// Read files from disk into [`FileHandle`]s.
pub async fn load_files(paths: &[PathBuf]) -> Result<Vec<FileHandle>, UploadError> {
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let bytes = tokio::fs::read(path).await.map_err(|source| UploadError::Io {
            path: path.clone(),
            source,
        })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        files.push(FileHandle::new(name, mime_for_path(path), bytes));
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NotificationLevel;
    use crate::testing::{pdf_file, MockBackendClient};
    use std::io::Write;
    use std::time::Duration;

    fn orchestrator(backend: Arc<MockBackendClient>) -> (UploadOrchestrator, Notifier) {
        let notifier = Notifier::default();
        let orch = UploadOrchestrator::new(
            backend,
            UploadQueue::new(),
            notifier.clone(),
            UploadConfig::default(),
        );
        (orch, notifier)
    }

    #[tokio::test]
    async fn test_invalid_file_never_queued() {
        let backend = Arc::new(MockBackendClient::new());
        let (orch, notifier) = orchestrator(backend.clone());
        let mut rx = notifier.subscribe();

        let files = vec![
            pdf_file("a.pdf"),
            FileHandle::new("b.png", "image/png", vec![1, 2, 3]),
            pdf_file("c.pdf"),
        ];
        let outcome = orch.handle_file_add(files).await;

        assert_eq!(outcome.accepted.len(), 2);
        assert_eq!(outcome.rejected.len(), 1);
        assert_eq!(outcome.rejected[0].name, "b.png");
        assert_eq!(outcome.uploaded, 2);

        let names: Vec<_> = orch.queue().files().into_iter().map(|r| r.file.name).collect();
        assert_eq!(names, vec!["a.pdf", "c.pdf"]);

        let n = rx.recv().await.unwrap();
        assert_eq!(n.level, NotificationLevel::Error);
        assert_eq!(n.message, "b.png: Only PDF files are allowed");
        assert_eq!(backend.recorded_uploads().await.len(), 2);
    }

    #[tokio::test]
    async fn test_partial_failure() {
        let backend = Arc::new(MockBackendClient::new());
        backend.fail_upload_for("bad.pdf").await;
        let (orch, _notifier) = orchestrator(backend.clone());

        let outcome = orch
            .handle_file_add(vec![pdf_file("good.pdf"), pdf_file("bad.pdf")])
            .await;
        assert_eq!(outcome.uploaded, 1);
        assert_eq!(outcome.failed, 1);

        let records = orch.queue().files();
        assert_eq!(records[0].status, UploadStatus::Success);
        assert_eq!(records[0].progress, 100);
        assert!(records[0].document_id.is_some());
        assert_eq!(records[1].status, UploadStatus::Error);
        assert!(records[1].error.is_some());
        assert!(!orch.queue().is_uploading());
    }

    #[tokio::test]
    async fn test_retry_reuses_record() {
        let backend = Arc::new(MockBackendClient::new());
        backend.fail_upload_for("flaky.pdf").await;
        let (orch, _notifier) = orchestrator(backend.clone());

        let outcome = orch.handle_file_add(vec![pdf_file("flaky.pdf")]).await;
        let id = outcome.accepted[0].clone();
        assert_eq!(orch.queue().get(&id).unwrap().status, UploadStatus::Error);

        backend.clear_upload_failures().await;
        let document_id = orch.retry_upload(&id).await.unwrap();

        let record = orch.queue().get(&id).unwrap();
        assert_eq!(orch.queue().len(), 1);
        assert_eq!(record.status, UploadStatus::Success);
        assert_eq!(record.document_id, Some(document_id));
        assert!(record.error.is_none());
        assert_eq!(record.attempts, 2);
    }

    #[tokio::test]
    async fn test_retry_rejects_non_error_record() {
        let backend = Arc::new(MockBackendClient::new());
        let (orch, _notifier) = orchestrator(backend);

        let outcome = orch.handle_file_add(vec![pdf_file("ok.pdf")]).await;
        let err = orch.retry_upload(&outcome.accepted[0]).await.unwrap_err();
        assert!(matches!(err, UploadError::NotRetryable { .. }));

        let err = orch.retry_upload(&RecordId::from("missing")).await.unwrap_err();
        assert!(matches!(err, UploadError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_concurrent_retries_upload_once() {
        let backend = Arc::new(MockBackendClient::new());
        backend.fail_upload_for("flaky.pdf").await;
        let (orch, _notifier) = orchestrator(backend.clone());

        let id = orch.handle_file_add(vec![pdf_file("flaky.pdf")]).await.accepted[0].clone();
        backend.clear_upload_failures().await;
        backend.set_upload_delay(Duration::from_millis(50)).await;

        let (a, b) = tokio::join!(orch.retry_upload(&id), orch.retry_upload(&id));
        assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);
        assert!(matches!(
            a.err().or(b.err()),
            Some(UploadError::NotRetryable { .. })
        ));
        assert_eq!(backend.recorded_uploads().await.len(), 2);
        assert_eq!(orch.queue().get(&id).unwrap().status, UploadStatus::Success);
    }

    #[tokio::test]
    async fn test_failed_retry_leaves_no_document_id() {
        let backend = Arc::new(MockBackendClient::new());
        let (orch, _notifier) = orchestrator(backend.clone());

        let id = orch.handle_file_add(vec![pdf_file("a.pdf")]).await.accepted[0].clone();
        orch.queue()
            .update_file_status(&id, UploadStatus::Processing, None, None);
        orch.queue()
            .update_file_status(&id, UploadStatus::Error, Some("OCR failed".into()), None);

        backend
            .set_next_error(BackendError::ConnectionFailed("reset".into()))
            .await;
        assert!(orch.retry_upload(&id).await.is_err());

        let record = orch.queue().get(&id).unwrap();
        assert_eq!(record.status, UploadStatus::Error);
        assert!(record.document_id.is_none());
        assert!(record.error.unwrap().contains("reset"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_upload_clears_uploading_flag() {
        let backend = Arc::new(MockBackendClient::new());
        backend.set_upload_delay(Duration::from_secs(60)).await;
        let (orch, _notifier) = orchestrator(backend);

        let upload = orch.handle_file_add(vec![pdf_file("slow.pdf")]);
        let timed_out = tokio::time::timeout(Duration::from_secs(1), upload).await;
        assert!(timed_out.is_err());
        assert!(!orch.queue().is_uploading());
        assert_eq!(orch.queue().files()[0].status, UploadStatus::Uploading);
    }

    #[tokio::test]
    async fn test_progress_forwarded_to_store() {
        let backend = Arc::new(MockBackendClient::new());
        backend.set_progress_steps(vec![10, 55, 90]).await;
        let (orch, _notifier) = orchestrator(backend);
        let mut changes = orch.queue().subscribe();
        changes.mark_unchanged();

        orch.handle_file_add(vec![pdf_file("a.pdf")]).await;

        assert!(changes.has_changed().unwrap());
        assert_eq!(orch.queue().files()[0].progress, 100);
    }

    #[tokio::test]
    async fn test_upload_stats() {
        let backend = Arc::new(MockBackendClient::new());
        backend.fail_upload_for("bad.pdf").await;
        let (orch, _notifier) = orchestrator(backend);

        orch.handle_file_add(vec![pdf_file("a.pdf"), pdf_file("bad.pdf")])
            .await;

        let stats = orch.upload_stats();
        assert_eq!(
            stats,
            UploadStats {
                total: 2,
                uploaded: 1,
                pending: 0,
                failed: 1,
                processable: 1,
            }
        );
    }

    #[test]
    fn test_mime_for_path() {
        assert_eq!(mime_for_path(Path::new("a/Report.PDF")), "application/pdf");
        assert_eq!(mime_for_path(Path::new("notes.txt")), "application/octet-stream");
        assert_eq!(mime_for_path(Path::new("noext")), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_load_files() {
        let mut temp = tempfile::Builder::new().suffix(".pdf").tempfile().unwrap();
        temp.write_all(b"%PDF-1.7 test").unwrap();

        let files = load_files(&[temp.path().to_path_buf()]).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].mime_type, "application/pdf");
        assert_eq!(files[0].size(), 13);

        let err = load_files(&[PathBuf::from("/nonexistent/x.pdf")])
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Io { .. }));
    }
}
