//! In-memory upload queue store.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::watch;
use tracing::debug;

use crate::backend::FailedDocument;
use crate::metrics;

use super::{FileHandle, ProcessingStats, RecordId, UploadRecord, UploadStatus};

/// Callback run after [`UploadQueue::clear_all`].
pub type ClearListener = Box<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct QueueState {
    records: Vec<UploadRecord>,
    is_uploading: bool,
    is_processing: bool,
}

impl QueueState {
    fn find_mut(&mut self, id: &RecordId) -> Option<&mut UploadRecord> {
        self.records.iter_mut().find(|r| &r.id == id)
    }

    fn set_status(
        record: &mut UploadRecord,
        status: UploadStatus,
        error: Option<String>,
        document_id: Option<String>,
    ) {
        if record.status != status {
            metrics::STATUS_TRANSITIONS
                .with_label_values(&[status.as_str()])
                .inc();
        }

        match status {
            UploadStatus::Success | UploadStatus::Completed => record.progress = 100,
            UploadStatus::Pending => {
                record.progress = 0;
                record.document_id = None;
            }
            UploadStatus::Uploading => record.attempts += 1,
            UploadStatus::Error | UploadStatus::Processing => {}
        }

        record.status = status;
        record.error = if status == UploadStatus::Error {
            error.or_else(|| record.error.take())
        } else {
            None
        };
        if let Some(document_id) = document_id {
            record.document_id = Some(document_id);
        }
    }

    /// Clear `is_processing` once nothing is processing any more.
    fn settle_processing_flag(&mut self) {
        if self.is_processing
            && !self
                .records
                .iter()
                .any(|r| r.status == UploadStatus::Processing)
        {
            debug!("No records processing, clearing processing flag");
            self.is_processing = false;
        }
    }
}

/// Records optimistically moved to `processing`, awaiting the batch response.
///
/// Resolve with [`UploadQueue::commit_processing`] or
/// [`UploadQueue::rollback_processing`].
#[must_use]
#[derive(Debug, Clone)]
pub struct StagedProcessing {
    entries: Vec<(RecordId, String)>,
}

impl StagedProcessing {
    /// Backend ids of the staged records, in queue order.
    pub fn document_ids(&self) -> Vec<String> {
        self.entries.iter().map(|(_, d)| d.clone()).collect()
    }

    pub fn record_ids(&self) -> Vec<RecordId> {
        self.entries.iter().map(|(r, _)| r.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Ordered collection of upload records plus session flags.
///
/// Cloning yields another handle to the same queue. Every operation is one
/// critical section; no lock is held across an `.await`.
#[derive(Clone)]
pub struct UploadQueue {
    state: Arc<RwLock<QueueState>>,
    revision: Arc<watch::Sender<u64>>,
    clear_listeners: Arc<RwLock<Vec<ClearListener>>>,
}

impl Default for UploadQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl UploadQueue {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            state: Arc::new(RwLock::new(QueueState::default())),
            revision: Arc::new(revision),
            clear_listeners: Arc::new(RwLock::new(Vec::new())),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, QueueState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, QueueState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Apply a record mutation, then settle the processing flag and notify
    /// subscribers.
    fn mutate<R>(&self, f: impl FnOnce(&mut QueueState) -> R) -> R {
        let result = {
            let mut state = self.write();
            let result = f(&mut state);
            state.settle_processing_flag();
            result
        };
        self.bump();
        result
    }

    fn bump(&self) {
        self.revision.send_modify(|r| *r += 1);
    }

    /// Change feed: the value increments after every mutation.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    /// Register a callback run after every [`clear_all`](Self::clear_all).
    pub fn on_clear_all(&self, listener: impl Fn() + Send + Sync + 'static) {
        self.clear_listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Box::new(listener));
    }

    /// Append one `pending` record per file and return their ids.
    pub fn add_files(&self, files: Vec<FileHandle>) -> Vec<RecordId> {
        self.mutate(|state| {
            files
                .into_iter()
                .map(|file| {
                    let record = UploadRecord::new(file);
                    let id = record.id.clone();
                    debug!(record_id = %id, file = %record.file.name, "Queued file");
                    state.records.push(record);
                    id
                })
                .collect()
        })
    }

    /// Set upload progress. Ignored if the record is gone; not clamped.
    pub fn update_file_progress(&self, id: &RecordId, progress: u8) {
        self.mutate(|state| {
            if let Some(record) = state.find_mut(id) {
                record.progress = progress;
            }
        })
    }

    /// Set a record's status, optionally its error and document id.
    ///
    /// `success` and `completed` force progress to 100; `pending` resets it
    /// and drops the document id. Otherwise a document id is never cleared by
    /// an update that does not supply one.
    /// Returns whether the record exists.
    pub fn update_file_status(
        &self,
        id: &RecordId,
        status: UploadStatus,
        error: Option<String>,
        document_id: Option<String>,
    ) -> bool {
        self.mutate(|state| match state.find_mut(id) {
            Some(record) => {
                QueueState::set_status(record, status, error, document_id);
                true
            }
            None => false,
        })
    }

    /// Reset a failed record to `pending` for another upload attempt.
    ///
    /// Check and reset happen under one lock, so of two concurrent retries of
    /// the same record only one succeeds. Returns the record as reset, or its
    /// current status when it is not in `error`; `None` if absent.
    pub fn begin_retry(&self, id: &RecordId) -> Option<Result<UploadRecord, UploadStatus>> {
        self.mutate(|state| {
            let record = state.find_mut(id)?;
            if record.status != UploadStatus::Error {
                return Some(Err(record.status));
            }
            QueueState::set_status(record, UploadStatus::Pending, None, None);
            Some(Ok(record.clone()))
        })
    }

    /// Remove a record. Returns whether it was present.
    pub fn remove_file(&self, id: &RecordId) -> bool {
        self.mutate(|state| {
            let before = state.records.len();
            state.records.retain(|r| &r.id != id);
            state.records.len() != before
        })
    }

    /// Remove every record in a terminal status. Returns how many were removed.
    pub fn clear_completed(&self) -> usize {
        self.mutate(|state| {
            let before = state.records.len();
            state.records.retain(|r| !r.status.is_terminal());
            before - state.records.len()
        })
    }

    /// Empty the queue and reset both flags. Returns how many records were removed.
    pub fn clear_all(&self) -> usize {
        let removed = self.mutate(|state| {
            let removed = state.records.len();
            state.records.clear();
            state.is_uploading = false;
            state.is_processing = false;
            removed
        });

        for listener in self
            .clear_listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
        {
            listener();
        }
        removed
    }

    pub fn set_uploading(&self, uploading: bool) {
        self.write().is_uploading = uploading;
        self.bump();
    }

    pub fn set_processing(&self, processing: bool) {
        self.write().is_processing = processing;
        self.bump();
    }

    pub fn is_uploading(&self) -> bool {
        self.read().is_uploading
    }

    pub fn is_processing(&self) -> bool {
        self.read().is_processing
    }

    /// Move every processable record to `processing` and raise the processing
    /// flag, in one step. Returns `None` when nothing is processable.
    pub fn stage_processing(&self) -> Option<StagedProcessing> {
        self.mutate(|state| {
            let mut entries = Vec::new();
            for record in state.records.iter_mut().filter(|r| r.is_processable()) {
                if let Some(document_id) = record.document_id.clone() {
                    QueueState::set_status(record, UploadStatus::Processing, None, None);
                    entries.push((record.id.clone(), document_id));
                }
            }
            if entries.is_empty() {
                None
            } else {
                state.is_processing = true;
                Some(StagedProcessing { entries })
            }
        })
    }

    /// Resolve a staged batch the backend accepted.
    ///
    /// Records named in `failed` move to `error` with the backend's reason.
    /// Returns the document ids still being processed.
    pub fn commit_processing(
        &self,
        staged: StagedProcessing,
        failed: &[FailedDocument],
    ) -> Vec<String> {
        self.mutate(|state| {
            let mut accepted = Vec::new();
            for (record_id, document_id) in staged.entries {
                let failure = failed.iter().find(|f| f.doc_id == document_id);
                let Some(record) = state.find_mut(&record_id) else {
                    continue;
                };
                match failure {
                    Some(f) => QueueState::set_status(
                        record,
                        UploadStatus::Error,
                        Some(f.error.clone()),
                        None,
                    ),
                    None => accepted.push(document_id),
                }
            }
            accepted
        })
    }

    /// Undo a staged batch after the request itself failed.
    pub fn rollback_processing(&self, staged: StagedProcessing) {
        self.mutate(|state| {
            for (record_id, _) in &staged.entries {
                if let Some(record) = state.find_mut(record_id) {
                    if record.status == UploadStatus::Processing {
                        QueueState::set_status(record, UploadStatus::Success, None, None);
                    }
                }
            }
            state.is_processing = false;
        })
    }

    pub fn get(&self, id: &RecordId) -> Option<UploadRecord> {
        self.read().records.iter().find(|r| &r.id == id).cloned()
    }

    pub fn find_by_document_id(&self, document_id: &str) -> Option<UploadRecord> {
        self.read()
            .records
            .iter()
            .find(|r| r.document_id.as_deref() == Some(document_id))
            .cloned()
    }

    /// Snapshot of every record in insertion order.
    pub fn files(&self) -> Vec<UploadRecord> {
        self.read().records.clone()
    }

    fn filtered(&self, pred: impl Fn(&UploadRecord) -> bool) -> Vec<UploadRecord> {
        self.read()
            .records
            .iter()
            .filter(|r| pred(r))
            .cloned()
            .collect()
    }

    /// Records with status `success`.
    pub fn uploaded_files(&self) -> Vec<UploadRecord> {
        self.filtered(|r| r.status == UploadStatus::Success)
    }

    /// Records with status `success` and a document id.
    pub fn processable_files(&self) -> Vec<UploadRecord> {
        self.filtered(UploadRecord::is_processable)
    }

    pub fn pending_files(&self) -> Vec<UploadRecord> {
        self.filtered(|r| r.status == UploadStatus::Pending)
    }

    pub fn failed_files(&self) -> Vec<UploadRecord> {
        self.filtered(|r| r.status == UploadStatus::Error)
    }

    pub fn processing_stats(&self) -> ProcessingStats {
        ProcessingStats::from_records(&self.read().records)
    }

    pub fn len(&self) -> usize {
        self.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn pdf(name: &str) -> FileHandle {
        FileHandle::new(name, "application/pdf", b"%PDF-1.4".to_vec())
    }

    fn uploaded(queue: &UploadQueue, name: &str, doc: &str) -> RecordId {
        let id = queue.add_files(vec![pdf(name)]).remove(0);
        queue.update_file_status(&id, UploadStatus::Success, None, Some(doc.to_string()));
        id
    }

    #[test]
    fn test_add_files_counts_duplicates_with_unique_ids() {
        let queue = UploadQueue::new();
        let first = queue.add_files(vec![pdf("a.pdf"), pdf("a.pdf")]);
        let second = queue.add_files(vec![pdf("a.pdf"), pdf("b.pdf"), pdf("c.pdf")]);

        assert_eq!(queue.len(), 5);
        let all: HashSet<_> = first.iter().chain(second.iter()).collect();
        assert_eq!(all.len(), 5);

        let names: Vec<_> = queue.files().into_iter().map(|r| r.file.name).collect();
        assert_eq!(names, vec!["a.pdf", "a.pdf", "a.pdf", "b.pdf", "c.pdf"]);
        assert!(queue
            .files()
            .iter()
            .all(|r| r.status == UploadStatus::Pending && r.progress == 0));
    }

    #[test]
    fn test_success_forces_full_progress() {
        let queue = UploadQueue::new();
        let id = queue.add_files(vec![pdf("a.pdf")]).remove(0);
        queue.update_file_progress(&id, 37);

        queue.update_file_status(&id, UploadStatus::Success, None, Some("d1".into()));

        let record = queue.get(&id).unwrap();
        assert_eq!(record.progress, 100);
        assert_eq!(record.document_id.as_deref(), Some("d1"));
    }

    #[test]
    fn test_updates_to_absent_record_are_ignored() {
        let queue = UploadQueue::new();
        let ghost = RecordId::from("ghost");
        queue.update_file_progress(&ghost, 50);
        assert!(!queue.update_file_status(&ghost, UploadStatus::Error, Some("x".into()), None));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_progress_not_clamped() {
        let queue = UploadQueue::new();
        let id = queue.add_files(vec![pdf("a.pdf")]).remove(0);
        queue.update_file_progress(&id, 250);
        assert_eq!(queue.get(&id).unwrap().progress, 250);
    }

    #[test]
    fn test_processable_files_subset() {
        let queue = UploadQueue::new();
        let ids = queue.add_files(vec![
            pdf("pending.pdf"),
            pdf("uploading.pdf"),
            pdf("error.pdf"),
            pdf("ok.pdf"),
            pdf("ok-no-doc.pdf"),
        ]);
        queue.update_file_status(&ids[1], UploadStatus::Uploading, None, None);
        queue.update_file_status(&ids[2], UploadStatus::Error, Some("boom".into()), None);
        queue.update_file_status(&ids[3], UploadStatus::Success, None, Some("d3".into()));
        queue.update_file_status(&ids[4], UploadStatus::Success, None, None);

        let processable = queue.processable_files();
        assert_eq!(processable.len(), 1);
        assert_eq!(processable[0].id, ids[3]);

        assert_eq!(queue.uploaded_files().len(), 2);
        assert_eq!(queue.pending_files().len(), 1);
        assert_eq!(queue.failed_files().len(), 1);
        assert_eq!(queue.failed_files()[0].error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_clear_all_resets_everything() {
        let queue = UploadQueue::new();
        uploaded(&queue, "a.pdf", "d1");
        queue.add_files(vec![pdf("b.pdf")]);
        queue.set_uploading(true);
        let _staged = queue.stage_processing().unwrap();
        assert!(queue.is_processing());

        assert_eq!(queue.clear_all(), 2);

        assert!(queue.files().is_empty());
        assert!(queue.uploaded_files().is_empty());
        assert!(queue.pending_files().is_empty());
        assert!(queue.processable_files().is_empty());
        assert!(queue.failed_files().is_empty());
        assert!(!queue.is_uploading());
        assert!(!queue.is_processing());
    }

    #[test]
    fn test_clear_all_runs_listeners() {
        let queue = UploadQueue::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        queue.on_clear_all(move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });

        queue.clear_all();
        queue.clear_all();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_remove_file_idempotent() {
        let queue = UploadQueue::new();
        let ids = queue.add_files(vec![pdf("a.pdf"), pdf("b.pdf")]);

        assert!(queue.remove_file(&ids[0]));
        let after_first: Vec<_> = queue.files().into_iter().map(|r| r.id).collect();
        assert!(!queue.remove_file(&ids[0]));
        let after_second: Vec<_> = queue.files().into_iter().map(|r| r.id).collect();

        assert_eq!(after_first, after_second);
        assert_eq!(after_second, vec![ids[1].clone()]);
    }

    #[test]
    fn test_full_lifecycle_keeps_document_id() {
        let queue = UploadQueue::new();
        let id = queue.add_files(vec![pdf("a.pdf")]).remove(0);
        queue.update_file_status(&id, UploadStatus::Uploading, None, None);
        queue.update_file_progress(&id, 40);
        queue.update_file_status(&id, UploadStatus::Success, None, Some("doc-1".into()));
        queue.update_file_status(&id, UploadStatus::Processing, None, None);
        queue.update_file_status(&id, UploadStatus::Completed, None, None);

        let record = queue.get(&id).unwrap();
        assert_eq!(record.status, UploadStatus::Completed);
        assert_eq!(record.progress, 100);
        assert_eq!(record.document_id.as_deref(), Some("doc-1"));
        assert_eq!(record.attempts, 1);
    }

    #[test]
    fn test_retry_reset_clears_error() {
        let queue = UploadQueue::new();
        let id = queue.add_files(vec![pdf("a.pdf")]).remove(0);
        queue.update_file_status(&id, UploadStatus::Uploading, None, None);
        queue.update_file_progress(&id, 60);
        queue.update_file_status(&id, UploadStatus::Error, Some("HTTP 500".into()), None);

        queue.update_file_status(&id, UploadStatus::Pending, None, None);

        let record = queue.get(&id).unwrap();
        assert_eq!(record.progress, 0);
        assert!(record.error.is_none());
        assert_eq!(record.id, id);
    }

    #[test]
    fn test_pending_reset_drops_stale_document_id() {
        let queue = UploadQueue::new();
        let id = uploaded(&queue, "a.pdf", "doc-1");
        queue.update_file_status(&id, UploadStatus::Processing, None, None);
        queue.update_file_status(&id, UploadStatus::Error, Some("OCR failed".into()), None);

        let record = queue.begin_retry(&id).unwrap().unwrap();
        assert_eq!(record.status, UploadStatus::Pending);
        assert!(record.document_id.is_none());
        assert!(queue.processable_files().is_empty());
        assert!(queue.find_by_document_id("doc-1").is_none());
    }

    #[test]
    fn test_begin_retry_only_once() {
        let queue = UploadQueue::new();
        let id = queue.add_files(vec![pdf("a.pdf")]).remove(0);
        queue.update_file_status(&id, UploadStatus::Error, Some("reset".into()), None);

        assert!(matches!(queue.begin_retry(&id), Some(Ok(_))));
        assert!(matches!(
            queue.begin_retry(&id),
            Some(Err(UploadStatus::Pending))
        ));
        assert!(queue.begin_retry(&RecordId::from("missing")).is_none());
    }

    #[test]
    fn test_clear_completed_keeps_in_flight() {
        let queue = UploadQueue::new();
        let ids = queue.add_files(vec![
            pdf("pending.pdf"),
            pdf("uploading.pdf"),
            pdf("success.pdf"),
            pdf("error.pdf"),
            pdf("processing.pdf"),
            pdf("completed.pdf"),
        ]);
        queue.update_file_status(&ids[1], UploadStatus::Uploading, None, None);
        queue.update_file_status(&ids[2], UploadStatus::Success, None, Some("d2".into()));
        queue.update_file_status(&ids[3], UploadStatus::Error, Some("x".into()), None);
        queue.update_file_status(&ids[4], UploadStatus::Processing, None, Some("d4".into()));
        queue.update_file_status(&ids[5], UploadStatus::Completed, None, Some("d5".into()));

        assert_eq!(queue.clear_completed(), 3);

        let left: Vec<_> = queue.files().into_iter().map(|r| r.id).collect();
        assert_eq!(left, vec![ids[0].clone(), ids[1].clone(), ids[4].clone()]);
    }

    #[test]
    fn test_processing_stats_scenario() {
        let queue = UploadQueue::new();
        let ids = queue.add_files(vec![
            pdf("1.pdf"),
            pdf("2.pdf"),
            pdf("3.pdf"),
            pdf("4.pdf"),
            pdf("5.pdf"),
        ]);
        queue.update_file_status(&ids[0], UploadStatus::Processing, None, Some("d0".into()));
        queue.update_file_status(&ids[1], UploadStatus::Processing, None, Some("d1".into()));
        queue.update_file_status(&ids[2], UploadStatus::Completed, None, Some("d2".into()));
        queue.update_file_status(&ids[3], UploadStatus::Error, Some("bad".into()), None);

        let stats = queue.processing_stats();
        assert_eq!(stats.progress_percentage, 50);
        assert_eq!(stats.pending, 1);
    }

    #[test]
    fn test_stage_and_commit() {
        let queue = UploadQueue::new();
        let a = uploaded(&queue, "a.pdf", "d1");
        let b = uploaded(&queue, "b.pdf", "d2");

        let staged = queue.stage_processing().unwrap();
        assert_eq!(staged.document_ids(), vec!["d1", "d2"]);
        assert!(queue.is_processing());
        assert_eq!(queue.get(&a).unwrap().status, UploadStatus::Processing);

        let accepted = queue.commit_processing(
            staged,
            &[FailedDocument {
                doc_id: "d2".into(),
                error: "corrupt".into(),
            }],
        );

        assert_eq!(accepted, vec!["d1"]);
        assert_eq!(queue.get(&a).unwrap().status, UploadStatus::Processing);
        let failed = queue.get(&b).unwrap();
        assert_eq!(failed.status, UploadStatus::Error);
        assert_eq!(failed.error.as_deref(), Some("corrupt"));
        assert!(queue.is_processing());
    }

    #[test]
    fn test_stage_nothing_processable() {
        let queue = UploadQueue::new();
        queue.add_files(vec![pdf("a.pdf")]);
        assert!(queue.stage_processing().is_none());
        assert!(!queue.is_processing());
    }

    #[test]
    fn test_rollback_restores_success() {
        let queue = UploadQueue::new();
        let a = uploaded(&queue, "a.pdf", "d1");

        let staged = queue.stage_processing().unwrap();
        queue.rollback_processing(staged);

        let record = queue.get(&a).unwrap();
        assert_eq!(record.status, UploadStatus::Success);
        assert_eq!(record.document_id.as_deref(), Some("d1"));
        assert!(!queue.is_processing());
        assert_eq!(queue.processable_files().len(), 1);
    }

    #[test]
    fn test_processing_flag_clears_when_last_record_finishes() {
        let queue = UploadQueue::new();
        let a = uploaded(&queue, "a.pdf", "d1");
        let b = uploaded(&queue, "b.pdf", "d2");
        let staged = queue.stage_processing().unwrap();
        let _ = queue.commit_processing(staged, &[]);

        queue.update_file_status(&a, UploadStatus::Completed, None, None);
        assert!(queue.is_processing());

        queue.update_file_status(&b, UploadStatus::Error, Some("failed".into()), None);
        assert!(!queue.is_processing());
    }

    #[test]
    fn test_change_feed_increments() {
        let queue = UploadQueue::new();
        let rx = queue.subscribe();
        let start = *rx.borrow();

        queue.add_files(vec![pdf("a.pdf")]);
        queue.set_uploading(true);

        assert_eq!(*rx.borrow(), start + 2);
    }
}
