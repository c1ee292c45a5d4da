//! Status poller implementation.
//!
//! Keeps records whose backend job is outstanding up to date:
//! - One status query per active document per tick, issued concurrently
//! - Ticks are strictly sequential, spaced by the configured interval
//! - The active set shrinks as records reach a terminal status; polling stops
//!   when it empties, on `cancel()`, or when the queue is cleared

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::watch;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::backend::{BackendClient, BackendStatus};
use crate::config::PollerConfig;
use crate::metrics;
use crate::notify::Notifier;
use crate::queue::{UploadQueue, UploadStatus};

use super::types::{ActiveDocument, PollOutcome, PollerStatus, TickReport};

#[derive(Default)]
struct PollerState {
    active: BTreeMap<String, ActiveDocument>,
    /// Cancellation token of the current active set; `None` when idle.
    cancel: Option<watch::Sender<bool>>,
}

impl PollerState {
    /// Revoke the current token, stopping its polling task.
    fn revoke(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(true);
        }
    }
}

/// Polls the backend for documents awaiting completion.
///
/// Cloning yields another handle to the same poller.
#[derive(Clone)]
pub struct StatusPoller {
    backend: Arc<dyn BackendClient>,
    queue: UploadQueue,
    notifier: Notifier,
    config: PollerConfig,
    state: Arc<Mutex<PollerState>>,
    /// Number of active documents, for waiters.
    active_count: Arc<watch::Sender<usize>>,
}

fn lock(state: &Mutex<PollerState>) -> MutexGuard<'_, PollerState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

impl StatusPoller {
    /// Create a poller. Clearing `queue` cancels all polling.
    pub fn new(
        backend: Arc<dyn BackendClient>,
        queue: UploadQueue,
        notifier: Notifier,
        config: PollerConfig,
    ) -> Self {
        let (active_count, _) = watch::channel(0);
        let poller = Self {
            backend,
            queue,
            notifier,
            config,
            state: Arc::new(Mutex::new(PollerState::default())),
            active_count: Arc::new(active_count),
        };

        let state = poller.state.clone();
        let active_count = poller.active_count.clone();
        poller.queue.on_clear_all(move || {
            let mut state = lock(&state);
            if !state.active.is_empty() {
                info!("Queue cleared, cancelling status polling");
            }
            state.active.clear();
            state.revoke();
            active_count.send_replace(0);
        });

        poller
    }

    /// Add documents to the active set and start polling if idle.
    ///
    /// Outside a tokio runtime the documents are only recorded; drive them
    /// with [`poll_once`](Self::poll_once).
    pub fn track(&self, document_ids: impl IntoIterator<Item = String>) {
        let mut state = lock(&self.state);
        let now = Instant::now();
        for id in document_ids {
            state
                .active
                .entry(id)
                .or_insert_with(|| ActiveDocument::new(now));
        }
        self.active_count.send_replace(state.active.len());

        if state.active.is_empty() || state.cancel.is_some() {
            return;
        }

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("No tokio runtime, status polling not started");
            return;
        };

        let (cancel_tx, cancel_rx) = watch::channel(false);
        state.cancel = Some(cancel_tx);
        let count = state.active.len();
        drop(state);

        info!(documents = count, "Starting status polling");
        handle.spawn(self.clone().run(cancel_rx));
    }

    /// Stop polling and forget every active document.
    pub fn cancel(&self) {
        let mut state = lock(&self.state);
        state.active.clear();
        state.revoke();
        self.active_count.send_replace(0);
    }

    /// Whether a polling task is scheduled.
    pub fn is_polling(&self) -> bool {
        lock(&self.state).cancel.is_some()
    }

    /// Documents awaiting completion.
    pub fn active_ids(&self) -> Vec<String> {
        lock(&self.state).active.keys().cloned().collect()
    }

    pub fn status(&self) -> PollerStatus {
        let state = lock(&self.state);
        PollerStatus {
            running: state.cancel.is_some(),
            active_documents: state.active.len(),
        }
    }

    /// Wait until no document is active.
    pub async fn wait_idle(&self) {
        let mut rx = self.active_count.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    async fn run(self, mut cancel: watch::Receiver<bool>) {
        let interval = Duration::from_millis(self.config.interval_ms);
        loop {
            tokio::select! {
                _ = cancel.changed() => break,
                _ = sleep(interval) => {}
            }
            if *cancel.borrow() {
                break;
            }

            let report = self.poll_once().await;
            if report.remaining == 0 {
                break;
            }
        }
        debug!("Status polling task exiting");
    }

    /// Run a single tick over the current active set.
    pub async fn poll_once(&self) -> TickReport {
        let ids = {
            let mut state = lock(&self.state);
            self.prune(&mut state);
            state.active.keys().cloned().collect::<Vec<_>>()
        };

        let mut report = TickReport::default();
        if ids.is_empty() {
            self.finish_tick(&mut report);
            return report;
        }

        metrics::POLL_TICKS.inc();
        report.polled = ids.len();

        let outcomes = join_all(ids.iter().map(|id| async move {
            match self.backend.get_status(id).await {
                Ok(status) => PollOutcome::Status(status),
                Err(e) => PollOutcome::Failed(e.to_string()),
            }
        }))
        .await;

        for (id, outcome) in ids.iter().zip(outcomes) {
            self.apply(id, outcome, &mut report);
        }

        self.expire_overdue(&mut report);
        self.finish_tick(&mut report);

        debug!(
            polled = report.polled,
            completed = report.completed,
            failed = report.failed,
            errors = report.errors,
            remaining = report.remaining,
            "Poll tick finished"
        );
        report
    }

    /// Apply one query result to the store.
    fn apply(&self, document_id: &str, outcome: PollOutcome, report: &mut TickReport) {
        let status = match outcome {
            PollOutcome::Status(status) => status,
            PollOutcome::Failed(message) => {
                metrics::POLL_ERRORS.inc();
                report.errors += 1;
                debug!(document_id, error = %message, "Status query failed");
                return;
            }
        };

        let Some(record) = self.queue.find_by_document_id(document_id) else {
            return;
        };

        let target = match status.status {
            BackendStatus::Completed => UploadStatus::Completed,
            BackendStatus::Failed => UploadStatus::Error,
            BackendStatus::Processing => UploadStatus::Processing,
            BackendStatus::Uploaded | BackendStatus::Unknown => return,
        };

        let last = {
            let mut state = lock(&self.state);
            match state.active.get_mut(document_id) {
                Some(doc) => doc.last_status.replace(target),
                None => return,
            }
        };
        if last == Some(target) || record.status == target {
            return;
        }

        let name = if status.filename.is_empty() {
            record.file.name.clone()
        } else {
            status.filename.clone()
        };

        match target {
            UploadStatus::Completed => {
                info!(document_id, "Processing completed");
                self.queue
                    .update_file_status(&record.id, UploadStatus::Completed, None, None);
                self.notifier
                    .success(format!("{} processing completed!", name));
                report.completed += 1;
            }
            UploadStatus::Error => {
                let reason = status
                    .joined_errors()
                    .unwrap_or_else(|| "Processing failed".to_string());
                warn!(document_id, %reason, "Processing failed");
                self.queue
                    .update_file_status(&record.id, UploadStatus::Error, Some(reason), None);
                self.notifier.error(format!("{} processing failed", name));
                report.failed += 1;
            }
            _ => {
                self.queue
                    .update_file_status(&record.id, UploadStatus::Processing, None, None);
                report.processing += 1;
            }
        }
    }

    /// Fail documents that have been polled for longer than allowed.
    fn expire_overdue(&self, report: &mut TickReport) {
        if self.config.max_poll_duration_secs == 0 {
            return;
        }
        let max = Duration::from_secs(self.config.max_poll_duration_secs);

        let overdue: Vec<String> = lock(&self.state)
            .active
            .iter()
            .filter(|(_, doc)| doc.started.elapsed() >= max)
            .map(|(id, _)| id.clone())
            .collect();

        for document_id in overdue {
            let Some(record) = self.queue.find_by_document_id(&document_id) else {
                continue;
            };
            if record.status.is_terminal() {
                continue;
            }

            warn!(document_id = %document_id, "Processing timed out");
            metrics::POLL_TIMEOUTS.inc();
            self.queue.update_file_status(
                &record.id,
                UploadStatus::Error,
                Some(format!(
                    "Processing timed out after {} s",
                    self.config.max_poll_duration_secs
                )),
                None,
            );
            self.notifier
                .error(format!("{} processing failed", record.file.name));
            report.timed_out += 1;
        }
    }

    /// Drop documents whose record is terminal or gone.
    fn prune(&self, state: &mut PollerState) {
        state.active.retain(|id, _| {
            self.queue
                .find_by_document_id(id)
                .is_some_and(|r| !r.status.is_terminal())
        });
    }

    /// Prune, and revoke the token once nothing is left.
    fn finish_tick(&self, report: &mut TickReport) {
        let mut state = lock(&self.state);
        self.prune(&mut state);
        report.remaining = state.active.len();
        if state.active.is_empty() {
            if state.cancel.is_some() {
                info!("No documents outstanding, status polling stopped");
            }
            state.revoke();
        }
        self.active_count.send_replace(state.active.len());
    }
}
