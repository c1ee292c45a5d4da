//! Types for the status poller.

use serde::Serialize;
use tokio::time::Instant;

use crate::backend::StatusResponse;
use crate::queue::UploadStatus;

/// Result of one status query within a tick.
///
/// A failed query is a soft failure: the document stays active and its record
/// is left alone.
#[derive(Debug, Clone)]
pub enum PollOutcome {
    Status(StatusResponse),
    Failed(String),
}

/// A backend document awaiting completion.
#[derive(Debug, Clone)]
pub(crate) struct ActiveDocument {
    /// When polling for this document began.
    pub started: Instant,
    /// Last status acted on for this document.
    pub last_status: Option<UploadStatus>,
}

impl ActiveDocument {
    pub fn new(started: Instant) -> Self {
        Self {
            started,
            last_status: None,
        }
    }
}

/// Summary of one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Documents queried.
    pub polled: usize,
    /// Records moved to `completed`.
    pub completed: usize,
    /// Records moved to `error` by a backend failure.
    pub failed: usize,
    /// Records moved to `processing`.
    pub processing: usize,
    /// Status queries that failed.
    pub errors: usize,
    /// Records abandoned after the maximum poll duration.
    pub timed_out: usize,
    /// Documents still active after the tick.
    pub remaining: usize,
}

/// Current status of the poller.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PollerStatus {
    /// Whether a background polling task is scheduled.
    pub running: bool,
    /// Documents awaiting completion.
    pub active_documents: usize,
}
