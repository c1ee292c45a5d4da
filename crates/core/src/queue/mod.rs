//! Upload queue: the single owner of upload records and session flags.

mod store;
mod types;

pub use store::{ClearListener, StagedProcessing, UploadQueue};
pub use types::{FileHandle, ProcessingStats, RecordId, UploadRecord, UploadStatus};
