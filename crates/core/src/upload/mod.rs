//! Upload orchestration: validation plus concurrent uploads into the queue.

mod orchestrator;
mod validation;

pub use orchestrator::{
    load_files, mime_for_path, AddFilesOutcome, RejectedFile, UploadError, UploadOrchestrator,
    UploadStats,
};
pub use validation::{validate_file, ValidationError};
