//! Upload record data types.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Locally generated identifier of an upload record.
///
/// Unique for the session and never reused, even for files with the same name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Generate a fresh id for a file called `name`.
    pub fn generate(name: &str) -> Self {
        let stem: String = name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .take(32)
            .collect();
        Self(format!("{}-{}", stem, uuid::Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// An in-memory file selected for upload.
#[derive(Clone, Serialize)]
pub struct FileHandle {
    /// File name as presented to the backend.
    pub name: String,
    /// MIME type, e.g. `application/pdf`.
    pub mime_type: String,
    /// File contents.
    #[serde(skip)]
    pub bytes: Arc<[u8]>,
}

impl FileHandle {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            bytes: Arc::from(bytes),
        }
    }

    /// Size in bytes.
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

impl fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileHandle")
            .field("name", &self.name)
            .field("mime_type", &self.mime_type)
            .field("size", &self.bytes.len())
            .finish()
    }
}

/// Lifecycle status of an upload record.
///
/// `pending -> uploading -> {success | error}`, then for records with a
/// document id `success -> processing -> {completed | error}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Pending,
    Uploading,
    Success,
    Error,
    /// Extraction running on the backend. `ready` is accepted as a synonym.
    #[serde(alias = "ready")]
    Processing,
    Completed,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Pending => "pending",
            UploadStatus::Uploading => "uploading",
            UploadStatus::Success => "success",
            UploadStatus::Error => "error",
            UploadStatus::Processing => "processing",
            UploadStatus::Completed => "completed",
        }
    }

    /// No automatic transition leaves a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UploadStatus::Success | UploadStatus::Error | UploadStatus::Completed
        )
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UploadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(UploadStatus::Pending),
            "uploading" => Ok(UploadStatus::Uploading),
            "success" => Ok(UploadStatus::Success),
            "error" => Ok(UploadStatus::Error),
            "processing" | "ready" => Ok(UploadStatus::Processing),
            "completed" => Ok(UploadStatus::Completed),
            other => Err(format!("unknown upload status: {}", other)),
        }
    }
}

/// Local tracking entry for one file through its lifecycle.
#[derive(Debug, Clone, Serialize)]
pub struct UploadRecord {
    pub id: RecordId,
    pub file: FileHandle,
    /// Upload percentage, 0-100. Fixed at 100 once uploaded.
    pub progress: u8,
    pub status: UploadStatus,
    /// Backend-assigned id, set on upload success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    /// Failure reason, only meaningful in `error`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub added_at: DateTime<Utc>,
    /// Number of upload attempts so far.
    pub attempts: u32,
}

impl UploadRecord {
    pub(crate) fn new(file: FileHandle) -> Self {
        Self {
            id: RecordId::generate(&file.name),
            file,
            progress: 0,
            status: UploadStatus::Pending,
            document_id: None,
            error: None,
            added_at: Utc::now(),
            attempts: 0,
        }
    }

    /// Uploaded with a document id and eligible for batch submission.
    pub fn is_processable(&self) -> bool {
        self.status == UploadStatus::Success && self.document_id.is_some()
    }
}

/// Aggregate counts over the queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProcessingStats {
    pub total: usize,
    pub pending: usize,
    pub uploading: usize,
    pub uploaded: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    /// `round(100 * (completed + failed) / (processing + completed + failed))`,
    /// 0 when nothing has started processing.
    pub progress_percentage: u8,
}

impl ProcessingStats {
    pub(crate) fn from_records<'a>(records: impl IntoIterator<Item = &'a UploadRecord>) -> Self {
        let mut stats = ProcessingStats::default();
        for record in records {
            stats.total += 1;
            match record.status {
                UploadStatus::Pending => stats.pending += 1,
                UploadStatus::Uploading => stats.uploading += 1,
                UploadStatus::Success => stats.uploaded += 1,
                UploadStatus::Processing => stats.processing += 1,
                UploadStatus::Completed => stats.completed += 1,
                UploadStatus::Error => stats.failed += 1,
            }
        }

        let started = stats.processing + stats.completed + stats.failed;
        let finished = stats.completed + stats.failed;
        stats.progress_percentage = if started == 0 {
            0
        } else {
            (100.0 * finished as f64 / started as f64).round() as u8
        };
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_ids_unique_for_same_name() {
        let a = RecordId::generate("report.pdf");
        let b = RecordId::generate("report.pdf");
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("report_pdf-"));
    }

    #[test]
    fn test_record_id_sanitizes_name() {
        let id = RecordId::generate("Q3 results/2024 (final).pdf");
        assert!(id
            .as_str()
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'));
    }

    #[test]
    fn test_ready_is_processing() {
        assert_eq!("ready".parse::<UploadStatus>(), Ok(UploadStatus::Processing));
        let status: UploadStatus = serde_json::from_str("\"ready\"").unwrap();
        assert_eq!(status, UploadStatus::Processing);
        assert_eq!(serde_json::to_string(&status).unwrap(), "\"processing\"");
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            UploadStatus::Pending,
            UploadStatus::Uploading,
            UploadStatus::Success,
            UploadStatus::Error,
            UploadStatus::Processing,
            UploadStatus::Completed,
        ] {
            assert_eq!(status.as_str().parse::<UploadStatus>(), Ok(status));
        }
        assert!("uploaded".parse::<UploadStatus>().is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(UploadStatus::Success.is_terminal());
        assert!(UploadStatus::Error.is_terminal());
        assert!(UploadStatus::Completed.is_terminal());
        assert!(!UploadStatus::Pending.is_terminal());
        assert!(!UploadStatus::Uploading.is_terminal());
        assert!(!UploadStatus::Processing.is_terminal());
    }

    #[test]
    fn test_processing_stats_percentage() {
        let statuses = [
            UploadStatus::Processing,
            UploadStatus::Processing,
            UploadStatus::Completed,
            UploadStatus::Error,
            UploadStatus::Pending,
        ];
        let records: Vec<_> = statuses
            .iter()
            .map(|s| {
                let mut r = UploadRecord::new(FileHandle::new("a.pdf", "application/pdf", vec![1]));
                r.status = *s;
                r
            })
            .collect();

        let stats = ProcessingStats::from_records(&records);
        assert_eq!(stats.total, 5);
        assert_eq!(stats.processing, 2);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.progress_percentage, 50);
    }

    #[test]
    fn test_processing_stats_empty() {
        let stats = ProcessingStats::from_records(&Vec::<UploadRecord>::new());
        assert_eq!(stats, ProcessingStats::default());
        assert_eq!(stats.progress_percentage, 0);
    }

    #[test]
    fn test_file_handle_debug_omits_bytes() {
        let file = FileHandle::new("a.pdf", "application/pdf", vec![0u8; 2048]);
        let debug = format!("{:?}", file);
        assert!(debug.contains("size: 2048"));
        assert_eq!(file.size(), 2048);
    }
}
