//! Client-side file validation.

use thiserror::Error;

use crate::config::UploadConfig;
use crate::queue::FileHandle;

/// Why a file was rejected before upload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// `message` names what the allow-list accepts.
    #[error("{message}")]
    UnsupportedType { mime_type: String, message: String },

    #[error("File size must be less than {max_mb}MB")]
    TooLarge { size: u64, max_mb: u64 },

    #[error("File cannot be empty")]
    Empty,
}

/// Check a file against the upload constraints.
///
/// Type is checked first, then size, then emptiness.
pub fn validate_file(file: &FileHandle, constraints: &UploadConfig) -> Result<(), ValidationError> {
    if !mime_allowed(&file.mime_type, &constraints.allowed_mime_types) {
        return Err(ValidationError::UnsupportedType {
            mime_type: file.mime_type.clone(),
            message: unsupported_type_message(&constraints.allowed_mime_types),
        });
    }

    if file.size() > constraints.max_file_size_bytes() {
        return Err(ValidationError::TooLarge {
            size: file.size(),
            max_mb: constraints.max_file_size_mb,
        });
    }

    if file.size() == 0 {
        return Err(ValidationError::Empty);
    }

    Ok(())
}

fn unsupported_type_message(allowed: &[String]) -> String {
    if allowed.iter().all(|a| a.to_ascii_lowercase().contains("pdf")) {
        "Only PDF files are allowed".to_string()
    } else {
        format!("Only these file types are allowed: {}", allowed.join(", "))
    }
}

/// Exact match against the allow-list, or any `pdf` subtype when PDFs are allowed.
fn mime_allowed(mime_type: &str, allowed: &[String]) -> bool {
    let mime_type = mime_type.trim().to_ascii_lowercase();
    if mime_type.is_empty() {
        return false;
    }
    allowed.iter().any(|a| {
        let a = a.to_ascii_lowercase();
        a == mime_type || (a.contains("pdf") && mime_type.contains("pdf"))
    })
}
