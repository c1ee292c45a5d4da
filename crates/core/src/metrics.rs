//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Uploads (attempts by result, bytes sent)
//! - Status polling (ticks, per-document query errors, timeouts)
//! - Batch submissions and queue status transitions

use once_cell::sync::Lazy;
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

// =============================================================================
// Uploads
// =============================================================================

/// Upload attempts by result.
pub static UPLOADS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("ledgerdash_uploads_total", "Total upload attempts"),
        &["result"], // "success", "error", "rejected"
    )
    .unwrap()
});

/// Bytes successfully uploaded.
pub static UPLOAD_BYTES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("ledgerdash_upload_bytes_total", "Bytes uploaded to the backend").unwrap()
});

/// Upload duration in seconds.
pub static UPLOAD_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new("ledgerdash_upload_duration_seconds", "Duration of file uploads")
            .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
        &["result"],
    )
    .unwrap()
});

// =============================================================================
// Polling
// =============================================================================

/// Poll ticks executed.
pub static POLL_TICKS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("ledgerdash_poll_ticks_total", "Status poll ticks executed").unwrap()
});

/// Per-document status queries that failed.
pub static POLL_ERRORS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "ledgerdash_poll_errors_total",
        "Status queries that failed within a tick",
    )
    .unwrap()
});

/// Documents abandoned after exceeding the maximum poll duration.
pub static POLL_TIMEOUTS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "ledgerdash_poll_timeouts_total",
        "Documents that exceeded the maximum poll duration",
    )
    .unwrap()
});

// =============================================================================
// Batch processing and queue
// =============================================================================

/// Documents submitted for processing, by result.
pub static BATCH_DOCUMENTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "ledgerdash_batch_documents_total",
            "Documents submitted for batch processing",
        ),
        &["result"], // "accepted", "rejected", "request_failed"
    )
    .unwrap()
});

/// Record status transitions by target status.
pub static STATUS_TRANSITIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "ledgerdash_status_transitions_total",
            "Upload record status transitions",
        ),
        &["status"],
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(UPLOADS_TOTAL.clone()),
        Box::new(UPLOAD_BYTES.clone()),
        Box::new(UPLOAD_DURATION.clone()),
        Box::new(POLL_TICKS.clone()),
        Box::new(POLL_ERRORS.clone()),
        Box::new(POLL_TIMEOUTS.clone()),
        Box::new(BATCH_DOCUMENTS.clone()),
        Box::new(STATUS_TRANSITIONS.clone()),
    ]
}

/// Register every core metric on `registry`.
pub fn register(registry: &Registry) -> Result<(), prometheus::Error> {
    for metric in all_metrics() {
        registry.register(metric)?;
    }
    Ok(())
}

/// Encode a registry's metrics in the Prometheus text format.
pub fn gather_text(registry: &Registry) -> Result<String, prometheus::Error> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_gather() {
        let registry = Registry::new();
        register(&registry).unwrap();

        UPLOADS_TOTAL.with_label_values(&["success"]).inc();
        POLL_TICKS.inc();

        let text = gather_text(&registry).unwrap();
        assert!(text.contains("ledgerdash_uploads_total"));
        assert!(text.contains("ledgerdash_poll_ticks_total"));
    }

    #[test]
    fn test_register_twice_fails() {
        let registry = Registry::new();
        register(&registry).unwrap();
        assert!(register(&registry).is_err());
    }
}
