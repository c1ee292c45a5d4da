//! Prometheus metrics for a CLI run.
//!
//! Core counters are registered alongside a gauge of local records by status,
//! collected from the queue right before encoding.

use once_cell::sync::Lazy;
use prometheus::{IntGaugeVec, Opts, Registry};

use ledgerdash_core::{metrics as core_metrics, UploadQueue};

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

/// Local upload records by current status (collected dynamically).
pub static QUEUE_RECORDS: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new(
            "ledgerdash_queue_records",
            "Local upload records by current status",
        ),
        &["status"],
    )
    .unwrap()
});

fn register_metrics(registry: &Registry) {
    core_metrics::register(registry).unwrap();
    registry.register(Box::new(QUEUE_RECORDS.clone())).unwrap();
}

/// Update gauges from the current queue contents.
pub fn collect_queue_metrics(queue: &UploadQueue) {
    let stats = queue.processing_stats();
    for (status, count) in [
        ("pending", stats.pending),
        ("uploading", stats.uploading),
        ("uploaded", stats.uploaded),
        ("processing", stats.processing),
        ("completed", stats.completed),
        ("error", stats.failed),
    ] {
        QUEUE_RECORDS.with_label_values(&[status]).set(count as i64);
    }
}

/// Encode all metrics in Prometheus text format.
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    core_metrics::gather_text(&REGISTRY)
}
