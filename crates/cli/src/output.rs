//! Terminal output: notifications on stderr, command results on stdout.

use std::collections::HashMap;

use serde::Serialize;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::warn;

use ledgerdash_core::{
    backend::{DocumentSummary, StatsResponse, StatusResponse},
    library::{format_duration, format_file_size, format_quality_score},
    poller::PollerStatus,
    upload::UploadStats,
    Notification, NotificationLevel, SystemHealth, UploadRecord,
};

/// Output mode selected by `--json`.
#[derive(Debug, Clone, Copy)]
pub struct Output {
    pub json: bool,
}

impl Output {
    /// Print a value as pretty JSON, or fall back to the given text rendering.
    pub fn emit<T: Serialize>(&self, value: &T, text: impl FnOnce() -> String) -> anyhow::Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            println!("{}", text());
        }
        Ok(())
    }
}

/// Handle to the notification printer task.
pub struct NotificationPrinter {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl NotificationPrinter {
    pub fn spawn(mut rx: broadcast::Receiver<Notification>, json: bool) -> Self {
        let (stop, mut stop_rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    received = rx.recv() => match received {
                        Ok(n) => print_notification(&n, json),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Notification printer fell behind");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    _ = &mut stop_rx => {
                        while let Ok(n) = rx.try_recv() {
                            print_notification(&n, json);
                        }
                        break;
                    }
                }
            }
        });
        Self { stop, handle }
    }

    /// Print whatever is still buffered, then stop.
    pub async fn finish(self) {
        let _ = self.stop.send(());
        let _ = self.handle.await;
    }
}

fn print_notification(n: &Notification, json: bool) {
    if json {
        if let Ok(line) = serde_json::to_string(n) {
            eprintln!("{}", line);
        }
        return;
    }
    let tag = match n.level {
        NotificationLevel::Success => "ok",
        NotificationLevel::Error => "error",
        NotificationLevel::Info => "info",
    };
    eprintln!("[{}] {}", tag, n.message);
}

pub fn records_table(records: &[UploadRecord]) -> String {
    if records.is_empty() {
        return "No files in queue".to_string();
    }
    let mut lines = vec![format!(
        "{:<32} {:>9} {:<11} {:>4}  {}",
        "FILE", "SIZE", "STATUS", "%", "DOCUMENT / ERROR"
    )];
    for r in records {
        let detail = r
            .error
            .as_deref()
            .or(r.document_id.as_deref())
            .unwrap_or("-");
        lines.push(format!(
            "{:<32} {:>9} {:<11} {:>4}  {}",
            truncate(&r.file.name, 32),
            format_file_size(r.file.size()),
            r.status,
            r.progress,
            detail
        ));
    }
    lines.join("\n")
}

pub fn status_text(status: &StatusResponse) -> String {
    let mut lines = vec![
        format!("Document:  {}", status.document_id),
        format!("File:      {}", status.filename),
        format!("Status:    {} ({}%)", status.status, status.progress),
    ];
    if !status.message.is_empty() {
        lines.push(format!("Message:   {}", status.message));
    }
    if let Some(t) = status.processing_time {
        lines.push(format!("Took:      {}", format_duration(t)));
    }
    if let Some(errors) = status.joined_errors() {
        lines.push(format!("Errors:    {}", errors));
    }
    lines.join("\n")
}

pub fn documents_table(docs: &[DocumentSummary], total: u64) -> String {
    if docs.is_empty() {
        return "No documents found".to_string();
    }
    let mut lines = vec![format!(
        "{:<36} {:<32} {:<10} {:>7} {:>5}  {}",
        "DOCUMENT", "FILE", "STATUS", "QUALITY", "STMTS", "CURRENCIES"
    )];
    for d in docs {
        lines.push(format!(
            "{:<36} {:<32} {:<10} {:>7} {:>5}  {}",
            truncate(&d.document_id, 36),
            truncate(&d.filename, 32),
            d.status,
            format_quality_score(d.extraction_quality),
            d.statement_count,
            d.currencies.join(",")
        ));
    }
    lines.push(format!("Showing {} of {} documents", docs.len(), total));
    lines.join("\n")
}

/// One-line summary printed under the records table.
pub fn upload_summary(stats: &UploadStats, poller: &PollerStatus) -> String {
    let mut line = format!(
        "{} files: {} uploaded, {} pending, {} failed, {} ready to process",
        stats.total, stats.uploaded, stats.pending, stats.failed, stats.processable
    );
    if poller.running {
        line.push_str(&format!(
            " ({} still processing)",
            poller.active_documents
        ));
    }
    line
}

pub fn health_text(health: &SystemHealth) -> String {
    let mut lines = vec![
        format!("Backend:   {:?}", health.status),
        format!("Models:    {}", yes_no(health.models_loaded)),
        format!("Pipeline:  {}", yes_no(health.pipeline_ready)),
    ];
    if let Some(db) = &health.database_status {
        lines.push(format!("Database:  {}", db));
    }
    if let Some(err) = &health.error {
        lines.push(format!("Error:     {}", err));
    }
    lines.join("\n")
}

pub fn stats_text(stats: &StatsResponse) -> String {
    let mut lines = vec![
        format!("Documents:        {}", stats.total_documents),
        format!("Average quality:  {}", format_quality_score(stats.avg_quality)),
        format!(
            "Average time:     {}",
            stats
                .avg_processing_time
                .map(format_duration)
                .unwrap_or_else(|| "N/A".to_string())
        ),
        format!("High quality:     {}", stats.high_quality_documents),
        format!("Low quality:      {}", stats.low_quality_documents),
    ];
    push_distribution(&mut lines, "Currencies:", &stats.currency_distribution);
    push_distribution(&mut lines, "Rounding:", &stats.rounding_distribution);
    lines.join("\n")
}

fn push_distribution(lines: &mut Vec<String>, title: &str, counts: &HashMap<String, u64>) {
    if counts.is_empty() {
        return;
    }
    lines.push(title.to_string());
    let mut entries: Vec<_> = counts.iter().collect();
    entries.sort();
    for (key, count) in entries {
        lines.push(format!("  {:<10} {}", key, count));
    }
}

fn yes_no(v: bool) -> &'static str {
    if v {
        "yes"
    } else {
        "no"
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
        out.push('~');
        out
    }
}
