//! Command handlers. Each returns whether the command fully succeeded.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::json;
use tokio::sync::watch;
use tracing::{info, warn};

use ledgerdash_core::{
    backend::DocumentsResponse,
    library::{
        export_file_name, export_result, sort_documents, DocumentFilters, SortDirection, SortField,
    },
    upload::load_files,
    BatchError, HealthStatus, SystemHealth, UploadStatus,
};

use crate::output::{self, Output};
use crate::state::AppState;
use crate::{DocumentsArgs, ResultsArgs, UploadArgs};

pub async fn upload(state: &AppState, out: &Output, args: UploadArgs) -> Result<bool> {
    let max_queue = state.config().upload.max_queue_size;
    if args.files.len() > max_queue {
        warn!(
            files = args.files.len(),
            max_queue_size = max_queue,
            "More files than the configured queue size"
        );
    }

    let files = load_files(&args.files)
        .await
        .context("Failed to read input files")?;
    let outcome = state.orchestrator.handle_file_add(files).await;
    info!(
        accepted = outcome.accepted.len(),
        rejected = outcome.rejected.len(),
        uploaded = outcome.uploaded,
        failed = outcome.failed,
        "Upload finished"
    );

    for attempt in 1..=args.retries {
        let failed = state.queue.failed_files();
        if failed.is_empty() {
            break;
        }
        info!(attempt, count = failed.len(), "Retrying failed uploads");
        for record in failed {
            if let Err(e) = state.orchestrator.retry_upload(&record.id).await {
                warn!(file = %record.file.name, error = %e, "Retry failed");
            }
        }
    }

    if args.process || args.wait {
        match state.batch.start_processing().await {
            Ok(batch) => info!(accepted = batch.accepted.len(), "Processing started"),
            Err(BatchError::NothingToProcess) => {}
            Err(e) => warn!(error = %e, "Processing did not start"),
        }
    }

    if args.wait && state.poller.is_polling() {
        wait_for_processing(state).await;
    }

    let records = state.queue.files();
    let upload_stats = state.orchestrator.upload_stats();
    let poller = state.poller.status();
    out.emit(
        &json!({
            "files": records,
            "rejected": outcome.rejected.iter().map(|r| json!({
                "name": r.name,
                "error": r.error.to_string(),
            })).collect::<Vec<_>>(),
            "uploads": upload_stats,
            "stats": state.queue.processing_stats(),
            "poller": poller,
        }),
        || {
            format!(
                "{}\n{}",
                output::records_table(&records),
                output::upload_summary(&upload_stats, &poller)
            )
        },
    )?;

    let any_error = records.iter().any(|r| r.status == UploadStatus::Error);
    Ok(outcome.rejected.is_empty() && !any_error)
}

/// Block until every tracked document settles, warning on backend outages.
async fn wait_for_processing(state: &AppState) {
    let monitor = state.health_monitor();
    let interval = Duration::from_millis(state.config().health.interval_ms);
    let (health_rx, health_task) = monitor.spawn(interval);
    let watcher = tokio::spawn(watch_health(health_rx));

    tokio::select! {
        _ = state.poller.wait_idle() => {}
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, no longer waiting for processing");
            state.poller.cancel();
        }
    }

    monitor.stop();
    let _ = health_task.await;
    watcher.abort();
}

async fn watch_health(mut rx: watch::Receiver<Option<SystemHealth>>) {
    let mut last = None;
    while rx.changed().await.is_ok() {
        let status = rx.borrow().as_ref().map(|h| h.status);
        if status != last && status == Some(HealthStatus::Unavailable) {
            warn!("Backend unavailable while waiting for processing");
        }
        last = status;
    }
}

pub async fn status(state: &AppState, out: &Output, document_id: &str) -> Result<bool> {
    let status = state
        .backend
        .get_status(document_id)
        .await
        .with_context(|| format!("Failed to get status of {}", document_id))?;
    out.emit(&status, || output::status_text(&status))?;
    Ok(true)
}

pub async fn results(state: &AppState, args: ResultsArgs) -> Result<bool> {
    let result = state
        .backend
        .get_results(&args.document_id, args.include_raw)
        .await
        .with_context(|| format!("Failed to get results of {}", args.document_id))?;
    let rendered = export_result(&result, args.format)?;

    match args.output {
        Some(path) => {
            let path = resolve_output(path, &export_file_name(&result, args.format));
            tokio::fs::write(&path, rendered)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!(path = %path.display(), "Results exported");
        }
        None => println!("{}", rendered),
    }
    Ok(true)
}

/// A directory output path receives the default export file name.
fn resolve_output(path: PathBuf, default_name: &str) -> PathBuf {
    if path.is_dir() {
        path.join(default_name)
    } else {
        path
    }
}

pub async fn documents(state: &AppState, out: &Output, args: DocumentsArgs) -> Result<bool> {
    let filters = DocumentFilters {
        currency: args.currency,
        rounding: args.rounding,
        min_quality: args.min_quality,
        limit: args.limit,
        skip: args.skip,
        search: args.search,
    };
    let response = list_documents(state, &filters, args.sort, args.order).await?;

    out.emit(&response, || {
        output::documents_table(&response.documents, response.total)
    })?;
    Ok(true)
}

/// Fetch one page, apply the local search and sort it.
async fn list_documents(
    state: &AppState,
    filters: &DocumentFilters,
    sort: SortField,
    order: SortDirection,
) -> Result<DocumentsResponse> {
    filters.validate()?;

    let mut response = state
        .backend
        .list_documents(filters)
        .await
        .context("Failed to list documents")?;
    response.documents.retain(|d| filters.matches(d));
    response.returned = response.documents.len() as u64;
    sort_documents(&mut response.documents, sort, order);
    Ok(response)
}

pub async fn delete(state: &AppState, out: &Output, document_id: &str) -> Result<bool> {
    state
        .backend
        .delete_document(document_id)
        .await
        .with_context(|| format!("Failed to delete {}", document_id))?;
    out.emit(&json!({ "deleted": document_id }), || {
        format!("Deleted {}", document_id)
    })?;
    Ok(true)
}

pub async fn health(state: &AppState, out: &Output) -> Result<bool> {
    let health = state.health_monitor().check().await;
    out.emit(&health, || output::health_text(&health))?;
    Ok(health.is_healthy())
}

pub async fn stats(state: &AppState, out: &Output) -> Result<bool> {
    let stats = state
        .backend
        .stats()
        .await
        .context("Failed to fetch statistics")?;
    out.emit(&stats, || output::stats_text(&stats))?;
    Ok(true)
}

pub async fn queue(state: &AppState, out: &Output) -> Result<bool> {
    let queue = state
        .backend
        .upload_queue()
        .await
        .context("Failed to fetch upload queue")?;
    out.emit(&queue, || {
        format!("{} documents waiting for processing", queue.count)
    })?;
    Ok(true)
}

pub async fn clear_queue(state: &AppState, out: &Output) -> Result<bool> {
    let response = state.batch.clear_upload_queue().await?;
    out.emit(&response, || response.message.clone())?;
    Ok(true)
}

pub async fn clear_results(state: &AppState, out: &Output) -> Result<bool> {
    let response = state.batch.clear_extraction_results().await?;
    out.emit(&response, || response.message.clone())?;
    Ok(true)
}

pub fn config(state: &AppState, out: &Output) -> Result<bool> {
    let sanitized = state.sanitized_config();
    let text = toml::to_string_pretty(&sanitized)?;
    out.emit(&sanitized, || text.trim_end().to_string())?;
    Ok(true)
}
