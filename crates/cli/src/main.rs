mod commands;
mod metrics;
mod output;
mod state;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ledgerdash_core::{
    library::{ExportFormat, SortDirection, SortField},
    load_config, load_config_from_env, validate_config, Config,
};

use output::{NotificationPrinter, Output};
use state::AppState;

/// Config file used when no path is given.
const DEFAULT_CONFIG_PATH: &str = "ledgerdash.toml";

/// Upload PDF financial statements for extraction and browse the results.
#[derive(Debug, Parser)]
#[command(name = "ledgerdash", version, about)]
struct Cli {
    /// Configuration file.
    #[arg(long, global = true, env = "LEDGERDASH_CONFIG")]
    config: Option<PathBuf>,

    /// Emit JSON output and JSON logs.
    #[arg(long, global = true)]
    json: bool,

    /// Print Prometheus metrics after the command.
    #[arg(long, global = true)]
    print_metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate and upload PDF files, optionally processing them.
    Upload(UploadArgs),
    /// Show the processing status of a document.
    Status { document_id: String },
    /// Export the extraction results of a document.
    Results(ResultsArgs),
    /// List processed documents.
    Documents(DocumentsArgs),
    /// Permanently delete a document.
    Delete { document_id: String },
    /// Check backend health.
    Health,
    /// Show aggregate extraction statistics.
    Stats,
    /// Show documents waiting on the backend.
    Queue,
    /// Clear the backend upload queue.
    ClearQueue,
    /// Delete all stored extraction results.
    ClearResults,
    /// Print the effective configuration.
    Config,
}

#[derive(Debug, Args)]
pub struct UploadArgs {
    /// PDF files to upload.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Retry failed uploads this many times.
    #[arg(long, default_value_t = 0)]
    pub retries: u32,

    /// Submit uploaded files for processing.
    #[arg(long)]
    pub process: bool,

    /// Process and wait until every document finishes.
    #[arg(long)]
    pub wait: bool,
}

#[derive(Debug, Args)]
pub struct ResultsArgs {
    pub document_id: String,

    /// Export format: json or csv.
    #[arg(long, default_value = "json")]
    pub format: ExportFormat,

    /// Write to this file, or into this directory under the default name.
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    /// Include the raw extracted text.
    #[arg(long)]
    pub include_raw: bool,
}

#[derive(Debug, Args)]
pub struct DocumentsArgs {
    #[arg(long)]
    pub currency: Option<String>,

    #[arg(long)]
    pub rounding: Option<String>,

    /// Minimum extraction quality, 0 to 1.
    #[arg(long)]
    pub min_quality: Option<f64>,

    #[arg(long, default_value_t = 20)]
    pub limit: u64,

    #[arg(long, default_value_t = 0)]
    pub skip: u64,

    /// Only documents whose file name contains this text.
    #[arg(long)]
    pub search: Option<String>,

    /// Sort field: upload_timestamp, filename, status, extraction_quality, statement_count.
    #[arg(long, default_value = "upload_timestamp")]
    pub sort: SortField,

    /// Sort direction: asc or desc.
    #[arg(long, default_value = "desc")]
    pub order: SortDirection,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.json);

    match run(cli).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!("Fatal error: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn run(cli: Cli) -> Result<bool> {
    let config = resolve_config(cli.config.as_deref())?;
    validate_config(&config).context("Configuration validation failed")?;
    debug!(backend = %ledgerdash_core::SanitizedConfig::from(&config).backend.url, "Configuration loaded");

    let state = AppState::new(config).context("Failed to create backend client")?;
    let out = Output { json: cli.json };
    let printer = NotificationPrinter::spawn(state.notifier.subscribe(), cli.json);

    let result = match cli.command {
        Command::Upload(args) => commands::upload(&state, &out, args).await,
        Command::Status { document_id } => commands::status(&state, &out, &document_id).await,
        Command::Results(args) => commands::results(&state, args).await,
        Command::Documents(args) => commands::documents(&state, &out, args).await,
        Command::Delete { document_id } => commands::delete(&state, &out, &document_id).await,
        Command::Health => commands::health(&state, &out).await,
        Command::Stats => commands::stats(&state, &out).await,
        Command::Queue => commands::queue(&state, &out).await,
        Command::ClearQueue => commands::clear_queue(&state, &out).await,
        Command::ClearResults => commands::clear_results(&state, &out).await,
        Command::Config => commands::config(&state, &out),
    };

    printer.finish().await;

    if cli.print_metrics {
        metrics::collect_queue_metrics(&state.queue);
        print!("{}", metrics::encode_metrics().context("Failed to encode metrics")?);
    }

    result
}

/// Load the named config file, or the default file if present, or env only.
fn resolve_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            load_config(path).with_context(|| format!("Failed to load config from {:?}", path))
        }
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            info!("Loading configuration from {}", DEFAULT_CONFIG_PATH);
            load_config(Path::new(DEFAULT_CONFIG_PATH))
                .with_context(|| format!("Failed to load config from {}", DEFAULT_CONFIG_PATH))
        }
        None => load_config_from_env().context("Failed to load config from environment"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_upload() {
        let cli = Cli::try_parse_from([
            "ledgerdash", "--json", "upload", "a.pdf", "b.pdf", "--retries", "2", "--wait",
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Command::Upload(args) => {
                assert_eq!(args.files.len(), 2);
                assert_eq!(args.retries, 2);
                assert!(args.wait);
                assert!(!args.process);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_documents_defaults() {
        let cli = Cli::try_parse_from([
            "ledgerdash", "documents", "--sort", "quality", "--search", "annual",
        ])
        .unwrap();
        match cli.command {
            Command::Documents(args) => {
                assert_eq!(args.search.as_deref(), Some("annual"));
                assert_eq!(args.limit, 20);
                assert_eq!(args.sort, SortField::ExtractionQuality);
                assert_eq!(args.order, SortDirection::Desc);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_results_format() {
        let cli =
            Cli::try_parse_from(["ledgerdash", "results", "doc-1", "--format", "csv"]).unwrap();
        match cli.command {
            Command::Results(args) => assert_eq!(args.format, ExportFormat::Csv),
            other => panic!("unexpected command: {:?}", other),
        }
        assert!(Cli::try_parse_from(["ledgerdash", "results", "doc-1", "--format", "xml"]).is_err());
    }

    #[test]
    fn test_upload_requires_files() {
        assert!(Cli::try_parse_from(["ledgerdash", "upload"]).is_err());
    }

    #[test]
    fn test_explicit_missing_config_is_error() {
        let err = resolve_config(Some(Path::new("/nonexistent/ledgerdash.toml"))).unwrap_err();
        assert!(format!("{:#}", err).contains("not found"));
    }

    #[test]
    fn test_explicit_config_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "[backend]\nurl = \"http://10.0.0.9:8000\"\n").unwrap();

        let config = resolve_config(Some(&path)).unwrap();
        assert_eq!(config.backend.url, "http://10.0.0.9:8000");
    }
}
