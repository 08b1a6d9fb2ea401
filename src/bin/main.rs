//! `cda-ingest` — thin CLI entrypoint. All environment parsing happens in
//! [`cda_ingest::config`]; all processing logic lives in the library. This
//! binary resolves configuration, loads the manifest, runs the supervisor,
//! and reports a summary.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cda_ingest::config::Config;
use cda_ingest::manifest::Manifest;
use cda_ingest::object_store::build_source_store;
use cda_ingest::progress::{IndicatifProgress, NoopProgress, ProgressReporter};
use cda_ingest::supervisor::{ProcessorSupervisor, RunOptions};

/// Incremental ingestion of a Cloud Data Access parquet export into Delta Lake.
#[derive(Parser, Debug)]
#[command(name = "cda-ingest", version, about)]
struct Cli {
    /// Process only these tables (comma-separated). Default: every table
    /// in the manifest.
    #[arg(long, value_delimiter = ',')]
    tables: Vec<String>,

    /// Exclude these tables from the resolved set (comma-separated).
    #[arg(long, value_delimiter = ',')]
    exclude: Vec<String>,

    /// Process tables on a bounded worker pool instead of one at a time.
    #[arg(long)]
    parallel: bool,

    /// Delete each table's existing Delta log before processing, forcing
    /// a full re-ingest from watermark zero.
    #[arg(long)]
    reset: bool,

    /// Override `CDA_MAX_PARALLEL_TABLES` for this run.
    #[arg(long)]
    workers: Option<usize>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let mut config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "configuration invalid");
            return ExitCode::FAILURE;
        }
    };
    if let Some(workers) = cli.workers {
        config.max_parallel_tables = workers;
    }

    let source_store = match build_source_store(&config.source) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to construct source object store");
            return ExitCode::FAILURE;
        }
    };

    let manifest = match Manifest::load(source_store.as_ref(), &config.manifest_location).await {
        Ok(m) => m,
        Err(e) => {
            tracing::error!(error = %e, "failed to load manifest");
            return ExitCode::FAILURE;
        }
    };

    let progress: Arc<dyn ProgressReporter> = if config.show_table_progress {
        Arc::new(IndicatifProgress::new())
    } else {
        Arc::new(NoopProgress)
    };

    let supervisor = ProcessorSupervisor::new(config, manifest, progress);
    let results = supervisor
        .run(RunOptions {
            tables: cli.tables,
            exclude: cli.exclude,
            parallel: cli.parallel,
            reset: cli.reset,
        })
        .await;

    let mut had_errors = false;
    for result in &results {
        if result.has_errors() {
            had_errors = true;
            tracing::error!(table = %result.table, errors = ?result.errors, "table finished with errors");
        } else {
            tracing::info!(
                table = %result.table,
                watermark = ?result.process_finish_watermark,
                committed = result.watermarks.len(),
                "table finished"
            );
        }
    }

    match serde_json::to_string(&results) {
        Ok(summary) => println!("{summary}"),
        Err(e) => tracing::warn!(error = %e, "failed to serialize run summary"),
    }

    if had_errors {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
