//! [`ProcessorSupervisor`] — fans out one [`BatchProcessor`] per table,
//! sequentially or on a bounded worker pool, and aggregates the per-table
//! [`TableResult`]s. A single table's failure never aborts the run; only a
//! configuration error (caught before any table work starts) does.

use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{error, info};

use crate::batch_processor::BatchProcessor;
use crate::config::Config;
use crate::delta_table::DeltaTableHandle;
use crate::manifest::Manifest;
use crate::object_store::{build_source_store, build_target_store};
use crate::progress::ProgressReporter;
use crate::result::TableResult;

/// Per-run knobs the caller (CLI or embedder) controls, distinct from the
/// environment-resolved [`Config`].
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Process only these tables; empty means "every table in the
    /// manifest".
    pub tables: Vec<String>,
    /// Subtract these from the resolved table set.
    pub exclude: Vec<String>,
    /// Run tables on a bounded worker pool instead of one at a time.
    pub parallel: bool,
    /// Delete each table's existing Delta log before processing, forcing a
    /// full re-ingest from watermark zero.
    pub reset: bool,
}

pub struct ProcessorSupervisor {
    config: Arc<Config>,
    manifest: Arc<Manifest>,
    progress: Arc<dyn ProgressReporter>,
}

impl ProcessorSupervisor {
    pub fn new(config: Config, manifest: Manifest, progress: Arc<dyn ProgressReporter>) -> Self {
        ProcessorSupervisor {
            config: Arc::new(config),
            manifest: Arc::new(manifest),
            progress,
        }
    }

    /// Resolve the table set for `options` against the manifest.
    pub fn resolve_tables(&self, options: &RunOptions) -> Vec<String> {
        self.manifest.resolve_tables(&options.tables, &options.exclude)
    }

    /// Run every resolved table to completion, returning one [`TableResult`]
    /// per table. A per-table panic or error never aborts the run — it is
    /// folded into that table's result.
    pub async fn run(&self, options: RunOptions) -> Vec<TableResult> {
        let tables = self.resolve_tables(&options);
        info!(count = tables.len(), parallel = options.parallel, "starting run");

        if options.parallel {
            self.run_parallel(tables, options.reset).await
        } else {
            self.run_sequential(tables, options.reset).await
        }
    }

    async fn run_sequential(&self, tables: Vec<String>, reset: bool) -> Vec<TableResult> {
        let mut results = Vec::with_capacity(tables.len());
        for table in tables {
            results.push(self.run_one(table, reset).await);
        }
        results
    }

    async fn run_parallel(&self, tables: Vec<String>, reset: bool) -> Vec<TableResult> {
        let bound = self.config.max_parallel_tables.max(1);
        let mut pending = tables.into_iter();
        let mut join_set: JoinSet<TableResult> = JoinSet::new();
        let mut results = Vec::new();

        for table in pending.by_ref().take(bound) {
            self.spawn_one(&mut join_set, table, reset);
        }

        while let Some(outcome) = join_set.join_next().await {
            match outcome {
                Ok(result) => results.push(result),
                Err(join_err) => {
                    error!(error = %join_err, "table worker task panicked");
                }
            }
            if let Some(table) = pending.next() {
                self.spawn_one(&mut join_set, table, reset);
            }
        }

        results
    }

    fn spawn_one(&self, join_set: &mut JoinSet<TableResult>, table: String, reset: bool) {
        let config = Arc::clone(&self.config);
        let manifest = Arc::clone(&self.manifest);
        let progress = Arc::clone(&self.progress);
        join_set.spawn(async move {
            Self::process_table(config, manifest, progress, table, reset).await
        });
    }

    async fn run_one(&self, table: String, reset: bool) -> TableResult {
        Self::process_table(
            Arc::clone(&self.config),
            Arc::clone(&self.manifest),
            Arc::clone(&self.progress),
            table,
            reset,
        )
        .await
    }

    /// One table's whole worker lifecycle: build a dedicated source
    /// [`crate::object_store::ObjectStoreHandle`] and target store, run the
    /// [`BatchProcessor`], report progress. No state is shared with any
    /// other table's worker.
    async fn process_table(
        config: Arc<Config>,
        manifest: Arc<Manifest>,
        progress: Arc<dyn ProgressReporter>,
        table: String,
        reset: bool,
    ) -> TableResult {
        progress.start_table(&table);

        let source_store = match build_source_store(&config.source) {
            Ok(store) => store,
            Err(e) => {
                let mut result = TableResult::new(table.clone(), 0, -1, -1, 0, 0);
                result.record_error(format!("failed to construct source object store: {e}"));
                result.finish(0, -1, -1);
                progress.finish_table(&table, None, true);
                return result;
            }
        };
        let target_store = match build_target_store(&config.target) {
            Ok(store) => store,
            Err(e) => {
                let mut result = TableResult::new(table.clone(), 0, -1, -1, 0, 0);
                result.record_error(format!("failed to construct target object store: {e}"));
                result.finish(0, -1, -1);
                progress.finish_table(&table, None, true);
                return result;
            }
        };

        let handle = DeltaTableHandle::for_table(
            &table,
            &config.target,
            config.checkpoint_interval,
            target_store,
        );
        let processor = BatchProcessor::new(table.clone(), manifest, source_store, reset);
        let result = processor.run(handle).await;

        progress.finish_table(&table, result.process_finish_watermark, result.has_errors());
        result
    }
}
