//! [`BatchProcessor`] — the per-table state machine: recover watermark,
//! walk schema epochs in value order, walk timestamp partitions within an
//! epoch in numeric order, commit each as a Delta transaction.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{info, warn};

use crate::delta_table::{CommitMode, DeltaTableHandle, ParquetDescriptor};
use crate::error::Result;
use crate::manifest::{Manifest, ManifestEntry};
use crate::object_store::{EntryType, ObjectStoreHandle};
use crate::result::TableResult;

/// One schema epoch from the manifest, resolved to `(key, timestamp)` and
/// ready to be ordered by `timestamp`.
struct EpochPlan {
    #[allow(dead_code)]
    key: String,
    timestamp: i64,
    uri: String,
}

pub struct BatchProcessor {
    table: String,
    manifest: Arc<Manifest>,
    source_store: Arc<dyn ObjectStoreHandle>,
    reset: bool,
}

impl BatchProcessor {
    pub fn new(
        table: impl Into<String>,
        manifest: Arc<Manifest>,
        source_store: Arc<dyn ObjectStoreHandle>,
        reset: bool,
    ) -> Self {
        BatchProcessor {
            table: table.into(),
            manifest,
            source_store,
            reset,
        }
    }

    /// Run this table's ingestion to completion against an already-bound
    /// (or not-yet-existing) Delta table, never propagating an error: all
    /// failures are folded into the returned [`TableResult`].
    pub async fn run(self, mut handle: DeltaTableHandle) -> TableResult {
        let start_time = now_ms();
        let mut result = TableResult::new(self.table.clone(), start_time, 0, -1, 0, 0);

        let entry = match self.manifest.entry(&self.table) {
            Some(e) => e,
            None => {
                result.record_error(format!("table {} not present in manifest", self.table));
                result.finish(now_ms(), -1, -1);
                return result;
            }
        };
        result.manifest_records = entry.total_processed_records_count;
        result.manifest_watermark = entry.last_successful_write_timestamp;

        if let Err(e) = handle.probe().await {
            result.record_error(format!("failed to bind delta table: {e}"));
            result.finish(now_ms(), -1, -1);
            return result;
        }

        if self.reset {
            handle.delete_log().await;
        }

        let (mut low_watermark, mut low_schema_timestamp) = handle.read_last_commit_meta().await;
        if self.reset {
            low_watermark = 0;
            low_schema_timestamp = 0;
        }
        result.process_start_watermark = low_watermark;
        result.process_start_version = handle.stats().map(|s| s.version).unwrap_or(-1);

        if low_watermark == -1 {
            result.record_error(crate::error::IngestError::StateCorruption.to_string());
            result.finish(now_ms(), -1, handle.stats().map(|s| s.version).unwrap_or(-1));
            return result;
        }

        if entry.last_successful_write_timestamp <= low_watermark {
            result.record_warning("nothing new".to_string());
            result.finish(
                now_ms(),
                low_watermark,
                handle.stats().map(|s| s.version).unwrap_or(-1),
            );
            return result;
        }

        if entry.data_files_path.is_empty() || entry.schema_history.is_empty() {
            result.record_error("manifest entry missing dataFilesPath or schemaHistory".to_string());
            result.finish(now_ms(), low_watermark, handle.stats().map(|s| s.version).unwrap_or(-1));
            return result;
        }

        let epochs = plan_epochs(entry, low_schema_timestamp);

        let mut finish_watermark = low_watermark;
        for epoch in epochs {
            match self
                .process_epoch(&mut handle, &epoch, low_watermark, &mut result)
                .await
            {
                Ok(Some(new_watermark)) => finish_watermark = new_watermark,
                Ok(None) => {}
                Err(e) => {
                    result.record_error(format!("epoch {} aborted: {e}", epoch.timestamp));
                    break;
                }
            }
        }

        let finish_version = handle.stats().map(|s| s.version).unwrap_or(-1);
        result.finish(now_ms(), finish_watermark, finish_version);
        result
    }

    async fn process_epoch(
        &self,
        handle: &mut DeltaTableHandle,
        epoch: &EpochPlan,
        low_watermark: i64,
        result: &mut TableResult,
    ) -> Result<Option<i64>> {
        let listing = self.source_store.list(&epoch.uri).await?;
        let mut full: Vec<_> = listing
            .into_iter()
            .filter(|e| e.entry_type == EntryType::Dir)
            .collect();
        full.sort_by(|a, b| a.path.cmp(&b.path));

        for entry in &full {
            if entry.base_name.parse::<i64>().is_err() {
                warn!(table = %self.table, partition = %entry.base_name, "non-numeric partition directory, skipping");
                result.record_warning(format!("skipped non-numeric partition {}", entry.base_name));
            }
        }

        let part: Vec<_> = full
            .iter()
            .filter(|e| e.base_name.parse::<i64>().map(|v| v > low_watermark).unwrap_or(false))
            .cloned()
            .collect();

        if part.is_empty() {
            return Ok(None);
        }

        let is_fresh = part.len() == full.len();

        let mut numeric: Vec<(i64, String)> = part
            .into_iter()
            .map(|entry| {
                let value = entry
                    .base_name
                    .parse::<i64>()
                    .expect("part is pre-filtered to numeric base names");
                (value, entry.path)
            })
            .collect();
        numeric.sort_by_key(|(v, _)| *v);

        let mut first_partition = true;
        let mut finish_watermark = None;
        let mut epoch_schema: Option<deltalake::arrow::datatypes::SchemaRef> = None;

        for (partition_value, partition_uri) in numeric {
            let files = self.list_parquet_files(&partition_uri).await?;
            if files.is_empty() {
                warn!(table = %self.table, partition = partition_value, "partition has no parquet files, skipping");
                continue;
            }

            if first_partition {
                result.record_schema_timestamp(epoch.timestamp);
                let schema = self.resolve_schema(&files).await.map_err(|e| {
                    result.record_error(format!("schema resolution failed for epoch {}: {e}", epoch.timestamp));
                    e
                })?;
                let mode = if is_fresh { CommitMode::Overwrite } else { CommitMode::Append };
                handle
                    .commit(&files, &schema, mode, partition_value, epoch.timestamp)
                    .await?;
                epoch_schema = Some(schema);
                first_partition = false;
            } else {
                // Schemas are identical within a single epoch (§4.3.2); the
                // schema resolved for the epoch's first partition is reused
                // rather than re-reading footers on every later partition.
                let schema = epoch_schema.clone().expect("resolved on first partition");
                handle
                    .commit(&files, &schema, CommitMode::Append, partition_value, epoch.timestamp)
                    .await?;
            }

            result.record_watermark(partition_value);
            finish_watermark = Some(partition_value);
        }

        Ok(finish_watermark)
    }

    async fn list_parquet_files(&self, partition_uri: &str) -> Result<Vec<ParquetDescriptor>> {
        let entries = self.source_store.list(partition_uri).await?;
        Ok(entries
            .into_iter()
            .filter(|e| e.entry_type == EntryType::File && e.path.ends_with(".parquet"))
            .map(|e| ParquetDescriptor {
                path: to_s3_scheme(&e.path),
                size: e.size,
                last_modified_ns: e.mtime_ns,
            })
            .collect())
    }

    /// Resolve the epoch's schema by trying candidate files smallest-first.
    async fn resolve_schema(
        &self,
        files: &[ParquetDescriptor],
    ) -> Result<deltalake::arrow::datatypes::SchemaRef> {
        let mut ordered: Vec<&ParquetDescriptor> = files.iter().collect();
        ordered.sort_by_key(|f| f.size);

        let mut last_err = None;
        for file in ordered {
            match self.source_store.read_parquet_schema(&file.path).await {
                Ok(schema) => return Ok(schema),
                Err(e) => {
                    warn!(table = %self.table, file = %file.path, error = %e, "failed to read parquet footer, trying next candidate");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| {
            crate::error::IngestError::Storage("no candidate files for schema resolution".to_string())
        }))
    }
}

fn plan_epochs(entry: &ManifestEntry, low_schema_timestamp: i64) -> Vec<EpochPlan> {
    let mut epochs: Vec<EpochPlan> = entry
        .schema_history
        .iter()
        .filter(|(_, ts)| **ts >= low_schema_timestamp)
        .map(|(key, ts)| EpochPlan {
            key: key.clone(),
            timestamp: *ts,
            uri: format!("{}/{}", entry.data_files_path.trim_end_matches('/'), key),
        })
        .collect();
    epochs.sort_by_key(|e| e.timestamp);
    epochs
}

fn to_s3_scheme(path: &str) -> String {
    if path.starts_with("s3://") {
        path.to_string()
    } else {
        format!("s3://{}", path.trim_start_matches('/'))
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
