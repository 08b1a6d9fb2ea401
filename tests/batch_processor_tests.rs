//! End-to-end tests: [`cda_ingest::batch_processor::BatchProcessor`] driven
//! by a fake source tree, committing into a real local-filesystem Delta
//! table. These cover the concrete scenarios from the processor's testable
//! properties: fresh single-epoch ingest, mid-epoch resumption, two-epoch
//! full runs, non-numeric partition skipping, corrupt-file recovery during
//! schema resolution, and the `-1` corruption sentinel.

mod common;

use std::collections::HashMap;
use std::sync::Arc;

use cda_ingest::batch_processor::BatchProcessor;
use cda_ingest::delta_table::{CommitMode, ParquetDescriptor};
use cda_ingest::manifest::{Manifest, ManifestEntry};
use deltalake::arrow::datatypes::{DataType, Field, Schema};
use tempfile::TempDir;

use common::{local_handle, FakeSourceStore};

fn manifest_entry(last_write: i64, epochs: &[(&str, i64)]) -> ManifestEntry {
    ManifestEntry {
        last_successful_write_timestamp: last_write,
        total_processed_records_count: 100,
        data_files_path: "src".to_string(),
        schema_history: epochs.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
    }
}

fn manifest_of(table: &str, entry: ManifestEntry) -> Arc<Manifest> {
    let mut entries = HashMap::new();
    entries.insert(table.to_string(), entry);
    Arc::new(Manifest::from_entries(entries))
}

#[tokio::test]
async fn fresh_table_single_epoch_commits_overwrite_then_appends() {
    let source = Arc::new(FakeSourceStore::new());
    source.add_dir_entry("src", "1", true);
    for partition in ["600", "700", "800"] {
        source.add_dir_entry("src/1", partition, true);
        source.add_parquet(&format!("src/1/{partition}"), "part-0.parquet", 10, true);
    }

    let manifest = manifest_of("orders", manifest_entry(1000, &[("1", 500)]));
    let dir = TempDir::new().unwrap();
    let handle = local_handle(dir.path());

    let processor = BatchProcessor::new("orders", manifest, source, false);
    let result = processor.run(handle).await;

    assert!(!result.has_errors(), "unexpected errors: {:?}", result.errors);
    assert_eq!(result.watermarks, vec![600, 700, 800]);
    assert_eq!(result.schema_timestamps, vec![500]);
    assert_eq!(result.process_finish_watermark, Some(800));
}

#[tokio::test]
async fn resumption_mid_epoch_only_commits_new_partitions() {
    let dir = TempDir::new().unwrap();

    // First run sees only partitions up to 700.
    {
        let source = Arc::new(FakeSourceStore::new());
        source.add_dir_entry("src", "1", true);
        for partition in ["600", "700"] {
            source.add_dir_entry("src/1", partition, true);
            source.add_parquet(&format!("src/1/{partition}"), "part-0.parquet", 10, true);
        }
        let manifest = manifest_of("orders", manifest_entry(700, &[("1", 500)]));
        let handle = local_handle(dir.path());
        let result = BatchProcessor::new("orders", manifest, source, false)
            .run(handle)
            .await;
        assert!(!result.has_errors());
        assert_eq!(result.watermarks, vec![600, 700]);
    }

    // Second run observes 800 as well; only 800 should be committed, and
    // as an append (not an overwrite) since the epoch was already
    // partially processed.
    {
        let source = Arc::new(FakeSourceStore::new());
        source.add_dir_entry("src", "1", true);
        for partition in ["600", "700", "800"] {
            source.add_dir_entry("src/1", partition, true);
            source.add_parquet(&format!("src/1/{partition}"), "part-0.parquet", 10, true);
        }
        let manifest = manifest_of("orders", manifest_entry(800, &[("1", 500)]));
        let handle = local_handle(dir.path());
        let result = BatchProcessor::new("orders", manifest, source, false)
            .run(handle)
            .await;
        assert!(!result.has_errors(), "unexpected errors: {:?}", result.errors);
        assert_eq!(result.watermarks, vec![800]);
        // Resumption within an already-seen epoch records no new schema
        // timestamp: the first partition of the run is not the first
        // partition of the epoch.
        assert!(result.schema_timestamps.is_empty());
        assert_eq!(result.process_finish_watermark, Some(800));
    }
}

#[tokio::test]
async fn two_epochs_process_in_value_order_with_overwrite_then_append_per_epoch() {
    let source = Arc::new(FakeSourceStore::new());
    source.add_dir_entry("src", "1", true);
    source.add_dir_entry("src", "2", true);
    for partition in ["600", "700"] {
        source.add_dir_entry("src/1", partition, true);
        source.add_parquet(&format!("src/1/{partition}"), "part-0.parquet", 10, true);
    }
    for partition in ["1000", "1100"] {
        source.add_dir_entry("src/2", partition, true);
        source.add_parquet(&format!("src/2/{partition}"), "part-0.parquet", 10, true);
    }

    let manifest = manifest_of("orders", manifest_entry(1100, &[("1", 500), ("2", 900)]));
    let dir = TempDir::new().unwrap();
    let handle = local_handle(dir.path());

    let result = BatchProcessor::new("orders", manifest, source, false)
        .run(handle)
        .await;

    assert!(!result.has_errors(), "unexpected errors: {:?}", result.errors);
    assert_eq!(result.watermarks, vec![600, 700, 1000, 1100]);
    assert_eq!(result.schema_timestamps, vec![500, 900]);
    assert_eq!(result.process_finish_watermark, Some(1100));
}

#[tokio::test]
async fn non_numeric_partition_is_skipped_with_warning() {
    let source = Arc::new(FakeSourceStore::new());
    source.add_dir_entry("src", "1", true);
    source.add_dir_entry("src/1", "600", true);
    source.add_parquet("src/1/600", "part-0.parquet", 10, true);
    source.add_dir_entry("src/1", "_tmp", true);
    source.add_dir_entry("src/1", "700", true);
    source.add_parquet("src/1/700", "part-0.parquet", 10, true);

    let manifest = manifest_of("orders", manifest_entry(700, &[("1", 500)]));
    let dir = TempDir::new().unwrap();
    let handle = local_handle(dir.path());

    let result = BatchProcessor::new("orders", manifest, source, false)
        .run(handle)
        .await;

    assert!(!result.has_errors());
    assert_eq!(result.watermarks, vec![600, 700]);
    assert!(result.warnings.iter().any(|w| w.contains("_tmp")));
}

#[tokio::test]
async fn corrupt_smallest_file_falls_back_to_next_candidate() {
    let source = Arc::new(FakeSourceStore::new());
    source.add_dir_entry("src", "1", true);
    source.add_dir_entry("src/1", "600", true);
    // Smallest file is unreadable; resolver must fall back to the larger,
    // readable one and still succeed.
    source.add_parquet("src/1/600", "tiny-corrupt.parquet", 1, false);
    source.add_parquet("src/1/600", "larger-ok.parquet", 100, true);

    let manifest = manifest_of("orders", manifest_entry(600, &[("1", 500)]));
    let dir = TempDir::new().unwrap();
    let handle = local_handle(dir.path());

    let result = BatchProcessor::new("orders", manifest, source, false)
        .run(handle)
        .await;

    assert!(!result.has_errors(), "unexpected errors: {:?}", result.errors);
    assert_eq!(result.watermarks, vec![600]);
}

#[tokio::test]
async fn corrupt_watermark_sentinel_skips_table_without_committing() {
    let dir = TempDir::new().unwrap();

    // Seed the target table with a commit carrying the -1 sentinel.
    {
        let mut handle = local_handle(dir.path());
        handle.probe().await.unwrap();
        let schema = Arc::new(Schema::new(vec![Field::new("id", DataType::Utf8, false)]));
        let seed = vec![ParquetDescriptor {
            path: "s3://bucket/src/1/100/part-0.parquet".to_string(),
            size: 10,
            last_modified_ns: 0,
        }];
        handle
            .commit(&seed, &schema, CommitMode::Overwrite, -1, 0)
            .await
            .unwrap();
    }

    let source = Arc::new(FakeSourceStore::new());
    source.add_dir_entry("src", "1", true);
    source.add_dir_entry("src/1", "200", true);
    source.add_parquet("src/1/200", "part-0.parquet", 10, true);

    let manifest = manifest_of("orders", manifest_entry(200, &[("1", 500)]));
    let handle = local_handle(dir.path());

    let result = BatchProcessor::new("orders", manifest, source, false)
        .run(handle)
        .await;

    assert!(result.has_errors());
    assert!(result.watermarks.is_empty());
    assert_eq!(result.process_finish_watermark, Some(-1));
}

#[tokio::test]
async fn reset_then_rerun_matches_a_fresh_run() {
    let dir = TempDir::new().unwrap();

    {
        let source = Arc::new(FakeSourceStore::new());
        source.add_dir_entry("src", "1", true);
        for partition in ["600", "700"] {
            source.add_dir_entry("src/1", partition, true);
            source.add_parquet(&format!("src/1/{partition}"), "part-0.parquet", 10, true);
        }
        let manifest = manifest_of("orders", manifest_entry(700, &[("1", 500)]));
        let handle = local_handle(dir.path());
        let result = BatchProcessor::new("orders", manifest, source, false)
            .run(handle)
            .await;
        assert!(!result.has_errors());
        assert_eq!(result.watermarks, vec![600, 700]);
    }

    // Rerunning with reset=true against unchanged upstream data deletes the
    // log and reprocesses from watermark zero, landing on the same
    // committed state a fresh run would — even though the manifest's
    // lastSuccessfulWriteTimestamp hasn't advanced past the prior high
    // watermark.
    {
        let source = Arc::new(FakeSourceStore::new());
        source.add_dir_entry("src", "1", true);
        for partition in ["600", "700"] {
            source.add_dir_entry("src/1", partition, true);
            source.add_parquet(&format!("src/1/{partition}"), "part-0.parquet", 10, true);
        }
        let manifest = manifest_of("orders", manifest_entry(700, &[("1", 500)]));
        let handle = local_handle(dir.path());
        let result = BatchProcessor::new("orders", manifest, source, true)
            .run(handle)
            .await;
        assert!(!result.has_errors(), "unexpected errors: {:?}", result.errors);
        assert_eq!(result.watermarks, vec![600, 700]);
        assert_eq!(result.schema_timestamps, vec![500]);
        assert_eq!(result.process_finish_watermark, Some(700));
    }
}

#[tokio::test]
async fn nothing_new_produces_a_warning_and_no_commits() {
    let dir = TempDir::new().unwrap();

    {
        let mut handle = local_handle(dir.path());
        handle.probe().await.unwrap();
        let schema = Arc::new(Schema::new(vec![Field::new("id", DataType::Utf8, false)]));
        let seed = vec![ParquetDescriptor {
            path: "s3://bucket/src/1/1000/part-0.parquet".to_string(),
            size: 10,
            last_modified_ns: 0,
        }];
        handle
            .commit(&seed, &schema, CommitMode::Overwrite, 1000, 500)
            .await
            .unwrap();
    }

    let source = Arc::new(FakeSourceStore::new());
    let manifest = manifest_of("orders", manifest_entry(1000, &[("1", 500)]));
    let handle = local_handle(dir.path());

    let result = BatchProcessor::new("orders", manifest, source, false)
        .run(handle)
        .await;

    assert!(!result.has_errors());
    assert!(result.watermarks.is_empty());
    assert!(result.warnings.iter().any(|w| w.contains("nothing new")));
    assert_eq!(result.process_finish_watermark, Some(1000));
}
