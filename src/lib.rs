//! # cda-ingest
//!
//! Incremental ingestion of an upstream Cloud Data Access (CDA) export —
//! parquet files dropped under `<schema-epoch>/<timestamp-partition>/`
//! directories, with a `manifest.json` advertising per-table schema
//! history and the latest completed write — into Delta Lake tables on
//! Azure ADLS Gen2 or AWS S3.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │              ProcessorSupervisor                 │
//! │   (table fan-out: sequential or bounded pool)     │
//! ├──────────────┬────────────────────────────────────┤
//! │   Manifest   │         BatchProcessor (× table)   │
//! │ (read-only,  │  watermark recovery → epoch plan   │
//! │  shared)     │  → schema resolution → commit      │
//! ├──────────────┴──────────────┬─────────────────────┤
//! │        ObjectStore           │    DeltaTableHandle │
//! │   (S3 source / S3 or ADLS)   │  (delta-rs binding) │
//! └───────────────────────────────────────────────────┘
//! ```
//!
//! Each table is processed independently with strict intra-table ordering
//! (schema epochs ascending by activation timestamp, timestamp partitions
//! ascending numerically within an epoch) and no cross-table consistency
//! guarantee. A table's failure is recorded in its own
//! [`result::TableResult`] and never aborts the run.

pub mod batch_processor;
pub mod config;
pub mod delta_table;
pub mod error;
pub mod manifest;
pub mod object_store;
pub mod progress;
pub mod result;
pub mod supervisor;

pub use batch_processor::BatchProcessor;
pub use config::Config;
pub use error::{IngestError, Result};
pub use manifest::Manifest;
pub use result::TableResult;
pub use supervisor::{ProcessorSupervisor, RunOptions};
