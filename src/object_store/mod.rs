//! Object-store facade — a uniform surface over the cloud backends
//! (S3, ADLS Gen2) that the rest of the crate consumes: list a directory's
//! immediate children, read a parquet footer's schema, read a JSON
//! document, delete a directory tree.
//!
//! Built on the [`object_store`] crate, the same storage abstraction
//! `deltalake` itself layers its logstore on — constructing dedicated
//! instances here (rather than reusing deltalake's internal store) keeps
//! manifest/source reads independent of the target table's credentials.

mod adls;
mod s3;

use std::sync::Arc;

use async_trait::async_trait;
use deltalake::arrow::datatypes::SchemaRef;

use crate::config::{SourceS3Config, TargetConfig};
use crate::error::Result;

pub use adls::AdlsObjectStore;
pub use s3::S3ObjectStore;

/// Whether a listed entry is a file or a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    File,
    Dir,
}

/// One entry returned by [`ObjectStoreHandle::list`].
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub path: String,
    pub entry_type: EntryType,
    pub base_name: String,
    pub size: u64,
    pub mtime_ns: i64,
}

/// Cloud-agnostic storage facade. Implementors are not assumed
/// thread-safe across independent construction — each table worker
/// constructs its own.
#[async_trait]
pub trait ObjectStoreHandle: Send + Sync {
    /// List the immediate children of `dir` (one level, not recursive).
    async fn list(&self, dir: &str) -> Result<Vec<DirEntry>>;

    /// Read only the footer of the parquet file at `path` and return its
    /// Arrow schema.
    async fn read_parquet_schema(&self, path: &str) -> Result<SchemaRef>;

    /// Read and JSON-decode the document at `path`.
    async fn read_json(&self, path: &str) -> Result<serde_json::Value>;

    /// Recursively delete everything under `uri`. Best-effort: returns
    /// `false` on any failure rather than propagating an error, matching
    /// the operation's contract as a transient-I/O-tolerant primitive.
    async fn delete_dir(&self, uri: &str) -> bool;
}

/// Build the object store used to read the manifest and source parquet
/// tree. Always S3 — the upstream CDA export lives on S3 regardless of
/// where the target Delta tables are hosted.
pub fn build_source_store(config: &SourceS3Config) -> Result<Arc<dyn ObjectStoreHandle>> {
    Ok(Arc::new(S3ObjectStore::new(
        &config.region,
        &config.access_key_id,
        &config.secret_access_key,
        config.endpoint.as_deref(),
        None,
    )?))
}

/// Build the object store used by [`crate::delta_table::DeltaTableHandle`]
/// for log-directory deletion on `reset`, matching the target cloud.
pub fn build_target_store(config: &TargetConfig) -> Result<Arc<dyn ObjectStoreHandle>> {
    match config {
        TargetConfig::Aws(s3) => Ok(Arc::new(S3ObjectStore::new(
            &s3.region,
            &s3.access_key_id,
            &s3.secret_access_key,
            s3.endpoint.as_deref(),
            Some(&s3.bucket),
        )?)),
        TargetConfig::Azure(azure) => Ok(Arc::new(AdlsObjectStore::new(azure)?)),
    }
}
