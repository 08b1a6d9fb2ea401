//! Shared test fixtures — an in-memory fake source [`ObjectStoreHandle`],
//! built the way `polarway_lakehouse`'s own tests favor exercising real
//! `deltalake` tables on a local filesystem over mocking `deltalake`
//! itself: only the *source* side (the upstream CDA tree, which this
//! crate does not own) is faked; the Delta target is always a real local
//! table built through [`cda_ingest::delta_table::DeltaTableHandle`].

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use cda_ingest::delta_table::DeltaTableHandle;
use cda_ingest::error::{IngestError, Result};
use cda_ingest::object_store::{DirEntry, EntryType, ObjectStoreHandle};
use deltalake::arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use std::sync::Arc;
use url::Url;

/// One fake parquet file: a size (drives schema-resolution ordering) and
/// whether reading its footer succeeds.
#[derive(Clone)]
pub struct FakeFile {
    pub size: u64,
    pub readable: bool,
}

/// An in-memory stand-in for the upstream CDA source tree. Directories are
/// modeled as a flat map from parent path to children; this is sufficient
/// to drive [`ObjectStoreHandle::list`] one level at a time, matching how
/// [`cda_ingest::batch_processor::BatchProcessor`] walks the tree.
pub struct FakeSourceStore {
    /// path -> children (directories and files)
    dirs: Mutex<HashMap<String, Vec<DirEntry>>>,
    /// file path -> fake descriptor
    files: Mutex<HashMap<String, FakeFile>>,
    schema: SchemaRef,
}

impl FakeSourceStore {
    pub fn new() -> Self {
        FakeSourceStore {
            dirs: Mutex::new(HashMap::new()),
            files: Mutex::new(HashMap::new()),
            schema: Arc::new(Schema::new(vec![Field::new("id", DataType::Utf8, false)])),
        }
    }

    /// Register a directory entry (file or subdirectory) under `parent`.
    pub fn add_dir_entry(&self, parent: &str, base_name: &str, is_dir: bool) {
        let path = format!("{}/{}", parent.trim_end_matches('/'), base_name);
        let entry = DirEntry {
            path: path.clone(),
            entry_type: if is_dir { EntryType::Dir } else { EntryType::File },
            base_name: base_name.to_string(),
            size: 0,
            mtime_ns: 0,
        };
        self.dirs.lock().unwrap().entry(parent.to_string()).or_default().push(entry);
    }

    /// Register a parquet file with a known size/readability at `path`,
    /// adding it as a file entry under its parent directory too.
    pub fn add_parquet(&self, parent: &str, file_name: &str, size: u64, readable: bool) {
        self.add_dir_entry(parent, file_name, false);
        let path = format!("{}/{}", parent.trim_end_matches('/'), file_name);
        self.files.lock().unwrap().insert(path, FakeFile { size, readable });
    }
}

#[async_trait]
impl ObjectStoreHandle for FakeSourceStore {
    async fn list(&self, dir: &str) -> Result<Vec<DirEntry>> {
        let key = dir.trim_end_matches('/').to_string();
        let mut entries = self.dirs.lock().unwrap().get(&key).cloned().unwrap_or_default();
        for entry in &mut entries {
            if entry.entry_type == EntryType::File {
                if let Some(f) = self.files.lock().unwrap().get(&entry.path) {
                    entry.size = f.size;
                }
            }
        }
        Ok(entries)
    }

    async fn read_parquet_schema(&self, path: &str) -> Result<SchemaRef> {
        match self.files.lock().unwrap().get(path) {
            Some(f) if f.readable => Ok(self.schema.clone()),
            Some(_) => Err(IngestError::Storage(format!("corrupt parquet footer at {path}"))),
            None => Err(IngestError::Storage(format!("no such file: {path}"))),
        }
    }

    async fn read_json(&self, _path: &str) -> Result<serde_json::Value> {
        Err(IngestError::Storage("read_json not used by these tests".to_string()))
    }

    async fn delete_dir(&self, _uri: &str) -> bool {
        true
    }
}

/// A real local-filesystem Delta table, the target side of every
/// end-to-end test. `table_dir` must be an existing empty directory.
pub fn local_handle(table_dir: &std::path::Path) -> DeltaTableHandle {
    let log_uri = Url::from_directory_path(table_dir).unwrap().to_string();
    DeltaTableHandle::new(
        log_uri,
        table_dir.to_string_lossy().to_string(),
        HashMap::new(),
        100,
        Arc::new(LocalDeleteStore),
    )
}

/// Only `delete_dir` is ever exercised against the target store in these
/// tests (the `reset=true` path); every other method is unreachable.
struct LocalDeleteStore;

#[async_trait]
impl ObjectStoreHandle for LocalDeleteStore {
    async fn list(&self, _dir: &str) -> Result<Vec<DirEntry>> {
        unreachable!("local delete store is not used for listing in tests")
    }

    async fn read_parquet_schema(&self, _path: &str) -> Result<SchemaRef> {
        unreachable!("local delete store is not used for schema reads in tests")
    }

    async fn read_json(&self, _path: &str) -> Result<serde_json::Value> {
        unreachable!("local delete store is not used for json reads in tests")
    }

    async fn delete_dir(&self, uri: &str) -> bool {
        std::fs::remove_dir_all(uri).is_ok()
    }
}
