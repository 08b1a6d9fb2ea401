//! S3-backed [`ObjectStoreHandle`].
//!
//! Two construction modes: bound to a single bucket (the common case for a
//! target Delta table's own backing store), or unbound, in which case every
//! path passed to the trait methods is expected to carry its bucket as the
//! leading path segment (`bucket/key/...`) — this lets one store instance
//! serve the manifest and the CDA data tree, which need not share a bucket
//! with the table it's writing into.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use deltalake::arrow::datatypes::SchemaRef;
use deltalake::parquet::arrow::async_reader::{ParquetObjectReader, ParquetRecordBatchStreamBuilder};
use futures::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as StorePath;
use object_store::ObjectStore as RawObjectStore;
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::{IngestError, Result};

use super::{DirEntry, EntryType, ObjectStoreHandle};

pub struct S3ObjectStore {
    region: String,
    access_key_id: String,
    secret_access_key: String,
    endpoint: Option<String>,
    /// `Some` in single-bucket mode; `None` when the bucket is taken from
    /// each call's path.
    fixed_bucket: Option<String>,
    clients: Mutex<HashMap<String, Arc<dyn RawObjectStore>>>,
}

impl S3ObjectStore {
    pub fn new(
        region: &str,
        access_key_id: &str,
        secret_access_key: &str,
        endpoint: Option<&str>,
        fixed_bucket: Option<&str>,
    ) -> Result<Self> {
        Ok(S3ObjectStore {
            region: region.to_string(),
            access_key_id: access_key_id.to_string(),
            secret_access_key: secret_access_key.to_string(),
            endpoint: endpoint.map(str::to_string),
            fixed_bucket: fixed_bucket.map(str::to_string),
            clients: Mutex::new(HashMap::new()),
        })
    }

    fn build_client(&self, bucket: &str) -> Result<Arc<dyn RawObjectStore>> {
        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(bucket)
            .with_region(&self.region)
            .with_access_key_id(&self.access_key_id)
            .with_secret_access_key(&self.secret_access_key);

        if let Some(endpoint) = &self.endpoint {
            builder = builder.with_endpoint(endpoint).with_allow_http(true);
        }

        let store = builder
            .build()
            .map_err(|e| IngestError::Storage(format!("failed to build S3 client: {e}")))?;
        Ok(Arc::new(store))
    }

    /// Split a possibly-bucket-prefixed path into `(bucket, relative_path)`.
    fn resolve(&self, path: &str) -> (String, String) {
        let path = path.trim_start_matches('/');
        match &self.fixed_bucket {
            Some(bucket) => (bucket.clone(), path.to_string()),
            None => match path.split_once('/') {
                Some((bucket, rest)) => (bucket.to_string(), rest.to_string()),
                None => (path.to_string(), String::new()),
            },
        }
    }

    async fn client_for(&self, bucket: &str) -> Result<Arc<dyn RawObjectStore>> {
        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(bucket) {
            return Ok(client.clone());
        }
        let client = self.build_client(bucket)?;
        clients.insert(bucket.to_string(), client.clone());
        Ok(client)
    }
}

#[async_trait]
impl ObjectStoreHandle for S3ObjectStore {
    async fn list(&self, dir: &str) -> Result<Vec<DirEntry>> {
        let (bucket, rel) = self.resolve(dir);
        let client = self.client_for(&bucket).await?;
        let prefix = StorePath::from(rel.trim_end_matches('/'));

        let listing = client
            .list_with_delimiter(Some(&prefix))
            .await
            .map_err(|e| IngestError::Storage(format!("list {dir} failed: {e}")))?;

        let mut entries = Vec::with_capacity(listing.common_prefixes.len() + listing.objects.len());
        for p in listing.common_prefixes {
            let base_name = p.filename().unwrap_or_default().to_string();
            entries.push(DirEntry {
                path: p.to_string(),
                entry_type: EntryType::Dir,
                base_name,
                size: 0,
                mtime_ns: 0,
            });
        }
        for obj in listing.objects {
            let base_name = obj.location.filename().unwrap_or_default().to_string();
            entries.push(DirEntry {
                path: obj.location.to_string(),
                entry_type: EntryType::File,
                base_name,
                size: obj.size as u64,
                mtime_ns: obj.last_modified.timestamp_nanos_opt().unwrap_or(0),
            });
        }
        Ok(entries)
    }

    async fn read_parquet_schema(&self, path: &str) -> Result<SchemaRef> {
        let (bucket, rel) = self.resolve(path);
        let client = self.client_for(&bucket).await?;
        let object_path = StorePath::from(rel);

        let meta = client
            .head(&object_path)
            .await
            .map_err(|e| IngestError::Storage(format!("head {path} failed: {e}")))?;

        let reader = ParquetObjectReader::new(client, meta);
        let builder = ParquetRecordBatchStreamBuilder::new(reader)
            .await
            .map_err(|e| IngestError::Storage(format!("invalid parquet footer at {path}: {e}")))?;
        Ok(builder.schema().clone())
    }

    async fn read_json(&self, path: &str) -> Result<serde_json::Value> {
        let (bucket, rel) = self.resolve(path);
        let client = self.client_for(&bucket).await?;
        let object_path = StorePath::from(rel);

        let result = client
            .get(&object_path)
            .await
            .map_err(|e| match e {
                object_store::Error::NotFound { .. } => {
                    IngestError::Storage(format!("not found: {path}"))
                }
                other => IngestError::from(other),
            })?;
        let bytes = result
            .bytes()
            .await
            .map_err(|e| IngestError::Storage(format!("read {path} failed: {e}")))?;
        let value = serde_json::from_slice(&bytes)?;
        Ok(value)
    }

    async fn delete_dir(&self, uri: &str) -> bool {
        let (bucket, rel) = self.resolve(uri);
        let client = match self.client_for(&bucket).await {
            Ok(c) => c,
            Err(e) => {
                warn!(uri, error = %e, "delete_dir: failed to build client");
                return false;
            }
        };
        let prefix = StorePath::from(rel.trim_end_matches('/'));

        let paths: Vec<StorePath> = match client
            .list(Some(&prefix))
            .map_ok(|meta| meta.location)
            .try_collect()
            .await
        {
            Ok(paths) => paths,
            Err(e) => {
                warn!(uri, error = %e, "delete_dir: listing failed");
                return false;
            }
        };

        for path in paths {
            if let Err(e) = client.delete(&path).await {
                warn!(uri, path = %path, error = %e, "delete_dir: delete failed");
                return false;
            }
        }
        true
    }
}
