//! ADLS Gen2-backed [`ObjectStoreHandle`].
//!
//! Always bound to a single container at construction — Azure is only ever
//! used as a *target* cloud in this crate, so there is no cross-container
//! use case analogous to the S3 source/target split.

use std::sync::Arc;

use async_trait::async_trait;
use deltalake::arrow::datatypes::SchemaRef;
use deltalake::parquet::arrow::async_reader::{ParquetObjectReader, ParquetRecordBatchStreamBuilder};
use futures::TryStreamExt;
use object_store::azure::MicrosoftAzureBuilder;
use object_store::path::Path as StorePath;
use object_store::ObjectStore as RawObjectStore;
use tracing::warn;

use crate::config::{AzureAuth, TargetAzureConfig};
use crate::error::{IngestError, Result};

use super::{DirEntry, EntryType, ObjectStoreHandle};

pub struct AdlsObjectStore {
    client: Arc<dyn RawObjectStore>,
}

impl AdlsObjectStore {
    pub fn new(config: &TargetAzureConfig) -> Result<Self> {
        let mut builder = MicrosoftAzureBuilder::new()
            .with_account(&config.account_name)
            .with_container_name(&config.container);

        builder = match &config.auth {
            AzureAuth::AccountKey(key) => builder.with_access_key(key),
            AzureAuth::ServicePrincipal {
                tenant_id,
                client_id,
                client_secret,
            } => builder
                .with_tenant_id(tenant_id)
                .with_client_id(client_id)
                .with_client_secret(client_secret),
        };

        // Only the blob-REST endpoint is relevant here: this facade talks to
        // Azure over `object_store`'s blob API. The DFS endpoint override is
        // a `deltalake`/ADLS Gen2 storage-options concern, applied in
        // `delta_table::target_table_location` instead.
        if let Some(authority) = &config.blob_authority {
            builder = builder.with_endpoint(format!(
                "{}://{}",
                config.blob_scheme.as_deref().unwrap_or("https"),
                authority
            ));
        }

        let store = builder
            .build()
            .map_err(|e| IngestError::Storage(format!("failed to build ADLS client: {e}")))?;

        Ok(AdlsObjectStore {
            client: Arc::new(store),
        })
    }
}

#[async_trait]
impl ObjectStoreHandle for AdlsObjectStore {
    async fn list(&self, dir: &str) -> Result<Vec<DirEntry>> {
        let prefix = StorePath::from(dir.trim_start_matches('/').trim_end_matches('/'));

        let listing = self
            .client
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
        let object_path = StorePath::from(path.trim_start_matches('/'));

        let meta = self
            .client
            .head(&object_path)
            .await
            .map_err(|e| IngestError::Storage(format!("head {path} failed: {e}")))?;

        let reader = ParquetObjectReader::new(self.client.clone(), meta);
        let builder = ParquetRecordBatchStreamBuilder::new(reader)
            .await
            .map_err(|e| IngestError::Storage(format!("invalid parquet footer at {path}: {e}")))?;
        Ok(builder.schema().clone())
    }

    async fn read_json(&self, path: &str) -> Result<serde_json::Value> {
        let object_path = StorePath::from(path.trim_start_matches('/'));

        let result = self.client.get(&object_path).await.map_err(|e| match e {
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
        let prefix = StorePath::from(uri.trim_start_matches('/').trim_end_matches('/'));

        let paths: Vec<StorePath> = match self
            .client
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
            if let Err(e) = self.client.delete(&path).await {
                warn!(uri, path = %path, error = %e, "delete_dir: delete failed");
                return false;
            }
        }
        true
    }
}
