//! [`DeltaTableHandle`] — binding to a single Delta table, the sole ordered
//! writer of that table's watermark.
//!
//! Table creation goes through [`deltalake::operations::create::CreateBuilder`]
//! (schema only, no data); every subsequent registration of parquet files —
//! including the table's very first batch — goes through the lower-level
//! [`deltalake::operations::transaction::CommitBuilder`] so that both the
//! `append` and `overwrite` paths, and the embedded watermark metadata,
//! share one code path.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use deltalake::arrow::datatypes::{DataType as ArrowDataType, SchemaRef, TimeUnit};
use deltalake::kernel::{Action, Add, DataType as DeltaDataType, PrimitiveType, Remove, StructField};
use deltalake::operations::create::CreateBuilder;
use deltalake::operations::transaction::{CommitBuilder, CommitProperties};
use deltalake::protocol::{DeltaOperation, SaveMode};
use deltalake::{DeltaTable, DeltaTableError};
use serde_json::Value;
use tokio::time::{sleep, Duration};
use tracing::warn;
use url::Url;

use crate::config::{AzureAuth, TargetConfig};
use crate::error::{IngestError, Result};
use crate::object_store::ObjectStoreHandle;
use std::sync::Arc;

/// Build the `abfss://`/`s3://` table URI and the deltalake storage-options
/// map for `table` under the configured target cloud.
pub fn target_table_location(target: &TargetConfig, table: &str) -> (String, String, HashMap<String, String>) {
    match target {
        TargetConfig::Azure(azure) => {
            let mut log_uri = format!(
                "abfss://{}@{}.dfs.core.windows.net/",
                azure.container, azure.account_name
            );
            let mut relative = String::new();
            if let Some(subfolder) = &azure.subfolder {
                log_uri.push_str(subfolder.trim_matches('/'));
                log_uri.push('/');
                relative.push_str(subfolder.trim_matches('/'));
                relative.push('/');
            }
            log_uri.push_str(table);
            log_uri.push('/');
            relative.push_str(table);
            relative.push('/');

            let mut options = HashMap::new();
            options.insert("azure_storage_account_name".to_string(), azure.account_name.clone());
            match &azure.auth {
                AzureAuth::AccountKey(key) => {
                    options.insert("azure_storage_account_key".to_string(), key.clone());
                }
                AzureAuth::ServicePrincipal {
                    tenant_id,
                    client_id,
                    client_secret,
                } => {
                    options.insert("azure_storage_tenant_id".to_string(), tenant_id.clone());
                    options.insert("azure_storage_client_id".to_string(), client_id.clone());
                    options.insert("azure_storage_client_secret".to_string(), client_secret.clone());
                }
            }
            if let Some(authority) = &azure.dfs_authority {
                options.insert(
                    "azure_storage_dfs_authority".to_string(),
                    authority.clone(),
                );
            }

            (log_uri, relative, options)
        }
        TargetConfig::Aws(s3) => {
            let mut log_uri = format!("s3://{}/", s3.bucket);
            let mut relative = String::new();
            if let Some(prefix) = &s3.prefix {
                log_uri.push_str(prefix.trim_matches('/'));
                log_uri.push('/');
                relative.push_str(prefix.trim_matches('/'));
                relative.push('/');
            }
            log_uri.push_str(table);
            log_uri.push('/');
            relative.push_str(table);
            relative.push('/');

            let mut options = HashMap::new();
            options.insert("aws_region".to_string(), s3.region.clone());
            options.insert("aws_access_key_id".to_string(), s3.access_key_id.clone());
            options.insert(
                "aws_secret_access_key".to_string(),
                s3.secret_access_key.clone(),
            );
            if let Some(endpoint) = &s3.endpoint {
                options.insert("aws_endpoint_url".to_string(), endpoint.clone());
                options.insert("aws_allow_http".to_string(), "true".to_string());
            }

            (log_uri, relative, options)
        }
    }
}

/// One parquet file discovered on the source, ready to be registered as an
/// `Add` action. `path` carries the `s3://` scheme verbatim regardless of
/// the target cloud — the Delta table's own URI scheme is the resolver.
#[derive(Debug, Clone)]
pub struct ParquetDescriptor {
    pub path: String,
    pub size: u64,
    pub last_modified_ns: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitMode {
    Append,
    Overwrite,
}

#[derive(Debug, Clone, Copy)]
pub struct CommitOutcome {
    pub version: i64,
}

#[derive(Debug, Clone)]
pub struct TableStats {
    pub version: i64,
    pub num_files: usize,
    pub uri: String,
}

pub struct DeltaTableHandle {
    log_uri: String,
    storage_options: HashMap<String, String>,
    checkpoint_interval: u32,
    commits_since_checkpoint: u32,
    table: Option<DeltaTable>,
    object_store: Arc<dyn ObjectStoreHandle>,
    /// Path relative to the object store's root, used only by
    /// [`Self::delete_log`] — the log URI with scheme and host stripped.
    log_relative_path: String,
}

impl DeltaTableHandle {
    pub fn new(
        log_uri: String,
        log_relative_path: String,
        storage_options: HashMap<String, String>,
        checkpoint_interval: u32,
        object_store: Arc<dyn ObjectStoreHandle>,
    ) -> Self {
        DeltaTableHandle {
            log_uri,
            storage_options,
            checkpoint_interval,
            commits_since_checkpoint: 0,
            table: None,
            object_store,
            log_relative_path,
        }
    }

    /// Construct a handle for `table` under the configured target cloud.
    pub fn for_table(
        table: &str,
        target: &TargetConfig,
        checkpoint_interval: u32,
        object_store: Arc<dyn ObjectStoreHandle>,
    ) -> Self {
        let (log_uri, log_relative_path, storage_options) = target_table_location(target, table);
        DeltaTableHandle::new(log_uri, log_relative_path, storage_options, checkpoint_interval, object_store)
    }

    pub fn is_bound(&self) -> bool {
        self.table.is_some()
    }

    /// Attempt to bind to an existing table. A missing table is not an
    /// error — the handle simply stays unbound.
    pub async fn probe(&mut self) -> Result<()> {
        let url = Url::parse(&self.log_uri)?;
        match deltalake::open_table_with_storage_options(url, self.storage_options.clone()).await {
            Ok(table) => {
                self.table = Some(table);
                Ok(())
            }
            Err(DeltaTableError::NotATable(_)) => {
                self.table = None;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Read the most recent commit's custom metadata. `(0, 0)` if unbound,
    /// and on any parse failure — never raises.
    pub async fn read_last_commit_meta(&self) -> (i64, i64) {
        let Some(table) = &self.table else {
            return (0, 0);
        };

        let history = match table.history(Some(1)).await {
            Ok(h) => h,
            Err(e) => {
                warn!(uri = %self.log_uri, error = %e, "failed to read commit history");
                return (0, 0);
            }
        };

        let Some(commit) = history.into_iter().next() else {
            return (0, 0);
        };

        // The watermark/schema_timestamp keys are written via
        // `CommitProperties::with_metadata`, which lands them in the
        // commit info's flattened catch-all (`info`), not in
        // `operation_parameters` (which only ever holds the
        // `DeltaOperation::Write` params: mode/partitionBy/predicate).
        let params = commit.info;
        let watermark = extract_i64(&params, "watermark").unwrap_or_else(|| {
            warn!(uri = %self.log_uri, "commit metadata missing/invalid watermark, defaulting to 0");
            0
        });
        let schema_timestamp = extract_i64(&params, "schema_timestamp").unwrap_or_else(|| {
            warn!(uri = %self.log_uri, "commit metadata missing/invalid schema_timestamp, defaulting to 0");
            0
        });
        (watermark, schema_timestamp)
    }

    /// Register `parquets` as Add actions under `mode`, carrying `watermark`
    /// and `schema_timestamp` as the commit's custom metadata. Creates the
    /// table (schema only, then an initial commit) if it doesn't exist yet.
    pub async fn commit(
        &mut self,
        parquets: &[ParquetDescriptor],
        schema: &SchemaRef,
        mode: CommitMode,
        watermark: i64,
        schema_timestamp: i64,
    ) -> Result<CommitOutcome> {
        if parquets.is_empty() {
            return Err(IngestError::DeltaValidation(
                "commit called with no parquet descriptors".to_string(),
            ));
        }

        if self.table.is_none() {
            self.create_empty_table(schema).await?;
        }

        let add_actions: Vec<Action> = parquets.iter().map(|p| Action::Add(build_add(p))).collect();

        let mut actions = Vec::with_capacity(add_actions.len());
        if mode == CommitMode::Overwrite {
            actions.extend(self.remove_actions_for_existing_files()?);
        }
        actions.extend(add_actions);

        let app_metadata = build_app_metadata(watermark, schema_timestamp);
        let save_mode = match mode {
            CommitMode::Append => SaveMode::Append,
            CommitMode::Overwrite => SaveMode::Overwrite,
        };
        let operation = DeltaOperation::Write {
            mode: save_mode,
            partition_by: None,
            predicate: None,
        };

        let table = self.table.as_mut().expect("table bound above");
        let properties = CommitProperties::default().with_metadata(app_metadata);
        let commit = CommitBuilder::from(properties)
            .with_actions(actions)
            .build(Some(table.snapshot()?), table.log_store(), operation)
            .await
            .map_err(IngestError::from)?;

        let version = commit.version;

        self.commits_since_checkpoint += 1;
        if self.commits_since_checkpoint >= self.checkpoint_interval {
            self.try_checkpoint().await;
            self.commits_since_checkpoint = 0;
        }

        if let Err(e) = self.refresh().await {
            warn!(uri = %self.log_uri, error = %e, "post-commit refresh failed, retrying once");
            sleep(Duration::from_millis(200)).await;
            if let Err(e) = self.refresh().await {
                warn!(uri = %self.log_uri, error = %e, "post-commit refresh retry failed, continuing");
            }
        }

        Ok(CommitOutcome { version })
    }

    /// Recursively remove the log directory. Best-effort.
    pub async fn delete_log(&mut self) -> bool {
        let ok = self.object_store.delete_dir(&self.log_relative_path).await;
        if ok {
            self.table = None;
            self.commits_since_checkpoint = 0;
        }
        ok
    }

    pub fn stats(&self) -> Result<TableStats> {
        let table = self
            .table
            .as_ref()
            .ok_or_else(|| IngestError::Validation("stats() called on unbound table".to_string()))?;
        let num_files = table
            .snapshot()
            .map(|s| s.file_actions().map(|a| a.len()).unwrap_or(0))
            .unwrap_or(0);
        Ok(TableStats {
            version: table.version().unwrap_or(-1),
            num_files,
            uri: self.log_uri.clone(),
        })
    }

    async fn create_empty_table(&mut self, schema: &SchemaRef) -> Result<()> {
        let fields: Vec<StructField> = schema
            .fields()
            .iter()
            .map(|f| StructField::new(f.name().clone(), arrow_to_delta_type(f.data_type()), f.is_nullable()))
            .collect();

        let table = CreateBuilder::new()
            .with_location(&self.log_uri)
            .with_storage_options(self.storage_options.clone())
            .with_save_mode(SaveMode::ErrorIfExists)
            .with_columns(fields)
            .await
            .map_err(IngestError::from)?;

        self.table = Some(table);
        Ok(())
    }

    fn remove_actions_for_existing_files(&self) -> Result<Vec<Action>> {
        let table = self.table.as_ref().expect("table bound");
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);

        let existing = table.snapshot()?.file_actions().map_err(IngestError::from)?;
        Ok(existing
            .into_iter()
            .map(|add| {
                Action::Remove(Remove {
                    path: add.path,
                    deletion_timestamp: Some(now_ms),
                    data_change: false,
                    extended_file_metadata: Some(false),
                    partition_values: Some(add.partition_values),
                    size: Some(add.size),
                    ..Default::default()
                })
            })
            .collect())
    }

    async fn try_checkpoint(&mut self) {
        let Some(table) = &self.table else { return };
        if let Err(e) = deltalake::checkpoints::create_checkpoint(table).await {
            warn!(uri = %self.log_uri, error = %e, "checkpoint creation failed, continuing");
        }
    }

    async fn refresh(&mut self) -> Result<()> {
        if let Some(table) = &mut self.table {
            table.update().await.map_err(IngestError::from)?;
        }
        Ok(())
    }
}

fn build_add(p: &ParquetDescriptor) -> Add {
    Add {
        path: p.path.clone(),
        size: p.size as i64,
        partition_values: HashMap::new(),
        modification_time: p.last_modified_ns / 1_000_000,
        data_change: false,
        stats: Some("{}".to_string()),
        tags: None,
        deletion_vector: None,
        ..Default::default()
    }
}

fn build_app_metadata(watermark: i64, schema_timestamp: i64) -> HashMap<String, Value> {
    let mut m = HashMap::with_capacity(2);
    m.insert("watermark".to_string(), Value::String(watermark.to_string()));
    m.insert(
        "schema_timestamp".to_string(),
        Value::String(schema_timestamp.to_string()),
    );
    m
}

fn extract_i64(params: &HashMap<String, Value>, key: &str) -> Option<i64> {
    params.get(key).and_then(|v| match v {
        Value::String(s) => s.parse::<i64>().ok(),
        Value::Number(n) => n.as_i64(),
        _ => None,
    })
}

fn arrow_to_delta_type(arrow_type: &ArrowDataType) -> DeltaDataType {
    match arrow_type {
        ArrowDataType::Utf8 | ArrowDataType::LargeUtf8 => DeltaDataType::Primitive(PrimitiveType::String),
        ArrowDataType::Int8 => DeltaDataType::Primitive(PrimitiveType::Byte),
        ArrowDataType::Int16 => DeltaDataType::Primitive(PrimitiveType::Short),
        ArrowDataType::Int32 => DeltaDataType::Primitive(PrimitiveType::Integer),
        ArrowDataType::Int64 => DeltaDataType::Primitive(PrimitiveType::Long),
        ArrowDataType::UInt8 => DeltaDataType::Primitive(PrimitiveType::Short),
        ArrowDataType::UInt16 => DeltaDataType::Primitive(PrimitiveType::Integer),
        ArrowDataType::UInt32 | ArrowDataType::UInt64 => DeltaDataType::Primitive(PrimitiveType::Long),
        ArrowDataType::Float32 => DeltaDataType::Primitive(PrimitiveType::Float),
        ArrowDataType::Float64 => DeltaDataType::Primitive(PrimitiveType::Double),
        ArrowDataType::Boolean => DeltaDataType::Primitive(PrimitiveType::Boolean),
        ArrowDataType::Binary | ArrowDataType::LargeBinary => DeltaDataType::Primitive(PrimitiveType::Binary),
        ArrowDataType::Timestamp(TimeUnit::Microsecond, tz) if tz.is_some() => {
            DeltaDataType::Primitive(PrimitiveType::Timestamp)
        }
        ArrowDataType::Timestamp(_, _) => DeltaDataType::Primitive(PrimitiveType::TimestampNtz),
        ArrowDataType::Date32 | ArrowDataType::Date64 => DeltaDataType::Primitive(PrimitiveType::Date),
        other => {
            warn!(arrow_type = ?other, "unmapped arrow type, defaulting to string");
            DeltaDataType::Primitive(PrimitiveType::String)
        }
    }
}
