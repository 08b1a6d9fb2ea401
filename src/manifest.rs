//! Upstream CDA manifest — a read-only view of `manifest.json`, loaded once
//! per run and shared across table workers.

use std::collections::HashMap;

use serde::Deserialize;

use crate::error::{IngestError, Result};
use crate::object_store::ObjectStoreHandle;

/// One table's entry in the manifest, as published upstream.
#[derive(Debug, Clone, Deserialize)]
struct RawManifestEntry {
    #[serde(rename = "lastSuccessfulWriteTimestamp")]
    last_successful_write_timestamp: String,
    #[serde(rename = "totalProcessedRecordsCount")]
    total_processed_records_count: i64,
    #[serde(rename = "dataFilesPath")]
    data_files_path: String,
    #[serde(rename = "schemaHistory")]
    schema_history: HashMap<String, String>,
}

/// Resolved, typed view of a single table's manifest entry.
///
/// `data_files_path` has the leading `s3://` scheme stripped, since it is
/// consumed directly by [`crate::object_store::ObjectStore`], not rendered
/// back into a URI.
#[derive(Debug, Clone)]
pub struct ManifestEntry {
    pub last_successful_write_timestamp: i64,
    pub total_processed_records_count: i64,
    pub data_files_path: String,
    /// schema-epoch key -> schema-epoch activation timestamp
    pub schema_history: HashMap<String, i64>,
}

/// The full upstream manifest, loaded once and shared read-only across
/// table workers.
#[derive(Debug, Clone)]
pub struct Manifest {
    entries: HashMap<String, ManifestEntry>,
}

impl Manifest {
    /// Load `{manifest_location}/manifest.json` via the given object store
    /// and parse it into typed entries.
    pub async fn load(store: &dyn ObjectStoreHandle, manifest_location: &str) -> Result<Self> {
        let manifest_path = format!("{}/manifest.json", manifest_location.trim_end_matches('/'));
        let value = store.read_json(&manifest_path).await?;
        let raw: HashMap<String, Vec<RawManifestEntry>> = serde_json::from_value(value)?;

        let mut entries = HashMap::with_capacity(raw.len());
        for (table, mut versions) in raw {
            let Some(raw_entry) = versions.pop() else {
                continue;
            };
            entries.insert(table, parse_entry(raw_entry)?);
        }

        Ok(Manifest { entries })
    }

    /// Construct directly from already-parsed entries (test fixtures).
    pub fn from_entries(entries: HashMap<String, ManifestEntry>) -> Self {
        Manifest { entries }
    }

    /// All table names present in the manifest.
    pub fn table_names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Look up a single table's entry.
    pub fn entry(&self, table: &str) -> Option<&ManifestEntry> {
        self.entries.get(table)
    }

    /// Resolve the set of tables to process: `selected` (if non-empty) or
    /// every manifest key, minus `excluded`.
    pub fn resolve_tables(&self, selected: &[String], excluded: &[String]) -> Vec<String> {
        let base: Vec<String> = if selected.is_empty() {
            self.table_names()
        } else {
            selected.to_vec()
        };
        base.into_iter()
            .filter(|t| !excluded.contains(t))
            .collect()
    }
}

fn parse_entry(raw: RawManifestEntry) -> Result<ManifestEntry> {
    let last_successful_write_timestamp = parse_i64(
        &raw.last_successful_write_timestamp,
        "lastSuccessfulWriteTimestamp",
    )?;

    let mut schema_history = HashMap::with_capacity(raw.schema_history.len());
    for (key, value) in raw.schema_history {
        let ts = parse_i64(&value, &format!("schemaHistory[{key}]"))?;
        schema_history.insert(key, ts);
    }

    Ok(ManifestEntry {
        last_successful_write_timestamp,
        total_processed_records_count: raw.total_processed_records_count,
        data_files_path: strip_s3_scheme(&raw.data_files_path),
        schema_history,
    })
}

fn parse_i64(raw: &str, field: &str) -> Result<i64> {
    raw.parse::<i64>()
        .map_err(|_| IngestError::Validation(format!("manifest field {field} is not an integer: {raw:?}")))
}

fn strip_s3_scheme(path: &str) -> String {
    path.strip_prefix("s3://").unwrap_or(path).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(ts: i64, epochs: &[(&str, i64)]) -> ManifestEntry {
        ManifestEntry {
            last_successful_write_timestamp: ts,
            total_processed_records_count: 0,
            data_files_path: "bucket/prefix".to_string(),
            schema_history: epochs.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        }
    }

    fn manifest() -> Manifest {
        let mut entries = HashMap::new();
        entries.insert("orders".to_string(), entry(1000, &[("1", 500)]));
        entries.insert("customers".to_string(), entry(2000, &[("1", 100)]));
        Manifest::from_entries(entries)
    }

    #[test]
    fn resolve_tables_defaults_to_all_keys() {
        let m = manifest();
        let mut tables = m.resolve_tables(&[], &[]);
        tables.sort();
        assert_eq!(tables, vec!["customers".to_string(), "orders".to_string()]);
    }

    #[test]
    fn resolve_tables_honors_selection_and_exclusion() {
        let m = manifest();
        let tables = m.resolve_tables(&["orders".to_string(), "customers".to_string()], &["customers".to_string()]);
        assert_eq!(tables, vec!["orders".to_string()]);
    }

    #[test]
    fn strip_s3_scheme_removes_prefix_only_once() {
        assert_eq!(strip_s3_scheme("s3://bucket/path"), "bucket/path");
        assert_eq!(strip_s3_scheme("bucket/path"), "bucket/path");
    }

    #[test]
    fn parse_entry_rejects_non_integer_timestamp() {
        let raw = RawManifestEntry {
            last_successful_write_timestamp: "not-a-number".to_string(),
            total_processed_records_count: 0,
            data_files_path: "s3://bucket/prefix".to_string(),
            schema_history: HashMap::new(),
        };
        assert!(parse_entry(raw).is_err());
    }
}
