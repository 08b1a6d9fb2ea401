//! Configuration — environment-variable resolution for the ingestion run.
//!
//! Every variable recognized is enumerated here; nothing is read from the
//! environment anywhere else in the crate. Scoped variables
//! (`AWS_SOURCE_*`, `AWS_TARGET_*`) fall back to their unscoped counterparts
//! (`AWS_*`) so a single-account setup doesn't need to duplicate every key.

use std::collections::HashMap;
use std::env;

use crate::error::{IngestError, Result};

const DEFAULT_CHECKPOINT_INTERVAL: u32 = 100;

/// Which cloud the target Delta tables live on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetCloud {
    Azure,
    Aws,
}

impl TargetCloud {
    fn parse(raw: &str) -> Result<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "azure" => Ok(Self::Azure),
            "aws" => Ok(Self::Aws),
            other => Err(IngestError::Configuration(format!(
                "DELTA_TARGET_CLOUD must be 'azure' or 'aws', got '{other}'"
            ))),
        }
    }
}

/// Credentials to read the manifest + source parquet tree from S3.
#[derive(Debug, Clone)]
pub struct SourceS3Config {
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub endpoint: Option<String>,
}

/// Credentials to write Delta tables to ADLS Gen2.
#[derive(Debug, Clone)]
pub struct TargetAzureConfig {
    pub account_name: String,
    pub auth: AzureAuth,
    pub container: String,
    pub subfolder: Option<String>,
    pub blob_authority: Option<String>,
    pub blob_scheme: Option<String>,
    pub dfs_authority: Option<String>,
    pub dfs_scheme: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AzureAuth {
    AccountKey(String),
    ServicePrincipal {
        tenant_id: String,
        client_id: String,
        client_secret: String,
    },
}

/// Credentials to write Delta tables to S3.
#[derive(Debug, Clone)]
pub struct TargetS3Config {
    pub bucket: String,
    pub prefix: Option<String>,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone)]
pub enum TargetConfig {
    Azure(TargetAzureConfig),
    Aws(TargetS3Config),
}

/// Fully-resolved run configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub manifest_location: String,
    pub source: SourceS3Config,
    pub target: TargetConfig,
    pub checkpoint_interval: u32,
    pub show_table_progress: bool,
    pub max_parallel_tables: usize,
}

impl Config {
    /// Resolve configuration from the process environment, returning a
    /// single [`IngestError::Configuration`] describing every missing
    /// variable, grouped by role, rather than failing on the first miss.
    pub fn from_env() -> Result<Self> {
        Self::from_map(&env_snapshot())
    }

    fn from_map(vars: &HashMap<String, String>) -> Result<Self> {
        let mut missing_common = Vec::new();
        let mut missing_source = Vec::new();
        let mut missing_target = Vec::new();

        let manifest_location = require(vars, "AWS_MANIFEST_LOCATION", &mut missing_common);

        let target_cloud = vars
            .get("DELTA_TARGET_CLOUD")
            .cloned()
            .unwrap_or_else(|| "azure".to_string());

        let source_region = require_scoped(vars, "AWS_SOURCE_REGION", "AWS_REGION", &mut missing_source);
        let source_access_key = require_scoped(
            vars,
            "AWS_SOURCE_ACCESS_KEY_ID",
            "AWS_ACCESS_KEY_ID",
            &mut missing_source,
        );
        let source_secret = require_scoped(
            vars,
            "AWS_SOURCE_SECRET_ACCESS_KEY",
            "AWS_SECRET_ACCESS_KEY",
            &mut missing_source,
        );
        let source_endpoint = scoped(vars, "AWS_SOURCE_ENDPOINT_URL", "AWS_ENDPOINT_URL");

        let target_cloud = match TargetCloud::parse(&target_cloud) {
            Ok(c) => Some(c),
            Err(e) => {
                missing_target.push(e.to_string());
                None
            }
        };

        let target = match target_cloud {
            Some(TargetCloud::Azure) => {
                let account_name = require(vars, "AZURE_STORAGE_ACCOUNT_NAME", &mut missing_target);
                let container = require(
                    vars,
                    "AZURE_STORAGE_ACCOUNT_CONTAINER",
                    &mut missing_target,
                );
                let auth = resolve_azure_auth(vars, &mut missing_target);
                account_name.zip(container).zip(auth).map(
                    |((account_name, container), auth)| {
                        TargetConfig::Azure(TargetAzureConfig {
                            account_name,
                            auth,
                            container,
                            subfolder: vars.get("AZURE_STORAGE_SUBFOLDER").cloned(),
                            blob_authority: vars.get("AZURE_BLOB_STORAGE_AUTHORITY").cloned(),
                            blob_scheme: vars.get("AZURE_BLOB_STORAGE_SCHEME").cloned(),
                            dfs_authority: vars.get("AZURE_DFS_STORAGE_AUTHORITY").cloned(),
                            dfs_scheme: vars.get("AZURE_DFS_STORAGE_SCHEME").cloned(),
                        })
                    },
                )
            }
            Some(TargetCloud::Aws) => {
                let bucket = require_scoped(
                    vars,
                    "AWS_TARGET_S3_BUCKET",
                    "AWS_S3_BUCKET",
                    &mut missing_target,
                );
                let region = require_scoped(
                    vars,
                    "AWS_TARGET_REGION",
                    "AWS_REGION",
                    &mut missing_target,
                );
                let access_key_id = require_scoped(
                    vars,
                    "AWS_TARGET_ACCESS_KEY_ID",
                    "AWS_ACCESS_KEY_ID",
                    &mut missing_target,
                );
                let secret_access_key = require_scoped(
                    vars,
                    "AWS_TARGET_SECRET_ACCESS_KEY",
                    "AWS_SECRET_ACCESS_KEY",
                    &mut missing_target,
                );
                bucket
                    .zip(region)
                    .zip(access_key_id)
                    .zip(secret_access_key)
                    .map(|(((bucket, region), access_key_id), secret_access_key)| {
                        TargetConfig::Aws(TargetS3Config {
                            bucket,
                            prefix: scoped(vars, "AWS_TARGET_S3_PREFIX", "AWS_S3_PREFIX"),
                            region,
                            access_key_id,
                            secret_access_key,
                            endpoint: scoped(vars, "AWS_TARGET_ENDPOINT_URL", "AWS_ENDPOINT_URL"),
                        })
                    })
            }
            None => None,
        };

        if !missing_common.is_empty() || !missing_source.is_empty() || !missing_target.is_empty() {
            return Err(IngestError::Configuration(format_missing(
                &missing_common,
                &missing_source,
                &missing_target,
            )));
        }

        let checkpoint_interval = vars
            .get("DELTA_LOG_CHECKPOINT_INTERVAL")
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_CHECKPOINT_INTERVAL);

        let show_table_progress = vars
            .get("SHOW_TABLE_PROGRESS")
            .map(|v| v != "0")
            .unwrap_or(true);

        let max_parallel_tables = vars
            .get("CDA_MAX_PARALLEL_TABLES")
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(num_cpus::get);

        Ok(Config {
            manifest_location: manifest_location.unwrap(),
            source: SourceS3Config {
                region: source_region.unwrap(),
                access_key_id: source_access_key.unwrap(),
                secret_access_key: source_secret.unwrap(),
                endpoint: source_endpoint,
            },
            target: target.unwrap(),
            checkpoint_interval,
            show_table_progress,
            max_parallel_tables,
        })
    }
}

fn resolve_azure_auth(
    vars: &HashMap<String, String>,
    missing: &mut Vec<String>,
) -> Option<AzureAuth> {
    if let Some(key) = vars.get("AZURE_STORAGE_ACCOUNT_KEY") {
        return Some(AzureAuth::AccountKey(key.clone()));
    }

    let tenant_id = vars.get("AZURE_TENANT_ID").cloned();
    let client_id = vars.get("AZURE_CLIENT_ID").cloned();
    let client_secret = vars.get("AZURE_CLIENT_SECRET").cloned();

    match (tenant_id, client_id, client_secret) {
        (Some(tenant_id), Some(client_id), Some(client_secret)) => {
            Some(AzureAuth::ServicePrincipal {
                tenant_id,
                client_id,
                client_secret,
            })
        }
        _ => {
            missing.push(
                "one of AZURE_STORAGE_ACCOUNT_KEY or (AZURE_TENANT_ID, AZURE_CLIENT_ID, \
                 AZURE_CLIENT_SECRET)"
                    .to_string(),
            );
            None
        }
    }
}

fn require(vars: &HashMap<String, String>, key: &str, missing: &mut Vec<String>) -> Option<String> {
    match vars.get(key) {
        Some(v) if !v.is_empty() => Some(v.clone()),
        _ => {
            missing.push(key.to_string());
            None
        }
    }
}

fn require_scoped(
    vars: &HashMap<String, String>,
    scoped_key: &str,
    fallback_key: &str,
    missing: &mut Vec<String>,
) -> Option<String> {
    match scoped(vars, scoped_key, fallback_key) {
        Some(v) => Some(v),
        None => {
            missing.push(format!("{scoped_key} (or {fallback_key})"));
            None
        }
    }
}

fn scoped(vars: &HashMap<String, String>, scoped_key: &str, fallback_key: &str) -> Option<String> {
    vars.get(scoped_key)
        .or_else(|| vars.get(fallback_key))
        .cloned()
        .filter(|v| !v.is_empty())
}

fn format_missing(common: &[String], source: &[String], target: &[String]) -> String {
    let mut sections = Vec::new();
    if !common.is_empty() {
        sections.push(format!("common: {}", common.join(", ")));
    }
    if !source.is_empty() {
        sections.push(format!("source (S3): {}", source.join(", ")));
    }
    if !target.is_empty() {
        sections.push(format!("target: {}", target.join(", ")));
    }
    format!("missing/invalid configuration — {}", sections.join("; "))
}

fn env_snapshot() -> HashMap<String, String> {
    env::vars().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_vars() -> HashMap<String, String> {
        let mut v = HashMap::new();
        v.insert("AWS_MANIFEST_LOCATION".into(), "s3://bucket/manifests".into());
        v.insert("AWS_REGION".into(), "us-east-1".into());
        v.insert("AWS_ACCESS_KEY_ID".into(), "AKIA".into());
        v.insert("AWS_SECRET_ACCESS_KEY".into(), "secret".into());
        v.insert("DELTA_TARGET_CLOUD".into(), "azure".into());
        v.insert("AZURE_STORAGE_ACCOUNT_NAME".into(), "acct".into());
        v.insert("AZURE_STORAGE_ACCOUNT_KEY".into(), "key".into());
        v.insert("AZURE_STORAGE_ACCOUNT_CONTAINER".into(), "container".into());
        v
    }

    #[test]
    fn resolves_azure_target_with_unscoped_source_fallback() {
        let cfg = Config::from_map(&base_vars()).unwrap();
        assert_eq!(cfg.source.region, "us-east-1");
        assert!(matches!(cfg.target, TargetConfig::Azure(_)));
        assert_eq!(cfg.checkpoint_interval, DEFAULT_CHECKPOINT_INTERVAL);
    }

    #[test]
    fn scoped_source_region_wins_over_unscoped() {
        let mut v = base_vars();
        v.insert("AWS_SOURCE_REGION".into(), "eu-west-1".into());
        let cfg = Config::from_map(&v).unwrap();
        assert_eq!(cfg.source.region, "eu-west-1");
    }

    #[test]
    fn missing_manifest_location_is_reported() {
        let mut v = base_vars();
        v.remove("AWS_MANIFEST_LOCATION");
        let err = Config::from_map(&v).unwrap_err();
        assert!(err.to_string().contains("AWS_MANIFEST_LOCATION"));
    }

    #[test]
    fn azure_service_principal_auth_is_accepted() {
        let mut v = base_vars();
        v.remove("AZURE_STORAGE_ACCOUNT_KEY");
        v.insert("AZURE_TENANT_ID".into(), "tenant".into());
        v.insert("AZURE_CLIENT_ID".into(), "client".into());
        v.insert("AZURE_CLIENT_SECRET".into(), "secret".into());
        let cfg = Config::from_map(&v).unwrap();
        match cfg.target {
            TargetConfig::Azure(azure) => {
                assert!(matches!(azure.auth, AzureAuth::ServicePrincipal { .. }));
            }
            _ => panic!("expected azure target"),
        }
    }

    #[test]
    fn aws_target_requires_bucket_and_credentials() {
        let mut v = base_vars();
        v.insert("DELTA_TARGET_CLOUD".into(), "aws".into());
        v.remove("AZURE_STORAGE_ACCOUNT_NAME");
        v.remove("AZURE_STORAGE_ACCOUNT_KEY");
        v.remove("AZURE_STORAGE_ACCOUNT_CONTAINER");
        let err = Config::from_map(&v).unwrap_err();
        assert!(err.to_string().contains("AWS_TARGET_S3_BUCKET"));

        v.insert("AWS_TARGET_S3_BUCKET".into(), "target-bucket".into());
        let cfg = Config::from_map(&v).unwrap();
        match cfg.target {
            TargetConfig::Aws(s3) => assert_eq!(s3.bucket, "target-bucket"),
            _ => panic!("expected aws target"),
        }
    }
}
