//! Error types for cda-ingest — one [`IngestError`] enum for every failure mode
//! described in the processor's error taxonomy.
//!
//! Per-partition and per-table failures are not necessarily fatal to the run;
//! see [`crate::supervisor`] and [`crate::batch_processor`] for how these are
//! caught and folded into a [`crate::result::TableResult`] instead of
//! propagating.

use thiserror::Error;

/// Unified error type for all ingestion operations.
#[derive(Error, Debug)]
pub enum IngestError {
    /// Missing or invalid environment configuration. Fatal at supervisor
    /// init — no table work starts until this is clean.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Invalid arguments to an operation (empty table name, malformed
    /// descriptor, invalid commit mode). Fatal to the operation, caught by
    /// the caller and recorded in the table's result.
    #[error("validation error: {0}")]
    Validation(String),

    /// Object-store I/O failure (listing, footer read, JSON read, delete).
    #[error("storage error: {0}")]
    Storage(String),

    /// Delta table bind/commit failure.
    #[error("delta error: {0}")]
    Delta(String),

    /// A precondition on a Delta operation failed before it was even
    /// attempted (invalid mode, missing fields on a parquet descriptor).
    #[error("delta validation error: {0}")]
    DeltaValidation(String),

    /// The table's persisted watermark was the `-1` corruption sentinel.
    #[error("state corruption: table watermark is -1 (corrupt/unknown state)")]
    StateCorruption,
}

impl From<deltalake::DeltaTableError> for IngestError {
    fn from(err: deltalake::DeltaTableError) -> Self {
        IngestError::Delta(err.to_string())
    }
}

impl From<object_store::Error> for IngestError {
    fn from(err: object_store::Error) -> Self {
        IngestError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for IngestError {
    fn from(err: serde_json::Error) -> Self {
        IngestError::Storage(format!("invalid JSON: {err}"))
    }
}

impl From<url::ParseError> for IngestError {
    fn from(err: url::ParseError) -> Self {
        IngestError::Configuration(format!("invalid URL: {err}"))
    }
}

/// Result type alias for ingestion operations.
pub type Result<T> = std::result::Result<T, IngestError>;
