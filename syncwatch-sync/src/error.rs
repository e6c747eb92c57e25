//! Error types for syncwatch-sync.

use std::path::PathBuf;

use thiserror::Error;

/// Failures of the durable state store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error, with annotated path for context.
    #[error("state I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Persisted content exists but cannot be decoded. Never silently reset.
    #[error("state file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Serialization failure on the write path.
    #[error("state encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Failures querying a monitored table.
#[derive(Debug, Error)]
pub enum DetectError {
    #[error("query on {table} failed: {source}")]
    Query {
        table: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("cannot decode max change value of {table}: {reason}")]
    Decode { table: String, reason: String },

    #[error("source database connection error: {0}")]
    Connect(#[source] sqlx::Error),
}

/// Failures talking to the downstream job API.
#[derive(Debug, Error)]
pub enum TriggerError {
    /// Network-level failure (unreachable, timeout, TLS).
    #[error("job API transport error: {0}")]
    Transport(String),

    /// Non-2xx response other than a status lookup's 404.
    #[error("job API returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The start response carried no job identifier.
    #[error("job API start response did not include a job id: {body}")]
    MissingJobId { body: String },

    /// The response body was not the JSON we expect.
    #[error("job API response decode error: {0}")]
    Decode(String),
}

/// Errors that abort processing of a single connection.
///
/// Table and job-API failures are recovered inside the tracker; only these
/// reach the cycle driver.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("state store error: {0}")]
    Store(#[from] StoreError),
}

/// Convenience constructor for [`StoreError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source,
    }
}
