//! Error types for syncwatch-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise while loading settings or connection config.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure, annotated with the offending path.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The connections document could not be parsed (JSON or YAML).
    #[error("failed to parse connection config at {path}: {message}")]
    Parse { path: PathBuf, message: String },

    /// A setting required by the requested operation is not set.
    #[error("missing required setting {0}")]
    MissingSetting(&'static str),

    /// The tick schedule expression is not a valid cron expression.
    #[error("invalid cron schedule '{expr}': {reason}")]
    InvalidSchedule { expr: String, reason: String },

    /// `dirs::home_dir()` returned `None` and no explicit path was configured.
    #[error("cannot determine home directory; set $HOME or the explicit path setting")]
    HomeNotFound,
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ConfigError {
    ConfigError::Io {
        path: path.into(),
        source,
    }
}
