// crates/sawyer-core/src/error.rs

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SawyerError {
    /// A malformed rule or project setting. Never skipped silently.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unresolved source: '{0}' is not a series registered in this project")]
    UnresolvedSource(String),

    #[error("Alignment error: {0}")]
    Alignment(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Regression failed: {0}")]
    Regression(String),

    #[error("Polars operation failed: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("File I/O error for '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid glob pattern: {0}")]
    Glob(#[from] glob::PatternError),

    #[error("Invalid regular expression: {0}")]
    Regex(#[from] regex::Error),
}

impl SawyerError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        SawyerError::Configuration(message.into())
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SawyerError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, SawyerError>;
