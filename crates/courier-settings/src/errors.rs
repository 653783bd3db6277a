//! Settings error types.

use std::path::PathBuf;

use thiserror::Error;

/// Why settings could not be loaded.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("cannot read {}: {source}", path.display())]
    Read {
        /// Settings file.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// The settings file is not valid JSON.
    #[error("{} is not valid JSON: {source}", path.display())]
    Parse {
        /// Settings file.
        path: PathBuf,
        /// Parser failure with line and column.
        #[source]
        source: serde_json::Error,
    },
    /// The merged document does not fit the settings schema (wrong field type).
    #[error("settings do not match the expected shape: {0}")]
    Shape(#[source] serde_json::Error),
    /// A value is out of range or contradicts another.
    #[error("invalid settings value: {0}")]
    InvalidValue(String),
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;
