//! Error types for the servarr backup client.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid response from {endpoint}: {source}")]
    Decode {
        endpoint: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("No recent manual backup found")]
    NoManualBackup,

    #[error("Backup command {id} reported status 'failed'")]
    JobFailed { id: i64 },

    #[error("Operation cancelled before completion")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
}

impl BackupError {
    /// True when the run was aborted by the deadline or a signal rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, BackupError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
