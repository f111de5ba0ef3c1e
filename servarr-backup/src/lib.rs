//! servarr-backup library
//!
//! Triggers a backup on a Sonarr/Radarr/Lidarr-style server, waits for it,
//! downloads the archive and optionally extracts and deletes it.

pub mod archive;
pub mod client;
pub mod config;
pub mod deadline;
pub mod pipeline;
pub mod transfer;
pub mod utils;

// Re-export commonly used types
pub use client::ServarrClient;
pub use config::{ClientConfig, Config};
pub use utils::errors::BackupError;
pub type Result<T> = std::result::Result<T, BackupError>;
