//! Utility modules for servarr-backup.

pub mod errors;
pub mod logger;

pub use errors::{BackupError, Result};
