//! Wire types for the servarr v1/v3 API.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::transfer::progress::format_bytes;

/// Body of `POST /api/v{N}/command`
#[derive(Debug, Serialize)]
pub struct CommandRequest<'a> {
    pub name: &'a str,
}

/// A backup command as reported by the command endpoints.
///
/// The server never says which backup file a command produced; the newest
/// manual entry in the backup listing is assumed to be ours.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BackupJob {
    pub id: i64,
    #[serde(default)]
    pub status: CommandStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum CommandStatus {
    Queued,
    Started,
    Completed,
    Failed,
    Unknown(String),
}

impl Default for CommandStatus {
    fn default() -> Self {
        CommandStatus::Unknown(String::new())
    }
}

impl From<String> for CommandStatus {
    fn from(raw: String) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "queued" => CommandStatus::Queued,
            "started" => CommandStatus::Started,
            "completed" => CommandStatus::Completed,
            "failed" => CommandStatus::Failed,
            _ => CommandStatus::Unknown(raw),
        }
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandStatus::Queued => f.write_str("queued"),
            CommandStatus::Started => f.write_str("started"),
            CommandStatus::Completed => f.write_str("completed"),
            CommandStatus::Failed => f.write_str("failed"),
            CommandStatus::Unknown(raw) => write!(f, "unknown ({})", raw),
        }
    }
}

/// One entry of `GET /api/v{N}/system/backup`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BackupRecord {
    pub id: i64,

    /// Download path relative to the base url
    #[serde(default)]
    pub path: String,

    #[serde(rename = "type", default)]
    pub kind: BackupKind,

    #[serde(default)]
    pub name: Option<String>,

    /// Size in bytes
    #[serde(default)]
    pub size: Option<u64>,

    #[serde(default)]
    pub time: Option<String>,
}

impl fmt::Display for BackupRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name.as_deref().unwrap_or(&self.path))?;
        if let Some(size) = self.size {
            write!(f, ", {}", format_bytes(size))?;
        }
        if let Some(time) = &self.time {
            write!(f, ", taken {}", time)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum BackupKind {
    Manual,
    Scheduled,
    Update,
    Other(String),
}

impl Default for BackupKind {
    fn default() -> Self {
        BackupKind::Other(String::new())
    }
}

impl From<String> for BackupKind {
    fn from(raw: String) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "manual" => BackupKind::Manual,
            "scheduled" => BackupKind::Scheduled,
            "update" => BackupKind::Update,
            _ => BackupKind::Other(raw),
        }
    }
}

/// First manual backup in server order. A manual entry without a path
/// counts as no backup at all.
pub fn latest_manual_backup(records: Vec<BackupRecord>) -> Option<BackupRecord> {
    records
        .into_iter()
        .find(|record| record.kind == BackupKind::Manual)
        .filter(|record| !record.path.is_empty())
}
