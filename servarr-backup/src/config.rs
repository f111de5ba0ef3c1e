//! Configuration management for servarr-backup.
//!
//! Settings come from an optional TOML file; command-line values override
//! whatever the file provides.

use crate::archive::OutputTarget;
use crate::pipeline::RunOptions;
use crate::utils::errors::{BackupError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// API version spoken by Sonarr/Radarr. Lidarr and older installs use 1.
pub const DEFAULT_API_VERSION: u32 = 3;

/// Connection settings for one servarr instance. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    base_url: String,
    api_key: String,
    api_version: u32,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, api_version: u32) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            api_key: api_key.into(),
            api_version,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn api_version(&self) -> u32 {
        self.api_version
    }

    /// `{base_url}/api/v{N}{path}`
    pub fn api_url(&self, path: &str) -> String {
        format!("{}/api/v{}{}", self.base_url, self.api_version, path)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub servarr: ServarrConfig,
    pub run: RunConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServarrConfig {
    /// Base url of the servarr, e.g. http://localhost:8989
    #[serde(default)]
    pub base_url: String,

    /// API key from Settings > General
    #[serde(default)]
    pub api_key: String,

    /// 1 for lidarr, 3 for radarr/sonarr
    #[serde(default = "default_api_version")]
    pub api_version: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Where the zip (or extracted tree) goes; "-" is stdout
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default)]
    pub extract: bool,

    /// Delete the backup from the servarr once downloaded
    #[serde(default)]
    pub delete: bool,

    /// Give up after this long (humantime, e.g. "5m")
    #[serde(default)]
    pub timeout: Option<String>,

    /// Stop waiting when the backup command reports "failed"
    #[serde(default)]
    pub fail_on_failed: bool,

    /// Where the archive is staged before extraction
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// Values given on the command line. `None`/`false` leaves the file value alone.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub api_version: Option<u32>,
    pub output: Option<String>,
    pub extract: bool,
    pub delete: bool,
    pub timeout: Option<String>,
    pub fail_on_failed: bool,
    pub temp_dir: Option<PathBuf>,
    pub log_level: Option<String>,
}

// Default values
fn default_api_version() -> u32 {
    DEFAULT_API_VERSION
}

fn default_output() -> String {
    "-".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServarrConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
            api_version: default_api_version(),
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
            extract: false,
            delete: false,
            timeout: None,
            fail_on_failed: false,
            temp_dir: None,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            BackupError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
            .map_err(|e| BackupError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_toml(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Apply command-line values on top of the loaded configuration
    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(base_url) = overrides.base_url {
            self.servarr.base_url = base_url;
        }
        if let Some(api_key) = overrides.api_key {
            self.servarr.api_key = api_key;
        }
        if let Some(api_version) = overrides.api_version {
            self.servarr.api_version = api_version;
        }
        if let Some(output) = overrides.output {
            self.run.output = output;
        }
        if let Some(timeout) = overrides.timeout {
            self.run.timeout = Some(timeout);
        }
        if let Some(temp_dir) = overrides.temp_dir {
            self.run.temp_dir = Some(temp_dir);
        }
        if let Some(level) = overrides.log_level {
            self.log.level = level;
        }
        self.run.extract |= overrides.extract;
        self.run.delete |= overrides.delete;
        self.run.fail_on_failed |= overrides.fail_on_failed;
    }

    /// Reject configurations that cannot work before touching the network
    pub fn validate(&self) -> Result<()> {
        if self.servarr.base_url.trim().is_empty() {
            return Err(BackupError::Config("No base url specified".into()));
        }
        if self.servarr.api_key.trim().is_empty() {
            return Err(BackupError::Config("No api key specified".into()));
        }
        if self.run.extract && self.output_target().is_stdout() {
            return Err(BackupError::Config(
                "Extract and output to stdout are mutually exclusive".into(),
            ));
        }
        self.timeout()?;
        Ok(())
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig::new(
            self.servarr.base_url.trim(),
            self.servarr.api_key.trim(),
            self.servarr.api_version,
        )
    }

    /// Overall deadline for the run, if one was configured
    pub fn timeout(&self) -> Result<Option<Duration>> {
        match self.run.timeout.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => humantime::parse_duration(raw)
                .map(Some)
                .map_err(|e| BackupError::Config(format!("invalid timeout '{}': {}", raw, e))),
        }
    }

    pub fn output_target(&self) -> OutputTarget {
        OutputTarget::parse(&self.run.output)
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            output: self.output_target(),
            extract: self.run.extract,
            delete_after: self.run.delete,
            staging_dir: self.run.temp_dir.clone(),
        }
    }
}
