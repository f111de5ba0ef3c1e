//! Backup lifecycle client for the servarr API.
//!
//! Drives the whole conversation with one Sonarr/Radarr/Lidarr instance:
//! - `POST /command` to start a backup
//! - `GET /command/{id}` on a fixed cadence until it reports `completed`
//! - `GET /system/backup` to find the newest manual backup, then stream it
//! - `DELETE /system/backup/{id}` once the caller is done with it
//!
//! Every network await races the caller's [`CancellationToken`]. When the
//! token fires first the request future is dropped and the call returns
//! [`BackupError::Cancelled`].

pub mod models;

pub use models::{latest_manual_backup, BackupJob, BackupKind, BackupRecord, CommandStatus};

use crate::config::ClientConfig;
use crate::transfer::progress::describe_progress;
use crate::transfer::progress_stream::ProgressStream;
use crate::utils::errors::{BackupError, Result};
use futures_util::TryStreamExt;
use models::CommandRequest;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Fixed delay between two status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

const BACKUP_COMMAND: &str = "Backup";
const API_KEY_HEADER: &str = "X-Api-Key";
const PROGRESS_LOG_INTERVAL: Duration = Duration::from_secs(2);

/// Live response body of a backup download. Dropping it closes the connection.
pub type BackupStream = Pin<Box<dyn AsyncRead + Send>>;

/// A backup archive being downloaded, plus the record it came from
pub struct DownloadedBackup {
    pub record: BackupRecord,
    pub body: BackupStream,
}

impl std::fmt::Debug for DownloadedBackup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadedBackup")
            .field("record", &self.record)
            .finish_non_exhaustive()
    }
}

/// Client for one servarr instance.
///
/// The HTTP transport is owned by the caller and handed in, so tests can
/// point it at a fake server and the CLI can share one connection pool.
#[derive(Debug, Clone)]
pub struct ServarrClient {
    config: ClientConfig,
    http: reqwest::Client,
    poll_interval: Duration,
    fail_on_failed_status: bool,
}

impl ServarrClient {
    pub fn new(config: ClientConfig, http: reqwest::Client) -> Self {
        Self {
            config,
            http,
            poll_interval: DEFAULT_POLL_INTERVAL,
            fail_on_failed_status: false,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Treat a `failed` command status as terminal instead of polling on
    /// until the deadline.
    pub fn with_fail_on_failed_status(mut self, enabled: bool) -> Self {
        self.fail_on_failed_status = enabled;
        self
    }

    /// Ask the server to create a new backup
    pub async fn start_backup(&self, cancel: &CancellationToken) -> Result<BackupJob> {
        let url = self.config.api_url("/command");
        let request = self
            .request(Method::POST, &url)
            .json(&CommandRequest { name: BACKUP_COMMAND });

        let job: BackupJob = self.fetch_json(request, &url, cancel).await?;
        info!("Backup command {} accepted (status: {})", job.id, job.status);
        Ok(job)
    }

    /// Poll the command until it reports `completed`.
    ///
    /// The first poll happens one interval after the call. Any other status
    /// means another wait, unless `with_fail_on_failed_status` was set.
    pub async fn wait(&self, job: &BackupJob, cancel: &CancellationToken) -> Result<()> {
        let url = self.config.api_url(&format!("/command/{}", job.id));
        let mut ticker = interval_at(Instant::now() + self.poll_interval, self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut polls: u64 = 0;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Stopped waiting for backup command {} after {} polls", job.id, polls);
                    return Err(BackupError::Cancelled);
                }
                _ = ticker.tick() => {}
            }

            if cancel.is_cancelled() {
                return Err(BackupError::Cancelled);
            }

            let current: BackupJob = self
                .fetch_json(self.request(Method::GET, &url), &url, cancel)
                .await?;
            polls += 1;

            match current.status {
                CommandStatus::Completed => {
                    info!("Backup command {} completed after {} polls", job.id, polls);
                    return Ok(());
                }
                CommandStatus::Failed if self.fail_on_failed_status => {
                    return Err(BackupError::JobFailed { id: job.id });
                }
                status => debug!("Backup command {} is {}", job.id, status),
            }
        }
    }

    /// Find the newest manual backup and start downloading it
    pub async fn download_latest_backup(
        &self,
        cancel: &CancellationToken,
    ) -> Result<DownloadedBackup> {
        let url = self.config.api_url("/system/backup");
        let records: Vec<BackupRecord> = self
            .fetch_json(self.request(Method::GET, &url), &url, cancel)
            .await?;
        debug!("Server lists {} backups", records.len());

        let record = latest_manual_backup(records).ok_or(BackupError::NoManualBackup)?;
        info!("Downloading backup {} ({})", record.id, record);

        let download_url = format!("{}{}", self.config.base_url(), record.path);
        let response = self
            .send(self.request(Method::GET, &download_url), cancel)
            .await?
            .error_for_status()?;
        let content_length = response.content_length();

        let chunks = Box::pin(response.bytes_stream().map_err(std::io::Error::other));
        let record_id = record.id;
        let progress = ProgressStream::new(
            chunks,
            PROGRESS_LOG_INTERVAL,
            Arc::new(move |read: u64| {
                debug!("Backup {}: {}", record_id, describe_progress(read, content_length))
            }),
        );

        Ok(DownloadedBackup {
            record,
            body: Box::pin(StreamReader::new(progress)),
        })
    }

    /// Remove a backup from the server. Irreversible.
    ///
    /// A non-success status is logged and otherwise ignored.
    pub async fn delete(&self, record: &BackupRecord, cancel: &CancellationToken) -> Result<()> {
        let url = self.config.api_url(&format!("/system/backup/{}", record.id));
        let response = self.send(self.request(Method::DELETE, &url), cancel).await?;

        if response.status().is_success() {
            info!("Deleted backup {} from server", record.id);
        } else {
            warn!(
                "Server answered {} when deleting backup {}",
                response.status(),
                record.id
            );
        }
        Ok(())
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.http
            .request(method, url)
            .header(API_KEY_HEADER, self.config.api_key())
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json")
    }

    async fn send(&self, request: RequestBuilder, cancel: &CancellationToken) -> Result<Response> {
        Ok(until_cancelled(cancel, request.send()).await??)
    }

    async fn fetch_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        endpoint: &str,
        cancel: &CancellationToken,
    ) -> Result<T> {
        let response = self.send(request, cancel).await?.error_for_status()?;
        let body = until_cancelled(cancel, response.bytes()).await??;

        serde_json::from_slice(&body).map_err(|source| BackupError::Decode {
            endpoint: endpoint.to_string(),
            source,
        })
    }
}

/// Run `fut` unless the token fires first; a fired token wins ties.
pub async fn until_cancelled<F: Future>(cancel: &CancellationToken, fut: F) -> Result<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(BackupError::Cancelled),
        output = fut => Ok(output),
    }
}
