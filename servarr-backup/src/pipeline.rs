//! Backup run: start → wait → download → write/extract → optional delete.
//!
//! Ordering guarantees:
//! - the download is only attempted once `wait` reported completion
//! - the remote delete is only attempted after the download started
//!   successfully, and then runs even if writing or extracting failed

use crate::archive::{self, ExtractSummary, OutputTarget};
use crate::client::{until_cancelled, BackupRecord, DownloadedBackup, ServarrClient};
use crate::utils::errors::{BackupError, Result};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// What to do with the downloaded archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    /// File or stdout for the raw zip; target directory when extracting
    pub output: OutputTarget,
    pub extract: bool,
    /// Remove the backup from the server once it has been fetched
    pub delete_after: bool,
    /// Where the zip is staged before extraction (OS temp dir if unset)
    pub staging_dir: Option<PathBuf>,
}

/// Outcome of a successful run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub job_id: i64,
    pub record: BackupRecord,
    /// Size of the zip as received, before any extraction
    pub bytes: u64,
    pub extracted: Option<ExtractSummary>,
    pub deleted: bool,
}

pub async fn run(
    client: &ServarrClient,
    options: &RunOptions,
    cancel: &CancellationToken,
) -> Result<RunSummary> {
    let job = client.start_backup(cancel).await?;
    client.wait(&job, cancel).await?;

    let download = client.download_latest_backup(cancel).await?;
    let record = download.record.clone();

    let written = materialize(download, options, cancel).await;

    let deleted = if options.delete_after {
        match client.delete(&record, cancel).await {
            Ok(()) => true,
            Err(e) if written.is_err() => {
                error!("Failed to delete backup {} from server: {}", record.id, e);
                false
            }
            Err(e) => return Err(e),
        }
    } else {
        false
    };

    let (bytes, extracted) = written?;
    info!("Backup {} from command {} done", record.id, job.id);

    Ok(RunSummary {
        job_id: job.id,
        record,
        bytes,
        extracted,
        deleted,
    })
}

/// Consumes the download so the connection is closed before any delete.
async fn materialize(
    mut download: DownloadedBackup,
    options: &RunOptions,
    cancel: &CancellationToken,
) -> Result<(u64, Option<ExtractSummary>)> {
    if !options.extract {
        let bytes =
            until_cancelled(cancel, archive::pass_through(&mut download.body, &options.output))
                .await??;
        return Ok((bytes, None));
    }

    let target = match &options.output {
        OutputTarget::File(path) => path.clone(),
        OutputTarget::Stdout => {
            return Err(BackupError::Config(
                "Extract and output to stdout are mutually exclusive".into(),
            ))
        }
    };

    // extract watches the token itself so the unpacking thread has stopped
    // writing before anything else (like the remote delete) happens
    let summary = archive::extract(
        &mut download.body,
        &target,
        options.staging_dir.as_deref(),
        cancel,
    )
    .await?;
    Ok((summary.archive_bytes, Some(summary)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use serde_json::json;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};
    use zip::write::SimpleFileOptions;

    fn client_for(server: &MockServer) -> ServarrClient {
        client_with_http(server, reqwest::Client::new())
    }

    fn client_with_http(server: &MockServer, http: reqwest::Client) -> ServarrClient {
        ServarrClient::new(ClientConfig::new(server.uri(), "key", 3), http)
            .with_poll_interval(Duration::from_millis(10))
    }

    /// Requests give up after 500ms; pair with a delayed mock to make one fail
    fn impatient_http() -> reqwest::Client {
        reqwest::Client::builder()
            .timeout(Duration::from_millis(500))
            .build()
            .unwrap()
    }

    async fn mount_hanging_delete(server: &MockServer) {
        Mock::given(method("DELETE"))
            .and(path("/api/v3/system/backup/7"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
            .expect(1)
            .mount(server)
            .await;
    }

    fn file_options(output: PathBuf) -> RunOptions {
        RunOptions {
            output: OutputTarget::File(output),
            extract: false,
            delete_after: false,
            staging_dir: None,
        }
    }

    async fn mount_start(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/api/v3/command"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "id": 42, "status": "queued" })),
            )
            .expect(1)
            .mount(server)
            .await;
    }

    async fn mount_wait(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/api/v3/command/42"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "id": 42, "status": "started" })),
            )
            .up_to_n_times(1)
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v3/command/42"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "id": 42, "status": "completed" })),
            )
            .mount(server)
            .await;
    }

    async fn mount_download(server: &MockServer, body: Vec<u8>) {
        Mock::given(method("GET"))
            .and(path("/api/v3/system/backup"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "id": 7, "path": "/backup/7/download", "type": "manual" }
            ])))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/backup/7/download"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
            .expect(1)
            .mount(server)
            .await;
    }

    async fn mount_delete(server: &MockServer, times: u64) {
        Mock::given(method("DELETE"))
            .and(path("/api/v3/system/backup/7"))
            .respond_with(ResponseTemplate::new(200))
            .expect(times)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_full_run_to_file() {
        let server = MockServer::start().await;
        let archive: Vec<u8> = (0..1024u32).map(|i| (i % 256) as u8).collect();
        mount_start(&server).await;
        mount_wait(&server).await;
        mount_download(&server, archive.clone()).await;
        mount_delete(&server, 0).await;

        let out_dir = TempDir::new().unwrap();
        let output = out_dir.path().join("sonarr.zip");

        let summary = run(
            &client_for(&server),
            &file_options(output.clone()),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(summary.job_id, 42);
        assert_eq!(summary.record.id, 7);
        assert_eq!(summary.bytes, 1024);
        assert!(!summary.deleted);
        assert!(summary.extracted.is_none());
        assert_eq!(std::fs::read(&output).unwrap(), archive);
    }

    #[tokio::test]
    async fn test_run_deletes_after_download() {
        let server = MockServer::start().await;
        mount_start(&server).await;
        mount_wait(&server).await;
        mount_download(&server, b"zip bytes".to_vec()).await;
        mount_delete(&server, 1).await;

        let out_dir = TempDir::new().unwrap();
        let mut options = file_options(out_dir.path().join("radarr.zip"));
        options.delete_after = true;

        let summary = run(&client_for(&server), &options, &CancellationToken::new())
            .await
            .unwrap();
        assert!(summary.deleted);
    }

    #[tokio::test]
    async fn test_run_extracts_archive() {
        let mut zip_data = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut zip_data));
            zip.start_file("config.xml", SimpleFileOptions::default())
                .unwrap();
            zip.write_all(b"<Config></Config>").unwrap();
            zip.finish().unwrap();
        }

        let zip_len = zip_data.len() as u64;
        let server = MockServer::start().await;
        mount_start(&server).await;
        mount_wait(&server).await;
        mount_download(&server, zip_data).await;

        let target = TempDir::new().unwrap();
        let mut options = file_options(target.path().to_path_buf());
        options.extract = true;

        let summary = run(&client_for(&server), &options, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.bytes, zip_len);
        assert_eq!(summary.extracted.map(|s| s.files), Some(1));
        assert_eq!(
            std::fs::read_to_string(target.path().join("config.xml")).unwrap(),
            "<Config></Config>"
        );
    }

    #[tokio::test]
    async fn test_delete_runs_when_extraction_fails() {
        let server = MockServer::start().await;
        mount_start(&server).await;
        mount_wait(&server).await;
        mount_download(&server, b"definitely not a zip".to_vec()).await;
        mount_delete(&server, 1).await;

        let target = TempDir::new().unwrap();
        let mut options = file_options(target.path().to_path_buf());
        options.extract = true;
        options.delete_after = true;

        let err = run(&client_for(&server), &options, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BackupError::Archive(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_no_delete_when_start_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v3/command"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        mount_delete(&server, 0).await;

        let out_dir = TempDir::new().unwrap();
        let mut options = file_options(out_dir.path().join("out.zip"));
        options.delete_after = true;

        let err = run(&client_for(&server), &options, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BackupError::Http(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_no_download_or_delete_when_wait_cancelled() {
        let server = MockServer::start().await;
        mount_start(&server).await;
        Mock::given(method("GET"))
            .and(path("/api/v3/command/42"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "id": 42, "status": "started" })),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v3/system/backup"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(0)
            .mount(&server)
            .await;
        mount_delete(&server, 0).await;

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(80)).await;
            trigger.cancel();
        });

        let out_dir = TempDir::new().unwrap();
        let mut options = file_options(out_dir.path().join("out.zip"));
        options.delete_after = true;

        let err = run(&client_for(&server), &options, &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_no_delete_without_manual_backup() {
        let server = MockServer::start().await;
        mount_start(&server).await;
        mount_wait(&server).await;
        Mock::given(method("GET"))
            .and(path("/api/v3/system/backup"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "id": 3, "path": "/backup/scheduled/3.zip", "type": "scheduled" }
            ])))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let out_dir = TempDir::new().unwrap();
        let mut options = file_options(out_dir.path().join("out.zip"));
        options.delete_after = true;

        let err = run(&client_for(&server), &options, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BackupError::NoManualBackup));
    }

    #[tokio::test]
    async fn test_failed_delete_does_not_hide_extraction_error() {
        let server = MockServer::start().await;
        mount_start(&server).await;
        mount_wait(&server).await;
        mount_download(&server, b"definitely not a zip".to_vec()).await;
        mount_hanging_delete(&server).await;

        let target = TempDir::new().unwrap();
        let mut options = file_options(target.path().to_path_buf());
        options.extract = true;
        options.delete_after = true;

        let client = client_with_http(&server, impatient_http());
        let err = run(&client, &options, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BackupError::Archive(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_failed_delete_fails_successful_run() {
        let server = MockServer::start().await;
        mount_start(&server).await;
        mount_wait(&server).await;
        mount_download(&server, b"zip bytes".to_vec()).await;
        mount_hanging_delete(&server).await;

        let out_dir = TempDir::new().unwrap();
        let output = out_dir.path().join("lidarr.zip");
        let mut options = file_options(output.clone());
        options.delete_after = true;

        let client = client_with_http(&server, impatient_http());
        let err = run(&client, &options, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, BackupError::Http(_)), "got {err:?}");
        // the archive itself was written before the delete was attempted
        assert_eq!(std::fs::read(&output).unwrap(), b"zip bytes");
    }
}
