//! servarr-backup - Main entry point
//!
//! Starts a backup on a servarr, waits for it and writes the archive to a
//! file, stdout or an extracted directory tree.

use anyhow::{anyhow, Result};
use clap::Parser;
use servarr_backup::config::{Config, Overrides};
use servarr_backup::deadline::RunDeadline;
use servarr_backup::transfer::progress::format_bytes;
use servarr_backup::{pipeline, utils, ServarrClient};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Base url of the servarr
    #[arg(long = "baseurl", env = "SERVARR_BASEURL", value_name = "URL")]
    base_url: Option<String>,

    /// Api key for the servarr
    #[arg(long = "apikey", env = "SERVARR_APIKEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Api version, 1 for lidarr and 3 for radarr/sonarr [default: 3]
    #[arg(long = "apiversion")]
    api_version: Option<u32>,

    /// Where to output the zip file to (- is stdout) [default: -]
    #[arg(short, long, value_name = "PATH")]
    output: Option<String>,

    /// Extract the zip file into the output directory
    #[arg(long)]
    extract: bool,

    /// Delete the backup from the servarr afterwards
    #[arg(long)]
    delete: bool,

    /// Give up after this long, e.g. 90s, 5m, "1h 30m"
    #[arg(long)]
    timeout: Option<String>,

    /// Stop waiting when the backup command reports failure
    #[arg(long)]
    fail_on_failed: bool,

    /// Directory used to stage the zip before extraction
    #[arg(long, value_name = "DIR")]
    temp_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,
}

impl Args {
    fn overrides(self) -> Overrides {
        Overrides {
            base_url: self.base_url,
            api_key: self.api_key,
            api_version: self.api_version,
            output: self.output,
            extract: self.extract,
            delete: self.delete,
            timeout: self.timeout,
            fail_on_failed: self.fail_on_failed,
            temp_dir: self.temp_dir,
            log_level: self.log_level,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    config.apply(args.overrides());

    // Initialize logging
    utils::logger::init(&config.log.level)?;

    config.validate()?;
    let timeout = config.timeout()?;

    let client_config = config.client_config();
    tracing::info!(
        "Starting servarr-backup v{} against {} (api v{})",
        env!("CARGO_PKG_VERSION"),
        client_config.base_url(),
        client_config.api_version()
    );

    let http = reqwest::Client::builder()
        .user_agent(concat!("servarr-backup/", env!("CARGO_PKG_VERSION")))
        .build()?;
    let client = ServarrClient::new(client_config, http)
        .with_fail_on_failed_status(config.run.fail_on_failed);

    let mut deadline = RunDeadline::new(timeout);
    deadline.arm();

    let result = pipeline::run(&client, &config.run_options(), deadline.token()).await;
    deadline.disarm();

    match result {
        Ok(summary) => {
            tracing::info!(
                "Backup {} saved to {} ({}){}",
                summary.record.id,
                config.output_target(),
                format_bytes(summary.bytes),
                if summary.deleted { ", removed from server" } else { "" }
            );
            Ok(())
        }
        Err(e) if e.is_cancelled() => match deadline.cause() {
            Some(cause) => Err(anyhow!("{}: {}", cause, e)),
            None => Err(e.into()),
        },
        Err(e) => Err(e.into()),
    }
}
