//! Writing a downloaded backup to disk.
//!
//! The archive is either copied verbatim to a file or stdout, or staged to a
//! temporary file (zip needs to seek) and unpacked into a directory with the
//! permission bits recorded in each entry.

use crate::client::until_cancelled;
use crate::utils::errors::{BackupError, Result};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use zip::ZipArchive;

const STAGING_PREFIX: &str = "servarr.zip.";
const UNPACK_CHUNK: usize = 64 * 1024;

/// Where a non-extracted archive is written
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    Stdout,
    File(PathBuf),
}

impl OutputTarget {
    /// "-" means stdout, anything else is a path
    pub fn parse(raw: &str) -> Self {
        if raw == "-" {
            OutputTarget::Stdout
        } else {
            OutputTarget::File(PathBuf::from(raw))
        }
    }

    pub fn is_stdout(&self) -> bool {
        matches!(self, OutputTarget::Stdout)
    }
}

impl std::fmt::Display for OutputTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputTarget::Stdout => f.write_str("stdout"),
            OutputTarget::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// What an extraction produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    /// Size of the zip as received
    pub archive_bytes: u64,
    pub files: usize,
    pub directories: usize,
    /// Uncompressed bytes written to disk
    pub bytes: u64,
    /// Entries whose names would land outside the target directory
    pub skipped: usize,
}

/// Copy the archive byte-for-byte to `target`. Returns the bytes written.
pub async fn pass_through<R>(reader: &mut R, target: &OutputTarget) -> Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let written = match target {
        OutputTarget::Stdout => copy_to(reader, &mut tokio::io::stdout()).await?,
        OutputTarget::File(path) => {
            let mut file = tokio::fs::File::create(path).await?;
            let written = copy_to(reader, &mut file).await?;
            file.sync_all().await?;
            written
        }
    };

    info!("Wrote {} bytes to {}", written, target);
    Ok(written)
}

/// Copy everything from `reader` into `writer` and flush it
pub async fn copy_to<R, W>(reader: &mut R, writer: &mut W) -> Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let written = tokio::io::copy(reader, writer).await?;
    writer.flush().await?;
    Ok(written)
}

/// Stage the archive in `staging_dir` (OS temp dir by default) and unpack it
/// under `target_dir`.
///
/// The staging file is removed on every exit path. Once `cancel` fires no
/// further data is written under `target_dir`; this returns only after the
/// unpacking thread has stopped.
pub async fn extract<R>(
    reader: &mut R,
    target_dir: &Path,
    staging_dir: Option<&Path>,
    cancel: &CancellationToken,
) -> Result<ExtractSummary>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let staging_dir = staging_dir
        .map(Path::to_path_buf)
        .unwrap_or_else(std::env::temp_dir);
    let staging = tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .tempfile_in(&staging_dir)?;

    let mut staged = tokio::fs::File::from_std(staging.as_file().try_clone()?);
    let size = until_cancelled(cancel, copy_to(reader, &mut staged)).await??;
    drop(staged);
    debug!("Staged {} bytes at {}", size, staging.path().display());

    let target = target_dir.to_path_buf();
    let unpack_cancel = cancel.clone();
    let mut summary =
        tokio::task::spawn_blocking(move || unpack(staging, &target, &unpack_cancel))
            .await
            .map_err(io::Error::other)??;
    summary.archive_bytes = size;

    info!(
        "Extracted {} files and {} directories ({} bytes) to {}",
        summary.files,
        summary.directories,
        summary.bytes,
        target_dir.display()
    );
    Ok(summary)
}

/// Takes ownership of the staging file so it is deleted when unpacking ends.
/// The token is checked before every entry and between chunks of an entry.
fn unpack(
    staging: NamedTempFile,
    target_dir: &Path,
    cancel: &CancellationToken,
) -> Result<ExtractSummary> {
    let mut archive = ZipArchive::new(staging.reopen()?)?;
    let mut summary = ExtractSummary::default();

    fs::create_dir_all(target_dir)?;

    for index in 0..archive.len() {
        if cancel.is_cancelled() {
            info!("Extraction cancelled after {} entries", index);
            return Err(BackupError::Cancelled);
        }

        let mut entry = archive.by_index(index)?;
        let relative = match entry.enclosed_name() {
            Some(path) => path.to_path_buf(),
            None => {
                warn!("Skipping archive entry with unsafe path: {}", entry.name());
                summary.skipped += 1;
                continue;
            }
        };
        let destination = target_dir.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&destination)?;
            summary.directories += 1;
            continue;
        }

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = fs::File::create(&destination)?;
        summary.bytes += copy_entry(&mut entry, &mut file, cancel)?;
        drop(file);

        if let Some(mode) = entry.unix_mode() {
            apply_mode(&destination, mode)?;
        }
        summary.files += 1;
    }

    Ok(summary)
}

fn copy_entry<R: Read, W: Write>(
    entry: &mut R,
    out: &mut W,
    cancel: &CancellationToken,
) -> Result<u64> {
    let mut buf = vec![0u8; UNPACK_CHUNK];
    let mut written = 0u64;

    loop {
        if cancel.is_cancelled() {
            return Err(BackupError::Cancelled);
        }
        let n = match entry.read(&mut buf) {
            Ok(0) => return Ok(written),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        out.write_all(&buf[..n])?;
        written += n as u64;
    }
}

#[cfg(unix)]
fn apply_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777))
}

#[cfg(not(unix))]
fn apply_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}
