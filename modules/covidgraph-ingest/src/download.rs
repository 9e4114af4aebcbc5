//! Source downloads and archive extraction.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::StatusCode;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{IngestError, Result};

/// Local file name of the JHU repository archive.
pub const JHU_FILE_NAME: &str = "jhu_covid19.zip";

/// Max attempts for transient download failures.
const DOWNLOAD_MAX_ATTEMPTS: u32 = 4;

/// Base delay for download retries (2s, 6s, 18s).
const DOWNLOAD_RETRY_BASE: Duration = Duration::from_secs(2);

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Serialize)]
pub struct DownloadOutcome {
    pub path: PathBuf,
    /// The file already existed and was kept.
    pub skipped: bool,
    pub bytes: u64,
}

/// Fetches source files over HTTP into the data directory.
pub struct Downloader {
    client: reqwest::Client,
}

impl Downloader {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .build()?;
        Ok(Self { client })
    }

    /// Download `url` to `target`. With `skip_existing`, an existing file is
    /// returned untouched.
    pub async fn fetch(&self, url: &str, target: &Path, skip_existing: bool) -> Result<DownloadOutcome> {
        if skip_existing {
            if let Ok(meta) = tokio::fs::metadata(target).await {
                info!(file = %target.display(), "File exists, skipping download");
                return Ok(DownloadOutcome {
                    path: target.to_path_buf(),
                    skipped: true,
                    bytes: meta.len(),
                });
            }
        }

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| IngestError::io(parent, e))?;
        }

        info!(url, file = %target.display(), "Downloading");
        let body = self.get_with_retry(url).await?;

        let partial = partial_path(target);
        tokio::fs::write(&partial, &body)
            .await
            .map_err(|e| IngestError::io(&partial, e))?;
        tokio::fs::rename(&partial, target)
            .await
            .map_err(|e| IngestError::io(target, e))?;

        info!(file = %target.display(), bytes = body.len(), "Download complete");
        Ok(DownloadOutcome {
            path: target.to_path_buf(),
            skipped: false,
            bytes: body.len() as u64,
        })
    }

    async fn get_with_retry(&self, url: &str) -> Result<Vec<u8>> {
        let mut attempt = 0;
        loop {
            let err = match self.client.get(url).send().await {
                Ok(resp) if resp.status().is_success() => match resp.bytes().await {
                    Ok(body) => return Ok(body.to_vec()),
                    Err(e) => IngestError::Http(e),
                },
                Ok(resp) => IngestError::HttpStatus {
                    url: url.to_string(),
                    status: resp.status().as_u16(),
                },
                Err(e) => IngestError::Http(e),
            };

            if !is_transient(&err) || attempt + 1 >= DOWNLOAD_MAX_ATTEMPTS {
                return Err(err);
            }
            let backoff = DOWNLOAD_RETRY_BASE * 3u32.pow(attempt);
            warn!(url, attempt = attempt + 1, error = %err, ?backoff, "Download failed, retrying");
            tokio::time::sleep(backoff).await;
            attempt += 1;
        }
    }
}

fn is_transient(err: &IngestError) -> bool {
    match err {
        IngestError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request() || e.is_body(),
        IngestError::HttpStatus { status, .. } => StatusCode::from_u16(*status)
            .map(|s| s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS)
            .unwrap_or(false),
        _ => false,
    }
}

fn partial_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().unwrap_or_default().to_os_string();
    name.push(".partial");
    target.with_file_name(name)
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractOutcome {
    pub dir: PathBuf,
    /// The target already existed and was reused.
    pub reused: bool,
    pub entries: u64,
    pub skipped_entries: u64,
}

/// Unpack `<dir>/<name>.zip` into `<dir>/<name>/`.
///
/// An existing target is returned as-is unless `overwrite` is set, in which
/// case it is removed first. Entries whose path would escape the target are
/// skipped. Synchronous; call from the blocking pool.
pub fn extract_archive(zip_path: &Path, overwrite: bool) -> Result<ExtractOutcome> {
    let stem = zip_path
        .file_stem()
        .ok_or_else(|| IngestError::Other(anyhow::anyhow!("archive path has no file name: {}", zip_path.display())))?;
    let parent = zip_path.parent().unwrap_or_else(|| Path::new("."));
    let target = parent.join(stem);

    if target.exists() {
        if !overwrite {
            info!(dir = %target.display(), "Extracted directory exists, reusing it");
            return Ok(ExtractOutcome {
                dir: target,
                reused: true,
                entries: 0,
                skipped_entries: 0,
            });
        }
        info!(dir = %target.display(), "Removing previous extraction");
        std::fs::remove_dir_all(&target).map_err(|e| IngestError::io(&target, e))?;
    }

    let staging = partial_path(&target);
    if staging.exists() {
        std::fs::remove_dir_all(&staging).map_err(|e| IngestError::io(&staging, e))?;
    }

    let file = File::open(zip_path).map_err(|e| IngestError::io(zip_path, e))?;
    let mut archive = zip::ZipArchive::new(file)?;
    let mut outcome = ExtractOutcome {
        dir: target.clone(),
        reused: false,
        entries: 0,
        skipped_entries: 0,
    };

    info!(archive = %zip_path.display(), dir = %target.display(), entries = archive.len(), "Extracting archive");
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let Some(relative) = entry.enclosed_name() else {
            warn!(entry = entry.name(), "Skipping archive entry with unsafe path");
            outcome.skipped_entries += 1;
            continue;
        };
        let out = staging.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&out).map_err(|e| IngestError::io(&out, e))?;
            continue;
        }
        if let Some(dir) = out.parent() {
            std::fs::create_dir_all(dir).map_err(|e| IngestError::io(dir, e))?;
        }
        let mut dest = File::create(&out).map_err(|e| IngestError::io(&out, e))?;
        std::io::copy(&mut entry, &mut dest).map_err(|e| IngestError::io(&out, e))?;
        outcome.entries += 1;
    }

    std::fs::create_dir_all(&staging).map_err(|e| IngestError::io(&staging, e))?;
    std::fs::rename(&staging, &target).map_err(|e| IngestError::io(&target, e))?;
    debug!(dir = %target.display(), files = outcome.entries, "Extraction complete");
    Ok(outcome)
}
