//! Single-photo and bulk-archive downloads
//!
//! Payloads are written to a temporary file in the download directory and
//! only renamed into place once complete, so a failed download leaves the
//! directory as it was.

use crate::api::PhotoApi;
use futures::StreamExt;
use pds_common::Identity;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("Registration ID required")]
    MissingIdentity,

    #[error("An archive download is already running")]
    Busy,

    #[error("Archive generation failed: {0}")]
    ArchiveGenerationFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of a single-photo download
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhotoDownload {
    /// Saved locally
    Saved(PathBuf),
    /// Download failed; the remote URL was handed to the system opener instead
    OpenedExternally { url: String },
    /// Neither download nor fallback worked
    Unavailable { url: String, reason: String },
}

/// Opens a URL outside the client (browser, image viewer)
pub trait UrlOpener: Send + Sync {
    fn open(&self, url: &str) -> std::io::Result<()>;
}

/// Platform opener (`xdg-open`, `open` or `start`)
pub struct SystemOpener;

impl UrlOpener for SystemOpener {
    fn open(&self, url: &str) -> std::io::Result<()> {
        let mut command = if cfg!(target_os = "macos") {
            let mut c = Command::new("open");
            c.arg(url);
            c
        } else if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", "start", "", url]);
            c
        } else {
            let mut c = Command::new("xdg-open");
            c.arg(url);
            c
        };
        command.spawn().map(|_| ())
    }
}

/// File name for a single saved photo
pub fn photo_file_name(unix_millis: i64) -> String {
    format!("pds-match-{}.jpg", unix_millis)
}

/// File name for an identity's archive
pub fn archive_file_name(identity: &Identity) -> String {
    format!("pds_photos_{}.zip", identity.short())
}

/// Clears the busy flag when the archive download ends or is dropped
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct DownloadCoordinator {
    api: Arc<dyn PhotoApi>,
    opener: Arc<dyn UrlOpener>,
    download_dir: PathBuf,
    archive_busy: AtomicBool,
}

impl DownloadCoordinator {
    pub fn new(
        api: Arc<dyn PhotoApi>,
        opener: Arc<dyn UrlOpener>,
        download_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            api,
            opener,
            download_dir: download_dir.into(),
            archive_busy: AtomicBool::new(false),
        }
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    pub fn is_downloading_archive(&self) -> bool {
        self.archive_busy.load(Ordering::Acquire)
    }

    fn temp_file(&self) -> std::io::Result<NamedTempFile> {
        std::fs::create_dir_all(&self.download_dir)?;
        tempfile::Builder::new()
            .prefix(".pds-")
            .suffix(".part")
            .tempfile_in(&self.download_dir)
    }

    /// Save one photo locally, falling back to opening the remote URL
    pub async fn download_photo(&self, url: &str) -> PhotoDownload {
        match self.save_photo(url).await {
            Ok(path) => {
                info!(path = %path.display(), "Photo saved");
                PhotoDownload::Saved(path)
            }
            Err(e) => {
                error!("Download failed: {}", e);
                match self.opener.open(url) {
                    Ok(()) => PhotoDownload::OpenedExternally {
                        url: url.to_string(),
                    },
                    Err(open_err) => {
                        warn!("Could not open {} externally: {}", url, open_err);
                        PhotoDownload::Unavailable {
                            url: url.to_string(),
                            reason: e.to_string(),
                        }
                    }
                }
            }
        }
    }

    async fn save_photo(&self, url: &str) -> anyhow::Result<PathBuf> {
        let bytes = self.api.fetch_bytes(url).await?;
        let mut tmp = self.temp_file()?;
        {
            let mut file = tokio::fs::File::from_std(tmp.as_file().try_clone()?);
            file.write_all(&bytes).await?;
            file.flush().await?;
        }

        let millis = pds_common::time::unix_millis();
        let mut suffix = 0u32;
        loop {
            let name = if suffix == 0 {
                photo_file_name(millis)
            } else {
                format!("pds-match-{}-{}.jpg", millis, suffix)
            };
            let target = self.download_dir.join(name);
            match tmp.persist_noclobber(&target) {
                Ok(_) => return Ok(target),
                Err(e) if e.error.kind() == ErrorKind::AlreadyExists => {
                    tmp = e.file;
                    suffix += 1;
                }
                Err(e) => return Err(e.error.into()),
            }
        }
    }

    /// Stream the server-built archive for `identity` into the download directory
    ///
    /// Safe to repeat after a failure: nothing is left behind and the same
    /// file name is produced on success.
    pub async fn download_all(
        &self,
        identity: Option<&Identity>,
    ) -> Result<PathBuf, DownloadError> {
        let identity = identity.ok_or(DownloadError::MissingIdentity)?;

        if self
            .archive_busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Archive download already running");
            return Err(DownloadError::Busy);
        }
        let _busy = BusyGuard(&self.archive_busy);

        let mut body = self
            .api
            .download_archive(identity)
            .await
            .map_err(|e| DownloadError::ArchiveGenerationFailed(e.to_string()))?;

        let tmp = self.temp_file()?;
        let mut written: u64 = 0;
        {
            let mut file = tokio::fs::File::from_std(tmp.as_file().try_clone()?);
            while let Some(chunk) = body.next().await {
                let chunk =
                    chunk.map_err(|e| DownloadError::ArchiveGenerationFailed(e.to_string()))?;
                file.write_all(&chunk).await?;
                written += chunk.len() as u64;
            }
            file.flush().await?;
        }

        let target = self.download_dir.join(archive_file_name(identity));
        tmp.persist(&target).map_err(|e| DownloadError::Io(e.error))?;
        info!(path = %target.display(), bytes = written, "Archive saved");
        Ok(target)
    }
}
