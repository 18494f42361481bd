//! Bundle Downloader
//!
//! Fetches release bundles and unpacks them. Every archive entry is checked
//! before anything is written, so a hostile bundle leaves the target
//! directory untouched.

use std::path::{Path, PathBuf};
use std::time::Duration;
use futures::StreamExt;
use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tracing::{info, debug};

use crate::DownloadError;

/// Default request timeout for bundle downloads
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// HTTP downloader for release bundles
pub struct BundleDownloader {
    client: Client,
}

impl BundleDownloader {
    pub fn new(timeout: Duration) -> Result<Self, DownloadError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// Download `url` to `target`
    pub async fn download_file(&self, url: &str, target: &Path) -> Result<u64, DownloadError> {
        info!("Downloading {} to {:?}", url, target);

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(DownloadError::InvalidResponse(format!("HTTP {}", response.status())));
        }

        let mut file = tokio::fs::File::create(target).await?;
        let mut stream = response.bytes_stream();
        let mut downloaded: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
        }
        file.flush().await?;

        debug!("Downloaded {} bytes", downloaded);
        Ok(downloaded)
    }

    /// Download a zip bundle into a scratch file and extract it into `dest`
    pub async fn download_and_extract(&self, url: &str, dest: &Path) -> Result<(), DownloadError> {
        let scratch = tempfile::Builder::new()
            .prefix("maestro-")
            .suffix(".zip")
            .tempfile()?;

        self.download_file(url, scratch.path()).await?;
        extract_zip(scratch.path(), dest).await
    }
}

/// Extract a zip archive into `target_dir`
pub async fn extract_zip(archive: &Path, target_dir: &Path) -> Result<(), DownloadError> {
    info!("Extracting {:?} to {:?}", archive, target_dir);

    let archive = archive.to_path_buf();
    let target_dir = target_dir.to_path_buf();

    // zip is synchronous
    tokio::task::spawn_blocking(move || extract_zip_blocking(&archive, &target_dir))
        .await
        .map_err(|e| DownloadError::Extraction(e.to_string()))?
}

struct PlannedEntry {
    index: usize,
    path: PathBuf,
    is_dir: bool,
    mode: Option<u32>,
}

fn extract_zip_blocking(archive: &Path, target_dir: &Path) -> Result<(), DownloadError> {
    let file = std::fs::File::open(archive)?;
    let mut zip = zip::ZipArchive::new(file).map_err(|e| DownloadError::Extraction(e.to_string()))?;

    let mut plan = Vec::with_capacity(zip.len());
    for index in 0..zip.len() {
        let entry = zip.by_index(index).map_err(|e| DownloadError::Extraction(e.to_string()))?;
        let relative = entry
            .enclosed_name()
            .map(Path::to_path_buf)
            .ok_or_else(|| DownloadError::UnsafeEntry(entry.name().to_string()))?;

        plan.push(PlannedEntry {
            index,
            path: target_dir.join(relative),
            is_dir: entry.is_dir(),
            mode: entry.unix_mode(),
        });
    }

    for planned in plan {
        if planned.is_dir {
            std::fs::create_dir_all(&planned.path)?;
            continue;
        }

        if let Some(parent) = planned.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut entry = zip
            .by_index(planned.index)
            .map_err(|e| DownloadError::Extraction(e.to_string()))?;
        let mut outfile = std::fs::File::create(&planned.path)?;
        std::io::copy(&mut entry, &mut outfile)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = planned.mode {
                std::fs::set_permissions(&planned.path, std::fs::Permissions::from_mode(mode)).ok();
            }
        }
        #[cfg(not(unix))]
        let _ = planned.mode;
    }

    Ok(())
}
