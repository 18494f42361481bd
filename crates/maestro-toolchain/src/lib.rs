//! Maestro Toolchain Management
//!
//! Handles the one-time setup that makes Maestro drive physical iOS devices:
//! - Maestro detection and version checks
//! - Patched JAR installation (with backup of the originals)
//! - XCTest runner project download

pub mod downloader;
pub mod maestro;
pub mod setup;

pub use downloader::BundleDownloader;
pub use maestro::{find_lib_in_script, parse_version, MaestroCli};
pub use setup::{run_setup, ProgressCallback, SetupReport, SetupStep};

use std::path::PathBuf;

/// Patch-notice flag that only patched Maestro builds advertise
pub const PATCHED_FLAG: &str = "driver-host-port";

/// Download and extraction errors
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Extraction failed: {0}")]
    Extraction(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Archive entry escapes the target directory: {0}")]
    UnsafeEntry(String),
}

/// Setup errors
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("Maestro not found. Install from: https://maestro.mobile.dev/")]
    MaestroNotInstalled,
    #[error("Unsupported Maestro version: {version}. Supported versions: {supported}")]
    UnsupportedVersion { version: String, supported: String },
    #[error("maestro not in PATH")]
    MaestroNotInPath,
    #[error("Maestro lib directory not found")]
    LibNotFound,
    #[error("Home directory not found")]
    NoHomeDir,
    #[error("Failed to back up {}: {source}", .path.display())]
    Backup { path: PathBuf, source: std::io::Error },
    #[error("Failed to download {bundle}: {source}")]
    Download { bundle: String, source: DownloadError },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
