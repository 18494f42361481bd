//! Setup
//!
//! Installs the patched Maestro JARs and the XCTest runner project.

use std::path::{Path, PathBuf};
use maestro_ios_core::ToolchainConfig;
use tracing::info;

use crate::downloader::{BundleDownloader, DEFAULT_TIMEOUT};
use crate::maestro::{backup_jars, MaestroCli};
use crate::SetupError;

/// Progress of a setup run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetupStep {
    Detected { version: String },
    BackingUp { lib_dir: PathBuf },
    BackedUp { count: usize },
    Downloading { bundle: String },
    Installed { bundle: String, dest: PathBuf },
}

/// Progress callback
pub type ProgressCallback = Box<dyn Fn(SetupStep) + Send + Sync>;

/// What a completed setup changed
#[derive(Debug, Clone)]
pub struct SetupReport {
    pub version: String,
    pub lib_dir: PathBuf,
    pub runner_dir: PathBuf,
    pub backed_up: usize,
}

/// Detect Maestro, back up its JARs, then install both bundles
pub async fn run_setup(
    config: &ToolchainConfig,
    runner_dir: &Path,
    progress: Option<ProgressCallback>,
) -> Result<SetupReport, SetupError> {
    let report = |step: SetupStep| {
        if let Some(ref callback) = progress {
            callback(step);
        }
    };

    let cli = MaestroCli::default();
    let version = cli.check_installed().await?.ok_or(SetupError::MaestroNotInstalled)?;
    report(SetupStep::Detected { version: version.clone() });

    if !config.is_supported_version(&version) {
        return Err(SetupError::UnsupportedVersion {
            version,
            supported: config.supported_versions.join(", "),
        });
    }

    let lib_dir = cli.find_lib_dir()?;
    let backup_dir = dirs::home_dir()
        .ok_or(SetupError::NoHomeDir)?
        .join(".maestro")
        .join("backup");

    report(SetupStep::BackingUp { lib_dir: lib_dir.clone() });
    let backed_up = backup_jars(&lib_dir, &backup_dir).await?;
    report(SetupStep::BackedUp { count: backed_up });

    let downloader = BundleDownloader::new(DEFAULT_TIMEOUT).map_err(|e| SetupError::Download {
        bundle: config.jars_bundle.clone(),
        source: e,
    })?;

    install_bundle(&downloader, config, &config.jars_bundle, &lib_dir, &report).await?;

    tokio::fs::create_dir_all(runner_dir).await?;
    install_bundle(&downloader, config, &config.runner_bundle, runner_dir, &report).await?;

    info!("Setup complete for Maestro {}", version);
    Ok(SetupReport {
        version,
        lib_dir,
        runner_dir: runner_dir.to_path_buf(),
        backed_up,
    })
}

async fn install_bundle(
    downloader: &BundleDownloader,
    config: &ToolchainConfig,
    bundle: &str,
    dest: &Path,
    report: &impl Fn(SetupStep),
) -> Result<(), SetupError> {
    report(SetupStep::Downloading { bundle: bundle.to_string() });

    downloader
        .download_and_extract(&config.bundle_url(bundle), dest)
        .await
        .map_err(|e| SetupError::Download { bundle: bundle.to_string(), source: e })?;

    report(SetupStep::Installed { bundle: bundle.to_string(), dest: dest.to_path_buf() });
    Ok(())
}
