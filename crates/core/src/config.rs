//! Application Configuration
//!
//! Manages all tool settings including:
//! - Session timing (timeouts, poll interval, settle delay)
//! - Port layout (auto-assign base port, device-side driver port)
//! - Harness project location and build toolchain
//! - Device bridge programs
//! - Patch bundle release location

use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::{Deserialize, Serialize};
use directories::ProjectDirs;
use tracing::{info, debug};

use crate::error::{CoreError, Result};

/// Session timing and port configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionConfig {
    /// First port tried when the local port is auto-assigned
    pub base_port: u16,
    /// Port the harness listens on inside the device
    pub device_port: u16,
    /// Hard wall-clock limit for the build subprocess
    pub build_timeout_secs: u64,
    /// Limit for the harness to report readiness in its log
    pub startup_timeout_secs: u64,
    /// Readiness poll interval in milliseconds
    pub poll_interval_ms: u64,
    /// Delay before checking that a tunnel is listening
    pub settle_delay_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            base_port: 6001,
            device_port: 22087,
            build_timeout_secs: 600,
            startup_timeout_secs: 90,
            poll_interval_ms: 500,
            settle_delay_ms: 500,
        }
    }
}

impl SessionConfig {
    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_secs)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

/// XCTest harness project configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HarnessConfig {
    /// Directory the runner bundle is installed into
    pub runner_dir: PathBuf,
    /// Xcode project file name inside `runner_dir`
    pub project: String,
    /// Scheme to build and test
    pub scheme: String,
    /// Build toolchain executable
    pub xcodebuild: PathBuf,
    /// Glob, relative to the derived-output directory, for run configurations
    pub run_configuration_glob: String,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            runner_dir: dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".maestro")
                .join("maestro-ios-xctest-runner"),
            project: "maestro-driver-ios.xcodeproj".to_string(),
            scheme: "maestro-driver-ios".to_string(),
            xcodebuild: PathBuf::from("xcodebuild"),
            run_configuration_glob: "Build/Products/*.xctestrun".to_string(),
        }
    }
}

impl HarnessConfig {
    /// Full path of the Xcode project
    pub fn project_path(&self) -> PathBuf {
        self.runner_dir.join(&self.project)
    }
}

/// Device communication programs (libimobiledevice)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BridgeConfig {
    pub iproxy: PathBuf,
    pub idevice_id: PathBuf,
    pub ideviceinfo: PathBuf,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            iproxy: PathBuf::from("iproxy"),
            idevice_id: PathBuf::from("idevice_id"),
            ideviceinfo: PathBuf::from("ideviceinfo"),
        }
    }
}

/// Patch bundle and Maestro compatibility settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolchainConfig {
    /// Base URL the release bundles are downloaded from
    pub release_url: String,
    /// Bundle replacing Maestro's driver JARs
    pub jars_bundle: String,
    /// Bundle containing the XCTest runner project
    pub runner_bundle: String,
    /// Maestro CLI versions the JAR bundle is built against
    pub supported_versions: Vec<String>,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            release_url: "https://github.com/devicelab-dev/maestro-ios-device/releases/latest/download"
                .to_string(),
            jars_bundle: "maestro-jars.zip".to_string(),
            runner_bundle: "maestro-ios-runner.zip".to_string(),
            supported_versions: vec!["2.0.9".to_string(), "2.0.10".to_string()],
        }
    }
}

impl ToolchainConfig {
    /// Download URL for a bundle file name
    pub fn bundle_url(&self, bundle: &str) -> String {
        format!("{}/{}", self.release_url.trim_end_matches('/'), bundle)
    }

    /// Check a Maestro version against the supported list
    pub fn is_supported_version(&self, version: &str) -> bool {
        self.supported_versions.iter().any(|v| v == version)
    }
}

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    pub session: SessionConfig,
    pub harness: HarnessConfig,
    pub bridge: BridgeConfig,
    pub toolchain: ToolchainConfig,
}

impl AppConfig {
    /// Get the configuration directory path
    pub fn config_dir() -> Option<PathBuf> {
        ProjectDirs::from("dev", "devicelab", "maestro-ios-device")
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the configuration file path
    pub fn config_file() -> Option<PathBuf> {
        Self::config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Load configuration from an explicit file, or from the default
    /// location when `path` is `None`. A missing default file yields
    /// the built-in defaults; a missing explicit file is an error.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let (config_file, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => match Self::config_file() {
                Some(p) => (p, false),
                None => {
                    debug!("No config directory on this platform, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        if config_file.exists() {
            debug!("Loading config from {:?}", config_file);
            let contents = tokio::fs::read_to_string(&config_file).await?;
            Ok(Self::from_toml(&contents)?)
        } else if explicit {
            Err(CoreError::Config(format!("config file {} not found", config_file.display())))
        } else {
            info!("Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Parse configuration from TOML text. Absent keys take defaults.
    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Save configuration to file
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let contents = toml::to_string_pretty(self)?;
        tokio::fs::write(path, contents).await?;

        debug!("Config saved to {:?}", path);
        Ok(())
    }
}
