//! Session errors
//!
//! Every stage failure ends the session. Errors name the log file to read
//! instead of carrying log contents.

use std::path::PathBuf;
use thiserror::Error;

use maestro_ios_bridge::{DeviceError, PortError, TunnelError};
use maestro_ios_core::CoreError;
use maestro_ios_harness::{BuildError, FailureReason, HarnessError};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("port {0} already in use")]
    PortInUse(u16),

    #[error("no free port found from {0} upward")]
    NoFreePort(u16),

    #[error("device {0} not found")]
    DeviceNotFound(String),

    #[error("device lookup failed: {0}")]
    DeviceLookup(String),

    #[error("invalid device target: {0}")]
    InvalidTarget(String),

    #[error("iOS runner not found at {}", .0.display())]
    RunnerNotInstalled(PathBuf),

    #[error("build failed: {reason} (see {})", .log_path.display())]
    ToolchainFailure { reason: String, log_path: PathBuf },

    #[error("no run configuration matching {pattern} found")]
    ArtifactNotFound { pattern: String },

    #[error("failed to launch harness: {0}")]
    HarnessLaunch(String),

    #[error("startup timeout (see {})", .log_path.display())]
    StartupTimeout { log_path: PathBuf },

    #[error("{} (see {})", FailureReason::CertificateNotTrusted, .log_path.display())]
    CertificateNotTrusted { log_path: PathBuf },

    #[error("{} (see {})", FailureReason::RunnerFailed, .log_path.display())]
    RunnerFailed { log_path: PathBuf },

    #[error("port forward failed {local_port}->{device_port}: {reason}")]
    PortForwardFailure { local_port: u16, device_port: u16, reason: String },

    #[error("port {0} not forwarded")]
    TunnelNotVerified(u16),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("session cancelled")]
    Cancelled,
}

impl SessionError {
    /// Signal-triggered shutdown, not a failure
    pub fn is_cancellation(&self) -> bool {
        matches!(self, SessionError::Cancelled)
    }

    /// What the user can do about it, when there is something
    pub fn remediation(&self) -> Option<&'static str> {
        match self {
            SessionError::CertificateNotTrusted { .. } => Some(
                "On the device open Settings > General > VPN & Device Management and trust the developer certificate, then run again",
            ),
            SessionError::RunnerNotInstalled(_) => Some("Run: maestro-ios-device setup"),
            SessionError::PortInUse(_) => {
                Some("Choose another --driver-host-port, or omit it to auto-assign")
            }
            SessionError::DeviceNotFound(_) => {
                Some("Check the device is connected, unlocked and trusts this computer (idevice_id -l)")
            }
            SessionError::DeviceLookup(_) => Some("Install libimobiledevice: brew install libimobiledevice"),
            SessionError::ToolchainFailure { .. } => {
                Some("Check the team ID can sign for this device and Xcode can see it")
            }
            SessionError::PortForwardFailure { .. } | SessionError::TunnelNotVerified(_) => {
                Some("Check iproxy is installed and the device is still connected")
            }
            _ => None,
        }
    }
}

impl From<PortError> for SessionError {
    fn from(err: PortError) -> Self {
        match err {
            PortError::InUse(port) => SessionError::PortInUse(port),
            PortError::NoFreePort { base_port } => SessionError::NoFreePort(base_port),
        }
    }
}

impl From<DeviceError> for SessionError {
    fn from(err: DeviceError) -> Self {
        match err {
            DeviceError::NotFound(udid) => SessionError::DeviceNotFound(udid),
            other => SessionError::DeviceLookup(other.to_string()),
        }
    }
}

impl From<BuildError> for SessionError {
    fn from(err: BuildError) -> Self {
        match err {
            BuildError::RunnerNotInstalled(path) => SessionError::RunnerNotInstalled(path),
            BuildError::ToolchainFailure { reason, log_path } => {
                SessionError::ToolchainFailure { reason, log_path }
            }
            BuildError::ArtifactNotFound { pattern } => SessionError::ArtifactNotFound { pattern },
            BuildError::InvalidPattern(pattern) => {
                SessionError::Config(format!("invalid run configuration pattern {}", pattern))
            }
            BuildError::Cancelled => SessionError::Cancelled,
            BuildError::Io(e) => SessionError::Io(e),
        }
    }
}

impl From<HarnessError> for SessionError {
    fn from(err: HarnessError) -> Self {
        match err {
            HarnessError::StartupTimeout { log_path } => SessionError::StartupTimeout { log_path },
            HarnessError::CertificateNotTrusted { log_path } => {
                SessionError::CertificateNotTrusted { log_path }
            }
            HarnessError::RunnerFailed { log_path } => SessionError::RunnerFailed { log_path },
            HarnessError::RunConfigurationMissing(path) => SessionError::ArtifactNotFound {
                pattern: path.display().to_string(),
            },
            HarnessError::Cancelled => SessionError::Cancelled,
            HarnessError::Io(e) => SessionError::Io(e),
            other @ (HarnessError::AlreadyStarted | HarnessError::Launch(_)) => {
                SessionError::HarnessLaunch(other.to_string())
            }
        }
    }
}

impl From<TunnelError> for SessionError {
    fn from(err: TunnelError) -> Self {
        match err {
            TunnelError::ForwardFailed { local_port, device_port, reason } => {
                SessionError::PortForwardFailure { local_port, device_port, reason }
            }
            TunnelError::NotForwarded(port) => SessionError::TunnelNotVerified(port),
            TunnelError::AlreadyOpen(port) => SessionError::PortForwardFailure {
                local_port: port,
                device_port: 0,
                reason: "a forward is already open".to_string(),
            },
        }
    }
}

impl From<CoreError> for SessionError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidTarget(reason) => SessionError::InvalidTarget(reason),
            CoreError::Io(e) => SessionError::Io(e),
            other => SessionError::Config(other.to_string()),
        }
    }
}
