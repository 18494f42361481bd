//! XCTest Harness Runner
//!
//! Builds the on-device test harness with `xcodebuild`, launches it in
//! test-without-building mode and decides from its log when it is ready
//! to accept driver connections.

pub mod build;
mod interrupt;
pub mod readiness;
pub mod supervisor;
pub mod workspace;

#[cfg(all(test, unix))]
pub(crate) mod test_support;

pub use build::{BuildDescriptor, HarnessBuild};
pub use readiness::{classify, FailureReason, Readiness};
pub use supervisor::{HarnessState, HarnessSupervisor, SupervisorConfig};
pub use workspace::BuildWorkspace;

use std::path::PathBuf;

/// Build stage errors
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("iOS runner not found at {}. Run: maestro-ios-device setup", .0.display())]
    RunnerNotInstalled(PathBuf),
    #[error("build failed: {reason} (see {})", .log_path.display())]
    ToolchainFailure { reason: String, log_path: PathBuf },
    #[error("no run configuration matching {pattern} found after build")]
    ArtifactNotFound { pattern: String },
    #[error("invalid run configuration pattern {0}")]
    InvalidPattern(String),
    #[error("build cancelled")]
    Cancelled,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Harness start/stop errors
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("harness already started")]
    AlreadyStarted,
    #[error("run configuration {} is missing or unreadable", .0.display())]
    RunConfigurationMissing(PathBuf),
    #[error("failed to launch harness: {0}")]
    Launch(std::io::Error),
    #[error("startup timeout (see {})", .log_path.display())]
    StartupTimeout { log_path: PathBuf },
    #[error("{} (see {})", FailureReason::CertificateNotTrusted, .log_path.display())]
    CertificateNotTrusted { log_path: PathBuf },
    #[error("{} (see {})", FailureReason::RunnerFailed, .log_path.display())]
    RunnerFailed { log_path: PathBuf },
    #[error("harness start cancelled")]
    Cancelled,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    /// Map a log-detected failure to its error
    pub fn from_failure(reason: FailureReason, log_path: PathBuf) -> Self {
        match reason {
            FailureReason::CertificateNotTrusted => HarnessError::CertificateNotTrusted { log_path },
            FailureReason::RunnerFailed => HarnessError::RunnerFailed { log_path },
        }
    }
}
