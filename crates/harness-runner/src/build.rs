//! Harness Build
//!
//! Wraps `xcodebuild build-for-testing` for the XCTest harness project.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, SystemTime};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{info, debug, warn};

use maestro_ios_core::{DeviceTarget, HarnessConfig};

use crate::interrupt::{detach_from_terminal, interrupted};
use crate::workspace::BuildWorkspace;
use crate::BuildError;

/// Everything the run stage needs to launch the harness without rebuilding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildDescriptor {
    /// Session working directory
    pub working_dir: PathBuf,
    /// Derived-output directory the build wrote into
    pub derived_output: PathBuf,
    /// Generated `.xctestrun` file
    pub run_configuration: PathBuf,
    /// Build log
    pub build_log: PathBuf,
}

/// Builder for the harness project
pub struct HarnessBuild {
    config: HarnessConfig,
    timeout: Duration,
}

impl HarnessBuild {
    pub fn new(config: HarnessConfig, timeout: Duration) -> Self {
        Self { config, timeout }
    }

    /// Check the runner project has been installed by `setup`
    pub fn ensure_installed(&self) -> Result<(), BuildError> {
        let project = self.config.project_path();
        if !project.exists() {
            return Err(BuildError::RunnerNotInstalled(project));
        }
        Ok(())
    }

    fn build_args(&self, target: &DeviceTarget, workspace: &BuildWorkspace) -> Vec<String> {
        vec![
            "build-for-testing".to_string(),
            "-project".to_string(),
            self.config.project_path().to_string_lossy().into_owned(),
            "-scheme".to_string(),
            self.config.scheme.clone(),
            "-destination".to_string(),
            target.destination(),
            "-derivedDataPath".to_string(),
            workspace.derived_output().to_string_lossy().into_owned(),
            format!("DEVELOPMENT_TEAM={}", target.team_id()),
        ]
    }

    /// Build the harness into `workspace`.
    ///
    /// Output goes to `logs/build.log`. The toolchain is killed when the
    /// timeout elapses or `cancel` fires.
    pub async fn build(
        &self,
        target: &DeviceTarget,
        workspace: &BuildWorkspace,
        cancel: &CancellationToken,
    ) -> Result<BuildDescriptor, BuildError> {
        self.ensure_installed()?;

        let log_path = workspace.build_log();
        let log = std::fs::File::create(&log_path)?;
        let args = self.build_args(target, workspace);

        info!("Building harness for {} (timeout {:?})", target.device_id(), self.timeout);
        debug!("Running: {:?} {:?}", self.config.xcodebuild, args);

        let mut command = Command::new(&self.config.xcodebuild);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log.try_clone()?))
            .stderr(Stdio::from(log))
            .kill_on_drop(true);
        detach_from_terminal(&mut command);

        let mut child = command
            .spawn()
            .map_err(|e| BuildError::ToolchainFailure {
                reason: format!("could not launch {}: {}", self.config.xcodebuild.display(), e),
                log_path: log_path.clone(),
            })?;

        let outcome = tokio::select! {
            status = child.wait() => WaitOutcome::Exited(status),
            _ = tokio::time::sleep(self.timeout) => WaitOutcome::TimedOut,
            _ = cancel.cancelled() => WaitOutcome::Cancelled,
        };

        let status = match outcome {
            WaitOutcome::Exited(status) => status?,
            WaitOutcome::TimedOut => {
                warn!("Build exceeded {:?}, killing toolchain", self.timeout);
                kill_quietly(&mut child).await;
                return Err(BuildError::ToolchainFailure {
                    reason: format!("timed out after {:?}", self.timeout),
                    log_path,
                });
            }
            WaitOutcome::Cancelled => {
                kill_quietly(&mut child).await;
                return Err(BuildError::Cancelled);
            }
        };

        if !status.success() {
            if interrupted(&status, cancel).await {
                return Err(BuildError::Cancelled);
            }
            return Err(BuildError::ToolchainFailure {
                reason: format!("xcodebuild exited with {}", status),
                log_path,
            });
        }

        let run_configuration =
            find_run_configuration(&workspace.derived_output(), &self.config.run_configuration_glob)?;

        info!("Build complete: {:?}", run_configuration);
        Ok(BuildDescriptor {
            working_dir: workspace.root().to_path_buf(),
            derived_output: workspace.derived_output(),
            run_configuration,
            build_log: log_path,
        })
    }
}

enum WaitOutcome {
    Exited(std::io::Result<std::process::ExitStatus>),
    TimedOut,
    Cancelled,
}

async fn kill_quietly(child: &mut tokio::process::Child) {
    if let Err(e) = child.kill().await {
        warn!("Failed to kill build toolchain: {}", e);
    }
}

/// Find the run configuration generated under `derived_output`.
///
/// Several matches are resolved by [`select_run_configuration`].
pub fn find_run_configuration(derived_output: &Path, pattern: &str) -> Result<PathBuf, BuildError> {
    let full_pattern = format!(
        "{}/{}",
        glob::Pattern::escape(&derived_output.to_string_lossy()),
        pattern
    );

    let candidates: Vec<PathBuf> = glob::glob(&full_pattern)
        .map_err(|e| BuildError::InvalidPattern(format!("{}: {}", pattern, e)))?
        .filter_map(|entry| entry.ok())
        .filter(|path| path.is_file())
        .collect();

    if candidates.len() > 1 {
        debug!("{} run configurations found: {:?}", candidates.len(), candidates);
    }

    select_run_configuration(candidates).ok_or_else(|| BuildError::ArtifactNotFound {
        pattern: pattern.to_string(),
    })
}

/// Pick the most recently modified candidate; ties go to the
/// lexicographically greatest path.
pub fn select_run_configuration(candidates: Vec<PathBuf>) -> Option<PathBuf> {
    candidates
        .into_iter()
        .map(|path| {
            let modified = std::fs::metadata(&path)
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (modified, path)
        })
        .max()
        .map(|(_, path)| path)
}
