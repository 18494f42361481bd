//! Harness Supervisor
//!
//! Launches the harness with `xcodebuild test-without-building`, polls its
//! log until it is ready, failed or timed out, and owns its termination.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, debug, warn};

use maestro_ios_core::{AppConfig, DeviceTarget};

use crate::build::BuildDescriptor;
use crate::interrupt::{detach_from_terminal, interrupted};
use crate::readiness::{classify, FailureReason, Readiness};
use crate::HarnessError;

/// Harness lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarnessState {
    NotStarted,
    Starting,
    Running,
    Stopped,
}

/// Supervisor timing and toolchain
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub xcodebuild: PathBuf,
    pub poll_interval: Duration,
    pub startup_timeout: Duration,
}

impl SupervisorConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            xcodebuild: config.harness.xcodebuild.clone(),
            poll_interval: config.session.poll_interval(),
            startup_timeout: config.session.startup_timeout(),
        }
    }
}

/// Owner of the single harness process of a session
pub struct HarnessSupervisor {
    config: SupervisorConfig,
    state: HarnessState,
    child: Option<Child>,
    log_file: Option<std::fs::File>,
    log_path: Option<PathBuf>,
}

impl HarnessSupervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            config,
            state: HarnessState::NotStarted,
            child: None,
            log_file: None,
            log_path: None,
        }
    }

    pub fn state(&self) -> HarnessState {
        self.state
    }

    /// OS process id while the harness is running
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(|c| c.id())
    }

    pub fn log_path(&self) -> Option<&Path> {
        self.log_path.as_deref()
    }

    /// Launch the harness and wait until its log reports readiness.
    /// On failure the process is stopped before returning.
    pub async fn start(
        &mut self,
        descriptor: &BuildDescriptor,
        target: &DeviceTarget,
        log_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), HarnessError> {
        self.launch(descriptor, target, log_path)?;
        self.await_ready(cancel).await
    }

    /// Spawn the harness process with output redirected to `log_path`
    pub fn launch(
        &mut self,
        descriptor: &BuildDescriptor,
        target: &DeviceTarget,
        log_path: &Path,
    ) -> Result<u32, HarnessError> {
        if self.state != HarnessState::NotStarted {
            return Err(HarnessError::AlreadyStarted);
        }
        if std::fs::File::open(&descriptor.run_configuration).is_err() {
            return Err(HarnessError::RunConfigurationMissing(
                descriptor.run_configuration.clone(),
            ));
        }

        let log_file = std::fs::File::create(log_path)?;

        info!("Starting harness on {}", target.device_id());
        let mut command = Command::new(&self.config.xcodebuild);
        command
            .arg("test-without-building")
            .arg("-xctestrun")
            .arg(&descriptor.run_configuration)
            .arg("-destination")
            .arg(target.destination())
            .arg("-derivedDataPath")
            .arg(&descriptor.derived_output)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log_file.try_clone()?))
            .stderr(Stdio::from(log_file.try_clone()?))
            .kill_on_drop(true);
        detach_from_terminal(&mut command);

        let child = command.spawn().map_err(HarnessError::Launch)?;

        let pid = child.id().unwrap_or_default();
        debug!("Harness pid {}", pid);

        self.state = HarnessState::Starting;
        self.child = Some(child);
        self.log_file = Some(log_file);
        self.log_path = Some(log_path.to_path_buf());
        Ok(pid)
    }

    /// Poll the log until ready. Stops the harness on any error.
    pub async fn await_ready(&mut self, cancel: &CancellationToken) -> Result<(), HarnessError> {
        let result = self.poll_until_ready(cancel).await;
        match result {
            Ok(()) => {
                self.state = HarnessState::Running;
                info!("Harness running");
                Ok(())
            }
            Err(e) => {
                self.stop().await;
                Err(e)
            }
        }
    }

    async fn poll_until_ready(&mut self, cancel: &CancellationToken) -> Result<(), HarnessError> {
        let log_path = match (&self.log_path, self.state) {
            (Some(path), HarnessState::Starting) => path.clone(),
            _ => return Err(HarnessError::Launch(std::io::Error::other("harness was not launched"))),
        };

        let deadline = tokio::time::sleep(self.config.startup_timeout);
        tokio::pin!(deadline);
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(HarnessError::Cancelled),
                _ = &mut deadline => {
                    warn!("Harness did not become ready within {:?}", self.config.startup_timeout);
                    return Err(HarnessError::StartupTimeout { log_path });
                }
                _ = ticker.tick() => {}
            }

            match read_and_classify(&log_path).await {
                Readiness::Ready => return Ok(()),
                Readiness::Failed(reason) => {
                    return Err(HarnessError::from_failure(reason, log_path));
                }
                Readiness::NotYetReady => {}
            }

            if let Some(status) = self.exit_status() {
                if !status.success() && interrupted(&status, cancel).await {
                    return Err(HarnessError::Cancelled);
                }
                // The process may have written its last lines just before exiting.
                return match read_and_classify(&log_path).await {
                    Readiness::Ready => Ok(()),
                    Readiness::Failed(reason) => Err(HarnessError::from_failure(reason, log_path)),
                    Readiness::NotYetReady => {
                        warn!("Harness exited before becoming ready: {}", status);
                        Err(HarnessError::from_failure(FailureReason::RunnerFailed, log_path))
                    }
                };
            }
        }
    }

    fn exit_status(&mut self) -> Option<std::process::ExitStatus> {
        self.child.as_mut().and_then(|c| c.try_wait().ok().flatten())
    }

    /// Terminate the harness and close its log. Safe to call any number
    /// of times, including when nothing was started.
    pub async fn stop(&mut self) {
        if let Some(mut child) = self.child.take() {
            match child.try_wait() {
                Ok(Some(status)) => debug!("Harness already exited: {}", status),
                _ => {
                    if let Err(e) = child.kill().await {
                        warn!("Failed to kill harness: {}", e);
                    } else {
                        info!("Harness stopped");
                    }
                }
            }
        }
        self.log_file = None;

        if self.state != HarnessState::NotStarted {
            self.state = HarnessState::Stopped;
        }
    }
}

async fn read_and_classify(log_path: &Path) -> Readiness {
    match tokio::fs::read(log_path).await {
        Ok(bytes) => classify(&String::from_utf8_lossy(&bytes)),
        Err(e) => {
            debug!("Harness log not readable yet: {}", e);
            Readiness::NotYetReady
        }
    }
}
