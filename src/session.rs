//! Session Coordinator
//!
//! Runs one session against one device:
//! port → device → build → harness → tunnel → ready.
//!
//! Whatever has been acquired when a stage fails, or when the session is
//! cancelled, is released in reverse order before control returns.

use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, debug, warn};

use maestro_ios_bridge::{Device, DeviceLookup, PortAllocator, TunnelManager, TunnelTransport};
use maestro_ios_core::{AppConfig, DeviceTarget, EventBus, SessionEvent};
use maestro_ios_harness::{BuildWorkspace, HarnessBuild, HarnessSupervisor, SupervisorConfig};

use crate::error::SessionError;

/// Sequences the stages of a single session
pub struct SessionCoordinator<L: DeviceLookup> {
    config: AppConfig,
    target: DeviceTarget,
    requested_port: u16,
    lookup: L,
    transport: Box<dyn TunnelTransport>,
    events: Arc<EventBus>,
    workspace_parent: Option<PathBuf>,
}

impl<L: DeviceLookup> SessionCoordinator<L> {
    /// `requested_port` 0 means auto-assign from the configured base port
    pub fn new(
        config: AppConfig,
        target: DeviceTarget,
        requested_port: u16,
        lookup: L,
        transport: Box<dyn TunnelTransport>,
    ) -> Self {
        Self {
            config,
            target,
            requested_port,
            lookup,
            transport,
            events: Arc::new(EventBus::new()),
            workspace_parent: None,
        }
    }

    /// Publish progress on `events` instead of a private bus
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    /// Create build workspaces under `parent` instead of the system temp dir
    pub fn with_workspace_parent(mut self, parent: impl Into<PathBuf>) -> Self {
        self.workspace_parent = Some(parent.into());
        self
    }

    pub fn events(&self) -> Arc<EventBus> {
        Arc::clone(&self.events)
    }

    /// Bring the session up. On error everything acquired so far has
    /// already been released.
    pub async fn start(self, cancel: &CancellationToken) -> Result<ActiveSession, SessionError> {
        let events = Arc::clone(&self.events);
        let mut resources = SessionResources::default();

        match self.acquire(&mut resources, cancel).await {
            Ok((local_port, device)) => Ok(ActiveSession {
                local_port,
                device,
                resources,
                events,
            }),
            Err(e) => {
                warn!("Session failed: {}", e);
                resources.release().await;
                events.emit(SessionEvent::CleanedUp);
                Err(e)
            }
        }
    }

    /// Start, then hold the session until `cancel` fires and tear it down.
    /// Cancellation at any point is a clean exit.
    pub async fn run(self, cancel: &CancellationToken) -> Result<(), SessionError> {
        let session = match self.start(cancel).await {
            Ok(session) => session,
            Err(e) if e.is_cancellation() => return Ok(()),
            Err(e) => return Err(e),
        };

        cancel.cancelled().await;
        session.shutdown().await;
        Ok(())
    }

    async fn acquire(
        self,
        resources: &mut SessionResources,
        cancel: &CancellationToken,
    ) -> Result<(u16, Device), SessionError> {
        if cancel.is_cancelled() {
            return Err(SessionError::Cancelled);
        }
        let session = &self.config.session;

        let local_port = PortAllocator::new(session.base_port).resolve(self.requested_port)?;
        self.events.emit(SessionEvent::PortResolved { port: local_port });

        let device = self.lookup.lookup(self.target.device_id()).await?;
        self.events.emit(SessionEvent::DeviceResolved {
            device_id: device.udid.clone(),
            name: device.name.clone(),
            os_version: device.os_version.clone(),
        });

        let workspace = match &self.workspace_parent {
            Some(parent) => BuildWorkspace::create_in(parent)?,
            None => BuildWorkspace::create()?,
        };
        let workspace = resources.workspace.insert(workspace);
        let runner_log = workspace.runner_log();

        self.events.emit(SessionEvent::BuildStarted {
            timeout_secs: session.build_timeout_secs,
        });
        let build = HarnessBuild::new(self.config.harness.clone(), session.build_timeout());
        let descriptor = build.build(&self.target, workspace, cancel).await?;
        self.events.emit(SessionEvent::BuildCompleted {
            run_configuration: descriptor.run_configuration.clone(),
        });

        let supervisor = resources
            .supervisor
            .insert(HarnessSupervisor::new(SupervisorConfig::from_app_config(&self.config)));
        let pid = supervisor.launch(&descriptor, &self.target, &runner_log)?;
        self.events.emit(SessionEvent::HarnessLaunched { pid });
        supervisor.await_ready(cancel).await?;
        self.events.emit(SessionEvent::HarnessReady);

        let tunnel = resources
            .tunnel
            .insert(TunnelManager::new(self.transport, session.settle_delay()));
        tunnel.open(&device, local_port, session.device_port)?;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SessionError::Cancelled),
            verified = tunnel.verify(local_port) => verified?,
        }
        self.events.emit(SessionEvent::TunnelOpened {
            local_port,
            device_port: session.device_port,
        });

        info!("Session ready on port {} for {}", local_port, device.udid);
        self.events.emit(SessionEvent::Ready {
            local_port,
            device_id: device.udid.clone(),
        });
        Ok((local_port, device))
    }
}

/// Everything a session holds. Fields drop in declaration order, which is
/// the reverse of acquisition.
#[derive(Default)]
struct SessionResources {
    tunnel: Option<TunnelManager>,
    supervisor: Option<HarnessSupervisor>,
    workspace: Option<BuildWorkspace>,
}

impl SessionResources {
    /// Tunnel and harness come down together; the workspace goes only
    /// after the harness has been stopped. Safe to call repeatedly.
    async fn release(&mut self) {
        let tunnel = self.tunnel.as_mut();
        let supervisor = self.supervisor.as_mut();

        tokio::join!(
            async move {
                if let Some(tunnel) = tunnel {
                    tunnel.close();
                }
            },
            async move {
                if let Some(supervisor) = supervisor {
                    supervisor.stop().await;
                }
            },
        );

        if let Some(workspace) = self.workspace.as_mut() {
            if let Err(e) = workspace.remove() {
                warn!("Failed to remove build workspace {:?}: {}", workspace.root(), e);
            }
        }
        debug!("Session resources released");
    }
}

/// A session that reached readiness
pub struct ActiveSession {
    local_port: u16,
    device: Device,
    resources: SessionResources,
    events: Arc<EventBus>,
}

impl ActiveSession {
    /// Local end of the verified tunnel
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn harness_pid(&self) -> Option<u32> {
        self.resources.supervisor.as_ref().and_then(|s| s.pid())
    }

    /// Build workspace root while the session is up
    pub fn workspace_root(&self) -> Option<PathBuf> {
        self.resources
            .workspace
            .as_ref()
            .filter(|w| !w.is_removed())
            .map(|w| w.root().to_path_buf())
    }

    /// Release everything in reverse order
    pub async fn shutdown(mut self) {
        info!("Stopping session on port {}", self.local_port);
        self.events.emit(SessionEvent::ShuttingDown);
        self.resources.release().await;
        self.events.emit(SessionEvent::CleanedUp);
    }
}
