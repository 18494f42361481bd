//! CLI commands for maestro-ios-device
//!
//! Glue between the command line and the session and setup machinery.

use std::path::PathBuf;
use std::sync::Arc;
use anyhow::{bail, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, debug};

use maestro_ios_bridge::{IDeviceClient, IproxyTransport};
use maestro_ios_core::{AppConfig, DeviceTarget, EventBus, SessionEvent};
use maestro_ios_toolchain::{run_setup, MaestroCli, SetupStep};

use crate::error::SessionError;
use crate::session::SessionCoordinator;

/// Start a session and hold it until interrupted
pub struct StartCommand {
    pub team_id: String,
    pub device: String,
    /// 0 to auto-assign
    pub driver_host_port: u16,
    pub config_path: Option<PathBuf>,
}

impl StartCommand {
    pub async fn execute(&self, events: Arc<EventBus>, cancel: CancellationToken) -> Result<()> {
        let config = AppConfig::load(self.config_path.as_deref()).await?;
        let target = DeviceTarget::new(&self.device, &self.team_id).map_err(SessionError::from)?;

        let patched = MaestroCli::default().is_patched().await.unwrap_or_else(|e| {
            debug!("Could not query Maestro: {}", e);
            false
        });
        if !patched {
            bail!("Maestro not patched. Run: maestro-ios-device setup");
        }

        let lookup = IDeviceClient::new(
            config.bridge.idevice_id.clone(),
            config.bridge.ideviceinfo.clone(),
        );
        let transport = Box::new(IproxyTransport::new(config.bridge.iproxy.clone()));

        info!("Starting session for {}", target.device_id());
        SessionCoordinator::new(config, target, self.driver_host_port, lookup, transport)
            .with_events(events)
            .run(&cancel)
            .await?;
        Ok(())
    }
}

/// Install the patched Maestro JARs and the iOS runner
pub struct SetupCommand {
    pub config_path: Option<PathBuf>,
}

impl SetupCommand {
    pub async fn execute(&self) -> Result<()> {
        let config = AppConfig::load(self.config_path.as_deref()).await?;

        println!("🔧 Maestro iOS Device Setup\n");
        let report = run_setup(
            &config.toolchain,
            &config.harness.runner_dir,
            Some(Box::new(|step: SetupStep| println!("{}", render_setup_step(&step)))),
        )
        .await?;

        println!("\n✅ Setup complete! Maestro {} patched.", report.version);
        println!("\nRun tests with:");
        println!("  maestro-ios-device --team-id <ID> --device <UDID>");
        Ok(())
    }
}

/// Console line for a session event, if it warrants one
pub fn render_event(event: &SessionEvent) -> Option<String> {
    match event {
        SessionEvent::DeviceResolved { device_id, name, os_version } => Some(format!(
            "📱 {} ({}) - iOS {}\n",
            name,
            device_id,
            os_version.as_deref().unwrap_or("unknown")
        )),
        SessionEvent::BuildStarted { timeout_secs } => {
            Some(format!("🔨 Building (up to {} min)...", timeout_secs.div_ceil(60)))
        }
        SessionEvent::BuildCompleted { .. } => Some("✅ Build complete".to_string()),
        SessionEvent::HarnessLaunched { .. } => Some("▶️  Starting runner...".to_string()),
        SessionEvent::HarnessReady => Some("✅ Runner started".to_string()),
        SessionEvent::Ready { local_port, device_id } => Some(format!(
            "\n✅ Ready! Run:\n   maestro --driver-host-port {} --device {} --app-file /path/to/app.ipa test flow.yaml\n\nPress Ctrl+C to stop.",
            local_port, device_id
        )),
        SessionEvent::ShuttingDown => Some("\n🛑 Stopping...".to_string()),
        SessionEvent::PortResolved { .. }
        | SessionEvent::TunnelOpened { .. }
        | SessionEvent::CleanedUp => None,
    }
}

fn render_setup_step(step: &SetupStep) -> String {
    match step {
        SetupStep::Detected { version } => format!("Detected Maestro: {}\n", version),
        SetupStep::BackingUp { .. } => "📦 Backing up existing JARs...".to_string(),
        SetupStep::BackedUp { count } => format!("✅ Backup complete ({} JARs)", count),
        SetupStep::Downloading { bundle } => format!("📥 Downloading {}...", bundle),
        SetupStep::Installed { dest, .. } => format!("✅ Installed to {}", dest.display()),
    }
}
