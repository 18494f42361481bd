//! End-to-end session tests against a fake `xcodebuild`, a fake device
//! lookup and a tunnel that binds the local port itself.

#![cfg(unix)]

use std::net::{Ipv4Addr, TcpListener};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use maestro_ios_device::bridge::{
    is_port_free, Device, DeviceError, DeviceLookup, TunnelError, TunnelHandle, TunnelTransport,
};
use maestro_ios_device::core::{AppConfig, DeviceTarget, EventBus, EventSubscription, SessionEvent};
use maestro_ios_device::{SessionCoordinator, SessionError};

const UDID: &str = "00008030-001234567890";

const BUILD_OK: &str = r#"mkdir -p "$out/Build/Products"
touch "$out/Build/Products/maestro-driver-ios_iphoneos17.0-arm64.xctestrun""#;

const RUN_READY: &str = r#"echo "maestro-driver-ios started, Test Suite 'All tests' passed"
exec sleep 60"#;

struct FakeLookup {
    attached: bool,
}

impl DeviceLookup for FakeLookup {
    async fn lookup(&self, udid: &str) -> Result<Device, DeviceError> {
        if !self.attached {
            return Err(DeviceError::NotFound(udid.to_string()));
        }
        Ok(Device::from_properties(udid, Some("QA iPhone".into()), None, Some("17.4".into())))
    }
}

/// Forward that really listens on the local port
struct BindingTransport;

struct BoundTunnel(Option<TcpListener>);

impl TunnelHandle for BoundTunnel {
    fn close(&mut self) {
        self.0.take();
    }
}

impl TunnelTransport for BindingTransport {
    fn open(&self, _: &Device, local_port: u16, device_port: u16) -> Result<Box<dyn TunnelHandle>, TunnelError> {
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, local_port)).map_err(|e| {
            TunnelError::ForwardFailed { local_port, device_port, reason: e.to_string() }
        })?;
        Ok(Box::new(BoundTunnel(Some(listener))))
    }
}

/// Forward that claims success without binding anything
struct SilentTransport;

impl TunnelTransport for SilentTransport {
    fn open(&self, _: &Device, _: u16, _: u16) -> Result<Box<dyn TunnelHandle>, TunnelError> {
        Ok(Box::new(BoundTunnel(None)))
    }
}

struct Fixture {
    dir: tempfile::TempDir,
    config: AppConfig,
    events: Arc<EventBus>,
    subscription: EventSubscription,
}

impl Fixture {
    fn new(build_body: &str, run_body: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();

        let runner_dir = dir.path().join("runner");
        std::fs::create_dir_all(runner_dir.join("maestro-driver-ios.xcodeproj")).unwrap();
        std::fs::create_dir_all(dir.path().join("work")).unwrap();

        let mut config = AppConfig::default();
        config.harness.runner_dir = runner_dir;
        config.harness.xcodebuild = write_xcodebuild(dir.path(), build_body, run_body);
        config.session.build_timeout_secs = 20;
        config.session.startup_timeout_secs = 10;
        config.session.poll_interval_ms = 50;
        config.session.settle_delay_ms = 20;

        let events = Arc::new(EventBus::new());
        let subscription = events.subscribe();
        Self { dir, config, events, subscription }
    }

    fn coordinator(&self, port: u16, transport: Box<dyn TunnelTransport>) -> SessionCoordinator<FakeLookup> {
        self.coordinator_with(port, FakeLookup { attached: true }, transport)
    }

    fn coordinator_with(
        &self,
        port: u16,
        lookup: FakeLookup,
        transport: Box<dyn TunnelTransport>,
    ) -> SessionCoordinator<FakeLookup> {
        let target = DeviceTarget::new(UDID, "ABC123XYZ").unwrap();
        SessionCoordinator::new(self.config.clone(), target, port, lookup, transport)
            .with_events(Arc::clone(&self.events))
            .with_workspace_parent(self.work_dir())
    }

    fn work_dir(&self) -> PathBuf {
        self.dir.path().join("work")
    }

    fn workspaces_left(&self) -> usize {
        std::fs::read_dir(self.work_dir()).unwrap().count()
    }

    fn launched_pid(&self, events: &[SessionEvent]) -> Option<u32> {
        events.iter().find_map(|e| match e {
            SessionEvent::HarnessLaunched { pid } => Some(*pid),
            _ => None,
        })
    }
}

fn write_xcodebuild(dir: &Path, build_body: &str, run_body: &str) -> PathBuf {
    let script = format!(
        r#"#!/bin/sh
mode="$1"
out=""
while [ $# -gt 0 ]; do
  if [ "$1" = "-derivedDataPath" ]; then out="$2"; fi
  shift
done
case "$mode" in
  build-for-testing)
{build_body}
    ;;
  test-without-building)
{run_body}
    ;;
esac
"#
    );
    let path = dir.join("xcodebuild");
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn free_port() -> u16 {
    TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0)).unwrap().local_addr().unwrap().port()
}

fn process_alive(pid: u32) -> bool {
    Command::new("kill")
        .args(["-0", &pid.to_string()])
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[tokio::test]
async fn test_session_reaches_ready_and_cleans_up() {
    let fixture = Fixture::new(BUILD_OK, RUN_READY);
    let port = free_port();

    let session = fixture
        .coordinator(port, Box::new(BindingTransport))
        .start(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(session.local_port(), port);
    assert_eq!(session.device().name, "QA iPhone");
    assert!(!is_port_free(port));
    let pid = session.harness_pid().unwrap();
    assert!(process_alive(pid));
    let workspace = session.workspace_root().unwrap();
    assert!(workspace.join("logs/runner.log").exists());

    let events = fixture.subscription.drain();
    assert_eq!(events.first(), Some(&SessionEvent::PortResolved { port }));
    assert_eq!(fixture.launched_pid(&events), Some(pid));
    assert_eq!(
        events.last(),
        Some(&SessionEvent::Ready { local_port: port, device_id: UDID.to_string() })
    );

    session.shutdown().await;

    assert!(!process_alive(pid));
    assert!(is_port_free(port));
    assert!(!workspace.exists());
    assert_eq!(fixture.workspaces_left(), 0);
    assert_eq!(
        fixture.subscription.drain(),
        vec![SessionEvent::ShuttingDown, SessionEvent::CleanedUp]
    );
}

#[tokio::test]
async fn test_auto_assigned_port_starts_at_base() {
    let mut fixture = Fixture::new(BUILD_OK, RUN_READY);
    let base = free_port();
    fixture.config.session.base_port = base;

    let session = fixture
        .coordinator(0, Box::new(BindingTransport))
        .start(&CancellationToken::new())
        .await
        .unwrap();

    assert!(session.local_port() >= base);
    session.shutdown().await;
}

#[tokio::test]
async fn test_build_timeout_reports_build_log_and_cleans_up() {
    let mut fixture = Fixture::new("exec sleep 30", RUN_READY);
    fixture.config.session.build_timeout_secs = 1;

    let result = fixture
        .coordinator(free_port(), Box::new(BindingTransport))
        .start(&CancellationToken::new())
        .await;

    match result {
        Err(SessionError::ToolchainFailure { reason, log_path }) => {
            assert!(reason.contains("timed out"));
            assert!(log_path.ends_with("logs/build.log"));
        }
        other => panic!("expected build timeout, got {:?}", other.err()),
    }
    assert_eq!(fixture.workspaces_left(), 0);
    assert_eq!(fixture.subscription.drain().last(), Some(&SessionEvent::CleanedUp));
}

#[tokio::test]
async fn test_startup_timeout_leaves_no_harness_behind() {
    let mut fixture = Fixture::new(BUILD_OK, "echo \"booting\"\nexec sleep 60");
    fixture.config.session.startup_timeout_secs = 1;
    let port = free_port();

    let result = fixture
        .coordinator(port, Box::new(BindingTransport))
        .start(&CancellationToken::new())
        .await;

    match result {
        Err(SessionError::StartupTimeout { log_path }) => assert!(log_path.ends_with("logs/runner.log")),
        other => panic!("expected startup timeout, got {:?}", other.err()),
    }

    let pid = fixture.launched_pid(&fixture.subscription.drain()).unwrap();
    assert!(!process_alive(pid));
    assert!(is_port_free(port));
    assert_eq!(fixture.workspaces_left(), 0);
}

#[tokio::test]
async fn test_untrusted_certificate_fails_with_hint() {
    let fixture = Fixture::new(
        BUILD_OK,
        "echo \"Developer App Certificate is not trusted\"\nexec sleep 60",
    );

    let err = fixture
        .coordinator(free_port(), Box::new(BindingTransport))
        .start(&CancellationToken::new())
        .await
        .err()
        .unwrap();

    assert!(matches!(err, SessionError::CertificateNotTrusted { .. }));
    assert!(err.remediation().unwrap().contains("VPN & Device Management"));
    let pid = fixture.launched_pid(&fixture.subscription.drain()).unwrap();
    assert!(!process_alive(pid));
    assert_eq!(fixture.workspaces_left(), 0);
}

#[tokio::test]
async fn test_busy_port_fails_before_any_work() {
    let fixture = Fixture::new(BUILD_OK, RUN_READY);
    let held = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0)).unwrap();
    let port = held.local_addr().unwrap().port();

    let err = fixture
        .coordinator(port, Box::new(BindingTransport))
        .start(&CancellationToken::new())
        .await
        .err()
        .unwrap();

    assert!(matches!(err, SessionError::PortInUse(p) if p == port));
    assert_eq!(fixture.workspaces_left(), 0);
    assert_eq!(fixture.subscription.drain(), vec![SessionEvent::CleanedUp]);
}

#[tokio::test]
async fn test_missing_device_fails_before_build() {
    let fixture = Fixture::new(BUILD_OK, RUN_READY);

    let err = fixture
        .coordinator_with(free_port(), FakeLookup { attached: false }, Box::new(BindingTransport))
        .start(&CancellationToken::new())
        .await
        .err()
        .unwrap();

    assert!(matches!(err, SessionError::DeviceNotFound(udid) if udid == UDID));
    assert_eq!(fixture.workspaces_left(), 0);
    assert!(!fixture
        .subscription
        .drain()
        .iter()
        .any(|e| matches!(e, SessionEvent::BuildStarted { .. })));
}

#[tokio::test]
async fn test_unverified_tunnel_unwinds_harness() {
    let fixture = Fixture::new(BUILD_OK, RUN_READY);
    let port = free_port();

    let err = fixture
        .coordinator(port, Box::new(SilentTransport))
        .start(&CancellationToken::new())
        .await
        .err()
        .unwrap();

    assert!(matches!(err, SessionError::TunnelNotVerified(p) if p == port));
    let pid = fixture.launched_pid(&fixture.subscription.drain()).unwrap();
    assert!(!process_alive(pid));
    assert_eq!(fixture.workspaces_left(), 0);
}

#[tokio::test]
async fn test_cancel_during_startup_is_clean_exit() {
    let mut fixture = Fixture::new(BUILD_OK, "echo \"booting\"\nexec sleep 60");
    fixture.config.session.startup_timeout_secs = 30;
    let cancel = CancellationToken::new();

    let canceller = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(800)).await;
            cancel.cancel();
        })
    };

    let result = fixture
        .coordinator(free_port(), Box::new(BindingTransport))
        .run(&cancel)
        .await;
    canceller.await.unwrap();

    assert!(result.is_ok());
    let events = fixture.subscription.drain();
    assert_eq!(events.last(), Some(&SessionEvent::CleanedUp));
    if let Some(pid) = fixture.launched_pid(&events) {
        assert!(!process_alive(pid));
    }
    assert_eq!(fixture.workspaces_left(), 0);
}

#[tokio::test]
async fn test_terminal_interrupt_during_build_is_clean_exit() {
    // Ctrl+C signals the toolchain's process group and cancels the session
    let fixture = Fixture::new("kill -INT 0\nexec sleep 30", RUN_READY);
    let cancel = CancellationToken::new();

    let canceller = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        })
    };

    let result = fixture
        .coordinator(free_port(), Box::new(BindingTransport))
        .run(&cancel)
        .await;
    canceller.await.unwrap();

    assert!(result.is_ok(), "got {:?}", result.err());
    assert_eq!(fixture.subscription.drain().last(), Some(&SessionEvent::CleanedUp));
    assert_eq!(fixture.workspaces_left(), 0);
}

#[tokio::test]
async fn test_cancel_after_ready_tears_down() {
    let fixture = Fixture::new(BUILD_OK, RUN_READY);
    let port = free_port();
    let cancel = CancellationToken::new();

    let subscription = fixture.events.subscribe();
    let watcher = {
        let cancel = cancel.clone();
        std::thread::spawn(move || {
            for event in subscription.iter() {
                if matches!(event, SessionEvent::Ready { .. }) {
                    cancel.cancel();
                    break;
                }
            }
        })
    };

    fixture
        .coordinator(port, Box::new(BindingTransport))
        .run(&cancel)
        .await
        .unwrap();
    watcher.join().unwrap();

    let events = fixture.subscription.drain();
    assert!(events.contains(&SessionEvent::Ready { local_port: port, device_id: UDID.to_string() }));
    assert_eq!(
        &events[events.len() - 2..],
        &[SessionEvent::ShuttingDown, SessionEvent::CleanedUp]
    );
    let pid = fixture.launched_pid(&events).unwrap();
    assert!(!process_alive(pid));
    assert!(is_port_free(port));
    assert_eq!(fixture.workspaces_left(), 0);
}
