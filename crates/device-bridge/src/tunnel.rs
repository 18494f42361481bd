//! Port Tunnels
//!
//! Forwards a local TCP port to a port on the device so the host-side
//! driver can reach the harness. The transport is a seam; the default
//! spawns `iproxy`.

use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::Duration;
use tracing::{info, debug, warn};

use crate::device::Device;
use crate::port::is_listening;
use crate::TunnelError;

/// An open forward. `close` must be idempotent.
pub trait TunnelHandle: Send {
    fn close(&mut self);
}

/// Something able to open forwards to a device
pub trait TunnelTransport: Send + Sync {
    fn open(
        &self,
        device: &Device,
        local_port: u16,
        device_port: u16,
    ) -> Result<Box<dyn TunnelHandle>, TunnelError>;
}

/// Local and device side of a forward
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortBinding {
    pub local_port: u16,
    pub device_port: u16,
}

/// Forwards through libimobiledevice's `iproxy`
pub struct IproxyTransport {
    program: PathBuf,
}

impl IproxyTransport {
    pub fn new(program: PathBuf) -> Self {
        Self { program }
    }
}

impl TunnelTransport for IproxyTransport {
    fn open(
        &self,
        device: &Device,
        local_port: u16,
        device_port: u16,
    ) -> Result<Box<dyn TunnelHandle>, TunnelError> {
        debug!("{:?} {}:{} -u {}", self.program, local_port, device_port, device.udid);

        let child = Command::new(&self.program)
            .arg(format!("{}:{}", local_port, device_port))
            .arg("-u")
            .arg(&device.udid)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| TunnelError::ForwardFailed {
                local_port,
                device_port,
                reason: e.to_string(),
            })?;

        Ok(Box::new(IproxyTunnel { child: Some(child) }))
    }
}

struct IproxyTunnel {
    child: Option<Child>,
}

impl TunnelHandle for IproxyTunnel {
    fn close(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill() {
                debug!("iproxy already gone: {}", e);
            }
            if let Err(e) = child.wait() {
                debug!("Could not reap iproxy: {}", e);
            }
        }
    }
}

impl Drop for IproxyTunnel {
    fn drop(&mut self) {
        self.close();
    }
}

/// Opens, verifies and releases the session's forward
pub struct TunnelManager {
    transport: Box<dyn TunnelTransport>,
    settle_delay: Duration,
    handle: Option<Box<dyn TunnelHandle>>,
    binding: Option<PortBinding>,
}

impl TunnelManager {
    pub fn new(transport: Box<dyn TunnelTransport>, settle_delay: Duration) -> Self {
        Self {
            transport,
            settle_delay,
            handle: None,
            binding: None,
        }
    }

    pub fn binding(&self) -> Option<PortBinding> {
        self.binding
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    /// Establish the forward `local_port -> device_port`
    pub fn open(&mut self, device: &Device, local_port: u16, device_port: u16) -> Result<PortBinding, TunnelError> {
        if let Some(binding) = self.binding {
            return Err(TunnelError::AlreadyOpen(binding.local_port));
        }

        let handle = self.transport.open(device, local_port, device_port)?;
        let binding = PortBinding { local_port, device_port };

        info!("Forwarding {} -> {} on {}", local_port, device_port, device.udid);
        self.handle = Some(handle);
        self.binding = Some(binding);
        Ok(binding)
    }

    /// After the settle delay, check the local port accepts connections.
    /// A transport can report success without ever binding.
    pub async fn verify(&self, local_port: u16) -> Result<(), TunnelError> {
        tokio::time::sleep(self.settle_delay).await;

        if !is_listening(local_port).await {
            warn!("Nothing listening on {} after forwarding", local_port);
            return Err(TunnelError::NotForwarded(local_port));
        }
        Ok(())
    }

    /// Release the forward. Safe when never opened or already closed.
    pub fn close(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            handle.close();
            if let Some(binding) = self.binding {
                info!("Closed forward on {}", binding.local_port);
            }
        }
        self.binding = None;
    }
}

impl Drop for TunnelManager {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::is_port_free;
    use std::net::{Ipv4Addr, TcpListener};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Binds the local port itself, like a working forward would
    struct ListeningTransport {
        closes: Arc<AtomicUsize>,
    }

    /// Binds loopback only, the way `iproxy` does by default
    struct LoopbackTransport;

    struct ListeningHandle {
        listener: Option<TcpListener>,
        closes: Arc<AtomicUsize>,
    }

    impl TunnelHandle for ListeningHandle {
        fn close(&mut self) {
            if self.listener.take().is_some() {
                self.closes.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    impl TunnelTransport for ListeningTransport {
        fn open(&self, _: &Device, local_port: u16, device_port: u16) -> Result<Box<dyn TunnelHandle>, TunnelError> {
            let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, local_port)).map_err(|e| {
                TunnelError::ForwardFailed { local_port, device_port, reason: e.to_string() }
            })?;
            Ok(Box::new(ListeningHandle {
                listener: Some(listener),
                closes: Arc::clone(&self.closes),
            }))
        }
    }

    impl TunnelTransport for LoopbackTransport {
        fn open(&self, _: &Device, local_port: u16, device_port: u16) -> Result<Box<dyn TunnelHandle>, TunnelError> {
            let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, local_port)).map_err(|e| {
                TunnelError::ForwardFailed { local_port, device_port, reason: e.to_string() }
            })?;
            Ok(Box::new(ListeningHandle {
                listener: Some(listener),
                closes: Arc::new(AtomicUsize::new(0)),
            }))
        }
    }

    /// Reports success but never binds anything
    struct SilentTransport;

    struct NoopHandle;

    impl TunnelHandle for NoopHandle {
        fn close(&mut self) {}
    }

    impl TunnelTransport for SilentTransport {
        fn open(&self, _: &Device, _: u16, _: u16) -> Result<Box<dyn TunnelHandle>, TunnelError> {
            Ok(Box::new(NoopHandle))
        }
    }

    fn device() -> Device {
        Device::from_properties("00008030-001234567890", None, None, None)
    }

    fn free_port() -> u16 {
        TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0)).unwrap().local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn test_open_verify_close() {
        let closes = Arc::new(AtomicUsize::new(0));
        let mut manager = TunnelManager::new(
            Box::new(ListeningTransport { closes: Arc::clone(&closes) }),
            Duration::from_millis(10),
        );
        let port = free_port();

        let binding = manager.open(&device(), port, 22087).unwrap();
        assert_eq!(binding, PortBinding { local_port: port, device_port: 22087 });
        manager.verify(port).await.unwrap();

        manager.close();
        manager.close();
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(!manager.is_open());
        assert!(is_port_free(port));
    }

    #[tokio::test]
    async fn test_loopback_forward_is_verified() {
        let mut manager = TunnelManager::new(Box::new(LoopbackTransport), Duration::from_millis(10));
        let port = free_port();

        manager.open(&device(), port, 22087).unwrap();
        manager.verify(port).await.unwrap();
        manager.close();
    }

    #[tokio::test]
    async fn test_silent_forward_is_not_verified() {
        let mut manager = TunnelManager::new(Box::new(SilentTransport), Duration::from_millis(10));
        let port = free_port();

        manager.open(&device(), port, 22087).unwrap();
        let result = manager.verify(port).await;
        assert!(matches!(result, Err(TunnelError::NotForwarded(p)) if p == port));
    }

    #[test]
    fn test_forward_failure_names_ports() {
        let closes = Arc::new(AtomicUsize::new(0));
        let mut manager = TunnelManager::new(
            Box::new(ListeningTransport { closes }),
            Duration::from_millis(10),
        );
        let _occupied = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0)).unwrap();
        let port = _occupied.local_addr().unwrap().port();

        let err = manager.open(&device(), port, 22087).unwrap_err();
        assert!(err.to_string().contains(&format!("{}->22087", port)));
        assert!(!manager.is_open());
    }

    #[test]
    fn test_close_without_open() {
        let mut manager = TunnelManager::new(Box::new(SilentTransport), Duration::ZERO);
        manager.close();
        assert_eq!(manager.binding(), None);
    }

    #[test]
    fn test_missing_iproxy_is_forward_failure() {
        let transport = IproxyTransport::new(PathBuf::from("/nonexistent/iproxy"));
        let result = transport.open(&device(), 6001, 22087);
        assert!(matches!(result, Err(TunnelError::ForwardFailed { .. })));
    }
}
