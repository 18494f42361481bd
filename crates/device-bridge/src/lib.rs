//! iOS Device Bridge
//!
//! Talks to physically attached iOS devices: resolves a device by UDID,
//! picks a free local port and forwards it to a port on the device.

pub mod device;
pub mod port;
pub mod tunnel;

pub use device::{Device, DeviceLookup, IDeviceClient};
pub use port::{is_listening, is_port_free, PortAllocator};
pub use tunnel::{IproxyTransport, PortBinding, TunnelHandle, TunnelManager, TunnelTransport};

use std::path::PathBuf;

/// First port tried when auto-assigning
pub const DEFAULT_BASE_PORT: u16 = 6001;

/// Port allocation errors
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("port {0} already in use")]
    InUse(u16),
    #[error("no free port found from {base_port} upward")]
    NoFreePort { base_port: u16 },
}

/// Device lookup errors
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("device {0} not found")]
    NotFound(String),
    #[error("{} not found; install libimobiledevice", .0.display())]
    ToolNotFound(PathBuf),
    #[error("device command failed: {0}")]
    CommandFailed(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Tunnel errors
#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    #[error("port forward failed {local_port}->{device_port}: {reason}")]
    ForwardFailed { local_port: u16, device_port: u16, reason: String },
    #[error("port {0} not forwarded")]
    NotForwarded(u16),
    #[error("a forward is already open on port {0}")]
    AlreadyOpen(u16),
}
