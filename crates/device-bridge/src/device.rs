//! Device Lookup
//!
//! Finds an attached iOS device through libimobiledevice
//! (`idevice_id`, `ideviceinfo`).

use std::future::Future;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::DeviceError;

/// Fallback display name when the device reports nothing usable
pub const UNKNOWN_DEVICE_NAME: &str = "iOS Device";

/// Attached device plus best-effort display attributes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub udid: String,
    pub name: String,
    pub os_version: Option<String>,
    pub product_type: Option<String>,
}

impl Device {
    /// Build a device from the properties it reported. The name falls back
    /// to the product type, then to a generic label.
    pub fn from_properties(
        udid: &str,
        device_name: Option<String>,
        product_type: Option<String>,
        os_version: Option<String>,
    ) -> Self {
        let name = device_name
            .clone()
            .or_else(|| product_type.clone())
            .unwrap_or_else(|| UNKNOWN_DEVICE_NAME.to_string());

        Self {
            udid: udid.to_string(),
            name,
            os_version,
            product_type,
        }
    }
}

/// Resolves a device identifier to an attached device
pub trait DeviceLookup: Send + Sync {
    fn lookup(&self, udid: &str) -> impl Future<Output = Result<Device, DeviceError>> + Send;
}

/// libimobiledevice command-line client
pub struct IDeviceClient {
    idevice_id: PathBuf,
    ideviceinfo: PathBuf,
}

impl IDeviceClient {
    pub fn new(idevice_id: PathBuf, ideviceinfo: PathBuf) -> Self {
        Self { idevice_id, ideviceinfo }
    }

    async fn run(&self, program: &PathBuf, args: &[&str]) -> Result<String, DeviceError> {
        debug!("{:?} {:?}", program, args);

        let output = Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => DeviceError::ToolNotFound(program.clone()),
                _ => DeviceError::Io(e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DeviceError::CommandFailed(stderr.trim().to_string()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// UDIDs of all attached devices
    pub async fn list_devices(&self) -> Result<Vec<String>, DeviceError> {
        let output = self.run(&self.idevice_id, &["-l"]).await?;
        Ok(parse_device_list(&output))
    }

    /// Read a single lockdown value; missing values are `None`
    async fn get_value(&self, udid: &str, key: &str) -> Option<String> {
        match self.run(&self.ideviceinfo, &["-u", udid, "-k", key]).await {
            Ok(value) => Some(value.trim().to_string()).filter(|v| !v.is_empty()),
            Err(e) => {
                warn!("Could not read {} from {}: {}", key, udid, e);
                None
            }
        }
    }
}

impl DeviceLookup for IDeviceClient {
    async fn lookup(&self, udid: &str) -> Result<Device, DeviceError> {
        let attached = self.list_devices().await?;
        if !attached.iter().any(|d| d == udid) {
            return Err(DeviceError::NotFound(udid.to_string()));
        }

        let device_name = self.get_value(udid, "DeviceName").await;
        let product_type = self.get_value(udid, "ProductType").await;
        let os_version = self.get_value(udid, "ProductVersion").await;

        Ok(Device::from_properties(udid, device_name, product_type, os_version))
    }
}

/// Parse `idevice_id -l` output, one UDID per line
pub fn parse_device_list(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            // newer releases append " (USB)" or " (Network)"
            line.split_whitespace().next().unwrap_or(line).to_string()
        })
        .collect()
}
