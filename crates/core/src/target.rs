//! Device Target
//!
//! The device and signing identity a session builds and runs against.

use crate::error::{CoreError, Result};

/// Device identifier plus developer team used for code signing.
/// Immutable for the lifetime of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceTarget {
    device_id: String,
    team_id: String,
}

impl DeviceTarget {
    /// Create a target, rejecting blank identifiers
    pub fn new(device_id: impl Into<String>, team_id: impl Into<String>) -> Result<Self> {
        let device_id = device_id.into().trim().to_string();
        let team_id = team_id.into().trim().to_string();

        if device_id.is_empty() {
            return Err(CoreError::InvalidTarget("device identifier is empty".into()));
        }
        if team_id.is_empty() {
            return Err(CoreError::InvalidTarget("signing team identifier is empty".into()));
        }

        Ok(Self { device_id, team_id })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn team_id(&self) -> &str {
        &self.team_id
    }

    /// `-destination` value understood by the build toolchain
    pub fn destination(&self) -> String {
        format!("id={}", self.device_id)
    }
}
