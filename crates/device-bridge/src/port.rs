//! Local Port Allocation
//!
//! Probes are a bind followed by an immediate release, so a port reported
//! free can still be taken by someone else before the tunnel binds it.

use std::net::{Ipv4Addr, TcpListener};
use std::time::Duration;
use tracing::debug;

use crate::PortError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// True iff a listener can be bound on `port` and released again
pub fn is_port_free(port: u16) -> bool {
    TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).is_ok()
}

/// True iff something accepts connections on the loopback `port`.
///
/// Forwarders may listen on loopback only, which a wildcard bind probe
/// does not always see.
pub async fn is_listening(port: u16) -> bool {
    match tokio::time::timeout(
        CONNECT_TIMEOUT,
        tokio::net::TcpStream::connect((Ipv4Addr::LOCALHOST, port)),
    )
    .await
    {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            debug!("No listener on {}: {}", port, e);
            false
        }
        Err(_) => false,
    }
}

/// Resolves the local port a session listens on
#[derive(Debug, Clone, Copy)]
pub struct PortAllocator {
    base_port: u16,
}

impl PortAllocator {
    pub fn new(base_port: u16) -> Self {
        Self { base_port }
    }

    pub fn base_port(&self) -> u16 {
        self.base_port
    }

    /// Check a requested port, or scan upward from the base port when
    /// `requested` is 0.
    pub fn resolve(&self, requested: u16) -> Result<u16, PortError> {
        if requested > 0 {
            if !is_port_free(requested) {
                return Err(PortError::InUse(requested));
            }
            return Ok(requested);
        }

        let port = (self.base_port..=u16::MAX)
            .find(|&port| is_port_free(port))
            .ok_or(PortError::NoFreePort { base_port: self.base_port })?;

        debug!("Auto-assigned local port {}", port);
        Ok(port)
    }
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new(crate::DEFAULT_BASE_PORT)
    }
}
