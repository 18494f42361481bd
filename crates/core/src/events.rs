//! Event System
//!
//! Provides a pub/sub event bus the session publishes lifecycle
//! progress on. The CLI renders these; tests use them to observe
//! readiness without scraping output.

use std::path::PathBuf;
use parking_lot::RwLock;
use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::debug;

/// Lifecycle events emitted by a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Local port reserved for the session
    PortResolved { port: u16 },
    /// Attached device found
    DeviceResolved { device_id: String, name: String, os_version: Option<String> },
    /// Build toolchain invoked
    BuildStarted { timeout_secs: u64 },
    /// Build finished and a run configuration was found
    BuildCompleted { run_configuration: PathBuf },
    /// Harness subprocess spawned
    HarnessLaunched { pid: u32 },
    /// Harness log reported readiness
    HarnessReady,
    /// Tunnel established and verified
    TunnelOpened { local_port: u16, device_port: u16 },
    /// Everything is up; the driver can connect
    Ready { local_port: u16, device_id: String },
    /// Teardown started
    ShuttingDown,
    /// All resources released
    CleanedUp,
}

/// Subscriber handle for receiving events
#[derive(Clone)]
pub struct EventSubscription {
    receiver: Receiver<SessionEvent>,
}

impl EventSubscription {
    /// Receive the next event (blocking)
    pub fn recv(&self) -> Result<SessionEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking)
    pub fn try_recv(&self) -> Result<SessionEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Drain every event received so far
    pub fn drain(&self) -> Vec<SessionEvent> {
        self.receiver.try_iter().collect()
    }

    /// Iterate over events until every publisher is gone
    pub fn iter(&self) -> impl Iterator<Item = SessionEvent> + '_ {
        self.receiver.iter()
    }
}

/// Event bus for publish/subscribe pattern
pub struct EventBus {
    subscribers: RwLock<Vec<Sender<SessionEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> EventSubscription {
        let (sender, receiver) = unbounded();
        self.subscribers.write().push(sender);
        EventSubscription { receiver }
    }

    /// Emit an event to all live subscribers, dropping ones that hung up
    pub fn emit(&self, event: SessionEvent) -> usize {
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|sender| sender.send(event.clone()).is_ok());

        debug!("Event {:?} delivered to {} subscribers", event, subscribers.len());
        subscribers.len()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Disconnect all subscribers so blocking iterators end
    pub fn close(&self) {
        self.subscribers.write().clear();
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
