//! maestro-ios-device Core - configuration and shared types
//!
//! This crate holds what every other crate in the workspace agrees on:
//! the application configuration, the device target a session runs
//! against, and the event bus sessions report progress on.

pub mod config;
pub mod error;
pub mod events;
pub mod target;

pub use config::{AppConfig, BridgeConfig, HarnessConfig, SessionConfig, ToolchainConfig};
pub use error::{CoreError, Result};
pub use events::{EventBus, EventSubscription, SessionEvent};
pub use target::DeviceTarget;

/// Tool version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Tool name
pub const APP_NAME: &str = "maestro-ios-device";
