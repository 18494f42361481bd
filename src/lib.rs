//! maestro-ios-device - Maestro UI tests on physical iOS devices
//!
//! Builds the XCTest driver harness for an attached device, launches it,
//! waits for it to report readiness and forwards a local port to it so a
//! host-side Maestro can connect.
//!
//! ## Architecture
//!
//! - `maestro-ios-core`: configuration, device target, session events
//! - `maestro-ios-harness`: harness build, launch and readiness detection
//! - `maestro-ios-bridge`: device lookup, port allocation, port tunnels
//! - `maestro-ios-toolchain`: Maestro detection and one-time setup
//!
//! This crate sequences them into a session ([`SessionCoordinator`]).

pub mod commands;
pub mod error;
pub mod session;

pub use maestro_ios_bridge as bridge;
pub use maestro_ios_core as core;
pub use maestro_ios_harness as harness;
pub use maestro_ios_toolchain as toolchain;

pub use error::SessionError;
pub use session::{ActiveSession, SessionCoordinator};
