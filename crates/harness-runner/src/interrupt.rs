//! Interrupt handling for toolchain children
//!
//! A terminal Ctrl+C goes to the whole foreground process group. The
//! session cancels through its token, so children are moved into their own
//! group and only the token decides when they die.

use std::process::ExitStatus;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// How long a signal death waits for the token before it counts as a failure
const INTERRUPT_GRACE: Duration = Duration::from_millis(500);

/// Keep `command` out of the terminal's process group
pub(crate) fn detach_from_terminal(command: &mut Command) {
    #[cfg(unix)]
    command.process_group(0);
    #[cfg(not(unix))]
    let _ = command;
}

/// Whether a failed exit is the session being interrupted rather than the
/// toolchain failing on its own
pub(crate) async fn interrupted(status: &ExitStatus, cancel: &CancellationToken) -> bool {
    if cancel.is_cancelled() {
        return true;
    }
    if !killed_by_signal(status) {
        return false;
    }

    debug!("Toolchain died by signal ({}), waiting for cancellation", status);
    tokio::time::timeout(INTERRUPT_GRACE, cancel.cancelled()).await.is_ok()
}

#[cfg(unix)]
fn killed_by_signal(status: &ExitStatus) -> bool {
    use std::os::unix::process::ExitStatusExt;
    status.signal().is_some()
}

#[cfg(not(unix))]
fn killed_by_signal(_: &ExitStatus) -> bool {
    false
}
