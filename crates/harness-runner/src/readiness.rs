//! Readiness Detection
//!
//! The harness has no structured readiness signal, only its log text.
//! [`classify`] maps the full accumulated log to a [`Readiness`] and is
//! free of I/O and timing so it can be tested against literal fixtures.

use std::fmt;

/// Generic startup marker
pub const STARTED_MARKER: &str = "started";

/// Emitted once XCTest begins running the suite
pub const TEST_SUITE_MARKER: &str = "Test Suite";

/// The harness's own identifier
pub const HARNESS_MARKER: &str = "maestro-driver-ios";

/// The developer certificate has not been trusted on the device
pub const CERTIFICATE_NOT_TRUSTED_MARKER: &str = "Developer App Certificate is not trusted";

/// xcodebuild gave up on the test run
pub const TESTING_FAILED_MARKER: &str = "Testing failed:";

/// Known harness failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    CertificateNotTrusted,
    RunnerFailed,
}

impl FailureReason {
    pub fn reason(&self) -> &'static str {
        match self {
            FailureReason::CertificateNotTrusted => {
                "certificate not trusted - trust it in Settings > General > VPN & Device Management"
            }
            FailureReason::RunnerFailed => "runner failed",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason())
    }
}

/// Outcome of classifying the harness log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    NotYetReady,
    Ready,
    Failed(FailureReason),
}

/// Classify the whole harness log.
///
/// Failure markers win over the success markers: a run that started and
/// then failed reports `Failed`.
pub fn classify(log: &str) -> Readiness {
    if log.contains(CERTIFICATE_NOT_TRUSTED_MARKER) {
        return Readiness::Failed(FailureReason::CertificateNotTrusted);
    }
    if log.contains(TESTING_FAILED_MARKER) {
        return Readiness::Failed(FailureReason::RunnerFailed);
    }

    let started = log.contains(STARTED_MARKER);
    let identified = log.contains(TEST_SUITE_MARKER) || log.contains(HARNESS_MARKER);
    if started && identified {
        return Readiness::Ready;
    }

    Readiness::NotYetReady
}
