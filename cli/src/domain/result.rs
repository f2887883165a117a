//! Outcome of one test run, as handed to the reporting collaborator.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use testbay_common::{Platform, RoleType};

/// Why a run failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    Timeout,
    /// A role printed one of the configured failure markers.
    FailureMarker,
    /// A role exited without the completion marker or with a non-zero code.
    RoleFailed,
    LostDevice,
    DeviceUnreachable,
    InstallFailed,
    LaunchFailed,
    InsufficientDevices,
    InsufficientAccounts,
    ConfigurationInvalid,
    RendezvousTimeout,
}

impl FailureReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            FailureReason::Timeout => "timeout",
            FailureReason::FailureMarker => "failure marker",
            FailureReason::RoleFailed => "role failed",
            FailureReason::LostDevice => "lost device",
            FailureReason::DeviceUnreachable => "device unreachable",
            FailureReason::InstallFailed => "install failed",
            FailureReason::LaunchFailed => "launch failed",
            FailureReason::InsufficientDevices => "insufficient devices",
            FailureReason::InsufficientAccounts => "insufficient accounts",
            FailureReason::ConfigurationInvalid => "configuration invalid",
            FailureReason::RendezvousTimeout => "rendezvous timeout",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TestOutcome {
    Passed,
    Failed {
        reason: FailureReason,
        /// Offending role/device and detail, for the log line.
        detail: String,
    },
    Cancelled,
}

impl TestOutcome {
    #[must_use]
    pub fn failed(reason: FailureReason, detail: impl Into<String>) -> Self {
        TestOutcome::Failed {
            reason,
            detail: detail.into(),
        }
    }

    #[must_use]
    pub fn is_passed(&self) -> bool {
        matches!(self, TestOutcome::Passed)
    }

    /// Process exit code for this outcome.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            TestOutcome::Passed => 0,
            TestOutcome::Cancelled => 130,
            TestOutcome::Failed { reason, .. } => match reason {
                FailureReason::ConfigurationInvalid => 2,
                FailureReason::InsufficientDevices | FailureReason::InsufficientAccounts => 3,
                FailureReason::Timeout | FailureReason::RendezvousTimeout => 4,
                _ => 1,
            },
        }
    }
}

impl fmt::Display for TestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestOutcome::Passed => f.write_str("passed"),
            TestOutcome::Cancelled => f.write_str("cancelled"),
            TestOutcome::Failed { reason, detail } if detail.is_empty() => {
                write!(f, "failed ({reason})")
            }
            TestOutcome::Failed { reason, detail } => write!(f, "failed ({reason}): {detail}"),
        }
    }
}

/// Terminal status of one role instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleStatus {
    NotStarted,
    Running,
    Exited,
    Killed,
    LostDevice,
}

impl RoleStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            RoleStatus::NotStarted => "not started",
            RoleStatus::Running => "running",
            RoleStatus::Exited => "exited",
            RoleStatus::Killed => "killed",
            RoleStatus::LostDevice => "lost device",
        }
    }
}

/// What a completed role hands to the reporting collaborator.
#[derive(Debug, Clone, Serialize)]
pub struct RoleArtifacts {
    pub role: RoleType,
    pub platform: Platform,
    pub device: String,
    /// Valid until the device is released.
    pub artifact_path: Option<String>,
    pub stdout: String,
    pub exit_code: Option<i32>,
    pub status: RoleStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct TestResult {
    pub test: String,
    pub outcome: TestOutcome,
    pub roles: Vec<RoleArtifacts>,
    #[serde(serialize_with = "serialize_secs")]
    pub elapsed: Duration,
}

impl TestResult {
    /// Result for a run that never acquired devices.
    #[must_use]
    pub fn not_started(test: impl Into<String>, outcome: TestOutcome) -> Self {
        Self {
            test: test.into(),
            outcome,
            roles: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }

    #[must_use]
    pub fn passed(&self) -> bool {
        self.outcome.is_passed()
    }

    #[must_use]
    pub fn exit_code(&self) -> i32 {
        self.outcome.exit_code()
    }
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

/// Exit code for a batch of results: the first non-zero code wins, with
/// cancellation taking precedence.
#[must_use]
pub fn combined_exit_code(results: &[TestResult]) -> i32 {
    if results
        .iter()
        .any(|r| matches!(r.outcome, TestOutcome::Cancelled))
    {
        return 130;
    }
    results
        .iter()
        .map(TestResult::exit_code)
        .find(|code| *code != 0)
        .unwrap_or(0)
}
