//! Typed domain error enums.
//!
//! This module has zero imports from `crate::infra`, `crate::commands`,
//! `crate::application`, `tokio`, `std::fs`, `std::process`, or `std::net`.
//! All error types implement `thiserror::Error` and convert to `anyhow::Error`
//! via the `?` operator.

use testbay_common::{Platform, RoleType};
use thiserror::Error;

use crate::domain::result::{FailureReason, TestOutcome};

// ── Pool errors ───────────────────────────────────────────────────────────────

/// Errors raised by a [`crate::domain::pool::ResourcePool`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PoolError {
    /// No resource satisfying the request is available. Retryable.
    #[error("no free {kind} available ({registered} registered, {reserved} reserved)")]
    ResourceExhausted {
        kind: &'static str,
        registered: usize,
        reserved: usize,
    },

    #[error("{kind} '{id}' is already registered")]
    DuplicateResource { kind: &'static str, id: String },
}

impl PoolError {
    /// Exhaustion is transient: another test will eventually release.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, PoolError::ResourceExhausted { .. })
    }
}

// ── Device errors ─────────────────────────────────────────────────────────────

/// State machine violation inside a device backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("cannot {operation} while device is {state}")]
pub struct TransitionError {
    pub operation: &'static str,
    pub state: String,
}

/// Errors surfaced by target device backends.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("device '{device}' is unreachable: {detail}")]
    Unreachable { device: String, detail: String },

    #[error("failed to install '{build}' on '{device}': {detail}")]
    InstallFailed {
        device: String,
        build: String,
        detail: String,
    },

    #[error("failed to launch '{build}' on '{device}': {detail}")]
    LaunchFailed {
        device: String,
        build: String,
        detail: String,
    },

    /// Programmer error: an install was handed to a device it was not made on.
    #[error("install '{build}' was made for device '{expected}' but was run on '{actual}'")]
    InstallMismatch {
        build: String,
        expected: String,
        actual: String,
    },

    #[error("no device factory supports platform '{0}'")]
    UnsupportedPlatform(Platform),

    #[error("invalid device reference '{reference}': {detail}")]
    InvalidReference { reference: String, detail: String },

    #[error("storage operation on '{device}' failed: {detail}")]
    Storage { device: String, detail: String },
}

// ── Configuration errors ──────────────────────────────────────────────────────

/// Test configuration rejected before any resource is touched.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("test '{test}' declares no roles")]
    NoRoles { test: String },

    #[error("role '{role}' requires at least one instance")]
    EmptyRole { role: RoleType },

    #[error("role '{role}' targets platform '{platform}' but no device factory is registered for it")]
    NoDeviceFactory { role: RoleType, platform: Platform },

    #[error("test '{test}' has a max duration of zero")]
    ZeroDuration { test: String },

    #[error("Unknown test: {name}\n\nAvailable tests: {available}")]
    UnknownTest { name: String, available: String },
}

// ── Engine errors ─────────────────────────────────────────────────────────────

/// Errors that stop a test before any device is launched.
///
/// Failures after devices are acquired are reported through
/// [`crate::domain::result::TestResult`] instead.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Configuration(#[from] ConfigError),

    #[error("insufficient devices for test '{test}' (need {wanted}): {source}")]
    InsufficientDevices {
        test: String,
        wanted: String,
        #[source]
        source: PoolError,
    },

    #[error("insufficient accounts for test '{test}': {source}")]
    InsufficientAccounts {
        test: String,
        #[source]
        source: PoolError,
    },

    #[error("cannot create a simulated device for role '{role}': {source}")]
    SimulatedDevice {
        role: RoleType,
        #[source]
        source: DeviceError,
    },

    #[error("test '{test}' was cancelled before launch")]
    Cancelled { test: String },
}

impl EngineError {
    /// Pool exhaustion may clear once other tests release their devices.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::InsufficientDevices { source, .. }
            | EngineError::InsufficientAccounts { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Outcome reported for a test that stopped before launch.
    #[must_use]
    pub fn outcome(&self) -> TestOutcome {
        let reason = match self {
            EngineError::Cancelled { .. } => return TestOutcome::Cancelled,
            EngineError::Configuration(_) | EngineError::SimulatedDevice { .. } => {
                FailureReason::ConfigurationInvalid
            }
            EngineError::InsufficientDevices { .. } => FailureReason::InsufficientDevices,
            EngineError::InsufficientAccounts { .. } => FailureReason::InsufficientAccounts,
        };
        TestOutcome::failed(reason, self.to_string())
    }
}

// ── Cleanup errors ────────────────────────────────────────────────────────────

/// Per-device failure during a retention sweep. Logged, never propagated.
#[derive(Debug, Error)]
pub enum CleanupError {
    #[error("could not power on '{device}'")]
    PowerOn { device: String },

    #[error("could not connect to '{device}'")]
    Connect { device: String },

    #[error(transparent)]
    Device(#[from] DeviceError),
}
