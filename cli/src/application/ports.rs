//! Port trait definitions for the Application layer.
//!
//! Ports are the interfaces (contracts) that infrastructure must fulfill.
//! This file imports only from `crate::domain` — never from `crate::infra`,
//! `crate::commands`, or `crate::output`.

use std::path::{Path, PathBuf};
use std::process::Output;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use testbay_common::{DeviceRef, Platform, TestbayConfig};

use crate::domain::device::{
    AppConfig, AppInstall, ArtifactArea, ArtifactEntry, ArtifactLayout, DeviceStatus,
    DirectoryMappings,
};
use crate::domain::error::DeviceError;
use crate::domain::pool::{Reservable, ResourcePool};
use crate::domain::Account;

// ── Target Device Port ────────────────────────────────────────────────────────

/// Uniform contract over every platform backend.
///
/// Hardware interactions that are expected to fail now and then (device
/// unreachable, already in the requested state) report `false`. Only install
/// and run return errors. State is changed exclusively through these methods.
#[async_trait]
pub trait TargetDevice: Send + Sync {
    /// Unique name within the pool.
    fn name(&self) -> &str;
    fn platform(&self) -> Platform;
    fn status(&self) -> DeviceStatus;

    /// Whether the device can currently be used at all.
    fn is_available(&self) -> bool;

    fn is_connected(&self) -> bool {
        self.status().is_connected()
    }

    fn is_on(&self) -> bool {
        self.status().is_on()
    }

    /// Address other roles use to reach an app running on this device.
    fn host_address(&self) -> String {
        self.name().to_string()
    }

    async fn power_on(&self) -> bool;
    /// Idempotent; valid from any state.
    async fn power_off(&self) -> bool;
    async fn reboot(&self) -> bool;
    async fn connect(&self) -> bool;
    /// Idempotent; valid from any state.
    async fn disconnect(&self) -> bool;

    /// Logical directory → device path. Empty (with a warning) before the
    /// first install.
    fn directory_mappings(&self) -> DirectoryMappings;

    async fn install_application(&self, config: &AppConfig) -> Result<AppInstall, DeviceError>;

    /// Start an install produced by this device.
    ///
    /// # Errors
    ///
    /// `DeviceError::InstallMismatch` when `install` was made by another
    /// device; `DeviceError::LaunchFailed` when the app cannot be started.
    async fn run(&self, install: &AppInstall) -> Result<Box<dyn AppInstance>, DeviceError>;

    /// Top-level entries of a storage area, with their sentinel state.
    async fn list_artifacts(
        &self,
        area: ArtifactArea,
        layout: &ArtifactLayout,
    ) -> Result<Vec<ArtifactEntry>, DeviceError>;

    async fn delete_artifact(&self, entry: &ArtifactEntry) -> Result<(), DeviceError>;
}

/// Shared handle to a device. Cloning does not duplicate the device.
pub type DeviceHandle = Arc<dyn TargetDevice>;

impl Reservable for DeviceHandle {
    fn resource_id(&self) -> &str {
        self.name()
    }
}

pub type DevicePool = ResourcePool<DeviceHandle>;
pub type AccountPool = ResourcePool<Account>;

// ── App Instance Port ─────────────────────────────────────────────────────────

/// One launched application. Observations never block, so a tick can poll
/// many instances.
#[async_trait]
pub trait AppInstance: Send + Sync {
    fn device_name(&self) -> &str;
    fn command_line(&self) -> &str;
    fn has_exited(&self) -> bool;
    fn was_killed(&self) -> bool;
    fn exit_code(&self) -> Option<i32>;
    /// Output captured so far.
    fn stdout(&self) -> String;
    /// Where this instance keeps its logs and saved data. Valid until the
    /// device is released.
    fn artifact_path(&self) -> Option<String>;
    /// Request termination. A no-op once the instance has exited.
    fn kill(&mut self);

    /// Poll until the instance exits or `timeout` passes. Returns whether it
    /// exited.
    async fn wait_for_exit(&mut self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while !self.has_exited() {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        true
    }
}

// ── Device Factory Port ───────────────────────────────────────────────────────

/// Environment handed to factories when devices are created from the seed.
#[derive(Debug, Clone)]
pub struct DeviceParam {
    /// Host scratch directory for sandboxes and pulled files.
    pub temp_dir: PathBuf,
    pub layout: ArtifactLayout,
}

pub trait DeviceFactory: Send + Sync {
    fn name(&self) -> &'static str;
    fn can_support_platform(&self, platform: Platform) -> bool;
    fn create_device(
        &self,
        reference: &DeviceRef,
        param: &DeviceParam,
    ) -> Result<DeviceHandle, DeviceError>;
}

// ── Command Runner Port ───────────────────────────────────────────────────────

/// Abstracts process execution so infrastructure can be swapped or mocked.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a program and capture its output.
    ///
    /// Implementations should delegate to `run_with_timeout` using the
    /// instance's configured default timeout.
    async fn run(&self, program: &str, args: &[&str]) -> Result<Output>;
    /// Run a program with a custom timeout override.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be spawned or exceeds `timeout`.
    /// On timeout, the child process must be killed (not left orphaned).
    async fn run_with_timeout(
        &self,
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<Output>;
    /// Spawn a long-running program with piped stdout, without waiting.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be spawned.
    fn spawn(
        &self,
        program: &Path,
        args: &[String],
        cwd: Option<&Path>,
    ) -> Result<tokio::process::Child>;
}

// ── Progress Reporting Port ───────────────────────────────────────────────────

/// Abstracts progress reporting so services can emit events without
/// depending on the Presentation layer. Sync trait — no async needed.
pub trait ProgressReporter: Send + Sync {
    /// Emit an in-progress step message.
    fn step(&self, message: &str);
    /// Emit a success message.
    fn success(&self, message: &str);
    /// Emit a warning message.
    fn warn(&self, message: &str);
}

// ── Config Port ───────────────────────────────────────────────────────────────

/// Loads the YAML configuration.
pub trait ConfigStore {
    /// Load the config, returning defaults when no file exists.
    fn load(&self) -> Result<TestbayConfig>;
    /// Path the config is read from.
    fn path(&self) -> Result<PathBuf>;
}
