//! Hand-written mocks for ports the simulated device does not cover.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use testbay_cli::application::ports::{AppInstance, ConfigStore, ProgressReporter, TargetDevice};
use testbay_cli::domain::device::{
    AppConfig, AppInstall, ArtifactArea, ArtifactEntry, ArtifactLayout, DeviceStatus,
    DirectoryMappings,
};
use testbay_cli::domain::error::DeviceError;
use testbay_cli::infra::devices::NullDevice;
use testbay_common::{Platform, TestbayConfig};

// ── FaultyDevice ─────────────────────────────────────────────────────────────

/// A [`NullDevice`] whose selected operations fail.
pub struct FaultyDevice {
    inner: NullDevice,
    pub fail_connect: bool,
    pub fail_install: bool,
    pub fail_list: bool,
    pub fail_run: bool,
    /// Runs once, at the start of the next `list_artifacts`.
    on_list: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl FaultyDevice {
    pub fn new(inner: NullDevice) -> Self {
        Self {
            inner,
            fail_connect: false,
            fail_install: false,
            fail_list: false,
            fail_run: false,
            on_list: Mutex::new(None),
        }
    }

    pub fn on_next_list(&self, hook: impl FnOnce() + Send + 'static) {
        *self.on_list.lock().expect("hook lock") = Some(Box::new(hook));
    }

    pub fn failing_connect(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    pub fn failing_install(mut self) -> Self {
        self.fail_install = true;
        self
    }

    pub fn failing_list(mut self) -> Self {
        self.fail_list = true;
        self
    }

    pub fn failing_run(mut self) -> Self {
        self.fail_run = true;
        self
    }

    pub fn artifact_paths(&self) -> Vec<String> {
        self.inner.artifact_paths()
    }
}

#[async_trait]
impl TargetDevice for FaultyDevice {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn platform(&self) -> Platform {
        self.inner.platform()
    }

    fn status(&self) -> DeviceStatus {
        self.inner.status()
    }

    fn is_available(&self) -> bool {
        self.inner.is_available()
    }

    async fn power_on(&self) -> bool {
        self.inner.power_on().await
    }

    async fn power_off(&self) -> bool {
        self.inner.power_off().await
    }

    async fn reboot(&self) -> bool {
        self.inner.reboot().await
    }

    async fn connect(&self) -> bool {
        !self.fail_connect && self.inner.connect().await
    }

    async fn disconnect(&self) -> bool {
        self.inner.disconnect().await
    }

    fn directory_mappings(&self) -> DirectoryMappings {
        self.inner.directory_mappings()
    }

    async fn install_application(&self, config: &AppConfig) -> Result<AppInstall, DeviceError> {
        if self.fail_install {
            return Err(DeviceError::InstallFailed {
                device: self.name().to_string(),
                build: config.name.clone(),
                detail: "disk full".into(),
            });
        }
        self.inner.install_application(config).await
    }

    async fn run(&self, install: &AppInstall) -> Result<Box<dyn AppInstance>, DeviceError> {
        if self.fail_run {
            return Err(DeviceError::LaunchFailed {
                device: self.name().to_string(),
                build: install.name.clone(),
                detail: "activity crashed on start".into(),
            });
        }
        self.inner.run(install).await
    }

    async fn list_artifacts(
        &self,
        area: ArtifactArea,
        layout: &ArtifactLayout,
    ) -> Result<Vec<ArtifactEntry>, DeviceError> {
        let hook = self.on_list.lock().expect("hook lock").take();
        if let Some(hook) = hook {
            hook();
        }
        if self.fail_list {
            return Err(DeviceError::Storage {
                device: self.name().to_string(),
                detail: "listing failed".into(),
            });
        }
        self.inner.list_artifacts(area, layout).await
    }

    async fn delete_artifact(&self, entry: &ArtifactEntry) -> Result<(), DeviceError> {
        self.inner.delete_artifact(entry).await
    }
}

// ── RecordingReporter ────────────────────────────────────────────────────────

/// Collects every progress message as `"<kind>: <message>"`.
#[derive(Default)]
pub struct RecordingReporter {
    pub messages: Mutex<Vec<String>>,
}

impl RecordingReporter {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().expect("reporter lock").clone()
    }

    fn push(&self, kind: &str, message: &str) {
        self.messages
            .lock()
            .expect("reporter lock")
            .push(format!("{kind}: {message}"));
    }
}

impl ProgressReporter for RecordingReporter {
    fn step(&self, message: &str) {
        self.push("step", message);
    }

    fn success(&self, message: &str) {
        self.push("success", message);
    }

    fn warn(&self, message: &str) {
        self.push("warn", message);
    }
}

// ── MemoryConfigStore ────────────────────────────────────────────────────────

/// Config store backed by a value instead of a file.
pub struct MemoryConfigStore {
    pub config: TestbayConfig,
}

impl ConfigStore for MemoryConfigStore {
    fn load(&self) -> Result<TestbayConfig> {
        Ok(self.config.clone())
    }

    fn path(&self) -> Result<PathBuf> {
        Ok(PathBuf::from("memory"))
    }
}
