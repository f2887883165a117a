//! Simulated device: every operation succeeds without touching hardware.
//!
//! Serves `null` and `unknown` platform entries and drives engine tests. An
//! optional [`NullScript`] controls what launched instances print, how long
//! they run and how they exit. Storage is an in-memory artifact list.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use testbay_common::{DeviceRef, Platform};

use crate::application::ports::{
    AppInstance, DeviceFactory, DeviceHandle, DeviceParam, TargetDevice,
};
use crate::domain::device::{
    AppConfig, AppInstall, AppStage, ArtifactArea, ArtifactEntry, ArtifactLayout, DeviceStatus,
    DirectoryMappings, LaunchTarget, sandbox_mappings,
};
use crate::domain::error::{DeviceError, TransitionError};

/// Behaviour of instances launched on a [`NullDevice`].
#[derive(Debug, Clone, Default)]
pub struct NullScript {
    pub stdout: String,
    /// Time until the instance exits on its own. `None` runs until killed.
    pub run_for: Option<Duration>,
    pub exit_code: i32,
}

impl NullScript {
    /// Runs until killed.
    #[must_use]
    pub fn forever() -> Self {
        Self {
            run_for: None,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn exits_after(run_for: Duration, exit_code: i32) -> Self {
        Self {
            run_for: Some(run_for),
            exit_code,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn printing(mut self, stdout: impl Into<String>) -> Self {
        self.stdout = stdout.into();
        self
    }
}

struct NullState {
    status: DeviceStatus,
    mappings: Option<DirectoryMappings>,
    artifacts: Vec<(ArtifactArea, ArtifactEntry)>,
    script: NullScript,
    /// Bumped on every launch; instances only touch the status of their own.
    launches: u64,
    /// When the current scripted instance exits on its own.
    exits_at: Option<Instant>,
}

impl NullState {
    /// Power on and connect as needed. The simulated device never refuses.
    fn bring_up(&mut self) -> Result<(), TransitionError> {
        if !self.status.is_on() {
            self.status = self.status.powered_on();
        }
        if !self.status.is_connected() {
            self.status = self.status.connected()?;
        }
        Ok(())
    }

    /// Apply a scripted exit whose time has come.
    fn settle(&mut self) {
        if self.exits_at.is_some_and(|at| Instant::now() >= at) {
            self.exits_at = None;
            self.status = self.status.exited();
        }
    }

    fn instance_gone(&mut self, launch: u64) {
        if self.launches == launch {
            self.exits_at = None;
            self.status = self.status.exited();
        }
    }
}

fn lock_state(state: &Mutex<NullState>) -> MutexGuard<'_, NullState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct NullDevice {
    name: String,
    platform: Platform,
    root: String,
    state: Arc<Mutex<NullState>>,
}

impl NullDevice {
    #[must_use]
    pub fn new(name: impl Into<String>, platform: Platform) -> Self {
        let name = name.into();
        Self {
            root: format!("/null/{name}"),
            name,
            platform,
            state: Arc::new(Mutex::new(NullState {
                status: DeviceStatus::on(),
                mappings: None,
                artifacts: Vec::new(),
                script: NullScript::exits_after(Duration::ZERO, 0),
                launches: 0,
                exits_at: None,
            })),
        }
    }

    #[must_use]
    pub fn with_script(self, script: NullScript) -> Self {
        self.lock().script = script;
        self
    }

    /// Seed the in-memory storage.
    #[must_use]
    pub fn with_artifact(self, area: ArtifactArea, entry: ArtifactEntry) -> Self {
        self.lock().artifacts.push((area, entry));
        self
    }

    /// Paths currently held in simulated storage.
    #[must_use]
    pub fn artifact_paths(&self) -> Vec<String> {
        self.lock()
            .artifacts
            .iter()
            .map(|(_, e)| e.path.clone())
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, NullState> {
        lock_state(&self.state)
    }
}

#[async_trait]
impl TargetDevice for NullDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn platform(&self) -> Platform {
        self.platform
    }

    fn status(&self) -> DeviceStatus {
        let mut state = self.lock();
        state.settle();
        state.status
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn power_on(&self) -> bool {
        let mut state = self.lock();
        state.status = state.status.powered_on();
        true
    }

    async fn power_off(&self) -> bool {
        let mut state = self.lock();
        state.status = state.status.powered_off();
        true
    }

    async fn reboot(&self) -> bool {
        let mut state = self.lock();
        state.status = state.status.rebooted();
        true
    }

    async fn connect(&self) -> bool {
        match self.lock().bring_up() {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(device = %self.name, error = %err, "connect refused");
                false
            }
        }
    }

    async fn disconnect(&self) -> bool {
        let mut state = self.lock();
        state.status = state.status.disconnected();
        true
    }

    fn directory_mappings(&self) -> DirectoryMappings {
        if let Some(mappings) = &self.lock().mappings {
            return mappings.clone();
        }
        tracing::warn!(device = %self.name, "directory mappings requested before install");
        DirectoryMappings::new()
    }

    async fn install_application(&self, config: &AppConfig) -> Result<AppInstall, DeviceError> {
        let mut state = self.lock();
        let install_error = |err: TransitionError| DeviceError::InstallFailed {
            device: self.name.clone(),
            build: config.name.clone(),
            detail: err.to_string(),
        };
        state.bring_up().map_err(install_error)?;
        state.status = state.status.installed().map_err(install_error)?;
        let sandbox = format!("{}/{}", self.root, config.name);
        state.mappings = Some(sandbox_mappings(&sandbox));
        state.artifacts.retain(|(_, e)| e.path != sandbox);
        state.artifacts.push((
            ArtifactArea::StagedBuilds,
            ArtifactEntry {
                path: sandbox.clone(),
                modified: Utc::now(),
                has_marker: true,
            },
        ));
        tracing::debug!(device = %self.name, build = %config.name, "simulated install");
        Ok(AppInstall {
            name: config.name.clone(),
            command_line: config.command_line.clone(),
            device: self.name.clone(),
            sandbox,
            launch: LaunchTarget::Simulated,
        })
    }

    async fn run(&self, install: &AppInstall) -> Result<Box<dyn AppInstance>, DeviceError> {
        if install.device != self.name {
            return Err(DeviceError::InstallMismatch {
                build: install.name.clone(),
                expected: install.device.clone(),
                actual: self.name.clone(),
            });
        }
        let launch_error = |err: TransitionError| DeviceError::LaunchFailed {
            device: self.name.clone(),
            build: install.name.clone(),
            detail: err.to_string(),
        };
        let mut state = self.lock();
        state.settle();
        state.bring_up().map_err(launch_error)?;
        match state.status.stage {
            // Reboot or power cycle since install; the build is still there.
            AppStage::Idle => state.status = state.status.installed().map_err(launch_error)?,
            // A new launch supersedes the previous instance.
            AppStage::Running => state.status = state.status.exited(),
            AppStage::Installed | AppStage::Exited => {}
        }
        state.status = state.status.running().map_err(launch_error)?;
        state.launches += 1;
        let started = Instant::now();
        state.exits_at = state.script.run_for.map(|limit| started + limit);
        Ok(Box::new(NullInstance {
            device: self.name.clone(),
            command_line: install.command_line.clone(),
            artifact_path: format!("{}/Saved", install.sandbox),
            script: state.script.clone(),
            started,
            killed: false,
            state: Arc::clone(&self.state),
            launch: state.launches,
        }))
    }

    async fn list_artifacts(
        &self,
        area: ArtifactArea,
        _layout: &ArtifactLayout,
    ) -> Result<Vec<ArtifactEntry>, DeviceError> {
        Ok(self
            .lock()
            .artifacts
            .iter()
            .filter(|(a, _)| *a == area)
            .map(|(_, e)| e.clone())
            .collect())
    }

    async fn delete_artifact(&self, entry: &ArtifactEntry) -> Result<(), DeviceError> {
        self.lock().artifacts.retain(|(_, e)| e.path != entry.path);
        Ok(())
    }
}

/// Instance produced by [`NullDevice::run`].
pub struct NullInstance {
    device: String,
    command_line: String,
    artifact_path: String,
    script: NullScript,
    started: Instant,
    killed: bool,
    state: Arc<Mutex<NullState>>,
    launch: u64,
}

impl NullInstance {
    fn ran_to_end(&self) -> bool {
        self.script
            .run_for
            .is_some_and(|limit| self.started.elapsed() >= limit)
    }
}

impl AppInstance for NullInstance {
    fn device_name(&self) -> &str {
        &self.device
    }

    fn command_line(&self) -> &str {
        &self.command_line
    }

    fn has_exited(&self) -> bool {
        self.killed || self.ran_to_end()
    }

    fn was_killed(&self) -> bool {
        self.killed
    }

    fn exit_code(&self) -> Option<i32> {
        if self.killed {
            None
        } else if self.ran_to_end() {
            Some(self.script.exit_code)
        } else {
            None
        }
    }

    fn stdout(&self) -> String {
        self.script.stdout.clone()
    }

    fn artifact_path(&self) -> Option<String> {
        Some(self.artifact_path.clone())
    }

    fn kill(&mut self) {
        if !self.has_exited() {
            self.killed = true;
            lock_state(&self.state).instance_gone(self.launch);
        }
    }
}

/// Factory for `null` and `unknown` platform entries.
pub struct NullDeviceFactory;

impl DeviceFactory for NullDeviceFactory {
    fn name(&self) -> &'static str {
        "null"
    }

    fn can_support_platform(&self, platform: Platform) -> bool {
        platform.is_simulated()
    }

    fn create_device(
        &self,
        reference: &DeviceRef,
        _param: &DeviceParam,
    ) -> Result<DeviceHandle, DeviceError> {
        Ok(std::sync::Arc::new(NullDevice::new(
            reference.reference.clone(),
            reference.platform,
        )))
    }
}
