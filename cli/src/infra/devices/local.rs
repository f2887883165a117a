//! Host desktop device: builds are staged into a per-device sandbox under
//! the temp directory and launched as local processes.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use testbay_common::{DeviceRef, Platform};

use crate::application::ports::{
    AppInstance, CommandRunner, DeviceFactory, DeviceHandle, DeviceParam, TargetDevice,
};
use crate::domain::device::{
    AppConfig, AppInstall, ArtifactArea, ArtifactEntry, ArtifactLayout, DeviceStatus,
    DirectoryKind, DirectoryMappings, LaunchTarget, sandbox_mappings,
};
use crate::domain::error::DeviceError;
use crate::domain::session::split_args;
use crate::infra::process::{ExitHook, ProcessInstance};

/// File holding the command line of the staged build.
const COMMAND_LINE_FILE: &str = "cmdline.txt";

struct LocalState {
    status: DeviceStatus,
    mappings: Option<DirectoryMappings>,
    /// Bumped on every launch so a stale instance cannot mark a newer run
    /// as exited.
    launches: u64,
}

fn lock_state(state: &Mutex<LocalState>) -> MutexGuard<'_, LocalState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct LocalDevice {
    name: String,
    platform: Platform,
    /// Artifact root: staged builds live in `builds/`, crash dumps in the
    /// layout's crash directory.
    root: PathBuf,
    layout: ArtifactLayout,
    runner: Arc<dyn CommandRunner>,
    state: Arc<Mutex<LocalState>>,
}

impl LocalDevice {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        platform: Platform,
        root: PathBuf,
        layout: ArtifactLayout,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            name: name.into(),
            platform,
            root,
            layout,
            runner,
            state: Arc::new(Mutex::new(LocalState {
                status: DeviceStatus::on(),
                mappings: None,
                launches: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LocalState> {
        lock_state(&self.state)
    }

    fn builds_dir(&self) -> PathBuf {
        self.root.join("builds")
    }

    fn storage_error(&self, detail: impl std::fmt::Display) -> DeviceError {
        DeviceError::Storage {
            device: self.name.clone(),
            detail: detail.to_string(),
        }
    }

    fn install_error(&self, build: &str, detail: impl std::fmt::Display) -> DeviceError {
        DeviceError::InstallFailed {
            device: self.name.clone(),
            build: build.to_string(),
            detail: detail.to_string(),
        }
    }

    async fn stage(&self, config: &AppConfig, sandbox: &Path) -> std::io::Result<DirectoryMappings> {
        if tokio::fs::try_exists(sandbox).await? {
            tokio::fs::remove_dir_all(sandbox).await?;
        }
        let mappings = sandbox_mappings(&sandbox.to_string_lossy());
        for dir in mappings.values() {
            tokio::fs::create_dir_all(dir).await?;
        }
        tokio::fs::write(
            sandbox.join(&self.layout.marker_file),
            Utc::now().to_rfc3339(),
        )
        .await?;
        tokio::fs::write(sandbox.join(COMMAND_LINE_FILE), &config.command_line).await?;
        for file in &config.build.files {
            let target = Path::new(&mappings[&file.target]).join(&file.relative);
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::copy(&file.source, &target).await?;
        }
        Ok(mappings)
    }
}

fn to_utc(time: SystemTime) -> DateTime<Utc> {
    DateTime::<Utc>::from(time)
}

async fn modified(path: &Path) -> std::io::Result<DateTime<Utc>> {
    Ok(to_utc(tokio::fs::metadata(path).await?.modified()?))
}

#[async_trait]
impl TargetDevice for LocalDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn platform(&self) -> Platform {
        self.platform
    }

    fn status(&self) -> DeviceStatus {
        self.lock().status
    }

    fn is_available(&self) -> bool {
        true
    }

    fn host_address(&self) -> String {
        "127.0.0.1".to_string()
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
        if let Err(err) = tokio::fs::create_dir_all(self.builds_dir()).await {
            tracing::warn!(device = %self.name, error = %err, "cannot create sandbox root");
            return false;
        }
        let mut state = self.lock();
        match state.status.connected() {
            Ok(next) => {
                state.status = next;
                true
            }
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
        let next = self
            .status()
            .installed()
            .map_err(|err| self.install_error(&config.name, err))?;
        let executable = config
            .build
            .executable
            .clone()
            .ok_or_else(|| self.install_error(&config.name, "no executable configured"))?;
        if !tokio::fs::try_exists(&executable).await.unwrap_or(false) {
            return Err(self.install_error(
                &config.name,
                format!("executable {} not found", executable.display()),
            ));
        }

        let sandbox = self.builds_dir().join(&config.name);
        let mappings = self
            .stage(config, &sandbox)
            .await
            .map_err(|err| self.install_error(&config.name, err))?;
        {
            let mut state = self.lock();
            state.status = next;
            state.mappings = Some(mappings);
        }
        tracing::info!(device = %self.name, build = %config.name, sandbox = %sandbox.display(), "build staged");

        Ok(AppInstall {
            name: config.name.clone(),
            command_line: config.command_line.clone(),
            device: self.name.clone(),
            sandbox: sandbox.to_string_lossy().into_owned(),
            launch: LaunchTarget::Executable(executable),
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
        let launch_error = |detail: String| DeviceError::LaunchFailed {
            device: self.name.clone(),
            build: install.name.clone(),
            detail,
        };
        let LaunchTarget::Executable(executable) = &install.launch else {
            return Err(launch_error("install has no host executable".to_string()));
        };
        let next = self
            .status()
            .running()
            .map_err(|err| launch_error(err.to_string()))?;

        let sandbox = Path::new(&install.sandbox);
        let child = self
            .runner
            .spawn(executable, &split_args(&install.command_line), Some(sandbox))
            .map_err(|err| launch_error(format!("{err:#}")))?;
        let launch = {
            let mut state = self.lock();
            state.status = next;
            state.launches += 1;
            state.launches
        };
        let shared = Arc::clone(&self.state);
        let on_exit: ExitHook = Box::new(move || {
            let mut state = lock_state(&shared);
            if state.launches == launch {
                state.status = state.status.exited();
            }
        });

        let saved = sandbox_mappings(&install.sandbox)
            .remove(&DirectoryKind::Saved)
            .unwrap_or_else(|| install.sandbox.clone());
        Ok(Box::new(ProcessInstance::watch_with(
            child,
            &self.name,
            &install.command_line,
            Some(saved),
            Some(on_exit),
        )))
    }

    async fn list_artifacts(
        &self,
        area: ArtifactArea,
        layout: &ArtifactLayout,
    ) -> Result<Vec<ArtifactEntry>, DeviceError> {
        let dir = match area {
            ArtifactArea::StagedBuilds => self.builds_dir(),
            ArtifactArea::CrashDumps => self.root.join(&layout.crash_dir),
        };
        if !tokio::fs::try_exists(&dir).await.unwrap_or(false) {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        let mut read = tokio::fs::read_dir(&dir)
            .await
            .map_err(|err| self.storage_error(format!("{}: {err}", dir.display())))?;
        while let Some(item) = read
            .next_entry()
            .await
            .map_err(|err| self.storage_error(err))?
        {
            let path = item.path();
            let marker = path.join(&layout.marker_file);
            let has_marker = tokio::fs::try_exists(&marker).await.unwrap_or(false);
            let stamped = if has_marker { &marker } else { &path };
            let modified = modified(stamped)
                .await
                .map_err(|err| self.storage_error(format!("{}: {err}", stamped.display())))?;
            entries.push(ArtifactEntry {
                path: path.to_string_lossy().into_owned(),
                modified,
                has_marker,
            });
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    async fn delete_artifact(&self, entry: &ArtifactEntry) -> Result<(), DeviceError> {
        let path = Path::new(&entry.path);
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|err| self.storage_error(format!("{}: {err}", entry.path)))?;
        let result = if meta.is_dir() {
            tokio::fs::remove_dir_all(path).await
        } else {
            tokio::fs::remove_file(path).await
        };
        result.map_err(|err| self.storage_error(format!("{}: {err}", entry.path)))
    }
}

/// Factory for desktop platform entries (`linux:`, `mac:`, `windows:`).
pub struct LocalDeviceFactory {
    runner: Arc<dyn CommandRunner>,
}

impl LocalDeviceFactory {
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

impl DeviceFactory for LocalDeviceFactory {
    fn name(&self) -> &'static str {
        "local"
    }

    fn can_support_platform(&self, platform: Platform) -> bool {
        platform.is_desktop()
    }

    fn create_device(
        &self,
        reference: &DeviceRef,
        param: &DeviceParam,
    ) -> Result<DeviceHandle, DeviceError> {
        if reference.reference.contains(['/', '\\']) || reference.reference == ".." {
            return Err(DeviceError::InvalidReference {
                reference: reference.to_string(),
                detail: "device names must not contain path separators".to_string(),
            });
        }
        let root = param.temp_dir.join("devices").join(&reference.reference);
        Ok(Arc::new(LocalDevice::new(
            reference.reference.clone(),
            reference.platform,
            root,
            param.layout.clone(),
            Arc::clone(&self.runner),
        )))
    }
}
