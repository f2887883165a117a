//! Android device driven over `adb -s <serial>`.
//!
//! All shell access goes through the `CommandRunner` port. Launched apps are
//! observed by a background task polling `pidof` and the app's log file, so
//! `AppInstance` observations stay non-blocking.

use std::path::PathBuf;
use std::process::Output;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use testbay_common::{DeviceRef, Platform};
use tokio::sync::oneshot;

use crate::application::ports::{
    AppInstance, CommandRunner, DeviceFactory, DeviceHandle, DeviceParam, TargetDevice,
};
use crate::domain::device::{
    AppConfig, AppInstall, ArtifactArea, ArtifactEntry, ArtifactLayout, DeviceStatus,
    DirectoryKind, DirectoryMappings, LaunchTarget, sandbox_mappings,
};
use crate::domain::error::DeviceError;
use crate::infra::command_runner::INSTALL_TIMEOUT;

/// Device-side root for everything this tool stages.
const DEVICE_ROOT: &str = "/sdcard/testbay";
const COMMAND_LINE_FILE: &str = "cmdline.txt";
const DEFAULT_ACTIVITY: &str = ".MainActivity";
const POLL_INTERVAL: Duration = Duration::from_secs(1);
/// An empty `pidof` this soon after `am start` may just mean the process is
/// not up yet.
const STARTUP_GRACE: Duration = Duration::from_secs(10);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn stdout_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

// ── Shell helpers ─────────────────────────────────────────────────────────────

/// Thin `adb -s <serial>` wrapper shared by the device and its instances.
#[derive(Clone)]
struct Adb {
    serial: String,
    runner: Arc<dyn CommandRunner>,
}

impl Adb {
    async fn exec(&self, args: &[&str], timeout: Option<Duration>) -> Result<Output> {
        let mut full = vec!["-s", self.serial.as_str()];
        full.extend_from_slice(args);
        match timeout {
            Some(timeout) => self.runner.run_with_timeout("adb", &full, timeout).await,
            None => self.runner.run("adb", &full).await,
        }
    }

    /// Run and require a zero exit status, returning trimmed stdout.
    async fn checked(&self, args: &[&str]) -> Result<String, String> {
        self.checked_with(args, None).await
    }

    async fn checked_with(&self, args: &[&str], timeout: Option<Duration>) -> Result<String, String> {
        match self.exec(args, timeout).await {
            Ok(output) if output.status.success() => Ok(stdout_of(&output)),
            Ok(output) => Err(format!(
                "adb {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )),
            Err(err) => Err(format!("{err:#}")),
        }
    }

    async fn ok(&self, args: &[&str]) -> bool {
        match self.checked(args).await {
            Ok(_) => true,
            Err(detail) => {
                tracing::debug!(device = %self.serial, %detail, "adb command failed");
                false
            }
        }
    }

    async fn shell(&self, command: &str) -> Result<String, String> {
        self.checked(&["shell", command]).await
    }

    async fn is_online(&self) -> bool {
        matches!(self.checked(&["get-state"]).await.as_deref(), Ok("device"))
    }

    /// Network serials (`host:port`) need an explicit `adb connect`.
    fn is_network(&self) -> bool {
        self.serial.contains(':')
    }
}

/// Quote a path for the device shell.
fn quoted(path: &str) -> String {
    format!("'{}'", path.replace('\'', r"'\''"))
}

/// Parse `stat -c '%Y %n'` lines into `(modified, path)` pairs.
fn parse_stat_lines(text: &str) -> Vec<(DateTime<Utc>, String)> {
    text.lines()
        .filter_map(|line| {
            let (secs, path) = line.trim().split_once(' ')?;
            let secs: i64 = secs.parse().ok()?;
            let modified = Utc.timestamp_opt(secs, 0).single()?;
            Some((modified, path.to_string()))
        })
        .collect()
}

// ── Device ────────────────────────────────────────────────────────────────────

struct AndroidState {
    status: DeviceStatus,
    mappings: Option<DirectoryMappings>,
}

pub struct AndroidDevice {
    adb: Adb,
    temp_dir: PathBuf,
    layout: ArtifactLayout,
    state: Arc<Mutex<AndroidState>>,
}

impl AndroidDevice {
    #[must_use]
    pub fn new(
        serial: impl Into<String>,
        runner: Arc<dyn CommandRunner>,
        temp_dir: PathBuf,
        layout: ArtifactLayout,
    ) -> Self {
        Self {
            adb: Adb {
                serial: serial.into(),
                runner,
            },
            temp_dir,
            layout,
            state: Arc::new(Mutex::new(AndroidState {
                status: DeviceStatus::off(),
                mappings: None,
            })),
        }
    }

    fn set_status(&self, update: impl FnOnce(DeviceStatus) -> DeviceStatus) {
        let mut state = lock(&self.state);
        state.status = update(state.status);
    }

    fn storage_error(&self, detail: impl std::fmt::Display) -> DeviceError {
        DeviceError::Storage {
            device: self.adb.serial.clone(),
            detail: detail.to_string(),
        }
    }

    fn area_root(area: ArtifactArea, layout: &ArtifactLayout) -> String {
        match area {
            ArtifactArea::StagedBuilds => format!("{DEVICE_ROOT}/builds"),
            ArtifactArea::CrashDumps => format!("{DEVICE_ROOT}/{}", layout.crash_dir),
        }
    }

    async fn install_package(&self, package: &str, config: &AppConfig) -> Result<(), String> {
        let Some(apk) = &config.build.apk else {
            return Ok(());
        };
        // A stale install with a different signature makes `install -r` fail.
        if !self.adb.ok(&["uninstall", package]).await {
            tracing::debug!(device = %self.adb.serial, package, "nothing to uninstall");
        }
        let apk = apk.to_string_lossy();
        self.adb
            .checked_with(&["install", "-r", &apk], Some(INSTALL_TIMEOUT))
            .await
            .map(|_| ())
    }

    async fn stage(&self, config: &AppConfig, sandbox: &str) -> Result<DirectoryMappings, String> {
        let mappings = sandbox_mappings(sandbox);
        let dirs: Vec<String> = mappings.values().map(|dir| quoted(dir)).collect();
        self.adb
            .shell(&format!("rm -rf {} && mkdir -p {}", quoted(sandbox), dirs.join(" ")))
            .await?;
        let marker = format!("{sandbox}/{}", self.layout.marker_file);
        self.adb.shell(&format!("touch {}", quoted(&marker))).await?;

        let serial = self.adb.serial.replace(':', "_");
        let local = self
            .temp_dir
            .join(format!("{serial}-{}-{COMMAND_LINE_FILE}", config.name));
        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| format!("{}: {err}", parent.display()))?;
        }
        tokio::fs::write(&local, &config.command_line)
            .await
            .map_err(|err| format!("{}: {err}", local.display()))?;
        self.adb
            .checked(&[
                "push",
                &local.to_string_lossy(),
                &format!("{sandbox}/{COMMAND_LINE_FILE}"),
            ])
            .await?;

        for file in &config.build.files {
            let target = format!("{}/{}", mappings[&file.target], file.relative);
            self.adb
                .checked(&["push", &file.source.to_string_lossy(), &target])
                .await?;
        }
        Ok(mappings)
    }
}

#[async_trait]
impl TargetDevice for AndroidDevice {
    fn name(&self) -> &str {
        &self.adb.serial
    }

    fn platform(&self) -> Platform {
        Platform::Android
    }

    fn status(&self) -> DeviceStatus {
        lock(&self.state).status
    }

    fn is_available(&self) -> bool {
        true
    }

    fn host_address(&self) -> String {
        self.adb
            .serial
            .split_once(':')
            .map_or_else(|| self.adb.serial.clone(), |(host, _)| host.to_string())
    }

    async fn power_on(&self) -> bool {
        let woke = self.adb.ok(&["shell", "input", "keyevent", "KEYCODE_WAKEUP"]).await;
        if woke {
            let _ = self.adb.ok(&["shell", "svc", "power", "stayon", "true"]).await;
            self.set_status(DeviceStatus::powered_on);
        }
        woke
    }

    async fn power_off(&self) -> bool {
        let _ = self.adb.ok(&["shell", "input", "keyevent", "KEYCODE_SLEEP"]).await;
        self.set_status(DeviceStatus::powered_off);
        true
    }

    async fn reboot(&self) -> bool {
        if !self.adb.ok(&["reboot"]).await {
            return false;
        }
        self.set_status(DeviceStatus::rebooted);
        self.adb
            .checked_with(&["wait-for-device"], Some(INSTALL_TIMEOUT))
            .await
            .is_ok()
    }

    async fn connect(&self) -> bool {
        if self.adb.is_network() {
            let serial = self.adb.serial.as_str();
            if let Err(err) = self.adb.runner.run("adb", &["connect", serial]).await {
                tracing::warn!(device = %serial, error = %err, "adb connect failed");
                return false;
            }
        }
        if !self.adb.is_online().await {
            tracing::warn!(device = %self.adb.serial, "device not online");
            return false;
        }
        let mut state = lock(&self.state);
        // adb answering means the device is awake enough to talk to.
        let status = if state.status.is_on() {
            state.status
        } else {
            state.status.powered_on()
        };
        match status.connected() {
            Ok(next) => {
                state.status = next;
                true
            }
            Err(err) => {
                tracing::warn!(device = %self.adb.serial, error = %err, "connect refused");
                false
            }
        }
    }

    async fn disconnect(&self) -> bool {
        if self.adb.is_network() {
            let _ = self
                .adb
                .runner
                .run("adb", &["disconnect", self.adb.serial.as_str()])
                .await;
        }
        self.set_status(DeviceStatus::disconnected);
        true
    }

    fn directory_mappings(&self) -> DirectoryMappings {
        if let Some(mappings) = &lock(&self.state).mappings {
            return mappings.clone();
        }
        tracing::warn!(device = %self.adb.serial, "directory mappings requested before install");
        DirectoryMappings::new()
    }

    async fn install_application(&self, config: &AppConfig) -> Result<AppInstall, DeviceError> {
        let install_error = |detail: String| DeviceError::InstallFailed {
            device: self.adb.serial.clone(),
            build: config.name.clone(),
            detail,
        };
        let next = self
            .status()
            .installed()
            .map_err(|err| install_error(err.to_string()))?;
        let package = config
            .build
            .package
            .clone()
            .ok_or_else(|| install_error("no package configured".to_string()))?;

        self.install_package(&package, config)
            .await
            .map_err(install_error)?;
        let sandbox = format!("{DEVICE_ROOT}/builds/{}", config.name);
        let mappings = self.stage(config, &sandbox).await.map_err(install_error)?;
        {
            let mut state = lock(&self.state);
            state.status = next;
            state.mappings = Some(mappings);
        }
        tracing::info!(device = %self.adb.serial, build = %config.name, package = %package, "build installed");

        Ok(AppInstall {
            name: config.name.clone(),
            command_line: config.command_line.clone(),
            device: self.adb.serial.clone(),
            sandbox,
            launch: LaunchTarget::Activity {
                package,
                activity: config
                    .build
                    .activity
                    .clone()
                    .unwrap_or_else(|| DEFAULT_ACTIVITY.to_string()),
            },
        })
    }

    async fn run(&self, install: &AppInstall) -> Result<Box<dyn AppInstance>, DeviceError> {
        if install.device != self.adb.serial {
            return Err(DeviceError::InstallMismatch {
                build: install.name.clone(),
                expected: install.device.clone(),
                actual: self.adb.serial.clone(),
            });
        }
        let launch_error = |detail: String| DeviceError::LaunchFailed {
            device: self.adb.serial.clone(),
            build: install.name.clone(),
            detail,
        };
        let LaunchTarget::Activity { package, activity } = &install.launch else {
            return Err(launch_error("install has no activity".to_string()));
        };
        let next = self
            .status()
            .running()
            .map_err(|err| launch_error(err.to_string()))?;

        let _ = self.adb.ok(&["logcat", "-c"]).await;
        let component = format!("{package}/{activity}");
        self.adb
            .checked(&["shell", "am", "start", "-W", "-S", "-n", &component])
            .await
            .map_err(launch_error)?;
        lock(&self.state).status = next;

        let mappings = sandbox_mappings(&install.sandbox);
        let saved = mappings
            .get(&DirectoryKind::Saved)
            .cloned()
            .unwrap_or_else(|| install.sandbox.clone());
        let log_file = mappings
            .get(&DirectoryKind::Logs)
            .map(|logs| format!("{logs}/{}.log", install.name));

        Ok(Box::new(AndroidInstance::start(
            self.adb.clone(),
            Arc::clone(&self.state),
            package.clone(),
            install.command_line.clone(),
            saved,
            log_file,
        )))
    }

    async fn list_artifacts(
        &self,
        area: ArtifactArea,
        layout: &ArtifactLayout,
    ) -> Result<Vec<ArtifactEntry>, DeviceError> {
        let root = Self::area_root(area, layout);
        let listing = self
            .adb
            .shell(&format!(
                "[ -d {0} ] && find {0} -mindepth 1 -maxdepth 1 -exec stat -c '%Y %n' {{}} + || true",
                quoted(&root)
            ))
            .await
            .map_err(|err| self.storage_error(err))?;
        let markers = self
            .adb
            .shell(&format!(
                "[ -d {0} ] && find {0} -mindepth 2 -maxdepth 2 -name {1} -exec stat -c '%Y %n' {{}} + || true",
                quoted(&root),
                quoted(&layout.marker_file)
            ))
            .await
            .map_err(|err| self.storage_error(err))?;
        let markers = parse_stat_lines(&markers);
        let suffix = format!("/{}", layout.marker_file);

        let mut entries: Vec<ArtifactEntry> = parse_stat_lines(&listing)
            .into_iter()
            .map(|(modified, path)| {
                let marker = markers
                    .iter()
                    .find(|(_, m)| m.strip_suffix(&suffix) == Some(path.as_str()));
                ArtifactEntry {
                    modified: marker.map_or(modified, |(stamp, _)| *stamp),
                    has_marker: marker.is_some(),
                    path,
                }
            })
            .collect();
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    async fn delete_artifact(&self, entry: &ArtifactEntry) -> Result<(), DeviceError> {
        if !entry.path.starts_with(DEVICE_ROOT) {
            return Err(self.storage_error(format!("refusing to delete {}", entry.path)));
        }
        self.adb
            .shell(&format!("rm -rf {}", quoted(&entry.path)))
            .await
            .map(|_| ())
            .map_err(|err| self.storage_error(err))
    }
}

// ── Instance ──────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Observed {
    stdout: String,
    exited: bool,
}

pub struct AndroidInstance {
    device: String,
    command_line: String,
    artifact_path: String,
    observed: Arc<Mutex<Observed>>,
    kill_tx: Option<oneshot::Sender<()>>,
    killed: bool,
}

impl AndroidInstance {
    fn start(
        adb: Adb,
        device_state: Arc<Mutex<AndroidState>>,
        package: String,
        command_line: String,
        artifact_path: String,
        log_file: Option<String>,
    ) -> Self {
        let observed = Arc::new(Mutex::new(Observed::default()));
        let (kill_tx, mut kill_rx) = oneshot::channel::<()>();
        let device = adb.serial.clone();

        let shared = Arc::clone(&observed);
        tokio::spawn(async move {
            let started = Instant::now();
            let mut seen_running = false;
            loop {
                tokio::select! {
                    // Fires on an explicit kill and when the instance is dropped.
                    _ = &mut kill_rx => {
                        let _ = adb.ok(&["shell", "am", "force-stop", &package]).await;
                        break;
                    }
                    () = tokio::time::sleep(POLL_INTERVAL) => {}
                }
                if !adb.is_online().await {
                    tracing::warn!(device = %adb.serial, "device went offline");
                    let mut state = lock(&device_state);
                    state.status = state.status.disconnected();
                    break;
                }
                if let Some(log_file) = &log_file {
                    let cat = format!("cat {} 2>/dev/null || true", quoted(log_file));
                    if let Ok(text) = adb.shell(&cat).await {
                        lock(&shared).stdout = text;
                    }
                }
                let running = adb
                    .shell(&format!("pidof {package} || true"))
                    .await
                    .is_ok_and(|pid| !pid.is_empty());
                seen_running |= running;
                if activity_stopped(running, seen_running, started.elapsed()) {
                    tracing::debug!(device = %adb.serial, package = %package, "activity stopped");
                    break;
                }
            }
            {
                let mut state = lock(&device_state);
                state.status = state.status.exited();
            }
            lock(&shared).exited = true;
        });

        Self {
            device,
            command_line,
            artifact_path,
            observed,
            kill_tx: Some(kill_tx),
            killed: false,
        }
    }
}

impl AppInstance for AndroidInstance {
    fn device_name(&self) -> &str {
        &self.device
    }

    fn command_line(&self) -> &str {
        &self.command_line
    }

    fn has_exited(&self) -> bool {
        self.killed || lock(&self.observed).exited
    }

    fn was_killed(&self) -> bool {
        self.killed
    }

    /// Android does not report process exit codes.
    fn exit_code(&self) -> Option<i32> {
        None
    }

    fn stdout(&self) -> String {
        lock(&self.observed).stdout.clone()
    }

    fn artifact_path(&self) -> Option<String> {
        Some(self.artifact_path.clone())
    }

    fn kill(&mut self) {
        if self.has_exited() {
            return;
        }
        if let Some(tx) = self.kill_tx.take() {
            let _ = tx.send(());
            self.killed = true;
        }
    }
}

/// An empty `pidof` ends the instance once the process was seen or the
/// startup grace has passed.
fn activity_stopped(running: bool, seen_running: bool, waited: Duration) -> bool {
    !running && (seen_running || waited >= STARTUP_GRACE)
}

// ── Factory ───────────────────────────────────────────────────────────────────

/// Factory for `android:<serial>` entries.
pub struct AndroidDeviceFactory {
    runner: Arc<dyn CommandRunner>,
}

impl AndroidDeviceFactory {
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

impl DeviceFactory for AndroidDeviceFactory {
    fn name(&self) -> &'static str {
        "android"
    }

    fn can_support_platform(&self, platform: Platform) -> bool {
        platform == Platform::Android
    }

    fn create_device(
        &self,
        reference: &DeviceRef,
        param: &DeviceParam,
    ) -> Result<DeviceHandle, DeviceError> {
        if reference.reference.contains(char::is_whitespace) {
            return Err(DeviceError::InvalidReference {
                reference: reference.to_string(),
                detail: "adb serials cannot contain whitespace".to_string(),
            });
        }
        Ok(Arc::new(AndroidDevice::new(
            reference.reference.clone(),
            Arc::clone(&self.runner),
            param.temp_dir.clone(),
            param.layout.clone(),
        )))
    }
}
