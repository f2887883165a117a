//! Application service — test execution engine.
//!
//! Imports only from `crate::domain` and `crate::application`.
//! [`TestExecutor::launch`] reserves, prepares, stages and starts every role
//! of a test; the returned [`TestRun`] is then advanced by bounded,
//! non-blocking [`TestRun::tick`] calls until it produces a [`TestResult`].

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use futures::future::join_all;
use testbay_common::{AcquireSettings, DeviceRef, Platform, RoleType};

use crate::application::ports::{
    AccountPool, AppInstance, DeviceHandle, DeviceParam, DevicePool,
};
use crate::application::registry::DeviceFactoryRegistry;
use crate::domain::account::Account;
use crate::domain::device::{AppConfig, AppInstall, ArtifactLayout};
use crate::domain::error::{DeviceError, EngineError};
use crate::domain::result::{FailureReason, RoleArtifacts, RoleStatus, TestOutcome, TestResult};
use crate::domain::role::{RoleInstanceConfig, TestConfiguration};
use crate::domain::session::{SessionParams, decorate_command_line};

/// How often a backoff sleep re-checks the cancel flag.
const CANCEL_POLL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Launch attempts made by [`TestExecutor::launch_with_retry`].
    pub acquire_attempts: u32,
    pub acquire_backoff: Duration,
    /// Wait for already-started instances after a failed launch.
    pub kill_grace: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from(&AcquireSettings::default())
    }
}

impl From<&AcquireSettings> for EngineSettings {
    fn from(settings: &AcquireSettings) -> Self {
        Self {
            acquire_attempts: settings.attempts,
            acquire_backoff: Duration::from_secs(settings.backoff_secs),
            kill_grace: Duration::from_secs(10),
        }
    }
}

/// Cooperative cancellation shared between a caller and its runs.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ── Reservation lease ─────────────────────────────────────────────────────────

/// Devices and accounts held by one test. Released exactly once, at the
/// latest on drop.
struct Lease {
    device_pool: Arc<DevicePool>,
    account_pool: Arc<AccountPool>,
    devices: Vec<DeviceHandle>,
    accounts: Vec<Account>,
}

impl Lease {
    fn release(&mut self) {
        if self.devices.is_empty() && self.accounts.is_empty() {
            return;
        }
        let devices = std::mem::take(&mut self.devices);
        let accounts = std::mem::take(&mut self.accounts);
        self.device_pool.release_all(&devices);
        self.account_pool.release_all(&accounts);
        tracing::debug!(
            devices = devices.len(),
            accounts = accounts.len(),
            "reservations released"
        );
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.release();
    }
}

// ── Executor ──────────────────────────────────────────────────────────────────

/// Launches tests against shared device and account pools.
pub struct TestExecutor {
    devices: Arc<DevicePool>,
    accounts: Arc<AccountPool>,
    registry: DeviceFactoryRegistry,
    settings: EngineSettings,
    /// Pool devices that failed to connect, install or launch. Never
    /// reserved again by this executor.
    problems: Mutex<BTreeSet<String>>,
}

impl TestExecutor {
    #[must_use]
    pub fn new(
        devices: Arc<DevicePool>,
        accounts: Arc<AccountPool>,
        registry: DeviceFactoryRegistry,
    ) -> Self {
        Self {
            devices,
            accounts,
            registry,
            settings: EngineSettings::default(),
            problems: Mutex::new(BTreeSet::new()),
        }
    }

    #[must_use]
    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn devices(&self) -> &Arc<DevicePool> {
        &self.devices
    }

    #[must_use]
    pub fn accounts(&self) -> &Arc<AccountPool> {
        &self.accounts
    }

    /// Names of devices excluded after a connect, install or launch failure.
    #[must_use]
    pub fn problem_devices(&self) -> Vec<String> {
        self.problems().iter().cloned().collect()
    }

    fn problems(&self) -> MutexGuard<'_, BTreeSet<String>> {
        self.problems.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mark_problem(&self, slot: &RoleSlot) {
        if !slot.config.uses_pool() {
            return;
        }
        if self.problems().insert(slot.device.name().to_string()) {
            tracing::warn!(device = slot.device.name(), "marked as problem device");
        }
    }

    /// Reserve, prepare, stage and start every role of `config`.
    ///
    /// Errors are only returned when nothing was acquired. Anything that goes
    /// wrong after acquisition yields a run that is already finished with a
    /// failed result and has released everything it held.
    ///
    /// # Errors
    ///
    /// `Configuration` for invalid configs, `InsufficientDevices` /
    /// `InsufficientAccounts` when a pool cannot satisfy the whole test, and
    /// `Cancelled` when `cancel` was set before launch.
    pub async fn launch(
        &self,
        config: &TestConfiguration,
        cancel: &CancelFlag,
    ) -> Result<TestRun, EngineError> {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled {
                test: config.name.clone(),
            });
        }
        config.validate(|platform| self.registry.supports(platform))?;

        let (lease, assigned) = self.acquire(config)?;
        tracing::info!(
            test = %config.name,
            devices = lease.devices.len(),
            simulated = assigned.len() - lease.devices.len(),
            accounts = lease.accounts.len(),
            "resources reserved"
        );

        let mut run = TestRun::new(config, lease, assigned, cancel.clone());
        if let Err(outcome) = self.start(&mut run, config).await {
            run.finish(outcome);
        }
        Ok(run)
    }

    /// [`launch`](Self::launch), retrying until the attempts run out or
    /// `cancel` is set. Pool exhaustion is retried after a fixed backoff. A
    /// device that fails to connect, install or launch is marked as a
    /// problem and the test is retried at once on other devices.
    ///
    /// # Errors
    ///
    /// The last launch error, or `Cancelled` when cancelled while waiting.
    /// When an earlier attempt hit a device failure, that failed run is
    /// returned instead of a later pool exhaustion.
    pub async fn launch_with_retry(
        &self,
        config: &TestConfiguration,
        cancel: &CancelFlag,
    ) -> Result<TestRun, EngineError> {
        let attempts = self.settings.acquire_attempts.max(1);
        let mut attempt = 1;
        let mut device_failure: Option<TestRun> = None;
        loop {
            match self.launch(config, cancel).await {
                Ok(run) if run.hit_device_failure() && attempt < attempts => {
                    tracing::warn!(
                        test = %config.name,
                        attempt,
                        attempts,
                        problems = ?self.problem_devices(),
                        "device failure, retrying with other devices"
                    );
                    device_failure = Some(run);
                    attempt += 1;
                }
                Err(err) if err.is_retryable() && attempt < attempts => {
                    tracing::warn!(
                        test = %config.name,
                        attempt,
                        attempts,
                        error = %err,
                        "resources busy, retrying in {}s",
                        self.settings.acquire_backoff.as_secs()
                    );
                    if !sleep_unless_cancelled(self.settings.acquire_backoff, cancel).await {
                        return Err(EngineError::Cancelled {
                            test: config.name.clone(),
                        });
                    }
                    attempt += 1;
                }
                Err(err) if err.is_retryable() => return device_failure.map_or(Err(err), Ok),
                other => return other,
            }
        }
    }

    /// All-or-nothing: either every instance gets a device (and an account
    /// when asked for) or nothing stays reserved.
    ///
    /// Returns the lease and one device per instance in declaration order.
    /// `Null` instances get a fresh simulated device outside the pool.
    fn acquire(
        &self,
        config: &TestConfiguration,
    ) -> Result<(Lease, Vec<DeviceHandle>), EngineError> {
        let problems = self.problems().clone();
        let wants: Vec<_> = config
            .instances()
            .filter(|(_, inst)| inst.uses_pool())
            .map(|(role, _)| {
                let platform = role.platform;
                let problems = &problems;
                move |device: &DeviceHandle| {
                    device.platform() == platform
                        && device.is_available()
                        && !problems.contains(device.name())
                }
            })
            .collect();
        let devices =
            self.devices
                .reserve_all(&wants)
                .map_err(|source| EngineError::InsufficientDevices {
                    test: config.name.clone(),
                    wanted: config.describe_requirements(),
                    source,
                })?;

        let mut lease = Lease {
            device_pool: Arc::clone(&self.devices),
            account_pool: Arc::clone(&self.accounts),
            devices,
            accounts: Vec::new(),
        };

        let mut pooled = lease.devices.iter();
        let mut assigned = Vec::with_capacity(config.instance_count());
        for (idx, (role, inst)) in config.instances().enumerate() {
            if inst.uses_pool() {
                assigned.extend(pooled.next().map(Arc::clone));
            } else {
                assigned.push(self.simulated_device(role.role_type, idx)?);
            }
        }

        let needed = config.instances().filter(|(_, i)| i.needs_account).count();
        if needed > 0 {
            let any: fn(&Account) -> bool = |_| true;
            lease.accounts = self.accounts.reserve_all(&vec![any; needed]).map_err(|source| {
                EngineError::InsufficientAccounts {
                    test: config.name.clone(),
                    source,
                }
            })?;
        }
        Ok((lease, assigned))
    }

    fn simulated_device(&self, role: RoleType, idx: usize) -> Result<DeviceHandle, EngineError> {
        let reference = DeviceRef {
            platform: Platform::Null,
            reference: format!("null-{role}-{idx}"),
        };
        let param = DeviceParam {
            temp_dir: std::env::temp_dir(),
            layout: ArtifactLayout::default(),
        };
        self.registry
            .create_device(&reference, &param)
            .map_err(|source| EngineError::SimulatedDevice { role, source })
    }

    async fn start(&self, run: &mut TestRun, config: &TestConfiguration) -> Result<(), TestOutcome> {
        // Prepare
        let prepared = join_all(run.slots.iter().map(|slot| prepare_device(&slot.device))).await;
        if let Some((slot, _)) = run.slots.iter().zip(&prepared).find(|(_, ok)| !**ok) {
            self.mark_problem(slot);
            return Err(TestOutcome::failed(
                FailureReason::DeviceUnreachable,
                slot.label(),
            ));
        }
        if run.cancel.is_cancelled() {
            return Err(TestOutcome::Cancelled);
        }

        // Stage
        let session = config.needs_rendezvous().then(|| {
            let host = config
                .rendezvous
                .host
                .clone()
                .or_else(|| run.server_host())
                .unwrap_or_else(|| "127.0.0.1".to_string());
            SessionParams::generate(host, config.rendezvous.port)
        });
        if let Some(session) = &session {
            tracing::info!(test = %config.name, session = %session, "session created");
        }

        let installs = join_all(run.slots.iter().map(|slot| {
            let app = AppConfig {
                name: slot
                    .config
                    .build_name
                    .clone()
                    .unwrap_or_else(|| config.name.clone()),
                command_line: decorate_command_line(
                    &slot.config,
                    session.as_ref().filter(|_| slot.rendezvous),
                    slot.account.as_ref(),
                ),
                build: slot.config.build.clone(),
            };
            let device = Arc::clone(&slot.device);
            async move { device.install_application(&app).await }
        }))
        .await;

        let mut staged = Vec::with_capacity(installs.len());
        for (slot, install) in run.slots.iter().zip(installs) {
            match install {
                Ok(install) => staged.push(StagedRole {
                    role_type: slot.role_type,
                    platform: slot.platform,
                    device: Arc::clone(&slot.device),
                    install,
                }),
                Err(err) => {
                    tracing::error!(role = %slot.role_type, device = slot.device.name(), error = %err, "install failed");
                    self.mark_problem(slot);
                    return Err(TestOutcome::failed(
                        FailureReason::InstallFailed,
                        format!("{}: {err}", slot.label()),
                    ));
                }
            }
        }
        if run.cancel.is_cancelled() {
            return Err(TestOutcome::Cancelled);
        }

        // Launch, servers first so clients have something to join.
        let mut order: Vec<usize> = (0..staged.len()).collect();
        order.sort_by_key(|&idx| !staged[idx].role_type.is_server());
        for idx in order {
            match staged[idx].run().await {
                Ok(instance) => {
                    tracing::info!(
                        role = %staged[idx].role_type,
                        device = staged[idx].device.name(),
                        "role started"
                    );
                    run.slots[idx].attach(instance);
                }
                Err(err) => {
                    tracing::error!(role = %staged[idx].role_type, device = staged[idx].device.name(), error = %err, "launch failed");
                    let detail = format!("{} on {}: {err}", staged[idx].role_type, staged[idx].device.name());
                    self.mark_problem(&run.slots[idx]);
                    run.kill_all();
                    for slot in &mut run.slots {
                        if let Some(instance) = slot.instance.as_mut() {
                            if !instance.wait_for_exit(self.settings.kill_grace).await {
                                tracing::warn!(device = slot.device.name(), "instance still running after kill");
                            }
                        }
                    }
                    return Err(TestOutcome::failed(FailureReason::LaunchFailed, detail));
                }
            }
        }
        run.launched = Instant::now();
        Ok(())
    }
}

async fn prepare_device(device: &DeviceHandle) -> bool {
    if !device.is_on() && !device.power_on().await {
        tracing::warn!(device = device.name(), "power on failed");
        return false;
    }
    if !device.is_connected() && !device.connect().await {
        tracing::warn!(device = device.name(), "connect failed");
        return false;
    }
    device.is_connected()
}

/// Returns `false` when cancelled before `total` elapsed.
async fn sleep_unless_cancelled(total: Duration, cancel: &CancelFlag) -> bool {
    let deadline = tokio::time::Instant::now() + total;
    loop {
        if cancel.is_cancelled() {
            return false;
        }
        let now = tokio::time::Instant::now();
        if now >= deadline {
            return true;
        }
        tokio::time::sleep((deadline - now).min(CANCEL_POLL)).await;
    }
}

/// An install bound to the device that produced it.
pub struct StagedRole {
    pub role_type: RoleType,
    pub platform: Platform,
    pub device: DeviceHandle,
    pub install: AppInstall,
}

impl StagedRole {
    /// Start the installed app.
    ///
    /// # Errors
    ///
    /// Propagates the device's launch error.
    pub async fn run(&self) -> Result<Box<dyn AppInstance>, DeviceError> {
        self.device.run(&self.install).await
    }
}

// ── Run ───────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Finished,
}

/// Observable state of one role, for progress displays and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleSnapshot {
    pub role: RoleType,
    pub device: String,
    pub status: RoleStatus,
    pub has_exited: bool,
    pub was_killed: bool,
}

struct Markers {
    completion: Option<String>,
    failures: Vec<String>,
    ready: Option<String>,
}

impl Markers {
    /// Bytes of already-scanned output to rescan so markers split across
    /// ticks are still found.
    fn overlap(&self) -> usize {
        self.failures
            .iter()
            .chain(&self.completion)
            .chain(&self.ready)
            .map(String::len)
            .max()
            .unwrap_or(0)
            .saturating_sub(1)
    }
}

struct RoleSlot {
    role_type: RoleType,
    platform: Platform,
    device: DeviceHandle,
    config: RoleInstanceConfig,
    account: Option<Account>,
    /// Receives session parameters and is subject to the rendezvous deadline.
    rendezvous: bool,
    instance: Option<Box<dyn AppInstance>>,
    status: RoleStatus,
    scanned: usize,
    completed: bool,
    ready: bool,
}

impl RoleSlot {
    fn label(&self) -> String {
        format!("{} on {}", self.role_type, self.device.name())
    }

    fn attach(&mut self, instance: Box<dyn AppInstance>) {
        self.instance = Some(instance);
        self.status = RoleStatus::Running;
    }

    /// Advance one role. Returns an outcome when the whole test must stop.
    fn poll(&mut self, markers: &Markers, overlap: usize) -> Option<TestOutcome> {
        if self.status != RoleStatus::Running {
            return None;
        }
        let instance = self.instance.as_ref()?;
        let stdout = instance.stdout();
        let window = scan_window(&stdout, self.scanned, overlap);

        if let Some(marker) = markers.failures.iter().find(|m| window.contains(m.as_str())) {
            tracing::warn!(role = %self.role_type, device = self.device.name(), marker = %marker, "failure marker seen");
            return Some(TestOutcome::failed(
                FailureReason::FailureMarker,
                format!("{}: '{marker}'", self.label()),
            ));
        }
        if markers.completion.as_deref().is_some_and(|m| window.contains(m)) {
            self.completed = true;
        }
        if markers.ready.as_deref().is_some_and(|m| window.contains(m)) {
            self.ready = true;
        }
        self.scanned = stdout.len();

        if !self.device.is_connected() {
            tracing::warn!(role = %self.role_type, device = self.device.name(), "device lost mid-run");
            self.status = RoleStatus::LostDevice;
        } else if instance.has_exited() {
            tracing::info!(
                role = %self.role_type,
                device = self.device.name(),
                exit_code = ?instance.exit_code(),
                "role exited"
            );
            self.status = if instance.was_killed() {
                RoleStatus::Killed
            } else {
                RoleStatus::Exited
            };
        }
        None
    }

    fn failed_exit_code(&self) -> Option<i32> {
        if self.status != RoleStatus::Exited {
            return None;
        }
        self.instance
            .as_ref()
            .and_then(|i| i.exit_code())
            .filter(|code| *code != 0)
    }

    fn artifacts(&self) -> RoleArtifacts {
        let instance = self.instance.as_deref();
        RoleArtifacts {
            role: self.role_type,
            platform: self.platform,
            device: self.device.name().to_string(),
            artifact_path: instance.and_then(|i| i.artifact_path()),
            stdout: instance.map(|i| i.stdout()).unwrap_or_default(),
            exit_code: instance.and_then(|i| i.exit_code()),
            status: self.status,
        }
    }
}

fn scan_window(text: &str, scanned: usize, overlap: usize) -> &str {
    let mut start = scanned.min(text.len()).saturating_sub(overlap);
    while !text.is_char_boundary(start) {
        start -= 1;
    }
    &text[start..]
}

/// One launched test. Holds its reservations until it finishes.
pub struct TestRun {
    name: String,
    max_duration: Duration,
    rendezvous_timeout: Option<Duration>,
    markers: Markers,
    slots: Vec<RoleSlot>,
    lease: Lease,
    cancel: CancelFlag,
    created: Instant,
    launched: Instant,
    finished: bool,
    result: Option<TestResult>,
}

impl std::fmt::Debug for TestRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestRun")
            .field("name", &self.name)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl TestRun {
    fn new(
        config: &TestConfiguration,
        lease: Lease,
        devices: Vec<DeviceHandle>,
        cancel: CancelFlag,
    ) -> Self {
        let rendezvous = config.needs_rendezvous();
        let mut accounts = lease.accounts.iter();
        let slots = config
            .instances()
            .zip(devices)
            .map(|((role, inst), device)| RoleSlot {
                role_type: role.role_type,
                platform: role.platform,
                device,
                config: inst.clone(),
                account: if inst.needs_account {
                    accounts.next().cloned()
                } else {
                    None
                },
                rendezvous: rendezvous && (role.role_type.is_client() || role.role_type.is_server()),
                instance: None,
                status: RoleStatus::NotStarted,
                scanned: 0,
                completed: false,
                ready: false,
            })
            .collect();

        let now = Instant::now();
        Self {
            name: config.name.clone(),
            max_duration: config.max_duration,
            rendezvous_timeout: config.rendezvous.timeout,
            markers: Markers {
                completion: config.completion_marker.clone(),
                failures: config.failure_markers.clone(),
                ready: config.rendezvous.ready_marker.clone(),
            },
            slots,
            lease,
            cancel,
            created: now,
            launched: now,
            finished: false,
            result: None,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    #[must_use]
    pub fn result(&self) -> Option<&TestResult> {
        self.result.as_ref()
    }

    pub fn take_result(&mut self) -> Option<TestResult> {
        self.result.take()
    }

    /// Request cancellation; observed by the next tick.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<RoleSnapshot> {
        self.slots
            .iter()
            .map(|slot| RoleSnapshot {
                role: slot.role_type,
                device: slot.device.name().to_string(),
                status: slot.status,
                has_exited: slot.instance.as_ref().is_some_and(|i| i.has_exited()),
                was_killed: slot.instance.as_ref().is_some_and(|i| i.was_killed()),
            })
            .collect()
    }

    /// Advance the run by one bounded step. Never awaits.
    pub fn tick(&mut self) -> RunState {
        if self.finished {
            return RunState::Finished;
        }
        if self.cancel.is_cancelled() {
            self.finish(TestOutcome::Cancelled);
            return RunState::Finished;
        }
        let overlap = self.markers.overlap();
        let markers = &self.markers;
        let stop = self
            .slots
            .iter_mut()
            .find_map(|slot| slot.poll(markers, overlap));
        if let Some(outcome) = stop.or_else(|| self.verdict()) {
            self.finish(outcome);
            return RunState::Finished;
        }
        RunState::Running
    }

    /// Roles that must print the completion marker: the pool-backed clients
    /// when there are any, otherwise every pool-backed role.
    fn completion_required(&self, slot: &RoleSlot) -> bool {
        if !slot.config.uses_pool() {
            return false;
        }
        let has_clients = self
            .slots
            .iter()
            .any(|s| s.config.uses_pool() && s.role_type.is_client());
        !has_clients || slot.role_type.is_client()
    }

    /// Finished during launch because a device could not be prepared,
    /// staged or started.
    fn hit_device_failure(&self) -> bool {
        self.result.as_ref().is_some_and(|result| {
            matches!(
                result.outcome,
                TestOutcome::Failed {
                    reason: FailureReason::DeviceUnreachable
                        | FailureReason::InstallFailed
                        | FailureReason::LaunchFailed,
                    ..
                }
            )
        })
    }

    fn verdict(&self) -> Option<TestOutcome> {
        let all_done = self.slots.iter().all(|s| s.status != RoleStatus::Running);
        let lost = self.slots.iter().find(|s| s.status == RoleStatus::LostDevice);

        if all_done {
            if let Some(slot) = lost {
                return Some(TestOutcome::failed(FailureReason::LostDevice, slot.label()));
            }
            if let Some((slot, code)) = self
                .slots
                .iter()
                .find_map(|s| s.failed_exit_code().map(|code| (s, code)))
            {
                return Some(TestOutcome::failed(
                    FailureReason::RoleFailed,
                    format!("{} exited with code {code}", slot.label()),
                ));
            }
            if self.markers.completion.is_some() {
                if let Some(slot) = self
                    .slots
                    .iter()
                    .find(|s| self.completion_required(s) && !s.completed)
                {
                    return Some(TestOutcome::failed(
                        FailureReason::RoleFailed,
                        format!("{} exited without the completion marker", slot.label()),
                    ));
                }
            }
            return Some(TestOutcome::Passed);
        }

        if self.markers.completion.is_some()
            && lost.is_none()
            && self
                .slots
                .iter()
                .filter(|s| self.completion_required(s))
                .all(|s| s.completed)
        {
            return Some(TestOutcome::Passed);
        }

        let elapsed = self.launched.elapsed();
        if let (Some(timeout), Some(_)) = (self.rendezvous_timeout, &self.markers.ready) {
            if elapsed >= timeout {
                if let Some(slot) = self
                    .slots
                    .iter()
                    .find(|s| s.rendezvous && s.status == RoleStatus::Running && !s.ready)
                {
                    return Some(TestOutcome::failed(
                        FailureReason::RendezvousTimeout,
                        format!("{} never reached the session", slot.label()),
                    ));
                }
            }
        }
        if elapsed >= self.max_duration {
            return Some(TestOutcome::failed(
                FailureReason::Timeout,
                format!("exceeded {}s", self.max_duration.as_secs()),
            ));
        }
        None
    }

    /// Kill every instance still running. Idempotent.
    fn kill_all(&mut self) {
        for slot in &mut self.slots {
            let Some(instance) = slot.instance.as_mut() else {
                continue;
            };
            let exited = instance.has_exited();
            if !exited {
                instance.kill();
            }
            if slot.status == RoleStatus::Running {
                slot.status = if exited {
                    RoleStatus::Exited
                } else {
                    RoleStatus::Killed
                };
            }
        }
    }

    /// Kill, collect artifacts, release, record the result. Runs once.
    fn finish(&mut self, outcome: TestOutcome) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.kill_all();
        let roles = self.slots.iter().map(RoleSlot::artifacts).collect();
        self.lease.release();

        if outcome.is_passed() {
            tracing::info!(test = %self.name, "test passed");
        } else {
            tracing::warn!(test = %self.name, outcome = %outcome, "test did not pass");
        }
        self.result = Some(TestResult {
            test: self.name.clone(),
            outcome,
            roles,
            elapsed: self.created.elapsed(),
        });
    }

    fn server_host(&self) -> Option<String> {
        self.slots
            .iter()
            .find(|s| s.role_type.is_server())
            .map(|s| s.device.host_address())
    }
}

impl Drop for TestRun {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!(test = %self.name, "run dropped before finishing");
            self.finish(TestOutcome::Cancelled);
        }
    }
}
