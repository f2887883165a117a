//! Shared test helpers: simulated device pools, executors and configs.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use testbay_cli::application::ports::{AccountPool, DeviceHandle, DevicePool};
use testbay_cli::application::registry::DeviceFactoryRegistry;
use testbay_cli::application::services::engine::{EngineSettings, RunState, TestExecutor, TestRun};
use testbay_cli::domain::{Account, TestConfiguration};
use testbay_cli::infra::devices::{NullDevice, NullDeviceFactory, NullScript};
use testbay_common::{Platform, RoleType};

/// Completion marker used by the client/server configurations below.
pub const COMPLETE: &str = "TEST COMPLETE";

// ── Devices and pools ────────────────────────────────────────────────────────

pub fn null_device(name: &str, platform: Platform, script: NullScript) -> Arc<NullDevice> {
    Arc::new(NullDevice::new(name, platform).with_script(script))
}

pub fn device_pool(devices: &[Arc<NullDevice>]) -> Arc<DevicePool> {
    let pool = DevicePool::with_seed("device", 7);
    for device in devices {
        pool.register(Arc::clone(device) as DeviceHandle)
            .expect("unique device names");
    }
    Arc::new(pool)
}

pub fn handle_pool(devices: Vec<DeviceHandle>) -> Arc<DevicePool> {
    let pool = DevicePool::with_seed("device", 7);
    for device in devices {
        pool.register(device).expect("unique device names");
    }
    Arc::new(pool)
}

pub fn account_pool(names: &[&str]) -> Arc<AccountPool> {
    let pool = AccountPool::with_seed("account", 7);
    for name in names {
        pool.register(Account::new(*name, "secret"))
            .expect("unique account names");
    }
    Arc::new(pool)
}

pub fn null_registry() -> DeviceFactoryRegistry {
    let mut registry = DeviceFactoryRegistry::new();
    registry.register(Arc::new(NullDeviceFactory));
    registry
}

/// Executor with fast retry settings.
pub fn executor(devices: Arc<DevicePool>, accounts: Arc<AccountPool>) -> TestExecutor {
    TestExecutor::new(devices, accounts, null_registry()).with_settings(EngineSettings {
        acquire_attempts: 1,
        acquire_backoff: Duration::from_millis(10),
        kill_grace: Duration::from_millis(100),
    })
}

// ── Configurations ───────────────────────────────────────────────────────────

/// Server on `null`, client on `unknown`: the platform split pins each role
/// to a known device.
pub fn client_server(name: &str) -> TestConfiguration {
    let mut config = TestConfiguration::new(name)
        .on_platform(Platform::Null)
        .max_duration(Duration::from_secs(10));
    let _ = config.require_role_on(RoleType::Server, Platform::Null);
    let _ = config.require_role_on(RoleType::Client, Platform::Unknown);
    config.completion_marker = Some(COMPLETE.to_string());
    config
}

pub fn single_client(name: &str) -> TestConfiguration {
    let mut config = TestConfiguration::new(name)
        .on_platform(Platform::Null)
        .max_duration(Duration::from_secs(10));
    let _ = config.require_role(RoleType::Client);
    config
}

// ── Driving ──────────────────────────────────────────────────────────────────

/// Tick `run` every few milliseconds until it finishes or `limit` passes.
pub async fn drive(run: &mut TestRun, limit: Duration) -> RunState {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if run.tick() == RunState::Finished {
            return RunState::Finished;
        }
        if tokio::time::Instant::now() >= deadline {
            return RunState::Running;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
