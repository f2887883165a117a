use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::types::{Platform, RoleModifier, RoleType};

/// Top-level configuration stored in `~/.testbay/config.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TestbayConfig {
    /// Device seed entries (`<platform>:<ref>`).
    pub devices: Vec<String>,
    /// Host directory used for local device sandboxes and pulled artifacts.
    pub temp_dir: Option<PathBuf>,
    /// Cadence of the cooperative drive loop, in milliseconds.
    pub tick_interval_ms: u64,
    pub retention: RetentionSettings,
    pub acquire: AcquireSettings,
    pub rendezvous: RendezvousSettings,
    /// Test accounts registered into the account pool at startup.
    pub accounts: Vec<AccountEntry>,
    /// Named test definitions selectable with `--testname`.
    pub tests: BTreeMap<String, TestDefinition>,
}

impl Default for TestbayConfig {
    fn default() -> Self {
        Self {
            devices: Vec::new(),
            temp_dir: None,
            tick_interval_ms: default_tick_interval_ms(),
            retention: RetentionSettings::default(),
            acquire: AcquireSettings::default(),
            rendezvous: RendezvousSettings::default(),
            accounts: Vec::new(),
            tests: BTreeMap::new(),
        }
    }
}

fn default_tick_interval_ms() -> u64 {
    100
}

/// How the retention age is compared against the threshold.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AgeBoundary {
    /// Delete only when age is strictly greater than the threshold.
    #[default]
    Exclusive,
    /// Delete when age is greater than or equal to the threshold.
    Inclusive,
}

/// Retention sweep settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionSettings {
    pub max_days: u32,
    pub boundary: AgeBoundary,
    /// Sentinel file written into every directory this framework stages.
    pub marker_file: String,
    /// Crash-dump subdirectory under the device's artifact root.
    pub crash_dir: String,
    pub dry_run: bool,
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            max_days: 7,
            boundary: AgeBoundary::Exclusive,
            marker_file: ".testbay".to_string(),
            crash_dir: "Crashes".to_string(),
            dry_run: false,
        }
    }
}

/// Retry policy when the device pool is exhausted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquireSettings {
    pub attempts: u32,
    pub backoff_secs: u64,
}

impl Default for AcquireSettings {
    fn default() -> Self {
        Self {
            attempts: 5,
            backoff_secs: 120,
        }
    }
}

/// Session discovery parameters injected into rendezvous roles.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RendezvousSettings {
    /// Listener host. Defaults to the address of the server role's device.
    pub host: Option<String>,
    pub port: u16,
    /// Stdout text a rendezvous role prints once it has joined the session.
    pub ready_marker: Option<String>,
    /// Deadline for `ready_marker`. `None` waits until the test's max duration.
    pub timeout_secs: Option<u64>,
}

impl Default for RendezvousSettings {
    fn default() -> Self {
        Self {
            host: None,
            port: 7777,
            ready_marker: None,
            timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccountEntry {
    pub username: String,
    pub credential: String,
}

/// A named test as declared in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestDefinition {
    /// Platform for roles that do not name one.
    #[serde(default)]
    pub platform: Option<Platform>,
    #[serde(default = "default_max_duration_secs")]
    pub max_duration_secs: u64,
    pub roles: Vec<RoleDefinition>,
    #[serde(default)]
    pub completion_marker: Option<String>,
    #[serde(default)]
    pub failure_markers: Vec<String>,
}

fn default_max_duration_secs() -> u64 {
    600
}

/// One role entry of a [`TestDefinition`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleDefinition {
    pub role: RoleType,
    #[serde(default = "default_role_count")]
    pub count: u32,
    #[serde(default)]
    pub platform: Option<Platform>,
    #[serde(default)]
    pub command_line: String,
    #[serde(default)]
    pub controllers: Vec<String>,
    /// Reserve a test account for each instance of this role.
    #[serde(default)]
    pub account: bool,
    /// Build name used for the on-device sandbox. Defaults to the test name.
    #[serde(default)]
    pub build_name: Option<String>,
    /// Host executable for desktop platforms.
    #[serde(default)]
    pub executable: Option<PathBuf>,
    /// Android package name.
    #[serde(default)]
    pub package: Option<String>,
    #[serde(default)]
    pub apk: Option<PathBuf>,
    #[serde(default)]
    pub activity: Option<String>,
    /// `null` runs the role on a simulated device outside the pool.
    #[serde(default)]
    pub modifier: RoleModifier,
}

fn default_role_count() -> u32 {
    1
}
