//! Device state machine and the value types exchanged with device backends.
//!
//! Pure data and transitions. Backends hold a [`DeviceStatus`] and replace it
//! only with the values returned by its transition methods.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use testbay_common::Platform;

use crate::domain::error::TransitionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerState {
    Off,
    On,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

/// What the device is doing with an application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AppStage {
    Idle,
    Installed,
    Running,
    Exited,
}

/// Observable state of one device.
///
/// `Off → On → Connected → Installed → Running → Exited`; `disconnect` and
/// `power_off` are accepted from every state. Installing again replaces the
/// previous install.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeviceStatus {
    pub power: PowerState,
    pub connection: ConnectionState,
    pub stage: AppStage,
}

impl DeviceStatus {
    #[must_use]
    pub fn off() -> Self {
        Self {
            power: PowerState::Off,
            connection: ConnectionState::Disconnected,
            stage: AppStage::Idle,
        }
    }

    #[must_use]
    pub fn on() -> Self {
        Self {
            power: PowerState::On,
            ..Self::off()
        }
    }

    #[must_use]
    pub fn is_on(&self) -> bool {
        self.power == PowerState::On
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection == ConnectionState::Connected
    }

    #[must_use]
    pub fn powered_on(self) -> Self {
        Self {
            power: PowerState::On,
            ..self
        }
    }

    #[must_use]
    pub fn powered_off(self) -> Self {
        Self::off()
    }

    /// Power cycle: stays on, drops the connection and any app state.
    #[must_use]
    pub fn rebooted(self) -> Self {
        Self::on()
    }

    pub fn connected(self) -> Result<Self, TransitionError> {
        if !self.is_on() {
            return Err(self.refuse("connect"));
        }
        Ok(Self {
            connection: ConnectionState::Connected,
            ..self
        })
    }

    #[must_use]
    pub fn disconnected(self) -> Self {
        Self {
            connection: ConnectionState::Disconnected,
            ..self
        }
    }

    pub fn installed(self) -> Result<Self, TransitionError> {
        if !self.is_connected() {
            return Err(self.refuse("install"));
        }
        Ok(Self {
            stage: AppStage::Installed,
            ..self
        })
    }

    pub fn running(self) -> Result<Self, TransitionError> {
        if !self.is_connected() || !matches!(self.stage, AppStage::Installed | AppStage::Exited) {
            return Err(self.refuse("run"));
        }
        Ok(Self {
            stage: AppStage::Running,
            ..self
        })
    }

    /// The running app exited or was killed. No-op in any other stage.
    #[must_use]
    pub fn exited(self) -> Self {
        if self.stage != AppStage::Running {
            return self;
        }
        Self {
            stage: AppStage::Exited,
            ..self
        }
    }

    fn refuse(self, operation: &'static str) -> TransitionError {
        TransitionError {
            operation,
            state: self.to_string(),
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match (self.power, self.connection, self.stage) {
            (PowerState::Off, _, _) => "off",
            (PowerState::On, ConnectionState::Disconnected, _) => "on",
            (PowerState::On, ConnectionState::Connected, AppStage::Idle) => "connected",
            (PowerState::On, ConnectionState::Connected, AppStage::Installed) => "installed",
            (PowerState::On, ConnectionState::Connected, AppStage::Running) => "running",
            (PowerState::On, ConnectionState::Connected, AppStage::Exited) => "exited",
        };
        f.write_str(label)
    }
}

// ── Directory mappings ────────────────────────────────────────────────────────

/// Logical directories a build can place files into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DirectoryKind {
    Binaries,
    Config,
    Content,
    Demos,
    Profiling,
    Saved,
    Logs,
    Crashes,
}

impl DirectoryKind {
    pub const ALL: [DirectoryKind; 8] = [
        DirectoryKind::Binaries,
        DirectoryKind::Config,
        DirectoryKind::Content,
        DirectoryKind::Demos,
        DirectoryKind::Profiling,
        DirectoryKind::Saved,
        DirectoryKind::Logs,
        DirectoryKind::Crashes,
    ];

    #[must_use]
    pub fn dir_name(self) -> &'static str {
        match self {
            DirectoryKind::Binaries => "Binaries",
            DirectoryKind::Config => "Config",
            DirectoryKind::Content => "Content",
            DirectoryKind::Demos => "Demos",
            DirectoryKind::Profiling => "Profiling",
            DirectoryKind::Saved => "Saved",
            DirectoryKind::Logs => "Saved/Logs",
            DirectoryKind::Crashes => "Saved/Crashes",
        }
    }
}

/// Logical directory → platform path (host path or on-device path).
pub type DirectoryMappings = BTreeMap<DirectoryKind, String>;

/// Build the standard mapping for a sandbox rooted at `root`.
#[must_use]
pub fn sandbox_mappings(root: &str) -> DirectoryMappings {
    let root = root.trim_end_matches('/');
    DirectoryKind::ALL
        .iter()
        .map(|kind| (*kind, format!("{root}/{}", kind.dir_name())))
        .collect()
}

// ── Install inputs and outputs ────────────────────────────────────────────────

/// A file shipped alongside a build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileToCopy {
    pub source: PathBuf,
    pub target: DirectoryKind,
    pub relative: String,
}

/// Where a build comes from. Which fields matter depends on the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildSpec {
    /// Host executable (desktop backends).
    pub executable: Option<PathBuf>,
    /// Android package name.
    pub package: Option<String>,
    pub apk: Option<PathBuf>,
    pub activity: Option<String>,
    pub files: Vec<FileToCopy>,
}

/// What to install on a device for one role instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub name: String,
    pub command_line: String,
    pub build: BuildSpec,
}

/// How an installed app is started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchTarget {
    /// Simulated; nothing is executed.
    Simulated,
    Executable(PathBuf),
    Activity { package: String, activity: String },
}

/// Result of installing a build onto a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppInstall {
    pub name: String,
    pub command_line: String,
    /// Name of the device this install lives on.
    pub device: String,
    /// Root of the staged build on the device.
    pub sandbox: String,
    pub launch: LaunchTarget,
}

// ── Storage layout and artifacts ──────────────────────────────────────────────

/// Names shared by staging and retention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLayout {
    /// Sentinel file written into every directory this framework stages.
    pub marker_file: String,
    /// Crash-dump directory, relative to the device's artifact root.
    pub crash_dir: String,
}

impl Default for ArtifactLayout {
    fn default() -> Self {
        Self {
            marker_file: ".testbay".to_string(),
            crash_dir: "Crashes".to_string(),
        }
    }
}

/// Which part of a device's storage to enumerate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactArea {
    StagedBuilds,
    CrashDumps,
}

/// One top-level entry found on a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactEntry {
    pub path: String,
    /// Last write of the sentinel marker, or of the entry itself when it has
    /// no marker.
    pub modified: DateTime<Utc>,
    pub has_marker: bool,
}

/// Static description of a device, used by listings.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceSummary {
    pub name: String,
    pub platform: Platform,
    pub status: DeviceStatus,
    pub reserved: bool,
}
