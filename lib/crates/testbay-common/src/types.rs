use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while parsing shared vocabulary from strings.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("unknown platform '{0}'")]
    UnknownPlatform(String),

    #[error("unknown role type '{0}'")]
    UnknownRole(String),

    #[error("empty device reference")]
    EmptyDeviceRef,
}

/// Target platform a device belongs to.
///
/// `Null` and `Unknown` are both served by the simulated backend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Null,
    Linux,
    Mac,
    Windows,
    Android,
    Ios,
    Unknown,
}

impl Platform {
    pub const ALL: [Platform; 7] = [
        Platform::Null,
        Platform::Linux,
        Platform::Mac,
        Platform::Windows,
        Platform::Android,
        Platform::Ios,
        Platform::Unknown,
    ];

    /// The desktop platform this binary is running on.
    #[must_use]
    pub fn host() -> Self {
        if cfg!(target_os = "windows") {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            Platform::Mac
        } else if cfg!(target_os = "linux") {
            Platform::Linux
        } else {
            Platform::Unknown
        }
    }

    #[must_use]
    pub fn is_desktop(self) -> bool {
        matches!(self, Platform::Linux | Platform::Mac | Platform::Windows)
    }

    #[must_use]
    pub fn is_simulated(self) -> bool {
        matches!(self, Platform::Null | Platform::Unknown)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Null => "null",
            Platform::Linux => "linux",
            Platform::Mac => "mac",
            Platform::Windows => "windows",
            Platform::Android => "android",
            Platform::Ios => "ios",
            Platform::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "null" => Ok(Platform::Null),
            "linux" => Ok(Platform::Linux),
            "mac" | "macos" => Ok(Platform::Mac),
            "win64" | "windows" => Ok(Platform::Windows),
            "android" => Ok(Platform::Android),
            "ios" => Ok(Platform::Ios),
            "unknown" => Ok(Platform::Unknown),
            other => Err(ParseError::UnknownPlatform(other.to_string())),
        }
    }
}

/// Participant type in a multi-role test.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum RoleType {
    Client,
    Server,
    Editor,
}

impl RoleType {
    #[must_use]
    pub fn is_client(self) -> bool {
        self == RoleType::Client
    }

    #[must_use]
    pub fn is_server(self) -> bool {
        self == RoleType::Server
    }

    #[must_use]
    pub fn uses_editor(self) -> bool {
        self == RoleType::Editor
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            RoleType::Client => "client",
            RoleType::Server => "server",
            RoleType::Editor => "editor",
        }
    }
}

impl fmt::Display for RoleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoleType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "client" => Ok(RoleType::Client),
            "server" => Ok(RoleType::Server),
            "editor" => Ok(RoleType::Editor),
            other => Err(ParseError::UnknownRole(other.to_string())),
        }
    }
}

/// How an instance of a role is hosted.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RoleModifier {
    /// Runs on a device reserved from the pool.
    #[default]
    None,
    /// Runs on a throwaway simulated device that never touches the pool.
    Null,
}

impl RoleModifier {
    #[must_use]
    pub fn is_null(self) -> bool {
        self == RoleModifier::Null
    }
}

/// A platform-qualified device reference from a device seed, e.g.
/// `android:emulator-5554` or `null:sim-1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceRef {
    pub platform: Platform,
    pub reference: String,
}

impl DeviceRef {
    /// Parse a seed entry. Entries without a platform prefix are assigned
    /// `default_platform`.
    ///
    /// A prefix that is not a known platform is treated as part of the
    /// reference, so `192.168.0.4:5555` stays intact.
    pub fn parse(entry: &str, default_platform: Platform) -> Result<Self, ParseError> {
        let entry = entry.trim();
        if entry.is_empty() {
            return Err(ParseError::EmptyDeviceRef);
        }
        if let Some((prefix, rest)) = entry.split_once(':') {
            if let Ok(platform) = prefix.parse::<Platform>() {
                let reference = rest.trim();
                if reference.is_empty() {
                    return Err(ParseError::EmptyDeviceRef);
                }
                return Ok(Self {
                    platform,
                    reference: reference.to_string(),
                });
            }
        }
        Ok(Self {
            platform: default_platform,
            reference: entry.to_string(),
        })
    }
}

impl fmt::Display for DeviceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.platform, self.reference)
    }
}
