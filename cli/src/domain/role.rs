//! Per-test declaration of the roles, instances and limits a test needs.
//!
//! A [`TestConfiguration`] is built before any device is touched and is
//! read-only once a run starts.

use std::time::Duration;

use testbay_common::{Platform, RendezvousSettings, RoleModifier, RoleType, TestDefinition};

use crate::domain::device::BuildSpec;
use crate::domain::error::ConfigError;

/// Settings for one instance of a role.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleInstanceConfig {
    /// Extra command-line arguments for this instance.
    pub command_line: String,
    pub controllers: Vec<String>,
    /// Check out a test account for this instance.
    pub needs_account: bool,
    /// Sandbox name on the device. Defaults to the test name.
    pub build_name: Option<String>,
    pub build: BuildSpec,
    /// `Null` instances get a simulated device of their own instead of a
    /// pool reservation.
    pub modifier: RoleModifier,
}

impl RoleInstanceConfig {
    #[must_use]
    pub fn uses_pool(&self) -> bool {
        !self.modifier.is_null()
    }
}

/// A role requirement: one role type on one platform, with one entry per
/// required instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Role {
    pub role_type: RoleType,
    pub platform: Platform,
    pub instances: Vec<RoleInstanceConfig>,
}

impl Role {
    #[must_use]
    pub fn required_count(&self) -> usize {
        self.instances.len()
    }
}

/// Handle to a single instance added by [`TestConfiguration::require_role`].
pub struct RoleHandle<'a> {
    instance: &'a mut RoleInstanceConfig,
}

impl RoleHandle<'_> {
    #[must_use]
    pub fn command_line(self, args: impl Into<String>) -> Self {
        self.instance.command_line = args.into();
        self
    }

    #[must_use]
    pub fn controller(self, name: impl Into<String>) -> Self {
        self.instance.controllers.push(name.into());
        self
    }

    #[must_use]
    pub fn with_account(self) -> Self {
        self.instance.needs_account = true;
        self
    }

    #[must_use]
    pub fn build_name(self, name: impl Into<String>) -> Self {
        self.instance.build_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn build(self, build: BuildSpec) -> Self {
        self.instance.build = build;
        self
    }

    #[must_use]
    pub fn modifier(self, modifier: RoleModifier) -> Self {
        self.instance.modifier = modifier;
        self
    }
}

/// Session discovery parameters and the optional rendezvous deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RendezvousConfig {
    pub host: Option<String>,
    pub port: u16,
    pub ready_marker: Option<String>,
    pub timeout: Option<Duration>,
}

impl Default for RendezvousConfig {
    fn default() -> Self {
        Self::from(&RendezvousSettings::default())
    }
}

impl From<&RendezvousSettings> for RendezvousConfig {
    fn from(settings: &RendezvousSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            ready_marker: settings.ready_marker.clone(),
            timeout: settings.timeout_secs.map(Duration::from_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestConfiguration {
    pub name: String,
    /// Platform used by [`TestConfiguration::require_role`].
    pub default_platform: Platform,
    pub roles: Vec<Role>,
    pub max_duration: Duration,
    /// Stdout text that marks a role as having passed.
    pub completion_marker: Option<String>,
    /// Stdout text that fails the whole test as soon as it is seen.
    pub failure_markers: Vec<String>,
    pub rendezvous: RendezvousConfig,
}

impl TestConfiguration {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default_platform: Platform::host(),
            roles: Vec::new(),
            max_duration: Duration::from_secs(600),
            completion_marker: None,
            failure_markers: Vec::new(),
            rendezvous: RendezvousConfig::default(),
        }
    }

    #[must_use]
    pub fn on_platform(mut self, platform: Platform) -> Self {
        self.default_platform = platform;
        self
    }

    #[must_use]
    pub fn max_duration(mut self, duration: Duration) -> Self {
        self.max_duration = duration;
        self
    }

    /// Add one instance of `role_type` on the default platform.
    pub fn require_role(&mut self, role_type: RoleType) -> RoleHandle<'_> {
        self.require_role_on(role_type, self.default_platform)
    }

    /// Add one instance of `role_type` on `platform`, creating the role
    /// requirement on first use.
    pub fn require_role_on(&mut self, role_type: RoleType, platform: Platform) -> RoleHandle<'_> {
        let idx = match self
            .roles
            .iter()
            .position(|r| r.role_type == role_type && r.platform == platform)
        {
            Some(idx) => idx,
            None => {
                self.roles.push(Role {
                    role_type,
                    platform,
                    instances: Vec::new(),
                });
                self.roles.len() - 1
            }
        };
        let instances = &mut self.roles[idx].instances;
        instances.push(RoleInstanceConfig::default());
        let last = instances.len() - 1;
        RoleHandle {
            instance: &mut instances[last],
        }
    }

    /// Reject configurations that could never run.
    ///
    /// `supports` reports whether a device factory is registered for a
    /// platform.
    pub fn validate(&self, supports: impl Fn(Platform) -> bool) -> Result<(), ConfigError> {
        if self.roles.is_empty() {
            return Err(ConfigError::NoRoles {
                test: self.name.clone(),
            });
        }
        if self.max_duration.is_zero() {
            return Err(ConfigError::ZeroDuration {
                test: self.name.clone(),
            });
        }
        for role in &self.roles {
            if role.instances.is_empty() {
                return Err(ConfigError::EmptyRole {
                    role: role.role_type,
                });
            }
            let pooled = role.instances.iter().any(RoleInstanceConfig::uses_pool);
            let simulated = role.instances.iter().any(|i| !i.uses_pool());
            for (needed, platform) in [(pooled, role.platform), (simulated, Platform::Null)] {
                if needed && !supports(platform) {
                    return Err(ConfigError::NoDeviceFactory {
                        role: role.role_type,
                        platform,
                    });
                }
            }
        }
        Ok(())
    }

    /// Every instance in declaration order.
    pub fn instances(&self) -> impl Iterator<Item = (&Role, &RoleInstanceConfig)> {
        self.roles
            .iter()
            .flat_map(|role| role.instances.iter().map(move |inst| (role, inst)))
    }

    #[must_use]
    pub fn instance_count(&self) -> usize {
        self.roles.iter().map(Role::required_count).sum()
    }

    /// Roles that must find each other: present when the test has both a
    /// server and at least one client.
    #[must_use]
    pub fn needs_rendezvous(&self) -> bool {
        let has = |pred: fn(RoleType) -> bool| self.roles.iter().any(|r| pred(r.role_type));
        has(RoleType::is_server) && has(RoleType::is_client)
    }

    /// Human summary such as `server@null x1, client@null x2`.
    #[must_use]
    pub fn describe_requirements(&self) -> String {
        self.roles
            .iter()
            .map(|r| format!("{}@{} x{}", r.role_type, r.platform, r.required_count()))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Build a configuration from a named YAML definition.
    pub fn from_definition(
        name: &str,
        def: &TestDefinition,
        rendezvous: &RendezvousSettings,
    ) -> Result<Self, ConfigError> {
        let mut config = TestConfiguration::new(name)
            .on_platform(def.platform.unwrap_or_else(Platform::host))
            .max_duration(Duration::from_secs(def.max_duration_secs));
        config.completion_marker.clone_from(&def.completion_marker);
        config.failure_markers.clone_from(&def.failure_markers);
        config.rendezvous = RendezvousConfig::from(rendezvous);

        for role_def in &def.roles {
            if role_def.count == 0 {
                return Err(ConfigError::EmptyRole {
                    role: role_def.role,
                });
            }
            let platform = role_def.platform.unwrap_or(config.default_platform);
            let build = BuildSpec {
                executable: role_def.executable.clone(),
                package: role_def.package.clone(),
                apk: role_def.apk.clone(),
                activity: role_def.activity.clone(),
                files: Vec::new(),
            };
            for _ in 0..role_def.count {
                let mut handle = config
                    .require_role_on(role_def.role, platform)
                    .command_line(role_def.command_line.clone())
                    .build(build.clone())
                    .modifier(role_def.modifier);
                for controller in &role_def.controllers {
                    handle = handle.controller(controller.clone());
                }
                if role_def.account {
                    handle = handle.with_account();
                }
                if let Some(build_name) = &role_def.build_name {
                    let _ = handle.build_name(build_name.clone());
                }
            }
        }
        Ok(config)
    }
}
