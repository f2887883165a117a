//! Application layer — port trait definitions and use-case orchestration.
//!
//! This module depends only on `crate::domain` — never on `crate::infra`,
//! `crate::commands`, or `crate::output`.

pub mod ports;
pub mod registry;
pub mod services;

pub use ports::{
    AccountPool, AppInstance, CommandRunner, ConfigStore, DeviceFactory, DeviceHandle,
    DeviceParam, DevicePool, ProgressReporter, TargetDevice,
};
pub use registry::DeviceFactoryRegistry;
