//! Domain layer — pure business logic, types, and validation.
//!
//! This module has zero imports from `crate::infra`, `crate::commands`,
//! `crate::application`, `tokio`, `std::fs`, `std::process`, or `std::net`.
//! All functions are synchronous and take data in, returning data out.

pub mod account;
pub mod device;
pub mod error;
pub mod pool;
pub mod result;
pub mod retention;
pub mod role;
pub mod session;

pub use account::Account;
pub use device::{
    AppConfig, AppInstall, ArtifactArea, ArtifactEntry, ArtifactLayout, BuildSpec,
    DeviceStatus, DirectoryKind, DirectoryMappings, LaunchTarget,
};
pub use error::{CleanupError, ConfigError, DeviceError, EngineError, PoolError};
pub use pool::{Reservable, ResourcePool};
pub use result::{FailureReason, RoleArtifacts, RoleStatus, TestOutcome, TestResult};
pub use retention::RetentionPolicy;
pub use role::{Role, RoleInstanceConfig, TestConfiguration};
pub use session::SessionParams;
