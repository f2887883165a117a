pub mod config;
pub mod types;

pub use config::{
    AccountEntry, AcquireSettings, AgeBoundary, RendezvousSettings, RetentionSettings,
    RoleDefinition, TestDefinition, TestbayConfig,
};
pub use types::*;
