//! Command implementations

pub mod clean;
pub mod devices;
pub mod run;
pub mod version;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use testbay_common::Platform;

use crate::app::AppContext;
use crate::application::ports::{DeviceParam, DevicePool};
use crate::domain::retention::RetentionPolicy;
use crate::infra::seed::resolve_seed;

/// Device pool options shared by every command that touches devices.
#[derive(Args, Debug, Default)]
pub struct PoolArgs {
    /// Devices: comma-separated `<platform>:<ref>` entries, or a file listing them
    #[arg(long, env = "TESTBAY_DEVICES")]
    pub devices: Option<String>,

    /// Host scratch directory for sandboxes and pulled files
    #[arg(long)]
    pub tempdir: Option<PathBuf>,
}

impl PoolArgs {
    /// `--tempdir`, then `temp_dir` from the config, then `<system temp>/testbay`.
    #[must_use]
    pub fn temp_dir(&self, app: &AppContext) -> PathBuf {
        self.tempdir
            .clone()
            .or_else(|| app.config.temp_dir.clone())
            .unwrap_or_else(|| std::env::temp_dir().join("testbay"))
    }
}

/// Build the device pool from the seed, creating every device through the
/// factory registry.
///
/// # Errors
///
/// Returns an error if the seed cannot be read or names a device no factory
/// can create.
pub fn build_device_pool(app: &AppContext, args: &PoolArgs) -> Result<Arc<DevicePool>> {
    let refs = resolve_seed(
        args.devices.as_deref(),
        &app.config.devices,
        Platform::host(),
    )
    .context("invalid device seed")?;
    let param = DeviceParam {
        temp_dir: args.temp_dir(app),
        layout: RetentionPolicy::from_settings(&app.config.retention).layout,
    };
    let pool = Arc::new(DevicePool::new("device"));
    let count = app.registry.populate(&pool, &refs, &param)?;
    tracing::debug!(count, temp_dir = %param.temp_dir.display(), "device pool ready");
    Ok(pool)
}
