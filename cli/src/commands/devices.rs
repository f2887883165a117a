//! Devices command — list the seeded pool.

use anyhow::Result;
use clap::Args;

use crate::app::AppContext;
use crate::application::ports::DevicePool;
use crate::commands::{PoolArgs, build_device_pool};
use crate::domain::device::DeviceSummary;

/// Arguments for the devices command.
#[derive(Args, Debug)]
pub struct DevicesArgs {
    /// Connect to each device first so the listing shows live state
    #[arg(long)]
    pub probe: bool,

    #[command(flatten)]
    pub pool: PoolArgs,
}

/// Summaries for every registered device, in seed order.
#[must_use]
pub fn summarize(pool: &DevicePool) -> Vec<DeviceSummary> {
    pool.resources()
        .iter()
        .map(|device| DeviceSummary {
            name: device.name().to_string(),
            platform: device.platform(),
            status: device.status(),
            reserved: pool.is_reserved(device.name()),
        })
        .collect()
}

/// Entry point for `testbay devices`.
///
/// # Errors
///
/// Returns an error if the device seed is invalid or rendering fails.
pub async fn run(app: &AppContext, args: &DevicesArgs) -> Result<i32> {
    let pool = build_device_pool(app, &args.pool)?;
    if args.probe {
        for device in pool.resources() {
            if !device.is_on() && !device.power_on().await {
                tracing::warn!(device = device.name(), "power on failed");
            }
            if !device.connect().await {
                tracing::warn!(device = device.name(), "device unreachable");
            }
        }
    }
    let summaries = summarize(&pool);
    if args.probe {
        for device in pool.resources() {
            device.disconnect().await;
        }
    }
    app.renderer().render_devices(&summaries)?;
    Ok(0)
}
