//! Clean command — retention sweep over every pool device.

use anyhow::Result;
use chrono::Utc;
use clap::Args;

use crate::app::AppContext;
use crate::application::services::cleanup::sweep;
use crate::commands::{PoolArgs, build_device_pool};
use crate::domain::retention::RetentionPolicy;
use crate::output::reporter::{LogReporter, TerminalReporter};

/// Arguments for the clean command.
#[derive(Args, Debug)]
pub struct CleanArgs {
    /// Delete staged builds and crash dumps older than this many days
    #[arg(long)]
    pub maxdays: Option<u32>,

    /// Report what would be deleted without deleting anything
    #[arg(long)]
    pub dry_run: bool,

    #[command(flatten)]
    pub pool: PoolArgs,
}

/// Retention policy from the config file with CLI overrides applied.
#[must_use]
pub fn policy(app: &AppContext, args: &CleanArgs) -> RetentionPolicy {
    let mut settings = app.config.retention.clone();
    if let Some(days) = args.maxdays {
        settings.max_days = days;
    }
    settings.dry_run |= args.dry_run;
    RetentionPolicy::from_settings(&settings)
}

/// Entry point for `testbay clean`. Per-device failures are reported, not
/// returned; the command itself only fails when the pool cannot be built.
///
/// # Errors
///
/// Returns an error if the device seed is invalid or rendering fails.
pub async fn run(app: &AppContext, args: &CleanArgs) -> Result<i32> {
    let pool = build_device_pool(app, &args.pool)?;
    let policy = policy(app, args);
    tracing::info!(
        devices = pool.registered_count(),
        max_age_days = policy.max_age.num_days(),
        dry_run = policy.dry_run,
        "retention sweep"
    );

    let now = Utc::now();
    let report = if app.is_json() {
        sweep(&pool, &policy, now, &LogReporter).await
    } else {
        sweep(&pool, &policy, now, &TerminalReporter::new(&app.output)).await
    };
    app.renderer().render_sweep(&report)?;
    Ok(0)
}
