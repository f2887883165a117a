//! Run command — launch named tests concurrently against the device pool.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use futures::stream::FuturesUnordered;
use testbay_common::TestbayConfig;

use crate::app::AppContext;
use crate::application::ports::AccountPool;
use crate::application::services::engine::{CancelFlag, EngineSettings, TestExecutor};
use crate::application::services::scheduler::Scheduler;
use crate::commands::{PoolArgs, build_device_pool};
use crate::domain::error::ConfigError;
use crate::domain::result::{TestResult, combined_exit_code};
use crate::domain::{Account, TestConfiguration};
use crate::output::progress;

/// Arguments for the run command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Tests to run, comma-separated (names from the `tests` config section)
    #[arg(long, value_delimiter = ',', required = true)]
    pub testname: Vec<String>,

    /// Override every test's maximum duration, in seconds
    #[arg(long)]
    pub max_duration: Option<u64>,

    #[command(flatten)]
    pub pool: PoolArgs,
}

/// Look up each requested test in the config, preserving request order.
///
/// # Errors
///
/// `ConfigError::UnknownTest` for names the config does not define, and any
/// error from building a test out of its definition.
pub fn resolve_tests(
    config: &TestbayConfig,
    names: &[String],
) -> Result<Vec<TestConfiguration>, ConfigError> {
    names
        .iter()
        .map(|name| {
            let def = config
                .tests
                .get(name)
                .ok_or_else(|| ConfigError::UnknownTest {
                    name: name.clone(),
                    available: available_tests(config),
                })?;
            TestConfiguration::from_definition(name, def, &config.rendezvous)
        })
        .collect()
}

fn available_tests(config: &TestbayConfig) -> String {
    if config.tests.is_empty() {
        "(none configured)".to_string()
    } else {
        config.tests.keys().cloned().collect::<Vec<_>>().join(", ")
    }
}

fn build_account_pool(config: &TestbayConfig) -> Result<Arc<AccountPool>> {
    let pool = AccountPool::new("account");
    for entry in &config.accounts {
        pool.register(Account::from(entry))
            .with_context(|| format!("cannot register account '{}'", entry.username))?;
    }
    Ok(Arc::new(pool))
}

/// Cancel `flag` on the first Ctrl-C.
fn cancel_on_interrupt(flag: &CancelFlag) {
    let flag = flag.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling tests");
            flag.cancel();
        }
    });
}

/// Entry point for `testbay run`. Returns the process exit code.
///
/// # Errors
///
/// Returns an error when a test name is unknown, a definition is invalid, or
/// the device seed cannot be turned into a pool. Test failures are not errors;
/// they are reported and mapped to the exit code.
pub async fn run(app: &AppContext, args: &RunArgs) -> Result<i32> {
    let mut tests = resolve_tests(&app.config, &args.testname)?;
    if let Some(secs) = args.max_duration {
        for test in &mut tests {
            test.max_duration = Duration::from_secs(secs);
        }
    }

    let devices = build_device_pool(app, &args.pool)?;
    let accounts = build_account_pool(&app.config)?;
    let executor = TestExecutor::new(devices, accounts, app.registry.clone())
        .with_settings(EngineSettings::from(&app.config.acquire));

    let cancel = CancelFlag::new();
    cancel_on_interrupt(&cancel);

    let spinner = (app.output.show_progress() && !app.is_json()).then(|| {
        progress::spinner(&format!("Running {}", args.testname.join(", ")))
    });

    let launches: FuturesUnordered<_> = tests
        .iter()
        .map(|test| {
            let executor = &executor;
            let cancel = &cancel;
            async move {
                executor
                    .launch_with_retry(test, cancel)
                    .await
                    .map_err(|err| {
                        tracing::error!(test = %test.name, error = %err, "test did not start");
                        TestResult::not_started(test.name.clone(), err.outcome())
                    })
            }
        })
        .collect();
    let interval = Duration::from_millis(app.config.tick_interval_ms);
    let results = Scheduler::new(interval).drive(launches).await;
    let code = combined_exit_code(&results);

    if let Some(pb) = spinner {
        if code == 0 {
            progress::finish_ok(&pb, "All tests passed");
        } else {
            progress::finish_error(&pb, "Tests finished with failures");
        }
    }
    app.renderer().render_results(&results)?;
    Ok(code)
}
