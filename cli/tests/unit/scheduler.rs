//! `Scheduler::drive` interleaving launches with ticks.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use futures::stream::FuturesUnordered;
use testbay_cli::application::services::engine::{CancelFlag, EngineSettings};
use testbay_cli::application::services::scheduler::Scheduler;
use testbay_cli::domain::result::{TestResult, combined_exit_code};
use testbay_cli::infra::devices::NullScript;
use testbay_common::Platform;

use crate::helpers::{account_pool, device_pool, executor, null_device, single_client};

#[tokio::test]
async fn tests_sharing_one_device_run_back_to_back() {
    let devices = device_pool(&[null_device(
        "shared",
        Platform::Null,
        NullScript::exits_after(Duration::from_millis(30), 0),
    )]);
    let exec = executor(Arc::clone(&devices), account_pool(&[])).with_settings(EngineSettings {
        acquire_attempts: 50,
        acquire_backoff: Duration::from_millis(10),
        kill_grace: Duration::from_millis(100),
    });
    let cancel = CancelFlag::new();
    let tests = [single_client("first"), single_client("second")];

    let launches: FuturesUnordered<_> = tests
        .iter()
        .map(|test| {
            let exec = &exec;
            let cancel = &cancel;
            async move {
                exec.launch_with_retry(test, cancel)
                    .await
                    .map_err(|err| TestResult::not_started(test.name.clone(), err.outcome()))
            }
        })
        .collect();
    let results = Scheduler::new(Duration::from_millis(5)).drive(launches).await;

    assert_eq!(results.len(), 2);
    assert!(results.iter().all(TestResult::passed), "{results:?}");
    assert_eq!(combined_exit_code(&results), 0);
    assert_eq!(devices.available_count(), 1);
}

#[tokio::test]
async fn launch_errors_become_results() {
    let devices = device_pool(&[]);
    let exec = executor(Arc::clone(&devices), account_pool(&[]));
    let cancel = CancelFlag::new();
    let test = single_client("nowhere");

    let launches: FuturesUnordered<_> = std::iter::once(async {
        exec.launch_with_retry(&test, &cancel)
            .await
            .map_err(|err| TestResult::not_started(test.name.clone(), err.outcome()))
    })
    .collect();
    let results = Scheduler::new(Duration::from_millis(5)).drive(launches).await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].exit_code(), 3);
    assert!(results[0].roles.is_empty());
}

#[tokio::test]
async fn cancel_all_finishes_active_runs() {
    let devices = device_pool(&[null_device("a", Platform::Null, NullScript::forever())]);
    let exec = executor(Arc::clone(&devices), account_pool(&[]));
    let run = exec
        .launch(&single_client("endless"), &CancelFlag::new())
        .await
        .unwrap();

    let mut scheduler = Scheduler::new(Duration::from_millis(5));
    scheduler.add(run);
    assert_eq!(scheduler.tick(), 1);
    scheduler.cancel_all();
    assert_eq!(scheduler.tick(), 0);
    assert!(scheduler.is_idle());

    let results = scheduler.run_to_completion().await;
    assert_eq!(combined_exit_code(&results), 130);
    assert_eq!(devices.available_count(), 1);
}
