//! Launch and tick behaviour of `TestExecutor` / `TestRun` against simulated
//! devices.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use testbay_cli::application::ports::{DeviceHandle, TargetDevice};
use testbay_cli::application::services::engine::{CancelFlag, EngineSettings, RunState};
use testbay_cli::domain::TestConfiguration;
use testbay_cli::domain::error::EngineError;
use testbay_cli::domain::result::{FailureReason, RoleStatus, TestOutcome};
use testbay_cli::infra::devices::{NullDevice, NullScript};
use testbay_common::{Platform, RoleModifier, RoleType};

use crate::helpers::{
    COMPLETE, account_pool, client_server, device_pool, drive, executor, handle_pool,
    null_device, single_client,
};
use crate::mocks::FaultyDevice;

const LIMIT: Duration = Duration::from_secs(5);

fn reason(outcome: &TestOutcome) -> Option<FailureReason> {
    match outcome {
        TestOutcome::Failed { reason, .. } => Some(*reason),
        _ => None,
    }
}

// ── Happy path ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn client_server_passes_on_completion_marker() {
    let server = null_device("srv", Platform::Null, NullScript::forever());
    let client = null_device(
        "cli",
        Platform::Unknown,
        NullScript::forever().printing(format!("joined\n{COMPLETE}\n")),
    );
    let devices = device_pool(&[server, client]);
    let exec = executor(Arc::clone(&devices), account_pool(&[]));

    let mut run = exec
        .launch(&client_server("smoke"), &CancelFlag::new())
        .await
        .unwrap();
    assert_eq!(devices.reserved_count(), 2);
    assert_eq!(drive(&mut run, LIMIT).await, RunState::Finished);

    let result = run.result().unwrap();
    assert_eq!(result.outcome, TestOutcome::Passed);
    assert_eq!(result.roles.len(), 2);
    for snapshot in run.snapshot() {
        assert!(snapshot.has_exited, "{} still running", snapshot.device);
        assert_ne!(snapshot.status, RoleStatus::Running);
    }
    assert_eq!(devices.available_count(), 2);
}

#[tokio::test]
async fn clean_exit_without_markers_passes() {
    let devices = device_pool(&[null_device(
        "a",
        Platform::Null,
        NullScript::exits_after(Duration::from_millis(20), 0),
    )]);
    let exec = executor(Arc::clone(&devices), account_pool(&[]));
    let mut run = exec
        .launch(&single_client("plain"), &CancelFlag::new())
        .await
        .unwrap();
    drive(&mut run, LIMIT).await;

    let result = run.take_result().unwrap();
    assert!(result.passed());
    assert_eq!(result.roles[0].status, RoleStatus::Exited);
    assert_eq!(result.roles[0].exit_code, Some(0));
    assert!(result.roles[0].artifact_path.is_some());
}

// ── Acquisition ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn acquisition_is_all_or_nothing() {
    let devices = device_pool(&[
        null_device("n1", Platform::Null, NullScript::forever()),
        null_device("n2", Platform::Null, NullScript::forever()),
    ]);
    let exec = executor(Arc::clone(&devices), account_pool(&[]));

    let mut config = client_server("split");
    let _ = config.require_role_on(RoleType::Server, Platform::Null);

    let err = exec.launch(&config, &CancelFlag::new()).await.unwrap_err();
    assert!(matches!(err, EngineError::InsufficientDevices { .. }), "{err}");
    assert!(err.is_retryable());
    assert_eq!(devices.reserved_count(), 0);
    assert_eq!(err.outcome().exit_code(), 3);
}

#[tokio::test]
async fn missing_accounts_release_devices() {
    let devices = device_pool(&[null_device("a", Platform::Null, NullScript::forever())]);
    let exec = executor(Arc::clone(&devices), account_pool(&[]));

    let mut config = single_client("needs-account");
    config.roles[0].instances[0].needs_account = true;

    let err = exec.launch(&config, &CancelFlag::new()).await.unwrap_err();
    assert!(matches!(err, EngineError::InsufficientAccounts { .. }), "{err}");
    assert_eq!(devices.reserved_count(), 0);
}

#[tokio::test]
async fn accounts_are_returned_with_devices() {
    let devices = device_pool(&[null_device(
        "a",
        Platform::Null,
        NullScript::exits_after(Duration::ZERO, 0),
    )]);
    let accounts = account_pool(&["qa1"]);
    let exec = executor(Arc::clone(&devices), Arc::clone(&accounts));

    let mut config = single_client("with-account");
    config.roles[0].instances[0].needs_account = true;

    let mut run = exec.launch(&config, &CancelFlag::new()).await.unwrap();
    assert_eq!(accounts.reserved_count(), 1);
    drive(&mut run, LIMIT).await;
    assert_eq!(accounts.reserved_count(), 0);
    assert_eq!(devices.reserved_count(), 0);
}

#[tokio::test]
async fn unsupported_platform_is_a_configuration_error() {
    let devices = device_pool(&[]);
    let exec = executor(Arc::clone(&devices), account_pool(&[]));
    let mut config = single_client("phone");
    let _ = config.require_role_on(RoleType::Client, Platform::Ios);

    let err = exec.launch(&config, &CancelFlag::new()).await.unwrap_err();
    assert!(matches!(err, EngineError::Configuration(_)), "{err}");
    assert!(!err.is_retryable());
    assert_eq!(err.outcome().exit_code(), 2);
}

// ── Failures during a run ────────────────────────────────────────────────────

#[tokio::test]
async fn disconnected_device_reports_lost_device() {
    let device = null_device("flaky", Platform::Null, NullScript::forever());
    let devices = device_pool(&[Arc::clone(&device)]);
    let exec = executor(Arc::clone(&devices), account_pool(&[]));

    let mut run = exec
        .launch(&single_client("lost"), &CancelFlag::new())
        .await
        .unwrap();
    assert_eq!(run.tick(), RunState::Running);

    assert!(device.disconnect().await);
    drive(&mut run, LIMIT).await;

    let result = run.result().unwrap();
    assert_eq!(reason(&result.outcome), Some(FailureReason::LostDevice));
    assert_eq!(result.roles[0].status, RoleStatus::LostDevice);
    assert_eq!(devices.available_count(), 1);
}

#[tokio::test]
async fn run_past_max_duration_times_out() {
    let devices = device_pool(&[null_device("a", Platform::Null, NullScript::forever())]);
    let exec = executor(Arc::clone(&devices), account_pool(&[]));
    let config = single_client("slow").max_duration(Duration::from_millis(50));

    let mut run = exec.launch(&config, &CancelFlag::new()).await.unwrap();
    drive(&mut run, LIMIT).await;

    let result = run.result().unwrap();
    assert_eq!(reason(&result.outcome), Some(FailureReason::Timeout));
    assert_eq!(result.exit_code(), 4);
    assert_eq!(result.roles[0].status, RoleStatus::Killed);
}

#[tokio::test]
async fn failure_marker_stops_the_test() {
    let devices = device_pool(&[null_device(
        "a",
        Platform::Null,
        NullScript::forever().printing("loading\nFatal error: out of memory\n"),
    )]);
    let exec = executor(Arc::clone(&devices), account_pool(&[]));
    let mut config = single_client("crashy");
    config.failure_markers = vec!["Fatal error".into()];

    let mut run = exec.launch(&config, &CancelFlag::new()).await.unwrap();
    drive(&mut run, LIMIT).await;

    let result = run.result().unwrap();
    assert_eq!(reason(&result.outcome), Some(FailureReason::FailureMarker));
    assert_eq!(devices.available_count(), 1);
}

#[tokio::test]
async fn non_zero_exit_fails_the_role() {
    let devices = device_pool(&[null_device(
        "a",
        Platform::Null,
        NullScript::exits_after(Duration::from_millis(10), 3),
    )]);
    let exec = executor(Arc::clone(&devices), account_pool(&[]));
    let mut run = exec
        .launch(&single_client("bad-exit"), &CancelFlag::new())
        .await
        .unwrap();
    drive(&mut run, LIMIT).await;

    let result = run.result().unwrap();
    assert_eq!(reason(&result.outcome), Some(FailureReason::RoleFailed));
    assert_eq!(result.roles[0].exit_code, Some(3));
}

#[tokio::test]
async fn exit_without_completion_marker_fails() {
    let devices = device_pool(&[null_device(
        "a",
        Platform::Null,
        NullScript::exits_after(Duration::ZERO, 0).printing("bye\n"),
    )]);
    let exec = executor(Arc::clone(&devices), account_pool(&[]));
    let mut config = single_client("quiet");
    config.completion_marker = Some(COMPLETE.into());

    let mut run = exec.launch(&config, &CancelFlag::new()).await.unwrap();
    drive(&mut run, LIMIT).await;
    assert_eq!(
        reason(&run.result().unwrap().outcome),
        Some(FailureReason::RoleFailed)
    );
}

#[tokio::test]
async fn unreachable_device_fails_before_launch() {
    let faulty: DeviceHandle = Arc::new(
        FaultyDevice::new(NullDevice::new("dead", Platform::Null)).failing_connect(),
    );
    let devices = handle_pool(vec![faulty]);
    let exec = executor(Arc::clone(&devices), account_pool(&[]));

    let run = exec
        .launch(&single_client("unreachable"), &CancelFlag::new())
        .await
        .unwrap();
    assert!(run.is_finished());
    let result = run.result().unwrap();
    assert_eq!(reason(&result.outcome), Some(FailureReason::DeviceUnreachable));
    assert_eq!(result.roles[0].status, RoleStatus::NotStarted);
    assert_eq!(devices.reserved_count(), 0);
}

#[tokio::test]
async fn install_failure_is_reported() {
    let faulty: DeviceHandle = Arc::new(
        FaultyDevice::new(NullDevice::new("full", Platform::Null)).failing_install(),
    );
    let devices = handle_pool(vec![faulty]);
    let exec = executor(Arc::clone(&devices), account_pool(&[]));

    let run = exec
        .launch(&single_client("no-space"), &CancelFlag::new())
        .await
        .unwrap();
    let result = run.result().unwrap();
    assert_eq!(reason(&result.outcome), Some(FailureReason::InstallFailed));
    assert!(result.outcome.to_string().contains("disk full"));
    assert_eq!(devices.reserved_count(), 0);
}

#[tokio::test]
async fn role_that_never_reaches_the_session_times_out() {
    let devices = device_pool(&[
        null_device("srv", Platform::Null, NullScript::forever().printing("READY\n")),
        null_device("cli", Platform::Unknown, NullScript::forever().printing("loading\n")),
    ]);
    let exec = executor(Arc::clone(&devices), account_pool(&[]));
    let mut config = client_server("rendezvous");
    config.rendezvous.ready_marker = Some("READY".into());
    config.rendezvous.timeout = Some(Duration::from_millis(50));

    let mut run = exec.launch(&config, &CancelFlag::new()).await.unwrap();
    drive(&mut run, LIMIT).await;

    let result = run.result().unwrap();
    assert_eq!(reason(&result.outcome), Some(FailureReason::RendezvousTimeout));
    assert!(result.outcome.to_string().contains("client on cli"), "{}", result.outcome);
    assert_eq!(devices.available_count(), 2);
}

#[tokio::test]
async fn ready_roles_are_not_held_to_the_rendezvous_deadline() {
    let devices = device_pool(&[
        null_device("srv", Platform::Null, NullScript::forever().printing("READY\n")),
        null_device("cli", Platform::Unknown, NullScript::forever().printing("READY\n")),
    ]);
    let exec = executor(Arc::clone(&devices), account_pool(&[]));
    let mut config = client_server("rendezvous-ok").max_duration(Duration::from_millis(200));
    config.rendezvous.ready_marker = Some("READY".into());
    config.rendezvous.timeout = Some(Duration::from_millis(20));

    let mut run = exec.launch(&config, &CancelFlag::new()).await.unwrap();
    drive(&mut run, LIMIT).await;
    assert_eq!(
        reason(&run.result().unwrap().outcome),
        Some(FailureReason::Timeout)
    );
}

#[tokio::test]
async fn lost_server_leaves_the_client_running_until_timeout() {
    let server = null_device("srv", Platform::Null, NullScript::forever());
    let devices = device_pool(&[
        Arc::clone(&server),
        null_device("cli", Platform::Unknown, NullScript::forever()),
    ]);
    let exec = executor(Arc::clone(&devices), account_pool(&[]));
    let config = client_server("half-lost").max_duration(Duration::from_millis(200));

    let mut run = exec.launch(&config, &CancelFlag::new()).await.unwrap();
    assert_eq!(run.tick(), RunState::Running);
    assert!(server.disconnect().await);
    assert_eq!(run.tick(), RunState::Running);

    let roles = run.snapshot();
    let status_of = |device: &str| roles.iter().find(|r| r.device == device).unwrap().status;
    assert_eq!(status_of("srv"), RoleStatus::LostDevice);
    assert_eq!(status_of("cli"), RoleStatus::Running);

    drive(&mut run, LIMIT).await;
    let result = run.result().unwrap();
    assert_eq!(reason(&result.outcome), Some(FailureReason::Timeout));
    let client = result.roles.iter().find(|r| r.device == "cli").unwrap();
    assert_eq!(client.status, RoleStatus::Killed);
    assert_eq!(devices.available_count(), 2);
}

#[tokio::test]
async fn lost_server_is_reported_once_the_client_exits() {
    let server = null_device("srv", Platform::Null, NullScript::forever());
    let devices = device_pool(&[
        Arc::clone(&server),
        null_device(
            "cli",
            Platform::Unknown,
            NullScript::exits_after(Duration::from_millis(100), 0).printing(format!("{COMPLETE}\n")),
        ),
    ]);
    let exec = executor(Arc::clone(&devices), account_pool(&[]));

    let mut run = exec
        .launch(&client_server("lost-then-done"), &CancelFlag::new())
        .await
        .unwrap();
    assert!(server.disconnect().await);
    drive(&mut run, LIMIT).await;

    let result = run.result().unwrap();
    assert_eq!(reason(&result.outcome), Some(FailureReason::LostDevice));
    let client = result.roles.iter().find(|r| r.device == "cli").unwrap();
    assert_eq!(client.status, RoleStatus::Exited);
}

// ── Cancellation and teardown ────────────────────────────────────────────────

#[tokio::test]
async fn cancel_after_launch_kills_and_releases() {
    let devices = device_pool(&[null_device("a", Platform::Null, NullScript::forever())]);
    let exec = executor(Arc::clone(&devices), account_pool(&[]));
    let cancel = CancelFlag::new();

    let mut run = exec.launch(&single_client("stop-me"), &cancel).await.unwrap();
    assert_eq!(run.tick(), RunState::Running);
    cancel.cancel();
    assert_eq!(run.tick(), RunState::Finished);

    let result = run.result().unwrap();
    assert_eq!(result.outcome, TestOutcome::Cancelled);
    assert_eq!(result.exit_code(), 130);
    assert!(run.snapshot()[0].was_killed);
    assert_eq!(devices.available_count(), 1);
}

#[tokio::test]
async fn cancel_before_launch_acquires_nothing() {
    let devices = device_pool(&[null_device("a", Platform::Null, NullScript::forever())]);
    let exec = executor(Arc::clone(&devices), account_pool(&[]));
    let cancel = CancelFlag::new();
    cancel.cancel();

    let err = exec.launch(&single_client("never"), &cancel).await.unwrap_err();
    assert!(matches!(err, EngineError::Cancelled { .. }));
    assert_eq!(devices.reserved_count(), 0);
}

#[tokio::test]
async fn dropping_an_unfinished_run_releases_devices() {
    let devices = device_pool(&[null_device("a", Platform::Null, NullScript::forever())]);
    let exec = executor(Arc::clone(&devices), account_pool(&[]));

    let run = exec
        .launch(&single_client("abandoned"), &CancelFlag::new())
        .await
        .unwrap();
    assert_eq!(devices.reserved_count(), 1);
    drop(run);
    assert_eq!(devices.reserved_count(), 0);
}

// ── Retry ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn retry_succeeds_once_a_device_is_released() {
    let devices = device_pool(&[null_device(
        "only",
        Platform::Null,
        NullScript::exits_after(Duration::ZERO, 0),
    )]);
    let held = devices.reserve().unwrap();
    let exec = executor(Arc::clone(&devices), account_pool(&[])).with_settings(EngineSettings {
        acquire_attempts: 20,
        acquire_backoff: Duration::from_millis(10),
        kill_grace: Duration::from_millis(100),
    });

    let pool = Arc::clone(&devices);
    let releaser = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(pool.release(&held));
    });

    let mut run = exec
        .launch_with_retry(&single_client("patient"), &CancelFlag::new())
        .await
        .unwrap();
    releaser.await.unwrap();
    drive(&mut run, LIMIT).await;
    assert!(run.result().unwrap().passed());
}

#[tokio::test]
async fn retry_gives_up_after_the_last_attempt() {
    let devices = device_pool(&[null_device("only", Platform::Null, NullScript::forever())]);
    let _held = devices.reserve().unwrap();
    let exec = executor(Arc::clone(&devices), account_pool(&[])).with_settings(EngineSettings {
        acquire_attempts: 3,
        acquire_backoff: Duration::from_millis(5),
        kill_grace: Duration::from_millis(100),
    });

    let err = exec
        .launch_with_retry(&single_client("impatient"), &CancelFlag::new())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InsufficientDevices { .. }));
    assert_eq!(devices.reserved_count(), 1);
}

#[tokio::test]
async fn problem_device_is_excluded_on_retry() {
    let dead = Arc::new(FaultyDevice::new(NullDevice::new("dead", Platform::Null)).failing_connect());
    let good = Arc::new(NullDevice::new("good", Platform::Null));
    let devices = handle_pool(vec![dead as DeviceHandle, good as DeviceHandle]);
    let held = devices.reserve_matching(|d| d.name() == "good").unwrap();
    let exec = executor(Arc::clone(&devices), account_pool(&[])).with_settings(EngineSettings {
        acquire_attempts: 20,
        acquire_backoff: Duration::from_millis(10),
        kill_grace: Duration::from_millis(100),
    });

    let pool = Arc::clone(&devices);
    let releaser = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(pool.release(&held));
    });

    let mut run = exec
        .launch_with_retry(&single_client("reroute"), &CancelFlag::new())
        .await
        .unwrap();
    releaser.await.unwrap();
    drive(&mut run, LIMIT).await;

    let result = run.result().unwrap();
    assert!(result.passed(), "{}", result.outcome);
    assert_eq!(result.roles[0].device, "good");
    assert_eq!(exec.problem_devices(), vec!["dead".to_string()]);
}

#[tokio::test]
async fn retry_reports_the_device_failure_when_nothing_else_is_free() {
    let full: DeviceHandle = Arc::new(
        FaultyDevice::new(NullDevice::new("full", Platform::Null)).failing_install(),
    );
    let devices = handle_pool(vec![full]);
    let exec = executor(Arc::clone(&devices), account_pool(&[])).with_settings(EngineSettings {
        acquire_attempts: 3,
        acquire_backoff: Duration::from_millis(5),
        kill_grace: Duration::from_millis(100),
    });

    let run = exec
        .launch_with_retry(&single_client("no-space"), &CancelFlag::new())
        .await
        .unwrap();
    let result = run.result().unwrap();
    assert_eq!(reason(&result.outcome), Some(FailureReason::InstallFailed));
    assert_eq!(exec.problem_devices(), vec!["full".to_string()]);
    assert_eq!(devices.reserved_count(), 0);
}

#[tokio::test]
async fn launch_failure_kills_started_roles_and_marks_the_device() {
    let server = null_device("srv", Platform::Null, NullScript::forever());
    let client: DeviceHandle = Arc::new(
        FaultyDevice::new(NullDevice::new("cli", Platform::Unknown)).failing_run(),
    );
    let devices = handle_pool(vec![Arc::clone(&server) as DeviceHandle, client]);
    let exec = executor(Arc::clone(&devices), account_pool(&[]));

    let run = exec
        .launch(&client_server("crash-on-start"), &CancelFlag::new())
        .await
        .unwrap();
    let result = run.result().unwrap();
    assert_eq!(reason(&result.outcome), Some(FailureReason::LaunchFailed));
    let server_role = run.snapshot().into_iter().find(|r| r.device == "srv").unwrap();
    assert!(server_role.was_killed);
    assert_eq!(exec.problem_devices(), vec!["cli".to_string()]);
    assert_eq!(devices.reserved_count(), 0);
}

// ── Null roles ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn null_role_runs_without_a_pool_device() {
    let devices = device_pool(&[null_device(
        "cli",
        Platform::Null,
        NullScript::forever().printing(format!("{COMPLETE}\n")),
    )]);
    let exec = executor(Arc::clone(&devices), account_pool(&[]));
    let mut config = single_client("half-simulated");
    config.completion_marker = Some(COMPLETE.into());
    let _ = config
        .require_role_on(RoleType::Server, Platform::Null)
        .modifier(RoleModifier::Null);

    let mut run = exec.launch(&config, &CancelFlag::new()).await.unwrap();
    assert_eq!(devices.reserved_count(), 1);
    drive(&mut run, LIMIT).await;

    let result = run.result().unwrap();
    assert!(result.passed(), "{}", result.outcome);
    assert_eq!(result.roles.len(), 2);
    assert!(result.roles.iter().any(|r| r.device.starts_with("null-server")));
    assert_eq!(devices.available_count(), 1);
    assert!(exec.problem_devices().is_empty());
}

#[tokio::test]
async fn null_roles_launch_on_an_empty_pool() {
    let devices = device_pool(&[]);
    let exec = executor(Arc::clone(&devices), account_pool(&[]));
    let mut config = TestConfiguration::new("all-simulated")
        .on_platform(Platform::Android)
        .max_duration(Duration::from_secs(10));
    let _ = config.require_role(RoleType::Client).modifier(RoleModifier::Null);
    let _ = config.require_role(RoleType::Client).modifier(RoleModifier::Null);

    let mut run = exec.launch(&config, &CancelFlag::new()).await.unwrap();
    drive(&mut run, LIMIT).await;

    let result = run.take_result().unwrap();
    assert!(result.passed(), "{}", result.outcome);
    let names: Vec<_> = result.roles.iter().map(|r| r.device.clone()).collect();
    assert_eq!(names, vec!["null-client-0".to_string(), "null-client-1".to_string()]);
    assert_eq!(devices.registered_count(), 0);
}
