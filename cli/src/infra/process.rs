//! `AppInstance` backed by a host process.
//!
//! A background task owns the child: it collects stdout, waits for exit and
//! kills on request. The instance itself only reads shared state, so polling
//! never blocks.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Child;
use tokio::sync::oneshot;

use crate::application::ports::AppInstance;

/// How long to keep draining stdout after the child is gone. A grandchild
/// can inherit the pipe and hold it open indefinitely.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Runs once the child has exited or been killed.
pub type ExitHook = Box<dyn FnOnce() + Send>;

#[derive(Debug, Default)]
struct Shared {
    stdout: String,
    exited: bool,
    exit_code: Option<i32>,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct ProcessInstance {
    device: String,
    command_line: String,
    artifact_path: Option<String>,
    shared: Arc<Mutex<Shared>>,
    kill_tx: Option<oneshot::Sender<()>>,
    killed: bool,
}

impl ProcessInstance {
    /// Take ownership of `child` and start watching it. Must be called from
    /// within a tokio runtime.
    pub fn watch(
        child: Child,
        device: &str,
        command_line: &str,
        artifact_path: Option<String>,
    ) -> Self {
        Self::watch_with(child, device, command_line, artifact_path, None)
    }

    /// [`watch`](Self::watch), calling `on_exit` once the child is gone and
    /// before [`AppInstance::has_exited`] turns true.
    pub fn watch_with(
        mut child: Child,
        device: &str,
        command_line: &str,
        artifact_path: Option<String>,
        on_exit: Option<ExitHook>,
    ) -> Self {
        let shared = Arc::new(Mutex::new(Shared::default()));
        let (kill_tx, mut kill_rx) = oneshot::channel::<()>();

        let reader = child.stdout.take().map(|stdout| {
            let shared = Arc::clone(&shared);
            tokio::spawn(async move {
                let mut reader = BufReader::new(stdout);
                let mut buf = Vec::new();
                loop {
                    buf.clear();
                    match reader.read_until(b'\n', &mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(_) => lock(&shared)
                            .stdout
                            .push_str(&String::from_utf8_lossy(&buf)),
                    }
                }
            })
        });

        let watcher_shared = Arc::clone(&shared);
        let device_name = device.to_string();
        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                // Fires on an explicit kill and when the instance is dropped.
                _ = &mut kill_rx => {
                    if let Err(err) = child.kill().await {
                        tracing::warn!(device = %device_name, error = %err, "kill failed");
                    }
                    child.wait().await
                }
            };
            if let Some(mut reader) = reader {
                if tokio::time::timeout(DRAIN_GRACE, &mut reader).await.is_err() {
                    tracing::debug!(device = %device_name, "stdout still open after exit, detaching");
                    reader.abort();
                }
            }
            if let Some(on_exit) = on_exit {
                on_exit();
            }
            let mut state = lock(&watcher_shared);
            state.exited = true;
            state.exit_code = status.ok().and_then(|s| s.code());
            tracing::debug!(device = %device_name, exit_code = ?state.exit_code, "process exited");
        });

        Self {
            device: device.to_string(),
            command_line: command_line.to_string(),
            artifact_path,
            shared,
            kill_tx: Some(kill_tx),
            killed: false,
        }
    }
}

impl AppInstance for ProcessInstance {
    fn device_name(&self) -> &str {
        &self.device
    }

    fn command_line(&self) -> &str {
        &self.command_line
    }

    fn has_exited(&self) -> bool {
        lock(&self.shared).exited
    }

    fn was_killed(&self) -> bool {
        self.killed
    }

    fn exit_code(&self) -> Option<i32> {
        lock(&self.shared).exit_code
    }

    fn stdout(&self) -> String {
        lock(&self.shared).stdout.clone()
    }

    fn artifact_path(&self) -> Option<String> {
        self.artifact_path.clone()
    }

    fn kill(&mut self) {
        if self.has_exited() {
            return;
        }
        if let Some(tx) = self.kill_tx.take() {
            let _ = tx.send(());
            self.killed = true;
        }
    }
}
