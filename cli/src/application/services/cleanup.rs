//! Application service — retention sweep over the device pool.
//!
//! Devices are visited without being reserved. Devices currently reserved
//! by a running test are skipped; every other device is powered on,
//! connected, swept and disconnected again unless a test reserved it in the
//! meantime. A failing device is recorded in the report and the sweep moves
//! on.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::application::ports::{DeviceHandle, DevicePool, ProgressReporter};
use crate::domain::device::ArtifactArea;
use crate::domain::error::CleanupError;
use crate::domain::retention::RetentionPolicy;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum SweepStatus {
    Swept,
    /// Held by a running test.
    Skipped,
    Failed(String),
}

/// What happened on one device.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceSweep {
    pub device: String,
    pub status: SweepStatus,
    /// Deleted entries, or entries that would be deleted in dry-run mode.
    pub deleted: Vec<String>,
    /// Entries whose deletion failed.
    pub errors: Vec<String>,
}

impl DeviceSweep {
    fn new(device: &str) -> Self {
        Self {
            device: device.to_string(),
            status: SweepStatus::Swept,
            deleted: Vec::new(),
            errors: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub dry_run: bool,
    pub devices: Vec<DeviceSweep>,
}

impl SweepReport {
    #[must_use]
    pub fn deleted_count(&self) -> usize {
        self.devices.iter().map(|d| d.deleted.len()).sum()
    }

    #[must_use]
    pub fn failed_devices(&self) -> Vec<&str> {
        self.devices
            .iter()
            .filter(|d| matches!(d.status, SweepStatus::Failed(_)))
            .map(|d| d.device.as_str())
            .collect()
    }
}

/// Sweep every device in `pool` with `policy`, as of `now`.
pub async fn sweep(
    pool: &DevicePool,
    policy: &RetentionPolicy,
    now: DateTime<Utc>,
    reporter: &impl ProgressReporter,
) -> SweepReport {
    let mut report = SweepReport {
        dry_run: policy.dry_run,
        devices: Vec::new(),
    };

    for device in pool.resources() {
        let mut entry = DeviceSweep::new(device.name());
        if pool.is_reserved(device.name()) {
            tracing::info!(device = device.name(), "device in use, skipping sweep");
            reporter.warn(&format!("{}: in use by a running test, skipped", device.name()));
            entry.status = SweepStatus::Skipped;
            report.devices.push(entry);
            continue;
        }

        reporter.step(&format!("Sweeping {}...", device.name()));
        let outcome = sweep_device(&device, policy, now, &mut entry).await;
        if pool.is_reserved(device.name()) {
            // A test picked the device up mid-sweep and owns the connection.
            tracing::info!(device = device.name(), "reserved during sweep, leaving connected");
        } else if !device.disconnect().await {
            tracing::warn!(device = device.name(), "disconnect after sweep failed");
        }

        match outcome {
            Ok(()) => {
                let verb = if policy.dry_run { "would delete" } else { "deleted" };
                reporter.success(&format!(
                    "{}: {verb} {} item(s)",
                    device.name(),
                    entry.deleted.len()
                ));
            }
            Err(err) => {
                tracing::warn!(device = device.name(), error = %err, "sweep failed");
                reporter.warn(&format!("{}: {err}", device.name()));
                entry.status = SweepStatus::Failed(err.to_string());
            }
        }
        report.devices.push(entry);
    }
    report
}

async fn sweep_device(
    device: &DeviceHandle,
    policy: &RetentionPolicy,
    now: DateTime<Utc>,
    entry: &mut DeviceSweep,
) -> Result<(), CleanupError> {
    let name = device.name().to_string();
    if !device.is_on() && !device.power_on().await {
        return Err(CleanupError::PowerOn { device: name });
    }
    if !device.is_connected() && !device.connect().await {
        return Err(CleanupError::Connect { device: name });
    }

    for area in [ArtifactArea::StagedBuilds, ArtifactArea::CrashDumps] {
        let listed = device.list_artifacts(area, &policy.layout).await?;
        let expired = policy.select_expired(area, &listed, now);
        tracing::debug!(
            device = %name,
            area = ?area,
            listed = listed.len(),
            expired = expired.len(),
            "artifacts scanned"
        );
        for artifact in expired {
            if policy.dry_run {
                entry.deleted.push(artifact.path.clone());
                continue;
            }
            match device.delete_artifact(artifact).await {
                Ok(()) => {
                    tracing::info!(device = %name, path = %artifact.path, "deleted");
                    entry.deleted.push(artifact.path.clone());
                }
                Err(err) => {
                    tracing::warn!(device = %name, path = %artifact.path, error = %err, "delete failed");
                    entry.errors.push(format!("{}: {err}", artifact.path));
                }
            }
        }
    }
    Ok(())
}
