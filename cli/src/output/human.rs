//! Human-readable terminal renderer.

use owo_colors::OwoColorize as _;

use crate::application::services::cleanup::{SweepReport, SweepStatus};
use crate::domain::device::DeviceSummary;
use crate::domain::result::{RoleArtifacts, TestOutcome, TestResult};
use crate::output::OutputContext;

/// Renders domain types as human-readable terminal output using `OutputContext`.
pub struct HumanRenderer<'a> {
    ctx: &'a OutputContext,
}

impl<'a> HumanRenderer<'a> {
    /// Create a new `HumanRenderer` wrapping the given output context.
    #[must_use]
    pub fn new(ctx: &'a OutputContext) -> Self {
        Self { ctx }
    }

    /// Render the CLI version information.
    pub fn render_version(&self, version: &str) {
        println!("testbay {version}");
    }

    /// Render each test outcome followed by its roles. Failures are always
    /// printed, even in quiet mode.
    pub fn render_results(&self, results: &[TestResult]) {
        for result in results {
            let elapsed = format_elapsed(result.elapsed.as_secs());
            match &result.outcome {
                TestOutcome::Passed => {
                    self.ctx
                        .success(&format!("{} passed in {elapsed}", result.test));
                }
                TestOutcome::Cancelled => {
                    self.ctx
                        .warn(&format!("{} cancelled after {elapsed}", result.test));
                }
                outcome @ TestOutcome::Failed { .. } => {
                    self.ctx
                        .error(&format!("{} {outcome} after {elapsed}", result.test));
                }
            }
            for role in &result.roles {
                self.render_role(role);
            }
        }
        if results.len() > 1 && !self.ctx.quiet {
            let passed = results.iter().filter(|r| r.outcome.is_passed()).count();
            println!();
            self.ctx
                .header(&format!("{passed}/{} tests passed", results.len()));
        }
    }

    fn render_role(&self, role: &RoleArtifacts) {
        let exit = role
            .exit_code
            .map_or_else(String::new, |code| format!(" (code {code})"));
        self.ctx.kv(
            &format!("    {}@{}", role.role, role.platform),
            &format!("{}  {}{exit}", role.device, role.status.as_str()),
        );
        if let Some(path) = &role.artifact_path {
            self.ctx.kv("      artifacts:", path);
        }
    }

    /// Render a retention sweep: one line per device, then a summary.
    pub fn render_sweep(&self, report: &SweepReport) {
        let verb = if report.dry_run {
            "would delete"
        } else {
            "deleted"
        };
        for device in &report.devices {
            match &device.status {
                SweepStatus::Swept => {
                    self.ctx.success(&format!(
                        "{}: {verb} {} entries",
                        device.device,
                        device.deleted.len()
                    ));
                    for path in &device.deleted {
                        self.ctx.kv("     ", path);
                    }
                }
                SweepStatus::Skipped => {
                    self.ctx
                        .info(&format!("{}: in use, skipped", device.device));
                }
                SweepStatus::Failed(detail) => {
                    self.ctx.warn(&format!("{}: {detail}", device.device));
                }
            }
            for error in &device.errors {
                self.ctx.warn(&format!("{}: {error}", device.device));
            }
        }
        if !self.ctx.quiet {
            println!();
        }
        self.ctx.header(&format!(
            "{verb} {} entries on {} devices",
            report.deleted_count(),
            report.devices.len()
        ));
    }

    /// Render the seeded device pool as a table.
    pub fn render_devices(&self, devices: &[DeviceSummary]) {
        if devices.is_empty() {
            self.ctx
                .info("No devices. Pass --devices or set `devices` in the config file.");
            return;
        }
        if self.ctx.quiet {
            return;
        }
        println!(
            "  {}",
            format!("{:<24} {:<10} {:<10} {}", "DEVICE", "PLATFORM", "STATE", "RESERVED")
                .style(self.ctx.styles.bold)
        );
        for device in devices {
            println!(
                "  {:<24} {:<10} {:<10} {}",
                device.name,
                device.platform.as_str(),
                device.status.to_string(),
                if device.reserved { "yes" } else { "no" }
            );
        }
    }
}

fn format_elapsed(secs: u64) -> String {
    let minutes = secs / 60;
    let seconds = secs % 60;
    if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}
