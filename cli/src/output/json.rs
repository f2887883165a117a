//! JSON output helpers.
//!
//! Every `--json` command prints exactly one pretty-printed document on
//! stdout. Failures use the error object from [`format_error`].

use anyhow::{Context, Result};
use serde::Serialize;

use crate::application::services::cleanup::SweepReport;
use crate::domain::device::DeviceSummary;
use crate::domain::result::{TestResult, combined_exit_code};

/// Format a JSON error object.
///
/// Output (pretty-printed):
/// ```json
/// {
///   "error": true,
///   "message": "...",
///   "code": "..."
/// }
/// ```
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn format_error(message: &str, code: &str) -> Result<String> {
    let obj = serde_json::json!({
        "error": true,
        "message": message,
        "code": code,
    });
    serde_json::to_string_pretty(&obj).context("JSON serialization failed")
}

fn print_pretty(value: &impl Serialize) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("JSON serialization failed")?;
    println!("{text}");
    Ok(())
}

/// Machine-readable renderer for `--json`.
pub struct JsonRenderer;

impl JsonRenderer {
    /// `{"exit_code": n, "results": [...]}`.
    pub fn render_results(&self, results: &[TestResult]) -> Result<()> {
        print_pretty(&serde_json::json!({
            "exit_code": combined_exit_code(results),
            "results": results,
        }))
    }

    pub fn render_sweep(&self, report: &SweepReport) -> Result<()> {
        print_pretty(report)
    }

    pub fn render_devices(&self, devices: &[DeviceSummary]) -> Result<()> {
        print_pretty(&serde_json::json!({ "devices": devices }))
    }

    pub fn render_version(&self, version: &str) -> Result<()> {
        print_pretty(&serde_json::json!({ "version": version }))
    }
}
