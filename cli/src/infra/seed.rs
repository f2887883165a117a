//! Device seed loading: `--devices` is either a comma-separated list of
//! `<platform>:<ref>` entries or a path to a file containing them.

use std::path::Path;

use anyhow::{Context, Result};
use testbay_common::{DeviceRef, Platform};

/// Parse seed text. Entries are separated by commas or newlines; `#` starts
/// a comment that runs to the end of the line.
pub fn parse_seed(text: &str, default_platform: Platform) -> Result<Vec<DeviceRef>> {
    text.lines()
        .map(|line| line.split('#').next().unwrap_or_default())
        .flat_map(|line| line.split(','))
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            DeviceRef::parse(entry, default_platform)
                .with_context(|| format!("invalid device entry '{entry}'"))
        })
        .collect()
}

/// Resolve a `--devices` value. An existing file is read; anything else is
/// treated as an inline list.
pub fn load_seed(value: &str, default_platform: Platform) -> Result<Vec<DeviceRef>> {
    let path = Path::new(value.trim());
    if path.is_file() {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read device file {}", path.display()))?;
        return parse_seed(&text, default_platform);
    }
    parse_seed(value, default_platform)
}

/// Combine seed sources: the CLI value wins over config entries.
pub fn resolve_seed(
    cli: Option<&str>,
    configured: &[String],
    default_platform: Platform,
) -> Result<Vec<DeviceRef>> {
    match cli {
        Some(value) => load_seed(value, default_platform),
        None => parse_seed(&configured.join(","), default_platform),
    }
}
