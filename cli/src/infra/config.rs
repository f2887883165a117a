//! Infrastructure implementation of the `ConfigStore` port.

use anyhow::{Context, Result};
use std::path::PathBuf;
use testbay_common::TestbayConfig;

use crate::application::ports::ConfigStore;

/// Environment variable naming an alternative config file.
pub const CONFIG_ENV: &str = "TESTBAY_CONFIG";

/// Production implementation of `ConfigStore` that uses a YAML file on disk.
///
/// Lookup order: explicit path (`--config`), `TESTBAY_CONFIG`, then
/// `~/.testbay/config.yaml`.
#[derive(Debug, Default)]
pub struct YamlConfigStore {
    explicit: Option<PathBuf>,
}

impl YamlConfigStore {
    #[must_use]
    pub fn new(explicit: Option<PathBuf>) -> Self {
        Self { explicit }
    }
}

impl ConfigStore for YamlConfigStore {
    fn load(&self) -> Result<TestbayConfig> {
        let path = self.path()?;
        if !path.exists() {
            if self.explicit.is_some() {
                anyhow::bail!("config file {} does not exist", path.display());
            }
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(TestbayConfig::default());
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        if content.trim().is_empty() {
            return Ok(TestbayConfig::default());
        }
        serde_yaml::from_str(&content).with_context(|| format!("cannot parse {}", path.display()))
    }

    fn path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.explicit {
            return Ok(path.clone());
        }
        if let Ok(val) = std::env::var(CONFIG_ENV) {
            return Ok(PathBuf::from(val));
        }
        let home =
            dirs::home_dir().ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
        Ok(home.join(".testbay").join("config.yaml"))
    }
}
