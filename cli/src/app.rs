//! Application context — unified state passed to every command handler.
//!
//! Built once in `Cli::run()` from the global flags and the loaded config
//! file. Commands receive `&AppContext` and never construct runners,
//! registries or output contexts themselves.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use testbay_common::TestbayConfig;

use crate::application::ports::{CommandRunner, ConfigStore};
use crate::application::registry::DeviceFactoryRegistry;
use crate::infra::command_runner::TokioCommandRunner;
use crate::infra::config::YamlConfigStore;
use crate::infra::devices::default_registry;
use crate::output::{HumanRenderer, JsonRenderer, OutputContext, Renderer};

/// Output rendering mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Human-readable terminal output (default).
    Human,
    /// Machine-readable JSON output.
    Json,
}

/// Output rendering flags.
pub struct OutputFlags {
    /// Disable ANSI color output.
    pub no_color: bool,
    /// Suppress non-error output.
    pub quiet: bool,
    /// Enable JSON output mode.
    pub json: bool,
}

/// Flags passed from the top-level CLI to `AppContext::new`.
pub struct AppFlags {
    /// Output rendering options.
    pub output: OutputFlags,
    /// Explicit config file (`--config`).
    pub config: Option<PathBuf>,
}

/// Unified application context passed to every command handler.
pub struct AppContext {
    /// Terminal output context (colors, quiet mode).
    pub output: OutputContext,
    /// Output rendering mode (human vs JSON).
    pub mode: OutputMode,
    /// Loaded configuration, or defaults when no file exists.
    pub config: TestbayConfig,
    /// Shared process runner handed to device backends.
    pub runner: Arc<dyn CommandRunner>,
    /// Device factories for every supported platform.
    pub registry: DeviceFactoryRegistry,
}

impl AppContext {
    /// Construct an `AppContext` from top-level CLI flags.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be read or parsed,
    /// or if an explicit `--config` path does not exist.
    pub fn new(flags: &AppFlags) -> Result<Self> {
        let store = YamlConfigStore::new(flags.config.clone());
        Self::with_store(flags, &store)
    }

    /// Like [`new`](Self::new) with a caller-supplied config store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails to load.
    pub fn with_store(flags: &AppFlags, store: &dyn ConfigStore) -> Result<Self> {
        let config = store.load()?;
        let mode = if flags.output.json {
            OutputMode::Json
        } else {
            OutputMode::Human
        };
        let runner: Arc<dyn CommandRunner> = Arc::new(TokioCommandRunner::default());

        Ok(Self {
            output: OutputContext::new(flags.output.no_color, flags.output.quiet),
            mode,
            config,
            registry: default_registry(Arc::clone(&runner)),
            runner,
        })
    }

    /// Returns `true` when JSON output mode is active.
    #[must_use]
    pub fn is_json(&self) -> bool {
        self.mode == OutputMode::Json
    }

    /// Returns the appropriate `Renderer` variant for the current output mode.
    #[must_use]
    pub fn renderer(&self) -> Renderer<'_> {
        match self.mode {
            OutputMode::Human => Renderer::Human(HumanRenderer::new(&self.output)),
            OutputMode::Json => Renderer::Json(JsonRenderer),
        }
    }
}
