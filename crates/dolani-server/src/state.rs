//! Application state shared across handlers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use dolani_core::{Config, LocationId, LocationStore, PositioningHandle};

/// Environment variable overriding the configuration file path.
pub const CONFIG_PATH_ENV: &str = "DOLANI_CONFIG";

/// State handed to every handler.
pub type SharedState = Arc<AppState>;

/// Shared application state.
#[derive(Debug)]
pub struct AppState {
    config: Config,
    positioning: PositioningHandle,
    location: Arc<LocationStore>,
}

impl AppState {
    /// Bundle the running positioning subsystem with its configuration.
    #[must_use]
    pub const fn new(
        config: Config,
        positioning: PositioningHandle,
        location: Arc<LocationStore>,
    ) -> Self {
        Self {
            config,
            positioning,
            location,
        }
    }

    /// Wrap into the shared handler state.
    #[must_use]
    pub fn shared(self) -> SharedState {
        Arc::new(self)
    }

    /// Configuration the daemon was started with.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Handle to the positioning subsystem.
    #[must_use]
    pub const fn positioning(&self) -> &PositioningHandle {
        &self.positioning
    }

    /// Currently published location id.
    #[must_use]
    pub fn current_location(&self) -> Option<LocationId> {
        self.location.current()
    }
}

/// Path of the configuration file: `DOLANI_CONFIG` if set, else the
/// platform default.
#[must_use]
pub fn config_path() -> PathBuf {
    std::env::var_os(CONFIG_PATH_ENV).map_or_else(Config::default_path, PathBuf::from)
}

/// Load the configuration, falling back to defaults when the file is
/// missing.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be parsed, or if the
/// resulting configuration is invalid.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let config = Config::load_or_default(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    config.validate().context("Invalid configuration")?;
    Ok(config)
}
