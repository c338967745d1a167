//! Application configuration management.
//!
//! Handles loading, saving, and validating dolani configuration:
//! - Scanner timing (smoothing window, flush throttle, stale timeout)
//! - Distance model calibration
//! - Beacon resolver endpoint and gating thresholds
//! - HTTP server port
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! `DOLANI_*` environment variables (`DOLANI_RESOLVER__BASE_URL=...`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::distance::DistanceModel;
use crate::registry::DEFAULT_STALE_TIMEOUT;
use crate::smoothing::DEFAULT_WINDOW_SIZE;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "DOLANI";

/// Errors raised while loading, saving or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The requested file does not exist.
    #[error("Configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The file or environment could not be read or deserialized.
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] ::config::ConfigError),

    /// Writing the file failed.
    #[error("Failed to write {}: {source}", path.display())]
    WriteError {
        /// Target path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration could not be serialized to TOML.
    #[error("Failed to serialize configuration: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// A single field is invalid.
    #[error("Invalid {field}: {message}")]
    ValidationError {
        /// Dotted field path.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// Several fields are invalid.
    #[error("{} configuration fields are invalid", .0.len())]
    MultipleValidationErrors(Vec<ConfigError>),
}

/// Result alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Main application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Scan lifecycle and registry settings.
    pub scanner: ScannerSettings,

    /// RSSI to distance calibration.
    pub distance: DistanceModel,

    /// Beacon resolver endpoint and gating.
    pub resolver: ResolverSettings,

    /// HTTP daemon settings.
    pub server: ServerSettings,
}

/// Scan lifecycle and registry settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerSettings {
    /// Samples kept per beacon for smoothing.
    pub window_size: usize,

    /// Minimum interval between published snapshots (ms).
    pub throttle_ms: u64,

    /// Beacons not heard for this long are evicted (ms).
    pub stale_timeout_ms: u64,

    /// Capacity of the advertisement channel; excess samples are dropped.
    pub channel_capacity: usize,

    /// Only beacons whose identifier matches this pattern are tracked.
    pub identifier_pattern: Option<String>,

    /// Start scanning as soon as the subsystem is spawned.
    pub auto_start: bool,
}

impl Default for ScannerSettings {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            throttle_ms: 500,
            #[allow(clippy::cast_possible_truncation)]
            stale_timeout_ms: DEFAULT_STALE_TIMEOUT.as_millis() as u64,
            channel_capacity: 256,
            identifier_pattern: None,
            auto_start: true,
        }
    }
}

impl ScannerSettings {
    /// Snapshot throttle interval.
    #[must_use]
    pub const fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }

    /// Stale eviction timeout.
    #[must_use]
    pub const fn stale_timeout(&self) -> Duration {
        Duration::from_millis(self.stale_timeout_ms)
    }
}

/// Beacon resolver endpoint and gating thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverSettings {
    /// Base URL of the backend API.
    pub base_url: String,

    /// Per-request timeout (s).
    pub timeout_secs: u64,

    /// Minimum interval between resolves of the same beacon (ms).
    pub cooldown_ms: u64,

    /// Beacons estimated farther than this are never resolved (m).
    pub max_distance_m: f64,

    /// Margin a new strongest beacon must beat the current target by (dB).
    /// Zero always targets the strongest beacon.
    pub hysteresis_db: f64,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api".to_string(),
            timeout_secs: 15,
            cooldown_ms: 3_000,
            max_distance_m: 15.0,
            hysteresis_db: 0.0,
        }
    }
}

impl ResolverSettings {
    /// Resolve cooldown window.
    #[must_use]
    pub const fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    /// HTTP request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// HTTP daemon settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// TCP port to listen on.
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { port: 3000 }
    }
}

impl Config {
    /// Load configuration from `path`, layered under environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotFound`] if the file does not exist, or a
    /// load error if it cannot be parsed.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        Self::load_layered(path, env_source())
    }

    /// Load configuration from `path` if it exists, otherwise start from
    /// defaults. Environment overrides apply in both cases.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file or the environment cannot be
    /// parsed.
    pub fn load_or_default(path: impl AsRef<Path>) -> ConfigResult<Self> {
        Self::load_layered(path.as_ref(), env_source())
    }

    fn load_layered(path: &Path, env: ::config::Environment) -> ConfigResult<Self> {
        let settings = ::config::Config::builder()
            .add_source(
                ::config::File::from(path)
                    .format(::config::FileFormat::Toml)
                    .required(false),
            )
            .add_source(env)
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    /// Save configuration to `path` as TOML, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        let path = path.as_ref();
        let write_error = |source| ConfigError::WriteError {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_error)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(write_error)
    }

    /// Platform default configuration path.
    ///
    /// On Linux: `/etc/dolani/config.toml`
    /// Elsewhere: the user config directory (`~/.config/dolani/config.toml`)
    #[must_use]
    pub fn default_path() -> PathBuf {
        #[cfg(target_os = "linux")]
        {
            PathBuf::from("/etc/dolani/config.toml")
        }
        #[cfg(not(target_os = "linux"))]
        {
            directories::ProjectDirs::from("", "", "dolani").map_or_else(
                || PathBuf::from("config.toml"),
                |dirs| dirs.config_dir().join("config.toml"),
            )
        }
    }

    /// Check every field, collecting all problems.
    ///
    /// # Errors
    ///
    /// Returns a single [`ConfigError::ValidationError`] or
    /// [`ConfigError::MultipleValidationErrors`].
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();
        let mut check = |ok: bool, field: &str, message: &str| {
            if !ok {
                errors.push(ConfigError::ValidationError {
                    field: field.to_string(),
                    message: message.to_string(),
                });
            }
        };

        let scanner = &self.scanner;
        check(scanner.window_size >= 1, "scanner.window_size", "must be at least 1");
        check(scanner.throttle_ms > 0, "scanner.throttle_ms", "must be positive");
        check(
            scanner.stale_timeout_ms > 0,
            "scanner.stale_timeout_ms",
            "must be positive",
        );
        check(
            scanner.channel_capacity >= 1,
            "scanner.channel_capacity",
            "must be at least 1",
        );
        if let Some(pattern) = &scanner.identifier_pattern {
            check(
                Regex::new(pattern).is_ok(),
                "scanner.identifier_pattern",
                "is not a valid regular expression",
            );
        }

        check(
            self.distance.tx_power_dbm < 0.0,
            "distance.tx_power_dbm",
            "must be negative (dBm at 1 m)",
        );
        check(
            self.distance.path_loss_exponent > 0.0,
            "distance.path_loss_exponent",
            "must be positive",
        );

        let resolver = &self.resolver;
        check(
            is_valid_base_url(&resolver.base_url),
            "resolver.base_url",
            "must be an absolute http(s) URL",
        );
        check(resolver.timeout_secs > 0, "resolver.timeout_secs", "must be positive");
        check(
            resolver.max_distance_m > 0.0,
            "resolver.max_distance_m",
            "must be positive",
        );
        check(
            resolver.hysteresis_db >= 0.0,
            "resolver.hysteresis_db",
            "must not be negative",
        );

        check(self.server.port > 0, "server.port", "must be non-zero");

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::MultipleValidationErrors(errors)),
        }
    }

    /// Compiled identifier filter, if one is configured.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the pattern does not compile.
    pub fn identifier_filter(&self) -> ConfigResult<Option<Regex>> {
        self.scanner
            .identifier_pattern
            .as_deref()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| ConfigError::ValidationError {
                    field: "scanner.identifier_pattern".to_string(),
                    message: e.to_string(),
                })
            })
            .transpose()
    }
}

/// Whether `value` is an absolute `http` or `https` URL.
#[must_use]
pub fn is_valid_base_url(value: &str) -> bool {
    Url::parse(value).is_ok_and(|url| matches!(url.scheme(), "http" | "https") && url.has_host())
}

fn env_source() -> ::config::Environment {
    ::config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}
