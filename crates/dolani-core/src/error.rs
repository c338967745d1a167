//! Unified error types for the dolani core library.
//!
//! This module provides a unified error type [`DolaniError`] that covers all
//! failure modes of the positioning subsystem. Each module also has its own
//! specific error type (`ConfigError`, `BluetoothError`, `ResolveError`) for
//! internal use.
//!
//! # Design Principles
//!
//! - **Specific variants**: Each error variant captures exactly one failure mode
//! - **Actionable messages**: Error messages guide users toward resolution
//! - **Never fatal**: Nothing here is meant to bring the host process down
//!
//! # Example
//!
//! ```rust
//! use dolani_core::error::{DolaniError, Result};
//!
//! fn require_powered(powered: bool) -> Result<()> {
//!     if !powered {
//!         return Err(DolaniError::AdapterPoweredOff);
//!     }
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;
use thiserror::Error;

/// The unified error type for all dolani operations.
#[derive(Debug, Error)]
pub enum DolaniError {
    // =========================================================================
    // BLUETOOTH ERRORS
    // =========================================================================
    /// No Bluetooth adapter was found on this system.
    #[error(
        "No Bluetooth adapter found. Ensure Bluetooth hardware is present and drivers are loaded."
    )]
    AdapterNotFound,

    /// The process is not allowed to use the Bluetooth adapter.
    #[error("Bluetooth permission denied")]
    AdapterUnauthorized,

    /// The Bluetooth adapter exists but is powered off.
    #[error("Bluetooth is turned off")]
    AdapterPoweredOff,

    /// Starting the hardware scan failed.
    #[error("Bluetooth scan failed to start: {0}")]
    ScanStartFailure(String),

    // =========================================================================
    // RESOLUTION ERRORS
    // =========================================================================
    /// A beacon could not be resolved to a location.
    #[error("Beacon resolve failed: {0}")]
    ResolveFailure(String),

    // =========================================================================
    // LIFECYCLE ERRORS
    // =========================================================================
    /// The positioning subsystem has been shut down.
    #[error("Positioning subsystem is not running")]
    SubsystemStopped,

    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// The configuration file was not found at the expected path.
    #[error("Configuration file not found at: {}", .0.display())]
    ConfigNotFound(PathBuf),

    /// The configuration file exists but could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    ConfigParseError(String),

    /// The configuration was parsed but contains invalid values.
    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // =========================================================================
    // PERSISTENCE & I/O ERRORS
    // =========================================================================
    /// An error occurred while persisting or reading data.
    #[error("Persistence error: {0}")]
    PersistenceError(String),

    /// A low-level I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A specialized [`Result`] type for dolani operations.
pub type Result<T> = std::result::Result<T, DolaniError>;

impl DolaniError {
    /// Returns `true` if this error is related to Bluetooth operations.
    #[inline]
    #[must_use]
    pub const fn is_bluetooth_error(&self) -> bool {
        matches!(
            self,
            Self::AdapterNotFound
                | Self::AdapterUnauthorized
                | Self::AdapterPoweredOff
                | Self::ScanStartFailure(_)
        )
    }

    /// Returns `true` if this error is related to configuration.
    #[inline]
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound(_) | Self::ConfigParseError(_) | Self::ConfigValidationError(_)
        )
    }

    /// Returns `true` if this error clears up without user intervention.
    ///
    /// Power and permission problems resume through the adapter state
    /// subscription; resolve failures are retried once the cooldown passes.
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::AdapterUnauthorized | Self::AdapterPoweredOff | Self::ResolveFailure(_)
        )
    }

    /// Returns an HTTP-appropriate status code for this error.
    #[inline]
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            // 404 Not Found
            Self::ConfigNotFound(_) => 404,

            // 422 Unprocessable Entity - semantic errors
            Self::ConfigParseError(_) | Self::ConfigValidationError(_) => 422,

            // 500 Internal Server Error - server-side issues
            Self::PersistenceError(_) | Self::IoError(_) => 500,

            // 502 Bad Gateway - the resolver backend misbehaved
            Self::ResolveFailure(_) => 502,

            // 503 Service Unavailable - Bluetooth hardware issues
            Self::AdapterNotFound
            | Self::AdapterUnauthorized
            | Self::AdapterPoweredOff
            | Self::ScanStartFailure(_)
            | Self::SubsystemStopped => 503,
        }
    }

    /// Returns a machine-readable error code for API responses.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::AdapterNotFound => "BLUETOOTH_ADAPTER_NOT_FOUND",
            Self::AdapterUnauthorized => "BLUETOOTH_UNAUTHORIZED",
            Self::AdapterPoweredOff => "BLUETOOTH_ADAPTER_POWERED_OFF",
            Self::ScanStartFailure(_) => "SCAN_START_FAILURE",
            Self::ResolveFailure(_) => "RESOLVE_FAILURE",
            Self::SubsystemStopped => "SUBSYSTEM_STOPPED",
            Self::ConfigNotFound(_) => "CONFIG_NOT_FOUND",
            Self::ConfigParseError(_) => "CONFIG_PARSE_ERROR",
            Self::ConfigValidationError(_) => "CONFIG_VALIDATION_ERROR",
            Self::PersistenceError(_) => "PERSISTENCE_ERROR",
            Self::IoError(_) => "IO_ERROR",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<crate::config::ConfigError> for DolaniError {
    fn from(err: crate::config::ConfigError) -> Self {
        use crate::config::ConfigError;
        match err {
            ConfigError::NotFound(path) => Self::ConfigNotFound(path),
            ConfigError::LoadError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::WriteError { path, source } => {
                Self::PersistenceError(format!("Failed to write {}: {}", path.display(), source))
            }
            ConfigError::SerializeError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::ValidationError { field, message } => {
                Self::ConfigValidationError(format!("{field}: {message}"))
            }
            ConfigError::MultipleValidationErrors(errors) => {
                let messages: Vec<String> = errors.into_iter().map(|e| e.to_string()).collect();
                Self::ConfigValidationError(messages.join("; "))
            }
        }
    }
}

impl From<crate::bluetooth::BluetoothError> for DolaniError {
    fn from(err: crate::bluetooth::BluetoothError) -> Self {
        use crate::bluetooth::BluetoothError;
        match err {
            BluetoothError::AdapterNotFound => Self::AdapterNotFound,
            BluetoothError::Unauthorized => Self::AdapterUnauthorized,
            BluetoothError::AdapterPoweredOff => Self::AdapterPoweredOff,
            BluetoothError::SessionInitFailed { message }
            | BluetoothError::DiscoveryFailed { message }
            | BluetoothError::Internal { message } => Self::ScanStartFailure(message),
        }
    }
}

impl From<crate::resolver::ResolveError> for DolaniError {
    fn from(err: crate::resolver::ResolveError) -> Self {
        Self::ResolveFailure(err.to_string())
    }
}

// =============================================================================
// TESTS
// =============================================================================
