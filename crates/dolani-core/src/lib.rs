//! # dolani-core
//!
//! Indoor positioning from BLE beacons.
//!
//! This crate provides:
//! - Continuous BLE scanning that follows adapter power and process lifecycle
//! - Per-beacon RSSI smoothing and log-distance range estimation
//! - A stale-evicting beacon registry with throttled snapshots
//! - Cooldown-gated resolution of the strongest beacon into a location
//!
//! ## Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`bluetooth`] - Scan adapter trait, BlueZ backend and mock radio
//! - [`scanner`] - Scan lifecycle actor and its handle
//! - [`smoothing`] - Weighted moving average per beacon
//! - [`distance`] - RSSI to distance model
//! - [`registry`] - Latest reading per beacon with stale eviction
//! - [`gate`] - Cooldown and proximity gate in front of the resolver
//! - [`resolver`] - Remote beacon resolver (HTTP)
//! - [`positioning`] - Pipeline wiring and the position publisher
//! - [`config`] - Configuration loading, saving, and validation
//! - [`error`] - Unified error types for the crate
//! - [`types`] - Shared types and OpenAPI schemas

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod bluetooth;
pub mod config;
pub mod distance;
pub mod error;
pub mod gate;
pub mod positioning;
pub mod registry;
pub mod resolver;
pub mod scanner;
pub mod smoothing;
pub mod types;

// Re-export primary types for convenience
#[cfg(feature = "bluetooth")]
pub use bluetooth::BluerAdapter;
#[cfg(any(feature = "mock-bluetooth", not(feature = "bluetooth")))]
pub use bluetooth::MockAdapter;
pub use bluetooth::{
    beacon_identifier, AdapterState, Advertisement, AdvertisementSink, BluetoothError,
    BluetoothResult, ScanAdapter, ScanGuard, ScanOptions,
};
pub use config::{
    is_valid_base_url, Config, ConfigError, ConfigResult, ResolverSettings, ScannerSettings,
    ServerSettings,
};
pub use distance::{estimate_distance, DistanceModel};
pub use error::{DolaniError, Result};
pub use gate::{select_target, GateConfig, GateDecision, ResolutionGate, ResolveOutcome};
pub use positioning::{LocationStore, PositionPublisher, Positioning, PositioningHandle};
pub use registry::BeaconRegistry;
pub use resolver::{BeaconResolver, HttpResolver, ResolveError, ResolveResult};
pub use scanner::{ScannerConfig, ScannerHandle, ScannerSnapshot};
pub use smoothing::{weighted_moving_average, SignalSmoother};
pub use types::{
    BeaconReading, Department, Floor, HealthResponse, Location, LocationId, ProcessState,
    ResolveResponse, ResolvedLocation, ScannerStatus,
};
