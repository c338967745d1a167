//! The positioning pipeline, wired end to end.
//!
//! [`Positioning::spawn`] starts the scanner actor and a gate task that
//! watches its snapshots. Whenever the scanner publishes a beacon list, the
//! target beacon is offered to the [`ResolutionGate`], and successful
//! resolves land in the [`PositionPublisher`].

use std::sync::Arc;

use tokio::sync::watch;

use crate::bluetooth::ScanAdapter;
use crate::config::Config;
use crate::error::Result;
use crate::gate::{select_target, GateConfig, ResolutionGate};
use crate::resolver::BeaconResolver;
use crate::scanner::{ScannerConfig, ScannerHandle, ScannerSnapshot};
use crate::types::{BeaconReading, LocationId, ProcessState, ResolvedLocation, ScannerStatus};

/// Sink for the current location.
pub trait PositionPublisher: Send + Sync + 'static {
    /// Publish the current location, or clear it with `None`.
    fn set_current_location(&self, location_id: Option<LocationId>);
}

/// Publisher that keeps the current location in a `watch` channel.
#[derive(Debug)]
pub struct LocationStore {
    current: watch::Sender<Option<LocationId>>,
}

impl Default for LocationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LocationStore {
    /// Create a store with no current location.
    #[must_use]
    pub fn new() -> Self {
        let (current, _) = watch::channel(None);
        Self { current }
    }

    /// Current location id.
    #[must_use]
    pub fn current(&self) -> Option<LocationId> {
        *self.current.borrow()
    }

    /// Watch location changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<LocationId>> {
        self.current.subscribe()
    }
}

impl PositionPublisher for LocationStore {
    fn set_current_location(&self, location_id: Option<LocationId>) {
        self.current.send_if_modified(|current| {
            let changed = *current != location_id;
            *current = location_id;
            changed
        });
    }
}

/// Entry point of the positioning subsystem.
pub struct Positioning;

impl Positioning {
    /// Validate `config`, then spawn the scanner and the resolution gate.
    ///
    /// Scanning starts right away when `scanner.auto_start` is set.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `config` is invalid.
    pub fn spawn<A, R, P>(
        adapter: Arc<A>,
        resolver: Arc<R>,
        publisher: Arc<P>,
        config: &Config,
    ) -> Result<PositioningHandle>
    where
        A: ScanAdapter,
        R: BeaconResolver,
        P: PositionPublisher,
    {
        config.validate()?;

        let scanner = ScannerHandle::spawn(adapter, ScannerConfig::from_config(config)?);
        let gate = ResolutionGate::new(resolver, publisher, GateConfig::from(&config.resolver));
        let resolved = gate.subscribe_resolved();
        tokio::spawn(run_gate(
            gate,
            scanner.subscribe(),
            config.resolver.hysteresis_db,
        ));

        if config.scanner.auto_start {
            scanner.start()?;
        }
        tracing::info!(
            auto_start = config.scanner.auto_start,
            resolver = %config.resolver.base_url,
            "Positioning started"
        );

        Ok(PositioningHandle { scanner, resolved })
    }
}

async fn run_gate<R, P>(
    mut gate: ResolutionGate<R, P>,
    mut snapshots: watch::Receiver<ScannerSnapshot>,
    hysteresis_db: f64,
) where
    R: BeaconResolver,
    P: PositionPublisher,
{
    let mut target: Option<String> = None;
    while snapshots.changed().await.is_ok() {
        let reading = {
            let snapshot = snapshots.borrow_and_update();
            if snapshot.status != ScannerStatus::Scanning {
                continue;
            }
            select_target(&snapshot.beacons, target.as_deref(), hysteresis_db).cloned()
        };
        let Some(reading) = reading else {
            continue;
        };

        if gate.observe(&reading).is_some() {
            tracing::debug!(
                identifier = %reading.identifier,
                distance_m = reading.distance_m,
                "Resolving beacon"
            );
        }
        target = Some(reading.identifier);
    }
    tracing::debug!("Resolution gate stopped");
}

/// Consumer-facing view of the positioning subsystem.
#[derive(Debug, Clone)]
pub struct PositioningHandle {
    scanner: ScannerHandle,
    resolved: watch::Receiver<Option<ResolvedLocation>>,
}

impl PositioningHandle {
    /// Scanner lifecycle state.
    #[must_use]
    pub fn status(&self) -> ScannerStatus {
        self.scanner.status()
    }

    /// Tracked beacons, strongest first.
    #[must_use]
    pub fn beacons(&self) -> Vec<BeaconReading> {
        self.scanner.beacons()
    }

    /// The strongest tracked beacon.
    #[must_use]
    pub fn strongest(&self) -> Option<BeaconReading> {
        self.scanner.strongest()
    }

    /// Last scanner error.
    #[must_use]
    pub fn error(&self) -> Option<String> {
        self.scanner.error()
    }

    /// Full scanner snapshot.
    #[must_use]
    pub fn snapshot(&self) -> ScannerSnapshot {
        self.scanner.snapshot()
    }

    /// Whether the scanner actor is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.scanner.is_running()
    }

    /// Most recent successful resolution.
    #[must_use]
    pub fn resolved_location(&self) -> Option<ResolvedLocation> {
        self.resolved.borrow().clone()
    }

    /// Watch scanner snapshots.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ScannerSnapshot> {
        self.scanner.subscribe()
    }

    /// Watch successful resolutions.
    #[must_use]
    pub fn subscribe_resolved(&self) -> watch::Receiver<Option<ResolvedLocation>> {
        self.resolved.clone()
    }

    /// Start scanning.
    ///
    /// # Errors
    ///
    /// Returns [`crate::DolaniError::SubsystemStopped`] after shutdown.
    pub fn start(&self) -> Result<()> {
        self.scanner.start()
    }

    /// Stop scanning.
    ///
    /// # Errors
    ///
    /// Returns [`crate::DolaniError::SubsystemStopped`] after shutdown.
    pub fn stop(&self) -> Result<()> {
        self.scanner.stop()
    }

    /// Forward a foreground/background transition.
    ///
    /// # Errors
    ///
    /// Returns [`crate::DolaniError::SubsystemStopped`] after shutdown.
    pub fn set_process_state(&self, state: ProcessState) -> Result<()> {
        self.scanner.set_process_state(state)
    }

    /// Release the adapter and stop every task.
    ///
    /// # Errors
    ///
    /// Returns [`crate::DolaniError::SubsystemStopped`] if already shut down.
    pub async fn shutdown(&self) -> Result<()> {
        self.scanner.shutdown().await
    }
}
