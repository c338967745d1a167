//! Scan lifecycle management.
//!
//! A single actor task owns the hardware scan, the power state
//! subscription, the smoothing windows and the beacon registry. Callers
//! talk to it through a [`ScannerHandle`]: commands go in over a channel,
//! and state comes out through a `watch` channel of [`ScannerSnapshot`]s.
//!
//! ```text
//!            start (powered on)          background
//!   idle ─────────────────────► scanning ──────────► paused
//!    ▲   start (powered off)     │  ▲  ◄──────────────  │
//!    │  ─────────────► bt-off ◄──┘  │    foreground      │
//!    │                   │ powered on                    │
//!    │                   └──────────┘                    │
//!    └──────────────── stop (from any state) ────────────┘
//! ```
//!
//! Scan start failures move to `error`; a later `start()` retries.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::BoxStream;
use futures::StreamExt;
use regex::Regex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

use crate::bluetooth::{
    AdapterState, AdvertisementSink, BluetoothError, ScanAdapter, ScanGuard, ScanOptions,
    SessionSample,
};
use crate::config::{Config, ConfigResult};
use crate::distance::DistanceModel;
use crate::error::{DolaniError, Result};
use crate::registry::{BeaconRegistry, DEFAULT_STALE_TIMEOUT};
use crate::smoothing::{SignalSmoother, DEFAULT_WINDOW_SIZE};
use crate::types::{BeaconReading, ProcessState, ScannerStatus};

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Runtime parameters of the scanner.
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Samples kept per beacon for smoothing.
    pub window_size: usize,
    /// Minimum interval between beacon list updates.
    pub throttle: Duration,
    /// Beacons not heard for this long are evicted.
    pub stale_timeout: Duration,
    /// Capacity of the advertisement channel.
    pub channel_capacity: usize,
    /// Only identifiers matching this pattern are tracked.
    pub identifier_filter: Option<Regex>,
    /// RSSI to distance model.
    pub distance: DistanceModel,
    /// Hardware scan options.
    pub scan_options: ScanOptions,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            throttle: Duration::from_millis(500),
            stale_timeout: DEFAULT_STALE_TIMEOUT,
            channel_capacity: 256,
            identifier_filter: None,
            distance: DistanceModel::default(),
            scan_options: ScanOptions::default(),
        }
    }
}

impl ScannerConfig {
    /// Build from the `[scanner]` and `[distance]` settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the identifier pattern does not compile.
    pub fn from_config(config: &Config) -> ConfigResult<Self> {
        let scanner = &config.scanner;
        Ok(Self {
            window_size: scanner.window_size,
            throttle: scanner.throttle(),
            stale_timeout: scanner.stale_timeout(),
            channel_capacity: scanner.channel_capacity.max(1),
            identifier_filter: config.identifier_filter()?,
            distance: config.distance,
            scan_options: ScanOptions::default(),
        })
    }
}

// =============================================================================
// SNAPSHOT
// =============================================================================

/// Published scanner state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScannerSnapshot {
    /// Lifecycle state.
    pub status: ScannerStatus,
    /// Tracked beacons, strongest first.
    pub beacons: Vec<BeaconReading>,
    /// Last error message, if any.
    pub error: Option<String>,
    /// Id of the current scan session.
    pub session: Option<Uuid>,
}

impl ScannerSnapshot {
    /// The strongest beacon, if any is tracked.
    #[must_use]
    pub fn strongest(&self) -> Option<&BeaconReading> {
        self.beacons.first()
    }
}

// =============================================================================
// HANDLE
// =============================================================================

#[derive(Debug)]
enum Command {
    Start,
    Stop,
    Process(ProcessState),
    Shutdown(oneshot::Sender<()>),
}

/// Cloneable handle to the scanner actor.
///
/// The actor stops once [`ScannerHandle::shutdown`] is called or every
/// handle has been dropped.
#[derive(Debug, Clone)]
pub struct ScannerHandle {
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<ScannerSnapshot>,
}

impl ScannerHandle {
    /// Spawn the scanner actor on the current runtime.
    pub fn spawn<A: ScanAdapter>(adapter: Arc<A>, config: ScannerConfig) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (samples_tx, samples_rx) = mpsc::channel(config.channel_capacity.max(1));
        let (snapshot_tx, snapshot_rx) = watch::channel(ScannerSnapshot::default());

        let actor = ScannerActor::new(adapter, config, samples_tx, snapshot_tx);
        tokio::spawn(actor.run(commands_rx, samples_rx));

        Self {
            commands: commands_tx,
            snapshot: snapshot_rx,
        }
    }

    /// Latest published state.
    #[must_use]
    pub fn snapshot(&self) -> ScannerSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn status(&self) -> ScannerStatus {
        self.snapshot.borrow().status
    }

    /// Tracked beacons, strongest first.
    #[must_use]
    pub fn beacons(&self) -> Vec<BeaconReading> {
        self.snapshot.borrow().beacons.clone()
    }

    /// The strongest tracked beacon.
    #[must_use]
    pub fn strongest(&self) -> Option<BeaconReading> {
        self.snapshot.borrow().strongest().cloned()
    }

    /// Last error message.
    #[must_use]
    pub fn error(&self) -> Option<String> {
        self.snapshot.borrow().error.clone()
    }

    /// Watch every published snapshot.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ScannerSnapshot> {
        self.snapshot.clone()
    }

    /// Whether the actor is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    /// Express intent to scan.
    ///
    /// # Errors
    ///
    /// Returns [`DolaniError::SubsystemStopped`] after shutdown.
    pub fn start(&self) -> Result<()> {
        self.send(Command::Start)
    }

    /// Drop the intent to scan and halt the hardware scan.
    ///
    /// # Errors
    ///
    /// Returns [`DolaniError::SubsystemStopped`] after shutdown.
    pub fn stop(&self) -> Result<()> {
        self.send(Command::Stop)
    }

    /// Forward a foreground/background transition of the host process.
    ///
    /// # Errors
    ///
    /// Returns [`DolaniError::SubsystemStopped`] after shutdown.
    pub fn set_process_state(&self, state: ProcessState) -> Result<()> {
        self.send(Command::Process(state))
    }

    /// Stop scanning, release the adapter and end the actor.
    ///
    /// # Errors
    ///
    /// Returns [`DolaniError::SubsystemStopped`] if the actor was already gone.
    pub async fn shutdown(&self) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.send(Command::Shutdown(done_tx))?;
        done_rx.await.map_err(|_| DolaniError::SubsystemStopped)
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| DolaniError::SubsystemStopped)
    }
}

// =============================================================================
// ACTOR
// =============================================================================

struct ScannerActor<A> {
    adapter: Arc<A>,
    config: ScannerConfig,
    registry: BeaconRegistry,
    smoother: SignalSmoother,

    status: ScannerStatus,
    error: Option<String>,
    intent: bool,
    process: ProcessState,

    power: Option<BoxStream<'static, AdapterState>>,
    scan: Option<ScanGuard>,
    generation: u64,
    session: Option<Uuid>,

    samples_tx: mpsc::Sender<SessionSample>,
    snapshot_tx: watch::Sender<ScannerSnapshot>,
    beacons: Vec<BeaconReading>,
    dirty: bool,
}

impl<A: ScanAdapter> ScannerActor<A> {
    fn new(
        adapter: Arc<A>,
        config: ScannerConfig,
        samples_tx: mpsc::Sender<SessionSample>,
        snapshot_tx: watch::Sender<ScannerSnapshot>,
    ) -> Self {
        Self {
            adapter,
            registry: BeaconRegistry::new(config.stale_timeout),
            smoother: SignalSmoother::new(config.window_size),
            config,
            status: ScannerStatus::Idle,
            error: None,
            intent: false,
            process: ProcessState::Foreground,
            power: None,
            scan: None,
            generation: 0,
            session: None,
            samples_tx,
            snapshot_tx,
            beacons: Vec::new(),
            dirty: false,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut samples: mpsc::Receiver<SessionSample>,
    ) {
        let mut ticker = tokio::time::interval(self.config.throttle);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let done = loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown(done)) => break Some(done),
                    Some(command) => self.handle(command).await,
                    None => break None,
                },
                Some(sample) = samples.recv() => self.ingest(sample),
                state = next_power(&mut self.power) => match state {
                    Some(state) => self.on_power(state).await,
                    None => {
                        tracing::debug!("Adapter state stream ended");
                        self.power = None;
                    }
                },
                _ = ticker.tick() => self.flush(Instant::now()),
            }
        };

        self.release();
        drop(commands);
        tracing::debug!("Scanner stopped");
        if let Some(done) = done {
            let _ = done.send(());
        }
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Start => {
                self.intent = true;
                if self.status == ScannerStatus::Scanning {
                    return;
                }
                self.try_start().await;
            }
            Command::Stop => {
                self.intent = false;
                self.release();
                self.error = None;
                self.set_status(ScannerStatus::Idle);
            }
            Command::Process(state) => self.on_process(state).await,
            Command::Shutdown(_) => {}
        }
    }

    async fn on_process(&mut self, state: ProcessState) {
        let previous = std::mem::replace(&mut self.process, state);
        if previous == state {
            return;
        }

        match state {
            ProcessState::Background if self.status == ScannerStatus::Scanning => {
                self.stop_hardware();
                tracing::debug!("Process backgrounded, pausing scan");
                self.set_status(ScannerStatus::Paused);
            }
            ProcessState::Foreground if self.intent && self.status == ScannerStatus::Paused => {
                tracing::debug!("Process foregrounded, resuming scan");
                self.try_start().await;
            }
            _ => {}
        }
    }

    async fn on_power(&mut self, state: AdapterState) {
        if !self.intent || state == AdapterState::Unknown {
            return;
        }

        if state.is_powered_on() {
            if self.status != ScannerStatus::BtOff {
                return;
            }
            if self.process == ProcessState::Background {
                self.error = None;
                self.set_status(ScannerStatus::Paused);
            } else {
                tracing::info!("Bluetooth powered on, resuming scan");
                self.try_start().await;
            }
        } else if matches!(self.status, ScannerStatus::Scanning | ScannerStatus::Paused) {
            self.stop_hardware();
            tracing::warn!(?state, "Bluetooth became unavailable");
            self.error = Some(state.unavailable_message().to_string());
            self.set_status(ScannerStatus::BtOff);
        }
    }

    async fn try_start(&mut self) {
        self.error = None;
        self.stop_hardware();

        if self.power.is_none() {
            match self.adapter.subscribe_state().await {
                Ok(stream) => self.power = Some(stream),
                Err(e) => tracing::warn!(error = %e, "Cannot watch adapter state"),
            }
        }

        let state = match self.adapter.state().await {
            Ok(state) => state,
            Err(e) => return self.fail(e),
        };
        if !state.is_powered_on() {
            tracing::info!(?state, "Bluetooth unavailable, waiting for power on");
            self.error = Some(state.unavailable_message().to_string());
            self.set_status(ScannerStatus::BtOff);
            return;
        }

        self.begin_session();
        let sink = AdvertisementSink::new(self.generation, self.samples_tx.clone());
        match self.adapter.start_scan(self.config.scan_options, sink).await {
            Ok(guard) => {
                self.scan = Some(guard);
                tracing::info!(session = ?self.session, "Scan session started");
                self.set_status(ScannerStatus::Scanning);
            }
            Err(e) => self.fail(e),
        }
    }

    fn begin_session(&mut self) {
        self.generation += 1;
        self.session = Some(Uuid::now_v7());
        self.registry.clear();
        self.smoother.clear();
        self.beacons.clear();
        self.dirty = false;
    }

    fn fail(&mut self, err: BluetoothError) {
        match err {
            BluetoothError::AdapterPoweredOff | BluetoothError::Unauthorized => {
                self.error = Some(err.to_string());
                self.set_status(ScannerStatus::BtOff);
            }
            err => {
                tracing::warn!(error = %err, "Failed to start scan");
                self.error = Some(err.to_string());
                self.set_status(ScannerStatus::Error);
            }
        }
    }

    fn ingest(&mut self, sample: SessionSample) {
        if self.status != ScannerStatus::Scanning || sample.generation != self.generation {
            return;
        }
        let SessionSample { advertisement, .. } = sample;
        if let Some(filter) = &self.config.identifier_filter {
            if !filter.is_match(&advertisement.identifier) {
                return;
            }
        }

        let smoothed_rssi = self
            .smoother
            .push(&advertisement.identifier, advertisement.rssi);
        self.registry.upsert(BeaconReading {
            distance_m: self.config.distance.estimate(smoothed_rssi),
            identifier: advertisement.identifier,
            raw_rssi: advertisement.rssi,
            smoothed_rssi,
            last_seen: Instant::now(),
        });
        self.dirty = true;
    }

    fn flush(&mut self, now: Instant) {
        let before = self.registry.len();
        let beacons = self.registry.flush(now);
        if !self.dirty && beacons.len() == before {
            return;
        }
        self.dirty = false;
        self.beacons = beacons;
        self.publish();
    }

    fn set_status(&mut self, status: ScannerStatus) {
        if self.status != status {
            tracing::debug!(from = %self.status, to = %status, "Scanner state change");
        }
        self.status = status;
        self.publish();
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(ScannerSnapshot {
            status: self.status,
            beacons: self.beacons.clone(),
            error: self.error.clone(),
            session: self.session,
        });
    }

    fn stop_hardware(&mut self) {
        if let Some(scan) = self.scan.take() {
            scan.stop();
            tracing::debug!(session = ?self.session, "Hardware scan stopped");
        }
    }

    fn release(&mut self) {
        self.stop_hardware();
        self.power = None;
    }
}

async fn next_power(power: &mut Option<BoxStream<'static, AdapterState>>) -> Option<AdapterState> {
    match power {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}
