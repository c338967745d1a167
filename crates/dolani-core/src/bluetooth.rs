//! Bluetooth Low Energy scanning.
//!
//! This module defines the boundary between the positioning pipeline and
//! the radio hardware:
//! - [`ScanAdapter`]: power state, power state changes and continuous scans
//! - [`ScanGuard`]: owns a running hardware scan, stopping it on drop
//! - [`AdvertisementSink`]: non-blocking hand-off of raw readings
//!
//! Two backends are provided: `BluerAdapter` (BlueZ, Linux) behind the
//! `bluetooth` feature, and `MockAdapter` for tests and hardware-less runs.

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

#[cfg(feature = "bluetooth")]
pub use bluez::BluerAdapter;
#[cfg(any(test, feature = "mock-bluetooth", not(feature = "bluetooth")))]
pub use mock::MockAdapter;

/// Errors raised by a scan adapter.
#[derive(Debug, Error)]
pub enum BluetoothError {
    /// No adapter present.
    #[error("No Bluetooth adapter found")]
    AdapterNotFound,

    /// Permission to use the adapter was denied.
    #[error("Bluetooth permission denied")]
    Unauthorized,

    /// The adapter is powered off.
    #[error("Bluetooth is turned off")]
    AdapterPoweredOff,

    /// Connecting to the Bluetooth daemon failed.
    #[error("Failed to initialize Bluetooth session: {message}")]
    SessionInitFailed {
        /// Underlying error.
        message: String,
    },

    /// Starting discovery failed.
    #[error("Bluetooth discovery failed: {message}")]
    DiscoveryFailed {
        /// Underlying error.
        message: String,
    },

    /// Any other adapter failure.
    #[error("Bluetooth error: {message}")]
    Internal {
        /// Underlying error.
        message: String,
    },
}

/// Result alias for adapter operations.
pub type BluetoothResult<T> = std::result::Result<T, BluetoothError>;

/// Power state reported by the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    /// Ready to scan.
    PoweredOn,
    /// Present but switched off.
    PoweredOff,
    /// Present but the process lacks permission.
    Unauthorized,
    /// The platform has no BLE support.
    Unsupported,
    /// Not determined yet.
    Unknown,
}

impl AdapterState {
    /// Whether scanning is possible in this state.
    #[must_use]
    pub const fn is_powered_on(self) -> bool {
        matches!(self, Self::PoweredOn)
    }

    /// Message shown while the scanner waits for the adapter.
    #[must_use]
    pub const fn unavailable_message(self) -> &'static str {
        match self {
            Self::Unauthorized => "Bluetooth permission denied",
            _ => "Bluetooth is turned off",
        }
    }
}

/// One raw scan report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    /// Beacon identifier, see [`beacon_identifier`].
    pub identifier: String,
    /// Received signal strength (dBm).
    pub rssi: i16,
}

impl Advertisement {
    /// Create an advertisement.
    pub fn new(identifier: impl Into<String>, rssi: i16) -> Self {
        Self {
            identifier: identifier.into(),
            rssi,
        }
    }
}

/// Options for a continuous scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanOptions {
    /// Report every advertisement, not only the first per device.
    pub allow_duplicates: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            allow_duplicates: true,
        }
    }
}

/// Advertisement tagged with the scan session that produced it.
#[derive(Debug)]
pub(crate) struct SessionSample {
    pub generation: u64,
    pub advertisement: Advertisement,
}

/// Non-blocking delivery of advertisements into the scanner.
#[derive(Debug, Clone)]
pub struct AdvertisementSink {
    generation: u64,
    tx: mpsc::Sender<SessionSample>,
}

impl AdvertisementSink {
    pub(crate) const fn new(generation: u64, tx: mpsc::Sender<SessionSample>) -> Self {
        Self { generation, tx }
    }

    /// Hand an advertisement to the scanner without waiting.
    ///
    /// Returns `false` if the sample was dropped because the channel is
    /// full or the scanner is gone.
    pub fn deliver(&self, advertisement: Advertisement) -> bool {
        let sample = SessionSample {
            generation: self.generation,
            advertisement,
        };
        match self.tx.try_send(sample) {
            Ok(()) => true,
            Err(TrySendError::Full(sample)) => {
                tracing::trace!(
                    identifier = %sample.advertisement.identifier,
                    "Advertisement channel full, dropping sample"
                );
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Whether the receiving scanner has gone away.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Owns a running hardware scan. Stopping or dropping it halts the scan.
pub struct ScanGuard {
    stop: Option<Box<dyn FnOnce() + Send + 'static>>,
}

impl ScanGuard {
    /// Wrap the action that stops the hardware scan.
    pub fn new(stop: impl FnOnce() + Send + 'static) -> Self {
        Self {
            stop: Some(Box::new(stop)),
        }
    }

    /// Stop the scan now.
    pub fn stop(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(stop) = self.stop.take() {
            stop();
        }
    }
}

impl Drop for ScanGuard {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for ScanGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanGuard")
            .field("active", &self.stop.is_some())
            .finish()
    }
}

/// A BLE radio the scanner can drive.
#[async_trait]
pub trait ScanAdapter: Send + Sync + 'static {
    /// Current power state.
    async fn state(&self) -> BluetoothResult<AdapterState>;

    /// Stream of power states: the current state first, then every change.
    /// Dropping the stream unsubscribes.
    async fn subscribe_state(&self) -> BluetoothResult<BoxStream<'static, AdapterState>>;

    /// Start a continuous scan delivering into `sink`.
    async fn start_scan(
        &self,
        options: ScanOptions,
        sink: AdvertisementSink,
    ) -> BluetoothResult<ScanGuard>;
}

/// Derive the beacon identifier of a device.
///
/// The first advertised service UUID wins (lowest one when several are
/// advertised), then the local name, then the device address.
#[must_use]
pub fn beacon_identifier(service_uuids: &[Uuid], local_name: Option<&str>, address: &str) -> String {
    service_uuids
        .iter()
        .min()
        .map(Uuid::to_string)
        .or_else(|| {
            local_name
                .filter(|name| !name.trim().is_empty())
                .map(str::to_owned)
        })
        .unwrap_or_else(|| address.to_owned())
}

#[cfg(feature = "bluetooth")]
mod bluez {
    use async_trait::async_trait;
    use bluer::{
        Adapter, AdapterEvent, AdapterProperty, Address, DiscoveryFilter, DiscoveryTransport,
        ErrorKind, Session,
    };
    use futures::stream::{self, BoxStream, StreamExt};
    use uuid::Uuid;

    use super::{
        beacon_identifier, AdapterState, Advertisement, AdvertisementSink, BluetoothError,
        BluetoothResult, ScanAdapter, ScanGuard, ScanOptions,
    };

    impl From<bluer::Error> for BluetoothError {
        fn from(err: bluer::Error) -> Self {
            match err.kind {
                ErrorKind::NotFound => Self::AdapterNotFound,
                ErrorKind::NotAuthorized | ErrorKind::NotPermitted => Self::Unauthorized,
                ErrorKind::NotReady => Self::AdapterPoweredOff,
                _ => Self::Internal {
                    message: err.to_string(),
                },
            }
        }
    }

    /// BlueZ backed adapter (default adapter of the system).
    pub struct BluerAdapter {
        _session: Session,
        adapter: Adapter,
    }

    impl BluerAdapter {
        /// Connect to BlueZ and pick the default adapter.
        ///
        /// # Errors
        ///
        /// Returns an error if the Bluetooth daemon is unreachable or no
        /// adapter exists.
        pub async fn new() -> BluetoothResult<Self> {
            let session = Session::new()
                .await
                .map_err(|e| BluetoothError::SessionInitFailed {
                    message: e.to_string(),
                })?;
            let adapter = session.default_adapter().await?;
            tracing::info!(adapter = adapter.name(), "Using Bluetooth adapter");

            Ok(Self {
                _session: session,
                adapter,
            })
        }
    }

    #[async_trait]
    impl ScanAdapter for BluerAdapter {
        async fn state(&self) -> BluetoothResult<AdapterState> {
            match self.adapter.is_powered().await {
                Ok(true) => Ok(AdapterState::PoweredOn),
                Ok(false) => Ok(AdapterState::PoweredOff),
                Err(e) if matches!(e.kind, ErrorKind::NotAuthorized | ErrorKind::NotPermitted) => {
                    Ok(AdapterState::Unauthorized)
                }
                Err(e) => Err(e.into()),
            }
        }

        async fn subscribe_state(&self) -> BluetoothResult<BoxStream<'static, AdapterState>> {
            let current = self.state().await?;
            let events = self.adapter.events().await?;
            let changes = events.filter_map(|event| async move {
                match event {
                    AdapterEvent::PropertyChanged(AdapterProperty::Powered(true)) => {
                        Some(AdapterState::PoweredOn)
                    }
                    AdapterEvent::PropertyChanged(AdapterProperty::Powered(false)) => {
                        Some(AdapterState::PoweredOff)
                    }
                    _ => None,
                }
            });

            Ok(stream::once(async move { current }).chain(changes).boxed())
        }

        async fn start_scan(
            &self,
            options: ScanOptions,
            sink: AdvertisementSink,
        ) -> BluetoothResult<ScanGuard> {
            let discovery_failed = |e: bluer::Error| BluetoothError::DiscoveryFailed {
                message: e.to_string(),
            };

            let filter = DiscoveryFilter {
                transport: DiscoveryTransport::Le,
                duplicate_data: options.allow_duplicates,
                ..Default::default()
            };
            self.adapter
                .set_discovery_filter(filter)
                .await
                .map_err(discovery_failed)?;
            let discovery = self
                .adapter
                .discover_devices_with_changes()
                .await
                .map_err(discovery_failed)?;

            let adapter = self.adapter.clone();
            let task = tokio::spawn(async move {
                futures::pin_mut!(discovery);
                while let Some(event) = discovery.next().await {
                    let AdapterEvent::DeviceAdded(address) = event else {
                        continue;
                    };
                    match read_advertisement(&adapter, address).await {
                        Ok(Some(advertisement)) => {
                            if !sink.deliver(advertisement) && sink.is_closed() {
                                break;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => tracing::warn!(%address, error = %e, "BLE scan error"),
                    }
                }
                tracing::debug!("Discovery stream ended");
            });

            // Discovery stops once the stream inside the task is dropped.
            Ok(ScanGuard::new(move || task.abort()))
        }
    }

    async fn read_advertisement(
        adapter: &Adapter,
        address: Address,
    ) -> bluer::Result<Option<Advertisement>> {
        let device = adapter.device(address)?;
        let Some(rssi) = device.rssi().await? else {
            return Ok(None);
        };
        let uuids: Vec<Uuid> = device
            .uuids()
            .await?
            .unwrap_or_default()
            .into_iter()
            .collect();
        let name = device.name().await?;

        Ok(Some(Advertisement {
            identifier: beacon_identifier(&uuids, name.as_deref(), &address.to_string()),
            rssi,
        }))
    }
}

#[cfg(any(test, feature = "mock-bluetooth", not(feature = "bluetooth")))]
mod mock {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex, PoisonError};

    use async_trait::async_trait;
    use futures::stream::{self, BoxStream, StreamExt};
    use tokio::sync::watch;

    use super::{
        AdapterState, Advertisement, AdvertisementSink, BluetoothError, BluetoothResult,
        ScanAdapter, ScanGuard, ScanOptions,
    };

    /// In-memory adapter driven by the caller.
    ///
    /// Cloning shares the same simulated radio.
    #[derive(Clone)]
    pub struct MockAdapter {
        inner: Arc<MockInner>,
    }

    struct MockInner {
        power: watch::Sender<AdapterState>,
        next_start_failure: Mutex<Option<String>>,
        sink: Mutex<Option<AdvertisementSink>>,
        scanning: AtomicBool,
        starts: AtomicUsize,
        stops: AtomicUsize,
    }

    impl MockAdapter {
        /// Create a mock radio in the given power state.
        #[must_use]
        pub fn new(initial: AdapterState) -> Self {
            let (power, _) = watch::channel(initial);
            Self {
                inner: Arc::new(MockInner {
                    power,
                    next_start_failure: Mutex::new(None),
                    sink: Mutex::new(None),
                    scanning: AtomicBool::new(false),
                    starts: AtomicUsize::new(0),
                    stops: AtomicUsize::new(0),
                }),
            }
        }

        /// A radio that is already powered on.
        #[must_use]
        pub fn powered_on() -> Self {
            Self::new(AdapterState::PoweredOn)
        }

        /// Change the power state and notify subscribers.
        pub fn set_state(&self, state: AdapterState) {
            self.inner.power.send_replace(state);
        }

        /// Make the next `start_scan` call fail with `message`.
        pub fn fail_next_start(&self, message: impl Into<String>) {
            *lock(&self.inner.next_start_failure) = Some(message.into());
        }

        /// Simulate an advertisement. Returns `false` when no scan is running
        /// or the sample was dropped.
        pub fn advertise(&self, identifier: &str, rssi: i16) -> bool {
            let sink = lock(&self.inner.sink).clone();
            sink.is_some_and(|sink| sink.deliver(Advertisement::new(identifier, rssi)))
        }

        /// Whether a hardware scan is currently running.
        #[must_use]
        pub fn is_scanning(&self) -> bool {
            self.inner.scanning.load(Ordering::SeqCst)
        }

        /// Number of scans started so far.
        #[must_use]
        pub fn scan_starts(&self) -> usize {
            self.inner.starts.load(Ordering::SeqCst)
        }

        /// Number of scans stopped so far.
        #[must_use]
        pub fn scan_stops(&self) -> usize {
            self.inner.stops.load(Ordering::SeqCst)
        }

        /// Number of live power state subscriptions.
        #[must_use]
        pub fn state_subscribers(&self) -> usize {
            self.inner.power.receiver_count()
        }
    }

    impl Default for MockAdapter {
        fn default() -> Self {
            Self::powered_on()
        }
    }

    fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
        mutex.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[async_trait]
    impl ScanAdapter for MockAdapter {
        async fn state(&self) -> BluetoothResult<AdapterState> {
            Ok(*self.inner.power.borrow())
        }

        async fn subscribe_state(&self) -> BluetoothResult<BoxStream<'static, AdapterState>> {
            let rx = self.inner.power.subscribe();
            let states = stream::unfold((rx, true), |(mut rx, first)| async move {
                if !first && rx.changed().await.is_err() {
                    return None;
                }
                let state = *rx.borrow_and_update();
                Some((state, (rx, false)))
            });
            Ok(states.boxed())
        }

        async fn start_scan(
            &self,
            _options: ScanOptions,
            sink: AdvertisementSink,
        ) -> BluetoothResult<ScanGuard> {
            if let Some(message) = lock(&self.inner.next_start_failure).take() {
                return Err(BluetoothError::DiscoveryFailed { message });
            }
            if !self.inner.power.borrow().is_powered_on() {
                return Err(BluetoothError::AdapterPoweredOff);
            }

            *lock(&self.inner.sink) = Some(sink);
            self.inner.scanning.store(true, Ordering::SeqCst);
            self.inner.starts.fetch_add(1, Ordering::SeqCst);

            let inner = Arc::clone(&self.inner);
            Ok(ScanGuard::new(move || {
                *lock(&inner.sink) = None;
                inner.scanning.store(false, Ordering::SeqCst);
                inner.stops.fetch_add(1, Ordering::SeqCst);
            }))
        }
    }
}
