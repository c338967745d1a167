//! Resolution gating.
//!
//! Decides when the strongest nearby beacon is worth a round trip to the
//! resolver. A resolve is attempted only when the beacon is close enough
//! and no attempt for the same beacon happened within the cooldown window.
//!
//! Attempts are reserved synchronously, before the request is issued, so
//! overlapping triggers for one beacon can never both fire.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::ResolverSettings;
use crate::positioning::PositionPublisher;
use crate::resolver::BeaconResolver;
use crate::types::{BeaconReading, LocationId, ResolvedLocation};

/// Gate thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GateConfig {
    /// Minimum interval between resolves of the same beacon.
    pub cooldown: Duration,
    /// Beacons estimated farther than this are ignored (m).
    pub max_distance_m: f64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_millis(3_000),
            max_distance_m: 15.0,
        }
    }
}

impl From<&ResolverSettings> for GateConfig {
    fn from(settings: &ResolverSettings) -> Self {
        Self {
            cooldown: settings.cooldown(),
            max_distance_m: settings.max_distance_m,
        }
    }
}

/// Whether a reading may be resolved right now.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GateDecision {
    /// Go ahead.
    Resolve,
    /// The same beacon was attempted too recently.
    CoolingDown {
        /// Time left until the next attempt is allowed.
        remaining: Duration,
    },
    /// The beacon is beyond the maximum resolve distance.
    TooFar {
        /// Estimated distance (m).
        distance_m: f64,
    },
}

/// Outcome of a dispatched resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveOutcome {
    /// The beacon resolved to a location which was published.
    Published(LocationId),
    /// The beacon is out of service or has no location.
    Inactive,
    /// The call failed; the previous location was kept.
    Failed,
}

/// A recorded attempt that has not been performed yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    identifier: String,
}

impl Reservation {
    /// Beacon to resolve.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }
}

/// Per-beacon record of the last resolve attempt.
#[derive(Debug, Default)]
struct CooldownRecord {
    last_identifier: Option<String>,
    attempts: HashMap<String, Instant>,
}

impl CooldownRecord {
    fn remaining(&self, identifier: &str, now: Instant, cooldown: Duration) -> Option<Duration> {
        let attempted_at = self.attempts.get(identifier)?;
        let elapsed = now.saturating_duration_since(*attempted_at);
        (elapsed < cooldown).then(|| cooldown - elapsed)
    }

    fn record(&mut self, identifier: &str, now: Instant, cooldown: Duration) {
        self.attempts
            .retain(|_, attempted_at| now.saturating_duration_since(*attempted_at) < cooldown);
        self.attempts.insert(identifier.to_owned(), now);
        self.last_identifier = Some(identifier.to_owned());
    }
}

/// Performs reserved resolves and publishes their results.
struct Dispatcher<R, P> {
    resolver: Arc<R>,
    publisher: Arc<P>,
    resolved: watch::Sender<Option<ResolvedLocation>>,
}

impl<R: BeaconResolver, P: PositionPublisher> Dispatcher<R, P> {
    async fn perform(&self, identifier: String) -> ResolveOutcome {
        let response = match self.resolver.resolve(&identifier).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(identifier = %identifier, error = %e, "Beacon resolve failed");
                return ResolveOutcome::Failed;
            }
        };

        let location = match response.location {
            Some(location) if response.operating => location,
            _ => {
                tracing::debug!(
                    identifier = %identifier,
                    operating = response.operating,
                    "Beacon has no active location"
                );
                return ResolveOutcome::Inactive;
            }
        };

        let location_id = location.id;
        tracing::info!(
            identifier = %identifier,
            location_id,
            location = %location.name,
            "Resolved beacon"
        );
        self.resolved.send_replace(Some(ResolvedLocation {
            beacon_identifier: identifier,
            beacon_id: response.beacon_id,
            beacon_name: response.beacon_name,
            location,
            resolved_at_utc: Utc::now(),
        }));
        self.publisher.set_current_location(Some(location_id));

        ResolveOutcome::Published(location_id)
    }
}

/// Cooldown and proximity gate in front of the beacon resolver.
pub struct ResolutionGate<R, P> {
    config: GateConfig,
    cooldown: CooldownRecord,
    dispatcher: Arc<Dispatcher<R, P>>,
}

impl<R: BeaconResolver, P: PositionPublisher> ResolutionGate<R, P> {
    /// Create a gate in front of `resolver`, publishing into `publisher`.
    pub fn new(resolver: Arc<R>, publisher: Arc<P>, config: GateConfig) -> Self {
        let (resolved, _) = watch::channel(None);
        Self {
            config,
            cooldown: CooldownRecord::default(),
            dispatcher: Arc::new(Dispatcher {
                resolver,
                publisher,
                resolved,
            }),
        }
    }

    /// Gate thresholds.
    #[must_use]
    pub const fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Identifier of the most recent reservation.
    #[must_use]
    pub fn last_identifier(&self) -> Option<&str> {
        self.cooldown.last_identifier.as_deref()
    }

    /// Check a reading without recording anything.
    #[must_use]
    pub fn evaluate(&self, reading: &BeaconReading, now: Instant) -> GateDecision {
        if let Some(remaining) =
            self.cooldown
                .remaining(&reading.identifier, now, self.config.cooldown)
        {
            return GateDecision::CoolingDown { remaining };
        }
        if reading.distance_m > self.config.max_distance_m {
            return GateDecision::TooFar {
                distance_m: reading.distance_m,
            };
        }
        GateDecision::Resolve
    }

    /// Record an attempt for `reading` if the gate allows one.
    pub fn reserve(&mut self, reading: &BeaconReading, now: Instant) -> Option<Reservation> {
        match self.evaluate(reading, now) {
            GateDecision::Resolve => {
                self.cooldown
                    .record(&reading.identifier, now, self.config.cooldown);
                Some(Reservation {
                    identifier: reading.identifier.clone(),
                })
            }
            decision => {
                tracing::trace!(identifier = %reading.identifier, ?decision, "Resolve skipped");
                None
            }
        }
    }

    /// Perform a reserved resolve on a background task.
    ///
    /// Failures are logged and swallowed; the previous location stays.
    pub fn dispatch(&self, reservation: Reservation) -> JoinHandle<ResolveOutcome> {
        let dispatcher = Arc::clone(&self.dispatcher);
        tokio::spawn(async move { dispatcher.perform(reservation.identifier).await })
    }

    /// Reserve and dispatch in one step.
    pub fn observe(&mut self, reading: &BeaconReading) -> Option<JoinHandle<ResolveOutcome>> {
        let reservation = self.reserve(reading, Instant::now())?;
        Some(self.dispatch(reservation))
    }

    /// Most recent successful resolution.
    #[must_use]
    pub fn resolved_location(&self) -> Option<ResolvedLocation> {
        self.dispatcher.resolved.borrow().clone()
    }

    /// Watch successful resolutions.
    #[must_use]
    pub fn subscribe_resolved(&self) -> watch::Receiver<Option<ResolvedLocation>> {
        self.dispatcher.resolved.subscribe()
    }
}

/// Pick the beacon to resolve from a strongest-first snapshot.
///
/// With `hysteresis_db == 0` this is simply the strongest beacon. Otherwise
/// the previous target is kept while it is still visible and the strongest
/// beacon beats it by less than the margin.
#[must_use]
pub fn select_target<'a>(
    beacons: &'a [BeaconReading],
    previous: Option<&str>,
    hysteresis_db: f64,
) -> Option<&'a BeaconReading> {
    let strongest = beacons.first()?;
    if hysteresis_db <= 0.0 {
        return Some(strongest);
    }

    let incumbent = previous
        .filter(|id| *id != strongest.identifier)
        .and_then(|id| beacons.iter().find(|reading| reading.identifier == id));

    match incumbent {
        Some(current) if strongest.smoothed_rssi - current.smoothed_rssi < hysteresis_db => {
            Some(current)
        }
        _ => Some(strongest),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{ResolveError, ResolveResult};
    use crate::types::{Floor, Location, ResolveResponse};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeResolver {
        calls: AtomicUsize,
        fail: std::sync::atomic::AtomicBool,
        operating: Mutex<bool>,
    }

    impl FakeResolver {
        fn operating() -> Self {
            Self {
                operating: Mutex::new(true),
                ..Self::default()
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl BeaconResolver for FakeResolver {
        async fn resolve(&self, identifier: &str) -> ResolveResult<ResolveResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(ResolveError::Backend("connection reset".into()));
            }
            Ok(ResolveResponse {
                beacon_id: 1,
                beacon_name: Some(identifier.to_string()),
                operating: *self.operating.lock().unwrap(),
                location: Some(location(if identifier == "b" { 20 } else { 10 })),
            })
        }
    }

    #[derive(Default)]
    struct RecordingPublisher {
        published: Mutex<Vec<Option<LocationId>>>,
    }

    impl PositionPublisher for RecordingPublisher {
        fn set_current_location(&self, location_id: Option<LocationId>) {
            self.published.lock().unwrap().push(location_id);
        }
    }

    fn location(id: LocationId) -> Location {
        Location {
            id,
            kind: "OFFICE".to_string(),
            name: format!("Room {id}"),
            room_number: None,
            coordinate_x: 0.0,
            coordinate_y: 0.0,
            floor_id: 1,
            floor: Floor {
                id: 1,
                floor_number: 0,
                floor_plan_image_url: None,
                building_id: 1,
            },
            department: None,
        }
    }

    fn reading(identifier: &str, smoothed_rssi: f64, distance_m: f64) -> BeaconReading {
        BeaconReading {
            identifier: identifier.to_string(),
            raw_rssi: -60,
            smoothed_rssi,
            distance_m,
            last_seen: Instant::now(),
        }
    }

    type TestGate = ResolutionGate<FakeResolver, RecordingPublisher>;

    fn gate(resolver: FakeResolver) -> (TestGate, Arc<FakeResolver>, Arc<RecordingPublisher>) {
        let resolver = Arc::new(resolver);
        let publisher = Arc::new(RecordingPublisher::default());
        let gate = ResolutionGate::new(
            Arc::clone(&resolver),
            Arc::clone(&publisher),
            GateConfig::default(),
        );
        (gate, resolver, publisher)
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_allows_single_call() {
        let (mut gate, resolver, publisher) = gate(FakeResolver::operating());
        let beacon = reading("a", -60.0, 1.0);

        let first = gate.observe(&beacon).expect("first trigger resolves");
        assert!(gate.observe(&beacon).is_none());
        assert_eq!(first.await.unwrap(), ResolveOutcome::Published(10));
        assert!(gate.observe(&beacon).is_none());

        assert_eq!(resolver.calls(), 1);
        assert_eq!(*publisher.published.lock().unwrap(), vec![Some(10)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_after_cooldown_calls_again() {
        let (mut gate, resolver, _) = gate(FakeResolver::operating());
        let beacon = reading("a", -60.0, 1.0);

        gate.observe(&beacon).unwrap().await.unwrap();
        tokio::time::advance(Duration::from_millis(2_999)).await;
        assert!(matches!(
            gate.evaluate(&beacon, Instant::now()),
            GateDecision::CoolingDown { remaining } if remaining == Duration::from_millis(1)
        ));
        tokio::time::advance(Duration::from_millis(1)).await;
        gate.observe(&beacon).unwrap().await.unwrap();

        assert_eq!(resolver.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_is_per_identifier() {
        let (mut gate, resolver, publisher) = gate(FakeResolver::operating());

        let a = gate.observe(&reading("a", -60.0, 1.0)).unwrap();
        let b = gate.observe(&reading("b", -58.0, 1.0)).unwrap();
        // `a` is still inside its own window even though the last resolved
        // identifier is `b`; a single last-identifier record would resolve
        // it a second time here.
        assert!(gate.observe(&reading("a", -55.0, 1.0)).is_none());
        a.await.unwrap();
        b.await.unwrap();

        assert_eq!(resolver.calls(), 2);
        assert_eq!(gate.last_identifier(), Some("b"));
        assert_eq!(publisher.published.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_too_far_never_resolves() {
        let (mut gate, resolver, _) = gate(FakeResolver::operating());
        let far = reading("a", -95.0, 15.01);

        assert!(matches!(
            gate.evaluate(&far, Instant::now()),
            GateDecision::TooFar { .. }
        ));
        assert!(gate.observe(&far).is_none());
        assert!(gate.observe(&far).is_none());
        assert_eq!(resolver.calls(), 0);

        // Too-far readings do not consume the cooldown.
        assert!(gate.observe(&reading("a", -60.0, 15.0)).is_some());
    }

    #[tokio::test]
    async fn test_failure_keeps_previous_location() {
        let (mut gate, resolver, publisher) = gate(FakeResolver::operating());
        gate.observe(&reading("a", -60.0, 1.0)).unwrap().await.unwrap();
        let before = gate.resolved_location().expect("first resolve succeeded");

        resolver.fail.store(true, Ordering::SeqCst);
        let outcome = gate.observe(&reading("b", -50.0, 0.5)).unwrap().await.unwrap();

        assert_eq!(outcome, ResolveOutcome::Failed);
        assert_eq!(gate.resolved_location(), Some(before));
        assert_eq!(*publisher.published.lock().unwrap(), vec![Some(10)]);
    }

    #[tokio::test]
    async fn test_inactive_beacon_is_not_published() {
        let (mut gate, _, publisher) = gate(FakeResolver::default());
        let outcome = gate.observe(&reading("a", -60.0, 1.0)).unwrap().await.unwrap();

        assert_eq!(outcome, ResolveOutcome::Inactive);
        assert!(gate.resolved_location().is_none());
        assert!(publisher.published.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_subscribe_resolved() {
        let (mut gate, _, _) = gate(FakeResolver::operating());
        let mut resolved = gate.subscribe_resolved();
        gate.observe(&reading("b", -60.0, 1.0)).unwrap().await.unwrap();

        assert!(resolved.has_changed().unwrap());
        let location = resolved.borrow_and_update().clone().unwrap();
        assert_eq!(location.beacon_identifier, "b");
        assert_eq!(location.location.id, 20);
    }

    #[test]
    fn test_select_target_without_hysteresis() {
        let beacons = [reading("a", -60.0, 1.0), reading("b", -61.0, 1.2)];
        assert_eq!(
            select_target(&beacons, Some("b"), 0.0).unwrap().identifier,
            "a"
        );
        assert!(select_target(&[], Some("a"), 0.0).is_none());
    }

    #[test]
    fn test_select_target_with_hysteresis() {
        let beacons = [reading("a", -60.0, 1.0), reading("b", -61.0, 1.2)];
        // "a" is only 1 dB stronger: keep "b".
        assert_eq!(
            select_target(&beacons, Some("b"), 3.0).unwrap().identifier,
            "b"
        );

        let beacons = [reading("a", -55.0, 0.6), reading("b", -61.0, 1.2)];
        assert_eq!(
            select_target(&beacons, Some("b"), 3.0).unwrap().identifier,
            "a"
        );

        // Previous target gone from the snapshot.
        let beacons = [reading("a", -60.0, 1.0)];
        assert_eq!(
            select_target(&beacons, Some("b"), 3.0).unwrap().identifier,
            "a"
        );
    }
}
