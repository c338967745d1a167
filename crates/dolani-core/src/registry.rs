//! In-memory beacon registry with stale eviction.
//!
//! Holds the latest [`BeaconReading`] per identifier. Entries that have not
//! been refreshed within the stale timeout are dropped on the next flush,
//! and snapshots are ordered strongest first.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::types::BeaconReading;

/// Beacons not heard for this long are evicted.
pub const DEFAULT_STALE_TIMEOUT: Duration = Duration::from_millis(5_000);

/// Upsert-by-identifier map of beacon readings.
#[derive(Debug, Clone)]
pub struct BeaconRegistry {
    stale_timeout: Duration,
    entries: HashMap<String, BeaconReading>,
}

impl Default for BeaconRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_STALE_TIMEOUT)
    }
}

impl BeaconRegistry {
    /// Create an empty registry with the given stale timeout.
    #[must_use]
    pub fn new(stale_timeout: Duration) -> Self {
        Self {
            stale_timeout,
            entries: HashMap::new(),
        }
    }

    /// Insert or replace the reading for `reading.identifier`.
    pub fn upsert(&mut self, reading: BeaconReading) {
        if let Some(existing) = self.entries.get_mut(&reading.identifier) {
            *existing = reading;
        } else {
            self.entries.insert(reading.identifier.clone(), reading);
        }
    }

    /// Latest reading for a beacon.
    #[must_use]
    pub fn get(&self, identifier: &str) -> Option<&BeaconReading> {
        self.entries.get(identifier)
    }

    /// Number of tracked beacons.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no beacons are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forget every beacon.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Remove entries last seen more than the stale timeout before `now`.
    ///
    /// Returns the number of evicted beacons.
    pub fn evict_stale(&mut self, now: Instant) -> usize {
        let timeout = self.stale_timeout;
        let before = self.entries.len();
        self.entries
            .retain(|_, reading| now.saturating_duration_since(reading.last_seen) <= timeout);
        before - self.entries.len()
    }

    /// All readings, strongest smoothed signal first. Ties are broken by
    /// identifier.
    #[must_use]
    pub fn snapshot(&self) -> Vec<BeaconReading> {
        let mut readings: Vec<BeaconReading> = self.entries.values().cloned().collect();
        readings.sort_by(strongest_first);
        readings
    }

    /// Evict stale entries, then snapshot.
    pub fn flush(&mut self, now: Instant) -> Vec<BeaconReading> {
        let evicted = self.evict_stale(now);
        if evicted > 0 {
            tracing::debug!(evicted, remaining = self.entries.len(), "Evicted stale beacons");
        }
        self.snapshot()
    }
}

fn strongest_first(a: &BeaconReading, b: &BeaconReading) -> Ordering {
    b.smoothed_rssi
        .total_cmp(&a.smoothed_rssi)
        .then_with(|| a.identifier.cmp(&b.identifier))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(identifier: &str, smoothed_rssi: f64, last_seen: Instant) -> BeaconReading {
        BeaconReading {
            identifier: identifier.to_string(),
            #[allow(clippy::cast_possible_truncation)]
            raw_rssi: smoothed_rssi as i16,
            smoothed_rssi,
            distance_m: crate::distance::estimate_distance(smoothed_rssi),
            last_seen,
        }
    }

    #[test]
    fn test_upsert_replaces_entry() {
        let now = Instant::now() + Duration::from_secs(60);
        let mut registry = BeaconRegistry::default();
        registry.upsert(reading("a", -70.0, now));
        registry.upsert(reading("a", -60.0, now));
        assert_eq!(registry.len(), 1);
        assert!((registry.get("a").unwrap().smoothed_rssi + 60.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_snapshot_orders_strongest_first() {
        let now = Instant::now() + Duration::from_secs(60);
        let mut registry = BeaconRegistry::default();
        registry.upsert(reading("far", -85.0, now));
        registry.upsert(reading("near", -50.0, now));
        registry.upsert(reading("mid", -65.0, now));

        let ids: Vec<_> = registry
            .snapshot()
            .into_iter()
            .map(|r| r.identifier)
            .collect();
        assert_eq!(ids, ["near", "mid", "far"]);
    }

    #[test]
    fn test_snapshot_ties_broken_by_identifier() {
        let now = Instant::now() + Duration::from_secs(60);
        let mut registry = BeaconRegistry::default();
        registry.upsert(reading("b", -60.0, now));
        registry.upsert(reading("c", -60.0, now));
        registry.upsert(reading("a", -60.0, now));

        let ids: Vec<_> = registry
            .snapshot()
            .into_iter()
            .map(|r| r.identifier)
            .collect();
        assert_eq!(ids, ["a", "b", "c"]);
    }

    #[test]
    fn test_snapshot_is_read_only() {
        let now = Instant::now() + Duration::from_secs(60);
        let mut registry = BeaconRegistry::new(Duration::from_millis(10));
        registry.upsert(reading("a", -60.0, now - Duration::from_secs(1)));
        assert_eq!(registry.snapshot().len(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_flush_evicts_stale_entries() {
        let now = Instant::now() + Duration::from_secs(60);
        let mut registry = BeaconRegistry::new(Duration::from_millis(5_000));
        registry.upsert(reading("stale", -50.0, now - Duration::from_millis(5_001)));
        registry.upsert(reading("fresh", -70.0, now - Duration::from_millis(4_000)));

        let snapshot = registry.flush(now);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].identifier, "fresh");
        assert!(registry.get("stale").is_none());
    }

    #[test]
    fn test_entry_at_exact_timeout_is_kept() {
        let now = Instant::now() + Duration::from_secs(60);
        let mut registry = BeaconRegistry::new(Duration::from_millis(5_000));
        registry.upsert(reading("edge", -60.0, now - Duration::from_millis(5_000)));
        assert_eq!(registry.evict_stale(now), 0);
    }

    #[test]
    fn test_clear() {
        let mut registry = BeaconRegistry::default();
        registry.upsert(reading("a", -60.0, Instant::now()));
        registry.clear();
        assert!(registry.is_empty());
    }
}
