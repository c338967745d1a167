//! Per-beacon RSSI smoothing.
//!
//! Each beacon keeps a sliding window of its last raw readings. The
//! smoothed value is a weighted moving average where the sample at window
//! position `i` (0 = oldest) carries weight `i + 1`, so recent readings
//! dominate while single spikes are damped.

use std::collections::{HashMap, VecDeque};

use crate::distance::round_centi;

/// Default number of samples kept per beacon.
pub const DEFAULT_WINDOW_SIZE: usize = 5;

/// Weighted moving average of `samples` (oldest first), rounded to two
/// decimals. Returns `None` for an empty input.
pub fn weighted_moving_average<I>(samples: I) -> Option<f64>
where
    I: IntoIterator<Item = i16>,
{
    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;

    for (index, sample) in samples.into_iter().enumerate() {
        #[allow(clippy::cast_precision_loss)]
        let weight = (index + 1) as f64;
        weighted_sum += f64::from(sample) * weight;
        weight_total += weight;
    }

    if weight_total == 0.0 {
        None
    } else {
        Some(round_centi(weighted_sum / weight_total))
    }
}

/// Sliding-window RSSI smoother keyed by beacon identifier.
#[derive(Debug, Clone)]
pub struct SignalSmoother {
    window_size: usize,
    windows: HashMap<String, VecDeque<i16>>,
}

impl Default for SignalSmoother {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE)
    }
}

impl SignalSmoother {
    /// Create a smoother keeping `window_size` samples per beacon.
    ///
    /// A window size of zero is treated as one.
    #[must_use]
    pub fn new(window_size: usize) -> Self {
        Self {
            window_size: window_size.max(1),
            windows: HashMap::new(),
        }
    }

    /// Configured window capacity.
    #[must_use]
    pub const fn window_size(&self) -> usize {
        self.window_size
    }

    /// Push a raw reading and return the new smoothed value.
    pub fn push(&mut self, identifier: &str, rssi: i16) -> f64 {
        let capacity = self.window_size;
        let window = self
            .windows
            .entry(identifier.to_owned())
            .or_insert_with(|| VecDeque::with_capacity(capacity));

        if window.len() == capacity {
            window.pop_front();
        }
        window.push_back(rssi);

        weighted_moving_average(window.iter().copied()).unwrap_or_else(|| f64::from(rssi))
    }

    /// Current smoothed value for a beacon, or `None` if it has no samples.
    #[must_use]
    pub fn get(&self, identifier: &str) -> Option<f64> {
        self.windows
            .get(identifier)
            .and_then(|window| weighted_moving_average(window.iter().copied()))
    }

    /// Number of samples currently held for a beacon.
    #[must_use]
    pub fn window_len(&self, identifier: &str) -> usize {
        self.windows.get(identifier).map_or(0, VecDeque::len)
    }

    /// Drop every window (a new scan session starts from scratch).
    pub fn clear(&mut self) {
        self.windows.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_weighted_average_example() {
        // (-70*1 + -65*2 + -60*3) / 6 = -63.333..
        assert_eq!(weighted_moving_average([-70, -65, -60]), Some(-63.33));
    }

    #[test]
    fn test_weighted_average_empty() {
        assert_eq!(weighted_moving_average(std::iter::empty()), None);
    }

    #[test]
    fn test_push_returns_running_average() {
        let mut smoother = SignalSmoother::new(5);
        assert!(close(smoother.push("a", -70), -70.0));
        assert!(close(smoother.push("a", -65), -66.67));
        assert!(close(smoother.push("a", -60), -63.33));
    }

    #[test]
    fn test_window_evicts_oldest() {
        let mut smoother = SignalSmoother::new(3);
        for rssi in [-90, -70, -65, -60] {
            smoother.push("a", rssi);
        }
        assert_eq!(smoother.window_len("a"), 3);
        // -90 dropped: same as the [-70, -65, -60] example.
        assert_eq!(smoother.get("a"), Some(-63.33));
    }

    #[test]
    fn test_window_never_exceeds_capacity() {
        let mut smoother = SignalSmoother::new(5);
        for i in 0..50 {
            smoother.push("a", -40 - i);
            assert!(smoother.window_len("a") <= 5);
        }
        // Last five samples: -85..=-89, weights 1..=5.
        let expected = weighted_moving_average([-85, -86, -87, -88, -89]).unwrap();
        assert_eq!(smoother.get("a"), Some(expected));
    }

    #[test]
    fn test_windows_are_independent() {
        let mut smoother = SignalSmoother::default();
        smoother.push("a", -50);
        smoother.push("b", -80);
        assert_eq!(smoother.get("a"), Some(-50.0));
        assert_eq!(smoother.get("b"), Some(-80.0));
        assert_eq!(smoother.get("c"), None);
    }

    #[test]
    fn test_get_does_not_mutate() {
        let mut smoother = SignalSmoother::default();
        smoother.push("a", -60);
        let _ = smoother.get("a");
        let _ = smoother.get("a");
        assert_eq!(smoother.window_len("a"), 1);
    }

    #[test]
    fn test_clear() {
        let mut smoother = SignalSmoother::default();
        smoother.push("a", -60);
        smoother.clear();
        assert_eq!(smoother.get("a"), None);
        assert_eq!(smoother.window_len("a"), 0);
    }

    #[test]
    fn test_zero_window_size_is_clamped() {
        let mut smoother = SignalSmoother::new(0);
        assert_eq!(smoother.window_size(), 1);
        smoother.push("a", -60);
        assert!(close(smoother.push("a", -70), -70.0));
    }
}
