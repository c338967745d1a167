//! RSSI to distance conversion.
//!
//! Uses the log-distance path loss model:
//!
//! ```text
//! distance = 10 ^ ((tx_power - rssi) / (10 * n))
//! ```
//!
//! where `tx_power` is the calibrated signal strength at one metre and `n`
//! is the environment dependent path loss exponent (2.0 in free space,
//! 2.5 to 3.0 indoors).

use serde::{Deserialize, Serialize};

/// Calibrated TX power at 1 m (dBm).
pub const DEFAULT_TX_POWER_DBM: f64 = -59.0;

/// Path loss exponent for a typical indoor environment.
pub const DEFAULT_PATH_LOSS_EXPONENT: f64 = 2.5;

/// Smallest distance ever reported, in metres.
pub const MIN_DISTANCE_M: f64 = 0.1;

/// Parameters of the log-distance path loss model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistanceModel {
    /// Signal strength measured at 1 m from the beacon (dBm).
    pub tx_power_dbm: f64,

    /// Environment dependent attenuation exponent.
    pub path_loss_exponent: f64,
}

impl Default for DistanceModel {
    fn default() -> Self {
        Self {
            tx_power_dbm: DEFAULT_TX_POWER_DBM,
            path_loss_exponent: DEFAULT_PATH_LOSS_EXPONENT,
        }
    }
}

impl DistanceModel {
    /// Create a model with explicit parameters.
    #[must_use]
    pub const fn new(tx_power_dbm: f64, path_loss_exponent: f64) -> Self {
        Self {
            tx_power_dbm,
            path_loss_exponent,
        }
    }

    /// Estimate the distance in metres for a (smoothed) RSSI value.
    ///
    /// Non-negative readings are physically invalid for BLE and are treated
    /// as "very close". The result is rounded to centimetres and never
    /// drops below [`MIN_DISTANCE_M`].
    #[must_use]
    pub fn estimate(&self, rssi: f64) -> f64 {
        if rssi >= 0.0 {
            return MIN_DISTANCE_M;
        }

        let exponent = (self.tx_power_dbm - rssi) / (10.0 * self.path_loss_exponent);
        let distance = 10f64.powf(exponent);
        round_centi(distance).max(MIN_DISTANCE_M)
    }
}

/// Estimate distance with the default indoor model.
#[must_use]
pub fn estimate_distance(rssi: f64) -> f64 {
    DistanceModel::default().estimate(rssi)
}

/// Round to two decimal places.
pub(crate) fn round_centi(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_power_is_one_metre() {
        assert!((estimate_distance(-59.0) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_known_attenuation() {
        // 25 dB below reference with n = 2.5 is exactly one decade.
        assert!((estimate_distance(-84.0) - 10.0).abs() < 1e-9);
        // -70 dBm: 10^(11/25) = 2.754...
        assert!((estimate_distance(-70.0) - 2.75).abs() < 1e-9);
    }

    #[test]
    fn test_non_negative_rssi_is_clamped() {
        assert!((estimate_distance(0.0) - MIN_DISTANCE_M).abs() < f64::EPSILON);
        assert!((estimate_distance(12.5) - MIN_DISTANCE_M).abs() < f64::EPSILON);
    }

    #[test]
    fn test_very_strong_signal_hits_floor() {
        // 10^((-59 + 5) / 25) = 0.0069 -> clamped.
        assert!((estimate_distance(-5.0) - MIN_DISTANCE_M).abs() < f64::EPSILON);
    }

    #[test]
    fn test_monotonic_in_signal_strength() {
        let mut previous = f64::INFINITY;
        for rssi in (-110..0).map(f64::from) {
            let distance = estimate_distance(rssi);
            assert!(distance >= MIN_DISTANCE_M);
            assert!(
                distance <= previous,
                "distance must not grow as the signal gets stronger (rssi {rssi})"
            );
            previous = distance;
        }
    }

    #[test]
    fn test_custom_model() {
        let model = DistanceModel::new(-65.0, 2.0);
        // 10^((-65 + 85) / 20) = 10
        assert!((model.estimate(-85.0) - 10.0).abs() < 1e-9);
    }
}
