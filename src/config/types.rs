use serde::{Deserialize, Serialize};

use crate::engine::thresholds::ThresholdConfig;

/// Immutable configuration snapshot handed to the engine. The session task
/// swaps the whole snapshot between samples on an update command; the state
/// machine never reads ambient mutable settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    pub thresholds: ThresholdConfig,

    /// Whether the first sample starts baseline calibration. When disabled
    /// the engine jumps straight to idle with a zero baseline.
    pub calibration_enabled: bool,

    /// How long the baseline calibration window runs, measured on the
    /// device's own timestamps.
    pub calibration_duration_secs: f64,

    /// Tared force at or above this (but below engage) enters the
    /// weight-measuring state. Independent of the engage threshold.
    pub weight_calibration_threshold_kg: f64,

    /// External gate: the UI clears this while the user should not be able
    /// to start a rep (e.g. during a rest period).
    pub can_engage: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            thresholds: ThresholdConfig::default(),
            calibration_enabled: true,
            calibration_duration_secs: 5.0,
            weight_calibration_threshold_kg: 3.0,
            can_engage: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_round_trips_through_json() {
        let config = EngineConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, back);
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = EngineConfig::default();
        assert!(config.calibration_enabled);
        assert_eq!(config.calibration_duration_secs, 5.0);
        assert_eq!(config.weight_calibration_threshold_kg, 3.0);
        assert!(config.can_engage);
    }
}
