//! Effective-threshold resolution: fixed kilogram values or percentages of
//! the session target weight, clamped by independent floor/ceiling bounds.

use log::warn;
use serde::{Deserialize, Serialize};

/// The three thresholds the engine resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThresholdKind {
    /// Tared force at or above this starts a grip (inclusive).
    Engage,
    /// Tared force strictly below this ends a grip.
    Disengage,
    /// Allowed |raw − target| while gripping before off-target fires.
    Tolerance,
}

/// One threshold: a fixed fallback plus an optional percentage-of-target
/// mode with floor/ceiling clamping. A bound of exactly 0 means "disabled",
/// not "clamp to zero".
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdSetting {
    pub fixed_kg: f64,
    pub percentage: f64,
    pub floor_kg: f64,
    pub ceiling_kg: f64,
}

impl ThresholdSetting {
    /// The value actually applied: fixed when percentage mode is off or no
    /// target weight is set, otherwise `target * percentage` clamped by the
    /// enabled bounds.
    pub fn resolve(&self, percentage_mode: bool, target_weight: Option<f64>) -> f64 {
        let target = match target_weight {
            Some(target) if percentage_mode => target,
            _ => return self.fixed_kg,
        };

        let raw = target * self.percentage;
        let floored = if self.floor_kg > 0.0 {
            raw.max(self.floor_kg)
        } else {
            raw
        };
        if self.ceiling_kg > 0.0 {
            floored.min(self.ceiling_kg)
        } else {
            floored
        }
    }
}

/// Threshold configuration snapshot read on every sample. Mutated only via
/// an explicit configuration update between samples, never shared mutable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdConfig {
    pub percentage_mode: bool,
    pub target_weight: Option<f64>,
    pub engage: ThresholdSetting,
    pub disengage: ThresholdSetting,
    pub tolerance: ThresholdSetting,
}

impl ThresholdConfig {
    pub fn effective(&self, kind: ThresholdKind) -> f64 {
        let setting = match kind {
            ThresholdKind::Engage => &self.engage,
            ThresholdKind::Disengage => &self.disengage,
            ThresholdKind::Tolerance => &self.tolerance,
        };
        setting.resolve(self.percentage_mode, self.target_weight)
    }

    /// Reports configuration gaps without correcting them. Independent
    /// floor/ceiling clamping can push the disengage threshold at or above
    /// the engage threshold, which makes a grip fail instantly; that is a
    /// caller misconfiguration, not something this resolver silently fixes.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        let engage = self.effective(ThresholdKind::Engage);
        let disengage = self.effective(ThresholdKind::Disengage);
        if disengage >= engage {
            warnings.push(format!(
                "disengage threshold {:.2}kg is not below engage threshold {:.2}kg; grips will fail immediately",
                disengage, engage,
            ));
        }

        for message in &warnings {
            warn!("Threshold configuration: {}", message);
        }
        warnings
    }
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        ThresholdConfig {
            percentage_mode: false,
            target_weight: None,
            engage: ThresholdSetting {
                fixed_kg: 3.0,
                percentage: 0.50,
                floor_kg: 3.0,
                ceiling_kg: 0.0,
            },
            disengage: ThresholdSetting {
                fixed_kg: 1.0,
                percentage: 0.20,
                floor_kg: 2.0,
                ceiling_kg: 0.0,
            },
            tolerance: ThresholdSetting {
                fixed_kg: 0.5,
                percentage: 0.05,
                floor_kg: 0.3,
                ceiling_kg: 1.5,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_mode_returns_fixed_value() {
        let config = ThresholdConfig::default();
        assert_eq!(config.effective(ThresholdKind::Engage), 3.0);
        assert_eq!(config.effective(ThresholdKind::Disengage), 1.0);
        assert_eq!(config.effective(ThresholdKind::Tolerance), 0.5);
    }

    #[test]
    fn percentage_without_target_falls_back_to_fixed() {
        let config = ThresholdConfig {
            percentage_mode: true,
            target_weight: None,
            ..ThresholdConfig::default()
        };
        assert_eq!(config.effective(ThresholdKind::Engage), 3.0);
    }

    #[test]
    fn percentage_resolves_without_clamping() {
        let config = ThresholdConfig {
            percentage_mode: true,
            target_weight: Some(20.0),
            ..ThresholdConfig::default()
        };
        // 20 * 50% = 10, floor 3 does not apply.
        assert_eq!(config.effective(ThresholdKind::Engage), 10.0);
    }

    #[test]
    fn floor_overrides_small_percentage_result() {
        let config = ThresholdConfig {
            percentage_mode: true,
            target_weight: Some(3.0),
            ..ThresholdConfig::default()
        };
        // 3 * 50% = 1.5, raised to the 3.0 floor.
        assert_eq!(config.effective(ThresholdKind::Engage), 3.0);
    }

    #[test]
    fn ceiling_caps_large_percentage_result() {
        let config = ThresholdConfig {
            percentage_mode: true,
            target_weight: Some(100.0),
            ..ThresholdConfig::default()
        };
        // 100 * 5% = 5.0, capped at the 1.5 tolerance ceiling.
        assert_eq!(config.effective(ThresholdKind::Tolerance), 1.5);
    }

    #[test]
    fn zero_bound_means_disabled() {
        let setting = ThresholdSetting {
            fixed_kg: 1.0,
            percentage: 0.5,
            floor_kg: 0.0,
            ceiling_kg: 0.0,
        };
        assert_eq!(setting.resolve(true, Some(0.2)), 0.1);
    }

    #[test]
    fn zero_target_degrades_gracefully() {
        let config = ThresholdConfig {
            percentage_mode: true,
            target_weight: Some(0.0),
            ..ThresholdConfig::default()
        };
        // 0 * 50% = 0, raised to the engage floor.
        assert_eq!(config.effective(ThresholdKind::Engage), 3.0);
    }

    #[test]
    fn validate_flags_inverted_thresholds() {
        let mut config = ThresholdConfig {
            percentage_mode: true,
            target_weight: Some(10.0),
            ..ThresholdConfig::default()
        };
        // Disengage floor above the engage result.
        config.disengage.floor_kg = 6.0;
        config.engage.percentage = 0.4;
        config.engage.floor_kg = 0.0;

        let warnings = config.validate();
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn validate_accepts_defaults() {
        assert!(ThresholdConfig::default().validate().is_empty());
    }
}
