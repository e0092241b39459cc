use igt_nav_core::SettingsStore;
use serde::{Deserialize, Serialize};

pub const PIVOT_THRESHOLD_KEY: &str = "PivotCalibrationErrorThresholdMm";
pub const PIVOT_DURATION_KEY: &str = "PivotCalibrationDurationSec";
pub const FIXED_POINT_THRESHOLD_KEY: &str = "FixedPointCalibrationErrorThresholdMm";
pub const FIXED_POINT_DURATION_KEY: &str = "FixedPointCalibrationDurationSec";

/// Acceptance thresholds and sampling durations of both calibrations.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationParams {
    pub pivot_error_threshold_mm: f64,
    pub pivot_duration_sec: f64,
    pub fixed_point_error_threshold_mm: f64,
    pub fixed_point_duration_sec: f64,
}

impl Default for CalibrationParams {
    fn default() -> Self {
        Self {
            pivot_error_threshold_mm: 0.9,
            pivot_duration_sec: 15.0,
            fixed_point_error_threshold_mm: 5.0,
            fixed_point_duration_sec: 5.0,
        }
    }
}

impl CalibrationParams {
    /// Read from a settings configuration, falling back to the defaults for
    /// missing or unparsable values.
    pub fn from_settings(settings: &SettingsStore, configuration: &str) -> Self {
        let d = Self::default();
        let get = |key: &str, fallback: f64| settings.value_f64(key, configuration).unwrap_or(fallback);
        Self {
            pivot_error_threshold_mm: get(PIVOT_THRESHOLD_KEY, d.pivot_error_threshold_mm),
            pivot_duration_sec: get(PIVOT_DURATION_KEY, d.pivot_duration_sec),
            fixed_point_error_threshold_mm: get(
                FIXED_POINT_THRESHOLD_KEY,
                d.fixed_point_error_threshold_mm,
            ),
            fixed_point_duration_sec: get(FIXED_POINT_DURATION_KEY, d.fixed_point_duration_sec),
        }
    }

    /// Add these values to a configuration without overriding stored ones.
    pub fn merge_into(&self, settings: &mut SettingsStore, configuration: &str) {
        let values = [
            (PIVOT_THRESHOLD_KEY, self.pivot_error_threshold_mm.to_string()),
            (PIVOT_DURATION_KEY, self.pivot_duration_sec.to_string()),
            (
                FIXED_POINT_THRESHOLD_KEY,
                self.fixed_point_error_threshold_mm.to_string(),
            ),
            (FIXED_POINT_DURATION_KEY, self.fixed_point_duration_sec.to_string()),
        ];
        settings.merge_defaults(
            values.iter().map(|(k, v)| (*k, v.as_str())),
            configuration,
        );
    }
}
