//! Configuration
//!
//! Node and forecast parameters with serde defaults, so a partial JSON file
//! only needs to name the values it overrides.

use std::path::Path;

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};

use crate::beat::DEFAULT_DETECTION_THRESHOLD;
use crate::error::FlowError;
use crate::noise::{DEFAULT_DB_OFFSET, DEFAULT_NOISE_WINDOW_MS, DEFAULT_SMOOTHING_ALPHA};

/// Sensing node parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Optical intensity that indicates finger contact
    pub detection_threshold: u32,
    /// Noise envelope window (ms)
    pub noise_window_ms: u64,
    /// Noise sampling tick period (ms)
    pub noise_sample_period_ms: u64,
    /// Calibration offset for the noise level (dB)
    pub db_offset: f64,
    /// Exponential smoothing factor for the noise level (0, 1]
    pub smoothing_alpha: f64,
    /// Acquisition tick period (ms)
    pub acquisition_period_ms: u64,
    /// Diagnostic log tick period (ms)
    pub diagnostic_period_ms: u64,
    /// Telemetry upload tick period (ms)
    pub upload_period_ms: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            detection_threshold: DEFAULT_DETECTION_THRESHOLD,
            noise_window_ms: DEFAULT_NOISE_WINDOW_MS,
            noise_sample_period_ms: 2,
            db_offset: DEFAULT_DB_OFFSET,
            smoothing_alpha: DEFAULT_SMOOTHING_ALPHA,
            acquisition_period_ms: 100,
            diagnostic_period_ms: 5_000,
            upload_period_ms: 8_000,
        }
    }
}

/// Longest supported history window (days)
pub const MAX_HISTORY_DAYS: u32 = 366;
/// Longest supported forecast horizon (hours)
pub const MAX_HORIZON_HOURS: u32 = 168;

/// Forecast engine parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    /// How far back the historical fetch reaches (days)
    pub history_days: u32,
    /// Number of future hours scanned
    pub horizon_hours: u32,
    /// Maximum predictions returned
    pub max_predictions: usize,
    /// Minimum cell probability for a candidate
    pub min_probability: f64,
    /// Minimum samples in a cell for a candidate
    pub min_cell_samples: u32,
    /// Minimum valid historical samples before a run is attempted
    pub min_total_samples: usize,
    /// Fixed offset used for day-of-week/hour-of-day bucketing (minutes east of UTC)
    pub utc_offset_minutes: i32,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            history_days: 7,
            horizon_hours: 24,
            max_predictions: 5,
            min_probability: 0.30,
            min_cell_samples: 10,
            min_total_samples: 100,
            utc_offset_minutes: 0,
        }
    }
}

impl ForecastConfig {
    pub fn offset(&self) -> Result<FixedOffset, FlowError> {
        self.utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| {
                FlowError::Config(format!(
                    "utc_offset_minutes out of range: {}",
                    self.utc_offset_minutes
                ))
            })
    }

    pub fn validate(&self) -> Result<(), FlowError> {
        if self.horizon_hours == 0 || self.max_predictions == 0 {
            return Err(FlowError::Config(
                "horizon_hours and max_predictions must be non-zero".to_string(),
            ));
        }
        if self.history_days > MAX_HISTORY_DAYS {
            return Err(FlowError::Config(format!(
                "history_days must be at most {MAX_HISTORY_DAYS}, got {}",
                self.history_days
            )));
        }
        if self.horizon_hours > MAX_HORIZON_HOURS {
            return Err(FlowError::Config(format!(
                "horizon_hours must be at most {MAX_HORIZON_HOURS}, got {}",
                self.horizon_hours
            )));
        }
        if !(0.0..=1.0).contains(&self.min_probability) {
            return Err(FlowError::Config(format!(
                "min_probability must be in [0, 1], got {}",
                self.min_probability
            )));
        }
        self.offset()?;
        Ok(())
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    pub node: NodeConfig,
    pub forecast: ForecastConfig,
}

impl FlowConfig {
    pub fn from_json(json: &str) -> Result<Self, FlowError> {
        let config: FlowConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, FlowError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, FlowError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Reject values the node or engine cannot run with
    pub fn validate(&self) -> Result<(), FlowError> {
        let node = &self.node;
        if node.noise_sample_period_ms == 0
            || node.acquisition_period_ms == 0
            || node.diagnostic_period_ms == 0
            || node.upload_period_ms == 0
        {
            return Err(FlowError::Config("tick periods must be non-zero".to_string()));
        }
        if !(node.smoothing_alpha > 0.0 && node.smoothing_alpha <= 1.0) {
            return Err(FlowError::Config(format!(
                "smoothing_alpha must be in (0, 1], got {}",
                node.smoothing_alpha
            )));
        }

        self.forecast.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = FlowConfig::from_json(r#"{"forecast": {"utc_offset_minutes": 120}}"#).unwrap();
        assert_eq!(config.node, NodeConfig::default());
        assert_eq!(config.forecast.utc_offset_minutes, 120);
        assert_eq!(config.forecast.max_predictions, 5);
        assert_eq!(
            config.forecast.offset().unwrap(),
            FixedOffset::east_opt(7200).unwrap()
        );
    }

    #[test]
    fn test_round_trip() {
        let config = FlowConfig::default();
        let json = config.to_json().unwrap();
        assert_eq!(FlowConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(FlowConfig::from_json(r#"{"node": {"upload_period_ms": 0}}"#).is_err());
        assert!(FlowConfig::from_json(r#"{"node": {"smoothing_alpha": 0.0}}"#).is_err());
        assert!(FlowConfig::from_json(r#"{"forecast": {"min_probability": 1.5}}"#).is_err());
        assert!(FlowConfig::from_json(r#"{"forecast": {"utc_offset_minutes": 100000}}"#).is_err());
        assert!(FlowConfig::from_json(r#"{"forecast": {"history_days": 4000000000}}"#).is_err());
        assert!(FlowConfig::from_json(r#"{"forecast": {"horizon_hours": 169}}"#).is_err());
        assert!(FlowConfig::from_json(r#"{"forecast": {"history_days": 366, "horizon_hours": 168}}"#).is_ok());
    }
}
