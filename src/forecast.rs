//! Flow-window forecasting
//!
//! Scores the next hours against the weekly pattern grid and returns the
//! most promising flow windows with a confidence for each, plus an overall
//! confidence and a label for how much history backs the result.

use chrono::{DateTime, Duration, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ForecastConfig;
use crate::error::FlowError;
use crate::pattern::{PatternAggregator, PatternGrid};
use crate::types::{day_hour, DataQuality, Prediction, TelemetryRecord};

/// Samples at which a cell's size stops adding confidence
pub const FULL_CONFIDENCE_CELL_SAMPLES: f64 = 50.0;
/// Total samples at which history stops adding overall confidence
pub const FULL_CONFIDENCE_TOTAL_SAMPLES: f64 = 500.0;

/// Result of one forecast run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub predictions: Vec<Prediction>,
    /// Percentage 0-100
    pub overall_confidence: u32,
    pub data_quality: DataQuality,
    /// Valid historical samples considered
    pub total_samples: usize,
    /// Samples required before scoring is attempted
    pub min_samples: usize,
}

impl Forecast {
    pub fn is_sufficient(&self) -> bool {
        self.total_samples >= self.min_samples
    }

    /// Progress toward the minimum-data gate (0-1)
    pub fn progress(&self) -> f64 {
        if self.min_samples == 0 {
            return 1.0;
        }
        (self.total_samples as f64 / self.min_samples as f64).min(1.0)
    }
}

/// Per-slot confidence: sample adequacy 40%, consistency 30%, probability 30%
pub fn confidence_score(sample_count: u32, consistency: f64, probability: f64, min_samples: u32) -> u32 {
    if sample_count < min_samples {
        return 0;
    }
    let adequacy = (sample_count as f64 / FULL_CONFIDENCE_CELL_SAMPLES).min(1.0);
    let score = 0.4 * adequacy + 0.3 * consistency + 0.3 * probability;
    (100.0 * score).round().max(0.0) as u32
}

/// Overall confidence from the returned slots and the size of the history
pub fn overall_confidence(confidences: &[u32], total_samples: usize) -> u32 {
    if confidences.is_empty() {
        return 0;
    }
    let mean = confidences.iter().map(|&c| c as f64).sum::<f64>() / confidences.len() as f64;
    let history = (total_samples as f64 / FULL_CONFIDENCE_TOTAL_SAMPLES).min(1.0);
    (0.7 * mean + 30.0 * history).round() as u32
}

/// Truncate `t` to the top of its hour in `offset`
fn top_of_hour(t: DateTime<Utc>, offset: FixedOffset) -> DateTime<Utc> {
    let shift = offset.local_minus_utc() as i64;
    let local = t.timestamp() + shift;
    let truncated = local - local.rem_euclid(3600) - shift;
    DateTime::<Utc>::from_timestamp(truncated, 0).unwrap_or(t)
}

pub struct ForecastEngine {
    config: ForecastConfig,
    offset: FixedOffset,
}

impl ForecastEngine {
    pub fn new(config: ForecastConfig) -> Result<Self, FlowError> {
        config.validate()?;
        let offset = config.offset()?;
        Ok(Self { config, offset })
    }

    pub fn config(&self) -> &ForecastConfig {
        &self.config
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Aggregate `records` and score the hours following `now`
    pub fn forecast(&self, records: &[TelemetryRecord], now: DateTime<Utc>) -> Forecast {
        let total_samples = records.len();
        let min_samples = self.config.min_total_samples;

        if total_samples < min_samples {
            debug!(total_samples, min_samples, "not enough history to forecast");
            return Forecast {
                predictions: Vec::new(),
                overall_confidence: 0,
                data_quality: DataQuality::Insufficient,
                total_samples,
                min_samples,
            };
        }

        let grid = PatternAggregator::aggregate(records);
        let predictions = self.rank(&grid, now);
        let confidences: Vec<u32> = predictions.iter().map(|p| p.confidence).collect();

        Forecast {
            overall_confidence: overall_confidence(&confidences, total_samples),
            data_quality: DataQuality::from_sample_count(total_samples),
            predictions,
            total_samples,
            min_samples,
        }
    }

    /// Scan the horizon, keep admissible slots and return the best ones
    pub fn rank(&self, grid: &PatternGrid, now: DateTime<Utc>) -> Vec<Prediction> {
        let mut candidates = Vec::new();

        for hours_from_now in 1..=self.config.horizon_hours {
            let Some(projected) = now.checked_add_signed(Duration::hours(hours_from_now as i64)) else {
                debug!(hours_from_now, "horizon runs past the representable time range");
                break;
            };
            let target_time = top_of_hour(projected, self.offset);
            let (day_of_week, hour_of_day) = day_hour(target_time, self.offset);
            let Some(cell) = grid.cell(day_of_week, hour_of_day) else {
                continue;
            };

            if cell.probability < self.config.min_probability
                || cell.sample_count < self.config.min_cell_samples
            {
                continue;
            }

            candidates.push(Prediction {
                target_time,
                hour_of_day,
                day_of_week,
                probability: cell.probability,
                confidence: confidence_score(
                    cell.sample_count,
                    cell.consistency,
                    cell.probability,
                    self.config.min_cell_samples,
                ),
                expected_noise: cell.avg_noise(),
                expected_bpm: cell.avg_bpm(),
                expected_rr: cell.avg_rr(),
                sample_count: cell.sample_count,
                consistency: cell.consistency,
                hours_from_now,
            });
        }

        // Stable: equal scores keep horizon order
        candidates.sort_by(|a, b| b.score().total_cmp(&a.score()));
        candidates.truncate(self.config.max_predictions);
        candidates
    }
}
