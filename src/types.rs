//! Core types shared by the sensing node and the forecasting engine
//!
//! This module defines the data structures that flow through both paths:
//! raw samples and filtered readings on the node, telemetry records in the
//! store, and pattern cells and predictions on the forecast side.

use chrono::{DateTime, Datelike, FixedOffset, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::classifier::classify;

/// Discrete occupant state (closed enumeration)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifiedState {
    FlowState,
    NormalLearning,
    Standby,
    Distracted,
}

impl ClassifiedState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassifiedState::FlowState => "flow_state",
            ClassifiedState::NormalLearning => "normal_learning",
            ClassifiedState::Standby => "standby",
            ClassifiedState::Distracted => "distracted",
        }
    }

    /// Human-readable label used by displays and the dashboard
    pub fn label(&self) -> &'static str {
        match self {
            ClassifiedState::FlowState => "Flow State",
            ClassifiedState::NormalLearning => "Normal Learning",
            ClassifiedState::Standby => "Standby",
            ClassifiedState::Distracted => "Distracted",
        }
    }

    /// Parse either the wire form or the human label
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "flow_state" | "Flow State" => Some(ClassifiedState::FlowState),
            "normal_learning" | "Normal Learning" => Some(ClassifiedState::NormalLearning),
            "standby" | "Standby" => Some(ClassifiedState::Standby),
            "distracted" | "Distracted" => Some(ClassifiedState::Distracted),
            _ => None,
        }
    }
}

/// Optical signal quality hint derived from the pulse amplitude estimate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalQuality {
    NoContact,
    Weak,
    Fair,
    Good,
    Excellent,
}

impl SignalQuality {
    /// Band an amplitude estimate (thresholds 30/100/500)
    pub fn from_amplitude(amplitude: u32) -> Self {
        match amplitude {
            a if a < 30 => SignalQuality::Weak,
            a if a < 100 => SignalQuality::Fair,
            a if a < 500 => SignalQuality::Good,
            _ => SignalQuality::Excellent,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalQuality::NoContact => "no_contact",
            SignalQuality::Weak => "weak",
            SignalQuality::Fair => "fair",
            SignalQuality::Good => "good",
            SignalQuality::Excellent => "excellent",
        }
    }
}

/// Label describing how much history backs a forecast
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataQuality {
    Insufficient,
    Low,
    Moderate,
    Good,
    Excellent,
}

impl DataQuality {
    /// Band a total historical sample count (thresholds 100/300/800/1500)
    pub fn from_sample_count(total: usize) -> Self {
        match total {
            n if n < 100 => DataQuality::Insufficient,
            n if n < 300 => DataQuality::Low,
            n if n < 800 => DataQuality::Moderate,
            n if n < 1500 => DataQuality::Good,
            _ => DataQuality::Excellent,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DataQuality::Insufficient => "insufficient",
            DataQuality::Low => "low",
            DataQuality::Moderate => "moderate",
            DataQuality::Good => "good",
            DataQuality::Excellent => "excellent",
        }
    }
}

/// One acquisition tick worth of raw sensor values
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    /// Monotonic node time (ms)
    pub timestamp_ms: u64,
    /// Raw ambient-noise ADC reading
    pub noise_raw: u16,
    /// Raw optical IR intensity; `None` when the optical sensor is unavailable
    pub optical_ir: Option<u32>,
}

/// Derived node readings, overwritten every tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FilteredReading {
    /// Smoothed noise level (dB)
    pub noise_db: f64,
    /// Most recent instantaneous heart rate (bpm)
    pub heart_rate_instant: u32,
    /// Rolling average heart rate (bpm)
    pub heart_rate_average: u32,
    /// Most recent accepted inter-beat interval (ms)
    pub rr_interval_ms: u32,
    /// SDNN (ms)
    pub hrv_sdnn: f64,
    /// RMSSD (ms)
    pub hrv_rmssd: f64,
}

/// Unit of historical storage and query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub timestamp: DateTime<Utc>,
    /// 0 = Sunday .. 6 = Saturday
    pub day_of_week: u8,
    /// 0..=23
    pub hour_of_day: u8,
    pub noise_db: f64,
    pub bpm: f64,
    pub rr_interval_ms: f64,
    pub state: ClassifiedState,
}

impl TelemetryRecord {
    /// Build a record, bucketing the timestamp in `offset` and classifying the readings
    pub fn new(
        timestamp: DateTime<Utc>,
        offset: FixedOffset,
        noise_db: f64,
        bpm: f64,
        rr_interval_ms: f64,
    ) -> Self {
        let (day_of_week, hour_of_day) = day_hour(timestamp, offset);
        Self {
            timestamp,
            day_of_week,
            hour_of_day,
            noise_db,
            bpm,
            rr_interval_ms,
            state: classify(noise_db, bpm, rr_interval_ms),
        }
    }
}

/// Day-of-week (Sunday = 0) and hour-of-day of `timestamp` in `offset`
pub fn day_hour(timestamp: DateTime<Utc>, offset: FixedOffset) -> (u8, u8) {
    let local = timestamp.with_timezone(&offset);
    (
        local.weekday().num_days_from_sunday() as u8,
        local.hour() as u8,
    )
}

/// Aggregated statistics for one (day-of-week, hour-of-day) bucket
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatternCell {
    pub day_of_week: u8,
    pub hour_of_day: u8,
    pub sample_count: u32,
    pub flow_count: u32,
    pub noise_sum: f64,
    pub bpm_sum: f64,
    pub rr_sum: f64,
    /// flow_count / sample_count
    pub probability: f64,
    /// 1 - population std-dev of the flow indicator (not clamped)
    pub consistency: f64,
}

impl PatternCell {
    pub fn empty(day_of_week: u8, hour_of_day: u8) -> Self {
        Self {
            day_of_week,
            hour_of_day,
            ..Default::default()
        }
    }

    pub fn avg_noise(&self) -> f64 {
        self.average(self.noise_sum)
    }

    pub fn avg_bpm(&self) -> f64 {
        self.average(self.bpm_sum)
    }

    pub fn avg_rr(&self) -> f64 {
        self.average(self.rr_sum)
    }

    fn average(&self, sum: f64) -> f64 {
        if self.sample_count == 0 {
            0.0
        } else {
            sum / self.sample_count as f64
        }
    }
}

/// A forecast flow-state window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub target_time: DateTime<Utc>,
    pub hour_of_day: u8,
    pub day_of_week: u8,
    pub probability: f64,
    /// Percentage 0-100
    pub confidence: u32,
    pub expected_noise: f64,
    pub expected_bpm: f64,
    pub expected_rr: f64,
    pub sample_count: u32,
    pub consistency: f64,
    pub hours_from_now: u32,
}

impl Prediction {
    /// Ranking key: probability weighted by confidence
    pub fn score(&self) -> f64 {
        self.probability * (self.confidence as f64 / 100.0)
    }
}
