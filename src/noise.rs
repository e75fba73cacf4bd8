//! Ambient noise envelope sampling
//!
//! Accumulates raw microphone samples into fixed-length windows, measures the
//! peak-to-peak envelope of each closed window and converts it into a smoothed
//! dB level. Windows are closed by the caller's clock, so sampling never
//! blocks the scheduler.

use serde::{Deserialize, Serialize};

/// Default envelope window (ms)
pub const DEFAULT_NOISE_WINDOW_MS: u64 = 50;
/// Default calibration offset added to the log envelope (dB)
pub const DEFAULT_DB_OFFSET: f64 = 20.0;
/// Default exponential smoothing factor for the dB level
pub const DEFAULT_SMOOTHING_ALPHA: f64 = 0.2;

/// Output of a closed envelope window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoiseLevel {
    pub peak_to_peak: u16,
    /// Unsmoothed level of the closed window (dB)
    pub instant_db: f64,
    /// Smoothed level (dB)
    pub smoothed_db: f64,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started_ms: u64,
    min: u16,
    max: u16,
}

/// Windowed peak-to-peak accumulator
#[derive(Debug, Clone)]
pub struct NoiseSampler {
    window_ms: u64,
    db_offset: f64,
    alpha: f64,
    current: Option<Window>,
    last: Option<NoiseLevel>,
}

impl Default for NoiseSampler {
    fn default() -> Self {
        Self::new(DEFAULT_NOISE_WINDOW_MS, DEFAULT_DB_OFFSET, DEFAULT_SMOOTHING_ALPHA)
    }
}

impl NoiseSampler {
    pub fn new(window_ms: u64, db_offset: f64, alpha: f64) -> Self {
        Self {
            window_ms,
            db_offset,
            alpha,
            current: None,
            last: None,
        }
    }

    /// Fold a raw sample in; returns the new level when this sample closes a window
    pub fn push(&mut self, raw: u16, now_ms: u64) -> Option<NoiseLevel> {
        let window = self.current.get_or_insert(Window {
            started_ms: now_ms,
            min: raw,
            max: raw,
        });
        window.min = window.min.min(raw);
        window.max = window.max.max(raw);

        if now_ms.saturating_sub(window.started_ms) < self.window_ms {
            return None;
        }

        let peak_to_peak = window.max - window.min;
        self.current = None;

        let instant_db = self.to_db(peak_to_peak);
        let smoothed_db = match self.last {
            Some(prev) => self.alpha * instant_db + (1.0 - self.alpha) * prev.smoothed_db,
            None => instant_db,
        };

        let level = NoiseLevel {
            peak_to_peak,
            instant_db,
            smoothed_db,
        };
        self.last = Some(level);
        Some(level)
    }

    /// Most recently closed window, if any
    pub fn last_level(&self) -> Option<NoiseLevel> {
        self.last
    }

    pub fn smoothed_db(&self) -> f64 {
        self.last.map(|l| l.smoothed_db).unwrap_or(0.0)
    }

    pub fn peak_to_peak(&self) -> u16 {
        self.last.map(|l| l.peak_to_peak).unwrap_or(0)
    }

    pub fn reset(&mut self) {
        self.current = None;
        self.last = None;
    }

    fn to_db(&self, peak_to_peak: u16) -> f64 {
        self.db_offset + 20.0 * (1.0 + peak_to_peak as f64).log10()
    }
}
