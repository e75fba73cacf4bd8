//! Heart rate variability
//!
//! Time-domain HRV statistics over the most recent accepted inter-beat
//! intervals. Both metrics report zero until enough intervals are available.

use serde::{Deserialize, Serialize};

/// Minimum number of intervals required before HRV is reported
pub const MIN_HRV_INTERVALS: usize = 5;

/// Time-domain HRV statistics (ms)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HrvStats {
    /// Population standard deviation of the intervals
    pub sdnn: f64,
    /// Root mean square of successive differences
    pub rmssd: f64,
}

/// Compute SDNN and RMSSD from intervals in chronological order
pub fn compute_hrv(intervals_ms: &[u32]) -> HrvStats {
    let n = intervals_ms.len();
    if n < MIN_HRV_INTERVALS {
        return HrvStats::default();
    }

    let mean = intervals_ms.iter().map(|&v| v as f64).sum::<f64>() / n as f64;
    let variance = intervals_ms
        .iter()
        .map(|&v| {
            let d = v as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n as f64;

    let successive_sq: f64 = intervals_ms
        .windows(2)
        .map(|w| {
            let d = w[1] as f64 - w[0] as f64;
            d * d
        })
        .sum();

    HrvStats {
        sdnn: variance.sqrt(),
        rmssd: (successive_sq / (n - 1) as f64).sqrt(),
    }
}
