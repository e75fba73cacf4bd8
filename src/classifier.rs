//! Four-quadrant state classification
//!
//! Maps (noise level, heart rate, inter-beat interval) onto one of four
//! discrete states. This is the only rule shared by the sensing node and
//! the forecasting engine: the node labels live readings with it and the
//! forecast path re-labels historical rows with it.

use crate::types::ClassifiedState;

/// Lowest plausible heart rate (bpm)
pub const MIN_VALID_BPM: f64 = 40.0;
/// Highest plausible heart rate (bpm)
pub const MAX_VALID_BPM: f64 = 200.0;
/// Noise level below which the room counts as quiet (dB)
pub const QUIET_THRESHOLD_DB: f64 = 55.0;
/// Inter-beat interval above which physiology counts as relaxed (ms)
pub const RELAXED_RR_MS: f64 = 700.0;
/// Heart rate band that counts as relaxed (bpm, inclusive)
pub const RELAXED_BPM_RANGE: (f64, f64) = (60.0, 80.0);

/// Whether a heart rate lies in the analysable range [40, 200]
pub fn is_valid_bpm(bpm: f64) -> bool {
    (MIN_VALID_BPM..=MAX_VALID_BPM).contains(&bpm)
}

/// Classify the occupant's state
pub fn classify(noise_db: f64, bpm: f64, rr_interval_ms: f64) -> ClassifiedState {
    if !is_valid_bpm(bpm) {
        return ClassifiedState::Standby;
    }

    let is_quiet = noise_db < QUIET_THRESHOLD_DB;
    let is_good_physio = rr_interval_ms > RELAXED_RR_MS
        || (RELAXED_BPM_RANGE.0..=RELAXED_BPM_RANGE.1).contains(&bpm);

    match (is_quiet, is_good_physio) {
        (true, true) => ClassifiedState::FlowState,
        (false, true) => ClassifiedState::NormalLearning,
        (true, false) => ClassifiedState::Standby,
        (false, false) => ClassifiedState::Distracted,
    }
}
