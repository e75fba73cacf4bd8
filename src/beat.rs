//! Adaptive heartbeat detection
//!
//! Turns a raw optical (IR) pulse stream into discrete heartbeat events.
//! The detector tracks a sliding window of recent samples and derives an
//! adaptive threshold from its mean and half peak-to-peak amplitude; a beat
//! is the falling edge of a pulse that rose through that threshold.
//!
//! State machine: `NoFinger → Acquiring → Tracking ⇄ Pulse`, with any state
//! dropping back to `NoFinger` when intensity falls to the contact threshold.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::hrv::{compute_hrv, HrvStats};
use crate::ring_buffer::RingBuffer;
use crate::types::SignalQuality;

/// Samples in the sliding optical window
pub const OPTICAL_WINDOW: usize = 30;
/// Entries in the rolling heart-rate average
pub const RATE_BUFFER: usize = 4;
/// Entries in the inter-beat interval history
pub const INTERVAL_BUFFER: usize = 15;
/// Default optical intensity that indicates finger contact
pub const DEFAULT_DETECTION_THRESHOLD: u32 = 50_000;
/// Amplitude below which the pulse is considered too weak to track
pub const MIN_AMPLITUDE: u32 = 30;
/// Fraction of the amplitude added to the baseline to form the threshold
pub const THRESHOLD_FACTOR: f64 = 0.3;
/// Plausible inter-beat interval (ms)
pub const MIN_INTERVAL_MS: u64 = 400;
pub const MAX_INTERVAL_MS: u64 = 3000;
/// Instantaneous rates admitted into the average (bpm)
pub const MIN_ADMITTED_BPM: u32 = 45;
pub const MAX_ADMITTED_BPM: u32 = 150;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorState {
    NoFinger,
    Acquiring,
    Tracking,
    Pulse,
}

/// A completed pulse with a plausible interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeatEvent {
    pub timestamp_ms: u64,
    pub interval_ms: u32,
    pub instant_bpm: u32,
    pub pulse_peak: u32,
    /// Whether the beat entered the rate average and interval history
    pub admitted: bool,
}

#[derive(Debug, Clone)]
pub struct BeatDetector {
    detection_threshold: u32,
    state: DetectorState,
    window: RingBuffer<u32, OPTICAL_WINDOW>,
    baseline: u32,
    amplitude: u32,
    threshold: u32,
    previous: Option<u32>,
    stable_readings: u32,
    pulse_start_ms: u64,
    pulse_peak: u32,
    last_beat_ms: Option<u64>,
    rates: RingBuffer<u32, RATE_BUFFER>,
    intervals: RingBuffer<u32, INTERVAL_BUFFER>,
    heart_rate_instant: u32,
    heart_rate_average: u32,
    last_interval_ms: u32,
    hrv: HrvStats,
    beat_count: u64,
    ac_magnitude: u32,
}

impl Default for BeatDetector {
    fn default() -> Self {
        Self::new(DEFAULT_DETECTION_THRESHOLD)
    }
}

impl BeatDetector {
    pub fn new(detection_threshold: u32) -> Self {
        Self {
            detection_threshold,
            state: DetectorState::NoFinger,
            window: RingBuffer::new(),
            baseline: 0,
            amplitude: 0,
            threshold: 0,
            previous: None,
            stable_readings: 0,
            pulse_start_ms: 0,
            pulse_peak: 0,
            last_beat_ms: None,
            rates: RingBuffer::new(),
            intervals: RingBuffer::new(),
            heart_rate_instant: 0,
            heart_rate_average: 0,
            last_interval_ms: 0,
            hrv: HrvStats::default(),
            beat_count: 0,
            ac_magnitude: 0,
        }
    }

    /// Feed one optical sample taken at `now_ms`
    pub fn process(&mut self, ir: u32, now_ms: u64) -> Option<BeatEvent> {
        if ir <= self.detection_threshold {
            if self.state != DetectorState::NoFinger {
                info!(ir, "finger contact lost");
                self.lose_contact();
            }
            return None;
        }

        if self.state == DetectorState::NoFinger {
            debug!(ir, "finger contact detected");
            self.state = DetectorState::Acquiring;
        }

        self.window.push(ir);
        if !self.window.is_full() {
            self.previous = Some(ir);
            return None;
        }

        if self.state == DetectorState::Acquiring {
            info!("optical window full, tracking pulse");
            self.state = DetectorState::Tracking;
        }

        self.update_threshold();
        self.ac_magnitude = ir.abs_diff(self.baseline);
        let previous = self.previous.replace(ir);

        let weak = self.amplitude < MIN_AMPLITUDE;
        if weak {
            self.stable_readings = 0;
        } else {
            self.stable_readings = self.stable_readings.saturating_add(1);
        }

        match self.state {
            DetectorState::Tracking => {
                let rising = ir > self.threshold && previous.is_some_and(|p| p <= self.threshold);
                if !weak && rising {
                    self.state = DetectorState::Pulse;
                    self.pulse_start_ms = now_ms;
                    self.pulse_peak = ir;
                }
                None
            }
            DetectorState::Pulse => {
                self.pulse_peak = self.pulse_peak.max(ir);
                if ir < self.threshold {
                    self.state = DetectorState::Tracking;
                    self.on_pulse_end(now_ms)
                } else {
                    None
                }
            }
            DetectorState::NoFinger | DetectorState::Acquiring => None,
        }
    }

    fn update_threshold(&mut self) {
        let (sum, min, max) = self
            .window
            .iter()
            .fold((0u64, u32::MAX, u32::MIN), |(sum, min, max), v| {
                (sum + v as u64, min.min(v), max.max(v))
            });
        self.baseline = (sum / self.window.len() as u64) as u32;
        self.amplitude = (max - min) / 2;
        self.threshold = self
            .baseline
            .saturating_add((self.amplitude as f64 * THRESHOLD_FACTOR).round() as u32);
    }

    fn on_pulse_end(&mut self, now_ms: u64) -> Option<BeatEvent> {
        let last = self.last_beat_ms.replace(now_ms)?;
        let delta = now_ms.saturating_sub(last);
        if !(MIN_INTERVAL_MS..=MAX_INTERVAL_MS).contains(&delta) {
            debug!(delta, "inter-beat interval out of range");
            return None;
        }

        let interval_ms = delta as u32;
        let instant_bpm = 60_000 / interval_ms;
        self.heart_rate_instant = instant_bpm;

        let admitted = (MIN_ADMITTED_BPM..=MAX_ADMITTED_BPM).contains(&instant_bpm);
        if admitted {
            self.rates.push(instant_bpm);
            self.heart_rate_average = self.rates.iter().sum::<u32>() / self.rates.len() as u32;
            self.intervals.push(interval_ms);
            self.last_interval_ms = interval_ms;
            self.hrv = compute_hrv(&self.intervals.to_vec());
            self.beat_count += 1;
            debug!(
                instant_bpm,
                average_bpm = self.heart_rate_average,
                interval_ms,
                pulse_ms = now_ms.saturating_sub(self.pulse_start_ms),
                "beat admitted"
            );
        } else {
            debug!(instant_bpm, "beat rejected");
        }

        Some(BeatEvent {
            timestamp_ms: now_ms,
            interval_ms,
            instant_bpm,
            pulse_peak: self.pulse_peak,
            admitted,
        })
    }

    /// Drop every per-contact value; the rate and interval histories are kept
    fn lose_contact(&mut self) {
        self.state = DetectorState::NoFinger;
        self.window.clear();
        self.baseline = 0;
        self.amplitude = 0;
        self.threshold = 0;
        self.previous = None;
        self.stable_readings = 0;
        self.pulse_peak = 0;
        self.heart_rate_instant = 0;
        self.heart_rate_average = 0;
        self.ac_magnitude = 0;
    }

    pub fn state(&self) -> DetectorState {
        self.state
    }

    pub fn finger_detected(&self) -> bool {
        self.state != DetectorState::NoFinger
    }

    pub fn heart_rate_instant(&self) -> u32 {
        self.heart_rate_instant
    }

    pub fn heart_rate_average(&self) -> u32 {
        self.heart_rate_average
    }

    /// Most recent admitted inter-beat interval (ms)
    pub fn last_interval_ms(&self) -> u32 {
        self.last_interval_ms
    }

    pub fn hrv(&self) -> HrvStats {
        self.hrv
    }

    pub fn intervals(&self) -> Vec<u32> {
        self.intervals.to_vec()
    }

    pub fn beat_count(&self) -> u64 {
        self.beat_count
    }

    pub fn baseline(&self) -> u32 {
        self.baseline
    }

    pub fn amplitude(&self) -> u32 {
        self.amplitude
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn ac_magnitude(&self) -> u32 {
        self.ac_magnitude
    }

    pub fn stable_readings(&self) -> u32 {
        self.stable_readings
    }

    pub fn signal_quality(&self) -> SignalQuality {
        match self.state {
            DetectorState::NoFinger | DetectorState::Acquiring => SignalQuality::NoContact,
            DetectorState::Tracking | DetectorState::Pulse => {
                SignalQuality::from_amplitude(self.amplitude)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    const SAMPLE_MS: u64 = 100;

    fn pulse_sample(k: u64, period_samples: u64, amplitude: f64) -> u32 {
        let phase = 2.0 * PI * (k % period_samples) as f64 / period_samples as f64;
        (60_000.0 + amplitude * phase.sin()).round() as u32
    }

    fn feed(detector: &mut BeatDetector, range: std::ops::Range<u64>, period: u64) -> Vec<BeatEvent> {
        range
            .filter_map(|k| detector.process(pulse_sample(k, period, 2000.0), k * SAMPLE_MS))
            .collect()
    }

    #[test]
    fn test_acquiring_until_window_full() {
        let mut detector = BeatDetector::default();
        assert_eq!(detector.state(), DetectorState::NoFinger);

        feed(&mut detector, 0..29, 10);
        assert_eq!(detector.state(), DetectorState::Acquiring);
        assert_eq!(detector.signal_quality(), SignalQuality::NoContact);

        feed(&mut detector, 29..30, 10);
        assert_eq!(detector.state(), DetectorState::Tracking);
        assert_eq!(detector.baseline(), 60_000);
        assert_eq!(detector.signal_quality(), SignalQuality::Excellent);
    }

    #[test]
    fn test_one_second_pulse_converges_to_60_bpm() {
        let mut detector = BeatDetector::default();

        // Falling edges land on k = 35, 45, 55, 65, 75; the first only arms the timer
        let events = feed(&mut detector, 0..76, 10);
        assert_eq!(events.len(), 4);
        assert!(events.iter().all(|e| e.admitted && e.interval_ms == 1000));
        assert_eq!(detector.beat_count(), 4);
        assert_eq!(detector.heart_rate_average(), 60);
        assert_eq!(detector.heart_rate_instant(), 60);
        assert_eq!(detector.last_interval_ms(), 1000);

        // Only four intervals so far: HRV not yet reported
        assert_eq!(detector.hrv(), HrvStats::default());

        feed(&mut detector, 76..200, 10);
        assert_eq!(detector.heart_rate_average(), 60);
        assert_eq!(detector.hrv().rmssd, 0.0);
        assert_eq!(detector.hrv().sdnn, 0.0);
    }

    #[test]
    fn test_interval_buffer_is_bounded() {
        let mut detector = BeatDetector::default();
        feed(&mut detector, 0..400, 10);
        assert!(detector.beat_count() > INTERVAL_BUFFER as u64);
        assert_eq!(detector.intervals().len(), INTERVAL_BUFFER);
    }

    #[test]
    fn test_slow_pulse_is_not_admitted() {
        let mut detector = BeatDetector::default();

        // 2 s period: ~30 bpm, inside the interval window but below 45 bpm
        let events = feed(&mut detector, 0..150, 20);
        assert!(!events.is_empty());
        assert!(events.iter().all(|e| !e.admitted && e.instant_bpm < MIN_ADMITTED_BPM));
        assert_eq!(detector.heart_rate_average(), 0);
        assert_eq!(detector.beat_count(), 0);
        assert!(detector.intervals().is_empty());
    }

    #[test]
    fn test_weak_signal_never_triggers() {
        let mut detector = BeatDetector::default();
        for k in 0..100 {
            let ir = 60_000 + (k % 2) as u32 * 10;
            assert!(detector.process(ir, k * SAMPLE_MS).is_none());
        }
        assert_eq!(detector.state(), DetectorState::Tracking);
        assert_eq!(detector.signal_quality(), SignalQuality::Weak);
        assert_eq!(detector.stable_readings(), 0);
    }

    #[test]
    fn test_contact_loss_zeroes_rates_but_keeps_history() {
        let mut detector = BeatDetector::default();
        feed(&mut detector, 0..200, 10);
        assert_eq!(detector.heart_rate_average(), 60);
        let intervals = detector.intervals();

        assert!(detector.process(1_000, 200 * SAMPLE_MS).is_none());
        assert_eq!(detector.state(), DetectorState::NoFinger);
        assert!(!detector.finger_detected());
        assert_eq!(detector.heart_rate_average(), 0);
        assert_eq!(detector.heart_rate_instant(), 0);
        assert_eq!(detector.baseline(), 0);
        assert_eq!(detector.stable_readings(), 0);
        assert_eq!(detector.intervals(), intervals);

        // 80 bpm after reacquisition: 10-sample period at 75 ms per sample
        let start_ms = 30_000;
        let events: Vec<BeatEvent> = (0..46)
            .filter_map(|k| detector.process(pulse_sample(k, 10, 2000.0), start_ms + k * 75))
            .collect();

        // The first edge after the gap only re-arms the timer
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].instant_bpm, 80);
        assert!(events[0].admitted);
        // Blends with the three newest pre-loss rates: (60 + 60 + 60 + 80) / 4
        assert_eq!(detector.heart_rate_instant(), 80);
        assert_eq!(detector.heart_rate_average(), 65);
    }

    #[test]
    fn test_threshold_saturates_near_full_scale() {
        let mut detector = BeatDetector::default();
        detector.process(u32::MAX - 30_000, 0);
        for k in 1..30 {
            detector.process(u32::MAX, k * SAMPLE_MS);
        }
        assert_eq!(detector.state(), DetectorState::Tracking);
        assert_eq!(detector.amplitude(), 15_000);
        assert_eq!(detector.threshold(), u32::MAX);
    }
}
