//! Sensing node
//!
//! `SensingNode` owns every piece of node-local state: the noise sampler,
//! the beat detector, the latest filtered reading and classified state.
//! `NodeScheduler` drives it cooperatively from independent periodic ticks;
//! nothing here blocks, so a slow tick only delays the ones behind it.

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::beat::{BeatDetector, BeatEvent};
use crate::classifier::classify;
use crate::config::NodeConfig;
use crate::error::FlowError;
use crate::noise::NoiseSampler;
use crate::telemetry::{round1, TelemetrySink, TelemetryUpload};
use crate::types::{ClassifiedState, FilteredReading, RawSample, SignalQuality, TelemetryRecord};

/// Raw sensor access (hardware bring-up lives behind this trait)
pub trait SampleSource {
    /// One raw microphone reading
    fn read_noise(&mut self, now_ms: u64) -> Result<u16, FlowError>;

    /// One raw optical IR reading; `Err(SensorUnavailable)` when the sensor is absent
    fn read_optical(&mut self, now_ms: u64) -> Result<u32, FlowError>;
}

/// Local read API payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStatusReport {
    pub noise_db: f64,
    pub heart_rate_instant: u32,
    pub heart_rate_average: u32,
    pub hrv_rmssd: f64,
    pub hrv_sdnn: f64,
    pub status: ClassifiedState,
    pub status_label: String,
    pub signal_quality: SignalQuality,
    pub raw_peak_to_peak: u16,
    pub raw_optical: u32,
    pub ac_magnitude: u32,
    pub beat_count: u64,
    pub finger_detected: bool,
    pub optical_available: bool,
}

#[derive(Debug, Clone)]
pub struct SensingNode {
    noise: NoiseSampler,
    detector: BeatDetector,
    reading: FilteredReading,
    state: ClassifiedState,
    last_sample: Option<RawSample>,
    last_noise_raw: u16,
    optical_available: bool,
    uploads_sent: u64,
    uploads_dropped: u64,
}

impl Default for SensingNode {
    fn default() -> Self {
        Self::new(&NodeConfig::default())
    }
}

impl SensingNode {
    pub fn new(config: &NodeConfig) -> Self {
        Self {
            noise: NoiseSampler::new(
                config.noise_window_ms,
                config.db_offset,
                config.smoothing_alpha,
            ),
            detector: BeatDetector::new(config.detection_threshold),
            reading: FilteredReading::default(),
            state: ClassifiedState::Standby,
            last_sample: None,
            last_noise_raw: 0,
            optical_available: true,
            uploads_sent: 0,
            uploads_dropped: 0,
        }
    }

    /// Fold one microphone reading into the envelope window
    pub fn sample_noise(&mut self, raw: u16, now_ms: u64) {
        self.last_noise_raw = raw;
        if let Some(level) = self.noise.push(raw, now_ms) {
            self.reading.noise_db = level.smoothed_db;
        }
    }

    /// Process one acquisition tick and re-classify
    pub fn acquire(&mut self, sample: RawSample) -> Option<BeatEvent> {
        let beat = match sample.optical_ir {
            Some(ir) => {
                if !self.optical_available {
                    info!("optical sensor available again");
                    self.optical_available = true;
                }
                self.detector.process(ir, sample.timestamp_ms)
            }
            None => {
                if self.optical_available {
                    warn!("optical sensor unavailable, heart metrics degraded");
                    self.optical_available = false;
                }
                // Below any detection threshold: forces the no-contact reset
                self.detector.process(0, sample.timestamp_ms)
            }
        };

        let hrv = self.detector.hrv();
        self.reading = FilteredReading {
            noise_db: self.noise.smoothed_db(),
            heart_rate_instant: self.detector.heart_rate_instant(),
            heart_rate_average: self.detector.heart_rate_average(),
            rr_interval_ms: self.detector.last_interval_ms(),
            hrv_sdnn: hrv.sdnn,
            hrv_rmssd: hrv.rmssd,
        };

        let state = classify(
            self.reading.noise_db,
            self.reading.heart_rate_average as f64,
            self.reading.rr_interval_ms as f64,
        );
        if state != self.state {
            debug!(from = self.state.as_str(), to = state.as_str(), "state changed");
            self.state = state;
        }

        self.last_sample = Some(sample);
        beat
    }

    pub fn reading(&self) -> FilteredReading {
        self.reading
    }

    pub fn state(&self) -> ClassifiedState {
        self.state
    }

    pub fn detector(&self) -> &BeatDetector {
        &self.detector
    }

    pub fn uploads_sent(&self) -> u64 {
        self.uploads_sent
    }

    pub fn uploads_dropped(&self) -> u64 {
        self.uploads_dropped
    }

    fn raw_optical(&self) -> u32 {
        self.last_sample.and_then(|s| s.optical_ir).unwrap_or(0)
    }

    /// Wire record for the current upload tick
    pub fn telemetry_upload(&self, created_at: DateTime<Utc>) -> TelemetryUpload {
        TelemetryUpload {
            created_at,
            field1: self.noise.peak_to_peak(),
            field2: round1(self.reading.noise_db),
            field3: round1(self.reading.hrv_rmssd),
            field4: self.raw_optical(),
            field5: self.reading.heart_rate_average,
            field6: self.reading.heart_rate_instant,
            field7: u8::from(self.detector.finger_detected()),
            field8: self.detector.ac_magnitude(),
            status: self.state.as_str().to_string(),
        }
    }

    /// Historical record for the current upload tick
    pub fn telemetry_record(&self, created_at: DateTime<Utc>, offset: FixedOffset) -> TelemetryRecord {
        TelemetryRecord::new(
            created_at,
            offset,
            self.reading.noise_db,
            self.reading.heart_rate_average as f64,
            self.reading.rr_interval_ms as f64,
        )
    }

    /// Best-effort upload: a failed data point is dropped, never retried
    pub fn upload(&mut self, sink: &dyn TelemetrySink, created_at: DateTime<Utc>) -> bool {
        let record = self.telemetry_upload(created_at);
        match sink.upload(&record) {
            Ok(()) => {
                self.uploads_sent += 1;
                debug!(status = %record.status, bpm = record.field5, "telemetry uploaded");
                true
            }
            Err(e) => {
                self.uploads_dropped += 1;
                warn!(error = %e, dropped = self.uploads_dropped, "telemetry upload failed, data point dropped");
                false
            }
        }
    }

    pub fn status_report(&self) -> NodeStatusReport {
        NodeStatusReport {
            noise_db: round1(self.reading.noise_db),
            heart_rate_instant: self.reading.heart_rate_instant,
            heart_rate_average: self.reading.heart_rate_average,
            hrv_rmssd: round1(self.reading.hrv_rmssd),
            hrv_sdnn: round1(self.reading.hrv_sdnn),
            status: self.state,
            status_label: self.state.label().to_string(),
            signal_quality: self.detector.signal_quality(),
            raw_peak_to_peak: self.noise.peak_to_peak(),
            raw_optical: self.raw_optical(),
            ac_magnitude: self.detector.ac_magnitude(),
            beat_count: self.detector.beat_count(),
            finger_detected: self.detector.finger_detected(),
            optical_available: self.optical_available,
        }
    }

    fn log_diagnostics(&self) {
        info!(
            state = self.state.as_str(),
            noise_db = round1(self.reading.noise_db),
            bpm = self.reading.heart_rate_average,
            rmssd = round1(self.reading.hrv_rmssd),
            quality = self.detector.signal_quality().as_str(),
            stable = self.detector.stable_readings(),
            beats = self.detector.beat_count(),
            uploads_sent = self.uploads_sent,
            uploads_dropped = self.uploads_dropped,
            "node diagnostics"
        );
    }
}

/// Millis-style periodic timer: fires when `period_ms` has elapsed since it last fired
#[derive(Debug, Clone, Copy)]
struct Periodic {
    period_ms: u64,
    last_ms: u64,
}

impl Periodic {
    fn new(period_ms: u64) -> Self {
        Self {
            period_ms,
            last_ms: 0,
        }
    }

    fn due(&mut self, now_ms: u64) -> bool {
        if now_ms.saturating_sub(self.last_ms) >= self.period_ms {
            self.last_ms = now_ms;
            true
        } else {
            false
        }
    }
}

/// What ran during one `poll`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub noise_sampled: bool,
    pub acquired: bool,
    pub beat: Option<BeatEvent>,
    /// `Some(success)` when the upload tick fired
    pub uploaded: Option<bool>,
    pub diagnostics: bool,
}

/// Cooperative scheduler for the node's periodic ticks
#[derive(Debug, Clone)]
pub struct NodeScheduler {
    noise: Periodic,
    acquisition: Periodic,
    diagnostic: Periodic,
    upload: Periodic,
}

impl NodeScheduler {
    pub fn new(config: &NodeConfig) -> Self {
        Self {
            noise: Periodic::new(config.noise_sample_period_ms),
            acquisition: Periodic::new(config.acquisition_period_ms),
            diagnostic: Periodic::new(config.diagnostic_period_ms),
            upload: Periodic::new(config.upload_period_ms),
        }
    }

    /// Run every tick that is due at `now_ms`; `wall_clock` stamps uploads
    pub fn poll(
        &mut self,
        node: &mut SensingNode,
        source: &mut dyn SampleSource,
        sink: &dyn TelemetrySink,
        now_ms: u64,
        wall_clock: DateTime<Utc>,
    ) -> TickReport {
        let mut report = TickReport::default();

        if self.noise.due(now_ms) {
            match source.read_noise(now_ms) {
                Ok(raw) => {
                    node.sample_noise(raw, now_ms);
                    report.noise_sampled = true;
                }
                Err(e) => debug!(error = %e, "noise sample skipped"),
            }
        }

        if self.acquisition.due(now_ms) {
            let optical_ir = match source.read_optical(now_ms) {
                Ok(ir) => Some(ir),
                Err(FlowError::SensorUnavailable(_)) => None,
                Err(e) => {
                    debug!(error = %e, "optical read failed");
                    None
                }
            };
            let sample = RawSample {
                timestamp_ms: now_ms,
                noise_raw: node.last_noise_raw,
                optical_ir,
            };
            report.beat = node.acquire(sample);
            report.acquired = true;
        }

        if self.diagnostic.due(now_ms) {
            node.log_diagnostics();
            report.diagnostics = true;
        }

        if self.upload.due(now_ms) {
            report.uploaded = Some(node.upload(sink, wall_clock));
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::MemoryTelemetryStore;
    use chrono::TimeZone;
    use std::f64::consts::PI;

    /// 1 Hz pulse sampled at acquisition ticks, square-wave microphone
    struct SyntheticSource {
        noise_swing: u16,
        optical: bool,
    }

    impl SampleSource for SyntheticSource {
        fn read_noise(&mut self, now_ms: u64) -> Result<u16, FlowError> {
            Ok(if now_ms % 4 < 2 {
                2048 + self.noise_swing / 2
            } else {
                2048 - self.noise_swing / 2
            })
        }

        fn read_optical(&mut self, now_ms: u64) -> Result<u32, FlowError> {
            if !self.optical {
                return Err(FlowError::SensorUnavailable("no optical sensor".to_string()));
            }
            let phase = 2.0 * PI * (now_ms % 1000) as f64 / 1000.0;
            Ok((60_000.0 + 2000.0 * phase.sin()).round() as u32)
        }
    }

    fn wall(ms: u64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap() + chrono::Duration::milliseconds(ms as i64)
    }

    fn run(node: &mut SensingNode, source: &mut SyntheticSource, sink: &MemoryTelemetryStore, until_ms: u64) -> Vec<TickReport> {
        let mut scheduler = NodeScheduler::new(&NodeConfig::default());
        (0..=until_ms)
            .step_by(2)
            .map(|t| scheduler.poll(node, source, sink, t, wall(t)))
            .collect()
    }

    #[test]
    fn test_quiet_room_and_steady_pulse_is_flow() {
        let mut node = SensingNode::default();
        let mut source = SyntheticSource { noise_swing: 10, optical: true };
        let store = MemoryTelemetryStore::new();

        let reports = run(&mut node, &mut source, &store, 20_000);

        assert_eq!(reports.iter().filter(|r| r.acquired).count(), 200);
        assert_eq!(reports.iter().filter(|r| r.uploaded.is_some()).count(), 2);
        assert_eq!(reports.iter().filter(|r| r.diagnostics).count(), 4);

        let reading = node.reading();
        assert_eq!(reading.heart_rate_average, 60);
        assert_eq!(reading.rr_interval_ms, 1000);
        // 20 + 20·log10(11) ≈ 40.8 dB
        assert!((reading.noise_db - 40.8).abs() < 0.1);
        assert_eq!(node.state(), ClassifiedState::FlowState);

        let uploads = store.uploads().unwrap();
        assert_eq!(uploads.len(), 2);
        assert_eq!(uploads[1].field5, 60);
        assert_eq!(uploads[1].field7, 1);
        assert_eq!(uploads[1].field1, 10);
        assert_eq!(uploads[1].status, "flow_state");
        assert_eq!(uploads[1].created_at, wall(16_000));
    }

    #[test]
    fn test_loud_room_is_normal_learning() {
        let mut node = SensingNode::default();
        let mut source = SyntheticSource { noise_swing: 400, optical: true };
        let store = MemoryTelemetryStore::new();

        run(&mut node, &mut source, &store, 12_000);
        assert!(node.reading().noise_db > 55.0);
        assert_eq!(node.state(), ClassifiedState::NormalLearning);

        let report = node.status_report();
        assert_eq!(report.status_label, "Normal Learning");
        assert_eq!(report.signal_quality, SignalQuality::Excellent);
        assert!(report.beat_count > 0);
    }

    #[test]
    fn test_missing_optical_sensor_degrades() {
        let mut node = SensingNode::default();
        let mut source = SyntheticSource { noise_swing: 10, optical: false };
        let store = MemoryTelemetryStore::new();

        run(&mut node, &mut source, &store, 9_000);

        let report = node.status_report();
        assert!(!report.optical_available);
        assert!(!report.finger_detected);
        assert_eq!(report.heart_rate_average, 0);
        assert_eq!(report.signal_quality, SignalQuality::NoContact);
        assert_eq!(node.state(), ClassifiedState::Standby);
        // Uploads still go out with zeroed heart metrics
        assert_eq!(store.uploads().unwrap()[0].field5, 0);
    }

    #[test]
    fn test_upload_failure_is_dropped() {
        let mut node = SensingNode::default();
        let mut source = SyntheticSource { noise_swing: 10, optical: true };
        let store = MemoryTelemetryStore::new();
        store.set_offline(true);

        let reports = run(&mut node, &mut source, &store, 16_000);
        assert_eq!(
            reports.iter().filter_map(|r| r.uploaded).collect::<Vec<_>>(),
            vec![false, false]
        );
        assert_eq!(node.uploads_dropped(), 2);
        assert_eq!(node.uploads_sent(), 0);
        assert!(store.is_empty());
    }

    #[test]
    fn test_telemetry_record_matches_reading() {
        let mut node = SensingNode::default();
        let mut source = SyntheticSource { noise_swing: 10, optical: true };
        let store = MemoryTelemetryStore::new();
        run(&mut node, &mut source, &store, 10_000);

        let record = node.telemetry_record(wall(10_000), FixedOffset::east_opt(0).unwrap());
        assert_eq!(record.bpm, 60.0);
        assert_eq!(record.day_of_week, 1);
        assert_eq!(record.hour_of_day, 9);
        assert_eq!(record.state, node.state());
    }
}
