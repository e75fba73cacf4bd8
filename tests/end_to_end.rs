use chrono::{DateTime, Duration, TimeZone, Utc};
use std::f64::consts::PI;

use flowsense::node::{NodeScheduler, SampleSource, SensingNode};
use flowsense::service::{ForecastService, RunOutcome, SnapshotStatus};
use flowsense::telemetry::{MemoryTelemetryStore, StaticFeed};
use flowsense::{ClassifiedState, FlowConfig, FlowError};

/// Quiet room, resting 60 bpm pulse
struct StudyDesk;

impl SampleSource for StudyDesk {
    fn read_noise(&mut self, now_ms: u64) -> Result<u16, FlowError> {
        Ok(if now_ms % 4 < 2 { 2060 } else { 2040 })
    }

    fn read_optical(&mut self, now_ms: u64) -> Result<u32, FlowError> {
        let phase = 2.0 * PI * (now_ms % 1000) as f64 / 1000.0;
        Ok((60_000.0 + 2000.0 * phase.sin()).round() as u32)
    }
}

/// Monday 2024-01-08 10:00 UTC
fn session_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 8, 10, 0, 0).unwrap()
}

fn record_session(config: &FlowConfig, seconds: u64) -> (SensingNode, MemoryTelemetryStore) {
    let mut node = SensingNode::new(&config.node);
    let mut scheduler = NodeScheduler::new(&config.node);
    let store = MemoryTelemetryStore::new();
    let mut source = StudyDesk;

    let step = config.node.noise_sample_period_ms;
    let mut now_ms = 0;
    while now_ms <= seconds * 1000 {
        let wall_clock = session_start() + Duration::milliseconds(now_ms as i64);
        scheduler.poll(&mut node, &mut source, &store, now_ms, wall_clock);
        now_ms += step;
    }
    (node, store)
}

#[test]
fn test_recorded_session_forecasts_the_same_hour_next_week() {
    let config = FlowConfig::default();
    let (node, store) = record_session(&config, 1000);

    assert_eq!(node.state(), ClassifiedState::FlowState);
    assert_eq!(store.len(), 125);

    let service = ForecastService::new(config.forecast.clone()).unwrap();
    // Monday 2024-01-15 08:20 UTC
    let now = Utc.with_ymd_and_hms(2024, 1, 15, 8, 20, 0).unwrap();
    let RunOutcome::Completed(snapshot) = service.run(&store, now) else {
        panic!("run should not be skipped");
    };

    assert_eq!(snapshot.status, SnapshotStatus::Ready);
    assert!(snapshot.total_samples >= 100);
    assert_eq!(snapshot.total_samples + snapshot.dropped_rows, 125);
    assert_eq!(snapshot.predictions.len(), 1);

    let prediction = &snapshot.predictions[0];
    assert_eq!((prediction.day_of_week, prediction.hour_of_day), (1, 10));
    assert_eq!(prediction.target_time, Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap());
    assert!(prediction.probability > 0.9);
    assert!((prediction.expected_bpm - 60.0).abs() < 1.0);
}

#[test]
fn test_exported_feed_matches_live_store() {
    let config = FlowConfig::default();
    let (_, store) = record_session(&config, 1000);
    let now = Utc.with_ymd_and_hms(2024, 1, 15, 8, 20, 0).unwrap();

    let live = ForecastService::new(config.forecast.clone()).unwrap();
    live.run(&store, now);

    let feed = StaticFeed::from_json(&store.to_feed_json().unwrap()).unwrap();
    assert_eq!(feed.len(), 125);
    let offline = ForecastService::new(config.forecast.clone()).unwrap();
    offline.run(&feed, now);

    let (a, b) = (live.snapshot(), offline.snapshot());
    assert_eq!(a.status, b.status);
    assert_eq!(a.predictions, b.predictions);
    assert_eq!(a.overall_confidence, b.overall_confidence);
}

#[test]
fn test_short_session_is_not_enough_history() {
    let config = FlowConfig::default();
    let (_, store) = record_session(&config, 400);
    assert_eq!(store.len(), 50);

    let service = ForecastService::new(config.forecast).unwrap();
    service.run(&store, Utc.with_ymd_and_hms(2024, 1, 15, 8, 20, 0).unwrap());

    let snapshot = service.snapshot();
    match &snapshot.status {
        SnapshotStatus::InsufficientData { have, need } => {
            assert!(*have <= 50);
            assert_eq!(*need, 100);
        }
        other => panic!("unexpected status {other:?}"),
    }
    assert!(snapshot.predictions.is_empty());
}
