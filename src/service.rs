//! Forecast service
//!
//! Runs the forecast engine against a history source as a single-shot job.
//! At most one run is in flight: an overlapping trigger is discarded, not
//! queued. Readers get an `Arc` to the last published snapshot, which is
//! replaced whole at the end of every run.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::ForecastConfig;
use crate::error::FlowError;
use crate::forecast::{Forecast, ForecastEngine};
use crate::telemetry::{to_records, HistorySource};
use crate::types::{DataQuality, Prediction};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SnapshotStatus {
    /// No run has completed yet
    Pending,
    Ready,
    InsufficientData { have: usize, need: usize },
    NetworkUnavailable { message: String },
    Error { message: String },
}

/// Read-side state published by the service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastSnapshot {
    pub run_id: Option<Uuid>,
    pub status: SnapshotStatus,
    pub predictions: Vec<Prediction>,
    pub overall_confidence: u32,
    pub data_quality: DataQuality,
    pub total_samples: usize,
    /// Feed rows discarded during record conversion
    pub dropped_rows: usize,
    /// Time of the last successful run
    pub last_update: Option<DateTime<Utc>>,
}

impl Default for ForecastSnapshot {
    fn default() -> Self {
        Self {
            run_id: None,
            status: SnapshotStatus::Pending,
            predictions: Vec::new(),
            overall_confidence: 0,
            data_quality: DataQuality::Insufficient,
            total_samples: 0,
            dropped_rows: 0,
            last_update: None,
        }
    }
}

impl ForecastSnapshot {
    pub fn is_ready(&self) -> bool {
        self.status == SnapshotStatus::Ready
    }

    pub fn to_json(&self) -> Result<String, FlowError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_json_pretty(&self) -> Result<String, FlowError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[derive(Debug, Clone)]
pub enum RunOutcome {
    Completed(Arc<ForecastSnapshot>),
    /// Another run was in progress
    Skipped,
}

/// Clears the busy flag on every exit path
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct ForecastService {
    engine: ForecastEngine,
    running: AtomicBool,
    snapshot: RwLock<Arc<ForecastSnapshot>>,
}

impl ForecastService {
    pub fn new(config: ForecastConfig) -> Result<Self, FlowError> {
        Ok(Self {
            engine: ForecastEngine::new(config)?,
            running: AtomicBool::new(false),
            snapshot: RwLock::new(Arc::new(ForecastSnapshot::default())),
        })
    }

    pub fn engine(&self) -> &ForecastEngine {
        &self.engine
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// The last published snapshot
    pub fn snapshot(&self) -> Arc<ForecastSnapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Run one forecast over the history ending at `now`
    pub fn run(&self, source: &dyn HistorySource, now: DateTime<Utc>) -> RunOutcome {
        let Some(_guard) = RunGuard::acquire(&self.running) else {
            info!("forecast run already in progress, trigger skipped");
            return RunOutcome::Skipped;
        };

        let run_id = Uuid::new_v4();
        info!(%run_id, %now, "forecast run started");

        let result = catch_unwind(AssertUnwindSafe(|| self.compute(source, now)))
            .unwrap_or_else(|panic| Err(FlowError::Fault(panic_message(panic.as_ref()))));

        let previous = self.snapshot();
        let snapshot = match result {
            Ok((forecast, dropped_rows)) => {
                info!(
                    %run_id,
                    predictions = forecast.predictions.len(),
                    overall_confidence = forecast.overall_confidence,
                    total_samples = forecast.total_samples,
                    dropped_rows,
                    "forecast run finished"
                );
                ForecastSnapshot {
                    run_id: Some(run_id),
                    status: SnapshotStatus::Ready,
                    predictions: forecast.predictions,
                    overall_confidence: forecast.overall_confidence,
                    data_quality: forecast.data_quality,
                    total_samples: forecast.total_samples,
                    dropped_rows,
                    last_update: Some(now),
                }
            }
            Err(FlowError::InsufficientData { have, need }) => {
                info!(%run_id, have, need, "not enough history, forecast skipped");
                ForecastSnapshot {
                    run_id: Some(run_id),
                    status: SnapshotStatus::InsufficientData { have, need },
                    total_samples: have,
                    last_update: previous.last_update,
                    ..ForecastSnapshot::default()
                }
            }
            Err(FlowError::NetworkUnavailable(message)) => {
                warn!(%run_id, %message, "history fetch failed, keeping previous predictions");
                ForecastSnapshot {
                    run_id: Some(run_id),
                    status: SnapshotStatus::NetworkUnavailable { message },
                    ..(*previous).clone()
                }
            }
            Err(e) => {
                error!(%run_id, error = %e, "forecast run failed");
                ForecastSnapshot {
                    run_id: Some(run_id),
                    status: SnapshotStatus::Error {
                        message: e.to_string(),
                    },
                    ..(*previous).clone()
                }
            }
        };

        let snapshot = Arc::new(snapshot);
        *self
            .snapshot
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::clone(&snapshot);
        RunOutcome::Completed(snapshot)
    }

    fn compute(&self, source: &dyn HistorySource, now: DateTime<Utc>) -> Result<(Forecast, usize), FlowError> {
        let history_days = self.engine.config().history_days;
        let since = now
            .checked_sub_signed(Duration::days(history_days as i64))
            .ok_or_else(|| {
                FlowError::Config(format!("history window of {history_days} days overflows before {now}"))
            })?;
        let entries = source.fetch_feed(since)?;
        let (records, dropped) = to_records(&entries, self.engine.offset());

        let forecast = self.engine.forecast(&records, now);
        if !forecast.is_sufficient() {
            return Err(FlowError::InsufficientData {
                have: forecast.total_samples,
                need: forecast.min_samples,
            });
        }
        Ok((forecast, dropped))
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panic during forecast run: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panic during forecast run: {s}")
    } else {
        "panic during forecast run".to_string()
    }
}
