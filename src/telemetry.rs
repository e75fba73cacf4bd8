//! Telemetry store wire formats
//!
//! The time-series store itself is external. This module defines the upload
//! record the node writes each upload tick, the lenient decoder for the bulk
//! historical feed, and the trait seams both sides are written against.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::classifier::is_valid_bpm;
use crate::error::FlowError;
use crate::types::TelemetryRecord;

/// One upload-tick data point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryUpload {
    pub created_at: DateTime<Utc>,
    /// Raw noise peak-to-peak
    pub field1: u16,
    /// Filtered noise level (dB, 1 decimal)
    pub field2: f64,
    /// HRV RMSSD (ms, 1 decimal)
    pub field3: f64,
    /// Raw optical intensity
    pub field4: u32,
    /// Averaged heart rate (bpm)
    pub field5: u32,
    /// Instantaneous heart rate (bpm)
    pub field6: u32,
    /// Finger contact detected (0/1)
    pub field7: u8,
    /// Optical AC magnitude
    pub field8: u32,
    /// Status label
    pub status: String,
}

/// Round to one decimal place for the wire
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Write side of the telemetry store
pub trait TelemetrySink {
    fn upload(&self, record: &TelemetryUpload) -> Result<(), FlowError>;
}

/// Read side of the telemetry store
pub trait HistorySource {
    /// Fetch every entry created at or after `since`
    fn fetch_feed(&self, since: DateTime<Utc>) -> Result<Vec<FeedEntry>, FlowError>;
}

/// One historical row as served by the store
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedEntry {
    pub created_at: Option<DateTime<Utc>>,
    /// Noise level (dB)
    pub field2: f64,
    /// Latest RR interval (ms)
    pub field3: f64,
    /// Averaged heart rate (bpm)
    pub field5: f64,
    /// Instantaneous heart rate (bpm)
    pub field6: f64,
}

impl FeedEntry {
    /// Parse one JSON row; missing or non-numeric fields become 0
    pub fn from_value(value: &Value) -> Self {
        let created_at = value
            .get("created_at")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        Self {
            created_at,
            field2: lenient_number(value.get("field2")),
            field3: lenient_number(value.get("field3")),
            field5: lenient_number(value.get("field5")),
            field6: lenient_number(value.get("field6")),
        }
    }

    /// Averaged rate, falling back to the instantaneous one when absent
    pub fn bpm(&self) -> f64 {
        if self.field5 > 0.0 {
            self.field5
        } else {
            self.field6
        }
    }

    /// Convert to a record; `None` for rows without a timestamp or with an implausible rate
    pub fn to_record(&self, offset: FixedOffset) -> Option<TelemetryRecord> {
        let created_at = self.created_at?;
        let bpm = self.bpm();
        if !is_valid_bpm(bpm) {
            return None;
        }
        Some(TelemetryRecord::new(
            created_at,
            offset,
            self.field2,
            bpm,
            self.field3,
        ))
    }
}

impl From<&TelemetryUpload> for FeedEntry {
    fn from(upload: &TelemetryUpload) -> Self {
        Self {
            created_at: Some(upload.created_at),
            field2: upload.field2,
            field3: upload.field3,
            field5: upload.field5 as f64,
            field6: upload.field6 as f64,
        }
    }
}

fn lenient_number(value: Option<&Value>) -> f64 {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite()).unwrap_or(0.0)
}

/// Decode a bulk feed: either `{"feeds": [...]}` or a bare array of rows
pub fn decode_feed(json: &str) -> Result<Vec<FeedEntry>, FlowError> {
    let document: Value = serde_json::from_str(json)?;
    let rows = match &document {
        Value::Array(rows) => rows,
        Value::Object(map) => match map.get("feeds") {
            Some(Value::Array(rows)) => rows,
            Some(Value::Null) | None => return Ok(Vec::new()),
            Some(_) => {
                return Err(FlowError::MalformedTelemetry(
                    "\"feeds\" is not an array".to_string(),
                ))
            }
        },
        _ => {
            return Err(FlowError::MalformedTelemetry(
                "feed must be an object or an array".to_string(),
            ))
        }
    };
    Ok(rows.iter().map(FeedEntry::from_value).collect())
}

/// Materialize valid records from a feed; returns the records and the number of dropped rows
pub fn to_records(entries: &[FeedEntry], offset: FixedOffset) -> (Vec<TelemetryRecord>, usize) {
    let records: Vec<TelemetryRecord> = entries.iter().filter_map(|e| e.to_record(offset)).collect();
    let dropped = entries.len() - records.len();
    (records, dropped)
}

/// A feed already loaded into memory, e.g. from an exported JSON file
#[derive(Debug, Clone, Default)]
pub struct StaticFeed {
    entries: Vec<FeedEntry>,
}

impl StaticFeed {
    pub fn new(entries: Vec<FeedEntry>) -> Self {
        Self { entries }
    }

    pub fn from_json(json: &str) -> Result<Self, FlowError> {
        Ok(Self::new(decode_feed(json)?))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Latest timestamp in the feed
    pub fn latest(&self) -> Option<DateTime<Utc>> {
        self.entries.iter().filter_map(|e| e.created_at).max()
    }
}

impl HistorySource for StaticFeed {
    fn fetch_feed(&self, since: DateTime<Utc>) -> Result<Vec<FeedEntry>, FlowError> {
        // Rows without a timestamp pass through and are dropped during record conversion
        Ok(self
            .entries
            .iter()
            .filter(|e| e.created_at.map_or(true, |t| t >= since))
            .cloned()
            .collect())
    }
}

#[derive(Serialize)]
struct FeedDocument<'a> {
    feeds: &'a [TelemetryUpload],
}

/// In-process store implementing both sides, for simulation and offline analysis
#[derive(Debug, Default)]
pub struct MemoryTelemetryStore {
    uploads: Mutex<Vec<TelemetryUpload>>,
    offline: AtomicBool,
}

impl MemoryTelemetryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a transport outage: uploads and fetches fail while set
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.uploads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn uploads(&self) -> Result<Vec<TelemetryUpload>, FlowError> {
        Ok(self.lock()?.clone())
    }

    /// Export in the store's bulk feed format
    pub fn to_feed_json(&self) -> Result<String, FlowError> {
        let uploads = self.lock()?;
        Ok(serde_json::to_string(&FeedDocument { feeds: &uploads })?)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<TelemetryUpload>>, FlowError> {
        self.uploads
            .lock()
            .map_err(|_| FlowError::Fault("telemetry store lock poisoned".to_string()))
    }

    fn check_online(&self) -> Result<(), FlowError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(FlowError::NetworkUnavailable("store offline".to_string()))
        } else {
            Ok(())
        }
    }
}

impl TelemetrySink for MemoryTelemetryStore {
    fn upload(&self, record: &TelemetryUpload) -> Result<(), FlowError> {
        self.check_online()?;
        self.lock()?.push(record.clone());
        Ok(())
    }
}

impl HistorySource for MemoryTelemetryStore {
    fn fetch_feed(&self, since: DateTime<Utc>) -> Result<Vec<FeedEntry>, FlowError> {
        self.check_online()?;
        Ok(self
            .lock()?
            .iter()
            .filter(|u| u.created_at >= since)
            .map(FeedEntry::from)
            .collect())
    }
}
