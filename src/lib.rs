//! flowsense - Study-environment sensing and flow-state forecasting
//!
//! The sensing node turns raw microphone and optical pulse samples into a
//! filtered reading (noise level, heart rate, HRV) and a discrete state,
//! and uploads one telemetry record per upload tick. The forecasting side
//! reads that history back, bins it into a weekly pattern grid and predicts
//! the hours in which a flow state is most likely.
//!
//! ## Modules
//!
//! - **Sensing**: `noise`, `beat`, `hrv`, `node`
//! - **Classification**: `classifier`, shared by both sides
//! - **Forecasting**: `pattern`, `forecast`, `service`
//! - **Wire formats**: `telemetry`

pub mod beat;
pub mod classifier;
pub mod config;
pub mod error;
pub mod forecast;
pub mod hrv;
pub mod node;
pub mod noise;
pub mod pattern;
pub mod ring_buffer;
pub mod service;
pub mod telemetry;
pub mod types;

pub use classifier::classify;
pub use config::{FlowConfig, ForecastConfig, NodeConfig};
pub use error::FlowError;
pub use forecast::{Forecast, ForecastEngine};
pub use node::{NodeScheduler, NodeStatusReport, SampleSource, SensingNode};
pub use service::{ForecastService, ForecastSnapshot, RunOutcome, SnapshotStatus};
pub use telemetry::{HistorySource, MemoryTelemetryStore, StaticFeed, TelemetrySink, TelemetryUpload};
pub use types::{ClassifiedState, DataQuality, Prediction, TelemetryRecord};

/// Crate version reported by the CLI
pub const FLOWSENSE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for exported documents
pub const PRODUCER_NAME: &str = "flowsense";
