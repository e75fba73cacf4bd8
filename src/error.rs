//! Error types for flowsense

use thiserror::Error;

/// Errors that can occur on the sensing node or during a forecast run
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("Sensor unavailable: {0}")]
    SensorUnavailable(String),

    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),

    #[error("Insufficient data: {have} of {need} samples")]
    InsufficientData { have: usize, need: usize },

    #[error("Malformed telemetry: {0}")]
    MalformedTelemetry(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Unexpected fault: {0}")]
    Fault(String),
}
