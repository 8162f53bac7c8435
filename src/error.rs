//! Error types for Integrity Flux

use thiserror::Error;

/// Errors that can occur while monitoring a session
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Failed to parse input: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("External assessment failed: {0}")]
    AssessmentFailed(String),

    #[error("External assessment timed out after {0} ms")]
    AssessmentTimeout(u64),

    #[error("Session already stopped: {0}")]
    SessionStopped(String),

    #[error("Aggregator failed: {0}")]
    AggregatorFailed(String),
}

/// Result alias used throughout the crate
pub type MonitorResult<T> = Result<T, MonitorError>;
