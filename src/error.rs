//! Top-level error types for the hot tub scheduling core.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error enum wrapping domain-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Crontab(#[from] CrontabError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Equipment(#[from] EquipmentError),

    #[error(transparent)]
    TargetTemp(#[from] TargetTempError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingKey(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Job store and general file-persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("failed to acquire lock on {path}: {source}")]
    Lock {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to write record atomically: {0}")]
    AtomicWrite(std::io::Error),
}

/// Host crontab manipulation errors.
#[derive(Debug, thiserror::Error)]
pub enum CrontabError {
    #[error("crontab tool unavailable: {0}")]
    Unavailable(String),

    #[error("failed to read crontab: {0}")]
    Read(String),

    #[error("failed to write crontab: {0}")]
    Write(String),
}

/// Errors surfaced by `Scheduler::schedule`/`cancel`/`list`.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("schedule overlaps with job {conflicting_job_id}")]
    OverlappingSchedule { conflicting_job_id: String },

    #[error("job not found: {0}")]
    JobNotFound(String),
}

/// Equipment webhook errors.
#[derive(Debug, thiserror::Error)]
pub enum EquipmentError {
    #[error("equipment webhook failed: {0}")]
    WebhookFailure(String),
}

/// Target-temperature control loop errors.
#[derive(Debug, thiserror::Error)]
pub enum TargetTempError {
    #[error("target_temp_f {0} out of range [80, 110]")]
    OutOfRange(f64),

    #[error("sensor reading stale or unavailable")]
    SensorStale,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::Scheduler(SchedulerError::InvalidInput(_)) => StatusCode::BAD_REQUEST,
            Error::Scheduler(SchedulerError::OverlappingSchedule { .. }) => StatusCode::BAD_REQUEST,
            Error::Scheduler(SchedulerError::JobNotFound(_)) => StatusCode::NOT_FOUND,
            Error::Store(StoreError::JobNotFound(_)) => StatusCode::NOT_FOUND,
            Error::TargetTemp(TargetTempError::OutOfRange(_)) => StatusCode::BAD_REQUEST,
            Error::Equipment(EquipmentError::WebhookFailure(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Crontab(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        tracing::warn!(error = %self, %status, "request failed");

        (status, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}
