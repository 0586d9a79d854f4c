//! Scheduler error types.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::job::JobStatus;

/// A schedule string that cannot be evaluated for its job type.
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// Cron expression rejected by the parser.
    #[error("Invalid cron expression '{expr}': {message}")]
    InvalidCron { expr: String, message: String },

    /// Instant that is neither RFC 3339 nor a local date-time.
    #[error("Invalid instant '{value}': {message}")]
    InvalidInstant { value: String, message: String },

    /// One-time instant that is not in the future.
    #[error("Instant {0} is not in the future")]
    PastInstant(String),

    /// Recurring job without a positive period.
    #[error("Recurring jobs require a period greater than zero")]
    MissingPeriod,

    /// Recurring period beyond the supported range.
    #[error("Recurring period of {0} seconds is longer than 100 years")]
    PeriodTooLong(u64),

    /// Not an IANA timezone name.
    #[error("Unknown timezone: {0}")]
    UnknownTimezone(String),

    /// Schedule that never fires again.
    #[error("Schedule '{0}' has no upcoming fire time")]
    Exhausted(String),
}

/// Failure of a single execution attempt.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The endpoint did not answer in time.
    #[error("Execution timed out after {0:?}")]
    Timeout(Duration),

    /// Connection or transport failure.
    #[error("Network error: {0}")]
    Network(String),

    /// Non-2xx response.
    #[error("Execution endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    /// 2xx response whose body could not be read.
    #[error("Failed to read execution response: {0}")]
    Decode(String),

    /// The execution record could not be written.
    #[error("Execution record error: {0}")]
    Record(#[from] StoreError),
}

/// Persistence layer failure.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database unavailable or query failed.
    #[error("Database error: {0}")]
    Database(String),

    /// JSON column could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Stored row holds a value this version does not understand.
    #[error("Corrupt row {id}: {message}")]
    Corrupt { id: String, message: String },
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<tokio_rusqlite::Error> for StoreError {
    fn from(e: tokio_rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// Errors returned by job control operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(#[from] ScheduleError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    #[error("Invalid transition for job {uuid}: {from} -> {to}")]
    InvalidTransition {
        uuid: Uuid,
        from: JobStatus,
        to: JobStatus,
    },
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
