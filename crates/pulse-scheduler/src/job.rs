//! Job definition, type and status.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// How a job's `schedule` string is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    /// `schedule` is a 5- or 6-field cron expression.
    Cron,
    /// `schedule` is a single instant; the job fires once.
    Scheduled,
    /// `schedule` is an anchor instant; the job fires every `period_secs` from it.
    Recurring,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Cron => "cron",
            JobType::Scheduled => "scheduled",
            JobType::Recurring => "recurring",
        }
    }

    /// Whether a successful run re-arms the job.
    pub fn is_repeating(&self) -> bool {
        !matches!(self, JobType::Scheduled)
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cron" => Ok(JobType::Cron),
            "scheduled" => Ok(JobType::Scheduled),
            "recurring" => Ok(JobType::Recurring),
            other => Err(format!("unknown job type: {other}")),
        }
    }
}

/// Job status.
///
/// ```text
/// pending ──claim──▶ running ──success──▶ pending (cron, recurring)
///    │                  │  ├──success──▶ completed (scheduled)
///    │                  │  └──failure──▶ failed ──reset──▶ pending
///    └──cancel──▶ cancelled ◀──cancel──┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting for `next_run`.
    Pending,
    /// Claimed by a worker; an execution is in flight.
    Running,
    /// One-time job that ran successfully.
    Completed,
    /// Last execution failed; never picked up again unless reset.
    Failed,
    /// Cancelled by an operator.
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// `completed` and `cancelled` never leave their state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Cancelled)
    }

    /// Whether the state machine allows `self -> next`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Running, Pending)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Failed, Pending)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// A persisted job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Immutable identity.
    pub uuid: Uuid,
    /// Human-readable label.
    pub name: String,
    /// Unit-of-work template every execution of this job refers to.
    pub task_uuid: Uuid,
    #[serde(rename = "type")]
    pub job_type: JobType,
    /// Cron expression or ISO-8601 instant, depending on `job_type`.
    pub schedule: String,
    /// Period of a recurring job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_secs: Option<u64>,
    /// IANA timezone overriding the scheduler default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    pub status: JobStatus,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    /// Output of the last execution, or `{error, timestamp}`.
    pub result: Option<Value>,
    /// Free-form data for the execution endpoint (description, notification hints).
    pub metadata: Value,
    /// Number of finalized executions.
    pub run_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Whether the job is eligible for pickup at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Pending && self.next_run.is_some_and(|next| next <= now)
    }

    /// Error message of the last failed run.
    pub fn last_error(&self) -> Option<&str> {
        self.result.as_ref()?.get("error")?.as_str()
    }
}

/// Parameters for creating a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    pub name: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub schedule: String,
    pub task_uuid: Uuid,
    #[serde(default)]
    pub metadata: Option<Value>,
    #[serde(default)]
    pub period_secs: Option<u64>,
    #[serde(default)]
    pub timezone: Option<String>,
}

impl NewJob {
    pub fn new(
        name: impl Into<String>,
        job_type: JobType,
        schedule: impl Into<String>,
        task_uuid: Uuid,
    ) -> Self {
        Self {
            name: name.into(),
            job_type,
            schedule: schedule.into(),
            task_uuid,
            metadata: None,
            period_secs: None,
            timezone: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Set `metadata.description`, the instruction sent to the execution endpoint.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        let mut metadata = match self.metadata.take() {
            Some(Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        };
        metadata.insert("description".to_string(), Value::String(description.into()));
        self.metadata = Some(Value::Object(metadata));
        self
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period_secs = Some(period.as_secs());
        self
    }

    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = Some(timezone.into());
        self
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
