//! Job persistence.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StoreError;
use crate::job::{Job, JobStatus};

/// What a transition does to `next_run`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextRun {
    Keep,
    Set(Option<DateTime<Utc>>),
}

/// A single atomic update of a job row.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusChange {
    pub status: JobStatus,
    pub next_run: NextRun,
    /// Only written when `Some`.
    pub last_run: Option<DateTime<Utc>>,
    /// Only written when `Some`.
    pub result: Option<Value>,
    /// Increment `run_count`.
    pub count_run: bool,
    /// Only apply while the stored `next_run` equals this instant.
    pub expect_next_run: Option<DateTime<Utc>>,
    pub at: DateTime<Utc>,
}

impl StatusChange {
    pub fn to(status: JobStatus, at: DateTime<Utc>) -> Self {
        Self {
            status,
            next_run: NextRun::Keep,
            last_run: None,
            result: None,
            count_run: false,
            expect_next_run: None,
            at,
        }
    }

    pub fn with_next_run(mut self, next_run: Option<DateTime<Utc>>) -> Self {
        self.next_run = NextRun::Set(next_run);
        self
    }

    pub fn with_last_run(mut self, last_run: DateTime<Utc>) -> Self {
        self.last_run = Some(last_run);
        self
    }

    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }

    pub fn counting_run(mut self) -> Self {
        self.count_run = true;
        self
    }

    /// Guard the change on the occurrence the caller observed.
    pub fn if_next_run(mut self, next_run: DateTime<Utc>) -> Self {
        self.expect_next_run = Some(next_run);
        self
    }

    /// Whether `job` satisfies the `next_run` guard.
    pub fn matches(&self, job: &Job) -> bool {
        self.expect_next_run
            .is_none_or(|expected| job.next_run == Some(expected))
    }

    /// Apply the change to an in-memory job.
    pub fn apply(&self, job: &mut Job) {
        job.status = self.status;
        if let NextRun::Set(next_run) = self.next_run {
            job.next_run = next_run;
        }
        if let Some(last_run) = self.last_run {
            job.last_run = Some(last_run);
        }
        if let Some(result) = &self.result {
            job.result = Some(result.clone());
        }
        if self.count_run {
            job.run_count += 1;
        }
        job.updated_at = self.at;
    }
}

/// Durable job storage.
///
/// `transition` is the only way to change a stored job. It must be atomic:
/// the change is applied only while the job is in one of the `from` states
/// and, when the change carries one, its `next_run` guard holds.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new job.
    async fn insert(&self, job: &Job) -> Result<(), StoreError>;

    /// Load a job by uuid.
    async fn get(&self, uuid: Uuid) -> Result<Option<Job>, StoreError>;

    /// All jobs, oldest first.
    async fn list(&self) -> Result<Vec<Job>, StoreError>;

    /// Jobs in `status`, oldest first.
    async fn list_by_status(&self, status: JobStatus) -> Result<Vec<Job>, StoreError>;

    /// Pending jobs with `next_run <= now`, earliest `next_run` first.
    async fn due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Job>, StoreError>;

    /// Apply `change` if the job's status is one of `from`.
    ///
    /// Returns the updated job, or `None` if the job is missing, in another
    /// state, or no longer at the expected `next_run`.
    async fn transition(
        &self,
        uuid: Uuid,
        from: &[JobStatus],
        change: &StatusChange,
    ) -> Result<Option<Job>, StoreError>;
}

/// In-memory job store for testing and ephemeral runs.
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<Uuid, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
        }
    }

    fn sorted(mut jobs: Vec<Job>) -> Vec<Job> {
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.uuid.cmp(&b.uuid)));
        jobs
    }
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, job: &Job) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.uuid) {
            return Err(StoreError::Database(format!(
                "job {} already exists",
                job.uuid
            )));
        }
        jobs.insert(job.uuid, job.clone());
        Ok(())
    }

    async fn get(&self, uuid: Uuid) -> Result<Option<Job>, StoreError> {
        let jobs = self.jobs.read().await;
        Ok(jobs.get(&uuid).cloned())
    }

    async fn list(&self) -> Result<Vec<Job>, StoreError> {
        let jobs = self.jobs.read().await;
        Ok(Self::sorted(jobs.values().cloned().collect()))
    }

    async fn list_by_status(&self, status: JobStatus) -> Result<Vec<Job>, StoreError> {
        let jobs = self.jobs.read().await;
        Ok(Self::sorted(
            jobs.values()
                .filter(|job| job.status == status)
                .cloned()
                .collect(),
        ))
    }

    async fn due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Job>, StoreError> {
        let jobs = self.jobs.read().await;
        let mut due: Vec<Job> = jobs.values().filter(|job| job.is_due(now)).cloned().collect();
        due.sort_by(|a, b| {
            a.next_run
                .cmp(&b.next_run)
                .then(a.created_at.cmp(&b.created_at))
        });
        due.truncate(limit);
        Ok(due)
    }

    async fn transition(
        &self,
        uuid: Uuid,
        from: &[JobStatus],
        change: &StatusChange,
    ) -> Result<Option<Job>, StoreError> {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&uuid) {
            Some(job) if from.contains(&job.status) && change.matches(job) => {
                change.apply(job);
                Ok(Some(job.clone()))
            }
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
