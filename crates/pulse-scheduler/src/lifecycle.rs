//! Job state machine: creation, claim, finalize, cancel and reset.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::dispatcher::Dispatcher;
use crate::error::{Result, ScheduleError, SchedulerError};
use crate::job::{Job, JobStatus, NewJob};
use crate::schedule::{ScheduleCalculator, ScheduleSpec};
use crate::store::{JobStore, StatusChange};

/// What happened to a job handed to [`JobLifecycle::run_job`].
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Another worker claimed it, or it was no longer due.
    NotClaimed,
    /// Repeating job ran and is pending again.
    Rescheduled { next_run: DateTime<Utc> },
    /// Job has nothing left to fire.
    Completed,
    /// Execution failed; the job waits for a reset.
    Failed { error: String },
    /// Job was cancelled while it ran; the outcome was recorded only.
    CancelledDuringRun,
    /// Claim or finalize did not complete; the job keeps its last durable state.
    Aborted { error: String },
}

/// Applies the job state machine on top of a [`JobStore`].
pub struct JobLifecycle {
    store: Arc<dyn JobStore>,
    calculator: ScheduleCalculator,
    clock: Arc<dyn Clock>,
}

impl JobLifecycle {
    pub fn new(
        store: Arc<dyn JobStore>,
        calculator: ScheduleCalculator,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            calculator,
            clock,
        }
    }

    pub fn calculator(&self) -> &ScheduleCalculator {
        &self.calculator
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Validate and persist a new pending job.
    ///
    /// Nothing is written when the schedule is rejected.
    pub async fn create_job(&self, new: NewJob) -> Result<Job> {
        let now = self.clock.now();
        let spec = ScheduleSpec::of_new(&new);
        self.calculator.validate(&spec)?;

        let next_run = match self.calculator.next_fire_time(&spec, now)? {
            Some(next_run) => next_run,
            None if new.job_type.is_repeating() => {
                return Err(ScheduleError::Exhausted(new.schedule).into());
            }
            None => return Err(ScheduleError::PastInstant(new.schedule).into()),
        };

        let job = Job {
            uuid: Uuid::new_v4(),
            name: new.name,
            task_uuid: new.task_uuid,
            job_type: new.job_type,
            schedule: new.schedule,
            period_secs: new.period_secs,
            timezone: new.timezone,
            status: JobStatus::Pending,
            last_run: None,
            next_run: Some(next_run),
            result: None,
            metadata: new.metadata.unwrap_or_else(|| json!({})),
            run_count: 0,
            created_at: now,
            updated_at: now,
        };
        self.store.insert(&job).await?;

        info!(
            job_uuid = %job.uuid,
            job_type = %job.job_type,
            next_run = %next_run,
            "Created job '{}'", job.name
        );
        Ok(job)
    }

    pub async fn get_job(&self, uuid: Uuid) -> Result<Option<Job>> {
        Ok(self.store.get(uuid).await?)
    }

    /// All jobs, or only those in `status`.
    pub async fn list_jobs(&self, status: Option<JobStatus>) -> Result<Vec<Job>> {
        let jobs = match status {
            Some(status) => self.store.list_by_status(status).await?,
            None => self.store.list().await?,
        };
        Ok(jobs)
    }

    /// Pending jobs due now, earliest first.
    pub async fn due_jobs(&self, limit: usize) -> Result<Vec<Job>> {
        Ok(self.store.due(self.clock.now(), limit).await?)
    }

    /// Cancel a pending or running job. An in-flight execution is not interrupted.
    pub async fn cancel_job(&self, uuid: Uuid) -> Result<Job> {
        let change = StatusChange::to(JobStatus::Cancelled, self.clock.now());
        match self
            .store
            .transition(uuid, &[JobStatus::Pending, JobStatus::Running], &change)
            .await?
        {
            Some(job) => {
                info!(job_uuid = %uuid, "Cancelled job");
                Ok(job)
            }
            None => Err(self.rejected(uuid, JobStatus::Cancelled).await),
        }
    }

    /// Move a failed job back to pending.
    ///
    /// Repeating jobs get a fresh `next_run`; a one-time job keeps its
    /// original instant and fires on the next tick.
    pub async fn reset_job(&self, uuid: Uuid) -> Result<Job> {
        let job = self
            .store
            .get(uuid)
            .await?
            .ok_or(SchedulerError::JobNotFound(uuid))?;
        if job.status != JobStatus::Failed {
            return Err(SchedulerError::InvalidTransition {
                uuid,
                from: job.status,
                to: JobStatus::Pending,
            });
        }

        let now = self.clock.now();
        let mut change = StatusChange::to(JobStatus::Pending, now);
        if job.job_type.is_repeating() {
            let next_run = self
                .calculator
                .next_fire_time(&ScheduleSpec::of(&job), now)?
                .ok_or_else(|| ScheduleError::Exhausted(job.schedule.clone()))?;
            change = change.with_next_run(Some(next_run));
        }

        match self.store.transition(uuid, &[JobStatus::Failed], &change).await? {
            Some(job) => {
                info!(job_uuid = %uuid, next_run = ?job.next_run, "Reset failed job");
                Ok(job)
            }
            None => Err(self.rejected(uuid, JobStatus::Pending).await),
        }
    }

    /// Atomically take a due job from pending to running.
    ///
    /// The claim is tied to the occurrence in `job`: `None` when the job is no
    /// longer pending, not yet due, or has moved on to another `next_run`.
    pub async fn claim(&self, job: &Job) -> Result<Option<Job>> {
        let now = self.clock.now();
        let Some(next_run) = job.next_run.filter(|_| job.is_due(now)) else {
            return Ok(None);
        };
        let change = StatusChange::to(JobStatus::Running, now).if_next_run(next_run);
        let claimed = self
            .store
            .transition(job.uuid, &[JobStatus::Pending], &change)
            .await?;
        if claimed.is_some() {
            debug!(job_uuid = %job.uuid, "Claimed job");
        }
        Ok(claimed)
    }

    /// Record a successful execution and decide the next state.
    pub async fn finalize_success(&self, job: &Job, output: Value) -> Result<Job> {
        let now = self.clock.now();
        let (status, next_run) = if job.job_type.is_repeating() {
            match self
                .calculator
                .next_fire_time(&ScheduleSpec::of(job), now)?
            {
                Some(next_run) => (JobStatus::Pending, Some(next_run)),
                None => (JobStatus::Completed, None),
            }
        } else {
            (JobStatus::Completed, None)
        };

        let change = StatusChange::to(status, now)
            .with_next_run(next_run)
            .with_last_run(now)
            .with_result(output)
            .counting_run();
        self.settle(job.uuid, change).await
    }

    /// Record a failed execution. `next_run` is left untouched.
    pub async fn finalize_failure(&self, job: &Job, message: &str) -> Result<Job> {
        let now = self.clock.now();
        let change = StatusChange::to(JobStatus::Failed, now)
            .with_last_run(now)
            .with_result(failure_result(message, now))
            .counting_run();
        self.settle(job.uuid, change).await
    }

    /// Claim, dispatch and finalize one job. Store errors end in [`RunOutcome::Aborted`].
    pub async fn run_job(&self, job: Job, dispatcher: &dyn Dispatcher) -> RunOutcome {
        let uuid = job.uuid;
        let claimed = match self.claim(&job).await {
            Ok(Some(claimed)) => claimed,
            Ok(None) => return RunOutcome::NotClaimed,
            Err(e) => {
                error!(job_uuid = %uuid, "Failed to claim job: {}", e);
                return RunOutcome::Aborted {
                    error: e.to_string(),
                };
            }
        };

        let finalized = match dispatcher.dispatch(&claimed).await {
            Ok(output) => self.finalize_success(&claimed, output).await,
            Err(e) => {
                warn!(job_uuid = %uuid, "Job execution failed: {}", e);
                self.finalize_failure(&claimed, &e.to_string()).await
            }
        };

        match finalized {
            Ok(job) => outcome_of(&job),
            Err(e) => {
                error!(job_uuid = %uuid, "Failed to finalize job: {}", e);
                RunOutcome::Aborted {
                    error: e.to_string(),
                }
            }
        }
    }

    /// Running jobs untouched for longer than `older_than`.
    ///
    /// With `fail` set they are moved to failed; otherwise they are only reported.
    pub async fn reconcile_stale(
        &self,
        older_than: chrono::Duration,
        fail: bool,
    ) -> Result<Vec<Job>> {
        let now = self.clock.now();
        let cutoff = now - older_than;
        let mut stale = Vec::new();

        for job in self.store.list_by_status(JobStatus::Running).await? {
            if job.updated_at >= cutoff {
                continue;
            }
            warn!(
                job_uuid = %job.uuid,
                since = %job.updated_at,
                "Job has been running since before the cutoff"
            );
            if !fail {
                stale.push(job);
                continue;
            }

            let change = StatusChange::to(JobStatus::Failed, now)
                .with_result(failure_result("execution interrupted", now));
            match self
                .store
                .transition(job.uuid, &[JobStatus::Running], &change)
                .await?
            {
                Some(failed) => stale.push(failed),
                None => debug!(job_uuid = %job.uuid, "Stale job changed state concurrently"),
            }
        }
        Ok(stale)
    }

    /// Apply a finalize change to a running job.
    ///
    /// A job cancelled mid-run keeps its status; only the outcome is recorded.
    async fn settle(&self, uuid: Uuid, change: StatusChange) -> Result<Job> {
        if let Some(job) = self
            .store
            .transition(uuid, &[JobStatus::Running], &change)
            .await?
        {
            return Ok(job);
        }

        let mut record_only = StatusChange::to(JobStatus::Cancelled, change.at).counting_run();
        record_only.last_run = change.last_run;
        record_only.result = change.result.clone();
        match self
            .store
            .transition(uuid, &[JobStatus::Cancelled], &record_only)
            .await?
        {
            Some(job) => {
                info!(job_uuid = %uuid, "Job was cancelled while running");
                Ok(job)
            }
            None => Err(self.rejected(uuid, change.status).await),
        }
    }

    /// Error for a transition the store refused.
    async fn rejected(&self, uuid: Uuid, to: JobStatus) -> SchedulerError {
        match self.store.get(uuid).await {
            Ok(Some(job)) => SchedulerError::InvalidTransition {
                uuid,
                from: job.status,
                to,
            },
            Ok(None) => SchedulerError::JobNotFound(uuid),
            Err(e) => e.into(),
        }
    }
}

fn failure_result(message: &str, at: DateTime<Utc>) -> Value {
    json!({
        "error": message,
        "timestamp": at,
    })
}

fn outcome_of(job: &Job) -> RunOutcome {
    match (job.status, job.next_run) {
        (JobStatus::Pending, Some(next_run)) => RunOutcome::Rescheduled { next_run },
        (JobStatus::Failed, _) => RunOutcome::Failed {
            error: job.last_error().unwrap_or_default().to_string(),
        },
        (JobStatus::Cancelled, _) => RunOutcome::CancelledDuringRun,
        _ => RunOutcome::Completed,
    }
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
