//! Bounded worker pool for due jobs.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error};
use uuid::Uuid;

use crate::job::Job;
use crate::lifecycle::RunOutcome;

/// Runs a single job to completion.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: Job) -> RunOutcome;
}

/// Runs jobs concurrently, at most `max_workers` at a time.
pub struct WorkerPool {
    max_workers: usize,
    semaphore: Arc<Semaphore>,
    total_processed: Arc<AtomicU64>,
    total_failed: Arc<AtomicU64>,
}

impl WorkerPool {
    pub fn new(max_workers: usize) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            max_workers,
            semaphore: Arc::new(Semaphore::new(max_workers)),
            total_processed: Arc::new(AtomicU64::new(0)),
            total_failed: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Number of idle workers.
    pub fn available_workers(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Jobs that reached a handler outcome.
    pub fn total_processed(&self) -> u64 {
        self.total_processed.load(Ordering::SeqCst)
    }

    /// Jobs that ended failed or aborted.
    pub fn total_failed(&self) -> u64 {
        self.total_failed.load(Ordering::SeqCst)
    }

    /// Run every job and wait for all of them.
    ///
    /// Jobs start in the given order as workers free up. Outcomes are
    /// returned in the same order.
    pub async fn run_batch(
        &self,
        jobs: Vec<Job>,
        handler: Arc<dyn JobHandler>,
    ) -> Vec<(Uuid, RunOutcome)> {
        let mut running: Vec<(Uuid, JoinHandle<RunOutcome>)> = Vec::with_capacity(jobs.len());
        let mut outcomes = Vec::with_capacity(jobs.len());

        for job in jobs {
            let uuid = job.uuid;
            let permit = match self.semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    error!(job_uuid = %uuid, "Worker pool unavailable: {}", e);
                    outcomes.push((
                        uuid,
                        RunOutcome::Aborted {
                            error: e.to_string(),
                        },
                    ));
                    continue;
                }
            };

            debug!(job_uuid = %uuid, "Submitting job to worker pool");
            let handler = handler.clone();
            running.push((
                uuid,
                tokio::spawn(async move {
                    let outcome = handler.handle(job).await;
                    drop(permit);
                    outcome
                }),
            ));
        }

        for (uuid, handle) in running {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(job_uuid = %uuid, "Worker task failed: {}", e);
                    RunOutcome::Aborted {
                        error: e.to_string(),
                    }
                }
            };
            self.record(&outcome);
            outcomes.push((uuid, outcome));
        }
        outcomes
    }

    fn record(&self, outcome: &RunOutcome) {
        self.total_processed.fetch_add(1, Ordering::SeqCst);
        if matches!(outcome, RunOutcome::Failed { .. } | RunOutcome::Aborted { .. }) {
            self.total_failed.fetch_add(1, Ordering::SeqCst);
        }
    }
}
