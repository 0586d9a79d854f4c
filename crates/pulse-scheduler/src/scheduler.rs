//! Poll loop: finds due jobs on an interval and runs them through the worker pool.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use pulse_config::SchedulerConfig;

use crate::dispatcher::Dispatcher;
use crate::job::Job;
use crate::lifecycle::{JobLifecycle, RunOutcome};
use crate::pool::{JobHandler, WorkerPool};

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Poller settings.
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub poll_interval: Duration,
    pub max_workers: usize,
    pub batch_limit: usize,
    pub stale_running_after: chrono::Duration,
    pub fail_stale_running: bool,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self::from(&SchedulerConfig::default())
    }
}

impl From<&SchedulerConfig> for SchedulerOptions {
    fn from(config: &SchedulerConfig) -> Self {
        let stale_secs = i64::try_from(config.stale_running_after_secs).unwrap_or(i64::MAX);
        Self {
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            max_workers: config.max_workers as usize,
            batch_limit: config.batch_limit as usize,
            stale_running_after: chrono::Duration::try_seconds(stale_secs)
                .unwrap_or(chrono::Duration::MAX),
            fail_stale_running: config.fail_stale_running,
        }
    }
}

/// Result of one poll cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    /// The previous cycle was still running.
    pub skipped: bool,
    /// Due jobs returned by the store.
    pub due: usize,
    /// Per-job outcome, in store order.
    pub outcomes: Vec<(Uuid, RunOutcome)>,
    /// The due-job query failed.
    pub error: Option<String>,
}

impl TickReport {
    /// Jobs this cycle actually executed.
    pub fn executed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| {
                !matches!(outcome, RunOutcome::NotClaimed | RunOutcome::Aborted { .. })
            })
            .count()
    }
}

struct JobRunner {
    lifecycle: Arc<JobLifecycle>,
    dispatcher: Arc<dyn Dispatcher>,
}

#[async_trait]
impl JobHandler for JobRunner {
    async fn handle(&self, job: Job) -> RunOutcome {
        self.lifecycle.run_job(job, self.dispatcher.as_ref()).await
    }
}

/// Clears the in-progress flag when a cycle ends.
struct TickGuard<'a>(&'a AtomicBool);

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Periodically feeds due jobs through the lifecycle.
///
/// Each instance owns its own timer; several schedulers can coexist in one process.
pub struct Scheduler {
    lifecycle: Arc<JobLifecycle>,
    runner: Arc<JobRunner>,
    pool: WorkerPool,
    options: SchedulerOptions,
    tick_in_progress: AtomicBool,
}

impl Scheduler {
    pub fn new(
        lifecycle: Arc<JobLifecycle>,
        dispatcher: Arc<dyn Dispatcher>,
        options: SchedulerOptions,
    ) -> Self {
        Self {
            runner: Arc::new(JobRunner {
                lifecycle: lifecycle.clone(),
                dispatcher,
            }),
            lifecycle,
            pool: WorkerPool::new(options.max_workers),
            options,
            tick_in_progress: AtomicBool::new(false),
        }
    }

    pub fn lifecycle(&self) -> &Arc<JobLifecycle> {
        &self.lifecycle
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn options(&self) -> &SchedulerOptions {
        &self.options
    }

    /// Run one poll cycle.
    ///
    /// Returns a skipped report if another cycle is still in progress. A
    /// cycle with no due jobs performs no writes.
    pub async fn poll_once(&self) -> TickReport {
        if self
            .tick_in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Previous poll cycle still running, skipping tick");
            return TickReport {
                skipped: true,
                ..TickReport::default()
            };
        }
        let _guard = TickGuard(&self.tick_in_progress);

        let jobs = match self.lifecycle.due_jobs(self.options.batch_limit).await {
            Ok(jobs) => jobs,
            Err(e) => {
                error!("Failed to query due jobs: {}", e);
                return TickReport {
                    error: Some(e.to_string()),
                    ..TickReport::default()
                };
            }
        };
        if jobs.is_empty() {
            return TickReport::default();
        }

        let due = jobs.len();
        info!("Processing {} due job(s)", due);
        let outcomes = self.pool.run_batch(jobs, self.runner.clone()).await;

        TickReport {
            skipped: false,
            due,
            outcomes,
            error: None,
        }
    }

    /// Report (or fail) jobs left running by a previous process.
    pub async fn reconcile(&self) {
        match self
            .lifecycle
            .reconcile_stale(
                self.options.stale_running_after,
                self.options.fail_stale_running,
            )
            .await
        {
            Ok(stale) if !stale.is_empty() => {
                warn!(
                    "Found {} stale running job(s) (failed: {})",
                    stale.len(),
                    self.options.fail_stale_running
                );
            }
            Ok(_) => {}
            Err(e) => error!("Stale job reconciliation failed: {}", e),
        }
    }

    /// Poll until `cancel` fires. The first cycle runs immediately.
    ///
    /// A cycle in progress when `cancel` fires is finished before returning.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(
            "Job scheduler started (poll interval: {:?}, workers: {})",
            self.options.poll_interval,
            self.pool.max_workers()
        );
        self.reconcile().await;

        let mut interval = time::interval(self.options.poll_interval.max(MIN_POLL_INTERVAL));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Job scheduler shutting down");
                    break;
                }
                _ = interval.tick() => {
                    let report = self.poll_once().await;
                    if report.due > 0 {
                        debug!(
                            due = report.due,
                            executed = report.executed(),
                            "Poll cycle finished"
                        );
                    }
                }
            }
        }
    }

    /// Start [`Scheduler::run`] on the runtime.
    pub fn spawn(self: Arc<Self>) -> SchedulerHandle {
        let cancel = CancellationToken::new();
        let join = tokio::spawn(self.run(cancel.clone()));
        SchedulerHandle { cancel, join }
    }
}

/// Handle to a spawned scheduler.
pub struct SchedulerHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop scheduling new cycles.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Cancel and wait for the in-flight cycle to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.join.await {
            error!("Job scheduler task failed: {}", e);
        }
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
