use super::*;
use crate::clock::ManualClock;
use crate::dispatcher::MockDispatcher;
use crate::error::ExecutionError;
use crate::job::JobType;
use crate::store::MemoryJobStore;
use async_trait::async_trait;
use chrono::{Duration, TimeZone};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap()
}

fn setup() -> (JobLifecycle, Arc<MemoryJobStore>, Arc<ManualClock>) {
    let store = Arc::new(MemoryJobStore::new());
    let clock = Arc::new(ManualClock::new(t0()));
    let lifecycle = JobLifecycle::new(store.clone(), ScheduleCalculator::default(), clock.clone());
    (lifecycle, store, clock)
}

fn every_five_minutes() -> NewJob {
    NewJob::new("poll-feeds", JobType::Cron, "*/5 * * * *", Uuid::new_v4())
}

fn succeeding() -> MockDispatcher {
    let mut dispatcher = MockDispatcher::new();
    dispatcher
        .expect_dispatch()
        .returning(|_| Ok(json!({"reply": "done"})));
    dispatcher
}

fn failing() -> MockDispatcher {
    let mut dispatcher = MockDispatcher::new();
    dispatcher
        .expect_dispatch()
        .returning(|_| Err(ExecutionError::Network("connection reset".to_string())));
    dispatcher
}

#[tokio::test]
async fn test_create_cron_job() {
    let (lifecycle, _, _) = setup();
    let job = lifecycle.create_job(every_five_minutes()).await.unwrap();

    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.next_run, Some(t0() + Duration::minutes(5)));
    assert_eq!(job.metadata, json!({}));
    assert_eq!(job.run_count, 0);
    assert_eq!(lifecycle.get_job(job.uuid).await.unwrap(), Some(job));
}

#[tokio::test]
async fn test_create_rejects_invalid_cron_without_persisting() {
    let (lifecycle, _, _) = setup();
    let new = NewJob::new("bad", JobType::Cron, "not-a-cron-expression", Uuid::new_v4());

    let err = lifecycle.create_job(new).await.unwrap_err();
    assert!(matches!(
        err,
        SchedulerError::InvalidSchedule(ScheduleError::InvalidCron { .. })
    ));
    assert!(lifecycle.list_jobs(None).await.unwrap().is_empty());
    assert!(lifecycle.get_job(Uuid::new_v4()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_create_scheduled_job() {
    let (lifecycle, _, _) = setup();

    let future = NewJob::new("launch", JobType::Scheduled, "2026-06-02T08:00:00Z", Uuid::new_v4());
    let job = lifecycle.create_job(future).await.unwrap();
    assert_eq!(job.next_run, Some(Utc.with_ymd_and_hms(2026, 6, 2, 8, 0, 0).unwrap()));

    let past = NewJob::new("late", JobType::Scheduled, "2026-05-01T08:00:00Z", Uuid::new_v4());
    let err = lifecycle.create_job(past).await.unwrap_err();
    assert!(matches!(
        err,
        SchedulerError::InvalidSchedule(ScheduleError::PastInstant(_))
    ));
    assert_eq!(lifecycle.list_jobs(None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_create_recurring_requires_period() {
    let (lifecycle, _, _) = setup();
    let anchor = "2026-06-01T00:00:00Z";

    let missing = NewJob::new("backup", JobType::Recurring, anchor, Uuid::new_v4());
    assert!(matches!(
        lifecycle.create_job(missing).await.unwrap_err(),
        SchedulerError::InvalidSchedule(ScheduleError::MissingPeriod)
    ));

    let hourly = NewJob::new("backup", JobType::Recurring, anchor, Uuid::new_v4())
        .with_period(std::time::Duration::from_secs(3600));
    let job = lifecycle.create_job(hourly).await.unwrap();
    assert_eq!(job.next_run, Some(t0() + Duration::hours(1)));
}

#[tokio::test]
async fn test_create_recurring_with_oversized_period_is_rejected() {
    let (lifecycle, _, _) = setup();
    let new = NewJob::new("backup", JobType::Recurring, "2026-01-01T00:00:00Z", Uuid::new_v4())
        .with_period(std::time::Duration::from_secs(9_000_000_000_000_000));

    assert!(matches!(
        lifecycle.create_job(new).await.unwrap_err(),
        SchedulerError::InvalidSchedule(ScheduleError::PeriodTooLong(_))
    ));
    assert!(lifecycle.list_jobs(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_create_keeps_metadata() {
    let (lifecycle, _, _) = setup();
    let new = every_five_minutes()
        .with_metadata(json!({"notify": "ops"}))
        .with_description("Fetch new feed items");
    let job = lifecycle.create_job(new).await.unwrap();
    assert_eq!(job.metadata["notify"], "ops");
    assert_eq!(job.metadata["description"], "Fetch new feed items");
}

#[tokio::test]
async fn test_claim_is_exclusive() {
    let (lifecycle, _, clock) = setup();
    let job = lifecycle.create_job(every_five_minutes()).await.unwrap();

    assert!(lifecycle.claim(&job).await.unwrap().is_none());

    clock.advance(Duration::minutes(5));
    let claimed = lifecycle.claim(&job).await.unwrap().unwrap();
    assert_eq!(claimed.status, JobStatus::Running);
    assert!(lifecycle.claim(&job).await.unwrap().is_none());
}

#[tokio::test]
async fn test_stale_snapshot_does_not_refire_occurrence() {
    let (lifecycle, store, clock) = setup();
    let job = lifecycle.create_job(every_five_minutes()).await.unwrap();
    clock.advance(Duration::minutes(5));

    let first = lifecycle.due_jobs(10).await.unwrap();
    let second = lifecycle.due_jobs(10).await.unwrap();

    let mut dispatcher = MockDispatcher::new();
    dispatcher
        .expect_dispatch()
        .times(1)
        .returning(|_| Ok(json!("ok")));

    assert_eq!(
        lifecycle.run_job(first[0].clone(), &dispatcher).await,
        RunOutcome::Rescheduled {
            next_run: t0() + Duration::minutes(10)
        }
    );
    assert_eq!(
        lifecycle.run_job(second[0].clone(), &dispatcher).await,
        RunOutcome::NotClaimed
    );

    let job = store.get(job.uuid).await.unwrap().unwrap();
    assert_eq!(job.run_count, 1);
    assert_eq!(job.next_run, Some(t0() + Duration::minutes(10)));
}

#[tokio::test]
async fn test_not_due_job_is_not_dispatched() {
    let (lifecycle, store, clock) = setup();
    let job = lifecycle.create_job(every_five_minutes()).await.unwrap();
    clock.advance(Duration::minutes(1));

    let mut dispatcher = MockDispatcher::new();
    dispatcher.expect_dispatch().times(0);

    let outcome = lifecycle.run_job(job.clone(), &dispatcher).await;
    assert_eq!(outcome, RunOutcome::NotClaimed);
    assert_eq!(store.get(job.uuid).await.unwrap(), Some(job));
}

#[tokio::test]
async fn test_cron_success_reschedules() {
    let (lifecycle, _, clock) = setup();
    let job = lifecycle.create_job(every_five_minutes()).await.unwrap();

    clock.advance(Duration::minutes(5));
    let outcome = lifecycle.run_job(job.clone(), &succeeding()).await;
    assert_eq!(
        outcome,
        RunOutcome::Rescheduled {
            next_run: t0() + Duration::minutes(10)
        }
    );

    let job = lifecycle.get_job(job.uuid).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.last_run, Some(t0() + Duration::minutes(5)));
    assert_eq!(job.next_run, Some(t0() + Duration::minutes(10)));
    assert_eq!(job.result, Some(json!({"reply": "done"})));
    assert_eq!(job.run_count, 1);
}

#[tokio::test]
async fn test_scheduled_success_completes() {
    let (lifecycle, _, clock) = setup();
    let new = NewJob::new("once", JobType::Scheduled, "2026-06-01T12:30:00Z", Uuid::new_v4());
    let job = lifecycle.create_job(new).await.unwrap();

    clock.advance(Duration::minutes(30));
    assert_eq!(lifecycle.run_job(job.clone(), &succeeding()).await, RunOutcome::Completed);

    let job = lifecycle.get_job(job.uuid).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.next_run, None);

    clock.advance(Duration::days(1));
    assert!(lifecycle.due_jobs(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_failure_keeps_next_run() {
    let (lifecycle, _, clock) = setup();
    let job = lifecycle.create_job(every_five_minutes()).await.unwrap();
    let next_run = job.next_run;

    clock.advance(Duration::minutes(5));
    let outcome = lifecycle.run_job(job.clone(), &failing()).await;
    match outcome {
        RunOutcome::Failed { error } => assert!(error.contains("connection reset")),
        other => panic!("expected failure, got {other:?}"),
    }

    let job = lifecycle.get_job(job.uuid).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.next_run, next_run);
    assert_eq!(job.last_run, Some(t0() + Duration::minutes(5)));
    assert!(!job.last_error().unwrap().is_empty());
    assert!(job.result.as_ref().unwrap().get("timestamp").is_some());

    clock.advance(Duration::hours(1));
    assert!(lifecycle.due_jobs(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_cancel_pending_job() {
    let (lifecycle, _, clock) = setup();
    let job = lifecycle.create_job(every_five_minutes()).await.unwrap();

    let cancelled = lifecycle.cancel_job(job.uuid).await.unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);

    clock.advance(Duration::minutes(10));
    assert!(lifecycle.due_jobs(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_cancel_rejected_for_terminal_or_missing() {
    let (lifecycle, _, _) = setup();
    let job = lifecycle.create_job(every_five_minutes()).await.unwrap();
    lifecycle.cancel_job(job.uuid).await.unwrap();

    assert!(matches!(
        lifecycle.cancel_job(job.uuid).await.unwrap_err(),
        SchedulerError::InvalidTransition {
            from: JobStatus::Cancelled,
            to: JobStatus::Cancelled,
            ..
        }
    ));

    let missing = Uuid::new_v4();
    assert!(matches!(
        lifecycle.cancel_job(missing).await.unwrap_err(),
        SchedulerError::JobNotFound(uuid) if uuid == missing
    ));
}

/// Cancels the job through the store while "executing" it.
struct CancellingDispatcher {
    store: Arc<MemoryJobStore>,
}

#[async_trait]
impl Dispatcher for CancellingDispatcher {
    async fn dispatch(&self, job: &Job) -> std::result::Result<Value, ExecutionError> {
        let change = StatusChange::to(JobStatus::Cancelled, job.updated_at);
        self.store
            .transition(job.uuid, &[JobStatus::Running], &change)
            .await?;
        Ok(json!("finished anyway"))
    }
}

#[tokio::test]
async fn test_cancel_during_run_records_outcome_only() {
    let (lifecycle, store, clock) = setup();
    let job = lifecycle.create_job(every_five_minutes()).await.unwrap();
    let next_run = job.next_run;

    clock.advance(Duration::minutes(5));
    let dispatcher = CancellingDispatcher {
        store: store.clone(),
    };
    assert_eq!(
        lifecycle.run_job(job.clone(), &dispatcher).await,
        RunOutcome::CancelledDuringRun
    );

    let job = lifecycle.get_job(job.uuid).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    assert_eq!(job.next_run, next_run);
    assert_eq!(job.result, Some(json!("finished anyway")));
    assert_eq!(job.last_run, Some(t0() + Duration::minutes(5)));
    assert_eq!(job.run_count, 1);
}

#[tokio::test]
async fn test_reset_failed_cron_job() {
    let (lifecycle, _, clock) = setup();
    let job = lifecycle.create_job(every_five_minutes()).await.unwrap();
    clock.advance(Duration::minutes(5));
    lifecycle.run_job(job.clone(), &failing()).await;

    clock.advance(Duration::minutes(12));
    let reset = lifecycle.reset_job(job.uuid).await.unwrap();
    assert_eq!(reset.status, JobStatus::Pending);
    assert_eq!(reset.next_run, Some(t0() + Duration::minutes(20)));
    assert_eq!(reset.run_count, 1);

    assert!(matches!(
        lifecycle.reset_job(job.uuid).await.unwrap_err(),
        SchedulerError::InvalidTransition {
            from: JobStatus::Pending,
            to: JobStatus::Pending,
            ..
        }
    ));
}

#[tokio::test]
async fn test_reset_failed_scheduled_job_fires_again() {
    let (lifecycle, _, clock) = setup();
    let new = NewJob::new("once", JobType::Scheduled, "2026-06-01T12:01:00Z", Uuid::new_v4());
    let job = lifecycle.create_job(new).await.unwrap();
    clock.advance(Duration::minutes(1));
    lifecycle.run_job(job.clone(), &failing()).await;

    let reset = lifecycle.reset_job(job.uuid).await.unwrap();
    assert_eq!(reset.next_run, job.next_run);
    assert_eq!(lifecycle.due_jobs(10).await.unwrap().len(), 1);

    assert_eq!(lifecycle.run_job(reset, &succeeding()).await, RunOutcome::Completed);
}

#[tokio::test]
async fn test_reset_missing_job() {
    let (lifecycle, _, _) = setup();
    assert!(matches!(
        lifecycle.reset_job(Uuid::new_v4()).await.unwrap_err(),
        SchedulerError::JobNotFound(_)
    ));
}

#[tokio::test]
async fn test_list_jobs_by_status() {
    let (lifecycle, _, _) = setup();
    let a = lifecycle.create_job(every_five_minutes()).await.unwrap();
    let b = lifecycle.create_job(every_five_minutes()).await.unwrap();
    lifecycle.cancel_job(b.uuid).await.unwrap();

    assert_eq!(lifecycle.list_jobs(None).await.unwrap().len(), 2);
    let pending = lifecycle.list_jobs(Some(JobStatus::Pending)).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].uuid, a.uuid);
}

#[tokio::test]
async fn test_reconcile_stale_running_jobs() {
    let (lifecycle, store, clock) = setup();
    let stale = lifecycle.create_job(every_five_minutes()).await.unwrap();
    clock.advance(Duration::minutes(5));
    lifecycle.claim(&stale).await.unwrap().unwrap();

    clock.advance(Duration::hours(2));
    let fresh = lifecycle.create_job(every_five_minutes()).await.unwrap();
    clock.advance(Duration::minutes(5));
    lifecycle.claim(&fresh).await.unwrap().unwrap();

    let reported = lifecycle
        .reconcile_stale(Duration::hours(1), false)
        .await
        .unwrap();
    assert_eq!(reported.len(), 1);
    assert_eq!(reported[0].uuid, stale.uuid);
    assert_eq!(reported[0].status, JobStatus::Running);

    let failed = lifecycle
        .reconcile_stale(Duration::hours(1), true)
        .await
        .unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].status, JobStatus::Failed);
    assert_eq!(failed[0].last_error(), Some("execution interrupted"));

    let fresh = store.get(fresh.uuid).await.unwrap().unwrap();
    assert_eq!(fresh.status, JobStatus::Running);
}
