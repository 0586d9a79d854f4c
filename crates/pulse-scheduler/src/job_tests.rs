use super::*;
use chrono::TimeZone;
use serde_json::json;

fn sample_job() -> Job {
    let at = Utc.with_ymd_and_hms(2026, 5, 1, 8, 0, 0).unwrap();
    Job {
        uuid: Uuid::new_v4(),
        name: "nightly-digest".to_string(),
        task_uuid: Uuid::new_v4(),
        job_type: JobType::Cron,
        schedule: "0 2 * * *".to_string(),
        period_secs: None,
        timezone: None,
        status: JobStatus::Pending,
        last_run: None,
        next_run: Some(at),
        result: None,
        metadata: json!({}),
        run_count: 0,
        created_at: at,
        updated_at: at,
    }
}

#[test]
fn test_job_type_round_trip_names() {
    for ty in [JobType::Cron, JobType::Scheduled, JobType::Recurring] {
        assert_eq!(ty.as_str().parse::<JobType>().unwrap(), ty);
    }
    assert!("weekly".parse::<JobType>().is_err());
}

#[test]
fn test_job_type_repeating() {
    assert!(JobType::Cron.is_repeating());
    assert!(JobType::Recurring.is_repeating());
    assert!(!JobType::Scheduled.is_repeating());
}

#[test]
fn test_status_transitions() {
    use JobStatus::*;
    assert!(Pending.can_transition_to(Running));
    assert!(Pending.can_transition_to(Cancelled));
    assert!(Running.can_transition_to(Pending));
    assert!(Running.can_transition_to(Completed));
    assert!(Running.can_transition_to(Failed));
    assert!(Failed.can_transition_to(Pending));

    assert!(!Running.can_transition_to(Running));
    assert!(!Pending.can_transition_to(Completed));
    assert!(!Completed.can_transition_to(Pending));
    assert!(!Cancelled.can_transition_to(Pending));
    assert!(!Failed.can_transition_to(Running));
}

#[test]
fn test_terminal_states() {
    assert!(JobStatus::Completed.is_terminal());
    assert!(JobStatus::Cancelled.is_terminal());
    assert!(!JobStatus::Failed.is_terminal());
    assert!(!JobStatus::Pending.is_terminal());
}

#[test]
fn test_job_serializes_type_field() {
    let job = sample_job();
    let value = serde_json::to_value(&job).unwrap();
    assert_eq!(value["type"], "cron");
    assert_eq!(value["status"], "pending");
    assert!(value.get("period_secs").is_none());
}

#[test]
fn test_is_due() {
    let mut job = sample_job();
    let next = job.next_run.unwrap();
    assert!(job.is_due(next));
    assert!(!job.is_due(next - chrono::Duration::seconds(1)));

    job.status = JobStatus::Cancelled;
    assert!(!job.is_due(next));
}

#[test]
fn test_last_error() {
    let mut job = sample_job();
    assert!(job.last_error().is_none());

    job.result = Some(json!({"error": "endpoint returned 500", "timestamp": "2026-05-01T08:00:00Z"}));
    assert_eq!(job.last_error(), Some("endpoint returned 500"));
}

#[test]
fn test_new_job_with_description_merges_metadata() {
    let new = NewJob::new("digest", JobType::Cron, "*/5 * * * *", Uuid::new_v4())
        .with_metadata(json!({"notify": "email"}))
        .with_description("Summarise today's tickets");

    let metadata = new.metadata.unwrap();
    assert_eq!(metadata["notify"], "email");
    assert_eq!(metadata["description"], "Summarise today's tickets");
}

#[test]
fn test_new_job_with_period() {
    let new = NewJob::new("sync", JobType::Recurring, "2026-01-01T00:00:00Z", Uuid::new_v4())
        .with_period(Duration::from_secs(900))
        .with_timezone("Europe/Paris");
    assert_eq!(new.period_secs, Some(900));
    assert_eq!(new.timezone.as_deref(), Some("Europe/Paris"));
}
