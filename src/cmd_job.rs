//! Job subcommand handlers for Pulse.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use pulse_config::Config;
use pulse_scheduler::{JobLifecycle, NewJob, RecordStore, SystemClock};

use crate::cli::JobAction;
use crate::server::{build_lifecycle, open_stores};

/// Handle job subcommands. Every command prints JSON on stdout.
pub(crate) async fn handle_job_command(
    action: JobAction,
    config: &Config,
) -> Result<(), Box<dyn std::error::Error>> {
    let (jobs, records) = open_stores(config).await?;
    let lifecycle = build_lifecycle(config, jobs, Arc::new(SystemClock))?;

    match action {
        JobAction::Create {
            name,
            job_type,
            schedule,
            task_uuid,
            period_secs,
            timezone,
            description,
            metadata,
        } => {
            let mut new = NewJob::new(
                name,
                job_type,
                schedule,
                task_uuid.unwrap_or_else(Uuid::new_v4),
            );
            new.period_secs = period_secs;
            new.timezone = timezone;
            if let Some(metadata) = metadata {
                new = new.with_metadata(parse_metadata(&metadata)?);
            }
            if let Some(description) = description {
                new = new.with_description(description);
            }
            print_json(&lifecycle.create_job(new).await?)
        }
        JobAction::Get { uuid } => print_json(&lifecycle.get_job(uuid).await?),
        JobAction::List { status } => print_json(&lifecycle.list_jobs(status).await?),
        JobAction::Cancel { uuid } => print_json(&lifecycle.cancel_job(uuid).await?),
        JobAction::Reset { uuid } => print_json(&lifecycle.reset_job(uuid).await?),
        JobAction::Runs { uuid, limit } => job_runs(&lifecycle, records.as_ref(), uuid, limit).await,
    }
}

async fn job_runs(
    lifecycle: &JobLifecycle,
    records: &dyn RecordStore,
    uuid: Uuid,
    limit: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    if lifecycle.get_job(uuid).await?.is_none() {
        return Err(format!("Job not found: {}", uuid).into());
    }
    print_json(&records.records_for_job(uuid, limit).await?)
}

fn parse_metadata(raw: &str) -> Result<Value, Box<dyn std::error::Error>> {
    match serde_json::from_str(raw)? {
        Value::Object(map) => Ok(Value::Object(map)),
        _ => Err("--metadata must be a JSON object".into()),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
