//! SQLite-backed job and execution record store.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{OptionalExtension, Row, params, params_from_iter};
use serde_json::Value;
use tokio_rusqlite::Connection;
use tracing::debug;
use uuid::Uuid;

use crate::error::StoreError;
use crate::job::{Job, JobStatus};
use crate::record::{ExecutionRecord, RecordStatus, RecordStore};
use crate::store::{JobStore, NextRun, StatusChange};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    uuid TEXT PRIMARY KEY,
    task_uuid TEXT NOT NULL,
    name TEXT NOT NULL,
    type TEXT NOT NULL,
    schedule TEXT NOT NULL,
    period_secs INTEGER,
    timezone TEXT,
    status TEXT NOT NULL,
    last_run TEXT,
    next_run TEXT,
    result TEXT,
    metadata TEXT NOT NULL DEFAULT '{}',
    run_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
CREATE INDEX IF NOT EXISTS idx_jobs_next_run ON jobs(next_run);
CREATE INDEX IF NOT EXISTS idx_jobs_status_next_run ON jobs(status, next_run);

CREATE TABLE IF NOT EXISTS execution_records (
    id TEXT PRIMARY KEY,
    job_uuid TEXT NOT NULL,
    task_uuid TEXT NOT NULL,
    instruction TEXT NOT NULL,
    status TEXT NOT NULL,
    output TEXT,
    error TEXT,
    started_at TEXT NOT NULL,
    finished_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_execution_records_job ON execution_records(job_uuid);
"#;

const JOB_COLUMNS: &str = "uuid, task_uuid, name, type, schedule, period_secs, timezone, status, \
     last_run, next_run, result, metadata, run_count, created_at, updated_at";

const RECORD_COLUMNS: &str =
    "id, job_uuid, task_uuid, instruction, status, output, error, started_at, finished_at";

/// Job and execution record store on a single SQLite database.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (or create) a database file, creating parent directories.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                StoreError::Database(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }

        debug!("Opening job database at {:?}", path);
        let conn = Connection::open(path).await?;
        Self::init(conn).await
    }

    /// Private in-memory database.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }

    async fn query_jobs(&self, sql: String, args: Vec<SqlValue>) -> Result<Vec<Job>, StoreError> {
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params_from_iter(args), JobRow::read)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        rows.into_iter().map(JobRow::decode).collect()
    }
}

/// Fixed-width UTC text so lexical order matches time order.
///
/// Only holds for years 0000 through 9999; the schedule calculator never
/// produces instants outside that range.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(id: &str, value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| corrupt(id, format!("bad timestamp '{value}': {e}")))
}

fn parse_optional_timestamp(
    id: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, StoreError> {
    value.map(|v| parse_timestamp(id, &v)).transpose()
}

fn parse_uuid(id: &str, value: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(value).map_err(|e| corrupt(id, format!("bad uuid '{value}': {e}")))
}

fn parse_json(value: Option<String>) -> Result<Option<Value>, StoreError> {
    Ok(value.map(|v| serde_json::from_str(&v)).transpose()?)
}

fn corrupt(id: &str, message: String) -> StoreError {
    StoreError::Corrupt {
        id: id.to_string(),
        message,
    }
}

/// Column values of a `jobs` row before validation.
struct JobRow {
    uuid: String,
    task_uuid: String,
    name: String,
    job_type: String,
    schedule: String,
    period_secs: Option<i64>,
    timezone: Option<String>,
    status: String,
    last_run: Option<String>,
    next_run: Option<String>,
    result: Option<String>,
    metadata: String,
    run_count: i64,
    created_at: String,
    updated_at: String,
}

impl JobRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            uuid: row.get(0)?,
            task_uuid: row.get(1)?,
            name: row.get(2)?,
            job_type: row.get(3)?,
            schedule: row.get(4)?,
            period_secs: row.get(5)?,
            timezone: row.get(6)?,
            status: row.get(7)?,
            last_run: row.get(8)?,
            next_run: row.get(9)?,
            result: row.get(10)?,
            metadata: row.get(11)?,
            run_count: row.get(12)?,
            created_at: row.get(13)?,
            updated_at: row.get(14)?,
        })
    }

    fn decode(self) -> Result<Job, StoreError> {
        let id = self.uuid.as_str();
        Ok(Job {
            uuid: parse_uuid(id, &self.uuid)?,
            name: self.name,
            task_uuid: parse_uuid(id, &self.task_uuid)?,
            job_type: self.job_type.parse().map_err(|e| corrupt(id, e))?,
            schedule: self.schedule,
            period_secs: self
                .period_secs
                .map(u64::try_from)
                .transpose()
                .map_err(|e| corrupt(id, format!("bad period: {e}")))?,
            timezone: self.timezone,
            status: self.status.parse().map_err(|e| corrupt(id, e))?,
            last_run: parse_optional_timestamp(id, self.last_run)?,
            next_run: parse_optional_timestamp(id, self.next_run)?,
            result: parse_json(self.result)?,
            metadata: serde_json::from_str(&self.metadata)?,
            run_count: u64::try_from(self.run_count)
                .map_err(|e| corrupt(id, format!("bad run count: {e}")))?,
            created_at: parse_timestamp(id, &self.created_at)?,
            updated_at: parse_timestamp(id, &self.updated_at)?,
        })
    }
}

#[async_trait]
impl JobStore for SqliteStore {
    async fn insert(&self, job: &Job) -> Result<(), StoreError> {
        let args: Vec<SqlValue> = vec![
            SqlValue::Text(job.uuid.to_string()),
            SqlValue::Text(job.task_uuid.to_string()),
            SqlValue::Text(job.name.clone()),
            SqlValue::Text(job.job_type.as_str().to_string()),
            SqlValue::Text(job.schedule.clone()),
            job.period_secs
                .and_then(|p| i64::try_from(p).ok())
                .map_or(SqlValue::Null, SqlValue::Integer),
            job.timezone.clone().map_or(SqlValue::Null, SqlValue::Text),
            SqlValue::Text(job.status.as_str().to_string()),
            job.last_run
                .map_or(SqlValue::Null, |at| SqlValue::Text(timestamp(at))),
            job.next_run
                .map_or(SqlValue::Null, |at| SqlValue::Text(timestamp(at))),
            match &job.result {
                Some(result) => SqlValue::Text(serde_json::to_string(result)?),
                None => SqlValue::Null,
            },
            SqlValue::Text(serde_json::to_string(&job.metadata)?),
            SqlValue::Integer(i64::try_from(job.run_count).unwrap_or(i64::MAX)),
            SqlValue::Text(timestamp(job.created_at)),
            SqlValue::Text(timestamp(job.updated_at)),
        ];

        self.conn
            .call(move |conn| {
                conn.execute(
                    &format!(
                        "INSERT INTO jobs ({JOB_COLUMNS}) VALUES \
                         (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"
                    ),
                    params_from_iter(args),
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn get(&self, uuid: Uuid) -> Result<Option<Job>, StoreError> {
        let mut jobs = self
            .query_jobs(
                format!("SELECT {JOB_COLUMNS} FROM jobs WHERE uuid = ?1"),
                vec![SqlValue::Text(uuid.to_string())],
            )
            .await?;
        Ok(jobs.pop())
    }

    async fn list(&self) -> Result<Vec<Job>, StoreError> {
        self.query_jobs(
            format!("SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at ASC, uuid ASC"),
            Vec::new(),
        )
        .await
    }

    async fn list_by_status(&self, status: JobStatus) -> Result<Vec<Job>, StoreError> {
        self.query_jobs(
            format!(
                "SELECT {JOB_COLUMNS} FROM jobs WHERE status = ?1 \
                 ORDER BY created_at ASC, uuid ASC"
            ),
            vec![SqlValue::Text(status.as_str().to_string())],
        )
        .await
    }

    async fn due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Job>, StoreError> {
        self.query_jobs(
            format!(
                "SELECT {JOB_COLUMNS} FROM jobs \
                 WHERE status = 'pending' AND next_run IS NOT NULL AND next_run <= ?1 \
                 ORDER BY next_run ASC, created_at ASC LIMIT ?2"
            ),
            vec![
                SqlValue::Text(timestamp(now)),
                SqlValue::Integer(i64::try_from(limit).unwrap_or(i64::MAX)),
            ],
        )
        .await
    }

    async fn transition(
        &self,
        uuid: Uuid,
        from: &[JobStatus],
        change: &StatusChange,
    ) -> Result<Option<Job>, StoreError> {
        if from.is_empty() {
            return Ok(None);
        }

        let (set_next_run, next_run) = match change.next_run {
            NextRun::Keep => (false, None),
            NextRun::Set(next_run) => (true, next_run),
        };
        let mut args: Vec<SqlValue> = vec![
            SqlValue::Text(change.status.as_str().to_string()),
            SqlValue::Integer(i64::from(set_next_run)),
            next_run.map_or(SqlValue::Null, |at| SqlValue::Text(timestamp(at))),
            change
                .last_run
                .map_or(SqlValue::Null, |at| SqlValue::Text(timestamp(at))),
            match &change.result {
                Some(result) => SqlValue::Text(serde_json::to_string(result)?),
                None => SqlValue::Null,
            },
            SqlValue::Integer(i64::from(change.count_run)),
            SqlValue::Text(timestamp(change.at)),
            SqlValue::Text(uuid.to_string()),
            change
                .expect_next_run
                .map_or(SqlValue::Null, |at| SqlValue::Text(timestamp(at))),
        ];
        let placeholders: Vec<String> = (0..from.len())
            .map(|i| format!("?{}", args.len() + i + 1))
            .collect();
        args.extend(
            from.iter()
                .map(|status| SqlValue::Text(status.as_str().to_string())),
        );

        let sql = format!(
            "UPDATE jobs SET status = ?1, \
                 next_run = CASE WHEN ?2 THEN ?3 ELSE next_run END, \
                 last_run = COALESCE(?4, last_run), \
                 result = COALESCE(?5, result), \
                 run_count = run_count + ?6, \
                 updated_at = ?7 \
             WHERE uuid = ?8 AND (?9 IS NULL OR next_run = ?9) AND status IN ({}) \
             RETURNING {JOB_COLUMNS}",
            placeholders.join(", ")
        );

        let row = self
            .conn
            .call(move |conn| {
                let row = conn
                    .query_row(&sql, params_from_iter(args), JobRow::read)
                    .optional()?;
                Ok(row)
            })
            .await?;
        row.map(JobRow::decode).transpose()
    }
}

/// Column values of an `execution_records` row before validation.
struct RecordRow {
    id: String,
    job_uuid: String,
    task_uuid: String,
    instruction: String,
    status: String,
    output: Option<String>,
    error: Option<String>,
    started_at: String,
    finished_at: Option<String>,
}

impl RecordRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            job_uuid: row.get(1)?,
            task_uuid: row.get(2)?,
            instruction: row.get(3)?,
            status: row.get(4)?,
            output: row.get(5)?,
            error: row.get(6)?,
            started_at: row.get(7)?,
            finished_at: row.get(8)?,
        })
    }

    fn decode(self) -> Result<ExecutionRecord, StoreError> {
        let id = self.id.as_str();
        Ok(ExecutionRecord {
            id: parse_uuid(id, &self.id)?,
            job_uuid: parse_uuid(id, &self.job_uuid)?,
            task_uuid: parse_uuid(id, &self.task_uuid)?,
            instruction: self.instruction,
            status: self.status.parse().map_err(|e| corrupt(id, e))?,
            output: parse_json(self.output)?,
            error: self.error,
            started_at: parse_timestamp(id, &self.started_at)?,
            finished_at: parse_optional_timestamp(id, self.finished_at)?,
        })
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn create_record(&self, record: &ExecutionRecord) -> Result<(), StoreError> {
        let output = record
            .output
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let record = record.clone();

        self.conn
            .call(move |conn| {
                conn.execute(
                    &format!(
                        "INSERT INTO execution_records ({RECORD_COLUMNS}) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
                    ),
                    params![
                        record.id.to_string(),
                        record.job_uuid.to_string(),
                        record.task_uuid.to_string(),
                        record.instruction,
                        record.status.as_str(),
                        output,
                        record.error,
                        timestamp(record.started_at),
                        record.finished_at.map(timestamp),
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn finish_record(
        &self,
        id: Uuid,
        status: RecordStatus,
        output: Option<Value>,
        error: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let output = output.as_ref().map(serde_json::to_string).transpose()?;

        let changed = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE execution_records \
                     SET status = ?1, output = ?2, error = ?3, finished_at = ?4 \
                     WHERE id = ?5",
                    params![status.as_str(), output, error, timestamp(at), id.to_string()],
                )?;
                Ok(changed)
            })
            .await?;

        if changed == 0 {
            return Err(corrupt(
                &id.to_string(),
                "execution record not found".to_string(),
            ));
        }
        Ok(())
    }

    async fn get_record(&self, id: Uuid) -> Result<Option<ExecutionRecord>, StoreError> {
        let row = self
            .conn
            .call(move |conn| {
                let row = conn
                    .query_row(
                        &format!("SELECT {RECORD_COLUMNS} FROM execution_records WHERE id = ?1"),
                        params![id.to_string()],
                        RecordRow::read,
                    )
                    .optional()?;
                Ok(row)
            })
            .await?;
        row.map(RecordRow::decode).transpose()
    }

    async fn records_for_job(
        &self,
        job_uuid: Uuid,
        limit: usize,
    ) -> Result<Vec<ExecutionRecord>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {RECORD_COLUMNS} FROM execution_records WHERE job_uuid = ?1 \
                     ORDER BY started_at DESC LIMIT ?2"
                ))?;
                let rows = stmt
                    .query_map(params![job_uuid.to_string(), limit], RecordRow::read)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        rows.into_iter().map(RecordRow::decode).collect()
    }
}

#[cfg(test)]
#[path = "sqlite_tests.rs"]
mod tests;
