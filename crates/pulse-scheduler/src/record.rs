//! Execution records: one row per dispatch attempt.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StoreError;
use crate::job::Job;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Running,
    Succeeded,
    Failed,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Running => "running",
            RecordStatus::Succeeded => "succeeded",
            RecordStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RecordStatus::Running),
            "succeeded" => Ok(RecordStatus::Succeeded),
            "failed" => Ok(RecordStatus::Failed),
            other => Err(format!("unknown record status: {other}")),
        }
    }
}

/// A single execution of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: Uuid,
    pub job_uuid: Uuid,
    pub task_uuid: Uuid,
    /// Instruction text sent to the endpoint.
    pub instruction: String,
    pub status: RecordStatus,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ExecutionRecord {
    /// A fresh running record for `job`.
    pub fn start(job: &Job, instruction: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_uuid: job.uuid,
            task_uuid: job.task_uuid,
            instruction: instruction.into(),
            status: RecordStatus::Running,
            output: None,
            error: None,
            started_at: at,
            finished_at: None,
        }
    }
}

/// Storage for execution records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn create_record(&self, record: &ExecutionRecord) -> Result<(), StoreError>;

    /// Close a record with its outcome.
    async fn finish_record(
        &self,
        id: Uuid,
        status: RecordStatus,
        output: Option<Value>,
        error: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn get_record(&self, id: Uuid) -> Result<Option<ExecutionRecord>, StoreError>;

    /// Records of one job, newest first.
    async fn records_for_job(
        &self,
        job_uuid: Uuid,
        limit: usize,
    ) -> Result<Vec<ExecutionRecord>, StoreError>;
}

/// In-memory record store.
#[derive(Default)]
pub struct MemoryRecordStore {
    records: RwLock<HashMap<Uuid, ExecutionRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn create_record(&self, record: &ExecutionRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        records.insert(record.id, record.clone());
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
        let mut records = self.records.write().await;
        let record = records.get_mut(&id).ok_or_else(|| StoreError::Corrupt {
            id: id.to_string(),
            message: "execution record not found".to_string(),
        })?;
        record.status = status;
        record.output = output;
        record.error = error;
        record.finished_at = Some(at);
        Ok(())
    }

    async fn get_record(&self, id: Uuid) -> Result<Option<ExecutionRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(records.get(&id).cloned())
    }

    async fn records_for_job(
        &self,
        job_uuid: Uuid,
        limit: usize,
    ) -> Result<Vec<ExecutionRecord>, StoreError> {
        let records = self.records.read().await;
        let mut matching: Vec<ExecutionRecord> = records
            .values()
            .filter(|r| r.job_uuid == job_uuid)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        matching.truncate(limit);
        Ok(matching)
    }
}
