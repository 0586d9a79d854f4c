//! Execution dispatch: one execution record and one endpoint call per fire.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, warn};
use uuid::Uuid;

use pulse_config::ExecutorConfig;

use crate::clock::Clock;
use crate::error::ExecutionError;
use crate::job::Job;
use crate::record::{ExecutionRecord, RecordStatus, RecordStore};

/// Body sent to the execution endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionRequest {
    pub execution_record_id: Uuid,
    pub instruction_text: String,
    pub job_uuid: Uuid,
    pub task_uuid: Uuid,
    pub metadata: Value,
}

/// The unit of work a job fires into.
#[async_trait]
pub trait ExecutionEndpoint: Send + Sync {
    /// Perform the work and return its output.
    async fn execute(&self, request: &ExecutionRequest) -> Result<Value, ExecutionError>;
}

/// Endpoint reached by an authenticated JSON POST.
pub struct HttpEndpoint {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl HttpEndpoint {
    pub fn new(url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            api_key,
        }
    }

    pub fn from_config(config: &ExecutorConfig) -> Self {
        Self::new(config.endpoint_url.clone(), config.api_key.clone())
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ExecutionEndpoint for HttpEndpoint {
    async fn execute(&self, request: &ExecutionRequest) -> Result<Value, ExecutionError> {
        let mut builder = self.client.post(&self.url).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ExecutionError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ExecutionError::Decode(e.to_string()))?;

        if !status.is_success() {
            return Err(ExecutionError::Status {
                status: status.as_u16(),
                body,
            });
        }

        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&body).unwrap_or(Value::String(body)))
    }
}

/// Runs one fire of a job. Never touches the job's status or `next_run`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Execute `job` once; the returned value becomes the job's `result`.
    async fn dispatch(&self, job: &Job) -> Result<Value, ExecutionError>;
}

/// [`Dispatcher`] that records each fire and calls an [`ExecutionEndpoint`] under a timeout.
pub struct ExecutionDispatcher {
    endpoint: Arc<dyn ExecutionEndpoint>,
    records: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl ExecutionDispatcher {
    pub fn new(
        endpoint: Arc<dyn ExecutionEndpoint>,
        records: Arc<dyn RecordStore>,
        clock: Arc<dyn Clock>,
        timeout: Duration,
    ) -> Self {
        Self {
            endpoint,
            records,
            clock,
            timeout,
        }
    }

    /// `metadata.description` when non-empty, otherwise the job name.
    pub fn instruction_for(job: &Job) -> String {
        job.metadata
            .get("description")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .unwrap_or(&job.name)
            .to_string()
    }

    async fn close_record(
        &self,
        id: Uuid,
        status: RecordStatus,
        output: Option<Value>,
        error: Option<String>,
    ) {
        if let Err(e) = self
            .records
            .finish_record(id, status, output, error, self.clock.now())
            .await
        {
            warn!(record_id = %id, "Failed to close execution record: {}", e);
        }
    }
}

#[async_trait]
impl Dispatcher for ExecutionDispatcher {
    async fn dispatch(&self, job: &Job) -> Result<Value, ExecutionError> {
        let instruction = Self::instruction_for(job);
        let record = ExecutionRecord::start(job, instruction.clone(), self.clock.now());
        self.records.create_record(&record).await?;

        let request = ExecutionRequest {
            execution_record_id: record.id,
            instruction_text: instruction,
            job_uuid: job.uuid,
            task_uuid: job.task_uuid,
            metadata: job.metadata.clone(),
        };

        debug!(job_uuid = %job.uuid, record_id = %record.id, "Dispatching job");
        let outcome = match tokio::time::timeout(self.timeout, self.endpoint.execute(&request)).await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(ExecutionError::Timeout(self.timeout)),
        };

        match outcome {
            Ok(output) => {
                self.close_record(record.id, RecordStatus::Succeeded, Some(output.clone()), None)
                    .await;
                Ok(json!({
                    "execution_record_id": record.id,
                    "output": output,
                }))
            }
            Err(e) => {
                self.close_record(record.id, RecordStatus::Failed, None, Some(e.to_string()))
                    .await;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
#[path = "dispatcher_tests.rs"]
mod tests;
