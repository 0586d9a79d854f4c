//! # Pulse Scheduler
//!
//! Turns declarative schedules (cron expressions, one-time instants, recurring
//! periods) into executions of background work and tracks their lifecycle.
//!
//! ## Components
//!
//! - [`ScheduleCalculator`]: next fire time for a `(type, schedule, timezone)` triple
//! - [`JobStore`]: persisted jobs ([`MemoryJobStore`], [`SqliteStore`])
//! - [`ExecutionDispatcher`]: creates an execution record and calls the execution endpoint
//! - [`JobLifecycle`]: the job state machine (claim, finalize, cancel, reset)
//! - [`Scheduler`]: the poll loop feeding due jobs through a bounded [`WorkerPool`]
//!
//! ## Deployment
//!
//! A claim is a compare-and-swap on the job row's status and `next_run`, so
//! each occurrence of a job is claimed at most once, even by a worker acting
//! on an outdated list of due jobs. Running several scheduler processes
//! against one database is not supported.

pub mod clock;
pub mod dispatcher;
pub mod error;
pub mod job;
pub mod lifecycle;
pub mod pool;
pub mod record;
pub mod schedule;
pub mod scheduler;
pub mod sqlite;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use dispatcher::{
    Dispatcher, ExecutionDispatcher, ExecutionEndpoint, ExecutionRequest, HttpEndpoint,
};
pub use error::{ExecutionError, Result, ScheduleError, SchedulerError, StoreError};
pub use job::{Job, JobStatus, JobType, NewJob};
pub use lifecycle::{JobLifecycle, RunOutcome};
pub use pool::{JobHandler, WorkerPool};
pub use record::{ExecutionRecord, MemoryRecordStore, RecordStatus, RecordStore};
pub use schedule::{ScheduleCalculator, ScheduleSpec};
pub use scheduler::{Scheduler, SchedulerHandle, SchedulerOptions, TickReport};
pub use sqlite::SqliteStore;
pub use store::{JobStore, MemoryJobStore, NextRun, StatusChange};
