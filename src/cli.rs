//! CLI definitions for Pulse.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use uuid::Uuid;

use pulse_scheduler::{JobStatus, JobType};

/// Pulse CLI.
#[derive(Parser)]
#[command(name = "pulse")]
#[command(about = "Job scheduling and execution engine")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "pulse.toml", env = "PULSE_CONFIG", global = true)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Run the scheduler in foreground (default)
    Run,

    /// Job management commands
    Job {
        #[command(subcommand)]
        action: JobAction,
    },
}

#[derive(Subcommand)]
pub(crate) enum JobAction {
    /// Create a job
    Create {
        /// Human-readable name
        #[arg(long)]
        name: String,

        /// Schedule type (cron, scheduled, recurring)
        #[arg(long = "type")]
        job_type: JobType,

        /// Cron expression, or ISO-8601 instant for scheduled/recurring jobs
        #[arg(long)]
        schedule: String,

        /// Unit-of-work template the job refers to (generated when omitted)
        #[arg(long)]
        task_uuid: Option<Uuid>,

        /// Period in seconds (recurring jobs)
        #[arg(long)]
        period_secs: Option<u64>,

        /// IANA timezone overriding the configured default
        #[arg(long)]
        timezone: Option<String>,

        /// Instruction sent to the execution endpoint
        #[arg(long)]
        description: Option<String>,

        /// Extra metadata as a JSON object
        #[arg(long)]
        metadata: Option<String>,
    },

    /// Show a job
    Get {
        /// Job UUID
        uuid: Uuid,
    },

    /// List jobs
    List {
        /// Only jobs in this status
        #[arg(long)]
        status: Option<JobStatus>,
    },

    /// Cancel a pending or running job
    Cancel {
        /// Job UUID
        uuid: Uuid,
    },

    /// Move a failed job back to pending
    Reset {
        /// Job UUID
        uuid: Uuid,
    },

    /// Show recent executions of a job
    Runs {
        /// Job UUID
        uuid: Uuid,

        /// Maximum number of executions
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}
