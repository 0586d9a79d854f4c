//! Tracing setup and component wiring for Pulse.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use pulse_config::{Config, ConfigValidator, LoggingConfig};
use pulse_scheduler::{
    Clock, ExecutionDispatcher, HttpEndpoint, JobLifecycle, JobStore, MemoryJobStore,
    MemoryRecordStore, RecordStore, ScheduleCalculator, Scheduler, SchedulerOptions, SqliteStore,
    SystemClock,
};

/// Initialize tracing with console and optional file output.
///
/// Console output goes to stderr so command output on stdout stays parseable.
pub(crate) fn init_tracing(config: &LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
    let file_layer = match &config.directory {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let file_appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix("pulse")
                .filename_suffix("log")
                .max_log_files(30)
                .build(dir)?;
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            // Flushes on drop; must outlive the process.
            static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
                std::sync::OnceLock::new();
            let _ = GUARD.set(guard);

            Some(fmt::layer().with_writer(non_blocking).with_ansi(false))
        }
        None => None,
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            config
                .json
                .then(|| fmt::layer().json().with_writer(std::io::stderr)),
        )
        .with(
            (!config.json).then(|| {
                fmt::layer()
                    .with_target(true)
                    .with_writer(std::io::stderr)
            }),
        )
        .with(file_layer)
        .init();

    Ok(())
}

/// Log validation warnings; fail on the first error.
pub(crate) fn validate_config(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    for warning in ConfigValidator::validate(config).into_result()? {
        warn!("Config {}: {}", warning.path, warning.message);
    }
    Ok(())
}

/// Job and record stores selected by `[store]`.
pub(crate) async fn open_stores(
    config: &Config,
) -> Result<(Arc<dyn JobStore>, Arc<dyn RecordStore>), Box<dyn std::error::Error>> {
    if config.store.in_memory {
        warn!("Using in-memory store; jobs will not survive a restart");
        return Ok((
            Arc::new(MemoryJobStore::new()),
            Arc::new(MemoryRecordStore::new()),
        ));
    }

    let store = Arc::new(SqliteStore::open(&config.store.path).await?);
    info!("Job store: {}", config.store.path.display());
    Ok((store.clone(), store))
}

pub(crate) fn build_lifecycle(
    config: &Config,
    jobs: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
) -> Result<Arc<JobLifecycle>, Box<dyn std::error::Error>> {
    let calculator = ScheduleCalculator::from_timezone_name(&config.scheduler.timezone)?;
    Ok(Arc::new(JobLifecycle::new(jobs, calculator, clock)))
}

/// Run the scheduler until Ctrl-C.
pub(crate) async fn run_scheduler(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    info!("Starting Pulse v{}", env!("CARGO_PKG_VERSION"));

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let (jobs, records) = open_stores(&config).await?;
    let lifecycle = build_lifecycle(&config, jobs, clock.clone())?;

    let endpoint = HttpEndpoint::from_config(&config.executor);
    info!("Execution endpoint: {}", endpoint.url());
    let dispatcher = ExecutionDispatcher::new(
        Arc::new(endpoint),
        records,
        clock,
        Duration::from_secs(config.executor.timeout_secs),
    );

    let scheduler = Arc::new(Scheduler::new(
        lifecycle,
        Arc::new(dispatcher),
        SchedulerOptions::from(&config.scheduler),
    ));
    let handle = scheduler.spawn();

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, waiting for in-flight jobs");
    handle.shutdown().await;
    info!("Pulse stopped");
    Ok(())
}
