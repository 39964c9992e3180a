use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};

use jobline::cli::{Cli, Command};
use jobline::config::PipelineConfig;
use jobline::deadline::DeadlineContext;
use jobline::error::JoblineError;
use jobline::fetch::HttpFetcher;
use jobline::job::{JobRecord, JobStatus, PendingJob, WorkItem};
use jobline::operator::{AutoOperator, TerminalOperator};
use jobline::orchestrator::PipelineOrchestrator;
use jobline::process::{FailurePolicy, SimulatedProcess};
use jobline::retry::{Operator, RetryDriver};
use jobline::store::{JobStore, SqliteJobStore, StoreHandle};
use jobline::ui::{self, PassProgress};
use jobline::{logging, seed};

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start runtime");
            return ExitCode::from(4);
        }
    };

    let code = runtime.block_on(async {
        match execute(cli).await {
            Ok(code) => code,
            Err(e) => {
                error!(error = %e, "aborting");
                e.exit_code()
            }
        }
    });
    // An unanswered operator prompt may still hold a blocking thread.
    runtime.shutdown_timeout(Duration::from_millis(100));
    ExitCode::from(code)
}

async fn execute(cli: Cli) -> Result<u8, JoblineError> {
    let mut config =
        PipelineConfig::load().map_err(|e| JoblineError::Config(format!("{e:#}")))?;
    if let Some(workers) = cli.workers {
        config.worker_count = workers.max(1);
    }
    if let Some(secs) = cli.deadline_secs {
        config.deadline_secs = secs;
    }
    if let Some(path) = &cli.database {
        config.database_path = path.clone();
    }

    let store: Arc<dyn JobStore> = Arc::new(
        SqliteJobStore::open(&config.database_path).map_err(JoblineError::FatalBootstrap)?,
    );

    let jobs: Vec<PendingJob> = match &cli.command {
        Command::Status => {
            ui::print_records(&store.list().await?);
            return Ok(0);
        }
        Command::Run { file } => {
            let jobs = match file {
                Some(path) => seed::load_jobs(path)?,
                None => seed::demo_jobs(),
            };
            for job in &jobs {
                store
                    .insert(&JobRecord::received(&job.record_id, &job.url))
                    .await?;
            }
            info!(jobs = jobs.len(), db = %config.database_path.display(), "jobs registered");
            jobs
        }
        Command::Resume => {
            let jobs = store.query_by_status(&JobStatus::retryable()).await?;
            info!(jobs = jobs.len(), "resuming failed jobs");
            jobs
        }
    };

    let orchestrator = PipelineOrchestrator::new(
        config.worker_count,
        Arc::new(HttpFetcher::new(config.fetch_timeout())?),
        Arc::new(SimulatedProcess::new(FailurePolicy::Rate(
            config.process_failure_rate,
        ))),
        StoreHandle::new(Arc::clone(&store), config.store_timeout()),
    );

    let operator: Arc<dyn Operator> = match cli.fixed_decision() {
        Some(retry) => Arc::new(AutoOperator { retry }),
        None if console::user_attended() => Arc::new(TerminalOperator::new()),
        None => {
            warn!("no terminal attached, failed records will not be retried");
            Arc::new(AutoOperator { retry: false })
        }
    };

    let ctx = DeadlineContext::with_timeout(config.deadline());
    let interrupt = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            interrupt.cancel();
        }
    });

    info!(
        workers = config.worker_count,
        deadline_secs = config.deadline_secs,
        "starting pipeline"
    );
    let mut driver =
        RetryDriver::new(orchestrator, operator).with_observer(Arc::new(PassProgress::new()));
    let batch = jobs.into_iter().map(WorkItem::from).collect();
    let report = driver.run(batch, &ctx).await;

    ui::print_summary(&report);
    Ok(report.termination.exit_code())
}
