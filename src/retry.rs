use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::deadline::{DeadlineContext, DoneReason};
use crate::job::{Batch, FailureKind, FailureRecord, Stage, WorkItem};
use crate::orchestrator::{PassReport, PipelineOrchestrator};

/// Why a retry sequence ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// The last pass had no failures.
    Completed,
    /// The operator chose not to retry the failures.
    Declined,
    /// The run deadline elapsed.
    DeadlineExceeded,
    /// The run was cancelled before its deadline.
    Cancelled,
    /// There was nothing to process.
    EmptyBatch,
}

impl Termination {
    pub fn exit_code(self) -> u8 {
        match self {
            Termination::Completed | Termination::EmptyBatch => 0,
            Termination::Declined => 1,
            Termination::DeadlineExceeded => 2,
            Termination::Cancelled => 130,
        }
    }
}

impl From<DoneReason> for Termination {
    fn from(reason: DoneReason) -> Self {
        match reason {
            DoneReason::DeadlineExceeded => Termination::DeadlineExceeded,
            DoneReason::Cancelled => Termination::Cancelled,
        }
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::Completed => write!(f, "all records processed"),
            Termination::Declined => write!(f, "retry declined by operator"),
            Termination::DeadlineExceeded => write!(f, "global deadline exceeded"),
            Termination::Cancelled => write!(f, "run cancelled"),
            Termination::EmptyBatch => write!(f, "nothing to process"),
        }
    }
}

/// States of the retry driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriverState {
    Running,
    AwaitingOperatorDecision,
    Done(Termination),
}

/// Decides whether the failures of a pass get another pass.
#[async_trait]
pub trait Operator: Send + Sync {
    async fn confirm_retry(&self, failures: &[FailureRecord]) -> bool;
}

/// Hook notified around every pass.
pub trait PassObserver: Send + Sync {
    fn pass_started(&self, _pass: u32, _items: usize) {}
    fn pass_finished(&self, _report: &PassReport) {}
}

pub struct NoopObserver;

impl PassObserver for NoopObserver {}

/// Summary of a whole retry sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub passes: u32,
    pub termination: Termination,
    pub processed: Vec<String>,
    pub remaining: Vec<FailureRecord>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: i64,
}

/// Runs orchestrator passes over a shrinking batch until done.
///
/// Only one pass is in flight at a time. After a pass with failures the
/// operator decides whether those failures become the next batch.
pub struct RetryDriver {
    orchestrator: PipelineOrchestrator,
    operator: Arc<dyn Operator>,
    observer: Arc<dyn PassObserver>,
    state: DriverState,
    history: Vec<DriverState>,
}

impl RetryDriver {
    pub fn new(orchestrator: PipelineOrchestrator, operator: Arc<dyn Operator>) -> Self {
        Self {
            orchestrator,
            operator,
            observer: Arc::new(NoopObserver),
            state: DriverState::Running,
            history: Vec::new(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn PassObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    /// Every state entered so far, oldest first.
    pub fn history(&self) -> &[DriverState] {
        &self.history
    }

    fn enter(&mut self, state: DriverState) {
        self.state = state;
        self.history.push(state);
    }

    /// Drive passes over `batch` under `ctx`, which is shared by every pass.
    pub async fn run(&mut self, batch: Batch, ctx: &DeadlineContext) -> RunReport {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let mut batch = batch;
        let mut passes = 0u32;
        let mut processed = Vec::new();
        let mut remaining: Vec<FailureRecord> = Vec::new();

        self.history.clear();
        self.enter(DriverState::Running);
        info!(%run_id, items = batch.len(), "run started");

        let termination = loop {
            if batch.is_empty() {
                break Termination::EmptyBatch;
            }
            if let Some(reason) = ctx.reason() {
                remaining = batch.iter().map(unstarted).collect();
                break reason.into();
            }

            passes += 1;
            info!(
                pass = passes,
                items = batch.len(),
                remaining_secs = ctx.remaining().as_secs(),
                "starting pass"
            );
            self.observer.pass_started(passes, batch.len());
            let report = self.orchestrator.run_pass(passes, batch, ctx).await;
            self.observer.pass_finished(&report);
            processed.extend(report.processed.iter().cloned());

            if report.is_clean() {
                remaining.clear();
                break Termination::Completed;
            }
            for failure in &report.failures {
                warn!(pass = passes, record_id = %failure.record_id, cause = %failure.kind, "record not processed");
            }
            remaining = report.failures;

            if let Some(reason) = ctx.reason() {
                break reason.into();
            }

            self.enter(DriverState::AwaitingOperatorDecision);
            let decision = tokio::select! {
                biased;
                _ = ctx.done() => None,
                retry = self.operator.confirm_retry(&remaining) => Some(retry),
            };
            match decision {
                None => break ctx.reason().map(Termination::from).unwrap_or(Termination::DeadlineExceeded),
                Some(false) => break Termination::Declined,
                Some(true) => {
                    info!(pass = passes, retrying = remaining.len(), "retrying failed records");
                    batch = remaining.iter().map(WorkItem::retry).collect();
                    self.enter(DriverState::Running);
                }
            }
        };

        self.enter(DriverState::Done(termination));
        match termination {
            Termination::Completed => info!(%run_id, passes, "all records processed"),
            Termination::EmptyBatch => warn!(%run_id, "nothing to process"),
            Termination::Declined => {
                warn!(%run_id, passes, unprocessed = remaining.len(), "retry declined, stopping")
            }
            Termination::DeadlineExceeded => {
                error!(%run_id, passes, unprocessed = remaining.len(), "global deadline exceeded, stopping")
            }
            Termination::Cancelled => {
                warn!(%run_id, passes, unprocessed = remaining.len(), "run cancelled, stopping")
            }
        }

        let finished_at = Utc::now();
        RunReport {
            run_id,
            passes,
            termination,
            processed,
            remaining,
            started_at,
            finished_at,
            duration_ms: (finished_at - started_at).num_milliseconds(),
        }
    }
}

fn unstarted(item: &WorkItem) -> FailureRecord {
    item.fail(FailureKind::Timeout { stage: Stage::Fetch })
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet, VecDeque};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::fetch::{FetchError, Fetcher};
    use crate::job::{JobRecord, JobStatus};
    use crate::process::{BusinessProcess, ProcessError};
    use crate::store::{JobStore, MemoryJobStore, StoreHandle};

    struct OkFetcher;

    #[async_trait]
    impl Fetcher for OkFetcher {
        async fn fetch(&self, url: &str) -> Result<String, FetchError> {
            Ok(url.to_string())
        }
    }

    /// Fails each listed record a fixed number of times, then succeeds.
    struct FlakyProcess {
        remaining_failures: Mutex<HashMap<String, u32>>,
        calls: AtomicU32,
    }

    impl FlakyProcess {
        fn new(plan: &[(&str, u32)]) -> Self {
            Self {
                remaining_failures: Mutex::new(
                    plan.iter().map(|(id, n)| (id.to_string(), *n)).collect(),
                ),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl BusinessProcess for FlakyProcess {
        async fn process(&self, record_id: &str, _payload: &str) -> Result<(), ProcessError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut plan = self.remaining_failures.lock().unwrap();
            match plan.get_mut(record_id) {
                Some(n) if *n > 0 => {
                    *n -= 1;
                    Err(ProcessError {
                        record_id: record_id.to_string(),
                        reason: "flaky".into(),
                    })
                }
                _ => Ok(()),
            }
        }
    }

    /// Answers from a script and records every failure set it was shown.
    struct ScriptedOperator {
        answers: Mutex<VecDeque<bool>>,
        seen: Mutex<Vec<Vec<String>>>,
    }

    impl ScriptedOperator {
        fn new(answers: &[bool]) -> Self {
            Self {
                answers: Mutex::new(answers.iter().copied().collect()),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn seen(&self) -> Vec<Vec<String>> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Operator for ScriptedOperator {
        async fn confirm_retry(&self, failures: &[FailureRecord]) -> bool {
            let mut ids: Vec<_> = failures.iter().map(|f| f.record_id.clone()).collect();
            ids.sort();
            self.seen.lock().unwrap().push(ids);
            self.answers.lock().unwrap().pop_front().unwrap_or(false)
        }
    }

    /// Never answers.
    struct SilentOperator;

    #[async_trait]
    impl Operator for SilentOperator {
        async fn confirm_retry(&self, _failures: &[FailureRecord]) -> bool {
            std::future::pending().await
        }
    }

    async fn driver(
        n: usize,
        process: Arc<dyn BusinessProcess>,
        operator: Arc<dyn Operator>,
    ) -> (Arc<MemoryJobStore>, RetryDriver, Batch) {
        let store = Arc::new(MemoryJobStore::new());
        let mut batch = Vec::new();
        for i in 1..=n {
            let url = format!("http://jobs/{i}");
            store
                .insert(&JobRecord::received(i.to_string(), url.clone()))
                .await
                .unwrap();
            batch.push(WorkItem::new(i.to_string(), url));
        }
        let orch = PipelineOrchestrator::new(
            3,
            Arc::new(OkFetcher),
            process,
            StoreHandle::new(store.clone(), Duration::from_secs(1)),
        );
        (store, RetryDriver::new(orch, operator), batch)
    }

    fn ctx() -> DeadlineContext {
        DeadlineContext::with_timeout(Duration::from_secs(60))
    }

    #[tokio::test]
    async fn clean_first_pass_completes_without_prompt() {
        let operator = Arc::new(ScriptedOperator::new(&[]));
        let (store, mut driver, batch) =
            driver(5, Arc::new(FlakyProcess::new(&[])), operator.clone()).await;

        let report = driver.run(batch, &ctx()).await;

        assert_eq!(report.termination, Termination::Completed);
        assert_eq!(report.passes, 1);
        assert!(report.remaining.is_empty());
        assert_eq!(report.processed.len(), 5);
        assert!(operator.seen().is_empty());
        assert_eq!(
            driver.history(),
            &[DriverState::Running, DriverState::Done(Termination::Completed)]
        );
        assert_eq!(store.ids_with_status(JobStatus::Processed).len(), 5);
    }

    #[tokio::test]
    async fn retry_resubmits_exactly_the_failures() {
        let operator = Arc::new(ScriptedOperator::new(&[true]));
        let process = Arc::new(FlakyProcess::new(&[("2", 1), ("4", 1)]));
        let (store, mut driver, batch) = driver(5, process.clone(), operator.clone()).await;

        let report = driver.run(batch, &ctx()).await;

        assert_eq!(report.termination, Termination::Completed);
        assert_eq!(report.passes, 2);
        assert_eq!(operator.seen(), vec![vec!["2".to_string(), "4".to_string()]]);
        // Five items in the first pass, two in the second.
        assert_eq!(process.calls.load(Ordering::SeqCst), 7);
        assert_eq!(store.ids_with_status(JobStatus::Processed).len(), 5);
        assert_eq!(
            store.history("2"),
            vec![
                JobStatus::Received,
                JobStatus::HttpDone,
                JobStatus::DbUpdated,
                JobStatus::Error,
                JobStatus::HttpDone,
                JobStatus::DbUpdated,
                JobStatus::Processed,
            ]
        );
        assert_eq!(
            driver.history(),
            &[
                DriverState::Running,
                DriverState::AwaitingOperatorDecision,
                DriverState::Running,
                DriverState::Done(Termination::Completed),
            ]
        );
    }

    #[tokio::test]
    async fn declined_retry_stops_with_remaining_failures() {
        let operator = Arc::new(ScriptedOperator::new(&[false]));
        let process = Arc::new(FlakyProcess::new(&[("3", 5)]));
        let (store, mut driver, batch) = driver(4, process, operator).await;

        let report = driver.run(batch, &ctx()).await;

        assert_eq!(report.termination, Termination::Declined);
        assert_eq!(report.passes, 1);
        assert_eq!(report.remaining.len(), 1);
        assert_eq!(report.remaining[0].record_id, "3");
        assert_eq!(report.remaining[0].url, "http://jobs/3");
        assert_eq!(store.get("3").await.unwrap().unwrap().status, JobStatus::Error);
        assert_eq!(driver.state(), DriverState::Done(Termination::Declined));
    }

    #[tokio::test]
    async fn shrinking_batch_over_several_passes() {
        let operator = Arc::new(ScriptedOperator::new(&[true, true, true]));
        let process = Arc::new(FlakyProcess::new(&[("1", 2), ("2", 1)]));
        let (_store, mut driver, batch) = driver(3, process, operator.clone()).await;

        let report = driver.run(batch, &ctx()).await;

        assert_eq!(report.termination, Termination::Completed);
        assert_eq!(report.passes, 3);
        assert_eq!(
            operator.seen(),
            vec![
                vec!["1".to_string(), "2".to_string()],
                vec!["1".to_string()],
            ]
        );
        let processed: HashSet<_> = report.processed.into_iter().collect();
        assert_eq!(processed.len(), 3);
    }

    #[tokio::test]
    async fn empty_batch_terminates_immediately() {
        let operator = Arc::new(ScriptedOperator::new(&[]));
        let (_store, mut driver, _batch) =
            driver(0, Arc::new(FlakyProcess::new(&[])), operator).await;

        let report = driver.run(Vec::new(), &ctx()).await;

        assert_eq!(report.termination, Termination::EmptyBatch);
        assert_eq!(report.passes, 0);
    }

    #[tokio::test]
    async fn expired_deadline_starts_no_pass() {
        let operator = Arc::new(ScriptedOperator::new(&[true]));
        let process = Arc::new(FlakyProcess::new(&[]));
        let (store, mut driver, batch) = driver(3, process.clone(), operator).await;
        let ctx = DeadlineContext::with_timeout(Duration::ZERO);

        let report = driver.run(batch, &ctx).await;

        assert_eq!(report.termination, Termination::DeadlineExceeded);
        assert_eq!(report.passes, 0);
        assert_eq!(report.remaining.len(), 3);
        assert_eq!(process.calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.ids_with_status(JobStatus::Received).len(), 3);
    }

    #[tokio::test]
    async fn cancellation_is_reported_distinctly() {
        let operator = Arc::new(ScriptedOperator::new(&[true]));
        let (_store, mut driver, batch) =
            driver(2, Arc::new(FlakyProcess::new(&[])), operator).await;
        let ctx = ctx();
        ctx.cancel();

        let report = driver.run(batch, &ctx).await;

        assert_eq!(report.termination, Termination::Cancelled);
        assert_eq!(report.termination.exit_code(), 130);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_while_awaiting_operator_ends_run() {
        let process = Arc::new(FlakyProcess::new(&[("1", 1)]));
        let (_store, mut driver, batch) = driver(2, process, Arc::new(SilentOperator)).await;
        let ctx = DeadlineContext::with_timeout(Duration::from_secs(5));

        let report = driver.run(batch, &ctx).await;

        assert_eq!(report.termination, Termination::DeadlineExceeded);
        assert_eq!(report.passes, 1);
        assert_eq!(report.remaining.len(), 1);
        assert_eq!(
            driver.history().last(),
            Some(&DriverState::Done(Termination::DeadlineExceeded))
        );
    }

    #[test]
    fn exit_codes_are_distinct_for_failure_modes() {
        assert_eq!(Termination::Completed.exit_code(), 0);
        assert_eq!(Termination::Declined.exit_code(), 1);
        assert_eq!(Termination::DeadlineExceeded.exit_code(), 2);
        assert_eq!(Termination::EmptyBatch.exit_code(), 0);
    }

    #[test]
    fn run_report_serializes_termination() {
        let now = Utc::now();
        let report = RunReport {
            run_id: Uuid::new_v4(),
            passes: 2,
            termination: Termination::DeadlineExceeded,
            processed: vec!["1".into()],
            remaining: Vec::new(),
            started_at: now,
            finished_at: now,
            duration_ms: 0,
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["termination"], "deadline_exceeded");
        assert_eq!(json["passes"], 2);
    }
}
