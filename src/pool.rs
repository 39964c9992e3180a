//! Fixed-size pool of workers running one stage.
//!
//! Every worker of a pool pulls from the same input queue. A successful item is
//! advanced and forwarded to the pool's output; a failed one becomes a
//! [`FailureRecord`] on the failure sink, with its status mirrored into the
//! store. A panicking operation fails only the item it was running. Once the deadline is observed a worker stops running the stage and
//! drains its queue, recording each remaining item as a timeout, so no item is
//! dropped.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::deadline::DeadlineContext;
use crate::job::{FailureKind, FailureRecord, Stage, WorkItem};
use crate::stage::{StageError, StageOperation};
use crate::store::StoreHandle;

type SharedQueue = Arc<Mutex<mpsc::Receiver<WorkItem>>>;

/// Channels and store a pool is wired to.
pub struct Lanes {
    pub input: mpsc::Receiver<WorkItem>,
    /// Next stage's queue, or the completion sink for the last stage.
    pub output: mpsc::Sender<WorkItem>,
    pub failures: mpsc::Sender<FailureRecord>,
    pub store: StoreHandle,
}

/// Per-worker counts, reported when the worker exits.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSummary {
    pub forwarded: usize,
    pub failed: usize,
    pub timed_out: usize,
}

impl std::ops::AddAssign for WorkerSummary {
    fn add_assign(&mut self, rhs: Self) {
        self.forwarded += rhs.forwarded;
        self.failed += rhs.failed;
        self.timed_out += rhs.timed_out;
    }
}

pub struct StagePool {
    stage: Stage,
    workers: JoinSet<WorkerSummary>,
}

impl StagePool {
    /// Start `worker_count` workers (at least one) for `op`.
    pub fn spawn(
        op: Arc<dyn StageOperation>,
        worker_count: usize,
        lanes: Lanes,
        ctx: &DeadlineContext,
    ) -> Self {
        let stage = op.stage();
        let queue: SharedQueue = Arc::new(Mutex::new(lanes.input));
        let mut workers = JoinSet::new();

        for id in 1..=worker_count.max(1) {
            let worker = Worker {
                id,
                op: Arc::clone(&op),
                queue: Arc::clone(&queue),
                output: lanes.output.clone(),
                failures: lanes.failures.clone(),
                store: lanes.store.clone(),
                ctx: ctx.clone(),
            };
            workers.spawn(worker.run());
        }
        debug!(%stage, workers = workers.len(), "pool started");

        Self { stage, workers }
    }

    /// Wait for every worker to exit. After this returns no worker of this pool
    /// will send to its output again.
    pub async fn join(mut self) -> WorkerSummary {
        let mut total = WorkerSummary::default();
        while let Some(joined) = self.workers.join_next().await {
            match joined {
                Ok(summary) => total += summary,
                Err(e) => error!(stage = %self.stage, error = %e, "worker task failed"),
            }
        }
        debug!(
            stage = %self.stage,
            forwarded = total.forwarded,
            failed = total.failed,
            timed_out = total.timed_out,
            "pool drained"
        );
        total
    }
}

struct Worker {
    id: usize,
    op: Arc<dyn StageOperation>,
    queue: SharedQueue,
    output: mpsc::Sender<WorkItem>,
    failures: mpsc::Sender<FailureRecord>,
    store: StoreHandle,
    ctx: DeadlineContext,
}

impl Worker {
    async fn run(self) -> WorkerSummary {
        let stage = self.op.stage();
        let mut summary = WorkerSummary::default();
        let mut draining = false;

        while let Some(mut item) = self.next_item().await {
            if !draining && self.ctx.is_done() {
                warn!(worker = self.id, %stage, "deadline reached, abandoning remaining items");
                draining = true;
            }
            if draining {
                self.abandon(item, stage).await;
                summary.timed_out += 1;
                continue;
            }

            debug!(worker = self.id, %stage, record_id = %item.record_id, "starting");
            let outcome = tokio::select! {
                biased;
                _ = self.ctx.done() => None,
                result = AssertUnwindSafe(self.op.run(&mut item)).catch_unwind() => {
                    Some(result.unwrap_or_else(|payload| {
                        Err(StageError::Panicked {
                            stage,
                            message: panic_message(payload.as_ref()),
                        })
                    }))
                }
            };

            match outcome {
                None => {
                    warn!(worker = self.id, %stage, "deadline reached mid-operation");
                    draining = true;
                    self.abandon(item, stage).await;
                    summary.timed_out += 1;
                }
                Some(Err(e)) => {
                    self.reject(item, stage, e).await;
                    summary.failed += 1;
                }
                Some(Ok(())) => {
                    item.advance();
                    let record_id = item.record_id.clone();
                    if let Err(mpsc::error::SendError(item)) = self.output.send(item).await {
                        self.reject(item, stage, StageError::QueueClosed(stage)).await;
                        summary.failed += 1;
                    } else {
                        debug!(worker = self.id, %stage, %record_id, "done");
                        summary.forwarded += 1;
                    }
                }
            }
        }

        summary
    }

    async fn next_item(&self) -> Option<WorkItem> {
        self.queue.lock().await.recv().await
    }

    async fn reject(&self, item: WorkItem, stage: Stage, err: StageError) {
        error!(worker = self.id, %stage, record_id = %item.record_id, url = %item.url, error = %err, "stage failed");
        let kind = FailureKind::Stage {
            stage,
            message: err.to_string(),
        };
        record_failure(&self.store, &self.failures, item, kind).await;
    }

    async fn abandon(&self, item: WorkItem, stage: Stage) {
        info!(worker = self.id, %stage, record_id = %item.record_id, "timed out");
        record_failure(&self.store, &self.failures, item, FailureKind::Timeout { stage }).await;
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Mirror the failure status into the store and emit the failure record.
///
/// The store write is best-effort; the record is emitted either way.
pub(crate) async fn record_failure(
    store: &StoreHandle,
    failures: &mpsc::Sender<FailureRecord>,
    item: WorkItem,
    kind: FailureKind,
) {
    if let Err(e) = store.mark(&item.record_id, kind.status(), &item.payload).await {
        warn!(record_id = %item.record_id, status = %kind.status(), error = %e, "could not record failure status");
    }
    let record = item.fail(kind);
    if failures.send(record).await.is_err() {
        error!(record_id = %item.record_id, "failure sink closed, failure lost");
    }
}
