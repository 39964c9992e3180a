use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::deadline::DeadlineContext;
use crate::fetch::Fetcher;
use crate::job::{Batch, FailureKind, FailureRecord, Stage, WorkItem};
use crate::pool::{Lanes, StagePool, record_failure};
use crate::process::BusinessProcess;
use crate::stage::{FetchStage, ProcessStage, UpdateStage};
use crate::store::StoreHandle;

/// Outcome of one pass over a batch.
///
/// Every record of the batch appears exactly once, either in `processed` or in
/// `failures`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassReport {
    pub pass: u32,
    pub processed: Vec<String>,
    pub failures: Vec<FailureRecord>,
}

impl PassReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn timed_out(&self) -> usize {
        self.failures.iter().filter(|f| f.kind.is_timeout()).count()
    }
}

/// Wires the fetch, update and process pools into a pipeline and runs passes.
pub struct PipelineOrchestrator {
    worker_count: usize,
    fetcher: Arc<dyn Fetcher>,
    process: Arc<dyn BusinessProcess>,
    store: StoreHandle,
}

impl PipelineOrchestrator {
    /// `worker_count` is the size of each of the three pools; zero is raised to one.
    pub fn new(
        worker_count: usize,
        fetcher: Arc<dyn Fetcher>,
        process: Arc<dyn BusinessProcess>,
        store: StoreHandle,
    ) -> Self {
        Self {
            worker_count: worker_count.max(1),
            fetcher,
            process,
            store,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Run one pass over `batch` and collect what succeeded and what failed.
    pub async fn run_pass(&self, pass: u32, batch: Batch, ctx: &DeadlineContext) -> PassReport {
        let total = batch.len();
        if total == 0 {
            return PassReport {
                pass,
                ..Default::default()
            };
        }
        info!(pass, items = total, workers = self.worker_count, "pass started");

        let (fetch_tx, fetch_rx) = mpsc::channel(self.worker_count);
        let (update_tx, update_rx) = mpsc::channel(self.worker_count);
        let (process_tx, process_rx) = mpsc::channel(self.worker_count);
        // One slot per item: each item ends in exactly one of these two sinks.
        let (done_tx, mut done_rx) = mpsc::channel(total);
        let (failure_tx, mut failure_rx) = mpsc::channel(total);

        // Downstream pools first so they are ready before anything is seeded.
        let process_pool = StagePool::spawn(
            Arc::new(ProcessStage::new(Arc::clone(&self.process), self.store.clone())),
            self.worker_count,
            Lanes {
                input: process_rx,
                output: done_tx.clone(),
                failures: failure_tx.clone(),
                store: self.store.clone(),
            },
            ctx,
        );
        let update_pool = StagePool::spawn(
            Arc::new(UpdateStage::new(self.store.clone())),
            self.worker_count,
            Lanes {
                input: update_rx,
                output: process_tx.clone(),
                failures: failure_tx.clone(),
                store: self.store.clone(),
            },
            ctx,
        );
        let fetch_pool = StagePool::spawn(
            Arc::new(FetchStage::new(Arc::clone(&self.fetcher), self.store.clone())),
            self.worker_count,
            Lanes {
                input: fetch_rx,
                output: update_tx.clone(),
                failures: failure_tx.clone(),
                store: self.store.clone(),
            },
            ctx,
        );

        let producer = tokio::spawn(seed(
            batch,
            fetch_tx,
            failure_tx.clone(),
            self.store.clone(),
            ctx.clone(),
        ));
        match producer.await {
            Ok(seeded) => debug!(pass, seeded, "fetch queue closed"),
            Err(e) => error!(pass, error = %e, "seeding task failed"),
        }

        // A queue is closed only after every pool feeding it has exited.
        fetch_pool.join().await;
        drop(update_tx);
        update_pool.join().await;
        drop(process_tx);
        process_pool.join().await;
        drop(done_tx);
        drop(failure_tx);

        let mut processed = Vec::with_capacity(total);
        while let Some(item) = done_rx.recv().await {
            processed.push(item.record_id);
        }

        let mut seen = HashSet::new();
        let mut failures = Vec::new();
        while let Some(failure) = failure_rx.recv().await {
            if seen.insert(failure.record_id.clone()) {
                failures.push(failure);
            } else {
                warn!(pass, record_id = %failure.record_id, "duplicate failure ignored");
            }
        }

        let report = PassReport {
            pass,
            processed,
            failures,
        };
        info!(
            pass,
            processed = report.processed.len(),
            failed = report.failures.len(),
            timed_out = report.timed_out(),
            "pass finished"
        );
        report
    }
}

/// Feed the batch into the fetch queue, giving up on the deadline.
///
/// Items that never made it into the queue are recorded as fetch timeouts.
/// Dropping `queue` on return closes the fetch queue.
async fn seed(
    batch: Batch,
    queue: mpsc::Sender<WorkItem>,
    failures: mpsc::Sender<FailureRecord>,
    store: StoreHandle,
    ctx: DeadlineContext,
) -> usize {
    let mut seeded = 0;
    let mut items = batch.into_iter();

    while let Some(item) = items.next() {
        let permit = tokio::select! {
            biased;
            _ = ctx.done() => None,
            permit = queue.reserve() => permit.ok(),
        };
        match permit {
            Some(permit) => {
                permit.send(item);
                seeded += 1;
            }
            None => {
                warn!(unsent = items.len() + 1, "seeding stopped early");
                for item in std::iter::once(item).chain(items.by_ref()) {
                    record_failure(&store, &failures, item, FailureKind::Timeout { stage: Stage::Fetch })
                        .await;
                }
                break;
            }
        }
    }

    seeded
}
