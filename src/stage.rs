//! The operation each pool runs on its items.
//!
//! A [`StageOperation`] performs one stage for one item and mirrors the success
//! status into the store. Failure handling, cancellation and forwarding belong
//! to the pool in [`crate::pool`].

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::fetch::{FetchError, Fetcher};
use crate::job::{JobStatus, Stage, WorkItem};
use crate::process::{BusinessProcess, ProcessError};
use crate::store::{StoreError, StoreHandle};

#[derive(Debug, Error)]
pub enum StageError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("store failed: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("{0} queue closed before the item could be forwarded")]
    QueueClosed(Stage),

    #[error("{stage} operation panicked: {message}")]
    Panicked { stage: Stage, message: String },
}

#[async_trait]
pub trait StageOperation: Send + Sync {
    fn stage(&self) -> Stage;

    /// Run this stage on `item`. On success the item carries whatever the next
    /// stage needs; the pool advances its stage tag.
    async fn run(&self, item: &mut WorkItem) -> Result<(), StageError>;
}

/// Retrieves `url` and keeps the body as the item payload.
pub struct FetchStage {
    fetcher: Arc<dyn Fetcher>,
    store: StoreHandle,
}

impl FetchStage {
    pub fn new(fetcher: Arc<dyn Fetcher>, store: StoreHandle) -> Self {
        Self { fetcher, store }
    }
}

#[async_trait]
impl StageOperation for FetchStage {
    fn stage(&self) -> Stage {
        Stage::Fetch
    }

    async fn run(&self, item: &mut WorkItem) -> Result<(), StageError> {
        let body = self.fetcher.fetch(&item.url).await?;
        debug!(record_id = %item.record_id, bytes = body.len(), "fetched");
        self.store
            .mark(&item.record_id, JobStatus::HttpDone, &body)
            .await?;
        item.payload = body;
        Ok(())
    }
}

/// Persists the fetched payload.
pub struct UpdateStage {
    store: StoreHandle,
}

impl UpdateStage {
    pub fn new(store: StoreHandle) -> Self {
        Self { store }
    }
}

#[async_trait]
impl StageOperation for UpdateStage {
    fn stage(&self) -> Stage {
        Stage::Update
    }

    async fn run(&self, item: &mut WorkItem) -> Result<(), StageError> {
        self.store
            .mark(&item.record_id, JobStatus::DbUpdated, &item.payload)
            .await?;
        debug!(record_id = %item.record_id, "payload persisted");
        Ok(())
    }
}

/// Runs the business process and records the terminal `processed` status.
pub struct ProcessStage {
    process: Arc<dyn BusinessProcess>,
    store: StoreHandle,
}

impl ProcessStage {
    pub fn new(process: Arc<dyn BusinessProcess>, store: StoreHandle) -> Self {
        Self { process, store }
    }
}

#[async_trait]
impl StageOperation for ProcessStage {
    fn stage(&self) -> Stage {
        Stage::Process
    }

    async fn run(&self, item: &mut WorkItem) -> Result<(), StageError> {
        self.process.process(&item.record_id, &item.payload).await?;
        self.store
            .mark(&item.record_id, JobStatus::Processed, &item.payload)
            .await?;
        Ok(())
    }
}
