//! Durable record of every job and its latest status.
//!
//! The pipeline only talks to the [`JobStore`] trait. [`SqliteJobStore`] backs
//! the binary; [`MemoryJobStore`] backs tests and dry runs.

mod memory;
mod sqlite;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::job::{JobRecord, JobStatus, PendingJob};

pub use memory::MemoryJobStore;
pub use sqlite::SqliteJobStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("corrupt record {record_id}: {message}")]
    Corrupt { record_id: String, message: String },

    #[error("store connection lock poisoned")]
    Poisoned,

    #[error("store call exceeded its {0}ms budget")]
    Timeout(u64),

    #[error("store task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("store call abandoned by its caller")]
    Abandoned,
}

/// Key-value store of job records keyed by record id.
///
/// Implementations must accept concurrent writes to different keys from many
/// workers at once.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a record, replacing any existing record with the same id.
    async fn insert(&self, record: &JobRecord) -> Result<(), StoreError>;

    async fn update_status(
        &self,
        record_id: &str,
        status: JobStatus,
        data: &str,
    ) -> Result<(), StoreError>;

    async fn query_by_status(&self, statuses: &[JobStatus]) -> Result<Vec<PendingJob>, StoreError>;

    async fn get(&self, record_id: &str) -> Result<Option<JobRecord>, StoreError>;

    async fn list(&self) -> Result<Vec<JobRecord>, StoreError>;
}

/// A shared store plus the time budget applied to every call made through it.
#[derive(Clone)]
pub struct StoreHandle {
    store: Arc<dyn JobStore>,
    budget: Duration,
}

impl StoreHandle {
    pub fn new(store: Arc<dyn JobStore>, budget: Duration) -> Self {
        Self { store, budget }
    }

    /// Write `status` and `data` for `record_id` within the budget.
    pub async fn mark(&self, record_id: &str, status: JobStatus, data: &str) -> Result<(), StoreError> {
        tokio::time::timeout(self.budget, self.store.update_status(record_id, status, data))
            .await
            .map_err(|_| StoreError::Timeout(self.budget.as_millis() as u64))?
    }
}
