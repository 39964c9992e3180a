use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use super::{JobStore, StoreError};
use crate::job::{JobRecord, JobStatus, PendingJob};

#[derive(Debug, Default)]
struct Inner {
    records: HashMap<String, JobRecord>,
    history: HashMap<String, Vec<JobStatus>>,
    order: Vec<String>,
}

/// In-process job store that also remembers every status a record went through.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    inner: Mutex<Inner>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every status written for `record_id`, oldest first.
    pub fn history(&self, record_id: &str) -> Vec<JobStatus> {
        self.inner
            .lock()
            .map(|inner| inner.history.get(record_id).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    /// Record ids currently holding `status`.
    pub fn ids_with_status(&self, status: JobStatus) -> Vec<String> {
        let Ok(inner) = self.inner.lock() else {
            return Vec::new();
        };
        inner
            .order
            .iter()
            .filter(|id| inner.records.get(*id).is_some_and(|r| r.status == status))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, record: &JobRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        if !inner.records.contains_key(&record.record_id) {
            inner.order.push(record.record_id.clone());
        }
        inner
            .history
            .entry(record.record_id.clone())
            .or_default()
            .push(record.status);
        inner.records.insert(record.record_id.clone(), record.clone());
        Ok(())
    }

    async fn update_status(
        &self,
        record_id: &str,
        status: JobStatus,
        data: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        let record = inner
            .records
            .get_mut(record_id)
            .ok_or_else(|| StoreError::NotFound(record_id.to_string()))?;
        record.status = status;
        record.data = data.to_string();
        record.updated_at = Utc::now();
        inner
            .history
            .entry(record_id.to_string())
            .or_default()
            .push(status);
        Ok(())
    }

    async fn query_by_status(&self, statuses: &[JobStatus]) -> Result<Vec<PendingJob>, StoreError> {
        let inner = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(inner
            .order
            .iter()
            .filter_map(|id| inner.records.get(id))
            .filter(|r| statuses.contains(&r.status))
            .map(|r| PendingJob {
                record_id: r.record_id.clone(),
                url: r.url.clone(),
            })
            .collect())
    }

    async fn get(&self, record_id: &str) -> Result<Option<JobRecord>, StoreError> {
        let inner = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(inner.records.get(record_id).cloned())
    }

    async fn list(&self) -> Result<Vec<JobRecord>, StoreError> {
        let inner = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(inner
            .order
            .iter()
            .filter_map(|id| inner.records.get(id).cloned())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn update_tracks_history() {
        let store = MemoryJobStore::new();
        store.insert(&JobRecord::received("1", "u1")).await.unwrap();
        store
            .update_status("1", JobStatus::HttpDone, "body")
            .await
            .unwrap();
        store
            .update_status("1", JobStatus::DbUpdated, "body")
            .await
            .unwrap();

        let record = store.get("1").await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::DbUpdated);
        assert_eq!(record.data, "body");
        assert_eq!(
            store.history("1"),
            vec![JobStatus::Received, JobStatus::HttpDone, JobStatus::DbUpdated]
        );
    }

    #[tokio::test]
    async fn update_unknown_record_fails() {
        let store = MemoryJobStore::new();
        let err = store
            .update_status("missing", JobStatus::Error, "")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(id) if id == "missing"));
    }

    #[tokio::test]
    async fn query_by_status_keeps_insertion_order() {
        let store = MemoryJobStore::new();
        for id in ["a", "b", "c", "d"] {
            store.insert(&JobRecord::received(id, format!("u-{id}"))).await.unwrap();
        }
        store.update_status("b", JobStatus::Error, "").await.unwrap();
        store.update_status("d", JobStatus::Timeout, "").await.unwrap();
        store.update_status("c", JobStatus::Processed, "x").await.unwrap();

        let pending = store.query_by_status(&JobStatus::retryable()).await.unwrap();
        let ids: Vec<_> = pending.iter().map(|p| p.record_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "d"]);
        assert_eq!(pending[0].url, "u-b");
        assert_eq!(store.ids_with_status(JobStatus::Processed), vec!["c"]);
    }
}
