use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::{JobStore, StoreError};
use crate::job::{JobRecord, JobStatus, PendingJob};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS jobs (
    record_id  TEXT PRIMARY KEY,
    url        TEXT NOT NULL,
    status     TEXT NOT NULL,
    data       TEXT NOT NULL DEFAULT '',
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS jobs_status ON jobs (status);
";

/// SQLite-backed job store.
///
/// The connection is shared behind a mutex and every call runs on the blocking
/// pool, so concurrent workers are serialized at the connection. A call whose
/// future is dropped before it gets the connection (budget elapsed, deadline
/// fired) never runs, so it cannot land after a later write to the same record.
#[derive(Clone)]
pub struct SqliteJobStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteJobStore {
    /// Open (or create) the database file and make sure the schema exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn call<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let guard = AbandonOnDrop(Arc::new(AtomicBool::new(false)));
        let abandoned = Arc::clone(&guard.0);
        let result = tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|_| StoreError::Poisoned)?;
            // Checked while holding the connection: any write issued after the
            // caller gave up queues behind us or finds the flag set.
            if abandoned.load(Ordering::SeqCst) {
                return Err(StoreError::Abandoned);
            }
            f(&conn)
        })
        .await;
        drop(guard);
        result?
    }
}

/// Flags a blocking store call as abandoned when its caller's future is dropped.
struct AbandonOnDrop(Arc<AtomicBool>);

impl Drop for AbandonOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<(String, String, String, String, DateTime<Utc>)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn to_record(
    (record_id, url, status, data, updated_at): (String, String, String, String, DateTime<Utc>),
) -> Result<JobRecord, StoreError> {
    let status = status.parse::<JobStatus>().map_err(|e| StoreError::Corrupt {
        record_id: record_id.clone(),
        message: e.to_string(),
    })?;
    Ok(JobRecord {
        record_id,
        url,
        status,
        data,
        updated_at,
    })
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn insert(&self, record: &JobRecord) -> Result<(), StoreError> {
        let record = record.clone();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO jobs (record_id, url, status, data, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(record_id) DO UPDATE SET
                    url = excluded.url,
                    status = excluded.status,
                    data = excluded.data,
                    updated_at = excluded.updated_at",
                params![
                    record.record_id,
                    record.url,
                    record.status.as_str(),
                    record.data,
                    record.updated_at
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn update_status(
        &self,
        record_id: &str,
        status: JobStatus,
        data: &str,
    ) -> Result<(), StoreError> {
        let record_id = record_id.to_string();
        let data = data.to_string();
        self.call(move |conn| {
            let changed = conn.execute(
                "UPDATE jobs SET status = ?1, data = ?2, updated_at = ?3 WHERE record_id = ?4",
                params![status.as_str(), data, Utc::now(), record_id],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(record_id));
            }
            Ok(())
        })
        .await
    }

    async fn query_by_status(&self, statuses: &[JobStatus]) -> Result<Vec<PendingJob>, StoreError> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let names: Vec<&'static str> = statuses.iter().map(|s| s.as_str()).collect();
        self.call(move |conn| {
            let placeholders = vec!["?"; names.len()].join(", ");
            let sql = format!(
                "SELECT record_id, url FROM jobs WHERE status IN ({placeholders}) ORDER BY rowid"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(rusqlite::params_from_iter(names.iter()), |row| {
                Ok(PendingJob {
                    record_id: row.get(0)?,
                    url: row.get(1)?,
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    async fn get(&self, record_id: &str) -> Result<Option<JobRecord>, StoreError> {
        let record_id = record_id.to_string();
        self.call(move |conn| {
            let raw = conn
                .query_row(
                    "SELECT record_id, url, status, data, updated_at FROM jobs WHERE record_id = ?1",
                    params![record_id],
                    record_from_row,
                )
                .optional()?;
            raw.map(to_record).transpose()
        })
        .await
    }

    async fn list(&self) -> Result<Vec<JobRecord>, StoreError> {
        self.call(|conn| {
            let mut stmt = conn.prepare(
                "SELECT record_id, url, status, data, updated_at FROM jobs ORDER BY rowid",
            )?;
            let raw = stmt
                .query_map([], record_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            raw.into_iter().map(to_record).collect()
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::store::StoreHandle;
    use tempfile::TempDir;

    #[tokio::test]
    async fn insert_and_update_roundtrip_on_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("jobs.db");

        let store = SqliteJobStore::open(&path).unwrap();
        store.insert(&JobRecord::received("1", "http://x/1")).await.unwrap();
        store
            .update_status("1", JobStatus::HttpDone, "{\"id\":1}")
            .await
            .unwrap();
        drop(store);

        let reopened = SqliteJobStore::open(&path).unwrap();
        let record = reopened.get("1").await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::HttpDone);
        assert_eq!(record.data, "{\"id\":1}");
        assert_eq!(record.url, "http://x/1");
    }

    #[tokio::test]
    async fn reinsert_resets_record() {
        let store = SqliteJobStore::open_in_memory().unwrap();
        store.insert(&JobRecord::received("1", "u")).await.unwrap();
        store.update_status("1", JobStatus::Error, "").await.unwrap();
        store.insert(&JobRecord::received("1", "u2")).await.unwrap();

        let all = store.list().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].status, JobStatus::Received);
        assert_eq!(all[0].url, "u2");
    }

    #[tokio::test]
    async fn update_missing_record_is_not_found() {
        let store = SqliteJobStore::open_in_memory().unwrap();
        let err = store
            .update_status("nope", JobStatus::Processed, "")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn query_by_status_filters() {
        let store = SqliteJobStore::open_in_memory().unwrap();
        for id in ["1", "2", "3"] {
            store.insert(&JobRecord::received(id, format!("u{id}"))).await.unwrap();
        }
        store.update_status("1", JobStatus::Timeout, "").await.unwrap();
        store.update_status("3", JobStatus::Error, "").await.unwrap();

        let pending = store.query_by_status(&JobStatus::retryable()).await.unwrap();
        let ids: Vec<_> = pending.into_iter().map(|p| p.record_id).collect();
        assert_eq!(ids, vec!["1", "3"]);

        assert!(store.query_by_status(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_updates_to_different_keys() {
        let store = Arc::new(SqliteJobStore::open_in_memory().unwrap());
        for i in 0..20 {
            store
                .insert(&JobRecord::received(i.to_string(), "u"))
                .await
                .unwrap();
        }

        let mut handles = Vec::new();
        for i in 0..20 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .update_status(&i.to_string(), JobStatus::Processed, "done")
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let processed = store.query_by_status(&[JobStatus::Processed]).await.unwrap();
        assert_eq!(processed.len(), 20);
    }

    #[tokio::test]
    async fn timed_out_write_does_not_land_after_failure_write() {
        let store = SqliteJobStore::open_in_memory().unwrap();
        store.insert(&JobRecord::received("1", "u")).await.unwrap();

        let (locked_tx, locked_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let conn = Arc::clone(&store.conn);
        let holder = std::thread::spawn(move || {
            let _conn = conn.lock().unwrap();
            locked_tx.send(()).unwrap();
            let _ = release_rx.recv();
        });
        locked_rx.recv().unwrap();

        let handle = StoreHandle::new(Arc::new(store.clone()), Duration::from_millis(50));
        let err = handle
            .mark("1", JobStatus::HttpDone, "body")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Timeout(50)));

        let failure = {
            let store = store.clone();
            tokio::spawn(async move { store.update_status("1", JobStatus::Error, "").await })
        };
        release_tx.send(()).unwrap();
        holder.join().unwrap();
        failure.await.unwrap().unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        let record = store.get("1").await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Error);
        assert_eq!(record.data, "");
    }
}
