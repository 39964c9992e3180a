use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The three pipeline stages a work item passes through, in order.
///
/// Each item flows through: FETCH → UPDATE → PROCESS
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Fetch,
    Update,
    Process,
}

impl Stage {
    /// The stage that follows this one, or `None` after `Process`.
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Fetch => Some(Stage::Update),
            Stage::Update => Some(Stage::Process),
            Stage::Process => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Fetch => write!(f, "FETCH"),
            Stage::Update => write!(f, "UPDATE"),
            Stage::Process => write!(f, "PROCESS"),
        }
    }
}

/// Status of a job record as persisted in the job store.
///
/// Within one attempt a record moves `received → http_done → db_updated → processed`,
/// or lands on `error`/`timeout`, which makes it eligible for the next attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Received,
    HttpDone,
    DbUpdated,
    Processed,
    Error,
    Timeout,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Received => "received",
            JobStatus::HttpDone => "http_done",
            JobStatus::DbUpdated => "db_updated",
            JobStatus::Processed => "processed",
            JobStatus::Error => "error",
            JobStatus::Timeout => "timeout",
        }
    }

    /// Statuses that mark a record as needing another attempt.
    pub fn retryable() -> [JobStatus; 2] {
        [JobStatus::Error, JobStatus::Timeout]
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown job status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for JobStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "received" => Ok(JobStatus::Received),
            "http_done" => Ok(JobStatus::HttpDone),
            "db_updated" => Ok(JobStatus::DbUpdated),
            "processed" => Ok(JobStatus::Processed),
            "error" => Ok(JobStatus::Error),
            "timeout" => Ok(JobStatus::Timeout),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}
