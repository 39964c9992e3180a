use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::status::{JobStatus, Stage};

/// Why a work item left the pipeline without reaching `processed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureKind {
    /// The stage operation itself failed (fetch, store update or business process).
    Stage { stage: Stage, message: String },
    /// The item was abandoned because the run deadline expired.
    Timeout { stage: Stage },
}

impl FailureKind {
    /// Status written to the job store for this failure.
    pub fn status(&self) -> JobStatus {
        match self {
            FailureKind::Stage { .. } => JobStatus::Error,
            FailureKind::Timeout { .. } => JobStatus::Timeout,
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            FailureKind::Stage { stage, .. } | FailureKind::Timeout { stage } => *stage,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, FailureKind::Timeout { .. })
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Stage { stage, message } => write!(f, "{stage} failed: {message}"),
            FailureKind::Timeout { stage } => write!(f, "{stage} abandoned: deadline exceeded"),
        }
    }
}

/// A unit of work moving through the pipeline.
///
/// Owned by exactly one worker at a time; ownership moves with the queue handoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub record_id: String,
    pub url: String,
    pub payload: String,
    pub stage: Stage,
}

impl WorkItem {
    pub fn new(record_id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            record_id: record_id.into(),
            url: url.into(),
            payload: String::new(),
            stage: Stage::Fetch,
        }
    }

    /// Rebuild a fresh item from a failure. Prior partial state is discarded.
    pub fn retry(failure: &FailureRecord) -> Self {
        Self::new(failure.record_id.clone(), failure.url.clone())
    }

    /// Move to the next stage. Returns `false` once the item is past `Process`.
    pub fn advance(&mut self) -> bool {
        match self.stage.next() {
            Some(next) => {
                self.stage = next;
                true
            }
            None => false,
        }
    }

    pub fn fail(&self, kind: FailureKind) -> FailureRecord {
        FailureRecord {
            record_id: self.record_id.clone(),
            url: self.url.clone(),
            kind,
        }
    }
}

impl From<PendingJob> for WorkItem {
    fn from(job: PendingJob) -> Self {
        WorkItem::new(job.record_id, job.url)
    }
}

/// Enough data to resubmit a failed item in a later pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub record_id: String,
    pub url: String,
    #[serde(flatten)]
    pub kind: FailureKind,
}

/// A job as stored in the job store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub record_id: String,
    pub url: String,
    pub status: JobStatus,
    pub data: String,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn received(record_id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            record_id: record_id.into(),
            url: url.into(),
            status: JobStatus::Received,
            data: String::new(),
            updated_at: Utc::now(),
        }
    }
}

/// Identifier and source url of a job waiting to be (re)processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingJob {
    pub record_id: String,
    pub url: String,
}

/// The working set of one pass.
pub type Batch = Vec<WorkItem>;
