mod item;
mod status;

pub use item::{Batch, FailureKind, FailureRecord, JobRecord, PendingJob, WorkItem};
pub use status::{JobStatus, Stage, UnknownStatus};
