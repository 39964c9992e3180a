//! Initial job lists for a run.
//!
//! A jobs file is either a JSON array of `{record_id, url}` objects or a TOML
//! document with a `[[jobs]]` array of the same tables.

use std::path::Path;

use serde::Deserialize;

use crate::error::JoblineError;
use crate::job::PendingJob;

const DEMO_BASE_URL: &str = "https://jsonplaceholder.typicode.com/todos";

#[derive(Debug, Deserialize)]
struct JobsFile {
    jobs: Vec<PendingJob>,
}

/// Ten demo jobs against a public JSON placeholder API.
pub fn demo_jobs() -> Vec<PendingJob> {
    (1..=10)
        .map(|i| PendingJob {
            record_id: i.to_string(),
            url: format!("{DEMO_BASE_URL}/{i}"),
        })
        .collect()
}

pub fn load_jobs(path: &Path) -> Result<Vec<PendingJob>, JoblineError> {
    let contents = std::fs::read_to_string(path)?;
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    parse_jobs(&contents, is_json)
}

fn parse_jobs(contents: &str, is_json: bool) -> Result<Vec<PendingJob>, JoblineError> {
    let jobs: Vec<PendingJob> = if is_json {
        serde_json::from_str(contents)?
    } else {
        toml::from_str::<JobsFile>(contents)?.jobs
    };

    let mut seen = std::collections::HashSet::new();
    for job in &jobs {
        if job.record_id.trim().is_empty() {
            return Err(JoblineError::Config("job with empty record_id".into()));
        }
        if !seen.insert(job.record_id.as_str()) {
            return Err(JoblineError::Config(format!(
                "duplicate record_id in jobs file: {}",
                job.record_id
            )));
        }
    }
    Ok(jobs)
}
