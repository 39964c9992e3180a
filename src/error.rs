use thiserror::Error;

use crate::fetch::FetchError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum JoblineError {
    #[error("Config error: {0}")]
    Config(String),

    /// The job store could not be opened; nothing can run.
    #[error("Job store unavailable at startup: {0}")]
    FatalBootstrap(#[source] StoreError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("HTTP client error: {0}")]
    Fetch(#[from] FetchError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl JoblineError {
    /// Process exit code for errors that abort the run.
    pub fn exit_code(&self) -> u8 {
        match self {
            JoblineError::FatalBootstrap(_) => 3,
            _ => 4,
        }
    }
}
