//! The business operation run in the last pipeline stage.
//!
//! Failure here is an expected outcome, not an exceptional one. The bundled
//! [`SimulatedProcess`] decides success through an injectable [`FailurePolicy`]
//! so tests can force either outcome.

use async_trait::async_trait;
use rand::Rng;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("processing {record_id} failed: {reason}")]
pub struct ProcessError {
    pub record_id: String,
    pub reason: String,
}

#[async_trait]
pub trait BusinessProcess: Send + Sync {
    async fn process(&self, record_id: &str, payload: &str) -> Result<(), ProcessError>;
}

/// When a simulated process reports failure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FailurePolicy {
    Never,
    Always,
    /// Fail with the given probability, clamped to `[0, 1]`.
    Rate(f64),
}

impl FailurePolicy {
    fn should_fail(self) -> bool {
        match self {
            FailurePolicy::Never => false,
            FailurePolicy::Always => true,
            FailurePolicy::Rate(p) if p.is_nan() => false,
            FailurePolicy::Rate(p) => rand::thread_rng().gen_bool(p.clamp(0.0, 1.0)),
        }
    }
}

/// Stand-in business process that fails according to its [`FailurePolicy`].
#[derive(Debug, Clone)]
pub struct SimulatedProcess {
    policy: FailurePolicy,
}

impl SimulatedProcess {
    pub fn new(policy: FailurePolicy) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl BusinessProcess for SimulatedProcess {
    async fn process(&self, record_id: &str, _payload: &str) -> Result<(), ProcessError> {
        if self.policy.should_fail() {
            return Err(ProcessError {
                record_id: record_id.to_string(),
                reason: "simulated processing failure".into(),
            });
        }
        Ok(())
    }
}
