//! Operator decisions after a pass with failures.
//!
//! [`TerminalOperator`] asks on the terminal; [`AutoOperator`] answers the same
//! way every time and is used when nobody is attending the run.

use async_trait::async_trait;
use console::{Style, Term};
use tracing::warn;

use crate::job::FailureRecord;
use crate::retry::Operator;

/// Interpret a free-form answer. Only an explicit yes continues.
pub fn normalize_answer(answer: &str) -> bool {
    matches!(
        answer.trim().to_lowercase().as_str(),
        "y" | "yes" | "s" | "sim"
    )
}

/// Fixed decision, no I/O.
#[derive(Debug, Clone, Copy)]
pub struct AutoOperator {
    pub retry: bool,
}

#[async_trait]
impl Operator for AutoOperator {
    async fn confirm_retry(&self, _failures: &[FailureRecord]) -> bool {
        self.retry
    }
}

/// Lists the failures and asks a yes/no question on the terminal.
pub struct TerminalOperator {
    term: Term,
}

impl TerminalOperator {
    pub fn new() -> Self {
        Self {
            term: Term::stdout(),
        }
    }
}

impl Default for TerminalOperator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Operator for TerminalOperator {
    async fn confirm_retry(&self, failures: &[FailureRecord]) -> bool {
        let term = self.term.clone();
        let lines: Vec<String> = failures
            .iter()
            .map(|f| format!("  {} {} ({}): {}", Style::new().red().apply_to("✗"), f.record_id, f.url, f.kind))
            .collect();
        let count = failures.len();

        let answer = tokio::task::spawn_blocking(move || -> std::io::Result<String> {
            term.write_line(&format!("{count} record(s) were not processed:"))?;
            for line in &lines {
                term.write_line(line)?;
            }
            term.write_str("Retry the failed records? (y/n): ")?;
            term.read_line()
        })
        .await;

        match answer {
            Ok(Ok(line)) => normalize_answer(&line),
            Ok(Err(e)) => {
                warn!(error = %e, "could not read operator answer, stopping");
                false
            }
            Err(e) => {
                warn!(error = %e, "operator prompt task failed, stopping");
                false
            }
        }
    }
}
