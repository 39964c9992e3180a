//! Interface de terminal do jobline — spinners e saída colorida.
//!
//! Usa as crates `indicatif` para spinners de progresso e `console` para
//! estilização com cores. O [`PassProgress`] acompanha visualmente cada
//! passada do pipeline no terminal.

use std::sync::Mutex;

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::error;

use crate::job::{JobRecord, JobStatus};
use crate::orchestrator::PassReport;
use crate::retry::{PassObserver, RunReport, Termination};

/// Indicador visual de progresso das passadas do pipeline.
///
/// Exibe um spinner enquanto a passada roda e uma linha colorida ao final:
/// verde sem falhas, amarelo com falhas.
pub struct PassProgress {
    // Spinner da passada em andamento, se houver.
    pb: Mutex<Option<ProgressBar>>,
    green: Style,
    yellow: Style,
}

impl PassProgress {
    pub fn new() -> Self {
        Self {
            pb: Mutex::new(None),
            green: Style::new().green().bold(),
            yellow: Style::new().yellow(),
        }
    }
}

impl Default for PassProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl PassObserver for PassProgress {
    fn pass_started(&self, pass: u32, items: usize) {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            pb.set_style(style);
        }
        pb.set_message(format!("Pass {pass}: {items} record(s) in flight"));
        pb.enable_steady_tick(std::time::Duration::from_millis(100));
        if let Ok(mut slot) = self.pb.lock() {
            *slot = Some(pb);
        }
    }

    fn pass_finished(&self, report: &PassReport) {
        if let Ok(mut slot) = self.pb.lock()
            && let Some(pb) = slot.take()
        {
            pb.finish_and_clear();
        }
        let processed = report.processed.len();
        let failed = report.failures.len();
        if report.is_clean() {
            println!(
                "  {} Pass {}: {processed} processed",
                self.green.apply_to("✓"),
                report.pass
            );
        } else {
            println!(
                "  {} Pass {}: {processed} processed, {failed} failed ({} timed out)",
                self.yellow.apply_to("↻"),
                report.pass,
                report.timed_out()
            );
        }
    }
}

fn termination_style(termination: Termination) -> Style {
    match termination {
        Termination::Completed => Style::new().green().bold(),
        Termination::EmptyBatch | Termination::Declined => Style::new().yellow(),
        Termination::DeadlineExceeded | Termination::Cancelled => Style::new().red().bold(),
    }
}

/// Imprime o resumo da execução formatado em JSON com estilo colorido.
pub fn print_summary(report: &RunReport) {
    let style = termination_style(report.termination);
    println!();
    println!("{}", style.apply_to(format!("─── {} ───", report.termination)));
    if let Some(json) = summary_json(report) {
        println!("{json}");
    }
}

fn summary_json(report: &RunReport) -> Option<String> {
    serde_json::to_string_pretty(report)
        .inspect_err(|e| error!(run_id = %report.run_id, error = %e, "could not render run summary"))
        .ok()
}

/// Imprime a tabela de registros do banco.
pub fn print_records(records: &[JobRecord]) {
    if records.is_empty() {
        println!("No jobs recorded.");
        return;
    }
    for record in records {
        let style = match record.status {
            JobStatus::Processed => Style::new().green(),
            JobStatus::Error | JobStatus::Timeout => Style::new().red(),
            _ => Style::new().yellow(),
        };
        println!(
            "{:<12} {:<12} {:<25} {}",
            record.record_id,
            style.apply_to(record.status),
            record.updated_at.format("%Y-%m-%d %H:%M:%S"),
            record.url
        );
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;
    use crate::job::{FailureKind, Stage, WorkItem};

    #[test]
    fn summary_lists_unprocessed_records() {
        let now = Utc::now();
        let report = RunReport {
            run_id: Uuid::new_v4(),
            passes: 1,
            termination: Termination::Declined,
            processed: vec!["1".into()],
            remaining: vec![WorkItem::new("2", "http://jobs/2").fail(FailureKind::Timeout {
                stage: Stage::Update,
            })],
            started_at: now,
            finished_at: now,
            duration_ms: 12,
        };

        let json = summary_json(&report).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["termination"], "declined");
        assert_eq!(value["remaining"][0]["record_id"], "2");
        assert_eq!(value["remaining"][0]["kind"], "timeout");
    }
}
