//! ---
//! zkb_section: "03-harness"
//! zkb_subsection: "module"
//! zkb_type: "source"
//! zkb_scope: "code"
//! zkb_description: "Benchmark report model and its text/JSON renderings."
//! zkb_version: "v0.1.0"
//! zkb_owner: "tbd"
//! ---
use chrono::{DateTime, Utc};
use serde::Serialize;
use zkb_common::{ChildMode, StopPolicy, SubmissionStrategy};

use crate::worker::{WorkerExit, WorkerSummary};

/// Result of one benchmark run.
#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkReport {
    /// When the workers were started.
    pub started_at: DateTime<Utc>,
    /// Backend label of the session.
    pub backend: String,
    /// Root node the children were created under.
    pub root_path: String,
    /// Workers started.
    pub workers: usize,
    /// Submission strategy.
    pub strategy: SubmissionStrategy,
    /// Creates per unit of work.
    pub ops_per_unit: usize,
    /// How the window was ended.
    pub stop_policy: StopPolicy,
    /// Node flavour of the children.
    pub child_mode: ChildMode,
    /// Duration the rate is computed over.
    pub configured_secs: f64,
    /// Wall time from worker start to the last worker joining.
    pub measured_secs: f64,
    /// Children of the root node after the run.
    pub total_nodes: usize,
    /// `total_nodes / configured_secs`.
    pub ops_per_second: f64,
    /// Sum of per-worker acknowledgements. Diagnostic only.
    pub acknowledged_ops: u64,
    /// Units of work that returned an error.
    pub failed_units: u64,
    /// Whether the window was cut short by an explicit stop.
    pub interrupted: bool,
    /// Per-worker diagnostics in worker order.
    pub worker_summaries: Vec<WorkerSummary>,
}

impl BenchmarkReport {
    /// Workers whose loop ended on an error.
    pub fn failed_workers(&self) -> usize {
        self.worker_summaries
            .iter()
            .filter(|summary| summary.exit != WorkerExit::Stopped)
            .count()
    }

    /// The two-line console report.
    pub fn render_text(&self) -> String {
        format!(
            "Total znodes added: {}\nOperations per second: {:.2}",
            self.total_nodes, self.ops_per_second
        )
    }

    /// Pretty-printed JSON form of the whole report.
    pub fn render_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> BenchmarkReport {
        BenchmarkReport {
            started_at: Utc::now(),
            backend: "memory".into(),
            root_path: "/benchmark".into(),
            workers: 2,
            strategy: SubmissionStrategy::Batched,
            ops_per_unit: 100,
            stop_policy: StopPolicy::Deadline,
            child_mode: ChildMode::EphemeralSequential,
            configured_secs: 10.0,
            measured_secs: 10.02,
            total_nodes: 1234,
            ops_per_second: 123.4,
            acknowledged_ops: 1234,
            failed_units: 1,
            interrupted: false,
            worker_summaries: vec![
                WorkerSummary {
                    worker: 0,
                    units_started: 7,
                    acknowledged: 600,
                    failures: 1,
                    exit: WorkerExit::Stopped,
                },
                WorkerSummary {
                    worker: 1,
                    units_started: 7,
                    acknowledged: 634,
                    failures: 0,
                    exit: WorkerExit::Failed,
                },
            ],
        }
    }

    #[test]
    fn text_report_has_two_lines_with_two_decimals() {
        assert_eq!(
            report().render_text(),
            "Total znodes added: 1234\nOperations per second: 123.40"
        );
    }

    #[test]
    fn json_report_uses_config_spellings() {
        let json: serde_json::Value =
            serde_json::from_str(&report().render_json().expect("json")).expect("parse");
        assert_eq!(json["total_nodes"], 1234);
        assert_eq!(json["strategy"], "batched");
        assert_eq!(json["child_mode"], "ephemeral-sequential");
        assert_eq!(json["worker_summaries"][1]["exit"], "failed");
    }

    #[test]
    fn failed_workers_counts_non_stopped_exits() {
        assert_eq!(report().failed_workers(), 1);
    }
}
