//! ---
//! zkb_section: "03-harness"
//! zkb_subsection: "module"
//! zkb_type: "source"
//! zkb_scope: "code"
//! zkb_description: "End-to-end sequencing of one benchmark run."
//! zkb_version: "v0.1.0"
//! zkb_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{info, warn};
use zkb_common::RunConfig;
use zkb_coord::{Connector, SharedSession};

use crate::aggregate::aggregate;
use crate::bootstrap::{bootstrap, close_session};
use crate::report::BenchmarkReport;
use crate::stop::StopController;
use crate::worker::WorkerPool;
use crate::{HarnessError, Result};

/// Runs one benchmark against whatever [`Connector`] it is handed.
#[derive(Debug, Clone)]
pub struct BenchmarkRunner {
    config: Arc<RunConfig>,
}

impl BenchmarkRunner {
    /// Validate `config` and wrap it for the run.
    pub fn new(config: RunConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|err| HarnessError::Config(err.to_string()))?;
        Ok(Self {
            config: Arc::new(config),
        })
    }

    /// A fresh stop controller for this run. Clone it to stop the run from
    /// elsewhere, e.g. a Ctrl-C handler.
    pub fn stop_controller(&self) -> StopController {
        StopController::new(self.config.stop_policy, self.config.duration)
    }

    /// Run with a controller nobody else holds.
    pub async fn run(&self, connector: &dyn Connector) -> Result<BenchmarkReport> {
        self.run_with(connector, self.stop_controller()).await
    }

    /// Bootstrap, load, stop, join, aggregate. The session is closed on every
    /// path once bootstrap has succeeded.
    pub async fn run_with(
        &self,
        connector: &dyn Connector,
        stop: StopController,
    ) -> Result<BenchmarkReport> {
        let session = bootstrap(connector, &self.config).await?;
        let outcome = self.measure(&session, &stop).await;
        close_session(session.as_ref()).await;
        outcome
    }

    async fn measure(
        &self,
        session: &SharedSession,
        stop: &StopController,
    ) -> Result<BenchmarkReport> {
        let config = &self.config;
        let started_at = Utc::now();
        let started = Instant::now();
        let pool = WorkerPool::spawn(session.clone(), config, stop.arm(started));

        stop.run_window().await;
        let summaries = pool.join().await;
        let measured = started.elapsed();
        let interrupted = stop.is_triggered() && measured < config.duration;
        if interrupted {
            warn!(
                measured_ms = measured.as_millis() as u64,
                "run stopped before its configured duration"
            );
        }

        if !config.settle_delay.is_zero() {
            tokio::time::sleep(config.settle_delay).await;
        }
        let aggregate = aggregate(session.as_ref(), &config.root_path, config.duration).await?;

        let acknowledged_ops = summaries.iter().map(|s| s.acknowledged).sum();
        let failed_units = summaries.iter().map(|s| s.failures).sum();
        let report = BenchmarkReport {
            started_at,
            backend: session.backend().to_owned(),
            root_path: config.root_path.clone(),
            workers: config.workers,
            strategy: config.strategy,
            ops_per_unit: config.ops_per_unit(),
            stop_policy: config.stop_policy,
            child_mode: config.child_mode,
            configured_secs: config.duration.as_secs_f64(),
            measured_secs: measured.as_secs_f64(),
            total_nodes: aggregate.count,
            ops_per_second: aggregate.ops_per_second,
            acknowledged_ops,
            failed_units,
            interrupted,
            worker_summaries: summaries,
        };
        info!(
            total_nodes = report.total_nodes,
            ops_per_second = report.ops_per_second,
            acknowledged_ops = report.acknowledged_ops,
            failed_workers = report.failed_workers(),
            "benchmark complete"
        );
        Ok(report)
    }
}
