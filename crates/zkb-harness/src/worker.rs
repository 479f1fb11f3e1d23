//! ---
//! zkb_section: "03-harness"
//! zkb_subsection: "module"
//! zkb_type: "source"
//! zkb_scope: "code"
//! zkb_description: "Concurrent workers issuing child creates until stopped."
//! zkb_version: "v0.1.0"
//! zkb_owner: "tbd"
//! ---
use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use zkb_common::{ChildMode, RunConfig, SubmissionStrategy};
use zkb_coord::{BatchOp, CreateMode, CreateRequest, SharedSession};

use crate::stop::StopSignal;

/// How a worker's loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerExit {
    /// Observed the stop signal.
    Stopped,
    /// A single create failed; the worker stopped early.
    Failed,
    /// The worker task panicked. Only assigned at join.
    Panicked,
}

/// Diagnostics collected by one worker. The benchmark count never comes from
/// these; it is always the service's own child listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerSummary {
    /// Worker index, `0..workers`.
    pub worker: usize,
    /// Single creates or multi-ops started.
    pub units_started: u64,
    /// Creates the service acknowledged.
    pub acknowledged: u64,
    /// Units that returned an error.
    pub failures: u64,
    /// How the loop ended.
    pub exit: WorkerExit,
}

impl WorkerSummary {
    fn new(worker: usize) -> Self {
        Self {
            worker,
            units_started: 0,
            acknowledged: 0,
            failures: 0,
            exit: WorkerExit::Stopped,
        }
    }
}

/// Per-run description of what one unit of work submits.
#[derive(Debug, Clone)]
struct WorkPlan {
    strategy: SubmissionStrategy,
    ops_per_unit: usize,
    path_prefix: String,
    mode: CreateMode,
    client_named: bool,
}

impl WorkPlan {
    fn from_config(config: &RunConfig) -> Self {
        let (mode, client_named) = match config.child_mode {
            ChildMode::EphemeralSequential => (CreateMode::EphemeralSequential, false),
            ChildMode::PersistentSequential => (CreateMode::PersistentSequential, false),
            ChildMode::EphemeralCounter => (CreateMode::Ephemeral, true),
        };
        Self {
            strategy: config.strategy,
            ops_per_unit: config.ops_per_unit(),
            path_prefix: config.child_path_prefix(),
            mode,
            client_named,
        }
    }
}

/// Produces the create requests of one worker.
#[derive(Debug)]
struct ChildNamer {
    plan: Arc<WorkPlan>,
    worker: usize,
    next: u64,
}

impl ChildNamer {
    fn next_request(&mut self) -> CreateRequest {
        let path = if self.plan.client_named {
            let path = format!("{}{}_{}", self.plan.path_prefix, self.worker, self.next);
            self.next += 1;
            path
        } else {
            self.plan.path_prefix.clone()
        };
        CreateRequest::new(path, self.plan.mode)
    }

    fn next_batch(&mut self) -> Vec<BatchOp> {
        (0..self.plan.ops_per_unit)
            .map(|_| BatchOp::Create(self.next_request()))
            .collect()
    }
}

struct Worker {
    id: usize,
    session: SharedSession,
    stop: StopSignal,
    namer: ChildNamer,
    summary: WorkerSummary,
}

impl Worker {
    async fn run(mut self) -> WorkerSummary {
        debug!(worker = self.id, "worker started");
        loop {
            if self.stop.is_set() {
                self.summary.exit = WorkerExit::Stopped;
                break;
            }
            self.summary.units_started += 1;
            let keep_going = match self.namer.plan.strategy {
                SubmissionStrategy::Single => self.create_one().await,
                SubmissionStrategy::Batched => self.submit_batch().await,
            };
            if !keep_going {
                self.summary.exit = WorkerExit::Failed;
                break;
            }
        }
        debug!(
            worker = self.id,
            units = self.summary.units_started,
            acknowledged = self.summary.acknowledged,
            failures = self.summary.failures,
            exit = ?self.summary.exit,
            "worker finished"
        );
        self.summary
    }

    async fn create_one(&mut self) -> bool {
        let request = self.namer.next_request();
        match self.session.create(request).await {
            Ok(_) => {
                self.summary.acknowledged += 1;
                true
            }
            Err(err) => {
                self.summary.failures += 1;
                warn!(worker = self.id, error = %err, "create failed; worker exiting");
                false
            }
        }
    }

    async fn submit_batch(&mut self) -> bool {
        let ops = self.namer.next_batch();
        match self.session.submit_batch(ops).await {
            Ok(results) => self.summary.acknowledged += results.len() as u64,
            Err(err) => {
                self.summary.failures += 1;
                if self.summary.failures == 1 {
                    warn!(worker = self.id, error = %err, "multi-op failed; continuing");
                } else {
                    debug!(
                        worker = self.id,
                        failures = self.summary.failures,
                        error = %err,
                        "multi-op failed; continuing"
                    );
                }
            }
        }
        true
    }
}

/// The set of running workers of one benchmark run.
pub struct WorkerPool {
    handles: Vec<(usize, JoinHandle<WorkerSummary>)>,
}

impl WorkerPool {
    /// Start `config.workers` workers sharing `session` and `stop`.
    pub fn spawn(session: SharedSession, config: &RunConfig, stop: StopSignal) -> Self {
        let plan = Arc::new(WorkPlan::from_config(config));
        let handles = (0..config.workers)
            .map(|id| {
                let worker = Worker {
                    id,
                    session: session.clone(),
                    stop: stop.clone(),
                    namer: ChildNamer {
                        plan: plan.clone(),
                        worker: id,
                        next: 0,
                    },
                    summary: WorkerSummary::new(id),
                };
                (id, tokio::spawn(worker.run()))
            })
            .collect::<Vec<_>>();
        info!(
            workers = handles.len(),
            strategy = ?plan.strategy,
            ops_per_unit = plan.ops_per_unit,
            mode = ?plan.mode,
            "workers started"
        );
        Self { handles }
    }

    /// Wait for every worker. A worker that panicked is logged and reported
    /// with [`WorkerExit::Panicked`]; the others are unaffected.
    pub async fn join(self) -> Vec<WorkerSummary> {
        let mut summaries = Vec::with_capacity(self.handles.len());
        for (id, handle) in self.handles {
            match handle.await {
                Ok(summary) => summaries.push(summary),
                Err(err) => {
                    error!(worker = id, error = %err, "worker join error");
                    summaries.push(WorkerSummary {
                        exit: WorkerExit::Panicked,
                        ..WorkerSummary::new(id)
                    });
                }
            }
        }
        summaries
    }
}
