//! ---
//! zkb_section: "03-harness"
//! zkb_subsection: "tests"
//! zkb_type: "test"
//! zkb_scope: "code"
//! zkb_description: "End-to-end benchmark runs against the in-memory coordinator."
//! zkb_version: "v0.1.0"
//! zkb_owner: "tbd"
//! ---
use std::time::{Duration, Instant};

use zkb_common::{ChildMode, MemoryBackendConfig, RunConfig, StopPolicy, SubmissionStrategy};
use zkb_coord::{CoordinationSession, CreateMode, CreateRequest, FaultPlan, MemoryCoordinator};
use zkb_harness::{aggregate, bootstrap, BenchmarkRunner, StopController, WorkerExit, WorkerPool};

fn run_config(workers: usize, duration: Duration) -> RunConfig {
    RunConfig {
        workers,
        duration,
        ..RunConfig::default()
    }
}

fn slow_coordinator(faults: FaultPlan) -> MemoryCoordinator {
    MemoryCoordinator::with_faults(faults, Duration::from_millis(1))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn single_worker_single_op_run() {
    let coordinator = slow_coordinator(FaultPlan::default());
    let runner = BenchmarkRunner::new(run_config(1, Duration::from_secs(1)))
        .expect("runner");
    let report = runner.run(&coordinator).await.expect("run");

    assert!(report.total_nodes >= 1);
    assert_eq!(report.ops_per_second, report.total_nodes as f64);
    assert_eq!(report.acknowledged_ops, report.total_nodes as u64);
    assert!(report.measured_secs >= 1.0);
    assert_eq!(report.worker_summaries.len(), 1);
    assert_eq!(report.worker_summaries[0].exit, WorkerExit::Stopped);
    assert!(!report.interrupted);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stale_root_is_replaced_before_load_starts() {
    let coordinator = MemoryCoordinator::new();
    let leftover = coordinator.session();
    leftover
        .create(CreateRequest::new("/benchmark", CreateMode::Persistent))
        .await
        .expect("stale root");
    for _ in 0..5 {
        leftover
            .create(CreateRequest::new("/benchmark/node_", CreateMode::PersistentSequential))
            .await
            .expect("stale child");
    }

    let config = run_config(1, Duration::from_secs(1));
    let session = bootstrap(&coordinator, &config).await.expect("bootstrap");
    assert!(coordinator
        .children_of("/benchmark")
        .expect("root")
        .is_empty());
    session.close().await.expect("close");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rejected_batches_leave_no_children() {
    let coordinator = slow_coordinator(FaultPlan::default().fail_batches());
    let runner = BenchmarkRunner::new(RunConfig {
        strategy: SubmissionStrategy::Batched,
        batch_size: 100,
        ..run_config(2, Duration::from_millis(200))
    })
    .expect("runner");
    let report = runner.run(&coordinator).await.expect("run completes");

    assert_eq!(report.total_nodes, 0);
    assert_eq!(report.ops_per_second, 0.0);
    assert!(report.failed_units > 0);
    assert!(report
        .worker_summaries
        .iter()
        .all(|summary| summary.exit == WorkerExit::Stopped));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn accepted_batches_are_counted_whole() {
    let coordinator = slow_coordinator(FaultPlan::default());
    let runner = BenchmarkRunner::new(RunConfig {
        strategy: SubmissionStrategy::Batched,
        batch_size: 100,
        child_mode: ChildMode::PersistentSequential,
        ..run_config(2, Duration::from_millis(200))
    })
    .expect("runner");
    let report = runner.run(&coordinator).await.expect("run");

    assert!(report.total_nodes > 0);
    assert_eq!(report.total_nodes % 100, 0);
    // Persistent children outlive the closed session.
    assert_eq!(
        coordinator.children_of("/benchmark").expect("root").len(),
        report.total_nodes
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failing_single_create_ends_the_lone_worker() {
    // The worker's third create fails.
    let coordinator = slow_coordinator(FaultPlan::default().fail_create_call(3));
    let runner = BenchmarkRunner::new(run_config(1, Duration::from_millis(500)))
        .expect("runner");
    let report = runner.run(&coordinator).await.expect("run completes");

    assert_eq!(report.total_nodes, 2);
    let summary = &report.worker_summaries[0];
    assert_eq!(summary.acknowledged, 2);
    assert_eq!(summary.failures, 1);
    assert_eq!(summary.exit, WorkerExit::Failed);
    assert_eq!(report.ops_per_second, 4.0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn create_limit_counts_only_worker_creates() {
    let coordinator = MemoryCoordinator::from_config(&MemoryBackendConfig {
        fail_creates_after: Some(2),
        ..MemoryBackendConfig::default()
    });
    let runner = BenchmarkRunner::new(RunConfig {
        child_mode: ChildMode::PersistentSequential,
        ..run_config(1, Duration::from_millis(200))
    })
    .expect("runner");
    let report = runner.run(&coordinator).await.expect("run completes");

    assert_eq!(report.total_nodes, 2);
    assert_eq!(report.acknowledged_ops, 2);
    let summary = &report.worker_summaries[0];
    assert_eq!(summary.failures, 1);
    assert_eq!(summary.exit, WorkerExit::Failed);
    assert_eq!(coordinator.stats().sessions_closed, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failing_single_create_spares_sibling_workers() {
    let coordinator = slow_coordinator(FaultPlan::default().fail_create_call(3));
    let runner = BenchmarkRunner::new(run_config(4, Duration::from_millis(300)))
        .expect("runner");
    let report = runner.run(&coordinator).await.expect("run completes");

    let failed = report
        .worker_summaries
        .iter()
        .filter(|summary| summary.exit == WorkerExit::Failed)
        .count();
    assert_eq!(failed, 1);
    assert_eq!(report.failed_workers(), 1);
    assert_eq!(report.total_nodes as u64, report.acknowledged_ops);
    assert!(report.total_nodes > 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn count_is_stable_once_broadcast_stop_has_been_joined() {
    let coordinator = slow_coordinator(FaultPlan::default());
    let config = RunConfig {
        stop_policy: StopPolicy::Broadcast,
        ..run_config(4, Duration::from_millis(100))
    };
    let session = bootstrap(&coordinator, &config).await.expect("bootstrap");
    let stop = StopController::new(config.stop_policy, config.duration);
    let pool = WorkerPool::spawn(session.clone(), &config, stop.arm(Instant::now()));
    stop.run_window().await;
    pool.join().await;

    let calls_at_join = coordinator.stats().create_calls;
    let first = aggregate(session.as_ref(), "/benchmark", config.duration)
        .await
        .expect("first count");
    tokio::time::sleep(Duration::from_millis(50)).await;
    let second = aggregate(session.as_ref(), "/benchmark", config.duration)
        .await
        .expect("second count");

    assert!(first.count > 0);
    assert_eq!(first, second);
    assert_eq!(coordinator.stats().create_calls, calls_at_join);
    session.close().await.expect("close");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn longer_runs_create_more_children() {
    let short = BenchmarkRunner::new(run_config(2, Duration::from_millis(100)))
        .expect("runner")
        .run(&slow_coordinator(FaultPlan::default()))
        .await
        .expect("short run");
    let long = BenchmarkRunner::new(run_config(2, Duration::from_millis(400)))
        .expect("runner")
        .run(&slow_coordinator(FaultPlan::default()))
        .await
        .expect("long run");

    assert!(long.total_nodes > short.total_nodes);
}

#[tokio::test]
async fn unreachable_service_is_fatal() {
    let coordinator =
        MemoryCoordinator::with_faults(FaultPlan::default().reject_connect(), Duration::ZERO);
    let runner = BenchmarkRunner::new(run_config(1, Duration::from_millis(50)))
        .expect("runner");
    let err = runner.run(&coordinator).await.expect_err("connect fails");
    assert!(err
        .to_string()
        .starts_with("failed to connect to 127.0.0.1:2181"));
    assert_eq!(coordinator.stats().sessions_closed, 0);
}
