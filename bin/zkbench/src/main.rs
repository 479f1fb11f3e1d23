//! ---
//! zkb_section: "04-binary"
//! zkb_subsection: "binary"
//! zkb_type: "source"
//! zkb_scope: "code"
//! zkb_description: "Binary entrypoint for the zkbench write-throughput benchmark."
//! zkb_version: "v0.1.0"
//! zkb_owner: "tbd"
//! ---
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tokio::signal;
use tracing::{error, info, warn};
use zkb_common::config::AppConfig;
use zkb_common::logging::{init_tracing, LogFormat};
use zkb_common::{BackendKind, ChildMode, StopPolicy, SubmissionStrategy};
use zkb_coord::{Connector, MemoryCoordinator};
use zkb_harness::{BenchmarkReport, BenchmarkRunner};

const DEFAULT_CONFIG: &str = "configs/zkbench.toml";

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Measure how many child nodes a coordination service can create per second",
    long_about = None
)]
struct Cli {
    /// Path to configuration file (defaults to $ZKBENCH_CONFIG, then configs/zkbench.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Coordination backend to drive
    #[arg(long, value_enum)]
    backend: Option<CliBackend>,

    /// Comma-separated host:port list of the ensemble
    #[arg(long, value_delimiter = ',')]
    endpoints: Option<Vec<String>>,

    /// Session timeout in seconds
    #[arg(long)]
    session_timeout_secs: Option<u64>,

    /// Root node the children are created under
    #[arg(long)]
    root: Option<String>,

    /// Number of concurrent workers
    #[arg(long)]
    workers: Option<usize>,

    /// Submit creates one at a time or as atomic multi-ops
    #[arg(long, value_enum)]
    strategy: Option<CliStrategy>,

    /// Creates per multi-op when batching
    #[arg(long)]
    batch_size: Option<usize>,

    /// Measurement window in seconds
    #[arg(long)]
    duration_secs: Option<u64>,

    /// How workers learn that the window is over
    #[arg(long, value_enum)]
    stop_policy: Option<CliStopPolicy>,

    /// Node flavour and naming of benchmark children
    #[arg(long, value_enum)]
    child_mode: Option<CliChildMode>,

    /// Pause between worker shutdown and counting, in milliseconds
    #[arg(long)]
    settle_ms: Option<u64>,

    /// Report format printed on stdout
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Console log format
    #[arg(long, value_enum)]
    log_format: Option<CliLogFormat>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliBackend {
    Zookeeper,
    Memory,
}

impl From<CliBackend> for BackendKind {
    fn from(value: CliBackend) -> Self {
        match value {
            CliBackend::Zookeeper => BackendKind::Zookeeper,
            CliBackend::Memory => BackendKind::Memory,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliStrategy {
    Single,
    Batched,
}

impl From<CliStrategy> for SubmissionStrategy {
    fn from(value: CliStrategy) -> Self {
        match value {
            CliStrategy::Single => SubmissionStrategy::Single,
            CliStrategy::Batched => SubmissionStrategy::Batched,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliStopPolicy {
    Deadline,
    Broadcast,
}

impl From<CliStopPolicy> for StopPolicy {
    fn from(value: CliStopPolicy) -> Self {
        match value {
            CliStopPolicy::Deadline => StopPolicy::Deadline,
            CliStopPolicy::Broadcast => StopPolicy::Broadcast,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliChildMode {
    EphemeralSequential,
    PersistentSequential,
    EphemeralCounter,
}

impl From<CliChildMode> for ChildMode {
    fn from(value: CliChildMode) -> Self {
        match value {
            CliChildMode::EphemeralSequential => ChildMode::EphemeralSequential,
            CliChildMode::PersistentSequential => ChildMode::PersistentSequential,
            CliChildMode::EphemeralCounter => ChildMode::EphemeralCounter,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliLogFormat {
    Pretty,
    Json,
}

impl From<CliLogFormat> for LogFormat {
    fn from(value: CliLogFormat) -> Self {
        match value {
            CliLogFormat::Pretty => LogFormat::Pretty,
            CliLogFormat::Json => LogFormat::StructuredJson,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (config, source) = load_config(&cli)?;
    init_tracing("zkbench", &config.logging)?;
    match &source {
        Some(path) => {
            info!(config_path = %path.display(), backend = ?config.backend, "configuration loaded")
        }
        None => info!(backend = ?config.backend, "no configuration file found; using defaults"),
    }

    let connector = build_connector(&config)?;
    let runner = BenchmarkRunner::new(config.run.clone())?;
    let stop = runner.stop_controller();
    let interrupt = {
        let stop = stop.clone();
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() && stop.trigger() {
                warn!("interrupt received; stopping workers");
            }
        })
    };

    let outcome = runner.run_with(connector.as_ref(), stop).await;
    interrupt.abort();
    let report = outcome.map_err(|err| {
        error!(error = %err, "benchmark aborted");
        err
    })?;
    print_report(&report, cli.format)
}

fn load_config(cli: &Cli) -> Result<(AppConfig, Option<PathBuf>)> {
    let (mut config, source) = match &cli.config {
        Some(path) => (AppConfig::from_path(path)?, Some(path.clone())),
        None => {
            let loaded = AppConfig::load_with_source(&[PathBuf::from(DEFAULT_CONFIG)])?;
            (loaded.config, loaded.source)
        }
    };
    apply_overrides(cli, &mut config);
    config
        .validate()
        .context("invalid configuration after command-line overrides")?;
    Ok((config, source))
}

fn apply_overrides(cli: &Cli, config: &mut AppConfig) {
    if let Some(backend) = cli.backend {
        config.backend = backend.into();
    }
    if let Some(endpoints) = &cli.endpoints {
        config.run.endpoints = endpoints.clone();
    }
    if let Some(secs) = cli.session_timeout_secs {
        config.run.session_timeout = std::time::Duration::from_secs(secs);
    }
    if let Some(root) = &cli.root {
        config.run.root_path = root.clone();
    }
    if let Some(workers) = cli.workers {
        config.run.workers = workers;
    }
    if let Some(strategy) = cli.strategy {
        config.run.strategy = strategy.into();
    }
    if let Some(batch_size) = cli.batch_size {
        config.run.batch_size = batch_size;
    }
    if let Some(secs) = cli.duration_secs {
        config.run.duration = std::time::Duration::from_secs(secs);
    }
    if let Some(policy) = cli.stop_policy {
        config.run.stop_policy = policy.into();
    }
    if let Some(mode) = cli.child_mode {
        config.run.child_mode = mode.into();
    }
    if let Some(ms) = cli.settle_ms {
        config.run.settle_delay = std::time::Duration::from_millis(ms);
    }
    if let Some(format) = cli.log_format {
        config.logging.format = format.into();
    }
}

fn build_connector(config: &AppConfig) -> Result<Box<dyn Connector>> {
    match config.backend {
        BackendKind::Memory => {
            info!(
                latency_ms = config.memory.latency.as_millis() as u64,
                "using in-memory coordinator"
            );
            Ok(Box::new(MemoryCoordinator::from_config(&config.memory)))
        }
        BackendKind::Zookeeper => zookeeper_connector(),
    }
}

#[cfg(feature = "zookeeper")]
fn zookeeper_connector() -> Result<Box<dyn Connector>> {
    Ok(Box::new(zkb_coord::zookeeper::ZookeeperConnector))
}

#[cfg(not(feature = "zookeeper"))]
fn zookeeper_connector() -> Result<Box<dyn Connector>> {
    Err(anyhow::anyhow!(
        "zookeeper backend not compiled in; rebuild with `--features zookeeper` \
         or pass `--backend memory`"
    ))
}

fn print_report(report: &BenchmarkReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => println!("{}", report.render_text()),
        OutputFormat::Json => println!(
            "{}",
            report.render_json().context("failed to serialise report")?
        ),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    use tempfile::NamedTempFile;

    fn base_cli() -> Cli {
        Cli {
            config: None,
            backend: None,
            endpoints: None,
            session_timeout_secs: None,
            root: None,
            workers: None,
            strategy: None,
            batch_size: None,
            duration_secs: None,
            stop_policy: None,
            child_mode: None,
            settle_ms: None,
            format: OutputFormat::Text,
            log_format: None,
        }
    }

    #[test]
    fn no_overrides_keep_config() {
        let mut config = AppConfig::default();
        apply_overrides(&base_cli(), &mut config);
        assert_eq!(config.run, AppConfig::default().run);
        assert_eq!(config.backend, BackendKind::Zookeeper);
    }

    #[test]
    fn overrides_replace_run_parameters() {
        let mut cli = base_cli();
        cli.backend = Some(CliBackend::Memory);
        cli.endpoints = Some(vec!["zk1:2181".into(), "zk2:2181".into()]);
        cli.workers = Some(8);
        cli.strategy = Some(CliStrategy::Batched);
        cli.batch_size = Some(50);
        cli.duration_secs = Some(3);
        cli.stop_policy = Some(CliStopPolicy::Broadcast);
        cli.child_mode = Some(CliChildMode::EphemeralCounter);
        cli.settle_ms = Some(1000);
        cli.log_format = Some(CliLogFormat::Json);

        let mut config = AppConfig::default();
        apply_overrides(&cli, &mut config);
        assert_eq!(config.backend, BackendKind::Memory);
        assert_eq!(config.run.endpoints, vec!["zk1:2181", "zk2:2181"]);
        assert_eq!(config.run.workers, 8);
        assert_eq!(config.run.strategy, SubmissionStrategy::Batched);
        assert_eq!(config.run.ops_per_unit(), 50);
        assert_eq!(config.run.duration, Duration::from_secs(3));
        assert_eq!(config.run.stop_policy, StopPolicy::Broadcast);
        assert_eq!(config.run.child_mode, ChildMode::EphemeralCounter);
        assert_eq!(config.run.settle_delay, Duration::from_secs(1));
        assert_eq!(config.logging.format, LogFormat::StructuredJson);
    }

    #[test]
    fn cli_parses_comma_separated_endpoints() {
        let cli = Cli::try_parse_from([
            "zkbench",
            "--endpoints",
            "a:2181,b:2181",
            "--strategy",
            "batched",
            "--child-mode",
            "persistent-sequential",
            "--format",
            "json",
        ])
        .expect("parse");
        assert_eq!(
            cli.endpoints,
            Some(vec!["a:2181".to_owned(), "b:2181".to_owned()])
        );
        assert!(matches!(cli.strategy, Some(CliStrategy::Batched)));
        assert!(matches!(cli.child_mode, Some(CliChildMode::PersistentSequential)));
        assert_eq!(cli.format, OutputFormat::Json);
    }

    #[test]
    fn load_config_reads_explicit_file_and_applies_overrides() {
        let mut file = NamedTempFile::new().expect("tempfile");
        writeln!(
            file,
            "backend = \"memory\"\n[run]\nworkers = 4\nduration = 2\n"
        )
        .expect("write");
        let mut cli = base_cli();
        cli.config = Some(file.path().to_path_buf());
        cli.workers = Some(6);

        let (config, source) = load_config(&cli).expect("load");
        assert_eq!(source.as_deref(), Some(file.path()));
        assert_eq!(config.backend, BackendKind::Memory);
        assert_eq!(config.run.workers, 6);
        assert_eq!(config.run.duration, Duration::from_secs(2));
    }

    #[test]
    fn missing_explicit_config_is_an_error() {
        let mut cli = base_cli();
        cli.config = Some(PathBuf::from("/definitely/not/here.toml"));
        assert!(load_config(&cli).is_err());
    }

    #[test]
    fn invalid_override_is_rejected() {
        let mut cli = base_cli();
        cli.workers = Some(0);
        let mut config = AppConfig::default();
        apply_overrides(&cli, &mut config);
        assert!(config.validate().is_err());
    }

    #[test]
    fn memory_backend_builds_without_features() {
        let config = AppConfig {
            backend: BackendKind::Memory,
            ..AppConfig::default()
        };
        assert!(build_connector(&config).is_ok());
    }

    #[cfg(not(feature = "zookeeper"))]
    #[test]
    fn zookeeper_backend_requires_feature() {
        let err = build_connector(&AppConfig::default()).err().expect("feature disabled");
        assert!(err.to_string().contains("--features zookeeper"));
    }
}
