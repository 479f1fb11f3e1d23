//! ---
//! zkb_section: "01-common"
//! zkb_subsection: "module"
//! zkb_type: "source"
//! zkb_scope: "code"
//! zkb_description: "Run configuration model, defaults and validation."
//! zkb_version: "v0.1.0"
//! zkb_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_endpoints() -> Vec<String> {
    vec!["127.0.0.1:2181".to_owned()]
}

fn default_session_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_root_path() -> String {
    "/benchmark".to_owned()
}

fn default_workers() -> usize {
    1000
}

fn default_batch_size() -> usize {
    100
}

fn default_duration() -> Duration {
    Duration::from_secs(10)
}

fn default_child_prefix() -> String {
    "node_".to_owned()
}

fn default_purge_stale_children() -> bool {
    true
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

/// Top-level configuration for a `zkbench` invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub backend: BackendKind,
    #[serde(default)]
    pub memory: MemoryBackendConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    /// `None` when no file was found and built-in defaults apply.
    pub source: Option<PathBuf>,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "ZKBENCH_CONFIG";

    /// Load configuration from the first existing candidate, respecting the
    /// `ZKBENCH_CONFIG` override. Falls back to defaults when nothing exists.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        debug!("no configuration file found; using built-in defaults");
        Ok(LoadedAppConfig {
            config: AppConfig::default(),
            source: None,
        })
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        contents
            .parse::<AppConfig>()
            .with_context(|| format!("failed to load config file {}", path.display()))
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.run.validate()
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Coordination-service implementation the binary talks to.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Zookeeper,
    Memory,
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "zookeeper" | "zk" => Ok(BackendKind::Zookeeper),
            "memory" => Ok(BackendKind::Memory),
            other => Err(format!("unknown backend: {}", other)),
        }
    }
}

/// How a worker hands create requests to the coordination service.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStrategy {
    /// One create per round-trip; the first error ends the worker.
    #[default]
    Single,
    /// `batch_size` creates per atomic multi-op; errors are skipped over.
    Batched,
}

/// How the end of the measurement window is communicated to workers.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StopPolicy {
    /// Every worker compares the wall clock against the start timestamp.
    #[default]
    Deadline,
    /// The controller sleeps for the run duration and then flips a shared signal.
    Broadcast,
}

/// Node flavour and naming used for benchmark children.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ChildMode {
    #[default]
    EphemeralSequential,
    PersistentSequential,
    /// Plain ephemeral nodes named by the client (`node_<worker>_<n>`).
    EphemeralCounter,
}

/// Immutable parameters of a single benchmark run.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default = "default_endpoints")]
    pub endpoints: Vec<String>,
    #[serde(default = "default_session_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub session_timeout: Duration,
    #[serde(default = "default_root_path")]
    pub root_path: String,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default)]
    pub strategy: SubmissionStrategy,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_duration")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub duration: Duration,
    #[serde(default)]
    pub stop_policy: StopPolicy,
    #[serde(default)]
    pub child_mode: ChildMode,
    #[serde(default = "default_child_prefix")]
    pub child_prefix: String,
    #[serde(default)]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub settle_delay: Duration,
    #[serde(default = "default_purge_stale_children")]
    pub purge_stale_children: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            endpoints: default_endpoints(),
            session_timeout: default_session_timeout(),
            root_path: default_root_path(),
            workers: default_workers(),
            strategy: SubmissionStrategy::default(),
            batch_size: default_batch_size(),
            duration: default_duration(),
            stop_policy: StopPolicy::default(),
            child_mode: ChildMode::default(),
            child_prefix: default_child_prefix(),
            settle_delay: Duration::ZERO,
            purge_stale_children: default_purge_stale_children(),
        }
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<()> {
        if self.endpoints.iter().all(|e| e.trim().is_empty()) {
            return Err(anyhow!("at least one coordination-service endpoint is required"));
        }
        if !self.root_path.starts_with('/') || self.root_path.len() < 2 {
            return Err(anyhow!(
                "root_path '{}' must be an absolute path below '/'",
                self.root_path
            ));
        }
        if self.root_path.ends_with('/') {
            return Err(anyhow!(
                "root_path '{}' must not end with '/'",
                self.root_path
            ));
        }
        if self.workers == 0 {
            return Err(anyhow!("workers must be greater than zero"));
        }
        if self.strategy == SubmissionStrategy::Batched && self.batch_size == 0 {
            return Err(anyhow!("batch_size must be greater than zero"));
        }
        if self.duration.is_zero() {
            return Err(anyhow!("duration must be greater than zero"));
        }
        if self.child_prefix.contains('/') {
            return Err(anyhow!("child_prefix must not contain '/'"));
        }
        Ok(())
    }

    /// Units of work (creates) a worker issues per loop iteration.
    pub fn ops_per_unit(&self) -> usize {
        match self.strategy {
            SubmissionStrategy::Single => 1,
            SubmissionStrategy::Batched => self.batch_size,
        }
    }

    /// Path handed to the coordination service for every child create.
    pub fn child_path_prefix(&self) -> String {
        format!("{}/{}", self.root_path, self.child_prefix)
    }
}

/// Tuning knobs for the in-process coordinator used for dry runs.
#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryBackendConfig {
    /// Simulated round-trip latency applied to every call.
    #[serde(default)]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub latency: Duration,
    /// Reject every multi-op submission.
    #[serde(default)]
    pub fail_batches: bool,
    /// Fail every child create once this many have succeeded. Root
    /// preparation is not counted.
    #[serde(default)]
    pub fail_creates_after: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Directory for the rolling log file; console only when unset.
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: None,
            format: default_log_format(),
            file_prefix: None,
        }
    }
}
