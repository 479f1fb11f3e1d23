//! ---
//! zkb_section: "03-harness"
//! zkb_subsection: "module"
//! zkb_type: "source"
//! zkb_scope: "code"
//! zkb_description: "Load-generation harness: bootstrap, workers, stop control and aggregation."
//! zkb_version: "v0.1.0"
//! zkb_owner: "tbd"
//! ---
//! A run is sequenced by [`BenchmarkRunner`]:
//!
//! 1. [`bootstrap`] opens one session and prepares the root node.
//! 2. [`WorkerPool::spawn`] starts the workers against that session.
//! 3. The [`StopController`] ends the measurement window.
//! 4. [`WorkerPool::join`] waits for every worker.
//! 5. [`aggregate`] counts the root's children and derives the rate.
#![warn(missing_docs)]

use zkb_coord::CoordError;

pub mod aggregate;
pub mod bootstrap;
pub mod report;
pub mod runner;
pub mod stop;
pub mod worker;

pub use aggregate::{aggregate, ops_per_second, Aggregate};
pub use bootstrap::{bootstrap, close_session, prepare_root};
pub use report::BenchmarkReport;
pub use runner::BenchmarkRunner;
pub use stop::{StopController, StopSignal};
pub use worker::{WorkerExit, WorkerPool, WorkerSummary};

/// Fatal harness failures. Anything a single worker hits is not fatal and is
/// reported through [`WorkerSummary`] instead.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// Run parameters were rejected before any connection was made.
    #[error("invalid run configuration: {0}")]
    Config(String),
    /// The session could not be established.
    #[error("failed to connect to {endpoints}: {source}")]
    Connect {
        /// Comma-separated endpoint list.
        endpoints: String,
        /// Backend failure.
        #[source]
        source: CoordError,
    },
    /// The existence check on the root node failed.
    #[error("failed to probe root node {path}: {source}")]
    RootProbe {
        /// Root path.
        path: String,
        /// Backend failure.
        #[source]
        source: CoordError,
    },
    /// The root node could not be created.
    #[error("failed to create root node {path}: {source}")]
    RootCreate {
        /// Root path.
        path: String,
        /// Backend failure.
        #[source]
        source: CoordError,
    },
    /// The final children listing failed, so no count is available.
    #[error("failed to list children of {path}: {source}")]
    ListChildren {
        /// Root path.
        path: String,
        /// Backend failure.
        #[source]
        source: CoordError,
    },
}

/// Result alias used across the harness.
pub type Result<T> = std::result::Result<T, HarnessError>;
