//! ---
//! zkb_section: "02-coordination"
//! zkb_subsection: "module"
//! zkb_type: "source"
//! zkb_scope: "code"
//! zkb_description: "Coordination-service session abstraction."
//! zkb_version: "v0.1.0"
//! zkb_owner: "tbd"
//! ---
//! The harness only ever talks to a coordination service through the
//! [`Connector`] and [`CoordinationSession`] traits defined here. Backends:
//!
//! * [`memory::MemoryCoordinator`]: in-process tree with sequential naming,
//!   ephemeral ownership and scripted faults.
//! * `zookeeper::ZookeeperConnector` (feature `zookeeper`): a real ensemble.
#![warn(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

pub mod memory;
pub mod types;
#[cfg(feature = "zookeeper")]
pub mod zookeeper;

pub use memory::{FaultPlan, MemoryCoordinator, MemoryStats};
pub use types::{Acl, BatchOp, BatchOpResult, CreateMode, CreateRequest, NodeStat};

/// Shared result type for coordination calls.
pub type Result<T> = std::result::Result<T, CoordError>;

/// Failures reported by a coordination-service backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoordError {
    /// A create targeted a path that is already taken.
    #[error("node already exists: {0}")]
    NodeExists(String),
    /// The node, or the parent of a node being created, is missing.
    #[error("node does not exist: {0}")]
    NoNode(String),
    /// Optimistic version check failed.
    #[error("version mismatch on {path}: expected {expected}, found {actual}")]
    BadVersion {
        /// Node the check ran against.
        path: String,
        /// Version supplied by the caller.
        expected: i32,
        /// Version currently stored.
        actual: i32,
    },
    /// Delete attempted on a node that still has children.
    #[error("node has children: {0}")]
    NotEmpty(String),
    /// Ephemeral nodes cannot own children.
    #[error("ephemeral node cannot have children: {0}")]
    NoChildrenForEphemerals(String),
    /// Path is malformed.
    #[error("invalid path: {0}")]
    InvalidPath(String),
    /// Transport-level failure; the request outcome is unknown.
    #[error("connection lost: {0}")]
    ConnectionLoss(String),
    /// The session was closed or expired.
    #[error("session closed")]
    SessionClosed,
    /// A multi-op was rejected as a unit because one operation failed.
    #[error("batch rejected at operation {index}: {source}")]
    BatchRejected {
        /// Zero-based index of the failing operation.
        index: usize,
        /// Failure of that operation.
        #[source]
        source: Box<CoordError>,
    },
    /// Backend specific failure without a dedicated variant.
    #[error("backend error: {0}")]
    Backend(String),
}

impl CoordError {
    /// True when a create failed only because the node is already present.
    pub fn is_node_exists(&self) -> bool {
        matches!(self, CoordError::NodeExists(_))
    }
}

/// A live session with the coordination service.
///
/// Implementations must be safe to share between concurrently running workers.
#[async_trait]
pub trait CoordinationSession: Send + Sync {
    /// Stat of the node at `path`, or `None` when it does not exist.
    async fn exists(&self, path: &str) -> Result<Option<NodeStat>>;
    /// Create a node and return the path actually assigned.
    async fn create(&self, request: CreateRequest) -> Result<String>;
    /// Delete a node, optionally guarded by the expected version.
    async fn delete(&self, path: &str, version: Option<i32>) -> Result<()>;
    /// Names (not paths) of the children of `path`, sorted.
    async fn children(&self, path: &str) -> Result<Vec<String>>;
    /// Submit all operations as one atomic multi-op.
    async fn submit_batch(&self, ops: Vec<BatchOp>) -> Result<Vec<BatchOpResult>>;
    /// Release the session. Ephemeral nodes it owns go away.
    async fn close(&self) -> Result<()>;
    /// Backend label for logging.
    fn backend(&self) -> &'static str;
}

/// Session handle shared by the bootstrap, every worker and the aggregator.
pub type SharedSession = Arc<dyn CoordinationSession>;

/// Factory for [`CoordinationSession`]s.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Establish a session against the given ensemble.
    async fn connect(&self, endpoints: &[String], session_timeout: Duration)
        -> Result<SharedSession>;
}
