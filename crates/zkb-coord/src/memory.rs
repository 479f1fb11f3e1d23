//! ---
//! zkb_section: "02-coordination"
//! zkb_subsection: "module"
//! zkb_type: "source"
//! zkb_scope: "code"
//! zkb_description: "In-process coordination service used for dry runs and tests."
//! zkb_version: "v0.1.0"
//! zkb_owner: "tbd"
//! ---
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;
use zkb_common::MemoryBackendConfig;

use crate::types::{join_path, split_path, validate_path};
use crate::{
    BatchOp, BatchOpResult, Connector, CoordError, CoordinationSession, CreateMode, CreateRequest,
    NodeStat, Result, SharedSession,
};

/// Scripted failures injected into the in-memory coordinator.
///
/// Create faults only apply to child creates, i.e. any mode other than plain
/// [`CreateMode::Persistent`]. Root preparation is never affected by them.
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    /// Refuse every connection attempt.
    pub reject_connect: bool,
    /// Reject every multi-op submission.
    pub fail_batches: bool,
    /// Fail every delete.
    pub fail_deletes: bool,
    /// 1-based child create call numbers that fail, counted across sessions.
    pub fail_create_calls: BTreeSet<u64>,
    /// Fail every child create once this many have succeeded.
    pub fail_creates_after: Option<u64>,
}

impl FaultPlan {
    /// Refuse connections.
    pub fn reject_connect(mut self) -> Self {
        self.reject_connect = true;
        self
    }

    /// Reject all multi-ops.
    pub fn fail_batches(mut self) -> Self {
        self.fail_batches = true;
        self
    }

    /// Fail all deletes.
    pub fn fail_deletes(mut self) -> Self {
        self.fail_deletes = true;
        self
    }

    /// Fail the `call`-th child create (1-based, counted across sessions).
    pub fn fail_create_call(mut self, call: u64) -> Self {
        self.fail_create_calls.insert(call);
        self
    }

    /// Fail every child create after `successes` have gone through.
    pub fn fail_creates_after(mut self, successes: u64) -> Self {
        self.fail_creates_after = Some(successes);
        self
    }
}

/// Call counters exposed for assertions.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MemoryStats {
    /// Single create calls received.
    pub create_calls: u64,
    /// Single creates that succeeded.
    pub creates_succeeded: u64,
    /// Multi-op submissions received.
    pub batch_calls: u64,
    /// Multi-op submissions that were applied.
    pub batches_applied: u64,
    /// Sessions opened so far.
    pub sessions_opened: u64,
    /// Sessions closed so far. Repeated closes of one session count once.
    pub sessions_closed: u64,
}

#[derive(Debug)]
struct Znode {
    version: i32,
    ephemeral_owner: Option<u64>,
    children: BTreeSet<String>,
    next_sequence: u64,
}

impl Znode {
    fn new(ephemeral_owner: Option<u64>) -> Self {
        Self {
            version: 0,
            ephemeral_owner,
            children: BTreeSet::new(),
            next_sequence: 0,
        }
    }

    fn stat(&self) -> NodeStat {
        NodeStat {
            version: self.version,
            num_children: self.children.len(),
            ephemeral: self.ephemeral_owner.is_some(),
        }
    }
}

/// Undo record for one applied create inside a multi-op.
struct Applied {
    path: String,
    parent: String,
    name: String,
    previous_sequence: u64,
}

#[derive(Debug)]
struct Tree {
    nodes: HashMap<String, Znode>,
}

impl Tree {
    fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert("/".to_owned(), Znode::new(None));
        Self { nodes }
    }

    fn stat(&self, path: &str) -> Option<NodeStat> {
        self.nodes.get(path).map(Znode::stat)
    }

    fn create(&mut self, request: &CreateRequest, session: u64) -> Result<Applied> {
        let sequential = request.mode.is_sequential();
        validate_path(&request.path, sequential)?;
        if request.path == "/" {
            return Err(CoordError::NodeExists(request.path.clone()));
        }
        let (parent_path, base) = split_path(&request.path)?;
        let parent = self
            .nodes
            .get_mut(parent_path)
            .ok_or_else(|| CoordError::NoNode(parent_path.to_owned()))?;
        if parent.ephemeral_owner.is_some() {
            return Err(CoordError::NoChildrenForEphemerals(parent_path.to_owned()));
        }

        let previous_sequence = parent.next_sequence;
        let name = if sequential {
            parent.next_sequence += 1;
            format!("{}{:010}", base, previous_sequence)
        } else {
            base.to_owned()
        };
        if !parent.children.insert(name.clone()) {
            parent.next_sequence = previous_sequence;
            return Err(CoordError::NodeExists(join_path(parent_path, &name)));
        }

        let path = join_path(parent_path, &name);
        let owner = request.mode.is_ephemeral().then_some(session);
        self.nodes.insert(path.clone(), Znode::new(owner));
        Ok(Applied {
            path,
            parent: parent_path.to_owned(),
            name,
            previous_sequence,
        })
    }

    fn undo(&mut self, applied: Applied) {
        self.nodes.remove(&applied.path);
        if let Some(parent) = self.nodes.get_mut(&applied.parent) {
            parent.children.remove(&applied.name);
            parent.next_sequence = applied.previous_sequence;
        }
    }

    fn delete(&mut self, path: &str, version: Option<i32>) -> Result<()> {
        validate_path(path, false)?;
        if path == "/" {
            return Err(CoordError::InvalidPath(path.to_owned()));
        }
        let node = self
            .nodes
            .get(path)
            .ok_or_else(|| CoordError::NoNode(path.to_owned()))?;
        if let Some(expected) = version {
            if expected != node.version {
                return Err(CoordError::BadVersion {
                    path: path.to_owned(),
                    expected,
                    actual: node.version,
                });
            }
        }
        if !node.children.is_empty() {
            return Err(CoordError::NotEmpty(path.to_owned()));
        }
        self.remove(path);
        Ok(())
    }

    fn remove(&mut self, path: &str) {
        self.nodes.remove(path);
        if let Ok((parent, name)) = split_path(path) {
            if let Some(parent) = self.nodes.get_mut(parent) {
                parent.children.remove(name);
            }
        }
    }

    fn children(&self, path: &str) -> Result<Vec<String>> {
        validate_path(path, false)?;
        self.nodes
            .get(path)
            .map(|node| node.children.iter().cloned().collect())
            .ok_or_else(|| CoordError::NoNode(path.to_owned()))
    }

    fn expire_session(&mut self, session: u64) -> usize {
        let owned: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.ephemeral_owner == Some(session))
            .map(|(path, _)| path.clone())
            .collect();
        for path in &owned {
            self.remove(path);
        }
        owned.len()
    }
}

struct Shared {
    tree: Mutex<Tree>,
    faults: FaultPlan,
    latency: Duration,
    next_session: AtomicU64,
    create_calls: AtomicU64,
    creates_succeeded: AtomicU64,
    child_create_calls: AtomicU64,
    child_creates_succeeded: AtomicU64,
    batch_calls: AtomicU64,
    batches_applied: AtomicU64,
    sessions_closed: AtomicU64,
}

impl Shared {
    async fn round_trip(&self) {
        if self.latency.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.latency).await;
        }
    }
}

/// In-process coordination service. Clones share the same tree.
#[derive(Clone)]
pub struct MemoryCoordinator {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for MemoryCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCoordinator")
            .field("stats", &self.stats())
            .finish()
    }
}

impl Default for MemoryCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCoordinator {
    /// Healthy coordinator with no latency.
    pub fn new() -> Self {
        Self::with_faults(FaultPlan::default(), Duration::ZERO)
    }

    /// Coordinator with scripted faults and a simulated round-trip latency.
    pub fn with_faults(faults: FaultPlan, latency: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                tree: Mutex::new(Tree::new()),
                faults,
                latency,
                next_session: AtomicU64::new(1),
                create_calls: AtomicU64::new(0),
                creates_succeeded: AtomicU64::new(0),
                child_create_calls: AtomicU64::new(0),
                child_creates_succeeded: AtomicU64::new(0),
                batch_calls: AtomicU64::new(0),
                batches_applied: AtomicU64::new(0),
                sessions_closed: AtomicU64::new(0),
            }),
        }
    }

    /// Coordinator configured from the `[memory]` config section.
    pub fn from_config(config: &MemoryBackendConfig) -> Self {
        let faults = FaultPlan {
            fail_batches: config.fail_batches,
            fail_creates_after: config.fail_creates_after,
            ..FaultPlan::default()
        };
        Self::with_faults(faults, config.latency)
    }

    /// Open a session without going through the [`Connector`] trait.
    pub fn session(&self) -> Arc<MemorySession> {
        let id = self.shared.next_session.fetch_add(1, Ordering::Relaxed);
        debug!(session = id, "memory session opened");
        Arc::new(MemorySession {
            id,
            shared: self.shared.clone(),
            closed: AtomicBool::new(false),
        })
    }

    /// Child names of `path`, read directly from the tree.
    pub fn children_of(&self, path: &str) -> Result<Vec<String>> {
        self.shared.tree.lock().children(path)
    }

    /// Stat of `path`, read directly from the tree.
    pub fn stat(&self, path: &str) -> Option<NodeStat> {
        self.shared.tree.lock().stat(path)
    }

    /// Snapshot of call counters.
    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            create_calls: self.shared.create_calls.load(Ordering::Relaxed),
            creates_succeeded: self.shared.creates_succeeded.load(Ordering::Relaxed),
            batch_calls: self.shared.batch_calls.load(Ordering::Relaxed),
            batches_applied: self.shared.batches_applied.load(Ordering::Relaxed),
            sessions_opened: self.shared.next_session.load(Ordering::Relaxed) - 1,
            sessions_closed: self.shared.sessions_closed.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl Connector for MemoryCoordinator {
    async fn connect(
        &self,
        endpoints: &[String],
        _session_timeout: Duration,
    ) -> Result<SharedSession> {
        self.shared.round_trip().await;
        if self.shared.faults.reject_connect {
            return Err(CoordError::ConnectionLoss(format!(
                "injected fault: connection refused by {}",
                endpoints.join(",")
            )));
        }
        if endpoints.is_empty() {
            return Err(CoordError::ConnectionLoss("no endpoints supplied".into()));
        }
        Ok(self.session())
    }
}

/// Session against a [`MemoryCoordinator`].
pub struct MemorySession {
    id: u64,
    shared: Arc<Shared>,
    closed: AtomicBool,
}

impl MemorySession {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(CoordError::SessionClosed)
        } else {
            Ok(())
        }
    }

    fn injected_create_failure(&self, call: u64) -> Option<CoordError> {
        let faults = &self.shared.faults;
        if faults.fail_create_calls.contains(&call) {
            return Some(CoordError::ConnectionLoss(format!(
                "injected fault on child create call {}",
                call
            )));
        }
        if let Some(limit) = faults.fail_creates_after {
            if self.shared.child_creates_succeeded.load(Ordering::Acquire) >= limit {
                return Some(CoordError::ConnectionLoss(format!(
                    "injected fault after {} child creates",
                    limit
                )));
            }
        }
        None
    }
}

#[async_trait]
impl CoordinationSession for MemorySession {
    async fn exists(&self, path: &str) -> Result<Option<NodeStat>> {
        self.shared.round_trip().await;
        self.ensure_open()?;
        validate_path(path, false)?;
        Ok(self.shared.tree.lock().stat(path))
    }

    async fn create(&self, request: CreateRequest) -> Result<String> {
        self.shared.round_trip().await;
        self.ensure_open()?;
        self.shared.create_calls.fetch_add(1, Ordering::AcqRel);
        let child = request.mode != CreateMode::Persistent;
        if child {
            let call = self.shared.child_create_calls.fetch_add(1, Ordering::AcqRel) + 1;
            if let Some(err) = self.injected_create_failure(call) {
                return Err(err);
            }
        }
        let applied = self.shared.tree.lock().create(&request, self.id)?;
        self.shared.creates_succeeded.fetch_add(1, Ordering::AcqRel);
        if child {
            self.shared
                .child_creates_succeeded
                .fetch_add(1, Ordering::AcqRel);
        }
        Ok(applied.path)
    }

    async fn delete(&self, path: &str, version: Option<i32>) -> Result<()> {
        self.shared.round_trip().await;
        self.ensure_open()?;
        if self.shared.faults.fail_deletes {
            return Err(CoordError::ConnectionLoss(format!(
                "injected fault deleting {}",
                path
            )));
        }
        self.shared.tree.lock().delete(path, version)
    }

    async fn children(&self, path: &str) -> Result<Vec<String>> {
        self.shared.round_trip().await;
        self.ensure_open()?;
        self.shared.tree.lock().children(path)
    }

    async fn submit_batch(&self, ops: Vec<BatchOp>) -> Result<Vec<BatchOpResult>> {
        self.shared.round_trip().await;
        self.ensure_open()?;
        self.shared.batch_calls.fetch_add(1, Ordering::Relaxed);
        if self.shared.faults.fail_batches {
            return Err(CoordError::ConnectionLoss(
                "injected fault: multi-op rejected".into(),
            ));
        }

        let mut tree = self.shared.tree.lock();
        let mut applied = Vec::with_capacity(ops.len());
        for (index, op) in ops.iter().enumerate() {
            let outcome = match op {
                BatchOp::Create(request) => tree.create(request, self.id),
            };
            match outcome {
                Ok(done) => applied.push(done),
                Err(err) => {
                    for done in applied.into_iter().rev() {
                        tree.undo(done);
                    }
                    return Err(CoordError::BatchRejected {
                        index,
                        source: Box::new(err),
                    });
                }
            }
        }
        drop(tree);

        self.shared.batches_applied.fetch_add(1, Ordering::Relaxed);
        Ok(applied
            .into_iter()
            .map(|done| BatchOpResult::Created(done.path))
            .collect())
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let expired = self.shared.tree.lock().expire_session(self.id);
        self.shared.sessions_closed.fetch_add(1, Ordering::Relaxed);
        debug!(session = self.id, expired, "memory session closed");
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
