//! ---
//! zkb_section: "02-coordination"
//! zkb_subsection: "module"
//! zkb_type: "source"
//! zkb_scope: "code"
//! zkb_description: "Request and metadata types exchanged with the coordination service."
//! zkb_version: "v0.1.0"
//! zkb_owner: "tbd"
//! ---
use crate::{CoordError, Result};

/// Lifetime and naming semantics of a created node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CreateMode {
    /// Survives the creating session.
    Persistent,
    /// Persistent with a server-assigned, monotonically increasing suffix.
    PersistentSequential,
    /// Removed when the creating session ends.
    Ephemeral,
    /// Ephemeral with a server-assigned suffix.
    EphemeralSequential,
}

impl CreateMode {
    /// Whether the node is bound to its creating session.
    pub fn is_ephemeral(self) -> bool {
        matches!(self, CreateMode::Ephemeral | CreateMode::EphemeralSequential)
    }

    /// Whether the service appends a sequence suffix to the name.
    pub fn is_sequential(self) -> bool {
        matches!(
            self,
            CreateMode::PersistentSequential | CreateMode::EphemeralSequential
        )
    }
}

/// Access control attached to created nodes. Only world/all is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Acl {
    /// Anyone may perform any operation.
    #[default]
    WorldAll,
}

/// Metadata returned by an existence probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeStat {
    /// Data version, used as the token for guarded deletes.
    pub version: i32,
    /// Number of direct children.
    pub num_children: usize,
    /// Whether the node is ephemeral.
    pub ephemeral: bool,
}

/// A single node creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRequest {
    /// Requested path; for sequential modes the suffix is appended to it.
    pub path: String,
    /// Node payload.
    pub data: Vec<u8>,
    /// Lifetime and naming semantics.
    pub mode: CreateMode,
    /// Access control.
    pub acl: Acl,
}

impl CreateRequest {
    /// Request for an empty, world-accessible node.
    pub fn new(path: impl Into<String>, mode: CreateMode) -> Self {
        Self {
            path: path.into(),
            data: Vec::new(),
            mode,
            acl: Acl::WorldAll,
        }
    }
}

/// One operation inside a multi-op submission.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum BatchOp {
    /// Create a node.
    Create(CreateRequest),
}

/// Per-operation outcome of an accepted multi-op.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum BatchOpResult {
    /// Path assigned to the created node.
    Created(String),
}

/// Check that `path` is absolute and has no empty segments. Sequential
/// creates may end with `/`, in which case the name is the suffix alone.
pub fn validate_path(path: &str, sequential: bool) -> Result<()> {
    if !path.starts_with('/') {
        return Err(CoordError::InvalidPath(path.to_owned()));
    }
    if path == "/" {
        return Ok(());
    }
    let body = match path.strip_suffix('/') {
        Some(trimmed) if sequential => trimmed,
        Some(_) => return Err(CoordError::InvalidPath(path.to_owned())),
        None => path,
    };
    if body[1..].split('/').any(|segment| segment.is_empty()) {
        return Err(CoordError::InvalidPath(path.to_owned()));
    }
    Ok(())
}

/// Split a non-root path into parent path and final name.
pub fn split_path(path: &str) -> Result<(&str, &str)> {
    match path.rfind('/') {
        Some(0) if path.len() > 1 => Ok(("/", &path[1..])),
        Some(0) | None => Err(CoordError::InvalidPath(path.to_owned())),
        Some(index) => Ok((&path[..index], &path[index + 1..])),
    }
}

/// Join a parent path and a child name.
pub fn join_path(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", parent, name)
    }
}
