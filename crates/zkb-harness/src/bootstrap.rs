//! ---
//! zkb_section: "03-harness"
//! zkb_subsection: "module"
//! zkb_type: "source"
//! zkb_scope: "code"
//! zkb_description: "Session establishment and root node preparation."
//! zkb_version: "v0.1.0"
//! zkb_owner: "tbd"
//! ---
use tracing::{debug, info, warn};
use zkb_common::RunConfig;
use zkb_coord::types::join_path;
use zkb_coord::{Connector, CoordinationSession, CreateMode, CreateRequest, SharedSession};

use crate::{HarnessError, Result};

/// Open the run's single session and leave an empty root node behind.
///
/// If the root cannot be prepared the session is closed before the error is
/// returned.
pub async fn bootstrap(connector: &dyn Connector, config: &RunConfig) -> Result<SharedSession> {
    let session = connector
        .connect(&config.endpoints, config.session_timeout)
        .await
        .map_err(|source| HarnessError::Connect {
            endpoints: config.endpoints.join(","),
            source,
        })?;
    info!(
        backend = session.backend(),
        endpoints = %config.endpoints.join(","),
        "coordination session established"
    );

    if let Err(err) = prepare_root(session.as_ref(), config).await {
        close_session(session.as_ref()).await;
        return Err(err);
    }
    Ok(session)
}

/// Make sure `config.root_path` exists as a persistent node, removing a root
/// left behind by an earlier run first.
///
/// Removing the stale root is best effort. A failed child purge or a
/// version-guarded delete that loses a race is logged and ignored: the
/// create-if-absent step below accepts an existing root, and sequential child
/// names keep this run's children distinct from leftovers.
pub async fn prepare_root(session: &dyn CoordinationSession, config: &RunConfig) -> Result<()> {
    let root = config.root_path.as_str();
    let stat = session
        .exists(root)
        .await
        .map_err(|source| HarnessError::RootProbe {
            path: root.to_owned(),
            source,
        })?;

    if let Some(stat) = stat {
        debug!(
            root,
            version = stat.version,
            children = stat.num_children,
            "stale benchmark root found"
        );
        if config.purge_stale_children && stat.num_children > 0 {
            purge_children(session, root).await;
        }
        // Best effort: delete only the version we observed, never retry.
        match session.delete(root, Some(stat.version)).await {
            Ok(()) => info!(root, "removed stale benchmark root"),
            Err(err) => {
                warn!(root, error = %err, "failed to delete stale benchmark root; continuing")
            }
        }
    }

    match session
        .create(CreateRequest::new(root, CreateMode::Persistent))
        .await
    {
        Ok(path) => info!(root = %path, "benchmark root created"),
        Err(err) if err.is_node_exists() => info!(root, "benchmark root already present"),
        Err(source) => {
            return Err(HarnessError::RootCreate {
                path: root.to_owned(),
                source,
            });
        }
    }
    Ok(())
}

async fn purge_children(session: &dyn CoordinationSession, root: &str) {
    let children = match session.children(root).await {
        Ok(children) => children,
        Err(err) => {
            warn!(root, error = %err, "failed to list stale children; skipping purge");
            return;
        }
    };
    let mut failed = 0usize;
    for name in &children {
        let path = join_path(root, name);
        if let Err(err) = session.delete(&path, None).await {
            failed += 1;
            debug!(path = %path, error = %err, "failed to delete stale child");
        }
    }
    if failed > 0 {
        warn!(
            root,
            failed,
            total = children.len(),
            "some stale children could not be removed"
        );
    } else {
        info!(root, removed = children.len(), "stale children removed");
    }
}

/// Close a session, logging instead of failing.
pub async fn close_session(session: &dyn CoordinationSession) {
    match session.close().await {
        Ok(()) => debug!(backend = session.backend(), "coordination session closed"),
        Err(err) => {
            warn!(backend = session.backend(), error = %err, "failed to close coordination session")
        }
    }
}
