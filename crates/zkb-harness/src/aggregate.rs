//! ---
//! zkb_section: "03-harness"
//! zkb_subsection: "module"
//! zkb_type: "source"
//! zkb_scope: "code"
//! zkb_description: "Child count and throughput derivation."
//! zkb_version: "v0.1.0"
//! zkb_owner: "tbd"
//! ---
use std::time::Duration;

use tracing::info;
use zkb_coord::CoordinationSession;

use crate::{HarnessError, Result};

/// Outcome of a run as recorded by the service.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aggregate {
    /// Children of the root at aggregation time.
    pub count: usize,
    /// `count` divided by the configured run duration.
    pub ops_per_second: f64,
}

/// Rate over the configured duration, not the measured one.
pub fn ops_per_second(count: usize, configured: Duration) -> f64 {
    count as f64 / configured.as_secs_f64()
}

/// Count the root's children and derive the write rate.
pub async fn aggregate(
    session: &dyn CoordinationSession,
    root: &str,
    configured: Duration,
) -> Result<Aggregate> {
    let children = session
        .children(root)
        .await
        .map_err(|source| HarnessError::ListChildren {
            path: root.to_owned(),
            source,
        })?;
    let count = children.len();
    let ops_per_second = ops_per_second(count, configured);
    info!(root, count, ops_per_second, "children counted");
    Ok(Aggregate {
        count,
        ops_per_second,
    })
}
