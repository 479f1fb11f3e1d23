//! ---
//! zkb_section: "02-coordination"
//! zkb_subsection: "module"
//! zkb_type: "source"
//! zkb_scope: "code"
//! zkb_description: "ZooKeeper backend built on the zookeeper-client crate."
//! zkb_version: "v0.1.0"
//! zkb_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info};
use zookeeper_client as zk;

use crate::{
    BatchOp, BatchOpResult, Connector, CoordError, CoordinationSession, CreateMode, CreateRequest,
    NodeStat, Result, SharedSession,
};

fn map_error(err: zk::Error) -> CoordError {
    match err {
        zk::Error::NodeExists => CoordError::NodeExists(String::new()),
        zk::Error::NoNode => CoordError::NoNode(String::new()),
        zk::Error::NotEmpty => CoordError::NotEmpty(String::new()),
        zk::Error::NoChildrenForEphemerals => CoordError::NoChildrenForEphemerals(String::new()),
        zk::Error::ConnectionLoss => CoordError::ConnectionLoss("zookeeper".into()),
        zk::Error::SessionExpired => CoordError::SessionClosed,
        other => CoordError::Backend(other.to_string()),
    }
}

/// Attach the path to errors the client reports without one.
fn with_path(err: zk::Error, path: &str) -> CoordError {
    match map_error(err) {
        CoordError::NodeExists(_) => CoordError::NodeExists(path.to_owned()),
        CoordError::NoNode(_) => CoordError::NoNode(path.to_owned()),
        CoordError::NotEmpty(_) => CoordError::NotEmpty(path.to_owned()),
        CoordError::NoChildrenForEphemerals(_) => {
            CoordError::NoChildrenForEphemerals(path.to_owned())
        }
        other => other,
    }
}

fn create_options(mode: CreateMode) -> zk::CreateOptions<'static> {
    let mode = match mode {
        CreateMode::Persistent => zk::CreateMode::Persistent,
        CreateMode::PersistentSequential => zk::CreateMode::PersistentSequential,
        CreateMode::Ephemeral => zk::CreateMode::Ephemeral,
        CreateMode::EphemeralSequential => zk::CreateMode::EphemeralSequential,
    };
    mode.with_acls(zk::Acls::anyone_all())
}

/// Connects to a ZooKeeper ensemble.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZookeeperConnector;

#[async_trait]
impl Connector for ZookeeperConnector {
    async fn connect(
        &self,
        endpoints: &[String],
        session_timeout: Duration,
    ) -> Result<SharedSession> {
        let cluster = endpoints.join(",");
        let mut connector = zk::Client::connector();
        connector.session_timeout(session_timeout);
        let client = connector
            .connect(&cluster)
            .await
            .map_err(|err| CoordError::ConnectionLoss(format!("{}: {}", cluster, err)))?;
        info!(
            cluster = %cluster,
            timeout_ms = session_timeout.as_millis() as u64,
            "zookeeper session established"
        );
        Ok(Arc::new(ZookeeperSession {
            client: Mutex::new(Some(client)),
        }))
    }
}

/// Session over a `zookeeper_client::Client`.
///
/// The client is cheap to clone; every call works on its own clone so that
/// [`CoordinationSession::close`] only has to drop the stored handle.
pub struct ZookeeperSession {
    client: Mutex<Option<zk::Client>>,
}

impl ZookeeperSession {
    fn client(&self) -> Result<zk::Client> {
        self.client.lock().clone().ok_or(CoordError::SessionClosed)
    }
}

#[async_trait]
impl CoordinationSession for ZookeeperSession {
    async fn exists(&self, path: &str) -> Result<Option<NodeStat>> {
        let stat = self
            .client()?
            .check_stat(path)
            .await
            .map_err(|err| with_path(err, path))?;
        Ok(stat.map(|stat| NodeStat {
            version: stat.version,
            num_children: stat.num_children.max(0) as usize,
            ephemeral: stat.ephemeral_owner != 0,
        }))
    }

    async fn create(&self, request: CreateRequest) -> Result<String> {
        let options = create_options(request.mode);
        let (_, sequence) = self
            .client()?
            .create(&request.path, &request.data, &options)
            .await
            .map_err(|err| with_path(err, &request.path))?;
        if request.mode.is_sequential() {
            Ok(format!("{}{}", request.path, sequence))
        } else {
            Ok(request.path)
        }
    }

    async fn delete(&self, path: &str, version: Option<i32>) -> Result<()> {
        self.client()?
            .delete(path, version)
            .await
            .map_err(|err| with_path(err, path))
    }

    async fn children(&self, path: &str) -> Result<Vec<String>> {
        let mut children = self
            .client()?
            .list_children(path)
            .await
            .map_err(|err| with_path(err, path))?;
        children.sort();
        Ok(children)
    }

    async fn submit_batch(&self, ops: Vec<BatchOp>) -> Result<Vec<BatchOpResult>> {
        let client = self.client()?;
        let mut writer = client.new_multi_writer();
        for op in &ops {
            match op {
                BatchOp::Create(request) => writer
                    .add_create(&request.path, &request.data, &create_options(request.mode))
                    .map_err(|err| with_path(err, &request.path))?,
            }
        }
        let results = writer
            .commit()
            .await
            .map_err(|err| CoordError::Backend(format!("multi-op failed: {}", err)))?;
        results
            .into_iter()
            .map(|result| match result {
                zk::MultiWriteResult::Create { path, .. } => Ok(BatchOpResult::Created(path)),
                _ => Err(CoordError::Backend("unexpected multi-op result for create".into())),
            })
            .collect()
    }

    async fn close(&self) -> Result<()> {
        if self.client.lock().take().is_some() {
            debug!("zookeeper session handle released");
        }
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "zookeeper"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_exists_keeps_its_kind_and_gains_the_path() {
        let err = with_path(zk::Error::NodeExists, "/benchmark");
        assert!(err.is_node_exists());
        assert_eq!(err, CoordError::NodeExists("/benchmark".into()));
    }

    #[test]
    fn path_errors_carry_the_path() {
        assert_eq!(
            with_path(zk::Error::NoNode, "/missing"),
            CoordError::NoNode("/missing".into())
        );
        assert_eq!(
            with_path(zk::Error::NotEmpty, "/benchmark"),
            CoordError::NotEmpty("/benchmark".into())
        );
    }

    #[test]
    fn session_errors_map_without_a_path() {
        assert_eq!(
            map_error(zk::Error::SessionExpired),
            CoordError::SessionClosed
        );
        assert!(matches!(
            with_path(zk::Error::ConnectionLoss, "/benchmark"),
            CoordError::ConnectionLoss(_)
        ));
        assert!(matches!(map_error(zk::Error::BadVersion), CoordError::Backend(_)));
    }

    #[test]
    fn every_create_mode_has_options() {
        for mode in [
            CreateMode::Persistent,
            CreateMode::PersistentSequential,
            CreateMode::Ephemeral,
            CreateMode::EphemeralSequential,
        ] {
            let _ = create_options(mode);
        }
    }
}
