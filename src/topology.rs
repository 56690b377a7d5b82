//! Orchestrator topology queries.
//!
//! The core needs to know, on every host, which of three roles it plays in
//! the surrounding orchestrator (worker, manager-follower, manager-leader)
//! and who the current leader and manager set are. `TopologyOracle` is the
//! seam; `DockerSwarmTopology` is the concrete implementation for a Docker
//! Swarm cluster, shelling out to the `docker` CLI and parsing its JSON
//! output with `serde_json`.

use async_trait::async_trait;
use serde::Deserialize;
use std::process::Command;

use crate::error::{CoreError, Result};

/// A host's role in the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    Worker,
    ManagerFollower,
    ManagerLeader,
}

/// Identity and role of the host the core is running on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalNode {
    pub node_id: String,
    pub node_address: String,
    pub role: NodeRole,
}

/// Queries the orchestrator for topology facts.
#[async_trait]
pub trait TopologyOracle: Send + Sync {
    /// Identity and role of the host this process runs on.
    async fn local_node(&self) -> Result<LocalNode>;

    /// The current manager-leader, if the cluster has settled on one.
    async fn leader(&self) -> Result<Option<LocalNode>>;

    /// All manager nodes (leader and followers).
    async fn managers(&self) -> Result<Vec<LocalNode>>;
}

/// `TopologyOracle` backed by the `docker` CLI against a Swarm cluster.
pub struct DockerSwarmTopology {
    docker_bin: String,
}

impl Default for DockerSwarmTopology {
    fn default() -> Self {
        Self::new()
    }
}

impl DockerSwarmTopology {
    pub fn new() -> Self {
        Self {
            docker_bin: "docker".to_string(),
        }
    }

    fn run_json<T: for<'de> Deserialize<'de>>(&self, args: &[&str]) -> Result<T> {
        let output = Command::new(&self.docker_bin)
            .args(args)
            .output()
            .map_err(|e| CoreError::OrchestratorUnavailable(format!("spawning docker: {e}")))?;
        if !output.status.success() {
            return Err(CoreError::OrchestratorUnavailable(format!(
                "docker {} exited with {}: {}",
                args.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        serde_json::from_slice(&output.stdout)
            .map_err(|e| CoreError::OrchestratorUnavailable(format!("parsing docker output: {e}")))
    }

    /// `docker node ls -q` to enumerate IDs, then `docker node inspect` on
    /// all of them at once to get full status including `ManagerStatus`
    /// (absent from `node ls`'s own output).
    fn all_nodes(&self) -> Result<Vec<DockerNode>> {
        let output = Command::new(&self.docker_bin)
            .args(["node", "ls", "-q"])
            .output()
            .map_err(|e| CoreError::OrchestratorUnavailable(format!("spawning docker: {e}")))?;
        if !output.status.success() {
            return Err(CoreError::OrchestratorUnavailable(format!(
                "docker node ls exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        let ids: Vec<&str> = std::str::from_utf8(&output.stdout)
            .map_err(|e| CoreError::OrchestratorUnavailable(format!("decoding docker output: {e}")))?
            .lines()
            .filter(|l| !l.is_empty())
            .collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut args = vec!["node", "inspect"];
        args.extend(ids);
        self.run_json(&args)
    }

    fn node_to_local(node: &DockerNode) -> LocalNode {
        let role = match (node.manager_status.is_some(), node.manager_status.as_ref().map(|m| m.leader).unwrap_or(false)) {
            (true, true) => NodeRole::ManagerLeader,
            (true, false) => NodeRole::ManagerFollower,
            (false, _) => NodeRole::Worker,
        };
        LocalNode {
            node_id: node.id.clone(),
            node_address: node.status.addr.clone(),
            role,
        }
    }
}

#[async_trait]
impl TopologyOracle for DockerSwarmTopology {
    async fn local_node(&self) -> Result<LocalNode> {
        let nodes: Vec<DockerNode> = self.run_json(&["node", "inspect", "self"])?;
        let node = nodes
            .first()
            .ok_or_else(|| CoreError::OrchestratorUnavailable("docker node inspect self returned no node".into()))?;
        Ok(Self::node_to_local(node))
    }

    async fn leader(&self) -> Result<Option<LocalNode>> {
        Ok(self
            .all_nodes()?
            .iter()
            .map(Self::node_to_local)
            .find(|n| n.role == NodeRole::ManagerLeader))
    }

    async fn managers(&self) -> Result<Vec<LocalNode>> {
        Ok(self
            .all_nodes()?
            .iter()
            .map(Self::node_to_local)
            .filter(|n| n.role != NodeRole::Worker)
            .collect())
    }
}

#[derive(Debug, Deserialize)]
struct DockerNode {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Status")]
    status: DockerNodeStatus,
    #[serde(rename = "ManagerStatus")]
    manager_status: Option<DockerManagerStatus>,
}

#[derive(Debug, Deserialize)]
struct DockerNodeStatus {
    #[serde(rename = "Addr")]
    addr: String,
}

#[derive(Debug, Deserialize)]
struct DockerManagerStatus {
    #[serde(rename = "Leader", default)]
    leader: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_has_no_manager_status() {
        let node = DockerNode {
            id: "abc".to_string(),
            status: DockerNodeStatus { addr: "10.0.0.1".to_string() },
            manager_status: None,
        };
        let local = DockerSwarmTopology::node_to_local(&node);
        assert_eq!(local.role, NodeRole::Worker);
        assert_eq!(local.node_address, "10.0.0.1");
    }

    #[test]
    fn manager_leader_detected() {
        let node = DockerNode {
            id: "abc".to_string(),
            status: DockerNodeStatus { addr: "10.0.0.2".to_string() },
            manager_status: Some(DockerManagerStatus { leader: true }),
        };
        assert_eq!(DockerSwarmTopology::node_to_local(&node).role, NodeRole::ManagerLeader);
    }

    #[test]
    fn manager_follower_detected() {
        let node = DockerNode {
            id: "abc".to_string(),
            status: DockerNodeStatus { addr: "10.0.0.3".to_string() },
            manager_status: Some(DockerManagerStatus { leader: false }),
        };
        assert_eq!(DockerSwarmTopology::node_to_local(&node).role, NodeRole::ManagerFollower);
    }
}
