//! Cluster Bootstrap: runs once per process, decides whether this host
//! starts a brand-new store cluster, joins an existing one, or does
//! nothing, then spawns the store process and starts the Refcount Watcher.

use std::process::{Command, Stdio};
use std::time::Instant;

use crate::config::Config;
use crate::error::{CoreError, Result};
use crate::store::{Member, ReplicatedStore, StoreClientFactory};
use crate::topology::{NodeRole, TopologyOracle};

/// What Bootstrap did, for the caller to decide whether to start the
/// Refcount Watcher.
pub enum BootstrapOutcome {
    /// This host is a worker; no local store, no watcher.
    NotApplicable,
    /// A local store client is ready; the caller should start the watcher.
    Started(Box<dyn ReplicatedStore>),
}

/// Spawns the store subprocess with the given CLI flags. Kept as a seam so
/// tests can substitute a no-op spawner.
pub trait StoreProcessLauncher: Send + Sync {
    fn spawn(&self, args: &[String]) -> Result<()>;
}

/// Launches the real store binary via `std::process::Command`.
pub struct RealStoreLauncher {
    pub binary: String,
}

impl StoreProcessLauncher for RealStoreLauncher {
    fn spawn(&self, args: &[String]) -> Result<()> {
        Command::new(&self.binary)
            .args(args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map(|_child| ())
            .map_err(|e| CoreError::StoreUnavailable(format!("failed to spawn store binary {}: {e}", self.binary)))
    }
}

/// Runs the Cluster Bootstrap algorithm.
pub async fn run(
    config: &Config,
    topology: &dyn TopologyOracle,
    store_factory: &dyn StoreClientFactory,
    launcher: &dyn StoreProcessLauncher,
) -> Result<BootstrapOutcome> {
    let local = topology.local_node().await?;

    match local.role {
        NodeRole::Worker => Ok(BootstrapOutcome::NotApplicable),
        NodeRole::ManagerLeader => bootstrap_leader(config, &local.node_id, &local.node_address, launcher, store_factory).await,
        NodeRole::ManagerFollower => {
            bootstrap_follower(config, topology, &local.node_id, &local.node_address, launcher, store_factory).await
        }
    }
}

async fn bootstrap_leader(
    config: &Config,
    node_id: &str,
    node_address: &str,
    launcher: &dyn StoreProcessLauncher,
    store_factory: &dyn StoreClientFactory,
) -> Result<BootstrapOutcome> {
    log::info!("bootstrap: role=manager-leader node_id={node_id}, starting new single-member store cluster");

    let peer_url = config.peer_url(node_address);
    let client_url = config.client_url(node_address);
    let args = vec![
        "--name".to_string(),
        node_id.to_string(),
        "--advertise-client-urls".to_string(),
        client_url,
        "--initial-advertise-peer-urls".to_string(),
        peer_url.clone(),
        "--listen-client-urls".to_string(),
        config.client_url(&config.listen_interface),
        "--listen-peer-urls".to_string(),
        config.peer_url(&config.listen_interface),
        "--initial-cluster-token".to_string(),
        config.cluster_token.clone(),
        "--initial-cluster".to_string(),
        format!("{node_id}={peer_url}"),
        "--initial-cluster-state".to_string(),
        "new".to_string(),
    ];
    launcher.spawn(&args)?;

    wait_for_local_store(config, store_factory).await
}

async fn bootstrap_follower(
    config: &Config,
    topology: &dyn TopologyOracle,
    node_id: &str,
    node_address: &str,
    launcher: &dyn StoreProcessLauncher,
    store_factory: &dyn StoreClientFactory,
) -> Result<BootstrapOutcome> {
    let leader = topology.leader().await?.ok_or(CoreError::NoLeader)?;
    log::info!("bootstrap: role=manager-follower node_id={node_id}, leader={}", leader.node_id);

    let leader_store = store_factory.connect().await?;
    let members = leader_store.member_list().await?;

    let peer_url = config.peer_url(node_address);
    let existing = members.iter().find(|m| m.peer_urls.iter().any(|u| u == &peer_url));

    let (skip_add, initial_members) = match existing {
        Some(member) if member.name.is_empty() => {
            log::info!("bootstrap: found stale reservation for peer_url={peer_url}, skipping MemberAdd");
            (true, members.clone())
        }
        Some(member) => {
            log::info!(
                "bootstrap: member {} already registered with name {:?}, data directory presumed lost; removing and re-adding",
                member.id,
                member.name
            );
            leader_store.member_remove(member.id).await?;
            (false, members.clone())
        }
        None => (false, members.clone()),
    };

    let initial_cluster = if skip_add {
        derive_initial_cluster(&initial_members)
    } else {
        let added = leader_store.member_add(&peer_url).await?;
        log::info!("bootstrap: added member id={}", added.id);
        let mut all = initial_members;
        all.push(Member {
            id: added.id,
            name: node_id.to_string(),
            peer_urls: vec![peer_url.clone()],
        });
        derive_initial_cluster(&all)
    };

    log::info!("bootstrap: derived initial-cluster={initial_cluster}");

    let client_url = config.client_url(node_address);
    let args = vec![
        "--name".to_string(),
        node_id.to_string(),
        "--advertise-client-urls".to_string(),
        client_url,
        "--initial-advertise-peer-urls".to_string(),
        peer_url,
        "--listen-client-urls".to_string(),
        config.client_url(&config.listen_interface),
        "--listen-peer-urls".to_string(),
        config.peer_url(&config.listen_interface),
        "--initial-cluster-token".to_string(),
        config.cluster_token.clone(),
        "--initial-cluster".to_string(),
        initial_cluster,
        "--initial-cluster-state".to_string(),
        "existing".to_string(),
    ];
    launcher.spawn(&args)?;

    wait_for_local_store(config, store_factory).await
}

/// Only members with a non-empty `Name` have actually joined; a member
/// reserved via `MemberAdd` but not yet started reports an empty name and
/// must not appear in `--initial-cluster`.
fn derive_initial_cluster(members: &[Member]) -> String {
    members
        .iter()
        .filter(|m| !m.name.is_empty())
        .flat_map(|m| m.peer_urls.first().map(|url| format!("{}={url}", m.name)))
        .collect::<Vec<_>>()
        .join(",")
}

async fn wait_for_local_store(
    config: &Config,
    store_factory: &dyn StoreClientFactory,
) -> Result<BootstrapOutcome> {
    let deadline = Instant::now() + std::time::Duration::from_secs(5);
    loop {
        match store_factory.connect().await {
            Ok(store) => return Ok(BootstrapOutcome::Started(store)),
            Err(_) if Instant::now() < deadline => {
                tokio::time::sleep(config.check_sleep).await;
            }
            Err(_) => return Err(CoreError::BootstrapTimeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_initial_cluster_skips_empty_names() {
        let members = vec![
            Member { id: 1, name: "leader".to_string(), peer_urls: vec!["http://10.0.0.1:2380".to_string()] },
            Member { id: 2, name: String::new(), peer_urls: vec!["http://10.0.0.2:2380".to_string()] },
        ];
        assert_eq!(derive_initial_cluster(&members), "leader=http://10.0.0.1:2380");
    }

    #[test]
    fn derive_initial_cluster_joins_multiple_members() {
        let members = vec![
            Member { id: 1, name: "a".to_string(), peer_urls: vec!["http://10.0.0.1:2380".to_string()] },
            Member { id: 2, name: "b".to_string(), peer_urls: vec!["http://10.0.0.2:2380".to_string()] },
        ];
        assert_eq!(derive_initial_cluster(&members), "a=http://10.0.0.1:2380,b=http://10.0.0.2:2380");
    }
}
