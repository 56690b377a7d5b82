use anyhow::Context;
use colored::Colorize;

use clustervol_core::bootstrap::{self, BootstrapOutcome, RealStoreLauncher};
use clustervol_core::config::Config;
use clustervol_core::logging::{self, print_banner};
use clustervol_core::metadata::MetadataApi;
use clustervol_core::smb::ExternalScriptSmbController;
use clustervol_core::store::etcd::EtcdStoreFactory;
use clustervol_core::topology::{DockerSwarmTopology, TopologyOracle};
use clustervol_core::watcher;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::setup_logging();
    print_banner("clustervol-core", |s| s.cyan().bold());

    let config_path = std::env::var("CLUSTERVOL_CONFIG").unwrap_or_else(|_| "/etc/clustervol/config.json".to_string());
    let config = Config::load(&config_path).context("loading configuration")?;

    let topology = DockerSwarmTopology::new();
    let launcher = RealStoreLauncher {
        binary: std::env::var("CLUSTERVOL_STORE_BINARY").unwrap_or_else(|_| "etcd".to_string()),
    };

    let local = topology.local_node().await.context("querying local node identity")?;
    let bootstrap_factory = EtcdStoreFactory::new(vec![config.client_url(&local.node_address)], config.request_timeout);

    let outcome = bootstrap::run(&config, &topology, &bootstrap_factory, &launcher)
        .await
        .context("cluster bootstrap")?;

    if matches!(outcome, BootstrapOutcome::NotApplicable) {
        log::info!("main: worker role, no local store or watcher to run");
        return Ok(());
    }

    let watcher_factory = EtcdStoreFactory::new(vec![config.client_url(&local.node_address)], config.request_timeout);
    let metadata_factory = EtcdStoreFactory::new(vec![config.client_url(&local.node_address)], config.request_timeout);

    let metadata = MetadataApi::new(config.clone(), Box::new(metadata_factory));
    let smb = ExternalScriptSmbController {
        start_command: std::env::var("CLUSTERVOL_SMB_START").unwrap_or_else(|_| "/usr/local/bin/smb-start".to_string()),
        stop_command: std::env::var("CLUSTERVOL_SMB_STOP").unwrap_or_else(|_| "/usr/local/bin/smb-stop".to_string()),
    };

    let (_cancel_tx, cancel_rx) = tokio::sync::oneshot::channel();
    watcher::run(&config, &metadata, &smb, &watcher_factory, cancel_rx)
        .await
        .context("refcount watcher")?;

    Ok(())
}
