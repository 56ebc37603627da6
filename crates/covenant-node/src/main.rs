// Thin wiring binary: loads a NodeConfig, opens a LogEngine, and starts the
// three background surfaces a running node needs -- the peer-RPC server,
// the gossip worker, and the remote-sync worker -- over whatever `Adaptor`
// the embedder provides. No CLI beyond picking a config file, no concrete
// blob backend: this binary exists to prove the pieces wire together, not
// to be a production daemon.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use covenant_config::toml_source::TomlConfigSource;
use covenant_config::ConfigSource;
use covenant_log::{EngineConfig, LogEngine};
use covenant_net::{spawn_sync_worker, Exchanger, GossipWorker, InMemoryAdaptor, RemoteStore, RpcClient, RpcServer};

#[derive(Parser)]
#[command(name = "covenant-node")]
#[command(about = "Runs a single covenant log node")]
struct Cli {
    /// Path to the node's TOML configuration file.
    #[arg(long)]
    config: std::path::PathBuf,

    /// Enable debug-level logging.
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(tracing_subscriber::filter::LevelFilter::from_level(level))
        .init();

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    let config = TomlConfigSource::new(&cli.config)
        .load()
        .context("loading node configuration")?;

    info!(node_id = %config.my_node_id, "starting covenant node");

    let mut public_keys = config.public_keys.clone();
    public_keys.insert(config.my_node_id.clone(), config.private_key.public_key());

    let engine_config = EngineConfig {
        node_id: config.my_node_id.clone(),
        default_key: config.aes_key.clone(),
        private_key: config.private_key,
        public_keys,
        log_path: config.log_path,
        journal_path: config.journal_path,
        snapshot_dir: config.snapshot_dir,
        value_dir: config.value_dir,
    };
    let now = chrono_now();
    let engine = Arc::new(LogEngine::open(engine_config, now).context("opening log engine")?);

    // No concrete S3/GCS adaptor ships with this crate; an embedder swaps
    // this for a real `Adaptor` impl without touching anything below.
    let backend = Arc::new(InMemoryAdaptor::new());
    backend
        .create_bucket(&config.my_bucket_name)
        .await
        .context("creating local bucket")?;
    let remote_store = RemoteStore::new(backend.clone());
    let sync_store = RemoteStore::new(backend);

    let _sync_handle = spawn_sync_worker(engine.clone(), sync_store, config.my_bucket_name.clone());

    let rpc_server = Arc::new(RpcServer::new(engine.clone()));
    let rpc_server_for_task = rpc_server.clone();
    let ip_port = config.ip_port.clone();
    tokio::spawn(async move {
        if let Err(err) = rpc_server_for_task.serve(&ip_port).await {
            tracing::error!(%err, "peer rpc server exited");
        }
    });

    let rpc_client = RpcClient::new(config.node_ip_map.clone());
    let exchanger = Exchanger::new(engine.clone(), remote_store, rpc_client, config.node_bucket_map.clone());
    let peers: Vec<_> = config.node_ip_map.keys().cloned().collect();
    let gossip = GossipWorker::new(exchanger, peers, Duration::from_secs(5));
    tokio::spawn(gossip.run(chrono_now));

    info!("covenant node running; press ctrl-c to stop");
    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    info!("shutting down");
    Ok(())
}

/// Wall-clock seconds since the Unix epoch. The only place in this binary
/// that is allowed to know what time it is; everything downstream takes a
/// timestamp as a plain argument.
fn chrono_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before 1970")
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_is_monotonic_within_a_call() {
        let a = chrono_now();
        let b = chrono_now();
        assert!(b >= a);
    }
}
