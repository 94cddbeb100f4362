use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use consensus::NetworkType;
use node::{Dag, Mempool, NodeConfig};
use p2p::{AddressManager, PeerManager};
use storage::KvStore;
use tracing::info;

#[derive(Parser)]
#[command(author, version, about = "trident reference node")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the node.
    Run(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Network preset: mainnet, spade, diamond or unittest.
    #[arg(long, default_value = "mainnet")]
    network: String,
    #[arg(long, default_value = "0.0.0.0:7877")]
    bind: SocketAddr,
    /// Dial these peers directly instead of the address pool.
    #[arg(long, value_name = "HOST:PORT")]
    connect: Vec<SocketAddr>,
    /// Seed addresses feeding the address pool.
    #[arg(long, value_name = "HOST:PORT")]
    seed: Vec<SocketAddr>,
    #[arg(long, default_value = "trident-data")]
    db_path: PathBuf,
    /// Mempool capacity in transactions.
    #[arg(long, default_value_t = 100_000)]
    mempool_capacity: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run_node(args).await,
    }
}

async fn run_node(args: RunArgs) -> Result<()> {
    let network: NetworkType = args.network.parse()?;
    let config = NodeConfig::new(network, args.bind, args.connect, args.seed, args.db_path);

    consensus::select_params(config.network)?;
    let genesis = consensus::create_genesis()?;
    info!(
        network = ?config.network,
        genesis = %genesis.block.finalize_hash(),
        "network parameters selected"
    );

    let store = KvStore::open(&config.db_path)?;
    let mempool = Arc::new(Mempool::new(args.mempool_capacity));
    let dag = Arc::new(Dag::new(store, mempool.clone())?);
    let addr_man = Arc::new(AddressManager::new(config.seed_addresses()));

    let manager = PeerManager::new(config.network_config(), addr_man, dag, mempool);
    let local = manager.start().await?;
    info!(addr = %local, "node running; ctrl-c to stop");

    tokio::signal::ctrl_c().await?;
    manager.stop().await;
    info!("node stopped");
    Ok(())
}
