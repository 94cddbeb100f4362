use std::net::SocketAddr;
use std::path::PathBuf;

use consensus::NetworkType;
use p2p::{NetAddress, NetworkConfig};

/// High level runtime configuration for the reference node.
#[derive(Clone, Debug)]
pub struct NodeConfig {
    pub network: NetworkType,
    pub bind: SocketAddr,
    pub connect: Vec<SocketAddr>,
    pub seeds: Vec<SocketAddr>,
    pub db_path: PathBuf,
}

impl NodeConfig {
    pub fn new(
        network: NetworkType,
        bind: SocketAddr,
        connect: Vec<SocketAddr>,
        seeds: Vec<SocketAddr>,
        db_path: PathBuf,
    ) -> Self {
        Self {
            network,
            bind,
            connect,
            seeds,
            db_path,
        }
    }

    pub fn seed_addresses(&self) -> Vec<NetAddress> {
        self.seeds.iter().copied().map(NetAddress::from).collect()
    }

    pub fn network_config(&self) -> NetworkConfig {
        NetworkConfig {
            bind: self.bind,
            connect: self.connect.clone(),
            seeds: self.seed_addresses(),
            ..NetworkConfig::default()
        }
    }
}
