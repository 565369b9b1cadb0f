//! Host-facing configuration (SPEC_FULL.md §2, ambient). Not consumed by
//! the library itself — `PeerManager::new` takes plain values — this is
//! the `structopt` surface a host binary parses into those values.

use std::{net::SocketAddr, path::PathBuf};

use structopt::StructOpt;

use crate::common::NodeAddress;

fn default_storage_dir() -> PathBuf { PathBuf::from("./peer-manager-data") }

#[derive(Debug, Clone, StructOpt)]
#[structopt(name = "peer-manager", about = "Peer admission, eviction and catalog policy for an overlay P2P network")]
pub struct Config {
    /// Target number of connections the node tries to maintain. All other
    /// thresholds are derived from this single value (spec.md §4.6).
    #[structopt(long, default_value = "10")]
    pub max_connections: u32,

    /// Directory the persisted peer catalog is stored under.
    #[structopt(long, parse(from_os_str), default_value = "./peer-manager-data")]
    pub storage_dir: PathBuf,

    /// Well-known bootstrap addresses, classified as `SeedNode` on connect.
    #[structopt(long = "seed-address")]
    pub seed_addresses: Vec<SocketAddr>,
}

impl Config {
    pub fn seed_address_set(&self) -> std::collections::HashSet<NodeAddress> {
        self.seed_addresses.iter().copied().map(NodeAddress::from).collect()
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_connections: 10,
            storage_dir: default_storage_dir(),
            seed_addresses: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_seed_addresses_into_a_node_address_set() {
        let config = Config::from_iter(&[
            "peer-manager",
            "--max-connections",
            "20",
            "--seed-address",
            "10.0.0.1:9000",
            "--seed-address",
            "10.0.0.2:9000",
        ]);
        assert_eq!(config.max_connections, 20);
        assert_eq!(config.seed_address_set().len(), 2);
    }

    #[test]
    fn defaults_are_usable_standalone() {
        let config = Config::default();
        assert_eq!(config.max_connections, 10);
        assert!(config.seed_addresses.is_empty());
    }
}
