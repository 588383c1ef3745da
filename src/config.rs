use once_cell::sync::Lazy;
use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

pub static GLOBAL_CONFIG: Lazy<Config> = Lazy::new(Config::new);

/// Every node in a deployment listens on `127.0.0.1:<NODE_ID>`; the node id
/// also suffixes the data directory and wallet file so several nodes can run
/// out of the same working directory.
const NODE_ID_KEY: &str = "NODE_ID";
const DEFAULT_NODE_ID: &str = "3000";

const TREE_DIR_KEY: &str = "TREE_DIR";
const WALLET_FILE_KEY: &str = "WALLET_FILE";

pub struct Config {
    node_id: String,
    node_addr: SocketAddr,
}

impl Config {
    pub fn new() -> Config {
        let node_id = env::var(NODE_ID_KEY).unwrap_or_else(|_| DEFAULT_NODE_ID.to_string());
        let port = node_id.parse().unwrap_or(3000);
        let node_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), port);
        Config { node_id, node_addr }
    }

    pub fn get_node_addr(&self) -> SocketAddr {
        self.node_addr
    }

    pub fn get_node_id(&self) -> &str {
        self.node_id.as_str()
    }

    /// Directory of the sled store holding the `blocks` and `utxoset` trees.
    pub fn get_data_dir(&self) -> PathBuf {
        env::var(TREE_DIR_KEY)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(format!("data_{}", self.node_id)))
    }

    pub fn get_wallet_file(&self) -> PathBuf {
        env::var(WALLET_FILE_KEY)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(format!("wallet_{}.dat", self.node_id)))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
