pub mod config;
pub mod core;
pub mod crypto;
pub mod error;
pub mod network;
pub mod node;
pub mod store;
pub mod wallet;

pub use config::{Config, GLOBAL_CONFIG};
pub use core::{Block, CancelFlag, TXInput, TXOutput, Transaction, SUBSIDY};
pub use error::{CoinError, Result};
pub use network::{OpType, Package, Server, CENTRAL_NODE};
pub use node::NodeContext;
pub use store::{Blockchain, BlockchainIterator, UTXOSet};
pub use wallet::{
    convert_address, hash_pub_key, pub_key_hash_from_address, validate_address, Wallet,
    WalletAddress, Wallets,
};
