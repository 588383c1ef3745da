//! The node's shared state, gathered into one value owned by `main` and
//! cloned into every connection task: the chain store, the mempool, the
//! blocks-in-transit sync queue, the known-peers set, the miner's payout
//! address and the shutdown flag. Nothing here lives in a process global.

use super::memory_pool::{BlocksInTransit, MemoryPool};
use super::nodes::Nodes;
use crate::core::proof_of_work::CancelFlag;
use crate::network::server::CENTRAL_NODE;
use crate::store::Blockchain;
use crate::wallet::WalletAddress;
use std::net::SocketAddr;
use std::sync::Arc;

#[derive(Clone)]
pub struct NodeContext {
    blockchain: Blockchain,
    node_addr: SocketAddr,
    mempool: Arc<MemoryPool>,
    blocks_in_transit: Arc<BlocksInTransit>,
    peers: Arc<Nodes>,
    mining_address: Option<WalletAddress>,
    cancel: CancelFlag,
}

impl NodeContext {
    /// Builds the node state around an open chain store and the address the
    /// node listens on. A `Some` mining address makes this a miner node.
    pub fn new(
        blockchain: Blockchain,
        node_addr: SocketAddr,
        mining_address: Option<WalletAddress>,
    ) -> NodeContext {
        NodeContext {
            blockchain,
            node_addr,
            mempool: Arc::new(MemoryPool::new()),
            blocks_in_transit: Arc::new(BlocksInTransit::new()),
            peers: Arc::new(Nodes::new()),
            mining_address,
            cancel: CancelFlag::new(),
        }
    }

    pub async fn seed_bootstrap_peer(&self) {
        self.peers.add_node(CENTRAL_NODE).await;
    }

    pub fn blockchain(&self) -> &Blockchain {
        &self.blockchain
    }

    pub fn mempool(&self) -> &MemoryPool {
        &self.mempool
    }

    pub fn blocks_in_transit(&self) -> &BlocksInTransit {
        &self.blocks_in_transit
    }

    pub fn peers(&self) -> &Nodes {
        &self.peers
    }

    pub fn mining_address(&self) -> Option<&WalletAddress> {
        self.mining_address.as_ref()
    }

    pub fn is_miner(&self) -> bool {
        self.mining_address.is_some()
    }

    pub fn cancel(&self) -> &CancelFlag {
        &self.cancel
    }

    pub fn node_addr(&self) -> SocketAddr {
        self.node_addr
    }

    /// Whether this node is the hard-coded bootstrap every other node dials
    /// first.
    pub fn is_bootstrap(&self) -> bool {
        self.node_addr() == CENTRAL_NODE
    }
}
