//! Outbound message delivery. Each send dials the peer, writes one framed
//! message and closes the write side. The node-aware wrappers evict a peer
//! from the known set when it cannot be reached; `send_data` itself stays
//! usable from the CLI where no peer set exists.

use super::message::{OpType, Package, NODE_VERSION};
use crate::core::{Block, Transaction};
use crate::error::{CoinError, Result};
use crate::node::NodeContext;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, error};

const TCP_WRITE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Dials `addr_to` and delivers one message. Fails with `PeerUnreachable`
/// when the peer does not answer in time.
pub async fn send_data(addr_to: SocketAddr, pkg: &Package) -> Result<()> {
    debug!("sending {} to {}", pkg.command(), addr_to);
    let bytes = pkg.to_bytes()?;
    let deliver = async {
        let mut stream = TcpStream::connect(addr_to)
            .await
            .map_err(|_| CoinError::PeerUnreachable(addr_to))?;
        stream
            .write_all(bytes.as_slice())
            .await
            .map_err(|e| CoinError::Network(e.to_string()))?;
        stream
            .shutdown()
            .await
            .map_err(|e| CoinError::Network(e.to_string()))?;
        Ok(())
    };
    timeout(TCP_WRITE_TIMEOUT, deliver)
        .await
        .unwrap_or(Err(CoinError::PeerUnreachable(addr_to)))
}

/// Sends through the node, dropping unreachable peers from the known set.
async fn deliver(node: &NodeContext, addr_to: SocketAddr, pkg: Package) {
    match send_data(addr_to, &pkg).await {
        Ok(()) => {}
        Err(CoinError::PeerUnreachable(addr)) => {
            error!("peer {} is unreachable, evicting it", addr);
            node.peers().evict_node(&addr).await;
        }
        Err(e) => error!("failed to send {} to {}: {}", pkg.command(), addr_to, e),
    }
}

pub async fn send_version(node: &NodeContext, addr_to: SocketAddr, best_height: usize) {
    let pkg = Package::Version {
        addr_from: node.node_addr(),
        version: NODE_VERSION,
        best_height,
    };
    deliver(node, addr_to, pkg).await;
}

pub async fn send_get_blocks(node: &NodeContext, addr_to: SocketAddr) {
    let pkg = Package::GetBlocks {
        addr_from: node.node_addr(),
    };
    deliver(node, addr_to, pkg).await;
}

pub async fn send_inv(node: &NodeContext, addr_to: SocketAddr, op_type: OpType, items: &[Vec<u8>]) {
    let pkg = Package::Inv {
        addr_from: node.node_addr(),
        op_type,
        items: items.to_vec(),
    };
    deliver(node, addr_to, pkg).await;
}

pub async fn send_get_data(node: &NodeContext, addr_to: SocketAddr, op_type: OpType, id: &[u8]) {
    let pkg = Package::GetData {
        addr_from: node.node_addr(),
        op_type,
        id: id.to_vec(),
    };
    deliver(node, addr_to, pkg).await;
}

pub async fn send_block(node: &NodeContext, addr_to: SocketAddr, block: &Block) -> Result<()> {
    let pkg = Package::Block {
        addr_from: node.node_addr(),
        block: block.serialize()?,
    };
    deliver(node, addr_to, pkg).await;
    Ok(())
}

pub async fn send_tx(node: &NodeContext, addr_to: SocketAddr, tx: &Transaction) -> Result<()> {
    let pkg = Package::Tx {
        addr_from: node.node_addr(),
        transaction: tx.serialize()?,
    };
    deliver(node, addr_to, pkg).await;
    Ok(())
}

/// Submits a locally built transaction to a node, used by the CLI `send`
/// path. Unlike the gossip sends, delivery failure surfaces to the caller.
pub async fn submit_transaction(addr_to: SocketAddr, from: SocketAddr, tx: &Transaction) -> Result<()> {
    let pkg = Package::Tx {
        addr_from: from,
        transaction: tx.serialize()?,
    };
    send_data(addr_to, &pkg).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[tokio::test]
    async fn unreachable_peer_is_reported() {
        // nothing listens on this port
        let addr = SocketAddr::from_str("127.0.0.1:59999").expect("parse failed");
        let pkg = Package::GetBlocks { addr_from: addr };
        assert!(matches!(
            send_data(addr, &pkg).await,
            Err(CoinError::PeerUnreachable(_))
        ));
    }

    #[tokio::test]
    async fn message_arrives_whole() {
        use tokio::io::AsyncReadExt;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind failed");
        let addr = listener.local_addr().expect("local addr");

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.expect("accept failed");
            let mut buf = vec![];
            stream.read_to_end(&mut buf).await.expect("read failed");
            buf
        });

        let pkg = Package::Inv {
            addr_from: addr,
            op_type: OpType::Block,
            items: vec![vec![5u8; 32]],
        };
        send_data(addr, &pkg).await.expect("send failed");

        let received = server.await.expect("server task failed");
        let decoded = Package::from_bytes(received.as_slice()).expect("decode failed");
        assert_eq!(decoded.command(), "inv");
    }
}
