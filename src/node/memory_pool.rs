use crate::core::Transaction;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Pending transactions not yet included in a block, keyed by hex txid.
/// Entries arrive with valid `tx` messages and leave when a mined block
/// carries them.
#[derive(Default)]
pub struct MemoryPool {
    inner: RwLock<HashMap<String, Transaction>>,
}

impl MemoryPool {
    pub fn new() -> MemoryPool {
        MemoryPool {
            inner: RwLock::new(HashMap::new()),
        }
    }

    pub async fn contains(&self, txid_hex: &str) -> bool {
        self.inner.read().await.contains_key(txid_hex)
    }

    pub async fn add(&self, tx: Transaction) {
        let txid_hex = tx.get_tx_id_hex();
        self.inner.write().await.insert(txid_hex, tx);
    }

    pub async fn get(&self, txid_hex: &str) -> Option<Transaction> {
        self.inner.read().await.get(txid_hex).cloned()
    }

    pub async fn remove(&self, txid_hex: &str) {
        self.inner.write().await.remove(txid_hex);
    }

    pub async fn get_all(&self) -> Vec<Transaction> {
        self.inner.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

/// Block hashes announced by a peer and still to be fetched, drained head
/// first. One sync batch is in flight at a time.
#[derive(Default)]
pub struct BlocksInTransit {
    inner: RwLock<Vec<Vec<u8>>>,
}

impl BlocksInTransit {
    pub fn new() -> BlocksInTransit {
        BlocksInTransit {
            inner: RwLock::new(vec![]),
        }
    }

    /// Replaces the queue with a freshly announced inventory.
    pub async fn set(&self, hashes: &[Vec<u8>]) {
        let mut inner = self.inner.write().await;
        inner.clear();
        inner.extend(hashes.iter().cloned());
    }

    pub async fn pop_front(&self) -> Option<Vec<u8>> {
        let mut inner = self.inner.write().await;
        if inner.is_empty() {
            None
        } else {
            Some(inner.remove(0))
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    pub async fn clear(&self) {
        self.inner.write().await.clear();
    }
}
