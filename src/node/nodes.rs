use std::collections::HashSet;
use std::net::SocketAddr;
use tokio::sync::RwLock;

/// The known-peers set. A `HashSet` keeps every code path that learns a new
/// address deduplicating; unreachable peers are evicted on dial failure.
#[derive(Default)]
pub struct Nodes {
    inner: RwLock<HashSet<SocketAddr>>,
}

impl Nodes {
    pub fn new() -> Nodes {
        Nodes {
            inner: RwLock::new(HashSet::new()),
        }
    }

    pub async fn add_node(&self, addr: SocketAddr) {
        self.inner.write().await.insert(addr);
    }

    pub async fn add_nodes(&self, addrs: impl IntoIterator<Item = SocketAddr>) {
        let mut inner = self.inner.write().await;
        inner.extend(addrs);
    }

    pub async fn evict_node(&self, addr: &SocketAddr) {
        self.inner.write().await.remove(addr);
    }

    pub async fn node_is_known(&self, addr: &SocketAddr) -> bool {
        self.inner.read().await.contains(addr)
    }

    pub async fn get_nodes(&self) -> Vec<SocketAddr> {
        self.inner.read().await.iter().copied().collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}
