//! Shared harness for integration tests: one in-process "node" per peer,
//! wired together with memory connections.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use feedswarm_core::{
    Feed, FeedHandle, FeedLog, FeedRegistry, MemoryConnection, MemoryDiscovery, MemoryFeedStore,
    MemoryRecordLog, PeerInfo, RegistryOptions, SwarmManager, TopicKey, TopicMuxer,
};

pub const CONVERGE_TIMEOUT: Duration = Duration::from_secs(5);

/// One peer: a store, a discovery transport, and a listening swarm manager
pub struct Node {
    pub store: Arc<MemoryFeedStore>,
    pub discovery: Arc<MemoryDiscovery>,
    pub swarm: Arc<SwarmManager>,
}

impl Node {
    pub fn new() -> Self {
        let store = MemoryFeedStore::new();
        let (discovery, events) = MemoryDiscovery::new();
        let swarm = SwarmManager::new(store.clone(), discovery.clone());
        swarm.clone().listen(events);
        Self {
            store,
            discovery,
            swarm,
        }
    }

    /// Open a registry for a topic with in-memory persistence
    pub async fn open_registry(&self, topic: TopicKey) -> Arc<FeedRegistry> {
        FeedRegistry::open(
            self.store.clone(),
            Arc::new(MemoryRecordLog::new()),
            RegistryOptions {
                topic: Some(topic),
                ..Default::default()
            },
        )
        .await
        .expect("registry open")
    }
}

/// Connect two nodes and feed the connection into both swarm managers
pub fn connect(a: &Node, b: &Node) -> (Arc<MemoryConnection>, Arc<MemoryConnection>) {
    let (conn_a, conn_b) = MemoryConnection::pair(a.store.clone(), b.store.clone());
    a.discovery.connect(conn_a.clone(), PeerInfo::default());
    b.discovery.connect(conn_b.clone(), PeerInfo::default());
    (conn_a, conn_b)
}

pub async fn wait_for_feed_count(registry: &FeedRegistry, n: usize) {
    let deadline = tokio::time::Instant::now() + CONVERGE_TIMEOUT;
    while registry.len().await != n {
        if tokio::time::Instant::now() > deadline {
            panic!(
                "registry did not reach {} feeds (has {})",
                n,
                registry.len().await
            );
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub async fn wait_for_session_count(muxer: &TopicMuxer, n: usize) {
    let deadline = tokio::time::Instant::now() + CONVERGE_TIMEOUT;
    while muxer.session_count().await != n {
        if tokio::time::Instant::now() > deadline {
            panic!("muxer did not reach {} sessions", n);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Poll until the block at `seq` replicated over
pub async fn wait_for_block(handle: &FeedHandle, seq: u64) -> Bytes {
    let deadline = tokio::time::Instant::now() + CONVERGE_TIMEOUT;
    loop {
        if let Some(block) = handle.block(seq).await.expect("block read") {
            return block;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("block {} of {} never arrived", seq, handle.key());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Hex keys of a feed list, sorted for comparison
pub fn sorted_keys(feeds: &[Feed]) -> Vec<String> {
    let mut keys: Vec<String> = feeds.iter().map(|f| f.key.to_hex()).collect();
    keys.sort();
    keys
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
