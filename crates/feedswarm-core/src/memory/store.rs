//! In-memory feed store
//!
//! Per-node store keyed by feed public key. Writable feeds get fresh
//! ed25519 keypairs; unknown keys yield empty read-only shells that
//! replication fills in. Namespaces are path prefixes over one shared
//! backing, so `namespace("a").namespace("b")` and `namespace("a/b/")`
//! address the same writer.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use ed25519_dalek::SigningKey;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::error::{SwarmError, SwarmResult};
use crate::store::{FeedHandle, FeedLog, FeedStore};
use crate::types::FeedKey;

#[derive(Default)]
struct StoreState {
    /// Every feed in the backing, keyed by public key
    feeds: HashMap<FeedKey, Arc<MemoryFeed>>,
    /// Namespace path → writer feed key, so `writer()` is get-or-create
    writers: HashMap<String, FeedKey>,
}

/// In-memory append-only log
pub struct MemoryFeed {
    key: FeedKey,
    writable: bool,
    blocks: Mutex<Vec<Bytes>>,
    /// Tracks the block count; replication mirrors watch it so no append
    /// is missed between copies
    length: watch::Sender<u64>,
}

impl MemoryFeed {
    fn writable() -> Self {
        // Seeded from the OS rng directly; the signing key itself is not
        // retained since block verification lives outside this store.
        let mut seed = [0u8; 32];
        getrandom::getrandom(&mut seed).expect("Failed to get random bytes");
        let signing = SigningKey::from_bytes(&seed);
        Self {
            key: FeedKey::from_bytes(signing.verifying_key().to_bytes()),
            writable: true,
            blocks: Mutex::new(Vec::new()),
            length: watch::channel(0).0,
        }
    }

    fn remote(key: FeedKey) -> Self {
        Self {
            key,
            writable: false,
            blocks: Mutex::new(Vec::new()),
            length: watch::channel(0).0,
        }
    }

    /// Current number of blocks
    pub fn block_count(&self) -> u64 {
        self.blocks.lock().len() as u64
    }

    /// Synchronous block read
    pub fn block_at(&self, seq: u64) -> Option<Bytes> {
        self.blocks.lock().get(seq as usize).cloned()
    }

    /// Watch the block count as it grows
    pub fn subscribe_length(&self) -> watch::Receiver<u64> {
        self.length.subscribe()
    }

    /// Replication-side write path: accept the block at `seq` if it is the
    /// next one. Writable feeds only accept their author's appends.
    pub(crate) fn put(&self, seq: u64, block: Bytes) {
        if self.writable {
            return;
        }
        let mut blocks = self.blocks.lock();
        if seq == blocks.len() as u64 {
            blocks.push(block);
            let len = blocks.len() as u64;
            drop(blocks);
            self.length.send_replace(len);
        }
    }
}

#[async_trait]
impl FeedLog for MemoryFeed {
    fn key(&self) -> FeedKey {
        self.key
    }

    fn is_writable(&self) -> bool {
        self.writable
    }

    async fn ready(&self) -> SwarmResult<()> {
        Ok(())
    }

    async fn append(&self, block: Bytes) -> SwarmResult<u64> {
        if !self.writable {
            return Err(SwarmError::StoreUnavailable(format!(
                "feed {} is not writable here",
                self.key
            )));
        }
        let (seq, len) = {
            let mut blocks = self.blocks.lock();
            blocks.push(block);
            (blocks.len() as u64 - 1, blocks.len() as u64)
        };
        self.length.send_replace(len);
        Ok(seq)
    }

    async fn block(&self, seq: u64) -> SwarmResult<Option<Bytes>> {
        Ok(self.block_at(seq))
    }

    async fn len(&self) -> u64 {
        self.block_count()
    }
}

/// In-memory implementation of [`FeedStore`]
pub struct MemoryFeedStore {
    state: Arc<Mutex<StoreState>>,
    prefix: String,
}

impl MemoryFeedStore {
    /// Create a fresh store backing
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Arc::new(Mutex::new(StoreState::default())),
            prefix: String::new(),
        })
    }

    /// Concrete handle into the backing, creating a shell if needed.
    /// Used by the in-process transport to mirror block content.
    pub(crate) fn feed(&self, key: &FeedKey) -> Arc<MemoryFeed> {
        let mut state = self.state.lock();
        state
            .feeds
            .entry(*key)
            .or_insert_with(|| Arc::new(MemoryFeed::remote(*key)))
            .clone()
    }
}

#[async_trait]
impl FeedStore for MemoryFeedStore {
    async fn ready(&self) -> SwarmResult<()> {
        Ok(())
    }

    async fn get(&self, key: &FeedKey) -> SwarmResult<FeedHandle> {
        let handle: FeedHandle = self.feed(key);
        Ok(handle)
    }

    fn namespace(&self, name: &str) -> Arc<dyn FeedStore> {
        Arc::new(Self {
            state: self.state.clone(),
            prefix: format!("{}{}/", self.prefix, name),
        })
    }

    async fn writer(&self) -> SwarmResult<FeedHandle> {
        let mut state = self.state.lock();
        if let Some(key) = state.writers.get(&self.prefix).copied() {
            if let Some(feed) = state.feeds.get(&key) {
                let handle: FeedHandle = feed.clone();
                return Ok(handle);
            }
        }
        let feed = Arc::new(MemoryFeed::writable());
        let key = feed.key();
        state.feeds.insert(key, feed.clone());
        state.writers.insert(self.prefix.clone(), key);
        let handle: FeedHandle = feed;
        Ok(handle)
    }

    async fn close(&self) -> SwarmResult<()> {
        Ok(())
    }
}
