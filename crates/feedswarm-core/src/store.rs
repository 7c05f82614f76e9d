//! Feed store collaborator seam
//!
//! The store owns durability, content addressing, and block verification
//! for append-only logs. The registry and topic muxer only index and route
//! the opaque handles it returns; they never interpret block contents.
//!
//! `MemoryFeedStore` in [`crate::memory`] is the in-process implementation
//! used by tests and local runs. A production deployment plugs in a store
//! backed by real verified storage.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::SwarmResult;
use crate::types::FeedKey;

/// Cheap-clone opaque handle to a single append-only log
pub type FeedHandle = Arc<dyn FeedLog>;

/// One append-only log held by a feed store
#[async_trait]
pub trait FeedLog: Send + Sync {
    /// Public key identifying this feed
    fn key(&self) -> FeedKey;

    /// Whether this node holds the signing key for the feed
    fn is_writable(&self) -> bool;

    /// Wait until the log is ready for reads and appends
    async fn ready(&self) -> SwarmResult<()>;

    /// Append one block, returning its sequence number
    async fn append(&self, block: Bytes) -> SwarmResult<u64>;

    /// Read the block at `seq`, or `None` if not yet available locally
    async fn block(&self, seq: u64) -> SwarmResult<Option<Bytes>>;

    /// Number of blocks currently available locally
    async fn len(&self) -> u64;
}

/// Content-addressed store of feeds, keyed by public key
///
/// `get` is get-or-create: asking for an unknown key yields an empty,
/// non-writable feed that replication can fill in later. `writer` is the
/// get-or-create writable feed of a namespace; scoping namespaces is how
/// distinct named writers receive distinct keypairs.
#[async_trait]
pub trait FeedStore: Send + Sync {
    /// Wait until the store is ready
    async fn ready(&self) -> SwarmResult<()>;

    /// Get (or create a placeholder for) the feed with the given key
    async fn get(&self, key: &FeedKey) -> SwarmResult<FeedHandle>;

    /// Derive a store scoped under `name`
    fn namespace(&self, name: &str) -> Arc<dyn FeedStore>;

    /// Get or create the writable feed of this store's namespace
    async fn writer(&self) -> SwarmResult<FeedHandle>;

    /// Release resources held by the store
    async fn close(&self) -> SwarmResult<()>;
}
