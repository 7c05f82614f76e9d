//! Feedswarm Core Library
//!
//! Replication orchestration for dynamic sets of append-only logs
//! ("feeds") grouped under named topics.
//!
//! ## Overview
//!
//! Each peer writes its own feeds and learns everyone else's through the
//! swarm: per topic, a [`FeedRegistry`] names and persists the known feed
//! set, a [`TopicMuxer`] negotiates feed keys with every connected peer
//! (offer → manifest → request → replicate), and a [`SwarmManager`] keeps
//! connections and topics attached to each other as either comes and goes.
//! Neither side needs prior knowledge of the other's feed keys, and feeds
//! created while connections are live propagate without reconnecting.
//!
//! Feed storage and verification, wire framing, and peer discovery are
//! external collaborators behind the [`FeedStore`], [`PeerConnection`],
//! and [`DiscoveryTransport`] seams; in-process implementations live in
//! [`memory`].
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use feedswarm_core::{
//!     FeedRegistry, MemoryFeedStore, MemoryDiscovery, RecordLog,
//!     RegistryOptions, SwarmManager, TopicKey,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = MemoryFeedStore::new();
//!     let topic = TopicKey::new();
//!
//!     let registry = FeedRegistry::open(
//!         store.clone(),
//!         Arc::new(RecordLog::for_topic("~/.feedswarm/data", &topic)?),
//!         RegistryOptions { topic: Some(topic), ..Default::default() },
//!     )
//!     .await?;
//!
//!     // Author a feed
//!     let journal = registry.create_writer(Some("journal")).await?;
//!     journal.handle.append("first entry".into()).await?;
//!
//!     // Swarm the topic; connections from discovery replicate it
//!     let (discovery, events) = MemoryDiscovery::new();
//!     let swarm = SwarmManager::new(store, discovery);
//!     swarm.clone().listen(events);
//!     swarm.swarm(&registry).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod memory;
pub mod registry;
pub mod store;
pub mod sync;
pub mod types;

// Re-exports
pub use error::{SwarmError, SwarmResult};
pub use memory::{MemoryConnection, MemoryDiscovery, MemoryFeed, MemoryFeedStore};
pub use registry::{
    Feed, FeedRegistry, MemoryRecordLog, RecordLog, RegistryEvent, RegistryOptions,
    RegistryPersistence,
};
pub use store::{FeedHandle, FeedLog, FeedStore};
pub use sync::{
    ChannelCommands, DiscoveryEvent, DiscoveryOptions, DiscoveryTransport, JoinOptions,
    MuxerEvent, PeerConnection, PeerInfo, SessionChannel, SessionEvent, SwarmManager, TopicMuxer,
};
pub use types::{DiscoveryKey, FeedKey, FeedRecord, PeerId, TopicKey};
