//! Topic-scoped feed registry
//!
//! A `FeedRegistry` is the bookkeeping layer of one topic: it maps
//! human-assigned names to feed keys in both directions, persists every
//! newly-known feed as an append-only record, and feeds its topic muxer so
//! registered feeds reach connected peers.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  FeedRegistry                                                   │
//! │  ├── by_key / by_name: bidirectional in-memory indices          │
//! │  ├── persistence: append-only FeedRecord log (replayed on open) │
//! │  ├── muxer: TopicMuxer for this topic                           │
//! │  │     feeds discovered during replication flow back in and     │
//! │  │     get named + persisted here                               │
//! │  └── events: broadcast of FeedAdded / PersistFailed             │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod persist;

use std::sync::Arc;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{SwarmError, SwarmResult};
use crate::store::{FeedHandle, FeedLog, FeedStore};
use crate::sync::topic::{MuxerEvent, TopicMuxer};
use crate::types::{instance_id, DiscoveryKey, FeedKey, FeedRecord, TopicKey};

pub use persist::{MemoryRecordLog, RecordLog, RegistryPersistence};

/// Well-known root key used only when the caller explicitly opts in to the
/// insecure default topic. Every deployment that opts in shares it, so it
/// must never protect real data.
const DEFAULT_TOPIC_KEY: [u8; 32] = [
    0xbe, 0xe8, 0x0f, 0xf3, 0xa4, 0xee, 0x5e, 0x72, 0x7d, 0xc4, 0x41, 0x97, 0xcb, 0x9d, 0x25,
    0xbf, 0x8f, 0x19, 0xd5, 0x0b, 0x0f, 0x3a, 0xd2, 0x98, 0x4c, 0xfe, 0x5b, 0x7d, 0x14, 0xe7,
    0x5d, 0xe7,
];

/// Store namespace prefix for a topic's feeds
const TOPIC_NAMESPACE_PREFIX: &str = "feedswarm/topic/";
/// Store namespace prefix for a named writer inside a topic
const FEED_NAMESPACE_PREFIX: &str = "feed/";

/// Default capacity for the registry event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// A feed known to a registry
#[derive(Clone)]
pub struct Feed {
    /// Public key of the feed
    pub key: FeedKey,
    /// Name of the feed, unique within the topic
    pub name: String,
    /// Handle into the feed store
    pub handle: FeedHandle,
}

impl std::fmt::Debug for Feed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Feed")
            .field("key", &self.key)
            .field("name", &self.name)
            .finish()
    }
}

/// Events emitted by a registry
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    /// A feed was registered (locally created or discovered from a peer)
    FeedAdded {
        /// The feed's public key
        key: FeedKey,
        /// The feed's assigned name
        name: String,
    },
    /// Appending a feed record failed; the feed remains registered
    PersistFailed {
        /// The feed whose record could not be appended
        key: FeedKey,
        /// Error message
        error: String,
    },
}

/// Configuration for opening a registry
#[derive(Debug, Clone, Default)]
pub struct RegistryOptions {
    /// Root key of the topic. When absent, opening fails unless
    /// `allow_default_topic` is set.
    pub topic: Option<TopicKey>,
    /// Opt in to the well-known insecure default topic when no root key is
    /// supplied. Never enabled implicitly.
    pub allow_default_topic: bool,
}

#[derive(Default)]
struct RegistryInner {
    by_key: std::collections::HashMap<FeedKey, Feed>,
    by_name: std::collections::HashMap<String, Feed>,
}

/// Per-topic name↔key index with append-only persistence
pub struct FeedRegistry {
    /// Short instance tag for log output
    id: String,
    topic: TopicKey,
    store: Arc<dyn FeedStore>,
    persistence: Arc<dyn RegistryPersistence>,
    muxer: Arc<TopicMuxer>,
    inner: Mutex<RegistryInner>,
    events_tx: broadcast::Sender<RegistryEvent>,
    /// Serializes create_writer so two concurrent calls for the same
    /// unregistered name cannot create two feeds
    writer_lock: Mutex<()>,
    /// Consumer of the muxer's feed-discovered events
    feed_task: SyncMutex<Option<JoinHandle<()>>>,
}

impl FeedRegistry {
    /// Open a registry: ready the store and the record log, replay all
    /// persisted records, and start consuming the muxer's discovered feeds.
    ///
    /// Replay does not re-persist, so restarting never duplicates records.
    /// Fails with `StoreUnavailable` when the store or the log cannot be
    /// readied; the failure is scoped to this topic only.
    pub async fn open(
        store: Arc<dyn FeedStore>,
        persistence: Arc<dyn RegistryPersistence>,
        options: RegistryOptions,
    ) -> SwarmResult<Arc<Self>> {
        let topic = match options.topic {
            Some(topic) => topic,
            None if options.allow_default_topic => {
                warn!("Using insecure default topic key");
                TopicKey::from_bytes(DEFAULT_TOPIC_KEY)
            }
            None => return Err(SwarmError::MissingTopicKey),
        };

        let store = store.namespace(&format!("{}{}", TOPIC_NAMESPACE_PREFIX, topic.to_hex()));
        store
            .ready()
            .await
            .map_err(|e| SwarmError::StoreUnavailable(e.to_string()))?;
        persistence
            .ready()
            .await
            .map_err(|e| SwarmError::StoreUnavailable(e.to_string()))?;

        let muxer = Arc::new(TopicMuxer::new(store.clone(), topic));
        let registry = Arc::new(Self {
            id: instance_id(),
            topic,
            store,
            persistence,
            muxer,
            inner: Mutex::new(RegistryInner::default()),
            events_tx: broadcast::channel(EVENT_CHANNEL_CAPACITY).0,
            writer_lock: Mutex::new(()),
            feed_task: SyncMutex::new(None),
        });

        registry.replay().await?;
        Self::spawn_feed_consumer(&registry);

        let feeds = registry.len().await;
        info!(registry = %registry.id, topic = %registry.topic, feeds, "Registry open");
        Ok(registry)
    }

    /// Replay the persisted record sequence into the in-memory indices
    async fn replay(&self) -> SwarmResult<()> {
        let records = self
            .persistence
            .fetch_records()
            .await
            .map_err(|e| SwarmError::StoreUnavailable(e.to_string()))?;

        for record in records {
            let key = record.feed_key()?;
            if self.inner.lock().await.by_key.contains_key(&key) {
                // First occurrence wins.
                continue;
            }
            let handle = self
                .store
                .get(&key)
                .await
                .map_err(|e| SwarmError::StoreUnavailable(e.to_string()))?;
            self.add_feed(handle, Some(record.name), false).await;
        }
        Ok(())
    }

    /// Consume muxer discovery events: feeds resolved during replication
    /// get an auto-assigned name and are persisted on first sight.
    fn spawn_feed_consumer(registry: &Arc<Self>) {
        let weak = Arc::downgrade(registry);
        let mut rx = registry.muxer.subscribe();
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(MuxerEvent::FeedDiscovered { handle, .. }) => {
                        let Some(registry) = weak.upgrade() else { break };
                        registry.add_feed(handle, None, true).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Lagged behind on muxer events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        *registry.feed_task.lock() = Some(task);
    }

    /// The topic this registry belongs to
    pub fn topic(&self) -> &TopicKey {
        &self.topic
    }

    /// Discovery key of the topic
    pub fn discovery_key(&self) -> DiscoveryKey {
        self.topic.discovery_key()
    }

    /// The topic muxer owned by this registry
    pub fn muxer(&self) -> Arc<TopicMuxer> {
        self.muxer.clone()
    }

    /// Subscribe to registry events
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events_tx.subscribe()
    }

    /// Register a feed.
    ///
    /// Idempotent: re-adding a known key returns the existing feed and has
    /// no observable effect. A missing name defaults to the decimal string
    /// of the registry's size at creation time, fixed forever. With
    /// `persist`, the record append runs in the background; an append
    /// failure leaves the feed registered and is reported as
    /// [`RegistryEvent::PersistFailed`].
    pub async fn add_feed(
        &self,
        handle: FeedHandle,
        name: Option<String>,
        persist: bool,
    ) -> Feed {
        let key = handle.key();
        let feed = {
            let mut guard = self.inner.lock().await;
            if let Some(existing) = guard.by_key.get(&key) {
                return existing.clone();
            }

            let mut name = match name {
                Some(name) => name,
                None => guard.by_key.len().to_string(),
            };
            if guard.by_name.contains_key(&name) {
                // Name uniqueness beats the decimal-of-size rule when an
                // explicit name already occupies the slot.
                let mut n = guard.by_key.len() as u64;
                while guard.by_name.contains_key(&n.to_string()) {
                    n += 1;
                }
                warn!(registry = %self.id, taken = %name, assigned = %n, "Feed name taken, assigning next free");
                name = n.to_string();
            }

            let feed = Feed {
                key,
                name: name.clone(),
                handle,
            };
            guard.by_key.insert(key, feed.clone());
            guard.by_name.insert(name, feed.clone());
            feed
        };

        self.muxer.add_feed(feed.handle.clone()).await;

        if persist {
            let record = FeedRecord::new(&feed.key, &feed.name);
            let persistence = self.persistence.clone();
            let events_tx = self.events_tx.clone();
            let id = self.id.clone();
            tokio::spawn(async move {
                if let Err(e) = persistence.append_record(&record).await {
                    warn!(registry = %id, key = %record.key, error = %e, "Failed to persist feed record");
                    let _ = events_tx.send(RegistryEvent::PersistFailed {
                        key,
                        error: e.to_string(),
                    });
                }
            });
        }

        info!(registry = %self.id, topic = %self.topic, %key, name = %feed.name, "Feed added");
        let _ = self.events_tx.send(RegistryEvent::FeedAdded {
            key,
            name: feed.name.clone(),
        });
        feed
    }

    /// Get or create the named writable feed.
    ///
    /// Returns the existing feed when the name is registered. Otherwise the
    /// writer is opened in a name-scoped store namespace, registered, and
    /// persisted. Calls serialize through one creation lock, so concurrent
    /// calls for the same unregistered name yield one feed.
    pub async fn create_writer(&self, name: Option<&str>) -> SwarmResult<Feed> {
        let _guard = self.writer_lock.lock().await;

        if let Some(name) = name {
            if let Some(feed) = self.inner.lock().await.by_name.get(name).cloned() {
                debug!(registry = %self.id, %name, "Writer already exists");
                return Ok(feed);
            }
        }

        let assigned = match name {
            Some(name) => name.to_string(),
            None => self.inner.lock().await.by_key.len().to_string(),
        };

        let namespace = self
            .store
            .namespace(&format!("{}{}", FEED_NAMESPACE_PREFIX, assigned));
        let handle = namespace.writer().await?;
        handle.ready().await?;

        Ok(self.add_feed(handle, Some(assigned), true).await)
    }

    /// Look up a feed by key
    pub async fn by_key(&self, key: &FeedKey) -> Option<Feed> {
        self.inner.lock().await.by_key.get(key).cloned()
    }

    /// Look up a feed by name
    pub async fn by_name(&self, name: &str) -> Option<Feed> {
        self.inner.lock().await.by_name.get(name).cloned()
    }

    /// All registered feeds
    pub async fn list(&self) -> Vec<Feed> {
        self.inner.lock().await.by_key.values().cloned().collect()
    }

    /// Number of registered feeds
    pub async fn len(&self) -> usize {
        self.inner.lock().await.by_key.len()
    }

    /// Whether the registry has no feeds
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Close the registry: stop the event consumer, detach all sessions,
    /// and release the record log and store.
    pub async fn close(&self) -> SwarmResult<()> {
        if let Some(task) = self.feed_task.lock().take() {
            task.abort();
        }
        self.muxer.shutdown().await;
        self.persistence.close().await?;
        self.store.close().await?;
        info!(registry = %self.id, topic = %self.topic, "Registry closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryFeedStore;

    async fn open_registry() -> (Arc<FeedRegistry>, Arc<MemoryRecordLog>) {
        let store = MemoryFeedStore::new();
        let log = Arc::new(MemoryRecordLog::new());
        let registry = FeedRegistry::open(
            store,
            log.clone(),
            RegistryOptions {
                topic: Some(TopicKey::new()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        (registry, log)
    }

    #[tokio::test]
    async fn test_open_without_topic_key_fails() {
        let store = MemoryFeedStore::new();
        let log = Arc::new(MemoryRecordLog::new());
        let result = FeedRegistry::open(store, log, RegistryOptions::default()).await;
        assert!(matches!(result, Err(SwarmError::MissingTopicKey)));
    }

    #[tokio::test]
    async fn test_open_default_topic_requires_opt_in() {
        let store = MemoryFeedStore::new();
        let log = Arc::new(MemoryRecordLog::new());
        let registry = FeedRegistry::open(
            store,
            log,
            RegistryOptions {
                topic: None,
                allow_default_topic: true,
            },
        )
        .await
        .unwrap();
        assert_eq!(registry.topic().as_bytes(), &DEFAULT_TOPIC_KEY);
    }

    #[tokio::test]
    async fn test_writer_names_default_to_registry_size() {
        let (registry, _log) = open_registry().await;

        let first = registry.create_writer(None).await.unwrap();
        assert_eq!(first.name, "0");

        let named = registry.create_writer(Some("journal")).await.unwrap();
        assert_eq!(named.name, "journal");

        let third = registry.create_writer(None).await.unwrap();
        assert_eq!(third.name, "2");

        assert_ne!(first.key, third.key);
    }

    #[tokio::test]
    async fn test_create_writer_returns_existing_feed() {
        let (registry, log) = open_registry().await;

        let first = registry.create_writer(Some("log")).await.unwrap();
        let again = registry.create_writer(Some("log")).await.unwrap();
        assert_eq!(first.key, again.key);
        assert_eq!(registry.len().await, 1);

        // Only one record was appended.
        tokio::task::yield_now().await;
        assert_eq!(log.records().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_writer_creation_yields_one_feed() {
        let (registry, _log) = open_registry().await;

        let (a, b) = tokio::join!(
            registry.create_writer(Some("shared")),
            registry.create_writer(Some("shared"))
        );
        assert_eq!(a.unwrap().key, b.unwrap().key);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_add_feed_is_idempotent() {
        let (registry, log) = open_registry().await;
        let mut events = registry.subscribe();

        let handle = registry.create_writer(Some("once")).await.unwrap().handle;
        registry.add_feed(handle.clone(), None, true).await;
        registry.add_feed(handle, None, true).await;

        assert_eq!(registry.len().await, 1);
        tokio::task::yield_now().await;
        assert_eq!(log.records().len(), 1, "no duplicate record");

        // Exactly one FeedAdded was broadcast.
        assert!(matches!(
            events.try_recv(),
            Ok(RegistryEvent::FeedAdded { .. })
        ));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_persist_failure_keeps_feed_registered() {
        let (registry, log) = open_registry().await;
        let mut events = registry.subscribe();

        log.fail_appends(true);
        let feed = registry.create_writer(Some("doomed")).await.unwrap();

        // The feed stays registered in memory.
        assert!(registry.by_key(&feed.key).await.is_some());

        // The failure arrives asynchronously on the event channel.
        loop {
            match events.recv().await.unwrap() {
                RegistryEvent::PersistFailed { key, .. } => {
                    assert_eq!(key, feed.key);
                    break;
                }
                RegistryEvent::FeedAdded { .. } => continue,
            }
        }
    }

    #[tokio::test]
    async fn test_replay_reconstructs_indices_without_repersisting() {
        let store = MemoryFeedStore::new();
        let topic = TopicKey::new();
        let log = Arc::new(MemoryRecordLog::new());

        let (foo_key, bar_key) = {
            let registry = FeedRegistry::open(
                store.clone(),
                log.clone(),
                RegistryOptions {
                    topic: Some(topic),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
            let foo = registry.create_writer(Some("foo")).await.unwrap();
            let bar = registry.create_writer(Some("bar")).await.unwrap();
            tokio::task::yield_now().await;
            registry.close().await.unwrap();
            (foo.key, bar.key)
        };

        let reopened = FeedRegistry::open(
            store,
            log.clone(),
            RegistryOptions {
                topic: Some(topic),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(reopened.len().await, 2);
        assert_eq!(reopened.by_name("foo").await.unwrap().key, foo_key);
        assert_eq!(reopened.by_name("bar").await.unwrap().key, bar_key);
        assert_eq!(log.records().len(), 2, "replay must not re-append");
    }

    #[tokio::test]
    async fn test_replay_first_record_wins_for_duplicate_keys() {
        let store = MemoryFeedStore::new();
        let key = FeedKey::from_bytes([5u8; 32]);
        let log = Arc::new(MemoryRecordLog::with_records(vec![
            FeedRecord::new(&key, "original"),
            FeedRecord::new(&key, "imposter"),
        ]));

        let registry = FeedRegistry::open(
            store,
            log,
            RegistryOptions {
                topic: Some(TopicKey::new()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(registry.len().await, 1);
        assert_eq!(registry.by_key(&key).await.unwrap().name, "original");
        assert!(registry.by_name("imposter").await.is_none());
    }
}
