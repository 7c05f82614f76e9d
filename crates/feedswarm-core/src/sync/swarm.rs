//! Multi-topic swarm manager
//!
//! The `SwarmManager` owns every active topic muxer and the set of live
//! peer connections, and keeps the two joined: each connection is attached
//! to each joined topic, whichever of the two appeared first. Discovery
//! registration toggles on join/leave.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::SwarmResult;
use crate::registry::FeedRegistry;
use crate::store::FeedStore;
use crate::sync::session::{PeerConnection, PeerInfo};
use crate::sync::topic::TopicMuxer;
use crate::types::{instance_id, DiscoveryKey, PeerId, TopicKey};

/// Announce/lookup flags passed to the discovery transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryOptions {
    /// Announce our presence under the discovery key
    pub announce: bool,
    /// Look up other peers under the discovery key
    pub lookup: bool,
}

impl DiscoveryOptions {
    /// Both announce and lookup enabled
    pub fn active() -> Self {
        Self {
            announce: true,
            lookup: true,
        }
    }

    /// Both announce and lookup disabled
    pub fn inactive() -> Self {
        Self {
            announce: false,
            lookup: false,
        }
    }
}

/// Peer discovery and connection establishment seam
#[async_trait]
pub trait DiscoveryTransport: Send + Sync {
    /// Register or update interest in a discovery key
    async fn configure(&self, key: DiscoveryKey, options: DiscoveryOptions) -> SwarmResult<()>;
}

/// Connection events emitted by the discovery transport
pub enum DiscoveryEvent {
    /// A connection to a new peer completed its handshake
    PeerConnected {
        /// The established connection
        connection: Arc<dyn PeerConnection>,
        /// Transport metadata
        info: PeerInfo,
    },
    /// A connection ended
    PeerDisconnected {
        /// The remote peer
        peer: PeerId,
        /// Transport metadata
        info: PeerInfo,
        /// Whether the handshake ever completed
        handshake_completed: bool,
    },
}

impl std::fmt::Debug for DiscoveryEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiscoveryEvent::PeerConnected { connection, .. } => f
                .debug_struct("PeerConnected")
                .field("peer", &connection.peer_id())
                .finish(),
            DiscoveryEvent::PeerDisconnected { peer, .. } => f
                .debug_struct("PeerDisconnected")
                .field("peer", peer)
                .finish(),
        }
    }
}

/// Options for joining a topic
#[derive(Default)]
pub struct JoinOptions {
    /// Adopt an existing muxer (typically an open registry's) instead of
    /// creating a bare one
    pub muxer: Option<Arc<TopicMuxer>>,
}

struct SwarmInner {
    topics: HashMap<TopicKey, Arc<TopicMuxer>>,
    connections: HashMap<PeerId, Arc<dyn PeerConnection>>,
}

/// Attaches connections to topics and toggles discovery on join/leave
pub struct SwarmManager {
    /// Short instance tag for log output
    id: String,
    store: Arc<dyn FeedStore>,
    discovery: Arc<dyn DiscoveryTransport>,
    inner: Mutex<SwarmInner>,
    listener: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl SwarmManager {
    /// Create a swarm manager.
    ///
    /// `store` backs bare muxers created by [`join`](Self::join) when no
    /// registry muxer is supplied.
    pub fn new(store: Arc<dyn FeedStore>, discovery: Arc<dyn DiscoveryTransport>) -> Arc<Self> {
        Arc::new(Self {
            id: instance_id(),
            store,
            discovery,
            inner: Mutex::new(SwarmInner {
                topics: HashMap::new(),
                connections: HashMap::new(),
            }),
            listener: parking_lot::Mutex::new(None),
        })
    }

    /// Join a topic.
    ///
    /// Idempotent: joining an already-joined topic returns its muxer.
    /// Otherwise enables discovery for the topic and attaches every
    /// currently open connection, so pre-existing peers immediately start
    /// replicating the new topic.
    pub async fn join(
        &self,
        topic: TopicKey,
        options: JoinOptions,
    ) -> SwarmResult<Arc<TopicMuxer>> {
        let mut guard = self.inner.lock().await;
        if let Some(muxer) = guard.topics.get(&topic) {
            debug!(swarm = %self.id, %topic, "Already joined");
            return Ok(muxer.clone());
        }

        let muxer = options
            .muxer
            .unwrap_or_else(|| Arc::new(TopicMuxer::new(self.store.clone(), topic)));

        self.discovery
            .configure(topic.discovery_key(), DiscoveryOptions::active())
            .await?;

        for (peer, conn) in guard.connections.iter() {
            if let Err(e) = muxer.attach_connection(conn.clone()).await {
                warn!(swarm = %self.id, %topic, %peer, error = %e, "Failed to attach existing connection");
            }
        }

        guard.topics.insert(topic, muxer.clone());
        info!(swarm = %self.id, %topic, "Joined topic");
        Ok(muxer)
    }

    /// Join using an open registry's own muxer, so the registry's feed set
    /// and the swarmed topic are one and the same.
    pub async fn swarm(&self, registry: &FeedRegistry) -> SwarmResult<Arc<TopicMuxer>> {
        self.join(
            *registry.topic(),
            JoinOptions {
                muxer: Some(registry.muxer()),
            },
        )
        .await
    }

    /// Leave a topic.
    ///
    /// Returns `false` when the topic was not joined. Disables discovery
    /// and detaches the topic from every open connection; the connections
    /// themselves stay up for other topics.
    pub async fn leave(&self, topic: &TopicKey) -> SwarmResult<bool> {
        let mut guard = self.inner.lock().await;
        let Some(muxer) = guard.topics.remove(topic) else {
            debug!(swarm = %self.id, %topic, "Not joined");
            return Ok(false);
        };

        if let Err(e) = self
            .discovery
            .configure(topic.discovery_key(), DiscoveryOptions::inactive())
            .await
        {
            warn!(swarm = %self.id, %topic, error = %e, "Failed to disable discovery");
        }

        for peer in guard.connections.keys() {
            muxer.detach_connection(peer).await;
        }

        info!(swarm = %self.id, %topic, "Left topic");
        Ok(true)
    }

    /// Whether a topic is currently joined
    pub async fn joined(&self, topic: &TopicKey) -> bool {
        self.inner.lock().await.topics.contains_key(topic)
    }

    /// Number of joined topics
    pub async fn topic_count(&self) -> usize {
        self.inner.lock().await.topics.len()
    }

    /// Number of live connections
    pub async fn connection_count(&self) -> usize {
        self.inner.lock().await.connections.len()
    }

    /// Record a new connection and attach it to every joined topic
    pub async fn handle_peer_connected(&self, connection: Arc<dyn PeerConnection>, info: PeerInfo) {
        let peer = connection.peer_id();
        let mut guard = self.inner.lock().await;
        debug!(swarm = %self.id, %peer, duplicate = info.duplicate, "Peer connected");
        guard.connections.insert(peer, connection.clone());
        for (topic, muxer) in guard.topics.iter() {
            if let Err(e) = muxer.attach_connection(connection.clone()).await {
                warn!(swarm = %self.id, %topic, %peer, error = %e, "Failed to attach connection");
            }
        }
    }

    /// Detach a closed connection from every topic.
    ///
    /// Ignored when the handshake never completed or the disconnect is a
    /// recognized duplicate of a connection that stays up.
    pub async fn handle_peer_disconnected(
        &self,
        peer: PeerId,
        info: PeerInfo,
        handshake_completed: bool,
    ) {
        if !handshake_completed || info.duplicate {
            debug!(swarm = %self.id, %peer, "Ignoring disconnect");
            return;
        }
        let mut guard = self.inner.lock().await;
        for muxer in guard.topics.values() {
            muxer.detach_connection(&peer).await;
        }
        guard.connections.remove(&peer);
        info!(swarm = %self.id, %peer, "Peer disconnected");
    }

    /// Spawn the driver task consuming discovery events
    pub fn listen(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<DiscoveryEvent>) {
        let swarm = Arc::clone(&self);
        let task = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    DiscoveryEvent::PeerConnected { connection, info } => {
                        swarm.handle_peer_connected(connection, info).await;
                    }
                    DiscoveryEvent::PeerDisconnected {
                        peer,
                        info,
                        handshake_completed,
                    } => {
                        swarm
                            .handle_peer_disconnected(peer, info, handshake_completed)
                            .await;
                    }
                }
            }
        });
        *self.listener.lock() = Some(task);
    }

    /// Stop the driver task and detach everything
    pub async fn shutdown(&self) {
        if let Some(task) = self.listener.lock().take() {
            task.abort();
        }
        let mut guard = self.inner.lock().await;
        for muxer in guard.topics.values() {
            muxer.shutdown().await;
        }
        guard.topics.clear();
        guard.connections.clear();
        info!(swarm = %self.id, "Swarm manager shut down");
    }
}
