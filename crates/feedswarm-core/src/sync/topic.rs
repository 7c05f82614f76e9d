//! Per-topic protocol driver
//!
//! A `TopicMuxer` owns one topic's known-feed set and drives the
//! offer/manifest/request/replicate exchange across every connection
//! attached to the topic.
//!
//! ## Protocol
//!
//! ```text
//! Peer A                               Peer B
//!   |                                    |
//!   |--- offer [k1, k2] ---------------->|   initial offer on Ready
//!   |<-- offer [k3] ---------------------|
//!   |                                    |
//!   |<-- request [k1, k2] ---------------|   manifest → request, unfiltered
//!   |--- request [k3] ------------------>|
//!   |                                    |
//!   |    replicate batch: all keys       |
//!   |    resolve concurrently, one       |
//!   |    order-preserving response       |
//!   |                                    |
//!   |--- offer [k4] -------------------->|   incremental offer when a feed
//!   |                                    |   appears on a live connection
//! ```
//!
//! Feeds resolved during a replicate batch are announced on the muxer's
//! event channel; the registry consumes those events to name and persist
//! them, which in turn forwards them to every other attached peer.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::SwarmResult;
use crate::store::{FeedHandle, FeedLog, FeedStore};
use crate::sync::session::{PeerConnection, SessionEvent, SessionState};
use crate::types::{instance_id, FeedKey, PeerId, TopicKey};

/// Default capacity for the muxer event broadcast channel
const MUXER_EVENT_CAPACITY: usize = 256;

/// Events emitted by a topic muxer
#[derive(Clone)]
pub enum MuxerEvent {
    /// A feed requested by a peer was resolved for the first time
    FeedDiscovered {
        /// The feed's public key
        key: FeedKey,
        /// Handle to the resolved feed
        handle: FeedHandle,
    },
}

impl std::fmt::Debug for MuxerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MuxerEvent::FeedDiscovered { key, .. } => {
                f.debug_struct("FeedDiscovered").field("key", key).finish()
            }
        }
    }
}

/// State for one attached session
struct Session {
    /// Outbound command half of the topic channel
    commands: Arc<dyn crate::sync::session::ChannelCommands>,
    /// Keys this peer has seen: offered by us, or announced by the peer in
    /// a manifest or replicate request. Guards against redundant re-offers.
    known: HashSet<FeedKey>,
    /// Session lifecycle
    state: SessionState,
    /// Handle to the session's event-loop task
    task: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct MuxerInner {
    /// Known feeds of the topic
    feeds: HashMap<FeedKey, FeedHandle>,
    /// Insertion order of `feeds`, for deterministic offers
    order: Vec<FeedKey>,
    /// Attached sessions, keyed by remote peer
    sessions: HashMap<PeerId, Session>,
}

/// Protocol driver for one replication topic
pub struct TopicMuxer {
    /// Short instance tag for log output
    id: String,
    topic: TopicKey,
    store: Arc<dyn FeedStore>,
    inner: Arc<Mutex<MuxerInner>>,
    events_tx: broadcast::Sender<MuxerEvent>,
}

impl TopicMuxer {
    /// Create a muxer for a topic, resolving unknown feeds via `store`
    pub fn new(store: Arc<dyn FeedStore>, topic: TopicKey) -> Self {
        let (events_tx, _) = broadcast::channel(MUXER_EVENT_CAPACITY);
        Self {
            id: instance_id(),
            topic,
            store,
            inner: Arc::new(Mutex::new(MuxerInner::default())),
            events_tx,
        }
    }

    /// The topic this muxer drives
    pub fn topic(&self) -> &TopicKey {
        &self.topic
    }

    /// Subscribe to muxer events
    pub fn subscribe(&self) -> broadcast::Receiver<MuxerEvent> {
        self.events_tx.subscribe()
    }

    /// Known feeds, in insertion order
    pub async fn feeds(&self) -> Vec<FeedHandle> {
        let guard = self.inner.lock().await;
        guard
            .order
            .iter()
            .filter_map(|key| guard.feeds.get(key).cloned())
            .collect()
    }

    /// Look up a known feed by key
    pub async fn feed(&self, key: &FeedKey) -> Option<FeedHandle> {
        self.inner.lock().await.feeds.get(key).cloned()
    }

    /// Number of attached sessions
    pub async fn session_count(&self) -> usize {
        self.inner.lock().await.sessions.len()
    }

    /// Whether a connection to this peer is attached
    pub async fn is_attached(&self, peer: &PeerId) -> bool {
        self.inner.lock().await.sessions.contains_key(peer)
    }

    /// Insert a feed into the known set and forward it to attached peers.
    ///
    /// Idempotent. Every session that has not seen the key receives an
    /// incremental offer, which is what makes feeds created after a
    /// connection opened visible without renegotiation.
    pub async fn add_feed(&self, handle: FeedHandle) {
        Self::insert_and_offer(
            &self.id,
            &self.topic,
            &self.inner,
            &self.events_tx,
            handle,
            false,
        )
        .await;
    }

    /// Attach a connection to this topic.
    ///
    /// Opens one multiplexer channel for the topic and spawns the session's
    /// event loop. Attaching an already-attached peer is a silent no-op.
    pub async fn attach_connection(&self, conn: Arc<dyn PeerConnection>) -> SwarmResult<()> {
        let peer = conn.peer_id();
        // The lock is held across the channel open so concurrent attaches
        // of the same peer serialize into one no-op.
        let mut guard = self.inner.lock().await;
        if guard.sessions.contains_key(&peer) {
            debug!(muxer = %self.id, topic = %self.topic, %peer, "Peer already attached, ignoring");
            return Ok(());
        }

        let channel = conn.open_channel(&self.topic).await?;
        guard.sessions.insert(
            peer,
            Session {
                commands: channel.commands,
                known: HashSet::new(),
                state: SessionState::Attached,
                task: None,
            },
        );

        let task = tokio::spawn(Self::session_task(
            self.id.clone(),
            self.topic,
            peer,
            self.inner.clone(),
            self.store.clone(),
            self.events_tx.clone(),
            channel.events,
        ));
        if let Some(session) = guard.sessions.get_mut(&peer) {
            session.task = Some(task);
        }

        info!(muxer = %self.id, topic = %self.topic, %peer, "Session attached");
        Ok(())
    }

    /// Detach a peer's session without closing the underlying connection.
    ///
    /// Used when a topic is left while the connection persists for other
    /// topics. Returns `false` if the peer was not attached.
    pub async fn detach_connection(&self, peer: &PeerId) -> bool {
        let session = { self.inner.lock().await.sessions.remove(peer) };
        match session {
            Some(session) => {
                session.commands.close();
                if let Some(task) = session.task {
                    task.abort();
                }
                debug!(muxer = %self.id, topic = %self.topic, %peer, "Session detached");
                true
            }
            None => false,
        }
    }

    /// Detach every session
    pub async fn shutdown(&self) {
        let sessions: Vec<(PeerId, Session)> =
            { self.inner.lock().await.sessions.drain().collect() };
        for (peer, session) in sessions {
            session.commands.close();
            if let Some(task) = session.task {
                task.abort();
            }
            debug!(muxer = %self.id, topic = %self.topic, %peer, "Session detached");
        }
    }

    /// Event loop for one attached session.
    ///
    /// The loop ending (connection end/error, or explicit detach aborting
    /// the task) is the only teardown path, so cleanup runs exactly once.
    async fn session_task(
        id: String,
        topic: TopicKey,
        peer: PeerId,
        inner: Arc<Mutex<MuxerInner>>,
        store: Arc<dyn FeedStore>,
        events_tx: broadcast::Sender<MuxerEvent>,
        mut events: mpsc::UnboundedReceiver<SessionEvent>,
    ) {
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::Ready => {
                    let mut guard = inner.lock().await;
                    let keys = guard.order.clone();
                    if let Some(session) = guard.sessions.get_mut(&peer) {
                        debug!(
                            muxer = %id,
                            %topic,
                            %peer,
                            feeds = keys.len(),
                            "Session ready, sending initial offer"
                        );
                        if let Err(e) = session.commands.offer_feeds(&keys) {
                            warn!(muxer = %id, %peer, error = %e, "Initial offer failed");
                        }
                        session.known.extend(keys.iter().copied());
                        session.state = SessionState::Ready;
                    }
                }
                SessionEvent::Manifest { keys } => {
                    let mut guard = inner.lock().await;
                    if let Some(session) = guard.sessions.get_mut(&peer) {
                        session.state = SessionState::Open;
                        session.known.extend(keys.iter().copied());
                        debug!(muxer = %id, %topic, %peer, keys = keys.len(), "Manifest received");
                        // Request everything; the multiplexer filters what
                        // it still needs.
                        if let Err(e) = session.commands.request_feeds(&keys) {
                            warn!(muxer = %id, %peer, error = %e, "Feed request failed");
                        }
                    }
                }
                SessionEvent::Replicate { keys, respond } => {
                    {
                        let mut guard = inner.lock().await;
                        if let Some(session) = guard.sessions.get_mut(&peer) {
                            session.state = SessionState::Open;
                            session.known.extend(keys.iter().copied());
                        }
                    }
                    // Resolved in its own task: a stalled resolution blocks
                    // its own batch, not the session's event loop.
                    tokio::spawn(Self::resolve_batch(
                        id.clone(),
                        topic,
                        peer,
                        inner.clone(),
                        store.clone(),
                        events_tx.clone(),
                        keys,
                        respond,
                    ));
                }
            }
        }

        let mut guard = inner.lock().await;
        if guard.sessions.remove(&peer).is_some() {
            debug!(muxer = %id, %topic, %peer, "Session closed");
        }
    }

    /// Join barrier over a replicate batch.
    ///
    /// Every key resolves concurrently; the single response preserves the
    /// input order. A failed resolution leaves `None` in its slot and the
    /// rest of the batch proceeds.
    #[allow(clippy::too_many_arguments)]
    async fn resolve_batch(
        id: String,
        topic: TopicKey,
        peer: PeerId,
        inner: Arc<Mutex<MuxerInner>>,
        store: Arc<dyn FeedStore>,
        events_tx: broadcast::Sender<MuxerEvent>,
        keys: Vec<FeedKey>,
        respond: oneshot::Sender<Vec<Option<FeedHandle>>>,
    ) {
        let resolutions = keys.iter().map(|key| {
            let key = *key;
            let id = id.clone();
            let inner = inner.clone();
            let store = store.clone();
            async move {
                if let Some(handle) = inner.lock().await.feeds.get(&key).cloned() {
                    return (Some(handle), false);
                }
                match store.get(&key).await {
                    Ok(handle) => (Some(handle), true),
                    Err(e) => {
                        warn!(muxer = %id, %key, error = %e, "Feed resolution failed");
                        (None, false)
                    }
                }
            }
        });
        let resolved = join_all(resolutions).await;

        let mut out = Vec::with_capacity(resolved.len());
        for (handle, newly_resolved) in resolved {
            if newly_resolved {
                if let Some(handle) = &handle {
                    Self::insert_and_offer(&id, &topic, &inner, &events_tx, handle.clone(), true)
                        .await;
                }
            }
            out.push(handle);
        }

        debug!(muxer = %id, %topic, %peer, feeds = out.len(), "Replicate batch resolved");
        if respond.send(out).is_err() {
            debug!(muxer = %id, %peer, "Replicate response dropped, session gone");
        }
    }

    /// Insert a feed (if new) and offer it to every session that has not
    /// seen it. With `announce`, a newly inserted feed is also published on
    /// the muxer event channel.
    async fn insert_and_offer(
        id: &str,
        topic: &TopicKey,
        inner: &Mutex<MuxerInner>,
        events_tx: &broadcast::Sender<MuxerEvent>,
        handle: FeedHandle,
        announce: bool,
    ) {
        let key = handle.key();
        let mut fresh = false;
        {
            let mut guard = inner.lock().await;
            if !guard.feeds.contains_key(&key) {
                guard.feeds.insert(key, handle.clone());
                guard.order.push(key);
                fresh = true;
            }
            for (peer, session) in guard.sessions.iter_mut() {
                // Sessions still waiting on Ready get the key in their
                // initial offer instead.
                if session.state == SessionState::Attached {
                    continue;
                }
                if session.known.contains(&key) {
                    continue;
                }
                debug!(muxer = %id, %topic, %peer, %key, "Forwarding feed to existing peer");
                if let Err(e) = session.commands.offer_feeds(&[key]) {
                    warn!(muxer = %id, %peer, error = %e, "Incremental offer failed");
                    continue;
                }
                session.known.insert(key);
            }
        }
        if fresh && announce {
            let _ = events_tx.send(MuxerEvent::FeedDiscovered { key, handle });
        }
    }
}
