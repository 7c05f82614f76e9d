//! In-process connection pair
//!
//! Two [`MemoryConnection`]s share one link and multiplex any number of
//! topic channels over it, routed by discovery key. The pair implements
//! the multiplexer's protocol semantics end to end:
//!
//! - a channel becomes `Ready` once both sides opened the topic
//! - `offer_feeds` surfaces as a `Manifest` event on the other side
//! - `request_feeds` filters keys already replicating on the channel, then
//!   raises `Replicate` on *both* sides; once both responses arrive, block
//!   content is mirrored live between the two nodes' stores
//!
//! Useful for tests and single-process setups; a production transport
//! implements the same traits over a real wire.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{SwarmError, SwarmResult};
use crate::memory::store::{MemoryFeed, MemoryFeedStore};
use crate::store::FeedHandle;
use crate::sync::session::{ChannelCommands, PeerConnection, SessionChannel, SessionEvent};
use crate::types::{DiscoveryKey, FeedKey, PeerId, TopicKey};

struct End {
    events_tx: mpsc::UnboundedSender<SessionEvent>,
}

#[derive(Default)]
struct Channel {
    ends: [Option<End>; 2],
    /// Keys already replicating on this channel; requests for them are
    /// filtered out, which is why the core may request unconditionally
    replicating: HashSet<FeedKey>,
    /// Mirror tasks, aborted when the channel or link closes
    tasks: Vec<JoinHandle<()>>,
}

struct LinkState {
    closed: bool,
    channels: HashMap<DiscoveryKey, Channel>,
}

struct Link {
    stores: [Arc<MemoryFeedStore>; 2],
    state: Mutex<LinkState>,
}

impl Link {
    fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        for (_, channel) in state.channels.drain() {
            for task in channel.tasks {
                task.abort();
            }
        }
    }
}

/// One side of an in-process connection pair
pub struct MemoryConnection {
    /// Identity of the peer on the *other* side
    remote: PeerId,
    side: usize,
    link: Arc<Link>,
}

impl MemoryConnection {
    /// Create a connected pair between two nodes' stores.
    ///
    /// The first connection belongs to the node owning `store_a` (and sees
    /// the second node as its remote peer), and vice versa.
    pub fn pair(
        store_a: Arc<MemoryFeedStore>,
        store_b: Arc<MemoryFeedStore>,
    ) -> (Arc<MemoryConnection>, Arc<MemoryConnection>) {
        let id_a = PeerId::new();
        let id_b = PeerId::new();
        let link = Arc::new(Link {
            stores: [store_a, store_b],
            state: Mutex::new(LinkState {
                closed: false,
                channels: HashMap::new(),
            }),
        });
        let a = Arc::new(MemoryConnection {
            remote: id_b,
            side: 0,
            link: link.clone(),
        });
        let b = Arc::new(MemoryConnection {
            remote: id_a,
            side: 1,
            link,
        });
        (a, b)
    }

    /// Tear the whole connection down, ending every topic session on both
    /// sides. Simulates a connection end/error.
    pub fn close(&self) {
        self.link.close();
    }
}

#[async_trait]
impl PeerConnection for MemoryConnection {
    fn peer_id(&self) -> PeerId {
        self.remote
    }

    async fn open_channel(&self, topic: &TopicKey) -> SwarmResult<SessionChannel> {
        let key = topic.discovery_key();
        let (events_tx, events) = mpsc::unbounded_channel();

        let mut state = self.link.state.lock();
        if state.closed {
            return Err(SwarmError::Channel("connection closed".to_string()));
        }
        let channel = state.channels.entry(key).or_default();
        channel.ends[self.side] = Some(End {
            events_tx: events_tx.clone(),
        });

        // Both sides open: the channel handshake completes.
        if channel.ends.iter().all(Option::is_some) {
            for end in channel.ends.iter().flatten() {
                let _ = end.events_tx.send(SessionEvent::Ready);
            }
            debug!(discovery = %key, "Channel ready on both sides");
        }

        Ok(SessionChannel {
            commands: Arc::new(MemoryChannel {
                link: self.link.clone(),
                side: self.side,
                key,
            }),
            events,
        })
    }
}

/// Command half of one topic channel
struct MemoryChannel {
    link: Arc<Link>,
    side: usize,
    key: DiscoveryKey,
}

impl ChannelCommands for MemoryChannel {
    fn offer_feeds(&self, keys: &[FeedKey]) -> SwarmResult<()> {
        let state = self.link.state.lock();
        if state.closed {
            return Err(SwarmError::Channel("connection closed".to_string()));
        }
        let Some(channel) = state.channels.get(&self.key) else {
            return Ok(());
        };
        if let Some(end) = &channel.ends[1 - self.side] {
            let _ = end.events_tx.send(SessionEvent::Manifest {
                keys: keys.to_vec(),
            });
        }
        Ok(())
    }

    fn request_feeds(&self, keys: &[FeedKey]) -> SwarmResult<()> {
        let mut state = self.link.state.lock();
        if state.closed {
            return Err(SwarmError::Channel("connection closed".to_string()));
        }
        let Some(channel) = state.channels.get_mut(&self.key) else {
            return Ok(());
        };

        // Filter what this channel is already replicating.
        let fresh: Vec<FeedKey> = keys
            .iter()
            .filter(|key| !channel.replicating.contains(key))
            .copied()
            .collect();
        if fresh.is_empty() {
            return Ok(());
        }
        channel.replicating.extend(fresh.iter().copied());

        // Both sides resolve the batch; content flows once both answered.
        let mut responses = Vec::with_capacity(2);
        for end in channel.ends.iter().flatten() {
            let (respond, response) = oneshot::channel();
            let _ = end.events_tx.send(SessionEvent::Replicate {
                keys: fresh.clone(),
                respond,
            });
            responses.push(response);
        }
        if responses.len() < 2 {
            // Remote side vanished between manifest and request; allow a
            // retry once it is back.
            for key in &fresh {
                channel.replicating.remove(key);
            }
            return Ok(());
        }
        let rx_b = responses.pop().expect("two responses");
        let rx_a = responses.pop().expect("two responses");

        let task = tokio::spawn(Self::replicate_batch(
            self.link.clone(),
            self.key,
            fresh,
            rx_a,
            rx_b,
        ));
        channel.tasks.push(task);
        Ok(())
    }

    fn close(&self) {
        let mut state = self.link.state.lock();
        // Closing either side closes the channel for both.
        if let Some(channel) = state.channels.remove(&self.key) {
            for task in channel.tasks {
                task.abort();
            }
        }
    }
}

impl MemoryChannel {
    /// Await both sides' replicate responses, then mirror block content
    /// between the two stores for every key both sides resolved.
    async fn replicate_batch(
        link: Arc<Link>,
        key: DiscoveryKey,
        keys: Vec<FeedKey>,
        rx_a: oneshot::Receiver<Vec<Option<FeedHandle>>>,
        rx_b: oneshot::Receiver<Vec<Option<FeedHandle>>>,
    ) {
        let (res_a, res_b) = futures::future::join(rx_a, rx_b).await;
        let (Ok(res_a), Ok(res_b)) = (res_a, res_b) else {
            return;
        };

        for (i, feed_key) in keys.iter().enumerate() {
            let resolved_both = res_a.get(i).map(Option::is_some) == Some(true)
                && res_b.get(i).map(Option::is_some) == Some(true);
            if !resolved_both {
                // Leave room for a retry on a later request.
                let mut state = link.state.lock();
                if let Some(channel) = state.channels.get_mut(&key) {
                    channel.replicating.remove(feed_key);
                }
                continue;
            }

            let a = link.stores[0].feed(feed_key);
            let b = link.stores[1].feed(feed_key);
            let task = tokio::spawn(Self::mirror(a, b));

            let mut state = link.state.lock();
            match state.channels.get_mut(&key) {
                Some(channel) => channel.tasks.push(task),
                // Channel closed while resolving.
                None => task.abort(),
            }
        }
    }

    /// Live bidirectional block mirror for one feed
    async fn mirror(a: Arc<MemoryFeed>, b: Arc<MemoryFeed>) {
        let mut watch_a = a.subscribe_length();
        let mut watch_b = b.subscribe_length();
        loop {
            // Mark lengths seen before copying so appends landing during
            // the copy still wake the loop.
            watch_a.borrow_and_update();
            watch_b.borrow_and_update();

            Self::copy_tail(&a, &b);
            Self::copy_tail(&b, &a);

            tokio::select! {
                changed = watch_a.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                changed = watch_b.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
    }

    fn copy_tail(src: &MemoryFeed, dst: &MemoryFeed) {
        let mut seq = dst.block_count();
        while seq < src.block_count() {
            match src.block_at(seq) {
                Some(block) => dst.put(seq, block),
                None => break,
            }
            seq += 1;
        }
    }
}
