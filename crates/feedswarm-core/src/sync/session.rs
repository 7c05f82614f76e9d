//! Per-session multiplexer seam
//!
//! A connection to a peer carries one multiplexer channel per joined topic.
//! The channel exposes a fixed capability interface: outbound commands
//! ([`ChannelCommands`]) and an ordered inbound event stream
//! ([`SessionEvent`]). The event receiver closing is the session-end
//! signal; there is no separate error callback to unhook, so teardown
//! happens exactly once, in one place.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::error::SwarmResult;
use crate::store::FeedHandle;
use crate::types::{FeedKey, PeerId, TopicKey};

/// Inbound events of one topic channel, delivered in protocol order
pub enum SessionEvent {
    /// The channel is open on both sides; the initial offer may be sent
    Ready,
    /// The remote peer announced the set of feed keys it offers
    Manifest {
        /// Offered feed keys
        keys: Vec<FeedKey>,
    },
    /// The remote peer requested feeds and awaits exactly one response
    Replicate {
        /// Requested feed keys
        keys: Vec<FeedKey>,
        /// Must be resolved exactly once, preserving the order of `keys`;
        /// a slot is `None` when that key could not be resolved
        respond: oneshot::Sender<Vec<Option<FeedHandle>>>,
    },
}

impl std::fmt::Debug for SessionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionEvent::Ready => write!(f, "Ready"),
            SessionEvent::Manifest { keys } => write!(f, "Manifest({} keys)", keys.len()),
            SessionEvent::Replicate { keys, .. } => write!(f, "Replicate({} keys)", keys.len()),
        }
    }
}

/// Outbound commands of one topic channel
pub trait ChannelCommands: Send + Sync {
    /// Announce feed keys to the remote peer
    fn offer_feeds(&self, keys: &[FeedKey]) -> SwarmResult<()>;

    /// Request feeds from the remote peer.
    ///
    /// The multiplexer filters out keys it is already replicating on this
    /// channel, so callers request unconditionally.
    fn request_feeds(&self, keys: &[FeedKey]) -> SwarmResult<()>;

    /// Close this topic channel without closing the connection
    fn close(&self);
}

/// Both halves of a freshly opened topic channel
pub struct SessionChannel {
    /// Outbound command half
    pub commands: Arc<dyn ChannelCommands>,
    /// Inbound event half; `None` from `recv` means the session ended
    pub events: mpsc::UnboundedReceiver<SessionEvent>,
}

/// A raw peer connection able to multiplex topic channels
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Identity of the remote peer
    fn peer_id(&self) -> PeerId;

    /// Open one multiplexer channel bound to the topic's root/discovery key
    async fn open_channel(&self, topic: &TopicKey) -> SwarmResult<SessionChannel>;
}

/// Metadata the discovery transport attaches to connection events
#[derive(Debug, Clone, Copy, Default)]
pub struct PeerInfo {
    /// Whether this connection was recognized as a duplicate of an existing
    /// one to the same peer
    pub duplicate: bool,
}

/// Lifecycle of one attached session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionState {
    /// Channel opened, waiting for both sides
    Attached,
    /// Initial offer sent
    Ready,
    /// Bidirectional exchange observed
    Open,
}
