//! Replication orchestration layer
//!
//! ## Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  SwarmManager                                                   │
//! │  ├── topics: joined TopicMuxers                                 │
//! │  ├── connections: live peers                                    │
//! │  └── discovery: announce/lookup toggled on join/leave           │
//! │                                                                 │
//! │  TopicMuxer (one per topic)                                     │
//! │  ├── known feeds of the topic                                   │
//! │  └── sessions: one channel + event loop per attached peer       │
//! │      offer → manifest → request → replicate                     │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A new connection is attached to every joined topic; a newly joined
//! topic is attached to every live connection. Each session drives the
//! offer/manifest/request/replicate exchange independently, and feeds
//! appearing mid-session reach peers through incremental offers.

pub mod session;
pub mod swarm;
pub mod topic;

pub use session::{ChannelCommands, PeerConnection, PeerInfo, SessionChannel, SessionEvent};
pub use swarm::{
    DiscoveryEvent, DiscoveryOptions, DiscoveryTransport, JoinOptions, SwarmManager,
};
pub use topic::{MuxerEvent, TopicMuxer};
