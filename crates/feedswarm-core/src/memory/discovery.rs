//! In-process discovery transport
//!
//! Records `configure` calls for inspection and hands tests a way to
//! inject connect/disconnect events into a swarm manager's listener.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::SwarmResult;
use crate::sync::session::{PeerConnection, PeerInfo};
use crate::sync::swarm::{DiscoveryEvent, DiscoveryOptions, DiscoveryTransport};
use crate::types::{DiscoveryKey, PeerId};

/// In-memory implementation of [`DiscoveryTransport`]
pub struct MemoryDiscovery {
    configured: Mutex<HashMap<DiscoveryKey, DiscoveryOptions>>,
    events_tx: mpsc::UnboundedSender<DiscoveryEvent>,
}

impl MemoryDiscovery {
    /// Create the transport plus the event receiver to hand to
    /// [`SwarmManager::listen`](crate::sync::SwarmManager::listen)
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<DiscoveryEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                configured: Mutex::new(HashMap::new()),
                events_tx,
            }),
            events_rx,
        )
    }

    /// Inject a completed connection
    pub fn connect(&self, connection: Arc<dyn PeerConnection>, info: PeerInfo) {
        let _ = self
            .events_tx
            .send(DiscoveryEvent::PeerConnected { connection, info });
    }

    /// Inject a disconnect
    pub fn disconnect(&self, peer: PeerId, info: PeerInfo, handshake_completed: bool) {
        let _ = self.events_tx.send(DiscoveryEvent::PeerDisconnected {
            peer,
            info,
            handshake_completed,
        });
    }

    /// Last options configured for a discovery key
    pub fn options_for(&self, key: &DiscoveryKey) -> Option<DiscoveryOptions> {
        self.configured.lock().get(key).copied()
    }

    /// Whether announce or lookup is currently enabled for a key
    pub fn is_active(&self, key: &DiscoveryKey) -> bool {
        self.options_for(key)
            .map(|options| options.announce || options.lookup)
            .unwrap_or(false)
    }
}

#[async_trait]
impl DiscoveryTransport for MemoryDiscovery {
    async fn configure(&self, key: DiscoveryKey, options: DiscoveryOptions) -> SwarmResult<()> {
        debug!(discovery = %key, ?options, "Configure");
        self.configured.lock().insert(key, options);
        Ok(())
    }
}
