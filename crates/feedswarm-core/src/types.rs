//! Core identifier types for feedswarm

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::SwarmError;

/// Context string for the one-way topic-key → discovery-key derivation
const DISCOVERY_KEY_CONTEXT: &str = "feedswarm/discovery-key/v1";

/// Public key identifying a single feed (32 bytes)
///
/// Feed keys are the public halves of the signing keypairs that authenticate
/// feed blocks. Within a topic a key uniquely identifies one feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FeedKey(pub [u8; 32]);

impl FeedKey {
    /// Create a FeedKey from raw bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes of the key
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Encode as a lowercase hex string (64 chars)
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from a 64-char hex string
    pub fn from_hex(s: &str) -> Result<Self, SwarmError> {
        let bytes = hex::decode(s).map_err(|e| SwarmError::InvalidKey(e.to_string()))?;
        if bytes.len() != 32 {
            return Err(SwarmError::InvalidKey(format!(
                "expected 32 bytes, got {}",
                bytes.len()
            )));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl std::fmt::Display for FeedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Root key identifying a replication topic (32 bytes)
///
/// Peers exchange only feeds belonging to jointly-joined topics. The root
/// key doubles as the namespace under which a topic's feeds are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TopicKey(pub [u8; 32]);

impl TopicKey {
    /// Create a new random TopicKey
    pub fn new() -> Self {
        let mut bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Create a TopicKey from raw bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes of the key
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Encode as a lowercase hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from a 64-char hex string
    pub fn from_hex(s: &str) -> Result<Self, SwarmError> {
        Ok(Self(FeedKey::from_hex(s)?.0))
    }

    /// Derive the discovery key for this topic.
    ///
    /// The derivation is one-way: the discovery key can be announced to a
    /// lookup network without revealing the root key, and never carries
    /// topic content.
    pub fn discovery_key(&self) -> DiscoveryKey {
        DiscoveryKey(blake3::derive_key(DISCOVERY_KEY_CONTEXT, &self.0))
    }
}

impl Default for TopicKey {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TopicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "topic_{}", &hex::encode(&self.0[..4]))
    }
}

/// One-way-derived identifier used only for peer discovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiscoveryKey(pub [u8; 32]);

impl DiscoveryKey {
    /// Get the raw bytes of the key
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Encode as a lowercase hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Display for DiscoveryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "discovery_{}", &hex::encode(&self.0[..4]))
    }
}

/// Identity of a remote peer on a connection (32 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId(pub [u8; 32]);

impl PeerId {
    /// Create a new random PeerId
    pub fn new() -> Self {
        let mut bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Create a PeerId from raw bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes of the id
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl Default for PeerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "peer_{}", &hex::encode(&self.0[..4]))
    }
}

/// Persisted record of a known feed
///
/// One record is appended per newly-known feed and never rewritten or
/// compacted. Recovery replays the full sequence in order; the first
/// occurrence of a key wins and later duplicates are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedRecord {
    /// Feed public key as a lowercase hex string (64 chars)
    pub key: String,
    /// Name of the feed within its topic
    pub name: String,
}

impl FeedRecord {
    /// Create a record for a feed key and name
    pub fn new(key: &FeedKey, name: impl Into<String>) -> Self {
        Self {
            key: key.to_hex(),
            name: name.into(),
        }
    }

    /// Parse the record's key field
    pub fn feed_key(&self) -> Result<FeedKey, SwarmError> {
        FeedKey::from_hex(&self.key)
    }
}

/// Short random hex tag used to tell instances apart in log output
pub(crate) fn instance_id() -> String {
    let mut bytes = [0u8; 2];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
