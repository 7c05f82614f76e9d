//! In-process reference implementations of the external collaborator seams
//!
//! Everything a node needs to run without a real network or disk: a feed
//! store, a connection pair speaking the multiplexer protocol, and a
//! discovery transport. Tests build multi-node setups from these; a real
//! deployment swaps each for an implementation over actual infrastructure.

mod discovery;
mod store;
mod transport;

pub use discovery::MemoryDiscovery;
pub use store::{MemoryFeed, MemoryFeedStore};
pub use transport::MemoryConnection;
