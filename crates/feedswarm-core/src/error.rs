//! Error types for feedswarm

use thiserror::Error;

/// Main error type for feedswarm operations
#[derive(Error, Debug)]
pub enum SwarmError {
    /// The feed store for a topic could not be readied
    ///
    /// Fatal to that topic's open only; other topics are unaffected.
    #[error("Feed store unavailable: {0}")]
    StoreUnavailable(String),

    /// Appending a feed record to the registry log failed
    ///
    /// Non-fatal: the feed stays registered in memory and the failure is
    /// surfaced on the registry's event channel.
    #[error("Failed to persist feed record: {0}")]
    PersistFailed(String),

    /// A feed store lookup failed during a replicate batch
    #[error("Feed resolution failed: {0}")]
    Resolution(String),

    /// No topic key was supplied and the insecure default topic was not
    /// explicitly enabled
    #[error("No topic key supplied (set allow_default_topic to opt in to the default topic)")]
    MissingTopicKey,

    /// Malformed or wrong-length key material
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// A multiplexer channel command failed
    #[error("Channel error: {0}")]
    Channel(String),

    /// Database creation/opening error
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    /// Transaction error
    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    /// Table error
    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    /// Storage operation error
    #[error("Storage operation error: {0}")]
    StorageOp(#[from] redb::StorageError),

    /// Commit error
    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    /// Error during serialization/deserialization
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using SwarmError
pub type SwarmResult<T> = Result<T, SwarmError>;
