//! Append-only persistence for the feed registry
//!
//! The registry log is an append-only sequence of [`FeedRecord`]s, one per
//! newly-known feed, never rewritten or compacted. Recovery replays the
//! full sequence in order. The backend is pluggable: [`RecordLog`] appends
//! JSON-encoded records to a redb table keyed by a monotonic sequence
//! number; [`MemoryRecordLog`] backs tests.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use redb::{Database, ReadableTable, TableDefinition};

use crate::error::{SwarmError, SwarmResult};
use crate::types::{FeedRecord, TopicKey};

const RECORDS_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("feed_records");

/// Storage seam for the registry's append-only record sequence
#[async_trait]
pub trait RegistryPersistence: Send + Sync {
    /// Wait until the log is ready
    async fn ready(&self) -> SwarmResult<()>;

    /// Load every persisted record, in append order
    async fn fetch_records(&self) -> SwarmResult<Vec<FeedRecord>>;

    /// Append one record to the sequence
    async fn append_record(&self, record: &FeedRecord) -> SwarmResult<()>;

    /// Release resources held by the log
    async fn close(&self) -> SwarmResult<()>;
}

/// redb-backed record log
pub struct RecordLog {
    db: Arc<RwLock<Database>>,
    next_seq: AtomicU64,
}

impl RecordLog {
    /// Open (or create) a record log at the given path.
    ///
    /// Creates parent directories as needed and scans the existing table to
    /// resume the sequence counter.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SwarmError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(path)?;

        let mut next_seq = 0u64;
        let write_txn = db.begin_write()?;
        {
            let table = write_txn.open_table(RECORDS_TABLE)?;
            for entry in table.iter()? {
                let (seq, _) = entry?;
                next_seq = next_seq.max(seq.value() + 1);
            }
        }
        write_txn.commit()?;

        Ok(Self {
            db: Arc::new(RwLock::new(db)),
            next_seq: AtomicU64::new(next_seq),
        })
    }

    /// Open the record log for one topic inside a data directory.
    ///
    /// Each topic gets its own log file named after the topic's hex key, so
    /// leaving and re-joining a topic reloads exactly its own records.
    pub fn for_topic(dir: impl AsRef<Path>, topic: &TopicKey) -> Result<Self, SwarmError> {
        Self::open(dir.as_ref().join(format!("{}.redb", topic.to_hex())))
    }
}

#[async_trait]
impl RegistryPersistence for RecordLog {
    async fn ready(&self) -> SwarmResult<()> {
        Ok(())
    }

    async fn fetch_records(&self) -> SwarmResult<Vec<FeedRecord>> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(RECORDS_TABLE)?;

        let mut records = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            let record: FeedRecord = serde_json::from_slice(value.value())
                .map_err(|e| SwarmError::Serialization(e.to_string()))?;
            records.push(record);
        }
        Ok(records)
    }

    async fn append_record(&self, record: &FeedRecord) -> SwarmResult<()> {
        let data =
            serde_json::to_vec(record).map_err(|e| SwarmError::Serialization(e.to_string()))?;
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);

        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(RECORDS_TABLE)?;
            table.insert(seq, data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    async fn close(&self) -> SwarmResult<()> {
        Ok(())
    }
}

/// In-memory record log for tests
///
/// Optionally fails every append to exercise the registry's asynchronous
/// persistence error reporting.
#[derive(Default)]
pub struct MemoryRecordLog {
    records: Mutex<Vec<FeedRecord>>,
    fail_appends: AtomicBool,
}

impl MemoryRecordLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a log pre-seeded with records
    pub fn with_records(records: Vec<FeedRecord>) -> Self {
        Self {
            records: Mutex::new(records),
            fail_appends: AtomicBool::new(false),
        }
    }

    /// Toggle append failures
    pub fn fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    /// Snapshot of the appended records
    pub fn records(&self) -> Vec<FeedRecord> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl RegistryPersistence for MemoryRecordLog {
    async fn ready(&self) -> SwarmResult<()> {
        Ok(())
    }

    async fn fetch_records(&self) -> SwarmResult<Vec<FeedRecord>> {
        Ok(self.records.lock().clone())
    }

    async fn append_record(&self, record: &FeedRecord) -> SwarmResult<()> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(SwarmError::PersistFailed("append disabled".to_string()));
        }
        self.records.lock().push(record.clone());
        Ok(())
    }

    async fn close(&self) -> SwarmResult<()> {
        Ok(())
    }
}
