//! Persistence gateway: durable append-only records behind a trait
//! boundary.
//!
//! In-memory round state is the source of truth for gameplay. Writes go
//! through a write-behind worker that retries failures and never blocks
//! the round; a failed write is a durability gap to reconcile out-of-band,
//! not a gameplay fault. At startup only the recent crash history and the
//! operator override state are reloaded.

use crate::engine::ledger::BalanceChange;
use crate::engine::selector::CrashOverride;
use crate::engine::types::{CrashHistoryEntry, Wager};
use async_trait::async_trait;
use rocksdb::{Options, WriteBatch, DB};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

const CRASH_SEQ_KEY: &[u8] = b"crash:next_seq";
const BALANCE_SEQ_KEY: &[u8] = b"balance:next_seq";
const OVERRIDE_KEY: &[u8] = b"override:state";

const WRITE_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database open failed: {0}")]
    Open(String),

    #[error("read failed: {0}")]
    Read(String),

    #[error("write failed: {0}")]
    Write(String),

    #[error("corrupted record: {0}")]
    Decode(String),
}

impl From<rocksdb::Error> for StorageError {
    fn from(e: rocksdb::Error) -> Self {
        StorageError::Write(e.to_string())
    }
}

/// Boundary to durable storage. Append-only for gameplay records;
/// override state is the one read-modify-write key.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    async fn append_crash_entry(&self, entry: &CrashHistoryEntry) -> Result<(), StorageError>;

    async fn append_wager(&self, wager: &Wager) -> Result<(), StorageError>;

    async fn append_balance_change(&self, change: &BalanceChange) -> Result<(), StorageError>;

    async fn store_override(&self, state: &CrashOverride) -> Result<(), StorageError>;

    async fn load_override(&self) -> Result<CrashOverride, StorageError>;

    /// Most recent crash entries, newest first.
    async fn load_recent_crashes(&self, limit: usize)
        -> Result<Vec<CrashHistoryEntry>, StorageError>;
}

/// RocksDB-backed gateway.
pub struct RocksStorage {
    db: Arc<DB>,
}

impl RocksStorage {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let db = DB::open(&opts, path).map_err(|e| StorageError::Open(e.to_string()))?;
        Ok(Self { db: Arc::new(db) })
    }

    fn read_seq(&self, key: &[u8]) -> Result<u64, StorageError> {
        let bytes = self
            .db
            .get(key)
            .map_err(|e| StorageError::Read(e.to_string()))?;
        Ok(bytes.and_then(|b| parse_u64_le(&b)).unwrap_or(0))
    }

    /// Write a row and bump its sequence counter atomically.
    fn append_row(&self, seq_key: &[u8], prefix: &str, row: &[u8]) -> Result<(), StorageError> {
        let seq = self.read_seq(seq_key)?;
        let row_key = format!("{}{:020}", prefix, seq);

        let mut batch = WriteBatch::default();
        batch.put(row_key.as_bytes(), row);
        batch.put(seq_key, (seq + 1).to_le_bytes());
        self.db.write(batch)?;
        Ok(())
    }
}

#[async_trait]
impl PersistenceGateway for RocksStorage {
    async fn append_crash_entry(&self, entry: &CrashHistoryEntry) -> Result<(), StorageError> {
        let row = bincode::serialize(entry).map_err(|e| StorageError::Decode(e.to_string()))?;
        self.append_row(CRASH_SEQ_KEY, "crash:", &row)
    }

    async fn append_wager(&self, wager: &Wager) -> Result<(), StorageError> {
        let row = bincode::serialize(wager).map_err(|e| StorageError::Decode(e.to_string()))?;
        let key = format!("wager:{}:{}", wager.round_id, wager.id);
        self.db.put(key.as_bytes(), row)?;
        Ok(())
    }

    async fn append_balance_change(&self, change: &BalanceChange) -> Result<(), StorageError> {
        let row = bincode::serialize(change).map_err(|e| StorageError::Decode(e.to_string()))?;
        self.append_row(BALANCE_SEQ_KEY, "balance:", &row)
    }

    async fn store_override(&self, state: &CrashOverride) -> Result<(), StorageError> {
        let row = bincode::serialize(state).map_err(|e| StorageError::Decode(e.to_string()))?;
        self.db.put(OVERRIDE_KEY, row)?;
        Ok(())
    }

    async fn load_override(&self) -> Result<CrashOverride, StorageError> {
        let bytes = self
            .db
            .get(OVERRIDE_KEY)
            .map_err(|e| StorageError::Read(e.to_string()))?;
        match bytes {
            Some(bytes) => {
                bincode::deserialize(&bytes).map_err(|e| StorageError::Decode(e.to_string()))
            }
            None => Ok(CrashOverride::None),
        }
    }

    async fn load_recent_crashes(
        &self,
        limit: usize,
    ) -> Result<Vec<CrashHistoryEntry>, StorageError> {
        let next_seq = self.read_seq(CRASH_SEQ_KEY)?;
        let mut entries = Vec::with_capacity(limit.min(next_seq as usize));

        let mut seq = next_seq;
        while seq > 0 && entries.len() < limit {
            seq -= 1;
            let key = format!("crash:{:020}", seq);
            let bytes = self
                .db
                .get(key.as_bytes())
                .map_err(|e| StorageError::Read(e.to_string()))?;
            let Some(bytes) = bytes else {
                // Gap in the log; stop rather than guess.
                break;
            };
            let entry: CrashHistoryEntry =
                bincode::deserialize(&bytes).map_err(|e| StorageError::Decode(e.to_string()))?;
            entries.push(entry);
        }
        Ok(entries)
    }
}

/// In-memory gateway for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryStorage {
    inner: std::sync::Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    crashes: Vec<CrashHistoryEntry>,
    wagers: Vec<Wager>,
    balance_changes: Vec<BalanceChange>,
    override_state: CrashOverride,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn wager_count(&self) -> usize {
        self.inner.lock().expect("memory storage poisoned").wagers.len()
    }

    pub fn balance_change_count(&self) -> usize {
        self.inner
            .lock()
            .expect("memory storage poisoned")
            .balance_changes
            .len()
    }
}

#[async_trait]
impl PersistenceGateway for MemoryStorage {
    async fn append_crash_entry(&self, entry: &CrashHistoryEntry) -> Result<(), StorageError> {
        self.inner
            .lock()
            .expect("memory storage poisoned")
            .crashes
            .push(entry.clone());
        Ok(())
    }

    async fn append_wager(&self, wager: &Wager) -> Result<(), StorageError> {
        self.inner
            .lock()
            .expect("memory storage poisoned")
            .wagers
            .push(wager.clone());
        Ok(())
    }

    async fn append_balance_change(&self, change: &BalanceChange) -> Result<(), StorageError> {
        self.inner
            .lock()
            .expect("memory storage poisoned")
            .balance_changes
            .push(change.clone());
        Ok(())
    }

    async fn store_override(&self, state: &CrashOverride) -> Result<(), StorageError> {
        self.inner.lock().expect("memory storage poisoned").override_state = state.clone();
        Ok(())
    }

    async fn load_override(&self) -> Result<CrashOverride, StorageError> {
        Ok(self
            .inner
            .lock()
            .expect("memory storage poisoned")
            .override_state
            .clone())
    }

    async fn load_recent_crashes(
        &self,
        limit: usize,
    ) -> Result<Vec<CrashHistoryEntry>, StorageError> {
        let inner = self.inner.lock().expect("memory storage poisoned");
        Ok(inner.crashes.iter().rev().take(limit).cloned().collect())
    }
}

/// One queued durable write.
#[derive(Debug, Clone)]
pub enum PersistenceOp {
    Crash(CrashHistoryEntry),
    Wager(Wager),
    Balance(BalanceChange),
    Override(CrashOverride),
}

/// Fire-and-forget entry point to the write-behind worker. The engine
/// records through this handle and never awaits storage.
#[derive(Clone)]
pub struct PersistenceHandle {
    tx: mpsc::UnboundedSender<PersistenceOp>,
}

impl PersistenceHandle {
    /// Spawn the write-behind worker draining queued ops into the gateway.
    pub fn spawn(gateway: Arc<dyn PersistenceGateway>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<PersistenceOp>();
        tokio::spawn(async move {
            while let Some(op) = rx.recv().await {
                write_with_retry(gateway.as_ref(), op).await;
            }
            debug!("persistence worker stopped");
        });
        Self { tx }
    }

    /// Queue-only handle for unit tests; returns the receiver so tests can
    /// inspect what the engine recorded.
    pub fn sink() -> (Self, mpsc::UnboundedReceiver<PersistenceOp>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn record(&self, op: PersistenceOp) {
        if self.tx.send(op).is_err() {
            warn!("persistence worker gone; dropping record");
        }
    }
}

async fn write_with_retry(gateway: &dyn PersistenceGateway, op: PersistenceOp) {
    let mut delay = RETRY_BASE_DELAY;
    for attempt in 1..=WRITE_ATTEMPTS {
        let result = match &op {
            PersistenceOp::Crash(entry) => gateway.append_crash_entry(entry).await,
            PersistenceOp::Wager(wager) => gateway.append_wager(wager).await,
            PersistenceOp::Balance(change) => gateway.append_balance_change(change).await,
            PersistenceOp::Override(state) => gateway.store_override(state).await,
        };
        match result {
            Ok(()) => return,
            Err(e) if attempt < WRITE_ATTEMPTS => {
                warn!(attempt, "persistence write failed, retrying: {}", e);
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(e) => {
                error!("persistence write dropped after {} attempts: {}", WRITE_ATTEMPTS, e);
            }
        }
    }
}

fn parse_u64_le(bytes: &[u8]) -> Option<u64> {
    let arr: [u8; 8] = bytes.try_into().ok()?;
    Some(u64::from_le_bytes(arr))
}
