
use serde::{Deserialize, Serialize};
use std::{
    io,
    path::PathBuf,
    time::{SystemTime, UNIX_EPOCH},
};
use thiserror::Error;

/// Number of value slots in a single column page.
pub const RECORDS_PER_PAGE: u64 = 512;

/// Number of base pages per column in one page range.
pub const BASE_PAGES_PER_RANGE: u64 = 16;

/// Base records a page range can hold before it is full (16 × 512).
pub const RECORDS_PER_RANGE: u64 = RECORDS_PER_PAGE * BASE_PAGES_PER_RANGE;

/// Hidden metadata columns stored alongside the data columns:
/// indirection, rid, timestamp, schema encoding.
pub const NUM_METADATA_COLUMNS: usize = 4;

/// Indirection value meaning "no updates applied; read the base record".
pub const INDIRECTION_NONE: u64 = 0;

/// Indirection sentinel marking a logically deleted record.
pub const RID_DELETED: u64 = u64::MAX;

/// High bit tagging tail-record identifiers, keeping the TID space
/// disjoint from the RID space.
pub const TID_TAG: u64 = 1 << 63;

const TID_RANGE_SHIFT: u32 = 40;
const TID_SEQ_MASK: u64 = (1 << TID_RANGE_SHIFT) - 1;

/// Logical identifier for a table registered with the database.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableId(pub u64);

/// Record identifier of a base record.
///
/// RIDs are assigned monotonically at insert and encode their position:
/// `rid = range * RECORDS_PER_RANGE + page * RECORDS_PER_PAGE + slot`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Rid(pub u64);

impl Rid {
    pub fn from_parts(range: u32, page: u32, slot: u16) -> Self {
        Rid(range as u64 * RECORDS_PER_RANGE
            + page as u64 * RECORDS_PER_PAGE
            + slot as u64)
    }

    /// The page range this record lives in.
    pub fn range(self) -> u32 {
        (self.0 / RECORDS_PER_RANGE) as u32
    }

    /// Base page index within the range.
    pub fn page(self) -> u32 {
        ((self.0 % RECORDS_PER_RANGE) / RECORDS_PER_PAGE) as u32
    }

    /// Slot within the base page.
    pub fn slot(self) -> u16 {
        (self.0 % RECORDS_PER_PAGE) as u16
    }
}

/// Identifier of a tail record, drawn from a space disjoint from RIDs.
///
/// Encodes `(range, seq)` where `seq` is the per-range tail sequence
/// number: `tid = TID_TAG | range << 40 | seq`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tid(u64);

impl Tid {
    pub fn new(range: u32, seq: u64) -> Self {
        debug_assert!(seq <= TID_SEQ_MASK, "tail sequence overflow");
        Tid(TID_TAG | (range as u64) << TID_RANGE_SHIFT | seq)
    }

    /// Reinterpret a raw indirection value as a TID. Returns `None` for
    /// values outside the tagged TID space (0, RIDs, the delete sentinel).
    pub fn from_raw(raw: u64) -> Option<Self> {
        if raw & TID_TAG != 0 && raw != RID_DELETED {
            Some(Tid(raw))
        } else {
            None
        }
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn range(self) -> u32 {
        ((self.0 & !TID_TAG) >> TID_RANGE_SHIFT) as u32
    }

    /// Per-range tail sequence number.
    pub fn seq(self) -> u64 {
        self.0 & TID_SEQ_MASK
    }

    /// Tail page index within the range.
    pub fn page(self) -> u32 {
        (self.seq() / RECORDS_PER_PAGE) as u32
    }

    /// Slot within the tail page.
    pub fn slot(self) -> u16 {
        (self.seq() % RECORDS_PER_PAGE) as u16
    }
}

/// Seconds since the Unix epoch, used for the hidden timestamp column.
pub fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Canonical error type shared across the engine's subsystems.
#[derive(Error, Debug)]
pub enum DbError {
    /// A record lock could not be acquired; converted to a transaction
    /// abort, never surfaced to single-query callers.
    #[error("lock conflict: txn {txn} on record {record}")]
    Conflict { txn: u64, record: u64 },
    #[error("key not found")]
    NotFound,
    #[error("duplicate primary key {0}")]
    DuplicateKey(i64),
    /// All 8192 base slots of a page range are written; the table grows a
    /// new range and retries.
    #[error("page range full")]
    RangeFull,
    /// Every buffer frame is pinned; the caller yields and retries.
    #[error("buffer pool exhausted")]
    PoolExhausted,
    #[error("schema mismatch: expected {expected} columns, got {got}")]
    SchemaMismatch { expected: usize, got: usize },
    #[error("storage: {0}")]
    Storage(String),
    #[error("database poisoned by a prior I/O failure")]
    Poisoned,
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl DbError {
    /// I/O failures are fatal and poison the owning database.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DbError::Io(_) | DbError::Poisoned)
    }
}

/// Result alias that carries a `DbError`.
pub type DbResult<T> = Result<T, DbError>;

/// Runtime configuration for the engine.
///
/// # Example
/// ```
/// use common::Config;
/// use std::path::PathBuf;
///
/// let config = Config::builder()
///     .data_dir(PathBuf::from("./my_db"))
///     .buffer_pool_frames(512)
///     .build();
/// assert_eq!(config.worker_threads, 4);
/// ```
#[derive(Clone, Debug, Serialize, Deserialize, bon::Builder)]
pub struct Config {
    /// Directory where table data and metadata live.
    #[builder(default = PathBuf::from("./lstore_data"))]
    pub data_dir: PathBuf,
    /// Number of page frames the buffer pool keeps resident.
    #[builder(default = 256)]
    pub buffer_pool_frames: usize,
    /// Number of shards in the lock manager's lock table.
    #[builder(default = 16)]
    pub lock_shards: usize,
    /// Threads spawned by a transaction worker pool.
    #[builder(default = 4)]
    pub worker_threads: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./lstore_data"),
            buffer_pool_frames: 256,
            lock_shards: 16,
            worker_threads: 4,
        }
    }
}
