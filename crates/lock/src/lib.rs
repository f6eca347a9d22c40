//! Record-level shared/exclusive locks for strict two-phase locking.
//!
//! Locks are keyed by `(table, rid)` and sharded across independent lock
//! tables. Acquisition is non-blocking: a conflicting request registers the
//! transaction as a FIFO waiter and returns [`AcquireResult::Conflict`];
//! the caller aborts and retries. A grant is only handed to a compatible
//! requester that is the head waiter (or when no waiters are queued), so
//! queued transactions are served in arrival order across retries.


use common::{Rid, TableId};
use dashmap::DashMap;
use hashbrown::{HashMap, HashSet};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use tracing::debug;

/// Identifier of a running transaction.
pub type TxnId = u64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireResult {
    Acquired,
    Conflict,
}

type LockKey = (TableId, u64);

#[derive(Default)]
struct LockEntry {
    shared: Vec<TxnId>,
    exclusive: Option<TxnId>,
    waiters: VecDeque<TxnId>,
}

impl LockEntry {
    fn is_idle(&self) -> bool {
        self.shared.is_empty() && self.exclusive.is_none() && self.waiters.is_empty()
    }
}

/// Sharded lock table with per-transaction bookkeeping for `release_all`.
pub struct LockManager {
    shards: Vec<Mutex<HashMap<LockKey, LockEntry>>>,
    held: DashMap<TxnId, HashSet<LockKey>>,
    waits: DashMap<TxnId, HashSet<LockKey>>,
}

impl LockManager {
    /// Create a manager with the given number of lock-table shards.
    ///
    /// # Panics
    ///
    /// Panics if `shards` is 0.
    pub fn new(shards: usize) -> Self {
        assert!(shards > 0, "shards must be > 0");
        Self {
            shards: (0..shards).map(|_| Mutex::new(HashMap::new())).collect(),
            held: DashMap::new(),
            waits: DashMap::new(),
        }
    }

    /// Try to take `mode` on `(table, rid)` for `txn` without blocking.
    ///
    /// Re-acquisition is idempotent, and an S→X upgrade succeeds when `txn`
    /// is the only shared holder. Everything else that conflicts enqueues
    /// `txn` as a waiter and returns `Conflict`.
    pub fn try_acquire(
        &self,
        txn: TxnId,
        table: TableId,
        rid: Rid,
        mode: LockMode,
    ) -> AcquireResult {
        let key = (table, rid.0);
        let mut shard = self.shards[self.shard_of(&key)].lock();
        let entry = shard.entry(key).or_default();

        // Holding X already satisfies any request.
        if entry.exclusive == Some(txn) {
            return AcquireResult::Acquired;
        }

        let granted = match mode {
            LockMode::Shared => {
                if entry.shared.contains(&txn) {
                    return AcquireResult::Acquired;
                }
                entry.exclusive.is_none() && self.may_cut_queue(entry, txn)
            }
            LockMode::Exclusive => {
                let sole_shared = entry.shared.is_empty()
                    || entry.shared == [txn];
                entry.exclusive.is_none()
                    && sole_shared
                    && self.may_cut_queue(entry, txn)
            }
        };

        if !granted {
            if !entry.waiters.contains(&txn) {
                entry.waiters.push_back(txn);
            }
            self.waits.entry(txn).or_default().insert(key);
            debug!(txn, rid = rid.0, ?mode, "lock conflict");
            return AcquireResult::Conflict;
        }

        if entry.waiters.front() == Some(&txn) {
            entry.waiters.pop_front();
        }
        match mode {
            LockMode::Shared => entry.shared.push(txn),
            LockMode::Exclusive => {
                // Upgrade drops the shared hold.
                entry.shared.retain(|t| *t != txn);
                entry.exclusive = Some(txn);
            }
        }
        drop(shard);

        self.held.entry(txn).or_default().insert(key);
        if let Some(mut waited) = self.waits.get_mut(&txn) {
            waited.remove(&key);
        }
        AcquireResult::Acquired
    }

    /// Release every lock held by `txn` and purge its queued waits.
    pub fn release_all(&self, txn: TxnId) {
        if let Some((_, keys)) = self.held.remove(&txn) {
            for key in keys {
                let mut shard = self.shards[self.shard_of(&key)].lock();
                if let Some(entry) = shard.get_mut(&key) {
                    entry.shared.retain(|t| *t != txn);
                    if entry.exclusive == Some(txn) {
                        entry.exclusive = None;
                    }
                    if entry.is_idle() {
                        shard.remove(&key);
                    }
                }
            }
        }
        if let Some((_, keys)) = self.waits.remove(&txn) {
            for key in keys {
                let mut shard = self.shards[self.shard_of(&key)].lock();
                if let Some(entry) = shard.get_mut(&key) {
                    entry.waiters.retain(|t| *t != txn);
                    if entry.is_idle() {
                        shard.remove(&key);
                    }
                }
            }
        }
    }

    /// Whether no transaction holds or awaits `(table, rid)`. Test hook.
    pub fn is_free(&self, table: TableId, rid: Rid) -> bool {
        let key = (table, rid.0);
        let shard = self.shards[self.shard_of(&key)].lock();
        shard.get(&key).is_none()
    }

    /// FIFO gate: only the head waiter (or a newcomer to an empty queue)
    /// may take a compatible lock.
    fn may_cut_queue(&self, entry: &LockEntry, txn: TxnId) -> bool {
        entry.waiters.is_empty() || entry.waiters.front() == Some(&txn)
    }

    fn shard_of(&self, key: &LockKey) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.shards.len()
    }
}
