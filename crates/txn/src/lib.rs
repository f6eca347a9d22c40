//! Transactions, the single-query surface, and the parallel worker pool.
//!
//! The engine delivers serializable isolation through strict two-phase
//! locking: reads take shared record locks, writes exclusive ones, and
//! everything is held until commit or abort. Lock acquisition never
//! blocks — a conflict aborts the transaction, which undoes its rollback
//! log in reverse, releases every lock, and is retried by the worker.

#[cfg(test)]
mod tests;

mod exec;
mod query;
mod worker;

pub use query::Query;
pub use worker::TransactionWorker;

use common::DbError;
use lock::{LockManager, TxnId};
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use table::Table;
use tracing::debug;

/// Shared pieces every transaction needs: the lock manager, the
/// transaction-id counter, and the poison flag set on I/O failure.
#[derive(Clone)]
pub struct TxnRuntime {
    locks: Arc<LockManager>,
    next_txn_id: Arc<AtomicU64>,
    poisoned: Arc<AtomicBool>,
}

impl TxnRuntime {
    pub fn new(locks: Arc<LockManager>) -> Self {
        Self {
            locks,
            next_txn_id: Arc::new(AtomicU64::new(1)),
            poisoned: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    pub fn allocate_txn_id(&self) -> TxnId {
        self.next_txn_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Mark the engine dead after an I/O failure; all later calls fail.
    pub fn poison(&self) {
        self.poisoned.store(true, Ordering::Release);
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }
}

/// One query inside a transaction, bound to a table when added.
#[derive(Clone, Debug)]
pub enum QueryOp {
    Insert { values: Vec<i64> },
    Update { key: i64, diff: Vec<Option<i64>> },
    Delete { key: i64 },
    Select { key: i64, column: usize, projection: Vec<bool> },
    SelectVersion { key: i64, column: usize, projection: Vec<bool>, version_offset: i64 },
    Sum { start_key: i64, end_key: i64, column: usize },
    SumVersion { start_key: i64, end_key: i64, column: usize, version_offset: i64 },
    Increment { key: i64, column: usize },
}

/// Result of one query, collected in order on commit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueryResult {
    Written,
    Rows(Vec<Vec<i64>>),
    Sum(i64),
}

/// Outcome of running a transaction once.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxnStatus {
    Committed,
    /// Lock conflict: rolled back, worth retrying.
    Aborted,
    /// Logical failure (missing key, duplicate, bad arity) or poisoned
    /// engine: rolled back, retrying cannot help.
    Failed,
}

/// An ordered batch of queries executed under strict 2PL.
///
/// The transaction id is assigned on the first run and kept across
/// retries. An abort releases its lock-queue registrations along with its
/// locks, so a retry queues afresh behind waiters that arrived meanwhile.
#[derive(Default)]
pub struct Transaction {
    id: Option<TxnId>,
    queries: Vec<(Arc<Table>, QueryOp)>,
    results: Vec<QueryResult>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_query(&mut self, table: Arc<Table>, op: QueryOp) {
        self.queries.push((table, op));
    }

    /// Execute every query. On the first conflict or failure the rollback
    /// log is applied in reverse, then all locks release; on commit the
    /// locks release with no synchronous flush.
    pub fn run(&mut self, rt: &TxnRuntime) -> TxnStatus {
        if rt.is_poisoned() {
            return TxnStatus::Failed;
        }
        let txn = *self.id.get_or_insert_with(|| rt.allocate_txn_id());
        self.results.clear();
        let mut undo = Vec::new();

        for (table, op) in &self.queries {
            match exec::apply(rt, txn, table, op, &mut undo) {
                Ok(result) => self.results.push(result),
                Err(e) => {
                    let status = match e {
                        DbError::Conflict { .. } => TxnStatus::Aborted,
                        DbError::Io(_) | DbError::Poisoned => {
                            rt.poison();
                            TxnStatus::Failed
                        }
                        _ => TxnStatus::Failed,
                    };
                    debug!(txn, error = %e, "rolling back transaction");
                    if exec::rollback(undo).is_err() {
                        rt.poison();
                    }
                    rt.locks().release_all(txn);
                    return status;
                }
            }
        }

        rt.locks().release_all(txn);
        TxnStatus::Committed
    }

    /// Per-query results from the most recent run.
    pub fn results(&self) -> &[QueryResult] {
        &self.results
    }
}
