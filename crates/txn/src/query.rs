//! The single-query, auto-commit surface the harness calls.
//!
//! Each call is a one-query transaction: it takes the locks it needs,
//! executes, and releases. Write calls return `false` — never an error —
//! when the key is absent, the insert collides, or a concurrent
//! transaction holds a conflicting lock.

use crate::{exec, QueryOp, QueryResult, TxnRuntime};
use std::sync::Arc;
use table::Table;
use tracing::debug;

pub struct Query {
    table: Arc<Table>,
    rt: TxnRuntime,
}

impl Query {
    pub fn new(table: Arc<Table>, rt: TxnRuntime) -> Self {
        Self { table, rt }
    }

    pub fn table(&self) -> &Arc<Table> {
        &self.table
    }

    pub fn insert(&self, values: &[i64]) -> bool {
        matches!(self.run_one(QueryOp::Insert { values: values.to_vec() }), Some(_))
    }

    /// Rows matching `key` on `column`, restricted to the projected data
    /// columns. Empty when the key is unknown or the record is deleted.
    pub fn select(&self, key: i64, column: usize, projection: &[bool]) -> Vec<Vec<i64>> {
        self.select_version(key, column, projection, 0)
    }

    /// Like [`Query::select`] at an earlier version: 0 is the latest,
    /// -1 one update before it, saturating at the base record.
    pub fn select_version(
        &self,
        key: i64,
        column: usize,
        projection: &[bool],
        version_offset: i64,
    ) -> Vec<Vec<i64>> {
        match self.run_one(QueryOp::SelectVersion {
            key,
            column,
            projection: projection.to_vec(),
            version_offset,
        }) {
            Some(QueryResult::Rows(rows)) => rows,
            _ => Vec::new(),
        }
    }

    /// Apply a non-cumulative update: `None` entries leave their column
    /// unchanged.
    pub fn update(&self, key: i64, diff: &[Option<i64>]) -> bool {
        matches!(
            self.run_one(QueryOp::Update { key, diff: diff.to_vec() }),
            Some(_)
        )
    }

    pub fn delete(&self, key: i64) -> bool {
        matches!(self.run_one(QueryOp::Delete { key }), Some(_))
    }

    /// Sum `column` over primary keys in `[start_key, end_key]`.
    /// An inverted or empty range sums to 0.
    pub fn sum(&self, start_key: i64, end_key: i64, column: usize) -> i64 {
        self.sum_version(start_key, end_key, column, 0)
    }

    pub fn sum_version(
        &self,
        start_key: i64,
        end_key: i64,
        column: usize,
        version_offset: i64,
    ) -> i64 {
        match self.run_one(QueryOp::SumVersion {
            start_key,
            end_key,
            column,
            version_offset,
        }) {
            Some(QueryResult::Sum(total)) => total,
            _ => 0,
        }
    }

    pub fn increment(&self, key: i64, column: usize) -> bool {
        matches!(self.run_one(QueryOp::Increment { key, column }), Some(_))
    }

    fn run_one(&self, op: QueryOp) -> Option<QueryResult> {
        if self.rt.is_poisoned() {
            return None;
        }
        let txn = self.rt.allocate_txn_id();
        let mut undo = Vec::new();
        let result = exec::apply(&self.rt, txn, &self.table, &op, &mut undo);
        match result {
            Ok(result) => {
                self.rt.locks().release_all(txn);
                Some(result)
            }
            Err(e) => {
                debug!(txn, error = %e, "single query failed");
                if e.is_fatal() || exec::rollback(undo).is_err() {
                    self.rt.poison();
                }
                self.rt.locks().release_all(txn);
                None
            }
        }
    }
}
