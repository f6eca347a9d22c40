//! Query execution under record locks, shared by transactions and the
//! auto-commit query surface.

use crate::{QueryOp, QueryResult, TxnRuntime};
use common::{DbError, DbResult, Rid};
use lock::{AcquireResult, LockMode, TxnId};
use std::sync::Arc;
use table::{DeleteOutcome, Table, UpdateOutcome};
use tracing::warn;

/// One entry of the rollback log, applied in reverse on abort.
pub(crate) enum Undo {
    Insert { table: Arc<Table>, rid: Rid, row: Vec<i64> },
    Update { table: Arc<Table>, outcome: UpdateOutcome },
    Delete { table: Arc<Table>, outcome: DeleteOutcome },
}

fn acquire(
    rt: &TxnRuntime,
    txn: TxnId,
    table: &Table,
    rid: Rid,
    mode: LockMode,
) -> DbResult<()> {
    match rt.locks().try_acquire(txn, table.id, rid, mode) {
        AcquireResult::Acquired => Ok(()),
        AcquireResult::Conflict => Err(DbError::Conflict { txn, record: rid.0 }),
    }
}

/// Run one query for `txn`, taking the locks it needs and logging undo
/// information for every mutation.
pub(crate) fn apply(
    rt: &TxnRuntime,
    txn: TxnId,
    table: &Arc<Table>,
    op: &QueryOp,
    undo: &mut Vec<Undo>,
) -> DbResult<QueryResult> {
    match op {
        QueryOp::Insert { values } => {
            let rid = table
                .insert_with(values, |rid| acquire(rt, txn, table, rid, LockMode::Exclusive))?;
            undo.push(Undo::Insert { table: table.clone(), rid, row: values.clone() });
            Ok(QueryResult::Written)
        }

        QueryOp::Update { key, diff } => {
            let rid = lookup_one(table, *key)?;
            acquire(rt, txn, table, rid, LockMode::Exclusive)?;
            let outcome = table.update(*key, diff)?;
            undo.push(Undo::Update { table: table.clone(), outcome });
            Ok(QueryResult::Written)
        }

        QueryOp::Delete { key } => {
            let rid = lookup_one(table, *key)?;
            acquire(rt, txn, table, rid, LockMode::Exclusive)?;
            let outcome = table.delete(*key)?;
            undo.push(Undo::Delete { table: table.clone(), outcome });
            Ok(QueryResult::Written)
        }

        QueryOp::Increment { key, column } => {
            let rid = lookup_one(table, *key)?;
            acquire(rt, txn, table, rid, LockMode::Exclusive)?;
            let outcome = table.increment(*key, *column)?;
            undo.push(Undo::Update { table: table.clone(), outcome });
            Ok(QueryResult::Written)
        }

        QueryOp::Select { key, column, projection } => {
            select(rt, txn, table, *key, *column, projection, 0)
        }

        QueryOp::SelectVersion { key, column, projection, version_offset } => {
            select(rt, txn, table, *key, *column, projection, *version_offset)
        }

        QueryOp::Sum { start_key, end_key, column } => {
            sum(rt, txn, table, *start_key, *end_key, *column, 0)
        }

        QueryOp::SumVersion { start_key, end_key, column, version_offset } => {
            sum(rt, txn, table, *start_key, *end_key, *column, *version_offset)
        }
    }
}

fn lookup_one(table: &Table, key: i64) -> DbResult<Rid> {
    table
        .lookup(table.schema.key_column, key)?
        .into_iter()
        .next()
        .ok_or(DbError::NotFound)
}

fn select(
    rt: &TxnRuntime,
    txn: TxnId,
    table: &Table,
    key: i64,
    column: usize,
    projection: &[bool],
    version_offset: i64,
) -> DbResult<QueryResult> {
    let mut rows = Vec::new();
    for rid in table.lookup(column, key)? {
        acquire(rt, txn, table, rid, LockMode::Shared)?;
        if let Some(row) = table.read_row(rid, projection, version_offset)? {
            rows.push(row);
        }
    }
    Ok(QueryResult::Rows(rows))
}

/// Range aggregation. Every enumerated RID is S-locked before reading;
/// keys inserted after enumeration are not observed.
fn sum(
    rt: &TxnRuntime,
    txn: TxnId,
    table: &Table,
    start_key: i64,
    end_key: i64,
    column: usize,
    version_offset: i64,
) -> DbResult<QueryResult> {
    table.schema.check_column(column)?;
    let mut projection = vec![false; table.schema.num_columns];
    projection[column] = true;

    let mut total = 0i64;
    for rid in table.rids_in_key_range(start_key, end_key) {
        acquire(rt, txn, table, rid, LockMode::Shared)?;
        if let Some(row) = table.read_row(rid, &projection, version_offset)? {
            total = total.wrapping_add(row[0]);
        }
    }
    Ok(QueryResult::Sum(total))
}

/// Walk the rollback log newest-first, restoring indirection values and
/// retracting inserted rows. Undo failures mean torn storage; the caller
/// poisons the engine.
pub(crate) fn rollback(undo: Vec<Undo>) -> DbResult<()> {
    let mut first_error = None;
    for entry in undo.into_iter().rev() {
        let result = match &entry {
            Undo::Insert { table, rid, row } => table.undo_insert(*rid, row),
            Undo::Update { table, outcome } => table.undo_update(outcome),
            Undo::Delete { table, outcome } => table.undo_delete(outcome),
        };
        if let Err(e) = result {
            warn!(error = %e, "rollback entry failed");
            first_error.get_or_insert(e);
        }
    }
    match first_error {
        None => Ok(()),
        Some(e) => Err(e),
    }
}
