use super::*;
use buffer::BufferPool;
use common::TableId;
use lock::LockMode;
use pretty_assertions::assert_eq;
use tempfile::tempdir;

fn setup(num_columns: usize) -> (tempfile::TempDir, Arc<Table>, TxnRuntime) {
    let dir = tempdir().unwrap();
    let pool = Arc::new(BufferPool::new(64));
    pool.register_table(TableId(1), dir.path().to_path_buf());
    let table =
        Arc::new(Table::create(TableId(1), "grades", num_columns, 0, pool).unwrap());
    let rt = TxnRuntime::new(Arc::new(LockManager::new(8)));
    (dir, table, rt)
}

fn all(n: usize) -> Vec<bool> {
    vec![true; n]
}

#[test]
fn transaction_commits_a_batch() {
    let (_dir, table, rt) = setup(3);

    let mut txn = Transaction::new();
    txn.add_query(table.clone(), QueryOp::Insert { values: vec![1, 10, 20] });
    txn.add_query(table.clone(), QueryOp::Insert { values: vec![2, 30, 40] });
    txn.add_query(
        table.clone(),
        QueryOp::Select { key: 1, column: 0, projection: all(3) },
    );
    txn.add_query(table.clone(), QueryOp::Sum { start_key: 1, end_key: 2, column: 1 });

    assert_eq!(txn.run(&rt), TxnStatus::Committed);
    assert_eq!(
        txn.results(),
        &[
            QueryResult::Written,
            QueryResult::Written,
            QueryResult::Rows(vec![vec![1, 10, 20]]),
            QueryResult::Sum(40),
        ]
    );
}

#[test]
fn commit_releases_every_lock() {
    let (_dir, table, rt) = setup(2);
    let mut txn = Transaction::new();
    txn.add_query(table.clone(), QueryOp::Insert { values: vec![1, 10] });
    txn.add_query(table.clone(), QueryOp::Update { key: 1, diff: vec![None, Some(11)] });
    assert_eq!(txn.run(&rt), TxnStatus::Committed);

    let rid = table.lookup(0, 1).unwrap()[0];
    assert!(rt.locks().is_free(table.id, rid));
}

#[test]
fn conflict_aborts_and_retry_succeeds() {
    let (_dir, table, rt) = setup(2);
    let query = Query::new(table.clone(), rt.clone());
    assert!(query.insert(&[1, 10]));

    let rid = table.lookup(0, 1).unwrap()[0];
    let holder = rt.allocate_txn_id();
    rt.locks().try_acquire(holder, table.id, rid, LockMode::Exclusive);

    let mut txn = Transaction::new();
    txn.add_query(table.clone(), QueryOp::Update { key: 1, diff: vec![None, Some(99)] });
    assert_eq!(txn.run(&rt), TxnStatus::Aborted);

    // The holder commits; the retry finds the record free.
    rt.locks().release_all(holder);
    assert_eq!(txn.run(&rt), TxnStatus::Committed);
    assert_eq!(query.select(1, 0, &all(2)), vec![vec![1, 99]]);
}

#[test]
fn abort_rolls_back_earlier_queries() {
    let (_dir, table, rt) = setup(2);
    let query = Query::new(table.clone(), rt.clone());
    assert!(query.insert(&[1, 10]));

    let rid = table.lookup(0, 1).unwrap()[0];
    let holder = rt.allocate_txn_id();
    rt.locks().try_acquire(holder, table.id, rid, LockMode::Exclusive);

    // Insert succeeds, then the update conflicts: the insert must be undone.
    let mut txn = Transaction::new();
    txn.add_query(table.clone(), QueryOp::Insert { values: vec![2, 20] });
    txn.add_query(table.clone(), QueryOp::Update { key: 1, diff: vec![None, Some(99)] });
    assert_eq!(txn.run(&rt), TxnStatus::Aborted);

    assert!(query.select(2, 0, &all(2)).is_empty());
    rt.locks().release_all(holder);
    // The retracted key is free again.
    assert!(query.insert(&[2, 21]));
}

#[test]
fn reads_of_uncommitted_inserts_are_impossible() {
    let (_dir, table, rt) = setup(2);

    // An insert holds X on its fresh rid until commit; a reader arriving
    // before the release conflicts instead of seeing the row.
    let writer = rt.allocate_txn_id();
    let mut undo = Vec::new();
    exec::apply(
        &rt,
        writer,
        &table,
        &QueryOp::Insert { values: vec![1, 10] },
        &mut undo,
    )
    .unwrap();

    let reader = rt.allocate_txn_id();
    let result = exec::apply(
        &rt,
        reader,
        &table,
        &QueryOp::Select { key: 1, column: 0, projection: all(2) },
        &mut Vec::new(),
    );
    assert!(matches!(result, Err(DbError::Conflict { .. })));
    rt.locks().release_all(writer);
    rt.locks().release_all(reader);
}

#[test]
fn missing_key_fails_without_retry() {
    let (_dir, table, rt) = setup(2);
    let mut txn = Transaction::new();
    txn.add_query(table.clone(), QueryOp::Update { key: 42, diff: vec![None, Some(1)] });
    assert_eq!(txn.run(&rt), TxnStatus::Failed);
}

#[test]
fn duplicate_insert_fails_the_transaction() {
    let (_dir, table, rt) = setup(2);
    let query = Query::new(table.clone(), rt.clone());
    assert!(query.insert(&[1, 10]));

    let mut txn = Transaction::new();
    txn.add_query(table.clone(), QueryOp::Insert { values: vec![1, 11] });
    assert_eq!(txn.run(&rt), TxnStatus::Failed);
    // Original row intact.
    assert_eq!(query.select(1, 0, &all(2)), vec![vec![1, 10]]);
}

#[test]
fn query_surface_round_trip() {
    let (_dir, table, rt) = setup(3);
    let query = Query::new(table, rt);

    assert!(query.insert(&[1, 10, 20]));
    assert!(!query.insert(&[1, 0, 0])); // duplicate key
    assert_eq!(query.select(1, 0, &all(3)), vec![vec![1, 10, 20]]);
    assert!(query.select(9, 0, &all(3)).is_empty());

    assert!(query.update(1, &[None, Some(11), None]));
    assert!(!query.update(9, &[None, Some(1), None]));
    assert_eq!(query.select(1, 0, &all(3)), vec![vec![1, 11, 20]]);
    assert_eq!(query.select_version(1, 0, &all(3), -1), vec![vec![1, 10, 20]]);

    assert!(query.increment(1, 2));
    assert_eq!(query.select(1, 0, &all(3)), vec![vec![1, 11, 21]]);

    assert_eq!(query.sum(0, 10, 2), 21);
    assert_eq!(query.sum_version(0, 10, 1, -2), 10);
    assert_eq!(query.sum(10, 0, 1), 0);

    assert!(query.delete(1));
    assert!(!query.delete(1));
    assert!(query.select(1, 0, &all(3)).is_empty());
}

#[test]
fn single_query_conflict_returns_false() {
    let (_dir, table, rt) = setup(2);
    let query = Query::new(table.clone(), rt.clone());
    assert!(query.insert(&[1, 10]));

    let rid = table.lookup(0, 1).unwrap()[0];
    let holder = rt.allocate_txn_id();
    rt.locks().try_acquire(holder, table.id, rid, LockMode::Exclusive);

    assert!(!query.update(1, &[None, Some(2)]));
    assert!(query.select(1, 0, &all(2)).is_empty());

    rt.locks().release_all(holder);
    // Queued waits from the failed one-shot queries must not wedge later
    // callers forever; each one-shot released its own registration.
    assert!(query.update(1, &[None, Some(2)]));
}

#[test]
fn worker_commits_disjoint_transactions() {
    let (_dir, table, rt) = setup(2);
    let mut worker = TransactionWorker::new(rt.clone(), 4);

    for k in 0..32 {
        let mut txn = Transaction::new();
        txn.add_query(table.clone(), QueryOp::Insert { values: vec![k, k * 2] });
        worker.add(txn);
    }
    worker.run();
    worker.join();

    assert_eq!(worker.committed(), 32);
    assert_eq!(worker.failed(), 0);
    let query = Query::new(table, rt);
    assert_eq!(query.sum(0, 31, 0), (0..32).sum::<i64>());
}

#[test]
fn contending_writers_both_commit_after_retry() {
    let (_dir, table, rt) = setup(2);
    let query = Query::new(table.clone(), rt.clone());
    assert!(query.insert(&[1, 0]));

    let mut worker = TransactionWorker::new(rt.clone(), 2);
    for v in [100, 200] {
        let mut txn = Transaction::new();
        txn.add_query(table.clone(), QueryOp::Update { key: 1, diff: vec![None, Some(v)] });
        worker.add(txn);
    }
    worker.run();
    worker.join();

    assert_eq!(worker.committed(), 2);
    let row = &query.select(1, 0, &all(2))[0];
    assert!(row[1] == 100 || row[1] == 200);
    // Two committed updates: two versions behind the head exists.
    assert_eq!(query.select_version(1, 0, &all(2), -2), vec![vec![1, 0]]);
}

#[test]
fn concurrent_increments_serialize() {
    let (_dir, table, rt) = setup(2);
    let query = Query::new(table.clone(), rt.clone());
    assert!(query.insert(&[1, 0]));

    let mut worker = TransactionWorker::new(rt.clone(), 4);
    for _ in 0..40 {
        let mut txn = Transaction::new();
        txn.add_query(table.clone(), QueryOp::Increment { key: 1, column: 1 });
        worker.add(txn);
    }
    worker.run();
    worker.join();

    assert_eq!(worker.committed(), 40);
    assert_eq!(query.select(1, 0, &all(2)), vec![vec![1, 40]]);
}
