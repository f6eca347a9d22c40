//! Close/open cycles: committed state must be fully recoverable.

use pretty_assertions::assert_eq;
use testsupport::prelude::*;

#[test]
fn thousand_rows_survive_a_reopen() {
    let mut ctx = TestDb::new();
    let query = grades_table(&ctx.db);
    populate(&query, 1000);
    drop(query);

    ctx = ctx.reopen();
    let query = ctx.db.query("grades").unwrap();
    for k in 1..=1000 {
        assert_row(&query.select(k, 0, &all_columns()), &grades_row(k));
    }
}

#[test]
fn version_chains_survive_a_reopen() {
    let mut ctx = TestDb::new();
    let query = grades_table(&ctx.db);
    populate(&query, 10);
    assert!(query.update(4, &[None, Some(41), None, None, None]));
    assert!(query.update(4, &[None, None, Some(42), None, None]));
    drop(query);

    ctx = ctx.reopen();
    let query = ctx.db.query("grades").unwrap();
    let mut latest = grades_row(4);
    latest[1] = 41;
    latest[2] = 42;
    assert_row(&query.select(4, 0, &all_columns()), &latest);

    let mut mid = grades_row(4);
    mid[1] = 41;
    assert_eq!(query.select_version(4, 0, &all_columns(), -1), vec![mid]);
    assert_eq!(
        query.select_version(4, 0, &all_columns(), -2),
        vec![grades_row(4)]
    );
}

#[test]
fn deletes_survive_a_reopen() {
    let mut ctx = TestDb::new();
    let query = grades_table(&ctx.db);
    populate(&query, 20);
    assert!(query.delete(13));
    drop(query);

    ctx = ctx.reopen();
    let query = ctx.db.query("grades").unwrap();
    assert_empty(&query.select(13, 0, &all_columns()));
    let expected: i64 = (1..=20).filter(|k| *k != 13).sum();
    assert_eq!(query.sum(1, 20, 0), expected);
}

#[test]
fn indexes_are_reconstructed_on_open() {
    let mut ctx = TestDb::new();
    let query = grades_table(&ctx.db);
    populate(&query, 100);
    // Re-key one row so a naive base-column scan would be wrong.
    assert!(query.update(60, &[Some(600), None, None, None, None]));
    drop(query);

    ctx = ctx.reopen();
    let query = ctx.db.query("grades").unwrap();
    assert_empty(&query.select(60, 0, &all_columns()));
    let mut rekeyed = grades_row(60);
    rekeyed[0] = 600;
    assert_row(&query.select(600, 0, &all_columns()), &rekeyed);
    assert_eq!(query.sum(600, 600, 0), 600);
}

#[test]
fn multiple_page_ranges_survive_a_reopen() {
    let mut ctx = TestDb::new();
    ctx.db.create_table("t", 2, 0).unwrap();
    let query = ctx.db.query("t").unwrap();
    // Cross the 8192-record range boundary.
    for k in 0..9000 {
        assert!(query.insert(&[k, k % 7]));
    }
    drop(query);

    ctx = ctx.reopen();
    let query = ctx.db.query("t").unwrap();
    assert_eq!(query.select(8500, 0, &[true, true]), vec![vec![8500, 8500 % 7]]);
    assert_eq!(
        query.sum(0, 8999, 1),
        (0..9000i64).map(|k| k % 7).sum::<i64>()
    );
}

#[test]
fn writes_after_reopen_extend_existing_chains() {
    let mut ctx = TestDb::new();
    let query = grades_table(&ctx.db);
    populate(&query, 5);
    assert!(query.update(2, &[None, Some(21), None, None, None]));
    drop(query);

    ctx = ctx.reopen();
    let query = ctx.db.query("grades").unwrap();
    assert!(query.update(2, &[None, None, Some(22), None, None]));

    let mut latest = grades_row(2);
    latest[1] = 21;
    latest[2] = 22;
    assert_row(&query.select(2, 0, &all_columns()), &latest);
    // The pre-reopen version is one step back.
    let mut mid = grades_row(2);
    mid[1] = 21;
    assert_eq!(query.select_version(2, 0, &all_columns(), -1), vec![mid]);
}

#[test]
fn two_reopen_cycles_compose() {
    let mut ctx = TestDb::new();
    let query = grades_table(&ctx.db);
    populate(&query, 10);
    drop(query);

    ctx = ctx.reopen();
    ctx.db.query("grades").unwrap().delete(5);
    ctx = ctx.reopen();

    let query = ctx.db.query("grades").unwrap();
    assert_empty(&query.select(5, 0, &all_columns()));
    assert_row(&query.select(6, 0, &all_columns()), &grades_row(6));
}
