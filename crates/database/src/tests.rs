use super::*;
use pretty_assertions::assert_eq;
use tempfile::tempdir;

fn all(n: usize) -> Vec<bool> {
    vec![true; n]
}

#[test]
fn create_table_and_query() {
    let dir = tempdir().unwrap();
    let db = Database::open(dir.path()).unwrap();
    db.create_table("grades", 3, 0).unwrap();

    let query = db.query("grades").unwrap();
    assert!(query.insert(&[1, 10, 20]));
    assert_eq!(query.select(1, 0, &all(3)), vec![vec![1, 10, 20]]);
}

#[test]
fn duplicate_table_names_are_rejected() {
    let dir = tempdir().unwrap();
    let db = Database::open(dir.path()).unwrap();
    db.create_table("grades", 2, 0).unwrap();
    assert!(db.create_table("grades", 4, 1).is_err());
}

#[test]
fn invalid_table_names_are_rejected() {
    let dir = tempdir().unwrap();
    let db = Database::open(dir.path()).unwrap();
    assert!(db.create_table("", 2, 0).is_err());
    assert!(db.create_table("../escape", 2, 0).is_err());
    assert!(db.create_table("a/b", 2, 0).is_err());
    db.create_table("ok_name-1", 2, 0).unwrap();
}

#[test]
fn unknown_table_is_not_found() {
    let dir = tempdir().unwrap();
    let db = Database::open(dir.path()).unwrap();
    assert!(matches!(db.table("nope"), Err(DbError::NotFound)));
    assert!(matches!(db.query("nope"), Err(DbError::NotFound)));
}

#[test]
fn close_then_open_recovers_rows() {
    let dir = tempdir().unwrap();
    {
        let db = Database::open(dir.path()).unwrap();
        db.create_table("grades", 3, 0).unwrap();
        let query = db.query("grades").unwrap();
        for k in 1..=1000 {
            assert!(query.insert(&[k, k * 2, k * 3]));
        }
        db.close().unwrap();
    }

    let db = Database::open(dir.path()).unwrap();
    let query = db.query("grades").unwrap();
    for k in (1..=1000).step_by(97) {
        assert_eq!(query.select(k, 0, &all(3)), vec![vec![k, k * 2, k * 3]]);
    }
    assert_eq!(query.sum(1, 1000, 0), (1..=1000i64).sum::<i64>());
}

#[test]
fn close_then_open_recovers_versions_and_deletes() {
    let dir = tempdir().unwrap();
    {
        let db = Database::open(dir.path()).unwrap();
        db.create_table("grades", 3, 0).unwrap();
        let query = db.query("grades").unwrap();
        for k in 1..=50 {
            query.insert(&[k, 0, 0]);
        }
        assert!(query.update(7, &[None, Some(77), None]));
        assert!(query.update(7, &[None, None, Some(78)]));
        assert!(query.delete(20));
        db.close().unwrap();
    }

    let db = Database::open(dir.path()).unwrap();
    let query = db.query("grades").unwrap();
    assert_eq!(query.select(7, 0, &all(3)), vec![vec![7, 77, 78]]);
    assert_eq!(query.select_version(7, 0, &all(3), -1), vec![vec![7, 77, 0]]);
    assert_eq!(query.select_version(7, 0, &all(3), -2), vec![vec![7, 0, 0]]);
    assert!(query.select(20, 0, &all(3)).is_empty());

    // The engine keeps assigning fresh RIDs after reopen.
    assert!(query.insert(&[51, 1, 1]));
    assert_eq!(query.select(51, 0, &all(3)), vec![vec![51, 1, 1]]);
}

#[test]
fn open_without_index_snapshot_rebuilds_from_pages() {
    let dir = tempdir().unwrap();
    {
        let db = Database::open(dir.path()).unwrap();
        db.create_table("grades", 2, 0).unwrap();
        let query = db.query("grades").unwrap();
        for k in 1..=20 {
            query.insert(&[k, k]);
        }
        query.update(3, &[Some(300), None]);
        db.close().unwrap();
    }

    // Losing the snapshot forces the base-page scan.
    std::fs::remove_file(dir.path().join("grades").join("index.pk")).unwrap();

    let db = Database::open(dir.path()).unwrap();
    let query = db.query("grades").unwrap();
    assert_eq!(query.select(300, 0, &all(2)), vec![vec![300, 3]]);
    assert!(query.select(3, 0, &all(2)).is_empty());
}

#[test]
fn open_without_indirection_snapshot_scans_base_columns() {
    let dir = tempdir().unwrap();
    {
        let db = Database::open(dir.path()).unwrap();
        db.create_table("grades", 2, 0).unwrap();
        let query = db.query("grades").unwrap();
        for k in 1..=10 {
            query.insert(&[k, k * 10]);
        }
        query.update(4, &[None, Some(999)]);
        query.delete(9);
        db.close().unwrap();
    }

    std::fs::remove_file(
        dir.path().join("grades").join("pr_0").join("indirection.bin"),
    )
    .unwrap();

    let db = Database::open(dir.path()).unwrap();
    let query = db.query("grades").unwrap();
    assert_eq!(query.select(4, 0, &all(2)), vec![vec![4, 999]]);
    assert!(query.select(9, 0, &all(2)).is_empty());
}

#[test]
fn corrupt_metadata_is_detected() {
    let dir = tempdir().unwrap();
    {
        let db = Database::open(dir.path()).unwrap();
        db.create_table("grades", 2, 0).unwrap();
        db.close().unwrap();
    }

    let path = dir.path().join("metadata");
    let mut bytes = std::fs::read(&path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    std::fs::write(&path, bytes).unwrap();

    match Database::open(dir.path()) {
        Err(DbError::Storage(msg)) => assert!(msg.contains("checksum")),
        other => panic!("expected checksum failure, got {other:?}"),
    }
}

#[test]
fn metadata_without_magic_is_rejected() {
    let dir = tempdir().unwrap();
    std::fs::create_dir_all(dir.path()).unwrap();
    std::fs::write(dir.path().join("metadata"), b"not a database file").unwrap();
    assert!(Database::open(dir.path()).is_err());
}

#[test]
fn drop_table_removes_data_and_directory() {
    let dir = tempdir().unwrap();
    let db = Database::open(dir.path()).unwrap();
    db.create_table("grades", 2, 0).unwrap();
    db.query("grades").unwrap().insert(&[1, 2]);

    db.drop_table("grades").unwrap();
    assert!(matches!(db.table("grades"), Err(DbError::NotFound)));
    assert!(!dir.path().join("grades").exists());
    assert!(matches!(db.drop_table("grades"), Err(DbError::NotFound)));

    // The name is reusable, with a clean slate.
    db.create_table("grades", 2, 0).unwrap();
    assert!(db.query("grades").unwrap().select(1, 0, &all(2)).is_empty());
}

#[test]
fn dropped_tables_stay_dropped_after_reopen() {
    let dir = tempdir().unwrap();
    {
        let db = Database::open(dir.path()).unwrap();
        db.create_table("keep", 2, 0).unwrap();
        db.create_table("gone", 2, 0).unwrap();
        db.query("keep").unwrap().insert(&[1, 1]);
        db.drop_table("gone").unwrap();
        db.close().unwrap();
    }

    let db = Database::open(dir.path()).unwrap();
    assert!(db.table("keep").is_ok());
    assert!(matches!(db.table("gone"), Err(DbError::NotFound)));
}

#[test]
fn multiple_databases_are_independent() {
    let dir_a = tempdir().unwrap();
    let dir_b = tempdir().unwrap();

    let db_a = Database::open(dir_a.path()).unwrap();
    let db_b = Database::open(dir_b.path()).unwrap();
    db_a.create_table("t", 2, 0).unwrap();
    db_b.create_table("t", 2, 0).unwrap();

    db_a.query("t").unwrap().insert(&[1, 100]);
    db_b.query("t").unwrap().insert(&[1, 200]);

    assert_eq!(db_a.query("t").unwrap().select(1, 0, &all(2)), vec![vec![1, 100]]);
    assert_eq!(db_b.query("t").unwrap().select(1, 0, &all(2)), vec![vec![1, 200]]);
}

#[test]
fn empty_tables_survive_reopen() {
    let dir = tempdir().unwrap();
    {
        let db = Database::open(dir.path()).unwrap();
        db.create_table("empty", 5, 2).unwrap();
        db.close().unwrap();
    }
    let db = Database::open(dir.path()).unwrap();
    let table = db.table("empty").unwrap();
    assert_eq!(table.schema.num_columns, 5);
    assert_eq!(table.schema.key_column, 2);
    assert!(db.query("empty").unwrap().select(0, 2, &all(5)).is_empty());
}
