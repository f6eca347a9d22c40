use super::*;
use storage::PageKind;
use tempfile::tempdir;

fn key(range: u32, column: u16, index: u32) -> PageKey {
    PageKey {
        table: TableId(1),
        range,
        column,
        kind: PageKind::Base,
        index,
    }
}

fn pool_with_dir(capacity: usize) -> (tempfile::TempDir, BufferPool) {
    let dir = tempdir().unwrap();
    let pool = BufferPool::new(capacity);
    pool.register_table(TableId(1), dir.path().to_path_buf());
    (dir, pool)
}

#[test]
fn missing_pages_materialize_empty() {
    let (_dir, pool) = pool_with_dir(4);
    let guard = pool.get(key(0, 0, 0)).unwrap();
    assert_eq!(guard.num_records(), 0);
    assert!(guard.has_capacity());
}

#[test]
fn writes_survive_eviction_and_reload() {
    let (_dir, pool) = pool_with_dir(1);

    {
        let guard = pool.get(key(0, 0, 0)).unwrap();
        guard.append(42).unwrap();
    }
    // Capacity 1: touching a second page evicts and flushes the first.
    {
        let guard = pool.get(key(0, 0, 1)).unwrap();
        guard.append(7).unwrap();
    }
    assert_eq!(pool.resident(), 1);

    let guard = pool.get(key(0, 0, 0)).unwrap();
    assert_eq!(guard.read(0).unwrap(), 42);
}

#[test]
fn resident_frames_never_exceed_capacity() {
    let (_dir, pool) = pool_with_dir(3);
    for i in 0..10 {
        let guard = pool.get(key(0, 0, i)).unwrap();
        guard.append(i as i64).unwrap();
        assert!(pool.resident() <= 3);
    }
    assert_eq!(pool.resident(), 3);
}

#[test]
fn pinned_frames_are_not_evicted() {
    let (_dir, pool) = pool_with_dir(2);

    let g0 = pool.get(key(0, 0, 0)).unwrap();
    let g1 = pool.get(key(0, 0, 1)).unwrap();

    // Pool is full of pinned frames: a third page cannot enter.
    match pool.try_get(key(0, 0, 2)) {
        Err(DbError::PoolExhausted) => {}
        other => panic!("expected PoolExhausted, got {other:?}"),
    }

    // Releasing one pin frees a frame.
    drop(g0);
    pool.try_get(key(0, 0, 2)).unwrap();
    drop(g1);
}

#[test]
fn repinning_removes_frame_from_eviction_candidates() {
    let (_dir, pool) = pool_with_dir(2);

    pool.get(key(0, 0, 0)).unwrap().append(1).unwrap();
    let held = pool.get(key(0, 0, 0)).unwrap();

    // The other slot churns; the pinned page must stay resident.
    pool.get(key(0, 0, 1)).unwrap();
    pool.get(key(0, 0, 2)).unwrap();
    assert_eq!(held.read(0).unwrap(), 1);
}

#[test]
fn lru_evicts_least_recently_released() {
    let (dir, pool) = pool_with_dir(2);

    pool.get(key(0, 0, 0)).unwrap().append(10).unwrap();
    pool.get(key(0, 0, 1)).unwrap().append(11).unwrap();

    // Touch page 0 so page 1 is the LRU candidate.
    pool.get(key(0, 0, 0)).unwrap();

    // New page evicts page 1, which must be flushed.
    pool.get(key(0, 0, 2)).unwrap();
    let flushed = dir.path().join("pr_0").join("base_0_1.bin");
    assert!(flushed.exists());
}

#[test]
fn flush_all_persists_every_dirty_frame() {
    let (dir, pool) = pool_with_dir(8);
    for i in 0..4 {
        pool.get(key(0, 0, i)).unwrap().append(i as i64).unwrap();
    }
    pool.flush_all().unwrap();

    for i in 0..4 {
        let path = dir.path().join("pr_0").join(format!("base_0_{i}.bin"));
        let page = ColumnPage::from_bytes(&fs::read(path).unwrap()).unwrap();
        assert_eq!(page.read(0).unwrap(), i as i64);
    }
}

#[test]
fn clean_frames_are_not_rewritten() {
    let (dir, pool) = pool_with_dir(2);
    pool.get(key(0, 0, 0)).unwrap();
    pool.flush_all().unwrap();
    // Never dirtied: no file should exist.
    assert!(!dir.path().join("pr_0").join("base_0_0.bin").exists());
}

#[test]
fn discard_table_drops_frames_without_flushing() {
    let (dir, pool) = pool_with_dir(4);
    pool.get(key(0, 0, 0)).unwrap().append(5).unwrap();
    pool.discard_table(TableId(1));

    assert_eq!(pool.resident(), 0);
    assert!(!dir.path().join("pr_0").join("base_0_0.bin").exists());
    assert!(pool.try_get(key(0, 0, 0)).is_err());
}

#[test]
fn overwrite_marks_frame_dirty() {
    let (dir, pool) = pool_with_dir(2);
    {
        let guard = pool.get(key(0, 0, 0)).unwrap();
        guard.append(1).unwrap();
    }
    pool.flush_all().unwrap();
    {
        let guard = pool.get(key(0, 0, 0)).unwrap();
        guard.overwrite(0, 99).unwrap();
    }
    pool.flush_all().unwrap();

    let path = dir.path().join("pr_0").join("base_0_0.bin");
    let page = ColumnPage::from_bytes(&fs::read(path).unwrap()).unwrap();
    assert_eq!(page.read(0).unwrap(), 99);
}

#[test]
#[should_panic(expected = "capacity must be > 0")]
fn zero_capacity_pool_panics() {
    let _ = BufferPool::new(0);
}
