//! Buffer pool mediating between durable page files and in-memory access.
//!
//! The pool is a fixed-capacity cache of page frames keyed by [`PageKey`]:
//! - a `get` pins the frame and loads it from disk on a miss
//! - dropping the returned guard unpins and appends to the LRU order
//! - eviction picks the least recently released unpinned frame, flushing
//!   it first when dirty
//! - when every frame is pinned, `try_get` fails with `PoolExhausted` and
//!   `get` yields and retries
//!
//! Bookkeeping lives under a single mutex; page bytes sit behind a
//! per-frame `RwLock`. Writers hold the record's exclusive lock, so frame
//! content is stable while pinned for read.

#[cfg(test)]
mod tests;

use common::{DbError, DbResult, TableId};
use dashmap::DashMap;
use hashbrown::HashMap;
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use std::{
    fs,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
};
use storage::{ColumnPage, PageKey};
use tracing::debug;

struct Frame {
    key: PageKey,
    page: RwLock<ColumnPage>,
    pin_count: AtomicU32,
    dirty: AtomicBool,
}

struct PoolInner {
    frames: HashMap<PageKey, Arc<Frame>>,
    /// Eviction candidates: exactly the unpinned frames, least recently
    /// released first.
    lru: LruCache<PageKey, ()>,
}

/// LRU page cache with pin counts and synchronous write-back on eviction.
pub struct BufferPool {
    capacity: usize,
    tables: DashMap<TableId, PathBuf>,
    inner: Mutex<PoolInner>,
}

impl BufferPool {
    /// Create a pool holding at most `capacity` resident frames.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be > 0");
        Self {
            capacity,
            tables: DashMap::new(),
            inner: Mutex::new(PoolInner {
                frames: HashMap::new(),
                lru: LruCache::unbounded(),
            }),
        }
    }

    /// Register the on-disk directory backing a table's pages.
    pub fn register_table(&self, table: TableId, dir: PathBuf) {
        self.tables.insert(table, dir);
    }

    /// Drop a table's frames without flushing and forget its directory.
    pub fn discard_table(&self, table: TableId) {
        let mut inner = self.inner.lock();
        let keys: Vec<PageKey> = inner
            .frames
            .keys()
            .filter(|k| k.table == table)
            .copied()
            .collect();
        for key in keys {
            inner.frames.remove(&key);
            inner.lru.pop(&key);
        }
        drop(inner);
        self.tables.remove(&table);
    }

    /// Pin the page, loading it from disk on a miss. Fails with
    /// `PoolExhausted` when the pool is full of pinned frames.
    pub fn try_get(&self, key: PageKey) -> DbResult<PageGuard<'_>> {
        let dir = self
            .tables
            .get(&key.table)
            .map(|d| d.value().clone())
            .ok_or_else(|| {
                DbError::Storage(format!("table {} not registered", key.table.0))
            })?;

        let mut inner = self.inner.lock();

        if let Some(frame) = inner.frames.get(&key).cloned() {
            frame.pin_count.fetch_add(1, Ordering::Relaxed);
            inner.lru.pop(&key);
            return Ok(PageGuard { pool: self, frame });
        }

        if inner.frames.len() >= self.capacity {
            let (victim_key, _) =
                inner.lru.pop_lru().ok_or(DbError::PoolExhausted)?;
            if let Some(victim) = inner.frames.remove(&victim_key) {
                debug!(?victim_key, "evicting frame");
                self.write_back(&victim)?;
            }
        }

        let path = key.path(&dir);
        let page = if path.exists() {
            debug!(?key, "loading page from disk");
            ColumnPage::from_bytes(&fs::read(&path)?)?
        } else {
            ColumnPage::new()
        };

        let frame = Arc::new(Frame {
            key,
            page: RwLock::new(page),
            pin_count: AtomicU32::new(1),
            dirty: AtomicBool::new(false),
        });
        inner.frames.insert(key, frame.clone());
        Ok(PageGuard { pool: self, frame })
    }

    /// Pin the page, yielding and retrying while the pool is exhausted.
    pub fn get(&self, key: PageKey) -> DbResult<PageGuard<'_>> {
        let mut attempts = 0u64;
        loop {
            match self.try_get(key) {
                Err(DbError::PoolExhausted) => {
                    attempts += 1;
                    if attempts % 1024 == 0 {
                        debug!(?key, attempts, "pool exhausted, still retrying");
                    }
                    std::thread::yield_now();
                }
                other => return other,
            }
        }
    }

    /// Write every dirty frame to its backing file.
    pub fn flush_all(&self) -> DbResult<()> {
        let inner = self.inner.lock();
        for frame in inner.frames.values() {
            self.write_back(frame)?;
        }
        Ok(())
    }

    /// Number of resident frames, for capacity assertions.
    pub fn resident(&self) -> usize {
        self.inner.lock().frames.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn write_back(&self, frame: &Frame) -> DbResult<()> {
        if !frame.dirty.load(Ordering::Acquire) {
            return Ok(());
        }
        // A dropped table has no directory left; its frames are garbage.
        let Some(dir) = self
            .tables
            .get(&frame.key.table)
            .map(|d| d.value().clone())
        else {
            return Ok(());
        };
        let path = frame.key.path(&dir);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, frame.page.read().to_bytes())?;
        frame.dirty.store(false, Ordering::Release);
        Ok(())
    }

    fn unpin(&self, frame: &Arc<Frame>) {
        let mut inner = self.inner.lock();
        let prev = frame.pin_count.fetch_sub(1, Ordering::Relaxed);
        debug_assert!(prev > 0, "unpin of unpinned frame");
        if prev == 1 && inner.frames.contains_key(&frame.key) {
            inner.lru.push(frame.key, ());
        }
    }
}

/// A pinned page. Mutations mark the frame dirty; dropping the guard
/// unpins and makes the frame an eviction candidate again.
pub struct PageGuard<'a> {
    pool: &'a BufferPool,
    frame: Arc<Frame>,
}

impl std::fmt::Debug for PageGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageGuard").field("key", &self.frame.key).finish_non_exhaustive()
    }
}

impl PageGuard<'_> {
    pub fn read(&self, slot: u16) -> DbResult<i64> {
        self.frame.page.read().read(slot)
    }

    pub fn num_records(&self) -> u16 {
        self.frame.page.read().num_records()
    }

    pub fn has_capacity(&self) -> bool {
        self.frame.page.read().has_capacity()
    }

    pub fn append(&self, value: i64) -> Option<u16> {
        let slot = self.frame.page.write().append(value);
        if slot.is_some() {
            self.frame.dirty.store(true, Ordering::Release);
        }
        slot
    }

    pub fn overwrite(&self, slot: u16, value: i64) -> DbResult<()> {
        self.frame.page.write().overwrite(slot, value)?;
        self.frame.dirty.store(true, Ordering::Release);
        Ok(())
    }
}

impl Drop for PageGuard<'_> {
    fn drop(&mut self) {
        self.pool.unpin(&self.frame);
    }
}
