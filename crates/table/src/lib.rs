//! Tables: row allocation, the indirection table, version-aware reads and
//! the index registry.
//!
//! A table owns its page ranges and indexes; page buffers belong to the
//! shared [`BufferPool`]. All methods take `&self` and are safe under
//! concurrent callers — row-level mutual exclusion is the caller's job
//! (record locks), structural growth is latched here.


mod pagerange;
mod schema;

pub use pagerange::PageRange;
pub use schema::{MAX_DATA_COLUMNS, TableSchema};

use buffer::BufferPool;
use common::{
    DbError, DbResult, INDIRECTION_NONE, RID_DELETED, Rid, TableId, now_secs,
};
use dashmap::DashMap;
use hashbrown::HashMap;
use index::{PrimaryIndex, SecondaryIndex};
use parking_lot::RwLock;
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use tracing::debug;

/// What an update changed; enough to roll it back and to re-run index
/// maintenance in reverse.
#[derive(Debug)]
pub struct UpdateOutcome {
    pub rid: Rid,
    pub prev_indirection: u64,
    /// `(old_key, new_key)` when the primary key column changed.
    pub rekey: Option<(i64, i64)>,
    /// `(column, old_value, new_value)` per maintained secondary index.
    pub secondary_changes: Vec<(usize, i64, i64)>,
}

/// What a delete removed; enough to restore the record and its index
/// entries on rollback.
#[derive(Debug)]
pub struct DeleteOutcome {
    pub rid: Rid,
    pub prev_indirection: u64,
    pub key: i64,
    /// Latest full row image at delete time.
    pub row: Vec<i64>,
}

pub struct Table {
    pub id: TableId,
    pub name: String,
    pub schema: TableSchema,
    pool: Arc<BufferPool>,
    ranges: RwLock<Vec<Arc<PageRange>>>,
    /// RID → newest TID, `INDIRECTION_NONE`, or `RID_DELETED`. Mirrors the
    /// base indirection column for concurrent access.
    indirection: DashMap<u64, u64>,
    next_rid: AtomicU64,
    primary: RwLock<PrimaryIndex>,
    secondaries: RwLock<HashMap<usize, SecondaryIndex>>,
}

impl Table {
    pub fn create(
        id: TableId,
        name: impl Into<String>,
        num_columns: usize,
        key_column: usize,
        pool: Arc<BufferPool>,
    ) -> DbResult<Self> {
        let schema = TableSchema::new(num_columns, key_column)?;
        Ok(Self {
            id,
            name: name.into(),
            schema,
            pool,
            ranges: RwLock::new(Vec::new()),
            indirection: DashMap::new(),
            next_rid: AtomicU64::new(0),
            primary: RwLock::new(PrimaryIndex::new()),
            secondaries: RwLock::new(HashMap::new()),
        })
    }

    /// Rebuild a table from persisted state. `tail_records[i]` is the tail
    /// count of range `i`; base fill is derived from `next_rid` since RID
    /// assignment is positional and sequential.
    pub fn restore(
        id: TableId,
        name: impl Into<String>,
        schema: TableSchema,
        pool: Arc<BufferPool>,
        next_rid: u64,
        tail_records: &[u64],
    ) -> Self {
        let num_ranges = tail_records
            .len()
            .max(next_rid.div_ceil(common::RECORDS_PER_RANGE) as usize);
        let ranges = (0..num_ranges)
            .map(|i| {
                let base = next_rid
                    .saturating_sub(i as u64 * common::RECORDS_PER_RANGE)
                    .min(common::RECORDS_PER_RANGE);
                let tails = tail_records.get(i).copied().unwrap_or(0);
                Arc::new(PageRange::restore(id, i as u32, base, tails))
            })
            .collect();
        Self {
            id,
            name: name.into(),
            schema,
            pool,
            ranges: RwLock::new(ranges),
            indirection: DashMap::new(),
            next_rid: AtomicU64::new(next_rid),
            primary: RwLock::new(PrimaryIndex::new()),
            secondaries: RwLock::new(HashMap::new()),
        }
    }

    // ---- Write path ----

    /// Insert a row, returning its RID. The row becomes visible to readers
    /// only once fully written: the duplicate check, page writes and index
    /// install all happen under the primary-index latch.
    pub fn insert(&self, values: &[i64]) -> DbResult<Rid> {
        self.insert_with(values, |_| Ok(()))
    }

    /// Like [`Table::insert`], invoking `pre_publish` with the assigned RID
    /// after the pages are written but before the row is installed in any
    /// index — the transaction layer takes its exclusive lock there, so an
    /// uncommitted insert can never be read. If `pre_publish` fails the
    /// slot is marked dead and never published.
    pub fn insert_with(
        &self,
        values: &[i64],
        pre_publish: impl FnOnce(Rid) -> DbResult<()>,
    ) -> DbResult<Rid> {
        self.schema.check_arity(values.len())?;
        let key = values[self.schema.key_column];

        let mut primary = self.primary.write();
        if primary.contains(key) {
            return Err(DbError::DuplicateKey(key));
        }

        let rid = Rid(self.next_rid.load(Ordering::Acquire));
        let range = self.range_for_insert(rid.range());

        let mut row = Vec::with_capacity(self.schema.total_columns());
        row.extend_from_slice(values);
        row.push(INDIRECTION_NONE as i64);
        row.push(rid.0 as i64);
        row.push(now_secs());
        row.push(0); // base records carry an empty encoding mask

        range.insert_base(&self.pool, &self.schema, rid, &row)?;
        if let Err(e) = pre_publish(rid) {
            // The slot is consumed but stays invisible.
            range.set_base_indirection(&self.pool, &self.schema, rid, RID_DELETED)?;
            self.indirection.insert(rid.0, RID_DELETED);
            self.next_rid.store(rid.0 + 1, Ordering::Release);
            return Err(e);
        }
        self.indirection.insert(rid.0, INDIRECTION_NONE);
        primary.insert(key, rid)?;
        self.next_rid.store(rid.0 + 1, Ordering::Release);
        drop(primary);

        let mut secondaries = self.secondaries.write();
        for (column, idx) in secondaries.iter_mut() {
            idx.insert(values[*column], rid);
        }
        Ok(rid)
    }

    /// Apply a non-cumulative update to the row keyed `key`. `diff` has one
    /// entry per data column; `None` leaves the column unchanged.
    pub fn update(&self, key: i64, diff: &[Option<i64>]) -> DbResult<UpdateOutcome> {
        self.schema.check_arity(diff.len())?;
        let rid = self
            .primary
            .read()
            .point_lookup(key)
            .ok_or(DbError::NotFound)?;
        let prev = self.current_indirection(rid)?;

        // Old values of the changed columns, read before the new version
        // exists, for index maintenance and rollback.
        let changed: Vec<usize> = (0..self.schema.num_columns)
            .filter(|c| diff[*c].is_some())
            .collect();
        let mut changed_mask = vec![false; self.schema.num_columns];
        for &c in &changed {
            changed_mask[c] = true;
        }
        let range = self.range(rid.range())?;
        let old_changed =
            range.read_version(&self.pool, &self.schema, rid, prev, 0, &changed_mask)?;
        let old_of = |column: usize| -> i64 {
            let pos = changed.iter().position(|c| *c == column).unwrap_or(0);
            old_changed[pos]
        };

        // Primary-key updates re-key the index and fail on collision.
        let mut rekey = None;
        if let Some(new_key) = diff[self.schema.key_column] {
            if new_key != key {
                let mut primary = self.primary.write();
                if primary.contains(new_key) {
                    return Err(DbError::DuplicateKey(new_key));
                }
                primary.remove(key);
                primary.insert(new_key, rid)?;
                rekey = Some((key, new_key));
            }
        }

        let tid = range.append_tail(&self.pool, &self.schema, diff, prev)?;
        // The tail record is fully written; now publish it.
        range.set_base_indirection(&self.pool, &self.schema, rid, tid.raw())?;
        self.indirection.insert(rid.0, tid.raw());

        let mut secondary_changes = Vec::new();
        let mut secondaries = self.secondaries.write();
        for &column in &changed {
            if let Some(idx) = secondaries.get_mut(&column) {
                let (old, new) = (old_of(column), diff[column].unwrap_or(0));
                if old != new {
                    idx.remove(old, rid);
                    idx.insert(new, rid);
                    secondary_changes.push((column, old, new));
                }
            }
        }

        Ok(UpdateOutcome { rid, prev_indirection: prev, rekey, secondary_changes })
    }

    /// Logically delete the row keyed `key`. The base slot is not
    /// reclaimed; the RID vanishes from every index.
    pub fn delete(&self, key: i64) -> DbResult<DeleteOutcome> {
        let rid = self
            .primary
            .read()
            .point_lookup(key)
            .ok_or(DbError::NotFound)?;
        let prev = self.current_indirection(rid)?;

        let all = vec![true; self.schema.num_columns];
        let range = self.range(rid.range())?;
        let row = range.read_version(&self.pool, &self.schema, rid, prev, 0, &all)?;

        range.set_base_indirection(&self.pool, &self.schema, rid, RID_DELETED)?;
        self.indirection.insert(rid.0, RID_DELETED);
        self.primary.write().remove(key);

        let mut secondaries = self.secondaries.write();
        for (column, idx) in secondaries.iter_mut() {
            idx.remove(row[*column], rid);
        }

        Ok(DeleteOutcome { rid, prev_indirection: prev, key, row })
    }

    /// Read `column`'s latest value and write it back plus one.
    pub fn increment(&self, key: i64, column: usize) -> DbResult<UpdateOutcome> {
        self.schema.check_column(column)?;
        let mut projection = vec![false; self.schema.num_columns];
        projection[column] = true;
        let rid = self
            .primary
            .read()
            .point_lookup(key)
            .ok_or(DbError::NotFound)?;
        let current = self
            .read_row(rid, &projection, 0)?
            .ok_or(DbError::NotFound)?;

        let mut diff = vec![None; self.schema.num_columns];
        diff[column] = Some(current[0].wrapping_add(1));
        self.update(key, &diff)
    }

    // ---- Read path ----

    /// Projected data columns of `rid` at a version, or `None` when the
    /// record never existed or is deleted.
    pub fn read_row(
        &self,
        rid: Rid,
        projection: &[bool],
        version_offset: i64,
    ) -> DbResult<Option<Vec<i64>>> {
        self.schema.check_arity(projection.len())?;
        let Some(ind) = self.indirection.get(&rid.0).map(|r| *r.value()) else {
            return Ok(None);
        };
        if ind == RID_DELETED {
            return Ok(None);
        }
        let range = self.range(rid.range())?;
        range
            .read_version(&self.pool, &self.schema, rid, ind, version_offset, projection)
            .map(Some)
    }

    /// RIDs matching `key` on `column`: the primary index for the key
    /// column, a secondary index when one exists, otherwise a scan over
    /// live records comparing the latest value.
    pub fn lookup(&self, column: usize, key: i64) -> DbResult<Vec<Rid>> {
        self.schema.check_column(column)?;
        if column == self.schema.key_column {
            return Ok(self.primary.read().point_lookup(key).into_iter().collect());
        }
        if let Some(idx) = self.secondaries.read().get(&column) {
            return Ok(idx.point_lookup(key));
        }

        let mut projection = vec![false; self.schema.num_columns];
        projection[column] = true;
        let mut rids: Vec<Rid> = Vec::new();
        for rid in self.live_rids() {
            if let Some(row) = self.read_row(rid, &projection, 0)? {
                if row[0] == key {
                    rids.push(rid);
                }
            }
        }
        rids.sort();
        Ok(rids)
    }

    /// RIDs of live records with primary key in `[start_key, end_key]`.
    pub fn rids_in_key_range(&self, start_key: i64, end_key: i64) -> Vec<Rid> {
        self.primary.read().range_lookup(start_key, end_key)
    }

    /// Sum `column` over keys in `[start_key, end_key]` at a version.
    /// An inverted range sums nothing.
    pub fn sum(
        &self,
        start_key: i64,
        end_key: i64,
        column: usize,
        version_offset: i64,
    ) -> DbResult<i64> {
        self.schema.check_column(column)?;
        let mut projection = vec![false; self.schema.num_columns];
        projection[column] = true;

        let mut total = 0i64;
        for rid in self.rids_in_key_range(start_key, end_key) {
            if let Some(row) = self.read_row(rid, &projection, version_offset)? {
                total = total.wrapping_add(row[0]);
            }
        }
        Ok(total)
    }

    // ---- Index registry ----

    /// Build a secondary index over `column` from the live rows.
    pub fn create_index(&self, column: usize) -> DbResult<()> {
        self.schema.check_column(column)?;
        if column == self.schema.key_column {
            return Err(DbError::Storage(
                "primary key column is always indexed".into(),
            ));
        }
        let mut projection = vec![false; self.schema.num_columns];
        projection[column] = true;

        let mut idx = SecondaryIndex::new();
        for rid in self.live_rids() {
            if let Some(row) = self.read_row(rid, &projection, 0)? {
                idx.insert(row[0], rid);
            }
        }
        debug!(table = self.id.0, column, entries = idx.len(), "built secondary index");
        self.secondaries.write().insert(column, idx);
        Ok(())
    }

    pub fn drop_index(&self, column: usize) {
        self.secondaries.write().remove(&column);
    }

    pub fn has_index(&self, column: usize) -> bool {
        column == self.schema.key_column || self.secondaries.read().contains_key(&column)
    }

    // ---- Rollback hooks (called by the transaction layer) ----

    /// Retract a freshly inserted row: drop its index entries and mark the
    /// base slot dead.
    pub fn undo_insert(&self, rid: Rid, row: &[i64]) -> DbResult<()> {
        let range = self.range(rid.range())?;
        range.set_base_indirection(&self.pool, &self.schema, rid, RID_DELETED)?;
        self.indirection.insert(rid.0, RID_DELETED);
        self.primary.write().remove(row[self.schema.key_column]);
        let mut secondaries = self.secondaries.write();
        for (column, idx) in secondaries.iter_mut() {
            idx.remove(row[*column], rid);
        }
        Ok(())
    }

    /// Point the record back at its previous version; the orphaned tail
    /// record stays behind, logically invalidated.
    pub fn undo_update(&self, outcome: &UpdateOutcome) -> DbResult<()> {
        let range = self.range(outcome.rid.range())?;
        range.set_base_indirection(
            &self.pool,
            &self.schema,
            outcome.rid,
            outcome.prev_indirection,
        )?;
        self.indirection.insert(outcome.rid.0, outcome.prev_indirection);

        if let Some((old_key, new_key)) = outcome.rekey {
            let mut primary = self.primary.write();
            primary.remove(new_key);
            primary.insert(old_key, outcome.rid)?;
        }
        let mut secondaries = self.secondaries.write();
        for &(column, old, new) in &outcome.secondary_changes {
            if let Some(idx) = secondaries.get_mut(&column) {
                idx.remove(new, outcome.rid);
                idx.insert(old, outcome.rid);
            }
        }
        Ok(())
    }

    /// Resurrect a deleted record and its index entries.
    pub fn undo_delete(&self, outcome: &DeleteOutcome) -> DbResult<()> {
        let range = self.range(outcome.rid.range())?;
        range.set_base_indirection(
            &self.pool,
            &self.schema,
            outcome.rid,
            outcome.prev_indirection,
        )?;
        self.indirection.insert(outcome.rid.0, outcome.prev_indirection);
        self.primary.write().insert(outcome.key, outcome.rid)?;
        let mut secondaries = self.secondaries.write();
        for (column, idx) in secondaries.iter_mut() {
            idx.insert(outcome.row[*column], outcome.rid);
        }
        Ok(())
    }

    // ---- Persistence hooks (called by the database layer) ----

    pub fn next_rid_value(&self) -> u64 {
        self.next_rid.load(Ordering::Acquire)
    }

    pub fn range_tail_counts(&self) -> Vec<u64> {
        self.ranges.read().iter().map(|r| r.tail_records()).collect()
    }

    /// Indirection entries of one range, for its `indirection.bin`.
    pub fn indirection_pairs(&self, range: u32) -> Vec<(u64, u64)> {
        let mut pairs: Vec<(u64, u64)> = self
            .indirection
            .iter()
            .filter(|e| Rid(*e.key()).range() == range)
            .map(|e| (*e.key(), *e.value()))
            .collect();
        pairs.sort();
        pairs
    }

    pub fn load_indirection(&self, pairs: &[(u64, u64)]) {
        for &(rid, value) in pairs {
            self.indirection.insert(rid, value);
        }
    }

    /// Fallback when an indirection snapshot is missing: the base
    /// indirection column holds the same mapping.
    pub fn rebuild_indirection_from_pages(&self) -> DbResult<()> {
        let column = self.schema.indirection_column();
        for raw in 0..self.next_rid_value() {
            let rid = Rid(raw);
            let range = self.range(rid.range())?;
            let value = range.base_value(&self.pool, rid, column)? as u64;
            self.indirection.insert(raw, value);
        }
        Ok(())
    }

    pub fn primary_snapshot(&self) -> DbResult<Vec<u8>> {
        self.primary.read().to_snapshot()
    }

    pub fn load_primary(&self, bytes: &[u8]) -> DbResult<()> {
        *self.primary.write() = PrimaryIndex::from_snapshot(bytes)?;
        Ok(())
    }

    /// Rebuild the primary index by reading each live record's key column
    /// at its latest version.
    pub fn rebuild_primary_from_pages(&self) -> DbResult<()> {
        let mut projection = vec![false; self.schema.num_columns];
        projection[self.schema.key_column] = true;

        let mut primary = PrimaryIndex::new();
        for entry in self.indirection.iter() {
            if *entry.value() == RID_DELETED {
                continue;
            }
            let rid = Rid(*entry.key());
            let range = self.range(rid.range())?;
            let row = range.read_version(
                &self.pool,
                &self.schema,
                rid,
                *entry.value(),
                0,
                &projection,
            )?;
            primary.insert(row[0], rid)?;
        }
        *self.primary.write() = primary;
        Ok(())
    }

    pub fn num_ranges(&self) -> usize {
        self.ranges.read().len()
    }

    // ---- Internals ----

    /// Snapshot of the live RIDs. Collected up front: reading rows while
    /// iterating the indirection map would re-enter its shards.
    fn live_rids(&self) -> Vec<Rid> {
        let mut rids: Vec<Rid> = self
            .indirection
            .iter()
            .filter(|e| *e.value() != RID_DELETED)
            .map(|e| Rid(*e.key()))
            .collect();
        rids.sort();
        rids
    }

    fn current_indirection(&self, rid: Rid) -> DbResult<u64> {
        match self.indirection.get(&rid.0).map(|r| *r.value()) {
            None | Some(RID_DELETED) => Err(DbError::NotFound),
            Some(value) => Ok(value),
        }
    }

    fn range(&self, id: u32) -> DbResult<Arc<PageRange>> {
        self.ranges
            .read()
            .get(id as usize)
            .cloned()
            .ok_or_else(|| DbError::Storage(format!("page range {id} missing")))
    }

    fn range_for_insert(&self, id: u32) -> Arc<PageRange> {
        {
            let ranges = self.ranges.read();
            if let Some(range) = ranges.get(id as usize) {
                return range.clone();
            }
        }
        let mut ranges = self.ranges.write();
        while ranges.len() <= id as usize {
            let next_range = ranges.len() as u32;
            debug!(table = self.id.0, range = next_range, "allocating page range");
            ranges.push(Arc::new(PageRange::new(self.id, next_range)));
        }
        ranges[id as usize].clone()
    }
}
