//! A page range: 16 base pages per column plus an unbounded tail region.
//!
//! Base slots fill strictly in RID order, so a record's pages and slots are
//! computed from its RID. Tail records are addressed the same way through
//! the per-range tail sequence number carried in their TID.

use crate::schema::TableSchema;
use buffer::BufferPool;
use common::{
    DbError, DbResult, RECORDS_PER_RANGE, Rid, TableId, Tid, now_secs,
};
use parking_lot::Mutex;
use storage::PageKey;

struct RangeAlloc {
    base_records: u64,
    tail_records: u64,
}

pub struct PageRange {
    table: TableId,
    id: u32,
    /// Serializes physical appends; record locks still gate row mutation.
    alloc: Mutex<RangeAlloc>,
}

impl PageRange {
    pub fn new(table: TableId, id: u32) -> Self {
        Self::restore(table, id, 0, 0)
    }

    pub fn restore(table: TableId, id: u32, base_records: u64, tail_records: u64) -> Self {
        Self {
            table,
            id,
            alloc: Mutex::new(RangeAlloc { base_records, tail_records }),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn base_records(&self) -> u64 {
        self.alloc.lock().base_records
    }

    pub fn tail_records(&self) -> u64 {
        self.alloc.lock().tail_records
    }

    pub fn is_full(&self) -> bool {
        self.alloc.lock().base_records >= RECORDS_PER_RANGE
    }

    /// Append a base record at the position encoded by `rid`. `row` holds
    /// all data and metadata column values in column order.
    pub fn insert_base(
        &self,
        pool: &BufferPool,
        schema: &TableSchema,
        rid: Rid,
        row: &[i64],
    ) -> DbResult<()> {
        let mut alloc = self.alloc.lock();
        if alloc.base_records >= RECORDS_PER_RANGE {
            return Err(DbError::RangeFull);
        }
        for (column, &value) in row.iter().enumerate().take(schema.total_columns()) {
            let key = PageKey::base(self.table, self.id, column as u16, rid.page());
            let page = pool.get(key)?;
            let slot = page.append(value).ok_or_else(|| {
                DbError::Storage(format!("base page {key:?} full mid-insert"))
            })?;
            debug_assert_eq!(slot, rid.slot(), "base fill out of RID order");
        }
        alloc.base_records += 1;
        Ok(())
    }

    /// Append a tail record carrying only the columns named in `diff`.
    /// Its indirection column links to the previous version.
    pub fn append_tail(
        &self,
        pool: &BufferPool,
        schema: &TableSchema,
        diff: &[Option<i64>],
        prev_indirection: u64,
    ) -> DbResult<Tid> {
        let mut alloc = self.alloc.lock();
        let tid = Tid::new(self.id, alloc.tail_records);

        let mut encoding = 0i64;
        for (column, value) in diff.iter().enumerate() {
            if value.is_some() {
                encoding |= 1 << column;
            }
        }

        for (column, value) in diff.iter().enumerate() {
            // Unnamed columns keep a placeholder slot so every column page
            // stays slot-aligned; the encoding mask marks them unset.
            self.append_tail_value(pool, tid, column, value.unwrap_or(0))?;
        }
        self.append_tail_value(
            pool,
            tid,
            schema.indirection_column(),
            prev_indirection as i64,
        )?;
        self.append_tail_value(pool, tid, schema.rid_column(), tid.raw() as i64)?;
        self.append_tail_value(pool, tid, schema.timestamp_column(), now_secs())?;
        self.append_tail_value(pool, tid, schema.encoding_column(), encoding)?;

        alloc.tail_records += 1;
        Ok(tid)
    }

    /// Reconstruct the projected data columns of `rid` at a version.
    ///
    /// `latest` is the record's current indirection value; `version_offset`
    /// is 0 for the newest version, -1 for one before, saturating at the
    /// base record. Walks the chain newest to oldest, taking each column
    /// from the newest version that wrote it and the base for the rest.
    pub fn read_version(
        &self,
        pool: &BufferPool,
        schema: &TableSchema,
        rid: Rid,
        latest: u64,
        version_offset: i64,
        projection: &[bool],
    ) -> DbResult<Vec<i64>> {
        let mut chain = Vec::new();
        let mut cursor = latest;
        while let Some(tid) = Tid::from_raw(cursor) {
            chain.push(tid);
            cursor = self.tail_value(pool, tid, schema.indirection_column())? as u64;
        }

        let skip = version_offset.unsigned_abs() as usize;
        let visible = chain.get(skip..).unwrap_or(&[]);

        let n = schema.num_columns;
        let mut values = vec![0i64; n];
        let mut filled = vec![false; n];
        let mut remaining = projection.iter().filter(|p| **p).count();

        for &tid in visible {
            if remaining == 0 {
                break;
            }
            let encoding = self.tail_value(pool, tid, schema.encoding_column())?;
            for column in 0..n {
                if projection[column] && !filled[column] && (encoding >> column) & 1 == 1 {
                    values[column] = self.tail_value(pool, tid, column)?;
                    filled[column] = true;
                    remaining -= 1;
                }
            }
        }
        for column in 0..n {
            if projection[column] && !filled[column] {
                values[column] = self.base_value(pool, rid, column)?;
            }
        }

        Ok((0..n).filter(|c| projection[*c]).map(|c| values[c]).collect())
    }

    pub fn base_value(&self, pool: &BufferPool, rid: Rid, column: usize) -> DbResult<i64> {
        let key = PageKey::base(self.table, self.id, column as u16, rid.page());
        pool.get(key)?.read(rid.slot())
    }

    pub fn tail_value(&self, pool: &BufferPool, tid: Tid, column: usize) -> DbResult<i64> {
        let key = PageKey::tail(self.table, self.id, column as u16, tid.page());
        pool.get(key)?.read(tid.slot())
    }

    /// Overwrite the base record's indirection metadata column; the only
    /// in-place write the storage layout permits.
    pub fn set_base_indirection(
        &self,
        pool: &BufferPool,
        schema: &TableSchema,
        rid: Rid,
        value: u64,
    ) -> DbResult<()> {
        let key = PageKey::base(
            self.table,
            self.id,
            schema.indirection_column() as u16,
            rid.page(),
        );
        pool.get(key)?.overwrite(rid.slot(), value as i64)
    }

    fn append_tail_value(
        &self,
        pool: &BufferPool,
        tid: Tid,
        column: usize,
        value: i64,
    ) -> DbResult<()> {
        let key = PageKey::tail(self.table, self.id, column as u16, tid.page());
        let page = pool.get(key)?;
        let slot = page.append(value).ok_or_else(|| {
            DbError::Storage(format!("tail page {key:?} full mid-append"))
        })?;
        debug_assert_eq!(slot, tid.slot(), "tail fill out of sequence order");
        Ok(())
    }
}
