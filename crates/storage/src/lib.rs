//! Fixed-size column pages and their on-disk naming scheme.
//!
//! A page stores up to 512 values of one column. Base pages are strictly
//! append-only; tail pages are append-only as well but their records may be
//! logically invalidated by later versions. The only in-place writes are
//! overwrites of metadata columns (indirection updates on the base record).


use common::{DbError, DbResult, RECORDS_PER_PAGE, TableId};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const PAGE_SLOTS: usize = RECORDS_PER_PAGE as usize;
const COUNT_BYTES: usize = 8;

/// Bytes of slot payload in a page (512 × 8).
pub const PAGE_DATA_BYTES: usize = PAGE_SLOTS * 8;

/// Size of the stored page block: an 8-byte record count followed by the
/// slot payload, all little-endian.
pub const PAGE_FILE_BYTES: usize = COUNT_BYTES + PAGE_DATA_BYTES;

/// Whether a page belongs to the base or the tail region of a page range.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PageKind {
    Base,
    Tail,
}

impl PageKind {
    fn prefix(self) -> &'static str {
        match self {
            PageKind::Base => "base",
            PageKind::Tail => "tail",
        }
    }
}

/// Identity of a column page: which table, which page range, which column,
/// base or tail, and the page index within the range.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageKey {
    pub table: TableId,
    pub range: u32,
    pub column: u16,
    pub kind: PageKind,
    pub index: u32,
}

impl PageKey {
    pub fn base(table: TableId, range: u32, column: u16, index: u32) -> Self {
        Self { table, range, column, kind: PageKind::Base, index }
    }

    pub fn tail(table: TableId, range: u32, column: u16, index: u32) -> Self {
        Self { table, range, column, kind: PageKind::Tail, index }
    }

    /// File name within the page-range directory, e.g. `base_2_0.bin`.
    pub fn file_name(&self) -> String {
        format!("{}_{}_{}.bin", self.kind.prefix(), self.column, self.index)
    }

    /// Directory for this page's range under the table directory.
    pub fn range_dir(&self) -> String {
        format!("pr_{}", self.range)
    }

    /// Full path of the page file under the given table directory.
    pub fn path(&self, table_dir: &Path) -> PathBuf {
        table_dir.join(self.range_dir()).join(self.file_name())
    }
}

/// In-memory image of one column page: a record count and 512 i64 slots.
#[derive(Clone, Debug)]
pub struct ColumnPage {
    len: u16,
    values: Box<[i64; PAGE_SLOTS]>,
}

impl ColumnPage {
    pub fn new() -> Self {
        Self { len: 0, values: Box::new([0; PAGE_SLOTS]) }
    }

    pub fn num_records(&self) -> u16 {
        self.len
    }

    pub fn has_capacity(&self) -> bool {
        (self.len as usize) < PAGE_SLOTS
    }

    /// Read the value at a written slot.
    pub fn read(&self, slot: u16) -> DbResult<i64> {
        if slot >= self.len {
            return Err(DbError::Storage(format!(
                "read of unwritten slot {slot} (page has {})",
                self.len
            )));
        }
        Ok(self.values[slot as usize])
    }

    /// Append a value to the next free slot, returning the slot index, or
    /// `None` when the page is full.
    pub fn append(&mut self, value: i64) -> Option<u16> {
        if !self.has_capacity() {
            return None;
        }
        let slot = self.len;
        self.values[slot as usize] = value;
        self.len += 1;
        Some(slot)
    }

    /// Overwrite a written slot in place. Callers only do this on metadata
    /// columns (indirection updates on base records).
    pub fn overwrite(&mut self, slot: u16, value: i64) -> DbResult<()> {
        if slot >= self.len {
            return Err(DbError::Storage(format!(
                "overwrite of unwritten slot {slot} (page has {})",
                self.len
            )));
        }
        self.values[slot as usize] = value;
        Ok(())
    }

    /// Encode into the fixed on-disk block layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(PAGE_FILE_BYTES);
        buf.extend_from_slice(&(self.len as u64).to_le_bytes());
        for value in self.values.iter() {
            buf.extend_from_slice(&value.to_le_bytes());
        }
        buf
    }

    /// Decode a stored page block.
    pub fn from_bytes(bytes: &[u8]) -> DbResult<Self> {
        if bytes.len() != PAGE_FILE_BYTES {
            return Err(DbError::Storage(format!(
                "bad page block: {} bytes, expected {PAGE_FILE_BYTES}",
                bytes.len()
            )));
        }
        let mut count = [0u8; COUNT_BYTES];
        count.copy_from_slice(&bytes[..COUNT_BYTES]);
        let len = u64::from_le_bytes(count);
        if len > PAGE_SLOTS as u64 {
            return Err(DbError::Storage(format!("bad page record count {len}")));
        }

        let mut values = Box::new([0i64; PAGE_SLOTS]);
        for (i, chunk) in bytes[COUNT_BYTES..].chunks_exact(8).enumerate() {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(chunk);
            values[i] = i64::from_le_bytes(raw);
        }
        Ok(Self { len: len as u16, values })
    }
}

impl Default for ColumnPage {
    fn default() -> Self {
        Self::new()
    }
}
