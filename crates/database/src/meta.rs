//! On-disk metadata codecs: the root manifest, per-table schema files,
//! and per-range indirection snapshots.
//!
//! The manifest is framed by hand — magic, version, table count, then a
//! crc-checked bincode payload — so a torn write is detected on open.
//! Everything else is a plain bincode payload.

use bincode::config::{self, Config};
use common::{DbError, DbResult};
use serde::{Deserialize, Serialize};
use table::TableSchema;

pub const METADATA_FILE: &str = "metadata";
pub const SCHEMA_FILE: &str = "schema";
pub const PRIMARY_INDEX_FILE: &str = "index.pk";
pub const INDIRECTION_FILE: &str = "indirection.bin";

const MAGIC: &[u8; 4] = b"LSTR";
const VERSION: u32 = 1;
const HEADER_BYTES: usize = 4 + 4 + 8 + 4 + 8;

fn bincode_config() -> impl Config {
    config::legacy()
}

/// Root manifest: every table the database owns.
#[derive(Debug, Serialize, Deserialize)]
pub struct Manifest {
    pub next_table_id: u64,
    pub tables: Vec<TableDescriptor>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub id: u64,
    pub name: String,
    pub num_columns: usize,
    pub key_column: usize,
}

/// Per-table schema file: the column layout, the RID high-water mark, and
/// the tail count of each page range (the range count is implied).
#[derive(Debug, Serialize, Deserialize)]
pub struct TableMeta {
    pub schema: TableSchema,
    pub next_rid: u64,
    pub tail_records: Vec<u64>,
}

impl Manifest {
    /// Frame: `"LSTR"` | version u32 | table count u64 | payload crc32 |
    /// payload length u64 | bincode payload, all little-endian.
    pub fn encode(&self) -> DbResult<Vec<u8>> {
        let payload = bincode::serde::encode_to_vec(self, bincode_config())
            .map_err(|e| DbError::Storage(format!("encode manifest: {e}")))?;

        let mut buf = Vec::with_capacity(HEADER_BYTES + payload.len());
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&VERSION.to_le_bytes());
        buf.extend_from_slice(&(self.tables.len() as u64).to_le_bytes());
        buf.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        buf.extend_from_slice(&(payload.len() as u64).to_le_bytes());
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    pub fn decode(bytes: &[u8]) -> DbResult<Self> {
        let corrupt = |reason: &str| DbError::Storage(format!("metadata: {reason}"));
        if bytes.len() < HEADER_BYTES {
            return Err(corrupt("truncated header"));
        }
        if &bytes[..4] != MAGIC {
            return Err(corrupt("bad magic"));
        }
        let version = u32::from_le_bytes(bytes[4..8].try_into().unwrap_or_default());
        if version != VERSION {
            return Err(corrupt(&format!("unsupported version {version}")));
        }
        let table_count =
            u64::from_le_bytes(bytes[8..16].try_into().unwrap_or_default());
        let crc = u32::from_le_bytes(bytes[16..20].try_into().unwrap_or_default());
        let len =
            u64::from_le_bytes(bytes[20..28].try_into().unwrap_or_default()) as usize;

        let payload = bytes
            .get(HEADER_BYTES..HEADER_BYTES + len)
            .ok_or_else(|| corrupt("truncated payload"))?;
        if crc32fast::hash(payload) != crc {
            return Err(corrupt("checksum mismatch"));
        }

        let (manifest, _): (Manifest, usize) =
            bincode::serde::decode_from_slice(payload, bincode_config())
                .map_err(|e| corrupt(&format!("payload: {e}")))?;
        if manifest.tables.len() as u64 != table_count {
            return Err(corrupt("table count mismatch"));
        }
        Ok(manifest)
    }
}

impl TableMeta {
    pub fn encode(&self) -> DbResult<Vec<u8>> {
        bincode::serde::encode_to_vec(self, bincode_config())
            .map_err(|e| DbError::Storage(format!("encode schema: {e}")))
    }

    pub fn decode(bytes: &[u8]) -> DbResult<Self> {
        let (meta, _): (TableMeta, usize) =
            bincode::serde::decode_from_slice(bytes, bincode_config())
                .map_err(|e| DbError::Storage(format!("decode schema: {e}")))?;
        Ok(meta)
    }
}

/// Packed `(rid, tid)` pairs of one page range.
pub fn encode_indirection(pairs: &[(u64, u64)]) -> DbResult<Vec<u8>> {
    bincode::serde::encode_to_vec(pairs, bincode_config())
        .map_err(|e| DbError::Storage(format!("encode indirection: {e}")))
}

pub fn decode_indirection(bytes: &[u8]) -> DbResult<Vec<(u64, u64)>> {
    let (pairs, _): (Vec<(u64, u64)>, usize) =
        bincode::serde::decode_from_slice(bytes, bincode_config())
            .map_err(|e| DbError::Storage(format!("decode indirection: {e}")))?;
    Ok(pairs)
}
