//! Ordered-map indexes mapping key values to record identifiers.
//!
//! The primary index is unique; secondary indexes are optional per column,
//! multi-valued, and rebuilt on demand. Both are thin façades over an
//! ordered map supporting point and range lookups.


use bincode::config::{self, Config};
use common::{DbError, DbResult, Rid};
use std::collections::{BTreeMap, BTreeSet};

fn bincode_config() -> impl Config {
    config::legacy()
}

/// Unique ordered index over the primary key column.
#[derive(Clone, Debug, Default)]
pub struct PrimaryIndex {
    map: BTreeMap<i64, Rid>,
}

impl PrimaryIndex {
    pub fn new() -> Self {
        Self { map: BTreeMap::new() }
    }

    pub fn point_lookup(&self, key: i64) -> Option<Rid> {
        self.map.get(&key).copied()
    }

    pub fn contains(&self, key: i64) -> bool {
        self.map.contains_key(&key)
    }

    /// RIDs for keys in `[lo, hi]`, in key order. Empty when `lo > hi`.
    pub fn range_lookup(&self, lo: i64, hi: i64) -> Vec<Rid> {
        if lo > hi {
            return Vec::new();
        }
        self.map.range(lo..=hi).map(|(_, rid)| *rid).collect()
    }

    /// Install a key. Fails on collision with an existing key.
    pub fn insert(&mut self, key: i64, rid: Rid) -> DbResult<()> {
        if self.map.contains_key(&key) {
            return Err(DbError::DuplicateKey(key));
        }
        self.map.insert(key, rid);
        Ok(())
    }

    pub fn remove(&mut self, key: i64) -> Option<Rid> {
        self.map.remove(&key)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Serialize as packed `(key, rid)` pairs for the `index.pk` file.
    pub fn to_snapshot(&self) -> DbResult<Vec<u8>> {
        let pairs: Vec<(i64, u64)> =
            self.map.iter().map(|(k, rid)| (*k, rid.0)).collect();
        bincode::serde::encode_to_vec(&pairs, bincode_config())
            .map_err(|e| DbError::Storage(format!("encode index snapshot: {e}")))
    }

    pub fn from_snapshot(bytes: &[u8]) -> DbResult<Self> {
        let (pairs, _): (Vec<(i64, u64)>, usize) =
            bincode::serde::decode_from_slice(bytes, bincode_config())
                .map_err(|e| {
                    DbError::Storage(format!("decode index snapshot: {e}"))
                })?;
        Ok(Self {
            map: pairs.into_iter().map(|(k, rid)| (k, Rid(rid))).collect(),
        })
    }
}

/// Multi-valued ordered index over a non-key column.
#[derive(Clone, Debug, Default)]
pub struct SecondaryIndex {
    entries: BTreeSet<(i64, Rid)>,
}

impl SecondaryIndex {
    pub fn new() -> Self {
        Self { entries: BTreeSet::new() }
    }

    pub fn point_lookup(&self, key: i64) -> Vec<Rid> {
        self.entries
            .range((key, Rid(0))..=(key, Rid(u64::MAX)))
            .map(|(_, rid)| *rid)
            .collect()
    }

    pub fn range_lookup(&self, lo: i64, hi: i64) -> Vec<Rid> {
        if lo > hi {
            return Vec::new();
        }
        self.entries
            .range((lo, Rid(0))..=(hi, Rid(u64::MAX)))
            .map(|(_, rid)| *rid)
            .collect()
    }

    pub fn insert(&mut self, key: i64, rid: Rid) {
        self.entries.insert((key, rid));
    }

    pub fn remove(&mut self, key: i64, rid: Rid) -> bool {
        self.entries.remove(&(key, rid))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
