//! Top-level database lifecycle: open, table management, and clean close.
//!
//! The [`Database`] is an explicit context object owning the buffer pool,
//! the lock manager, and the tables — no process-wide state, so tests run
//! many instances side by side. Durability is promised only after a clean
//! [`Database::close`]: pages flush, then per-table schema, primary-index
//! and indirection snapshots, then the root manifest.

#[cfg(test)]
mod tests;

mod meta;

pub use common::{Config, DbError, DbResult};
pub use table::Table;
pub use txn::{Query, QueryOp, QueryResult, Transaction, TransactionWorker, TxnRuntime, TxnStatus};

use buffer::BufferPool;
use common::TableId;
use hashbrown::HashMap;
use lock::LockManager;
use meta::{Manifest, TableDescriptor, TableMeta};
use parking_lot::RwLock;
use std::{
    fs,
    path::PathBuf,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tracing::{info, warn};

pub struct Database {
    root: PathBuf,
    config: Config,
    pool: Arc<BufferPool>,
    rt: TxnRuntime,
    tables: RwLock<HashMap<String, Arc<Table>>>,
    next_table_id: AtomicU64,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").field("root", &self.root).finish_non_exhaustive()
    }
}

impl Database {
    /// Open or create a database directory with default configuration.
    pub fn open(path: impl Into<PathBuf>) -> DbResult<Self> {
        let config = Config::builder().data_dir(path.into()).build();
        Self::open_with(config)
    }

    /// Open or create a database directory, rebuilding table descriptors,
    /// indirection tables, and indexes from the stored state.
    pub fn open_with(config: Config) -> DbResult<Self> {
        let root = config.data_dir.clone();
        fs::create_dir_all(&root)?;

        let pool = Arc::new(BufferPool::new(config.buffer_pool_frames));
        let locks = Arc::new(LockManager::new(config.lock_shards));
        let db = Self {
            root: root.clone(),
            config,
            pool,
            rt: TxnRuntime::new(locks),
            tables: RwLock::new(HashMap::new()),
            next_table_id: AtomicU64::new(1),
        };

        let metadata_path = root.join(meta::METADATA_FILE);
        if metadata_path.exists() {
            let manifest = Manifest::decode(&fs::read(&metadata_path)?)?;
            db.next_table_id
                .store(manifest.next_table_id, Ordering::Release);
            for descriptor in &manifest.tables {
                let table = db.load_table(descriptor)?;
                db.tables
                    .write()
                    .insert(descriptor.name.clone(), Arc::new(table));
            }
            info!(
                path = %root.display(),
                tables = manifest.tables.len(),
                "database opened"
            );
        } else {
            info!(path = %root.display(), "database created");
        }
        Ok(db)
    }

    /// Create a table with `num_columns` i64 columns keyed on
    /// `key_column`.
    pub fn create_table(
        &self,
        name: &str,
        num_columns: usize,
        key_column: usize,
    ) -> DbResult<Arc<Table>> {
        self.ensure_ok()?;
        check_table_name(name)?;

        let mut tables = self.tables.write();
        if tables.contains_key(name) {
            return Err(DbError::Storage(format!("table '{name}' already exists")));
        }

        let id = TableId(self.next_table_id.fetch_add(1, Ordering::AcqRel));
        let dir = self.root.join(name);
        fs::create_dir_all(&dir)?;
        self.pool.register_table(id, dir);

        let table = Arc::new(Table::create(
            id,
            name,
            num_columns,
            key_column,
            self.pool.clone(),
        )?);
        tables.insert(name.to_string(), table.clone());
        info!(table = name, columns = num_columns, key = key_column, "table created");
        Ok(table)
    }

    /// Drop a table and delete its directory.
    pub fn drop_table(&self, name: &str) -> DbResult<()> {
        self.ensure_ok()?;
        let table = self
            .tables
            .write()
            .remove(name)
            .ok_or(DbError::NotFound)?;
        self.pool.discard_table(table.id);
        let dir = self.root.join(name);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        info!(table = name, "table dropped");
        Ok(())
    }

    pub fn table(&self, name: &str) -> DbResult<Arc<Table>> {
        self.ensure_ok()?;
        self.tables
            .read()
            .get(name)
            .cloned()
            .ok_or(DbError::NotFound)
    }

    /// Auto-commit query handle for a table.
    pub fn query(&self, name: &str) -> DbResult<Query> {
        Ok(Query::new(self.table(name)?, self.rt.clone()))
    }

    /// The shared transaction runtime, for running [`Transaction`]s.
    pub fn runtime(&self) -> TxnRuntime {
        self.rt.clone()
    }

    /// A worker pool sized by the configuration.
    pub fn worker(&self) -> TransactionWorker {
        TransactionWorker::new(self.rt.clone(), self.config.worker_threads)
    }

    pub fn is_poisoned(&self) -> bool {
        self.rt.is_poisoned()
    }

    /// Flush the buffer pool and persist all metadata. Consumes the
    /// database; durability is only guaranteed after this returns `Ok`.
    pub fn close(self) -> DbResult<()> {
        self.ensure_ok()?;
        if let Err(e) = self.persist() {
            self.rt.poison();
            warn!(error = %e, "close failed; database poisoned");
            return Err(e);
        }
        info!(path = %self.root.display(), "database closed");
        Ok(())
    }

    fn persist(&self) -> DbResult<()> {
        self.pool.flush_all()?;

        let tables = self.tables.read();
        let mut descriptors = Vec::with_capacity(tables.len());
        for table in tables.values() {
            let dir = self.root.join(&table.name);
            fs::create_dir_all(&dir)?;

            let table_meta = TableMeta {
                schema: table.schema,
                next_rid: table.next_rid_value(),
                tail_records: table.range_tail_counts(),
            };
            fs::write(dir.join(meta::SCHEMA_FILE), table_meta.encode()?)?;
            fs::write(dir.join(meta::PRIMARY_INDEX_FILE), table.primary_snapshot()?)?;

            for range in 0..table.num_ranges() as u32 {
                let range_dir = dir.join(format!("pr_{range}"));
                fs::create_dir_all(&range_dir)?;
                let pairs = table.indirection_pairs(range);
                fs::write(
                    range_dir.join(meta::INDIRECTION_FILE),
                    meta::encode_indirection(&pairs)?,
                )?;
            }

            descriptors.push(TableDescriptor {
                id: table.id.0,
                name: table.name.clone(),
                num_columns: table.schema.num_columns,
                key_column: table.schema.key_column,
            });
        }
        descriptors.sort_by(|a, b| a.id.cmp(&b.id));

        let manifest = Manifest {
            next_table_id: self.next_table_id.load(Ordering::Acquire),
            tables: descriptors,
        };
        fs::write(self.root.join(meta::METADATA_FILE), manifest.encode()?)?;
        Ok(())
    }

    fn load_table(&self, descriptor: &TableDescriptor) -> DbResult<Table> {
        let dir = self.root.join(&descriptor.name);
        let table_meta = TableMeta::decode(&fs::read(dir.join(meta::SCHEMA_FILE))?)?;
        let id = TableId(descriptor.id);
        self.pool.register_table(id, dir.clone());

        let table = Table::restore(
            id,
            descriptor.name.clone(),
            table_meta.schema,
            self.pool.clone(),
            table_meta.next_rid,
            &table_meta.tail_records,
        );

        // Indirection: per-range snapshots when complete, otherwise the
        // base indirection columns hold the same mapping.
        let snapshots: Vec<PathBuf> = (0..table.num_ranges())
            .map(|r| dir.join(format!("pr_{r}")).join(meta::INDIRECTION_FILE))
            .collect();
        if snapshots.iter().all(|p| p.exists()) {
            for path in &snapshots {
                let pairs = meta::decode_indirection(&fs::read(path)?)?;
                table.load_indirection(&pairs);
            }
        } else {
            warn!(table = %descriptor.name, "indirection snapshot missing; scanning base pages");
            table.rebuild_indirection_from_pages()?;
        }

        let pk_path = dir.join(meta::PRIMARY_INDEX_FILE);
        if pk_path.exists() {
            table.load_primary(&fs::read(&pk_path)?)?;
        } else {
            warn!(table = %descriptor.name, "primary index snapshot missing; scanning base pages");
            table.rebuild_primary_from_pages()?;
        }
        Ok(table)
    }

    fn ensure_ok(&self) -> DbResult<()> {
        if self.rt.is_poisoned() {
            return Err(DbError::Poisoned);
        }
        Ok(())
    }
}

fn check_table_name(name: &str) -> DbResult<()> {
    let ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !ok {
        return Err(DbError::Storage(format!("invalid table name '{name}'")));
    }
    Ok(())
}
