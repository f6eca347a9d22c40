//! Isolated database contexts backed by temporary directories.

use common::Config;
use database::Database;
use std::path::Path;
use tempfile::TempDir;

/// A database on its own temporary directory, cleaned up on drop.
///
/// `reopen` closes the database and opens it again on the same directory,
/// which is how persistence tests exercise the close/open cycle.
pub struct TestDb {
    dir: TempDir,
    pub db: Database,
}

impl TestDb {
    pub fn new() -> Self {
        Self::with_frames(256)
    }

    /// A context with a chosen buffer-pool size; small values force
    /// eviction traffic during the test.
    pub fn with_frames(frames: usize) -> Self {
        crate::init_tracing();
        let dir = tempfile::tempdir().expect("create tempdir");
        let config = Config::builder()
            .data_dir(dir.path().to_path_buf())
            .buffer_pool_frames(frames)
            .build();
        let db = Database::open_with(config).expect("open database");
        Self { dir, db }
    }

    /// Cleanly close and reopen the same directory.
    pub fn reopen(self) -> Self {
        let TestDb { dir, db } = self;
        db.close().expect("close database");
        let db = Database::open(dir.path()).expect("reopen database");
        Self { dir, db }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

impl Default for TestDb {
    fn default() -> Self {
        Self::new()
    }
}
