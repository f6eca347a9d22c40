//! Test support for the storage-engine workspace: isolated database
//! contexts over temporary directories, fixtures, and assertion helpers.
//!
//! # Example
//!
//! ```no_run
//! use testsupport::prelude::*;
//!
//! let ctx = TestDb::new();
//! let query = grades_table(&ctx.db);
//! populate(&query, 100);
//! assert_row(&query.select(5, 0, &all_columns()), &[5, 50, 500, 5000, 50000]);
//! ```

pub mod assertions;
pub mod context;
pub mod fixtures;

use std::sync::Once;

static INIT: Once = Once::new();

/// Install a fmt subscriber honoring `RUST_LOG`, once per process.
pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Convenient re-exports for common testing patterns.
pub mod prelude {
    pub use crate::assertions::*;
    pub use crate::context::*;
    pub use crate::fixtures::*;
    pub use crate::init_tracing;
}
