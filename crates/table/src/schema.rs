use common::{DbError, DbResult, NUM_METADATA_COLUMNS};
use serde::{Deserialize, Serialize};

/// The schema-encoding bitmask lives in one i64 column, which bounds the
/// number of data columns.
pub const MAX_DATA_COLUMNS: usize = 63;

/// Fixed integer schema of a table: N data columns and the index of the
/// primary key column. The four hidden metadata columns follow the data
/// columns at `[N, N+4)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub num_columns: usize,
    pub key_column: usize,
}

impl TableSchema {
    pub fn new(num_columns: usize, key_column: usize) -> DbResult<Self> {
        if num_columns == 0 || num_columns > MAX_DATA_COLUMNS {
            return Err(DbError::Storage(format!(
                "table must have 1..={MAX_DATA_COLUMNS} columns, got {num_columns}"
            )));
        }
        if key_column >= num_columns {
            return Err(DbError::Storage(format!(
                "key column {key_column} out of range for {num_columns} columns"
            )));
        }
        Ok(Self { num_columns, key_column })
    }

    pub fn total_columns(&self) -> usize {
        self.num_columns + NUM_METADATA_COLUMNS
    }

    pub fn indirection_column(&self) -> usize {
        self.num_columns
    }

    pub fn rid_column(&self) -> usize {
        self.num_columns + 1
    }

    pub fn timestamp_column(&self) -> usize {
        self.num_columns + 2
    }

    pub fn encoding_column(&self) -> usize {
        self.num_columns + 3
    }

    pub fn check_arity(&self, got: usize) -> DbResult<()> {
        if got != self.num_columns {
            return Err(DbError::SchemaMismatch { expected: self.num_columns, got });
        }
        Ok(())
    }

    pub fn check_column(&self, column: usize) -> DbResult<()> {
        if column >= self.num_columns {
            return Err(DbError::Storage(format!(
                "column {column} out of range for {} columns",
                self.num_columns
            )));
        }
        Ok(())
    }
}
