//! Common fixtures: the canonical five-column grades table and row
//! generators derived from the key.

use database::{Database, Query};

/// Number of data columns in the standard fixture table.
pub const GRADES_COLUMNS: usize = 5;

/// Create the standard "grades" table: five i64 columns keyed on column 0.
pub fn grades_table(db: &Database) -> Query {
    db.create_table("grades", GRADES_COLUMNS, 0)
        .expect("create grades table");
    db.query("grades").expect("grades query handle")
}

/// The deterministic fixture row for key `k`: `[k, 10k, 100k, ...]`.
pub fn grades_row(k: i64) -> Vec<i64> {
    (0..GRADES_COLUMNS as u32).map(|c| k * 10i64.pow(c)).collect()
}

/// Insert fixture rows for keys `1..=n`.
pub fn populate(query: &Query, n: i64) {
    for k in 1..=n {
        assert!(query.insert(&grades_row(k)), "insert fixture row {k}");
    }
}

/// An all-ones projection over the fixture table.
pub fn all_columns() -> Vec<bool> {
    vec![true; GRADES_COLUMNS]
}

/// A projection mask with the given columns selected.
pub fn columns(selected: &[usize]) -> Vec<bool> {
    let mut mask = vec![false; GRADES_COLUMNS];
    for &c in selected {
        mask[c] = true;
    }
    mask
}
