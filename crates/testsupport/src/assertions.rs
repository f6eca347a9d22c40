//! Assertion helpers for row-shaped results.

/// Assert a select returned exactly one row with the expected values.
pub fn assert_row(rows: &[Vec<i64>], expected: &[i64]) {
    assert_eq!(
        rows.len(),
        1,
        "expected exactly one row, got {}: {rows:?}",
        rows.len()
    );
    assert_eq!(rows[0], expected, "row mismatch");
}

/// Assert a select returned the expected rows, ignoring order.
pub fn assert_rows_unordered(rows: &[Vec<i64>], expected: &[Vec<i64>]) {
    let mut got = rows.to_vec();
    let mut want = expected.to_vec();
    got.sort();
    want.sort();
    assert_eq!(got, want, "row set mismatch");
}

/// Assert a select returned nothing.
pub fn assert_empty(rows: &[Vec<i64>]) {
    assert!(rows.is_empty(), "expected no rows, got {rows:?}");
}
