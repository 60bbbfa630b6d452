#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use encoding_rs::UTF_8;
use fintab::{data::Value, io_utils::read_table_from, table::Table};
use tempfile::{TempDir, tempdir};

/// Ten transactions across three categories and three accounts.
///
/// - Income sums to 5602.5 over three rows.
/// - Four amounts exceed 500, three are negative, three lie in `[100, 300]`.
/// - Seven rows belong to accounts `A001` or `A003`.
pub const LEDGER_CSV: &str = "\
Date,Amount,Category,Description,Account
2023-01-15,1500.50,Income,Salary January,A001
2023-01-16,-45.20,Food,Grocery store,A002
2023-01-17,250.00,Utilities,Electric bill,A001
2023-01-18,-12.75,Food,Coffee shop,A002
2023-02-15,1500.50,Income,Salary February,A001
2023-02-16,120.00,Utilities,Water bill,A001
2023-02-17,-80.00,Food,Restaurant dinner,A002
2023-03-01,2601.50,Income,Bonus payment,A003
2023-03-05,300.00,Utilities,Internet service,A001
2023-03-10,650.00,Utilities,Rent share,A003
";

pub fn ledger() -> Table {
    read_table_from(LEDGER_CSV.as_bytes(), b',', UTF_8).expect("ledger parses")
}

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    /// Creates a fresh scratch directory for the current test case.
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    /// Returns the root path for all files owned by this workspace.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }
}

/// Asserts two tables hold the same cells, allowing float rounding noise.
pub fn assert_tables_match(actual: &Table, expected: &Table) {
    assert_eq!(actual.headers(), expected.headers());
    assert_eq!(actual.row_count(), expected.row_count(), "row counts differ");
    for (row, (left, right)) in actual.rows().iter().zip(expected.rows()).enumerate() {
        for (col, (a, b)) in left.iter().zip(right).enumerate() {
            let close = match (a, b) {
                (Some(a), Some(b)) if a.is_numeric() && b.is_numeric() => {
                    let (x, y) = (a.as_f64().unwrap_or(f64::NAN), b.as_f64().unwrap_or(f64::NAN));
                    (x - y).abs() <= 1e-9 * x.abs().max(1.0)
                }
                _ => a == b,
            };
            assert!(close, "cell ({row}, {col}) differs: {a:?} vs {b:?}");
        }
    }
}

pub fn float_at(table: &Table, row: usize, column: &str) -> f64 {
    let idx = table.column_index(column).expect("column exists");
    table
        .cell(row, idx)
        .and_then(Value::as_f64)
        .expect("numeric cell")
}
