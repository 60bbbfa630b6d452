mod common;

use std::fs;

use assert_cmd::Command;
use encoding_rs::UTF_8;
use fintab::io_utils::read_table;
use fintab::schema::{ColumnKind, load_column_types};
use predicates::str::contains;

use common::{LEDGER_CSV, TestWorkspace};

fn fintab() -> Command {
    Command::cargo_bin("fintab").expect("binary exists")
}

#[test]
fn detect_prints_and_saves_column_types() {
    let workspace = TestWorkspace::new();
    let input = workspace.write("ledger.csv", LEDGER_CSV);
    let types_path = workspace.path().join("types.json");
    fintab()
        .args([
            "detect",
            "-i",
            input.to_str().unwrap(),
            "-o",
            types_path.to_str().unwrap(),
        ])
        .assert()
        .success()
        .stdout(contains("Amount"))
        .stdout(contains("numeric"))
        .stdout(contains("auto-detected"));

    let types = load_column_types(&types_path).expect("type map");
    assert_eq!(types.len(), 5);
    assert_eq!(types["Date"].kind(), ColumnKind::Date);
}

#[test]
fn detect_honours_custom_delimiter() {
    let workspace = TestWorkspace::new();
    let input = workspace.write("ledger.txt", &LEDGER_CSV.replace(',', ";"));
    fintab()
        .args(["detect", "-i", input.to_str().unwrap(), "--delimiter", ";"])
        .assert()
        .success()
        .stdout(contains("Category"))
        .stdout(contains("numeric"));
}

#[test]
fn normalize_appends_parsed_columns() {
    let workspace = TestWorkspace::new();
    let input = workspace.write(
        "messy.csv",
        "Posted,Amount,Memo\n01/15/2023,\"$1,234.56\",rent\n02/01/2023,(500.00),refund\n03/10/2023,$75.10,coffee\n",
    );
    let output = workspace.path().join("normalized.csv");
    fintab()
        .args([
            "normalize",
            "-i",
            input.to_str().unwrap(),
            "-o",
            output.to_str().unwrap(),
        ])
        .assert()
        .success()
        .stdout(contains("Amount_parsed"));

    let table = read_table(&output, b',', UTF_8).expect("normalized csv");
    assert_eq!(
        table.headers(),
        ["Posted", "Amount", "Memo", "Posted_parsed", "Amount_parsed"]
    );
    let contents = fs::read_to_string(&output).expect("read output");
    assert!(contents.contains("2023-01-15"));
    assert!(contents.contains("1234.56"));
    assert!(contents.contains("-500.0"));
}

#[test]
fn store_query_and_metadata_through_sqlite() {
    let workspace = TestWorkspace::new();
    let input = workspace.write("ledger.csv", LEDGER_CSV);
    let db = workspace.path().join("data/fintab.db");
    let db_arg = db.to_str().unwrap();

    fintab()
        .args([
            "store",
            "-i",
            input.to_str().unwrap(),
            "--name",
            "ledger",
            "--index",
            "Date,Category",
            "--db",
            db_arg,
        ])
        .assert()
        .success();
    assert!(db.is_file());

    let output = workspace.path().join("large.csv");
    fintab()
        .args([
            "query",
            "--name",
            "ledger",
            "--filter",
            "Amount__gt=500",
            "--filter",
            "Account__in=A001,A003",
            "-o",
            output.to_str().unwrap(),
            "--db",
            db_arg,
        ])
        .assert()
        .success();
    let matched = read_table(&output, b',', UTF_8).expect("query output");
    assert_eq!(matched.row_count(), 4);

    fintab()
        .args([
            "query",
            "--name",
            "ledger",
            "--filter",
            "Amount__between=100,300",
            "--db",
            db_arg,
        ])
        .assert()
        .success()
        .stdout(contains("Electric bill"))
        .stdout(contains("Internet service"));

    fintab()
        .args(["metadata", "--name", "ledger", "--db", db_arg])
        .assert()
        .success()
        .stdout(contains("\"row_count\": 10"))
        .stdout(contains("\"column_count\": 5"));
}

#[test]
fn aggregate_from_input_with_memory_backend() {
    let workspace = TestWorkspace::new();
    let input = workspace.write("ledger.csv", LEDGER_CSV);
    fintab()
        .args([
            "aggregate",
            "--name",
            "ledger",
            "-i",
            input.to_str().unwrap(),
            "--group-by",
            "Category",
            "--measure",
            "Amount:sum",
            "--measure",
            "Amount:count",
            "--backend",
            "memory",
        ])
        .assert()
        .success()
        .stdout(contains("Amount_sum"))
        .stdout(contains("5602.5"));
}

#[test]
fn file_backend_round_trip_and_index_rejection() {
    let workspace = TestWorkspace::new();
    let input = workspace.write("ledger.csv", LEDGER_CSV);
    let data_dir = workspace.path().join("processed");
    let data_dir_arg = data_dir.to_str().unwrap();

    fintab()
        .args([
            "store",
            "-i",
            input.to_str().unwrap(),
            "--name",
            "ledger",
            "--backend",
            "file",
            "--data-dir",
            data_dir_arg,
        ])
        .assert()
        .success();
    assert!(data_dir.join("ledger.csv").is_file());
    assert!(data_dir.join("ledger_metadata.json").is_file());

    fintab()
        .args([
            "query",
            "--name",
            "ledger",
            "--filter",
            "Category=Food",
            "--backend",
            "file",
            "--data-dir",
            data_dir_arg,
        ])
        .assert()
        .success()
        .stdout(contains("Coffee shop"));

    fintab()
        .args([
            "store",
            "-i",
            input.to_str().unwrap(),
            "--name",
            "ledger",
            "--index",
            "Date",
            "--backend",
            "file",
            "--data-dir",
            data_dir_arg,
        ])
        .assert()
        .failure()
        .stderr(contains("not supported"));
}

#[test]
fn unknown_dataset_is_reported() {
    let workspace = TestWorkspace::new();
    let db = workspace.path().join("empty.db");
    fintab()
        .args([
            "query",
            "--name",
            "missing",
            "--db",
            db.to_str().unwrap(),
        ])
        .assert()
        .failure()
        .stderr(contains("dataset 'missing' not found"));
}

#[test]
fn malformed_filters_are_rejected() {
    let workspace = TestWorkspace::new();
    let input = workspace.write("ledger.csv", LEDGER_CSV);
    fintab()
        .args([
            "query",
            "--name",
            "ledger",
            "-i",
            input.to_str().unwrap(),
            "--filter",
            "Amount__between=100",
            "--backend",
            "memory",
        ])
        .assert()
        .failure()
        .stderr(contains("two bounds"));
}
