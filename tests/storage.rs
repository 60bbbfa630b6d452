mod common;

use chrono::NaiveDate;
use fintab::aggregate::{AggregateFunction, Measure};
use fintab::data::Value;
use fintab::detector::TypeDetector;
use fintab::filter::{FilterValue, Filters};
use fintab::index::{AMOUNT_BIN_COUNT, IndexKind};
use fintab::schema::ColumnTypes;
use fintab::storage::{BackendKind, DataStorage, StorageConfig, StorageError};
use fintab::table::Table;

use common::{TestWorkspace, assert_tables_match, float_at, ledger};

const DATASET: &str = "ledger";

struct Backends {
    _workspace: TestWorkspace,
    stores: Vec<DataStorage>,
}

fn stored_everywhere(table: &Table, column_types: &ColumnTypes) -> Backends {
    let workspace = TestWorkspace::new();
    let configs = [
        StorageConfig::Memory,
        StorageConfig::Sqlite {
            path: workspace.path().join("db/fintab.db"),
        },
        StorageConfig::File {
            directory: workspace.path().join("processed"),
        },
    ];
    let stores = configs
        .iter()
        .map(|config| {
            let mut storage = DataStorage::open(config).expect("open storage");
            assert!(storage.store_data(DATASET, table, column_types));
            storage
        })
        .collect();
    Backends {
        _workspace: workspace,
        stores,
    }
}

fn ledger_backends() -> Backends {
    let table = ledger();
    let types = TypeDetector::new().analyze_table(&table);
    stored_everywhere(&table, &types)
}

#[test]
fn empty_filter_returns_every_row() {
    let table = ledger();
    let backends = ledger_backends();
    for storage in &backends.stores {
        let result = storage.query_by_criteria(DATASET, &Filters::new());
        assert_tables_match(&result, &table);
        assert!(storage.take_diagnostic().is_none());
    }
}

#[test]
fn filters_agree_across_backends() {
    let cases = [
        (Filters::new().with("Category", "Income"), 3),
        (Filters::new().with("Amount__gt", 500), 4),
        (Filters::new().with("Amount__lt", 0), 3),
        (Filters::new().with("Amount__between", FilterValue::range(100, 300)), 3),
        (
            Filters::new().with("Account__in", FilterValue::list(["A001", "A003"])),
            7,
        ),
        (Filters::new().with("Description__contains", "bill"), 2),
        (Filters::new().with("Description__contains", "Bill"), 0),
        (
            Filters::new().with(
                "Date__gt",
                NaiveDate::from_ymd_opt(2023, 2, 28).expect("date"),
            ),
            3,
        ),
        (
            Filters::new()
                .with("Category", "Utilities")
                .with("Account", "A003"),
            1,
        ),
        (Filters::new().with("Region", "West"), 10),
        (Filters::new().with("Category", "Travel"), 0),
    ];
    let backends = ledger_backends();
    for (filters, expected) in &cases {
        let reference = backends.stores[0].query_by_criteria(DATASET, filters);
        assert_eq!(reference.row_count(), *expected, "memory: {filters:?}");
        for storage in &backends.stores[1..] {
            let result = storage.query_by_criteria(DATASET, filters);
            assert_tables_match(&result, &reference);
        }
    }
}

#[test]
fn whole_and_fractional_amounts_agree_across_backends() {
    let table = Table::new(
        vec!["Amount".into()],
        vec![
            vec![Some(Value::Integer(1000))],
            vec![Some(Value::Float(250.5))],
            vec![Some(Value::Float(300.0))],
            vec![Some(Value::Integer(-40))],
        ],
    )
    .expect("table");
    let cases = [
        (Filters::new().with("Amount__contains", ".0"), 1),
        (Filters::new().with("Amount__contains", "1000"), 1),
        (Filters::new().with("Amount__gt", 260), 2),
        (Filters::new().with("Amount__gt", "260"), 2),
        (Filters::new().with("Amount__between", FilterValue::range("0", 300.0)), 2),
        (Filters::new().with("Amount__in", FilterValue::list(["1000", "-40"])), 2),
        (Filters::new().with("Amount", 300), 1),
    ];
    let backends = stored_everywhere(&table, &ColumnTypes::new());
    for storage in &backends.stores {
        assert_tables_match(&storage.query_by_criteria(DATASET, &Filters::new()), &table);
        for (filters, expected) in &cases {
            let result = storage.query_by_criteria(DATASET, filters);
            assert_eq!(
                result.row_count(),
                *expected,
                "{:?}: {filters:?}",
                storage.backend_kind()
            );
        }
    }
}

#[test]
fn numeric_looking_text_round_trips_in_every_backend() {
    let table = Table::new(
        vec!["Code".into(), "Account".into()],
        vec![
            vec![Some(Value::from("10")), Some(Value::from("00012345"))],
            vec![Some(Value::from("9")), Some(Value::from("12345678"))],
            vec![Some(Value::from("N/A")), None],
        ],
    )
    .expect("table");
    let backends = stored_everywhere(&table, &ColumnTypes::new());
    for storage in &backends.stores {
        let stored = storage.query_by_criteria(DATASET, &Filters::new());
        assert_tables_match(&stored, &table);
        let code = storage.query_by_criteria(DATASET, &Filters::new().with("Code", "10"));
        assert_eq!(code.row_count(), 1, "{:?}", storage.backend_kind());
    }
}

#[test]
fn missing_cells_never_match() {
    let table = Table::new(
        vec!["Name".into(), "Amount".into()],
        vec![
            vec![Some(Value::from("a")), Some(Value::Integer(5))],
            vec![Some(Value::from("b")), None],
            vec![None, Some(Value::Integer(-5))],
        ],
    )
    .expect("table");
    let backends = stored_everywhere(&table, &ColumnTypes::new());
    for storage in &backends.stores {
        let below = storage.query_by_criteria(DATASET, &Filters::new().with("Amount__lt", 10));
        assert_eq!(below.row_count(), 2, "{:?}", storage.backend_kind());
        let named = storage.query_by_criteria(DATASET, &Filters::new().with("Name__contains", ""));
        assert_eq!(named.row_count(), 2, "{:?}", storage.backend_kind());
    }
}

#[test]
fn aggregation_matches_brute_force_totals() {
    let table = ledger();
    let amount = table.column_index("Amount").expect("amount");
    let category = table.column_index("Category").expect("category");
    let brute_force = |name: &str| -> f64 {
        table
            .rows()
            .iter()
            .filter(|row| row[category] == Some(Value::from(name)))
            .filter_map(|row| row[amount].as_ref().and_then(Value::as_f64))
            .sum()
    };

    let backends = ledger_backends();
    let measures = [Measure::new("Amount", AggregateFunction::Sum)];
    for storage in &backends.stores {
        let result = storage.aggregate_data(DATASET, &["Category"], &measures);
        assert_eq!(result.headers(), ["Category", "Amount"]);
        assert_eq!(result.row_count(), 3);
        for (row, name) in ["Food", "Income", "Utilities"].iter().enumerate() {
            assert_eq!(result.cell(row, 0), Some(&Value::from(*name)));
            assert!((float_at(&result, row, "Amount") - brute_force(name)).abs() < 1e-9);
        }
        assert!((float_at(&result, 1, "Amount") - 5602.5).abs() < 1e-9);
    }
}

#[test]
fn multiple_measures_per_column_agree_across_backends() {
    let measures = [
        Measure::new("Amount", AggregateFunction::Sum),
        Measure::new("Amount", AggregateFunction::Mean),
        Measure::new("Amount", AggregateFunction::Min),
        Measure::new("Amount", AggregateFunction::Max),
        Measure::new("Amount", AggregateFunction::Count),
    ];
    let backends = ledger_backends();
    let reference = backends.stores[0].aggregate_data(DATASET, &["Category", "Account"], &measures);
    assert_eq!(
        reference.headers(),
        [
            "Category",
            "Account",
            "Amount_sum",
            "Amount_mean",
            "Amount_min",
            "Amount_max",
            "Amount_count"
        ]
    );
    assert_eq!(reference.row_count(), 5);
    assert_eq!(reference.cell(0, 6), Some(&Value::Integer(3)));
    for storage in &backends.stores[1..] {
        let result = storage.aggregate_data(DATASET, &["Category", "Account"], &measures);
        assert_tables_match(&result, &reference);
    }
}

#[test]
fn bad_aggregation_requests_are_empty_with_a_diagnostic() {
    let backends = ledger_backends();
    let measures = [Measure::new("Amount", AggregateFunction::Sum)];
    for storage in &backends.stores {
        let result = storage.aggregate_data(DATASET, &["Region"], &measures);
        assert!(result.is_empty());
        assert!(matches!(
            storage.take_diagnostic(),
            Some(StorageError::MissingColumns { .. })
        ));

        let bad_measure = [Measure::new("Balance", AggregateFunction::Max)];
        assert!(storage.aggregate_data(DATASET, &["Category"], &bad_measure).is_empty());
        assert!(matches!(
            storage.take_diagnostic(),
            Some(StorageError::MissingColumns { .. })
        ));

        let no_groups: [&str; 0] = [];
        assert!(storage.aggregate_data(DATASET, &no_groups, &measures).is_empty());
        assert!(matches!(
            storage.take_diagnostic(),
            Some(StorageError::EmptyGroupBy)
        ));
    }
}

#[test]
fn unknown_datasets_degrade_to_empty_results() {
    let backends = ledger_backends();
    for storage in &backends.stores {
        assert!(storage.query_by_criteria("absent", &Filters::new()).is_empty());
        assert!(matches!(
            storage.take_diagnostic(),
            Some(StorageError::DatasetNotFound(_))
        ));
        assert!(storage.get_metadata("absent").is_none());
        assert!(storage.take_diagnostic().is_some());
    }
}

#[test]
fn metadata_describes_the_stored_dataset() {
    let table = ledger();
    let types = TypeDetector::new().analyze_table(&table);
    let backends = stored_everywhere(&table, &types);
    for storage in &backends.stores {
        let metadata = storage.get_metadata(DATASET).expect("metadata");
        assert_eq!(metadata.row_count, 10);
        assert_eq!(metadata.column_count, 5);
        assert_eq!(metadata.column_types, types);
    }
}

#[test]
fn restoring_replaces_the_dataset() {
    let backends = ledger_backends();
    let replacement = Table::new(
        vec!["Amount".into()],
        vec![vec![Some(Value::Float(1.5))], vec![Some(Value::Float(2.5))]],
    )
    .expect("table");
    for mut storage in backends.stores {
        assert!(storage.store_data(DATASET, &replacement, &ColumnTypes::new()));
        let result = storage.query_by_criteria(DATASET, &Filters::new());
        assert_tables_match(&result, &replacement);
        assert_eq!(
            storage.get_metadata(DATASET).map(|m| m.row_count),
            Some(2)
        );
        assert!(storage.close());
    }
}

#[test]
fn memory_indexes_follow_column_types() {
    let table = ledger();
    let types = TypeDetector::new().analyze_table(&table);
    let mut storage = DataStorage::memory();
    assert!(storage.store_data(DATASET, &table, &types));
    assert!(storage.create_indexes(DATASET, &["Date", "Amount", "Category", "Description"]));

    let indexes = storage.indexes(DATASET).expect("index set");
    assert_eq!(indexes.kind_of("Date"), Some(IndexKind::Date));
    assert_eq!(indexes.kind_of("Amount"), Some(IndexKind::Amount));
    assert_eq!(indexes.kind_of("Category"), Some(IndexKind::Category));
    assert_eq!(indexes.kind_of("Description"), Some(IndexKind::Text));
    assert_eq!(indexes.date_index["Date"].len(), 10);
    assert_eq!(indexes.date_index["Date"]["2023-03-10"], 9);

    let bins = &indexes.amount_index["Amount"];
    assert_eq!(bins.len(), AMOUNT_BIN_COUNT);
    assert_eq!(bins[0].lower, -80.0);
    assert_eq!(bins[AMOUNT_BIN_COUNT - 1].upper, 2601.5);
    assert_eq!(bins.iter().map(|bin| bin.rows.len()).sum::<usize>(), 10);

    assert_eq!(indexes.category_index["Category"]["Income"], vec![0, 4, 7]);
    assert_eq!(indexes.rows_with_token("Description", "BILL"), [2, 5]);

    let records = storage.list_indexes(DATASET);
    assert_eq!(records.len(), 4);
    assert!(
        records
            .iter()
            .any(|r| r.column_name == "Amount" && r.index_name == "amount_index")
    );
}

#[test]
fn restoring_drops_indexes_and_rebuilt_bins_follow_new_data() {
    let table = ledger();
    let types = TypeDetector::new().analyze_table(&table);
    let mut storage = DataStorage::memory();
    assert!(storage.store_data(DATASET, &table, &types));
    assert!(storage.create_indexes(DATASET, &["Amount", "Category"]));
    assert_eq!(storage.list_indexes(DATASET).len(), 2);

    let replacement = Table::new(
        vec!["Amount".into(), "Category".into()],
        (10..=30)
            .map(|amount| vec![Some(Value::Integer(amount)), Some(Value::from("Food"))])
            .collect(),
    )
    .expect("table");
    let replacement_types = TypeDetector::new().analyze_table(&replacement);
    assert!(storage.store_data(DATASET, &replacement, &replacement_types));
    assert!(storage.indexes(DATASET).is_none_or(|indexes| indexes.is_empty()));
    assert!(storage.list_indexes(DATASET).is_empty());

    assert!(storage.create_indexes(DATASET, &["Amount"]));
    let indexes = storage.indexes(DATASET).expect("index set");
    assert_eq!(indexes.kind_of("Category"), None);
    let bins = &indexes.amount_index["Amount"];
    assert_eq!(bins.len(), AMOUNT_BIN_COUNT);
    assert_eq!(bins[0].lower, 10.0);
    assert_eq!(bins[AMOUNT_BIN_COUNT - 1].upper, 30.0);
    assert_eq!(bins[0].rows, vec![0]);
    assert_eq!(bins[AMOUNT_BIN_COUNT - 1].rows, vec![19, 20]);
    assert_eq!(bins.iter().map(|bin| bin.rows.len()).sum::<usize>(), 21);

    let mut sqlite = DataStorage::open(&StorageConfig::SqliteInMemory).expect("open");
    assert!(sqlite.store_data(DATASET, &table, &types));
    assert!(sqlite.create_indexes(DATASET, &["Amount"]));
    assert!(sqlite.store_data(DATASET, &replacement, &replacement_types));
    assert!(sqlite.list_indexes(DATASET).is_empty());
}

#[test]
fn sqlite_records_indexes_and_file_rejects_them() {
    let table = ledger();
    let types = TypeDetector::new().analyze_table(&table);
    let mut backends = stored_everywhere(&table, &types);

    let sqlite = &mut backends.stores[1];
    assert_eq!(sqlite.backend_kind(), BackendKind::Sqlite);
    assert!(sqlite.create_indexes(DATASET, &["Date", "Category", "Missing"]));
    let records = sqlite.list_indexes(DATASET);
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].column_name, "Category");
    assert_eq!(records[0].index_name, "idx_ledger_category");
    assert_eq!(records[0].index_type, "string");
    assert_eq!(records[1].index_type, "date");

    let file = &mut backends.stores[2];
    assert!(!file.create_indexes(DATASET, &["Date"]));
    assert!(matches!(
        file.take_diagnostic(),
        Some(StorageError::Unsupported { .. })
    ));
}

#[test]
fn sqlite_persists_across_connections() {
    let workspace = TestWorkspace::new();
    let path = workspace.path().join("ledger.db");
    let table = ledger();
    let types = TypeDetector::new().analyze_table(&table);

    let mut storage = DataStorage::sqlite(&path).expect("open");
    assert!(storage.store_data(DATASET, &table, &types));
    assert!(storage.close());

    let reopened = DataStorage::sqlite(&path).expect("reopen");
    let result = reopened.query_by_criteria(DATASET, &Filters::new().with("Amount__gt", 500));
    assert_eq!(result.row_count(), 4);
    assert_eq!(
        reopened.get_metadata(DATASET).map(|m| m.column_types),
        Some(types)
    );
}

#[test]
fn sqlite_rejects_reserved_names() {
    let mut storage = DataStorage::open(&StorageConfig::SqliteInMemory).expect("open");
    assert!(!storage.store_data("metadata", &ledger(), &ColumnTypes::new()));
    assert!(matches!(
        storage.take_diagnostic(),
        Some(StorageError::ReservedName(_))
    ));
}
