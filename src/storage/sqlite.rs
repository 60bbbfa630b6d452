//! SQLite-backed dataset storage.
//!
//! Each dataset becomes a table named after it. Two side tables keep the
//! bookkeeping: `metadata` (type map as JSON, creation time, shape) and
//! `indexes` (which index covers which column). Filters and aggregations are
//! compiled into parameterized single-table SQL.

use std::{fs, path::Path};

use chrono::NaiveDateTime;
use heck::ToSnakeCase;
use itertools::Itertools;
use log::{debug, info};
use rusqlite::{
    Connection, OptionalExtension, params, params_from_iter,
    types::{ToSql, ToSqlOutput, Value as SqlValue, ValueRef as SqlValueRef},
};

use super::{
    BackendKind, DatasetMetadata, IndexRecord, StorageBackend, StorageClass, StorageError,
};
use crate::{
    aggregate::{Measure, output_names, validate_request},
    data::Value,
    filter::{ComparisonOperator, FilterCondition, FilterValue, Filters},
    schema::ColumnTypes,
    table::Table,
};

/// Names of the bookkeeping tables; datasets may not use them.
pub const RESERVED_NAMES: &[&str] = &["metadata", "indexes"];

const CREATED_AT_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS metadata (
    dataset_name TEXT PRIMARY KEY,
    column_types TEXT,
    created_at TEXT,
    row_count INTEGER,
    column_count INTEGER
);
CREATE TABLE IF NOT EXISTS indexes (
    dataset_name TEXT,
    index_name TEXT,
    index_type TEXT,
    column_name TEXT,
    PRIMARY KEY (dataset_name, index_name, column_name)
);
";

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Text(text) => ToSqlOutput::Borrowed(SqlValueRef::Text(text.as_bytes())),
            Value::Integer(i) => ToSqlOutput::Owned(SqlValue::Integer(*i)),
            Value::Float(f) => ToSqlOutput::Owned(SqlValue::Real(*f)),
            Value::Date(_) | Value::DateTime(_) => ToSqlOutput::Owned(SqlValue::Text(self.as_display())),
        })
    }
}

fn cell_from_sql(value: SqlValueRef<'_>) -> Option<Value> {
    match value {
        SqlValueRef::Null => None,
        SqlValueRef::Integer(i) => Some(Value::Integer(i)),
        SqlValueRef::Real(f) => Some(Value::Float(f)),
        SqlValueRef::Text(bytes) | SqlValueRef::Blob(bytes) => {
            Some(Value::Text(String::from_utf8_lossy(bytes).into_owned()))
        }
    }
}

pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Declared type for a column: `INTEGER` for whole numbers only, `REAL` for
/// fractional numbers only, `TEXT` for text-like data, and no declared type
/// for anything mixed. Untyped columns keep the class each value was bound
/// with, so `1000` next to `250.5` reads back (and renders) as an integer.
fn declared_type<'a>(values: impl Iterator<Item = Option<&'a Value>>) -> &'static str {
    match StorageClass::of_column(values) {
        StorageClass::Integer => "INTEGER",
        StorageClass::Real => "REAL",
        StorageClass::Text => "TEXT",
        StorageClass::Mixed => "",
    }
}

pub struct SqliteBackend {
    conn: Connection,
}

impl SqliteBackend {
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|source| StorageError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        Self::initialize(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::initialize(Connection::open_in_memory()?)
    }

    fn initialize(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Column names with their declared types, in table order.
    fn table_columns(&self, name: &str) -> Result<Vec<(String, String)>, StorageError> {
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info({})", quote_identifier(name)))?;
        let columns = stmt
            .query_map([], |row| Ok((row.get::<_, String>(1)?, row.get::<_, String>(2)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(columns)
    }

    fn untyped_columns(&self, name: &str) -> Result<Vec<String>, StorageError> {
        Ok(self
            .table_columns(name)?
            .into_iter()
            .filter(|(_, declared)| declared.is_empty())
            .map(|(column, _)| column)
            .collect())
    }

    /// Column names of a registered dataset.
    fn dataset_columns(&self, name: &str) -> Result<Vec<String>, StorageError> {
        let registered = self
            .conn
            .query_row(
                "SELECT 1 FROM metadata WHERE dataset_name = ?1",
                [name],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        let columns = if registered {
            self.table_columns(name)?
                .into_iter()
                .map(|(column, _)| column)
                .collect()
        } else {
            Vec::new()
        };
        if columns.is_empty() {
            return Err(StorageError::DatasetNotFound(name.to_string()));
        }
        Ok(columns)
    }

    /// Index names share one namespace with every table and index in the
    /// database, so a name already taken by something other than this
    /// column's index gets a numeric suffix.
    fn index_name(&self, dataset: &str, column: &str) -> Result<String, StorageError> {
        let base = format!("idx_{}_{}", dataset.to_snake_case(), column.to_snake_case());
        let mut candidate = base.clone();
        for suffix in 2.. {
            let taken = self
                .conn
                .query_row(
                    "SELECT 1 FROM sqlite_master WHERE name = ?1",
                    [&candidate],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            if !taken {
                break;
            }
            let ours = self
                .conn
                .query_row(
                    "SELECT 1 FROM indexes
                     WHERE dataset_name = ?1 AND column_name = ?2 AND index_name = ?3",
                    params![dataset, column, candidate],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            if ours {
                break;
            }
            candidate = format!("{base}_{suffix}");
        }
        Ok(candidate)
    }

    fn select_table(&self, sql: &str, params: &[Value]) -> Result<Table, StorageError> {
        debug!("SQLite query: {sql}");
        let mut stmt = self.conn.prepare(sql)?;
        let headers = stmt
            .column_names()
            .into_iter()
            .map(String::from)
            .collect::<Vec<_>>();
        let width = headers.len();
        let rows = stmt
            .query_map(params_from_iter(params.iter()), |row| {
                (0..width)
                    .map(|idx| row.get_ref(idx).map(cell_from_sql))
                    .collect::<rusqlite::Result<Vec<_>>>()
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(Table::new(headers, rows)?)
    }
}

/// Text operand that reads as a number, in the numeric form a number cell
/// is compared against.
fn numeric_operand(value: &Value) -> Option<Value> {
    match value {
        Value::Text(text) => text.trim().parse::<f64>().ok().map(Value::Float),
        _ => None,
    }
}

fn operands(value: &FilterValue) -> Vec<&Value> {
    match value {
        FilterValue::Scalar(value) => vec![value],
        FilterValue::Range(low, high) => vec![low, high],
        FilterValue::List(values) => values.iter().collect(),
    }
}

/// SQL for one comparison; `operand` maps each filter value to the bound
/// parameter.
fn comparison(
    column: &str,
    operator: ComparisonOperator,
    value: &FilterValue,
    operand: impl Fn(&Value) -> Value,
) -> Option<(String, Vec<Value>)> {
    let clause = match (operator, value) {
        (ComparisonOperator::Eq, FilterValue::Scalar(_)) => format!("{column} = ?"),
        (ComparisonOperator::Gt, FilterValue::Scalar(_)) => format!("{column} > ?"),
        (ComparisonOperator::Lt, FilterValue::Scalar(_)) => format!("{column} < ?"),
        (ComparisonOperator::Between, FilterValue::Range(..)) => {
            format!("{column} BETWEEN ? AND ?")
        }
        (ComparisonOperator::In, FilterValue::List(values)) if values.is_empty() => {
            "0".to_string()
        }
        (ComparisonOperator::In, FilterValue::List(values)) => {
            let placeholders = values.iter().map(|_| "?").join(", ");
            format!("{column} IN ({placeholders})")
        }
        (ComparisonOperator::Contains, FilterValue::Scalar(needle)) => {
            return Some((
                format!("instr(CAST({column} AS TEXT), ?) > 0"),
                vec![Value::Text(needle.as_display())],
            ));
        }
        _ => return None,
    };
    Some((clause, operands(value).into_iter().map(operand).collect()))
}

/// Compiles conditions on existing columns into a `WHERE` clause body and
/// its parameters. Conditions on unknown columns are skipped.
///
/// Typed columns rely on SQLite affinity to coerce operands. In untyped
/// columns number cells are compared with numeric text operands as numbers
/// and every other cell with the operand as given.
fn compile_conditions(
    conditions: &[FilterCondition],
    columns: &[String],
    untyped: &[String],
) -> (Vec<String>, Vec<Value>) {
    let mut clauses = Vec::new();
    let mut params = Vec::new();
    for condition in conditions {
        if !columns.contains(&condition.column) {
            debug!("Ignoring filter on unknown column '{}'", condition.column);
            continue;
        }
        let column = quote_identifier(&condition.column);
        let numeric_text = condition.operator != ComparisonOperator::Contains
            && untyped.contains(&condition.column)
            && operands(&condition.value)
                .into_iter()
                .any(|value| numeric_operand(value).is_some());
        let compiled = if numeric_text {
            let as_number = |value: &Value| numeric_operand(value).unwrap_or_else(|| value.clone());
            let numeric = comparison(&column, condition.operator, &condition.value, as_number);
            let text = comparison(&column, condition.operator, &condition.value, Value::clone);
            numeric.zip(text).map(|((numeric, mut values), (text, text_values))| {
                values.extend(text_values);
                let clause = format!(
                    "CASE WHEN typeof({column}) IN ('integer', 'real') THEN {numeric} ELSE {text} END"
                );
                (clause, values)
            })
        } else {
            comparison(&column, condition.operator, &condition.value, Value::clone)
        };
        if let Some((clause, values)) = compiled {
            clauses.push(clause);
            params.extend(values);
        }
    }
    (clauses, params)
}

impl StorageBackend for SqliteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    fn store(
        &mut self,
        name: &str,
        table: &Table,
        column_types: &ColumnTypes,
    ) -> Result<(), StorageError> {
        if RESERVED_NAMES
            .iter()
            .any(|reserved| reserved.eq_ignore_ascii_case(name))
        {
            return Err(StorageError::ReservedName(name.to_string()));
        }
        let quoted = quote_identifier(name);
        let column_defs = table
            .headers()
            .iter()
            .enumerate()
            .map(|(idx, header)| {
                format!(
                    "{} {}",
                    quote_identifier(header),
                    declared_type(table.column_values(idx))
                )
                .trim_end()
                .to_string()
            })
            .join(", ");
        let placeholders = (1..=table.column_count()).map(|i| format!("?{i}")).join(", ");
        let metadata = DatasetMetadata::describe(table, column_types);

        let tx = self.conn.transaction()?;
        tx.execute(&format!("DROP TABLE IF EXISTS {quoted}"), [])?;
        tx.execute(&format!("CREATE TABLE {quoted} ({column_defs})"), [])?;
        {
            let mut insert = tx.prepare(&format!("INSERT INTO {quoted} VALUES ({placeholders})"))?;
            for row in table.rows() {
                insert.execute(params_from_iter(row.iter()))?;
            }
        }
        tx.execute(
            "INSERT OR REPLACE INTO metadata (dataset_name, column_types, created_at, row_count, column_count)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                name,
                serde_json::to_string(&metadata.column_types)?,
                metadata.created_at.format(CREATED_AT_FORMAT).to_string(),
                metadata.row_count as i64,
                metadata.column_count as i64,
            ],
        )?;
        tx.execute("DELETE FROM indexes WHERE dataset_name = ?1", [name])?;
        tx.commit()?;
        info!(
            "Stored dataset '{}' in SQLite ({} row(s))",
            name,
            table.row_count()
        );
        Ok(())
    }

    fn create_indexes(&mut self, name: &str, columns: &[String]) -> Result<(), StorageError> {
        let existing = self.dataset_columns(name)?;
        let column_types = self
            .metadata(name)?
            .map(|metadata| metadata.column_types)
            .unwrap_or_default();
        for column in columns {
            if !existing.contains(column) {
                debug!("Skipping index on unknown column '{column}'");
                continue;
            }
            let index_name = self.index_name(name, column)?;
            self.conn.execute(
                &format!(
                    "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                    quote_identifier(&index_name),
                    quote_identifier(name),
                    quote_identifier(column)
                ),
                [],
            )?;
            let index_type = column_types
                .get(column)
                .map_or("unknown", |result| result.kind().as_str());
            self.conn.execute(
                "INSERT OR REPLACE INTO indexes (dataset_name, index_name, index_type, column_name)
                 VALUES (?1, ?2, ?3, ?4)",
                params![name, index_name, index_type, column],
            )?;
        }
        Ok(())
    }

    fn query(&self, name: &str, filters: &Filters) -> Result<Table, StorageError> {
        let columns = self.dataset_columns(name)?;
        let untyped = self.untyped_columns(name)?;
        let (clauses, params) = compile_conditions(&filters.conditions(), &columns, &untyped);
        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };
        let sql = format!(
            "SELECT * FROM {}{where_clause} ORDER BY rowid",
            quote_identifier(name)
        );
        self.select_table(&sql, &params)
    }

    fn aggregate(
        &self,
        name: &str,
        group_by: &[String],
        measures: &[Measure],
    ) -> Result<Table, StorageError> {
        let columns = self.dataset_columns(name)?;
        validate_request(&columns, group_by, measures)?;
        let names = output_names(group_by, measures);
        let group_columns = group_by
            .iter()
            .map(|column| quote_identifier(column))
            .collect::<Vec<_>>();
        let selections = group_columns
            .iter()
            .cloned()
            .chain(
                measures
                    .iter()
                    .zip(&names[group_by.len()..])
                    .map(|(measure, alias)| {
                        format!(
                            "{}({}) AS {}",
                            measure.function.sql_name(),
                            quote_identifier(&measure.column),
                            quote_identifier(alias)
                        )
                    }),
            )
            .join(", ");
        let not_null = group_columns
            .iter()
            .map(|column| format!("{column} IS NOT NULL"))
            .join(" AND ");
        let grouping = group_columns.join(", ");
        let sql = format!(
            "SELECT {selections} FROM {} WHERE {not_null} GROUP BY {grouping} ORDER BY {grouping}",
            quote_identifier(name)
        );
        self.select_table(&sql, &[])
    }

    fn metadata(&self, name: &str) -> Result<Option<DatasetMetadata>, StorageError> {
        let row = self
            .conn
            .query_row(
                "SELECT column_types, created_at, row_count, column_count
                 FROM metadata WHERE dataset_name = ?1",
                [name],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                },
            )
            .optional()?;
        let Some((types_json, created_at, row_count, column_count)) = row else {
            return Ok(None);
        };
        let corrupt = |reason: String| StorageError::CorruptMetadata {
            dataset: name.to_string(),
            reason,
        };
        let column_types =
            serde_json::from_str(&types_json).map_err(|err| corrupt(err.to_string()))?;
        let created_at = NaiveDateTime::parse_from_str(&created_at, CREATED_AT_FORMAT)
            .map_err(|err| corrupt(err.to_string()))?;
        Ok(Some(DatasetMetadata {
            column_types,
            created_at,
            row_count: usize::try_from(row_count).map_err(|err| corrupt(err.to_string()))?,
            column_count: usize::try_from(column_count).map_err(|err| corrupt(err.to_string()))?,
        }))
    }

    fn index_records(&self, name: &str) -> Result<Vec<IndexRecord>, StorageError> {
        self.dataset_columns(name)?;
        let mut stmt = self.conn.prepare(
            "SELECT index_name, index_type, column_name FROM indexes
             WHERE dataset_name = ?1 ORDER BY column_name, index_name",
        )?;
        let records = stmt
            .query_map([name], |row| {
                Ok(IndexRecord {
                    index_name: row.get(0)?,
                    index_type: row.get(1)?,
                    column_name: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn close(self: Box<Self>) -> Result<(), StorageError> {
        self.conn.close().map_err(|(_, err)| StorageError::Sqlite(err))
    }
}
