//! Dataset storage with interchangeable backends.
//!
//! [`StorageBackend`] is implemented by an in-process store ([`memory`]), a
//! SQLite database ([`sqlite`]), and a CSV + JSON sidecar directory
//! ([`file`]). All three give the same answers for the same data. The
//! [`DataStorage`] facade keeps the total-function contract: failures come
//! back as `false`, an empty table, or `None`, are logged, and are kept as
//! the last diagnostic for callers that need to know why.

pub mod file;
pub mod memory;
pub mod sqlite;

use std::{
    cell::Cell,
    fmt,
    path::{Path, PathBuf},
};

use chrono::{Local, NaiveDateTime};
use clap::ValueEnum;
use log::warn;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    aggregate::Measure,
    data::Value,
    filter::Filters,
    index::IndexSet,
    io_utils::TableIoError,
    schema::ColumnTypes,
    table::{Table, TableError},
};

pub use file::FileBackend;
pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnRole {
    GroupBy,
    Measure,
}

impl fmt::Display for ColumnRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnRole::GroupBy => f.write_str("group-by"),
            ColumnRole::Measure => f.write_str("measure"),
        }
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("dataset '{0}' not found")]
    DatasetNotFound(String),
    #[error("missing {role} column(s): {}", .columns.join(", "))]
    MissingColumns {
        role: ColumnRole,
        columns: Vec<String>,
    },
    #[error("at least one group-by column is required")]
    EmptyGroupBy,
    #[error("dataset name '{0}' is reserved")]
    ReservedName(String),
    #[error("{operation} is not supported by the {backend} backend")]
    Unsupported {
        backend: BackendKind,
        operation: &'static str,
    },
    #[error("stored metadata for '{dataset}' is unreadable: {reason}")]
    CorruptMetadata { dataset: String, reason: String },
    #[error("invalid table: {0}")]
    Table(#[from] TableError),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("CSV error: {0}")]
    TableIo(#[from] TableIoError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Memory,
    Sqlite,
    File,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Memory => f.write_str("memory"),
            BackendKind::Sqlite => f.write_str("sqlite"),
            BackendKind::File => f.write_str("file"),
        }
    }
}

/// Recorded alongside every stored dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetMetadata {
    pub column_types: ColumnTypes,
    pub created_at: NaiveDateTime,
    pub row_count: usize,
    pub column_count: usize,
}

impl DatasetMetadata {
    pub fn describe(table: &Table, column_types: &ColumnTypes) -> Self {
        Self {
            column_types: column_types.clone(),
            created_at: Local::now().naive_local(),
            row_count: table.row_count(),
            column_count: table.column_count(),
        }
    }
}

/// Class shared by the values of a stored column. Persistent backends use it
/// to keep text that looks like a number as text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageClass {
    Integer,
    Real,
    Text,
    Mixed,
}

impl StorageClass {
    /// Missing cells are ignored; a column with no values is text.
    pub fn of_column<'a>(values: impl Iterator<Item = Option<&'a Value>>) -> Self {
        let mut integers = 0usize;
        let mut floats = 0usize;
        let mut texts = 0usize;
        for value in values.flatten() {
            match value {
                Value::Integer(_) => integers += 1,
                Value::Float(_) => floats += 1,
                _ => texts += 1,
            }
        }
        match (integers, floats, texts) {
            (0, 0, _) => StorageClass::Text,
            (_, 0, 0) => StorageClass::Integer,
            (0, _, 0) => StorageClass::Real,
            _ => StorageClass::Mixed,
        }
    }

    /// Reads a stored field back as a value of this class. Mixed columns
    /// fall back to inferring each field.
    pub fn read_field(self, raw: &str) -> Option<Value> {
        if raw.is_empty() {
            return None;
        }
        match self {
            StorageClass::Integer => raw.trim().parse().ok().map(Value::Integer),
            StorageClass::Real => raw.trim().parse().ok().map(Value::Float),
            StorageClass::Text => Some(Value::Text(raw.to_string())),
            StorageClass::Mixed => Value::from_field(raw),
        }
    }
}

/// One row of the index registry: which index covers which column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRecord {
    pub index_name: String,
    pub index_type: String,
    pub column_name: String,
}

pub trait StorageBackend {
    fn kind(&self) -> BackendKind;

    /// Stores an exclusive copy of `table`, replacing any dataset of the
    /// same name.
    fn store(
        &mut self,
        name: &str,
        table: &Table,
        column_types: &ColumnTypes,
    ) -> Result<(), StorageError>;

    fn create_indexes(&mut self, name: &str, columns: &[String]) -> Result<(), StorageError>;

    /// Rows matching every filter, in stored order.
    fn query(&self, name: &str, filters: &Filters) -> Result<Table, StorageError>;

    fn aggregate(
        &self,
        name: &str,
        group_by: &[String],
        measures: &[Measure],
    ) -> Result<Table, StorageError>;

    fn metadata(&self, name: &str) -> Result<Option<DatasetMetadata>, StorageError>;

    fn index_records(&self, _name: &str) -> Result<Vec<IndexRecord>, StorageError> {
        Ok(Vec::new())
    }

    fn index_set(&self, _name: &str) -> Option<&IndexSet> {
        None
    }

    fn close(self: Box<Self>) -> Result<(), StorageError>;
}

/// Backend selection, fixed when the storage is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageConfig {
    Memory,
    Sqlite { path: PathBuf },
    SqliteInMemory,
    File { directory: PathBuf },
}

impl StorageConfig {
    pub fn kind(&self) -> BackendKind {
        match self {
            StorageConfig::Memory => BackendKind::Memory,
            StorageConfig::Sqlite { .. } | StorageConfig::SqliteInMemory => BackendKind::Sqlite,
            StorageConfig::File { .. } => BackendKind::File,
        }
    }
}

pub struct DataStorage {
    backend: Box<dyn StorageBackend>,
    diagnostic: Cell<Option<StorageError>>,
}

impl fmt::Debug for DataStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataStorage")
            .field("backend", &self.backend.kind())
            .finish_non_exhaustive()
    }
}

impl DataStorage {
    pub fn open(config: &StorageConfig) -> Result<Self, StorageError> {
        let backend: Box<dyn StorageBackend> = match config {
            StorageConfig::Memory => Box::new(MemoryBackend::new()),
            StorageConfig::Sqlite { path } => Box::new(SqliteBackend::open(path)?),
            StorageConfig::SqliteInMemory => Box::new(SqliteBackend::open_in_memory()?),
            StorageConfig::File { directory } => Box::new(FileBackend::new(directory)),
        };
        Ok(Self::with_backend(backend))
    }

    pub fn with_backend(backend: Box<dyn StorageBackend>) -> Self {
        Self {
            backend,
            diagnostic: Cell::new(None),
        }
    }

    pub fn memory() -> Self {
        Self::with_backend(Box::new(MemoryBackend::new()))
    }

    pub fn sqlite(path: &Path) -> Result<Self, StorageError> {
        Ok(Self::with_backend(Box::new(SqliteBackend::open(path)?)))
    }

    pub fn file(directory: &Path) -> Self {
        Self::with_backend(Box::new(FileBackend::new(directory)))
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn store_data(&mut self, name: &str, table: &Table, column_types: &ColumnTypes) -> bool {
        let result = self.backend.store(name, table, column_types);
        self.settle("store", name, result).is_some()
    }

    pub fn create_indexes<S: AsRef<str>>(&mut self, name: &str, columns: &[S]) -> bool {
        let columns = columns
            .iter()
            .map(|column| column.as_ref().to_string())
            .collect::<Vec<_>>();
        let result = self.backend.create_indexes(name, &columns);
        self.settle("create_indexes", name, result).is_some()
    }

    pub fn query_by_criteria(&self, name: &str, filters: &Filters) -> Table {
        let result = self.backend.query(name, filters);
        self.settle("query", name, result).unwrap_or_default()
    }

    pub fn aggregate_data<S: AsRef<str>>(
        &self,
        name: &str,
        group_by: &[S],
        measures: &[Measure],
    ) -> Table {
        let group_by = group_by
            .iter()
            .map(|column| column.as_ref().to_string())
            .collect::<Vec<_>>();
        let result = self.backend.aggregate(name, &group_by, measures);
        self.settle("aggregate", name, result).unwrap_or_default()
    }

    pub fn get_metadata(&self, name: &str) -> Option<DatasetMetadata> {
        let result = self.backend.metadata(name).and_then(|metadata| {
            metadata.ok_or_else(|| StorageError::DatasetNotFound(name.to_string()))
        });
        self.settle("metadata", name, result)
    }

    pub fn list_indexes(&self, name: &str) -> Vec<IndexRecord> {
        let result = self.backend.index_records(name);
        self.settle("list_indexes", name, result).unwrap_or_default()
    }

    /// In-process index structures; only the memory backend keeps them.
    pub fn indexes(&self, name: &str) -> Option<&IndexSet> {
        self.backend.index_set(name)
    }

    /// Takes the error recorded by the most recent failed operation.
    pub fn take_diagnostic(&self) -> Option<StorageError> {
        self.diagnostic.take()
    }

    pub fn close(self) -> bool {
        match self.backend.close() {
            Ok(()) => true,
            Err(err) => {
                warn!("Closing storage failed: {err}");
                false
            }
        }
    }

    fn settle<T>(&self, operation: &str, name: &str, result: Result<T, StorageError>) -> Option<T> {
        match result {
            Ok(value) => {
                self.diagnostic.set(None);
                Some(value)
            }
            Err(err) => {
                warn!("{operation} on dataset '{name}' failed: {err}");
                self.diagnostic.set(Some(err));
                None
            }
        }
    }
}
