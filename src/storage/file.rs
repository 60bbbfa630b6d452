//! Directory-backed storage: `<name>.csv` holds the rows and
//! `<name>_metadata.json` the detected types and shape.

use std::{
    fs::{self, File},
    io::{BufReader, BufWriter, ErrorKind},
    path::{Path, PathBuf},
};

use encoding_rs::UTF_8;
use log::info;
use serde::{Deserialize, Serialize};

use super::{BackendKind, DatasetMetadata, StorageBackend, StorageClass, StorageError};
use crate::{
    aggregate::{Measure, aggregate_table},
    data::Value,
    filter::{Filters, filter_rows},
    io_utils::{DEFAULT_CSV_DELIMITER, read_table_with, write_table},
    schema::ColumnTypes,
    table::Table,
};

pub const DEFAULT_DATA_DIR: &str = "data/processed";

/// Contents of `<name>_metadata.json`.
#[derive(Debug, Serialize, Deserialize)]
struct Sidecar {
    #[serde(flatten)]
    metadata: DatasetMetadata,
    /// One entry per column, in column order.
    #[serde(default)]
    column_classes: Vec<StorageClass>,
}

#[derive(Debug, Clone)]
pub struct FileBackend {
    directory: PathBuf,
}

impl FileBackend {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn data_path(&self, name: &str) -> PathBuf {
        self.directory.join(format!("{name}.csv"))
    }

    fn metadata_path(&self, name: &str) -> PathBuf {
        self.directory.join(format!("{name}_metadata.json"))
    }

    fn read_sidecar(&self, name: &str) -> Result<Option<Sidecar>, StorageError> {
        let path = self.metadata_path(name);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StorageError::Io { path, source }),
        };
        serde_json::from_reader(BufReader::new(file))
            .map(Some)
            .map_err(|err| StorageError::CorruptMetadata {
                dataset: name.to_string(),
                reason: err.to_string(),
            })
    }

    /// Reads the stored rows back, each column as the class it was stored
    /// with.
    fn load_table(&self, name: &str) -> Result<Table, StorageError> {
        let path = self.data_path(name);
        if !path.is_file() {
            return Err(StorageError::DatasetNotFound(name.to_string()));
        }
        let classes = self
            .read_sidecar(name)?
            .map(|sidecar| sidecar.column_classes)
            .unwrap_or_default();
        let parse = |idx: usize, field: &str| match classes.get(idx) {
            Some(class) => class.read_field(field),
            None => Value::from_field(field),
        };
        Ok(read_table_with(&path, DEFAULT_CSV_DELIMITER, UTF_8, parse)?)
    }
}

impl StorageBackend for FileBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::File
    }

    fn store(
        &mut self,
        name: &str,
        table: &Table,
        column_types: &ColumnTypes,
    ) -> Result<(), StorageError> {
        fs::create_dir_all(&self.directory).map_err(|source| StorageError::Io {
            path: self.directory.clone(),
            source,
        })?;
        let data_path = self.data_path(name);
        write_table(&data_path, table, DEFAULT_CSV_DELIMITER)?;

        let metadata_path = self.metadata_path(name);
        let file = File::create(&metadata_path).map_err(|source| StorageError::Io {
            path: metadata_path.clone(),
            source,
        })?;
        let sidecar = Sidecar {
            metadata: DatasetMetadata::describe(table, column_types),
            column_classes: (0..table.column_count())
                .map(|idx| StorageClass::of_column(table.column_values(idx)))
                .collect(),
        };
        serde_json::to_writer_pretty(BufWriter::new(file), &sidecar)?;
        info!(
            "Stored dataset '{}' as {:?} ({} row(s))",
            name,
            data_path,
            table.row_count()
        );
        Ok(())
    }

    fn create_indexes(&mut self, _name: &str, _columns: &[String]) -> Result<(), StorageError> {
        Err(StorageError::Unsupported {
            backend: BackendKind::File,
            operation: "create_indexes",
        })
    }

    fn query(&self, name: &str, filters: &Filters) -> Result<Table, StorageError> {
        Ok(filter_rows(&self.load_table(name)?, filters))
    }

    fn aggregate(
        &self,
        name: &str,
        group_by: &[String],
        measures: &[Measure],
    ) -> Result<Table, StorageError> {
        aggregate_table(&self.load_table(name)?, group_by, measures)
    }

    fn metadata(&self, name: &str) -> Result<Option<DatasetMetadata>, StorageError> {
        Ok(self.read_sidecar(name)?.map(|sidecar| sidecar.metadata))
    }

    fn close(self: Box<Self>) -> Result<(), StorageError> {
        Ok(())
    }
}
