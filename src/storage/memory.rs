use std::collections::HashMap;

use log::{debug, info};

use super::{BackendKind, DatasetMetadata, IndexRecord, StorageBackend, StorageError};
use crate::{
    aggregate::{Measure, aggregate_table},
    filter::{Filters, filter_rows},
    index::IndexSet,
    schema::ColumnTypes,
    table::Table,
};

#[derive(Debug, Clone)]
struct StoredDataset {
    table: Table,
    metadata: DatasetMetadata,
    indexes: IndexSet,
}

/// Datasets held as owned tables inside this instance.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    datasets: HashMap<String, StoredDataset>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn dataset(&self, name: &str) -> Result<&StoredDataset, StorageError> {
        self.datasets
            .get(name)
            .ok_or_else(|| StorageError::DatasetNotFound(name.to_string()))
    }
}

impl StorageBackend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    fn store(
        &mut self,
        name: &str,
        table: &Table,
        column_types: &ColumnTypes,
    ) -> Result<(), StorageError> {
        let dataset = StoredDataset {
            table: table.clone(),
            metadata: DatasetMetadata::describe(table, column_types),
            indexes: IndexSet::default(),
        };
        self.datasets.insert(name.to_string(), dataset);
        info!(
            "Stored dataset '{}' in memory ({} row(s))",
            name,
            table.row_count()
        );
        Ok(())
    }

    fn create_indexes(&mut self, name: &str, columns: &[String]) -> Result<(), StorageError> {
        let dataset = self
            .datasets
            .get_mut(name)
            .ok_or_else(|| StorageError::DatasetNotFound(name.to_string()))?;
        for column in columns {
            let Some(column_type) = dataset.metadata.column_types.get(column) else {
                debug!("Skipping index on '{column}': no detected type");
                continue;
            };
            dataset
                .indexes
                .build_column(&dataset.table, column, column_type);
        }
        Ok(())
    }

    fn query(&self, name: &str, filters: &Filters) -> Result<Table, StorageError> {
        Ok(filter_rows(&self.dataset(name)?.table, filters))
    }

    fn aggregate(
        &self,
        name: &str,
        group_by: &[String],
        measures: &[Measure],
    ) -> Result<Table, StorageError> {
        aggregate_table(&self.dataset(name)?.table, group_by, measures)
    }

    fn metadata(&self, name: &str) -> Result<Option<DatasetMetadata>, StorageError> {
        Ok(self.datasets.get(name).map(|dataset| dataset.metadata.clone()))
    }

    fn index_records(&self, name: &str) -> Result<Vec<IndexRecord>, StorageError> {
        let dataset = self.dataset(name)?;
        Ok(dataset
            .indexes
            .columns()
            .into_iter()
            .map(|(column, kind)| IndexRecord {
                index_name: kind.index_name().to_string(),
                index_type: dataset
                    .metadata
                    .column_types
                    .get(&column)
                    .map(|result| result.kind().as_str().to_string())
                    .unwrap_or_default(),
                column_name: column,
            })
            .collect())
    }

    fn index_set(&self, name: &str) -> Option<&IndexSet> {
        self.datasets.get(name).map(|dataset| &dataset.indexes)
    }

    fn close(self: Box<Self>) -> Result<(), StorageError> {
        Ok(())
    }
}
