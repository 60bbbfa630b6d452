use std::{collections::BTreeMap, fmt, str::FromStr};

use anyhow::{Result, anyhow};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{
    data::Value,
    storage::{ColumnRole, StorageError},
    table::Table,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateFunction {
    Sum,
    Mean,
    Min,
    Max,
    Count,
}

impl AggregateFunction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateFunction::Sum => "sum",
            AggregateFunction::Mean => "mean",
            AggregateFunction::Min => "min",
            AggregateFunction::Max => "max",
            AggregateFunction::Count => "count",
        }
    }

    pub fn sql_name(&self) -> &'static str {
        match self {
            AggregateFunction::Sum => "SUM",
            AggregateFunction::Mean => "AVG",
            AggregateFunction::Min => "MIN",
            AggregateFunction::Max => "MAX",
            AggregateFunction::Count => "COUNT",
        }
    }
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AggregateFunction {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sum" => Ok(AggregateFunction::Sum),
            "mean" | "avg" | "average" => Ok(AggregateFunction::Mean),
            "min" => Ok(AggregateFunction::Min),
            "max" => Ok(AggregateFunction::Max),
            "count" => Ok(AggregateFunction::Count),
            other => Err(anyhow!("Unknown aggregate function '{other}'")),
        }
    }
}

/// One aggregate applied to one column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Measure {
    pub column: String,
    pub function: AggregateFunction,
}

impl Measure {
    pub fn new(column: impl Into<String>, function: AggregateFunction) -> Self {
        Self {
            column: column.into(),
            function,
        }
    }

    /// Parses `column:function`, e.g. `Amount:sum`.
    pub fn parse(spec: &str) -> Result<Self> {
        let (column, function) = spec
            .rsplit_once(':')
            .ok_or_else(|| anyhow!("Measure '{spec}' must have the form column:function"))?;
        let column = column.trim();
        if column.is_empty() {
            return Err(anyhow!("Measure '{spec}' is missing a column name"));
        }
        Ok(Self::new(column, function.parse()?))
    }
}

/// Output column names: the measure's column, or `<column>_<function>` when
/// that name would collide with a group column or another measure.
pub fn output_names(group_by: &[String], measures: &[Measure]) -> Vec<String> {
    let column_counts = measures.iter().counts_by(|measure| measure.column.as_str());
    group_by
        .iter()
        .cloned()
        .chain(measures.iter().map(|measure| {
            let ambiguous = column_counts.get(measure.column.as_str()).copied().unwrap_or(0) > 1
                || group_by.contains(&measure.column);
            if ambiguous {
                format!("{}_{}", measure.column, measure.function)
            } else {
                measure.column.clone()
            }
        }))
        .collect()
}

/// Rejects an empty grouping and lists every missing column.
pub fn validate_request(
    headers: &[String],
    group_by: &[String],
    measures: &[Measure],
) -> Result<(), StorageError> {
    if group_by.is_empty() {
        return Err(StorageError::EmptyGroupBy);
    }
    let missing_groups = missing_columns(headers, group_by.iter());
    if !missing_groups.is_empty() {
        return Err(StorageError::MissingColumns {
            role: ColumnRole::GroupBy,
            columns: missing_groups,
        });
    }
    let missing_measures = missing_columns(headers, measures.iter().map(|m| &m.column));
    if !missing_measures.is_empty() {
        return Err(StorageError::MissingColumns {
            role: ColumnRole::Measure,
            columns: missing_measures,
        });
    }
    Ok(())
}

fn missing_columns<'a>(headers: &[String], wanted: impl Iterator<Item = &'a String>) -> Vec<String> {
    wanted
        .filter(|column| !headers.contains(column))
        .unique()
        .cloned()
        .collect()
}

#[derive(Debug, Clone)]
struct MeasureAccumulator {
    count: i64,
    numeric_count: usize,
    float_sum: f64,
    integer_sum: Option<i64>,
    min: Option<Value>,
    max: Option<Value>,
}

impl Default for MeasureAccumulator {
    fn default() -> Self {
        Self {
            count: 0,
            numeric_count: 0,
            float_sum: 0.0,
            integer_sum: Some(0),
            min: None,
            max: None,
        }
    }
}

impl MeasureAccumulator {
    fn add(&mut self, value: &Value) {
        self.count += 1;
        if let Some(number) = value.as_f64() {
            self.numeric_count += 1;
            self.float_sum += number;
            self.integer_sum = match (self.integer_sum, value) {
                (Some(total), Value::Integer(i)) => total.checked_add(*i),
                _ => None,
            };
        }
        if self.min.as_ref().is_none_or(|current| value < current) {
            self.min = Some(value.clone());
        }
        if self.max.as_ref().is_none_or(|current| value > current) {
            self.max = Some(value.clone());
        }
    }

    fn finish(&self, function: AggregateFunction) -> Option<Value> {
        match function {
            AggregateFunction::Count => Some(Value::Integer(self.count)),
            AggregateFunction::Min => self.min.clone(),
            AggregateFunction::Max => self.max.clone(),
            AggregateFunction::Sum if self.numeric_count == 0 => None,
            AggregateFunction::Sum => Some(match self.integer_sum {
                Some(total) => Value::Integer(total),
                None => Value::Float(self.float_sum),
            }),
            AggregateFunction::Mean if self.numeric_count == 0 => None,
            AggregateFunction::Mean => {
                Some(Value::Float(self.float_sum / self.numeric_count as f64))
            }
        }
    }
}

/// Groups `table` by the `group_by` columns and evaluates every measure per
/// group. Rows with a missing group value are skipped; groups come out
/// sorted by key.
pub fn aggregate_table(
    table: &Table,
    group_by: &[String],
    measures: &[Measure],
) -> Result<Table, StorageError> {
    validate_request(table.headers(), group_by, measures)?;
    let group_indices = group_by
        .iter()
        .filter_map(|column| table.column_index(column))
        .collect::<Vec<_>>();
    let measure_indices = measures
        .iter()
        .filter_map(|measure| table.column_index(&measure.column))
        .collect::<Vec<_>>();

    let mut groups: BTreeMap<Vec<Value>, Vec<MeasureAccumulator>> = BTreeMap::new();
    for row in table.rows() {
        let Some(key) = group_indices
            .iter()
            .map(|&idx| row[idx].clone())
            .collect::<Option<Vec<_>>>()
        else {
            continue;
        };
        let accumulators = groups
            .entry(key)
            .or_insert_with(|| vec![MeasureAccumulator::default(); measures.len()]);
        for (accumulator, &idx) in accumulators.iter_mut().zip(&measure_indices) {
            if let Some(value) = &row[idx] {
                accumulator.add(value);
            }
        }
    }

    let rows = groups
        .into_iter()
        .map(|(key, accumulators)| {
            key.into_iter()
                .map(Some)
                .chain(
                    accumulators
                        .iter()
                        .zip(measures)
                        .map(|(accumulator, measure)| accumulator.finish(measure.function)),
                )
                .collect()
        })
        .collect();
    Ok(Table::new(output_names(group_by, measures), rows)?)
}
