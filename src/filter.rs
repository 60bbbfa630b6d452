use std::cmp::Ordering;

use anyhow::{Result, anyhow};
use chrono::NaiveDate;
use log::debug;

use crate::{data::Value, table::Table};

const OPERATOR_SEPARATOR: &str = "__";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOperator {
    Eq,
    Gt,
    Lt,
    Between,
    In,
    Contains,
}

impl ComparisonOperator {
    pub fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "gt" => Some(ComparisonOperator::Gt),
            "lt" => Some(ComparisonOperator::Lt),
            "between" => Some(ComparisonOperator::Between),
            "in" => Some(ComparisonOperator::In),
            "contains" => Some(ComparisonOperator::Contains),
            _ => None,
        }
    }
}

/// Right-hand side of a filter entry.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Scalar(Value),
    /// Inclusive lower and upper bound.
    Range(Value, Value),
    List(Vec<Value>),
}

impl From<Value> for FilterValue {
    fn from(value: Value) -> Self {
        FilterValue::Scalar(value)
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        FilterValue::Scalar(value.into())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        FilterValue::Scalar(value.into())
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        FilterValue::Scalar(value.into())
    }
}

impl From<i32> for FilterValue {
    fn from(value: i32) -> Self {
        FilterValue::Scalar(value.into())
    }
}

impl From<f64> for FilterValue {
    fn from(value: f64) -> Self {
        FilterValue::Scalar(value.into())
    }
}

impl From<NaiveDate> for FilterValue {
    fn from(value: NaiveDate) -> Self {
        FilterValue::Scalar(value.into())
    }
}

impl FilterValue {
    pub fn range(low: impl Into<Value>, high: impl Into<Value>) -> Self {
        FilterValue::Range(low.into(), high.into())
    }

    pub fn list<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        FilterValue::List(values.into_iter().map(Into::into).collect())
    }
}

/// Ordered filter map. Keys are a bare column name (equality) or
/// `<column>__<operator>`; all entries are combined with AND. Inserting an
/// existing key replaces its value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filters {
    entries: Vec<(String, FilterValue)>,
}

impl Filters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<FilterValue>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FilterValue)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }

    /// Well-formed conditions; entries with an unknown operator or a value of
    /// the wrong shape are dropped.
    pub fn conditions(&self) -> Vec<FilterCondition> {
        self.iter()
            .filter_map(|(key, value)| {
                let condition = FilterCondition::from_entry(key, value);
                if condition.is_none() {
                    debug!("Ignoring malformed filter entry '{key}'");
                }
                condition
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterCondition {
    pub column: String,
    pub operator: ComparisonOperator,
    pub value: FilterValue,
}

impl FilterCondition {
    pub fn from_entry(key: &str, value: &FilterValue) -> Option<Self> {
        let (column, operator) = match key.split_once(OPERATOR_SEPARATOR) {
            Some((column, suffix)) => (column, ComparisonOperator::from_suffix(suffix)?),
            None => (key, ComparisonOperator::Eq),
        };
        let shape_ok = matches!(
            (operator, value),
            (
                ComparisonOperator::Eq
                    | ComparisonOperator::Gt
                    | ComparisonOperator::Lt
                    | ComparisonOperator::Contains,
                FilterValue::Scalar(_)
            ) | (ComparisonOperator::Between, FilterValue::Range(..))
                | (ComparisonOperator::In, FilterValue::List(_))
        );
        shape_ok.then(|| FilterCondition {
            column: column.to_string(),
            operator,
            value: value.clone(),
        })
    }

    /// Missing cells never match.
    pub fn matches(&self, cell: Option<&Value>) -> bool {
        let Some(cell) = cell else {
            return false;
        };
        match (self.operator, &self.value) {
            (ComparisonOperator::Eq, FilterValue::Scalar(target)) => {
                compare_values(cell, target) == Some(Ordering::Equal)
            }
            (ComparisonOperator::Gt, FilterValue::Scalar(target)) => {
                compare_values(cell, target) == Some(Ordering::Greater)
            }
            (ComparisonOperator::Lt, FilterValue::Scalar(target)) => {
                compare_values(cell, target) == Some(Ordering::Less)
            }
            (ComparisonOperator::Between, FilterValue::Range(low, high)) => {
                matches!(
                    compare_values(cell, low),
                    Some(Ordering::Greater | Ordering::Equal)
                ) && matches!(
                    compare_values(cell, high),
                    Some(Ordering::Less | Ordering::Equal)
                )
            }
            (ComparisonOperator::In, FilterValue::List(options)) => options
                .iter()
                .any(|option| compare_values(cell, option) == Some(Ordering::Equal)),
            (ComparisonOperator::Contains, FilterValue::Scalar(needle)) => {
                cell.as_display().contains(&needle.as_display())
            }
            _ => false,
        }
    }
}

/// Compares a cell with a filter operand. Numbers compare numerically,
/// text-like values by their rendered text, and a number against text only
/// when the text itself parses as a number.
pub fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left.is_numeric(), right.is_numeric()) {
        (true, true) | (false, false) => Some(left.cmp(right)),
        (true, false) => {
            let parsed = right.as_display().trim().parse::<f64>().ok()?;
            left.as_f64()?.partial_cmp(&parsed)
        }
        (false, true) => {
            let parsed = left.as_display().trim().parse::<f64>().ok()?;
            parsed.partial_cmp(&right.as_f64()?)
        }
    }
}

/// Positions of the rows satisfying every condition on a known column;
/// conditions on unknown columns are skipped.
pub fn matching_rows(table: &Table, filters: &Filters) -> Vec<usize> {
    let resolved = filters
        .conditions()
        .into_iter()
        .filter_map(|condition| match table.column_index(&condition.column) {
            Some(idx) => Some((idx, condition)),
            None => {
                debug!("Ignoring filter on unknown column '{}'", condition.column);
                None
            }
        })
        .collect::<Vec<_>>();
    (0..table.row_count())
        .filter(|&row| {
            resolved
                .iter()
                .all(|(idx, condition)| condition.matches(table.cell(row, *idx)))
        })
        .collect()
}

pub fn filter_rows(table: &Table, filters: &Filters) -> Table {
    table.select_rows(&matching_rows(table, filters))
}

/// Parses a command-line filter such as `Amount__gt=500`,
/// `Amount__between=100,300`, or `Account__in=A001,A003`.
pub fn parse_filter_expression(expression: &str) -> Result<(String, FilterValue)> {
    let trimmed = expression.trim();
    let (key, raw) = trimmed
        .split_once('=')
        .ok_or_else(|| anyhow!("Filter '{trimmed}' must have the form key=value"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(anyhow!("Filter '{trimmed}' is missing a column name"));
    }
    let raw = unquote(raw.trim());
    let operator = key
        .split_once(OPERATOR_SEPARATOR)
        .and_then(|(_, suffix)| ComparisonOperator::from_suffix(suffix));
    let value = match operator {
        Some(ComparisonOperator::Between) => {
            let (low, high) = raw
                .split_once(',')
                .ok_or_else(|| anyhow!("Filter '{key}' expects two bounds as low,high"))?;
            FilterValue::Range(operand(low)?, operand(high)?)
        }
        Some(ComparisonOperator::In) => FilterValue::List(
            raw.split(',')
                .map(operand)
                .collect::<Result<Vec<_>>>()?,
        ),
        Some(ComparisonOperator::Contains) => FilterValue::Scalar(Value::Text(raw.to_string())),
        _ => FilterValue::Scalar(operand(raw)?),
    };
    Ok((key.to_string(), value))
}

pub fn parse_filters(expressions: &[String]) -> Result<Filters> {
    let mut filters = Filters::new();
    for expression in expressions {
        let (key, value) = parse_filter_expression(expression)?;
        filters.insert(key, value);
    }
    Ok(filters)
}

fn operand(raw: &str) -> Result<Value> {
    let raw = unquote(raw.trim());
    Value::from_field(raw).ok_or_else(|| anyhow!("Empty filter operand"))
}

fn unquote(value: &str) -> &str {
    let bytes = value.as_bytes();
    if value.len() >= 2
        && ((bytes[0] == b'"' && bytes[value.len() - 1] == b'"')
            || (bytes[0] == b'\'' && bytes[value.len() - 1] == b'\''))
    {
        &value[1..value.len() - 1]
    } else {
        value
    }
}
