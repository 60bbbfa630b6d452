//! Per-dataset acceleration indexes.
//!
//! Which index a column receives follows its detected type: dates get a date
//! index, numbers an amount index of [`AMOUNT_BIN_COUNT`] equal-width bins, and
//! strings either a category index (low cardinality) or an inverted text index.
//! Indexes are advisory; query evaluation never depends on them.

use std::collections::{BTreeMap, HashSet};

use log::debug;

use crate::{
    data::{DATE_DISPLAY_FORMAT, ValueRef},
    parser::{parse_amount, parse_date},
    schema::{ColumnKind, ColumnTypeResult},
    table::Table,
};

pub const AMOUNT_BIN_COUNT: usize = 20;
/// Distinct-value ratio below which a string column is categorical.
pub const CATEGORY_CARDINALITY_RATIO: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IndexKind {
    Date,
    Amount,
    Category,
    Text,
}

impl IndexKind {
    pub fn index_name(&self) -> &'static str {
        match self {
            IndexKind::Date => "date_index",
            IndexKind::Amount => "amount_index",
            IndexKind::Category => "category_index",
            IndexKind::Text => "text_index",
        }
    }
}

/// Half-open value range `[lower, upper)`; the last bin of a column also
/// contains its upper bound.
#[derive(Debug, Clone, PartialEq)]
pub struct AmountBin {
    pub lower: f64,
    pub upper: f64,
    pub rows: Vec<usize>,
}

impl AmountBin {
    pub fn label(&self) -> String {
        format!("{:.2}-{:.2}", self.lower, self.upper)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexSet {
    pub date_index: BTreeMap<String, BTreeMap<String, usize>>,
    pub amount_index: BTreeMap<String, Vec<AmountBin>>,
    pub category_index: BTreeMap<String, BTreeMap<String, Vec<usize>>>,
    pub text_index: BTreeMap<String, BTreeMap<String, Vec<usize>>>,
}

impl IndexSet {
    /// Rebuilds the index for one column from scratch. Returns the kind built,
    /// or `None` when the column is missing or its type is not indexable.
    pub fn build_column(
        &mut self,
        table: &Table,
        column: &str,
        column_type: &ColumnTypeResult,
    ) -> Option<IndexKind> {
        self.remove_column(column);
        let idx = table.column_index(column)?;
        let hint = column_type.format_hint();
        let kind = match column_type.kind() {
            ColumnKind::Date => {
                let entries = table
                    .column_values(idx)
                    .enumerate()
                    .filter_map(|(row, cell)| {
                        parse_date(cell, hint)
                            .map(|date| (date.format(DATE_DISPLAY_FORMAT).to_string(), row))
                    })
                    .collect();
                self.date_index.insert(column.to_string(), entries);
                IndexKind::Date
            }
            ColumnKind::Number => {
                let amounts = table
                    .column_values(idx)
                    .enumerate()
                    .filter_map(|(row, cell)| parse_amount(cell, hint).map(|amount| (row, amount)))
                    .collect::<Vec<_>>();
                self.amount_index
                    .insert(column.to_string(), build_amount_bins(&amounts));
                IndexKind::Amount
            }
            ColumnKind::String => self.build_string_index(table, idx, column),
            ColumnKind::Unknown => return None,
        };
        debug!("Built {} for column '{}'", kind.index_name(), column);
        Some(kind)
    }

    fn build_string_index(&mut self, table: &Table, idx: usize, column: &str) -> IndexKind {
        let present = table
            .column_values(idx)
            .enumerate()
            .filter_map(|(row, cell)| cell.map(|value| (row, ValueRef::from(value).to_text())))
            .collect::<Vec<_>>();
        let distinct = present
            .iter()
            .map(|(_, text)| text.as_str())
            .collect::<HashSet<_>>()
            .len();
        let ratio = if present.is_empty() {
            0.0
        } else {
            distinct as f64 / present.len() as f64
        };
        if ratio < CATEGORY_CARDINALITY_RATIO {
            let mut categories: BTreeMap<String, Vec<usize>> = BTreeMap::new();
            for (row, text) in present {
                categories.entry(text).or_default().push(row);
            }
            self.category_index.insert(column.to_string(), categories);
            IndexKind::Category
        } else {
            let mut tokens: BTreeMap<String, Vec<usize>> = BTreeMap::new();
            for (row, text) in &present {
                for token in text.to_lowercase().split_whitespace() {
                    let postings = tokens.entry(token.to_string()).or_default();
                    if postings.last() != Some(row) {
                        postings.push(*row);
                    }
                }
            }
            self.text_index.insert(column.to_string(), tokens);
            IndexKind::Text
        }
    }

    pub fn remove_column(&mut self, column: &str) {
        self.date_index.remove(column);
        self.amount_index.remove(column);
        self.category_index.remove(column);
        self.text_index.remove(column);
    }

    pub fn kind_of(&self, column: &str) -> Option<IndexKind> {
        if self.date_index.contains_key(column) {
            Some(IndexKind::Date)
        } else if self.amount_index.contains_key(column) {
            Some(IndexKind::Amount)
        } else if self.category_index.contains_key(column) {
            Some(IndexKind::Category)
        } else if self.text_index.contains_key(column) {
            Some(IndexKind::Text)
        } else {
            None
        }
    }

    /// Indexed column names with their kinds, ordered by column name.
    pub fn columns(&self) -> Vec<(String, IndexKind)> {
        let mut columns = self
            .date_index
            .keys()
            .map(|c| (c.clone(), IndexKind::Date))
            .chain(self.amount_index.keys().map(|c| (c.clone(), IndexKind::Amount)))
            .chain(self.category_index.keys().map(|c| (c.clone(), IndexKind::Category)))
            .chain(self.text_index.keys().map(|c| (c.clone(), IndexKind::Text)))
            .collect::<Vec<_>>();
        columns.sort();
        columns
    }

    pub fn is_empty(&self) -> bool {
        self.date_index.is_empty()
            && self.amount_index.is_empty()
            && self.category_index.is_empty()
            && self.text_index.is_empty()
    }

    /// Rows whose token list contains `token` (case-insensitive).
    pub fn rows_with_token(&self, column: &str, token: &str) -> &[usize] {
        self.text_index
            .get(column)
            .and_then(|tokens| tokens.get(&token.to_lowercase()))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

/// Splits `[min, max]` into equal-width bins. A constant column yields a
/// single zero-width bin holding every row.
pub fn build_amount_bins(amounts: &[(usize, f64)]) -> Vec<AmountBin> {
    let Some((min, max)) = amounts.iter().fold(None, |acc: Option<(f64, f64)>, (_, v)| {
        Some(match acc {
            Some((lo, hi)) => (lo.min(*v), hi.max(*v)),
            None => (*v, *v),
        })
    }) else {
        return Vec::new();
    };
    if min == max {
        return vec![AmountBin {
            lower: min,
            upper: max,
            rows: amounts.iter().map(|(row, _)| *row).collect(),
        }];
    }
    let width = (max - min) / AMOUNT_BIN_COUNT as f64;
    let mut bins = (0..AMOUNT_BIN_COUNT)
        .map(|i| AmountBin {
            lower: min + width * i as f64,
            upper: if i + 1 == AMOUNT_BIN_COUNT {
                max
            } else {
                min + width * (i + 1) as f64
            },
            rows: Vec::new(),
        })
        .collect::<Vec<_>>();
    for &(row, value) in amounts {
        let slot = (((value - min) / width) as usize).min(AMOUNT_BIN_COUNT - 1);
        bins[slot].rows.push(row);
    }
    bins
}
