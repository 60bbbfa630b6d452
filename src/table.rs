use std::borrow::Cow;
use std::collections::HashSet;
use std::fmt::Write as _;

use thiserror::Error;

use crate::data::Value;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TableError {
    #[error("column name at position {0} is empty")]
    EmptyColumnName(usize),
    #[error("duplicate column name '{0}'")]
    DuplicateColumn(String),
    #[error("row {row} has {found} cell(s) but the table has {expected} column(s)")]
    RaggedRow {
        row: usize,
        expected: usize,
        found: usize,
    },
}

/// Row-major table with unique, named columns. Every row holds exactly one
/// cell per column; `None` cells are missing values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<Option<Value>>>,
}

impl Table {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<Option<Value>>>) -> Result<Self, TableError> {
        validate_headers(&headers)?;
        for (idx, row) in rows.iter().enumerate() {
            if row.len() != headers.len() {
                return Err(TableError::RaggedRow {
                    row: idx,
                    expected: headers.len(),
                    found: row.len(),
                });
            }
        }
        Ok(Self { headers, rows })
    }

    pub fn empty(headers: Vec<String>) -> Result<Self, TableError> {
        Self::new(headers, Vec::new())
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Vec<Option<Value>>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|header| header == name)
    }

    pub fn cell(&self, row: usize, column: usize) -> Option<&Value> {
        self.rows.get(row)?.get(column)?.as_ref()
    }

    /// Cells of one column in row order.
    pub fn column_values(&self, column: usize) -> impl Iterator<Item = Option<&Value>> + '_ {
        self.rows
            .iter()
            .map(move |row| row.get(column).and_then(Option::as_ref))
    }

    pub fn push_row(&mut self, row: Vec<Option<Value>>) -> Result<(), TableError> {
        if row.len() != self.headers.len() {
            return Err(TableError::RaggedRow {
                row: self.rows.len(),
                expected: self.headers.len(),
                found: row.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    /// Appends a column; `values` must have one entry per row.
    pub fn push_column(&mut self, name: &str, values: Vec<Option<Value>>) -> Result<(), TableError> {
        if name.trim().is_empty() {
            return Err(TableError::EmptyColumnName(self.headers.len()));
        }
        if self.column_index(name).is_some() {
            return Err(TableError::DuplicateColumn(name.to_string()));
        }
        if values.len() != self.rows.len() {
            return Err(TableError::RaggedRow {
                row: values.len().min(self.rows.len()),
                expected: self.rows.len(),
                found: values.len(),
            });
        }
        self.headers.push(name.to_string());
        for (row, value) in self.rows.iter_mut().zip(values) {
            row.push(value);
        }
        Ok(())
    }

    /// Copies the given rows, in the given order, into a new table.
    pub fn select_rows(&self, positions: &[usize]) -> Table {
        Table {
            headers: self.headers.clone(),
            rows: positions
                .iter()
                .filter_map(|&idx| self.rows.get(idx).cloned())
                .collect(),
        }
    }

    pub fn display_rows(&self) -> Vec<Vec<String>> {
        self.rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|cell| cell.as_ref().map(Value::as_display).unwrap_or_default())
                    .collect()
            })
            .collect()
    }

    pub fn render(&self) -> String {
        render_table(&self.headers, &self.display_rows())
    }
}

fn validate_headers(headers: &[String]) -> Result<(), TableError> {
    let mut seen = HashSet::with_capacity(headers.len());
    for (idx, header) in headers.iter().enumerate() {
        if header.trim().is_empty() {
            return Err(TableError::EmptyColumnName(idx));
        }
        if !seen.insert(header.as_str()) {
            return Err(TableError::DuplicateColumn(header.clone()));
        }
    }
    Ok(())
}

pub fn render_table(headers: &[String], rows: &[Vec<String>]) -> String {
    let column_count = headers.len();
    let mut widths = headers.iter().map(|h| display_width(h)).collect::<Vec<_>>();
    for row in rows {
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            widths[idx] = widths[idx].max(display_width(cell));
        }
    }
    for width in &mut widths {
        *width = (*width).max(1);
    }

    let mut output = String::new();
    let _ = writeln!(output, "{}", format_row(headers, &widths));
    let separator_widths = widths.iter().map(|w| (*w).max(3)).collect::<Vec<usize>>();
    let separator_cells = separator_widths
        .iter()
        .map(|w| "-".repeat(*w))
        .collect::<Vec<_>>();
    let _ = writeln!(output, "{}", format_row(&separator_cells, &separator_widths));
    for row in rows {
        let _ = writeln!(output, "{}", format_row(row, &widths));
    }
    output
}

pub fn print_table(headers: &[String], rows: &[Vec<String>]) {
    print!("{}", render_table(headers, rows));
}

fn format_row(values: &[String], widths: &[usize]) -> String {
    let mut line = values
        .iter()
        .zip(widths)
        .map(|(value, width)| {
            let sanitized = sanitize_cell(value);
            let padding = width.saturating_sub(display_width(&sanitized));
            format!("{sanitized}{}", " ".repeat(padding))
        })
        .collect::<Vec<_>>()
        .join("  ");
    line.truncate(line.trim_end().len());
    line
}

fn display_width(value: &str) -> usize {
    value.chars().count()
}

fn sanitize_cell(value: &str) -> Cow<'_, str> {
    if value.contains(['\n', '\r', '\t']) {
        Cow::Owned(value.replace(['\n', '\r', '\t'], " "))
    } else {
        Cow::Borrowed(value)
    }
}
