//! Appends parsed copies of date and amount columns, driven by a type map.

use std::{collections::HashMap, fs::File, io::BufReader, path::Path};

use anyhow::{Context, Result};
use log::{debug, info};

use crate::{
    cli::NormalizeArgs,
    data::Value,
    detector::TypeDetector,
    io_utils::{resolve_encoding, resolve_input_delimiter, read_table, write_table},
    parser::{DEFAULT_TARGET_CURRENCY, normalize_currency, parse_amount, parse_date},
    schema::{ColumnKind, ColumnType, ColumnTypes, NumberFormat, load_column_types},
    table::{Table, TableError, print_table},
};

pub const PARSED_SUFFIX: &str = "_parsed";

#[derive(Debug, Clone)]
pub struct NormalizeOptions {
    pub target_currency: String,
    /// Units of each source currency per target unit.
    pub exchange_rates: Option<HashMap<String, f64>>,
    pub suffix: String,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            target_currency: DEFAULT_TARGET_CURRENCY.to_string(),
            exchange_rates: None,
            suffix: PARSED_SUFFIX.to_string(),
        }
    }
}

/// Parse outcome for one appended column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnReport {
    pub column: String,
    pub output: String,
    pub kind: ColumnKind,
    pub parsed: usize,
    /// Present cells that did not parse.
    pub failed: usize,
}

/// Copies `table` and appends a parsed column after the originals for every
/// date and number column in `column_types`, in header order.
pub fn append_parsed_columns(
    table: &Table,
    column_types: &ColumnTypes,
    options: &NormalizeOptions,
) -> Result<(Table, Vec<ColumnReport>), TableError> {
    let mut output = table.clone();
    let mut reports = Vec::new();
    for (idx, column) in table.headers().iter().enumerate() {
        let Some(result) = column_types.get(column) else {
            continue;
        };
        let hint = result.format_hint();
        let parsed = match &result.column_type {
            ColumnType::Date(_) => table
                .column_values(idx)
                .map(|cell| parse_date(cell, hint).map(Value::Date))
                .collect::<Vec<_>>(),
            ColumnType::Number(NumberFormat::Currency(_)) if options.exchange_rates.is_some() => {
                table
                    .column_values(idx)
                    .map(|cell| {
                        normalize_currency(
                            cell,
                            &options.target_currency,
                            options.exchange_rates.as_ref(),
                        )
                        .value
                        .map(Value::Float)
                    })
                    .collect()
            }
            ColumnType::Number(_) => table
                .column_values(idx)
                .map(|cell| parse_amount(cell, hint).map(Value::Float))
                .collect(),
            ColumnType::String(_) | ColumnType::Unknown => continue,
        };
        let present = table.column_values(idx).flatten().count();
        let parsed_count = parsed.iter().flatten().count();
        let name = format!("{column}{}", options.suffix);
        output.push_column(&name, parsed)?;
        debug!("Parsed {parsed_count}/{present} value(s) of '{column}' into '{name}'");
        reports.push(ColumnReport {
            column: column.clone(),
            output: name,
            kind: result.kind(),
            parsed: parsed_count,
            failed: present.saturating_sub(parsed_count),
        });
    }
    Ok((output, reports))
}

pub fn load_exchange_rates(path: &Path) -> Result<HashMap<String, f64>> {
    let file = File::open(path).with_context(|| format!("Opening exchange rates {path:?}"))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Parsing exchange rates {path:?}"))
}

pub fn execute(args: &NormalizeArgs) -> Result<()> {
    let encoding = resolve_encoding(args.read.input_encoding.as_deref())?;
    let delimiter = resolve_input_delimiter(&args.input, args.read.delimiter);
    let table = read_table(&args.input, delimiter, encoding)
        .with_context(|| format!("Reading {:?}", args.input))?;
    let column_types = match &args.types {
        Some(path) => load_column_types(path)?,
        None => TypeDetector::with_sample_size(args.read.sample_rows).analyze_table(&table),
    };
    let options = NormalizeOptions {
        target_currency: args.target_currency.clone(),
        exchange_rates: args.rates.as_deref().map(load_exchange_rates).transpose()?,
        ..NormalizeOptions::default()
    };
    let (normalized, reports) = append_parsed_columns(&table, &column_types, &options)
        .with_context(|| format!("Normalizing {:?}", args.input))?;
    write_table(&args.output, &normalized, delimiter)
        .with_context(|| format!("Writing {:?}", args.output))?;
    info!(
        "Appended {} parsed column(s) to {} row(s)",
        reports.len(),
        normalized.row_count()
    );
    if !crate::io_utils::is_dash(&args.output) && !reports.is_empty() {
        let rows = reports
            .iter()
            .map(|report| {
                vec![
                    report.output.clone(),
                    report.kind.to_string(),
                    report.parsed.to_string(),
                    report.failed.to_string(),
                ]
            })
            .collect::<Vec<_>>();
        let headers = ["column", "type", "parsed", "failed"].map(String::from);
        print_table(&headers, &rows);
    }
    Ok(())
}
