//! CSV reading and writing for [`Table`]s.
//!
//! - **Delimiter resolution**: `.tsv` inputs default to tab, everything else
//!   to comma, with a manual override.
//! - **Encoding**: input is decoded via `encoding_rs`, defaulting to UTF-8;
//!   output is always UTF-8.
//! - **stdin/stdout**: the `-` path convention routes through standard streams.
//! - **Quoting**: output quotes only when necessary so files stay readable.

use std::{
    fs::File,
    io::{BufReader, BufWriter, Read, Write},
    path::{Path, PathBuf},
};

use anyhow::{Result, anyhow};
use csv::QuoteStyle;
use encoding_rs::{Encoding, UTF_8};
use thiserror::Error;

use crate::{
    data::Value,
    table::{Table, TableError},
};

pub const DEFAULT_CSV_DELIMITER: u8 = b',';
pub const DEFAULT_TSV_DELIMITER: u8 = b'\t';

#[derive(Debug, Error)]
pub enum TableIoError {
    #[error("failed to open {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error("failed to decode text with encoding {0}")]
    Decode(&'static str),
    #[error(transparent)]
    Table(#[from] TableError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub fn is_dash(path: &Path) -> bool {
    path == Path::new("-")
}

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    if let Some(value) = label {
        Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| anyhow!("Unknown encoding '{value}'"))
    } else {
        Ok(UTF_8)
    }
}

pub fn resolve_input_delimiter(path: &Path, provided: Option<u8>) -> u8 {
    provided.unwrap_or_else(|| match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("tsv") => DEFAULT_TSV_DELIMITER,
        _ => DEFAULT_CSV_DELIMITER,
    })
}

pub fn open_csv_reader<R>(reader: R, delimiter: u8) -> csv::Reader<R>
where
    R: Read,
{
    csv::ReaderBuilder::new()
        .has_headers(true)
        .delimiter(delimiter)
        .double_quote(true)
        .flexible(false)
        .from_reader(reader)
}

pub fn open_csv_writer<W>(writer: W, delimiter: u8) -> csv::Writer<W>
where
    W: Write,
{
    csv::WriterBuilder::new()
        .delimiter(delimiter)
        .quote_style(QuoteStyle::Necessary)
        .double_quote(true)
        .from_writer(writer)
}

pub fn decode_bytes(bytes: &[u8], encoding: &'static Encoding) -> Result<String, TableIoError> {
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        Err(TableIoError::Decode(encoding.name()))
    } else {
        Ok(text.into_owned())
    }
}

pub fn decode_record(
    record: &csv::ByteRecord,
    encoding: &'static Encoding,
) -> Result<Vec<String>, TableIoError> {
    record
        .iter()
        .map(|field| decode_bytes(field, encoding))
        .collect()
}

/// Reads a whole CSV stream into a table, inferring each cell's value.
pub fn read_table_from<R>(
    reader: R,
    delimiter: u8,
    encoding: &'static Encoding,
) -> Result<Table, TableIoError>
where
    R: Read,
{
    read_table_from_with(reader, delimiter, encoding, |_, field| Value::from_field(field))
}

/// Reads a whole CSV stream, turning each field into a cell with `parse`,
/// which receives the field's column position.
pub fn read_table_from_with<R, F>(
    reader: R,
    delimiter: u8,
    encoding: &'static Encoding,
    parse: F,
) -> Result<Table, TableIoError>
where
    R: Read,
    F: Fn(usize, &str) -> Option<Value>,
{
    let mut reader = open_csv_reader(reader, delimiter);
    let headers = decode_record(reader.byte_headers()?, encoding)?
        .into_iter()
        .map(|header| header.trim_start_matches('\u{feff}').to_string())
        .collect::<Vec<_>>();
    let mut table = Table::empty(headers)?;
    let mut record = csv::ByteRecord::new();
    while reader.read_byte_record(&mut record)? {
        let row = decode_record(&record, encoding)?
            .iter()
            .enumerate()
            .map(|(idx, field)| parse(idx, field))
            .collect();
        table.push_row(row)?;
    }
    Ok(table)
}

pub fn read_table(
    path: &Path,
    delimiter: u8,
    encoding: &'static Encoding,
) -> Result<Table, TableIoError> {
    read_table_with(path, delimiter, encoding, |_, field| Value::from_field(field))
}

pub fn read_table_with<F>(
    path: &Path,
    delimiter: u8,
    encoding: &'static Encoding,
    parse: F,
) -> Result<Table, TableIoError>
where
    F: Fn(usize, &str) -> Option<Value>,
{
    let reader: Box<dyn Read> = if is_dash(path) {
        Box::new(std::io::stdin().lock())
    } else {
        Box::new(BufReader::new(File::open(path).map_err(|source| {
            TableIoError::Open {
                path: path.to_path_buf(),
                source,
            }
        })?))
    };
    read_table_from_with(reader, delimiter, encoding, parse)
}

pub fn write_table_to<W>(writer: W, table: &Table, delimiter: u8) -> Result<(), TableIoError>
where
    W: Write,
{
    let mut writer = open_csv_writer(writer, delimiter);
    writer.write_record(table.headers())?;
    for row in table.display_rows() {
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_table(path: &Path, table: &Table, delimiter: u8) -> Result<(), TableIoError> {
    if is_dash(path) {
        return write_table_to(std::io::stdout().lock(), table, delimiter);
    }
    let file = File::create(path).map_err(|source| TableIoError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    write_table_to(BufWriter::new(file), table, delimiter)
}
