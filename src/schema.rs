//! Column classification results.
//!
//! A [`ColumnTypeResult`] pairs a tagged [`ColumnType`] with a confidence
//! score. On the wire (JSON sidecars, the SQLite `metadata` table) it is the
//! flat record `{"type": .., "confidence": .., "format": ..}`.

use std::{collections::BTreeMap, fmt, fs::File, io::BufReader, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Column name to classification, ordered by column name.
pub type ColumnTypes = BTreeMap<String, ColumnTypeResult>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("unknown column type '{0}'")]
    UnknownType(String),
    #[error("unknown {kind} format '{format}'")]
    UnknownFormat { kind: &'static str, format: String },
    #[error("{0} columns require a format label")]
    MissingFormat(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnKind {
    Date,
    Number,
    String,
    Unknown,
}

impl ColumnKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnKind::Date => "date",
            ColumnKind::Number => "number",
            ColumnKind::String => "string",
            ColumnKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DateFormat {
    /// Values were already dates or datetimes.
    DateTime,
    AutoDetected,
    ExcelSerial,
    MonthDayYear,
    DayMonthYear,
    IsoDate,
    DayMonthNameYear,
    MonthNameYear,
    Quarter,
}

impl DateFormat {
    pub const ALL: [DateFormat; 9] = [
        DateFormat::DateTime,
        DateFormat::AutoDetected,
        DateFormat::ExcelSerial,
        DateFormat::MonthDayYear,
        DateFormat::DayMonthYear,
        DateFormat::IsoDate,
        DateFormat::DayMonthNameYear,
        DateFormat::MonthNameYear,
        DateFormat::Quarter,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            DateFormat::DateTime => "datetime",
            DateFormat::AutoDetected => "auto-detected",
            DateFormat::ExcelSerial => "excel_serial",
            DateFormat::MonthDayYear => "mm/dd/yyyy",
            DateFormat::DayMonthYear => "dd/mm/yyyy",
            DateFormat::IsoDate => "yyyy-mm-dd",
            DateFormat::DayMonthNameYear => "dd-mmm-yyyy",
            DateFormat::MonthNameYear => "mmm-yy",
            DateFormat::Quarter => "quarter",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|format| format.label() == label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NumberFormat {
    /// Values were already numeric.
    Numeric,
    /// Currency amounts; carries the majority symbol's code when one dominates.
    Currency(Option<String>),
    Accounting,
    TrailingNegative,
    Abbreviated,
    European,
    Indian,
    Standard,
}

impl NumberFormat {
    pub fn label(&self) -> &str {
        match self {
            NumberFormat::Numeric => "numeric",
            NumberFormat::Currency(Some(code)) => code,
            NumberFormat::Currency(None) => "currency",
            NumberFormat::Accounting => "accounting",
            NumberFormat::TrailingNegative => "trailing_negative",
            NumberFormat::Abbreviated => "abbreviated",
            NumberFormat::European => "european",
            NumberFormat::Indian => "indian",
            NumberFormat::Standard => "standard",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        let format = match label {
            "numeric" => NumberFormat::Numeric,
            "currency" => NumberFormat::Currency(None),
            "accounting" => NumberFormat::Accounting,
            "trailing_negative" => NumberFormat::TrailingNegative,
            "abbreviated" => NumberFormat::Abbreviated,
            "european" => NumberFormat::European,
            "indian" => NumberFormat::Indian,
            "standard" => NumberFormat::Standard,
            code if code.len() == 3 && code.bytes().all(|b| b.is_ascii_uppercase()) => {
                NumberFormat::Currency(Some(code.to_string()))
            }
            _ => return None,
        };
        Some(format)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StringFormat {
    AccountNumber,
    ReferenceCode,
    TransactionId,
    Categorical,
    Description,
    NameOrAddress,
    Identifier,
}

impl StringFormat {
    pub const ALL: [StringFormat; 7] = [
        StringFormat::AccountNumber,
        StringFormat::ReferenceCode,
        StringFormat::TransactionId,
        StringFormat::Categorical,
        StringFormat::Description,
        StringFormat::NameOrAddress,
        StringFormat::Identifier,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            StringFormat::AccountNumber => "account_number",
            StringFormat::ReferenceCode => "reference_code",
            StringFormat::TransactionId => "transaction_id",
            StringFormat::Categorical => "categorical",
            StringFormat::Description => "description",
            StringFormat::NameOrAddress => "name_or_address",
            StringFormat::Identifier => "identifier",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|format| format.label() == label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Date(DateFormat),
    Number(NumberFormat),
    String(StringFormat),
    Unknown,
}

impl ColumnType {
    pub fn kind(&self) -> ColumnKind {
        match self {
            ColumnType::Date(_) => ColumnKind::Date,
            ColumnType::Number(_) => ColumnKind::Number,
            ColumnType::String(_) => ColumnKind::String,
            ColumnType::Unknown => ColumnKind::Unknown,
        }
    }

    /// The sub-format label, which doubles as the parser's format hint.
    pub fn format_label(&self) -> Option<&str> {
        match self {
            ColumnType::Date(format) => Some(format.label()),
            ColumnType::Number(format) => Some(format.label()),
            ColumnType::String(format) => Some(format.label()),
            ColumnType::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "ColumnTypeRecord", try_from = "ColumnTypeRecord")]
pub struct ColumnTypeResult {
    pub column_type: ColumnType,
    pub confidence: f64,
}

impl ColumnTypeResult {
    pub fn new(column_type: ColumnType, confidence: f64) -> Self {
        Self {
            column_type,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    /// The "no data" result: unknown type with zero confidence.
    pub fn unknown() -> Self {
        Self::new(ColumnType::Unknown, 0.0)
    }

    pub fn kind(&self) -> ColumnKind {
        self.column_type.kind()
    }

    pub fn format_hint(&self) -> Option<&str> {
        self.column_type.format_label()
    }

    pub fn is_unknown(&self) -> bool {
        self.column_type == ColumnType::Unknown
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ColumnTypeRecord {
    #[serde(rename = "type")]
    kind: String,
    confidence: f64,
    format: Option<String>,
}

impl From<ColumnTypeResult> for ColumnTypeRecord {
    fn from(result: ColumnTypeResult) -> Self {
        Self {
            kind: result.kind().as_str().to_string(),
            confidence: result.confidence,
            format: result.format_hint().map(str::to_string),
        }
    }
}

impl TryFrom<ColumnTypeRecord> for ColumnTypeResult {
    type Error = SchemaError;

    fn try_from(record: ColumnTypeRecord) -> Result<Self, Self::Error> {
        let ColumnTypeRecord {
            kind,
            confidence,
            format,
        } = record;
        let column_type = match (kind.as_str(), format) {
            ("unknown", _) => ColumnType::Unknown,
            ("date", Some(label)) => DateFormat::from_label(&label)
                .map(ColumnType::Date)
                .ok_or(SchemaError::UnknownFormat {
                    kind: "date",
                    format: label,
                })?,
            ("number", Some(label)) => NumberFormat::from_label(&label)
                .map(ColumnType::Number)
                .ok_or(SchemaError::UnknownFormat {
                    kind: "number",
                    format: label,
                })?,
            ("string", Some(label)) => StringFormat::from_label(&label)
                .map(ColumnType::String)
                .ok_or(SchemaError::UnknownFormat {
                    kind: "string",
                    format: label,
                })?,
            ("date", None) => return Err(SchemaError::MissingFormat("date")),
            ("number", None) => return Err(SchemaError::MissingFormat("number")),
            ("string", None) => return Err(SchemaError::MissingFormat("string")),
            _ => return Err(SchemaError::UnknownType(kind)),
        };
        Ok(ColumnTypeResult {
            column_type,
            confidence,
        })
    }
}

pub fn save_column_types(path: &Path, column_types: &ColumnTypes) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Creating type map file {path:?}"))?;
    serde_json::to_writer_pretty(file, column_types).context("Writing type map JSON")
}

pub fn load_column_types(path: &Path) -> Result<ColumnTypes> {
    let file = File::open(path).with_context(|| format!("Opening type map file {path:?}"))?;
    let reader = BufReader::new(file);
    serde_json::from_reader(reader).context("Parsing type map JSON")
}
