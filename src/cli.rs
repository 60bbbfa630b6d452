use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

use crate::{
    detector::DEFAULT_SAMPLE_SIZE,
    parser::DEFAULT_TARGET_CURRENCY,
    storage::{BackendKind, StorageConfig, file::DEFAULT_DATA_DIR},
};

pub const DEFAULT_DB_PATH: &str = "data/fintab.db";

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Detect, normalize, and query messy financial tables",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Infer the type, format, and confidence of every column in a CSV file
    Detect(DetectArgs),
    /// Append `<column>_parsed` date and amount columns to a CSV file
    Normalize(NormalizeArgs),
    /// Detect column types and store a CSV file as a named dataset
    Store(StoreArgs),
    /// Retrieve the rows of a stored dataset that match every filter
    Query(QueryArgs),
    /// Group a stored dataset and summarize measure columns
    Aggregate(AggregateArgs),
    /// Print the stored metadata of a dataset as JSON
    Metadata(MetadataArgs),
}

/// Options shared by every command that reads a CSV file.
#[derive(Debug, Clone, Args)]
pub struct ReadArgs {
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the input file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    /// Number of values sampled per column when detecting types (0 means full scan)
    #[arg(long = "sample-rows", default_value_t = DEFAULT_SAMPLE_SIZE)]
    pub sample_rows: usize,
}

#[derive(Debug, Clone, Args)]
pub struct BackendArgs {
    /// Storage backend holding the datasets
    #[arg(long, value_enum, default_value_t = BackendKind::Sqlite)]
    pub backend: BackendKind,
    /// SQLite database file (sqlite backend)
    #[arg(long, default_value = DEFAULT_DB_PATH)]
    pub db: PathBuf,
    /// Directory holding `<name>.csv` and `<name>_metadata.json` (file backend)
    #[arg(long = "data-dir", default_value = DEFAULT_DATA_DIR)]
    pub data_dir: PathBuf,
}

impl BackendArgs {
    pub fn config(&self) -> StorageConfig {
        match self.backend {
            BackendKind::Memory => StorageConfig::Memory,
            BackendKind::Sqlite => StorageConfig::Sqlite {
                path: self.db.clone(),
            },
            BackendKind::File => StorageConfig::File {
                directory: self.data_dir.clone(),
            },
        }
    }
}

#[derive(Debug, Args)]
pub struct DetectArgs {
    /// Input CSV file to inspect ('-' reads stdin)
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Optional destination for the detected type map (JSON)
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
    #[command(flatten)]
    pub read: ReadArgs,
}

#[derive(Debug, Args)]
pub struct NormalizeArgs {
    /// Input CSV file to normalize ('-' reads stdin)
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Output CSV file ('-' writes stdout)
    #[arg(short = 'o', long = "output")]
    pub output: PathBuf,
    /// Type map produced by `detect`; detection runs when omitted
    #[arg(long)]
    pub types: Option<PathBuf>,
    /// Currency that converted amounts are expressed in
    #[arg(long = "target-currency", default_value = DEFAULT_TARGET_CURRENCY)]
    pub target_currency: String,
    /// JSON object of exchange rates keyed by source currency code
    #[arg(long)]
    pub rates: Option<PathBuf>,
    #[command(flatten)]
    pub read: ReadArgs,
}

#[derive(Debug, Args)]
pub struct StoreArgs {
    /// Input CSV file to store ('-' reads stdin)
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Dataset name
    #[arg(short = 'n', long)]
    pub name: String,
    /// Type map produced by `detect`; detection runs when omitted
    #[arg(long)]
    pub types: Option<PathBuf>,
    /// Columns to index after storing
    #[arg(long = "index", value_delimiter = ',')]
    pub index: Vec<String>,
    #[command(flatten)]
    pub read: ReadArgs,
    #[command(flatten)]
    pub backend: BackendArgs,
}

#[derive(Debug, Args)]
pub struct QueryArgs {
    /// Dataset name
    #[arg(short = 'n', long)]
    pub name: String,
    /// Repeatable filters such as `Category=Income`, `Amount__gt=500`,
    /// `Amount__between=100,300`, or `Account__in=A001,A003`
    #[arg(long = "filter", action = ArgAction::Append)]
    pub filters: Vec<String>,
    /// CSV file to detect and store under `--name` before querying
    #[arg(short = 'i', long = "input")]
    pub input: Option<PathBuf>,
    /// Write matching rows to a CSV file instead of printing a table
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
    #[command(flatten)]
    pub read: ReadArgs,
    #[command(flatten)]
    pub backend: BackendArgs,
}

#[derive(Debug, Args)]
pub struct AggregateArgs {
    /// Dataset name
    #[arg(short = 'n', long)]
    pub name: String,
    /// Columns to group by
    #[arg(short = 'g', long = "group-by", value_delimiter = ',', required = true)]
    pub group_by: Vec<String>,
    /// Repeatable measures as `column:function` (sum, mean, min, max, count)
    #[arg(short = 'm', long = "measure", action = ArgAction::Append, required = true)]
    pub measures: Vec<String>,
    /// CSV file to detect and store under `--name` before aggregating
    #[arg(short = 'i', long = "input")]
    pub input: Option<PathBuf>,
    /// Write the summary to a CSV file instead of printing a table
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
    #[command(flatten)]
    pub read: ReadArgs,
    #[command(flatten)]
    pub backend: BackendArgs,
}

#[derive(Debug, Args)]
pub struct MetadataArgs {
    /// Dataset name
    #[arg(short = 'n', long)]
    pub name: String,
    #[command(flatten)]
    pub backend: BackendArgs,
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delimiter_aliases() {
        assert_eq!(parse_delimiter("tab"), Ok(b'\t'));
        assert_eq!(parse_delimiter("semicolon"), Ok(b';'));
        assert_eq!(parse_delimiter("#"), Ok(b'#'));
        assert!(parse_delimiter("").is_err());
        assert!(parse_delimiter("ab").is_err());
        assert!(parse_delimiter("\u{e9}").is_err());
    }

    #[test]
    fn aggregate_arguments_split_on_commas() {
        let cli = Cli::try_parse_from([
            "fintab",
            "aggregate",
            "--name",
            "ledger",
            "--group-by",
            "Category,Account",
            "--measure",
            "Amount:sum",
            "--measure",
            "Amount:count",
            "--backend",
            "memory",
        ])
        .expect("parse");
        let Commands::Aggregate(args) = cli.command else {
            panic!("expected aggregate");
        };
        assert_eq!(args.group_by, ["Category", "Account"]);
        assert_eq!(args.measures.len(), 2);
        assert_eq!(args.backend.config(), StorageConfig::Memory);
    }
}
