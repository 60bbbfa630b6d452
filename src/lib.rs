pub mod aggregate;
pub mod cli;
pub mod data;
pub mod detector;
pub mod filter;
pub mod index;
pub mod io_utils;
pub mod normalize;
pub mod parser;
pub mod schema;
pub mod storage;
pub mod table;

use std::{env, path::Path, sync::OnceLock};

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use log::{LevelFilter, debug, info};

use crate::{
    aggregate::Measure,
    cli::{Cli, Commands, ReadArgs},
    detector::TypeDetector,
    filter::parse_filters,
    io_utils::{resolve_encoding, resolve_input_delimiter, read_table, write_table},
    schema::{ColumnTypes, load_column_types, save_column_types},
    storage::DataStorage,
    table::{Table, print_table},
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("fintab", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Detect(args) => handle_detect(&args),
        Commands::Normalize(args) => normalize::execute(&args),
        Commands::Store(args) => handle_store(&args),
        Commands::Query(args) => handle_query(&args),
        Commands::Aggregate(args) => handle_aggregate(&args),
        Commands::Metadata(args) => handle_metadata(&args),
    }
}

fn load_input(path: &Path, read: &ReadArgs) -> Result<Table> {
    let encoding = resolve_encoding(read.input_encoding.as_deref())?;
    let delimiter = resolve_input_delimiter(path, read.delimiter);
    debug!(
        "Reading '{}' with delimiter '{}' and encoding {}",
        path.display(),
        printable_delimiter(delimiter),
        encoding.name()
    );
    read_table(path, delimiter, encoding).with_context(|| format!("Reading {path:?}"))
}

fn resolve_types(table: &Table, types: Option<&Path>, read: &ReadArgs) -> Result<ColumnTypes> {
    match types {
        Some(path) => load_column_types(path),
        None => Ok(TypeDetector::with_sample_size(read.sample_rows).analyze_table(table)),
    }
}

fn open_storage(args: &cli::BackendArgs) -> Result<DataStorage> {
    DataStorage::open(&args.config())
        .with_context(|| format!("Opening {} storage", args.backend))
}

/// Turns the storage's last diagnostic into an error for `action`.
fn storage_failure(storage: &DataStorage, action: String) -> anyhow::Error {
    match storage.take_diagnostic() {
        Some(err) => anyhow::Error::new(err).context(action),
        None => anyhow!(action),
    }
}

fn store_input(
    storage: &mut DataStorage,
    name: &str,
    input: &Path,
    types: Option<&Path>,
    read: &ReadArgs,
) -> Result<Table> {
    let table = load_input(input, read)?;
    let column_types = resolve_types(&table, types, read)?;
    if !storage.store_data(name, &table, &column_types) {
        return Err(storage_failure(storage, format!("Storing dataset '{name}'")));
    }
    info!(
        "Stored {} row(s) from {:?} as '{}' ({} backend)",
        table.row_count(),
        input,
        name,
        storage.backend_kind()
    );
    Ok(table)
}

fn emit_table(table: &Table, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => write_table(path, table, io_utils::DEFAULT_CSV_DELIMITER)
            .with_context(|| format!("Writing {path:?}")),
        None => {
            print_table(table.headers(), &table.display_rows());
            Ok(())
        }
    }
}

fn handle_detect(args: &cli::DetectArgs) -> Result<()> {
    let table = load_input(&args.input, &args.read)?;
    let column_types = TypeDetector::with_sample_size(args.read.sample_rows).analyze_table(&table);
    let rows = table
        .headers()
        .iter()
        .filter_map(|column| column_types.get(column).map(|result| (column, result)))
        .map(|(column, result)| {
            vec![
                column.clone(),
                result.kind().to_string(),
                format!("{:.2}", result.confidence),
                result.format_hint().unwrap_or("-").to_string(),
            ]
        })
        .collect::<Vec<_>>();
    let headers = ["column", "type", "confidence", "format"].map(String::from);
    print_table(&headers, &rows);
    if let Some(path) = &args.output {
        save_column_types(path, &column_types)
            .with_context(|| format!("Writing type map to {path:?}"))?;
        info!(
            "Type map for {} column(s) written to {:?}",
            column_types.len(),
            path
        );
    }
    Ok(())
}

fn handle_store(args: &cli::StoreArgs) -> Result<()> {
    let mut storage = open_storage(&args.backend)?;
    store_input(
        &mut storage,
        &args.name,
        &args.input,
        args.types.as_deref(),
        &args.read,
    )?;
    let columns = args
        .index
        .iter()
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .collect::<Vec<_>>();
    if !columns.is_empty() {
        debug!("Index columns: {columns:?}");
        if !storage.create_indexes(&args.name, &columns) {
            return Err(storage_failure(
                &storage,
                format!("Indexing dataset '{}'", args.name),
            ));
        }
        info!(
            "Indexed {} column(s) of '{}'",
            storage.list_indexes(&args.name).len(),
            args.name
        );
    }
    storage.close();
    Ok(())
}

fn handle_query(args: &cli::QueryArgs) -> Result<()> {
    let mut storage = open_storage(&args.backend)?;
    if let Some(input) = &args.input {
        store_input(&mut storage, &args.name, input, None, &args.read)?;
    }
    let filters = parse_filters(&args.filters)?;
    let result = storage.query_by_criteria(&args.name, &filters);
    if let Some(err) = storage.take_diagnostic() {
        return Err(anyhow::Error::new(err).context(format!("Querying dataset '{}'", args.name)));
    }
    info!("{} row(s) matched", result.row_count());
    emit_table(&result, args.output.as_deref())?;
    storage.close();
    Ok(())
}

fn handle_aggregate(args: &cli::AggregateArgs) -> Result<()> {
    let mut storage = open_storage(&args.backend)?;
    if let Some(input) = &args.input {
        store_input(&mut storage, &args.name, input, None, &args.read)?;
    }
    let measures = args
        .measures
        .iter()
        .map(|spec| Measure::parse(spec))
        .collect::<Result<Vec<_>>>()?;
    let result = storage.aggregate_data(&args.name, &args.group_by, &measures);
    if let Some(err) = storage.take_diagnostic() {
        return Err(
            anyhow::Error::new(err).context(format!("Aggregating dataset '{}'", args.name))
        );
    }
    emit_table(&result, args.output.as_deref())?;
    storage.close();
    Ok(())
}

fn handle_metadata(args: &cli::MetadataArgs) -> Result<()> {
    let storage = open_storage(&args.backend)?;
    let metadata = storage
        .get_metadata(&args.name)
        .ok_or_else(|| storage_failure(&storage, format!("Reading metadata of '{}'", args.name)))?;
    println!(
        "{}",
        serde_json::to_string_pretty(&metadata).context("Serializing metadata")?
    );
    storage.close();
    Ok(())
}

pub(crate) fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b',' => ",".to_string(),
        b'\t' => "\\t".to_string(),
        b'\n' => "\\n".to_string(),
        other => (other as char).to_string(),
    }
}
