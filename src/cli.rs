use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::{DEFAULT_BATCH_SIZE, DEFAULT_CHUNK_ROWS, MAX_BATCH_SIZE};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Provision, repair and bulk-load the cinema database",
    long_about = None
)]
pub struct Cli {
    /// SQLite database file to operate on
    #[arg(
        long,
        env = "CINEMA_DATABASE",
        default_value = "cinema.db",
        global = true
    )]
    pub database: PathBuf,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Create the fixed cinema schema in foreign-key dependency order
    Provision,
    /// Load every CSV file under the dataset directory
    Import(ImportArgs),
    /// Backfill columns, keys, indexes and foreign keys on the legacy schema
    Repair,
    /// Report tables, row counts and foreign keys
    Inspect(InspectArgs),
}

#[derive(Debug, Args)]
pub struct ImportArgs {
    /// Directory searched recursively for .csv files
    #[arg(long, env = "CINEMA_DATASET", default_value = "dataset")]
    pub dataset: PathBuf,
    /// Rows per INSERT batch (1-10000)
    #[arg(
        long = "batch-size",
        env = "CINEMA_BATCH_SIZE",
        default_value_t = DEFAULT_BATCH_SIZE,
        value_parser = parse_batch_size
    )]
    pub batch_size: usize,
    /// Rows per chunk when streaming files for type inference
    #[arg(
        long = "chunk-rows",
        env = "CINEMA_CHUNK_ROWS",
        default_value_t = DEFAULT_CHUNK_ROWS,
        value_parser = parse_positive
    )]
    pub chunk_rows: usize,
    /// Read every file with this encoding instead of detecting it
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}

#[derive(Debug, Args)]
pub struct InspectArgs {
    /// Emit the report as JSON
    #[arg(long)]
    pub json: bool,
}

pub fn parse_positive(value: &str) -> Result<usize, String> {
    let parsed: usize = value
        .trim()
        .parse()
        .map_err(|_| format!("'{value}' is not a whole number"))?;
    if parsed == 0 {
        return Err("Value must be at least 1".to_string());
    }
    Ok(parsed)
}

pub fn parse_batch_size(value: &str) -> Result<usize, String> {
    let parsed = parse_positive(value)?;
    if parsed > MAX_BATCH_SIZE {
        return Err(format!("Batch size cannot exceed {MAX_BATCH_SIZE}"));
    }
    Ok(parsed)
}
