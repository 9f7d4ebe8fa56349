use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use encoding_rs::Encoding;
use log::debug;
use rusqlite::{Connection, OpenFlags};

use crate::{cli::ImportArgs, encoding::normalize_label};

pub const DEFAULT_BATCH_SIZE: usize = 1_000;
pub const MAX_BATCH_SIZE: usize = 10_000;
pub const DEFAULT_CHUNK_ROWS: usize = 10_000;

/// Runtime settings, built once at startup and passed to each component.
#[derive(Debug, Clone)]
pub struct Config {
    pub database: PathBuf,
    pub dataset: PathBuf,
    pub batch_size: usize,
    pub chunk_rows: usize,
    /// Forces one encoding for every input file instead of detection.
    pub input_encoding: Option<&'static Encoding>,
}

impl Config {
    pub fn new(database: impl Into<PathBuf>) -> Self {
        Self {
            database: database.into(),
            dataset: PathBuf::from("dataset"),
            batch_size: DEFAULT_BATCH_SIZE,
            chunk_rows: DEFAULT_CHUNK_ROWS,
            input_encoding: None,
        }
    }

    pub fn for_import(database: &Path, args: &ImportArgs) -> Result<Self> {
        let input_encoding = match args.input_encoding.as_deref() {
            Some(label) => Some(
                normalize_label(label).ok_or_else(|| anyhow!("Unknown encoding '{label}'"))?,
            ),
            None => None,
        };
        let config = Self {
            database: database.to_path_buf(),
            dataset: args.dataset.clone(),
            batch_size: args.batch_size,
            chunk_rows: args.chunk_rows,
            input_encoding,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_BATCH_SIZE).contains(&self.batch_size) {
            bail!(
                "Batch size must be between 1 and {MAX_BATCH_SIZE}, got {}",
                self.batch_size
            );
        }
        if self.chunk_rows == 0 {
            bail!("Chunk rows must be at least 1");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Create the database file when it does not exist.
    Create,
    /// The database file must already exist.
    Existing,
}

/// Opens the configured database with foreign-key enforcement on.
pub fn open_connection(config: &Config, mode: OpenMode) -> Result<Connection> {
    let path = &config.database;
    let access = match mode {
        OpenMode::Create => OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        OpenMode::Existing => {
            if !path.is_file() {
                bail!("Database {path:?} does not exist; run 'provision' first");
            }
            OpenFlags::SQLITE_OPEN_READ_WRITE
        }
    };
    let flags = access | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    let conn = Connection::open_with_flags(path, flags)
        .with_context(|| format!("Opening database {path:?}"))?;
    conn.pragma_update(None, "foreign_keys", true)
        .with_context(|| format!("Enabling foreign keys on {path:?}"))?;
    debug!("Opened database {path:?} ({mode:?})");
    Ok(conn)
}
