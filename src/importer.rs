//! Import pipeline: discover CSV files under the dataset root, map each one to
//! a table, and load the groups parents-first so foreign keys resolve.

use std::{
    cmp::Ordering,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use itertools::Itertools;
use log::{info, warn};
use rusqlite::Connection;
use serde::Serialize;
use walkdir::WalkDir;

use crate::{
    catalog,
    config::Config,
    ddl::TableDef,
    encoding::{detect_file_encoding, resolve_readable_encoding},
    inference::infer_schema_or_fallback,
    loader::{self, LoadOptions, LoadReport},
    provision::{cinema_schema, create_inferred_table, dependency_order},
    sanitize::sanitize_table_name,
};

/// All `.csv` files below `root`, sorted by path. A missing root yields an
/// empty list.
pub fn discover_csv_files(root: &Path) -> Result<Vec<PathBuf>> {
    if !root.exists() {
        warn!("Dataset directory {root:?} does not exist");
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Scanning dataset directory {root:?}"))?;
        let is_csv = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
        if entry.file_type().is_file() && is_csv {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

fn log_root_contents(root: &Path) {
    match fs::read_dir(root) {
        Ok(entries) => {
            let names: Vec<String> = entries
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.file_name().to_string_lossy().into_owned())
                .sorted()
                .collect();
            if names.is_empty() {
                info!("Dataset directory {root:?} is empty");
            } else {
                info!("Dataset directory {root:?} contains: {}", names.join(", "));
            }
        }
        Err(err) => warn!("Cannot list dataset directory {root:?}: {err}"),
    }
}

/// Lowercases and strips `_`, `-` and spaces so `show_seats` and `ShowSeat`
/// compare equal.
pub fn normalize_stem(stem: &str) -> String {
    stem.chars()
        .filter(|ch| !matches!(ch, '_' | '-' | ' '))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Table a CSV file loads into: the fixed table whose name equals the file
/// stem, else the longest fixed name contained in it, else the sanitized stem.
pub fn map_csv_to_table(path: &Path, fixed: &[&str]) -> String {
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let normalized = normalize_stem(&stem);
    let candidates: Vec<(&str, String)> = fixed
        .iter()
        .map(|name| (*name, normalize_stem(name)))
        .collect();
    if let Some((name, _)) = candidates.iter().find(|(_, key)| *key == normalized) {
        return name.to_string();
    }
    let mut best: Option<(&str, usize)> = None;
    for (name, key) in &candidates {
        if !key.is_empty()
            && normalized.contains(key.as_str())
            && best.is_none_or(|(_, len)| key.len() > len)
        {
            best = Some((*name, key.len()));
        }
    }
    match best {
        Some((name, _)) => name.to_string(),
        None => sanitize_table_name(&stem),
    }
}

/// Groups files by target table. Fixed tables come first in dependency order;
/// any other table follows, alphabetically.
pub fn plan_imports(files: Vec<PathBuf>, schema: &[TableDef]) -> Result<Vec<(String, Vec<PathBuf>)>> {
    let ordered = dependency_order(schema)?;
    let fixed: Vec<&str> = ordered.iter().map(|table| table.name.as_str()).collect();
    let rank = |table: &str| {
        fixed
            .iter()
            .position(|name| *name == table)
            .unwrap_or(usize::MAX)
    };

    let mut mapped: Vec<(String, PathBuf)> = files
        .into_iter()
        .map(|path| (map_csv_to_table(&path, &fixed), path))
        .collect();
    mapped.sort_by(|(left, _), (right, _)| match rank(left).cmp(&rank(right)) {
        Ordering::Equal => left.cmp(right),
        other => other,
    });
    let groups = mapped
        .into_iter()
        .chunk_by(|(table, _)| table.clone())
        .into_iter()
        .map(|(table, files)| (table, files.map(|(_, path)| path).collect()))
        .collect();
    Ok(groups)
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TableImport {
    pub table: String,
    pub attempted: usize,
    pub succeeded: usize,
    /// Row count after every file of the group was processed.
    pub rows: u64,
    pub reports: Vec<LoadReport>,
    /// `(file, error)` for each file that failed.
    pub failures: Vec<(PathBuf, String)>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportSummary {
    pub files_found: usize,
    pub tables: Vec<TableImport>,
    /// Rows held by every table of the database once the run ends.
    pub total_rows: u64,
}

impl ImportSummary {
    pub fn files_failed(&self) -> usize {
        self.tables.iter().map(|table| table.failures.len()).sum()
    }

    pub fn log(&self) {
        info!("Import summary:");
        for table in &self.tables {
            info!(
                "  {}: {}/{} file(s) imported, {} row(s)",
                table.table, table.succeeded, table.attempted, table.rows
            );
        }
        info!(
            "{} file(s) found, {} failed; {} row(s) in the database",
            self.files_found,
            self.files_failed(),
            self.total_rows
        );
        if self.total_rows == 0 {
            warn!("The database holds no rows after the import");
        }
    }
}

/// Runs the full import described by `config` against `conn`.
pub fn run_import(conn: &Connection, config: &Config) -> Result<ImportSummary> {
    info!("Searching for CSV files under {:?}", config.dataset);
    let files = discover_csv_files(&config.dataset)?;
    let mut summary = ImportSummary {
        files_found: files.len(),
        ..ImportSummary::default()
    };
    if files.is_empty() {
        if config.dataset.exists() {
            log_root_contents(&config.dataset);
        }
        warn!("No CSV files found under {:?}", config.dataset);
        summary.total_rows = database_rows(conn)?;
        return Ok(summary);
    }
    info!("Found {} CSV file(s)", files.len());

    let schema = cinema_schema();
    let total = files.len();
    let mut position = 0usize;
    for (table, paths) in plan_imports(files, &schema)? {
        let mut group = TableImport {
            table: table.clone(),
            attempted: paths.len(),
            ..TableImport::default()
        };
        for path in paths {
            position += 1;
            info!("Processing file {position}/{total}: {path:?} -> '{table}'");
            match import_one(conn, &path, &table, config) {
                Ok(report) => {
                    group.succeeded += 1;
                    group.reports.push(report);
                }
                Err(err) => {
                    warn!("Failed to import {path:?}: {err:#}");
                    group.failures.push((path, format!("{err:#}")));
                }
            }
        }
        group.rows = match catalog::resolve_table(conn, &table)? {
            Some(stored) => catalog::row_count(conn, &stored)?,
            None => 0,
        };
        summary.tables.push(group);
    }
    summary.total_rows = database_rows(conn)?;
    summary.log();
    Ok(summary)
}

fn database_rows(conn: &Connection) -> Result<u64> {
    let mut total = 0;
    for table in catalog::list_tables(conn)? {
        total += catalog::row_count(conn, &table)?;
    }
    Ok(total)
}

/// Detects the encoding, creates the table from an inferred schema when it is
/// missing, then loads the file.
fn import_one(conn: &Connection, path: &Path, table: &str, config: &Config) -> Result<LoadReport> {
    let encoding = match config.input_encoding {
        Some(forced) => forced,
        None => {
            let detected = detect_file_encoding(path);
            resolve_readable_encoding(path, detected)?.unwrap_or(detected)
        }
    };
    info!("Reading {path:?} as {}", encoding.name());

    if !catalog::table_exists(conn, table)? {
        let (columns, report) = infer_schema_or_fallback(path, encoding, config.chunk_rows);
        if columns.is_empty() {
            bail!("No columns could be read from {path:?}");
        }
        if report.degraded {
            warn!("Creating '{table}' from the header row only");
        }
        create_inferred_table(conn, table, &columns)?;
    }

    let options = LoadOptions {
        batch_size: config.batch_size,
        chunk_rows: config.chunk_rows,
    };
    loader::import_file(conn, path, table, encoding, options)
        .with_context(|| format!("Loading {path:?} into '{table}'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provision::provision_fixed;
    use std::fs;
    use tempfile::tempdir;

    fn fixed_names() -> Vec<String> {
        cinema_schema().into_iter().map(|table| table.name).collect()
    }

    fn map(file: &str) -> String {
        let names = fixed_names();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        map_csv_to_table(Path::new(file), &refs)
    }

    #[test]
    fn maps_file_names_to_fixed_tables() {
        assert_eq!(map("show_seats.csv"), "ShowSeat");
        assert_eq!(map("shows.csv"), "Show");
        assert_eq!(map("payment_gateways.csv"), "PaymentGateway");
        assert_eq!(map("Food-Item Sizes.csv"), "FoodItemSize");
        assert_eq!(map("food_orders.csv"), "FoodOrder");
        assert_eq!(map("points_transactions.csv"), "PointsTransaction");
        assert_eq!(map("2024 weather.csv"), "tbl_2024_weather");
    }

    #[test]
    fn plans_parents_before_children() {
        let files = vec![
            PathBuf::from("data/tickets.csv"),
            PathBuf::from("data/zeta.csv"),
            PathBuf::from("data/alpha.csv"),
            PathBuf::from("data/screens.csv"),
            PathBuf::from("data/more/screen.csv"),
            PathBuf::from("data/bookings.csv"),
        ];
        let plan = plan_imports(files, &cinema_schema()).expect("plan");
        let tables: Vec<&str> = plan.iter().map(|(table, _)| table.as_str()).collect();
        assert_eq!(tables, vec!["Screen", "Booking", "Ticket", "alpha", "zeta"]);
        assert_eq!(plan[0].1.len(), 2);
    }

    #[test]
    fn imports_known_and_unknown_files() {
        let dir = tempdir().expect("temp dir");
        let dataset = dir.path().join("dataset");
        fs::create_dir_all(dataset.join("nested")).expect("mkdir");
        fs::write(
            dataset.join("screens.csv"),
            "screen_id,name,class_type,capacity\n1,Audi 1,IMAX,120\n2,Audi 2,2D,80\n",
        )
        .expect("screens");
        fs::write(
            dataset.join("nested").join("seats.csv"),
            "seat_id,screen_id,seat_number\n1,1,A1\n2,2,B7\n",
        )
        .expect("seats");
        fs::write(dataset.join("promo codes.csv"), "code,percent\nSPRING,10\n").expect("promo");
        fs::write(dataset.join("notes.txt"), "ignored").expect("notes");

        let conn = Connection::open_in_memory().expect("open");
        conn.pragma_update(None, "foreign_keys", true).expect("pragma");
        provision_fixed(&conn, &cinema_schema()).expect("provision");
        let mut config = Config::new(dir.path().join("unused.db"));
        config.dataset = dataset;

        let summary = run_import(&conn, &config).expect("import");
        assert_eq!(summary.files_found, 3);
        assert_eq!(summary.files_failed(), 0);
        assert_eq!(summary.total_rows, 5);
        let tables: Vec<&str> = summary.tables.iter().map(|t| t.table.as_str()).collect();
        assert_eq!(tables, vec!["Screen", "Seat", "promo_codes"]);
        assert!(catalog::table_exists(&conn, "promo_codes").expect("exists"));
    }

    #[test]
    fn empty_dataset_is_a_warning_not_an_error() {
        let dir = tempdir().expect("temp dir");
        fs::write(dir.path().join("readme.md"), "no data").expect("write");
        let conn = Connection::open_in_memory().expect("open");
        let mut config = Config::new(dir.path().join("unused.db"));
        config.dataset = dir.path().to_path_buf();
        let summary = run_import(&conn, &config).expect("import");
        assert_eq!(summary.files_found, 0);
        assert!(summary.tables.is_empty());
    }
}
