//! Loads one CSV file into an existing table.
//!
//! The bulk path streams the file in chunks, converts every cell to the
//! storage class its target column prefers and inserts multi-row batches, all
//! inside one transaction. Any error rolls that transaction back and the
//! fallback path runs once: it re-reads the whole file with lossy decoding,
//! binds every cell as text through a single-row prepared `INSERT` and commits
//! after each batch. Both paths go through the same [`Reconciliation`], so the
//! table always receives its own columns in its own order.

use std::path::Path;

use encoding_rs::Encoding;
use log::{debug, info, warn};
use rusqlite::{Connection, params_from_iter, types::Value};
use serde::Serialize;

use crate::{
    catalog,
    data::{Affinity, raw_value, typed_value},
    ddl::{quote_ident, quote_list},
    error::LoadError,
    io_utils::{self, CsvChunks},
    reconcile::Reconciliation,
    sanitize::sanitize_headers,
};

/// Upper bound on bound parameters in one statement.
pub const SQLITE_MAX_PARAMS: usize = 32_766;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOptions {
    pub batch_size: usize,
    pub chunk_rows: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LoadPath {
    Bulk,
    Fallback,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub table: String,
    /// Data rows read from the file, excluding dropped malformed rows.
    pub source_rows: usize,
    pub malformed_rows: usize,
    pub initial_count: u64,
    pub final_count: u64,
    pub path: LoadPath,
    /// Error that sent the load down the fallback path.
    pub fallback_reason: Option<String>,
    pub reconciliation: Reconciliation,
}

impl LoadReport {
    pub fn rows_added(&self) -> u64 {
        self.final_count.saturating_sub(self.initial_count)
    }

    /// Rows were read but the table did not grow.
    pub fn is_silent_failure(&self) -> bool {
        self.source_rows > 0 && self.rows_added() == 0
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Counts {
    rows: usize,
    malformed: usize,
}

/// Loads `path` into `table`, falling back to row-by-row inserts when the
/// bulk path fails.
pub fn import_file(
    conn: &Connection,
    path: &Path,
    table: &str,
    encoding: &'static Encoding,
    options: LoadOptions,
) -> Result<LoadReport, LoadError> {
    let target = catalog::describe_table(conn, table)?;
    let affinities: Vec<Affinity> = target
        .columns
        .iter()
        .map(|column| Affinity::from_declared_type(&column.decl_type))
        .collect();

    let headers = io_utils::open_lossy_csv_reader(path, encoding)
        .map_err(LoadError::Decode)?
        .headers()?
        .iter()
        .map(str::to_string)
        .collect::<Vec<_>>();
    let plan = Reconciliation::plan(&sanitize_headers(&headers), &target.column_names());
    plan.log_changes(&target.name);

    let initial_count = catalog::row_count(conn, &target.name)?;
    let primary = conn
        .unchecked_transaction()
        .map_err(LoadError::sqlite("begin bulk load"))
        .and_then(|tx| {
            let counts = load_bulk(&tx, path, &target.name, encoding, &plan, &affinities, options)?;
            tx.commit().map_err(LoadError::sqlite("commit bulk load"))?;
            Ok(counts)
        });

    let (counts, load_path, fallback_reason) = match primary {
        Ok(counts) => (counts, LoadPath::Bulk, None),
        Err(err) => {
            let reason = format!("{:#}", anyhow::Error::new(err));
            warn!(
                "Bulk load of {path:?} into '{}' failed: {reason}; trying row-by-row inserts",
                target.name
            );
            let counts = load_fallback(
                conn,
                path,
                &target.name,
                encoding,
                &plan,
                &affinities,
                options.batch_size,
            )?;
            (counts, LoadPath::Fallback, Some(reason))
        }
    };

    let final_count = catalog::row_count(conn, &target.name)?;
    let report = LoadReport {
        table: target.name,
        source_rows: counts.rows,
        malformed_rows: counts.malformed,
        initial_count,
        final_count,
        path: load_path,
        fallback_reason,
        reconciliation: plan,
    };
    if report.malformed_rows > 0 {
        warn!(
            "Skipped {} malformed row(s) in {:?}",
            report.malformed_rows, path
        );
    }
    if report.is_silent_failure() {
        warn!(
            "No rows were added to '{}' although {:?} holds {} row(s)",
            report.table, path, report.source_rows
        );
    } else {
        info!(
            "Imported {} row(s) into '{}' ({:?} path, {} -> {})",
            report.rows_added(),
            report.table,
            report.path,
            report.initial_count,
            report.final_count
        );
    }
    Ok(report)
}

fn rows_per_statement(batch_size: usize, columns: usize) -> usize {
    batch_size.min(SQLITE_MAX_PARAMS / columns.max(1)).max(1)
}

fn insert_sql(table: &str, columns: &[String], rows: usize) -> String {
    let placeholders = format!("({})", vec!["?"; columns.len()].join(", "));
    format!(
        "INSERT INTO {} ({}) VALUES {}",
        quote_ident(table),
        quote_list(columns),
        vec![placeholders; rows].join(", ")
    )
}

fn load_bulk(
    conn: &Connection,
    path: &Path,
    table: &str,
    encoding: &'static Encoding,
    plan: &Reconciliation,
    affinities: &[Affinity],
    options: LoadOptions,
) -> Result<Counts, LoadError> {
    let (_, mut chunks) =
        CsvChunks::open(path, encoding, options.chunk_rows).map_err(LoadError::Decode)?;
    let columns = plan.columns();
    let per_statement = rows_per_statement(options.batch_size, columns.len());
    let mut converted_rows = 0usize;

    for (chunk_index, chunk) in chunks.by_ref().enumerate() {
        let chunk = chunk.map_err(LoadError::Decode)?;
        let mut values: Vec<Vec<Value>> = Vec::with_capacity(chunk.len());
        for row in &chunk {
            converted_rows += 1;
            let projected = plan.project(row);
            let typed = projected
                .iter()
                .zip(affinities)
                .zip(columns)
                .map(|((cell, affinity), column)| match cell {
                    Some(raw) => typed_value(raw, *affinity).map_err(|source| {
                        LoadError::Conversion {
                            row: converted_rows,
                            column: column.clone(),
                            source,
                        }
                    }),
                    None => Ok(Value::Null),
                })
                .collect::<Result<Vec<_>, _>>()?;
            values.push(typed);
        }
        for batch in values.chunks(per_statement) {
            let sql = insert_sql(table, columns, batch.len());
            let mut stmt = conn
                .prepare_cached(&sql)
                .map_err(LoadError::sqlite(format!("prepare insert into '{table}'")))?;
            stmt.execute(params_from_iter(batch.iter().flatten()))
                .map_err(LoadError::sqlite(format!("insert batch into '{table}'")))?;
        }
        debug!(
            "Inserted chunk {} ({} row(s)) into '{}'",
            chunk_index + 1,
            chunk.len(),
            table
        );
    }
    Ok(Counts {
        rows: chunks.rows_read(),
        malformed: chunks.malformed_rows(),
    })
}

/// Reads every row of `path` with lossy decoding, applying the same
/// malformed-row policy as the chunked reader.
fn read_all_rows(path: &Path, encoding: &'static Encoding) -> Result<(Vec<Vec<String>>, usize), LoadError> {
    let mut reader = io_utils::open_lossy_csv_reader(path, encoding).map_err(LoadError::Decode)?;
    let width = reader.headers()?.len();
    let mut rows = Vec::new();
    let mut malformed = 0usize;
    for record in reader.records() {
        let record = record?;
        if record.len() > width {
            malformed += 1;
            continue;
        }
        let mut row: Vec<String> = record.iter().map(str::to_string).collect();
        row.resize(width, String::new());
        rows.push(row);
    }
    Ok((rows, malformed))
}

fn load_fallback(
    conn: &Connection,
    path: &Path,
    table: &str,
    encoding: &'static Encoding,
    plan: &Reconciliation,
    affinities: &[Affinity],
    batch_size: usize,
) -> Result<Counts, LoadError> {
    let (rows, malformed) = read_all_rows(path, encoding)?;
    let columns = plan.columns();
    let sql = insert_sql(table, columns, 1);
    let batches = rows.len().div_ceil(batch_size.max(1));
    for (index, batch) in rows.chunks(batch_size.max(1)).enumerate() {
        let tx = conn
            .unchecked_transaction()
            .map_err(LoadError::sqlite("begin fallback batch"))?;
        {
            let mut stmt = tx
                .prepare_cached(&sql)
                .map_err(LoadError::sqlite(format!("prepare insert into '{table}'")))?;
            for row in batch {
                let values = plan
                    .project(row)
                    .into_iter()
                    .zip(affinities)
                    .map(|(cell, affinity)| {
                        cell.map_or(Value::Null, |raw| raw_value(raw, *affinity))
                    });
                stmt.execute(params_from_iter(values))
                    .map_err(LoadError::sqlite(format!("insert row into '{table}'")))?;
            }
        }
        tx.commit()
            .map_err(LoadError::sqlite("commit fallback batch"))?;
        debug!("Committed fallback batch {}/{} for '{}'", index + 1, batches, table);
    }
    Ok(Counts {
        rows: rows.len(),
        malformed,
    })
}
