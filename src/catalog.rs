//! Catalog introspection and structural changes for a live SQLite database.
//!
//! Reads go through `sqlite_master` and the table-valued pragma functions
//! (`pragma_table_info`, `pragma_foreign_key_list`, `pragma_index_list`).
//! SQLite keeps foreign-key constraint names only in the table's SQL text, so
//! they are recovered with a pattern match over that text.
//!
//! Adding a primary key or adding/dropping a foreign key has no `ALTER TABLE`
//! form in SQLite. Those changes edit a [`TableDef`] and call
//! [`rebuild_table`], which follows SQLite's documented rebuild procedure:
//! create a shadow table, copy the shared columns, drop the original, rename
//! the shadow and recreate the original's indexes, all inside one transaction
//! with foreign-key enforcement paused. A rebuild that leaves dangling
//! references is rolled back.

use std::sync::OnceLock;

use log::debug;
use regex::Regex;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

use crate::{
    ddl::{ColumnDef, FkAction, ForeignKeyDef, TableDef, quote_ident, quote_list},
    error::SchemaError,
};

type Result<T, E = SchemaError> = std::result::Result<T, E>;

const SHADOW_SUFFIX: &str = "__rebuild";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexDef {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

/// User tables in name order.
pub fn list_tables(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare(
            "SELECT name FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .map_err(SchemaError::sqlite("list tables"))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
        .map_err(SchemaError::sqlite("list tables"))?;
    Ok(names)
}

/// Stored spelling of `name`, matched case-insensitively.
pub fn resolve_table(conn: &Connection, name: &str) -> Result<Option<String>> {
    conn.query_row(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1 COLLATE NOCASE",
        [name],
        |row| row.get(0),
    )
    .optional()
    .map_err(SchemaError::sqlite(format!("look up table '{name}'")))
}

pub fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    Ok(resolve_table(conn, name)?.is_some())
}

fn require_table(conn: &Connection, name: &str) -> Result<String> {
    resolve_table(conn, name)?.ok_or_else(|| SchemaError::UnknownTable {
        table: name.to_string(),
    })
}

fn table_sql(conn: &Connection, table: &str) -> Result<String> {
    conn.query_row(
        "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
        |row| row.get::<_, Option<String>>(0),
    )
    .map(Option::unwrap_or_default)
    .map_err(SchemaError::sqlite(format!("read definition of '{table}'")))
}

/// Column names of `table` in declaration order.
pub fn column_names(conn: &Connection, table: &str) -> Result<Vec<String>> {
    Ok(describe_table(conn, table)?.column_names())
}

/// Reads the full definition of `table` back from the catalog.
pub fn describe_table(conn: &Connection, name: &str) -> Result<TableDef> {
    let table = require_table(conn, name)?;
    let sql = table_sql(conn, &table)?;
    let mut def = TableDef::new(&table);

    let mut stmt = conn
        .prepare(
            "SELECT name, type, \"notnull\", dflt_value, pk \
             FROM pragma_table_info(?1) ORDER BY cid",
        )
        .map_err(SchemaError::sqlite(format!("describe '{table}'")))?;
    let rows = stmt
        .query_map([&table], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, bool>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, i64>(4)?,
            ))
        })
        .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
        .map_err(SchemaError::sqlite(format!("describe '{table}'")))?;

    let mut key_columns = Vec::new();
    for (column, decl_type, not_null, default, pk) in rows {
        if pk > 0 {
            key_columns.push((pk, column.clone()));
        }
        def.columns.push(ColumnDef {
            name: column,
            decl_type,
            not_null,
            default,
        });
    }
    key_columns.sort();
    def.primary_key = key_columns.into_iter().map(|(_, column)| column).collect();
    def.autoincrement =
        def.primary_key.len() == 1 && sql.to_ascii_uppercase().contains("AUTOINCREMENT");
    def.unique = unique_constraints(conn, &table)?;
    def.foreign_keys = read_foreign_keys(conn, &table, &sql)?;
    Ok(def)
}

fn unique_constraints(conn: &Connection, table: &str) -> Result<Vec<Vec<String>>> {
    let mut stmt = conn
        .prepare("SELECT name FROM pragma_index_list(?1) WHERE origin = 'u' ORDER BY name")
        .map_err(SchemaError::sqlite(format!("list unique constraints of '{table}'")))?;
    let names = stmt
        .query_map([table], |row| row.get::<_, String>(0))
        .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
        .map_err(SchemaError::sqlite(format!("list unique constraints of '{table}'")))?;
    names
        .iter()
        .map(|index| index_columns(conn, index))
        .collect()
}

fn index_columns(conn: &Connection, index: &str) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare("SELECT name FROM pragma_index_info(?1) ORDER BY seqno")
        .map_err(SchemaError::sqlite(format!("read index '{index}'")))?;
    stmt.query_map([index], |row| row.get::<_, Option<String>>(0))
        .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
        .map(|columns| columns.into_iter().flatten().collect())
        .map_err(SchemaError::sqlite(format!("read index '{index}'")))
}

fn constraint_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(
                r#"(?i)CONSTRAINT\s+[`"\[]?(\w+)[`"\]]?\s+FOREIGN\s+KEY\s*\(\s*[`"\[]?(\w+)"#,
            )
            .ok()
        })
        .as_ref()
}

/// `(constraint, first column)` pairs declared in a table's SQL text.
fn named_constraints(sql: &str) -> Vec<(String, String)> {
    let Some(pattern) = constraint_pattern() else {
        return Vec::new();
    };
    pattern
        .captures_iter(sql)
        .map(|captures| (captures[1].to_string(), captures[2].to_string()))
        .collect()
}

fn read_foreign_keys(conn: &Connection, table: &str, sql: &str) -> Result<Vec<ForeignKeyDef>> {
    let mut stmt = conn
        .prepare(
            "SELECT id, \"table\", \"from\", \"to\", on_update, on_delete \
             FROM pragma_foreign_key_list(?1) ORDER BY id, seq",
        )
        .map_err(SchemaError::sqlite(format!("list foreign keys of '{table}'")))?;
    let rows = stmt
        .query_map([table], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        })
        .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
        .map_err(SchemaError::sqlite(format!("list foreign keys of '{table}'")))?;

    let mut keys: Vec<(i64, ForeignKeyDef)> = Vec::new();
    for (id, parent, from, to, on_update, on_delete) in rows {
        match keys.last_mut() {
            Some((last, key)) if *last == id => {
                key.columns.push(from);
                key.ref_columns.extend(to);
            }
            _ => keys.push((
                id,
                ForeignKeyDef {
                    name: None,
                    columns: vec![from],
                    ref_table: parent,
                    ref_columns: to.into_iter().collect(),
                    on_update: FkAction::parse(&on_update),
                    on_delete: FkAction::parse(&on_delete),
                },
            )),
        }
    }

    let mut names = named_constraints(sql);
    let mut keys: Vec<ForeignKeyDef> = keys
        .into_iter()
        .map(|(_, mut key)| {
            let first = key.columns.first().cloned().unwrap_or_default();
            if let Some(position) = names
                .iter()
                .position(|(_, column)| column.eq_ignore_ascii_case(&first))
            {
                key.name = Some(names.remove(position).0);
            }
            key
        })
        .collect();
    // Catalog order differs from declaration order, and a rebuild would
    // otherwise reorder the constraints on every pass.
    keys.sort_by(|left, right| {
        (left.name.as_deref(), &left.columns).cmp(&(right.name.as_deref(), &right.columns))
    });
    Ok(keys)
}

/// Indexes created with `CREATE INDEX` (not the implicit ones backing
/// primary keys and unique constraints).
pub fn indexes(conn: &Connection, table: &str) -> Result<Vec<IndexDef>> {
    let table = require_table(conn, table)?;
    let mut stmt = conn
        .prepare(
            "SELECT name, \"unique\" FROM pragma_index_list(?1) \
             WHERE origin = 'c' ORDER BY name",
        )
        .map_err(SchemaError::sqlite(format!("list indexes of '{table}'")))?;
    let listed = stmt
        .query_map([&table], |row| Ok((row.get::<_, String>(0)?, row.get::<_, bool>(1)?)))
        .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
        .map_err(SchemaError::sqlite(format!("list indexes of '{table}'")))?;
    listed
        .into_iter()
        .map(|(name, unique)| {
            Ok(IndexDef {
                columns: index_columns(conn, &name)?,
                name,
                unique,
            })
        })
        .collect()
}

pub fn index_exists(conn: &Connection, name: &str) -> Result<bool> {
    conn.query_row(
        "SELECT 1 FROM sqlite_master WHERE type = 'index' AND name = ?1 COLLATE NOCASE",
        [name],
        |_| Ok(()),
    )
    .optional()
    .map(|found| found.is_some())
    .map_err(SchemaError::sqlite(format!("look up index '{name}'")))
}

pub fn row_count(conn: &Connection, table: &str) -> Result<u64> {
    conn.query_row(
        &format!("SELECT COUNT(*) FROM {}", quote_ident(table)),
        [],
        |row| row.get::<_, i64>(0),
    )
    .map(|count| count.max(0) as u64)
    .map_err(SchemaError::sqlite(format!("count rows of '{table}'")))
}

/// Replaces the stored table `def.name` with one built from `def`, keeping
/// the rows of every column the two definitions share.
pub fn rebuild_table(conn: &Connection, def: &TableDef) -> Result<()> {
    let current = describe_table(conn, &def.name)?;
    let shared: Vec<String> = def
        .columns
        .iter()
        .filter(|column| current.has_column(&column.name))
        .map(|column| column.name.clone())
        .collect();
    let index_sql = stored_index_sql(conn, &current.name)?;
    let shadow = format!("{}{}", current.name, SHADOW_SUFFIX);
    debug!("Rebuilding table '{}' via '{}'", current.name, shadow);

    conn.pragma_update(None, "foreign_keys", false)
        .map_err(SchemaError::sqlite("pause foreign key enforcement"))?;
    let outcome = rebuild_in_transaction(conn, def, &current.name, &shadow, &shared, &index_sql);
    let restored = conn
        .pragma_update(None, "foreign_keys", true)
        .map_err(SchemaError::sqlite("resume foreign key enforcement"));
    outcome.and(restored)
}

fn rebuild_in_transaction(
    conn: &Connection,
    def: &TableDef,
    table: &str,
    shadow: &str,
    shared: &[String],
    index_sql: &[String],
) -> Result<()> {
    let tx = conn
        .unchecked_transaction()
        .map_err(SchemaError::sqlite(format!("begin rebuild of '{table}'")))?;
    tx.execute_batch(&def.create_sql_named(shadow, false))
        .map_err(SchemaError::sqlite(format!("create shadow table for '{table}'")))?;
    if !shared.is_empty() {
        let columns = quote_list(shared);
        tx.execute(
            &format!(
                "INSERT INTO {} ({columns}) SELECT {columns} FROM {}",
                quote_ident(shadow),
                quote_ident(table)
            ),
            [],
        )
        .map_err(SchemaError::sqlite(format!("copy rows of '{table}'")))?;
    }
    tx.execute_batch(&format!(
        "DROP TABLE {}; ALTER TABLE {} RENAME TO {};",
        quote_ident(table),
        quote_ident(shadow),
        quote_ident(table)
    ))
    .map_err(SchemaError::sqlite(format!("swap rebuilt table '{table}'")))?;
    for sql in index_sql {
        tx.execute_batch(sql)
            .map_err(SchemaError::sqlite(format!("recreate index on '{table}'")))?;
    }
    let violations: i64 = tx
        .query_row(
            "SELECT COUNT(*) FROM pragma_foreign_key_check(?1)",
            [table],
            |row| row.get(0),
        )
        .map_err(SchemaError::sqlite(format!("check foreign keys of '{table}'")))?;
    if violations > 0 {
        return Err(SchemaError::ConstraintViolation {
            table: table.to_string(),
            rows: violations as usize,
        });
    }
    tx.commit()
        .map_err(SchemaError::sqlite(format!("commit rebuild of '{table}'")))
}

fn stored_index_sql(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare(
            "SELECT sql FROM sqlite_master \
             WHERE type = 'index' AND tbl_name = ?1 AND sql IS NOT NULL",
        )
        .map_err(SchemaError::sqlite(format!("read indexes of '{table}'")))?;
    stmt.query_map([table], |row| row.get::<_, String>(0))
        .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
        .map_err(SchemaError::sqlite(format!("read indexes of '{table}'")))
}

/// `ALTER TABLE ... ADD COLUMN`; fails with `DuplicateColumn` when present.
pub fn add_column(conn: &Connection, table: &str, column: &ColumnDef) -> Result<()> {
    let def = describe_table(conn, table)?;
    if def.has_column(&column.name) {
        return Err(SchemaError::DuplicateColumn {
            table: def.name,
            column: column.name.clone(),
        });
    }
    let sql = format!(
        "ALTER TABLE {} ADD COLUMN {}",
        quote_ident(&def.name),
        column.render()
    );
    debug!("{sql}");
    conn.execute_batch(&sql)
        .map_err(SchemaError::sqlite(format!("add column '{}.{}'", def.name, column.name)))
}

fn primary_key_exists(def: &TableDef) -> SchemaError {
    SchemaError::DuplicateConstraint {
        table: def.name.clone(),
        constraint: "PRIMARY KEY".to_string(),
    }
}

/// Makes an existing column the table's primary key. With `autoincrement`
/// the column becomes an `INTEGER` row id backed by a sequence.
pub fn promote_primary_key(
    conn: &Connection,
    table: &str,
    column: &str,
    autoincrement: bool,
) -> Result<()> {
    let mut def = describe_table(conn, table)?;
    if def.has_primary_key() {
        return Err(primary_key_exists(&def));
    }
    let Some(position) = def
        .columns
        .iter()
        .position(|existing| existing.name.eq_ignore_ascii_case(column))
    else {
        return Err(SchemaError::UnknownColumn {
            table: def.name,
            column: column.to_string(),
        });
    };
    if autoincrement {
        def.columns[position].decl_type = "INTEGER".to_string();
        def.columns[position].default = None;
    }
    def.primary_key = vec![def.columns[position].name.clone()];
    def.autoincrement = autoincrement;
    rebuild_table(conn, &def)
}

/// Appends an auto-numbered `INTEGER` key column; existing rows are numbered
/// in row id order.
pub fn add_surrogate_key(conn: &Connection, table: &str, column: &str) -> Result<()> {
    let mut def = describe_table(conn, table)?;
    if def.has_primary_key() {
        return Err(primary_key_exists(&def));
    }
    if def.has_column(column) {
        return Err(SchemaError::DuplicateColumn {
            table: def.name,
            column: column.to_string(),
        });
    }
    def.columns.push(ColumnDef::new(column, "INTEGER"));
    def.primary_key = vec![column.to_string()];
    def.autoincrement = true;
    rebuild_table(conn, &def)
}

pub fn add_foreign_key(conn: &Connection, table: &str, foreign_key: &ForeignKeyDef) -> Result<()> {
    let mut def = describe_table(conn, table)?;
    if let Some(name) = &foreign_key.name
        && def.foreign_keys.iter().any(|existing| existing.is_named(name))
    {
        return Err(SchemaError::DuplicateConstraint {
            table: def.name,
            constraint: name.clone(),
        });
    }
    if let Some(missing) = foreign_key
        .columns
        .iter()
        .find(|column| !def.has_column(column))
    {
        return Err(SchemaError::UnknownColumn {
            table: def.name,
            column: missing.clone(),
        });
    }
    require_table(conn, &foreign_key.ref_table)?;
    def.foreign_keys.push(foreign_key.clone());
    rebuild_table(conn, &def)
}

/// Drops the named constraint; `UnknownConstraint` when the table has none
/// by that name.
pub fn drop_foreign_key(conn: &Connection, table: &str, constraint: &str) -> Result<()> {
    let mut def = describe_table(conn, table)?;
    let Some(position) = def
        .foreign_keys
        .iter()
        .position(|existing| existing.is_named(constraint))
    else {
        return Err(SchemaError::UnknownConstraint {
            table: def.name,
            constraint: constraint.to_string(),
        });
    };
    def.foreign_keys.remove(position);
    rebuild_table(conn, &def)
}

/// `CREATE INDEX IF NOT EXISTS`. Returns whether a new index was created.
pub fn create_index(conn: &Connection, name: &str, table: &str, columns: &[&str]) -> Result<bool> {
    let def = describe_table(conn, table)?;
    if let Some(missing) = columns.iter().find(|column| !def.has_column(column)) {
        return Err(SchemaError::UnknownColumn {
            table: def.name,
            column: missing.to_string(),
        });
    }
    if index_exists(conn, name)? {
        return Ok(false);
    }
    let sql = format!(
        "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
        quote_ident(name),
        quote_ident(&def.name),
        quote_list(columns)
    );
    debug!("{sql}");
    conn.execute_batch(&sql)
        .map_err(SchemaError::sqlite(format!("create index '{name}'")))?;
    Ok(true)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableSnapshot {
    pub definition: TableDef,
    pub indexes: Vec<IndexDef>,
}

/// Structural state of every user table; two equal snapshots describe the
/// same schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaSnapshot {
    pub tables: Vec<TableSnapshot>,
}

impl SchemaSnapshot {
    pub fn capture(conn: &Connection) -> Result<Self> {
        let tables = list_tables(conn)?
            .iter()
            .map(|table| {
                Ok(TableSnapshot {
                    definition: describe_table(conn, table)?,
                    indexes: indexes(conn, table)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { tables })
    }
}
