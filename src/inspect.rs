use anyhow::{Context, Result};
use rusqlite::Connection;
use serde::Serialize;

use crate::{
    catalog,
    ddl::FkAction,
    error::SchemaError,
    table::{Align, render_table},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableSummary {
    pub name: String,
    pub rows: u64,
}

/// One foreign key as listed by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForeignKeyRow {
    pub table: String,
    pub constraint: String,
    pub columns: String,
    /// `parent(column, ...)`
    pub references: String,
    pub on_update: FkAction,
    pub on_delete: FkAction,
}

#[derive(Debug, Clone, Serialize)]
pub struct InspectReport {
    pub tables: Vec<TableSummary>,
    pub foreign_keys: Vec<ForeignKeyRow>,
    pub total_rows: u64,
}

/// Every foreign key in the database, ordered by table then constraint name.
pub fn foreign_key_rows(conn: &Connection) -> Result<Vec<ForeignKeyRow>, SchemaError> {
    let mut rows = Vec::new();
    for table in catalog::list_tables(conn)? {
        for key in catalog::describe_table(conn, &table)?.foreign_keys {
            rows.push(ForeignKeyRow {
                table: table.clone(),
                constraint: key.name.clone().unwrap_or_default(),
                columns: key.columns.join(", "),
                references: format!("{}({})", key.ref_table, key.ref_columns.join(", ")),
                on_update: key.on_update,
                on_delete: key.on_delete,
            });
        }
    }
    rows.sort_by(|left, right| {
        (&left.table, &left.constraint).cmp(&(&right.table, &right.constraint))
    });
    Ok(rows)
}

pub fn inspect(conn: &Connection) -> Result<InspectReport, SchemaError> {
    let tables = catalog::list_tables(conn)?
        .into_iter()
        .map(|name| {
            let rows = catalog::row_count(conn, &name)?;
            Ok(TableSummary { name, rows })
        })
        .collect::<Result<Vec<_>, SchemaError>>()?;
    let total_rows = tables.iter().map(|table| table.rows).sum();
    Ok(InspectReport {
        tables,
        foreign_keys: foreign_key_rows(conn)?,
        total_rows,
    })
}

impl InspectReport {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Serializing inspection report")
    }

    pub fn render_text(&self) -> String {
        let table_rows: Vec<Vec<String>> = self
            .tables
            .iter()
            .map(|table| vec![table.name.clone(), table.rows.to_string()])
            .collect();
        let mut output = render_table(&["table", "rows"], &[Align::Left, Align::Right], &table_rows);
        output.push_str(&format!(
            "\n{} table(s), {} row(s) in total\n",
            self.tables.len(),
            self.total_rows
        ));
        if !self.foreign_keys.is_empty() {
            let key_rows: Vec<Vec<String>> = self
                .foreign_keys
                .iter()
                .map(|key| {
                    vec![
                        key.table.clone(),
                        key.constraint.clone(),
                        key.columns.clone(),
                        key.references.clone(),
                        key.on_update.to_string(),
                        key.on_delete.to_string(),
                    ]
                })
                .collect();
            output.push('\n');
            output.push_str(&render_table(
                &["table", "constraint", "column", "references", "on update", "on delete"],
                &[],
                &key_rows,
            ));
        }
        output.push_str(&format!("\n{} foreign key(s)\n", self.foreign_keys.len()));
        output
    }
}
