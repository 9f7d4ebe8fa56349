//! In-memory table definitions and the `CREATE TABLE` text rendered from them.
//!
//! A [`TableDef`] is what the catalog reads back from a live table and what the
//! provisioner declares for the fixed schema. Structural changes SQLite cannot
//! make with `ALTER TABLE` edit a `TableDef` and rebuild the table from it.

use std::fmt;

use serde::Serialize;

use crate::inference::ColumnDescriptor;

/// Wraps an identifier in double quotes, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub fn quote_list<S: AsRef<str>>(names: &[S]) -> String {
    names
        .iter()
        .map(|name| quote_ident(name.as_ref()))
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FkAction {
    NoAction,
    Restrict,
    SetNull,
    SetDefault,
    Cascade,
}

impl FkAction {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "CASCADE" => FkAction::Cascade,
            "SET NULL" => FkAction::SetNull,
            "SET DEFAULT" => FkAction::SetDefault,
            "RESTRICT" => FkAction::Restrict,
            _ => FkAction::NoAction,
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            FkAction::NoAction => "NO ACTION",
            FkAction::Restrict => "RESTRICT",
            FkAction::SetNull => "SET NULL",
            FkAction::SetDefault => "SET DEFAULT",
            FkAction::Cascade => "CASCADE",
        }
    }
}

impl fmt::Display for FkAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnDef {
    pub name: String,
    pub decl_type: String,
    pub not_null: bool,
    /// Default expression exactly as SQLite reports it.
    pub default: Option<String>,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, decl_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            decl_type: decl_type.into(),
            not_null: false,
            default: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    /// Column text for `CREATE TABLE` and `ALTER TABLE ... ADD COLUMN`.
    pub fn render(&self) -> String {
        let mut sql = quote_ident(&self.name);
        if !self.decl_type.is_empty() {
            sql.push(' ');
            sql.push_str(&self.decl_type);
        }
        if self.not_null {
            sql.push_str(" NOT NULL");
        }
        if let Some(default) = &self.default {
            sql.push_str(" DEFAULT ");
            sql.push_str(default);
        }
        sql
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForeignKeyDef {
    /// Constraint name; SQLite keeps it only in the table's SQL text.
    pub name: Option<String>,
    pub columns: Vec<String>,
    pub ref_table: String,
    /// Empty when the key references the parent's primary key implicitly.
    pub ref_columns: Vec<String>,
    pub on_update: FkAction,
    pub on_delete: FkAction,
}

impl ForeignKeyDef {
    pub fn new(
        name: &str,
        column: &str,
        ref_table: &str,
        ref_column: &str,
        on_delete: FkAction,
    ) -> Self {
        Self {
            name: Some(name.to_string()),
            columns: vec![column.to_string()],
            ref_table: ref_table.to_string(),
            ref_columns: vec![ref_column.to_string()],
            on_update: FkAction::Cascade,
            on_delete,
        }
    }

    pub fn is_named(&self, name: &str) -> bool {
        self.name
            .as_deref()
            .is_some_and(|own| own.eq_ignore_ascii_case(name))
    }

    pub fn render(&self) -> String {
        let mut sql = String::new();
        if let Some(name) = &self.name {
            sql.push_str("CONSTRAINT ");
            sql.push_str(&quote_ident(name));
            sql.push(' ');
        }
        sql.push_str(&format!(
            "FOREIGN KEY ({}) REFERENCES {}",
            quote_list(&self.columns),
            quote_ident(&self.ref_table)
        ));
        if !self.ref_columns.is_empty() {
            sql.push_str(&format!(" ({})", quote_list(&self.ref_columns)));
        }
        sql.push_str(&format!(
            " ON UPDATE {} ON DELETE {}",
            self.on_update, self.on_delete
        ));
        sql
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableDef {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    /// Primary key columns in key order; empty for a table without one.
    pub primary_key: Vec<String>,
    /// Single-column integer key backed by an AUTOINCREMENT sequence.
    pub autoincrement: bool,
    pub unique: Vec<Vec<String>>,
    pub foreign_keys: Vec<ForeignKeyDef>,
}

impl TableDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            autoincrement: false,
            unique: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    /// Builder for the fixed schema: an `INTEGER PRIMARY KEY AUTOINCREMENT`
    /// surrogate id followed by `columns`.
    pub fn with_serial_key(name: &str, key: &str, columns: Vec<ColumnDef>) -> Self {
        let mut table = TableDef::new(name);
        table.columns.push(ColumnDef::new(key, "INTEGER"));
        table.columns.extend(columns);
        table.primary_key = vec![key.to_string()];
        table.autoincrement = true;
        table
    }

    pub fn from_descriptors(name: &str, descriptors: &[ColumnDescriptor]) -> Self {
        let mut table = TableDef::new(name);
        table.columns = descriptors
            .iter()
            .map(|descriptor| ColumnDef::new(&descriptor.name, descriptor.sql_type.to_string()))
            .collect();
        table
    }

    pub fn references(mut self, foreign_key: ForeignKeyDef) -> Self {
        self.foreign_keys.push(foreign_key);
        self
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns
            .iter()
            .find(|column| column.name.eq_ignore_ascii_case(name))
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|column| column.name.clone()).collect()
    }

    pub fn has_primary_key(&self) -> bool {
        !self.primary_key.is_empty()
    }

    /// Tables this one references, excluding itself.
    pub fn dependencies(&self) -> Vec<&str> {
        let mut parents: Vec<&str> = Vec::new();
        for foreign_key in &self.foreign_keys {
            let parent = foreign_key.ref_table.as_str();
            if !parent.eq_ignore_ascii_case(&self.name)
                && !parents.iter().any(|seen| seen.eq_ignore_ascii_case(parent))
            {
                parents.push(parent);
            }
        }
        parents
    }

    fn inline_key(&self) -> Option<&str> {
        match self.primary_key.as_slice() {
            [key] if self.autoincrement => Some(key.as_str()),
            _ => None,
        }
    }

    pub fn create_sql(&self, if_not_exists: bool) -> String {
        self.create_sql_named(&self.name, if_not_exists)
    }

    /// `CREATE TABLE` text for this definition under another name, used for
    /// the shadow table of a rebuild.
    pub fn create_sql_named(&self, name: &str, if_not_exists: bool) -> String {
        let inline_key = self.inline_key();
        let mut parts: Vec<String> = self
            .columns
            .iter()
            .map(|column| {
                let mut rendered = column.render();
                if inline_key.is_some_and(|key| key.eq_ignore_ascii_case(&column.name)) {
                    rendered.push_str(" PRIMARY KEY AUTOINCREMENT");
                }
                rendered
            })
            .collect();
        if inline_key.is_none() && !self.primary_key.is_empty() {
            parts.push(format!("PRIMARY KEY ({})", quote_list(&self.primary_key)));
        }
        for unique in &self.unique {
            parts.push(format!("UNIQUE ({})", quote_list(unique)));
        }
        parts.extend(self.foreign_keys.iter().map(ForeignKeyDef::render));
        format!(
            "CREATE TABLE {}{} (\n    {}\n)",
            if if_not_exists { "IF NOT EXISTS " } else { "" },
            quote_ident(name),
            parts.join(",\n    ")
        )
    }
}
