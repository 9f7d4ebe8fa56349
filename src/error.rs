use rusqlite::Error as SqliteError;
use thiserror::Error;

use crate::data::ConversionError;

/// Errors raised by catalog introspection and schema changes.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to {operation}")]
    Sqlite {
        operation: String,
        #[source]
        source: SqliteError,
    },
    #[error("table '{table}' does not exist")]
    UnknownTable { table: String },
    #[error("column '{column}' does not exist in table '{table}'")]
    UnknownColumn { table: String, column: String },
    #[error("constraint '{constraint}' does not exist on table '{table}'")]
    UnknownConstraint { table: String, constraint: String },
    #[error("column '{column}' already exists in table '{table}'")]
    DuplicateColumn { table: String, column: String },
    #[error("constraint '{constraint}' already exists on table '{table}'")]
    DuplicateConstraint { table: String, constraint: String },
    #[error("{rows} row(s) of '{table}' violate foreign key constraints")]
    ConstraintViolation { table: String, rows: usize },
    #[error("tables {tables:?} form a foreign key cycle")]
    DependencyCycle { tables: Vec<String> },
}

impl SchemaError {
    pub(crate) fn sqlite(operation: impl Into<String>) -> impl FnOnce(SqliteError) -> Self {
        let operation = operation.into();
        move |source| SchemaError::Sqlite { operation, source }
    }

    /// The requested change is already in place.
    pub fn is_already_applied(&self) -> bool {
        matches!(
            self,
            SchemaError::DuplicateColumn { .. } | SchemaError::DuplicateConstraint { .. }
        )
    }

    /// The object a change refers to does not exist.
    pub fn is_missing_object(&self) -> bool {
        matches!(
            self,
            SchemaError::UnknownTable { .. }
                | SchemaError::UnknownColumn { .. }
                | SchemaError::UnknownConstraint { .. }
        )
    }
}

/// Errors raised while loading one CSV file into a table.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to {operation}")]
    Sqlite {
        operation: String,
        #[source]
        source: SqliteError,
    },
    #[error("failed to read CSV input")]
    Csv(#[from] csv::Error),
    #[error("failed to decode CSV input")]
    Decode(#[source] anyhow::Error),
    #[error("row {row}, column '{column}'")]
    Conversion {
        row: usize,
        column: String,
        #[source]
        source: ConversionError,
    },
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

impl LoadError {
    pub(crate) fn sqlite(operation: impl Into<String>) -> impl FnOnce(SqliteError) -> Self {
        let operation = operation.into();
        move |source| LoadError::Sqlite { operation, source }
    }
}
