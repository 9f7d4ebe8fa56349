//! Repair routine for the legacy snake_case cinema schema.
//!
//! The legacy database was loaded without keys: several tables lack the
//! columns later relations need, none has a primary key, and no foreign keys
//! exist. The routine runs six numbered phases:
//!
//! 1. add missing columns and turn legacy ids into auto-numbered keys
//! 2. add primary keys (promote a column or append a surrogate key)
//! 3. create the indexes backing every relation
//! 4. verify that the structure now supports the relations
//! 5. drop every named foreign key, then add them all back
//! 6. list the foreign keys that resulted
//!
//! Every change is idempotent or is skipped when already in place, so running
//! the routine twice leaves the same schema. Foreign keys are dropped before
//! being added because adding a constraint whose name already exists fails.
//! Per-statement failures are logged and recorded; the run carries on.

use std::fmt;

use log::{debug, info, warn};
use rusqlite::Connection;
use serde::Serialize;

use crate::{
    catalog,
    ddl::{ColumnDef, FkAction, ForeignKeyDef},
    error::SchemaError,
    inspect::{self, ForeignKeyRow},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnChange {
    /// Add an `INT` column. Required columns default to 0 on existing rows.
    Add {
        table: &'static str,
        column: &'static str,
        required: bool,
    },
    /// Make an existing id column an auto-numbered integer key.
    AutoIncrement {
        table: &'static str,
        column: &'static str,
    },
}

pub const COLUMN_CHANGES: &[ColumnChange] = &[
    auto_increment("users", "user_id"),
    add("reviews", "user_id", true),
    add("reviews", "movie_id", true),
    auto_increment("movies", "movie_id"),
    auto_increment("food_items", "food_item_id"),
    auto_increment("food_item_sizes", "size_id"),
    add("food_item_sizes", "food_item_id", true),
    auto_increment("food_orders", "food_order_id"),
    add("food_orders", "user_id", true),
    add("food_order_items", "food_order_id", true),
    add("food_order_items", "food_item_id", true),
    add("food_order_items", "size_id", false),
    add("payments", "user_id", true),
    add("payments", "gateway_id", false),
    add("payments", "booking_id", false),
    add("payments", "food_order_id", false),
];

const fn add(table: &'static str, column: &'static str, required: bool) -> ColumnChange {
    ColumnChange::Add {
        table,
        column,
        required,
    }
}

const fn auto_increment(table: &'static str, column: &'static str) -> ColumnChange {
    ColumnChange::AutoIncrement { table, column }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyChange {
    /// Use an existing column as the primary key.
    Promote {
        table: &'static str,
        column: &'static str,
    },
    /// Append a new auto-numbered key column.
    Surrogate {
        table: &'static str,
        column: &'static str,
    },
}

pub const KEY_CHANGES: &[KeyChange] = &[
    promote("users", "user_id"),
    promote("memberships", "user_id"),
    surrogate("reviews", "review_id"),
    surrogate("points_transactions", "transaction_id"),
    promote("movies", "movie_id"),
    surrogate("movie_casts", "cast_id"),
    promote("screens", "screen_id"),
    promote("shows", "show_id"),
    promote("seats", "seat_id"),
    promote("show_seats", "show_seat_id"),
    promote("bookings", "booking_id"),
    surrogate("tickets", "ticket_id"),
    promote("food_items", "food_item_id"),
    promote("food_item_sizes", "size_id"),
    promote("food_orders", "food_order_id"),
    surrogate("food_order_items", "item_id"),
    promote("payment_gateways", "gateway_id"),
    surrogate("payments", "payment_id"),
];

const fn promote(table: &'static str, column: &'static str) -> KeyChange {
    KeyChange::Promote { table, column }
}

const fn surrogate(table: &'static str, column: &'static str) -> KeyChange {
    KeyChange::Surrogate { table, column }
}

/// `(index, table, column)`
pub const INDEXES: &[(&str, &str, &str)] = &[
    ("idx_memberships_user", "memberships", "user_id"),
    ("idx_reviews_user", "reviews", "user_id"),
    ("idx_reviews_movie", "reviews", "movie_id"),
    ("idx_points_user", "points_transactions", "user_id"),
    ("idx_cast_movie", "movie_casts", "movie_id"),
    ("idx_shows_movie", "shows", "movie_id"),
    ("idx_shows_screen", "shows", "screen_id"),
    ("idx_seats_screen", "seats", "screen_id"),
    ("idx_show_seats_show", "show_seats", "show_id"),
    ("idx_show_seats_seat", "show_seats", "seat_id"),
    ("idx_bookings_user", "bookings", "user_id"),
    ("idx_bookings_show", "bookings", "show_id"),
    ("idx_tickets_booking", "tickets", "booking_id"),
    ("idx_tickets_seat", "tickets", "show_seat_id"),
    ("idx_food_sizes_item", "food_item_sizes", "food_item_id"),
    ("idx_food_orders_user", "food_orders", "user_id"),
    ("idx_food_order_items_order", "food_order_items", "food_order_id"),
    ("idx_food_order_items_food", "food_order_items", "food_item_id"),
    ("idx_food_order_items_size", "food_order_items", "size_id"),
    ("idx_payments_user", "payments", "user_id"),
    ("idx_payments_gateway", "payments", "gateway_id"),
    ("idx_payments_booking", "payments", "booking_id"),
    ("idx_payments_food_order", "payments", "food_order_id"),
];

/// Columns each table must have before foreign keys can be added.
pub const REQUIRED_COLUMNS: &[(&str, &[&str])] = &[
    ("users", &["user_id"]),
    ("memberships", &["user_id"]),
    ("reviews", &["user_id", "movie_id"]),
    ("points_transactions", &["user_id"]),
    ("movies", &["movie_id"]),
    ("movie_casts", &["movie_id"]),
    ("screens", &["screen_id"]),
    ("shows", &["movie_id", "screen_id", "show_id"]),
    ("seats", &["seat_id", "screen_id"]),
    ("show_seats", &["show_id", "seat_id", "show_seat_id"]),
    ("bookings", &["booking_id", "user_id", "show_id"]),
    ("tickets", &["booking_id", "show_seat_id"]),
    ("food_items", &["food_item_id"]),
    ("food_item_sizes", &["food_item_id", "size_id"]),
    ("food_orders", &["food_order_id", "user_id"]),
    ("food_order_items", &["food_order_id", "food_item_id", "size_id"]),
    ("payment_gateways", &["gateway_id"]),
    ("payments", &["user_id", "gateway_id", "booking_id", "food_order_id"]),
];

/// A relation of the legacy schema: `child.column` references
/// `parent.column` under the constraint `name`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LegacyForeignKey {
    pub name: &'static str,
    pub table: &'static str,
    pub column: &'static str,
    pub parent: &'static str,
    pub on_delete: FkAction,
}

impl LegacyForeignKey {
    pub fn definition(&self) -> ForeignKeyDef {
        ForeignKeyDef::new(self.name, self.column, self.parent, self.column, self.on_delete)
    }
}

const fn cascade(
    name: &'static str,
    table: &'static str,
    column: &'static str,
    parent: &'static str,
) -> LegacyForeignKey {
    LegacyForeignKey {
        name,
        table,
        column,
        parent,
        on_delete: FkAction::Cascade,
    }
}

const fn set_null(
    name: &'static str,
    table: &'static str,
    column: &'static str,
    parent: &'static str,
) -> LegacyForeignKey {
    LegacyForeignKey {
        name,
        table,
        column,
        parent,
        on_delete: FkAction::SetNull,
    }
}

pub const FOREIGN_KEYS: &[LegacyForeignKey] = &[
    cascade("fk_memberships_users", "memberships", "user_id", "users"),
    cascade("fk_reviews_users", "reviews", "user_id", "users"),
    cascade("fk_points_transactions_users", "points_transactions", "user_id", "users"),
    cascade("fk_reviews_movies", "reviews", "movie_id", "movies"),
    cascade("fk_movie_casts_movies", "movie_casts", "movie_id", "movies"),
    cascade("fk_shows_movies", "shows", "movie_id", "movies"),
    cascade("fk_shows_screens", "shows", "screen_id", "screens"),
    cascade("fk_seats_screens", "seats", "screen_id", "screens"),
    cascade("fk_show_seats_shows", "show_seats", "show_id", "shows"),
    cascade("fk_show_seats_seats", "show_seats", "seat_id", "seats"),
    cascade("fk_bookings_users", "bookings", "user_id", "users"),
    cascade("fk_bookings_shows", "bookings", "show_id", "shows"),
    cascade("fk_tickets_bookings", "tickets", "booking_id", "bookings"),
    cascade("fk_tickets_show_seats", "tickets", "show_seat_id", "show_seats"),
    cascade("fk_food_item_sizes_food_items", "food_item_sizes", "food_item_id", "food_items"),
    cascade("fk_food_orders_users", "food_orders", "user_id", "users"),
    cascade("fk_food_order_items_food_orders", "food_order_items", "food_order_id", "food_orders"),
    cascade("fk_food_order_items_food_items", "food_order_items", "food_item_id", "food_items"),
    set_null("fk_food_order_items_food_item_sizes", "food_order_items", "size_id", "food_item_sizes"),
    cascade("fk_payments_users", "payments", "user_id", "users"),
    set_null("fk_payments_payment_gateways", "payments", "gateway_id", "payment_gateways"),
    set_null("fk_payments_bookings", "payments", "booking_id", "bookings"),
    set_null("fk_payments_food_orders", "payments", "food_order_id", "food_orders"),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum StructureIssue {
    MissingTable { table: String },
    MissingColumn { table: String, column: String },
    MissingPrimaryKey { table: String },
}

impl fmt::Display for StructureIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StructureIssue::MissingTable { table } => write!(f, "table {table} is missing"),
            StructureIssue::MissingColumn { table, column } => {
                write!(f, "column {column} is missing in table {table}")
            }
            StructureIssue::MissingPrimaryKey { table } => {
                write!(f, "table {table} has no primary key")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepairFailure {
    pub phase: u8,
    pub target: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RepairReport {
    pub columns_added: Vec<String>,
    pub primary_keys_added: Vec<String>,
    pub indexes_created: Vec<String>,
    pub foreign_keys_dropped: Vec<String>,
    pub foreign_keys_added: Vec<String>,
    pub failures: Vec<RepairFailure>,
    /// Structure problems found in phase 4; foreign keys are skipped when
    /// any remain.
    pub issues: Vec<StructureIssue>,
    /// Foreign keys present after phase 6.
    pub foreign_keys: Vec<ForeignKeyRow>,
}

impl RepairReport {
    /// Whether any column, key or index was added by this run.
    pub fn changed_structure(&self) -> bool {
        !(self.columns_added.is_empty()
            && self.primary_keys_added.is_empty()
            && self.indexes_created.is_empty())
    }

    fn fail(&mut self, phase: u8, target: String, err: &SchemaError) {
        warn!("Phase {phase}: {target} failed: {err:#}");
        self.failures.push(RepairFailure {
            phase,
            target,
            error: err.to_string(),
        });
    }
}

pub fn run_repair(conn: &Connection) -> Result<RepairReport, SchemaError> {
    let mut report = RepairReport::default();

    info!("=== Phase 1: adding missing columns ===");
    add_missing_columns(conn, &mut report);

    info!("=== Phase 2: adding primary keys ===");
    add_primary_keys(conn, &mut report);

    info!("=== Phase 3: adding indexes ===");
    add_indexes(conn, &mut report);

    info!("=== Phase 4: verifying structure ===");
    report.issues = check_structure(conn)?;
    for issue in &report.issues {
        warn!("{issue}");
    }

    if report.issues.is_empty() {
        info!("=== Phase 5: replacing foreign keys ===");
        drop_foreign_keys(conn, &mut report);
        add_foreign_keys(conn, &mut report);
    } else {
        warn!(
            "Skipping foreign keys: {} structure issue(s) remain",
            report.issues.len()
        );
    }

    info!("=== Phase 6: verifying foreign keys ===");
    report.foreign_keys = inspect::foreign_key_rows(conn)?;
    for row in &report.foreign_keys {
        info!(
            "Table: {}, Constraint: {}, References: {}",
            row.table, row.constraint, row.references
        );
    }
    info!("Total foreign keys found: {}", report.foreign_keys.len());
    Ok(report)
}

fn add_missing_columns(conn: &Connection, report: &mut RepairReport) {
    for change in COLUMN_CHANGES {
        let (target, outcome) = match *change {
            ColumnChange::Add {
                table,
                column,
                required,
            } => {
                let mut def = ColumnDef::new(column, "INT");
                if required {
                    def = def.not_null().with_default("0");
                }
                (
                    format!("{table}.{column}"),
                    catalog::add_column(conn, table, &def),
                )
            }
            ColumnChange::AutoIncrement { table, column } => (
                format!("{table}.{column} (auto-increment)"),
                catalog::promote_primary_key(conn, table, column, true),
            ),
        };
        match outcome {
            Ok(()) => {
                info!("Added {target}");
                report.columns_added.push(target);
            }
            Err(err) if err.is_already_applied() => debug!("{target} already in place"),
            Err(err) => report.fail(1, target, &err),
        }
    }
}

fn add_primary_keys(conn: &Connection, report: &mut RepairReport) {
    for change in KEY_CHANGES {
        let (table, column, outcome) = match *change {
            KeyChange::Promote { table, column } => (
                table,
                column,
                catalog::promote_primary_key(conn, table, column, false),
            ),
            KeyChange::Surrogate { table, column } => {
                (table, column, catalog::add_surrogate_key(conn, table, column))
            }
        };
        let target = format!("{table}({column})");
        match outcome {
            Ok(()) => {
                info!("Added primary key {target}");
                report.primary_keys_added.push(target);
            }
            Err(err) if err.is_already_applied() => debug!("{table} already has a primary key"),
            Err(err) => report.fail(2, target, &err),
        }
    }
}

fn add_indexes(conn: &Connection, report: &mut RepairReport) {
    for (name, table, column) in INDEXES {
        match catalog::create_index(conn, name, table, &[*column]) {
            Ok(true) => {
                info!("Created index {name} on {table}({column})");
                report.indexes_created.push(name.to_string());
            }
            Ok(false) => debug!("Index {name} already exists"),
            Err(err) => report.fail(3, name.to_string(), &err),
        }
    }
}

/// Checks every required table for its columns and a primary key.
pub fn check_structure(conn: &Connection) -> Result<Vec<StructureIssue>, SchemaError> {
    let mut issues = Vec::new();
    for (table, columns) in REQUIRED_COLUMNS {
        if !catalog::table_exists(conn, table)? {
            issues.push(StructureIssue::MissingTable {
                table: table.to_string(),
            });
            continue;
        }
        let def = catalog::describe_table(conn, table)?;
        for column in columns.iter().filter(|column| !def.has_column(column)) {
            issues.push(StructureIssue::MissingColumn {
                table: table.to_string(),
                column: column.to_string(),
            });
        }
        if !def.has_primary_key() {
            issues.push(StructureIssue::MissingPrimaryKey {
                table: table.to_string(),
            });
        }
    }
    Ok(issues)
}

fn drop_foreign_keys(conn: &Connection, report: &mut RepairReport) {
    for key in FOREIGN_KEYS {
        match catalog::drop_foreign_key(conn, key.table, key.name) {
            Ok(()) => {
                debug!("Dropped {} on {}", key.name, key.table);
                report.foreign_keys_dropped.push(key.name.to_string());
            }
            // Dropping a constraint that is not there is the expected case on
            // a first run.
            Err(err) if err.is_missing_object() => debug!("{} not present: {err}", key.name),
            Err(err) => report.fail(5, key.name.to_string(), &err),
        }
    }
}

fn add_foreign_keys(conn: &Connection, report: &mut RepairReport) {
    for key in FOREIGN_KEYS {
        match catalog::add_foreign_key(conn, key.table, &key.definition()) {
            Ok(()) => {
                info!(
                    "Added {} ({}.{} -> {}.{})",
                    key.name, key.table, key.column, key.parent, key.column
                );
                report.foreign_keys_added.push(key.name.to_string());
            }
            Err(err) => report.fail(5, key.name.to_string(), &err),
        }
    }
}
