//! The fixed cinema schema and the two ways tables get created: the whole
//! cross-referenced set in dependency order, or one table from an inferred
//! CSV schema.

use log::{debug, info, warn};
use rusqlite::Connection;
use serde::Serialize;

use crate::{
    catalog,
    ddl::{ColumnDef, FkAction, ForeignKeyDef, TableDef, quote_ident},
    error::SchemaError,
    inference::ColumnDescriptor,
};

fn required(name: &str, decl_type: &str) -> ColumnDef {
    ColumnDef::new(name, decl_type).not_null()
}

fn optional(name: &str, decl_type: &str) -> ColumnDef {
    ColumnDef::new(name, decl_type)
}

fn owned_by(name: &str, column: &str, parent: &str) -> ForeignKeyDef {
    ForeignKeyDef::new(name, column, parent, column, FkAction::Cascade)
}

fn optional_link(name: &str, column: &str, parent: &str) -> ForeignKeyDef {
    ForeignKeyDef::new(name, column, parent, column, FkAction::SetNull)
}

/// The 18 cinema tables in declaration order.
pub fn cinema_schema() -> Vec<TableDef> {
    vec![
        TableDef::with_serial_key(
            "Screen",
            "screen_id",
            vec![
                required("name", "VARCHAR(50)"),
                required("class_type", "VARCHAR(10)"),
                required("capacity", "INT"),
            ],
        ),
        TableDef::with_serial_key(
            "Seat",
            "seat_id",
            vec![
                required("screen_id", "INT"),
                required("seat_number", "VARCHAR(10)"),
            ],
        )
        .references(owned_by("fk_seat_screen", "screen_id", "Screen")),
        TableDef::with_serial_key(
            "Movie",
            "movie_id",
            vec![
                required("title", "VARCHAR(255)"),
                required("genre", "VARCHAR(50)"),
                required("rating", "DECIMAL(3,1)"),
                required("status", "VARCHAR(20)"),
                optional("poster_image_url", "VARCHAR(255)"),
            ],
        ),
        TableDef::with_serial_key(
            "MovieCast",
            "cast_id",
            vec![
                required("movie_id", "INT"),
                required("person_name", "VARCHAR(100)"),
                required("role", "VARCHAR(100)"),
            ],
        )
        .references(owned_by("fk_moviecast_movie", "movie_id", "Movie")),
        TableDef::with_serial_key(
            "Review",
            "review_id",
            vec![
                required("movie_id", "INT"),
                required("content", "TEXT"),
                required("review_date", "DATETIME"),
                required("reviewer_name", "VARCHAR(100)"),
            ],
        )
        .references(owned_by("fk_review_movie", "movie_id", "Movie")),
        TableDef::with_serial_key(
            "Show",
            "show_id",
            vec![
                required("screen_id", "INT"),
                required("movie_id", "INT"),
                required("show_datetime", "DATETIME"),
            ],
        )
        .references(owned_by("fk_show_screen", "screen_id", "Screen"))
        .references(owned_by("fk_show_movie", "movie_id", "Movie")),
        TableDef::with_serial_key(
            "ShowSeat",
            "show_seat_id",
            vec![
                required("show_id", "INT"),
                required("seat_id", "INT"),
                required("is_available", "BOOLEAN").with_default("1"),
            ],
        )
        .references(owned_by("fk_showseat_show", "show_id", "Show"))
        .references(owned_by("fk_showseat_seat", "seat_id", "Seat")),
        TableDef::with_serial_key(
            "User",
            "user_id",
            vec![
                required("name", "VARCHAR(100)"),
                required("email", "VARCHAR(150)"),
                optional("phone", "VARCHAR(15)"),
            ],
        ),
        TableDef::with_serial_key(
            "Membership",
            "membership_id",
            vec![
                required("user_id", "INT"),
                required("current_points", "INT").with_default("0"),
            ],
        )
        .references(owned_by("fk_membership_user", "user_id", "User")),
        TableDef::with_serial_key(
            "Booking",
            "booking_id",
            vec![
                required("user_id", "INT"),
                required("show_id", "INT"),
                required("booking_datetime", "DATETIME"),
                required("total_cost", "DECIMAL(10,2)"),
            ],
        )
        .references(owned_by("fk_booking_user", "user_id", "User"))
        .references(owned_by("fk_booking_show", "show_id", "Show")),
        TableDef::with_serial_key(
            "Ticket",
            "ticket_id",
            vec![
                required("booking_id", "INT"),
                required("show_seat_id", "INT"),
                required("qr_code", "VARCHAR(100)"),
                required("delivery_method", "VARCHAR(50)"),
                required("is_downloaded", "BOOLEAN").with_default("0"),
                optional("scanned_at", "DATETIME"),
            ],
        )
        .references(owned_by("fk_ticket_booking", "booking_id", "Booking"))
        .references(owned_by("fk_ticket_showseat", "show_seat_id", "ShowSeat")),
        TableDef::with_serial_key(
            "PaymentGateway",
            "gateway_id",
            vec![required("name", "VARCHAR(100)")],
        ),
        TableDef::with_serial_key(
            "Payment",
            "payment_id",
            vec![
                required("booking_id", "INT"),
                optional("gateway_id", "INT"),
                required("transaction_amount", "DECIMAL(10,2)"),
                required("transaction_datetime", "DATETIME"),
                required("status", "VARCHAR(20)"),
                optional("failure_reason", "TEXT"),
                optional("credit_card_name", "VARCHAR(100)"),
                optional("credit_card_number", "VARCHAR(20)"),
                optional("expiry_date", "DATE"),
                optional("cvv", "VARCHAR(4)"),
            ],
        )
        .references(owned_by("fk_payment_booking", "booking_id", "Booking"))
        .references(optional_link("fk_payment_gateway", "gateway_id", "PaymentGateway")),
        TableDef::with_serial_key(
            "FoodItem",
            "item_id",
            vec![
                required("name", "VARCHAR(100)"),
                optional("description", "TEXT"),
                required("is_combo", "BOOLEAN").with_default("0"),
            ],
        ),
        TableDef::with_serial_key(
            "FoodItemSize",
            "size_id",
            vec![
                required("item_id", "INT"),
                required("size_name", "VARCHAR(50)"),
                required("rate", "DECIMAL(10,2)"),
            ],
        )
        .references(owned_by("fk_fooditemsize_fooditem", "item_id", "FoodItem")),
        TableDef::with_serial_key(
            "FoodOrder",
            "order_id",
            vec![
                required("booking_id", "INT"),
                required("screen_id", "INT"),
                required("seat_id", "INT"),
                required("order_datetime", "DATETIME"),
                required("total_cost", "DECIMAL(10,2)"),
                required("delivery_method", "VARCHAR(50)"),
            ],
        )
        .references(owned_by("fk_foodorder_booking", "booking_id", "Booking"))
        .references(owned_by("fk_foodorder_screen", "screen_id", "Screen"))
        .references(owned_by("fk_foodorder_seat", "seat_id", "Seat")),
        TableDef::with_serial_key(
            "FoodOrderItem",
            "order_item_id",
            vec![
                required("order_id", "INT"),
                required("item_id", "INT"),
                optional("size_id", "INT"),
                required("quantity", "INT"),
                required("price_at_time", "DECIMAL(10,2)"),
            ],
        )
        .references(owned_by("fk_foodorderitem_foodorder", "order_id", "FoodOrder"))
        .references(owned_by("fk_foodorderitem_fooditem", "item_id", "FoodItem"))
        .references(optional_link(
            "fk_foodorderitem_fooditemsize",
            "size_id",
            "FoodItemSize",
        )),
        TableDef::with_serial_key(
            "PointsTransaction",
            "transaction_id",
            vec![
                required("user_id", "INT"),
                required("amount", "DECIMAL(10,2)"),
                required("points_earned", "INT"),
                required("transaction_datetime", "DATETIME"),
                required("transaction_type", "VARCHAR(20)"),
            ],
        )
        .references(owned_by("fk_pointstransaction_user", "user_id", "User")),
    ]
}

/// Orders tables so every table follows the tables it references. Among the
/// tables that are ready at each step the earliest declared goes first, so
/// the result is stable. References to tables outside `tables` are ignored.
pub fn dependency_order(tables: &[TableDef]) -> Result<Vec<&TableDef>, SchemaError> {
    let known = |name: &str| {
        tables
            .iter()
            .any(|table| table.name.eq_ignore_ascii_case(name))
    };
    let mut remaining: Vec<&TableDef> = tables.iter().collect();
    let mut ordered: Vec<&TableDef> = Vec::with_capacity(tables.len());
    while !remaining.is_empty() {
        let ready = remaining.iter().position(|table| {
            table.dependencies().into_iter().all(|parent| {
                !known(parent)
                    || ordered
                        .iter()
                        .any(|placed| placed.name.eq_ignore_ascii_case(parent))
            })
        });
        match ready {
            Some(index) => ordered.push(remaining.remove(index)),
            None => {
                return Err(SchemaError::DependencyCycle {
                    tables: remaining.iter().map(|table| table.name.clone()).collect(),
                });
            }
        }
    }
    Ok(ordered)
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProvisionReport {
    pub created: Vec<String>,
    pub existing: Vec<String>,
    /// `(table, error)` for each statement that failed.
    pub failed: Vec<(String, String)>,
}

impl ProvisionReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Creates every table of `tables` that does not exist yet, parents first.
/// A failing statement is logged and the remaining tables are still created.
pub fn provision_fixed(
    conn: &Connection,
    tables: &[TableDef],
) -> Result<ProvisionReport, SchemaError> {
    let ordered = dependency_order(tables)?;
    let mut report = ProvisionReport::default();
    for (index, table) in ordered.iter().enumerate() {
        if catalog::table_exists(conn, &table.name)? {
            debug!("Table '{}' already exists", table.name);
            report.existing.push(table.name.clone());
            continue;
        }
        let sql = table.create_sql(true);
        debug!("{sql}");
        match conn.execute_batch(&sql) {
            Ok(()) => {
                info!(
                    "Created table {}/{}: '{}'",
                    index + 1,
                    ordered.len(),
                    table.name
                );
                report.created.push(table.name.clone());
            }
            Err(err) => {
                warn!("Failed to create table '{}': {err}", table.name);
                report.failed.push((table.name.clone(), err.to_string()));
            }
        }
    }
    Ok(report)
}

/// Drops any table named `table` and creates it from inferred columns.
pub fn create_inferred_table(
    conn: &Connection,
    table: &str,
    columns: &[ColumnDescriptor],
) -> Result<(), SchemaError> {
    let def = TableDef::from_descriptors(table, columns);
    let sql = format!(
        "DROP TABLE IF EXISTS {};\n{};",
        quote_ident(table),
        def.create_sql(false)
    );
    debug!("{sql}");
    conn.execute_batch(&sql)
        .map_err(SchemaError::sqlite(format!("create table '{table}'")))?;
    info!("Table '{table}' created with {} column(s)", columns.len());
    Ok(())
}
