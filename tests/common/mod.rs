#![allow(dead_code)]

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use rusqlite::Connection;
use tempfile::{TempDir, tempdir};

/// Returns the absolute path to a fixture under `tests/data`.
pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("data")
        .join(name)
}

/// Rows in the `tests/data/cinema` fixture files, by file.
pub const CINEMA_FIXTURE_ROWS: &[(&str, u64)] = &[
    ("Screen", 2),
    ("Movie", 2),
    ("Seat", 4),
    ("Show", 2),
    ("User", 3),
    ("Booking", 2),
    ("PaymentGateway", 2),
    ("Payment", 2),
    ("FoodItem", 2),
    ("promotions", 2),
];

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    /// Creates a fresh scratch directory for the current test case.
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    /// Returns the root path for all files owned by this workspace.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Database file path inside the workspace; the file is not created.
    pub fn database(&self) -> PathBuf {
        self.temp_dir.path().join("cinema.db")
    }

    /// Writes `contents` into a file under the workspace, creating parent
    /// directories, and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        self.write_bytes(name, contents.as_bytes())
    }

    pub fn write_bytes(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent directories");
        }
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents).expect("write temp file contents");
        path
    }
}

pub fn open_with_foreign_keys(path: &Path) -> Connection {
    let conn = Connection::open(path).expect("open database");
    conn.pragma_update(None, "foreign_keys", true)
        .expect("enable foreign keys");
    conn
}

pub fn count_rows(conn: &Connection, table: &str) -> u64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM \"{table}\""), [], |row| {
        row.get::<_, i64>(0)
    })
    .map(|count| count as u64)
    .expect("count rows")
}

/// The legacy snake_case schema as it looked before any repair: no keys,
/// several relation columns missing, a handful of consistent rows.
pub const LEGACY_SCHEMA: &str = "
CREATE TABLE users (user_id INT, name TEXT, email TEXT);
CREATE TABLE memberships (user_id INT, current_points INT);
CREATE TABLE reviews (content TEXT, review_date TEXT);
CREATE TABLE points_transactions (user_id INT, amount REAL);
CREATE TABLE movies (movie_id INT, title TEXT);
CREATE TABLE movie_casts (movie_id INT, person_name TEXT);
CREATE TABLE screens (screen_id INT, name TEXT);
CREATE TABLE shows (show_id INT, movie_id INT, screen_id INT, show_datetime TEXT);
CREATE TABLE seats (seat_id INT, screen_id INT, seat_number TEXT);
CREATE TABLE show_seats (show_seat_id INT, show_id INT, seat_id INT);
CREATE TABLE bookings (booking_id INT, user_id INT, show_id INT);
CREATE TABLE tickets (booking_id INT, show_seat_id INT, qr_code TEXT);
CREATE TABLE food_items (food_item_id INT, name TEXT);
CREATE TABLE food_item_sizes (size_id INT, size_name TEXT);
CREATE TABLE food_orders (food_order_id INT, total_cost REAL);
CREATE TABLE food_order_items (quantity INT);
CREATE TABLE payment_gateways (gateway_id INT, name TEXT);
CREATE TABLE payments (amount REAL, status TEXT);
CREATE INDEX idx_legacy_users_email ON users (email);

INSERT INTO users VALUES (1, 'Ana', 'ana@example.com'), (2, 'Ben', 'ben@example.com');
INSERT INTO memberships VALUES (1, 120);
INSERT INTO points_transactions VALUES (2, 15.5);
INSERT INTO movies VALUES (1, 'Heat');
INSERT INTO movie_casts VALUES (1, 'Al Pacino');
INSERT INTO screens VALUES (1, 'Audi 1');
INSERT INTO seats VALUES (1, 1, 'A1'), (2, 1, 'A2');
INSERT INTO shows VALUES (1, 1, 1, '2024-05-01 18:00:00');
INSERT INTO show_seats VALUES (1, 1, 1), (2, 1, 2);
INSERT INTO bookings VALUES (1, 1, 1);
INSERT INTO tickets VALUES (1, 1, 'QR-0001');
INSERT INTO food_items VALUES (1, 'Popcorn');
INSERT INTO payment_gateways VALUES (1, 'Stripe');
";

/// Creates the legacy database at `path`.
pub fn legacy_database(path: &Path) -> Connection {
    let conn = open_with_foreign_keys(path);
    conn.execute_batch(LEGACY_SCHEMA).expect("create legacy schema");
    conn
}
