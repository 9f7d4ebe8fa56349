mod common;

use std::path::PathBuf;

use cinema_loader::{
    catalog,
    config::Config,
    importer::run_import,
    loader::{LoadOptions, LoadPath, import_file},
    provision::{cinema_schema, provision_fixed},
};
use common::{CINEMA_FIXTURE_ROWS, TestWorkspace, count_rows, fixture_path, open_with_foreign_keys};
use encoding_rs::{UTF_8, WINDOWS_1252};
use rusqlite::Connection;

fn provisioned(workspace: &TestWorkspace) -> Connection {
    let conn = open_with_foreign_keys(&workspace.database());
    provision_fixed(&conn, &cinema_schema()).expect("provision");
    conn
}

fn config_for(workspace: &TestWorkspace, dataset: PathBuf) -> Config {
    let mut config = Config::new(workspace.database());
    config.dataset = dataset;
    config.batch_size = 2;
    config.chunk_rows = 3;
    config
}

#[test]
fn imports_the_cinema_fixture() {
    let workspace = TestWorkspace::new();
    let conn = provisioned(&workspace);
    let config = config_for(&workspace, fixture_path("cinema"));

    let summary = run_import(&conn, &config).expect("import");
    assert_eq!(summary.files_found, CINEMA_FIXTURE_ROWS.len());
    assert_eq!(summary.files_failed(), 0, "{:?}", summary.tables);
    for (table, rows) in CINEMA_FIXTURE_ROWS {
        assert_eq!(count_rows(&conn, table), *rows, "rows in {table}");
    }
    let expected_total: u64 = CINEMA_FIXTURE_ROWS.iter().map(|(_, rows)| rows).sum();
    assert_eq!(summary.total_rows, expected_total);

    let order: Vec<&str> = summary.tables.iter().map(|t| t.table.as_str()).collect();
    let position = |name: &str| order.iter().position(|t| *t == name).expect("table");
    assert!(position("Screen") < position("Seat"));
    assert!(position("Booking") < position("Payment"));
    assert_eq!(order.last(), Some(&"promotions"));
}

#[test]
fn payments_are_reconciled_against_the_table() {
    let workspace = TestWorkspace::new();
    let conn = provisioned(&workspace);
    run_import(&conn, &config_for(&workspace, fixture_path("cinema"))).expect("import");

    let gateways: Vec<Option<i64>> = conn
        .prepare("SELECT gateway_id FROM Payment ORDER BY payment_id")
        .expect("prepare")
        .query_map([], |row| row.get(0))
        .expect("query")
        .collect::<rusqlite::Result<_>>()
        .expect("rows");
    assert_eq!(gateways, vec![Some(1), None]);

    let cvv: Option<String> = conn
        .query_row("SELECT cvv FROM Payment WHERE payment_id = 1", [], |row| row.get(0))
        .expect("cvv");
    assert_eq!(cvv, None);

    let combo: i64 = conn
        .query_row("SELECT is_combo FROM FoodItem WHERE item_id = 2", [], |row| row.get(0))
        .expect("combo");
    assert_eq!(combo, 1);
}

#[test]
fn unknown_files_get_an_inferred_table() {
    let workspace = TestWorkspace::new();
    let conn = provisioned(&workspace);
    run_import(&conn, &config_for(&workspace, fixture_path("cinema"))).expect("import");

    let table = catalog::describe_table(&conn, "promotions").expect("promotions");
    let types: Vec<(&str, &str)> = table
        .columns
        .iter()
        .map(|column| (column.name.as_str(), column.decl_type.as_str()))
        .collect();
    assert_eq!(
        types,
        vec![
            ("code", "VARCHAR(56)"),
            ("discount", "DOUBLE"),
            ("starts_on", "DATETIME"),
        ]
    );
}

#[test]
fn row_counts_grow_by_the_rows_in_the_file() {
    let workspace = TestWorkspace::new();
    let conn = provisioned(&workspace);
    let screens = workspace.write(
        "screens.csv",
        "Name,Class Type,CAPACITY,extra\nAudi 1,IMAX,120,x\nAudi 2,2D,80,y\nAudi 3,3D,60,z\n",
    );
    let options = LoadOptions {
        batch_size: 2,
        chunk_rows: 2,
    };

    let first = import_file(&conn, &screens, "Screen", UTF_8, options).expect("first load");
    assert_eq!(first.path, LoadPath::Bulk);
    assert_eq!(first.final_count, first.initial_count + 3);
    assert_eq!(first.reconciliation.dropped, vec!["extra"]);
    assert_eq!(first.reconciliation.null_filled, vec!["screen_id"]);

    let second = import_file(&conn, &screens, "Screen", UTF_8, options).expect("second load");
    assert_eq!(second.initial_count, 3);
    assert_eq!(second.final_count, 6);
    assert!(!second.is_silent_failure());
}

#[test]
fn windows_1252_files_are_detected() {
    let workspace = TestWorkspace::new();
    let conn = provisioned(&workspace);
    let mut bytes = b"user_id,name,email\n1,".to_vec();
    bytes.extend(WINDOWS_1252.encode("José Martín").0.iter());
    bytes.extend(b",jose@example.com\n");
    workspace.write_bytes("dataset/users.csv", &bytes);

    let summary = run_import(&conn, &config_for(&workspace, workspace.path().join("dataset")))
        .expect("import");
    assert_eq!(summary.files_failed(), 0);
    assert_eq!(count_rows(&conn, "User"), 1);
}

#[test]
fn failed_files_do_not_stop_the_run() {
    let workspace = TestWorkspace::new();
    let conn = provisioned(&workspace);
    workspace.write(
        "dataset/seats.csv",
        "seat_id,screen_id,seat_number\n1,42,A1\n",
    );
    workspace.write(
        "dataset/screens.csv",
        "screen_id,name,class_type,capacity\n1,Audi 1,IMAX,120\n",
    );
    let summary = run_import(&conn, &config_for(&workspace, workspace.path().join("dataset")))
        .expect("import");
    assert_eq!(summary.files_failed(), 1);
    assert_eq!(count_rows(&conn, "Screen"), 1);
    assert_eq!(count_rows(&conn, "Seat"), 0);
    let seat = summary
        .tables
        .iter()
        .find(|table| table.table == "Seat")
        .expect("seat group");
    assert_eq!((seat.succeeded, seat.attempted), (0, 1));
}

#[test]
fn missing_dataset_yields_an_empty_summary() {
    let workspace = TestWorkspace::new();
    let conn = provisioned(&workspace);
    let summary =
        run_import(&conn, &config_for(&workspace, workspace.path().join("missing"))).expect("import");
    assert_eq!(summary.files_found, 0);
    assert_eq!(summary.total_rows, 0);
}
