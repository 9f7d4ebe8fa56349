mod common;

use assert_cmd::Command;
use common::{TestWorkspace, fixture_path, legacy_database};
use encoding_rs::WINDOWS_1252;
use predicates::str::contains;
use rusqlite::Connection;

fn cinema_loader(workspace: &TestWorkspace) -> Command {
    let mut cmd = Command::cargo_bin("cinema-loader").expect("binary exists");
    cmd.env_remove("CINEMA_DATASET")
        .env_remove("CINEMA_BATCH_SIZE")
        .env_remove("CINEMA_CHUNK_ROWS")
        .env("CINEMA_DATABASE", workspace.database());
    cmd
}

#[test]
fn provision_then_inspect_reports_the_schema() {
    let workspace = TestWorkspace::new();
    cinema_loader(&workspace).arg("provision").assert().success();

    cinema_loader(&workspace)
        .arg("inspect")
        .assert()
        .success()
        .stdout(contains("18 table(s), 0 row(s) in total"))
        .stdout(contains("22 foreign key(s)"))
        .stdout(contains("fk_payment_gateway"));
}

#[test]
fn import_fixture_and_report_json() {
    let workspace = TestWorkspace::new();
    cinema_loader(&workspace).arg("provision").assert().success();
    cinema_loader(&workspace)
        .args(["import", "--batch-size", "2", "--chunk-rows", "2", "--dataset"])
        .arg(fixture_path("cinema"))
        .assert()
        .success();

    let output = cinema_loader(&workspace)
        .args(["inspect", "--json"])
        .output()
        .expect("run inspect");
    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json report");
    assert_eq!(report["total_rows"], 23);
    assert_eq!(report["tables"].as_array().map(Vec::len), Some(19));
    assert_eq!(report["foreign_keys"].as_array().map(Vec::len), Some(22));
}

#[test]
fn commands_other_than_provision_need_an_existing_database() {
    let workspace = TestWorkspace::new();
    for command in ["import", "repair", "inspect"] {
        cinema_loader(&workspace)
            .arg(command)
            .assert()
            .failure()
            .stderr(contains("does not exist; run 'provision' first"));
    }
    assert!(!workspace.database().exists());
}

#[test]
fn batch_size_out_of_range_is_rejected() {
    let workspace = TestWorkspace::new();
    cinema_loader(&workspace)
        .args(["import", "--batch-size", "20000"])
        .assert()
        .failure()
        .stderr(contains("cannot exceed 10000"));
    cinema_loader(&workspace)
        .arg("import")
        .env("CINEMA_BATCH_SIZE", "0")
        .assert()
        .failure()
        .stderr(contains("at least 1"));
}

#[test]
fn forced_input_encoding_is_used_for_every_file() {
    let workspace = TestWorkspace::new();
    let mut bytes = b"user_id,name,email\n1,".to_vec();
    bytes.extend(WINDOWS_1252.encode("José Martín").0.iter());
    bytes.extend(b",jose@example.com\n");
    let dataset = workspace.path().join("dataset");
    workspace.write_bytes("dataset/users.csv", &bytes);

    cinema_loader(&workspace).arg("provision").assert().success();
    cinema_loader(&workspace)
        .args(["import", "--input-encoding", "latin1", "--dataset"])
        .arg(&dataset)
        .assert()
        .success();

    let conn = Connection::open(workspace.database()).expect("open");
    let name: String = conn
        .query_row("SELECT name FROM User WHERE user_id = 1", [], |row| row.get(0))
        .expect("user");
    assert_eq!(name, "José Martín");
}

#[test]
fn unknown_input_encoding_is_an_error() {
    let workspace = TestWorkspace::new();
    cinema_loader(&workspace).arg("provision").assert().success();
    cinema_loader(&workspace)
        .args(["import", "--input-encoding", "klingon"])
        .assert()
        .failure()
        .stderr(contains("Unknown encoding 'klingon'"));
}

#[test]
fn repair_runs_against_the_legacy_schema() {
    let workspace = TestWorkspace::new();
    drop(legacy_database(&workspace.database()));
    cinema_loader(&workspace)
        .env("RUST_LOG", "cinema_loader=info")
        .arg("repair")
        .assert()
        .success()
        .stderr(contains("Phase 5"))
        .stderr(contains("Total foreign keys found: 23"));
}
