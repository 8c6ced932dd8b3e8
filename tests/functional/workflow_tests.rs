//! Functional tests for end-to-end CLI workflows

use crate::common::{sample_data, CliTestRunner};
use tabrecon::ErrorCategory;

fn descriptor(kind: &str, path: &std::path::Path) -> String {
    format!("{}:{}", kind, path.display())
}

#[test]
fn test_compare_and_apply_workflow() {
    let runner = CliTestRunner::new().unwrap();
    let fixture = runner.fixture();
    let source = fixture.create_sqlite("source.db", sample_data::SOURCE_USERS).unwrap();
    let target = fixture.create_sqlite("target.db", sample_data::TARGET_USERS).unwrap();
    let source = descriptor("sqlite", source.path());
    let target_path = target.path().to_path_buf();
    let target_arg = descriptor("sqlite", &target_path);

    runner.expect_success(&["tables", &source]);
    runner.expect_success(&["compare", "users", &source, &target_arg]);
    runner.expect_success(&["compare", "users", &source, &target_arg, "--format", "json"]);

    // Dry run leaves the target alone
    runner.expect_success(&["apply", "users", &source, &target_arg, "--dry-run"]);
    assert_eq!(fixture.sqlite_count(&target, "users").unwrap(), 2);

    // Inserts only: id 2 arrives, id 3 stays
    runner.expect_success(&["apply", "users", &source, &target_arg, "--only", "insert"]);
    assert_eq!(fixture.sqlite_count(&target, "users").unwrap(), 3);

    runner.expect_success(&["apply", "users", &source, &target_arg]);
    assert_eq!(fixture.sqlite_count(&target, "users").unwrap(), 2);

    runner.expect_success(&["scan", &source, &target_arg, "--no-progress", "--format", "json"]);
}

#[test]
fn test_replace_into_csv_folder() {
    let runner = CliTestRunner::new().unwrap();
    let fixture = runner.fixture();
    let source = fixture.create_sqlite("source.db", sample_data::SOURCE_USERS).unwrap();
    let source = descriptor("sqlite", source.path());
    let exports = fixture.root().join("exports");
    let target = descriptor("csv", &exports);

    runner.expect_success(&["replace", "users", &source, &target]);
    assert!(exports.join("users.csv").is_file());
    runner.expect_success(&["compare", "users", &source, &target]);
}

#[test]
fn test_drop_requires_force() {
    let runner = CliTestRunner::new().unwrap();
    let fixture = runner.fixture();
    let conn = fixture.create_sqlite("target.db", sample_data::TARGET_USERS).unwrap();
    let conn_arg = descriptor("sqlite", conn.path());

    let err = runner.expect_failure(&["drop", &conn_arg, "users"]);
    assert_eq!(err.category(), ErrorCategory::Configuration);
    assert_eq!(fixture.sqlite_count(&conn, "users").unwrap(), 2);

    runner.expect_success(&["drop", &conn_arg, "users", "--force"]);
}

#[test]
fn test_stable_keys_command() {
    let runner = CliTestRunner::new().unwrap();
    let document = runner
        .fixture()
        .create_config_document("plant.xml", &sample_data::device_document("ObjA", 4, "10.0.0.1"))
        .unwrap();
    let path = document.path().display().to_string();

    runner.expect_success(&["stable-keys", &path]);
    runner.expect_success(&["stable-keys", &path, "--format", "json"]);
}

#[test]
fn test_invalid_arguments_fail() {
    let runner = CliTestRunner::new().unwrap();
    let fixture = runner.fixture();
    let source = fixture.create_sqlite("source.db", sample_data::SOURCE_USERS).unwrap();
    let source = descriptor("sqlite", source.path());

    let err = runner.expect_failure(&["compare", "users", &source, "nowhere.db"]);
    assert_eq!(err.category(), ErrorCategory::Configuration);

    let err = runner.expect_failure(&["apply", "users", &source, &source, "--only", "upsert"]);
    assert_eq!(err.category(), ErrorCategory::Configuration);

    let err = runner.expect_failure(&["tables", &source, "--format", "yaml"]);
    assert_eq!(err.category(), ErrorCategory::Configuration);
}
