//! Integration tests for the backends as seen through the service

use crate::common::{sample_data, service, TestFixture};
use std::fs;
use tabrecon::{
    BackendKind, CancellationToken, Capabilities, ConnectionDescriptor, DiffType, ErrorCategory, RowPair,
};

#[test]
fn test_sqlite_and_csv_hash_identically() {
    let fixture = TestFixture::new().unwrap();
    let source = fixture
        .create_sqlite(
            "source.db",
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT);
             INSERT INTO users VALUES (1, 'a');
             INSERT INTO users VALUES (2, 'b');",
        )
        .unwrap();
    let target = fixture
        .create_csv_table("exports", "users", &sample_data::users_csv())
        .unwrap();
    let service = service();

    let comparison = service
        .compare_one("users", &source, &target, &CancellationToken::new())
        .unwrap()
        .completed()
        .unwrap();
    assert!(comparison.pairs.is_empty(), "{:?}", comparison.pairs);

    let bulk = service
        .compare_many(&[], &source, &target, &CancellationToken::new(), None)
        .unwrap()
        .completed()
        .unwrap();
    assert_eq!(bulk.summaries.len(), 1);
    assert!(!bulk.summaries[0].has_changes());
    assert!(bulk.failures.is_empty());
}

#[test]
fn test_streamed_scan_agrees_with_full_comparison() {
    let fixture = TestFixture::new().unwrap();
    let source = fixture.create_sqlite("source.db", sample_data::SOURCE_USERS).unwrap();
    let target = fixture
        .create_csv_table(
            "exports",
            "users",
            &[vec!["id", "name"], vec!["1", "changed"], vec!["3", "c"]],
        )
        .unwrap();
    let service = service();

    let comparison = service
        .compare_one("users", &source, &target, &CancellationToken::new())
        .unwrap()
        .completed()
        .unwrap();
    let full = comparison.summary();

    let bulk = service
        .compare_many(&["users".to_string()], &source, &target, &CancellationToken::new(), None)
        .unwrap()
        .completed()
        .unwrap();
    let streamed = &bulk.summaries[0];

    assert_eq!(full.only_in_source_count, 1);
    assert_eq!(full.only_in_target_count, 1);
    assert_eq!(full.different_count, 1);
    assert_eq!(streamed.only_in_source_count, full.only_in_source_count);
    assert_eq!(streamed.only_in_target_count, full.only_in_target_count);
    assert_eq!(streamed.different_count, full.different_count);
}

#[test]
fn test_apply_to_csv_rewrites_file() {
    let fixture = TestFixture::new().unwrap();
    let source = fixture.create_sqlite("source.db", sample_data::SOURCE_USERS).unwrap();
    let target = fixture
        .create_csv_table("exports", "users", &[vec!["id", "name"], vec!["1", "a"], vec!["3", "c"]])
        .unwrap();
    let service = service();
    let cancel = CancellationToken::new();

    let comparison = service.compare_one("users", &source, &target, &cancel).unwrap().completed().unwrap();
    let stats = service
        .apply(&target, "users", &comparison.schema, &comparison.key.columns, &comparison.pairs)
        .unwrap();
    assert_eq!((stats.inserted, stats.updated, stats.deleted), (1, 0, 1));

    let content = fs::read_to_string(target.path().join("users.csv")).unwrap();
    assert_eq!(content, "id,name\n1,a\n2,b\n");

    let again = service.compare_one("users", &source, &target, &cancel).unwrap().completed().unwrap();
    assert!(again.pairs.is_empty());
}

#[test]
fn test_replace_creates_sqlite_table() {
    let fixture = TestFixture::new().unwrap();
    let source = fixture.create_csv_table("exports", "people", &sample_data::users_csv()).unwrap();
    let target = ConnectionDescriptor::new(BackendKind::Sqlite, fixture.root().join("fresh.db"));
    let service = service();
    let cancel = CancellationToken::new();

    let snapshot = service.load_table(&source, "people", &cancel).unwrap().completed().unwrap();
    service.replace(&target, "people", &snapshot).unwrap();

    assert_eq!(fixture.sqlite_count(&target, "people").unwrap(), 2);
    assert_eq!(service.list_tables(&target).unwrap(), vec!["people".to_string()]);
}

#[test]
fn test_read_only_backends_reject_writes() {
    let fixture = TestFixture::new().unwrap();
    let service = service();
    let workbook = ConnectionDescriptor::new(BackendKind::Workbook, fixture.root().join("book.xlsx"));
    let parquet = ConnectionDescriptor::new(BackendKind::ParquetFolder, fixture.root());
    let config = ConnectionDescriptor::new(BackendKind::ConfigTree, fixture.root());

    for conn in [&workbook, &parquet, &config] {
        let caps = service.capabilities(conn).unwrap();
        assert!(caps.contains(Capabilities::READ));
        assert!(!caps.contains(Capabilities::APPLY_ROW_CHANGES));

        let err = service
            .apply(conn, "t", &[], &["id".to_string()], &[RowPair::only_in_source(Vec::new())])
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Unsupported, "{}", conn);
        assert_eq!(service.drop_table(conn, "t").unwrap_err().category(), ErrorCategory::Unsupported);
    }
}

#[test]
fn test_missing_database_is_backend_unavailable() {
    let fixture = TestFixture::new().unwrap();
    let conn = ConnectionDescriptor::new(BackendKind::Sqlite, fixture.root().join("absent.db"));
    let err = service().list_tables(&conn).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::BackendUnavailable);
    assert!(!fixture.root().join("absent.db").exists());
}

#[test]
fn test_config_tree_documents_compare_by_stable_key() {
    let fixture = TestFixture::new().unwrap();
    let source = fixture
        .create_config_document("obj_a.xml", &sample_data::device_document("ObjA", 4, "10.0.0.1"))
        .unwrap();
    let matching = fixture
        .create_config_document("obj_b.xml", &sample_data::device_document("ObjB", 2, "10.0.0.1"))
        .unwrap();
    let differing = fixture
        .create_config_document("obj_c.xml", &sample_data::device_document("ObjC", 7, "10.0.0.9"))
        .unwrap();
    let service = service();
    let cancel = CancellationToken::new();

    let same = service.compare_one("Device", &source, &matching, &cancel).unwrap().completed().unwrap();
    assert_eq!(same.key.columns, vec!["Key".to_string()]);
    assert!(same.pairs.is_empty());

    let changed = service.compare_one("Device", &source, &differing, &cancel).unwrap().completed().unwrap();
    assert_eq!(changed.pairs.len(), 1);
    assert_eq!(changed.pairs[0].diff_type, DiffType::Different);
    assert_eq!(changed.pairs[0].source.as_ref().unwrap()[0].to_string(), "Group|R1|S3");
    assert_eq!(changed.pairs[0].changed_columns(&changed.schema), vec!["ip"]);
}
