//! Functional tests for compare-then-apply reconciliation

use crate::common::{sample_data, service, TestFixture};
use tabrecon::backend::config_tree::parse_document;
use tabrecon::stabilizer::KeyStabilizer;
use tabrecon::{CancellationToken, ComparisonService, DiffType, ErrorCategory, ReconConfig};

#[test]
fn test_apply_then_compare_is_clean() {
    let fixture = TestFixture::new().unwrap();
    let source = fixture.create_sqlite("source.db", sample_data::SOURCE_USERS).unwrap();
    let target = fixture.create_sqlite("target.db", sample_data::TARGET_USERS).unwrap();
    let service = service();
    let cancel = CancellationToken::new();

    let comparison = service.compare_one("users", &source, &target, &cancel).unwrap().completed().unwrap();
    assert_eq!(comparison.pairs.len(), 2);

    let stats = service
        .apply(&target, "users", &comparison.schema, &comparison.key.columns, &comparison.pairs)
        .unwrap();
    assert_eq!((stats.inserted, stats.updated, stats.deleted), (1, 0, 1));

    let after = service.compare_one("users", &source, &target, &cancel).unwrap().completed().unwrap();
    assert!(after.pairs.is_empty());
}

#[test]
fn test_reapplying_the_same_pairs_is_idempotent() {
    let fixture = TestFixture::new().unwrap();
    let source = fixture
        .create_sqlite(
            "source.db",
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT, score REAL);
             INSERT INTO users VALUES (1, 'a', 1.5);
             INSERT INTO users VALUES (2, 'b', NULL);",
        )
        .unwrap();
    let target = fixture
        .create_sqlite(
            "target.db",
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT, score REAL);
             INSERT INTO users VALUES (1, 'a', 9.0);
             INSERT INTO users VALUES (3, 'c', 2.0);",
        )
        .unwrap();
    let service = service();
    let cancel = CancellationToken::new();

    let comparison = service.compare_one("users", &source, &target, &cancel).unwrap().completed().unwrap();
    for _ in 0..2 {
        service
            .apply(&target, "users", &comparison.schema, &comparison.key.columns, &comparison.pairs)
            .unwrap();
    }

    let after = service.compare_one("users", &source, &target, &cancel).unwrap().completed().unwrap();
    assert!(after.pairs.is_empty());
    assert_eq!(fixture.sqlite_count(&target, "users").unwrap(), 2);
}

#[test]
fn test_partial_approval_applies_only_selected_pairs() {
    let fixture = TestFixture::new().unwrap();
    let source = fixture.create_sqlite("source.db", sample_data::SOURCE_USERS).unwrap();
    let target = fixture.create_sqlite("target.db", sample_data::TARGET_USERS).unwrap();
    let service = service();
    let cancel = CancellationToken::new();

    let comparison = service.compare_one("users", &source, &target, &cancel).unwrap().completed().unwrap();
    let approved: Vec<_> = comparison
        .pairs
        .iter()
        .filter(|p| p.diff_type == DiffType::OnlyInSource)
        .cloned()
        .collect();
    service
        .apply(&target, "users", &comparison.schema, &comparison.key.columns, &approved)
        .unwrap();

    let after = service.compare_one("users", &source, &target, &cancel).unwrap().completed().unwrap();
    assert_eq!(after.pairs.len(), 1);
    assert_eq!(after.pairs[0].diff_type, DiffType::OnlyInTarget);
}

#[test]
fn test_failed_apply_rolls_back() {
    let fixture = TestFixture::new().unwrap();
    let source = fixture
        .create_sqlite(
            "source.db",
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT);
             INSERT INTO users VALUES (1, 'a');
             INSERT INTO users VALUES (2, NULL);",
        )
        .unwrap();
    let target = fixture
        .create_sqlite(
            "target.db",
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
             INSERT INTO users VALUES (5, 'e');",
        )
        .unwrap();
    let service = service();
    let cancel = CancellationToken::new();

    let comparison = service.compare_one("users", &source, &target, &cancel).unwrap().completed().unwrap();
    let err = service
        .apply(&target, "users", &comparison.schema, &comparison.key.columns, &comparison.pairs)
        .unwrap_err();

    assert_eq!(err.category(), ErrorCategory::ApplyFailure);
    assert_eq!(fixture.sqlite_count(&target, "users").unwrap(), 1);
}

#[test]
fn test_replace_then_drop() {
    let fixture = TestFixture::new().unwrap();
    let source = fixture.create_sqlite("source.db", sample_data::SOURCE_USERS).unwrap();
    let target = fixture.create_sqlite("target.db", sample_data::TARGET_USERS).unwrap();
    let service = service();
    let cancel = CancellationToken::new();

    let snapshot = service.load_table(&source, "users", &cancel).unwrap().completed().unwrap();
    service.replace(&target, "users", &snapshot).unwrap();
    let after = service.compare_one("users", &source, &target, &cancel).unwrap().completed().unwrap();
    assert!(after.pairs.is_empty());

    service.drop_table(&target, "users").unwrap();
    assert!(service.list_tables(&target).unwrap().is_empty());
}

#[test]
fn test_renamed_objects_share_stable_keys() {
    let source = parse_document(&sample_data::device_document("ObjA", 4, "10.0.0.1")).unwrap();
    let target = parse_document(&sample_data::device_document("ObjB", 2, "10.0.0.1")).unwrap();

    let source_keys = KeyStabilizer::new(source.object_name.clone()).stabilize(&source);
    let target_keys = KeyStabilizer::new(target.object_name.clone()).stabilize(&target);

    assert_eq!(source_keys[0].key, "Group|R1|S3");
    assert_eq!(source_keys, target_keys);
}

#[test]
fn test_text_source_into_csv_target_converges() {
    let fixture = TestFixture::new().unwrap();
    let source = fixture
        .create_sqlite(
            "source.db",
            "CREATE TABLE codes (id INTEGER PRIMARY KEY, code TEXT);
             INSERT INTO codes VALUES (1, '5');
             INSERT INTO codes VALUES (2, '7');",
        )
        .unwrap();
    let target = fixture
        .create_csv_table("exports", "codes", &[vec!["id", "code"], vec!["1", "5"]])
        .unwrap();
    let service = service();
    let cancel = CancellationToken::new();

    let comparison = service.compare_one("codes", &source, &target, &cancel).unwrap().completed().unwrap();
    assert_eq!(comparison.pairs.len(), 1, "{:?}", comparison.pairs);
    assert_eq!(comparison.pairs[0].diff_type, DiffType::OnlyInSource);

    service
        .apply(&target, "codes", &comparison.schema, &comparison.key.columns, &comparison.pairs)
        .unwrap();

    let after = service.compare_one("codes", &source, &target, &cancel).unwrap().completed().unwrap();
    assert!(after.pairs.is_empty(), "{:?}", after.pairs);

    let bulk = service
        .compare_many(&["codes".to_string()], &source, &target, &cancel, None)
        .unwrap()
        .completed()
        .unwrap();
    assert!(!bulk.summaries[0].has_changes());
}

#[test]
fn test_csv_sides_with_different_inferred_types() {
    let fixture = TestFixture::new().unwrap();
    let source = fixture
        .create_csv_table("left", "codes", &[vec!["id", "code"], vec!["1", "5"], vec!["2", "6"]])
        .unwrap();
    let target = fixture
        .create_csv_table("right", "codes", &[vec!["id", "code"], vec!["1", "5"], vec!["2", "x"]])
        .unwrap();
    let mut config = ReconConfig::default();
    config.custom_keys.insert("codes".to_string(), vec!["id".to_string()]);
    let service = ComparisonService::new(config).unwrap();
    let cancel = CancellationToken::new();

    let comparison = service.compare_one("codes", &source, &target, &cancel).unwrap().completed().unwrap();
    assert_eq!(comparison.pairs.len(), 1, "{:?}", comparison.pairs);
    assert_eq!(comparison.pairs[0].diff_type, DiffType::Different);
    assert_eq!(comparison.pairs[0].changed_columns(&comparison.schema), vec!["code"]);

    let bulk = service
        .compare_many(&["codes".to_string()], &source, &target, &cancel, None)
        .unwrap()
        .completed()
        .unwrap();
    assert_eq!(bulk.summaries[0].different_count, 1);
    assert_eq!(bulk.summaries[0].only_in_source_count + bulk.summaries[0].only_in_target_count, 0);

    service
        .apply(&target, "codes", &comparison.schema, &comparison.key.columns, &comparison.pairs)
        .unwrap();
    let after = service.compare_one("codes", &source, &target, &cancel).unwrap().completed().unwrap();
    assert!(after.pairs.is_empty(), "{:?}", after.pairs);
}
