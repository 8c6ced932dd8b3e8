//! Integration tests for the comparison service: key resolution, warnings,
//! bulk scans, cancellation and apply serialization

use crate::common::{assertions::assert_pairs, sample_data, service, TestFixture};
use std::sync::atomic::{AtomicUsize, Ordering};
use tabrecon::service::{ComparisonWarning, KeySource, ProgressFn, Side};
use tabrecon::{CancellationToken, ComparisonService, DiffType, ErrorCategory, Outcome, ReconConfig};

#[test]
fn test_scenario_rows_only_on_one_side() {
    let fixture = TestFixture::new().unwrap();
    let source = fixture.create_sqlite("source.db", sample_data::SOURCE_USERS).unwrap();
    let target = fixture.create_sqlite("target.db", sample_data::TARGET_USERS).unwrap();

    let comparison = service()
        .compare_one("users", &source, &target, &CancellationToken::new())
        .unwrap()
        .completed()
        .unwrap();

    assert_eq!(comparison.key.columns, vec!["id".to_string()]);
    assert_eq!(comparison.key.source, KeySource::Natural);
    assert!(comparison.warnings.is_empty());
    assert_pairs(&comparison, &[(DiffType::OnlyInSource, "2"), (DiffType::OnlyInTarget, "3")]);
}

#[test]
fn test_table_name_matching_ignores_case() {
    let fixture = TestFixture::new().unwrap();
    let source = fixture.create_sqlite("source.db", sample_data::SOURCE_USERS).unwrap();
    let target = fixture.create_sqlite("target.db", sample_data::SOURCE_USERS).unwrap();

    let comparison = service()
        .compare_one("USERS", &source, &target, &CancellationToken::new())
        .unwrap()
        .completed()
        .unwrap();
    assert_eq!(comparison.table, "users");
    assert!(comparison.pairs.is_empty());
}

#[test]
fn test_custom_key_used_when_no_natural_key() {
    let fixture = TestFixture::new().unwrap();
    let schema = "CREATE TABLE codes (code TEXT, label TEXT);";
    let source = fixture
        .create_sqlite(
            "source.db",
            &format!("{schema} INSERT INTO codes VALUES ('A', 'alpha'); INSERT INTO codes VALUES ('B', 'beta');"),
        )
        .unwrap();
    let target = fixture
        .create_sqlite(
            "target.db",
            &format!("{schema} INSERT INTO codes VALUES ('A', 'ALPHA'); INSERT INTO codes VALUES ('B', 'beta');"),
        )
        .unwrap();

    let mut config = ReconConfig::default();
    config.custom_keys.insert("Codes".to_string(), vec!["code".to_string()]);
    let service = ComparisonService::new(config).unwrap();

    let comparison = service
        .compare_one("codes", &source, &target, &CancellationToken::new())
        .unwrap()
        .completed()
        .unwrap();
    assert_eq!(comparison.key.source, KeySource::Custom);
    assert_pairs(&comparison, &[(DiffType::Different, "A")]);
}

#[test]
fn test_all_columns_fallback_warns() {
    let fixture = TestFixture::new().unwrap();
    let schema = "CREATE TABLE codes (code TEXT, label TEXT);";
    let source = fixture
        .create_sqlite("source.db", &format!("{schema} INSERT INTO codes VALUES ('A', 'alpha');"))
        .unwrap();
    let target = fixture
        .create_sqlite("target.db", &format!("{schema} INSERT INTO codes VALUES ('A', 'ALPHA');"))
        .unwrap();

    let comparison = service()
        .compare_one("codes", &source, &target, &CancellationToken::new())
        .unwrap()
        .completed()
        .unwrap();

    assert_eq!(comparison.key.source, KeySource::AllColumns);
    assert!(comparison
        .warnings
        .iter()
        .any(|w| w.category() == Some(ErrorCategory::KeyResolutionFailure)));
    // Without a key an edited row reads as one removal plus one addition
    let kinds: Vec<DiffType> = comparison.pairs.iter().map(|p| p.diff_type).collect();
    assert_eq!(kinds.len(), 2);
    assert!(kinds.contains(&DiffType::OnlyInSource));
    assert!(kinds.contains(&DiffType::OnlyInTarget));
}

#[test]
fn test_duplicate_keys_keep_last_row() {
    let fixture = TestFixture::new().unwrap();
    let schema = "CREATE TABLE codes (code TEXT, label TEXT);";
    let source = fixture
        .create_sqlite(
            "source.db",
            &format!("{schema} INSERT INTO codes VALUES ('A', 'first'); INSERT INTO codes VALUES ('A', 'second');"),
        )
        .unwrap();
    let target = fixture
        .create_sqlite("target.db", &format!("{schema} INSERT INTO codes VALUES ('A', 'second');"))
        .unwrap();

    let mut config = ReconConfig::default();
    config.custom_keys.insert("codes".to_string(), vec!["code".to_string()]);
    let comparison = ComparisonService::new(config)
        .unwrap()
        .compare_one("codes", &source, &target, &CancellationToken::new())
        .unwrap()
        .completed()
        .unwrap();

    assert!(comparison.pairs.is_empty());
    assert_eq!(
        comparison.warnings,
        vec![ComparisonWarning::DuplicateKeys {
            side: Side::Source,
            count: 1
        }]
    );
}

#[test]
fn test_schema_mismatch_is_a_warning() {
    let fixture = TestFixture::new().unwrap();
    let source = fixture
        .create_sqlite(
            "source.db",
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT, email TEXT);
             INSERT INTO users VALUES (1, 'a', 'a@example.com');",
        )
        .unwrap();
    let target = fixture
        .create_sqlite(
            "target.db",
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT);
             INSERT INTO users VALUES (1, 'a');",
        )
        .unwrap();

    let comparison = service()
        .compare_one("users", &source, &target, &CancellationToken::new())
        .unwrap()
        .completed()
        .unwrap();

    assert_eq!(comparison.schema.len(), 3);
    assert_eq!(
        comparison.warnings,
        vec![ComparisonWarning::SchemaMismatch {
            missing_in_source: Vec::new(),
            missing_in_target: vec!["email".to_string()],
        }]
    );
    assert_pairs(&comparison, &[(DiffType::Different, "1")]);
}

#[test]
fn test_table_missing_on_one_side() {
    let fixture = TestFixture::new().unwrap();
    let source = fixture.create_sqlite("source.db", sample_data::SOURCE_USERS).unwrap();
    let target = fixture.create_sqlite("target.db", "CREATE TABLE other (id INTEGER);").unwrap();
    let service = service();

    let comparison = service
        .compare_one("users", &source, &target, &CancellationToken::new())
        .unwrap()
        .completed()
        .unwrap();
    assert_eq!(comparison.warnings, vec![ComparisonWarning::TableMissing { side: Side::Target }]);
    assert_pairs(&comparison, &[(DiffType::OnlyInSource, "1"), (DiffType::OnlyInSource, "2")]);

    let err = service
        .compare_one("nowhere", &source, &target, &CancellationToken::new())
        .unwrap_err();
    assert!(err.to_string().contains("nowhere"));
}

#[test]
fn test_cancelled_token_yields_cancelled_outcome() {
    let fixture = TestFixture::new().unwrap();
    let source = fixture.create_sqlite("source.db", sample_data::SOURCE_USERS).unwrap();
    let target = fixture.create_sqlite("target.db", sample_data::TARGET_USERS).unwrap();
    let service = service();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = service.compare_one("users", &source, &target, &cancel).unwrap();
    assert!(outcome.is_cancelled());

    match service.compare_many(&[], &source, &target, &cancel, None).unwrap() {
        Outcome::Cancelled { partial } => assert!(partial.unwrap().summaries.is_empty()),
        Outcome::Completed(_) => panic!("Expected a cancelled scan"),
    }
}

#[test]
fn test_bulk_scan_skips_excluded_tables_and_reports_progress() {
    let fixture = TestFixture::new().unwrap();
    let tables = "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT);
         CREATE TABLE orders (id INTEGER PRIMARY KEY, total REAL);
         CREATE TABLE audit_log (id INTEGER PRIMARY KEY, line TEXT);";
    let source = fixture
        .create_sqlite("source.db", &format!("{tables} INSERT INTO users VALUES (1, 'a');"))
        .unwrap();
    let target = fixture
        .create_sqlite("target.db", &format!("{tables} INSERT INTO orders VALUES (9, 1.5);"))
        .unwrap();

    let config = ReconConfig {
        excluded_tables: vec!["AUDIT_LOG".to_string()],
        max_parallel: 2,
        ..ReconConfig::default()
    };
    let service = ComparisonService::new(config).unwrap();

    let calls = AtomicUsize::new(0);
    let last_total = AtomicUsize::new(0);
    let report = |_done: usize, total: usize| {
        calls.fetch_add(1, Ordering::SeqCst);
        last_total.store(total, Ordering::SeqCst);
    };
    let callback: ProgressFn<'_> = &report;

    let bulk = service
        .compare_many(&[], &source, &target, &CancellationToken::new(), Some(callback))
        .unwrap()
        .completed()
        .unwrap();

    let names: Vec<&str> = bulk.summaries.iter().map(|s| s.table_name.as_str()).collect();
    assert_eq!(names, vec!["orders", "users"]);
    assert_eq!(bulk.changed_tables(), 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(last_total.load(Ordering::SeqCst), 2);
}

#[test]
fn test_bulk_scan_collects_failures() {
    let fixture = TestFixture::new().unwrap();
    let source = fixture.create_sqlite("source.db", sample_data::SOURCE_USERS).unwrap();
    let target = fixture.create_sqlite("target.db", sample_data::TARGET_USERS).unwrap();

    let bulk = service()
        .compare_many(
            &["users".to_string(), "ghost".to_string()],
            &source,
            &target,
            &CancellationToken::new(),
            None,
        )
        .unwrap()
        .completed()
        .unwrap();

    assert_eq!(bulk.summaries.len(), 1);
    assert_eq!(bulk.failures.len(), 1);
    assert_eq!(bulk.failures[0].table, "ghost");
}

#[test]
fn test_batch_session_reuses_connections() {
    let fixture = TestFixture::new().unwrap();
    let source = fixture.create_sqlite("source.db", sample_data::SOURCE_USERS).unwrap();
    let target = fixture.create_sqlite("target.db", sample_data::TARGET_USERS).unwrap();
    let service = service();

    let session = service.begin_batch(&[&source, &target]).unwrap();
    assert_eq!(session.connections().count(), 2);
    for _ in 0..3 {
        let comparison = service
            .compare_one("users", &source, &target, &CancellationToken::new())
            .unwrap()
            .completed()
            .unwrap();
        assert_eq!(comparison.pairs.len(), 2);
    }
    session.end().unwrap();
}

#[test]
fn test_concurrent_applies_to_one_table_are_serialized() {
    let fixture = TestFixture::new().unwrap();
    let source = fixture.create_sqlite("source.db", sample_data::SOURCE_USERS).unwrap();
    let target = fixture.create_sqlite("target.db", sample_data::TARGET_USERS).unwrap();
    let service = service();

    let comparison = service
        .compare_one("users", &source, &target, &CancellationToken::new())
        .unwrap()
        .completed()
        .unwrap();
    let inserts: Vec<_> = comparison
        .pairs
        .iter()
        .filter(|p| p.diff_type == DiffType::OnlyInSource)
        .cloned()
        .collect();

    let stats: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                scope.spawn(|| {
                    service
                        .apply(&target, "users", &comparison.schema, &comparison.key.columns, &inserts)
                        .unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(stats.iter().map(|s| s.inserted).sum::<usize>(), 1);
    assert_eq!(stats.iter().map(|s| s.updated).sum::<usize>(), 3);
    assert_eq!(fixture.sqlite_count(&target, "users").unwrap(), 3);
}

#[test]
fn test_bulk_scan_progress_counts_arrive_in_order() {
    let fixture = TestFixture::new().unwrap();
    let mut sides = None;
    for i in 0..6 {
        let table = format!("t{}", i);
        let source = fixture
            .create_csv_table("left", &table, &[vec!["id", "v"], vec!["1", "a"]])
            .unwrap();
        let target = fixture
            .create_csv_table("right", &table, &[vec!["id", "v"], vec!["1", "b"]])
            .unwrap();
        sides = Some((source, target));
    }
    let (source, target) = sides.unwrap();

    let config = ReconConfig {
        max_parallel: 4,
        ..ReconConfig::default()
    };
    let service = ComparisonService::new(config).unwrap();
    let seen = std::sync::Mutex::new(Vec::new());
    let report = |done: usize, _total: usize| seen.lock().unwrap().push(done);
    let callback: ProgressFn<'_> = &report;

    let bulk = service
        .compare_many(&[], &source, &target, &CancellationToken::new(), Some(callback))
        .unwrap()
        .completed()
        .unwrap();

    assert_eq!(bulk.summaries.len(), 6);
    assert_eq!(seen.into_inner().unwrap(), (1..=6).collect::<Vec<_>>());
}
