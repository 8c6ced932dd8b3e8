//! Unit tests for configuration loading and connection descriptors

use crate::common::TestFixture;
use std::fs;
use tabrecon::commands::load_config;
use tabrecon::{BackendKind, ConnectionDescriptor, ErrorCategory, ReconConfig};

#[test]
fn test_load_explicit_config_file() {
    let fixture = TestFixture::new().unwrap();
    let path = fixture.root().join("recon.json");
    fs::write(
        &path,
        r#"{
            "excluded_tables": ["audit_log"],
            "custom_keys": {"order_lines": ["order_id", "line_no"]},
            "max_parallel": 8
        }"#,
    )
    .unwrap();

    let config = load_config(Some(&path)).unwrap();
    assert_eq!(config.max_parallel, 8);
    assert!(config.is_excluded("AUDIT_LOG"));
    assert_eq!(config.custom_keys["order_lines"], vec!["order_id", "line_no"]);
    assert!(config.reuse_connections);
}

#[test]
fn test_missing_config_file_is_configuration_error() {
    let fixture = TestFixture::new().unwrap();
    let err = load_config(Some(&fixture.root().join("absent.json"))).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Configuration);
}

#[test]
fn test_invalid_config_values_rejected() {
    let fixture = TestFixture::new().unwrap();
    let path = fixture.root().join("bad.json");
    fs::write(&path, r#"{"custom_keys": {"users": []}}"#).unwrap();
    assert!(load_config(Some(&path)).is_err());
}

#[test]
fn test_config_round_trips_through_file() {
    let fixture = TestFixture::new().unwrap();
    let mut config = ReconConfig {
        reuse_connections: false,
        ..ReconConfig::default()
    };
    config.custom_keys.insert("Net".to_string(), vec!["Key".to_string()]);
    let path = fixture.create_config_file(&config).unwrap();

    assert_eq!(ReconConfig::load(&path).unwrap(), config);
}

#[test]
fn test_connection_descriptor_parse() {
    let conn = ConnectionDescriptor::parse("SQLite:data/app.db").unwrap();
    assert_eq!(conn.kind, BackendKind::Sqlite);
    assert_eq!(conn.key(), "sqlite:data/app.db");

    let conn = ConnectionDescriptor::parse("csv:./exports").unwrap();
    assert_eq!(conn.kind, BackendKind::CsvFolder);
}

#[test]
fn test_connection_descriptor_errors() {
    for bad in ["app.db", "oracle:db", "duckdb:  "] {
        let err = ConnectionDescriptor::parse(bad).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Configuration, "{}", bad);
    }
}
