//! Unit tests for CLI argument parsing and validation

use clap::Parser;
use std::path::PathBuf;
use tabrecon::cli::{Cli, Commands};

#[test]
fn test_cli_tables_command() {
    let cli = Cli::try_parse_from(["tabrecon", "tables", "sqlite:app.db"]).unwrap();
    match cli.command {
        Commands::Tables { connection, format } => {
            assert_eq!(connection, "sqlite:app.db");
            assert_eq!(format, "pretty");
        }
        _ => panic!("Expected Tables command"),
    }
    assert!(!cli.verbose);
    assert!(cli.config.is_none());
}

#[test]
fn test_cli_compare_command() {
    let cli = Cli::try_parse_from([
        "tabrecon",
        "compare",
        "users",
        "sqlite:a.db",
        "csv:./exports",
        "--limit",
        "10",
        "--format",
        "json",
    ])
    .unwrap();
    match cli.command {
        Commands::Compare {
            table,
            source,
            target,
            limit,
            format,
        } => {
            assert_eq!(table, "users");
            assert_eq!(source, "sqlite:a.db");
            assert_eq!(target, "csv:./exports");
            assert_eq!(limit, 10);
            assert_eq!(format, "json");
        }
        _ => panic!("Expected Compare command"),
    }
}

#[test]
fn test_cli_scan_command() {
    let cli = Cli::try_parse_from([
        "tabrecon",
        "scan",
        "duckdb:a.duckdb",
        "duckdb:b.duckdb",
        "--table",
        "users",
        "--table",
        "orders",
        "--max-parallel",
        "2",
        "--no-progress",
    ])
    .unwrap();
    match cli.command {
        Commands::Scan {
            tables,
            max_parallel,
            no_progress,
            ..
        } => {
            assert_eq!(tables, vec!["users".to_string(), "orders".to_string()]);
            assert_eq!(max_parallel, Some(2));
            assert!(no_progress);
        }
        _ => panic!("Expected Scan command"),
    }
}

#[test]
fn test_cli_scan_rejects_zero_parallelism() {
    assert!(Cli::try_parse_from(["tabrecon", "scan", "sqlite:a.db", "sqlite:b.db", "--max-parallel", "0"]).is_err());
}

#[test]
fn test_cli_apply_command() {
    let cli = Cli::try_parse_from([
        "tabrecon",
        "apply",
        "users",
        "sqlite:a.db",
        "sqlite:b.db",
        "--only",
        "insert",
        "--only",
        "delete",
        "--dry-run",
    ])
    .unwrap();
    match cli.command {
        Commands::Apply { only, dry_run, .. } => {
            assert_eq!(only, vec!["insert".to_string(), "delete".to_string()]);
            assert!(dry_run);
        }
        _ => panic!("Expected Apply command"),
    }
}

#[test]
fn test_cli_drop_requires_arguments() {
    assert!(Cli::try_parse_from(["tabrecon", "drop", "sqlite:a.db"]).is_err());
    let cli = Cli::try_parse_from(["tabrecon", "drop", "sqlite:a.db", "users", "--force"]).unwrap();
    match cli.command {
        Commands::Drop { table, force, .. } => {
            assert_eq!(table, "users");
            assert!(force);
        }
        _ => panic!("Expected Drop command"),
    }
}

#[test]
fn test_cli_global_flags() {
    let cli = Cli::try_parse_from([
        "tabrecon",
        "stable-keys",
        "plant.xml",
        "--config",
        "custom.json",
        "-v",
    ])
    .unwrap();
    assert!(cli.verbose);
    assert_eq!(cli.config, Some(PathBuf::from("custom.json")));
    match cli.command {
        Commands::StableKeys { path, format } => {
            assert_eq!(path, PathBuf::from("plant.xml"));
            assert_eq!(format, "pretty");
        }
        _ => panic!("Expected StableKeys command"),
    }
}

#[test]
fn test_cli_invalid_command() {
    assert!(Cli::try_parse_from(["tabrecon", "snapshot"]).is_err());
}
