//! Common test utilities and helpers

use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};
use tabrecon::{BackendKind, ComparisonService, ConnectionDescriptor, ReconConfig, ReconError, Result};
use tempfile::TempDir;

/// Temporary directory holding the stores a test compares
pub struct TestFixture {
    pub temp_dir: TempDir,
}

impl TestFixture {
    pub fn new() -> Result<Self> {
        Ok(Self {
            temp_dir: TempDir::new()?,
        })
    }

    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Create a SQLite database file from a batch of statements
    pub fn create_sqlite(&self, name: &str, sql: &str) -> Result<ConnectionDescriptor> {
        let path = self.root().join(name);
        let connection = Connection::open(&path)?;
        connection.execute_batch(sql)?;
        Ok(ConnectionDescriptor::new(BackendKind::Sqlite, path))
    }

    /// Create (or extend) a folder of CSV tables
    pub fn create_csv_table(&self, folder: &str, table: &str, data: &[Vec<&str>]) -> Result<ConnectionDescriptor> {
        let dir = self.root().join(folder);
        fs::create_dir_all(&dir)?;
        let mut content = String::new();
        for row in data {
            content.push_str(&row.join(","));
            content.push('\n');
        }
        fs::write(dir.join(format!("{}.csv", table)), content)?;
        Ok(ConnectionDescriptor::new(BackendKind::CsvFolder, dir))
    }

    /// Write one XML configuration document
    pub fn create_config_document(&self, name: &str, xml: &str) -> Result<ConnectionDescriptor> {
        let path = self.root().join(name);
        fs::write(&path, xml)?;
        Ok(ConnectionDescriptor::new(BackendKind::ConfigTree, path))
    }

    /// Write a tabrecon.json into the fixture root
    pub fn create_config_file(&self, config: &ReconConfig) -> Result<PathBuf> {
        let path = self.root().join(tabrecon::config::CONFIG_FILE_NAME);
        config.save(&path)?;
        Ok(path)
    }

    /// Row count of a SQLite table
    pub fn sqlite_count(&self, conn: &ConnectionDescriptor, table: &str) -> Result<i64> {
        let connection = Connection::open(conn.path())?;
        Ok(connection.query_row(&format!("SELECT COUNT(*) FROM \"{}\"", table), [], |row| row.get(0))?)
    }
}

/// Service over the built-in backends with default settings
pub fn service() -> ComparisonService {
    ComparisonService::new(ReconConfig::default()).expect("Service should start")
}

/// Helper for running CLI commands in tests
pub struct CliTestRunner {
    fixture: TestFixture,
    config_path: PathBuf,
}

impl CliTestRunner {
    pub fn new() -> Result<Self> {
        let fixture = TestFixture::new()?;
        let config_path = fixture.create_config_file(&ReconConfig::default())?;
        Ok(Self { fixture, config_path })
    }

    pub fn fixture(&self) -> &TestFixture {
        &self.fixture
    }

    /// Run a tabrecon command against the fixture's config file
    pub fn run_command(&self, args: &[&str]) -> Result<()> {
        use clap::Parser;
        use tabrecon::cli::Cli;
        use tabrecon::commands::execute_command;

        let mut cmd_args = vec!["tabrecon"];
        cmd_args.extend(args);

        let cli = Cli::try_parse_from(cmd_args).map_err(|e| ReconError::invalid_input(e.to_string()))?;
        let config_path = cli.config.clone().unwrap_or_else(|| self.config_path.clone());
        execute_command(cli.command, Some(&config_path))
    }

    pub fn expect_success(&self, args: &[&str]) {
        self.run_command(args).expect("Command should succeed");
    }

    pub fn expect_failure(&self, args: &[&str]) -> ReconError {
        self.run_command(args).expect_err("Command should fail")
    }
}

/// Sample data used across tests
pub mod sample_data {
    /// Scenario source: ids 1 and 2
    pub const SOURCE_USERS: &str = "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT);
         INSERT INTO users VALUES (1, 'a');
         INSERT INTO users VALUES (2, 'b');";

    /// Scenario target: ids 1 and 3
    pub const TARGET_USERS: &str = "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT);
         INSERT INTO users VALUES (1, 'a');
         INSERT INTO users VALUES (3, 'c');";

    pub fn users_csv() -> Vec<Vec<&'static str>> {
        vec![vec!["id", "name"], vec!["1", "a"], vec!["2", "b"]]
    }

    /// Configuration document for one object with a single device
    pub fn device_document(object: &str, rack: u32, ip: &str) -> String {
        format!(
            r#"<Object name="{object}">
  <Device name="{object}.Group - A{rack}.3" type="PLC">
    <Attribute name="ip" value="{ip}"/>
  </Device>
</Object>"#
        )
    }
}

/// Assertion helpers for test validation
pub mod assertions {
    use tabrecon::{DiffType, TableComparison};

    /// Assert the comparison found exactly these (diff type, key text) pairs
    pub fn assert_pairs(comparison: &TableComparison, expected: &[(DiffType, &str)]) {
        let key_ordinal = comparison
            .schema
            .iter()
            .position(|c| c.name == comparison.key.columns[0])
            .expect("key column should be in schema");
        let actual: Vec<(DiffType, String)> = comparison
            .pairs
            .iter()
            .map(|pair| {
                let row = pair.primary_row().expect("pair should carry a row");
                (pair.diff_type, row[key_ordinal].to_string())
            })
            .collect();
        let expected: Vec<(DiffType, String)> = expected.iter().map(|(d, k)| (*d, k.to_string())).collect();
        assert_eq!(actual, expected);
    }
}
