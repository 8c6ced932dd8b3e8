//! Uniform table-access contract and the registry of backends

pub mod config_tree;
pub mod csv_folder;
pub mod duckdb_file;
pub mod parquet_folder;
pub mod sql;
pub mod sqlite_file;
pub mod workbook;

use crate::affinity::AffinityCoordinator;
use crate::apply::ApplyStats;
use crate::cancel::CancellationToken;
use crate::change_detection::RowPair;
use crate::data::{ColumnDescriptor, TableSnapshot};
use crate::error::{ReconError, Result};
use crate::hash::KeyHashMap;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::ops::BitOr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

/// Kind tag of a connection, resolved once when the descriptor is built
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BackendKind {
    DuckDb,
    Sqlite,
    CsvFolder,
    ParquetFolder,
    Workbook,
    ConfigTree,
}

impl BackendKind {
    pub const ALL: [BackendKind; 6] = [
        BackendKind::DuckDb,
        BackendKind::Sqlite,
        BackendKind::CsvFolder,
        BackendKind::ParquetFolder,
        BackendKind::Workbook,
        BackendKind::ConfigTree,
    ];

    pub fn tag(&self) -> &'static str {
        match self {
            BackendKind::DuckDb => "duckdb",
            BackendKind::Sqlite => "sqlite",
            BackendKind::CsvFolder => "csv",
            BackendKind::ParquetFolder => "parquet",
            BackendKind::Workbook => "workbook",
            BackendKind::ConfigTree => "config",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for BackendKind {
    type Err = ReconError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "duckdb" => Ok(BackendKind::DuckDb),
            "sqlite" | "sqlite3" => Ok(BackendKind::Sqlite),
            "csv" => Ok(BackendKind::CsvFolder),
            "parquet" => Ok(BackendKind::ParquetFolder),
            "workbook" | "xlsx" => Ok(BackendKind::Workbook),
            "config" => Ok(BackendKind::ConfigTree),
            other => Err(ReconError::config(format!(
                "Unknown backend kind '{}'. Use one of: duckdb, sqlite, csv, parquet, workbook, config",
                other
            ))),
        }
    }
}

/// Where a table store lives and which backend reads it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ConnectionDescriptor {
    pub kind: BackendKind,
    pub location: PathBuf,
}

impl ConnectionDescriptor {
    pub fn new(kind: BackendKind, location: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            location: location.into(),
        }
    }

    /// Parse `"<kind>:<location>"`
    pub fn parse(descriptor: &str) -> Result<Self> {
        let (kind, location) = descriptor.split_once(':').ok_or_else(|| {
            ReconError::config(format!(
                "Malformed connection descriptor '{}': expected '<kind>:<path>'",
                descriptor
            ))
        })?;
        let kind: BackendKind = kind.parse()?;
        if location.trim().is_empty() {
            return Err(ReconError::config(format!(
                "Connection descriptor '{}' has an empty location",
                descriptor
            )));
        }
        Ok(Self::new(kind, location.trim()))
    }

    /// Identity of the logical connection
    pub fn key(&self) -> String {
        format!("{}:{}", self.kind, self.location.display())
    }

    pub fn path(&self) -> &Path {
        &self.location
    }
}

impl fmt::Display for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Operations a backend supports for a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Capabilities(u8);

impl Capabilities {
    pub const NONE: Capabilities = Capabilities(0);
    pub const READ: Capabilities = Capabilities(1);
    pub const APPLY_ROW_CHANGES: Capabilities = Capabilities(1 << 1);
    pub const REPLACE_TABLE: Capabilities = Capabilities(1 << 2);
    pub const DROP_TABLE: Capabilities = Capabilities(1 << 3);
    pub const ALL: Capabilities = Capabilities(0b1111);

    pub fn contains(&self, other: Capabilities) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn names(&self) -> Vec<&'static str> {
        [
            (Self::READ, "Read"),
            (Self::APPLY_ROW_CHANGES, "ApplyRowChanges"),
            (Self::REPLACE_TABLE, "ReplaceTable"),
            (Self::DROP_TABLE, "DropTable"),
        ]
        .into_iter()
        .filter(|(flag, _)| self.contains(*flag))
        .map(|(_, name)| name)
        .collect()
    }
}

impl BitOr for Capabilities {
    type Output = Capabilities;

    fn bitor(self, rhs: Capabilities) -> Capabilities {
        Capabilities(self.0 | rhs.0)
    }
}

impl Serialize for Capabilities {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_seq(self.names())
    }
}

/// The table-access contract every backend implements.
///
/// Mutation methods default to [`ReconError::Unsupported`]; callers are
/// expected to consult [`TableAdapter::capabilities`] first.
pub trait TableAdapter: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn list_tables(&self, conn: &ConnectionDescriptor) -> Result<Vec<String>>;

    fn load_full_table(
        &self,
        conn: &ConnectionDescriptor,
        table: &str,
        cancel: &CancellationToken,
    ) -> Result<TableSnapshot>;

    /// Natural key columns, empty when the table has none
    fn key_columns(&self, conn: &ConnectionDescriptor, table: &str) -> Result<Vec<String>>;

    fn capabilities(&self, conn: &ConnectionDescriptor) -> Capabilities;

    fn apply_row_changes(
        &self,
        _conn: &ConnectionDescriptor,
        _table: &str,
        _schema: &[ColumnDescriptor],
        _key_columns: &[String],
        _pairs: &[RowPair],
    ) -> Result<ApplyStats> {
        Err(ReconError::unsupported(self.kind().tag(), "ApplyRowChanges"))
    }

    fn replace_table(
        &self,
        _conn: &ConnectionDescriptor,
        _table: &str,
        _snapshot: &TableSnapshot,
    ) -> Result<()> {
        Err(ReconError::unsupported(self.kind().tag(), "ReplaceTable"))
    }

    fn drop_table(&self, _conn: &ConnectionDescriptor, _table: &str) -> Result<()> {
        Err(ReconError::unsupported(self.kind().tag(), "DropTable"))
    }

    /// Whether column types are guessed from the data rather than declared
    /// by the source. Such tables are read again against the comparison
    /// schema once it is known.
    fn infers_types(&self) -> bool {
        false
    }

    /// Load a table with rows aligned to `schema` and typed by its declared
    /// column types. Columns the table lacks are null.
    fn load_table_as(
        &self,
        conn: &ConnectionDescriptor,
        table: &str,
        schema: &[ColumnDescriptor],
        cancel: &CancellationToken,
    ) -> Result<TableSnapshot> {
        let snapshot = self.load_full_table(conn, table, cancel)?;
        Ok(TableSnapshot {
            rows: snapshot.project(schema),
            columns: schema.to_vec(),
        })
    }

    /// Streaming key/hash extension, when the backend has one
    fn fast_hash(&self) -> Option<&dyn FastHash> {
        None
    }

    /// Start reusing one connection until [`TableAdapter::end_batch`]
    fn begin_batch(&self, _conn: &ConnectionDescriptor) -> Result<()> {
        Ok(())
    }

    fn end_batch(&self, _conn: &ConnectionDescriptor) -> Result<()> {
        Ok(())
    }
}

/// Optional streaming path that never materializes full rows
pub trait FastHash: Send + Sync {
    fn column_schema(&self, conn: &ConnectionDescriptor, table: &str) -> Result<Vec<ColumnDescriptor>>;

    /// Stream the table into key -> hash, hashing over `schema` in order.
    /// Columns of `schema` the table lacks hash as null.
    fn load_key_hash_map(
        &self,
        conn: &ConnectionDescriptor,
        table: &str,
        key_columns: &[String],
        schema: &[ColumnDescriptor],
        cancel: &CancellationToken,
    ) -> Result<KeyHashMap>;
}

/// Backend lookup keyed by connection kind
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<BackendKind, Arc<dyn TableAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with all six built-in backends sharing one coordinator
    pub fn with_defaults(coordinator: Arc<AffinityCoordinator>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(duckdb_file::DuckDbAdapter::new(coordinator.clone())));
        registry.register(Arc::new(sqlite_file::SqliteAdapter::new(coordinator)));
        registry.register(Arc::new(csv_folder::CsvFolderAdapter::new()));
        registry.register(Arc::new(parquet_folder::ParquetFolderAdapter::new()));
        registry.register(Arc::new(workbook::WorkbookAdapter::new()));
        registry.register(Arc::new(config_tree::ConfigTreeAdapter::new()));
        registry
    }

    pub fn register(&mut self, adapter: Arc<dyn TableAdapter>) {
        self.adapters.insert(adapter.kind(), adapter);
    }

    pub fn resolve(&self, conn: &ConnectionDescriptor) -> Result<Arc<dyn TableAdapter>> {
        self.adapters.get(&conn.kind).cloned().ok_or_else(|| {
            ReconError::config(format!("No backend registered for kind '{}'", conn.kind))
        })
    }
}

impl fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<&str> = self.adapters.keys().map(|k| k.tag()).collect();
        kinds.sort_unstable();
        f.debug_struct("AdapterRegistry").field("kinds", &kinds).finish()
    }
}

/// Resolve a table name against a listing, exact match first
pub(crate) fn match_table_name(tables: &[String], table: &str) -> Option<String> {
    tables
        .iter()
        .find(|t| t.as_str() == table)
        .or_else(|| tables.iter().find(|t| t.eq_ignore_ascii_case(table)))
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_descriptor() {
        let conn = ConnectionDescriptor::parse("sqlite:/tmp/a.db").unwrap();
        assert_eq!(conn.kind, BackendKind::Sqlite);
        assert_eq!(conn.location, PathBuf::from("/tmp/a.db"));
        assert_eq!(conn.key(), "sqlite:/tmp/a.db");
    }

    #[test]
    fn test_parse_descriptor_errors_are_configuration() {
        for bad in ["no-kind-here", "mysql:/x", "csv:  "] {
            let err = ConnectionDescriptor::parse(bad).unwrap_err();
            assert_eq!(err.category(), crate::error::ErrorCategory::Configuration, "{}", bad);
        }
    }

    #[test]
    fn test_capabilities_bitset() {
        let caps = Capabilities::READ | Capabilities::DROP_TABLE;
        assert!(caps.contains(Capabilities::READ));
        assert!(!caps.contains(Capabilities::APPLY_ROW_CHANGES));
        assert!(Capabilities::ALL.contains(caps));
        assert_eq!(caps.names(), vec!["Read", "DropTable"]);
    }

    #[test]
    fn test_kind_tags_round_trip() {
        for kind in BackendKind::ALL {
            assert_eq!(kind.tag().parse::<BackendKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_match_table_name() {
        let tables = vec!["Users".to_string(), "orders".to_string()];
        assert_eq!(match_table_name(&tables, "users"), Some("Users".to_string()));
        assert_eq!(match_table_name(&tables, "orders"), Some("orders".to_string()));
        assert_eq!(match_table_name(&tables, "missing"), None);
    }
}
