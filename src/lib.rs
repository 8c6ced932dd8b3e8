//! # tabrecon
//!
//! Table diffing and reconciliation across structurally different backends:
//! DuckDB and SQLite files, folders of CSV or Parquet files, spreadsheet
//! workbooks and hierarchical XML configuration documents. Rows are matched
//! by a resolved key, fingerprinted with a backend-independent content hash
//! and classified; approved differences can be applied back to a target.

pub mod affinity;
pub mod apply;
pub mod backend;
pub mod cancel;
pub mod change_detection;
pub mod cli;
pub mod commands;
pub mod config;
pub mod data;
pub mod duckdb_config;
pub mod error;
pub mod hash;
pub mod output;
pub mod progress;
pub mod service;
pub mod session;
pub mod stabilizer;

pub use backend::{AdapterRegistry, BackendKind, Capabilities, ConnectionDescriptor, TableAdapter};
pub use cancel::{CancellationToken, Outcome};
pub use change_detection::{DiffType, RowPair, TableDiffSummary};
pub use config::{CustomKeyStore, ReconConfig};
pub use error::{ErrorCategory, ReconError, Result};
pub use service::{BulkComparison, ComparisonService, TableComparison};
