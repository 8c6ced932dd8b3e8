//! DuckDB runtime discovery and availability probe

use crate::error::{ReconError, Result};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// How the DuckDB engine is provided to this build
#[derive(Debug, Clone)]
pub struct DuckDbConfig {
    pub library_path: Option<PathBuf>,
    pub prefer_bundled: bool,
}

impl DuckDbConfig {
    /// Create a new DuckDB configuration with automatic discovery
    pub fn new() -> Self {
        let library_path = Self::discover_library_path();
        let prefer_bundled = env::var("DUCKDB_DISABLE_BUNDLED").is_err();

        Self {
            library_path,
            prefer_bundled,
        }
    }

    /// Discover DuckDB library path using various methods
    fn discover_library_path() -> Option<PathBuf> {
        // 1. Explicit override
        if let Ok(path) = env::var("DUCKDB_LIB_PATH") {
            let path_buf = PathBuf::from(path);
            if path_buf.exists() {
                return Some(path_buf);
            }
        }

        // 2. Standard system paths
        Self::standard_paths()
            .into_iter()
            .find(|path| Self::check_duckdb_library(path))
    }

    fn standard_paths() -> Vec<PathBuf> {
        if cfg!(target_os = "macos") {
            vec![
                PathBuf::from("/opt/homebrew/lib"),
                PathBuf::from("/usr/local/lib"),
                PathBuf::from("/opt/local/lib"),
            ]
        } else if cfg!(target_os = "windows") {
            vec![
                PathBuf::from("C:\\Program Files\\DuckDB\\lib"),
                PathBuf::from("C:\\duckdb\\lib"),
            ]
        } else {
            vec![
                PathBuf::from("/usr/lib"),
                PathBuf::from("/usr/local/lib"),
                PathBuf::from("/usr/lib/x86_64-linux-gnu"),
                PathBuf::from("/usr/lib64"),
            ]
        }
    }

    fn check_duckdb_library(path: &Path) -> bool {
        let library_names: &[&str] = if cfg!(target_os = "windows") {
            &["duckdb.dll", "libduckdb.dll"]
        } else if cfg!(target_os = "macos") {
            &["libduckdb.dylib", "libduckdb.so"]
        } else {
            &["libduckdb.so", "libduckdb.so.1"]
        };
        path.exists() && library_names.iter().any(|name| path.join(name).exists())
    }

    pub fn use_bundled(&self) -> bool {
        cfg!(feature = "bundled") && self.prefer_bundled
    }

    /// Check a usable engine is present, without opening anything
    pub fn validate(&self) -> Result<()> {
        if self.use_bundled() {
            return Ok(());
        }
        match &self.library_path {
            Some(path) if Self::check_duckdb_library(path) => Ok(()),
            _ => Err(ReconError::backend_unavailable(
                "duckdb",
                "DuckDB library not found",
                self.remediation(),
            )),
        }
    }

    /// Actionable steps for a missing DuckDB engine
    pub fn remediation(&self) -> String {
        let mut message = String::from("Possible solutions:\n");

        if cfg!(target_os = "macos") {
            message.push_str("1. Install DuckDB: brew install duckdb\n");
        } else if cfg!(target_os = "windows") {
            message.push_str("1. Download DuckDB from https://duckdb.org/docs/installation/\n");
        } else {
            message.push_str("1. Install DuckDB: sudo apt install libduckdb-dev\n");
        }
        message.push_str("2. Set a custom path: export DUCKDB_LIB_PATH=/path/to/duckdb/lib\n");
        if cfg!(feature = "bundled") {
            message.push_str("3. Unset DUCKDB_DISABLE_BUNDLED to use the bundled engine\n");
        } else {
            message.push_str("3. Rebuild with the bundled engine: cargo build --features bundled\n");
        }

        message.push_str("Searched paths:\n");
        for path in Self::standard_paths() {
            let status = if Self::check_duckdb_library(&path) {
                "found"
            } else if path.exists() {
                "no library"
            } else {
                "missing"
            };
            message.push_str(&format!("  [{}] {}\n", status, path.display()));
        }
        message
    }
}

impl Default for DuckDbConfig {
    fn default() -> Self {
        Self::new()
    }
}

static AVAILABILITY: OnceLock<std::result::Result<(), (String, String)>> = OnceLock::new();

/// Probe once per process that DuckDB can be loaded and run a query
pub fn ensure_available() -> Result<()> {
    let outcome = AVAILABILITY.get_or_init(|| {
        let config = DuckDbConfig::new();
        if let Err(err) = config.validate() {
            log::debug!("DuckDB validation failed: {}", err);
            return Err(("DuckDB library not found".to_string(), config.remediation()));
        }
        let probe = duckdb::Connection::open_in_memory()
            .and_then(|conn| conn.query_row("SELECT 1", [], |row| row.get::<_, i32>(0)));
        match probe {
            Ok(_) => {
                if config.use_bundled() {
                    log::debug!("Using bundled DuckDB engine");
                } else if let Some(path) = &config.library_path {
                    log::info!("Using DuckDB library from: {}", path.display());
                }
                Ok(())
            }
            Err(err) => Err((err.to_string(), config.remediation())),
        }
    });

    outcome
        .clone()
        .map_err(|(message, remediation)| ReconError::backend_unavailable("duckdb", message, remediation))
}
