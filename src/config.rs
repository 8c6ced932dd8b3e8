//! Comparison settings and the custom key store

use crate::affinity::DEFAULT_AFFINITY_WORKERS;
use crate::error::{ReconError, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// File name looked up when no config path is given
pub const CONFIG_FILE_NAME: &str = "tabrecon.json";

pub const DEFAULT_MAX_PARALLEL: usize = 4;

/// Read-only lookup of configured key columns per table
pub trait CustomKeyStore: Send + Sync {
    fn custom_key(&self, table: &str) -> Option<Vec<String>>;
}

/// Settings consulted by the comparison service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconConfig {
    /// Tables skipped by bulk scans (case-insensitive)
    pub excluded_tables: Vec<String>,
    /// Table name -> ordered key columns, used when a table has no natural key
    pub custom_keys: IndexMap<String, Vec<String>>,
    /// Bulk scan parallelism
    pub max_parallel: usize,
    /// Worker threads for backends that need thread affinity
    pub affinity_workers: usize,
    /// Hold one connection per side for the duration of a bulk scan
    pub reuse_connections: bool,
}

impl Default for ReconConfig {
    fn default() -> Self {
        Self {
            excluded_tables: Vec::new(),
            custom_keys: IndexMap::new(),
            max_parallel: DEFAULT_MAX_PARALLEL,
            affinity_workers: DEFAULT_AFFINITY_WORKERS,
            reuse_connections: true,
        }
    }
}

impl ReconConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|err| {
            ReconError::config(format!("Cannot read config '{}': {}", path.display(), err))
        })?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Find `tabrecon.json` by walking up from `start_dir`
    pub fn discover(start_dir: &Path) -> Result<Option<(PathBuf, Self)>> {
        let mut current = start_dir;
        loop {
            let candidate = current.join(CONFIG_FILE_NAME);
            if candidate.is_file() {
                let config = Self::load(&candidate)?;
                return Ok(Some((candidate, config)));
            }
            if current.join(".git").exists() {
                break;
            }
            match current.parent() {
                Some(parent) => current = parent,
                None => break,
            }
        }
        Ok(None)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        self.validate()?;
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_parallel == 0 {
            return Err(ReconError::config("max_parallel must be at least 1"));
        }
        if self.affinity_workers == 0 {
            return Err(ReconError::config("affinity_workers must be at least 1"));
        }
        if let Some((table, _)) = self.custom_keys.iter().find(|(_, columns)| columns.is_empty()) {
            return Err(ReconError::config(format!(
                "Custom key for table '{}' lists no columns",
                table
            )));
        }
        Ok(())
    }

    pub fn is_excluded(&self, table: &str) -> bool {
        self.excluded_tables.iter().any(|t| t.eq_ignore_ascii_case(table))
    }
}

impl CustomKeyStore for ReconConfig {
    fn custom_key(&self, table: &str) -> Option<Vec<String>> {
        self.custom_keys
            .get(table)
            .or_else(|| {
                self.custom_keys
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(table))
                    .map(|(_, columns)| columns)
            })
            .cloned()
    }
}
