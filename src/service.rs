//! Comparison orchestration and the reconciliation entry points
//!
//! [`ComparisonService`] resolves adapters from connection descriptors,
//! works out the key of each table, loads both sides (streaming key/hash
//! maps when both backends can, full snapshots otherwise) and classifies
//! the rows. Apply, replace and drop go through the same service so that
//! capability checks and per-table apply serialization live in one place.

use crate::affinity::AffinityCoordinator;
use crate::apply::ApplyStats;
use crate::backend::{
    match_table_name, AdapterRegistry, Capabilities, ConnectionDescriptor, FastHash, TableAdapter,
};
use crate::cancel::{CancellationToken, Outcome};
use crate::change_detection::{ChangeDetector, KeyedRows, RowPair, TableDiffSummary};
use crate::config::{CustomKeyStore, ReconConfig};
use crate::data::{column_ordinal, ColumnDescriptor, ColumnType, TableSnapshot};
use crate::error::{ErrorCategory, ReconError, Result};
use crate::hash::{ordinals_for, KeyHashMap};
use crate::session::BatchSession;
use indexmap::IndexSet;
use parking_lot::Mutex;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Progress callback for bulk scans: (processed, total)
pub type ProgressFn<'a> = &'a (dyn Fn(usize, usize) + Sync);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Side {
    Source,
    Target,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Source => f.write_str("source"),
            Side::Target => f.write_str("target"),
        }
    }
}

/// Where the resolved key columns came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum KeySource {
    Natural,
    Custom,
    /// No key was found; every column is part of the identity
    AllColumns,
}

/// Non-fatal findings reported next to a comparison result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind")]
pub enum ComparisonWarning {
    SchemaMismatch {
        missing_in_source: Vec<String>,
        missing_in_target: Vec<String>,
    },
    KeyResolution {
        message: String,
    },
    DuplicateKeys {
        side: Side,
        count: usize,
    },
    TableMissing {
        side: Side,
    },
}

impl ComparisonWarning {
    pub fn category(&self) -> Option<ErrorCategory> {
        match self {
            Self::SchemaMismatch { .. } => Some(ErrorCategory::SchemaMismatch),
            Self::KeyResolution { .. } => Some(ErrorCategory::KeyResolutionFailure),
            _ => None,
        }
    }
}

impl fmt::Display for ComparisonWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SchemaMismatch {
                missing_in_source,
                missing_in_target,
            } => write!(
                f,
                "column sets differ (missing in source: [{}], missing in target: [{}])",
                missing_in_source.join(", "),
                missing_in_target.join(", ")
            ),
            Self::KeyResolution { message } => f.write_str(message),
            Self::DuplicateKeys { side, count } => {
                write!(f, "{} duplicate key(s) in {}, last loaded row kept", count, side)
            }
            Self::TableMissing { side } => write!(f, "table does not exist in {}", side),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedKey {
    pub columns: Vec<String>,
    pub source: KeySource,
}

/// Full result of comparing one table
#[derive(Debug, Clone, Serialize)]
pub struct TableComparison {
    pub table: String,
    pub schema: Vec<ColumnDescriptor>,
    pub key: ResolvedKey,
    pub pairs: Vec<RowPair>,
    pub warnings: Vec<ComparisonWarning>,
}

impl TableComparison {
    pub fn summary(&self) -> TableDiffSummary {
        TableDiffSummary::from_pairs(&self.table, &self.pairs)
    }
}

/// Counts-only result of one table within a bulk scan
#[derive(Debug, Clone, Serialize)]
pub struct TableScan {
    pub summary: TableDiffSummary,
    pub key: ResolvedKey,
    pub warnings: Vec<ComparisonWarning>,
    /// Whether both sides were streamed as key/hash maps
    pub streamed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableFailure {
    pub table: String,
    pub category: ErrorCategory,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableWarning {
    pub table: String,
    pub warning: ComparisonWarning,
}

/// Result of a bulk scan, in the order the tables were requested
#[derive(Debug, Clone, Default, Serialize)]
pub struct BulkComparison {
    pub summaries: Vec<TableDiffSummary>,
    pub warnings: Vec<TableWarning>,
    pub failures: Vec<TableFailure>,
}

impl BulkComparison {
    pub fn changed_tables(&self) -> usize {
        self.summaries.iter().filter(|s| s.has_changes()).count()
    }
}

/// One side of a comparison: adapter, connection and its table listing
struct SideContext<'a> {
    side: Side,
    adapter: Arc<dyn TableAdapter>,
    conn: &'a ConnectionDescriptor,
    tables: Vec<String>,
}

impl SideContext<'_> {
    fn table_name(&self, table: &str) -> Option<String> {
        match_table_name(&self.tables, table)
    }
}

/// One side of a single-table comparison; `table` is `None` when absent
struct LoadedSide {
    table: Option<String>,
    columns: Vec<ColumnDescriptor>,
    /// Column types were guessed from the data
    inferred: bool,
    /// `None` until an inferred side is read against the comparison schema
    snapshot: Option<TableSnapshot>,
    natural_key: Vec<String>,
}

impl LoadedSide {
    fn absent() -> Self {
        Self {
            table: None,
            columns: Vec::new(),
            inferred: false,
            snapshot: None,
            natural_key: Vec::new(),
        }
    }
}

pub struct ComparisonService {
    registry: AdapterRegistry,
    config: ReconConfig,
    custom_keys: Arc<dyn CustomKeyStore>,
    apply_locks: Mutex<HashMap<(String, String), Arc<Mutex<()>>>>,
}

impl ComparisonService {
    /// Service with all built-in backends and a fresh affinity coordinator
    pub fn new(config: ReconConfig) -> Result<Self> {
        config.validate()?;
        let coordinator = Arc::new(AffinityCoordinator::new(config.affinity_workers)?);
        let registry = AdapterRegistry::with_defaults(coordinator);
        Ok(Self::with_registry(registry, config))
    }

    pub fn with_registry(registry: AdapterRegistry, config: ReconConfig) -> Self {
        let custom_keys: Arc<dyn CustomKeyStore> = Arc::new(config.clone());
        Self {
            registry,
            config,
            custom_keys,
            apply_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the custom key lookup (defaults to the config's `custom_keys`)
    pub fn with_custom_keys(mut self, store: Arc<dyn CustomKeyStore>) -> Self {
        self.custom_keys = store;
        self
    }

    pub fn config(&self) -> &ReconConfig {
        &self.config
    }

    pub fn capabilities(&self, conn: &ConnectionDescriptor) -> Result<Capabilities> {
        let adapter = self.registry.resolve(conn)?;
        Ok(adapter.capabilities(conn))
    }

    pub fn list_tables(&self, conn: &ConnectionDescriptor) -> Result<Vec<String>> {
        let adapter = self.readable(conn)?;
        adapter.list_tables(conn)
    }

    /// Natural key columns of a table, empty when it has none
    pub fn key_columns(&self, conn: &ConnectionDescriptor, table: &str) -> Result<Vec<String>> {
        self.readable(conn)?.key_columns(conn, table)
    }

    /// Load one table in full
    pub fn load_table(
        &self,
        conn: &ConnectionDescriptor,
        table: &str,
        cancel: &CancellationToken,
    ) -> Result<Outcome<TableSnapshot>> {
        let adapter = self.readable(conn)?;
        Outcome::from_result(adapter.load_full_table(conn, table, cancel))
    }

    /// Reuse one connection per descriptor until the session ends
    pub fn begin_batch(&self, connections: &[&ConnectionDescriptor]) -> Result<BatchSession> {
        let members = connections
            .iter()
            .map(|conn| Ok((self.registry.resolve(conn)?, (*conn).clone())))
            .collect::<Result<Vec<_>>>()?;
        BatchSession::begin(members)
    }

    /// Compare one table and return every differing row
    pub fn compare_one(
        &self,
        table: &str,
        source: &ConnectionDescriptor,
        target: &ConnectionDescriptor,
        cancel: &CancellationToken,
    ) -> Result<Outcome<TableComparison>> {
        let source_adapter = self.readable(source)?;
        let target_adapter = self.readable(target)?;

        let result = (|| -> Result<TableComparison> {
            let (source_side, target_side) = rayon::join(
                || Self::side_context(Side::Source, source_adapter.clone(), source),
                || Self::side_context(Side::Target, target_adapter.clone(), target),
            );
            let (source_side, target_side) = (source_side?, target_side?);
            let comparison = self.compare_loaded(table, &source_side, &target_side, cancel)?;
            log::info!(
                "Compared '{}': {} difference(s) keyed on [{}]",
                comparison.table,
                comparison.pairs.len(),
                comparison.key.columns.join(", ")
            );
            Ok(comparison)
        })();
        Outcome::from_result(result)
    }

    /// Summarize many tables with bounded parallelism.
    ///
    /// An empty `tables` list scans every table of both sides except the
    /// configured exclusions. Failures of single tables are collected and
    /// do not stop the scan.
    pub fn compare_many(
        &self,
        tables: &[String],
        source: &ConnectionDescriptor,
        target: &ConnectionDescriptor,
        cancel: &CancellationToken,
        progress: Option<ProgressFn<'_>>,
    ) -> Result<Outcome<BulkComparison>> {
        let source_adapter = self.readable(source)?;
        let target_adapter = self.readable(target)?;

        let _session = if self.config.reuse_connections {
            let connections: Vec<&ConnectionDescriptor> = if source == target {
                vec![source]
            } else {
                vec![source, target]
            };
            Some(self.begin_batch(&connections)?)
        } else {
            None
        };

        let (source_side, target_side) = rayon::join(
            || Self::side_context(Side::Source, source_adapter.clone(), source),
            || Self::side_context(Side::Target, target_adapter.clone(), target),
        );
        let (source_side, target_side) = (source_side?, target_side?);

        let tables: Vec<String> = if tables.is_empty() {
            let mut union: IndexSet<String> = IndexSet::new();
            for name in source_side.tables.iter().chain(&target_side.tables) {
                if !union.iter().any(|t| t.eq_ignore_ascii_case(name)) {
                    union.insert(name.clone());
                }
            }
            union.into_iter().filter(|t| !self.config.is_excluded(t)).collect()
        } else {
            tables.to_vec()
        };

        let total = tables.len();
        let processed = Mutex::new(0usize);
        log::info!(
            "Scanning {} table(s) between {} and {} with up to {} in parallel",
            total,
            source,
            target,
            self.config.max_parallel
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.max_parallel)
            .thread_name(|i| format!("tabrecon-scan-{}", i))
            .build()
            .map_err(|err| ReconError::coordinator(format!("Failed to start scan pool: {}", err)))?;

        let results: Vec<(String, Result<TableScan>)> = pool.install(|| {
            tables
                .par_iter()
                .map(|table| {
                    let result = cancel
                        .check()
                        .and_then(|_| self.scan_table(table, &source_side, &target_side, cancel));
                    // Counted and reported under one lock so counts arrive in order
                    let mut done = processed.lock();
                    *done += 1;
                    if let Some(report) = progress {
                        report(*done, total);
                    }
                    drop(done);
                    (table.clone(), result)
                })
                .collect()
        });

        let mut bulk = BulkComparison::default();
        let mut cancelled = cancel.is_cancelled();
        for (table, result) in results {
            match result {
                Ok(scan) => {
                    log::info!(
                        "{}: +{} -{} ~{}",
                        table,
                        scan.summary.only_in_source_count,
                        scan.summary.only_in_target_count,
                        scan.summary.different_count
                    );
                    bulk.warnings.extend(scan.warnings.into_iter().map(|warning| TableWarning {
                        table: table.clone(),
                        warning,
                    }));
                    bulk.summaries.push(scan.summary);
                }
                Err(err) if err.is_cancelled() => cancelled = true,
                Err(err) => {
                    log::error!("Comparison of '{}' failed: {}", table, err);
                    bulk.failures.push(TableFailure {
                        table,
                        category: err.category(),
                        message: err.to_string(),
                    });
                }
            }
        }

        if cancelled {
            log::info!("Scan cancelled after {} table(s)", bulk.summaries.len());
            Ok(Outcome::Cancelled { partial: Some(bulk) })
        } else {
            Ok(Outcome::Completed(bulk))
        }
    }

    /// Apply approved row pairs to the target in one transaction
    pub fn apply(
        &self,
        target: &ConnectionDescriptor,
        table: &str,
        schema: &[ColumnDescriptor],
        key_columns: &[String],
        pairs: &[RowPair],
    ) -> Result<ApplyStats> {
        let adapter = self.capable(target, Capabilities::APPLY_ROW_CHANGES, "ApplyRowChanges")?;
        if pairs.is_empty() {
            return Ok(ApplyStats::default());
        }

        let stats = self
            .with_apply_lock(target, table, || adapter.apply_row_changes(target, table, schema, key_columns, pairs))
            .map_err(|err| Self::apply_error(table, err))?;
        log::info!(
            "Applied {} change(s) to '{}' on {}: {} inserted, {} updated, {} deleted",
            pairs.len(),
            table,
            target,
            stats.inserted,
            stats.updated,
            stats.deleted
        );
        Ok(stats)
    }

    /// Overwrite the target table with a full snapshot
    pub fn replace(&self, target: &ConnectionDescriptor, table: &str, snapshot: &TableSnapshot) -> Result<()> {
        let adapter = self.capable(target, Capabilities::REPLACE_TABLE, "ReplaceTable")?;
        self.with_apply_lock(target, table, || adapter.replace_table(target, table, snapshot))
            .map_err(|err| Self::apply_error(table, err))?;
        log::info!("Replaced '{}' on {} with {} row(s)", table, target, snapshot.rows.len());
        Ok(())
    }

    pub fn drop_table(&self, target: &ConnectionDescriptor, table: &str) -> Result<()> {
        let adapter = self.capable(target, Capabilities::DROP_TABLE, "DropTable")?;
        self.with_apply_lock(target, table, || adapter.drop_table(target, table))
    }

    fn readable(&self, conn: &ConnectionDescriptor) -> Result<Arc<dyn TableAdapter>> {
        self.capable(conn, Capabilities::READ, "Read")
    }

    fn capable(
        &self,
        conn: &ConnectionDescriptor,
        required: Capabilities,
        operation: &str,
    ) -> Result<Arc<dyn TableAdapter>> {
        let adapter = self.registry.resolve(conn)?;
        if !adapter.capabilities(conn).contains(required) {
            return Err(ReconError::unsupported(adapter.kind().tag(), operation));
        }
        Ok(adapter)
    }

    /// Run `work` holding the lock of one (connection, table). The entry is
    /// removed again once no other caller holds or waits on it.
    fn with_apply_lock<T>(
        &self,
        conn: &ConnectionDescriptor,
        table: &str,
        work: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        let key = (conn.key(), table.to_ascii_lowercase());
        let lock = self.apply_locks.lock().entry(key.clone()).or_default().clone();
        let result = {
            let _guard = lock.lock();
            work()
        };

        let mut locks = self.apply_locks.lock();
        drop(lock);
        if locks.get(&key).is_some_and(|held| Arc::strong_count(held) == 1) {
            locks.remove(&key);
        }
        result
    }

    /// Row operation failures are reported as apply failures; validation
    /// and availability errors keep their own category
    fn apply_error(table: &str, err: ReconError) -> ReconError {
        match err.category() {
            ErrorCategory::Backend => ReconError::apply_failed(table, err),
            _ => err,
        }
    }

    fn side_context<'a>(
        side: Side,
        adapter: Arc<dyn TableAdapter>,
        conn: &'a ConnectionDescriptor,
    ) -> Result<SideContext<'a>> {
        let tables = adapter.list_tables(conn)?;
        Ok(SideContext {
            side,
            adapter,
            conn,
            tables,
        })
    }

    /// Load one side. Sides with inferred types only report their columns
    /// here when they can; their rows are read once the comparison schema
    /// is known.
    fn load_side(side: &SideContext<'_>, table: &str, cancel: &CancellationToken) -> Result<LoadedSide> {
        let Some(name) = side.table_name(table) else {
            return Ok(LoadedSide::absent());
        };
        cancel.check()?;
        let natural_key = side.adapter.key_columns(side.conn, &name)?;
        let inferred = side.adapter.infers_types();
        if let Some(fast) = side.adapter.fast_hash().filter(|_| inferred) {
            return Ok(LoadedSide {
                columns: fast.column_schema(side.conn, &name)?,
                table: Some(name),
                inferred,
                snapshot: None,
                natural_key,
            });
        }

        let snapshot = side.adapter.load_full_table(side.conn, &name, cancel)?;
        log::debug!("Loaded {} row(s) of '{}' from {}", snapshot.rows.len(), name, side.side);
        Ok(LoadedSide {
            table: Some(name),
            columns: snapshot.columns.clone(),
            inferred,
            snapshot: Some(snapshot),
            natural_key,
        })
    }

    fn read_as_declared(
        side: &SideContext<'_>,
        loaded: &mut LoadedSide,
        schema: &[ColumnDescriptor],
        cancel: &CancellationToken,
    ) -> Result<()> {
        if loaded.snapshot.is_none() {
            if let Some(name) = &loaded.table {
                let snapshot = side.adapter.load_table_as(side.conn, name, schema, cancel)?;
                log::debug!("Loaded {} row(s) of '{}' from {}", snapshot.rows.len(), name, side.side);
                loaded.snapshot = Some(snapshot);
            }
        }
        Ok(())
    }

    fn compare_loaded(
        &self,
        table: &str,
        source: &SideContext<'_>,
        target: &SideContext<'_>,
        cancel: &CancellationToken,
    ) -> Result<TableComparison> {
        let (source_loaded, target_loaded) = rayon::join(
            || Self::load_side(source, table, cancel),
            || Self::load_side(target, table, cancel),
        );
        let (mut source_loaded, mut target_loaded) = (source_loaded?, target_loaded?);
        cancel.check()?;

        let (schema, _) = comparison_schema(
            &source_loaded.columns,
            source_loaded.inferred,
            &target_loaded.columns,
            target_loaded.inferred,
        );
        let (source_read, target_read) = rayon::join(
            || Self::read_as_declared(source, &mut source_loaded, &schema, cancel),
            || Self::read_as_declared(target, &mut target_loaded, &schema, cancel),
        );
        source_read?;
        target_read?;
        cancel.check()?;
        self.classify_snapshots(table, source_loaded, target_loaded)
    }

    fn classify_snapshots(&self, table: &str, source: LoadedSide, target: LoadedSide) -> Result<TableComparison> {
        let mut warnings = missing_table_warnings(table, source.table.is_some(), target.table.is_some())?;
        let display_name = source.table.clone().or(target.table.clone()).unwrap_or_else(|| table.to_string());

        let (schema, mismatch) = comparison_schema(&source.columns, source.inferred, &target.columns, target.inferred);
        if source.table.is_some() && target.table.is_some() {
            warnings.extend(mismatch);
        }
        let key = self.resolve_key(&display_name, &schema, &source.natural_key, &target.natural_key, &mut warnings);
        let key_ordinals = ordinals_for(&schema, &key.columns).ok_or_else(|| {
            ReconError::key_resolution(format!("Key columns [{}] not in schema", key.columns.join(", ")))
        })?;

        let project = |snapshot: Option<TableSnapshot>| snapshot.map(|s| s.project(&schema)).unwrap_or_default();
        let source_rows = KeyedRows::build(project(source.snapshot), &schema, &key_ordinals);
        let target_rows = KeyedRows::build(project(target.snapshot), &schema, &key_ordinals);
        push_duplicate_warning(&mut warnings, Side::Source, source_rows.duplicate_keys);
        push_duplicate_warning(&mut warnings, Side::Target, target_rows.duplicate_keys);

        let pairs = ChangeDetector::classify_rows(source_rows, target_rows, &key_ordinals);
        for warning in &warnings {
            log::warn!("{}: {}", display_name, warning);
        }
        Ok(TableComparison {
            table: display_name,
            schema,
            key,
            pairs,
            warnings,
        })
    }

    /// Summarize one table, streaming key/hash maps when both sides can
    fn scan_table(
        &self,
        table: &str,
        source: &SideContext<'_>,
        target: &SideContext<'_>,
        cancel: &CancellationToken,
    ) -> Result<TableScan> {
        let (Some(source_fast), Some(target_fast)) = (source.adapter.fast_hash(), target.adapter.fast_hash())
        else {
            return self.scan_by_snapshot(table, source, target, cancel);
        };

        let source_name = source.table_name(table);
        let target_name = target.table_name(table);
        let mut warnings = missing_table_warnings(table, source_name.is_some(), target_name.is_some())?;
        let display_name = source_name
            .clone()
            .or(target_name.clone())
            .unwrap_or_else(|| table.to_string());

        let metadata = |side: &SideContext<'_>,
                        name: &Option<String>,
                        fast: &dyn FastHash|
         -> Result<(Vec<ColumnDescriptor>, Vec<String>)> {
            match name {
                Some(name) => Ok((
                    fast.column_schema(side.conn, name)?,
                    side.adapter.key_columns(side.conn, name)?,
                )),
                None => Ok((Vec::new(), Vec::new())),
            }
        };
        let (source_meta, target_meta) = rayon::join(
            || metadata(source, &source_name, source_fast),
            || metadata(target, &target_name, target_fast),
        );
        let ((source_columns, source_key), (target_columns, target_key)) = (source_meta?, target_meta?);

        let (schema, mismatch) = comparison_schema(
            &source_columns,
            source.adapter.infers_types(),
            &target_columns,
            target.adapter.infers_types(),
        );
        if source_name.is_some() && target_name.is_some() {
            warnings.extend(mismatch);
        }
        let mut key_warnings = Vec::new();
        let key = self.resolve_key(&display_name, &schema, &source_key, &target_key, &mut key_warnings);
        if key.source == KeySource::AllColumns {
            log::debug!("'{}' has no key, comparing full snapshots", display_name);
            return self.scan_by_snapshot(table, source, target, cancel);
        }
        warnings.extend(key_warnings);

        let stream = |side: &SideContext<'_>, name: &Option<String>, fast: &dyn FastHash| -> Result<KeyHashMap> {
            match name {
                Some(name) => fast.load_key_hash_map(side.conn, name, &key.columns, &schema, cancel),
                None => Ok(KeyHashMap::new()),
            }
        };
        let (source_map, target_map) = rayon::join(
            || stream(source, &source_name, source_fast),
            || stream(target, &target_name, target_fast),
        );
        let (source_map, target_map) = (source_map?, target_map?);
        cancel.check()?;

        push_duplicate_warning(&mut warnings, Side::Source, source_map.duplicate_keys);
        push_duplicate_warning(&mut warnings, Side::Target, target_map.duplicate_keys);
        for warning in &warnings {
            log::warn!("{}: {}", display_name, warning);
        }
        Ok(TableScan {
            summary: ChangeDetector::summarize_hashes(&display_name, &source_map, &target_map),
            key,
            warnings,
            streamed: true,
        })
    }

    fn scan_by_snapshot(
        &self,
        table: &str,
        source: &SideContext<'_>,
        target: &SideContext<'_>,
        cancel: &CancellationToken,
    ) -> Result<TableScan> {
        let comparison = self.compare_loaded(table, source, target, cancel)?;
        Ok(TableScan {
            summary: comparison.summary(),
            key: comparison.key,
            warnings: comparison.warnings,
            streamed: false,
        })
    }

    /// Natural key of the source, then the target, then the custom key
    /// store, then every column
    fn resolve_key(
        &self,
        table: &str,
        schema: &[ColumnDescriptor],
        source_key: &[String],
        target_key: &[String],
        warnings: &mut Vec<ComparisonWarning>,
    ) -> ResolvedKey {
        for natural in [source_key, target_key] {
            if let Some(columns) = schema_names(schema, natural) {
                return ResolvedKey {
                    columns,
                    source: KeySource::Natural,
                };
            }
        }

        if let Some(custom) = self.custom_keys.custom_key(table) {
            match schema_names(schema, &custom) {
                Some(columns) => {
                    return ResolvedKey {
                        columns,
                        source: KeySource::Custom,
                    }
                }
                None => warnings.push(ComparisonWarning::KeyResolution {
                    message: format!(
                        "custom key [{}] does not match the columns of '{}'",
                        custom.join(", "),
                        table
                    ),
                }),
            }
        }

        warnings.push(ComparisonWarning::KeyResolution {
            message: format!("no natural or custom key for '{}', using all columns", table),
        });
        ResolvedKey {
            columns: schema.iter().map(|c| c.name.clone()).collect(),
            source: KeySource::AllColumns,
        }
    }
}

impl fmt::Debug for ComparisonService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComparisonService")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish()
    }
}

/// Map key names onto schema names; `None` when empty or any is missing
fn schema_names(schema: &[ColumnDescriptor], names: &[String]) -> Option<Vec<String>> {
    if names.is_empty() {
        return None;
    }
    names
        .iter()
        .map(|name| column_ordinal(schema, name).map(|i| schema[i].name.clone()))
        .collect()
}

fn missing_table_warnings(table: &str, in_source: bool, in_target: bool) -> Result<Vec<ComparisonWarning>> {
    match (in_source, in_target) {
        (false, false) => Err(ReconError::table_not_found(table)),
        (true, false) => Ok(vec![ComparisonWarning::TableMissing { side: Side::Target }]),
        (false, true) => Ok(vec![ComparisonWarning::TableMissing { side: Side::Source }]),
        (true, true) => Ok(Vec::new()),
    }
}

fn push_duplicate_warning(warnings: &mut Vec<ComparisonWarning>, side: Side, count: usize) {
    if count > 0 {
        warnings.push(ComparisonWarning::DuplicateKeys { side, count });
    }
}

/// Source columns in order, then target-only columns. The declared type
/// comes from the source unless the source does not know it.
pub fn union_schema(
    source: &[ColumnDescriptor],
    target: &[ColumnDescriptor],
) -> (Vec<ColumnDescriptor>, Option<ComparisonWarning>) {
    let mut schema: Vec<ColumnDescriptor> = Vec::with_capacity(source.len() + target.len());
    let mut missing_in_target = Vec::new();
    for column in source {
        let mut merged = column.clone();
        match column_ordinal(target, &column.name) {
            Some(i) if merged.column_type == ColumnType::Unknown => merged.column_type = target[i].column_type,
            Some(_) => {}
            None => missing_in_target.push(column.name.clone()),
        }
        schema.push(merged);
    }
    let mut missing_in_source = Vec::new();
    for column in target {
        if column_ordinal(source, &column.name).is_none() {
            missing_in_source.push(column.name.clone());
            schema.push(column.clone());
        }
    }

    let warning = if missing_in_source.is_empty() && missing_in_target.is_empty() {
        None
    } else {
        Some(ComparisonWarning::SchemaMismatch {
            missing_in_source,
            missing_in_target,
        })
    };
    (schema, warning)
}

/// Union schema for a comparison. Declared types beat inferred ones: the
/// source decides unless only the target declares its column types.
pub fn comparison_schema(
    source: &[ColumnDescriptor],
    source_inferred: bool,
    target: &[ColumnDescriptor],
    target_inferred: bool,
) -> (Vec<ColumnDescriptor>, Option<ComparisonWarning>) {
    let (mut schema, warning) = union_schema(source, target);
    if source_inferred && !target_inferred {
        for column in &mut schema {
            if let Some(declared) = column_ordinal(target, &column.name)
                .map(|i| target[i].column_type)
                .filter(|t| *t != ColumnType::Unknown)
            {
                column.column_type = declared;
            }
        }
    }
    (schema, warning)
}
