//! Folder of delimited files, one file per table

use super::{match_table_name, BackendKind, Capabilities, ConnectionDescriptor, FastHash, TableAdapter};
use crate::apply::{ApplyPlan, ApplyStats, RowOperation};
use crate::cancel::CancellationToken;
use crate::change_detection::RowPair;
use crate::data::{ColumnDescriptor, ColumnType, Row, TableSnapshot, TypeInference, Value};
use crate::error::{ReconError, Result};
use crate::hash::{build_key, ordinals_for, KeyHashMap, StreamingKeyHasher};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const BACKEND: &str = "csv";

/// Delimited-file folder backend. Files are rewritten whole: changes go to
/// a temporary sibling that is renamed over the original.
#[derive(Debug, Default)]
pub struct CsvFolderAdapter;

impl CsvFolderAdapter {
    pub fn new() -> Self {
        Self
    }
}

fn delimiter_for(path: &Path) -> u8 {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("tsv") => b'\t',
        _ => b',',
    }
}

fn require_folder(dir: &Path) -> Result<()> {
    if dir.is_dir() {
        Ok(())
    } else {
        Err(ReconError::backend_unavailable(
            BACKEND,
            format!("folder '{}' not found", dir.display()),
            "Point the connection at an existing folder of .csv or .tsv files",
        ))
    }
}

/// (table name, file path) for every delimited file directly in `dir`
fn table_files(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    require_folder(dir)?;
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry?;
        let path = entry.path();
        let is_table = entry.file_type().is_file()
            && path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.eq_ignore_ascii_case("csv") || e.eq_ignore_ascii_case("tsv"))
                .unwrap_or(false);
        if !is_table {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            files.push((stem.to_string(), path.to_path_buf()));
        }
    }
    Ok(files)
}

fn find_table(dir: &Path, table: &str) -> Result<Option<PathBuf>> {
    let files = table_files(dir)?;
    let names: Vec<String> = files.iter().map(|(name, _)| name.clone()).collect();
    Ok(match_table_name(&names, table)
        .and_then(|name| files.into_iter().find(|(n, _)| *n == name))
        .map(|(_, path)| path))
}

fn resolve_table(dir: &Path, table: &str) -> Result<PathBuf> {
    find_table(dir, table)?.ok_or_else(|| ReconError::table_not_found(table))
}

fn reader(path: &Path) -> Result<csv::Reader<fs::File>> {
    Ok(csv::ReaderBuilder::new()
        .delimiter(delimiter_for(path))
        .flexible(true)
        .from_path(path)?)
}

fn headers(path: &Path) -> Result<Vec<String>> {
    let mut reader = reader(path)?;
    Ok(reader.headers()?.iter().map(str::to_string).collect())
}

/// First pass: header plus an inferred type per column
fn infer_schema(path: &Path, cancel: &CancellationToken) -> Result<Vec<ColumnDescriptor>> {
    let mut reader = reader(path)?;
    let names: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let mut inference = vec![TypeInference::new(); names.len()];

    let mut record = csv::StringRecord::new();
    while reader.read_record(&mut record)? {
        cancel.check()?;
        for (column, value) in inference.iter_mut().zip(record.iter()) {
            column.observe(value);
        }
    }

    Ok(names
        .into_iter()
        .zip(inference)
        .map(|(name, inferred)| ColumnDescriptor::new(name, inferred.finish()))
        .collect())
}

fn parse_field(raw: Option<&str>, declared: ColumnType) -> Value {
    match raw {
        None | Some("") => Value::Null,
        Some(text) => Value::parse_text(text, declared),
    }
}

/// Position of a header label, exact match first
fn header_position(header: &[String], name: &str) -> Option<usize> {
    header
        .iter()
        .position(|h| h == name)
        .or_else(|| header.iter().position(|h| h.eq_ignore_ascii_case(name)))
}

/// Second pass: rows aligned to `schema` and parsed with its declared
/// types. The file's header only locates the columns.
fn stream_rows<F>(
    path: &Path,
    header: &[String],
    schema: &[ColumnDescriptor],
    cancel: &CancellationToken,
    mut visit: F,
) -> Result<()>
where
    F: FnMut(Row),
{
    let present: Vec<Option<usize>> = schema.iter().map(|c| header_position(header, &c.name)).collect();
    let mut reader = reader(path)?;
    let mut record = csv::StringRecord::new();
    while reader.read_record(&mut record)? {
        cancel.check()?;
        let row = present
            .iter()
            .zip(schema)
            .map(|(position, column)| match position {
                Some(i) => parse_field(record.get(*i), column.column_type),
                None => Value::Null,
            })
            .collect();
        visit(row);
    }
    Ok(())
}

/// Text written back to a delimited file; null becomes an empty field
fn render(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S%.f").to_string(),
        Value::Time(t) => t.format("%H:%M:%S%.f").to_string(),
        other => other.to_string(),
    }
}

/// Write `records` to a temporary sibling of `path`, then rename it over
/// `path`. The original is untouched when anything fails.
fn write_atomically(path: &Path, header: &[String], records: &[Vec<String>]) -> Result<()> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| ReconError::invalid_input(format!("Invalid table path '{}'", path.display())))?;
    let temp_path = path.with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

    let write = || -> Result<()> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(delimiter_for(path))
            .from_path(&temp_path)?;
        writer.write_record(header)?;
        for record in records {
            writer.write_record(record)?;
        }
        writer.flush()?;
        drop(writer);
        fs::rename(&temp_path, path)?;
        Ok(())
    };

    write().inspect_err(|_| {
        let _ = fs::remove_file(&temp_path);
    })
}

/// In-memory image of one file for applying changes
struct FileImage {
    header: Vec<String>,
    records: Vec<Vec<String>>,
    index: HashMap<String, usize>,
}

impl FileImage {
    /// Read the file, indexing records by key parsed with the plan's
    /// declared key types
    fn load(path: &Path, plan: &ApplyPlan) -> Result<Self> {
        let header = headers(path)?;
        let key_positions = plan
            .key_columns
            .iter()
            .map(|name| header_position(&header, name))
            .collect::<Option<Vec<usize>>>()
            .ok_or_else(|| {
                ReconError::schema_mismatch(format!(
                    "Key columns [{}] do not exist in '{}'",
                    plan.key_columns.join(", "),
                    path.display()
                ))
            })?;
        let key_schema = Self::key_schema(plan);

        let mut reader = reader(path)?;
        let mut records = Vec::new();
        let mut index = HashMap::new();
        for record in reader.records() {
            let record = record?;
            let mut raw: Vec<String> = record.iter().map(str::to_string).collect();
            raw.resize(header.len(), String::new());
            let key_values: Row = key_positions
                .iter()
                .zip(&key_schema)
                .map(|(&i, column)| parse_field(raw.get(i).map(String::as_str), column.column_type))
                .collect();
            index.insert(Self::key_of(&key_values, &key_schema), records.len());
            records.push(raw);
        }
        Ok(Self { header, records, index })
    }

    /// Key columns of the plan in key order
    fn key_schema(plan: &ApplyPlan) -> Vec<ColumnDescriptor> {
        plan.key_ordinals.iter().map(|&i| plan.columns[i].clone()).collect()
    }

    fn key_of(values: &[Value], key_schema: &[ColumnDescriptor]) -> String {
        let ordinals: Vec<usize> = (0..values.len()).collect();
        build_key(values, &ordinals, key_schema)
    }
}

impl TableAdapter for CsvFolderAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::CsvFolder
    }

    fn list_tables(&self, conn: &ConnectionDescriptor) -> Result<Vec<String>> {
        Ok(table_files(conn.path())?.into_iter().map(|(name, _)| name).collect())
    }

    fn load_full_table(
        &self,
        conn: &ConnectionDescriptor,
        table: &str,
        cancel: &CancellationToken,
    ) -> Result<TableSnapshot> {
        let path = resolve_table(conn.path(), table)?;
        let schema = infer_schema(&path, cancel)?;
        let header: Vec<String> = schema.iter().map(|c| c.name.clone()).collect();
        let mut snapshot = TableSnapshot::new(schema.clone());
        stream_rows(&path, &header, &schema, cancel, |row| snapshot.rows.push(row))?;
        log::debug!("Loaded {} rows from '{}'", snapshot.rows.len(), path.display());
        Ok(snapshot)
    }

    fn infers_types(&self) -> bool {
        true
    }

    fn load_table_as(
        &self,
        conn: &ConnectionDescriptor,
        table: &str,
        schema: &[ColumnDescriptor],
        cancel: &CancellationToken,
    ) -> Result<TableSnapshot> {
        let path = resolve_table(conn.path(), table)?;
        let header = headers(&path)?;
        let mut snapshot = TableSnapshot::new(schema.to_vec());
        stream_rows(&path, &header, schema, cancel, |row| snapshot.rows.push(row))?;
        log::debug!("Loaded {} rows from '{}' as declared", snapshot.rows.len(), path.display());
        Ok(snapshot)
    }

    fn key_columns(&self, conn: &ConnectionDescriptor, table: &str) -> Result<Vec<String>> {
        resolve_table(conn.path(), table)?;
        Ok(Vec::new())
    }

    fn capabilities(&self, _conn: &ConnectionDescriptor) -> Capabilities {
        Capabilities::ALL
    }

    fn apply_row_changes(
        &self,
        conn: &ConnectionDescriptor,
        table: &str,
        schema: &[ColumnDescriptor],
        key_columns: &[String],
        pairs: &[RowPair],
    ) -> Result<ApplyStats> {
        let plan = ApplyPlan::build(schema, key_columns, pairs)?;
        let path = resolve_table(conn.path(), table)?;
        let mut image = FileImage::load(&path, &plan)?;
        let key_schema = FileImage::key_schema(&plan);
        let writable = plan.writable_columns(&image.header)?;
        let positions: Vec<(usize, usize, bool)> = writable
            .iter()
            .filter_map(|w| {
                image
                    .header
                    .iter()
                    .position(|h| *h == w.name)
                    .map(|position| (w.ordinal, position, w.is_key))
            })
            .collect();

        let mut stats = ApplyStats::default();
        let mut deleted = vec![false; image.records.len()];

        for operation in &plan.operations {
            match operation {
                RowOperation::Delete { key } => {
                    if let Some(index) = image.index.remove(&FileImage::key_of(key, &key_schema)) {
                        deleted[index] = true;
                        stats.deleted += 1;
                    }
                }
                RowOperation::Update { row } | RowOperation::Upsert { row } => {
                    let key_values: Row = plan.key_values(row).into_iter().cloned().collect();
                    let key = FileImage::key_of(&key_values, &key_schema);
                    match image.index.get(&key) {
                        Some(&index) => {
                            let record = &mut image.records[index];
                            for &(ordinal, position, is_key) in &positions {
                                if !is_key {
                                    record[position] = row.get(ordinal).map(render).unwrap_or_default();
                                }
                            }
                            stats.updated += 1;
                        }
                        None => {
                            let mut record = vec![String::new(); image.header.len()];
                            for &(ordinal, position, _) in &positions {
                                record[position] = row.get(ordinal).map(render).unwrap_or_default();
                            }
                            image.index.insert(key, image.records.len());
                            image.records.push(record);
                            deleted.push(false);
                            stats.inserted += 1;
                        }
                    }
                }
            }
        }

        let kept: Vec<Vec<String>> = image
            .records
            .into_iter()
            .zip(deleted)
            .filter(|(_, gone)| !gone)
            .map(|(record, _)| record)
            .collect();
        write_atomically(&path, &image.header, &kept)?;
        log::debug!("Rewrote '{}' with {} rows", path.display(), kept.len());
        Ok(stats)
    }

    fn replace_table(
        &self,
        conn: &ConnectionDescriptor,
        table: &str,
        snapshot: &TableSnapshot,
    ) -> Result<()> {
        let dir = conn.path();
        if !dir.exists() {
            fs::create_dir_all(dir)?;
        }
        let (path, header) = match find_table(dir, table)? {
            Some(path) => {
                let header = headers(&path)?;
                (path, header)
            }
            None => (
                dir.join(format!("{}.csv", table)),
                snapshot.column_names().into_iter().map(str::to_string).collect(),
            ),
        };

        let mapping: Vec<Option<usize>> = header.iter().map(|name| snapshot.ordinal(name)).collect();
        if mapping.iter().all(Option::is_none) {
            return Err(ReconError::schema_mismatch(format!(
                "No snapshot column exists in '{}'",
                path.display()
            )));
        }
        let records: Vec<Vec<String>> = snapshot
            .rows
            .iter()
            .map(|row| {
                mapping
                    .iter()
                    .map(|ordinal| ordinal.and_then(|i| row.get(i)).map(render).unwrap_or_default())
                    .collect()
            })
            .collect();

        write_atomically(&path, &header, &records)?;
        log::info!("Replaced '{}' with {} rows", path.display(), records.len());
        Ok(())
    }

    fn drop_table(&self, conn: &ConnectionDescriptor, table: &str) -> Result<()> {
        let path = resolve_table(conn.path(), table)?;
        fs::remove_file(&path)?;
        log::info!("Dropped '{}'", path.display());
        Ok(())
    }

    fn fast_hash(&self) -> Option<&dyn FastHash> {
        Some(self)
    }
}

impl FastHash for CsvFolderAdapter {
    fn column_schema(&self, conn: &ConnectionDescriptor, table: &str) -> Result<Vec<ColumnDescriptor>> {
        let path = resolve_table(conn.path(), table)?;
        infer_schema(&path, &CancellationToken::new())
    }

    fn load_key_hash_map(
        &self,
        conn: &ConnectionDescriptor,
        table: &str,
        key_columns: &[String],
        schema: &[ColumnDescriptor],
        cancel: &CancellationToken,
    ) -> Result<KeyHashMap> {
        let key_ordinals = ordinals_for(schema, key_columns).ok_or_else(|| {
            ReconError::key_resolution(format!(
                "Key columns [{}] missing from schema of '{}'",
                key_columns.join(", "),
                table
            ))
        })?;
        let path = resolve_table(conn.path(), table)?;
        let header = headers(&path)?;
        let mut hasher = StreamingKeyHasher::new(schema, key_ordinals);
        stream_rows(&path, &header, schema, cancel, |row| hasher.add_row(&row))?;
        Ok(hasher.finish())
    }
}
