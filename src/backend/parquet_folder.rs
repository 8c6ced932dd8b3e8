//! Folder of Parquet files, read only

use super::{match_table_name, BackendKind, Capabilities, ConnectionDescriptor, FastHash, TableAdapter};
use crate::cancel::CancellationToken;
use crate::data::{column_ordinal, ColumnDescriptor, ColumnType, Row, TableSnapshot, Value};
use crate::error::{ReconError, Result};
use crate::hash::{ordinals_for, KeyHashMap, StreamingKeyHasher};
use chrono::{DateTime, NaiveDate, NaiveTime};
use parquet::basic::{ConvertedType, Type as PhysicalType};
use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::record::Field;
use std::fs::File;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const BACKEND: &str = "parquet";

/// Days from 0001-01-01 to 1970-01-01
const UNIX_EPOCH_DAY_FROM_CE: i32 = 719_163;

#[derive(Debug, Default)]
pub struct ParquetFolderAdapter;

impl ParquetFolderAdapter {
    pub fn new() -> Self {
        Self
    }
}

fn table_files(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    if !dir.is_dir() {
        return Err(ReconError::backend_unavailable(
            BACKEND,
            format!("folder '{}' not found", dir.display()),
            "Point the connection at an existing folder of .parquet files",
        ));
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry?;
        let path = entry.path();
        let is_parquet = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("parquet"))
            .unwrap_or(false);
        if entry.file_type().is_file() && is_parquet {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                files.push((stem.to_string(), path.to_path_buf()));
            }
        }
    }
    Ok(files)
}

fn resolve_table(dir: &Path, table: &str) -> Result<PathBuf> {
    let files = table_files(dir)?;
    let names: Vec<String> = files.iter().map(|(name, _)| name.clone()).collect();
    match_table_name(&names, table)
        .and_then(|name| files.into_iter().find(|(n, _)| *n == name))
        .map(|(_, path)| path)
        .ok_or_else(|| ReconError::table_not_found(table))
}

fn open(path: &Path) -> Result<SerializedFileReader<File>> {
    Ok(SerializedFileReader::new(File::open(path)?)?)
}

/// Top-level columns of the file with their declared types
fn file_schema(reader: &SerializedFileReader<File>) -> Vec<ColumnDescriptor> {
    let root = reader.metadata().file_metadata().schema();
    root.get_fields()
        .iter()
        .map(|field| {
            let column_type = if field.is_primitive() {
                let info = field.get_basic_info();
                match info.converted_type() {
                    ConvertedType::UTF8 | ConvertedType::ENUM | ConvertedType::JSON => ColumnType::Text,
                    ConvertedType::DECIMAL => ColumnType::Decimal,
                    ConvertedType::DATE => ColumnType::Date,
                    ConvertedType::TIME_MILLIS | ConvertedType::TIME_MICROS => ColumnType::Time,
                    ConvertedType::TIMESTAMP_MILLIS | ConvertedType::TIMESTAMP_MICROS => {
                        ColumnType::DateTime
                    }
                    _ => match field.get_physical_type() {
                        PhysicalType::BOOLEAN => ColumnType::Boolean,
                        PhysicalType::INT32 | PhysicalType::INT64 => ColumnType::Integer,
                        PhysicalType::FLOAT | PhysicalType::DOUBLE => ColumnType::Float,
                        PhysicalType::INT96 => ColumnType::DateTime,
                        PhysicalType::BYTE_ARRAY | PhysicalType::FIXED_LEN_BYTE_ARRAY => {
                            ColumnType::Binary
                        }
                    },
                }
            } else {
                ColumnType::Text
            };
            ColumnDescriptor::new(field.name(), column_type)
        })
        .collect()
}

fn from_epoch(seconds: i64, nanos: u32) -> Value {
    DateTime::from_timestamp(seconds, nanos)
        .map(|dt| Value::DateTime(dt.naive_utc()))
        .unwrap_or(Value::Null)
}

fn time_of_day(micros: i64) -> Value {
    let seconds = micros.div_euclid(1_000_000);
    let nanos = (micros.rem_euclid(1_000_000) * 1_000) as u32;
    u32::try_from(seconds)
        .ok()
        .and_then(|s| NaiveTime::from_num_seconds_from_midnight_opt(s, nanos))
        .map(Value::Time)
        .unwrap_or(Value::Null)
}

fn from_field(field: &Field) -> Value {
    match field {
        Field::Null => Value::Null,
        Field::Bool(b) => Value::Bool(*b),
        Field::Byte(i) => Value::Int(i64::from(*i)),
        Field::Short(i) => Value::Int(i64::from(*i)),
        Field::Int(i) => Value::Int(i64::from(*i)),
        Field::Long(i) => Value::Int(*i),
        Field::UByte(i) => Value::Int(i64::from(*i)),
        Field::UShort(i) => Value::Int(i64::from(*i)),
        Field::UInt(i) => Value::Int(i64::from(*i)),
        Field::ULong(i) => i64::try_from(*i)
            .map(Value::Int)
            .unwrap_or_else(|_| Value::decimal(i.to_string())),
        Field::Float(f) => f.to_string().parse::<f64>().map(Value::Float).unwrap_or(Value::Null),
        Field::Double(f) => Value::Float(*f),
        Field::Decimal(_) => Value::decimal(field.to_string()),
        Field::Str(s) => Value::Text(s.clone()),
        Field::Bytes(bytes) => Value::Bytes(bytes.data().to_vec()),
        Field::Date(days) => NaiveDate::from_num_days_from_ce_opt(days + UNIX_EPOCH_DAY_FROM_CE)
            .map(Value::Date)
            .unwrap_or(Value::Null),
        Field::TimestampMillis(ms) => from_epoch(ms.div_euclid(1_000), (ms.rem_euclid(1_000) * 1_000_000) as u32),
        Field::TimestampMicros(us) => {
            from_epoch(us.div_euclid(1_000_000), (us.rem_euclid(1_000_000) * 1_000) as u32)
        }
        Field::TimeMillis(ms) => time_of_day(i64::from(*ms) * 1_000),
        Field::TimeMicros(us) => time_of_day(*us),
        other => Value::Text(other.to_string()),
    }
}

fn stream_rows<F>(
    reader: &SerializedFileReader<File>,
    file_columns: &[ColumnDescriptor],
    schema: &[ColumnDescriptor],
    cancel: &CancellationToken,
    mut visit: F,
) -> Result<()>
where
    F: FnMut(Row),
{
    let present: Vec<Option<usize>> = schema.iter().map(|c| column_ordinal(file_columns, &c.name)).collect();
    for record in reader.get_row_iter(None)? {
        cancel.check()?;
        let record = record?;
        let values: Vec<Value> = record.get_column_iter().map(|(_, field)| from_field(field)).collect();
        let row = present
            .iter()
            .map(|ordinal| ordinal.and_then(|i| values.get(i).cloned()).unwrap_or(Value::Null))
            .collect();
        visit(row);
    }
    Ok(())
}

impl TableAdapter for ParquetFolderAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::ParquetFolder
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
        let reader = open(&path)?;
        let columns = file_schema(&reader);
        let mut snapshot = TableSnapshot::new(columns.clone());
        stream_rows(&reader, &columns, &columns, cancel, |row| snapshot.rows.push(row))?;
        log::debug!("Loaded {} rows from '{}'", snapshot.rows.len(), path.display());
        Ok(snapshot)
    }

    fn key_columns(&self, conn: &ConnectionDescriptor, table: &str) -> Result<Vec<String>> {
        resolve_table(conn.path(), table)?;
        Ok(Vec::new())
    }

    fn capabilities(&self, _conn: &ConnectionDescriptor) -> Capabilities {
        Capabilities::READ
    }

    fn fast_hash(&self) -> Option<&dyn FastHash> {
        Some(self)
    }
}

impl FastHash for ParquetFolderAdapter {
    fn column_schema(&self, conn: &ConnectionDescriptor, table: &str) -> Result<Vec<ColumnDescriptor>> {
        let path = resolve_table(conn.path(), table)?;
        Ok(file_schema(&open(&path)?))
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
        let reader = open(&path)?;
        let columns = file_schema(&reader);
        let mut hasher = StreamingKeyHasher::new(schema, key_ordinals);
        stream_rows(&reader, &columns, schema, cancel, |row| hasher.add_row(&row))?;
        Ok(hasher.finish())
    }
}
