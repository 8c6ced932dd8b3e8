//! DuckDB database file backend

use super::sql::{self, Dialect, SqlExecutor};
use super::{match_table_name, BackendKind, Capabilities, ConnectionDescriptor, FastHash, TableAdapter};
use crate::affinity::AffinityCoordinator;
use crate::apply::{ApplyPlan, ApplyStats};
use crate::cancel::CancellationToken;
use crate::change_detection::RowPair;
use crate::data::{column_ordinal, ColumnDescriptor, ColumnType, Row, TableSnapshot, Value};
use crate::duckdb_config;
use crate::error::{ReconError, Result};
use crate::hash::{ordinals_for, KeyHashMap, StreamingKeyHasher};
use chrono::{DateTime, NaiveDate, NaiveTime};
use duckdb::types::{TimeUnit, ToSqlOutput, Value as DuckValue, ValueRef};
use duckdb::{params_from_iter, Connection, ToSql};
use std::path::Path;
use std::sync::Arc;

const BACKEND: &str = "duckdb";

/// Days from 0001-01-01 to 1970-01-01
const UNIX_EPOCH_DAY_FROM_CE: i32 = 719_163;

/// DuckDB file backend; native calls are pinned through the coordinator
pub struct DuckDbAdapter {
    coordinator: Arc<AffinityCoordinator>,
}

impl DuckDbAdapter {
    pub fn new(coordinator: Arc<AffinityCoordinator>) -> Self {
        Self { coordinator }
    }

    fn run<R, F>(&self, conn: &ConnectionDescriptor, job: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<R> + Send + 'static,
    {
        sql::run_pinned(&self.coordinator, conn, open_existing, job)
    }
}

fn open_existing(path: &Path) -> Result<Connection> {
    duckdb_config::ensure_available()?;
    sql::require_file(BACKEND, path)?;
    Ok(Connection::open(path)?)
}

fn open_or_create(path: &Path) -> Result<Connection> {
    duckdb_config::ensure_available()?;
    Ok(Connection::open(path)?)
}

impl ToSql for Value {
    fn to_sql(&self) -> duckdb::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(DuckValue::Null),
            Value::Bool(b) => ToSqlOutput::Owned(DuckValue::Boolean(*b)),
            Value::Int(i) => ToSqlOutput::Owned(DuckValue::BigInt(*i)),
            Value::Float(f) => ToSqlOutput::Owned(DuckValue::Double(*f)),
            Value::Bytes(bytes) => ToSqlOutput::Borrowed(ValueRef::Blob(bytes)),
            // Temporal values bind as text and are cast by the engine
            Value::DateTime(dt) => {
                ToSqlOutput::Owned(DuckValue::Text(dt.format("%Y-%m-%d %H:%M:%S%.6f").to_string()))
            }
            Value::Time(t) => ToSqlOutput::Owned(DuckValue::Text(t.format("%H:%M:%S%.6f").to_string())),
            other => ToSqlOutput::Owned(DuckValue::Text(other.to_string())),
        })
    }
}

struct Exec<'a>(&'a Connection);

impl SqlExecutor for Exec<'_> {
    fn execute(&mut self, sql: &str, params: &[&Value]) -> Result<usize> {
        Ok(self.0.execute(sql, params_from_iter(params.iter().copied()))?)
    }

    fn count(&mut self, sql: &str, params: &[&Value]) -> Result<i64> {
        Ok(self
            .0
            .query_row(sql, params_from_iter(params.iter().copied()), |row| row.get::<_, i64>(0))?)
    }
}

/// Split an epoch offset in `unit` into whole seconds and nanoseconds
fn split_epoch(unit: TimeUnit, value: i64) -> (i64, u32) {
    let (per_second, nanos_per_unit) = match unit {
        TimeUnit::Second => (1, 1_000_000_000),
        TimeUnit::Millisecond => (1_000, 1_000_000),
        TimeUnit::Microsecond => (1_000_000, 1_000),
        TimeUnit::Nanosecond => (1_000_000_000, 1),
    };
    (
        value.div_euclid(per_second),
        (value.rem_euclid(per_second) * nanos_per_unit) as u32,
    )
}

/// Convert one DuckDB cell into a typed value
fn from_duckdb(value: ValueRef<'_>, declared: ColumnType) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Boolean(b) => Value::Bool(b),
        ValueRef::TinyInt(i) => Value::Int(i64::from(i)),
        ValueRef::SmallInt(i) => Value::Int(i64::from(i)),
        ValueRef::Int(i) => Value::Int(i64::from(i)),
        ValueRef::BigInt(i) => Value::Int(i),
        ValueRef::UTinyInt(i) => Value::Int(i64::from(i)),
        ValueRef::USmallInt(i) => Value::Int(i64::from(i)),
        ValueRef::UInt(i) => Value::Int(i64::from(i)),
        ValueRef::UBigInt(i) => i64::try_from(i)
            .map(Value::Int)
            .unwrap_or_else(|_| Value::decimal(i.to_string())),
        ValueRef::HugeInt(i) => i64::try_from(i)
            .map(Value::Int)
            .unwrap_or_else(|_| Value::decimal(i.to_string())),
        // Shortest f32 text so 1.1f32 does not widen to 1.100000023841858
        ValueRef::Float(f) => f.to_string().parse::<f64>().map(Value::Float).unwrap_or(Value::Null),
        ValueRef::Double(f) => Value::Float(f),
        ValueRef::Decimal(d) => Value::decimal(d.to_string()),
        ValueRef::Text(bytes) => {
            let text = String::from_utf8_lossy(bytes);
            match declared {
                ColumnType::Text | ColumnType::Unknown | ColumnType::Binary => {
                    Value::Text(text.into_owned())
                }
                other => Value::parse_text(&text, other),
            }
        }
        ValueRef::Blob(bytes) => Value::Bytes(bytes.to_vec()),
        ValueRef::Date32(days) => NaiveDate::from_num_days_from_ce_opt(days + UNIX_EPOCH_DAY_FROM_CE)
            .map(Value::Date)
            .unwrap_or(Value::Null),
        ValueRef::Timestamp(unit, raw) => {
            let (seconds, nanos) = split_epoch(unit, raw);
            DateTime::from_timestamp(seconds, nanos)
                .map(|dt| Value::DateTime(dt.naive_utc()))
                .unwrap_or(Value::Null)
        }
        ValueRef::Time64(unit, raw) => {
            let (seconds, nanos) = split_epoch(unit, raw);
            u32::try_from(seconds)
                .ok()
                .and_then(|s| NaiveTime::from_num_seconds_from_midnight_opt(s, nanos))
                .map(Value::Time)
                .unwrap_or(Value::Null)
        }
        other => Value::Text(format!("{:?}", other)),
    }
}

fn list_tables(connection: &Connection) -> Result<Vec<String>> {
    let mut stmt = connection.prepare(
        "SELECT table_name FROM information_schema.tables \
         WHERE table_schema = 'main' AND table_type = 'BASE TABLE' ORDER BY table_name",
    )?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<duckdb::Result<Vec<_>>>()?;
    Ok(names)
}

fn resolve_table(connection: &Connection, table: &str) -> Result<String> {
    match_table_name(&list_tables(connection)?, table).ok_or_else(|| ReconError::table_not_found(table))
}

fn column_schema(connection: &Connection, table: &str) -> Result<Vec<ColumnDescriptor>> {
    let mut stmt = connection.prepare(
        "SELECT column_name, data_type FROM information_schema.columns \
         WHERE table_schema = 'main' AND table_name = ? ORDER BY ordinal_position",
    )?;
    let columns = stmt
        .query_map(duckdb::params![table], |row| {
            let name: String = row.get(0)?;
            let data_type: String = row.get(1)?;
            Ok(ColumnDescriptor::new(name, ColumnType::from_sql_type(&data_type)))
        })?
        .collect::<duckdb::Result<Vec<_>>>()?;
    Ok(columns)
}

fn primary_key(connection: &Connection, table: &str) -> Result<Vec<String>> {
    let query = "SELECT kcu.column_name FROM information_schema.key_column_usage kcu \
         JOIN information_schema.table_constraints tc \
           ON tc.constraint_name = kcu.constraint_name \
          AND tc.table_schema = kcu.table_schema \
          AND tc.table_name = kcu.table_name \
         WHERE tc.constraint_type = 'PRIMARY KEY' AND tc.table_schema = 'main' AND tc.table_name = ? \
         ORDER BY kcu.ordinal_position";
    let result = connection.prepare(query).and_then(|mut stmt| {
        let columns = stmt
            .query_map(duckdb::params![table], |row| row.get::<_, String>(0))?
            .collect::<duckdb::Result<Vec<_>>>();
        columns
    });
    match result {
        Ok(columns) => Ok(columns),
        Err(err) => {
            log::debug!("Primary key lookup for '{}' failed: {}", table, err);
            Ok(Vec::new())
        }
    }
}

fn stream_rows<F>(
    connection: &Connection,
    table: &str,
    schema: &[ColumnDescriptor],
    cancel: &CancellationToken,
    mut visit: F,
) -> Result<()>
where
    F: FnMut(Row),
{
    let existing = column_schema(connection, table)?;
    let present: Vec<Option<usize>> = schema.iter().map(|c| column_ordinal(&existing, &c.name)).collect();
    let selected: Vec<String> = present
        .iter()
        .flatten()
        .map(|&i| existing[i].name.clone())
        .collect();
    if selected.is_empty() {
        return Ok(());
    }

    let mut stmt = connection.prepare(&sql::select_all_sql(table, &selected))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        cancel.check()?;
        let mut values = Vec::with_capacity(schema.len());
        let mut position = 0;
        for (column, ordinal) in schema.iter().zip(&present) {
            if ordinal.is_some() {
                values.push(from_duckdb(row.get_ref(position)?, column.column_type));
                position += 1;
            } else {
                values.push(Value::Null);
            }
        }
        visit(values);
    }
    Ok(())
}

impl TableAdapter for DuckDbAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::DuckDb
    }

    fn list_tables(&self, conn: &ConnectionDescriptor) -> Result<Vec<String>> {
        self.run(conn, |connection| list_tables(connection))
    }

    fn load_full_table(
        &self,
        conn: &ConnectionDescriptor,
        table: &str,
        cancel: &CancellationToken,
    ) -> Result<TableSnapshot> {
        let table = table.to_string();
        let cancel = cancel.clone();
        self.run(conn, move |connection| {
            let name = resolve_table(connection, &table)?;
            let columns = column_schema(connection, &name)?;
            let mut snapshot = TableSnapshot::new(columns.clone());
            stream_rows(connection, &name, &columns, &cancel, |row| snapshot.rows.push(row))?;
            log::debug!("Loaded {} rows from duckdb table '{}'", snapshot.rows.len(), name);
            Ok(snapshot)
        })
    }

    fn key_columns(&self, conn: &ConnectionDescriptor, table: &str) -> Result<Vec<String>> {
        let table = table.to_string();
        self.run(conn, move |connection| {
            let name = resolve_table(connection, &table)?;
            primary_key(connection, &name)
        })
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
        let table = table.to_string();
        self.run(conn, move |connection| {
            let name = resolve_table(connection, &table)?;
            let target_columns: Vec<String> = column_schema(connection, &name)?
                .into_iter()
                .map(|c| c.name)
                .collect();

            let tx = connection.transaction()?;
            let stats = sql::execute_plan(&mut Exec(&tx), Dialect::DuckDb, &name, &plan, &target_columns)?;
            tx.commit()?;
            Ok(stats)
        })
    }

    fn replace_table(
        &self,
        conn: &ConnectionDescriptor,
        table: &str,
        snapshot: &TableSnapshot,
    ) -> Result<()> {
        let table = table.to_string();
        let snapshot = snapshot.clone();
        let run = move |connection: &mut Connection| -> Result<()> {
            let (name, existing_columns) = match match_table_name(&list_tables(connection)?, &table) {
                Some(name) => {
                    let columns = column_schema(connection, &name)?;
                    (name, Some(columns.into_iter().map(|c| c.name).collect()))
                }
                None => (table.clone(), None),
            };

            let tx = connection.transaction()?;
            let inserted = sql::replace_rows(
                &mut Exec(&tx),
                &name,
                &snapshot,
                existing_columns,
                &CancellationToken::new(),
            )?;
            tx.commit()?;
            log::info!("Replaced duckdb table '{}' with {} rows", name, inserted);
            Ok(())
        };
        if conn.location.is_file() {
            self.run(conn, run)
        } else {
            sql::run_pinned(&self.coordinator, conn, open_or_create, run)
        }
    }

    fn drop_table(&self, conn: &ConnectionDescriptor, table: &str) -> Result<()> {
        let table = table.to_string();
        self.run(conn, move |connection| {
            let name = resolve_table(connection, &table)?;
            connection.execute(&sql::drop_table_sql(&name), [])?;
            log::info!("Dropped duckdb table '{}'", name);
            Ok(())
        })
    }

    fn fast_hash(&self) -> Option<&dyn FastHash> {
        Some(self)
    }

    fn begin_batch(&self, conn: &ConnectionDescriptor) -> Result<()> {
        sql::lease_pinned(&self.coordinator, conn, open_existing)
    }

    fn end_batch(&self, conn: &ConnectionDescriptor) -> Result<()> {
        sql::release_pinned(&self.coordinator, conn)
    }
}

impl FastHash for DuckDbAdapter {
    fn column_schema(&self, conn: &ConnectionDescriptor, table: &str) -> Result<Vec<ColumnDescriptor>> {
        let table = table.to_string();
        self.run(conn, move |connection| {
            let name = resolve_table(connection, &table)?;
            column_schema(connection, &name)
        })
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
        let table = table.to_string();
        let schema = schema.to_vec();
        let cancel = cancel.clone();
        self.run(conn, move |connection| {
            let name = resolve_table(connection, &table)?;
            let mut hasher = StreamingKeyHasher::new(&schema, key_ordinals);
            stream_rows(connection, &name, &schema, &cancel, |row| hasher.add_row(&row))?;
            Ok(hasher.finish())
        })
    }
}
