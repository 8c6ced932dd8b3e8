//! SQLite database file backend

use super::sql::{self, Dialect, SqlExecutor};
use super::{match_table_name, BackendKind, Capabilities, ConnectionDescriptor, FastHash, TableAdapter};
use crate::affinity::AffinityCoordinator;
use crate::apply::{ApplyPlan, ApplyStats};
use crate::cancel::CancellationToken;
use crate::change_detection::RowPair;
use crate::data::{ColumnDescriptor, ColumnType, Row, TableSnapshot, Value};
use crate::error::{ReconError, Result};
use crate::hash::{ordinals_for, KeyHashMap, StreamingKeyHasher};
use rusqlite::types::{ToSqlOutput, Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, OpenFlags, ToSql};
use std::path::Path;
use std::sync::Arc;

const BACKEND: &str = "sqlite";

/// SQLite file backend; every native call runs on the connection's
/// affinity worker
pub struct SqliteAdapter {
    coordinator: Arc<AffinityCoordinator>,
}

impl SqliteAdapter {
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
    sql::require_file(BACKEND, path)?;
    Ok(Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?)
}

fn open_or_create(path: &Path) -> Result<Connection> {
    Ok(Connection::open(path)?)
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(SqlValue::Null),
            Value::Bool(b) => ToSqlOutput::Owned(SqlValue::Integer(i64::from(*b))),
            Value::Int(i) => ToSqlOutput::Owned(SqlValue::Integer(*i)),
            Value::Float(f) => ToSqlOutput::Owned(SqlValue::Real(*f)),
            Value::Bytes(bytes) => ToSqlOutput::Borrowed(ValueRef::Blob(bytes)),
            other => ToSqlOutput::Owned(SqlValue::Text(other.to_string())),
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
            .query_row(sql, params_from_iter(params.iter().copied()), |row| row.get(0))?)
    }
}

/// Convert one SQLite cell, honoring the declared column type
fn from_sqlite(value: ValueRef<'_>, declared: ColumnType) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => match declared {
            ColumnType::Boolean if i == 0 || i == 1 => Value::Bool(i == 1),
            ColumnType::Decimal => Value::decimal(i.to_string()),
            ColumnType::Float => Value::Float(i as f64),
            _ => Value::Int(i),
        },
        ValueRef::Real(f) => match declared {
            ColumnType::Decimal => Value::decimal(f.to_string()),
            _ => Value::Float(f),
        },
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
    }
}

fn list_tables(connection: &Connection) -> Result<Vec<String>> {
    let mut stmt = connection.prepare(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(names)
}

/// Resolve the stored table name, failing when it does not exist
fn resolve_table(connection: &Connection, table: &str) -> Result<String> {
    match_table_name(&list_tables(connection)?, table).ok_or_else(|| ReconError::table_not_found(table))
}

/// Column descriptors and primary key columns (in key order)
fn table_info(connection: &Connection, table: &str) -> Result<(Vec<ColumnDescriptor>, Vec<String>)> {
    let mut stmt = connection.prepare(&format!("PRAGMA table_info({})", sql::quote_ident(table)))?;
    let mut columns = Vec::new();
    let mut key = Vec::new();
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        let declared: String = row.get::<_, Option<String>>(2)?.unwrap_or_default();
        let pk: i64 = row.get(5)?;
        if pk > 0 {
            key.push((pk, name.clone()));
        }
        columns.push(ColumnDescriptor::new(name, ColumnType::from_sql_type(&declared)));
    }
    key.sort_by_key(|(position, _)| *position);
    Ok((columns, key.into_iter().map(|(_, name)| name).collect()))
}

/// Stream rows of `table` aligned to `schema`; schema columns the table
/// lacks are null
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
    let (existing, _) = table_info(connection, table)?;
    let present: Vec<Option<usize>> = schema
        .iter()
        .map(|c| crate::data::column_ordinal(&existing, &c.name))
        .collect();
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
                values.push(from_sqlite(row.get_ref(position)?, column.column_type));
                position += 1;
            } else {
                values.push(Value::Null);
            }
        }
        visit(values);
    }
    Ok(())
}

impl TableAdapter for SqliteAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
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
            let (columns, _) = table_info(connection, &name)?;
            let mut snapshot = TableSnapshot::new(columns.clone());
            stream_rows(connection, &name, &columns, &cancel, |row| snapshot.rows.push(row))?;
            log::debug!("Loaded {} rows from sqlite table '{}'", snapshot.rows.len(), name);
            Ok(snapshot)
        })
    }

    fn key_columns(&self, conn: &ConnectionDescriptor, table: &str) -> Result<Vec<String>> {
        let table = table.to_string();
        self.run(conn, move |connection| {
            let name = resolve_table(connection, &table)?;
            Ok(table_info(connection, &name)?.1)
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
            let (columns, _) = table_info(connection, &name)?;
            let target_columns: Vec<String> = columns.into_iter().map(|c| c.name).collect();

            let tx = connection.transaction()?;
            let stats = sql::execute_plan(&mut Exec(&tx), Dialect::Sqlite, &name, &plan, &target_columns)?;
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
            let existing = match match_table_name(&list_tables(connection)?, &table) {
                Some(name) => Some((name.clone(), table_info(connection, &name)?.0)),
                None => None,
            };
            let (name, existing_columns) = match existing {
                Some((name, columns)) => (name, Some(columns.into_iter().map(|c| c.name).collect())),
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
            log::info!("Replaced sqlite table '{}' with {} rows", name, inserted);
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
            log::info!("Dropped sqlite table '{}'", name);
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

impl FastHash for SqliteAdapter {
    fn column_schema(&self, conn: &ConnectionDescriptor, table: &str) -> Result<Vec<ColumnDescriptor>> {
        let table = table.to_string();
        self.run(conn, move |connection| {
            let name = resolve_table(connection, &table)?;
            Ok(table_info(connection, &name)?.0)
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
