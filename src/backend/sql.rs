//! SQL statement building and the apply loop shared by the SQL backends

use super::ConnectionDescriptor;
use crate::affinity::AffinityCoordinator;
use crate::apply::{ApplyPlan, ApplyStats, RowOperation, WritableColumn};
use crate::cancel::CancellationToken;
use crate::data::{ColumnDescriptor, TableSnapshot, Value, NULL_VALUE};
use crate::error::{ReconError, Result};
use std::path::Path;

/// Differences between the SQL engines we write to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    DuckDb,
}

impl Dialect {
    /// Equality operator that treats two nulls as equal
    fn null_safe_eq(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "IS",
            Dialect::DuckDb => "IS NOT DISTINCT FROM",
        }
    }
}

/// Quote an identifier, doubling embedded quotes
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub fn select_all_sql(table: &str, columns: &[String]) -> String {
    let list = if columns.is_empty() {
        "*".to_string()
    } else {
        columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", ")
    };
    format!("SELECT {} FROM {}", list, quote_ident(table))
}

pub fn create_table_sql(table: &str, columns: &[ColumnDescriptor]) -> String {
    let defs = columns
        .iter()
        .map(|c| format!("{} {}", quote_ident(&c.name), c.column_type.sql_name()))
        .collect::<Vec<_>>()
        .join(", ");
    format!("CREATE TABLE {} ({})", quote_ident(table), defs)
}

pub fn drop_table_sql(table: &str) -> String {
    format!("DROP TABLE IF EXISTS {}", quote_ident(table))
}

pub fn delete_all_sql(table: &str) -> String {
    format!("DELETE FROM {}", quote_ident(table))
}

/// Parameterized statements for one table and one set of writable columns.
///
/// Parameter order: `update` takes non-key values then key values, `insert`
/// takes every writable column in order, `delete` and `exists` take key
/// values in key order.
#[derive(Debug, Clone)]
pub struct RowStatements {
    pub update: Option<String>,
    pub insert: String,
    pub delete: String,
    pub exists: String,
    value_ordinals: Vec<usize>,
    insert_ordinals: Vec<usize>,
}

impl RowStatements {
    pub fn build(dialect: Dialect, table: &str, plan: &ApplyPlan, writable: &[WritableColumn]) -> Self {
        let table = quote_ident(table);
        let key_names: Vec<&str> = plan
            .key_ordinals
            .iter()
            .filter_map(|ordinal| writable.iter().find(|w| w.ordinal == *ordinal))
            .map(|w| w.name.as_str())
            .collect();
        let where_clause = key_names
            .iter()
            .map(|name| format!("{} {} ?", quote_ident(name), dialect.null_safe_eq()))
            .collect::<Vec<_>>()
            .join(" AND ");

        let value_columns: Vec<&WritableColumn> = writable.iter().filter(|w| !w.is_key).collect();
        let update = (!value_columns.is_empty()).then(|| {
            let assignments = value_columns
                .iter()
                .map(|w| format!("{} = ?", quote_ident(&w.name)))
                .collect::<Vec<_>>()
                .join(", ");
            format!("UPDATE {} SET {} WHERE {}", table, assignments, where_clause)
        });

        let insert = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            writable
                .iter()
                .map(|w| quote_ident(&w.name))
                .collect::<Vec<_>>()
                .join(", "),
            vec!["?"; writable.len()].join(", ")
        );

        Self {
            update,
            insert,
            delete: format!("DELETE FROM {} WHERE {}", table, where_clause),
            exists: format!("SELECT COUNT(*) FROM {} WHERE {}", table, where_clause),
            value_ordinals: value_columns.iter().map(|w| w.ordinal).collect(),
            insert_ordinals: writable.iter().map(|w| w.ordinal).collect(),
        }
    }

    fn update_params<'a>(&self, plan: &ApplyPlan, row: &'a [Value]) -> Vec<&'a Value> {
        let mut params: Vec<&Value> = self
            .value_ordinals
            .iter()
            .map(|&i| row.get(i).unwrap_or(&NULL_VALUE))
            .collect();
        params.extend(plan.key_values(row));
        params
    }

    fn insert_params<'a>(&self, row: &'a [Value]) -> Vec<&'a Value> {
        self.insert_ordinals
            .iter()
            .map(|&i| row.get(i).unwrap_or(&NULL_VALUE))
            .collect()
    }
}

/// Minimal statement execution surface of an open SQL transaction
pub(crate) trait SqlExecutor {
    /// Run a statement and return the number of affected rows
    fn execute(&mut self, sql: &str, params: &[&Value]) -> Result<usize>;

    /// Run a `SELECT COUNT(*)` style query
    fn count(&mut self, sql: &str, params: &[&Value]) -> Result<i64>;
}

/// Run every operation of `plan` through `exec`. The caller owns the
/// transaction and commits only when this returns `Ok`.
pub(crate) fn execute_plan<E: SqlExecutor>(
    exec: &mut E,
    dialect: Dialect,
    table: &str,
    plan: &ApplyPlan,
    target_columns: &[String],
) -> Result<ApplyStats> {
    let writable = plan.writable_columns(target_columns)?;
    let statements = RowStatements::build(dialect, table, plan, &writable);
    let mut stats = ApplyStats::default();

    for operation in &plan.operations {
        match operation {
            RowOperation::Delete { key } => {
                let params: Vec<&Value> = key.iter().collect();
                stats.deleted += exec.execute(&statements.delete, &params)?;
            }
            RowOperation::Update { row } => {
                if update_existing(exec, &statements, plan, row)? {
                    stats.updated += 1;
                } else {
                    log::debug!("No row matched update in '{}', inserting", table);
                    exec.execute(&statements.insert, &statements.insert_params(row))?;
                    stats.inserted += 1;
                }
            }
            RowOperation::Upsert { row } => {
                if update_existing(exec, &statements, plan, row)? {
                    stats.updated += 1;
                } else {
                    exec.execute(&statements.insert, &statements.insert_params(row))?;
                    stats.inserted += 1;
                }
            }
        }
    }

    Ok(stats)
}

/// Update the row by key; false when no row has that key
fn update_existing<E: SqlExecutor>(
    exec: &mut E,
    statements: &RowStatements,
    plan: &ApplyPlan,
    row: &[Value],
) -> Result<bool> {
    match &statements.update {
        Some(update) => Ok(exec.execute(update, &statements.update_params(plan, row))? > 0),
        None => {
            let key = plan.key_values(row);
            Ok(exec.count(&statements.exists, &key)? > 0)
        }
    }
}

/// Delete all rows (creating the table first when missing) and insert the
/// snapshot rows
pub(crate) fn replace_rows<E: SqlExecutor>(
    exec: &mut E,
    table: &str,
    snapshot: &TableSnapshot,
    existing_columns: Option<Vec<String>>,
    cancel: &CancellationToken,
) -> Result<usize> {
    let target_columns = match existing_columns {
        Some(columns) => {
            exec.execute(&delete_all_sql(table), &[])?;
            columns
        }
        None => {
            log::info!("Creating table '{}' for replace", table);
            exec.execute(&create_table_sql(table, &snapshot.columns), &[])?;
            snapshot.column_names().into_iter().map(str::to_string).collect()
        }
    };

    let mapping: Vec<(usize, &String)> = snapshot
        .columns
        .iter()
        .enumerate()
        .filter_map(|(ordinal, column)| {
            target_columns
                .iter()
                .find(|t| t.eq_ignore_ascii_case(&column.name))
                .map(|name| (ordinal, name))
        })
        .collect();
    if mapping.is_empty() {
        return Err(ReconError::schema_mismatch(format!(
            "No snapshot column exists in target table '{}'",
            table
        )));
    }

    let insert = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(table),
        mapping
            .iter()
            .map(|(_, name)| quote_ident(name))
            .collect::<Vec<_>>()
            .join(", "),
        vec!["?"; mapping.len()].join(", ")
    );

    for row in &snapshot.rows {
        cancel.check()?;
        let params: Vec<&Value> = mapping
            .iter()
            .map(|(ordinal, _)| row.get(*ordinal).unwrap_or(&NULL_VALUE))
            .collect();
        exec.execute(&insert, &params)?;
    }
    Ok(snapshot.rows.len())
}

/// Opens a native connection for a location
pub(crate) type Opener<C> = fn(&Path) -> Result<C>;

/// Run `job` on the worker pinned to `conn`, using the batch connection
/// leased there or a connection opened just for this call
pub(crate) fn run_pinned<C, R, F>(
    coordinator: &AffinityCoordinator,
    conn: &ConnectionDescriptor,
    open: Opener<C>,
    job: F,
) -> Result<R>
where
    C: 'static,
    R: Send + 'static,
    F: FnOnce(&mut C) -> Result<R> + Send + 'static,
{
    let key = conn.key();
    let path = conn.location.clone();
    coordinator.run(&conn.key(), move |state| {
        if let Some(pinned) = state.get_mut::<C>(&key) {
            return job(pinned);
        }
        let mut connection = open(&path)?;
        job(&mut connection)
    })
}

/// Lease a reusable connection on the worker pinned to `conn`
pub(crate) fn lease_pinned<C: 'static>(
    coordinator: &AffinityCoordinator,
    conn: &ConnectionDescriptor,
    open: Opener<C>,
) -> Result<()> {
    let key = conn.key();
    let path = conn.location.clone();
    coordinator.run(&conn.key(), move |state| state.lease(&key, || open(&path)))
}

pub(crate) fn release_pinned(coordinator: &AffinityCoordinator, conn: &ConnectionDescriptor) -> Result<()> {
    let key = conn.key();
    let closed = coordinator.run(&conn.key(), move |state| Ok(state.release(&key)))?;
    if closed {
        log::debug!("Closed batch connection for {}", conn);
    }
    Ok(())
}

/// Fail with remediation text when a database file is missing
pub(crate) fn require_file(backend: &str, path: &Path) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(ReconError::backend_unavailable(
            backend,
            format!("database file '{}' not found", path.display()),
            "Check the connection path, or run a replace to create the database",
        ))
    }
}
