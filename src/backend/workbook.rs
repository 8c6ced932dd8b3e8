//! Spreadsheet workbook, one sheet per table, read only

use super::{match_table_name, BackendKind, Capabilities, ConnectionDescriptor, TableAdapter};
use crate::cancel::CancellationToken;
use crate::data::{ColumnDescriptor, ColumnType, Row, TableSnapshot, TypeInference, Value};
use crate::error::{ReconError, Result};
use calamine::{open_workbook_auto, Data, DataType, Range, Reader};
use std::collections::HashSet;
use std::path::Path;

const BACKEND: &str = "workbook";

#[derive(Debug, Default)]
pub struct WorkbookAdapter;

impl WorkbookAdapter {
    pub fn new() -> Self {
        Self
    }
}

fn open(path: &Path) -> Result<calamine::Sheets<std::io::BufReader<std::fs::File>>> {
    if !path.is_file() {
        return Err(ReconError::backend_unavailable(
            BACKEND,
            format!("workbook '{}' not found", path.display()),
            "Point the connection at an existing .xlsx, .xls or .ods file",
        ));
    }
    Ok(open_workbook_auto(path)?)
}

/// Header labels with blanks named `column_<n>` and repeats suffixed `_<n>`
pub(crate) fn normalize_headers(raw: &[String]) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut headers = Vec::with_capacity(raw.len());
    for (index, label) in raw.iter().enumerate() {
        let trimmed = label.trim();
        let base = if trimmed.is_empty() {
            format!("column_{}", index + 1)
        } else {
            trimmed.to_string()
        };
        let mut candidate = base.clone();
        let mut suffix = 2;
        while !seen.insert(candidate.to_ascii_lowercase()) {
            candidate = format!("{}_{}", base, suffix);
            suffix += 1;
        }
        headers.push(candidate);
    }
    headers
}

fn cell_value(cell: &Data) -> Value {
    match cell {
        Data::Empty | Data::Error(_) => Value::Null,
        Data::Int(i) => Value::Int(*i),
        Data::Float(f) => Value::Float(*f),
        Data::Bool(b) => Value::Bool(*b),
        Data::String(s) if s.is_empty() => Value::Null,
        Data::String(s) => Value::Text(s.clone()),
        Data::DateTime(_) | Data::DateTimeIso(_) => cell
            .as_datetime()
            .map(Value::DateTime)
            .unwrap_or_else(|| Value::Text(cell.to_string())),
        Data::DurationIso(s) => Value::Text(s.clone()),
    }
}

fn header_label(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        other => cell_value(other).to_string(),
    }
}

/// Turn a sheet range into a typed snapshot
pub(crate) fn range_snapshot(range: &Range<Data>, cancel: &CancellationToken) -> Result<TableSnapshot> {
    let mut rows = range.rows();
    let header: Vec<String> = match rows.next() {
        Some(cells) => cells.iter().map(header_label).collect(),
        None => return Ok(TableSnapshot::default()),
    };
    let names = normalize_headers(&header);

    let mut inference = vec![TypeInference::new(); names.len()];
    let mut raw_rows: Vec<Row> = Vec::new();
    for cells in rows {
        cancel.check()?;
        let row: Row = (0..names.len())
            .map(|i| cells.get(i).map(cell_value).unwrap_or(Value::Null))
            .collect();
        if row.iter().all(Value::is_null) {
            continue;
        }
        for (column, value) in inference.iter_mut().zip(&row) {
            if let Some(text) = value.canonical_text() {
                column.observe(&text);
            }
        }
        raw_rows.push(row);
    }

    let columns: Vec<ColumnDescriptor> = names
        .into_iter()
        .zip(&inference)
        .map(|(name, column)| ColumnDescriptor::new(name, column.finish()))
        .collect();

    let mut snapshot = TableSnapshot::new(columns);
    for row in raw_rows {
        let typed = row
            .into_iter()
            .zip(&snapshot.columns)
            .map(|(value, column)| match value {
                Value::Text(text) if column.column_type != ColumnType::Text => {
                    Value::parse_text(&text, column.column_type)
                }
                other => other.widen(column.column_type).into_owned(),
            })
            .collect();
        snapshot.rows.push(typed);
    }
    Ok(snapshot)
}

impl TableAdapter for WorkbookAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Workbook
    }

    fn list_tables(&self, conn: &ConnectionDescriptor) -> Result<Vec<String>> {
        Ok(open(conn.path())?.sheet_names())
    }

    fn load_full_table(
        &self,
        conn: &ConnectionDescriptor,
        table: &str,
        cancel: &CancellationToken,
    ) -> Result<TableSnapshot> {
        let mut workbook = open(conn.path())?;
        let sheet = match_table_name(&workbook.sheet_names(), table)
            .ok_or_else(|| ReconError::table_not_found(table))?;
        let range = workbook.worksheet_range(&sheet)?;
        let snapshot = range_snapshot(&range, cancel)?;
        log::debug!("Loaded {} rows from sheet '{}'", snapshot.rows.len(), sheet);
        Ok(snapshot)
    }

    fn key_columns(&self, conn: &ConnectionDescriptor, table: &str) -> Result<Vec<String>> {
        let workbook = open(conn.path())?;
        match_table_name(&workbook.sheet_names(), table)
            .map(|_| Vec::new())
            .ok_or_else(|| ReconError::table_not_found(table))
    }

    fn capabilities(&self, _conn: &ConnectionDescriptor) -> Capabilities {
        Capabilities::READ
    }
}
