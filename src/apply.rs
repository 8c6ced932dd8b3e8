//! Reconciliation: turning approved row pairs into row operations

use crate::change_detection::{DiffType, RowPair};
use crate::data::{ColumnDescriptor, Row, Value, NULL_VALUE};
use crate::error::{ReconError, Result};
use crate::hash::ordinals_for;
use serde::Serialize;

/// Rows touched by one apply call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ApplyStats {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl ApplyStats {
    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.deleted
    }
}

/// One write against the target table
#[derive(Debug, Clone, PartialEq)]
pub enum RowOperation {
    /// Update the row with this key, inserting it when no row matched
    Upsert { row: Row },
    /// Overwrite the non-key columns of the row with this key
    Update { row: Row },
    /// Remove the row with these key values
    Delete { key: Vec<Value> },
}

/// A target column the plan writes, with its position in the plan rows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WritableColumn {
    pub ordinal: usize,
    pub name: String,
    pub is_key: bool,
}

/// Validated, ordered set of operations for one table.
///
/// Deletes run first, then updates, then upserts, so a key that moved
/// between rows cannot collide with itself.
#[derive(Debug, Clone)]
pub struct ApplyPlan {
    pub columns: Vec<ColumnDescriptor>,
    pub key_columns: Vec<String>,
    pub key_ordinals: Vec<usize>,
    pub operations: Vec<RowOperation>,
}

impl ApplyPlan {
    pub fn build(
        columns: &[ColumnDescriptor],
        key_columns: &[String],
        pairs: &[RowPair],
    ) -> Result<Self> {
        if key_columns.is_empty() {
            return Err(ReconError::invalid_input(
                "Cannot apply row changes without key columns",
            ));
        }
        let key_ordinals = ordinals_for(columns, key_columns).ok_or_else(|| {
            ReconError::invalid_input(format!(
                "Key columns [{}] are not all part of the comparison schema",
                key_columns.join(", ")
            ))
        })?;

        let mut deletes = Vec::new();
        let mut updates = Vec::new();
        let mut upserts = Vec::new();

        for (index, pair) in pairs.iter().enumerate() {
            if !pair.is_well_formed() {
                return Err(ReconError::invalid_input(format!(
                    "Row pair #{} is malformed for {:?}",
                    index, pair.diff_type
                )));
            }
            match (pair.diff_type, &pair.source, &pair.target) {
                (DiffType::OnlyInSource, Some(source), _) => {
                    upserts.push(RowOperation::Upsert { row: source.clone() })
                }
                (DiffType::Different, Some(source), _) => {
                    updates.push(RowOperation::Update { row: source.clone() })
                }
                (DiffType::OnlyInTarget, _, Some(target)) => deletes.push(RowOperation::Delete {
                    key: key_ordinals
                        .iter()
                        .map(|&i| target.get(i).cloned().unwrap_or(Value::Null))
                        .collect(),
                }),
                _ => {
                    return Err(ReconError::invalid_input(format!(
                        "Row pair #{} is missing its row",
                        index
                    )))
                }
            }
        }

        let mut operations = deletes;
        operations.extend(updates);
        operations.extend(upserts);

        Ok(Self {
            columns: columns.to_vec(),
            key_columns: key_ordinals
                .iter()
                .map(|&i| columns[i].name.clone())
                .collect(),
            key_ordinals,
            operations,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Key values of a plan row, in key column order
    pub fn key_values<'a>(&self, row: &'a [Value]) -> Vec<&'a Value> {
        self.key_ordinals
            .iter()
            .map(|&i| row.get(i).unwrap_or(&NULL_VALUE))
            .collect()
    }

    /// Plan columns that exist in the target table, named as the target
    /// names them. Every key column must exist in the target.
    pub fn writable_columns(&self, target_columns: &[String]) -> Result<Vec<WritableColumn>> {
        let lookup = |name: &str| {
            target_columns
                .iter()
                .find(|t| t.as_str() == name)
                .or_else(|| target_columns.iter().find(|t| t.eq_ignore_ascii_case(name)))
                .cloned()
        };

        let mut writable = Vec::new();
        for (ordinal, column) in self.columns.iter().enumerate() {
            let is_key = self.key_ordinals.contains(&ordinal);
            match lookup(&column.name) {
                Some(name) => writable.push(WritableColumn {
                    ordinal,
                    name,
                    is_key,
                }),
                None if is_key => {
                    return Err(ReconError::schema_mismatch(format!(
                        "Key column '{}' does not exist in the target table",
                        column.name
                    )))
                }
                None => log::debug!("Skipping column '{}' absent from target", column.name),
            }
        }
        Ok(writable)
    }
}
