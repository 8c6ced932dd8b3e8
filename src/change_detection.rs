//! Row-level change classification between two sides of a table

use crate::data::{ColumnDescriptor, Row, NULL_VALUE};
use crate::hash::{build_key, hash_row, KeyHashMap};
use indexmap::IndexMap;
use serde::Serialize;
use std::cmp::Ordering;

/// How a row differs between source and target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DiffType {
    OnlyInSource,
    OnlyInTarget,
    Different,
}

/// One classified difference. Equal rows are never materialized.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowPair {
    pub diff_type: DiffType,
    pub source: Option<Row>,
    pub target: Option<Row>,
}

impl RowPair {
    pub fn only_in_source(row: Row) -> Self {
        Self {
            diff_type: DiffType::OnlyInSource,
            source: Some(row),
            target: None,
        }
    }

    pub fn only_in_target(row: Row) -> Self {
        Self {
            diff_type: DiffType::OnlyInTarget,
            source: None,
            target: Some(row),
        }
    }

    pub fn different(source: Row, target: Row) -> Self {
        Self {
            diff_type: DiffType::Different,
            source: Some(source),
            target: Some(target),
        }
    }

    /// Check that the present snapshots match the diff type
    pub fn is_well_formed(&self) -> bool {
        match self.diff_type {
            DiffType::OnlyInSource => self.source.is_some() && self.target.is_none(),
            DiffType::OnlyInTarget => self.source.is_none() && self.target.is_some(),
            DiffType::Different => self.source.is_some() && self.target.is_some(),
        }
    }

    /// Whichever side is present, preferring the source
    pub fn primary_row(&self) -> Option<&Row> {
        self.source.as_ref().or(self.target.as_ref())
    }

    /// Names of the columns whose values differ (empty unless `Different`)
    pub fn changed_columns<'a>(&self, columns: &'a [ColumnDescriptor]) -> Vec<&'a str> {
        match (&self.source, &self.target) {
            (Some(source), Some(target)) => columns
                .iter()
                .enumerate()
                .filter(|(i, column)| {
                    let mut left = crate::hash::RowHasher::new();
                    let mut right = crate::hash::RowHasher::new();
                    left.push(source.get(*i).unwrap_or(&NULL_VALUE), column.column_type);
                    right.push(target.get(*i).unwrap_or(&NULL_VALUE), column.column_type);
                    left.finish() != right.finish()
                })
                .map(|(_, column)| column.name.as_str())
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Counts-only result for one table
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct TableDiffSummary {
    pub table_name: String,
    pub only_in_source_count: usize,
    pub only_in_target_count: usize,
    pub different_count: usize,
}

impl TableDiffSummary {
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            ..Default::default()
        }
    }

    pub fn total(&self) -> usize {
        self.only_in_source_count + self.only_in_target_count + self.different_count
    }

    pub fn has_changes(&self) -> bool {
        self.total() > 0
    }

    /// Summarize an already classified pair list
    pub fn from_pairs(table_name: impl Into<String>, pairs: &[RowPair]) -> Self {
        let mut summary = Self::new(table_name);
        for pair in pairs {
            summary.record(pair.diff_type);
        }
        summary
    }

    fn record(&mut self, diff_type: DiffType) {
        match diff_type {
            DiffType::OnlyInSource => self.only_in_source_count += 1,
            DiffType::OnlyInTarget => self.only_in_target_count += 1,
            DiffType::Different => self.different_count += 1,
        }
    }
}

/// One side of a table materialized as key -> (row, hash), in load order
#[derive(Debug, Clone, Default)]
pub struct KeyedRows {
    pub rows: IndexMap<String, (Row, u64)>,
    /// Rows replaced by a later row with the same key
    pub duplicate_keys: usize,
}

impl KeyedRows {
    /// Index rows aligned to `columns`; a repeated key keeps the last row
    pub fn build(rows: Vec<Row>, columns: &[ColumnDescriptor], key_ordinals: &[usize]) -> Self {
        let mut keyed = Self::default();
        for row in rows {
            let key = build_key(&row, key_ordinals, columns);
            let hash = hash_row(&row, columns);
            if keyed.rows.insert(key, (row, hash)).is_some() {
                keyed.duplicate_keys += 1;
            }
        }
        keyed
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Change detector over keyed rows or key/hash maps
pub struct ChangeDetector;

impl ChangeDetector {
    /// Classify two keyed sides into row pairs, sorted by key column values
    pub fn classify_rows(
        source: KeyedRows,
        target: KeyedRows,
        key_ordinals: &[usize],
    ) -> Vec<RowPair> {
        let mut target_rows = target.rows;
        let mut pairs = Vec::new();

        for (key, (source_row, source_hash)) in source.rows {
            match target_rows.swap_remove(&key) {
                Some((target_row, target_hash)) => {
                    if source_hash != target_hash {
                        pairs.push(RowPair::different(source_row, target_row));
                    }
                }
                None => pairs.push(RowPair::only_in_source(source_row)),
            }
        }

        for (_, (target_row, _)) in target_rows {
            pairs.push(RowPair::only_in_target(target_row));
        }

        Self::sort_pairs(&mut pairs, key_ordinals);
        pairs
    }

    /// Count differences between two key/hash maps without materializing rows
    pub fn summarize_hashes(
        table_name: &str,
        source: &KeyHashMap,
        target: &KeyHashMap,
    ) -> TableDiffSummary {
        let mut summary = TableDiffSummary::new(table_name);

        for (key, source_hash) in &source.hashes {
            match target.hashes.get(key) {
                Some(target_hash) if target_hash != source_hash => {
                    summary.record(DiffType::Different)
                }
                Some(_) => {}
                None => summary.record(DiffType::OnlyInSource),
            }
        }
        summary.only_in_target_count = target
            .hashes
            .keys()
            .filter(|key| !source.hashes.contains_key(*key))
            .count();

        summary
    }

    /// Stable sort by key column values, in key column order
    pub fn sort_pairs(pairs: &mut [RowPair], key_ordinals: &[usize]) {
        pairs.sort_by(|a, b| {
            let (Some(left), Some(right)) = (a.primary_row(), b.primary_row()) else {
                return Ordering::Equal;
            };
            key_ordinals
                .iter()
                .map(|&i| {
                    let l = left.get(i).unwrap_or(&NULL_VALUE);
                    let r = right.get(i).unwrap_or(&NULL_VALUE);
                    l.sort_cmp(r)
                })
                .find(|ordering| *ordering != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{ColumnType, Value};

    fn schema() -> Vec<ColumnDescriptor> {
        vec![
            ColumnDescriptor::new("id", ColumnType::Integer),
            ColumnDescriptor::new("name", ColumnType::Text),
        ]
    }

    fn row(id: i64, name: &str) -> Row {
        vec![Value::Int(id), Value::Text(name.to_string())]
    }

    #[test]
    fn test_classify_basic_scenario() {
        let columns = schema();
        let source = KeyedRows::build(vec![row(1, "a"), row(2, "b")], &columns, &[0]);
        let target = KeyedRows::build(vec![row(1, "a"), row(3, "c")], &columns, &[0]);

        let pairs = ChangeDetector::classify_rows(source, target, &[0]);

        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].diff_type, DiffType::OnlyInSource);
        assert_eq!(pairs[0].source.as_ref().unwrap()[0], Value::Int(2));
        assert!(pairs[0].target.is_none());
        assert_eq!(pairs[1].diff_type, DiffType::OnlyInTarget);
        assert_eq!(pairs[1].target.as_ref().unwrap()[0], Value::Int(3));
        assert!(pairs.iter().all(RowPair::is_well_formed));
    }

    #[test]
    fn test_classify_detects_modification() {
        let columns = schema();
        let source = KeyedRows::build(vec![row(1, "Alice Smith")], &columns, &[0]);
        let target = KeyedRows::build(vec![row(1, "Alice")], &columns, &[0]);

        let pairs = ChangeDetector::classify_rows(source, target, &[0]);

        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].diff_type, DiffType::Different);
        assert_eq!(pairs[0].changed_columns(&columns), vec!["name"]);
    }

    #[test]
    fn test_physical_order_does_not_matter() {
        let columns = schema();
        let source = KeyedRows::build(vec![row(1, "a"), row(2, "b"), row(3, "c")], &columns, &[0]);
        let target = KeyedRows::build(vec![row(3, "c"), row(1, "a"), row(2, "b")], &columns, &[0]);
        assert!(ChangeDetector::classify_rows(source, target, &[0]).is_empty());
    }

    #[test]
    fn test_duplicate_keys_keep_last_row() {
        let columns = schema();
        let keyed = KeyedRows::build(vec![row(1, "first"), row(1, "second")], &columns, &[0]);
        assert_eq!(keyed.len(), 1);
        assert_eq!(keyed.duplicate_keys, 1);
        let (kept, _) = keyed.rows.values().next().unwrap();
        assert_eq!(kept[1], Value::Text("second".into()));
    }

    #[test]
    fn test_pairs_sorted_by_key_values() {
        let columns = schema();
        let source = KeyedRows::build(vec![row(10, "x"), row(2, "y")], &columns, &[0]);
        let target = KeyedRows::build(vec![row(5, "z")], &columns, &[0]);

        let pairs = ChangeDetector::classify_rows(source, target, &[0]);
        let ids: Vec<Value> = pairs.iter().map(|p| p.primary_row().unwrap()[0].clone()).collect();
        assert_eq!(ids, vec![Value::Int(2), Value::Int(5), Value::Int(10)]);
    }

    #[test]
    fn test_summarize_hashes() {
        let mut source = KeyHashMap::new();
        source.insert("1".into(), 11);
        source.insert("2".into(), 22);
        source.insert("4".into(), 44);
        let mut target = KeyHashMap::new();
        target.insert("1".into(), 11);
        target.insert("3".into(), 33);
        target.insert("4".into(), 45);

        let summary = ChangeDetector::summarize_hashes("t", &source, &target);
        assert_eq!(summary.only_in_source_count, 1);
        assert_eq!(summary.only_in_target_count, 1);
        assert_eq!(summary.different_count, 1);
        assert_eq!(summary.total(), 3);
    }
}
