//! Output formatting utilities

use crate::apply::ApplyStats;
use crate::backend::Capabilities;
use crate::change_detection::{DiffType, RowPair, TableDiffSummary};
use crate::data::{ColumnDescriptor, Row};
use crate::error::Result;
use crate::service::{BulkComparison, TableComparison};
use crate::stabilizer::{Entity, StableEntity};
use serde::Serialize;

/// Pretty printer for tabrecon output
pub struct PrettyPrinter;

impl PrettyPrinter {
    /// Print a connection's tables and what it supports
    pub fn print_table_list(connection: &str, tables: &[String], capabilities: Capabilities) {
        println!("🗂  {} ({})", connection, capabilities.names().join(", "));
        if tables.is_empty() {
            println!("└─ No tables found.");
            return;
        }
        for (i, table) in tables.iter().enumerate() {
            println!("{} {}", tree_prefix(i, tables.len()), table);
        }
    }

    /// Print the row differences of one table
    pub fn print_comparison(comparison: &TableComparison, limit: usize) {
        let summary = comparison.summary();
        println!("🔍 {} (key: {})", comparison.table, comparison.key.columns.join(", "));
        for warning in &comparison.warnings {
            println!("├─ ⚠️  {}", warning);
        }
        if !summary.has_changes() {
            println!("└─ ✅ No differences");
            return;
        }
        println!(
            "├─ {} only in source, {} only in target, {} different",
            summary.only_in_source_count, summary.only_in_target_count, summary.different_count
        );

        let key_ordinals: Vec<usize> = comparison
            .key
            .columns
            .iter()
            .filter_map(|name| comparison.schema.iter().position(|c| &c.name == name))
            .collect();
        let shown = comparison.pairs.len().min(limit);
        for (i, pair) in comparison.pairs.iter().take(shown).enumerate() {
            let last = i + 1 == shown && shown == comparison.pairs.len();
            let prefix = if last { "└─" } else { "├─" };
            let key = pair
                .primary_row()
                .map(|row| {
                    key_ordinals
                        .iter()
                        .map(|&i| row.get(i).map(ToString::to_string).unwrap_or_default())
                        .collect::<Vec<_>>()
                        .join(", ")
                })
                .unwrap_or_default();
            println!("{} {} [{}]{}", prefix, diff_marker(pair.diff_type), key, describe_pair(pair, &comparison.schema));
        }
        if shown < comparison.pairs.len() {
            println!("└─ ... {} more", comparison.pairs.len() - shown);
        }
    }

    /// Print a bulk scan
    pub fn print_bulk(bulk: &BulkComparison) {
        println!(
            "📊 {} table(s) compared, {} with differences, {} failed",
            bulk.summaries.len(),
            bulk.changed_tables(),
            bulk.failures.len()
        );
        for summary in &bulk.summaries {
            println!("├─ {}", format_summary(summary));
        }
        for warning in &bulk.warnings {
            println!("├─ ⚠️  {}: {}", warning.table, warning.warning);
        }
        for failure in &bulk.failures {
            println!("├─ ❌ {} [{}]: {}", failure.table, failure.category, failure.message);
        }
        println!("└─ done");
    }

    pub fn print_apply_stats(table: &str, stats: &ApplyStats) {
        println!("✅ Applied changes to '{}'", table);
        println!("├─ Inserted: {}", stats.inserted);
        println!("├─ Updated: {}", stats.updated);
        println!("└─ Deleted: {}", stats.deleted);
    }

    /// Print each entity with its raw name and stable key
    pub fn print_stable_keys(entities: &[(&Entity, StableEntity)]) {
        if entities.is_empty() {
            println!("No entities found.");
            return;
        }
        println!("🔑 Stable keys:");
        for (i, (entity, stable)) in entities.iter().enumerate() {
            println!(
                "{} {:<6} {} → {}",
                tree_prefix(i, entities.len()),
                entity.kind.table_name(),
                entity.name,
                stable.key
            );
        }
    }
}

fn tree_prefix(index: usize, len: usize) -> &'static str {
    if index + 1 == len {
        "└─"
    } else {
        "├─"
    }
}

fn diff_marker(diff_type: DiffType) -> &'static str {
    match diff_type {
        DiffType::OnlyInSource => "+",
        DiffType::OnlyInTarget => "-",
        DiffType::Different => "~",
    }
}

fn describe_pair(pair: &RowPair, schema: &[ColumnDescriptor]) -> String {
    match (&pair.source, &pair.target) {
        (Some(source), Some(target)) => {
            let changes: Vec<String> = pair
                .changed_columns(schema)
                .into_iter()
                .filter_map(|name| {
                    let i = schema.iter().position(|c| c.name == name)?;
                    Some(format!("{}: {} → {}", name, cell(target, i), cell(source, i)))
                })
                .collect();
            format!(" {}", changes.join("; "))
        }
        _ => String::new(),
    }
}

fn cell(row: &Row, index: usize) -> String {
    row.get(index).map(|v| v.to_string()).unwrap_or_else(|| "NULL".to_string())
}

fn format_summary(summary: &TableDiffSummary) -> String {
    if summary.has_changes() {
        format!(
            "❌ {}: +{} -{} ~{}",
            summary.table_name,
            summary.only_in_source_count,
            summary.only_in_target_count,
            summary.different_count
        )
    } else {
        format!("✅ {}: identical", summary.table_name)
    }
}

/// JSON formatter for machine-readable output
pub struct JsonFormatter;

impl JsonFormatter {
    /// Format any serializable data as pretty JSON
    pub fn format<T: Serialize + ?Sized>(data: &T) -> Result<String> {
        Ok(serde_json::to_string_pretty(data)?)
    }

    /// Stable keys as a flat list of records
    pub fn format_stable_keys(entities: &[(&Entity, StableEntity)]) -> Result<String> {
        let records: Vec<serde_json::Value> = entities
            .iter()
            .map(|(entity, stable)| {
                serde_json::json!({
                    "kind": entity.kind,
                    "name": entity.name,
                    "key": stable.key,
                    "parent_key": stable.parent_key,
                })
            })
            .collect();
        Self::format(&records)
    }
}
