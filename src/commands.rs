//! Command implementations for tabrecon CLI

use crate::backend::config_tree;
use crate::backend::ConnectionDescriptor;
use crate::cancel::{CancellationToken, Outcome};
use crate::change_detection::{DiffType, RowPair, TableDiffSummary};
use crate::cli::{parse_change_filter, Commands, OutputFormat};
use crate::config::ReconConfig;
use crate::error::{ReconError, Result};
use crate::output::{JsonFormatter, PrettyPrinter};
use crate::progress::ProgressReporter;
use crate::service::{ComparisonService, ProgressFn};
use crate::stabilizer::KeyStabilizer;
use std::path::Path;

/// Execute a command
pub fn execute_command(command: Commands, config_path: Option<&Path>) -> Result<()> {
    match command {
        Commands::Tables { connection, format } => tables_command(config_path, &connection, &format),
        Commands::Compare {
            table,
            source,
            target,
            limit,
            format,
        } => compare_command(config_path, &table, &source, &target, limit, &format),
        Commands::Scan {
            source,
            target,
            tables,
            max_parallel,
            no_progress,
            format,
        } => scan_command(config_path, &source, &target, &tables, max_parallel, no_progress, &format),
        Commands::Apply {
            table,
            source,
            target,
            only,
            dry_run,
        } => apply_command(config_path, &table, &source, &target, &only, dry_run),
        Commands::Replace {
            table,
            source,
            target,
        } => replace_command(config_path, &table, &source, &target),
        Commands::Drop {
            connection,
            table,
            force,
        } => drop_command(config_path, &connection, &table, force),
        Commands::StableKeys { path, format } => stable_keys_command(&path, &format),
    }
}

/// Explicit config file, else one discovered upwards, else defaults
pub fn load_config(config_path: Option<&Path>) -> Result<ReconConfig> {
    if let Some(path) = config_path {
        return ReconConfig::load(path);
    }
    let current_dir = std::env::current_dir()?;
    match ReconConfig::discover(&current_dir)? {
        Some((path, config)) => {
            log::info!("Using config {}", path.display());
            Ok(config)
        }
        None => Ok(ReconConfig::default()),
    }
}

fn output_format(format: &str) -> Result<OutputFormat> {
    OutputFormat::parse(format).map_err(ReconError::invalid_input)
}

fn build_service(config_path: Option<&Path>) -> Result<ComparisonService> {
    ComparisonService::new(load_config(config_path)?)
}

fn tables_command(config_path: Option<&Path>, connection: &str, format: &str) -> Result<()> {
    let format = output_format(format)?;
    let conn = ConnectionDescriptor::parse(connection)?;
    let service = build_service(config_path)?;
    let tables = service.list_tables(&conn)?;

    match format {
        OutputFormat::Json => println!("{}", JsonFormatter::format(&tables)?),
        OutputFormat::Pretty => {
            PrettyPrinter::print_table_list(&conn.key(), &tables, service.capabilities(&conn)?)
        }
    }
    Ok(())
}

fn compare_command(
    config_path: Option<&Path>,
    table: &str,
    source: &str,
    target: &str,
    limit: usize,
    format: &str,
) -> Result<()> {
    let format = output_format(format)?;
    let source = ConnectionDescriptor::parse(source)?;
    let target = ConnectionDescriptor::parse(target)?;
    let service = build_service(config_path)?;

    let Outcome::Completed(comparison) = service.compare_one(table, &source, &target, &CancellationToken::new())?
    else {
        println!("Comparison cancelled");
        return Ok(());
    };

    match format {
        OutputFormat::Json => println!("{}", JsonFormatter::format(&comparison)?),
        OutputFormat::Pretty => PrettyPrinter::print_comparison(&comparison, limit),
    }
    Ok(())
}

fn scan_command(
    config_path: Option<&Path>,
    source: &str,
    target: &str,
    tables: &[String],
    max_parallel: Option<usize>,
    no_progress: bool,
    format: &str,
) -> Result<()> {
    let format = output_format(format)?;
    let source = ConnectionDescriptor::parse(source)?;
    let target = ConnectionDescriptor::parse(target)?;
    let mut config = load_config(config_path)?;
    if let Some(max_parallel) = max_parallel {
        config.max_parallel = max_parallel;
    }
    let service = ComparisonService::new(config)?;

    let mut progress = if no_progress || format == OutputFormat::Json {
        ProgressReporter::new_minimal()
    } else {
        ProgressReporter::new_for_scan()
    };
    let report = |processed: usize, total: usize| progress.update(processed, total);
    let callback: ProgressFn<'_> = &report;
    let outcome = service.compare_many(tables, &source, &target, &CancellationToken::new(), Some(callback))?;

    let (bulk, cancelled) = match outcome {
        Outcome::Completed(bulk) => (bulk, false),
        Outcome::Cancelled { partial } => (partial.unwrap_or_default(), true),
    };
    progress.finish(&format!("Compared {} table(s)", bulk.summaries.len()));

    match format {
        OutputFormat::Json => println!("{}", JsonFormatter::format(&bulk)?),
        OutputFormat::Pretty => PrettyPrinter::print_bulk(&bulk),
    }
    if cancelled {
        println!("Scan was cancelled; results are partial");
    }
    Ok(())
}

fn apply_command(
    config_path: Option<&Path>,
    table: &str,
    source: &str,
    target: &str,
    only: &[String],
    dry_run: bool,
) -> Result<()> {
    let filters: Vec<DiffType> = only
        .iter()
        .map(|f| parse_change_filter(f).map_err(ReconError::invalid_input))
        .collect::<Result<_>>()?;
    let source = ConnectionDescriptor::parse(source)?;
    let target = ConnectionDescriptor::parse(target)?;
    let service = build_service(config_path)?;

    let Outcome::Completed(comparison) = service.compare_one(table, &source, &target, &CancellationToken::new())?
    else {
        println!("Comparison cancelled, nothing applied");
        return Ok(());
    };

    let approved: Vec<RowPair> = comparison
        .pairs
        .iter()
        .filter(|pair| filters.is_empty() || filters.contains(&pair.diff_type))
        .cloned()
        .collect();
    let planned = TableDiffSummary::from_pairs(&comparison.table, &approved);

    if dry_run {
        println!(
            "Would apply to '{}': {} insert(s), {} update(s), {} delete(s)",
            comparison.table, planned.only_in_source_count, planned.different_count, planned.only_in_target_count
        );
        return Ok(());
    }

    let stats = service.apply(
        &target,
        &comparison.table,
        &comparison.schema,
        &comparison.key.columns,
        &approved,
    )?;
    PrettyPrinter::print_apply_stats(&comparison.table, &stats);
    Ok(())
}

fn replace_command(config_path: Option<&Path>, table: &str, source: &str, target: &str) -> Result<()> {
    let source = ConnectionDescriptor::parse(source)?;
    let target = ConnectionDescriptor::parse(target)?;
    let service = build_service(config_path)?;

    let Outcome::Completed(snapshot) = service.load_table(&source, table, &CancellationToken::new())? else {
        println!("Load cancelled, nothing replaced");
        return Ok(());
    };
    service.replace(&target, table, &snapshot)?;
    println!("✅ Replaced '{}' on {} with {} row(s)", table, target, snapshot.rows.len());
    Ok(())
}

fn drop_command(config_path: Option<&Path>, connection: &str, table: &str, force: bool) -> Result<()> {
    let conn = ConnectionDescriptor::parse(connection)?;
    if !force {
        return Err(ReconError::invalid_input(format!(
            "Refusing to drop '{}' on {} without --force",
            table, conn
        )));
    }
    let service = build_service(config_path)?;
    service.drop_table(&conn, table)?;
    println!("🗑  Dropped '{}' on {}", table, conn);
    Ok(())
}

fn stable_keys_command(path: &Path, format: &str) -> Result<()> {
    let format = output_format(format)?;
    let documents = config_tree::load_documents(path)?;

    let mut keyed = Vec::new();
    for document in &documents {
        let stable = KeyStabilizer::new(document.object_name.clone()).stabilize(document);
        keyed.extend(document.entities.iter().zip(stable));
    }

    match format {
        OutputFormat::Json => println!("{}", JsonFormatter::format_stable_keys(&keyed)?),
        OutputFormat::Pretty => PrettyPrinter::print_stable_keys(&keyed),
    }
    Ok(())
}
