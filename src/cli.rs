//! Command-line interface for tabrecon

use crate::change_detection::DiffType;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "tabrecon")]
#[command(about = "Compare and reconcile tables across databases, files and spreadsheets")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (defaults to tabrecon.json found from the current directory upwards)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Connections are written as `<kind>:<path>`, e.g. `sqlite:app.db` or `csv:./exports`
#[derive(Subcommand)]
pub enum Commands {
    /// List the tables of a connection
    Tables {
        /// Connection descriptor
        connection: String,

        /// Output format: "pretty", "json"
        #[arg(long, default_value = "pretty")]
        format: String,
    },

    /// Compare one table and show the differing rows
    Compare {
        /// Table name
        table: String,

        /// Source connection descriptor
        source: String,

        /// Target connection descriptor
        target: String,

        /// Show at most this many row differences
        #[arg(long, default_value = "50")]
        limit: usize,

        /// Output format: "pretty", "json"
        #[arg(long, default_value = "pretty")]
        format: String,
    },

    /// Summarize differences across many tables
    Scan {
        /// Source connection descriptor
        source: String,

        /// Target connection descriptor
        target: String,

        /// Tables to scan (repeatable; defaults to every table on either side)
        #[arg(long = "table")]
        tables: Vec<String>,

        /// Override the configured scan parallelism (must be > 0)
        #[arg(long, value_parser = validate_parallelism)]
        max_parallel: Option<usize>,

        /// Hide the progress bar
        #[arg(long)]
        no_progress: bool,

        /// Output format: "pretty", "json"
        #[arg(long, default_value = "pretty")]
        format: String,
    },

    /// Apply source rows to the target so the table matches
    Apply {
        /// Table name
        table: String,

        /// Source connection descriptor
        source: String,

        /// Target connection descriptor
        target: String,

        /// Only apply these changes: "insert", "update", "delete" (repeatable)
        #[arg(long)]
        only: Vec<String>,

        /// Show what would change without writing
        #[arg(long)]
        dry_run: bool,
    },

    /// Overwrite the target table with the full source table
    Replace {
        /// Table name
        table: String,

        /// Source connection descriptor
        source: String,

        /// Target connection descriptor
        target: String,
    },

    /// Drop a table
    Drop {
        /// Connection descriptor
        connection: String,

        /// Table name
        table: String,

        /// Required to actually drop the table
        #[arg(long)]
        force: bool,
    },

    /// Show the stable keys computed for configuration documents
    StableKeys {
        /// XML configuration file or folder
        path: PathBuf,

        /// Output format: "pretty", "json"
        #[arg(long, default_value = "pretty")]
        format: String,
    },
}

/// Parse output format string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Pretty,
    Json,
}

impl OutputFormat {
    pub fn parse(s: &str) -> Result<Self, String> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(format!("Invalid output format: {}. Use 'pretty' or 'json'", s)),
        }
    }
}

/// Parse an `--only` change filter into the diff type it selects
pub fn parse_change_filter(s: &str) -> Result<DiffType, String> {
    match s.to_lowercase().as_str() {
        "insert" => Ok(DiffType::OnlyInSource),
        "update" => Ok(DiffType::Different),
        "delete" => Ok(DiffType::OnlyInTarget),
        _ => Err(format!(
            "Invalid change filter: {}. Use 'insert', 'update' or 'delete'",
            s
        )),
    }
}

fn validate_parallelism(s: &str) -> Result<usize, String> {
    let parallelism: usize = s
        .parse()
        .map_err(|_| format!("Invalid parallelism: '{}'. Must be a positive integer.", s))?;

    if parallelism == 0 {
        return Err("Parallelism must be greater than 0".to_string());
    }

    Ok(parallelism)
}
