//! Error types for tabrecon operations

use serde::Serialize;
use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ReconError>;

/// Stable error categories callers match on, independent of the backend
/// that produced the error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorCategory {
    Configuration,
    BackendUnavailable,
    SchemaMismatch,
    KeyResolutionFailure,
    ApplyFailure,
    Unsupported,
    Backend,
    Cancellation,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Configuration => "configuration",
            Self::BackendUnavailable => "backend-unavailable",
            Self::SchemaMismatch => "schema-mismatch",
            Self::KeyResolutionFailure => "key-resolution",
            Self::ApplyFailure => "apply-failure",
            Self::Unsupported => "unsupported",
            Self::Backend => "backend",
            Self::Cancellation => "cancellation",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum ReconError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Workbook error: {0}")]
    Workbook(#[from] calamine::Error),

    #[error("XML error: {0}")]
    Xml(#[from] roxmltree::Error),

    #[error("Walkdir error: {0}")]
    WalkDir(#[from] walkdir::Error),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("{backend} backend unavailable: {message}\n{remediation}")]
    BackendUnavailable {
        backend: String,
        message: String,
        remediation: String,
    },

    #[error("Schema mismatch: {message}")]
    SchemaMismatch { message: String },

    #[error("Key resolution failed: {message}")]
    KeyResolution { message: String },

    #[error("Apply to '{table}' failed and was rolled back: {source}")]
    ApplyFailed {
        table: String,
        #[source]
        source: Box<ReconError>,
    },

    #[error("{operation} is not supported by the {backend} backend")]
    Unsupported { backend: String, operation: String },

    #[error("Table not found: {table}")]
    TableNotFound { table: String },

    #[error("Data processing error: {message}")]
    DataProcessing { message: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Coordinator error: {message}")]
    Coordinator { message: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Generic error: {0}")]
    Generic(#[from] anyhow::Error),
}

impl ReconError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn backend_unavailable(
        backend: impl Into<String>,
        message: impl Into<String>,
        remediation: impl Into<String>,
    ) -> Self {
        Self::BackendUnavailable {
            backend: backend.into(),
            message: message.into(),
            remediation: remediation.into(),
        }
    }

    pub fn schema_mismatch(msg: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            message: msg.into(),
        }
    }

    pub fn key_resolution(msg: impl Into<String>) -> Self {
        Self::KeyResolution {
            message: msg.into(),
        }
    }

    pub fn apply_failed(table: impl Into<String>, source: ReconError) -> Self {
        Self::ApplyFailed {
            table: table.into(),
            source: Box::new(source),
        }
    }

    pub fn unsupported(backend: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::Unsupported {
            backend: backend.into(),
            operation: operation.into(),
        }
    }

    pub fn table_not_found(table: impl Into<String>) -> Self {
        Self::TableNotFound {
            table: table.into(),
        }
    }

    pub fn data_processing(msg: impl Into<String>) -> Self {
        Self::DataProcessing {
            message: msg.into(),
        }
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: msg.into(),
        }
    }

    pub fn coordinator(msg: impl Into<String>) -> Self {
        Self::Coordinator {
            message: msg.into(),
        }
    }

    /// Category used by callers to decide how to react
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Config { .. } | Self::InvalidInput { .. } | Self::Json(_) => {
                ErrorCategory::Configuration
            }
            Self::BackendUnavailable { .. } => ErrorCategory::BackendUnavailable,
            Self::SchemaMismatch { .. } => ErrorCategory::SchemaMismatch,
            Self::KeyResolution { .. } => ErrorCategory::KeyResolutionFailure,
            Self::ApplyFailed { .. } => ErrorCategory::ApplyFailure,
            Self::Unsupported { .. } => ErrorCategory::Unsupported,
            Self::Cancelled => ErrorCategory::Cancellation,
            _ => ErrorCategory::Backend,
        }
    }

    /// The innermost error, looking through apply wrappers
    pub fn root_cause(&self) -> &ReconError {
        match self {
            Self::ApplyFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.root_cause(), Self::Cancelled)
    }
}
