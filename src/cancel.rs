//! Cooperative cancellation

use crate::error::{ReconError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared flag checked between rows and between tables
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Bail out with [`ReconError::Cancelled`] once cancellation was requested
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(ReconError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Result of a public operation that may be cancelled part way.
///
/// Cancellation is not an error: callers get a value they can tell apart
/// from a completed run.
#[derive(Debug, Clone)]
pub enum Outcome<T> {
    Completed(T),
    Cancelled { partial: Option<T> },
}

impl<T> Outcome<T> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Outcome::Cancelled { .. })
    }

    /// The completed value, if the run was not cancelled
    pub fn completed(self) -> Option<T> {
        match self {
            Outcome::Completed(value) => Some(value),
            Outcome::Cancelled { .. } => None,
        }
    }

    /// Turn an internal result into an outcome, mapping cancellation
    pub(crate) fn from_result(result: Result<T>) -> Result<Self> {
        match result {
            Ok(value) => Ok(Outcome::Completed(value)),
            Err(err) if err.is_cancelled() => Ok(Outcome::Cancelled { partial: None }),
            Err(err) => Err(err),
        }
    }
}
