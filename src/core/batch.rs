//! Per-item outcome of batch operations.

use serde::{Deserialize, Serialize};

use super::PipelineError;

/// One failed item of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchFailure {
    /// Item identifier.
    pub id: String,
    /// Rendered error.
    pub error: String,
    /// Whether the error was a state conflict.
    pub conflict: bool,
}

/// Result of a batch operation. Items are processed independently.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    /// Identifiers that succeeded.
    pub succeeded: Vec<String>,
    /// Items that failed.
    pub failed: Vec<BatchFailure>,
}

impl BatchReport {
    /// Record the outcome of one item.
    pub fn push<T>(&mut self, id: impl Into<String>, outcome: &Result<T, PipelineError>) {
        let id = id.into();
        match outcome {
            Ok(_) => self.succeeded.push(id),
            Err(err) => self.failed.push(BatchFailure {
                id,
                error: err.to_string(),
                conflict: err.is_conflict(),
            }),
        }
    }

    /// Run `op` for every id and collect the outcomes.
    pub fn collect<I, S, T, F>(ids: I, mut op: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        F: FnMut(&str) -> Result<T, PipelineError>,
    {
        let mut report = Self::default();
        for id in ids {
            let id = id.as_ref();
            let outcome = op(id);
            report.push(id, &outcome);
        }
        report
    }

    /// Whether every item succeeded.
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}
