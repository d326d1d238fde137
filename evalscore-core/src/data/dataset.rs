//! Evaluation datasets.

use super::example::{Example, Uid};
use crate::error::EvalError;
use serde_json::Value;
use std::collections::HashMap;

/// Per-example metadata handed to metric functions, keyed by uid.
pub type ExampleMetadata = HashMap<Uid, Value>;

/// A finite, indexable evaluation dataset.
///
/// Implementations are read-only for the duration of an evaluation.
pub trait EvalDataset: Send + Sync {
    /// Name used in log lines, telemetry and the predictions file name.
    fn dataset_name(&self) -> &str;

    /// Whether the labels are real; unlabeled datasets are run but not scored.
    fn labeled(&self) -> bool {
        true
    }

    /// Optional metadata passed through to metric functions.
    fn examples(&self) -> Option<&ExampleMetadata> {
        None
    }

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, index: usize) -> Result<Example, EvalError>;
}

/// Dataset backed by a vector of already-tokenized examples.
#[derive(Debug, Clone)]
pub struct InMemoryDataset {
    name: String,
    labeled: bool,
    records: Vec<Example>,
    metadata: Option<ExampleMetadata>,
}

impl InMemoryDataset {
    pub fn new(name: impl Into<String>, records: Vec<Example>) -> Self {
        Self {
            name: name.into(),
            labeled: true,
            records,
            metadata: None,
        }
    }

    pub fn unlabeled(mut self) -> Self {
        self.labeled = false;
        self
    }

    pub fn with_metadata(mut self, metadata: ExampleMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

impl EvalDataset for InMemoryDataset {
    fn dataset_name(&self) -> &str {
        &self.name
    }

    fn labeled(&self) -> bool {
        self.labeled
    }

    fn examples(&self) -> Option<&ExampleMetadata> {
        self.metadata.as_ref()
    }

    fn len(&self) -> usize {
        self.records.len()
    }

    fn get(&self, index: usize) -> Result<Example, EvalError> {
        self.records.get(index).cloned().ok_or_else(|| {
            EvalError::dataset(format!(
                "index {index} out of range for dataset `{}` of length {}",
                self.name,
                self.records.len()
            ))
        })
    }
}
