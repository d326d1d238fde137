//! Raw prediction dumps.

use crate::data::Uid;
use crate::error::EvalError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Per-example outputs of one scoring pass, in loader order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Predictions {
    pub softmaxes: Vec<Vec<f32>>,
    pub labels: Vec<i64>,
    pub ids: Vec<Uid>,
}

impl Predictions {
    pub fn extend(
        &mut self,
        softmaxes: Vec<Vec<f32>>,
        labels: impl IntoIterator<Item = i64>,
        ids: impl IntoIterator<Item = Uid>,
    ) {
        self.softmaxes.extend(softmaxes);
        self.labels.extend(labels);
        self.ids.extend(ids);
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Predictions of several datasets, in the order the datasets were evaluated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NamedPredictions {
    entries: Vec<(String, Predictions)>,
}

impl NamedPredictions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, predictions: Predictions) {
        self.entries.push((name.into(), predictions));
    }

    pub fn entries(&self) -> &[(String, Predictions)] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `predictions_{name1}_{name2}...json`.
    pub fn file_name(&self) -> String {
        let mut name = String::from("predictions");
        for (dataset, _) in &self.entries {
            name.push('_');
            name.push_str(dataset);
        }
        name.push_str(".json");
        name
    }

    /// Write to `dir` and return the file path.
    pub fn save(&self, dir: &Path) -> Result<PathBuf, EvalError> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(self.file_name());
        let content = serde_json::to_string(self)?;
        std::fs::write(&path, content)?;
        Ok(path)
    }

    pub fn load(path: &Path) -> Result<Self, EvalError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}
