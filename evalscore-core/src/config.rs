//! Evaluation configuration.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> overrides.

use crate::data::LoaderOptions;
use crate::model::InputAssemblyMode;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Settings consumed by the metric aggregator and scorer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalConfig {
    /// Examples per evaluation batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Background collation depth; 0 collates on the scoring thread.
    #[serde(default)]
    pub num_workers: usize,
    /// Validation data paths. Defaults to a single `dev` path.
    #[serde(default)]
    pub valid_data: Option<Vec<String>>,
    /// Test data paths. Defaults to a single `test` path.
    #[serde(default)]
    pub test_data: Option<Vec<String>>,
    /// How batch fields are assembled into model inputs.
    #[serde(default)]
    pub input_mode: InputAssemblyMode,
    /// Directory that prediction dumps are written to.
    #[serde(default)]
    pub load: Option<PathBuf>,
    #[serde(default = "default_shuffle_seed")]
    pub shuffle_seed: u64,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            num_workers: 0,
            valid_data: None,
            test_data: None,
            input_mode: InputAssemblyMode::default(),
            load: None,
            shuffle_seed: default_shuffle_seed(),
        }
    }
}

fn default_batch_size() -> usize {
    8
}

fn default_shuffle_seed() -> u64 {
    1234
}

impl EvalConfig {
    /// Data paths to evaluate for a test or validation run.
    pub fn data_paths(&self, is_test: bool) -> Vec<String> {
        if is_test {
            self.test_data
                .clone()
                .unwrap_or_else(|| vec!["test".to_string()])
        } else {
            self.valid_data
                .clone()
                .unwrap_or_else(|| vec!["dev".to_string()])
        }
    }

    /// Loader options for evaluation: no shuffling, and partial batches are
    /// dropped only when several data-parallel workers share the data.
    pub fn loader_options(&self, data_parallel_size: usize) -> LoaderOptions {
        LoaderOptions {
            batch_size: self.batch_size,
            num_workers: self.num_workers,
            shuffle: false,
            seed: self.shuffle_seed,
            drop_last: data_parallel_size > 1,
        }
    }
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `EVALSCORE_`)
/// 3. The config file, if given and present
/// 4. Built-in defaults
pub fn load_config(
    config_file: Option<&Path>,
    overrides: Option<&EvalConfig>,
) -> Result<EvalConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(EvalConfig::default()));

    if let Some(path) = config_file {
        if path.exists() {
            figment = figment.merge(Toml::file(path));
        } else {
            tracing::warn!(path = %path.display(), "Config file not found, using defaults");
        }
    }

    // EVALSCORE_BATCH_SIZE, EVALSCORE_INPUT_MODE, ...
    figment = figment.merge(Env::prefixed("EVALSCORE_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}
