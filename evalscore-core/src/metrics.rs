//! Metric functions and the running sums they feed.

use crate::error::EvalError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Scores one batch of predictions.
///
/// Returns a non-negative contribution that is summed over batches and later
/// divided by the number of examples. `examples` carries per-example metadata
/// aligned with `predicted` when the dataset provides it.
pub trait MetricFn: Send + Sync {
    fn score(
        &self,
        predicted: &[usize],
        labels: &[i64],
        examples: Option<&[&Value]>,
    ) -> Result<f64, EvalError>;
}

impl<F> MetricFn for F
where
    F: Fn(&[usize], &[i64], Option<&[&Value]>) -> Result<f64, EvalError> + Send + Sync,
{
    fn score(
        &self,
        predicted: &[usize],
        labels: &[i64],
        examples: Option<&[&Value]>,
    ) -> Result<f64, EvalError> {
        self(predicted, labels, examples)
    }
}

/// Count of correct predictions, times 100 so rates read as percentages.
pub fn accuracy_metric(
    predicted: &[usize],
    labels: &[i64],
    _examples: Option<&[&Value]>,
) -> Result<f64, EvalError> {
    if predicted.len() != labels.len() {
        return Err(EvalError::shape_mismatch(format!(
            "{} predictions for {} labels",
            predicted.len(),
            labels.len()
        )));
    }
    let correct = predicted
        .iter()
        .zip(labels)
        .filter(|&(&p, &l)| i64::try_from(p).is_ok_and(|p| p == l))
        .count();
    Ok(correct as f64 * 100.0)
}

/// Metric functions keyed by name, iterated in lexicographic key order.
#[derive(Clone, Default)]
pub struct MetricRegistry {
    metrics: BTreeMap<String, Arc<dyn MetricFn>>,
}

impl MetricRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding only `accuracy`.
    pub fn accuracy() -> Self {
        Self::new().with("accuracy", accuracy_metric)
    }

    pub fn with(mut self, key: impl Into<String>, metric: impl MetricFn + 'static) -> Self {
        self.register(key, metric);
        self
    }

    pub fn register(&mut self, key: impl Into<String>, metric: impl MetricFn + 'static) {
        self.metrics.insert(key.into(), Arc::new(metric));
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.metrics.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &dyn MetricFn)> {
        self.metrics.iter().map(|(k, m)| (k.as_str(), m.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}

impl std::fmt::Debug for MetricRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.metrics.keys()).finish()
    }
}

/// Running metric sums plus the number of examples they cover.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreAccumulator {
    pub sums: BTreeMap<String, f64>,
    pub total: f64,
}

impl ScoreAccumulator {
    /// Every registry key at zero.
    pub fn for_registry(registry: &MetricRegistry) -> Self {
        Self {
            sums: registry.keys().map(|k| (k.to_string(), 0.0)).collect(),
            total: 0.0,
        }
    }

    pub fn add(&mut self, key: &str, value: f64) {
        *self.sums.entry(key.to_string()).or_insert(0.0) += value;
    }

    /// Add another accumulator's sums and total into this one.
    pub fn merge(&mut self, other: &ScoreAccumulator) {
        for (key, value) in &other.sums {
            self.add(key, *value);
        }
        self.total += other.total;
    }

    /// `[sum for each key in sorted order..., total]`.
    pub fn pack(&self) -> Vec<f64> {
        self.sums
            .values()
            .copied()
            .chain(std::iter::once(self.total))
            .collect()
    }

    /// Inverse of [`pack`](Self::pack) for an accumulator with the same keys.
    pub fn unpack(&mut self, packed: &[f64]) -> Result<(), EvalError> {
        if packed.len() != self.sums.len() + 1 {
            return Err(EvalError::shape_mismatch(format!(
                "reduced vector has {} entries, expected {}",
                packed.len(),
                self.sums.len() + 1
            )));
        }
        for (slot, value) in self.sums.values_mut().zip(packed) {
            *slot = *value;
        }
        self.total = packed[packed.len() - 1];
        Ok(())
    }

    /// Each sum divided by `total`. A zero total yields zero rates.
    pub fn rates(&self) -> BTreeMap<String, f64> {
        self.sums
            .iter()
            .map(|(key, sum)| {
                let rate = if self.total > 0.0 { sum / self.total } else { 0.0 };
                (key.clone(), rate)
            })
            .collect()
    }
}
