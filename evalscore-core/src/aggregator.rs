//! Metric aggregation across evaluation datasets.
//!
//! [`provide_metrics_function`] builds one dataloader per configured data path
//! up front; the returned [`MetricsEvaluator`] can then be called once per
//! epoch to score a model on all of them and combine the results.

use crate::collective::WorkerContext;
use crate::config::EvalConfig;
use crate::data::{DataLoader, EvalDataset};
use crate::error::EvalError;
use crate::metrics::{MetricRegistry, ScoreAccumulator};
use crate::model::Model;
use crate::predictions::NamedPredictions;
use crate::scorer::{ScoreRequest, format_rates, require_single_worker, score};
use crate::telemetry::TelemetrySink;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Scores a model on a fixed set of evaluation dataloaders.
pub struct MetricsEvaluator {
    dataloaders: Vec<(String, DataLoader)>,
    metrics: MetricRegistry,
    config: EvalConfig,
    is_test: bool,
    ctx: WorkerContext,
}

/// Build the dataloaders for a validation (or test) run and return the
/// evaluator that scores them.
///
/// `dataset_provider` is called once per data path, in configuration order.
pub fn provide_metrics_function<F>(
    mut dataset_provider: F,
    metrics: MetricRegistry,
    config: EvalConfig,
    is_test: bool,
    ctx: WorkerContext,
) -> Result<MetricsEvaluator, EvalError>
where
    F: FnMut(&str) -> Result<Arc<dyn EvalDataset>, EvalError>,
{
    let options = config.loader_options(ctx.data_parallel_size());
    let mut dataloaders = Vec::new();
    for path in config.data_paths(is_test) {
        let dataset = dataset_provider(&path)?;
        let name = dataset.dataset_name().to_string();
        tracing::debug!(
            path = %path,
            dataset = %name,
            examples = dataset.len(),
            drop_last = options.drop_last,
            "built evaluation dataloader"
        );
        let loader = DataLoader::new(
            dataset,
            options.clone(),
            ctx.data_parallel_size(),
            ctx.data_parallel_rank(),
        )?;
        dataloaders.push((name, loader));
    }

    Ok(MetricsEvaluator {
        dataloaders,
        metrics,
        config,
        is_test,
        ctx,
    })
}

impl MetricsEvaluator {
    /// Dataset names in evaluation order.
    pub fn dataset_names(&self) -> impl Iterator<Item = &str> {
        self.dataloaders.iter().map(|(name, _)| name.as_str())
    }

    /// Score `model` on every dataloader and return each metric's combined rate.
    ///
    /// Rates are pooled: per-dataset sums and example counts are added before
    /// dividing, so larger datasets weigh more. With `emit_predictions`, rank 0
    /// also writes the raw predictions under the configured `load` directory.
    pub async fn evaluate<M: Model + ?Sized>(
        &self,
        model: &mut M,
        epoch: i64,
        emit_predictions: bool,
        telemetry: Option<&dyn TelemetrySink>,
    ) -> Result<BTreeMap<String, f64>, EvalError> {
        if self.ctx.is_leader() {
            tracing::info!("calculating metrics ...");
        }

        let mut combined = ScoreAccumulator::for_registry(&self.metrics);
        let mut named_predictions = if emit_predictions {
            require_single_worker(&self.ctx)?;
            Some(NamedPredictions::new())
        } else {
            None
        };

        for (name, loader) in &self.dataloaders {
            let dataset = loader.dataset();
            let request = ScoreRequest {
                dataset_name: name,
                metrics: &self.metrics,
                examples: dataset.examples(),
                epoch,
                emit_predictions,
                input_mode: self.config.input_mode,
                labeled: dataset.labeled(),
            };
            let output = score(request, model, loader, &self.ctx).await?;
            combined.merge(&output.scores);
            if let (Some(named), Some(predictions)) = (named_predictions.as_mut(), output.predictions)
            {
                named.push(name.clone(), predictions);
            }
        }

        if combined.total == 0.0 {
            return Err(EvalError::evaluation(format!(
                "no examples scored across {} dataset(s) at epoch {epoch}",
                self.dataloaders.len()
            )));
        }

        let rates = combined.rates();
        if self.ctx.is_leader() {
            tracing::info!(
                "|epoch: {}| overall: total = {}{}",
                epoch,
                combined.total,
                format_rates(&combined, "")
            );
        }

        if let Some(sink) = telemetry
            && !self.is_test
            && epoch >= 0
        {
            for (key, rate) in &rates {
                sink.add_scalar(&format!("Train/valid_{key}"), *rate, epoch);
            }
        }

        if let Some(named) = named_predictions
            && self.ctx.is_leader()
        {
            self.persist_predictions(&named)?;
        }

        Ok(rates)
    }

    fn persist_predictions(&self, named: &NamedPredictions) -> Result<PathBuf, EvalError> {
        let dir = self.config.load.as_deref().ok_or_else(|| {
            EvalError::precondition("prediction output requested but no `load` directory is configured")
        })?;
        let path = named.save(dir)?;
        tracing::info!(path = %path.display(), "wrote predictions");
        Ok(path)
    }
}
