//! Scoring one dataloader: segmented forward passes, per-batch metric sums,
//! and the cross-worker reduction of those sums.

use crate::collective::WorkerContext;
use crate::data::{Batch, DataLoader, ExampleMetadata};
use crate::error::EvalError;
use crate::metrics::{MetricRegistry, ScoreAccumulator};
use crate::model::{EvalModeGuard, InputAssemblyMode, Model};
use crate::predictions::Predictions;
use crate::tensor::{
    SEGMENT_LENGTH, apply_loss_mask, argmax_rows, concat_segments, sequence_len, softmax_rows,
    split_segments,
};
use ndarray::{Array2, ArrayD};
use serde_json::Value;
use std::time::Instant;

/// Everything that describes one scoring pass apart from the model and loader.
#[derive(Debug, Clone, Copy)]
pub struct ScoreRequest<'a> {
    pub dataset_name: &'a str,
    pub metrics: &'a MetricRegistry,
    pub examples: Option<&'a ExampleMetadata>,
    pub epoch: i64,
    pub emit_predictions: bool,
    pub input_mode: InputAssemblyMode,
    pub labeled: bool,
}

/// Reduced sums for one dataloader.
#[derive(Debug, Clone)]
pub struct ScoreOutput {
    pub scores: ScoreAccumulator,
    /// Number of scored examples across the whole data-parallel group.
    pub total: f64,
    pub predictions: Option<Predictions>,
}

/// Run `model` over every batch of `loader` and reduce the metric sums across
/// the data-parallel group in `ctx`.
///
/// Collective: every member of the group must call this with the same metric
/// keys, or the reduction misaligns.
pub async fn score<M: Model + ?Sized>(
    request: ScoreRequest<'_>,
    model: &mut M,
    loader: &DataLoader,
    ctx: &WorkerContext,
) -> Result<ScoreOutput, EvalError> {
    let started = Instant::now();

    let mut accumulator = ScoreAccumulator::for_registry(request.metrics);
    let mut predictions = if request.emit_predictions {
        require_single_worker(ctx)?;
        Some(Predictions::default())
    } else {
        None
    };

    {
        let model = EvalModeGuard::acquire(model);
        let mut batches = loader.batches();
        while let Some(batch) = batches.next().await {
            let batch = batch?;
            score_batch(&request, &*model, &batch, &mut accumulator, predictions.as_mut())?;
        }
    }

    let reduced = ctx.group.all_reduce_sum(accumulator.pack()).await?;
    accumulator.unpack(&reduced)?;
    let total = accumulator.total;

    tracing::info!(
        dataset = request.dataset_name,
        "|epoch: {}| metrics for {}: total {}{} elapsed time (sec): {:.3}",
        request.epoch,
        request.dataset_name,
        total,
        format_rates(&accumulator, " %"),
        started.elapsed().as_secs_f64()
    );

    Ok(ScoreOutput {
        scores: accumulator,
        total,
        predictions,
    })
}

fn score_batch<M: Model + ?Sized>(
    request: &ScoreRequest<'_>,
    model: &M,
    batch: &Batch,
    accumulator: &mut ScoreAccumulator,
    predictions: Option<&mut Predictions>,
) -> Result<(), EvalError> {
    let inputs = request.input_mode.assemble(batch)?;
    let mut logits = forward_segmented(model, &inputs, SEGMENT_LENGTH)?;
    if let Some(mask) = &batch.loss_mask {
        logits = apply_loss_mask(&logits, mask)?;
    }

    if let Some(predictions) = predictions {
        predictions.extend(
            softmax_rows(&logits),
            batch.label.iter().copied(),
            batch.uid.iter().cloned(),
        );
    }

    let predicted = argmax_rows(&logits);
    if request.labeled {
        let labels = batch.label.to_vec();
        let examples = examples_for_batch(request.examples, batch)?;
        for (key, metric) in request.metrics.iter() {
            let contribution = metric.score(&predicted, &labels, examples.as_deref())?;
            accumulator.add(key, contribution);
        }
    }

    accumulator.total += batch.label.len() as f64;
    Ok(())
}

/// Run the model once, or once per segment when axis 1 of the first input is
/// longer than `segment_length`, joining segment logits in order.
pub fn forward_segmented<M: Model + ?Sized>(
    model: &M,
    inputs: &[ArrayD<i64>],
    segment_length: usize,
) -> Result<Array2<f32>, EvalError> {
    let Some(first) = inputs.first() else {
        return Err(EvalError::batch("no model inputs"));
    };
    if sequence_len(first)? <= segment_length {
        return Ok(model.forward(inputs)?.logits);
    }

    let parts = split_segments(inputs, segment_length)?
        .iter()
        .map(|segment| model.forward(segment).map(|out| out.logits))
        .collect::<Result<Vec<_>, _>>()?;
    concat_segments(&parts)
}

fn examples_for_batch<'a>(
    examples: Option<&'a ExampleMetadata>,
    batch: &Batch,
) -> Result<Option<Vec<&'a Value>>, EvalError> {
    let Some(examples) = examples else {
        return Ok(None);
    };
    batch
        .uid
        .iter()
        .map(|uid| {
            examples
                .get(uid)
                .ok_or_else(|| EvalError::evaluation(format!("no example metadata for uid {uid}")))
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
}

pub(crate) fn require_single_worker(ctx: &WorkerContext) -> Result<(), EvalError> {
    let size = ctx.data_parallel_size();
    if size != 1 {
        return Err(EvalError::precondition(format!(
            "prediction output needs a data-parallel group of 1, got {size}"
        )));
    }
    Ok(())
}

/// ` key = rate` for each metric, each rate followed by `suffix`.
pub(crate) fn format_rates(scores: &ScoreAccumulator, suffix: &str) -> String {
    scores
        .rates()
        .iter()
        .map(|(key, rate)| format!(" {key} = {rate:.4}{suffix}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collective::LocalProcessGroup;
    use crate::data::{EvalDataset, Example, InMemoryDataset, LoaderOptions, Uid};
    use crate::model::ModelOutput;
    use ndarray::{Axis, arr1};
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Logits are the token ids themselves, so argmax picks the largest token.
    struct EchoModel {
        training: bool,
        calls: AtomicUsize,
    }

    impl EchoModel {
        fn new() -> Self {
            Self {
                training: true,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl Model for EchoModel {
        fn forward(&self, inputs: &[ArrayD<i64>]) -> Result<ModelOutput, EvalError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let logits = inputs[0]
                .mapv(|t| t as f32)
                .into_dimensionality()
                .map_err(|e| EvalError::model(e.to_string()))?;
            Ok(ModelOutput::logits(logits))
        }

        fn is_training(&self) -> bool {
            self.training
        }

        fn set_training(&mut self, training: bool) {
            self.training = training;
        }
    }

    fn example(uid: i64, tokens: &[i64], label: i64) -> Example {
        let n = tokens.len() as i64;
        Example::new(uid, arr1(tokens).into_dyn(), label)
            .with_position(arr1(&(0..n).collect::<Vec<_>>()).into_dyn())
            .with_attention_mask(ndarray::Array1::<i64>::ones(tokens.len()).into_dyn())
    }

    fn loader(dataset: InMemoryDataset, batch_size: usize) -> DataLoader {
        let ds: Arc<dyn EvalDataset> = Arc::new(dataset);
        let options = LoaderOptions {
            batch_size,
            ..Default::default()
        };
        DataLoader::new(ds, options, 1, 0).unwrap()
    }

    fn request<'a>(metrics: &'a MetricRegistry, emit: bool) -> ScoreRequest<'a> {
        ScoreRequest {
            dataset_name: "dev",
            metrics,
            examples: None,
            epoch: 0,
            emit_predictions: emit,
            input_mode: InputAssemblyMode::Default,
            labeled: true,
        }
    }

    fn four_examples() -> InMemoryDataset {
        InMemoryDataset::new(
            "dev",
            vec![
                example(0, &[1, 9, 2], 1),
                example(1, &[7, 0, 3], 0),
                example(2, &[0, 1, 5], 0),
                example(3, &[4, 4, 8], 2),
            ],
        )
    }

    #[test]
    fn test_forward_segmented_short_input_single_call() {
        let model = EchoModel::new();
        let tokens = arr1(&[3i64, 1, 2]).insert_axis(Axis(0)).into_dyn();
        let logits = forward_segmented(&model, &[tokens], SEGMENT_LENGTH).unwrap();
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
        assert_eq!(logits.dim(), (1, 3));
    }

    #[test]
    fn test_forward_segmented_matches_unsegmented() {
        let tokens = arr1(&(0..23).collect::<Vec<i64>>())
            .insert_axis(Axis(0))
            .into_dyn();
        let segmented_model = EchoModel::new();
        let segmented = forward_segmented(&segmented_model, &[tokens.clone()], 10).unwrap();
        assert_eq!(segmented_model.calls.load(Ordering::SeqCst), 3);

        let whole = forward_segmented(&EchoModel::new(), &[tokens], 100).unwrap();
        assert_eq!(segmented, whole);
        assert_eq!(segmented.dim(), (1, 23));
    }

    #[tokio::test]
    async fn test_score_counts_and_restores_training() {
        let metrics = MetricRegistry::accuracy();
        let mut model = EchoModel::new();
        let loader = loader(four_examples(), 3);
        let out = score(request(&metrics, false), &mut model, &loader, &WorkerContext::single())
            .await
            .unwrap();

        // predictions: [1, 0, 2, 2] vs labels [1, 0, 0, 2]
        assert_eq!(out.total, 4.0);
        assert_eq!(out.scores.sums["accuracy"], 300.0);
        assert!(out.predictions.is_none());
        assert!(model.training);
    }

    #[tokio::test]
    async fn test_score_emits_predictions_in_order() {
        let metrics = MetricRegistry::accuracy();
        let mut model = EchoModel::new();
        let loader = loader(four_examples(), 2);
        let out = score(request(&metrics, true), &mut model, &loader, &WorkerContext::single())
            .await
            .unwrap();

        let predictions = out.predictions.unwrap();
        assert_eq!(predictions.ids, (0..4).map(Uid::Int).collect::<Vec<_>>());
        assert_eq!(predictions.labels, vec![1, 0, 0, 2]);
        assert_eq!(predictions.softmaxes.len(), 4);
        assert!(predictions.softmaxes[0][1] > 0.99);
    }

    #[tokio::test]
    async fn test_emit_predictions_requires_single_worker() {
        let metrics = MetricRegistry::accuracy();
        let mut model = EchoModel::new();
        let loader = loader(four_examples(), 2);
        let group = LocalProcessGroup::new_group(2).remove(0);
        let ctx = WorkerContext::new(0, 2, Arc::new(group));
        let err = score(request(&metrics, true), &mut model, &loader, &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, EvalError::Precondition(_)));
        assert!(model.training);
    }

    #[tokio::test]
    async fn test_unlabeled_dataset_counts_but_does_not_score() {
        let metrics = MetricRegistry::accuracy();
        let mut model = EchoModel::new();
        let loader = loader(four_examples().unlabeled(), 4);
        let mut req = request(&metrics, false);
        req.labeled = false;
        let out = score(req, &mut model, &loader, &WorkerContext::single())
            .await
            .unwrap();
        assert_eq!(out.total, 4.0);
        assert_eq!(out.scores.sums["accuracy"], 0.0);
    }

    #[tokio::test]
    async fn test_loss_mask_changes_prediction() {
        let records = vec![
            example(0, &[1, 9, 2], 2).with_loss_mask(arr1(&[1.0f32, 0.0, 1.0]).into_dyn()),
        ];
        let metrics = MetricRegistry::accuracy();
        let mut model = EchoModel::new();
        let loader = loader(InMemoryDataset::new("dev", records), 1);
        let out = score(request(&metrics, false), &mut model, &loader, &WorkerContext::single())
            .await
            .unwrap();
        assert_eq!(out.scores.sums["accuracy"], 100.0);
    }

    #[tokio::test]
    async fn test_metric_failure_restores_training_mode() {
        let metrics = MetricRegistry::new().with(
            "broken",
            |_: &[usize], _: &[i64], _: Option<&[&Value]>| -> Result<f64, EvalError> {
                Err(EvalError::evaluation("metric failed"))
            },
        );
        let mut model = EchoModel::new();
        let loader = loader(four_examples(), 2);
        let result = score(request(&metrics, false), &mut model, &loader, &WorkerContext::single()).await;
        assert!(matches!(result, Err(EvalError::Evaluation(_))));
        assert!(model.training);
    }

    #[tokio::test]
    async fn test_examples_passed_to_metrics_by_uid() {
        let mut meta = ExampleMetadata::new();
        for uid in 0..4 {
            meta.insert(Uid::Int(uid), json!({ "weight": uid }));
        }
        let metrics = MetricRegistry::new().with(
            "weight",
            |_: &[usize], _: &[i64], examples: Option<&[&Value]>| -> Result<f64, EvalError> {
                let examples = examples.ok_or_else(|| EvalError::evaluation("no examples"))?;
                Ok(examples.iter().filter_map(|e| e["weight"].as_f64()).sum())
            },
        );
        let mut model = EchoModel::new();
        let loader = loader(four_examples(), 3);
        let mut req = request(&metrics, false);
        req.examples = Some(&meta);
        let out = score(req, &mut model, &loader, &WorkerContext::single())
            .await
            .unwrap();
        assert_eq!(out.scores.sums["weight"], 6.0);
    }

    #[tokio::test]
    async fn test_missing_example_metadata_is_error() {
        let meta = ExampleMetadata::new();
        let metrics = MetricRegistry::accuracy();
        let mut model = EchoModel::new();
        let loader = loader(four_examples(), 3);
        let mut req = request(&metrics, false);
        req.examples = Some(&meta);
        let result = score(req, &mut model, &loader, &WorkerContext::single()).await;
        assert!(matches!(result, Err(EvalError::Evaluation(_))));
    }

    #[tokio::test]
    async fn test_cloze_mode_with_long_choices_is_segmented() {
        let tokens: Vec<i64> = (0..12).map(|i| if i == 11 { 50 } else { i }).collect();
        let ones = ndarray::Array1::<i64>::ones(12).into_dyn();
        let record = example(0, &tokens, 11)
            .with_target(ones.clone())
            .with_logit_mask(ones);
        let metrics = MetricRegistry::accuracy();
        let mut model = EchoModel::new();
        let loader = loader(InMemoryDataset::new("race", vec![record]), 1);
        let mut req = request(&metrics, false);
        req.input_mode = InputAssemblyMode::Cloze;
        let out = score(req, &mut model, &loader, &WorkerContext::single())
            .await
            .unwrap();
        assert_eq!(model.calls.load(Ordering::SeqCst), 2);
        assert_eq!(out.scores.sums["accuracy"], 100.0);
    }

    #[test]
    fn test_rate_line_suffix() {
        let mut scores = ScoreAccumulator::default();
        scores.add("accuracy", 75.0);
        scores.add("f1", 50.0);
        scores.total = 100.0;
        assert_eq!(
            format_rates(&scores, " %"),
            " accuracy = 0.7500 % f1 = 0.5000 %"
        );
        assert_eq!(format_rates(&scores, ""), " accuracy = 0.7500 f1 = 0.5000");
    }
}
