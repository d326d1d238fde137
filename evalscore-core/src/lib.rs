//! # evalscore-core: sharded evaluation scoring
//!
//! Scores a finetuned model on held-out datasets split across a data-parallel
//! group, reduces the metric sums across workers, and combines them into one
//! pooled rate per metric.
//!
//! The moving parts the caller supplies are traits: [`Model`] for forward
//! passes, [`EvalDataset`] for data, [`MetricFn`] for scoring,
//! [`ProcessGroup`] for the cross-worker sum, and [`TelemetrySink`] for
//! per-epoch series.
//!
//! ```rust,ignore
//! let evaluator = provide_metrics_function(
//!     |path| load_dataset(path),
//!     MetricRegistry::accuracy(),
//!     load_config(Some(Path::new("eval.toml")), None)?,
//!     false,
//!     WorkerContext::single(),
//! )?;
//! let rates = evaluator.evaluate(&mut model, epoch, false, None).await?;
//! ```

// Foundation
pub mod config;
pub mod error;
pub mod tensor;

// Inputs
pub mod data;
pub mod model;

// Scoring
pub mod collective;
pub mod metrics;
pub mod scorer;

// Combination & outputs
pub mod aggregator;
pub mod predictions;
pub mod telemetry;

// Re-exports
pub use aggregator::{MetricsEvaluator, provide_metrics_function};
pub use collective::{LocalProcessGroup, ProcessGroup, SingleProcessGroup, WorkerContext};
pub use config::{EvalConfig, load_config};
pub use data::{Batch, DataLoader, EvalDataset, Example, ExampleMetadata, InMemoryDataset, Uid};
pub use error::EvalError;
pub use metrics::{MetricFn, MetricRegistry, ScoreAccumulator, accuracy_metric};
pub use model::{EvalModeGuard, InputAssemblyMode, Model, ModelOutput};
pub use predictions::{NamedPredictions, Predictions};
pub use scorer::{ScoreOutput, ScoreRequest, score};
pub use telemetry::{InMemoryTelemetry, TelemetrySink, TracingTelemetry};
