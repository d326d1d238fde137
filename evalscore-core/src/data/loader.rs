//! DataLoader: sharded, batched iteration over an evaluation dataset.

use super::dataset::EvalDataset;
use super::example::Batch;
use super::sampler::ShardSampler;
use crate::error::EvalError;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Batching options for a [`DataLoader`].
#[derive(Debug, Clone)]
pub struct LoaderOptions {
    pub batch_size: usize,
    /// Depth of the background collation queue; 0 collates inline.
    pub num_workers: usize,
    pub shuffle: bool,
    pub seed: u64,
    pub drop_last: bool,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            batch_size: 1,
            num_workers: 0,
            shuffle: false,
            seed: 0,
            drop_last: false,
        }
    }
}

/// Restartable batch source over one member's shard of a dataset.
///
/// Every call to [`DataLoader::batches`] starts a fresh pass in the same order.
pub struct DataLoader {
    dataset: Arc<dyn EvalDataset>,
    options: LoaderOptions,
    sampler: ShardSampler,
}

impl DataLoader {
    /// Build a loader for member `rank` of a data-parallel group of `num_replicas`.
    pub fn new(
        dataset: Arc<dyn EvalDataset>,
        options: LoaderOptions,
        num_replicas: usize,
        rank: usize,
    ) -> Result<Self, EvalError> {
        if options.batch_size == 0 {
            return Err(EvalError::config("batch_size must be at least 1"));
        }
        let sampler = ShardSampler::new(dataset.len(), num_replicas, rank)
            .shuffle(options.shuffle, options.seed);
        Ok(Self {
            dataset,
            options,
            sampler,
        })
    }

    pub fn dataset(&self) -> &Arc<dyn EvalDataset> {
        &self.dataset
    }

    pub fn options(&self) -> &LoaderOptions {
        &self.options
    }

    pub fn set_epoch(&mut self, epoch: u64) {
        self.sampler.set_epoch(epoch);
    }

    /// Number of batches one pass yields.
    pub fn num_batches(&self) -> usize {
        let n = self.sampler.num_samples();
        if self.options.drop_last {
            n / self.options.batch_size
        } else {
            n.div_ceil(self.options.batch_size)
        }
    }

    /// Start a pass over this member's shard.
    ///
    /// With `num_workers > 0` collation runs on the tokio blocking pool, so
    /// this must be called from within a runtime.
    pub fn batches(&self) -> Batches {
        let mut plan: Vec<Vec<usize>> = self
            .sampler
            .indices()
            .chunks(self.options.batch_size)
            .map(<[usize]>::to_vec)
            .collect();
        if self.options.drop_last
            && plan
                .last()
                .is_some_and(|last| last.len() < self.options.batch_size)
        {
            plan.pop();
        }

        if self.options.num_workers == 0 {
            return Batches::Inline {
                dataset: Arc::clone(&self.dataset),
                plan: plan.into_iter(),
            };
        }

        let (tx, rx) = mpsc::channel(self.options.num_workers);
        let dataset = Arc::clone(&self.dataset);
        let worker = tokio::task::spawn_blocking(move || {
            for indices in plan {
                let batch = collate_indices(dataset.as_ref(), &indices);
                let failed = batch.is_err();
                if tx.blocking_send(batch).is_err() || failed {
                    break;
                }
            }
        });

        Batches::Prefetch {
            rx,
            worker: Some(worker),
        }
    }
}

/// One pass of batches, either collated on demand or prefetched on a blocking task.
pub enum Batches {
    Inline {
        dataset: Arc<dyn EvalDataset>,
        plan: std::vec::IntoIter<Vec<usize>>,
    },
    Prefetch {
        rx: mpsc::Receiver<Result<Batch, EvalError>>,
        worker: Option<JoinHandle<()>>,
    },
}

impl Batches {
    pub async fn next(&mut self) -> Option<Result<Batch, EvalError>> {
        match self {
            Batches::Inline { dataset, plan } => {
                let indices = plan.next()?;
                Some(collate_indices(dataset.as_ref(), &indices))
            }
            Batches::Prefetch { rx, worker } => {
                if let Some(batch) = rx.recv().await {
                    return Some(batch);
                }
                match worker.take()?.await {
                    Err(e) if e.is_panic() => {
                        Some(Err(EvalError::dataset("loader worker panicked")))
                    }
                    Err(e) => Some(Err(EvalError::dataset(format!("loader worker failed: {e}")))),
                    Ok(()) => None,
                }
            }
        }
    }
}

fn collate_indices(dataset: &dyn EvalDataset, indices: &[usize]) -> Result<Batch, EvalError> {
    let examples = indices
        .iter()
        .map(|&i| dataset.get(i))
        .collect::<Result<Vec<_>, _>>()?;
    Batch::collate(&examples)
}
