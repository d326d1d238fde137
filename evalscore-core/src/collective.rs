//! Cross-worker reduction.
//!
//! Scoring sums are combined across the data-parallel group through
//! [`ProcessGroup::all_reduce_sum`]. The backend is pluggable: a single-process
//! group is the identity, and [`LocalProcessGroup`] runs several workers as
//! tasks inside one process.

use crate::error::EvalError;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

/// A data-parallel group of workers that can sum vectors elementwise.
#[async_trait]
pub trait ProcessGroup: Send + Sync {
    /// This worker's rank inside the group.
    fn rank(&self) -> usize;

    /// Number of workers in the group.
    fn size(&self) -> usize;

    /// Elementwise sum of `values` over every member of the group.
    ///
    /// Collective: blocks until all members have called it. Members must pass
    /// vectors of the same length with the same element order.
    async fn all_reduce_sum(&self, values: Vec<f64>) -> Result<Vec<f64>, EvalError>;
}

/// Identity group for single-worker runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct SingleProcessGroup;

#[async_trait]
impl ProcessGroup for SingleProcessGroup {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    async fn all_reduce_sum(&self, values: Vec<f64>) -> Result<Vec<f64>, EvalError> {
        Ok(values)
    }
}

type Reply = oneshot::Sender<Result<Vec<f64>, EvalError>>;

#[derive(Default)]
struct Pending {
    contributions: Vec<(Vec<f64>, Reply)>,
}

/// In-process group: each member contributes its vector, and the last one to
/// arrive sums all contributions and answers every member.
pub struct LocalProcessGroup {
    rank: usize,
    size: usize,
    pending: Arc<Mutex<Pending>>,
}

impl LocalProcessGroup {
    /// Create the `size` members of a new group, ordered by rank.
    pub fn new_group(size: usize) -> Vec<LocalProcessGroup> {
        let pending = Arc::new(Mutex::new(Pending::default()));
        (0..size)
            .map(|rank| LocalProcessGroup {
                rank,
                size,
                pending: Arc::clone(&pending),
            })
            .collect()
    }
}

#[async_trait]
impl ProcessGroup for LocalProcessGroup {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    async fn all_reduce_sum(&self, values: Vec<f64>) -> Result<Vec<f64>, EvalError> {
        let (tx, rx) = oneshot::channel();
        let ready = {
            let mut pending = self
                .pending
                .lock()
                .map_err(|_| EvalError::collective("reduction state poisoned"))?;
            pending.contributions.push((values, tx));
            if pending.contributions.len() == self.size {
                Some(std::mem::take(&mut pending.contributions))
            } else {
                None
            }
        };

        if let Some(contributions) = ready {
            let (vectors, replies): (Vec<_>, Vec<_>) = contributions.into_iter().unzip();
            let result = sum_elementwise(&vectors);
            tracing::debug!(
                group_size = self.size,
                len = vectors.first().map_or(0, Vec::len),
                "all-reduce complete"
            );
            for reply in replies {
                let _ = reply.send(result.clone().map_err(EvalError::Collective));
            }
        }

        rx.await
            .map_err(|_| EvalError::collective("group dropped before the reduction finished"))?
    }
}

fn sum_elementwise(vectors: &[Vec<f64>]) -> Result<Vec<f64>, String> {
    let Some(first) = vectors.first() else {
        return Ok(Vec::new());
    };
    let mut sum = vec![0.0; first.len()];
    for (member, v) in vectors.iter().enumerate() {
        if v.len() != sum.len() {
            return Err(format!(
                "member contribution {member} has length {}, expected {}",
                v.len(),
                sum.len()
            ));
        }
        for (acc, x) in sum.iter_mut().zip(v) {
            *acc += x;
        }
    }
    Ok(sum)
}

/// Where this process sits in the distributed job.
#[derive(Clone)]
pub struct WorkerContext {
    /// Global rank across the whole job; rank 0 writes shared artifacts.
    pub rank: usize,
    pub world_size: usize,
    /// The data-parallel group scores are reduced over.
    pub group: Arc<dyn ProcessGroup>,
}

impl WorkerContext {
    pub fn new(rank: usize, world_size: usize, group: Arc<dyn ProcessGroup>) -> Self {
        Self {
            rank,
            world_size,
            group,
        }
    }

    /// A lone process: rank 0 of 1, with an identity group.
    pub fn single() -> Self {
        Self::new(0, 1, Arc::new(SingleProcessGroup))
    }

    pub fn data_parallel_size(&self) -> usize {
        self.group.size()
    }

    pub fn data_parallel_rank(&self) -> usize {
        self.group.rank()
    }

    pub fn is_leader(&self) -> bool {
        self.rank == 0
    }
}

impl std::fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerContext")
            .field("rank", &self.rank)
            .field("world_size", &self.world_size)
            .field("data_parallel_rank", &self.group.rank())
            .field("data_parallel_size", &self.group.size())
            .finish()
    }
}
