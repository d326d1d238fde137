//! Data-parallel index sharding.

use rand::SeedableRng;
use rand::seq::SliceRandom;

/// Splits dataset indices across the members of a data-parallel group.
///
/// Indices are padded by wrapping around to a multiple of `num_replicas` so
/// every member sees the same number of samples; member `rank` then takes
/// `rank, rank + num_replicas, ...`. With `shuffle` set, the full index list is
/// permuted first using `seed + epoch`, so all members agree on the order.
#[derive(Debug, Clone)]
pub struct ShardSampler {
    len: usize,
    num_replicas: usize,
    rank: usize,
    shuffle: bool,
    seed: u64,
    epoch: u64,
}

impl ShardSampler {
    pub fn new(len: usize, num_replicas: usize, rank: usize) -> Self {
        Self {
            len,
            num_replicas: num_replicas.max(1),
            rank,
            shuffle: false,
            seed: 0,
            epoch: 0,
        }
    }

    pub fn shuffle(mut self, shuffle: bool, seed: u64) -> Self {
        self.shuffle = shuffle;
        self.seed = seed;
        self
    }

    pub fn set_epoch(&mut self, epoch: u64) {
        self.epoch = epoch;
    }

    /// Number of samples this member receives.
    pub fn num_samples(&self) -> usize {
        self.len.div_ceil(self.num_replicas)
    }

    /// The indices this member reads, in order.
    pub fn indices(&self) -> Vec<usize> {
        if self.len == 0 {
            return Vec::new();
        }

        let mut all: Vec<usize> = (0..self.len).collect();
        if self.shuffle {
            let mut rng = rand::rngs::StdRng::seed_from_u64(self.seed.wrapping_add(self.epoch));
            all.shuffle(&mut rng);
        }

        let total = self.num_samples() * self.num_replicas;
        let mut i = 0;
        while all.len() < total {
            all.push(all[i]);
            i += 1;
        }

        all.into_iter()
            .skip(self.rank)
            .step_by(self.num_replicas)
            .collect()
    }
}
