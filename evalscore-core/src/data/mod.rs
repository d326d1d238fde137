//! Evaluation data: examples and datasets, plus sharding and batching.

pub mod dataset;
pub mod example;
pub mod loader;
pub mod sampler;

pub use dataset::{EvalDataset, ExampleMetadata, InMemoryDataset};
pub use example::{Batch, Example, Uid};
pub use loader::{Batches, DataLoader, LoaderOptions};
pub use sampler::ShardSampler;
