pub mod dataset;
pub mod loader;
pub mod shard;
pub mod source;

pub use dataset::{Dataset, InMemoryDataset, Sample};
pub use loader::{DataLoader, load_batch};
pub use shard::{Remainder, Shard, ShardLayout, ShardPlan, Shuffle, permutation};
pub use source::{DataSource, SyntheticSource, SyntheticSpec};
