use std::num::NonZeroUsize;

use crate::{
    data::{Remainder, ShardLayout, ShardPlan, Shuffle},
    gate::GateScope,
};

const DEFAULT_EPOCHS: NonZeroUsize = NonZeroUsize::new(9).unwrap();
const DEFAULT_BATCH_SIZE: NonZeroUsize = NonZeroUsize::new(100).unwrap();
const DEFAULT_LOG_INTERVAL: NonZeroUsize = NonZeroUsize::new(10).unwrap();

/// Immutable execution bounds of a training run, identical on every rank.
///
/// Steps are bounded by the process group's timeout, a step that does not
/// complete in time fails with `WorkerErr::StepTimeout`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainingConfig {
    pub epochs: NonZeroUsize,
    /// Samples per batch and rank.
    pub batch_size: NonZeroUsize,
    pub shuffle: Shuffle,
    pub remainder: Remainder,
    pub layout: ShardLayout,
    /// The designated rank logs progress every `log_interval` batches.
    pub log_interval: NonZeroUsize,
    pub gate: GateScope,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        let plan = ShardPlan::default();

        Self {
            epochs: DEFAULT_EPOCHS,
            batch_size: DEFAULT_BATCH_SIZE,
            shuffle: plan.shuffle,
            remainder: plan.remainder,
            layout: plan.layout,
            log_interval: DEFAULT_LOG_INTERVAL,
            gate: GateScope::default(),
        }
    }
}

impl TrainingConfig {
    /// The sharding decisions of this run.
    pub fn shard_plan(&self) -> ShardPlan {
        ShardPlan {
            shuffle: self.shuffle,
            remainder: self.remainder,
            layout: self.layout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = TrainingConfig::default();
        assert_eq!(config.epochs.get(), 9);
        assert_eq!(config.batch_size.get(), 100);
        assert_eq!(config.log_interval.get(), 10);
        assert_eq!(config.shard_plan(), ShardPlan::default());
        assert_eq!(config.gate, GateScope::Global);
    }
}
