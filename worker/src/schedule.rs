use std::num::NonZeroUsize;

/// Defines which batches report progress.
#[derive(Debug, Clone)]
pub struct LogSchedule {
    interval: NonZeroUsize,
}

impl LogSchedule {
    pub fn new(interval: NonZeroUsize) -> Self {
        Self { interval }
    }

    /// Returns true for the first batch of every `interval`.
    #[inline]
    pub fn should_log(&self, batch_index: usize) -> bool {
        batch_index % self.interval.get() == 0
    }
}
