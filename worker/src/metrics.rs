use std::time::Duration;

/// What a rank did during a training run.
#[derive(Debug, Default, Clone)]
pub struct WorkerMetrics {
    /// Time spent in local forward and backward passes.
    pub compute_time: Duration,
    /// Time spent waiting on the group's reductions.
    pub sync_time: Duration,

    pub epochs: u64,
    pub steps: u64,
    /// Samples this rank computed over, padding included.
    pub samples: u64,
    /// The last group-averaged loss.
    pub last_loss: Option<f32>,
}

impl WorkerMetrics {
    #[inline]
    pub fn bump_step(&mut self) {
        self.steps += 1;
    }

    #[inline]
    pub fn bump_epoch(&mut self) {
        self.epochs += 1;
    }

    #[inline]
    pub fn add_samples(&mut self, n: usize) {
        self.samples += n as u64;
    }
}
