use std::{num::NonZeroUsize, ops::Range, sync::Arc};

use machine_learning::Batch;

use super::{dataset::Dataset, shard::Shard};
use crate::error::Result;

/// Walks a shard in fixed-size batches, the last one may be shorter.
///
/// Batches are handed out as ranges into `indices` so they can be sent to the
/// blocking pool together with a clone of the shared index list.
#[derive(Debug, Clone)]
pub struct DataLoader {
    indices: Arc<[usize]>,
    batch_size: usize,
    cursor: usize,
}

impl DataLoader {
    pub fn new(shard: Shard, batch_size: NonZeroUsize) -> Self {
        Self {
            indices: shard.indices.into(),
            batch_size: batch_size.get(),
            cursor: 0,
        }
    }

    #[inline]
    pub fn indices(&self) -> &Arc<[usize]> {
        &self.indices
    }

    /// The amount of samples in the shard.
    #[inline]
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    #[inline]
    pub fn num_batches(&self) -> usize {
        self.indices.len().div_ceil(self.batch_size)
    }

    /// Returns the range of the next batch, or `None` if the shard is exhausted.
    pub fn next_batch(&mut self) -> Option<Range<usize>> {
        if self.cursor >= self.indices.len() {
            return None;
        }

        let end = (self.cursor + self.batch_size).min(self.indices.len());
        let range = self.cursor..end;
        self.cursor = end;
        Some(range)
    }
}

/// Reads the samples at `indices` into `batch`, replacing its contents.
pub fn load_batch<D>(dataset: &D, indices: &[usize], batch: &mut Batch) -> Result<()>
where
    D: Dataset + ?Sized,
{
    batch.clear();

    for &i in indices {
        let sample = dataset.read(i)?;
        batch.push(sample.features, sample.target)?;
    }

    Ok(())
}
