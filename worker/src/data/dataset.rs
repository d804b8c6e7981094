use std::io;

use machine_learning::{MlErr, Result as MlResult};
use serde::{Deserialize, Serialize};

/// A single supervised sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample<'a> {
    pub features: &'a [f32],
    pub target: f32,
}

/// Random access to the samples of an opened dataset.
pub trait Dataset: Send + Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The amount of features of every sample.
    fn dim(&self) -> usize;

    /// Reads the sample at `index`.
    ///
    /// # Errors
    /// `io::ErrorKind::InvalidInput` if `index` is out of range, or whatever
    /// the underlying storage fails with.
    fn read(&self, index: usize) -> io::Result<Sample<'_>>;
}

/// A dataset held in memory as row-major features and one target per row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InMemoryDataset {
    dim: usize,
    features: Vec<f32>,
    targets: Vec<f32>,
}

impl InMemoryDataset {
    /// Creates a new dataset from owned buffers.
    ///
    /// # Errors
    /// `MlErr::SizeMismatch` unless `features` holds exactly `dim` values per target.
    pub fn new(dim: usize, features: Vec<f32>, targets: Vec<f32>) -> MlResult<Self> {
        if features.len() != dim * targets.len() {
            return Err(MlErr::SizeMismatch {
                a: "features",
                b: "targets times dimension",
                got: features.len(),
                expected: dim * targets.len(),
            });
        }

        Ok(Self {
            dim,
            features,
            targets,
        })
    }

    /// Checks the invariants `new` enforces, for datasets that were deserialized.
    pub(crate) fn validate(self) -> MlResult<Self> {
        Self::new(self.dim, self.features, self.targets)
    }
}

impl Dataset for InMemoryDataset {
    #[inline]
    fn len(&self) -> usize {
        self.targets.len()
    }

    #[inline]
    fn dim(&self) -> usize {
        self.dim
    }

    fn read(&self, index: usize) -> io::Result<Sample<'_>> {
        let Some(&target) = self.targets.get(index) else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("sample {index} is out of range for {} samples", self.len()),
            ));
        };

        let start = index * self.dim;

        Ok(Sample {
            features: &self.features[start..start + self.dim],
            target,
        })
    }
}
