use crate::error::{MlErr, Result};

/// An owned batch of samples, each one a row of `dim` features and a target.
///
/// The buffers are reused across steps, `clear` keeps their capacity.
#[derive(Debug, Clone)]
pub struct Batch {
    dim: usize,
    features: Vec<f32>,
    targets: Vec<f32>,
}

impl Batch {
    /// Creates a new empty `Batch`.
    ///
    /// # Arguments
    /// * `dim` - The amount of features of every sample.
    /// * `capacity` - The amount of samples to reserve room for.
    pub fn with_capacity(dim: usize, capacity: usize) -> Self {
        Self {
            dim,
            features: Vec::with_capacity(dim * capacity),
            targets: Vec::with_capacity(capacity),
        }
    }

    /// Appends one sample.
    ///
    /// # Errors
    /// `MlErr::SizeMismatch` if `features` is not `dim` long.
    pub fn push(&mut self, features: &[f32], target: f32) -> Result<()> {
        if features.len() != self.dim {
            return Err(MlErr::SizeMismatch {
                a: "sample features",
                b: "batch dimension",
                got: features.len(),
                expected: self.dim,
            });
        }

        self.features.extend_from_slice(features);
        self.targets.push(target);
        Ok(())
    }

    #[inline]
    pub fn clear(&mut self) {
        self.features.clear();
        self.targets.clear();
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// A borrowed view of the batch.
    pub fn as_ref(&self) -> BatchRef<'_> {
        BatchRef {
            dim: self.dim,
            features: &self.features,
            targets: &self.targets,
        }
    }
}

/// Borrowed batch view, `features` holds `targets.len()` rows of `dim` values.
#[derive(Debug, Clone, Copy)]
pub struct BatchRef<'a> {
    pub dim: usize,
    pub features: &'a [f32],
    pub targets: &'a [f32],
}

impl<'a> BatchRef<'a> {
    #[inline]
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Iterates over `(features, target)` pairs.
    pub fn rows(self) -> impl Iterator<Item = (&'a [f32], f32)> {
        let Self {
            dim,
            features,
            targets,
        } = self;

        features.chunks_exact(dim.max(1)).zip(targets.iter().copied())
    }
}
