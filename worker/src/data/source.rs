use std::{
    fs::{self, File},
    io::{self, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use log::{debug, info};
use machine_learning::MlErr;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use super::dataset::{Dataset, InMemoryDataset};

/// Where a dataset comes from.
///
/// `acquire` materializes it in storage shared by the ranks that will `open`
/// it. Both are blocking and run on the blocking pool.
pub trait DataSource: Send + Sync + 'static {
    type Dataset: Dataset + 'static;

    /// A human readable description of the source, for logs.
    fn describe(&self) -> String;

    /// Downloads or generates the dataset, a no-op if it is already there.
    fn acquire(&self) -> io::Result<()>;

    /// Opens an already acquired dataset.
    fn open(&self) -> io::Result<Self::Dataset>;
}

/// What `SyntheticSource` generates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SyntheticSpec {
    pub len: usize,
    pub dim: usize,
    pub seed: u64,
}

/// A linear regression dataset generated once into a directory.
///
/// Targets are `w . x + b` for a hidden `w` and `b` drawn from the seed, the
/// features are uniform in `[-1, 1)`.
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    dir: PathBuf,
    spec: SyntheticSpec,
}

impl SyntheticSource {
    /// Creates a new `SyntheticSource`.
    ///
    /// # Arguments
    /// * `dir` - Where the dataset file is written and read from.
    /// * `spec` - The shape and seed of the dataset.
    pub fn new(dir: impl Into<PathBuf>, spec: SyntheticSpec) -> Self {
        Self {
            dir: dir.into(),
            spec,
        }
    }

    pub fn path(&self) -> PathBuf {
        let SyntheticSpec { len, dim, seed } = self.spec;
        self.dir.join(format!("synthetic-{len}x{dim}-{seed}.json"))
    }

    /// The parameters the targets were generated with, weights then bias.
    pub fn truth(&self) -> Vec<f32> {
        let mut rng = ChaCha8Rng::seed_from_u64(self.spec.seed);
        (0..=self.spec.dim)
            .map(|_| rng.random_range(-1.0..1.0))
            .collect()
    }

    fn generate(&self) -> io::Result<InMemoryDataset> {
        let SyntheticSpec { len, dim, seed } = self.spec;
        let truth = self.truth();
        let (weights, bias) = truth.split_at(dim);

        // Features use the next stream so they don't repeat the parameters.
        let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(1));
        let mut features = Vec::with_capacity(len * dim);
        let mut targets = Vec::with_capacity(len);

        for _ in 0..len {
            let start = features.len();
            features.extend((0..dim).map(|_| rng.random_range(-1.0f32..1.0)));

            let x = &features[start..];
            let y = x.iter().zip(weights).map(|(x, w)| x * w).sum::<f32>() + bias[0];
            targets.push(y);
        }

        InMemoryDataset::new(dim, features, targets).map_err(invalid_data)
    }
}

impl DataSource for SyntheticSource {
    type Dataset = InMemoryDataset;

    fn describe(&self) -> String {
        self.path().display().to_string()
    }

    fn acquire(&self) -> io::Result<()> {
        let path = self.path();

        if path.exists() {
            debug!("dataset already present at {}", path.display());
            return Ok(());
        }

        fs::create_dir_all(&self.dir)?;
        info!(len = self.spec.len, dim = self.spec.dim; "generating dataset at {}", path.display());

        // Readers never observe a partially written file.
        let tmp = path.with_extension("json.partial");
        write_json(&tmp, &self.generate()?)?;
        fs::rename(&tmp, &path)
    }

    fn open(&self) -> io::Result<InMemoryDataset> {
        let file = File::open(self.path())?;
        let dataset: InMemoryDataset = serde_json::from_reader(BufReader::new(file))?;

        dataset.validate().map_err(invalid_data)
    }
}

fn invalid_data(e: MlErr) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e.to_string())
}

fn write_json(path: &Path, dataset: &InMemoryDataset) -> io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer(&mut writer, dataset)?;
    writer.flush()
}
