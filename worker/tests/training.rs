use std::{
    fs, io,
    num::NonZeroUsize,
    path::PathBuf,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use machine_learning::{
    BatchRef, Forward, LinearRegression, MlErr, TrainableModel,
    optimization::{GradientDescent, GradientDescentWithMomentum},
};
use process_group::{
    AbortCause, GroupConfig, GroupErr, GroupState, MemoryRendezvous, ProcessGroup,
};
use tokio::{task::JoinHandle, time};
use worker::{
    GateScope, TrainingConfig, Worker, WorkerErr,
    data::{
        DataSource, Dataset, InMemoryDataset, Remainder, Sample, ShardLayout, Shuffle,
        SyntheticSource, SyntheticSpec,
    },
};

const TIMEOUT: Duration = Duration::from_secs(10);

type MemoryGroup = ProcessGroup<MemoryRendezvous>;

fn nz(n: usize) -> NonZeroUsize {
    NonZeroUsize::new(n).unwrap()
}

/// One group per rank, `local_ranks[r]` is rank `r`'s local rank.
fn groups_on(local_ranks: &[usize], timeout: Duration) -> Vec<MemoryGroup> {
    let world_size = nz(local_ranks.len());

    MemoryRendezvous::group(local_ranks.len())
        .into_iter()
        .zip(local_ranks)
        .enumerate()
        .map(|(rank, (rdv, &local_rank))| {
            let config = GroupConfig::new(rank, local_rank, world_size, "memory")
                .unwrap()
                .with_timeout(timeout);

            ProcessGroup::new(config, rdv)
        })
        .collect()
}

fn groups(world_size: usize, timeout: Duration) -> Vec<MemoryGroup> {
    groups_on(&vec![0; world_size], timeout)
}

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("worker-{name}-{}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    dir
}

async fn join_all<T>(handles: Vec<JoinHandle<T>>) -> Vec<T> {
    let mut out = Vec::with_capacity(handles.len());

    for handle in handles {
        out.push(handle.await.unwrap());
    }

    out
}

/// `y = 2x` over `len` evenly spaced points in `[0, 1)`, recording which
/// samples are read.
struct MemorySource {
    len: usize,
    acquire_time: Duration,
    acquired: Arc<AtomicUsize>,
    reads: Arc<Mutex<Vec<usize>>>,
}

impl MemorySource {
    fn new(len: usize) -> Self {
        Self {
            len,
            acquire_time: Duration::ZERO,
            acquired: Arc::default(),
            reads: Arc::default(),
        }
    }
}

struct RecordingDataset {
    inner: InMemoryDataset,
    reads: Arc<Mutex<Vec<usize>>>,
}

impl Dataset for RecordingDataset {
    fn len(&self) -> usize {
        self.inner.len()
    }

    fn dim(&self) -> usize {
        self.inner.dim()
    }

    fn read(&self, index: usize) -> io::Result<Sample<'_>> {
        self.reads.lock().unwrap().push(index);
        self.inner.read(index)
    }
}

impl DataSource for MemorySource {
    type Dataset = RecordingDataset;

    fn describe(&self) -> String {
        "memory".to_string()
    }

    fn acquire(&self) -> io::Result<()> {
        std::thread::sleep(self.acquire_time);
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn open(&self) -> io::Result<RecordingDataset> {
        let xs: Vec<f32> = (0..self.len).map(|i| i as f32 / self.len as f32).collect();
        let ys = xs.iter().map(|x| 2.0 * x).collect();
        let inner = InMemoryDataset::new(1, xs, ys).map_err(io::Error::other)?;

        Ok(RecordingDataset {
            inner,
            reads: self.reads.clone(),
        })
    }
}

struct FailingSource;

impl DataSource for FailingSource {
    type Dataset = InMemoryDataset;

    fn describe(&self) -> String {
        "unreachable mirror".to_string()
    }

    fn acquire(&self) -> io::Result<()> {
        Err(io::Error::other("mirror unreachable"))
    }

    fn open(&self) -> io::Result<InMemoryDataset> {
        Err(io::Error::from(io::ErrorKind::NotFound))
    }
}

#[derive(Debug, Clone, Copy)]
enum Mode {
    Healthy,
    Slow(Duration),
    Diverged,
}

#[derive(Debug)]
struct FlakyModel {
    inner: LinearRegression<GradientDescent>,
    mode: Mode,
    /// The loss of the latest local forward pass, before any reduction.
    local_loss: Option<f32>,
}

impl FlakyModel {
    fn new(mode: Mode) -> Self {
        Self {
            inner: LinearRegression::new(1, GradientDescent::new(0.1)),
            mode,
            local_loss: None,
        }
    }
}

impl TrainableModel for FlakyModel {
    fn num_params(&self) -> usize {
        self.inner.num_params()
    }

    fn params(&self) -> &[f32] {
        self.inner.params()
    }

    fn params_mut(&mut self) -> &mut [f32] {
        self.inner.params_mut()
    }

    fn forward(&mut self, batch: BatchRef<'_>) -> Result<Forward, MlErr> {
        match self.mode {
            Mode::Healthy => {}
            Mode::Slow(pause) => std::thread::sleep(pause),
            Mode::Diverged => {
                return Err(MlErr::NonFinite {
                    what: "loss",
                    value: f32::INFINITY,
                });
            }
        }

        let forward = self.inner.forward(batch)?;
        self.local_loss = Some(forward.loss);
        Ok(forward)
    }

    fn backward(&mut self, loss: f32, grads: &mut [f32]) -> Result<(), MlErr> {
        self.inner.backward(loss, grads)
    }

    fn apply_update(&mut self, grads: &[f32]) -> Result<(), MlErr> {
        self.inner.apply_update(grads)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn replicas_stay_identical_and_converge() {
    let dir = scratch_dir("converge");
    let spec = SyntheticSpec {
        len: 600,
        dim: 3,
        seed: 4,
    };
    let truth = SyntheticSource::new(&dir, spec).truth();
    let config = TrainingConfig {
        batch_size: nz(10),
        ..Default::default()
    };

    let handles = groups(3, TIMEOUT)
        .into_iter()
        .map(|mut group| {
            let source = SyntheticSource::new(&dir, spec);
            let config = config.clone();

            tokio::spawn(async move {
                // Different starting points, rank 0's parameters win.
                let optimizer = GradientDescentWithMomentum::new(4, 0.1, 0.9);
                let model = LinearRegression::seeded(3, group.rank() as u64, optimizer);

                let trained = Worker::new(config, model, source)
                    .run(&mut group)
                    .await
                    .unwrap();

                (trained, group.state())
            })
        })
        .collect();

    let results = join_all(handles).await;
    let reference = results[0].0.model.params().to_vec();

    for (trained, state) in &results {
        assert_eq!(*state, GroupState::Closed);
        assert_eq!(trained.model.params(), &reference[..]);
        assert_eq!(trained.metrics.epochs, 9);
        assert_eq!(trained.metrics.steps, 9 * 20);
        assert_eq!(trained.metrics.samples, 9 * 200);
    }

    for (got, expected) in reference.iter().zip(&truth) {
        assert!((got - expected).abs() < 0.05, "{reference:?} vs {truth:?}");
    }

    fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn contiguous_unshuffled_shards() {
    let config = TrainingConfig {
        epochs: nz(2),
        batch_size: nz(3),
        shuffle: Shuffle::DontShuffle,
        remainder: Remainder::Pad,
        layout: ShardLayout::Contiguous,
        ..Default::default()
    };

    let handles = groups(2, TIMEOUT)
        .into_iter()
        .map(|mut group| {
            let config = config.clone();
            let source = MemorySource::new(10);
            let reads = source.reads.clone();

            tokio::spawn(async move {
                Worker::new(config, FlakyModel::new(Mode::Healthy), source)
                    .run(&mut group)
                    .await
                    .unwrap();

                let reads = reads.lock().unwrap().clone();
                reads
            })
        })
        .collect();

    let reads = join_all(handles).await;
    assert_eq!(reads[0], [0, 1, 2, 3, 4, 0, 1, 2, 3, 4]);
    assert_eq!(reads[1], [5, 6, 7, 8, 9, 5, 6, 7, 8, 9]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn per_node_gate_acquires_once_per_machine() {
    let config = TrainingConfig {
        epochs: nz(1),
        gate: GateScope::PerNode,
        ..Default::default()
    };

    let acquired = Arc::new(AtomicUsize::new(0));

    let handles = groups_on(&[0, 1, 0, 1], TIMEOUT)
        .into_iter()
        .map(|mut group| {
            let config = config.clone();
            let mut source = MemorySource::new(40);
            source.acquired = acquired.clone();

            tokio::spawn(async move {
                Worker::new(config, FlakyModel::new(Mode::Healthy), source)
                    .run(&mut group)
                    .await
                    .unwrap();
            })
        })
        .collect();

    join_all(handles).await;
    assert_eq!(acquired.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_acquisition_reaches_every_rank() {
    // Long enough that only an explicit abort can end the run in time.
    let handles = groups(3, Duration::from_secs(60))
        .into_iter()
        .map(|mut group| {
            tokio::spawn(async move {
                let err = Worker::new(
                    TrainingConfig::default(),
                    FlakyModel::new(Mode::Healthy),
                    FailingSource,
                )
                .run(&mut group)
                .await
                .unwrap_err();

                (err, group.state())
            })
        })
        .collect();

    let results = time::timeout(Duration::from_secs(5), join_all(handles))
        .await
        .expect("ranks waited for the group timeout");

    for (err, state) in results {
        match err {
            WorkerErr::Acquisition { rank, reason } => {
                assert_eq!(rank, 0);
                assert!(reason.contains("mirror unreachable"), "{reason}");
            }
            other => panic!("unexpected error: {other}"),
        }

        assert_eq!(state, GroupState::Closed);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn lost_peer_during_acquisition_is_not_an_acquisition_failure() {
    let mut all = groups(3, TIMEOUT).into_iter();
    let mut hub = all.next().unwrap();
    let mut lost = all.next().unwrap();
    let mut peer = all.next().unwrap();

    let hub = tokio::spawn(async move {
        let mut source = MemorySource::new(30);
        source.acquire_time = Duration::from_millis(300);

        let err = Worker::new(TrainingConfig::default(), FlakyModel::new(Mode::Healthy), source)
            .run(&mut hub)
            .await
            .unwrap_err();

        (err, hub.state())
    });

    let peer = tokio::spawn(async move {
        let err = Worker::new(
            TrainingConfig::default(),
            FlakyModel::new(Mode::Healthy),
            MemorySource::new(30),
        )
        .run(&mut peer)
        .await
        .unwrap_err();

        (err, peer.state())
    });

    // Rank 1 joins, then disappears while rank 0 is still acquiring.
    lost.init().await.unwrap();
    drop(lost);

    let (err, state) = hub.await.unwrap();
    assert!(
        matches!(err, WorkerErr::Group(GroupErr::LinkLost { rank: 1, .. })),
        "{err}"
    );
    assert_eq!(state, GroupState::Closed);

    let (err, state) = peer.await.unwrap();
    assert!(
        matches!(
            err,
            WorkerErr::Group(GroupErr::Aborted {
                rank: 0,
                cause: AbortCause::Failure,
                ..
            })
        ),
        "{err}"
    );
    assert_eq!(state, GroupState::Closed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn step_timeout_still_tears_down() {
    let handles = groups(2, Duration::from_millis(300))
        .into_iter()
        .map(|mut group| {
            let mode = match group.rank() {
                1 => Mode::Slow(Duration::from_millis(1500)),
                _ => Mode::Healthy,
            };

            tokio::spawn(async move {
                let res = Worker::new(
                    TrainingConfig::default(),
                    FlakyModel::new(mode),
                    MemorySource::new(400),
                )
                .run(&mut group)
                .await;

                (res.err(), group.state())
            })
        })
        .collect();

    let mut results = join_all(handles).await.into_iter();

    let (err, state) = results.next().unwrap();
    assert!(
        matches!(err, Some(WorkerErr::StepTimeout { epoch: 1, step: 0, .. })),
        "{err:?}"
    );
    assert_eq!(state, GroupState::Closed);

    let (err, state) = results.next().unwrap();
    assert!(
        matches!(err, Some(WorkerErr::Group(GroupErr::Aborted { rank: 0, .. }))),
        "{err:?}"
    );
    assert_eq!(state, GroupState::Closed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn local_compute_failure_aborts_the_group() {
    let handles = groups(3, TIMEOUT)
        .into_iter()
        .map(|mut group| {
            let mode = match group.rank() {
                2 => Mode::Diverged,
                _ => Mode::Healthy,
            };

            tokio::spawn(async move {
                let err = Worker::new(
                    TrainingConfig::default(),
                    FlakyModel::new(mode),
                    MemorySource::new(300),
                )
                .run(&mut group)
                .await
                .unwrap_err();

                (err, group.state())
            })
        })
        .collect();

    for (rank, (err, state)) in join_all(handles).await.into_iter().enumerate() {
        assert_eq!(state, GroupState::Closed);

        match (rank, err) {
            (2, WorkerErr::Model(MlErr::NonFinite { .. })) => {}
            (0 | 1, WorkerErr::Group(GroupErr::Aborted { rank: 2, reason, .. })) => {
                assert!(reason.contains("not finite"), "{reason}");
            }
            (rank, other) => panic!("rank {rank}: unexpected error {other}"),
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reported_loss_is_the_group_mean() {
    // One batch per rank over disjoint ranges of `y = 2x`, so every rank
    // starts from a different local loss.
    let config = TrainingConfig {
        epochs: nz(1),
        batch_size: nz(10),
        shuffle: Shuffle::DontShuffle,
        layout: ShardLayout::Contiguous,
        ..Default::default()
    };

    let handles = groups(3, TIMEOUT)
        .into_iter()
        .map(|mut group| {
            let config = config.clone();

            tokio::spawn(async move {
                Worker::new(config, FlakyModel::new(Mode::Healthy), MemorySource::new(30))
                    .run(&mut group)
                    .await
                    .unwrap()
            })
        })
        .collect();

    let results = join_all(handles).await;
    let local: Vec<f32> = results
        .iter()
        .map(|trained| trained.model.local_loss.unwrap())
        .collect();

    assert!(local[0] < local[1] && local[1] < local[2], "{local:?}");

    let mean = local.iter().sum::<f32>() / local.len() as f32;

    for trained in &results {
        let reported = trained.metrics.last_loss.unwrap();
        assert_eq!(Some(reported), results[0].metrics.last_loss);
        assert!((reported - mean).abs() < 1e-6, "{reported} vs {mean}");
    }
}
