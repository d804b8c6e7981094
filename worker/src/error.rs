use std::{error::Error, fmt, io};

use machine_learning::MlErr;
use process_group::GroupErr;

/// The worker module's result type.
pub type Result<T> = std::result::Result<T, WorkerErr>;

/// Invalid sharding requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShardingErr {
    EmptyWorld,
    RankOutOfRange { rank: usize, world_size: usize },
    EmptyDataset,
    /// Truncating left no samples for a rank.
    EmptyShard { len: usize, world_size: usize },
}

impl fmt::Display for ShardingErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShardingErr::EmptyWorld => f.write_str("world size must be positive"),
            ShardingErr::RankOutOfRange { rank, world_size } => {
                write!(f, "rank {rank} is out of range for world size {world_size}")
            }
            ShardingErr::EmptyDataset => f.write_str("cannot shard an empty dataset"),
            ShardingErr::EmptyShard { len, world_size } => write!(
                f,
                "truncating {len} samples across {world_size} ranks leaves empty shards"
            ),
        }
    }
}

impl Error for ShardingErr {}

/// Worker runtime failures.
#[derive(Debug)]
pub enum WorkerErr {
    Group(GroupErr),
    /// The dataset could not be acquired or opened, `rank` is where it failed.
    Acquisition {
        rank: usize,
        reason: String,
    },
    Sharding(ShardingErr),
    /// A step's reduction did not complete in time.
    StepTimeout {
        epoch: usize,
        step: usize,
        source: GroupErr,
    },
    Model(MlErr),
    Io(io::Error),
}

impl fmt::Display for WorkerErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerErr::Group(e) => write!(f, "process group error: {e}"),
            WorkerErr::Acquisition { rank, reason } => {
                write!(f, "dataset acquisition failed on rank {rank}: {reason}")
            }
            WorkerErr::Sharding(e) => write!(f, "sharding error: {e}"),
            WorkerErr::StepTimeout {
                epoch,
                step,
                source,
            } => write!(f, "step {step} of epoch {epoch} timed out: {source}"),
            WorkerErr::Model(e) => write!(f, "model error: {e}"),
            WorkerErr::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for WorkerErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            WorkerErr::Group(e) => Some(e),
            WorkerErr::Sharding(e) => Some(e),
            WorkerErr::StepTimeout { source, .. } => Some(source),
            WorkerErr::Model(e) => Some(e),
            WorkerErr::Io(e) => Some(e),
            WorkerErr::Acquisition { .. } => None,
        }
    }
}

impl From<GroupErr> for WorkerErr {
    fn from(value: GroupErr) -> Self {
        Self::Group(value)
    }
}

impl From<ShardingErr> for WorkerErr {
    fn from(value: ShardingErr) -> Self {
        Self::Sharding(value)
    }
}

impl From<MlErr> for WorkerErr {
    fn from(value: MlErr) -> Self {
        Self::Model(value)
    }
}

impl From<io::Error> for WorkerErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<WorkerErr> for io::Error {
    fn from(value: WorkerErr) -> Self {
        match value {
            WorkerErr::Io(e) => e,
            WorkerErr::StepTimeout { .. } => io::Error::new(io::ErrorKind::TimedOut, value),
            other => io::Error::other(other),
        }
    }
}
