use std::{error::Error, fmt, io, time::Duration};

use comms::specs::{collective::CollectiveOp, group::AbortCause};

/// The process group's result type.
pub type Result<T> = std::result::Result<T, GroupErr>;

/// Failures while reading the group's process environment.
#[derive(Debug)]
pub enum ConfigErr {
    Missing(&'static str),
    Invalid { var: &'static str, value: String },
    RankOutOfRange { rank: usize, world_size: usize },
}

impl fmt::Display for ConfigErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigErr::Missing(var) => write!(f, "missing environment variable {var}"),
            ConfigErr::Invalid { var, value } => write!(f, "invalid value {value:?} for {var}"),
            ConfigErr::RankOutOfRange { rank, world_size } => {
                write!(f, "rank {rank} is out of range for world size {world_size}")
            }
        }
    }
}

impl Error for ConfigErr {}

/// Failures while establishing the group.
#[derive(Debug)]
pub enum BootstrapErr {
    Timeout {
        waited: Duration,
    },
    WorldSizeMismatch {
        rank: usize,
        expected: usize,
        got: usize,
    },
    InvalidRank {
        rank: usize,
        world_size: usize,
    },
    DuplicateRank {
        rank: usize,
    },
    Rejected {
        reason: String,
    },
    UnexpectedMessage {
        got: &'static str,
    },
    Io(io::Error),
}

impl fmt::Display for BootstrapErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootstrapErr::Timeout { waited } => {
                write!(f, "rendezvous did not complete within {waited:?}")
            }
            BootstrapErr::WorldSizeMismatch {
                rank,
                expected,
                got,
            } => write!(
                f,
                "rank {rank} was configured with world size {got}, expected {expected}"
            ),
            BootstrapErr::InvalidRank { rank, world_size } => {
                write!(f, "rank {rank} cannot join a group of world size {world_size}")
            }
            BootstrapErr::DuplicateRank { rank } => write!(f, "rank {rank} joined twice"),
            BootstrapErr::Rejected { reason } => write!(f, "rejected by rank 0: {reason}"),
            BootstrapErr::UnexpectedMessage { got } => {
                write!(f, "unexpected message during rendezvous: got {got}")
            }
            BootstrapErr::Io(e) => write!(f, "rendezvous io error: {e}"),
        }
    }
}

impl Error for BootstrapErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            BootstrapErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for BootstrapErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// Process group failures.
///
/// Every variant but `AlreadyInitialized` and `NotInitialized` leaves the
/// group unusable, the only valid operation afterwards is `destroy`.
#[derive(Debug)]
pub enum GroupErr {
    Bootstrap(BootstrapErr),
    AlreadyInitialized,
    NotInitialized,
    /// A previous collective failed and the group was torn down to a broken state.
    Broken,
    Timeout {
        seq: u64,
        op: CollectiveOp,
        waited: Duration,
    },
    /// Rank `rank` gave up on the group.
    Aborted {
        rank: usize,
        cause: AbortCause,
        reason: String,
    },
    Protocol {
        seq: u64,
        detail: String,
    },
    LinkLost {
        rank: usize,
        source: io::Error,
    },
    Io(io::Error),
}

impl GroupErr {
    /// Whether the failure originated on another rank.
    pub fn is_remote(&self, own_rank: usize) -> bool {
        matches!(self, GroupErr::Aborted { rank, .. } if *rank != own_rank)
    }
}

impl fmt::Display for GroupErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupErr::Bootstrap(e) => write!(f, "bootstrap failed: {e}"),
            GroupErr::AlreadyInitialized => f.write_str("process group is already initialized"),
            GroupErr::NotInitialized => f.write_str("process group is not initialized"),
            GroupErr::Broken => f.write_str("process group is broken by an earlier failure"),
            GroupErr::Timeout { seq, op, waited } => {
                write!(f, "{op} #{seq} did not complete within {waited:?}")
            }
            GroupErr::Aborted { rank, reason, .. } => {
                write!(f, "group aborted by rank {rank}: {reason}")
            }
            GroupErr::Protocol { seq, detail } => {
                write!(f, "protocol violation at collective #{seq}: {detail}")
            }
            GroupErr::LinkLost { rank, source } => write!(f, "lost link to rank {rank}: {source}"),
            GroupErr::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for GroupErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            GroupErr::Bootstrap(e) => Some(e),
            GroupErr::LinkLost { source, .. } => Some(source),
            GroupErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<BootstrapErr> for GroupErr {
    fn from(value: BootstrapErr) -> Self {
        Self::Bootstrap(value)
    }
}

impl From<io::Error> for GroupErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<GroupErr> for io::Error {
    fn from(value: GroupErr) -> Self {
        match value {
            GroupErr::Io(e) => e,
            GroupErr::Timeout { .. } => io::Error::new(io::ErrorKind::TimedOut, value),
            other => io::Error::other(other),
        }
    }
}
