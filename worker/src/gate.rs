use std::{io, sync::Arc};

use log::{debug, info, warn};
use process_group::{AbortCause, GroupErr, ProcessGroup, Rendezvous};
use tokio::task;

use crate::{
    data::DataSource,
    error::{Result, WorkerErr},
};

/// Which ranks acquire the dataset before the others may read it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GateScope {
    /// Rank 0 acquires into storage every rank can read.
    #[default]
    Global,
    /// The first rank of every machine (`local_rank == 0`) acquires into
    /// machine-local storage.
    PerNode,
}

impl GateScope {
    /// Whether the rank with this identity acquires.
    pub fn designates(self, rank: usize, local_rank: usize) -> bool {
        match self {
            GateScope::Global => rank == 0,
            GateScope::PerNode => local_rank == 0,
        }
    }
}

/// Acquires the dataset on the designated ranks and opens it everywhere once
/// the whole group passed the gate's barrier.
///
/// A designated rank that fails to acquire aborts the group instead of
/// entering the barrier, so every rank fails with `WorkerErr::Acquisition`
/// rather than waiting for the timeout. Any other failure seen at the
/// barrier is surfaced as `WorkerErr::Group`.
pub async fn open_dataset<Z, S>(
    group: &mut ProcessGroup<Z>,
    source: &Arc<S>,
    scope: GateScope,
) -> Result<S::Dataset>
where
    Z: Rendezvous,
    S: DataSource,
{
    let rank = group.rank();

    if scope.designates(rank, group.local_rank()) {
        info!(rank = rank; "acquiring dataset {}", source.describe());

        let src = source.clone();
        let acquired = run_blocking(move || src.acquire()).await;

        if let Err(e) = acquired {
            return Err(give_up(group, rank, e.to_string()).await);
        }
    }

    match group.barrier().await {
        Ok(()) => {}
        Err(GroupErr::Aborted {
            rank,
            cause: AbortCause::Unavailable,
            reason,
        }) => {
            return Err(WorkerErr::Acquisition { rank, reason });
        }
        Err(e) => return Err(e.into()),
    }

    debug!(rank = rank; "dataset gate passed");

    let src = source.clone();
    match run_blocking(move || src.open()).await {
        Ok(dataset) => Ok(dataset),
        Err(e) => Err(give_up(group, rank, e.to_string()).await),
    }
}

async fn run_blocking<F, T>(f: F) -> io::Result<T>
where
    F: FnOnce() -> io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    task::spawn_blocking(f)
        .await
        .map_err(io::Error::other)?
}

/// Tells the group this rank cannot go on and builds the error to surface.
async fn give_up<Z: Rendezvous>(
    group: &mut ProcessGroup<Z>,
    rank: usize,
    reason: String,
) -> WorkerErr {
    warn!(rank = rank; "dataset unavailable: {reason}");

    if let Err(e) = group.abort_with(AbortCause::Unavailable, &reason).await {
        debug!("abort after acquisition failure: {e}");
    }

    WorkerErr::Acquisition { rank, reason }
}
