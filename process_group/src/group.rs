use std::{fmt, io, mem};

use comms::specs::{
    collective::{CollectiveOp, ReduceOp},
    group::AbortCause,
};
use log::{debug, info, warn};

use crate::{
    GroupConfig, bootstrap,
    collective::Topology,
    error::{BootstrapErr, GroupErr, Result},
    rendezvous::Rendezvous,
};

/// The lifecycle of a `ProcessGroup`, as observed from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupState {
    Uninitialized,
    Active,
    /// A collective failed, only `destroy` is allowed.
    Broken,
    Closed,
}

impl fmt::Display for GroupState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GroupState::Uninitialized => "uninitialized",
            GroupState::Active => "active",
            GroupState::Broken => "broken",
            GroupState::Closed => "closed",
        };

        f.write_str(s)
    }
}

enum State {
    Uninitialized,
    Active(Topology),
    Broken,
    Closed,
}

/// This rank's handle on the group.
///
/// Every rank must issue the same collectives in the same order, each one is
/// numbered and the hub refuses frames whose number or kind disagree.
pub struct ProcessGroup<Z: Rendezvous> {
    config: GroupConfig,
    rendezvous: Z,
    state: State,
    seq: u64,
}

impl<Z: Rendezvous> ProcessGroup<Z> {
    /// Creates a new, uninitialized `ProcessGroup`.
    ///
    /// # Args
    /// * `config` - This rank's identity and timeouts.
    /// * `rendezvous` - Where ranks meet during `init`.
    pub fn new(config: GroupConfig, rendezvous: Z) -> Self {
        Self {
            config,
            rendezvous,
            state: State::Uninitialized,
            seq: 0,
        }
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.config.rank
    }

    #[inline]
    pub fn local_rank(&self) -> usize {
        self.config.local_rank
    }

    #[inline]
    pub fn world_size(&self) -> usize {
        self.config.world_size.get()
    }

    #[inline]
    pub fn is_designated(&self) -> bool {
        self.config.is_designated()
    }

    /// The sequence number the next collective will carry.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn state(&self) -> GroupState {
        match self.state {
            State::Uninitialized => GroupState::Uninitialized,
            State::Active(_) => GroupState::Active,
            State::Broken => GroupState::Broken,
            State::Closed => GroupState::Closed,
        }
    }

    /// Meets every other rank and establishes the group's links.
    ///
    /// # Errors
    /// * `GroupErr::AlreadyInitialized` if the group is active or broken.
    /// * `GroupErr::Bootstrap` if the rendezvous did not complete within the
    ///   configured timeout or the ranks disagree on the world size.
    pub async fn init(&mut self) -> Result<()> {
        if let State::Active(_) | State::Broken = self.state {
            return Err(GroupErr::AlreadyInitialized);
        }

        let Self {
            config, rendezvous, ..
        } = self;

        info!(
            rank = config.rank,
            local_rank = config.local_rank,
            world_size = config.world_size.get();
            "initializing process group over {}", rendezvous.describe()
        );

        let waited = config.timeout;
        let topology = match tokio::time::timeout(waited, bootstrap::establish(rendezvous, config)).await
        {
            Ok(Ok(topology)) => topology,
            Ok(Err(e)) => {
                warn!(rank = config.rank; "bootstrap failed: {e}");
                return Err(e.into());
            }
            Err(_) => {
                warn!(rank = config.rank; "bootstrap timed out after {waited:?}");
                return Err(BootstrapErr::Timeout { waited }.into());
            }
        };

        self.state = State::Active(topology);
        self.seq = 0;

        debug!(rank = self.config.rank; "process group established");
        Ok(())
    }

    /// Blocks until every rank reached the same barrier.
    pub async fn barrier(&mut self) -> Result<()> {
        self.collective(CollectiveOp::Barrier, &mut []).await
    }

    /// Reduces `values` element-wise across the group, every rank ends up
    /// holding the same result.
    ///
    /// Every rank must pass the same amount of values.
    pub async fn all_reduce(&mut self, values: &mut [f32], op: ReduceOp) -> Result<()> {
        self.collective(CollectiveOp::Reduce(op), values).await
    }

    /// Overwrites `values` on every rank with the values of rank `src`.
    ///
    /// An out of range `src` breaks the group like any other failed
    /// collective, so a rank that disagrees on it never leaves the others
    /// waiting.
    pub async fn broadcast(&mut self, values: &mut [f32], src: usize) -> Result<()> {
        self.ensure_active()?;

        if src >= self.world_size() {
            let err = GroupErr::Protocol {
                seq: self.seq,
                detail: format!(
                    "broadcast source {src} is out of range for world size {}",
                    self.world_size()
                ),
            };

            self.fail(&err).await;
            return Err(err);
        }

        self.collective(CollectiveOp::Broadcast { src }, values).await
    }

    /// Gives up on the group, telling every other rank why.
    ///
    /// The group is left broken, only `destroy` is allowed afterwards.
    pub async fn abort(&mut self, reason: &str) -> Result<()> {
        self.abort_with(AbortCause::Failure, reason).await
    }

    /// Same as `abort`, letting the other ranks know the kind of failure.
    pub async fn abort_with(&mut self, cause: AbortCause, reason: &str) -> Result<()> {
        match self.state {
            State::Active(_) => {}
            State::Broken => return Ok(()),
            State::Uninitialized | State::Closed => return Err(GroupErr::NotInitialized),
        }

        let err = GroupErr::Aborted {
            rank: self.config.rank,
            cause,
            reason: reason.to_string(),
        };

        self.fail(&err).await;
        Ok(())
    }

    /// Releases the group's links.
    ///
    /// An active group runs the disconnect handshake first, a broken one just
    /// drops its links. The group is closed afterwards even if the handshake
    /// failed.
    ///
    /// # Errors
    /// `GroupErr::NotInitialized` if the group was never initialized.
    pub async fn destroy(&mut self) -> Result<()> {
        let rank = self.config.rank;

        match mem::replace(&mut self.state, State::Closed) {
            State::Uninitialized => {
                self.state = State::Uninitialized;
                Err(GroupErr::NotInitialized)
            }
            State::Closed => Ok(()),
            State::Broken => {
                info!(rank = rank; "dropping links of broken process group");
                Ok(())
            }
            State::Active(mut topology) => {
                let waited = self.config.timeout;

                let res = match tokio::time::timeout(waited, topology.disconnect()).await {
                    Ok(res) => res,
                    Err(_) => Err(GroupErr::Io(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("disconnect handshake did not complete within {waited:?}"),
                    ))),
                };

                match &res {
                    Ok(()) => info!(rank = rank; "process group closed"),
                    Err(e) => warn!(rank = rank; "process group closed uncleanly: {e}"),
                }

                res
            }
        }
    }

    fn ensure_active(&self) -> Result<()> {
        match self.state {
            State::Active(_) => Ok(()),
            State::Broken => Err(GroupErr::Broken),
            State::Uninitialized | State::Closed => Err(GroupErr::NotInitialized),
        }
    }

    async fn collective(&mut self, op: CollectiveOp, values: &mut [f32]) -> Result<()> {
        let rank = self.config.rank;
        let world_size = self.config.world_size.get();
        let waited = self.config.timeout;
        let seq = self.seq;

        let topology = match &mut self.state {
            State::Active(topology) => topology,
            State::Broken => return Err(GroupErr::Broken),
            State::Uninitialized | State::Closed => return Err(GroupErr::NotInitialized),
        };

        let round = topology.round(rank, world_size, seq, op, values);
        let res = match tokio::time::timeout(waited, round).await {
            Ok(res) => res,
            Err(_) => Err(GroupErr::Timeout { seq, op, waited }),
        };

        match res {
            Ok(()) => {
                debug!(rank = rank, seq = seq; "{op} complete");
                self.seq += 1;
                Ok(())
            }
            Err(e) => {
                self.fail(&e).await;
                Err(e)
            }
        }
    }

    /// Moves an active group to `Broken`, making sure the other ranks hear
    /// about it.
    ///
    /// The rank that failed tells its links. The hub also relays aborts coming
    /// from a peer, since peers only hold a link to the hub.
    async fn fail(&mut self, err: &GroupErr) {
        let rank = self.config.rank;

        if !matches!(self.state, State::Active(_)) {
            return;
        }

        let State::Active(mut topology) = mem::replace(&mut self.state, State::Broken) else {
            return;
        };

        let (origin, cause, reason) = match err {
            GroupErr::Aborted {
                rank,
                cause,
                reason,
            } => (*rank, *cause, reason.clone()),
            other => (rank, AbortCause::Failure, other.to_string()),
        };

        warn!(rank = rank, seq = self.seq; "process group broken: {err}");

        if origin == rank || matches!(topology, Topology::Hub { .. }) {
            topology.notify_abort(origin, cause, &reason).await;
        }
    }
}
