use std::time::Duration;

use comms::{
    msg::{Command, Frame, Msg},
    specs::{collective::CollectiveOp, group::AbortCause},
};
use futures::future;
use log::{debug, warn};

use crate::{
    error::{GroupErr, Result},
    rendezvous::Link,
};

/// How long a failing rank waits for its abort notice to be written.
const ABORT_GRACE: Duration = Duration::from_secs(1);

/// The links a rank holds once the group is established.
pub(crate) enum Topology {
    /// A group of one, every collective is local.
    Solo,
    /// Rank 0, `peers[i]` is the link to rank `i + 1`.
    Hub { peers: Vec<Link> },
    Peer { hub: Link },
}

impl Topology {
    /// Runs one collective round, leaving the group-consistent result in `values`.
    pub(crate) async fn round(
        &mut self,
        rank: usize,
        world_size: usize,
        seq: u64,
        op: CollectiveOp,
        values: &mut [f32],
    ) -> Result<()> {
        match self {
            Topology::Solo => {
                if let CollectiveOp::Reduce(reduce) = op {
                    reduce.finish(values, 1);
                }

                Ok(())
            }
            Topology::Hub { peers } => hub_round(peers, world_size, seq, op, values).await,
            Topology::Peer { hub } => peer_round(hub, rank, seq, op, values).await,
        }
    }

    /// Tells the rest of the group that `origin` gave up, best effort.
    pub(crate) async fn notify_abort(&mut self, origin: usize, cause: AbortCause, reason: &str) {
        let msg = Msg::Control(Command::Abort {
            rank: origin,
            cause,
            reason: reason.to_string(),
        });

        let links: Vec<&mut Link> = match self {
            Topology::Solo => return,
            Topology::Hub { peers } => peers.iter_mut().collect(),
            Topology::Peer { hub } => vec![hub],
        };

        let sends = links.into_iter().map(|link| {
            let msg = &msg;
            async move { tokio::time::timeout(ABORT_GRACE, link.tx.send(msg)).await }
        });

        for res in future::join_all(sends).await {
            match res {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!("abort notice not delivered: {e}"),
                Err(_) => debug!("abort notice timed out"),
            }
        }
    }

    /// Orderly shutdown: peers announce they are leaving and the hub answers
    /// once every peer did.
    pub(crate) async fn disconnect(&mut self) -> Result<()> {
        match self {
            Topology::Solo => Ok(()),
            Topology::Hub { peers } => {
                let waits = peers.iter_mut().enumerate().map(|(i, link)| async move {
                    wait_disconnect(link, i + 1).await?;
                    link.tx
                        .send(&Msg::Control(Command::Disconnect))
                        .await
                        .map_err(|source| GroupErr::LinkLost { rank: i + 1, source })?;
                    link.tx.shutdown().await?;
                    Ok::<_, GroupErr>(())
                });

                future::try_join_all(waits).await?;
                Ok(())
            }
            Topology::Peer { hub } => {
                hub.tx
                    .send(&Msg::Control(Command::Disconnect))
                    .await
                    .map_err(|source| GroupErr::LinkLost { rank: 0, source })?;

                wait_disconnect(hub, 0).await?;
                hub.tx.shutdown().await?;
                Ok(())
            }
        }
    }
}

/// Drains `link` until its `Disconnect`, surfacing an abort if one arrives first.
async fn wait_disconnect(link: &mut Link, rank: usize) -> Result<()> {
    loop {
        let msg = link
            .rx
            .recv_into(&mut link.rx_buf)
            .await
            .map_err(|source| GroupErr::LinkLost { rank, source })?;

        match msg {
            Msg::Control(Command::Disconnect) => return Ok(()),
            Msg::Control(Command::Abort { rank, cause, reason }) => {
                return Err(GroupErr::Aborted { rank, cause, reason });
            }
            other => warn!(rank = rank; "ignoring {} while disconnecting", other.kind()),
        }
    }
}

/// Gathers every peer's contribution, combines them with the hub's own and
/// answers every peer with the result.
async fn hub_round(
    peers: &mut [Link],
    world_size: usize,
    seq: u64,
    op: CollectiveOp,
    values: &mut [f32],
) -> Result<()> {
    let gathers = peers.iter_mut().enumerate().map(|(i, link)| async move {
        let rank = i + 1;
        let msg = link
            .rx
            .recv_into(&mut link.rx_buf)
            .await
            .map_err(|source| GroupErr::LinkLost { rank, source })?;

        match msg {
            Msg::Data(frame) if frame.seq == seq && frame.op == op => Ok(frame.values.to_vec()),
            Msg::Data(frame) => Err(GroupErr::Protocol {
                seq,
                detail: format!(
                    "rank {rank} issued {} #{} while rank 0 issued {op} #{seq}",
                    frame.op, frame.seq
                ),
            }),
            Msg::Control(Command::Abort {
                rank,
                cause,
                reason,
            }) => Err(GroupErr::Aborted {
                rank,
                cause,
                reason,
            }),
            other => Err(GroupErr::Protocol {
                seq,
                detail: format!("rank {rank} sent {} during {op}", other.kind()),
            }),
        }
    });

    let mut contributions = future::try_join_all(gathers).await?;

    let result = match op {
        CollectiveOp::Barrier => Vec::new(),
        CollectiveOp::Reduce(reduce) => {
            let mut acc = values.to_vec();

            for (i, contribution) in contributions.iter().enumerate() {
                check_len(seq, i + 1, contribution.len(), acc.len())?;
                reduce.combine(&mut acc, contribution);
            }

            reduce.finish(&mut acc, world_size);
            acc
        }
        CollectiveOp::Broadcast { src: 0 } => values.to_vec(),
        CollectiveOp::Broadcast { src } => {
            let payload = contributions.swap_remove(src - 1);
            check_len(seq, src, payload.len(), values.len())?;
            payload
        }
    };

    let msg = Msg::Data(Frame {
        seq,
        op,
        values: &result,
    });

    let answers = peers.iter_mut().enumerate().map(|(i, link)| {
        let msg = &msg;
        async move {
            link.tx
                .send(msg)
                .await
                .map_err(|source| GroupErr::LinkLost { rank: i + 1, source })
        }
    });

    future::try_join_all(answers).await?;

    if !result.is_empty() {
        values.copy_from_slice(&result);
    }

    Ok(())
}

/// Sends this rank's contribution to the hub and waits for the result.
async fn peer_round(
    hub: &mut Link,
    rank: usize,
    seq: u64,
    op: CollectiveOp,
    values: &mut [f32],
) -> Result<()> {
    let up: &[f32] = match op {
        CollectiveOp::Barrier => &[],
        CollectiveOp::Broadcast { src } if src != rank => &[],
        _ => &*values,
    };

    let sent = hub
        .tx
        .send(&Msg::Data(Frame {
            seq,
            op,
            values: up,
        }))
        .await;

    if let Err(source) = sent {
        let err = pending_abort(hub)
            .await
            .unwrap_or(GroupErr::LinkLost { rank: 0, source });

        return Err(err);
    }

    let msg = hub
        .rx
        .recv_into(&mut hub.rx_buf)
        .await
        .map_err(|source| GroupErr::LinkLost { rank: 0, source })?;

    match msg {
        Msg::Data(frame) if frame.seq == seq && frame.op == op => {
            check_len(seq, 0, frame.values.len(), values.len())?;
            values.copy_from_slice(frame.values);
            Ok(())
        }
        Msg::Data(frame) => Err(GroupErr::Protocol {
            seq,
            detail: format!("rank 0 answered {} #{} to {op} #{seq}", frame.op, frame.seq),
        }),
        Msg::Control(Command::Abort {
            rank,
            cause,
            reason,
        }) => Err(GroupErr::Aborted {
            rank,
            cause,
            reason,
        }),
        other => Err(GroupErr::Protocol {
            seq,
            detail: format!("rank 0 sent {} during {op}", other.kind()),
        }),
    }
}

/// The hub closes its links right after aborting, so a failed send may still
/// have an abort notice waiting to be read.
async fn pending_abort(link: &mut Link) -> Option<GroupErr> {
    match link.rx.recv_into(&mut link.rx_buf).await {
        Ok(Msg::Control(Command::Abort {
            rank,
            cause,
            reason,
        })) => Some(GroupErr::Aborted {
            rank,
            cause,
            reason,
        }),
        _ => None,
    }
}

fn check_len(seq: u64, rank: usize, got: usize, expected: usize) -> Result<()> {
    if got != expected {
        return Err(GroupErr::Protocol {
            seq,
            detail: format!("rank {rank} sent {got} values, expected {expected}"),
        });
    }

    Ok(())
}
