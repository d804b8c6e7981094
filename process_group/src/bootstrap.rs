use comms::{
    msg::{Command, Msg},
    specs::group::JoinSpec,
};
use log::{debug, warn};

use crate::{
    GroupConfig,
    collective::Topology,
    error::BootstrapErr,
    rendezvous::{Link, Rendezvous},
};

/// Runs the rendezvous handshake for this rank and returns its links.
///
/// The caller is responsible for bounding this with the bootstrap timeout.
pub(crate) async fn establish<Z>(
    rendezvous: &mut Z,
    config: &GroupConfig,
) -> Result<Topology, BootstrapErr>
where
    Z: Rendezvous,
{
    let world_size = config.world_size.get();

    if world_size == 1 {
        return Ok(Topology::Solo);
    }

    if config.rank == 0 {
        let peers = accept_peers(rendezvous, world_size).await?;
        Ok(Topology::Hub { peers })
    } else {
        let hub = join_hub(rendezvous, config).await?;
        Ok(Topology::Peer { hub })
    }
}

/// Accepts every other rank, orders their links by rank and welcomes them
/// once the group is complete.
async fn accept_peers<Z>(rendezvous: &mut Z, world_size: usize) -> Result<Vec<Link>, BootstrapErr>
where
    Z: Rendezvous,
{
    let mut slots: Vec<Option<Link>> = (1..world_size).map(|_| None).collect();
    let mut joined = 0;

    while joined < world_size - 1 {
        let mut link = rendezvous.accept().await?;

        let spec = match link.rx.recv_into(&mut link.rx_buf).await? {
            Msg::Control(Command::Join(spec)) => validate(spec, world_size, &slots),
            msg => Err(BootstrapErr::UnexpectedMessage { got: msg.kind() }),
        };

        let spec = match spec {
            Ok(spec) => spec,
            Err(e) => {
                warn!("rejecting join: {e}");
                let reason = e.to_string();
                reject(&mut link, &reason).await;

                for joined in slots.iter_mut().flatten() {
                    reject(joined, &reason).await;
                }

                return Err(e);
            }
        };

        debug!(rank = spec.rank, local_rank = spec.local_rank; "rank joined");
        slots[spec.rank - 1] = Some(link);
        joined += 1;
    }

    let mut peers: Vec<Link> = slots.into_iter().flatten().collect();
    let msg = Msg::Control(Command::Welcome { world_size });

    for link in &mut peers {
        link.tx.send(&msg).await?;
    }

    Ok(peers)
}

fn validate(
    spec: JoinSpec,
    world_size: usize,
    slots: &[Option<Link>],
) -> Result<JoinSpec, BootstrapErr> {
    let JoinSpec {
        rank,
        world_size: got,
        ..
    } = spec;

    if got != world_size {
        return Err(BootstrapErr::WorldSizeMismatch {
            rank,
            expected: world_size,
            got,
        });
    }

    if rank == 0 || rank >= world_size {
        return Err(BootstrapErr::InvalidRank { rank, world_size });
    }

    if slots[rank - 1].is_some() {
        return Err(BootstrapErr::DuplicateRank { rank });
    }

    Ok(spec)
}

async fn reject(link: &mut Link, reason: &str) {
    let msg = Msg::Control(Command::Reject {
        reason: reason.to_string(),
    });

    if let Err(e) = link.tx.send(&msg).await {
        debug!("failed to deliver rejection: {e}");
    }
}

/// Announces this rank to the hub and waits to be welcomed.
async fn join_hub<Z>(rendezvous: &mut Z, config: &GroupConfig) -> Result<Link, BootstrapErr>
where
    Z: Rendezvous,
{
    let world_size = config.world_size.get();
    let mut link = rendezvous.connect().await?;

    let spec = JoinSpec {
        rank: config.rank,
        local_rank: config.local_rank,
        world_size,
    };

    link.tx.send(&Msg::Control(Command::Join(spec))).await?;

    let res = match link.rx.recv_into(&mut link.rx_buf).await? {
        Msg::Control(Command::Welcome { world_size: got }) if got == world_size => Ok(()),
        Msg::Control(Command::Welcome { world_size: got }) => Err(BootstrapErr::WorldSizeMismatch {
            rank: 0,
            expected: world_size,
            got,
        }),
        Msg::Control(Command::Reject { reason }) => Err(BootstrapErr::Rejected { reason }),
        msg => Err(BootstrapErr::UnexpectedMessage { got: msg.kind() }),
    };

    res.map(|()| link)
}
