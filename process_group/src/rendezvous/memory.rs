use std::io;

use tokio::{
    io::DuplexStream,
    sync::mpsc::{self, Receiver, Sender},
};

use super::{Link, Rendezvous};

/// Bytes buffered in each direction of an in-memory link.
const LINK_CAPACITY: usize = 64 * 1024;

enum Role {
    Hub(Receiver<DuplexStream>),
    Peer(Sender<DuplexStream>),
}

/// Rendezvous for ranks living in the same process, used to run whole groups
/// inside one test.
pub struct MemoryRendezvous {
    role: Role,
}

impl MemoryRendezvous {
    /// Creates the rendezvous of every rank of a group, index `i` belongs to rank `i`.
    ///
    /// # Arguments
    /// * `world_size` - The amount of ranks in the group.
    pub fn group(world_size: usize) -> Vec<Self> {
        let (tx, rx) = mpsc::channel(world_size.max(1));
        let mut all = Vec::with_capacity(world_size);
        all.push(Self { role: Role::Hub(rx) });

        for _ in 1..world_size {
            all.push(Self {
                role: Role::Peer(tx.clone()),
            });
        }

        all
    }
}

impl Rendezvous for MemoryRendezvous {
    async fn accept(&mut self) -> io::Result<Link> {
        let Role::Hub(streams) = &mut self.role else {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "only rank 0 accepts links",
            ));
        };

        let stream = streams
            .recv()
            .await
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "every peer is gone"))?;

        let (rx, tx) = tokio::io::split(stream);
        Ok(Link::new(rx, tx))
    }

    async fn connect(&mut self) -> io::Result<Link> {
        let Role::Peer(hub) = &self.role else {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "rank 0 does not connect to itself",
            ));
        };

        let (ours, theirs) = tokio::io::duplex(LINK_CAPACITY);
        hub.send(theirs)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::ConnectionRefused, "rank 0 is gone"))?;

        let (rx, tx) = tokio::io::split(ours);
        Ok(Link::new(rx, tx))
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
