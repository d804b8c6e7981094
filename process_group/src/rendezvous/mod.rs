mod memory;
mod tcp;

use std::io;

use comms::{FrameReceiver, FrameSender};
use tokio::io::{AsyncRead, AsyncWrite};

pub use memory::MemoryRendezvous;
pub use tcp::TcpRendezvous;

type BoxRead = Box<dyn AsyncRead + Unpin + Send>;
type BoxWrite = Box<dyn AsyncWrite + Unpin + Send>;

/// The starting size of a link's receive buffer, in words.
const STARTING_RX_BUF_SIZE: usize = 256;

/// A bidirectional, framed channel between a peer and the hub.
pub struct Link {
    pub(crate) rx: FrameReceiver<BoxRead>,
    pub(crate) tx: FrameSender<BoxWrite>,
    pub(crate) rx_buf: Vec<u32>,
}

impl Link {
    /// Creates a new `Link` over both halves of some stream.
    ///
    /// # Arguments
    /// * `rx` - The reading half.
    /// * `tx` - The writing half.
    pub fn new<R, W>(rx: R, tx: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (rx, tx) = comms::channel(Box::new(rx) as BoxRead, Box::new(tx) as BoxWrite);

        Self {
            rx,
            tx,
            rx_buf: vec![0; STARTING_RX_BUF_SIZE],
        }
    }
}

/// The meeting point where ranks find each other during bootstrap.
///
/// Rank 0 calls `accept` once per peer, every other rank calls `connect` once.
#[allow(unused)]
#[trait_variant::make(Rendezvous: Send)]
pub trait LocalRendezvous {
    /// Waits for the next peer to open a link to the hub.
    async fn accept(&mut self) -> io::Result<Link>;

    /// Opens this rank's link to the hub.
    async fn connect(&mut self) -> io::Result<Link>;

    /// A human readable description of the transport, for logs.
    fn describe(&self) -> String;
}
