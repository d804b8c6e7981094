use std::{io, time::Duration};

use log::debug;
use tokio::{
    net::{TcpListener, TcpStream},
    time,
};

use super::{Link, Rendezvous};

/// Pause between attempts while rank 0 is not listening yet.
const RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Rendezvous over TCP at rank 0's `host:port`.
///
/// `connect` keeps retrying refused connections, the caller bounds it with
/// the bootstrap timeout.
pub struct TcpRendezvous {
    addr: String,
    listener: Option<TcpListener>,
}

impl TcpRendezvous {
    /// Creates a new `TcpRendezvous`, the hub binds `addr` lazily on its first `accept`.
    ///
    /// # Arguments
    /// * `addr` - The `host:port` of rank 0.
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            listener: None,
        }
    }

    /// Creates a hub side `TcpRendezvous` over an already bound listener.
    ///
    /// # Arguments
    /// * `listener` - The listener peers will connect to.
    pub fn from_listener(listener: TcpListener) -> io::Result<Self> {
        Ok(Self {
            addr: listener.local_addr()?.to_string(),
            listener: Some(listener),
        })
    }

    fn into_link(stream: TcpStream) -> io::Result<Link> {
        stream.set_nodelay(true)?;
        let (rx, tx) = stream.into_split();
        Ok(Link::new(rx, tx))
    }
}

impl Rendezvous for TcpRendezvous {
    async fn accept(&mut self) -> io::Result<Link> {
        let listener = match self.listener.take() {
            Some(listener) => listener,
            None => TcpListener::bind(&self.addr).await?,
        };

        let listener = self.listener.insert(listener);

        let (stream, addr) = listener.accept().await?;
        debug!("peer connected from {addr}");
        Self::into_link(stream)
    }

    async fn connect(&mut self) -> io::Result<Link> {
        loop {
            match TcpStream::connect(&self.addr).await {
                Ok(stream) => return Self::into_link(stream),
                Err(e) if is_transient(&e) => {
                    debug!("rank 0 not reachable at {} yet: {e}", self.addr);
                    time::sleep(RETRY_INTERVAL).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn describe(&self) -> String {
        format!("tcp://{}", self.addr)
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::TimedOut
            | io::ErrorKind::AddrNotAvailable
    )
}
