//! FrameLink trait - datagram link abstraction
//!
//! The I/O loop is written against this trait; UDP is the production link
//! and `MemoryLink` pairs connect a client and a renderer inside one process.
//! `recv` must be cancel-safe: the I/O loop races it against timers.

use std::net::SocketAddr;
use std::sync::Mutex;

use async_channel::{Receiver, Sender, TrySendError};
use tokio::net::{lookup_host, UdpSocket};
use tracing::debug;

use crate::TransportError;

/// Largest datagram accepted from the socket
const RECV_BUFFER: usize = 65_536;

/// Datagram link
#[trait_variant::make(FrameLink: Send)]
pub trait LocalFrameLink {
    /// Link name for logs
    fn name(&self) -> &str;

    /// Send one datagram (best effort)
    async fn send(&self, datagram: &[u8]) -> Result<(), TransportError>;

    /// Receive one datagram
    async fn recv(&self) -> Result<Vec<u8>, TransportError>;
}

/// UDP link
///
/// In client mode the socket is connected to the server. In listen mode the
/// link replies to whichever peer sent the most recent datagram.
#[derive(Debug)]
pub struct UdpLink {
    socket: UdpSocket,
    connected: bool,
    peer: Mutex<Option<SocketAddr>>,
    name: String,
}

impl UdpLink {
    /// Bind `bind` and connect to `server` (`host:port`)
    pub async fn connect(bind: &str, server: &str) -> Result<Self, TransportError> {
        let target = lookup_host(server)
            .await
            .map_err(|e| TransportError::address(server, e.to_string()))?
            .next()
            .ok_or_else(|| TransportError::address(server, "no address resolved"))?;

        let socket = UdpSocket::bind(bind).await?;
        socket.connect(target).await?;
        debug!(local = ?socket.local_addr().ok(), server = %target, "udp link connected");

        Ok(Self {
            socket,
            connected: true,
            peer: Mutex::new(Some(target)),
            name: format!("udp:{target}"),
        })
    }

    /// Bind `bind` and serve whichever peer talks first
    pub async fn listen(bind: &str) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(bind).await?;
        let local = socket.local_addr()?;
        debug!(local = %local, "udp link listening");
        Ok(Self {
            socket,
            connected: false,
            peer: Mutex::new(None),
            name: format!("udp-listen:{local}"),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.socket.local_addr()?)
    }

    fn peer(&self) -> Option<SocketAddr> {
        self.peer.lock().ok().and_then(|p| *p)
    }
}

impl FrameLink for UdpLink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, datagram: &[u8]) -> Result<(), TransportError> {
        if self.connected {
            self.socket.send(datagram).await?;
        } else {
            let peer = self.peer().ok_or(TransportError::NoPeer)?;
            self.socket.send_to(datagram, peer).await?;
        }
        Ok(())
    }

    async fn recv(&self) -> Result<Vec<u8>, TransportError> {
        let mut buf = vec![0u8; RECV_BUFFER];
        if self.connected {
            let len = self.socket.recv(&mut buf).await?;
            buf.truncate(len);
        } else {
            let (len, from) = self.socket.recv_from(&mut buf).await?;
            buf.truncate(len);
            if let Ok(mut peer) = self.peer.lock() {
                if *peer != Some(from) {
                    debug!(peer = %from, "udp peer changed");
                    *peer = Some(from);
                }
            }
        }
        Ok(buf)
    }
}

/// In-process datagram link
///
/// Bounded like a socket buffer: datagrams sent while the peer's queue is
/// full are lost. Dropping or closing one end closes the other.
#[derive(Debug)]
pub struct MemoryLink {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
    name: &'static str,
}

impl MemoryLink {
    /// Connected pair `(client, server)`
    pub fn pair(capacity: usize) -> (Self, Self) {
        let (a_tx, a_rx) = async_channel::bounded(capacity);
        let (b_tx, b_rx) = async_channel::bounded(capacity);
        (
            Self {
                tx: a_tx,
                rx: b_rx,
                name: "memory:client",
            },
            Self {
                tx: b_tx,
                rx: a_rx,
                name: "memory:server",
            },
        )
    }

    /// Sever the link in both directions
    pub fn close(&self) {
        self.tx.close();
        self.rx.close();
    }
}

impl Drop for MemoryLink {
    fn drop(&mut self) {
        self.close();
    }
}

impl FrameLink for MemoryLink {
    fn name(&self) -> &str {
        self.name
    }

    async fn send(&self, datagram: &[u8]) -> Result<(), TransportError> {
        match self.tx.try_send(datagram.to_vec()) {
            Ok(()) | Err(TrySendError::Full(_)) => Ok(()),
            Err(TrySendError::Closed(_)) => Err(TransportError::Closed),
        }
    }

    async fn recv(&self) -> Result<Vec<u8>, TransportError> {
        self.rx.recv().await.map_err(|_| TransportError::Closed)
    }
}
