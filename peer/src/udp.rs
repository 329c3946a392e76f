//! Non-blocking UDP datagram peer.

use std::io;
use std::net::{SocketAddr, UdpSocket};

use socket2::{Domain, Protocol, Socket, Type};
use tracing::{error, info};

use crate::{Dgram, PeerError};

/// Largest datagram UDP can carry.
pub const MAX_DATAGRAM_SIZE: usize = (1 << 16) - 1;

/// Largest payload safe against IPv4 fragmentation (576 MTU less headers).
pub const MAX_SAFE_PAYLOAD: usize = 548;

/// A non-blocking UDP endpoint addressed by `(host, port)`.
///
/// # Examples
///
/// ```
/// use boxwork_peer::Dgram;
/// use boxwork_peer::udp::Peer;
///
/// let mut alpha = Peer::new("127.0.0.1:0".parse().unwrap());
/// let mut beta = Peer::new("127.0.0.1:0".parse().unwrap());
/// alpha.reopen().unwrap();
/// beta.reopen().unwrap();
///
/// alpha.send(b"hello", &beta.addr()).unwrap();
/// loop {
///     if let Some((data, src)) = beta.receive().unwrap() {
///         assert_eq!(data, b"hello");
///         assert_eq!(src, alpha.addr());
///         break;
///     }
/// }
/// ```
pub struct Peer {
    ha: SocketAddr,
    bufsize: usize,
    bcast: bool,
    sock: Option<UdpSocket>,
}

impl Peer {
    /// Creates a peer to be bound at `ha`; port 0 requests an ephemeral port.
    pub fn new(ha: SocketAddr) -> Self {
        Self {
            ha,
            bufsize: MAX_DATAGRAM_SIZE,
            bcast: false,
            sock: None,
        }
    }

    /// Sets the kernel buffer size floor applied at open.
    pub fn with_bufsize(mut self, bufsize: usize) -> Self {
        self.bufsize = bufsize;
        self
    }

    /// Enables sending to broadcast addresses.
    pub fn with_bcast(mut self, bcast: bool) -> Self {
        self.bcast = bcast;
        self
    }

    /// The bound address; after open this is the kernel-resolved address.
    pub fn addr(&self) -> SocketAddr {
        self.ha
    }

    fn sock(&self) -> Result<&UdpSocket, PeerError> {
        self.sock.as_ref().ok_or(PeerError::Closed)
    }
}

impl Dgram for Peer {
    type Addr = SocketAddr;

    fn open(&mut self) -> Result<(), PeerError> {
        if self.sock.is_some() {
            return Ok(());
        }
        let domain = if self.ha.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
        let sock = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))
            .map_err(PeerError::Bind)?;
        sock.set_reuse_address(true).map_err(PeerError::Bind)?;
        if self.bcast {
            sock.set_broadcast(true).map_err(PeerError::Bind)?;
        }
        // Raise kernel buffers to bufsize, never shrink them.
        if sock.send_buffer_size().map_err(PeerError::Bind)? < self.bufsize {
            sock.set_send_buffer_size(self.bufsize)
                .map_err(PeerError::Bind)?;
        }
        if sock.recv_buffer_size().map_err(PeerError::Bind)? < self.bufsize {
            sock.set_recv_buffer_size(self.bufsize)
                .map_err(PeerError::Bind)?;
        }
        sock.set_nonblocking(true).map_err(PeerError::Bind)?;
        if let Err(err) = sock.bind(&self.ha.into()) {
            error!(ha = %self.ha, %err, "udp bind failed");
            return Err(PeerError::Bind(err));
        }
        let sock: UdpSocket = sock.into();
        if let Ok(ha) = sock.local_addr() {
            self.ha = ha;
        }
        info!(ha = %self.ha, "udp peer opened");
        self.sock = Some(sock);
        Ok(())
    }

    fn close(&mut self) {
        if self.sock.take().is_some() {
            info!(ha = %self.ha, "udp peer closed");
        }
    }

    fn opened(&self) -> bool {
        self.sock.is_some()
    }

    fn send(&mut self, data: &[u8], dst: &SocketAddr) -> Result<usize, PeerError> {
        match self.sock()?.send_to(data, dst) {
            Ok(count) => Ok(count),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(err) => {
                error!(ha = %self.ha, %dst, %err, "udp send failed");
                Err(PeerError::Send(err))
            }
        }
    }

    fn receive(&mut self) -> Result<Option<(Vec<u8>, SocketAddr)>, PeerError> {
        let mut buf = vec![0u8; self.bufsize];
        match self.sock()?.recv_from(&mut buf) {
            Ok((count, src)) => {
                buf.truncate(count);
                Ok(Some((buf, src)))
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(err) => {
                error!(ha = %self.ha, %err, "udp receive failed");
                Err(PeerError::Receive(err))
            }
        }
    }
}

impl Drop for Peer {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local() -> Peer {
        Peer::new("127.0.0.1:0".parse().unwrap())
    }

    #[test]
    fn roundtrip() {
        let mut alpha = local();
        let mut beta = local();
        alpha.reopen().unwrap();
        beta.reopen().unwrap();
        assert!(alpha.opened());
        assert_ne!(alpha.addr().port(), 0);

        assert_eq!(alpha.send(b"alpha to beta", &beta.addr()).unwrap(), 13);
        let (data, src) = loop {
            if let Some(got) = beta.receive().unwrap() {
                break got;
            }
        };
        assert_eq!(data, b"alpha to beta");
        assert_eq!(src, alpha.addr());

        // Nothing further queued.
        assert!(beta.receive().unwrap().is_none());

        alpha.close();
        assert!(!alpha.opened());
        assert!(matches!(
            alpha.send(b"late", &beta.addr()),
            Err(PeerError::Closed)
        ));
    }

    #[test]
    fn reopen_is_idempotent() {
        let mut peer = local();
        peer.reopen().unwrap();
        let first = peer.addr();
        peer.open().unwrap();
        assert_eq!(peer.addr(), first);
        peer.reopen().unwrap();
        assert!(peer.opened());
    }
}
