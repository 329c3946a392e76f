//! Non-blocking datagram peers.
//!
//! A peer is an endpoint that sends and receives whole datagrams without ever
//! blocking the calling thread: when the kernel has nothing queued,
//! [`Dgram::receive`] returns `Ok(None)`; when the kernel refuses a send,
//! [`Dgram::send`] returns `Ok(0)` and the caller retries on a later cycle.
//! Hard socket errors are the only `Err` surface.
//!
//! Two transports are provided with identical semantics: [`udp::Peer`]
//! addressed by `(host, port)` and, on unix targets, [`uxd::Peer`] addressed
//! by a filesystem path.
#![forbid(missing_docs)]

use std::fmt::Debug;
use std::hash::Hash;
use std::io;

pub mod udp;
#[cfg(unix)]
pub mod uxd;

/// Errors surfaced by datagram peers.
///
/// Would-block conditions are deliberately absent: they are back-pressure,
/// not errors, and show up as `Ok(None)` receives and `Ok(0)` sends.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// The peer has not been opened, or has been closed.
    #[error("peer is not open")]
    Closed,
    /// Creating or binding the underlying socket failed.
    #[error("bind failed: {0}")]
    Bind(#[source] io::Error),
    /// A hard error while sending a datagram.
    #[error("send failed: {0}")]
    Send(#[source] io::Error),
    /// A hard error while receiving a datagram.
    #[error("receive failed: {0}")]
    Receive(#[source] io::Error),
}

/// A non-blocking datagram endpoint.
///
/// Implementations bind lazily in [`open`](Dgram::open) and may be cycled
/// with [`reopen`](Dgram::reopen). One `send` or `receive` moves at most one
/// whole datagram; datagrams are never split or merged.
pub trait Dgram {
    /// The address form of this transport.
    type Addr: Clone + PartialEq + Eq + Hash + Debug;

    /// Binds or creates the endpoint. Harmless when already open.
    fn open(&mut self) -> Result<(), PeerError>;

    /// Closes then opens, releasing any stale kernel state.
    fn reopen(&mut self) -> Result<(), PeerError> {
        self.close();
        self.open()
    }

    /// Releases the endpoint. Harmless when already closed.
    fn close(&mut self);

    /// True between a successful `open` and the next `close`.
    fn opened(&self) -> bool;

    /// Hands one datagram to the kernel, best effort.
    ///
    /// Returns the number of bytes accepted; `Ok(0)` means the kernel is
    /// applying back-pressure and the datagram should be retried later.
    fn send(&mut self, data: &[u8], dst: &Self::Addr) -> Result<usize, PeerError>;

    /// Takes one queued datagram from the kernel, if any.
    fn receive(&mut self) -> Result<Option<(Vec<u8>, Self::Addr)>, PeerError>;
}
