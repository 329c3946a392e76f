//! Non-blocking unix-domain datagram (UXD) peer.
//!
//! Semantics match [`udp::Peer`](crate::udp::Peer) with filesystem paths as
//! addresses. The socket file is created under a configurable umask and any
//! stale file left by a crashed process is unlinked on open.

use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::UnixDatagram;
use std::path::{Path, PathBuf};

use tracing::{error, info};

use crate::{Dgram, PeerError};

/// Largest datagram accepted on a UXD socket here.
pub const MAX_DATAGRAM_SIZE: usize = (1 << 16) - 1;

/// Default umask applied to the socket file: owner-only access.
pub const DEFAULT_UMASK: u32 = 0o077;

/// A non-blocking unix-domain datagram endpoint addressed by path.
pub struct Peer {
    path: PathBuf,
    umask: u32,
    bufsize: usize,
    sock: Option<UnixDatagram>,
}

impl Peer {
    /// Creates a peer to be bound at the given filesystem path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            umask: DEFAULT_UMASK,
            bufsize: MAX_DATAGRAM_SIZE,
            sock: None,
        }
    }

    /// Sets the umask masked out of the socket file mode at open.
    pub fn with_umask(mut self, umask: u32) -> Self {
        self.umask = umask;
        self
    }

    /// Sets the receive buffer size.
    pub fn with_bufsize(mut self, bufsize: usize) -> Self {
        self.bufsize = bufsize;
        self
    }

    /// The socket path; persists across reopens.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sock(&self) -> Result<&UnixDatagram, PeerError> {
        self.sock.as_ref().ok_or(PeerError::Closed)
    }

    fn unlink(&self) {
        let _ = fs::remove_file(&self.path);
    }
}

impl Dgram for Peer {
    type Addr = PathBuf;

    fn open(&mut self) -> Result<(), PeerError> {
        if self.sock.is_some() {
            return Ok(());
        }
        // A stale file from a prior run would fail the bind.
        if self.path.exists() {
            self.unlink();
        }
        let sock = match UnixDatagram::bind(&self.path) {
            Ok(sock) => sock,
            Err(err) => {
                error!(path = %self.path.display(), %err, "uxd bind failed");
                return Err(PeerError::Bind(err));
            }
        };
        let mode = 0o777 & !self.umask;
        fs::set_permissions(&self.path, fs::Permissions::from_mode(mode))
            .map_err(PeerError::Bind)?;
        sock.set_nonblocking(true).map_err(PeerError::Bind)?;
        info!(path = %self.path.display(), mode = format_args!("{mode:o}"), "uxd peer opened");
        self.sock = Some(sock);
        Ok(())
    }

    fn close(&mut self) {
        if self.sock.take().is_some() {
            self.unlink();
            info!(path = %self.path.display(), "uxd peer closed");
        }
    }

    fn opened(&self) -> bool {
        self.sock.is_some()
    }

    fn send(&mut self, data: &[u8], dst: &PathBuf) -> Result<usize, PeerError> {
        match self.sock()?.send_to(data, dst) {
            Ok(count) => Ok(count),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(err) => {
                error!(path = %self.path.display(), dst = %dst.display(), %err, "uxd send failed");
                Err(PeerError::Send(err))
            }
        }
    }

    fn receive(&mut self) -> Result<Option<(Vec<u8>, PathBuf)>, PeerError> {
        let mut buf = vec![0u8; self.bufsize];
        match self.sock()?.recv_from(&mut buf) {
            Ok((count, src)) => {
                buf.truncate(count);
                let src = src.as_pathname().map(Path::to_path_buf).unwrap_or_default();
                Ok(Some((buf, src)))
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(err) => {
                error!(path = %self.path.display(), %err, "uxd receive failed");
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
