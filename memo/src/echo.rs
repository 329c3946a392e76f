//! In-memory loopback peer.
//!
//! Every datagram handed to [`Echo::send`] is queued and handed back by
//! [`Echo::receive`] with the original destination reported as the source,
//! exactly as if the far side had answered from that address. Tests use
//! [`Echo::inject`] to present hand-crafted grams as inbound traffic.

use std::collections::VecDeque;

use boxwork_peer::{Dgram, PeerError};

/// A loopback datagram endpoint addressed by plain strings.
#[derive(Default)]
pub struct Echo {
    opened: bool,
    queue: VecDeque<(Vec<u8>, String)>,
}

impl Echo {
    /// Creates a closed loopback peer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a datagram as if it had arrived from `src`.
    pub fn inject(&mut self, data: Vec<u8>, src: impl Into<String>) {
        self.queue.push_back((data, src.into()));
    }

    /// Number of datagrams waiting to be received.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}

impl Dgram for Echo {
    type Addr = String;

    fn open(&mut self) -> Result<(), PeerError> {
        self.opened = true;
        Ok(())
    }

    fn close(&mut self) {
        self.opened = false;
        self.queue.clear();
    }

    fn opened(&self) -> bool {
        self.opened
    }

    fn send(&mut self, data: &[u8], dst: &String) -> Result<usize, PeerError> {
        if !self.opened {
            return Err(PeerError::Closed);
        }
        self.queue.push_back((data.to_vec(), dst.clone()));
        Ok(data.len())
    }

    fn receive(&mut self) -> Result<Option<(Vec<u8>, String)>, PeerError> {
        if !self.opened {
            return Err(PeerError::Closed);
        }
        Ok(self.queue.pop_front())
    }
}
