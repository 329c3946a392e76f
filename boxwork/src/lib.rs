//! Boxwork is a cooperative tyme-driven runtime: hierarchical box machines
//! sequenced by a single-threaded scheduler, with a reliable memo transport
//! over datagram peers.
//!
//! The code is organized in crates and modules that are meant to depend as
//! little as possible on each other.
//!
//! **Tyme**: the [`boxwork_tyme`] crate defines the virtual clock every other
//! component reads: a [`tyme::Tymist`] owns the clock, and winding hands out
//! live readers.
//!
//! **Scheduling**: the [`doing`] module defines cooperative tasks
//! ([`doing::Doer`]) and the root scheduler ([`doing::Doist`]) that drives
//! them in insertion order at a fixed tock, in real or virtual tyme.
//! A [`doing::DoDoer`] nests a whole sub-schedule as a single doer.
//!
//! **Box machines**: the [`hier`] module defines typed state cells
//! ([`hier::Mine`], [`hier::Dock`]), compiled guards ([`hier::Need`]), the
//! box containment tree, and the [`hier::Boxer`] runner with its lexical
//! [`hier::Maker`] builder.
//!
//! **Memo transport**: the [`boxwork_memo`] crate fragments application
//! memos into wire grams and reassembles them over the non-blocking peers of
//! [`boxwork_peer`]; the [`memoing`] module wraps a memoer as a doer.
//!
//! **Multiprocess**: the [`multidoing`] module coordinates a boss process
//! and crew-hand subprocesses over a unix-domain control channel, sharing
//! nothing but memos.
//!
//! # Examples
//!
//! A boxer that counts scheduler cycles and transits once a guard fires:
//!
//! ```
//! use boxwork::doing::Doist;
//! use boxwork::hier::{Maker, Over, Val};
//!
//! let mut maker = Maker::new("demo").unwrap();
//! maker.make(|work| {
//!     work.be(Some("top"), Over::Top)?;
//!     work.be(Some("busy"), Over::Name("top"))?;
//!     work.poke("cycle", Val::Int(3))?;
//!     work.tract("rest", "M.cycle.value >= 3")?;
//!     work.be(Some("rest"), Over::Same)?;
//!     work.end()?;
//!     Ok(())
//! }).unwrap();
//! let boxer = maker.finish().unwrap();
//!
//! let mut doist = Doist::new(0.0625);
//! doist.run(vec![Box::new(boxer.into_doer())]).unwrap();
//! ```
#![forbid(missing_docs)]

pub mod doing;
pub mod hier;
pub mod memoing;
#[cfg(unix)]
pub mod multidoing;

/// Re-export of the `boxwork_tyme` crate.
pub mod tyme {
    pub use boxwork_tyme::*;
}

/// Re-export of the `boxwork_peer` crate.
pub mod peer {
    pub use boxwork_peer::*;
}

/// Re-export of the `boxwork_memo` crate.
pub mod memo {
    pub use boxwork_memo::*;
}

/// Errors surfaced by the runtime, by kind.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid name, duplicate registration, malformed expression.
    #[error("validation: {0}")]
    Validation(String),
    /// Unresolved destination, under-before-over reference, name collision.
    #[error("hierarchy: {0}")]
    Hierarchy(String),
    /// Hard socket failure underneath a peer.
    #[error(transparent)]
    Transport(#[from] boxwork_peer::PeerError),
    /// Malformed gram, oversize memo, count overflow.
    #[error(transparent)]
    Protocol(#[from] boxwork_memo::MemoError),
    /// Limit reached, doer aborted, sub-doist aborted.
    #[error("scheduler: {0}")]
    Scheduler(String),
    /// Filesystem failure underneath a dock or a crew spawn.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The runtime's result alias.
pub type Result<T> = std::result::Result<T, Error>;
