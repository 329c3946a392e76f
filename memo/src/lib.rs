//! Memo transport: reliable delivery of variable-size payloads over
//! unreliable datagram peers.
//!
//! A *memo* is an application payload delivered atomically; a *gram* is one
//! wire fragment of a memo, sized to the transport MTU. The [`Memoer`]
//! service machine fragments outgoing memos into grams, frames each gram
//! with a fixed-width header carrying a shared memo identifier and fragment
//! index, and reassembles inbound grams back into memos, at most once each.
//!
//! # Examples
//!
//! ```
//! use boxwork_memo::{Memoer, echo::Echo};
//!
//! let mut peer = Memoer::new(Echo::default());
//! peer.reopen().unwrap();
//!
//! peer.memoit(b"Hello There".to_vec(), "beta".to_string(), None).unwrap();
//! peer.service().unwrap();
//! peer.service().unwrap();
//!
//! let (memo, src, vid) = peer.take_memo().unwrap();
//! assert_eq!(memo, b"Hello There");
//! assert_eq!(src, "beta");
//! assert_eq!(vid, None);
//! ```
#![forbid(missing_docs)]

use boxwork_peer::PeerError;

pub mod echo;
pub mod gram;
mod memoer;

pub use gram::{Gram, GramDex, Sizage, MAX_GRAM_COUNT, MAX_GRAM_SIZE, MAX_MEMO_SIZE};
pub use memoer::{Handler, Memoer, Reassembly, Signer, TymeeMemoer, Verifier};

/// Errors surfaced by the memo transport.
#[derive(Debug, thiserror::Error)]
pub enum MemoError {
    /// A memo payload exceeded [`MAX_MEMO_SIZE`].
    #[error("memo of {got} bytes exceeds maximum {max}")]
    OversizeMemo {
        /// Offered payload size.
        got: usize,
        /// Permitted maximum.
        max: usize,
    },
    /// A memo would fragment into more than [`MAX_GRAM_COUNT`] grams.
    #[error("gram count {got} exceeds maximum {max}")]
    CountOverflow {
        /// Required gram count.
        got: usize,
        /// Permitted maximum.
        max: usize,
    },
    /// An inbound gram failed header parsing.
    #[error("malformed gram: {0}")]
    Malformed(&'static str),
    /// A signed memo was offered without a verifier identifier.
    #[error("signed code requires a verifier id")]
    MissingVid,
    /// The underlying peer failed hard.
    #[error(transparent)]
    Peer(#[from] PeerError),
}
