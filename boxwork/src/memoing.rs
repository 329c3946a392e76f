//! Memoers scheduled as doers.
//!
//! A memoer doer owns its memoer for the memoer's whole lifecycle: the peer
//! opens on enter, one [`service`](boxwork_memo::Memoer::service) runs per
//! scheduler cycle, and the peer closes on exit or cancel. These doers never
//! report done on their own; a doist limit or close ends them.

use boxwork_memo::{Memoer, TymeeMemoer};
use boxwork_peer::Dgram;
use boxwork_tyme::{Tymee, Tymth};

use crate::doing::Doer;
use crate::Result;

/// A doer servicing a [`Memoer`] once per cycle.
pub struct MemoerDoer<P: Dgram> {
    memoer: Memoer<P>,
    tock: f64,
}

impl<P: Dgram> MemoerDoer<P> {
    /// Wraps a memoer; the peer stays closed until the doer enters.
    pub fn new(memoer: Memoer<P>) -> Self {
        Self { memoer, tock: 0.0 }
    }

    /// Sets the doer's tock within its doist.
    pub fn with_tock(mut self, tock: f64) -> Self {
        self.tock = tock.max(0.0);
        self
    }

    /// The wrapped memoer.
    pub fn memoer(&self) -> &Memoer<P> {
        &self.memoer
    }

    /// The wrapped memoer, mutably (to queue memos or inspect queues).
    pub fn memoer_mut(&mut self) -> &mut Memoer<P> {
        &mut self.memoer
    }

    /// Releases the wrapped memoer.
    pub fn into_inner(self) -> Memoer<P> {
        self.memoer
    }
}

impl<P: Dgram> Doer for MemoerDoer<P> {
    fn tock(&self) -> f64 {
        self.tock
    }

    fn enter(&mut self) -> Result<()> {
        self.memoer.reopen()?;
        Ok(())
    }

    fn recur(&mut self, _tyme: f64) -> Result<bool> {
        self.memoer.service()?;
        Ok(false)
    }

    fn exit(&mut self) {
        self.memoer.close();
    }

    fn close(&mut self) {
        self.memoer.close();
    }

    fn abort(&mut self, _err: &crate::Error) {
        self.memoer.close();
    }
}

/// A doer servicing a [`TymeeMemoer`], wound onto its doist's clock so
/// stale partial reassemblies age out.
pub struct TymeeMemoerDoer<P: Dgram> {
    memoer: TymeeMemoer<P>,
    tock: f64,
}

impl<P: Dgram> TymeeMemoerDoer<P> {
    /// Wraps a tymee memoer; the peer stays closed until the doer enters.
    pub fn new(memoer: TymeeMemoer<P>) -> Self {
        Self { memoer, tock: 0.0 }
    }

    /// Sets the doer's tock within its doist.
    pub fn with_tock(mut self, tock: f64) -> Self {
        self.tock = tock.max(0.0);
        self
    }

    /// The wrapped memoer.
    pub fn memoer(&self) -> &TymeeMemoer<P> {
        &self.memoer
    }

    /// The wrapped memoer, mutably.
    pub fn memoer_mut(&mut self) -> &mut TymeeMemoer<P> {
        &mut self.memoer
    }

    /// Releases the wrapped memoer.
    pub fn into_inner(self) -> TymeeMemoer<P> {
        self.memoer
    }
}

impl<P: Dgram> Doer for TymeeMemoerDoer<P> {
    fn wind(&mut self, tymth: Tymth) {
        self.memoer.wind(tymth);
    }

    fn tock(&self) -> f64 {
        self.tock
    }

    fn enter(&mut self) -> Result<()> {
        self.memoer.reopen()?;
        Ok(())
    }

    fn recur(&mut self, _tyme: f64) -> Result<bool> {
        self.memoer.service()?;
        Ok(false)
    }

    fn exit(&mut self) {
        self.memoer.close();
    }

    fn close(&mut self) {
        self.memoer.close();
    }

    fn abort(&mut self, _err: &crate::Error) {
        self.memoer.close();
    }
}
