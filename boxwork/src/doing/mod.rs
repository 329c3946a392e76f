//! Cooperative tasks and the schedulers that drive them.
//!
//! A [`Doer`] is a unit of cooperative work with a fixed lifecycle: one-shot
//! `enter`, repeated `recur` until it reports done, then exactly one of
//! `exit` (normal completion), `close` (external cancel) or `abort`
//! (propagated failure). A [`Doist`] owns a set of doers and runs them in
//! insertion order, one `recur` each per cycle, advancing its virtual clock
//! between cycles. A [`DoDoer`] packages a whole sub-schedule as a single
//! doer of its host, giving nested supervision: pausing the parent pauses
//! every descendant and cancelling it cascades.

use tracing::error;

use boxwork_tyme::Tymth;

use crate::{Error, Result};

mod dodoer;
mod doist;

pub use dodoer::DoDoer;
pub use doist::Doist;

/// A unit of cooperative work scheduled by a doist.
///
/// Only `recur` is required. The default lifecycle methods do nothing, and
/// the default `tock` of zero asks to run every cycle.
pub trait Doer {
    /// Binds the owning scheduler's clock; called by the scheduler before
    /// `enter`.
    fn wind(&mut self, _tymth: Tymth) {}

    /// Desired minimum period between recurs; zero means every cycle.
    fn tock(&self) -> f64 {
        0.0
    }

    /// One-shot setup. An error here aborts the doer without any recur.
    fn enter(&mut self) -> Result<()> {
        Ok(())
    }

    /// One step of work at the given tyme; `Ok(true)` reports completion.
    fn recur(&mut self, tyme: f64) -> Result<bool>;

    /// Advisory terminal flag; the scheduler itself trusts only `recur`.
    ///
    /// Stateful doers (a boxer, a sub-schedule) report their own completion
    /// here; the default is never-done, which suits doers that run until
    /// closed.
    fn done(&self) -> bool {
        false
    }

    /// One-shot teardown on normal completion.
    fn exit(&mut self) {}

    /// One-shot teardown on external close or cancel.
    fn close(&mut self) {}

    /// One-shot teardown on propagated failure.
    fn abort(&mut self, _err: &Error) {}
}

/// A scheduled doer and the tyme at which it next runs.
struct Deed {
    doer: Box<dyn Doer>,
    retyme: f64,
}

/// The deed list shared by `Doist` and `DoDoer`.
///
/// Insertion order is the execution order within a cycle and is part of the
/// observable contract.
#[derive(Default)]
pub(crate) struct Deeds {
    deeds: Vec<Deed>,
    dones: Vec<Box<dyn Doer>>,
}

impl Deeds {
    /// Appends doers, preserving insertion order.
    pub(crate) fn extend(&mut self, doers: Vec<Box<dyn Doer>>) {
        self.deeds
            .extend(doers.into_iter().map(|doer| Deed { doer, retyme: 0.0 }));
    }

    /// Winds every doer onto the host clock and stamps its first run tyme.
    pub(crate) fn ready(&mut self, tymth: &Tymth, tyme: f64) {
        for deed in self.deeds.iter_mut() {
            deed.doer.wind(tymth.clone());
            deed.retyme = tyme;
        }
    }

    /// Enters doers in order; an erring doer is aborted and removed,
    /// siblings continue.
    pub(crate) fn enter(&mut self) {
        self.deeds.retain_mut(|deed| match deed.doer.enter() {
            Ok(()) => true,
            Err(err) => {
                error!(%err, "doer aborted on enter");
                deed.doer.abort(&err);
                false
            }
        });
    }

    /// Runs one cycle at `tyme`: each live doer whose retyme has elapsed
    /// recurs once. Done doers exit and move to the dones list; erring doers
    /// abort and are removed.
    pub(crate) fn recur(&mut self, tyme: f64) {
        let mut index = 0;
        while index < self.deeds.len() {
            if tyme < self.deeds[index].retyme {
                index += 1;
                continue;
            }
            match self.deeds[index].doer.recur(tyme) {
                Ok(false) => {
                    let tock = self.deeds[index].doer.tock();
                    self.deeds[index].retyme = tyme + tock;
                    index += 1;
                }
                Ok(true) => {
                    let mut deed = self.deeds.remove(index);
                    deed.doer.exit();
                    self.dones.push(deed.doer);
                }
                Err(err) => {
                    error!(%err, "doer aborted on recur");
                    let mut deed = self.deeds.remove(index);
                    deed.doer.abort(&err);
                }
            }
        }
    }

    /// Closes every surviving doer, in order.
    pub(crate) fn close(&mut self) {
        for deed in self.deeds.iter_mut() {
            deed.doer.close();
        }
        self.deeds.clear();
    }

    /// Aborts every surviving doer with the given reason.
    pub(crate) fn abort(&mut self, err: &Error) {
        for deed in self.deeds.iter_mut() {
            deed.doer.abort(err);
        }
        self.deeds.clear();
    }

    /// Number of live doers.
    pub(crate) fn live(&self) -> usize {
        self.deeds.len()
    }

    /// Doers that have completed, in completion order.
    pub(crate) fn dones(&self) -> &[Box<dyn Doer>] {
        &self.dones
    }
}
