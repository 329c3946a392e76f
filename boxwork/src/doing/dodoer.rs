//! A sub-schedule packaged as a single doer.

use tracing::info;

use boxwork_tyme::Tymth;

use crate::{Error, Result};

use super::{Deeds, Doer};

/// A doer that schedules its own doers, one sub-cycle per host cycle.
///
/// The dodoer never advances a clock of its own: its children read the
/// host's tyme through the tymth it was wound with. Children enter when the
/// dodoer enters and are torn down when it exits, closes or aborts, so
/// supervision nests: pausing the host pauses every descendant and
/// cancelling the host cascades.
pub struct DoDoer {
    tock: f64,
    tymth: Option<Tymth>,
    pending: Vec<Box<dyn Doer>>,
    deeds: Deeds,
}

impl DoDoer {
    /// Packages the given doers as one composite doer.
    pub fn new(doers: Vec<Box<dyn Doer>>) -> Self {
        Self {
            tock: 0.0,
            tymth: None,
            pending: doers,
            deeds: Deeds::default(),
        }
    }

    /// Sets the composite's own tock within its host.
    pub fn with_tock(mut self, tock: f64) -> Self {
        self.tock = tock.max(0.0);
        self
    }

    /// Number of live children.
    pub fn live(&self) -> usize {
        self.deeds.live()
    }

    /// Children that have completed, in completion order.
    pub fn dones(&self) -> &[Box<dyn Doer>] {
        self.deeds.dones()
    }
}

impl Doer for DoDoer {
    fn wind(&mut self, tymth: Tymth) {
        self.tymth = Some(tymth);
    }

    fn tock(&self) -> f64 {
        self.tock
    }

    fn enter(&mut self) -> Result<()> {
        let tymth = self
            .tymth
            .clone()
            .ok_or_else(|| Error::Scheduler("dodoer entered unwound".into()))?;
        self.deeds.extend(std::mem::take(&mut self.pending));
        self.deeds.ready(&tymth, tymth());
        self.deeds.enter();
        info!(live = self.deeds.live(), "dodoer entered");
        Ok(())
    }

    fn recur(&mut self, tyme: f64) -> Result<bool> {
        self.deeds.recur(tyme);
        Ok(self.deeds.live() == 0)
    }

    fn done(&self) -> bool {
        self.pending.is_empty() && self.deeds.live() == 0
    }

    fn exit(&mut self) {
        // Normal completion leaves no survivors, but an early exit must not.
        self.deeds.close();
    }

    fn close(&mut self) {
        self.deeds.close();
    }

    fn abort(&mut self, err: &Error) {
        self.deeds.abort(err);
    }
}
