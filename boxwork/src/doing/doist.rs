//! The root scheduler.

use std::time::{Duration, Instant};

use tracing::info;

use boxwork_tyme::{Tymist, Tymth};

use crate::Result;

use super::{Deeds, Doer};

/// The root scheduler over a set of doers.
///
/// A doist owns a [`Tymist`] and a deed list. Each cycle it recurs every
/// live doer whose per-doer tock has elapsed, in insertion order, then
/// advances tyme by its own tock. In `real` mode it sleeps between cycles to
/// track wall time; otherwise it runs as fast as possible with identical
/// observable behavior. A `limit` bounds total tyme and ends the run with a
/// graceful `close` of the survivors.
///
/// At most one doer runs at any instant; the doist is single-threaded by
/// construction.
///
/// # Examples
///
/// ```
/// use boxwork::doing::{Doer, Doist};
///
/// struct Count(usize);
///
/// impl Doer for Count {
///     fn recur(&mut self, _tyme: f64) -> boxwork::Result<bool> {
///         self.0 += 1;
///         Ok(self.0 > 3)
///     }
/// }
///
/// let mut doist = Doist::new(0.03125);
/// doist.run(vec![Box::new(Count(0))]).unwrap();
/// assert_eq!(doist.tyme(), 4.0 * 0.03125);
/// ```
pub struct Doist {
    tymist: Tymist,
    real: bool,
    limit: Option<f64>,
    deeds: Deeds,
}

impl Doist {
    /// Creates a virtual-tyme doist with the given tock and no limit.
    pub fn new(tock: f64) -> Self {
        Self {
            tymist: Tymist::new(tock),
            real: false,
            limit: None,
            deeds: Deeds::default(),
        }
    }

    /// Tracks wall time between cycles when true.
    pub fn with_real(mut self, real: bool) -> Self {
        self.real = real;
        self
    }

    /// Bounds the run to `limit` tyme; survivors are closed.
    pub fn with_limit(mut self, limit: f64) -> Self {
        self.limit = Some(limit.max(0.0));
        self
    }

    /// The current tyme.
    pub fn tyme(&self) -> f64 {
        self.tymist.tyme()
    }

    /// The tyme advance per cycle.
    pub fn tock(&self) -> f64 {
        self.tymist.tock()
    }

    /// A live reader of this doist's clock.
    pub fn tymen(&self) -> Tymth {
        self.tymist.tymen()
    }

    /// Number of live doers.
    pub fn live(&self) -> usize {
        self.deeds.live()
    }

    /// Doers that have completed, in completion order.
    pub fn dones(&self) -> &[Box<dyn Doer>] {
        self.deeds.dones()
    }

    /// Appends doers without running them; `run` will pick them up.
    pub fn extend(&mut self, doers: Vec<Box<dyn Doer>>) {
        self.deeds.extend(doers);
    }

    /// Winds every pending doer onto this doist's clock.
    pub fn ready(&mut self) {
        let tymth = self.tymist.tymen();
        self.deeds.ready(&tymth, self.tymist.tyme());
    }

    /// Enters every pending doer, aborting and removing any that err.
    pub fn enter(&mut self) {
        self.deeds.enter();
    }

    /// Runs one cycle of recurs at the current tyme, without ticking.
    pub fn recur(&mut self) {
        self.deeds.recur(self.tymist.tyme());
    }

    /// Closes every surviving doer.
    pub fn close(&mut self) {
        self.deeds.close();
    }

    /// The full loop: ready, enter, cycles of recur and tick until no doer
    /// survives or the limit is reached, then teardown.
    ///
    /// Completion teardown happens per doer as it finishes; survivors at the
    /// limit are closed.
    pub fn run(&mut self, doers: Vec<Box<dyn Doer>>) -> Result<()> {
        self.extend(doers);
        self.ready();
        self.enter();
        info!(live = self.live(), tock = self.tock(), real = self.real, "doist running");

        let timer = Instant::now();
        let base = self.tymist.tyme();
        loop {
            self.recur();
            let tyme = self.tymist.tick();
            if self.real {
                let target = Duration::from_secs_f64((tyme - base).max(0.0));
                let elapsed = timer.elapsed();
                if target > elapsed {
                    std::thread::sleep(target - elapsed);
                }
            }
            if self.limit.is_some_and(|limit| tyme >= limit) {
                info!(tyme, "doist limit reached");
                break;
            }
            if self.deeds.live() == 0 {
                break;
            }
        }
        self.close();
        info!(tyme = self.tyme(), dones = self.deeds.dones().len(), "doist finished");
        Ok(())
    }
}

impl Default for Doist {
    fn default() -> Self {
        Self::new(Tymist::DEFAULT_TOCK)
    }
}
