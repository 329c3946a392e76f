//! Virtual tyme for cooperative schedulers.
//!
//! A [`Tymist`] owns a monotone virtual clock whose value ("tyme") advances
//! only when the owner calls [`Tymist::tick`]. The clock value is shared, so
//! a [`Tymth`] closure handed out by [`Tymist::tymen`] always reads the live
//! tyme. Handing such a closure to a [`Tymee`] "winds" it: the tymee now
//! reads its host's clock without ever being able to advance it.
//!
//! # Examples
//!
//! ```
//! use boxwork_tyme::{Tymist, Tymer};
//!
//! let mut tymist = Tymist::new(0.25);
//! let tymth = tymist.tymen();
//!
//! let mut tymer = Tymer::with_duration(tymth.clone(), 0.5);
//! assert!(!tymer.expired());
//!
//! tymist.tick();
//! assert_eq!(tymth(), 0.25);
//! assert!(!tymer.expired());
//!
//! tymist.tick();
//! assert_eq!(tymth(), 0.5);
//! assert!(tymer.expired());
//! ```
#![forbid(missing_docs)]

use std::cell::Cell;
use std::rc::Rc;

/// A shareable reader of a live tyme value.
///
/// Calling the closure returns the current tyme of the [`Tymist`] that
/// produced it. Cloning is cheap; all clones observe the same clock.
pub type Tymth = Rc<dyn Fn() -> f64>;

/// A monotone virtual clock with nominal step `tock`.
///
/// Tyme is a non-negative float that never decreases. Only the owner of the
/// `Tymist` advances it, through [`tick`](Tymist::tick) or
/// [`tick_by`](Tymist::tick_by).
pub struct Tymist {
    tyme: Rc<Cell<f64>>,
    tock: f64,
}

impl Tymist {
    /// The default tock, 1/32 of a second.
    pub const DEFAULT_TOCK: f64 = 0.03125;

    /// Creates a clock at tyme zero with the given tock.
    ///
    /// A non-positive tock is clamped to zero, meaning each [`tick`](Tymist::tick)
    /// is a no-op until a positive delta is supplied.
    pub fn new(tock: f64) -> Self {
        Self::with_tyme(0.0, tock)
    }

    /// Creates a clock at an explicit starting tyme.
    pub fn with_tyme(tyme: f64, tock: f64) -> Self {
        Self {
            tyme: Rc::new(Cell::new(tyme.max(0.0))),
            tock: tock.max(0.0),
        }
    }

    /// The current tyme.
    pub fn tyme(&self) -> f64 {
        self.tyme.get()
    }

    /// The nominal tyme advance per tick.
    pub fn tock(&self) -> f64 {
        self.tock
    }

    /// Replaces the tock; non-positive values clamp to zero.
    pub fn set_tock(&mut self, tock: f64) {
        self.tock = tock.max(0.0);
    }

    /// Advances tyme by one tock and returns the new tyme.
    pub fn tick(&mut self) -> f64 {
        self.tick_by(self.tock)
    }

    /// Advances tyme by an explicit delta and returns the new tyme.
    ///
    /// Negative deltas are clamped to zero; tyme never runs backwards.
    pub fn tick_by(&mut self, delta: f64) -> f64 {
        let tyme = self.tyme.get() + delta.max(0.0);
        self.tyme.set(tyme);
        tyme
    }

    /// Returns a closure reading the live tyme of this clock.
    pub fn tymen(&self) -> Tymth {
        let tyme = Rc::clone(&self.tyme);
        Rc::new(move || tyme.get())
    }
}

impl Default for Tymist {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TOCK)
    }
}

/// Anything that can be wound onto a host clock.
///
/// A wound tymee reads its host's tyme through the injected [`Tymth`]; it can
/// never advance the clock. Before winding, [`tyme`](Tymee::tyme) is `None`.
pub trait Tymee {
    /// Injects the host clock reader.
    fn wind(&mut self, tymth: Tymth);

    /// The current host tyme, or `None` when never wound.
    fn tyme(&self) -> Option<f64>;
}

/// A one-shot countdown measured on a host clock.
///
/// The tymer records the tyme at which it was started; it is
/// [`expired`](Tymer::expired) once the host tyme has advanced past
/// `start + duration`. Tymers never tick the clock.
pub struct Tymer {
    tymth: Tymth,
    start: f64,
    duration: f64,
}

impl Tymer {
    /// Creates an already-expired tymer (duration zero) on the given clock.
    pub fn new(tymth: Tymth) -> Self {
        Self::with_duration(tymth, 0.0)
    }

    /// Creates a tymer counting down `duration` from the current tyme.
    pub fn with_duration(tymth: Tymth, duration: f64) -> Self {
        let start = tymth();
        Self {
            tymth,
            start,
            duration: duration.max(0.0),
        }
    }

    /// The countdown duration.
    pub fn duration(&self) -> f64 {
        self.duration
    }

    /// Tyme elapsed since the last (re)start.
    pub fn elapsed(&self) -> f64 {
        (self.tymth)() - self.start
    }

    /// Tyme remaining until expiry; zero once expired.
    pub fn remaining(&self) -> f64 {
        (self.start + self.duration - (self.tymth)()).max(0.0)
    }

    /// True once the host tyme has reached `start + duration`.
    pub fn expired(&self) -> bool {
        (self.tymth)() >= self.start + self.duration
    }

    /// Restarts the countdown at the current tyme.
    ///
    /// With `Some(duration)` the countdown length is replaced; with `None`
    /// the prior duration is kept.
    pub fn restart(&mut self, duration: Option<f64>) {
        self.start = (self.tymth)();
        if let Some(duration) = duration {
            self.duration = duration.max(0.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tymist_ticks_monotone() {
        let mut tymist = Tymist::new(1.0);
        assert_eq!(tymist.tyme(), 0.0);
        assert_eq!(tymist.tick(), 1.0);
        assert_eq!(tymist.tick_by(0.5), 1.5);
        assert_eq!(tymist.tick_by(-4.0), 1.5);
        assert_eq!(tymist.tyme(), 1.5);
    }

    #[test]
    fn tymth_reads_live() {
        let mut tymist = Tymist::default();
        assert_eq!(tymist.tock(), Tymist::DEFAULT_TOCK);
        let tymth = tymist.tymen();
        assert_eq!(tymth(), 0.0);
        tymist.tick();
        assert_eq!(tymth(), Tymist::DEFAULT_TOCK);
        let other = tymth.clone();
        tymist.tick();
        assert_eq!(other(), 2.0 * Tymist::DEFAULT_TOCK);
    }

    #[test]
    fn tymer_expires_exactly() {
        let mut tymist = Tymist::new(0.25);
        let mut tymer = Tymer::with_duration(tymist.tymen(), 0.5);
        assert_eq!(tymer.remaining(), 0.5);
        assert!(!tymer.expired());
        tymist.tick();
        assert!(!tymer.expired());
        assert_eq!(tymer.elapsed(), 0.25);
        tymist.tick();
        assert!(tymer.expired());
        assert_eq!(tymer.remaining(), 0.0);

        tymer.restart(Some(0.25));
        assert!(!tymer.expired());
        tymist.tick();
        assert!(tymer.expired());

        let tymer = Tymer::new(tymist.tymen());
        assert!(tymer.expired());
    }
}
