//! Scheduler scenarios: ordering, per-doer tocks, abort isolation, limits,
//! nesting.

use std::cell::RefCell;
use std::rc::Rc;

use boxwork::doing::{DoDoer, Doer, Doist};
use boxwork::{Error, Result};

type Log = Rc<RefCell<Vec<String>>>;

/// A doer that records its lifecycle and completes after `spins` recurs.
struct Spinner {
    name: &'static str,
    spins: usize,
    count: usize,
    tock: f64,
    log: Log,
}

impl Spinner {
    fn new(name: &'static str, spins: usize, log: &Log) -> Self {
        Self { name, spins, count: 0, tock: 0.0, log: Rc::clone(log) }
    }

    fn with_tock(mut self, tock: f64) -> Self {
        self.tock = tock;
        self
    }

    fn note(&self, what: &str) {
        self.log.borrow_mut().push(format!("{}:{}", self.name, what));
    }
}

impl Doer for Spinner {
    fn tock(&self) -> f64 {
        self.tock
    }

    fn enter(&mut self) -> Result<()> {
        self.note("enter");
        Ok(())
    }

    fn recur(&mut self, tyme: f64) -> Result<bool> {
        self.count += 1;
        self.note(&format!("recur@{tyme}"));
        Ok(self.count > self.spins)
    }

    fn exit(&mut self) {
        self.note("exit");
    }

    fn close(&mut self) {
        self.note("close");
    }

    fn abort(&mut self, _err: &Error) {
        self.note("abort");
    }
}

/// A doer erring at a chosen point in its lifecycle.
struct Flake {
    name: &'static str,
    fail_enter: bool,
    fail_at: usize,
    count: usize,
    log: Log,
}

impl Doer for Flake {
    fn enter(&mut self) -> Result<()> {
        if self.fail_enter {
            return Err(Error::Scheduler(format!("{} refused entry", self.name)));
        }
        self.log.borrow_mut().push(format!("{}:enter", self.name));
        Ok(())
    }

    fn recur(&mut self, _tyme: f64) -> Result<bool> {
        self.count += 1;
        if self.count >= self.fail_at {
            return Err(Error::Scheduler(format!("{} flaked", self.name)));
        }
        self.log.borrow_mut().push(format!("{}:recur", self.name));
        Ok(false)
    }

    fn abort(&mut self, err: &Error) {
        self.log.borrow_mut().push(format!("{}:abort({err})", self.name));
    }
}

fn log() -> Log {
    Rc::new(RefCell::new(Vec::new()))
}

#[test]
fn liveness_and_final_tyme() {
    let log = log();
    let mut doist = Doist::new(0.03125);
    doist
        .run(vec![
            Box::new(Spinner::new("a", 3, &log)),
            Box::new(Spinner::new("b", 3, &log)),
        ])
        .unwrap();
    // Both complete on their fourth recur; the run ends after four cycles.
    assert_eq!(doist.tyme(), 4.0 * 0.03125);
    assert_eq!(doist.live(), 0);
    assert_eq!(doist.dones().len(), 2);
}

#[test]
fn insertion_order_is_cycle_order() {
    let log = log();
    let mut doist = Doist::new(1.0);
    doist
        .run(vec![
            Box::new(Spinner::new("a", 1, &log)),
            Box::new(Spinner::new("b", 1, &log)),
            Box::new(Spinner::new("c", 1, &log)),
        ])
        .unwrap();
    let got = log.borrow().clone();
    assert_eq!(
        got,
        vec![
            "a:enter", "b:enter", "c:enter",
            "a:recur@0", "b:recur@0", "c:recur@0",
            "a:recur@1", "a:exit", "b:recur@1", "b:exit", "c:recur@1", "c:exit",
        ]
    );
}

#[test]
fn determinism_in_virtual_tyme() {
    let run = || {
        let log = log();
        let mut doist = Doist::new(0.5);
        doist
            .run(vec![
                Box::new(Spinner::new("a", 2, &log)),
                Box::new(Spinner::new("b", 4, &log).with_tock(1.0)),
                Box::new(Spinner::new("c", 3, &log)),
            ])
            .unwrap();
        let events = log.borrow().clone();
        (events, doist.tyme())
    };
    assert_eq!(run(), run());
}

#[test]
fn per_doer_tock_gates_recurs() {
    let log = log();
    let mut doist = Doist::new(1.0).with_limit(8.0);
    doist
        .run(vec![Box::new(Spinner::new("slow", 99, &log).with_tock(2.0))])
        .unwrap();
    let recurs: Vec<String> = log
        .borrow()
        .iter()
        .filter(|event| event.contains("recur"))
        .cloned()
        .collect();
    assert_eq!(
        recurs,
        vec!["slow:recur@0", "slow:recur@2", "slow:recur@4", "slow:recur@6"]
    );
    // The limit closed the survivor.
    assert!(log.borrow().iter().any(|event| event == "slow:close"));
    assert_eq!(doist.tyme(), 8.0);
}

#[test]
fn abort_isolates_siblings() {
    let log = log();
    let mut doist = Doist::new(1.0);
    doist
        .run(vec![
            Box::new(Flake { name: "flaky", fail_enter: false, fail_at: 2, count: 0, log: Rc::clone(&log) }),
            Box::new(Spinner::new("steady", 3, &log)),
        ])
        .unwrap();
    let got = log.borrow().clone();
    assert!(got.iter().any(|event| event.starts_with("flaky:abort")));
    assert!(got.iter().any(|event| event == "steady:exit"));
    assert_eq!(doist.dones().len(), 1);
}

#[test]
fn enter_failure_aborts_without_recur() {
    let log = log();
    let mut doist = Doist::new(1.0);
    doist
        .run(vec![
            Box::new(Flake { name: "refuser", fail_enter: true, fail_at: 9, count: 0, log: Rc::clone(&log) }),
            Box::new(Spinner::new("steady", 1, &log)),
        ])
        .unwrap();
    let got = log.borrow().clone();
    assert!(got.iter().any(|event| event.starts_with("refuser:abort")));
    assert!(!got.iter().any(|event| event == "refuser:recur"));
    assert!(got.iter().any(|event| event == "steady:exit"));
}

#[test]
fn dodoer_nests_and_completes() {
    let log = log();
    let inner: Vec<Box<dyn Doer>> = vec![
        Box::new(Spinner::new("inner_a", 2, &log)),
        Box::new(Spinner::new("inner_b", 1, &log)),
    ];
    let mut doist = Doist::new(1.0);
    doist
        .run(vec![
            Box::new(DoDoer::new(inner)),
            Box::new(Spinner::new("outer", 5, &log)),
        ])
        .unwrap();
    let got = log.borrow().clone();
    // Children recur at the host's tyme and finish before the outer doer.
    assert!(got.iter().any(|event| event == "inner_a:recur@0"));
    assert!(got.iter().any(|event| event == "inner_a:exit"));
    assert!(got.iter().any(|event| event == "inner_b:exit"));
    assert!(got.iter().any(|event| event == "outer:exit"));
    assert_eq!(doist.dones().len(), 2);
}

#[test]
fn closing_host_cascades_to_children() {
    let log = log();
    let inner: Vec<Box<dyn Doer>> = vec![Box::new(Spinner::new("child", 999, &log))];
    let mut doist = Doist::new(1.0).with_limit(3.0);
    doist.run(vec![Box::new(DoDoer::new(inner))]).unwrap();
    let got = log.borrow().clone();
    assert!(got.iter().any(|event| event == "child:close"));
    assert_eq!(doist.dones().len(), 0);
}

#[test]
fn real_mode_tracks_wall_tyme() {
    let log = log();
    let start = std::time::Instant::now();
    let mut doist = Doist::new(0.015625).with_real(true).with_limit(0.078125);
    doist
        .run(vec![Box::new(Spinner::new("a", 999, &log))])
        .unwrap();
    assert_eq!(doist.tyme(), 0.078125);
    assert!(start.elapsed().as_secs_f64() >= 0.06);
}
