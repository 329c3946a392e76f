//! Memoer doers under a doist, and end-to-end delivery over real peers.

use boxwork::doing::{Doer, Doist};
use boxwork::memo::echo::Echo;
use boxwork::memo::{Memoer, TymeeMemoer};
use boxwork::memoing::{MemoerDoer, TymeeMemoerDoer};
use boxwork::peer::udp;
use boxwork::tyme::{Tymee, Tymist};

#[test]
fn memoer_doer_lifecycle() {
    let mut doer = MemoerDoer::new(Memoer::new(Echo::default()));
    assert!(!doer.memoer().opened());

    doer.enter().unwrap();
    assert!(doer.memoer().opened());

    doer.memoer_mut()
        .memoit(b"Hello There".to_vec(), "beta".into(), None)
        .unwrap();
    assert!(!doer.recur(0.0).unwrap());
    assert!(!doer.recur(0.0).unwrap());
    let (memo, src, _) = doer.memoer_mut().take_memo().unwrap();
    assert_eq!(memo, b"Hello There");
    assert_eq!(src, "beta");

    doer.close();
    assert!(!doer.memoer().opened());
}

#[test]
fn memoer_doer_runs_to_limit() {
    let tock = 0.03125;
    let mut doist = Doist::new(tock).with_real(true).with_limit(4.0 * tock);
    let doer = MemoerDoer::new(Memoer::new(Echo::default()));
    doist.run(vec![Box::new(doer)]).unwrap();
    assert_eq!(doist.tyme(), 4.0 * tock);
    // The memoer never finishes on its own; the limit closed it.
    assert_eq!(doist.dones().len(), 0);
    assert_eq!(doist.live(), 0);
}

#[test]
fn tymee_memoer_doer_winds_through() {
    let mut tymist = Tymist::new(1.0);
    let mut doer = TymeeMemoerDoer::new(TymeeMemoer::new(Echo::default()).with_tymeout(5.0));
    doer.wind(tymist.tymen());
    doer.enter().unwrap();
    assert_eq!(doer.memoer().tyme(), Some(0.0));
    tymist.tick();
    assert_eq!(doer.memoer().tyme(), Some(1.0));
    doer.exit();
    assert!(!doer.memoer().opened());
}

#[test]
fn udp_end_to_end_fragmented() {
    let mut alpha = Memoer::new(udp::Peer::new("127.0.0.1:0".parse().unwrap())).with_size(38);
    let mut beta = Memoer::new(udp::Peer::new("127.0.0.1:0".parse().unwrap())).with_size(38);
    alpha.reopen().unwrap();
    beta.reopen().unwrap();
    let beta_addr = beta.peer().addr();
    let alpha_addr = alpha.peer().addr();

    alpha
        .memoit(b"Hello there, over the wire.".to_vec(), beta_addr, None)
        .unwrap();
    alpha.service().unwrap();

    let mut got = None;
    for _ in 0..200 {
        beta.service().unwrap();
        if let Some(memo) = beta.take_memo() {
            got = Some(memo);
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(1));
    }
    let (memo, src, vid) = got.expect("memo delivered");
    assert_eq!(memo, b"Hello there, over the wire.");
    assert_eq!(src, alpha_addr);
    assert_eq!(vid, None);
    assert!(beta.rxgs().is_empty());
}

#[cfg(unix)]
mod multi {
    use super::*;
    use boxwork::multidoing::{BossDoer, CrewDoer, Load};

    #[test]
    fn crew_reports_over_uxd() {
        let dir = tempfile::tempdir().unwrap();
        let mut tymist = Tymist::new(0.125);

        let mut boss = BossDoer::new("boss", dir.path(), Vec::new()).unwrap();
        boss.wind(tymist.tymen());
        boss.enter().unwrap();

        let mut crew = CrewDoer::new("hand", boss.path()).unwrap();
        crew.wind(tymist.tymen());
        crew.enter().unwrap();

        let mut done = false;
        for _ in 0..10 {
            if !done {
                done = crew.recur(tymist.tyme()).unwrap();
                if done {
                    crew.exit();
                }
            }
            let _ = boss.recur(tymist.tyme()).unwrap();
            tymist.tick();
            if boss.statuses().get("hand").map(String::as_str) == Some("done") {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
        assert!(done);
        assert_eq!(crew.count(), 4);
        assert_eq!(boss.statuses().get("hand").map(String::as_str), Some("done"));
        boss.exit();
    }

    #[test]
    fn boss_completes_when_crew_exits() {
        let dir = tempfile::tempdir().unwrap();
        let load = Load {
            name: "hand".to_string(),
            tock: 0.0,
            real: true,
            limit: None,
            command: vec!["sleep".to_string(), "0".to_string()],
        };
        let boss = BossDoer::new("boss", dir.path(), vec![load]).unwrap();

        let mut doist = Doist::new(0.01).with_real(true).with_limit(5.0);
        doist.run(vec![Box::new(boss)]).unwrap();
        // The boss finished because its crew exited, well before the limit.
        assert_eq!(doist.dones().len(), 1);
        assert!(doist.tyme() < 5.0);
    }
}
