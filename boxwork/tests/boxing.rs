//! Box-machine scenarios: piles and trails, transit arithmetic, maker
//! construction rules, and full runs under a doist.

use std::cell::RefCell;
use std::rc::Rc;

use boxwork::doing::Doist;
use boxwork::hier::{Boxer, Context, Maker, Mine, Over, Scene, Val};
use boxwork::Error;

type Log = Rc<RefCell<Vec<String>>>;

fn log() -> Log {
    Rc::new(RefCell::new(Vec::new()))
}

/// The reference tree a<b<c<{d, e<f}.
fn reference_tree() -> (Boxer, [usize; 6]) {
    let mut boxer = Boxer::new("ref").unwrap();
    let a = boxer.grow("a", None).unwrap();
    let b = boxer.grow("b", Some(a)).unwrap();
    let c = boxer.grow("c", Some(b)).unwrap();
    let d = boxer.grow("d", Some(c)).unwrap();
    let e = boxer.grow("e", Some(c)).unwrap();
    let f = boxer.grow("f", Some(e)).unwrap();
    (boxer, [a, b, c, d, e, f])
}

fn names(boxer: &Boxer, ids: &[usize]) -> Vec<String> {
    ids.iter().map(|&id| boxer.node(id).name().to_string()).collect()
}

#[test]
fn piles_and_trails() {
    let (boxer, [a, b, c, d, e, f]) = reference_tree();

    for id in [a, b, c, d] {
        assert_eq!(names(&boxer, &boxer.pile_of(id)), ["a", "b", "c", "d"]);
    }
    for id in [e, f] {
        assert_eq!(names(&boxer, &boxer.pile_of(id)), ["a", "b", "c", "e", "f"]);
    }

    assert_eq!(boxer.trail(a), "<a>b>c>d");
    assert_eq!(boxer.trail(b), "a<b>c>d");
    assert_eq!(boxer.trail(c), "a<b<c>d");
    assert_eq!(boxer.trail(d), "a<b<c<d>");
    assert_eq!(boxer.trail(e), "a<b<c<e>f");
    assert_eq!(boxer.trail(f), "a<b<c<e<f>");

    let solo = Boxer::new("solo").map(|mut boxer| {
        boxer.grow("box", None).unwrap();
        boxer
    });
    assert_eq!(solo.unwrap().trail(0), "<box>");
}

#[test]
fn exen_vectors() {
    let (boxer, [a, b, c, d, e, f]) = reference_tree();
    let check = |near: usize,
                 far: usize,
                 exits: &[usize],
                 enters: &[usize],
                 rexits: &[usize],
                 renters: &[usize]| {
        let got = boxer.exen(near, far);
        assert_eq!(
            (got.0.as_slice(), got.1.as_slice(), got.2.as_slice(), got.3.as_slice()),
            (exits, enters, rexits, renters),
            "exen({}, {})",
            boxer.node(near).name(),
            boxer.node(far).name(),
        );
    };

    check(d, e, &[d], &[e, f], &[c, b, a], &[a, b, c]);
    check(d, f, &[d], &[e, f], &[c, b, a], &[a, b, c]);
    check(a, e, &[d], &[e, f], &[c, b, a], &[a, b, c]);
    check(c, b, &[d, c, b], &[b, c, d], &[a], &[a]);
    check(c, c, &[d, c], &[c, d], &[b, a], &[a, b]);
    check(c, d, &[d], &[d], &[c, b, a], &[a, b, c]);
    check(e, d, &[f, e], &[d], &[c, b, a], &[a, b, c]);
    check(f, f, &[f], &[f], &[e, c, b, a], &[a, b, c, e]);
}

#[test]
fn exen_partitions_piles() {
    let (boxer, ids) = reference_tree();
    for &near in &ids {
        for &far in &ids {
            let (exits, enters, rexits, renters) = boxer.exen(near, far);
            let mut old: Vec<usize> = rexits.iter().chain(exits.iter()).copied().collect();
            old.sort_unstable();
            let mut pn: Vec<usize> = boxer.pile_of(near).to_vec();
            pn.sort_unstable();
            assert_eq!(old, pn, "old pile partition");

            let mut new: Vec<usize> = renters.iter().chain(enters.iter()).copied().collect();
            new.sort_unstable();
            let mut pf: Vec<usize> = boxer.pile_of(far).to_vec();
            pf.sort_unstable();
            assert_eq!(new, pf, "new pile partition");

            let mut rex = rexits.clone();
            let mut ren = renters.clone();
            rex.sort_unstable();
            ren.sort_unstable();
            assert_eq!(rex, ren, "common ancestors");
        }
    }
}

#[test]
fn maker_default_names_and_levels() {
    let mut maker = Maker::new("made").unwrap();
    maker
        .make(|work| {
            work.be(Some("top"), Over::Top)?;
            work.be(None, Over::Name("top"))?;
            work.be(None, Over::Same)?;
            let b2 = work.be(None, Over::Same)?;
            work.be(None, Over::Id(b2))?;
            Ok(())
        })
        .unwrap();
    let boxer = maker.finish().unwrap();
    assert_eq!(boxer.len(), 5);
    let top = boxer.find("top").unwrap();
    let b0 = boxer.find("box0").unwrap();
    let b2 = boxer.find("box2").unwrap();
    let b3 = boxer.find("box3").unwrap();
    assert_eq!(boxer.trail(top), "<top>box0");
    assert_eq!(boxer.trail(b3), "top<box2<box3>");
    assert_eq!(boxer.first(), Some(top));
    assert_eq!(boxer.node(b0).next(), Some(boxer.find("box1").unwrap()));
    assert_eq!(boxer.node(b2).unders(), &[b3]);
}

#[test]
fn maker_rejects_bad_work() {
    // Under before over.
    let mut maker = Maker::new("bad").unwrap();
    let err = maker.make(|work| {
        work.be(None, Over::Name("missing"))?;
        Ok(())
    });
    assert!(matches!(err, Err(Error::Hierarchy(_))));

    // Duplicate box name.
    let mut maker = Maker::new("bad").unwrap();
    let err = maker.make(|work| {
        work.be(Some("twin"), Over::Top)?;
        work.be(Some("twin"), Over::Top)?;
        Ok(())
    });
    assert!(matches!(err, Err(Error::Validation(_))));

    // Invalid identifier.
    let mut maker = Maker::new("bad").unwrap();
    let err = maker.make(|work| {
        work.be(Some("no.dots"), Over::Top)?;
        Ok(())
    });
    assert!(matches!(err, Err(Error::Validation(_))));

    // Acts need a box.
    let mut maker = Maker::new("bad").unwrap();
    let err = maker.make(|work| work.poke("cycle", Val::Int(0)));
    assert!(matches!(err, Err(Error::Hierarchy(_))));

    // Unresolved tract destination surfaces at finish.
    let mut maker = Maker::new("bad").unwrap();
    maker
        .make(|work| {
            work.be(Some("only"), Over::Top)?;
            work.tract("nowhere", "")?;
            Ok(())
        })
        .unwrap();
    assert!(matches!(maker.finish(), Err(Error::Hierarchy(_))));

    // A `next` tract with no lexical successor surfaces at finish.
    let mut maker = Maker::new("bad").unwrap();
    maker
        .make(|work| {
            work.be(Some("last"), Over::Top)?;
            work.tract("next", "")?;
            Ok(())
        })
        .unwrap();
    assert!(matches!(maker.finish(), Err(Error::Hierarchy(_))));

    // No boxes at all.
    let maker = Maker::new("bad").unwrap();
    assert!(matches!(maker.finish(), Err(Error::Validation(_))));
}

#[test]
fn guarded_run_counts_cycles() {
    let mine = Rc::new(RefCell::new(Mine::new()));
    let mut maker = Maker::new("demo").unwrap().with_mine(Rc::clone(&mine));
    maker
        .make(|work| {
            work.be(Some("top"), Over::Top)?;
            work.be(Some("busy"), Over::Name("top"))?;
            work.poke("cycle", Val::Int(0))?;
            work.ctx(Context::Re);
            work.deed(|scene: &mut Scene| {
                let cycle = match scene.mine.val("cycle") {
                    Some(Val::Int(n)) => *n,
                    _ => 0,
                };
                scene.mine.put("cycle", cycle + 1)
            })?;
            work.tract("rest", "M.cycle.value >= 3")?;
            work.be(Some("rest"), Over::Same)?;
            work.end()?;
            Ok(())
        })
        .unwrap();
    let boxer = maker.finish().unwrap();

    let mut doist = Doist::new(0.0625);
    doist.run(vec![Box::new(boxer.into_doer())]).unwrap();
    assert_eq!(doist.dones().len(), 1);

    let mine = mine.borrow();
    assert_eq!(mine.val("cycle"), Some(&Val::Int(3)));
    assert_eq!(mine.val("boxer.demo.end"), Some(&Val::Bool(true)));
    // The poke ran while the doist was live, so its bag carries a stamp.
    assert!(mine.get("cycle").unwrap().tyme().is_some());
}

fn note(events: &Log, label: impl Into<String>) -> impl FnMut(&mut Scene) -> boxwork::Result<()> + 'static {
    let label = label.into();
    let events = Rc::clone(events);
    move |_scene| {
        events.borrow_mut().push(label.clone());
        Ok(())
    }
}

#[test]
fn transition_replays_contexts_in_order() {
    let events = log();
    let mut maker = Maker::new("order").unwrap();
    maker
        .make(|work| {
            work.be(Some("root"), Over::Top)?;
            for context in [Context::Be, Context::Ene, Context::Re, Context::Rene, Context::Rexa] {
                work.ctx(context);
                work.deed(note(&events, format!("root:{context}")))?;
            }
            work.be(Some("left"), Over::Name("root"))?;
            for context in [Context::Be, Context::Ene, Context::Re, Context::Exa] {
                work.ctx(context);
                work.deed(note(&events, format!("left:{context}")))?;
            }
            work.ctx(Context::Tract);
            work.tract("right", "")?;
            work.be(Some("leaf"), Over::Name("left"))?;
            for context in [Context::Be, Context::Ene, Context::Re, Context::Exa] {
                work.ctx(context);
                work.deed(note(&events, format!("leaf:{context}")))?;
            }
            work.be(Some("right"), Over::Name("root"))?;
            for context in [Context::Be, Context::Ene] {
                work.ctx(context);
                work.deed(note(&events, format!("right:{context}")))?;
            }
            work.end()?;
            Ok(())
        })
        .unwrap();
    let mut boxer = maker.finish().unwrap();

    let done = boxer.recur(0.0).unwrap();
    assert!(done);
    assert_eq!(
        events.borrow().clone(),
        vec![
            "root:be", "root:ene", "left:be", "left:ene", "leaf:be", "leaf:ene",
            "root:re", "left:re", "leaf:re",
            "leaf:exa", "left:exa", "root:rexa", "root:rene",
            "right:be", "right:ene",
        ]
    );
}

#[test]
fn self_transit_reenters() {
    let events = log();
    let mine = Rc::new(RefCell::new(Mine::new()));
    mine.borrow_mut().put("again", true).unwrap();

    let mut maker = Maker::new("again").unwrap().with_mine(Rc::clone(&mine));
    maker
        .make(|work| {
            work.be(Some("base"), Over::Top)?;
            work.ctx(Context::Rexa);
            work.deed(note(&events, "base:rexa"))?;
            work.ctx(Context::Rene);
            work.deed(note(&events, "base:rene"))?;
            work.be(Some("solo"), Over::Name("base"))?;
            work.deed(note(&events, "solo:ene"))?;
            work.ctx(Context::Exa);
            work.deed(note(&events, "solo:exa"))?;
            work.ctx(Context::Tract);
            work.tract("solo", "M.again.value")?;
            Ok(())
        })
        .unwrap();
    let mut boxer = maker.finish().unwrap();

    assert!(!boxer.recur(0.0).unwrap());
    // Entry, then the self transit replayed exit and entry around the leaf.
    assert_eq!(
        events.borrow().clone(),
        vec!["solo:ene", "solo:exa", "base:rexa", "base:rene", "solo:ene"]
    );

    mine.borrow_mut().put("again", false).unwrap();
    events.borrow_mut().clear();
    assert!(!boxer.recur(1.0).unwrap());
    assert!(events.borrow().is_empty());
    assert_eq!(boxer.cur(), boxer.find("solo"));
}

#[test]
fn dock_guards_transitions() {
    let dir = tempfile::tempdir().unwrap();
    let dock = boxwork::hier::Dock::open(dir.path()).unwrap();
    let dock = Rc::new(RefCell::new(dock));
    dock.borrow_mut().put("seen", 7i64).unwrap();

    let mine = Rc::new(RefCell::new(Mine::new()));
    let mut maker = Maker::new("docked")
        .unwrap()
        .with_mine(Rc::clone(&mine))
        .with_dock(Rc::clone(&dock));
    maker
        .make(|work| {
            work.be(Some("wait"), Over::Top)?;
            work.tract("go", "D.seen.value == 7")?;
            work.be(Some("go"), Over::Top)?;
            work.end()?;
            Ok(())
        })
        .unwrap();
    let mut boxer = maker.finish().unwrap();

    assert!(boxer.recur(0.0).unwrap());
    assert_eq!(mine.borrow().val("boxer.docked.end"), Some(&Val::Bool(true)));
    // The durable cell survives a fresh open.
    drop(boxer);
    let dock = Rc::try_unwrap(dock).ok().map(RefCell::into_inner);
    drop(dock);
    let fresh = boxwork::hier::Dock::open(dir.path()).unwrap();
    assert_eq!(fresh.val("seen"), Some(&Val::Int(7)));
}

fn form_mark(spec: boxwork::hier::Spec) -> boxwork::Result<Box<dyn boxwork::hier::Act>> {
    let key = match spec.iops.get("key") {
        Some(Val::Text(key)) => key.clone(),
        _ => return Err(Error::Validation("mark needs a key".into())),
    };
    let context = spec.context.unwrap_or(Context::Ene);
    Ok(Box::new(boxwork::hier::Poke::new(spec.name, context, key, true)))
}

#[test]
fn registered_kind_forms_through_maker() {
    use std::collections::BTreeMap;

    let mine = Rc::new(RefCell::new(Mine::new()));
    let mut maker = Maker::new("marked").unwrap().with_mine(Rc::clone(&mine));
    maker.register("mark", form_mark).unwrap();
    // A second registration of the same kind is refused.
    assert!(maker.register("mark", form_mark).is_err());
    maker
        .make(|work| {
            work.be(Some("only"), Over::Top)?;
            work.form(
                "mark",
                BTreeMap::from([("key".to_string(), Val::Text("touched".into()))]),
            )?;
            work.form("missing", BTreeMap::new()).unwrap_err();
            Ok(())
        })
        .unwrap();
    let mut boxer = maker.finish().unwrap();

    assert!(!boxer.recur(0.0).unwrap());
    assert_eq!(mine.borrow().val("touched"), Some(&Val::Bool(true)));
}
