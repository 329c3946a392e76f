//! The box containment tree and its runner.
//!
//! Boxes form a containment tree: each box has at most one `over` and any
//! number of `unders`, and the first under is its canonical continuation.
//! A box's *pile* is the root-to-leaf path through its over chain and down
//! the first unders. The [`Boxer`] owns every box of one tree, keyed by
//! index; over/unders/next are relations it maintains, not ownership.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use smallvec::SmallVec;
use tracing::{debug, info};

use boxwork_tyme::{Tymee, Tymth};

use crate::doing::Doer;
use crate::{Error, Result};

use super::acting::{Act, Acted, Context, Scene, Scope};
use super::bagging::{validate_name, Dock, Mine};

/// Index of a box within its boxer.
pub type BoxId = usize;

/// A root-to-leaf path of box ids; piles are short.
pub type Pile = SmallVec<[BoxId; 8]>;

/// One node of the containment tree, with its eight action lists.
pub struct BoxNode {
    name: String,
    over: Option<BoxId>,
    unders: Vec<BoxId>,
    next: Option<BoxId>,
    preacts: Vec<Box<dyn Act>>,
    beacts: Vec<Box<dyn Act>>,
    renacts: Vec<Box<dyn Act>>,
    enacts: Vec<Box<dyn Act>>,
    reacts: Vec<Box<dyn Act>>,
    tracts: Vec<Box<dyn Act>>,
    exacts: Vec<Box<dyn Act>>,
    rexacts: Vec<Box<dyn Act>>,
}

impl BoxNode {
    fn new(name: String, over: Option<BoxId>) -> Self {
        Self {
            name,
            over,
            unders: Vec::new(),
            next: None,
            preacts: Vec::new(),
            beacts: Vec::new(),
            renacts: Vec::new(),
            enacts: Vec::new(),
            reacts: Vec::new(),
            tracts: Vec::new(),
            exacts: Vec::new(),
            rexacts: Vec::new(),
        }
    }

    /// The box name, unique within its boxer.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The containing box, or `None` for a top-level box.
    pub fn over(&self) -> Option<BoxId> {
        self.over
    }

    /// Contained boxes, in definition order.
    pub fn unders(&self) -> &[BoxId] {
        &self.unders
    }

    /// The lexically next box, if any.
    pub fn next(&self) -> Option<BoxId> {
        self.next
    }

    /// The action list for a context.
    pub fn acts(&self, context: Context) -> &[Box<dyn Act>] {
        match context {
            Context::Pre => &self.preacts,
            Context::Be => &self.beacts,
            Context::Rene => &self.renacts,
            Context::Ene => &self.enacts,
            Context::Re => &self.reacts,
            Context::Tract => &self.tracts,
            Context::Exa => &self.exacts,
            Context::Rexa => &self.rexacts,
        }
    }

    fn acts_mut(&mut self, context: Context) -> &mut Vec<Box<dyn Act>> {
        match context {
            Context::Pre => &mut self.preacts,
            Context::Be => &mut self.beacts,
            Context::Rene => &mut self.renacts,
            Context::Ene => &mut self.enacts,
            Context::Re => &mut self.reacts,
            Context::Tract => &mut self.tracts,
            Context::Exa => &mut self.exacts,
            Context::Rexa => &mut self.rexacts,
        }
    }
}

/// The runner for one box tree.
///
/// The boxer keeps the current active pile (a prefix-complete containment
/// chain from a root to a leaf) and advances it one cycle per `recur`:
/// recur acts run in pile order, transit guards evaluate leaf to root, and
/// a fired transition re-executes enter and exit actions along the deepest
/// common ancestor.
pub struct Boxer {
    name: String,
    boxes: Vec<BoxNode>,
    names: HashMap<String, BoxId>,
    acts: HashSet<String>,
    first: Option<BoxId>,
    mine: Rc<RefCell<Mine>>,
    dock: Option<Rc<RefCell<Dock>>>,
    pile: Pile,
    prepped: bool,
    entered: bool,
    done: bool,
    tymth: Option<Tymth>,
}

impl Boxer {
    /// Creates an empty boxer with a fresh mine.
    pub fn new(name: &str) -> Result<Self> {
        validate_name(name)?;
        Ok(Self {
            name: name.to_string(),
            boxes: Vec::new(),
            names: HashMap::new(),
            acts: HashSet::new(),
            first: None,
            mine: Rc::new(RefCell::new(Mine::new())),
            dock: None,
            pile: Pile::new(),
            prepped: false,
            entered: false,
            done: false,
            tymth: None,
        })
    }

    /// Shares an existing mine instead of the fresh one.
    pub fn with_mine(mut self, mine: Rc<RefCell<Mine>>) -> Self {
        self.mine = mine;
        self
    }

    /// Binds a durable dock alongside the mine.
    pub fn with_dock(mut self, dock: Rc<RefCell<Dock>>) -> Self {
        self.dock = Some(dock);
        self
    }

    /// The boxer name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The shared mine.
    pub fn mine(&self) -> Rc<RefCell<Mine>> {
        Rc::clone(&self.mine)
    }

    /// The bound dock, if any.
    pub fn dock(&self) -> Option<Rc<RefCell<Dock>>> {
        self.dock.clone()
    }

    /// Number of boxes.
    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    /// True when no boxes have been grown.
    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    /// The node for an id.
    pub fn node(&self, id: BoxId) -> &BoxNode {
        &self.boxes[id]
    }

    /// Looks a box up by name.
    pub fn find(&self, name: &str) -> Option<BoxId> {
        self.names.get(name).copied()
    }

    /// The designated first box.
    pub fn first(&self) -> Option<BoxId> {
        self.first
    }

    /// The current active pile, root to leaf; empty before entry.
    pub fn pile(&self) -> &[BoxId] {
        &self.pile
    }

    /// The active leaf box, once entered.
    pub fn cur(&self) -> Option<BoxId> {
        self.pile.last().copied()
    }

    /// True once a terminal act has fired.
    pub fn done(&self) -> bool {
        self.done
    }

    /// Adds a box under `over` (or at top level), returning its id.
    ///
    /// The name must be a fresh identifier; the over, when given, must
    /// already exist, which keeps the containment relation acyclic by
    /// construction.
    pub fn grow(&mut self, name: &str, over: Option<BoxId>) -> Result<BoxId> {
        validate_name(name)?;
        if self.names.contains_key(name) {
            return Err(Error::Validation(format!("non-unique box name {name:?}")));
        }
        if over.is_some_and(|over| over >= self.boxes.len()) {
            return Err(Error::Hierarchy(format!("box {name:?} grown under unknown over")));
        }
        let id = self.boxes.len();
        self.boxes.push(BoxNode::new(name.to_string(), over));
        self.names.insert(name.to_string(), id);
        if let Some(over) = over {
            self.boxes[over].unders.push(id);
        }
        if self.first.is_none() && over.is_none() {
            self.first = Some(id);
        }
        Ok(id)
    }

    /// Designates the first box entered.
    pub fn set_first(&mut self, id: BoxId) {
        self.first = Some(id);
    }

    /// Records the lexical successor of a box.
    pub(super) fn link_next(&mut self, prior: BoxId, next: BoxId) {
        self.boxes[prior].next = Some(next);
    }

    /// True when an act instance name is already registered.
    pub fn has_act(&self, name: &str) -> bool {
        self.acts.contains(name)
    }

    /// Appends an act to a box, filed under the act's own context.
    ///
    /// Act instance names form a registry per boxer; duplicates are
    /// validation errors.
    pub fn add_act(&mut self, id: BoxId, act: Box<dyn Act>) -> Result<()> {
        if !self.acts.insert(act.name().to_string()) {
            return Err(Error::Validation(format!(
                "non-unique act name {:?}",
                act.name()
            )));
        }
        let context = act.context();
        self.boxes[id].acts_mut(context).push(act);
        Ok(())
    }

    /// Resolves every deferred act reference against the finished tree.
    pub(super) fn resolve(&mut self) -> Result<()> {
        let Boxer { boxes, names, .. } = self;
        for node in boxes.iter_mut() {
            let scope = Scope { names, next: node.next };
            for context in Context::ALL {
                for act in node.acts_mut(context).iter_mut() {
                    act.resolve(&scope)?;
                }
            }
        }
        Ok(())
    }

    /// The canonical pile of a box: its over chain extended down the first
    /// unders.
    pub fn pile_of(&self, id: BoxId) -> Pile {
        let mut pile = Pile::new();
        let mut at = id;
        pile.push(at);
        while let Some(over) = self.boxes[at].over {
            pile.push(over);
            at = over;
        }
        pile.reverse();
        let mut at = id;
        while let Some(&under) = self.boxes[at].unders.first() {
            pile.push(under);
            at = under;
        }
        pile
    }

    /// The `a<b<c>d` rendering of a box's position in its pile.
    pub fn trail(&self, id: BoxId) -> String {
        let pile = self.pile_of(id);
        let spot = pile.iter().position(|&b| b == id).unwrap_or(0);
        let mut trail = String::new();
        for &over in &pile[..spot] {
            trail.push_str(self.boxes[over].name());
            trail.push('<');
        }
        if spot == 0 {
            trail.push('<');
        }
        trail.push_str(self.boxes[id].name());
        trail.push('>');
        let mut follow = pile[spot + 1..].iter();
        if let Some(&under) = follow.next() {
            trail.push_str(self.boxes[under].name());
            for &under in follow {
                trail.push('>');
                trail.push_str(self.boxes[under].name());
            }
        }
        trail
    }

    /// The four-way transition split from `near` to `far`.
    ///
    /// Returns `(exits, enters, rexits, renters)`: exits and rexits
    /// partition the old pile leaf first, enters and renters partition the
    /// new pile root first, and the rexit boxes equal the renter boxes (the
    /// retained common ancestors).
    pub fn exen(
        &self,
        near: BoxId,
        far: BoxId,
    ) -> (Vec<BoxId>, Vec<BoxId>, Vec<BoxId>, Vec<BoxId>) {
        let pn = self.pile_of(near);
        let pf = self.pile_of(far);
        let depth = pf.iter().position(|&b| b == far).unwrap_or(0);
        let common = pn
            .iter()
            .zip(pf.iter())
            .take_while(|(a, b)| a == b)
            .count();
        // Re-enter the far box itself even when it already contains near.
        let split = common.min(depth);
        let exits = pn[split..].iter().rev().copied().collect();
        let enters = pf[split..].to_vec();
        let rexits = pn[..split].iter().rev().copied().collect();
        let renters = pf[..split].to_vec();
        (exits, enters, rexits, renters)
    }

    fn run_acts(&mut self, id: BoxId, context: Context, tyme: f64) -> Result<Acted> {
        let Boxer { boxes, mine, dock, .. } = self;
        let mut mine = mine.borrow_mut();
        let mut dockref = dock.as_ref().map(|dock| dock.borrow_mut());
        let mut scene = Scene {
            mine: &mut mine,
            dock: dockref.as_deref_mut(),
            tyme,
        };
        for act in boxes[id].acts_mut(context).iter_mut() {
            match act.act(&mut scene)? {
                Acted::None => {}
                acted => return Ok(acted),
            }
        }
        Ok(Acted::None)
    }

    /// Runs a non-transit context, absorbing a terminal act into `done`.
    fn run_plain(&mut self, id: BoxId, context: Context, tyme: f64) -> Result<()> {
        match self.run_acts(id, context, tyme)? {
            Acted::None => Ok(()),
            Acted::End => {
                info!(boxer = %self.name, cur = %self.boxes[id].name, "boxer ended");
                self.done = true;
                Ok(())
            }
            Acted::Go(_) => Err(Error::Hierarchy(format!(
                "transition fired outside tract context in box {:?}",
                self.boxes[id].name
            ))),
        }
    }

    /// Runs every pre act once, in definition order.
    pub fn prep(&mut self, tyme: f64) -> Result<()> {
        if self.prepped {
            return Ok(());
        }
        for id in 0..self.boxes.len() {
            self.run_plain(id, Context::Pre, tyme)?;
        }
        self.prepped = true;
        Ok(())
    }

    fn enter_box(&mut self, id: BoxId, tyme: f64) -> Result<()> {
        self.run_plain(id, Context::Be, tyme)?;
        self.run_plain(id, Context::Ene, tyme)
    }

    fn transit(&mut self, far: BoxId, tyme: f64) -> Result<()> {
        let near = self
            .cur()
            .ok_or_else(|| Error::Hierarchy("transit before entry".into()))?;
        debug!(boxer = %self.name, from = %self.boxes[near].name, to = %self.boxes[far].name,
               "transition");
        let (exits, enters, rexits, renters) = self.exen(near, far);
        for &id in &exits {
            self.run_plain(id, Context::Exa, tyme)?;
        }
        for &id in &rexits {
            self.run_plain(id, Context::Rexa, tyme)?;
        }
        for &id in &renters {
            self.run_plain(id, Context::Rene, tyme)?;
        }
        for &id in &enters {
            self.enter_box(id, tyme)?;
        }
        self.pile = self.pile_of(far);
        Ok(())
    }

    /// One boxer cycle at `tyme`; returns true once done.
    ///
    /// The first cycle preps and enters the first pile, then every cycle
    /// runs recur acts in pile order and transit guards leaf to root; the
    /// first guard that fires selects this cycle's transition.
    pub fn recur(&mut self, tyme: f64) -> Result<bool> {
        if self.done {
            return Ok(true);
        }
        if !self.entered {
            self.prep(tyme)?;
            let first = self
                .first
                .ok_or_else(|| Error::Hierarchy(format!("boxer {:?} has no first box", self.name)))?;
            self.pile = self.pile_of(first);
            info!(boxer = %self.name, pile = %self.trail(first), "boxer entering");
            for id in self.pile.clone() {
                self.enter_box(id, tyme)?;
            }
            self.entered = true;
            if self.done {
                return Ok(true);
            }
        }

        for id in self.pile.clone() {
            self.run_plain(id, Context::Re, tyme)?;
            if self.done {
                return Ok(true);
            }
        }

        let mut go = None;
        for id in self.pile.clone().into_iter().rev() {
            match self.run_acts(id, Context::Tract, tyme)? {
                Acted::None => {}
                Acted::Go(dest) => {
                    go = Some(dest);
                    break;
                }
                Acted::End => {
                    self.done = true;
                    return Ok(true);
                }
            }
        }
        if let Some(far) = go {
            self.transit(far, tyme)?;
        }
        Ok(self.done)
    }

    /// Wraps this boxer as a doer for a doist.
    pub fn into_doer(self) -> BoxerDoer {
        BoxerDoer { boxer: self, tock: 0.0 }
    }
}

impl Tymee for Boxer {
    fn wind(&mut self, tymth: Tymth) {
        self.mine.borrow_mut().wind(tymth.clone());
        if let Some(dock) = self.dock.as_ref() {
            dock.borrow_mut().wind(tymth.clone());
        }
        self.tymth = Some(tymth);
    }

    fn tyme(&self) -> Option<f64> {
        self.tymth.as_ref().map(|tymth| tymth())
    }
}

/// A boxer scheduled as a doer.
pub struct BoxerDoer {
    boxer: Boxer,
    tock: f64,
}

impl BoxerDoer {
    /// Sets the doer's tock within its doist.
    pub fn with_tock(mut self, tock: f64) -> Self {
        self.tock = tock.max(0.0);
        self
    }

    /// The wrapped boxer.
    pub fn boxer(&self) -> &Boxer {
        &self.boxer
    }
}

impl Doer for BoxerDoer {
    fn wind(&mut self, tymth: Tymth) {
        self.boxer.wind(tymth);
    }

    fn tock(&self) -> f64 {
        self.tock
    }

    fn recur(&mut self, tyme: f64) -> Result<bool> {
        self.boxer.recur(tyme)
    }

    fn done(&self) -> bool {
        self.boxer.done()
    }
}
