//! Lexical construction of box works.
//!
//! A [`Maker`] turns an imperative description into a validated box tree:
//! the description closure calls [`be`](Maker::be) to open boxes and the
//! act verbs ([`deed`](Maker::deed), [`poke`](Maker::poke),
//! [`tract`](Maker::tract), [`end`](Maker::end)) to append actions to the
//! box currently being built. [`finish`](Maker::finish) validates the tree
//! (names unique and well formed, every referenced destination resolvable,
//! a first box designated) and releases the boxer.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::{Error, Result};

use super::acting::{Act, Context, Former, Registry, Spec};
use super::bagging::{Dock, Mine, Val};
use super::boxing::{BoxId, Boxer};

/// Where a new box hangs in the containment tree.
#[derive(Clone, Copy, Debug)]
pub enum Over<'a> {
    /// A top-level box.
    Top,
    /// Same level as the box before it: reuse the current over.
    Same,
    /// Under the named, earlier-defined box.
    Name(&'a str),
    /// Under the given box.
    Id(BoxId),
}

/// The lexical builder for one boxer.
///
/// The maker tracks a building cursor: the box most recently opened, the
/// current over, the default-name counter, and the active context that act
/// verbs append into (reset to `Ene` whenever a new box opens).
pub struct Maker {
    boxer: Boxer,
    registry: Registry,
    cur: Option<BoxId>,
    over: Option<BoxId>,
    bxpre: &'static str,
    bxidx: usize,
    counts: BTreeMap<String, usize>,
    context: Context,
}

impl Maker {
    /// Starts a maker for a boxer of the given name.
    pub fn new(name: &str) -> Result<Self> {
        Ok(Self {
            boxer: Boxer::new(name)?,
            registry: Registry::standard(),
            cur: None,
            over: None,
            bxpre: "box",
            bxidx: 0,
            counts: BTreeMap::new(),
            context: Context::Ene,
        })
    }

    /// Shares an existing mine with the boxer under construction.
    pub fn with_mine(mut self, mine: Rc<RefCell<Mine>>) -> Self {
        self.boxer = self.boxer.with_mine(mine);
        self
    }

    /// Binds a durable dock to the boxer under construction.
    pub fn with_dock(mut self, dock: Rc<RefCell<Dock>>) -> Self {
        self.boxer = self.boxer.with_dock(dock);
        self
    }

    /// Registers an additional act kind for [`form`](Maker::form).
    pub fn register(&mut self, kind: &'static str, former: Former) -> Result<()> {
        self.registry.register(kind, former)
    }

    /// Applies a description closure to this maker.
    pub fn make(&mut self, description: impl FnOnce(&mut Self) -> Result<()>) -> Result<()> {
        description(self)
    }

    /// The box currently being built.
    pub fn cur(&self) -> Option<BoxId> {
        self.cur
    }

    /// Opens a box and makes it current.
    ///
    /// With no name, a fresh `box<N>` name is generated. The over must be
    /// defined before any box that hangs under it.
    pub fn be(&mut self, name: Option<&str>, over: Over<'_>) -> Result<BoxId> {
        let over = match over {
            Over::Top => None,
            Over::Same => self.over,
            Over::Name(name) => Some(self.boxer.find(name).ok_or_else(|| {
                Error::Hierarchy(format!("under box defined before its over {name:?}"))
            })?),
            Over::Id(id) => Some(id),
        };
        let name = match name {
            Some(name) => name.to_string(),
            None => loop {
                let candidate = format!("{}{}", self.bxpre, self.bxidx);
                self.bxidx += 1;
                if self.boxer.find(&candidate).is_none() {
                    break candidate;
                }
            },
        };
        let id = self.boxer.grow(&name, over)?;
        if let Some(prior) = self.cur {
            self.boxer.link_next(prior, id);
        }
        self.over = over;
        self.cur = Some(id);
        self.context = Context::Ene;
        Ok(id)
    }

    /// Selects the context the act verbs append into.
    pub fn ctx(&mut self, context: Context) {
        self.context = context;
    }

    /// Designates the box entered first; defaults to the first top-level
    /// box.
    pub fn first(&mut self, name: &str) -> Result<()> {
        let id = self
            .boxer
            .find(name)
            .ok_or_else(|| Error::Hierarchy(format!("unknown first box {name:?}")))?;
        self.boxer.set_first(id);
        Ok(())
    }

    fn here(&self) -> Result<BoxId> {
        self.cur
            .ok_or_else(|| Error::Hierarchy("act before any box".into()))
    }

    fn next_name(&mut self, kind: &str) -> String {
        let prefix = capitalize(kind);
        loop {
            let index = self.counts.entry(prefix.clone()).or_insert(0);
            let candidate = format!("{prefix}{index}");
            *index += 1;
            if !self.boxer.has_act(&candidate) {
                return candidate;
            }
        }
    }

    /// Appends a ready-made act to the current box.
    pub fn act(&mut self, act: Box<dyn Act>) -> Result<()> {
        let here = self.here()?;
        self.boxer.add_act(here, act)
    }

    /// Forms an act of a registered kind from iops and appends it.
    pub fn form(&mut self, kind: &str, iops: BTreeMap<String, Val>) -> Result<()> {
        if !self.registry.contains(kind) {
            return Err(Error::Validation(format!("unknown act kind {kind:?}")));
        }
        let name = self.next_name(kind);
        let spec = Spec { name, context: Some(self.context), iops };
        let act = self.registry.form(kind, spec)?;
        self.act(act)
    }

    /// Appends a closure act in the active context.
    pub fn deed(
        &mut self,
        call: impl FnMut(&mut super::acting::Scene) -> Result<()> + 'static,
    ) -> Result<()> {
        let name = self.next_name("Deed");
        let act = super::acting::Deed::new(name, self.context, call);
        self.act(Box::new(act))
    }

    /// Appends a poke of `key` with `val` in the active context.
    pub fn poke(&mut self, key: &str, val: impl Into<Val>) -> Result<()> {
        let name = self.next_name("Poke");
        let act = super::acting::Poke::new(name, self.context, key, val);
        self.act(Box::new(act))
    }

    /// Appends a guarded transition; `dest` is a box name or `"next"`.
    ///
    /// Destinations resolve at [`finish`](Maker::finish), so forward
    /// references are fine.
    pub fn tract(&mut self, dest: &str, need: &str) -> Result<()> {
        let name = self.next_name("Tract");
        let spec = Spec {
            name,
            context: Some(Context::Tract),
            iops: BTreeMap::from([
                ("dest".to_string(), Val::Text(dest.to_string())),
                ("need".to_string(), Val::Text(need.to_string())),
            ]),
        };
        let act = self.registry.form("tract", spec)?;
        self.act(act)
    }

    /// Appends the terminal act, configured with this boxer's name.
    pub fn end(&mut self) -> Result<()> {
        let name = self.next_name("End");
        let spec = Spec {
            name,
            context: Some(self.context),
            iops: BTreeMap::from([(
                "boxer".to_string(),
                Val::Text(self.boxer.name().to_string()),
            )]),
        };
        let act = self.registry.form("end", spec)?;
        self.act(act)
    }

    /// Validates the built tree and releases the boxer.
    pub fn finish(mut self) -> Result<Boxer> {
        if self.boxer.is_empty() {
            return Err(Error::Validation(format!(
                "boxer {:?} built no boxes",
                self.boxer.name()
            )));
        }
        if self.boxer.first().is_none() {
            return Err(Error::Hierarchy(format!(
                "boxer {:?} has no top-level box",
                self.boxer.name()
            )));
        }
        self.boxer.resolve()?;
        Ok(self.boxer)
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
