//! Actions run inside box contexts.
//!
//! Every act carries an explicit [`Context`] naming the lifecycle slot it
//! runs in, and a name unique within its boxer's instance registry. The
//! decorator metaprogramming of old is replaced by a static constructor
//! table: a [`Registry`] maps act kind names to plain functions forming
//! boxed acts from declarative [`Spec`]s.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::{Error, Result};

use super::bagging::{tokey, validate_name, Dock, Mine, Val};
use super::boxing::BoxId;
use super::needing::Need;

/// The eight action contexts of a box, in lifecycle order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Context {
    /// Once, before the boxer starts.
    Pre,
    /// On any entry that changes the pile, before `Ene`.
    Be,
    /// When a transition re-enters a still-contained ancestor.
    Rene,
    /// On first entry.
    Ene,
    /// Every cycle while on the active pile.
    Re,
    /// Transition guards, evaluated leaf to root each cycle.
    Tract,
    /// On leaving the box.
    Exa,
    /// When an ancestor re-exits a still-contained box.
    Rexa,
}

impl Context {
    /// All contexts in lifecycle order.
    pub const ALL: [Context; 8] = [
        Context::Pre,
        Context::Be,
        Context::Rene,
        Context::Ene,
        Context::Re,
        Context::Tract,
        Context::Exa,
        Context::Rexa,
    ];

    /// The short context name used in keys and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Context::Pre => "pre",
            Context::Be => "be",
            Context::Rene => "rene",
            Context::Ene => "ene",
            Context::Re => "re",
            Context::Tract => "tract",
            Context::Exa => "exa",
            Context::Rexa => "rexa",
        }
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an act sees when it runs: the shared cells and the current tyme.
pub struct Scene<'a> {
    /// The boxer's process-local cells.
    pub mine: &'a mut Mine,
    /// The boxer's durable cells, when bound.
    pub dock: Option<&'a mut Dock>,
    /// The tyme of the running cycle.
    pub tyme: f64,
}

/// The outcome of one act.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acted {
    /// Nothing to report.
    None,
    /// A transition fired toward the given box.
    Go(BoxId),
    /// The terminal act fired; the boxer is done.
    End,
}

/// A transition destination, resolved to a box id at validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Dest {
    /// The lexically next box of the box holding the tract.
    Next,
    /// A box referenced by name, resolvable forward.
    Name(String),
    /// A resolved box.
    Id(BoxId),
}

/// Name resolution offered to acts at validation.
pub struct Scope<'a> {
    /// Box ids by name.
    pub names: &'a HashMap<String, BoxId>,
    /// The lexically next box of the holding box, if any.
    pub next: Option<BoxId>,
}

/// A named unit of behavior run inside a box context.
pub trait Act {
    /// The unique instance name.
    fn name(&self) -> &str;

    /// The explicit context this act runs in.
    fn context(&self) -> Context;

    /// Runs the act against the scene.
    fn act(&mut self, scene: &mut Scene) -> Result<Acted>;

    /// Resolves deferred references at validation; default is nothing.
    fn resolve(&mut self, _scope: &Scope) -> Result<()> {
        Ok(())
    }
}

/// An act wrapping an arbitrary closure over the scene.
pub struct Deed {
    name: String,
    context: Context,
    call: Box<dyn FnMut(&mut Scene) -> Result<()>>,
}

impl Deed {
    /// Wraps a closure as an act.
    pub fn new(
        name: impl Into<String>,
        context: Context,
        call: impl FnMut(&mut Scene) -> Result<()> + 'static,
    ) -> Self {
        Self { name: name.into(), context, call: Box::new(call) }
    }
}

impl Act for Deed {
    fn name(&self) -> &str {
        &self.name
    }

    fn context(&self) -> Context {
        self.context
    }

    fn act(&mut self, scene: &mut Scene) -> Result<Acted> {
        (self.call)(scene)?;
        Ok(Acted::None)
    }
}

/// An act writing a literal value into a mine key.
pub struct Poke {
    name: String,
    context: Context,
    key: String,
    val: Val,
}

impl Poke {
    /// Creates a poke of `key` with `val`.
    pub fn new(
        name: impl Into<String>,
        context: Context,
        key: impl Into<String>,
        val: impl Into<Val>,
    ) -> Self {
        Self { name: name.into(), context, key: key.into(), val: val.into() }
    }
}

impl Act for Poke {
    fn name(&self) -> &str {
        &self.name
    }

    fn context(&self) -> Context {
        self.context
    }

    fn act(&mut self, scene: &mut Scene) -> Result<Acted> {
        scene.mine.put(&self.key, self.val.clone())?;
        Ok(Acted::None)
    }
}

/// A guarded transition toward a destination box.
///
/// The need evaluates without side effects; the first tract whose need holds
/// ends the cycle with a transition. An unresolved destination at act tyme
/// is a hierarchy error.
pub struct Tract {
    name: String,
    dest: Dest,
    need: Need,
}

impl Tract {
    /// Creates a guarded transition.
    pub fn new(name: impl Into<String>, dest: Dest, need: Need) -> Self {
        Self { name: name.into(), dest, need }
    }

    /// The destination, as currently resolved.
    pub fn dest(&self) -> &Dest {
        &self.dest
    }

    /// The guard.
    pub fn need(&self) -> &Need {
        &self.need
    }
}

impl Act for Tract {
    fn name(&self) -> &str {
        &self.name
    }

    fn context(&self) -> Context {
        Context::Tract
    }

    fn act(&mut self, scene: &mut Scene) -> Result<Acted> {
        if !self.need.eval(scene.mine, scene.dock.as_deref()) {
            return Ok(Acted::None);
        }
        match self.dest {
            Dest::Id(id) => Ok(Acted::Go(id)),
            ref dest => Err(Error::Hierarchy(format!("unresolved dest {dest:?}"))),
        }
    }

    fn resolve(&mut self, scope: &Scope) -> Result<()> {
        match &self.dest {
            Dest::Id(_) => Ok(()),
            Dest::Next => {
                let next = scope
                    .next
                    .ok_or_else(|| Error::Hierarchy(format!("{}: no lexical next", self.name)))?;
                self.dest = Dest::Id(next);
                Ok(())
            }
            Dest::Name(name) => {
                let id = scope.names.get(name).copied().ok_or_else(|| {
                    Error::Hierarchy(format!("{}: unresolved dest {name:?}", self.name))
                })?;
                self.dest = Dest::Id(id);
                Ok(())
            }
        }
    }
}

/// The terminal act: flags its boxer done.
///
/// Configured with the explicit boxer name; firing writes
/// `boxer.<name>.end` into the mine and reports [`Acted::End`].
pub struct End {
    name: String,
    context: Context,
    boxer: String,
}

impl End {
    /// Creates a terminal act for the named boxer.
    pub fn new(name: impl Into<String>, context: Context, boxer: impl Into<String>) -> Self {
        Self { name: name.into(), context, boxer: boxer.into() }
    }
}

impl Act for End {
    fn name(&self) -> &str {
        &self.name
    }

    fn context(&self) -> Context {
        self.context
    }

    fn act(&mut self, scene: &mut Scene) -> Result<Acted> {
        let key = tokey(&["boxer", &self.boxer, "end"]);
        scene.mine.put(&key, true)?;
        Ok(Acted::End)
    }
}

/// A declarative description of one act instance.
///
/// The name is assigned by the builder and unique per boxer; the iops carry
/// kind-specific input-output parameters.
#[derive(Clone, Debug, Default)]
pub struct Spec {
    /// Unique instance name.
    pub name: String,
    /// Explicit context; kinds with a fixed context may ignore it.
    pub context: Option<Context>,
    /// Kind-specific parameters.
    pub iops: BTreeMap<String, Val>,
}

impl Spec {
    fn text(&self, key: &str) -> Result<&str> {
        match self.iops.get(key) {
            Some(Val::Text(s)) => Ok(s),
            Some(other) => Err(Error::Validation(format!(
                "act {}: iop {key:?} must be text, got {other:?}",
                self.name
            ))),
            None => Err(Error::Validation(format!(
                "act {}: missing iop {key:?}",
                self.name
            ))),
        }
    }

    fn val(&self, key: &str) -> Result<&Val> {
        self.iops
            .get(key)
            .ok_or_else(|| Error::Validation(format!("act {}: missing iop {key:?}", self.name)))
    }
}

/// A constructor forming a boxed act from a spec.
pub type Former = fn(Spec) -> Result<Box<dyn Act>>;

/// The static table of act constructors, keyed by kind name.
///
/// Initialized once at startup with [`Registry::standard`]; kinds register
/// exactly once.
pub struct Registry {
    kinds: BTreeMap<&'static str, Former>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self { kinds: BTreeMap::new() }
    }

    /// The standard table: `poke`, `tract`, `end`.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register("poke", form_poke).expect("fresh registry");
        registry.register("tract", form_tract).expect("fresh registry");
        registry.register("end", form_end).expect("fresh registry");
        registry
    }

    /// Adds a kind; registering a duplicate name is a validation error.
    pub fn register(&mut self, kind: &'static str, former: Former) -> Result<()> {
        validate_name(kind)?;
        if self.kinds.insert(kind, former).is_some() {
            return Err(Error::Validation(format!("act kind {kind:?} already registered")));
        }
        Ok(())
    }

    /// Forms an act of the given kind from a spec.
    pub fn form(&self, kind: &str, spec: Spec) -> Result<Box<dyn Act>> {
        validate_name(&spec.name)?;
        let former = self
            .kinds
            .get(kind)
            .ok_or_else(|| Error::Validation(format!("unknown act kind {kind:?}")))?;
        former(spec)
    }

    /// True when a kind is registered.
    pub fn contains(&self, kind: &str) -> bool {
        self.kinds.contains_key(kind)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::standard()
    }
}

fn form_poke(spec: Spec) -> Result<Box<dyn Act>> {
    let key = spec.text("key")?.to_string();
    let val = spec.val("val")?.clone();
    let context = spec.context.unwrap_or(Context::Ene);
    Ok(Box::new(Poke::new(spec.name, context, key, val)))
}

fn form_tract(spec: Spec) -> Result<Box<dyn Act>> {
    let dest = match spec.text("dest")? {
        "next" => Dest::Next,
        name => {
            validate_name(name)?;
            Dest::Name(name.to_string())
        }
    };
    let need = Need::new(spec.text("need").unwrap_or_default())?;
    Ok(Box::new(Tract::new(spec.name, dest, need)))
}

fn form_end(spec: Spec) -> Result<Box<dyn Act>> {
    let boxer = spec.text("boxer")?.to_string();
    validate_name(&boxer)?;
    let context = spec.context.unwrap_or(Context::Ene);
    Ok(Box::new(End::new(spec.name, context, boxer)))
}
