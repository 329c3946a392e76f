//! Typed state cells addressable by dotted keys.
//!
//! A [`Bag`] is one value cell stamped with the tyme of its last assignment.
//! Bags live in a [`Mine`] (process-local) or a [`Dock`] (durable, one file
//! per key, atomic writes). Keys are `.`-joined identifier paths: every
//! component must match `[A-Za-z_][A-Za-z0-9_]*`.

use std::collections::btree_map;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use boxwork_tyme::{Tymee, Tymth};

use crate::{Error, Result};

/// The identifier pattern every key component and every name must match.
pub static REAT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static pattern"));

/// Validates a single name against the identifier pattern.
pub fn validate_name(name: &str) -> Result<()> {
    if REAT.is_match(name) {
        Ok(())
    } else {
        Err(Error::Validation(format!("invalid name {name:?}")))
    }
}

/// Validates a dotted key: non-empty, every component an identifier.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::Validation("empty key".into()));
    }
    for part in key.split('.') {
        validate_name(part)?;
    }
    Ok(())
}

/// Joins path components into a dotted key.
pub fn tokey(parts: &[&str]) -> String {
    parts.join(".")
}

/// Splits a dotted key back into its components.
pub fn tokeys(key: &str) -> Vec<&str> {
    key.split('.').collect()
}

/// A self-describing scalar value.
///
/// Numeric kinds compare across each other, so a guard written against an
/// integer still fires when the cell holds a float of equal magnitude.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Val {
    /// The absent value.
    Null,
    /// A boolean.
    Bool(bool),
    /// A signed integer.
    Int(i64),
    /// A float.
    Real(f64),
    /// A string.
    Text(String),
}

impl Val {
    /// Numeric view, when the value is numeric.
    fn num(&self) -> Option<f64> {
        match self {
            Val::Int(n) => Some(*n as f64),
            Val::Real(x) => Some(*x),
            _ => None,
        }
    }

    /// Boolean interpretation: null, zero and empty text are false.
    pub fn truthy(&self) -> bool {
        match self {
            Val::Null => false,
            Val::Bool(b) => *b,
            Val::Int(n) => *n != 0,
            Val::Real(x) => *x != 0.0,
            Val::Text(s) => !s.is_empty(),
        }
    }
}

impl PartialEq for Val {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Val::Null, Val::Null) => true,
            (Val::Bool(a), Val::Bool(b)) => a == b,
            (Val::Text(a), Val::Text(b)) => a == b,
            _ => match (self.num(), other.num()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }
}

impl PartialOrd for Val {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        match (self, other) {
            (Val::Bool(a), Val::Bool(b)) => a.partial_cmp(b),
            (Val::Text(a), Val::Text(b)) => a.partial_cmp(b),
            _ => match (self.num(), other.num()) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => None,
            },
        }
    }
}

impl From<bool> for Val {
    fn from(b: bool) -> Self {
        Val::Bool(b)
    }
}

impl From<i64> for Val {
    fn from(n: i64) -> Self {
        Val::Int(n)
    }
}

impl From<f64> for Val {
    fn from(x: f64) -> Self {
        Val::Real(x)
    }
}

impl From<&str> for Val {
    fn from(s: &str) -> Self {
        Val::Text(s.to_string())
    }
}

impl From<String> for Val {
    fn from(s: String) -> Self {
        Val::Text(s)
    }
}

/// One value cell with the tyme of its last assignment.
///
/// Equality is by value alone; the stamp is bookkeeping.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Bag {
    value: Val,
    tyme: Option<f64>,
}

impl Bag {
    /// Creates an unstamped bag.
    pub fn new(value: impl Into<Val>) -> Self {
        Self { value: value.into(), tyme: None }
    }

    /// The held value.
    pub fn value(&self) -> &Val {
        &self.value
    }

    /// The tyme of last assignment, when stamped.
    pub fn tyme(&self) -> Option<f64> {
        self.tyme
    }
}

impl PartialEq for Bag {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

/// The process-local dotted-key map of bags.
///
/// Shared read/write between the boxes of a boxer; the single-threaded
/// scheduler makes writes visible to later actions in the same cycle without
/// locking. When wound, each write stamps the current tyme into the bag.
#[derive(Default)]
pub struct Mine {
    bags: BTreeMap<String, Bag>,
    tymth: Option<Tymth>,
}

impl Mine {
    /// Creates an empty mine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns `value` at `key`, stamping the current tyme when wound.
    pub fn put(&mut self, key: &str, value: impl Into<Val>) -> Result<()> {
        validate_key(key)?;
        let tyme = self.tymth.as_ref().map(|tymth| tymth());
        self.bags
            .insert(key.to_string(), Bag { value: value.into(), tyme });
        Ok(())
    }

    /// The bag at `key`, if any.
    pub fn get(&self, key: &str) -> Option<&Bag> {
        self.bags.get(key)
    }

    /// The value at `key`, if any.
    pub fn val(&self, key: &str) -> Option<&Val> {
        self.bags.get(key).map(Bag::value)
    }

    /// Removes and returns the bag at `key`.
    pub fn remove(&mut self, key: &str) -> Option<Bag> {
        self.bags.remove(key)
    }

    /// True when a bag exists at `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.bags.contains_key(key)
    }

    /// Number of bags.
    pub fn len(&self) -> usize {
        self.bags.len()
    }

    /// True when no bags are held.
    pub fn is_empty(&self) -> bool {
        self.bags.is_empty()
    }

    /// Iterates bags in key order.
    pub fn iter(&self) -> btree_map::Iter<'_, String, Bag> {
        self.bags.iter()
    }
}

impl Tymee for Mine {
    fn wind(&mut self, tymth: Tymth) {
        self.tymth = Some(tymth);
    }

    fn tyme(&self) -> Option<f64> {
        self.tymth.as_ref().map(|tymth| tymth())
    }
}

/// The durable dotted-key map of bags.
///
/// Each key lives in its own JSON file under the dock directory; a write
/// lands in a temporary file and renames over the old one, so it is durable
/// on return and atomic per key. Existing files load at open.
pub struct Dock {
    dirpath: PathBuf,
    bags: BTreeMap<String, Bag>,
    tymth: Option<Tymth>,
}

impl Dock {
    /// Opens (creating if needed) a dock at `dirpath` and loads its bags.
    pub fn open(dirpath: impl Into<PathBuf>) -> Result<Self> {
        let dirpath = dirpath.into();
        fs::create_dir_all(&dirpath)?;
        let mut bags = BTreeMap::new();
        for entry in fs::read_dir(&dirpath)? {
            let path = entry?.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let Some(key) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            if validate_key(key).is_err() {
                continue;
            }
            let text = fs::read_to_string(&path)?;
            let bag = serde_json::from_str(&text)
                .map_err(|err| Error::Validation(format!("unreadable bag {key:?}: {err}")))?;
            bags.insert(key.to_string(), bag);
        }
        Ok(Self { dirpath, bags, tymth: None })
    }

    /// The backing directory.
    pub fn dirpath(&self) -> &Path {
        &self.dirpath
    }

    /// Assigns `value` at `key`; durable once this returns.
    pub fn put(&mut self, key: &str, value: impl Into<Val>) -> Result<()> {
        validate_key(key)?;
        let tyme = self.tymth.as_ref().map(|tymth| tymth());
        let bag = Bag { value: value.into(), tyme };
        let text = serde_json::to_string(&bag)
            .map_err(|err| Error::Validation(format!("unwritable bag {key:?}: {err}")))?;
        let path = self.dirpath.join(format!("{key}.json"));
        let tmp = self.dirpath.join(format!("{key}.json.tmp"));
        fs::write(&tmp, text)?;
        fs::rename(&tmp, &path)?;
        self.bags.insert(key.to_string(), bag);
        Ok(())
    }

    /// The bag at `key`, if any.
    pub fn get(&self, key: &str) -> Option<&Bag> {
        self.bags.get(key)
    }

    /// The value at `key`, if any.
    pub fn val(&self, key: &str) -> Option<&Val> {
        self.bags.get(key).map(Bag::value)
    }

    /// Removes the bag at `key`, deleting its file.
    pub fn remove(&mut self, key: &str) -> Result<Option<Bag>> {
        let bag = self.bags.remove(key);
        if bag.is_some() {
            fs::remove_file(self.dirpath.join(format!("{key}.json")))?;
        }
        Ok(bag)
    }

    /// True when a bag exists at `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.bags.contains_key(key)
    }

    /// Number of bags.
    pub fn len(&self) -> usize {
        self.bags.len()
    }

    /// True when no bags are held.
    pub fn is_empty(&self) -> bool {
        self.bags.is_empty()
    }
}

impl Tymee for Dock {
    fn wind(&mut self, tymth: Tymth) {
        self.tymth = Some(tymth);
    }

    fn tyme(&self) -> Option<f64> {
        self.tymth.as_ref().map(|tymth| tymth())
    }
}
