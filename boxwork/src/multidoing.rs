//! Boss and crew: multiprocess coordination over a unix-domain control
//! channel.
//!
//! A [`BossDoer`] spawns one subprocess per [`Load`] and publishes its own
//! UXD path to each child through the environment. Each child runs its own
//! doist whose first doer is a [`CrewDoer`]; the processes share nothing,
//! and all coordination is by memo over UXD. The boss completes once every
//! child has exited.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use boxwork_memo::TymeeMemoer;
use boxwork_peer::uxd;
use boxwork_tyme::{Tymee, Tymth};

use crate::doing::{Doer, Doist};
use crate::hier::validate_name;
use crate::{Error, Result};

/// Environment variable carrying the boss's UXD path to each child.
pub const BOSS_PATH_ENV: &str = "BOXWORK_BOSS_PATH";

/// Environment variable carrying the crew hand's name to its process.
pub const CREW_NAME_ENV: &str = "BOXWORK_CREW_NAME";

/// Environment variable carrying the serialized [`Load`] to its process.
pub const CREW_LOAD_ENV: &str = "BOXWORK_CREW_LOAD";

fn default_real() -> bool {
    true
}

/// Everything a boss needs to spin up one crew hand.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Load {
    /// Unique crew hand name, used for its socket and its resources.
    pub name: String,
    /// The child doist's tock; zero means as fast as possible.
    #[serde(default)]
    pub tock: f64,
    /// Whether the child doist tracks wall time.
    #[serde(default = "default_real")]
    pub real: bool,
    /// Tyme limit of the child doist; `None` runs until its doers finish.
    #[serde(default)]
    pub limit: Option<f64>,
    /// Program and arguments of the child process.
    pub command: Vec<String>,
}

/// A status memo exchanged between crew and boss, as JSON.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Status {
    /// The reporting crew hand.
    pub name: String,
    /// Its lifecycle status, e.g. `ready` or `done`.
    pub status: String,
}

/// The parent-side doer: spawns the crew and monitors it.
pub struct BossDoer {
    name: String,
    dir: PathBuf,
    loads: Vec<Load>,
    memoer: Option<TymeeMemoer<uxd::Peer>>,
    crew: BTreeMap<String, Child>,
    statuses: BTreeMap<String, String>,
    tymth: Option<Tymth>,
    tock: f64,
}

impl BossDoer {
    /// Creates a boss managing the given loads, socketed under `dir`.
    pub fn new(name: &str, dir: impl Into<PathBuf>, loads: Vec<Load>) -> Result<Self> {
        validate_name(name)?;
        Ok(Self {
            name: name.to_string(),
            dir: dir.into(),
            loads,
            memoer: None,
            crew: BTreeMap::new(),
            statuses: BTreeMap::new(),
            tymth: None,
            tock: 0.0,
        })
    }

    /// Sets the doer's tock within its doist.
    pub fn with_tock(mut self, tock: f64) -> Self {
        self.tock = tock.max(0.0);
        self
    }

    /// The boss's UXD path, published to every child.
    pub fn path(&self) -> PathBuf {
        self.dir.join(format!("{}.uxd", self.name))
    }

    /// Latest status reported by each crew hand.
    pub fn statuses(&self) -> &BTreeMap<String, String> {
        &self.statuses
    }

    /// Names of crew hands still running.
    pub fn running(&self) -> Vec<&str> {
        self.crew.keys().map(String::as_str).collect()
    }

    fn reap(&mut self) {
        let mut exited = Vec::new();
        for (name, child) in self.crew.iter_mut() {
            match child.try_wait() {
                Ok(Some(code)) => {
                    info!(boss = %self.name, crew = %name, %code, "crew hand exited");
                    exited.push(name.clone());
                }
                Ok(None) => {}
                Err(err) => {
                    error!(boss = %self.name, crew = %name, %err, "crew hand unwaitable");
                    exited.push(name.clone());
                }
            }
        }
        for name in exited {
            self.crew.remove(&name);
        }
    }

    fn shutdown(&mut self) {
        for (name, child) in self.crew.iter_mut() {
            if let Err(err) = child.kill() {
                warn!(boss = %self.name, crew = %name, %err, "crew hand unkillable");
            }
            let _ = child.wait();
        }
        self.crew.clear();
        if let Some(memoer) = self.memoer.as_mut() {
            memoer.close();
        }
    }
}

impl Doer for BossDoer {
    fn wind(&mut self, tymth: Tymth) {
        self.tymth = Some(tymth);
    }

    fn tock(&self) -> f64 {
        self.tock
    }

    fn enter(&mut self) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let mut memoer = TymeeMemoer::new(uxd::Peer::new(self.path()));
        if let Some(tymth) = self.tymth.clone() {
            memoer.wind(tymth);
        }
        memoer.reopen()?;
        self.memoer = Some(memoer);
        info!(boss = %self.name, path = %self.path().display(), loads = self.loads.len(),
              "boss entering");

        for load in std::mem::take(&mut self.loads) {
            validate_name(&load.name)?;
            if self.crew.contains_key(&load.name) {
                return Err(Error::Validation(format!(
                    "non-unique crew name {:?}",
                    load.name
                )));
            }
            let Some((program, args)) = load.command.split_first() else {
                return Err(Error::Validation(format!(
                    "crew {:?} has an empty command",
                    load.name
                )));
            };
            let serialized = serde_json::to_string(&load)
                .map_err(|err| Error::Validation(format!("unserializable load: {err}")))?;
            let child = Command::new(program)
                .args(args)
                .env(BOSS_PATH_ENV, self.path())
                .env(CREW_NAME_ENV, &load.name)
                .env(CREW_LOAD_ENV, serialized)
                .stdin(Stdio::null())
                .spawn()?;
            info!(boss = %self.name, crew = %load.name, pid = child.id(), "crew hand spawned");
            self.crew.insert(load.name, child);
        }
        Ok(())
    }

    fn recur(&mut self, _tyme: f64) -> Result<bool> {
        if let Some(memoer) = self.memoer.as_mut() {
            memoer.service()?;
            while let Some((memo, src, _vid)) = memoer.take_memo() {
                match serde_json::from_slice::<Status>(&memo) {
                    Ok(status) => {
                        info!(boss = %self.name, crew = %status.name, status = %status.status,
                              "crew status");
                        self.statuses.insert(status.name, status.status);
                    }
                    Err(err) => {
                        warn!(boss = %self.name, src = %src.display(), %err,
                              "dropping unreadable crew memo");
                    }
                }
            }
        }
        self.reap();
        Ok(self.crew.is_empty())
    }

    fn exit(&mut self) {
        info!(boss = %self.name, "boss exiting");
        self.shutdown();
    }

    fn close(&mut self) {
        self.shutdown();
    }

    fn abort(&mut self, _err: &Error) {
        self.shutdown();
    }
}

/// The child-side doer: first doer of a crew hand's doist.
///
/// On enter it opens its own UXD peer next to the boss's and memos `ready`;
/// it memos `done` just before completing. The default work is a fixed
/// number of recurs, replaceable with [`with_work`](CrewDoer::with_work).
pub struct CrewDoer {
    name: String,
    boss: PathBuf,
    memoer: Option<TymeeMemoer<uxd::Peer>>,
    work: Box<dyn FnMut(f64) -> Result<bool>>,
    tymth: Option<Tymth>,
    count: usize,
}

impl CrewDoer {
    /// Creates a crew doer reporting to the boss at `boss`.
    pub fn new(name: &str, boss: impl Into<PathBuf>) -> Result<Self> {
        validate_name(name)?;
        let mut count = 0usize;
        Ok(Self {
            name: name.to_string(),
            boss: boss.into(),
            memoer: None,
            work: Box::new(move |_| {
                count += 1;
                Ok(count > 3)
            }),
            tymth: None,
            count: 0,
        })
    }

    /// Builds a crew doer from the environment a boss provides.
    pub fn from_env() -> Result<Self> {
        let name = std::env::var(CREW_NAME_ENV)
            .map_err(|_| Error::Validation(format!("missing {CREW_NAME_ENV}")))?;
        let boss = std::env::var(BOSS_PATH_ENV)
            .map_err(|_| Error::Validation(format!("missing {BOSS_PATH_ENV}")))?;
        Self::new(&name, boss)
    }

    /// Replaces the per-cycle work; returning `Ok(true)` finishes the hand.
    pub fn with_work(mut self, work: impl FnMut(f64) -> Result<bool> + 'static) -> Self {
        self.work = Box::new(work);
        self
    }

    /// The crew hand's own UXD path, a sibling of the boss's.
    pub fn path(&self) -> PathBuf {
        let dir = self.boss.parent().unwrap_or_else(|| Path::new("."));
        dir.join(format!("{}.uxd", self.name))
    }

    /// Recurs seen so far.
    pub fn count(&self) -> usize {
        self.count
    }

    fn report(&mut self, status: &str) -> Result<()> {
        let memo = serde_json::to_vec(&Status {
            name: self.name.clone(),
            status: status.to_string(),
        })
        .map_err(|err| Error::Validation(format!("unserializable status: {err}")))?;
        if let Some(memoer) = self.memoer.as_mut() {
            memoer.memoit(memo, self.boss.clone(), None)?;
            // Flush now so the boss hears even if this is the final cycle.
            memoer.service_tx_memos();
            memoer.service_tx_grams()?;
        }
        Ok(())
    }
}

impl Doer for CrewDoer {
    fn wind(&mut self, tymth: Tymth) {
        self.tymth = Some(tymth);
    }

    fn enter(&mut self) -> Result<()> {
        let mut memoer = TymeeMemoer::new(uxd::Peer::new(self.path()));
        if let Some(tymth) = self.tymth.clone() {
            memoer.wind(tymth);
        }
        memoer.reopen()?;
        self.memoer = Some(memoer);
        info!(crew = %self.name, boss = %self.boss.display(), "crew hand entering");
        self.report("ready")
    }

    fn recur(&mut self, tyme: f64) -> Result<bool> {
        if let Some(memoer) = self.memoer.as_mut() {
            memoer.service()?;
        }
        self.count += 1;
        if (self.work)(tyme)? {
            self.report("done")?;
            return Ok(true);
        }
        Ok(false)
    }

    fn exit(&mut self) {
        info!(crew = %self.name, count = self.count, "crew hand exiting");
        if let Some(memoer) = self.memoer.as_mut() {
            memoer.close();
        }
    }

    fn close(&mut self) {
        if let Some(memoer) = self.memoer.as_mut() {
            memoer.close();
        }
    }

    fn abort(&mut self, _err: &Error) {
        if let Some(memoer) = self.memoer.as_mut() {
            memoer.close();
        }
    }
}

/// Builds and runs a crew hand's doist from its load.
///
/// The child process main reads its environment, deserializes the load from
/// [`CREW_LOAD_ENV`], and hands it here; the crew doer is the doist's first
/// doer.
pub fn spinup(load: &Load, extra: Vec<Box<dyn Doer>>) -> Result<()> {
    let mut doist = Doist::new(load.tock).with_real(load.real);
    if let Some(limit) = load.limit {
        doist = doist.with_limit(limit);
    }
    let mut doers: Vec<Box<dyn Doer>> = vec![Box::new(CrewDoer::from_env()?)];
    doers.extend(extra);
    info!(crew = %load.name, "crew doist starting");
    doist.run(doers)
}
