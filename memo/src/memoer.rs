//! The memo service machine: queues, fragmentation, reassembly, delivery.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::ops::{Deref, DerefMut};

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, error, warn};

use boxwork_peer::Dgram;
use boxwork_tyme::{Tymee, Tymth};

use crate::gram::{self, Gram, GramDex, MAX_GRAM_SIZE, MAX_MEMO_SIZE};
use crate::MemoError;

/// Signs a memo payload for a verifier id, producing the opaque tail.
pub type Signer = Box<dyn Fn(&[u8], &str) -> String>;

/// Checks a reassembled memo against its verifier id and signature tail.
pub type Verifier = Box<dyn Fn(&[u8], &str, &str) -> bool>;

/// Delivery callback for reassembled memos: `(memo, source, vid)`.
pub type Handler<A> = Box<dyn FnMut(Vec<u8>, A, Option<String>)>;

const ALPHABET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

/// The placeholder signature tail used when no signer is installed.
fn vacuous_sig() -> String {
    "A".repeat(88)
}

/// Reassembly bookkeeping for one in-flight memo identifier.
pub struct Reassembly<A> {
    grams: BTreeMap<u32, Vec<u8>>,
    cnt: Option<u32>,
    src: A,
    vid: Option<String>,
    sig: Option<String>,
    tyme: Option<f64>,
}

impl<A> Reassembly<A> {
    /// The declared total gram count, once a neck gram has arrived.
    pub fn cnt(&self) -> Option<u32> {
        self.cnt
    }

    /// The source address established by the first gram.
    pub fn src(&self) -> &A {
        &self.src
    }

    /// Number of distinct fragments held so far.
    pub fn have(&self) -> usize {
        self.grams.len()
    }

    /// Fragment payload by number, for inspection.
    pub fn gram(&self, num: u32) -> Option<&[u8]> {
        self.grams.get(&num).map(Vec::as_slice)
    }

    fn complete(&self) -> bool {
        self.cnt.is_some_and(|cnt| self.grams.len() == cnt as usize)
    }
}

/// Fragmentation, framing, reassembly and delivery over a datagram peer.
///
/// The memoer never blocks: each `service_*` method moves whatever the
/// kernel will take this cycle and leaves the rest queued. [`service`]
/// aggregates the full pipeline and is what a scheduler calls once per
/// cycle.
///
/// [`service`]: Memoer::service
pub struct Memoer<P: Dgram> {
    peer: P,
    code: GramDex,
    size: usize,
    curt: bool,
    verific: bool,
    txms: VecDeque<(Vec<u8>, P::Addr, Option<String>)>,
    txgs: VecDeque<(Vec<u8>, P::Addr)>,
    txbs: Option<(Vec<u8>, P::Addr)>,
    rxgs: HashMap<String, Reassembly<P::Addr>>,
    order: Vec<String>,
    rxms: VecDeque<(Vec<u8>, P::Addr, Option<String>)>,
    handler: Option<Handler<P::Addr>>,
    signer: Option<Signer>,
    verifier: Option<Verifier>,
    tymth: Option<Tymth>,
    rng: SmallRng,
}

impl<P: Dgram> Memoer<P> {
    /// Creates a memoer over a peer with Basic framing at the maximum gram
    /// size.
    pub fn new(peer: P) -> Self {
        Self {
            peer,
            code: GramDex::Basic,
            size: MAX_GRAM_SIZE,
            curt: false,
            verific: false,
            txms: VecDeque::new(),
            txgs: VecDeque::new(),
            txbs: None,
            rxgs: HashMap::new(),
            order: Vec::new(),
            rxms: VecDeque::new(),
            handler: None,
            signer: None,
            verifier: None,
            tymth: None,
            rng: SmallRng::from_entropy(),
        }
    }

    /// Selects the framing code for outgoing memos.
    pub fn with_code(mut self, code: GramDex) -> Self {
        self.set_code(code);
        self
    }

    /// Bounds the gram size; clamped to `[overhead + 1, MAX_GRAM_SIZE]`.
    pub fn with_size(mut self, size: usize) -> Self {
        self.set_size(size);
        self
    }

    /// Emits gram headers in raw base2 rather than base64.
    pub fn with_curt(mut self, curt: bool) -> Self {
        self.curt = curt;
        self
    }

    /// Requires signed framing on inbound grams; unsigned grams are dropped.
    pub fn with_verific(mut self, verific: bool) -> Self {
        self.verific = verific;
        self
    }

    /// Installs the external signer producing the 88-character tail.
    pub fn with_signer(mut self, signer: Signer) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Installs the external verifier consulted at reassembly.
    pub fn with_verifier(mut self, verifier: Verifier) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Installs the delivery callback drained by [`service_rx_memos`].
    ///
    /// Without a handler, reassembled memos stay queued for [`take_memo`].
    ///
    /// [`service_rx_memos`]: Memoer::service_rx_memos
    /// [`take_memo`]: Memoer::take_memo
    pub fn with_handler(mut self, handler: Handler<P::Addr>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Replaces the framing code, re-clamping the gram size bound.
    pub fn set_code(&mut self, code: GramDex) {
        self.code = code;
        self.set_size(self.size);
    }

    /// Replaces the gram size bound, clamped to `[overhead + 1,
    /// MAX_GRAM_SIZE]`.
    pub fn set_size(&mut self, size: usize) {
        let z = self.code.sizage();
        self.size = size.clamp(z.hs + z.ns + 1, MAX_GRAM_SIZE);
    }

    /// Switches base2/base64 header emission.
    pub fn set_curt(&mut self, curt: bool) {
        self.curt = curt;
    }

    /// The framing code for outgoing memos.
    pub fn code(&self) -> GramDex {
        self.code
    }

    /// The clamped gram size bound.
    pub fn size(&self) -> usize {
        self.size
    }

    /// True when emitting base2 headers.
    pub fn curt(&self) -> bool {
        self.curt
    }

    /// True when unsigned inbound grams are dropped.
    pub fn verific(&self) -> bool {
        self.verific
    }

    /// The underlying peer.
    pub fn peer(&self) -> &P {
        &self.peer
    }

    /// The underlying peer, mutably.
    pub fn peer_mut(&mut self) -> &mut P {
        &mut self.peer
    }

    /// Opens the peer; see [`Dgram::open`].
    pub fn open(&mut self) -> Result<(), MemoError> {
        Ok(self.peer.open()?)
    }

    /// Cycles the peer; see [`Dgram::reopen`].
    pub fn reopen(&mut self) -> Result<(), MemoError> {
        Ok(self.peer.reopen()?)
    }

    /// Closes the peer.
    pub fn close(&mut self) {
        self.peer.close();
    }

    /// True while the peer is open.
    pub fn opened(&self) -> bool {
        self.peer.opened()
    }

    /// Queued outgoing memos not yet fragmented.
    pub fn txms(&self) -> &VecDeque<(Vec<u8>, P::Addr, Option<String>)> {
        &self.txms
    }

    /// Queued outgoing grams not yet handed to the peer.
    pub fn txgs(&self) -> &VecDeque<(Vec<u8>, P::Addr)> {
        &self.txgs
    }

    /// The partially-sent gram retried next cycle, if any.
    pub fn txbs(&self) -> Option<&(Vec<u8>, P::Addr)> {
        self.txbs.as_ref()
    }

    /// In-flight reassemblies keyed by code + memo identifier.
    pub fn rxgs(&self) -> &HashMap<String, Reassembly<P::Addr>> {
        &self.rxgs
    }

    /// Reassembled memos awaiting delivery.
    pub fn rxms(&self) -> &VecDeque<(Vec<u8>, P::Addr, Option<String>)> {
        &self.rxms
    }

    /// Pops one reassembled memo: `(memo, source, vid)`.
    pub fn take_memo(&mut self) -> Option<(Vec<u8>, P::Addr, Option<String>)> {
        self.rxms.pop_front()
    }

    /// Enqueues a memo for delivery to `dst`.
    ///
    /// Signed framing requires a verifier id; the payload is bounded by
    /// [`MAX_MEMO_SIZE`].
    pub fn memoit(
        &mut self,
        memo: Vec<u8>,
        dst: P::Addr,
        vid: Option<String>,
    ) -> Result<(), MemoError> {
        if memo.len() > MAX_MEMO_SIZE {
            return Err(MemoError::OversizeMemo { got: memo.len(), max: MAX_MEMO_SIZE });
        }
        if self.code == GramDex::Signed && vid.is_none() {
            return Err(MemoError::MissingVid);
        }
        self.txms.push_back((memo, dst, vid));
        Ok(())
    }

    fn new_mid(&mut self) -> String {
        (0..22)
            .map(|_| ALPHABET[self.rng.gen_range(0..64)] as char)
            .collect()
    }

    /// Fragments queued memos into grams on the transmit gram queue.
    ///
    /// A memo that cannot be fragmented (oversize, count overflow) is
    /// dropped with an error record; the queue keeps draining.
    pub fn service_tx_memos(&mut self) {
        while let Some((memo, dst, vid)) = self.txms.pop_front() {
            let mid = self.new_mid();
            let sig = match self.code {
                GramDex::Basic => None,
                GramDex::Signed => {
                    let vid = vid.as_deref().unwrap_or_default();
                    Some(
                        self.signer
                            .as_ref()
                            .map(|signer| signer(&memo, vid))
                            .unwrap_or_else(vacuous_sig),
                    )
                }
            };
            match gram::fragment(
                self.code,
                &mid,
                vid.as_deref(),
                &memo,
                self.size,
                self.curt,
                sig.as_deref(),
            ) {
                Ok(grams) => {
                    for gram in grams {
                        self.txgs.push_back((gram, dst.clone()));
                    }
                }
                Err(err) => {
                    error!(%err, len = memo.len(), "dropping unfragmentable memo");
                }
            }
        }
    }

    /// Hands queued grams to the peer until it pushes back.
    ///
    /// A short or refused send leaves the residue queued for the next cycle.
    pub fn service_tx_grams(&mut self) -> Result<(), MemoError> {
        if let Some((data, dst)) = self.txbs.take() {
            let sent = self.peer.send(&data, &dst)?;
            if sent < data.len() {
                self.txbs = Some((data[sent..].to_vec(), dst));
                return Ok(());
            }
        }
        while let Some((data, dst)) = self.txgs.pop_front() {
            let sent = self.peer.send(&data, &dst)?;
            if sent < data.len() {
                self.txbs = Some((data[sent..].to_vec(), dst));
                break;
            }
        }
        Ok(())
    }

    /// Drains the peer, dispatching each datagram into reassembly.
    pub fn service_receives(&mut self) -> Result<(), MemoError> {
        while let Some((data, src)) = self.peer.receive()? {
            self.rx_gram(&data, src);
        }
        Ok(())
    }

    /// Applies the drop rules and files one inbound datagram.
    fn rx_gram(&mut self, data: &[u8], src: P::Addr) {
        let gram = match Gram::parse(data) {
            Ok(gram) => gram,
            Err(err) => {
                warn!(%err, len = data.len(), "dropping malformed gram");
                return;
            }
        };
        if self.verific && gram.sig.is_none() {
            warn!(key = %gram.key, "dropping unsigned gram in verific mode");
            return;
        }

        let entry = self.rxgs.entry(gram.key.clone()).or_insert_with(|| {
            self.order.push(gram.key.clone());
            Reassembly {
                grams: BTreeMap::new(),
                cnt: None,
                src: src.clone(),
                vid: gram.vid.clone(),
                sig: gram.sig.clone(),
                tyme: self.tymth.as_ref().map(|tymth| tymth()),
            }
        });

        if entry.src != src {
            warn!(key = %gram.key, "dropping gram from conflicting source");
            return;
        }
        if entry.vid != gram.vid || entry.sig != gram.sig {
            warn!(key = %gram.key, "dropping gram with conflicting envelope");
            return;
        }
        if let Some(cnt) = gram.cnt {
            if *entry.cnt.get_or_insert(cnt) != cnt {
                warn!(key = %gram.key, "dropping gram with conflicting count");
                return;
            }
        }
        if entry.cnt.is_some_and(|cnt| gram.num >= cnt) {
            warn!(key = %gram.key, num = gram.num, "dropping gram numbered past count");
            return;
        }
        // Duplicates are ignored, first arrival wins.
        entry.grams.entry(gram.num).or_insert(gram.payload);
    }

    /// Promotes completed reassemblies to the received-memo queue.
    pub fn service_rx_grams(&mut self) {
        let mut keep = Vec::with_capacity(self.order.len());
        for key in std::mem::take(&mut self.order) {
            let done = self.rxgs.get(&key).is_some_and(Reassembly::complete);
            if !done {
                keep.push(key);
                continue;
            }
            let Some(entry) = self.rxgs.remove(&key) else {
                continue;
            };
            let mut memo = Vec::new();
            for payload in entry.grams.values() {
                memo.extend_from_slice(payload);
            }
            if let (Some(verifier), Some(vid), Some(sig)) =
                (self.verifier.as_ref(), entry.vid.as_deref(), entry.sig.as_deref())
            {
                if !verifier(&memo, vid, sig) {
                    warn!(%key, "dropping memo failing verification");
                    continue;
                }
            }
            debug!(%key, len = memo.len(), "memo reassembled");
            self.rxms.push_back((memo, entry.src, entry.vid));
        }
        self.order = keep;
    }

    /// Delivers queued memos through the installed handler, if any.
    pub fn service_rx_memos(&mut self) {
        if let Some(handler) = self.handler.as_mut() {
            while let Some((memo, src, vid)) = self.rxms.pop_front() {
                handler(memo, src, vid);
            }
        }
    }

    /// One full service cycle: receive side, then transmit side.
    pub fn service(&mut self) -> Result<(), MemoError> {
        self.service_receives()?;
        self.service_rx_grams();
        self.service_rx_memos();
        self.service_tx_memos();
        self.service_tx_grams()
    }

    /// Discards reassemblies whose first gram arrived before `stale`.
    ///
    /// Used by the tymee variant to bound how long partial memos linger.
    fn evict_before(&mut self, stale: f64) {
        let rxgs = &mut self.rxgs;
        self.order.retain(|key| {
            let expired = rxgs
                .get(key)
                .and_then(|entry| entry.tyme)
                .is_some_and(|tyme| tyme <= stale);
            if expired {
                warn!(%key, "evicting stale partial memo");
                rxgs.remove(key);
            }
            !expired
        });
    }
}

impl<P: Dgram> Tymee for Memoer<P> {
    fn wind(&mut self, tymth: Tymth) {
        self.tymth = Some(tymth);
    }

    fn tyme(&self) -> Option<f64> {
        self.tymth.as_ref().map(|tymth| tymth())
    }
}

/// A memoer wound on a host clock, evicting stale partial reassemblies.
///
/// Dereferences to [`Memoer`]; the only additions are the `tymeout` bound
/// (0.0 means never evict) and [`service_tymers`] run as part of
/// [`service`].
///
/// [`service_tymers`]: TymeeMemoer::service_tymers
/// [`service`]: TymeeMemoer::service
pub struct TymeeMemoer<P: Dgram> {
    memoer: Memoer<P>,
    tymeout: f64,
}

impl<P: Dgram> TymeeMemoer<P> {
    /// Wraps a memoer with no eviction bound.
    pub fn new(peer: P) -> Self {
        Self { memoer: Memoer::new(peer), tymeout: 0.0 }
    }

    /// Sets the reassembly tymeout; non-positive means never.
    pub fn with_tymeout(mut self, tymeout: f64) -> Self {
        self.tymeout = tymeout.max(0.0);
        self
    }

    /// The reassembly tymeout.
    pub fn tymeout(&self) -> f64 {
        self.tymeout
    }

    /// Evicts partial reassemblies older than the tymeout.
    pub fn service_tymers(&mut self) {
        if self.tymeout <= 0.0 {
            return;
        }
        if let Some(now) = self.memoer.tyme() {
            self.memoer.evict_before(now - self.tymeout);
        }
    }

    /// One full service cycle including tymer eviction.
    pub fn service(&mut self) -> Result<(), MemoError> {
        self.memoer.service()?;
        self.service_tymers();
        Ok(())
    }
}

impl<P: Dgram> Deref for TymeeMemoer<P> {
    type Target = Memoer<P>;

    fn deref(&self) -> &Memoer<P> {
        &self.memoer
    }
}

impl<P: Dgram> DerefMut for TymeeMemoer<P> {
    fn deref_mut(&mut self) -> &mut Memoer<P> {
        &mut self.memoer
    }
}

impl<P: Dgram> Tymee for TymeeMemoer<P> {
    fn wind(&mut self, tymth: Tymth) {
        self.memoer.wind(tymth);
    }

    fn tyme(&self) -> Option<f64> {
        self.memoer.tyme()
    }
}
