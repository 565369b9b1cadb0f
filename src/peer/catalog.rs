//! The two bounded peer catalogs — reported and persisted — and the
//! fault-accounting protocol that moves a peer out of the persisted set.
//!
//! All mutation goes through `PeerCatalog`; nothing outside this module
//! touches the underlying sets directly, which is what the invariants in
//! spec.md §8 depend on.

use std::collections::HashSet;

use rand::{rngs::StdRng, seq::IteratorRandom, SeedableRng};

use crate::common::{current_timestamp_millis, NodeAddress};
use crate::peer::PeerRecord;

/// Capacity of the reported set before random purging kicks in.
pub const MAX_REPORTED: usize = 1000;
/// Capacity of the persisted set before random purging kicks in.
pub const MAX_PERSISTED: usize = 500;
/// Age, in milliseconds, after which a record is purged from either set.
pub const MAX_AGE_MILLIS: u64 = 14 * 24 * 60 * 60 * 1000;
/// Extra headroom tolerated on an inbound gossip batch above the
/// steady-state cap, before it is treated as a rule violation.
pub const BATCH_OVERHEAD: usize = 10;
/// Default fault-count threshold separating "warn" from "evict". The
/// source repository this spec was distilled from does not enumerate the
/// exact value; 5 is used as a placeholder and is parameterized here so a
/// deployment can override it (spec.md §9, Open Questions).
pub const DEFAULT_FAULT_THRESHOLD: u32 = 5;

pub struct PeerCatalog {
    reported: HashSet<PeerRecord>,
    persisted: HashSet<PeerRecord>,
    rng: StdRng,
    fault_threshold: u32,
}

impl PeerCatalog {
    /// Builds an empty catalog seeded from OS entropy.
    pub fn new() -> Self { Self::with_seed(rand::random()) }

    /// Builds an empty catalog with a deterministic PRNG seed, for tests
    /// that need a reproducible purge sequence.
    pub fn with_seed(seed: u64) -> Self {
        PeerCatalog {
            reported: HashSet::new(),
            persisted: HashSet::new(),
            rng: StdRng::seed_from_u64(seed),
            fault_threshold: DEFAULT_FAULT_THRESHOLD,
        }
    }

    pub fn with_fault_threshold(mut self, threshold: u32) -> Self {
        self.fault_threshold = threshold;
        self
    }

    /// Restores a persisted set loaded from the store at startup.
    pub fn load_persisted(&mut self, records: Vec<PeerRecord>) {
        self.persisted = records.into_iter().collect();
    }

    pub fn reported_len(&self) -> usize { self.reported.len() }

    pub fn persisted_len(&self) -> usize { self.persisted.len() }

    pub fn contains_reported(&self, addr: &NodeAddress) -> bool { self.reported.contains(addr) }

    pub fn contains_persisted(&self, addr: &NodeAddress) -> bool { self.persisted.contains(addr) }

    pub fn persisted_snapshot(&self) -> Vec<PeerRecord> { self.persisted.iter().cloned().collect() }

    /// Unions `batch` into the reported set, and into the persisted set,
    /// purging both if they exceed capacity afterwards.
    ///
    /// Returns `false` without mutating anything if the batch is larger
    /// than the legitimate-overhead threshold — the caller should report
    /// `TOO_MANY_REPORTED_PEERS_SENT` against the originating connection
    /// in that case.
    pub fn add_reported(
        &mut self,
        batch: impl IntoIterator<Item = NodeAddress>,
        self_address: NodeAddress,
        absolute_limit: usize,
    ) -> bool {
        let batch: Vec<NodeAddress> = batch.into_iter().filter(|a| *a != self_address).collect();
        if batch.len() > MAX_REPORTED + absolute_limit + BATCH_OVERHEAD {
            return false;
        }

        for addr in &batch {
            self.reported.insert_keep(PeerRecord::new(*addr));
            self.persisted.insert_keep(PeerRecord::new(*addr));
        }

        self.purge_reported_if_exceeds(absolute_limit);
        self.purge_persisted_if_exceeds();
        true
    }

    pub fn remove_reported(&mut self, addr: &NodeAddress) -> bool { self.reported.remove(addr) }

    pub fn remove_persisted(&mut self, addr: &NodeAddress) -> bool { self.persisted.remove(addr) }

    /// Removes records older than `MAX_AGE_MILLIS` from both sets.
    pub fn purge_old(&mut self) {
        self.purge_old_reported();
        self.purge_old_persisted();
    }

    /// Removes records older than `MAX_AGE_MILLIS` from the reported set
    /// only, as invoked by the housekeeping sweep.
    pub fn purge_old_reported(&mut self) {
        let now = current_timestamp_millis();
        self.reported.retain(|r| r.age_millis(now) <= MAX_AGE_MILLIS);
    }

    /// Removes records older than `MAX_AGE_MILLIS` from the persisted set
    /// only, as invoked by `register_fault` and the housekeeping sweep.
    pub fn purge_old_persisted(&mut self) {
        let now = current_timestamp_millis();
        self.persisted.retain(|r| r.age_millis(now) <= MAX_AGE_MILLIS);
    }

    fn purge_reported_if_exceeds(&mut self, absolute_limit: usize) {
        let limit = MAX_REPORTED.saturating_sub(absolute_limit);
        purge_randomly(&mut self.reported, limit, &mut self.rng);
    }

    fn purge_persisted_if_exceeds(&mut self) {
        purge_randomly(&mut self.persisted, MAX_PERSISTED, &mut self.rng);
    }

    /// Records a fault against a persisted peer. If the peer's
    /// `failed_attempts` now reaches the fault threshold, or a rule
    /// violation accompanied the fault, the peer is evicted from the
    /// persisted set. Either way, the peer is also dropped from the
    /// reported set and the persisted set is aged out.
    pub fn register_fault(&mut self, addr: &NodeAddress, had_rule_violation: bool) {
        if let Some(mut record) = self.persisted.take(addr) {
            record.increase_failed_attempts();
            let evict = record.failed_attempts >= self.fault_threshold || had_rule_violation;
            if !evict {
                self.persisted.insert(record);
            } else {
                debug!(
                    "Evicting persisted peer {} after {} failed attempts (rule violation: {})",
                    addr, record.failed_attempts, had_rule_violation
                );
            }
        }

        self.remove_reported(addr);
        self.purge_old_persisted();
    }
}

impl Default for PeerCatalog {
    fn default() -> Self { Self::new() }
}

/// Removes elements uniformly-at-random until `set.len() == limit`.
/// Random, not LRU — this is the documented defense against an adversary
/// who could manipulate activity timestamps to control which peers age
/// out.
fn purge_randomly(set: &mut HashSet<PeerRecord>, limit: usize, rng: &mut StdRng) {
    while set.len() > limit {
        let victim = set
            .iter()
            .choose(rng)
            .map(|r| r.node_address)
            .expect("set is non-empty while len() > limit");
        set.remove(&victim);
    }
}

/// `HashSet::insert` that keeps an existing record rather than replacing
/// it, so gossip re-reports of an already-known peer don't reset its
/// `first_seen`/`failed_attempts`.
trait InsertKeepExisting<T> {
    fn insert_keep(&mut self, value: T);
}

impl InsertKeepExisting<PeerRecord> for HashSet<PeerRecord> {
    fn insert_keep(&mut self, value: PeerRecord) {
        if !self.contains(&value.node_address) {
            self.insert(value);
        }
    }
}
