use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, PoisonError, RwLock};

use rustc_hash::{FxHashSet, FxHasher};

use crate::clause::Clause;

/// Backing storage for the facts of one subgoal.
///
/// Implementations must be safe to share between threads; the solver only
/// ever touches a store from the thread running its query.
pub trait FactStore: Send + Sync + fmt::Debug {
    fn is_empty(&self) -> bool;

    fn len(&self) -> usize;

    fn contains(&self, fact: &Clause) -> bool;

    /// Snapshot of the stored facts in insertion order.
    fn iter(&self) -> Vec<Clause>;

    /// Returns whether `fact` was new.
    fn add(&self, fact: Clause) -> bool;

    /// Adds every fact of `other`, returning how many were new.
    fn merge(&self, other: &dyn FactStore) -> usize {
        other.iter().into_iter().filter(|f| self.add(f.clone())).count()
    }
}

/// Picks the store for each new subgoal.
pub type StoreFactory = Arc<dyn Fn() -> Box<dyn FactStore> + Send + Sync>;

pub fn memory_store_factory() -> StoreFactory {
    Arc::new(|| Box::new(MemoryFactStore::new()) as Box<dyn FactStore>)
}

#[derive(Debug, Default)]
struct Ordered {
    order: Vec<Clause>,
    seen: FxHashSet<Clause>,
}

/// Unbounded in-memory store: an insertion-ordered set behind a lock.
#[derive(Debug, Default)]
pub struct MemoryFactStore {
    inner: RwLock<Ordered>,
}

impl MemoryFactStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FactStore for MemoryFactStore {
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).order.len()
    }

    fn contains(&self, fact: &Clause) -> bool {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).seen.contains(fact)
    }

    fn iter(&self) -> Vec<Clause> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).order.clone()
    }

    fn add(&self, fact: Clause) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if !inner.seen.insert(fact.clone()) {
            return false;
        }
        inner.order.push(fact);
        true
    }
}

/// Fixed-size Bloom filter with double hashing.
///
/// A negative answer is exact, so callers use it to skip the exact lookup
/// for keys that are certainly new.
#[derive(Debug, Clone)]
pub struct BloomFilter {
    bits: Vec<u64>,
    num_bits: u64,
    num_hashes: u32,
}

impl BloomFilter {
    /// Sized for `expected` keys at the given false positive rate.
    pub fn new(expected: usize, false_positive_rate: f64) -> Self {
        let n = expected.max(1) as f64;
        let p = false_positive_rate.clamp(1e-9, 0.5);
        let ln2 = std::f64::consts::LN_2;
        let m = (-(n * p.ln()) / (ln2 * ln2)).ceil().max(64.0) as u64;
        let k = ((m as f64 / n) * ln2).round().clamp(1.0, 16.0) as u32;
        Self { bits: vec![0; m.div_ceil(64) as usize], num_bits: m, num_hashes: k }
    }

    fn hashes(key: &str) -> (u64, u64) {
        let mut h = FxHasher::default();
        key.hash(&mut h);
        let h1 = h.finish();
        let mut h = FxHasher::default();
        (key, 0x9e37_79b9_7f4a_7c15_u64).hash(&mut h);
        // odd step so every probe sequence covers the table
        (h1, h.finish() | 1)
    }

    fn positions(&self, key: &str) -> impl Iterator<Item = u64> + '_ {
        let (h1, h2) = Self::hashes(key);
        (0..u64::from(self.num_hashes)).map(move |i| h1.wrapping_add(i.wrapping_mul(h2)) % self.num_bits)
    }

    pub fn insert(&mut self, key: &str) {
        let positions: Vec<u64> = self.positions(key).collect();
        for bit in positions {
            self.bits[(bit / 64) as usize] |= 1 << (bit % 64);
        }
    }

    pub fn might_contain(&self, key: &str) -> bool {
        self.positions(key).all(|bit| self.bits[(bit / 64) as usize] & (1 << (bit % 64)) != 0)
    }

    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }
}
