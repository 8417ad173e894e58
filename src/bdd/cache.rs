use std::collections::VecDeque;

use rustc_hash::FxHashMap;

use super::Bdd;

type Key = (Bdd, Bdd, Bdd);

/// Bounded memo of `ite` results. The oldest entry goes first once the
/// capacity is reached.
#[derive(Debug, Clone)]
pub struct IteCache {
    map: FxHashMap<Key, Bdd>,
    order: VecDeque<Key>,
    capacity: usize,
    hits: u64,
    misses: u64,
}

impl IteCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            map: FxHashMap::default(),
            order: VecDeque::new(),
            capacity,
            hits: 0,
            misses: 0,
        }
    }

    pub fn get(&mut self, key: &Key) -> Option<Bdd> {
        match self.map.get(key) {
            Some(&r) => {
                self.hits += 1;
                Some(r)
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    pub fn insert(&mut self, key: Key, value: Bdd) {
        if self.capacity == 0 {
            return;
        }
        if self.map.insert(key, value).is_some() {
            return;
        }
        self.order.push_back(key);
        while self.order.len() > self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.map.remove(&old);
            }
        }
    }

    pub fn clear(&mut self) {
        self.map.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }
}
