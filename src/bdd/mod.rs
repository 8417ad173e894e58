//! Reduced ordered binary decision diagrams.
//!
//! One [`BddManager`] owns a canonical node table: two handles are equal iff
//! they denote the same Boolean function under the current variable order.
//! The manager is single-threaded; confine it to one thread.

mod cache;
mod reduce;
mod reorder;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::config::EngineConfig;

pub use cache::IteCache;
pub use reduce::{DecisionGraph, DecisionNode};

/// Handle of a node in its manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Bdd(u32);

impl Bdd {
    pub const FALSE: Bdd = Bdd(0);
    pub const TRUE: Bdd = Bdd(1);

    pub fn is_terminal(self) -> bool {
        self.0 < 2
    }

    pub fn is_true(self) -> bool {
        self == Bdd::TRUE
    }

    pub fn is_false(self) -> bool {
        self == Bdd::FALSE
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

const TERMINAL: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Node {
    var: u32,
    low: Bdd,
    high: Bdd,
}

#[derive(Debug, Clone)]
pub struct BddManager {
    nodes: Vec<Node>,
    free: Vec<u32>,
    unique: FxHashMap<(u32, Bdd, Bdd), Bdd>,
    var_level: Vec<u32>,
    level_var: Vec<u32>,
    refs: FxHashMap<Bdd, usize>,
    cache: IteCache,
    max_growth: f64,
}

impl Default for BddManager {
    fn default() -> Self {
        Self::new(&EngineConfig::default())
    }
}

impl BddManager {
    pub fn new(config: &EngineConfig) -> Self {
        let terminal = |_| Node { var: TERMINAL, low: Bdd::FALSE, high: Bdd::FALSE };
        Self {
            nodes: (0..2).map(terminal).collect(),
            free: Vec::new(),
            unique: FxHashMap::default(),
            var_level: Vec::new(),
            level_var: Vec::new(),
            refs: FxHashMap::default(),
            cache: IteCache::new(config.ite_cache_capacity),
            max_growth: config.sifting_max_growth,
        }
    }

    pub fn constant(&self, value: bool) -> Bdd {
        if value {
            Bdd::TRUE
        } else {
            Bdd::FALSE
        }
    }

    /// The function `x_var`. Variables are created on first use, each
    /// appended below the existing ones.
    pub fn var(&mut self, var: u32) -> Bdd {
        self.ensure_vars(var + 1);
        self.mk(var, Bdd::FALSE, Bdd::TRUE)
    }

    /// A variable not used so far.
    pub fn new_var(&mut self) -> Bdd {
        let var = self.var_count();
        self.var(var)
    }

    pub fn var_count(&self) -> u32 {
        self.var_level.len() as u32
    }

    fn ensure_vars(&mut self, count: u32) {
        while self.var_count() < count {
            let v = self.var_count();
            self.var_level.push(v);
            self.level_var.push(v);
        }
    }

    pub fn level_of(&self, var: u32) -> Option<u32> {
        self.var_level.get(var as usize).copied()
    }

    pub fn var_at(&self, level: u32) -> Option<u32> {
        self.level_var.get(level as usize).copied()
    }

    /// Variables from the top level down.
    pub fn order(&self) -> &[u32] {
        &self.level_var
    }

    fn node(&self, f: Bdd) -> Node {
        self.nodes[f.index()]
    }

    fn level(&self, f: Bdd) -> u32 {
        let var = self.node(f).var;
        if var == TERMINAL {
            TERMINAL
        } else {
            self.var_level[var as usize]
        }
    }

    /// Decision variable of `f`, `None` for the terminals.
    pub fn top_var(&self, f: Bdd) -> Option<u32> {
        let var = self.node(f).var;
        (var != TERMINAL).then_some(var)
    }

    pub fn low(&self, f: Bdd) -> Bdd {
        self.node(f).low
    }

    pub fn high(&self, f: Bdd) -> Bdd {
        self.node(f).high
    }

    /// The canonical node `(var, low, high)`.
    fn mk(&mut self, var: u32, low: Bdd, high: Bdd) -> Bdd {
        if low == high {
            return low;
        }
        if let Some(&id) = self.unique.get(&(var, low, high)) {
            return id;
        }
        let node = Node { var, low, high };
        let id = match self.free.pop() {
            Some(slot) => {
                self.nodes[slot as usize] = node;
                Bdd(slot)
            }
            None => {
                self.nodes.push(node);
                Bdd((self.nodes.len() - 1) as u32)
            }
        };
        self.unique.insert((var, low, high), id);
        id
    }

    fn cofactors(&self, f: Bdd, var: u32) -> (Bdd, Bdd) {
        let n = self.node(f);
        if n.var == var {
            (n.low, n.high)
        } else {
            (f, f)
        }
    }

    /// If-then-else, the combinator everything else is built on.
    pub fn ite(&mut self, f: Bdd, g: Bdd, h: Bdd) -> Bdd {
        if f.is_true() {
            return g;
        }
        if f.is_false() {
            return h;
        }
        if g == h {
            return g;
        }
        if g.is_true() && h.is_false() {
            return f;
        }
        if let Some(r) = self.cache.get(&(f, g, h)) {
            return r;
        }

        let top = self.level(f).min(self.level(g)).min(self.level(h));
        let var = self.level_var[top as usize];
        let (f0, f1) = self.cofactors(f, var);
        let (g0, g1) = self.cofactors(g, var);
        let (h0, h1) = self.cofactors(h, var);
        let high = self.ite(f1, g1, h1);
        let low = self.ite(f0, g0, h0);
        let r = self.mk(var, low, high);
        self.cache.insert((f, g, h), r);
        r
    }

    pub fn not(&mut self, f: Bdd) -> Bdd {
        self.ite(f, Bdd::FALSE, Bdd::TRUE)
    }

    pub fn and(&mut self, f: Bdd, g: Bdd) -> Bdd {
        self.ite(f, g, Bdd::FALSE)
    }

    pub fn or(&mut self, f: Bdd, g: Bdd) -> Bdd {
        self.ite(f, Bdd::TRUE, g)
    }

    pub fn and_all<I: IntoIterator<Item = Bdd>>(&mut self, fs: I) -> Bdd {
        fs.into_iter().fold(Bdd::TRUE, |acc, f| self.and(acc, f))
    }

    pub fn or_all<I: IntoIterator<Item = Bdd>>(&mut self, fs: I) -> Bdd {
        fs.into_iter().fold(Bdd::FALSE, |acc, f| self.or(acc, f))
    }

    /// `f` with `var` fixed to `value`.
    pub fn restrict(&mut self, f: Bdd, var: u32, value: bool) -> Bdd {
        let Some(level) = self.level_of(var) else {
            return f;
        };
        let mut memo = FxHashMap::default();
        self.restrict_rec(f, var, level, value, &mut memo)
    }

    fn restrict_rec(
        &mut self,
        f: Bdd,
        var: u32,
        level: u32,
        value: bool,
        memo: &mut FxHashMap<Bdd, Bdd>,
    ) -> Bdd {
        if f.is_terminal() || self.level(f) > level {
            return f;
        }
        if let Some(&r) = memo.get(&f) {
            return r;
        }
        let n = self.node(f);
        let r = if n.var == var {
            if value {
                n.high
            } else {
                n.low
            }
        } else {
            let low = self.restrict_rec(n.low, var, level, value, memo);
            let high = self.restrict_rec(n.high, var, level, value, memo);
            self.mk(n.var, low, high)
        };
        memo.insert(f, r);
        r
    }

    pub fn eval<A: Fn(u32) -> bool>(&self, f: Bdd, assignment: A) -> bool {
        let mut cur = f;
        while !cur.is_terminal() {
            let n = self.node(cur);
            cur = if assignment(n.var) { n.high } else { n.low };
        }
        cur.is_true()
    }

    /// Values of `f` over every assignment of variables `0..vars`, the
    /// assignment's bit `i` giving variable `i`.
    pub fn truth_table(&self, f: Bdd, vars: u32) -> Vec<bool> {
        (0..1u64 << vars).map(|bits| self.eval(f, |v| bits >> v & 1 == 1)).collect()
    }

    /// Weighted model count: `P(node) = p * P(high) + (1 - p) * P(low)`.
    pub fn probability<W: Fn(u32) -> f64>(&self, f: Bdd, weight: W) -> f64 {
        let mut memo: FxHashMap<Bdd, f64> = FxHashMap::default();
        self.probability_rec(f, &weight, &mut memo)
    }

    fn probability_rec<W: Fn(u32) -> f64>(&self, f: Bdd, weight: &W, memo: &mut FxHashMap<Bdd, f64>) -> f64 {
        if f.is_true() {
            return 1.0;
        }
        if f.is_false() {
            return 0.0;
        }
        if let Some(&p) = memo.get(&f) {
            return p;
        }
        let n = self.node(f);
        let w = weight(n.var);
        let p = w * self.probability_rec(n.high, weight, memo) + (1.0 - w) * self.probability_rec(n.low, weight, memo);
        memo.insert(f, p);
        p
    }

    fn reachable<I: IntoIterator<Item = Bdd>>(&self, roots: I) -> FxHashSet<Bdd> {
        let mut seen = FxHashSet::default();
        let mut stack: Vec<Bdd> = roots.into_iter().collect();
        while let Some(f) = stack.pop() {
            if f.is_terminal() || !seen.insert(f) {
                continue;
            }
            let n = self.node(f);
            stack.push(n.low);
            stack.push(n.high);
        }
        seen
    }

    /// Decision nodes reachable from `f`.
    pub fn size(&self, f: Bdd) -> usize {
        self.reachable([f]).len()
    }

    /// Decision nodes reachable from the referenced roots.
    pub fn rooted_size(&self) -> usize {
        self.reachable(self.refs.keys().copied()).len()
    }

    /// Decision nodes in the table, garbage included.
    pub fn live_nodes(&self) -> usize {
        self.unique.len()
    }

    /// Protects `f` from [`gc`](Self::gc). Counted.
    pub fn ref_root(&mut self, f: Bdd) {
        *self.refs.entry(f).or_insert(0) += 1;
    }

    pub fn deref_root(&mut self, f: Bdd) {
        if let Some(count) = self.refs.get_mut(&f) {
            *count -= 1;
            if *count == 0 {
                self.refs.remove(&f);
            }
        }
    }

    /// Frees every node unreachable from a referenced root and empties the
    /// `ite` cache. Handles that were not referenced become invalid.
    pub fn gc(&mut self) -> usize {
        let keep = self.reachable(self.refs.keys().copied());
        let dead: Vec<((u32, Bdd, Bdd), Bdd)> = self
            .unique
            .iter()
            .filter(|(_, id)| !keep.contains(id))
            .map(|(k, id)| (*k, *id))
            .collect();
        for (key, id) in &dead {
            self.unique.remove(key);
            self.free.push(id.0);
        }
        self.cache.clear();
        dead.len()
    }

    pub fn cache(&self) -> &IteCache {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ite_identities() {
        let mut m = BddManager::default();
        let f = m.var(0);
        let g = m.var(1);
        assert_eq!(m.ite(f, Bdd::TRUE, Bdd::FALSE), f);
        assert_eq!(m.ite(Bdd::TRUE, f, g), f);
        assert_eq!(m.ite(Bdd::FALSE, f, g), g);
        assert_eq!(m.ite(f, g, g), g);
        let not_f = m.ite(f, Bdd::FALSE, Bdd::TRUE);
        assert_eq!(m.not(f), not_f);
        assert_eq!(m.not(not_f), f);
    }

    #[test]
    fn equivalent_constructions_share_the_root() {
        let mut m = BddManager::default();
        let (a, b, c) = (m.var(0), m.var(1), m.var(2));
        // a & (b | c) against (a & b) | (a & c)
        let b_or_c = m.or(b, c);
        let left = m.and(a, b_or_c);
        let ab = m.and(a, b);
        let ac = m.and(a, c);
        let right = m.or(ab, ac);
        assert_eq!(left, right);

        // De Morgan
        let nab = m.and(a, b);
        let lhs = m.not(nab);
        let (na, nb) = (m.not(a), m.not(b));
        let rhs = m.or(na, nb);
        assert_eq!(lhs, rhs);
    }

    #[test]
    fn no_redundant_nodes() {
        let mut m = BddManager::default();
        let a = m.var(0);
        let na = m.not(a);
        assert_eq!(m.or(a, na), Bdd::TRUE);
        assert_eq!(m.and(a, na), Bdd::FALSE);
        let keys: Vec<_> = m.unique.keys().copied().collect();
        assert!(keys.iter().all(|(_, low, high)| low != high));
    }

    #[test]
    fn restrict_fixes_a_variable() {
        let mut m = BddManager::default();
        let (a, b) = (m.var(0), m.var(1));
        let f = m.and(a, b);
        assert_eq!(m.restrict(f, 0, true), b);
        assert_eq!(m.restrict(f, 0, false), Bdd::FALSE);
        assert_eq!(m.restrict(f, 7, true), f);
    }

    #[test]
    fn weighted_model_count() {
        let mut m = BddManager::default();
        let (a, b) = (m.var(0), m.var(1));
        let weights = [0.5, 0.6];
        let or = m.or(a, b);
        let and = m.and(a, b);
        assert!((m.probability(or, |v| weights[v as usize]) - 0.8).abs() < 1e-12);
        assert!((m.probability(and, |v| weights[v as usize]) - 0.3).abs() < 1e-12);
        assert_eq!(m.probability(Bdd::TRUE, |_| 0.1), 1.0);
        assert_eq!(m.probability(Bdd::FALSE, |_| 0.1), 0.0);
    }

    #[test]
    fn gc_keeps_referenced_roots() {
        let mut m = BddManager::default();
        let (a, b, c) = (m.var(0), m.var(1), m.var(2));
        let keep = m.and(a, b);
        let _garbage = m.or(b, c);
        m.ref_root(keep);
        let table = m.truth_table(keep, 3);
        assert!(m.gc() > 0);
        assert_eq!(m.truth_table(keep, 3), table);
        assert_eq!(m.live_nodes(), m.size(keep));

        // freed slots are reused
        let before = m.nodes.len();
        let _ = m.var(2);
        assert_eq!(m.nodes.len(), before);
    }
}
