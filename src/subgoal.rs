use rustc_hash::{FxHashMap, FxHashSet};

use crate::clause::Clause;
use crate::error::{Error, Result};
use crate::literal::Literal;
use crate::store::{BloomFilter, FactStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubgoalId(pub(crate) usize);

impl SubgoalId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// How a fact entered its subgoal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Taken from the knowledge base, computed by a primitive or by
    /// negation. A leaf of every proof.
    Asserted,
    /// Head of a completed rule derivation.
    Derived,
}

/// A rule instance part way through its body.
///
/// `rule` holds the head and the literals still to resolve; `node` is the
/// trie node for the grounded prefix already resolved.
#[derive(Debug, Clone)]
pub struct Derivation {
    pub rule: Clause,
    pub node: NodeId,
}

impl Derivation {
    pub fn start(rule: Clause) -> Self {
        Self { rule, node: RuleTrie::ROOT }
    }
}

/// A derivation of `subgoal` blocked on another subgoal's facts.
#[derive(Debug, Clone)]
pub struct Waiter {
    pub subgoal: SubgoalId,
    pub derivation: Derivation,
}

/// Tabled record of one goal up to variable renaming.
///
/// Passive: the solver decides when facts are added and waiters notified.
#[derive(Debug)]
pub struct Subgoal {
    literal: Literal,
    facts: Box<dyn FactStore>,
    bloom: BloomFilter,
    asserted: FxHashSet<String>,
    pub(crate) waiters: Vec<Waiter>,
    pub(crate) trie: RuleTrie,
    grounded: Vec<Clause>,
    grounded_seen: FxHashSet<Clause>,
    unprovable: bool,
    capped: bool,
}

impl Subgoal {
    pub fn new(literal: Literal, facts: Box<dyn FactStore>, bloom: BloomFilter) -> Self {
        Self {
            literal,
            facts,
            bloom,
            asserted: FxHashSet::default(),
            waiters: Vec::new(),
            trie: RuleTrie::new(),
            grounded: Vec::new(),
            grounded_seen: FxHashSet::default(),
            unprovable: false,
            capped: false,
        }
    }

    pub fn literal(&self) -> &Literal {
        &self.literal
    }

    pub fn facts(&self) -> Vec<Clause> {
        self.facts.iter()
    }

    pub fn fact_count(&self) -> usize {
        self.facts.len()
    }

    /// Adds a fact, consulting the Bloom filter first. Returns `None` when
    /// the fact was known, otherwise whether the filter proved it new
    /// without an exact lookup.
    pub(crate) fn add_fact(&mut self, fact: &Clause, origin: Origin) -> Option<bool> {
        let key = fact.fingerprint();
        let fast = !self.bloom.might_contain(&key);
        if !fast && self.facts.contains(fact) {
            return None;
        }
        if !self.facts.add(fact.clone()) {
            return None;
        }
        self.bloom.insert(&key);
        if origin == Origin::Asserted {
            self.asserted.insert(fact.head().id());
        }
        Some(fast)
    }

    pub fn is_asserted(&self, fact: &Literal) -> bool {
        self.asserted.contains(&fact.id())
    }

    /// Grounded parent rules whose completion produced a fact here.
    pub fn grounded_rules(&self) -> &[Clause] {
        &self.grounded
    }

    pub(crate) fn record_grounded(&mut self, rule: Clause) -> bool {
        if !self.grounded_seen.insert(rule.clone()) {
            return false;
        }
        self.grounded.push(rule);
        true
    }

    pub fn is_unprovable(&self) -> bool {
        self.unprovable
    }

    pub(crate) fn mark_unprovable(&mut self) {
        self.unprovable = true;
    }

    pub fn is_capped(&self) -> bool {
        self.capped
    }

    pub(crate) fn mark_capped(&mut self) {
        self.capped = true;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
struct TrieNode {
    literal: Option<Literal>,
    parent: Option<NodeId>,
    children: FxHashMap<String, NodeId>,
    waiting: FxHashSet<String>,
    alive: bool,
}

impl TrieNode {
    fn new(literal: Option<Literal>, parent: Option<NodeId>) -> Self {
        Self {
            literal,
            parent,
            children: FxHashMap::default(),
            waiting: FxHashSet::default(),
            alive: true,
        }
    }
}

/// Partial derivations of one subgoal's rules, sharing grounded body
/// prefixes. The path from the root to a node lists the literals resolved
/// so far, in body order.
#[derive(Debug, Clone)]
pub struct RuleTrie {
    nodes: Vec<TrieNode>,
}

impl Default for RuleTrie {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleTrie {
    pub const ROOT: NodeId = NodeId(0);

    pub fn new() -> Self {
        Self { nodes: vec![TrieNode::new(None, None)] }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    pub fn live_nodes(&self) -> usize {
        self.nodes.iter().filter(|n| n.alive).count()
    }

    fn node(&self, id: NodeId) -> Result<&TrieNode> {
        self.nodes
            .get(id.0)
            .ok_or_else(|| Error::Internal(format!("rule trie has no node {}", id.0)))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut TrieNode> {
        self.nodes
            .get_mut(id.0)
            .ok_or_else(|| Error::Internal(format!("rule trie has no node {}", id.0)))
    }

    /// Child of `node` extended by `resolved`, created on first use.
    pub fn update(&mut self, node: NodeId, resolved: Literal) -> Result<NodeId> {
        self.revive(node)?;
        let key = resolved.id();
        if let Some(&child) = self.node(node)?.children.get(&key) {
            self.revive(child)?;
            return Ok(child);
        }
        let child = NodeId(self.nodes.len());
        self.nodes.push(TrieNode::new(Some(resolved), Some(node)));
        self.node_mut(node)?.children.insert(key, child);
        Ok(child)
    }

    /// Records that the derivation at `node` now waits on `next`.
    pub fn open(&mut self, node: NodeId, next: &Literal) -> Result<()> {
        self.revive(node)?;
        self.node_mut(node)?.waiting.insert(next.variant());
        Ok(())
    }

    /// The grounded rule `head :- path(node)`.
    pub fn complete(&self, node: NodeId, head: Literal) -> Result<Clause> {
        let mut body = Vec::new();
        let mut cur = Some(node);
        while let Some(id) = cur {
            let n = self.node(id)?;
            if let Some(lit) = &n.literal {
                body.push(lit.clone());
            }
            cur = n.parent;
        }
        if body.is_empty() {
            return Err(Error::Internal(format!("empty derivation for `{head}`")));
        }
        body.reverse();
        Ok(Clause::new(head, body))
    }

    /// Drops the wait on `literal` everywhere and prunes the branches left
    /// with nothing to wait for. Returns the number of pruned nodes.
    pub fn cleanup(&mut self, literal: &Literal) -> usize {
        let key = literal.variant();
        let stale: Vec<NodeId> = (0..self.nodes.len())
            .map(NodeId)
            .filter(|id| self.nodes[id.0].waiting.contains(&key))
            .collect();

        let mut pruned = 0;
        for id in stale {
            self.nodes[id.0].waiting.remove(&key);
            let mut cur = id;
            while cur != Self::ROOT {
                let n = &self.nodes[cur.0];
                if !n.alive || !n.waiting.is_empty() || !n.children.is_empty() {
                    break;
                }
                let parent = n.parent.unwrap_or(Self::ROOT);
                let child_key = n.literal.as_ref().map(Literal::id).unwrap_or_default();
                self.nodes[cur.0].alive = false;
                self.nodes[parent.0].children.remove(&child_key);
                pruned += 1;
                cur = parent;
            }
        }
        pruned
    }

    /// Re-attaches a pruned node (and its pruned ancestors) when a
    /// derivation still holding it moves on.
    fn revive(&mut self, node: NodeId) -> Result<()> {
        let mut cur = node;
        loop {
            let n = self.node(cur)?;
            if n.alive {
                return Ok(());
            }
            let parent = n.parent.unwrap_or(Self::ROOT);
            let key = n.literal.as_ref().map(Literal::id).unwrap_or_default();
            self.nodes[cur.0].alive = true;
            self.node_mut(parent)?.children.insert(key, cur);
            cur = parent;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryFactStore;
    use crate::term::Term;

    fn lit(name: &str, args: &[&str]) -> Literal {
        Literal::atom(name, args.iter().map(|a| Term::constant(*a)).collect()).unwrap()
    }

    #[test]
    fn shared_prefixes_share_nodes() {
        let mut trie = RuleTrie::new();
        let a = trie.update(RuleTrie::ROOT, lit("edge", &["a", "b"])).unwrap();
        let again = trie.update(RuleTrie::ROOT, lit("edge", &["a", "b"])).unwrap();
        assert_eq!(a, again);

        let ab = trie.update(a, lit("edge", &["b", "c"])).unwrap();
        let rule = trie.complete(ab, lit("path", &["a", "c"])).unwrap();
        assert_eq!(rule.to_string(), "path(a, c) :- edge(a, b), edge(b, c)");
        assert_eq!(trie.len(), 3);
    }

    #[test]
    fn completing_the_root_is_an_internal_error() {
        let trie = RuleTrie::new();
        assert!(matches!(trie.complete(RuleTrie::ROOT, lit("p", &[])), Err(Error::Internal(_))));
        assert!(matches!(trie.complete(NodeId(7), lit("p", &[])), Err(Error::Internal(_))));
    }

    #[test]
    fn cleanup_prunes_branches_waiting_on_a_dead_literal() {
        let mut trie = RuleTrie::new();
        let a = trie.update(RuleTrie::ROOT, lit("a", &["1"])).unwrap();
        let ab = trie.update(a, lit("b", &["1"])).unwrap();
        trie.open(ab, &lit("missing", &["1"])).unwrap();
        let c = trie.update(RuleTrie::ROOT, lit("c", &["1"])).unwrap();
        trie.open(c, &lit("d", &["1"])).unwrap();

        assert_eq!(trie.cleanup(&lit("missing", &["1"])), 2);
        assert_eq!(trie.live_nodes(), 2);

        // a derivation still holding the pruned node can move on
        let abx = trie.update(ab, lit("x", &["1"])).unwrap();
        assert_eq!(trie.live_nodes(), 5);
        assert_eq!(trie.complete(abx, lit("h", &[])).unwrap().body().len(), 3);
    }

    #[test]
    fn subgoal_tracks_origin_and_dedups() {
        let mut sg = Subgoal::new(
            lit("p", &["1"]),
            Box::new(MemoryFactStore::new()),
            BloomFilter::new(16, 0.01),
        );
        let kb = Clause::fact(lit("p", &["1"]).with_probability(0.4));
        assert_eq!(sg.add_fact(&kb, Origin::Asserted), Some(true));
        assert_eq!(sg.add_fact(&kb, Origin::Asserted), None);
        let derived = Clause::fact(lit("p", &["1"]));
        assert!(sg.add_fact(&derived, Origin::Derived).is_some());
        assert!(sg.is_asserted(kb.head()));
        assert!(!sg.is_asserted(derived.head()));
        assert_eq!(sg.fact_count(), 2);
    }
}
