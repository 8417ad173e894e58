use rustc_hash::{FxHashMap, FxHashSet};
use tracing::trace;

use crate::clause::Clause;
use crate::config::EngineConfig;
use crate::kb::PROBA_PREFIX;
use crate::literal::Literal;
use crate::subgoal::Origin;
use crate::term::Term;

/// Frozen facts and grounded rules of one solver run.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    facts: FxHashMap<String, Literal>,
    asserted: FxHashSet<String>,
    rules: FxHashMap<String, Vec<Clause>>,
    rule_set: FxHashSet<Clause>,
    /// Facts of the base literal behind each negation fact, by its id.
    negations: FxHashMap<String, Vec<Literal>>,
}

impl Snapshot {
    pub fn add_fact(&mut self, fact: Literal, origin: Origin) {
        let key = fact.id();
        if origin == Origin::Asserted {
            self.asserted.insert(key.clone());
        }
        self.facts.entry(key).or_insert(fact);
    }

    pub fn add_rule(&mut self, rule: Clause) {
        if self.rule_set.insert(rule.clone()) {
            self.rules.entry(rule.head().id()).or_default().push(rule);
        }
    }

    /// Records the facts of `L` that the negation fact `leaf` of `~L`
    /// stands against.
    pub fn add_negation(&mut self, leaf: &Literal, bases: Vec<Literal>) {
        self.negations.insert(leaf.id(), bases);
    }

    pub fn negation_bases(&self, leaf: &Literal) -> &[Literal] {
        self.negations.get(&leaf.id()).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn fact_count(&self) -> usize {
        self.facts.len()
    }

    pub fn rule_count(&self) -> usize {
        self.rule_set.len()
    }

    pub fn is_asserted(&self, lit: &Literal) -> bool {
        self.asserted.contains(&lit.id())
    }
}

#[derive(Debug, Clone)]
struct GroundedRule {
    clause: Clause,
    /// Every body literal is a leaf: nothing to expand.
    leaf_only: bool,
}

const NO_CUT: usize = usize::MAX;

/// Expands the grounded rules of a run into explicit proofs.
///
/// A proof of `target` is a clause whose head is `target` and whose body
/// lists the leaf literals (knowledge-base facts, primitive results,
/// negation facts) one derivation of `target` rests on.
#[derive(Debug)]
pub struct ProofAssistant {
    snapshot: Snapshot,
    rules: FxHashMap<String, Vec<GroundedRule>>,
    prune_certain: bool,
}

impl ProofAssistant {
    pub fn new(snapshot: Snapshot, config: &EngineConfig) -> Self {
        let heads: FxHashSet<&String> = snapshot.rules.keys().collect();
        let mut ordered: Vec<&Clause> = snapshot.rule_set.iter().collect();
        ordered.sort_by_cached_key(|r| r.to_string());
        let instances: FxHashMap<&Clause, usize> = ordered.into_iter().enumerate().map(|(i, r)| (r, i)).collect();

        let rules = snapshot
            .rules
            .iter()
            .map(|(head, rules)| {
                let classified = rules
                    .iter()
                    .map(|r| GroundedRule {
                        clause: weigh_instance(r, instances.get(r).copied().unwrap_or_default()),
                        leaf_only: r.body().iter().all(|b| !heads.contains(&b.id())),
                    })
                    .collect();
                (head.clone(), classified)
            })
            .collect();
        Self { snapshot, rules, prune_certain: config.prune_certain_proofs }
    }

    pub fn with_pruning(mut self, prune_certain: bool) -> Self {
        self.prune_certain = prune_certain;
        self
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Proofs of every target, plus the proofs of the base facts behind
    /// each negation leaf they reach, transitively.
    pub fn proof_set(&self, targets: &[Literal]) -> ProofSet {
        let proofs = self.proofs_of(targets);
        let mut negations: FxHashMap<String, Vec<Clause>> = FxHashMap::default();

        let mut pending: Vec<Literal> = negation_leaves(&proofs).collect();
        while let Some(leaf) = pending.pop() {
            let key = leaf.id();
            if negations.contains_key(&key) {
                continue;
            }
            let base = self.proofs_of(self.snapshot.negation_bases(&leaf));
            pending.extend(negation_leaves(&base));
            negations.insert(key, base);
        }
        trace!(proofs = proofs.len(), negations = negations.len(), "proof set");
        ProofSet { proofs, negations }
    }

    fn proofs_of(&self, targets: &[Literal]) -> Vec<Clause> {
        let mut out = Vec::new();
        let mut seen = FxHashSet::default();
        for target in targets {
            for proof in self.proofs(target) {
                if seen.insert(proof.clone()) {
                    out.push(proof);
                }
            }
        }
        out
    }

    pub fn proofs(&self, target: &Literal) -> Vec<Clause> {
        let mut stack = Vec::new();
        let mut memo = FxHashMap::default();
        let (alternatives, _) = self.expand(target, &mut stack, &mut memo);
        trace!(target = %target, proofs = alternatives.len(), "expanded");
        alternatives.into_iter().map(|body| Clause::new(target.clone(), body)).collect()
    }

    /// Alternative leaf bodies for `lit`, plus the shallowest stack depth a
    /// cycle was cut at (`NO_CUT` when none). Results cut above `lit` are
    /// partial and never memoised.
    fn expand(
        &self,
        lit: &Literal,
        stack: &mut Vec<String>,
        memo: &mut FxHashMap<String, Vec<Vec<Literal>>>,
    ) -> (Vec<Vec<Literal>>, usize) {
        let key = lit.id();
        if let Some(depth) = stack.iter().position(|k| *k == key) {
            return (Vec::new(), depth);
        }
        if let Some(known) = memo.get(&key) {
            return (known.clone(), NO_CUT);
        }

        let mut alternatives: Vec<Vec<Literal>> = Vec::new();
        let rules = self.rules.get(&key);
        if rules.is_none() || self.snapshot.is_asserted(lit) {
            alternatives.push(vec![lit.clone()]);
        }

        let depth = stack.len();
        let mut cut = NO_CUT;
        if let Some(rules) = rules {
            stack.push(key.clone());
            for rule in rules {
                if rule.leaf_only {
                    alternatives.push(rule.clause.body().to_vec());
                    continue;
                }
                let mut combos: Vec<Vec<Literal>> = vec![Vec::new()];
                for b in rule.clause.body() {
                    let (sub, sub_cut) = self.expand(b, stack, memo);
                    cut = cut.min(sub_cut);
                    if sub.is_empty() {
                        combos.clear();
                        break;
                    }
                    combos = combine(&combos, &sub);
                }
                alternatives.extend(combos);
            }
            stack.pop();
        }

        let alternatives = self.normalize(alternatives);
        if cut >= depth {
            memo.insert(key, alternatives.clone());
            cut = NO_CUT;
        }
        (alternatives, cut)
    }

    /// Canonical bodies, duplicates dropped, and of the bodies made of
    /// certain literals only the shortest kept.
    fn normalize(&self, alternatives: Vec<Vec<Literal>>) -> Vec<Vec<Literal>> {
        let mut seen = FxHashSet::default();
        let mut out: Vec<Vec<Literal>> = Vec::new();
        for mut body in alternatives {
            body.sort_by_cached_key(Literal::id);
            body.dedup_by(|a, b| a.id() == b.id());
            let key: Vec<String> = body.iter().map(Literal::id).collect();
            if seen.insert(key) {
                out.push(body);
            }
        }
        if !self.prune_certain {
            return out;
        }

        let shortest = out
            .iter()
            .enumerate()
            .filter(|(_, body)| body.iter().all(Literal::is_certain))
            .min_by_key(|(_, body)| body.len())
            .map(|(i, _)| i);
        match shortest {
            None => out,
            Some(keep) => out
                .into_iter()
                .enumerate()
                .filter(|(i, body)| *i == keep || !body.iter().all(Literal::is_certain))
                .map(|(_, body)| body)
                .collect(),
        }
    }
}

/// Proofs of a set of answers, and for every negation leaf `~L` they rest
/// on, the proofs of `L`.
#[derive(Debug, Clone, Default)]
pub struct ProofSet {
    proofs: Vec<Clause>,
    negations: FxHashMap<String, Vec<Clause>>,
}

impl ProofSet {
    pub fn proofs(&self) -> &[Clause] {
        &self.proofs
    }

    /// Proofs of the base literal of the negation leaf `leaf`.
    pub fn negation(&self, leaf: &Literal) -> Option<&[Clause]> {
        self.negations.get(&leaf.id()).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.proofs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proofs.is_empty()
    }
}

impl From<Vec<Clause>> for ProofSet {
    fn from(proofs: Vec<Clause>) -> Self {
        Self { proofs, negations: FxHashMap::default() }
    }
}

fn negation_leaves(proofs: &[Clause]) -> impl Iterator<Item = Literal> + '_ {
    proofs
        .iter()
        .flat_map(|p| p.body())
        .filter(|b| b.is_negated())
        .cloned()
}

fn is_rule_weight(lit: &Literal) -> bool {
    !lit.is_negated() && lit.predicate().name().starts_with(PROBA_PREFIX)
}

/// Ties the rule-weight literals of a grounded rule to that instance: the
/// weight is drawn once per instance, however many proofs reach it.
fn weigh_instance(rule: &Clause, instance: usize) -> Clause {
    if !rule.body().iter().any(is_rule_weight) {
        return rule.clone();
    }
    let body = rule
        .body()
        .iter()
        .map(|b| if is_rule_weight(b) { b.extended(Term::constant(format!("r{instance}"))) } else { b.clone() })
        .collect();
    Clause::new(rule.head().clone(), body)
}

fn combine(prefixes: &[Vec<Literal>], suffixes: &[Vec<Literal>]) -> Vec<Vec<Literal>> {
    let mut out = Vec::with_capacity(prefixes.len() * suffixes.len());
    for p in prefixes {
        for s in suffixes {
            let mut body = p.clone();
            body.extend(s.iter().cloned());
            out.push(body);
        }
    }
    out
}
