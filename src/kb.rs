use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, warn};

use crate::builtins::Primitives;
use crate::clause::Clause;
use crate::error::{Error, Result};
use crate::literal::{Literal, Predicate};
use crate::normalize::{check_rule, reorder_body};
use crate::parser::Parser;
use crate::term::{Term, VarPool};

/// Name prefix of the synthetic facts carrying a rule's head probability.
pub const PROBA_PREFIX: &str = "proba_";

/// Facts and rules indexed by predicate.
///
/// Read-only while queries run: every assertion has to happen before the
/// first solver borrows it.
#[derive(Debug, Default)]
pub struct KnowledgeBase {
    primitives: Primitives,
    facts: FxHashMap<Predicate, Vec<Clause>>,
    rules: FxHashMap<Predicate, Vec<Clause>>,
    seen: FxHashSet<Clause>,
    next_proba: usize,
    pool: VarPool,
}

impl KnowledgeBase {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry is fixed for the lifetime of the knowledge base.
    pub fn with_primitives(primitives: Primitives) -> Self {
        Self { primitives, ..Self::default() }
    }

    pub fn primitives(&self) -> &Primitives {
        &self.primitives
    }

    /// A parser that knows this knowledge base's primitives.
    pub fn parser(&self) -> Parser {
        Parser::with_primitives(self.primitives.clone())
    }

    /// Stores `clause`, returning whether it was new.
    ///
    /// A rule whose head has probability `p < 1` is stored as the rule with
    /// a certain head plus `proba_<n>(true)` appended to its body, and the
    /// fact `p::proba_<n>(true)`.
    pub fn azzert(&mut self, clause: Clause) -> Result<bool> {
        let head = clause.head();
        if head.is_primitive() {
            debug!(clause = %clause, "ignoring clause with a primitive head");
            return Ok(false);
        }
        if head.is_negated() {
            return Err(Error::NegatedHead(clause.to_string()));
        }
        let p = head.probability();
        if !(p > 0.0 && p <= 1.0) {
            return Err(Error::InvalidProbability { probability: p, text: clause.to_string() });
        }
        if let Some(weighted) = clause.body().iter().find(|l| !l.is_certain()) {
            return Err(Error::WeightedBodyLiteral(weighted.to_string()));
        }

        if clause.body().is_empty() {
            if !head.is_grounded() {
                return Err(Error::NonGroundedFact(clause.to_string()));
            }
            return Ok(self.store_fact(clause));
        }

        check_rule(&clause, &self.primitives)?;
        let clause = reorder_body(clause, &self.primitives)?;
        if !self.seen.insert(clause.clone()) {
            return Ok(false);
        }
        if clause.head().is_certain() {
            self.store_rule(clause);
            return Ok(true);
        }

        let proba = Literal::atom(&format!("{PROBA_PREFIX}{}", self.next_proba), vec![Term::constant("true")])?;
        self.next_proba += 1;
        debug!(rule = %clause, proba = %proba, "rewriting probabilistic head");

        let (head, mut body) = clause.into_parts();
        self.store_fact(Clause::fact(proba.clone().with_probability(p)));
        body.push(proba);
        self.store_rule(Clause::new(head.with_probability(1.0), body));
        Ok(true)
    }

    pub fn azzert_all<I>(&mut self, clauses: I) -> Result<usize>
    where
        I: IntoIterator<Item = Clause>,
    {
        let mut added = 0;
        for clause in clauses {
            if self.azzert(clause)? {
                added += 1;
            }
        }
        Ok(added)
    }

    /// Parses `text`, asserts its clauses and returns its queries.
    pub fn load_program(&mut self, text: &str) -> Result<Vec<Literal>> {
        let program = self.parser().parse_program(text)?;
        let added = self.azzert_all(program.clauses)?;
        debug!(added, queries = program.queries.len(), "program loaded");
        Ok(program.queries)
    }

    fn store_fact(&mut self, fact: Clause) -> bool {
        if !self.seen.insert(fact.clone()) {
            return false;
        }
        debug!(fact = %fact, "assert");
        self.facts.entry(fact.head().predicate().clone()).or_default().push(fact);
        true
    }

    fn store_rule(&mut self, rule: Clause) {
        debug!(rule = %rule, "assert");
        self.seen.insert(rule.clone());
        self.rules.entry(rule.head().predicate().clone()).or_default().push(rule);
    }

    /// Stored facts whose head may unify with `lit`.
    pub fn facts<'a>(&'a self, lit: &'a Literal) -> impl Iterator<Item = &'a Clause> + 'a {
        self.facts
            .get(lit.predicate())
            .into_iter()
            .flatten()
            .filter(move |c| lit.is_relevant(c.head()))
    }

    /// Stored rules whose head may unify with `lit`.
    pub fn rules<'a>(&'a self, lit: &'a Literal) -> impl Iterator<Item = &'a Clause> + 'a {
        self.rules
            .get(lit.predicate())
            .into_iter()
            .flatten()
            .filter(move |c| lit.is_relevant(c.head()))
    }

    /// Number of stored clauses.
    pub fn len(&self) -> usize {
        self.facts.values().map(Vec::len).sum::<usize>() + self.rules.values().map(Vec::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn predicates(&self) -> Vec<&Predicate> {
        let mut preds: Vec<&Predicate> = self.facts.keys().chain(self.rules.keys()).collect();
        preds.sort();
        preds.dedup();
        preds
    }

    pub fn all_rules(&self) -> impl Iterator<Item = &Clause> {
        self.rules.values().flatten()
    }

    //
    // ------------------------------ compaction ------------------------------
    //

    /// Inlines every predicate defined by a single rule, without facts, and
    /// used by exactly one positive body literal of another rule into that
    /// rule. Inlined predicates stay queryable. Returns how many were
    /// inlined.
    pub fn compact(&mut self) -> Result<usize> {
        let mut done: FxHashSet<Predicate> = FxHashSet::default();
        let mut inlined = 0;
        loop {
            let Some((q, site)) = self.next_inline_candidate(&done) else {
                break;
            };
            done.insert(q.clone());
            let Some(definition) = self.rules.get(&q).and_then(|r| r.first()).cloned() else {
                continue;
            };
            let Some(referrer) = self.rules.get(&site.predicate).and_then(|r| r.get(site.rule)).cloned() else {
                continue;
            };

            let Some(merged) = self.inline(&referrer, site.literal, &definition)? else {
                warn!(definition = %definition, referrer = %referrer, "skipping compaction, heads do not unify");
                continue;
            };
            debug!(from = %referrer, to = %merged, "inlined `{}`", q.name());

            self.seen.remove(&referrer);
            self.seen.insert(merged.clone());
            if let Some(slot) = self.rules.get_mut(&site.predicate).and_then(|r| r.get_mut(site.rule)) {
                *slot = merged;
            }
            inlined += 1;
        }
        Ok(inlined)
    }

    fn next_inline_candidate(&self, done: &FxHashSet<Predicate>) -> Option<(Predicate, Site)> {
        let mut refs: FxHashMap<&Predicate, Vec<Site>> = FxHashMap::default();
        for (pred, rules) in &self.rules {
            for (ri, rule) in rules.iter().enumerate() {
                for (li, lit) in rule.body().iter().enumerate() {
                    let base = if lit.is_negated() {
                        lit.predicate().negate().ok()
                    } else {
                        Some(lit.predicate().clone())
                    };
                    let Some(base) = base else { continue };
                    let Some((key, _)) = self.rules.get_key_value(&base) else { continue };
                    refs.entry(key).or_default().push(Site {
                        predicate: pred.clone(),
                        rule: ri,
                        literal: li,
                        negated: lit.is_negated(),
                    });
                }
            }
        }

        let mut candidates: Vec<(&Predicate, Site)> = refs
            .into_iter()
            .filter(|(q, _)| !done.contains(*q))
            .filter(|(q, _)| self.rules.get(*q).is_some_and(|r| r.len() == 1))
            .filter(|(q, _)| self.facts.get(*q).map_or(true, Vec::is_empty))
            .filter_map(|(q, mut sites)| {
                if sites.len() != 1 {
                    return None;
                }
                let site = sites.pop()?;
                (!site.negated && site.predicate != *q).then_some((q, site))
            })
            .collect();
        // deterministic order
        candidates.sort_by(|a, b| a.0.cmp(b.0));
        candidates.into_iter().next().map(|(q, site)| (q.clone(), site))
    }

    fn inline(&self, referrer: &Clause, at: usize, definition: &Clause) -> Result<Option<Clause>> {
        let definition = definition.rename(&self.pool);
        let Some(target) = referrer.body().get(at) else {
            return Ok(None);
        };
        let Some(subst) = target.unify(definition.head()) else {
            return Ok(None);
        };
        let mut body = Vec::with_capacity(referrer.body().len() + definition.body().len());
        body.extend(referrer.body()[..at].iter().cloned());
        body.extend(definition.body().iter().cloned());
        body.extend(referrer.body()[at + 1..].iter().cloned());
        let merged = Clause::new(referrer.head().clone(), body).subst(&subst);
        Ok(Some(reorder_body(merged, &self.primitives)?))
    }
}

#[derive(Debug, Clone)]
struct Site {
    predicate: Predicate,
    rule: usize,
    literal: usize,
    negated: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_clause;

    fn kb(text: &str) -> KnowledgeBase {
        let mut kb = KnowledgeBase::new();
        kb.load_program(text).unwrap();
        kb
    }

    #[test]
    fn probabilistic_heads_are_rewritten() {
        let kb = kb("0.7::wet(X) :- rain(X).\n0.2::rain(today).");
        let query = Literal::atom("wet", vec![Term::constant("today")]).unwrap();
        let rules: Vec<&Clause> = kb.rules(&query).collect();
        assert_eq!(rules.len(), 1);
        assert!(rules[0].head().is_certain());
        let last = rules[0].body().last().unwrap();
        assert_eq!(last.to_string(), "proba_0(true)");

        let proba: Vec<&Clause> = kb.facts(last).collect();
        assert_eq!(proba.len(), 1);
        assert_eq!(proba[0].head().probability(), 0.7);
        assert!(kb.all_rules().all(|r| r.head().is_certain()));
    }

    #[test]
    fn duplicates_are_stored_once() {
        let mut kb = kb("0.3::p(1).\n0.6::p(1).\n0.3::p(1).");
        assert_eq!(kb.len(), 2);
        assert!(!kb.azzert(parse_clause("0.6::p(1).").unwrap()).unwrap());
        assert!(kb.azzert(parse_clause("q(X) :- p(X).").unwrap()).unwrap());
        assert!(!kb.azzert(parse_clause("q(Y) :- p(Y).").unwrap()).unwrap());
        assert!(kb.azzert(parse_clause("0.5::r(X) :- p(X).").unwrap()).unwrap());
        assert!(!kb.azzert(parse_clause("0.5::r(X) :- p(X).").unwrap()).unwrap());
        assert_eq!(kb.len(), 5);
    }

    #[test]
    fn relevance_filters_by_constants() {
        let kb = kb("edge(a, b).\nedge(b, c).\nedge(a, c).");
        let goal = parse_clause("edge(a, b).").unwrap().head().clone();
        assert_eq!(kb.facts(&goal).count(), 1);
        let open = Literal::atom("edge", vec![Term::constant("a"), Term::Var(VarPool::new().fresh())]).unwrap();
        assert_eq!(kb.facts(&open).count(), 2);
    }

    #[test]
    fn rejects_invalid_clauses() {
        let mut kb = KnowledgeBase::new();
        let neg = Clause::fact(Literal::atom("~p", vec![Term::constant("a")]).unwrap());
        assert!(matches!(kb.azzert(neg), Err(Error::NegatedHead(_))));

        let pool = VarPool::new();
        let x = Term::Var(pool.fresh());
        let weighted_body = Clause::new(
            Literal::atom("p", vec![x.clone()]).unwrap(),
            vec![Literal::atom("q", vec![x.clone()]).unwrap().with_probability(0.5)],
        );
        assert!(matches!(kb.azzert(weighted_body), Err(Error::WeightedBodyLiteral(_))));

        let open_fact = Clause::fact(Literal::atom("p", vec![x]).unwrap());
        assert!(matches!(kb.azzert(open_fact), Err(Error::NonGroundedFact(_))));

        let zero = Clause::fact(Literal::atom("p", vec![Term::constant("a")]).unwrap().with_probability(0.0));
        assert!(matches!(kb.azzert(zero), Err(Error::InvalidProbability { .. })));

        let prim = parse_clause("fn_foo(a).").unwrap();
        assert!(!kb.azzert(prim).unwrap());
        assert!(kb.is_empty());
    }

    #[test]
    fn compact_inlines_single_use_definitions() {
        let mut kb = kb(
            "edge(a, b).
             hop(X, Y) :- edge(X, Y).
             reach(X, Y) :- hop(X, Y), X != Y.",
        );
        assert_eq!(kb.compact().unwrap(), 1);

        let goal = Literal::atom("reach", vec![Term::constant("a"), Term::constant("b")]).unwrap();
        let rule = kb.rules(&goal).next().unwrap();
        let names: Vec<&str> = rule.body().iter().map(|l| l.predicate().name()).collect();
        assert_eq!(names, vec!["edge", "fn_eq", "fn_is_false"]);

        // the inlined definition is still there
        let hop = Literal::atom("hop", vec![Term::constant("a"), Term::constant("b")]).unwrap();
        assert_eq!(kb.rules(&hop).count(), 1);
    }

    #[test]
    fn compact_leaves_shared_and_recursive_definitions_alone() {
        let mut kb = kb(
            "edge(a, b).
             path(X, Y) :- edge(X, Y).
             path(X, Y) :- path(X, Z), edge(Z, Y).
             twice(X) :- step(X).
             thrice(X) :- step(X).
             step(X) :- edge(X, _).",
        );
        assert_eq!(kb.compact().unwrap(), 0);
    }
}
