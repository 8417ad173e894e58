use rustc_hash::FxHashMap;
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::builtins::{Output, PrimitiveError, PrimitiveKind};
use crate::clause::Clause;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::kb::KnowledgeBase;
use crate::literal::Literal;
use crate::estimator::Estimator;
use crate::proof::{ProofAssistant, ProofSet, Snapshot};
use crate::store::{memory_store_factory, BloomFilter, StoreFactory};
use crate::subgoal::{Derivation, Origin, Subgoal, SubgoalId, Waiter};
use crate::term::{Constant, Term, VarPool};

/// Counters for one `solve` / `proofs` run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SolverStats {
    pub subgoals: usize,
    pub facts: usize,
    pub bloom_fast_path: usize,
    pub primitives: usize,
    pub primitive_failures: usize,
    pub rules_grounded: usize,
    pub unprovable: usize,
}

/// Subgoals of one run, one per literal up to variable renaming.
#[derive(Debug, Default)]
struct Table {
    subgoals: Vec<Subgoal>,
    index: FxHashMap<String, SubgoalId>,
    /// Negation facts by id, with the base facts each stands against.
    negations: FxHashMap<String, (Literal, Vec<Literal>)>,
}

/// Tabled (SLG-style) resolution over a knowledge base.
///
/// A solver runs one query at a time: each call to [`solve`](Self::solve) or
/// [`proofs`](Self::proofs) builds a fresh table. The knowledge base is
/// only read, so several solvers may share it across threads.
pub struct Solver<'kb> {
    kb: &'kb KnowledgeBase,
    config: EngineConfig,
    pool: VarPool,
    store_factory: StoreFactory,
    table: Table,
    root: Option<SubgoalId>,
    max_samples: Option<usize>,
    stats: SolverStats,
}

impl<'kb> Solver<'kb> {
    pub fn new(kb: &'kb KnowledgeBase) -> Self {
        Self::with_config(kb, EngineConfig::default())
    }

    pub fn with_config(kb: &'kb KnowledgeBase, config: EngineConfig) -> Self {
        Self {
            kb,
            config,
            pool: VarPool::new(),
            store_factory: memory_store_factory(),
            table: Table::default(),
            root: None,
            max_samples: None,
            stats: SolverStats::default(),
        }
    }

    /// Backing store for every subgoal created from now on.
    pub fn with_store_factory(mut self, factory: StoreFactory) -> Self {
        self.store_factory = factory;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Statistics of the last run.
    pub fn stats(&self) -> &SolverStats {
        &self.stats
    }

    /// Every grounded answer to `query`. With `max_samples` the root stops
    /// accepting answers once it holds that many; the result is then a
    /// sample, not the full answer set.
    pub fn solve(&mut self, query: &Literal, max_samples: Option<usize>) -> Result<Vec<Clause>> {
        let root = self.run(query, max_samples.or(self.config.max_samples))?;
        Ok(self.table.subgoals[root.0].facts())
    }

    /// The proof set of every answer to `query`: clauses whose head is the
    /// answer and whose body lists the leaf literals it rests on, with the
    /// proofs behind each negation leaf.
    pub fn proofs(&mut self, query: &Literal) -> Result<ProofSet> {
        let root = self.run(query, None)?;
        let answers: Vec<Literal> = self.table.subgoals[root.0].facts().iter().map(|f| f.head().clone()).collect();
        let set = ProofAssistant::new(self.snapshot(), &self.config).proof_set(&answers);
        debug!(query = %query, proofs = set.len(), "proofs collected");
        Ok(set)
    }

    /// Immutable view of the last run's tables.
    pub fn snapshot(&self) -> Snapshot {
        let mut snapshot = Snapshot::default();
        for sg in &self.table.subgoals {
            for fact in sg.facts() {
                let origin = if sg.is_asserted(fact.head()) { Origin::Asserted } else { Origin::Derived };
                snapshot.add_fact(fact.head().clone(), origin);
            }
            for rule in sg.grounded_rules() {
                snapshot.add_rule(rule.clone());
            }
        }
        for (leaf, bases) in self.table.negations.values() {
            snapshot.add_negation(leaf, bases.clone());
        }
        snapshot
    }

    fn run(&mut self, query: &Literal, max_samples: Option<usize>) -> Result<SubgoalId> {
        if query.is_negated() && !query.is_semi_grounded() {
            return Err(Error::NonGroundedNegation(query.to_string()));
        }
        self.table = Table::default();
        self.stats = SolverStats::default();
        self.max_samples = max_samples;
        self.root = None;

        let query = query.shuffle(&self.pool);
        let (root, _) = self.subgoal_for(&query);
        self.root = Some(root);
        self.search(root)?;

        debug!(query = %query, stats = ?self.stats, "run finished");
        Ok(root)
    }

    fn subgoal_for(&mut self, lit: &Literal) -> (SubgoalId, bool) {
        let key = lit.variant();
        if let Some(&id) = self.table.index.get(&key) {
            return (id, false);
        }
        let id = SubgoalId(self.table.subgoals.len());
        let bloom = BloomFilter::new(self.config.bloom_expected_items, self.config.bloom_false_positive_rate);
        self.table.subgoals.push(Subgoal::new(lit.clone(), (self.store_factory)(), bloom));
        self.table.index.insert(key, id);
        self.stats.subgoals += 1;
        trace!(subgoal = %lit, "new subgoal");
        (id, true)
    }

    /// The root has reached its sample size.
    fn done(&self) -> bool {
        self.root.is_some_and(|r| self.table.subgoals[r.0].is_capped())
    }

    //
    // ------------------------------ search ------------------------------
    //

    fn search(&mut self, id: SubgoalId) -> Result<()> {
        let lit = self.table.subgoals[id.0].literal().clone();
        if lit.is_negated() {
            return self.search_negation(id, &lit);
        }
        if lit.is_primitive() {
            for answer in self.run_primitive(&lit) {
                self.fact(id, Clause::fact(answer), Origin::Asserted)?;
            }
            return Ok(());
        }

        let kb = self.kb;
        let mut matched = false;
        for fact in kb.facts(&lit) {
            if self.done() {
                return Ok(());
            }
            if lit.unify(fact.head()).is_some() {
                matched = true;
                self.fact(id, fact.clone(), Origin::Asserted)?;
            }
        }
        for rule in kb.rules(&lit) {
            if self.done() {
                return Ok(());
            }
            let rule = rule.rename(&self.pool);
            if let Some(subst) = rule.head().unify(&lit) {
                matched = true;
                self.rule(id, Derivation::start(rule.subst(&subst)))?;
            }
        }

        if !matched {
            self.unprovable(id);
        }
        Ok(())
    }

    fn unprovable(&mut self, id: SubgoalId) {
        self.stats.unprovable += 1;
        let sg = &mut self.table.subgoals[id.0];
        sg.mark_unprovable();
        let lit = sg.literal().clone();
        let parents: Vec<SubgoalId> = sg.waiters.iter().map(|w| w.subgoal).collect();
        trace!(subgoal = %lit, "unprovable");
        for parent in parents {
            self.table.subgoals[parent.0].trie.cleanup(&lit);
        }
    }

    /// `~L`: certain when `L` has no facts, dropped when `L` holds for
    /// certain, otherwise one fact weighted with `1 - P(L)` that records
    /// the facts of `L` it stands against.
    fn search_negation(&mut self, id: SubgoalId, lit: &Literal) -> Result<()> {
        if !lit.is_semi_grounded() {
            return Err(Error::NonGroundedNegation(lit.to_string()));
        }
        let base = lit.negate()?;
        let (base_id, created) = self.subgoal_for(&base);
        if created {
            self.search(base_id)?;
        }

        let base_sg = &self.table.subgoals[base_id.0];
        if base_sg.is_unprovable() || base_sg.fact_count() == 0 {
            return self.fact(id, Clause::fact(lit.clone()), Origin::Asserted);
        }
        let bases: Vec<Literal> = base_sg.facts().iter().map(|f| f.head().clone()).collect();

        let complement = 1.0 - self.estimate(&base, &bases);
        if round(complement, self.config.negation_digits) == 0.0 {
            trace!(negation = %lit, "base holds for certain");
            self.unprovable(id);
            return Ok(());
        }
        let leaf = lit.clone().with_probability(complement);
        self.table.negations.insert(leaf.id(), (leaf.clone(), bases));
        self.fact(id, Clause::fact(leaf), Origin::Asserted)
    }

    /// Exact `P(base)` from the facts found for it so far.
    fn estimate(&self, base: &Literal, facts: &[Literal]) -> f64 {
        let set = ProofAssistant::new(self.snapshot(), &self.config).proof_set(facts);
        Estimator::with_config(set, self.config.clone()).probability(base, None)
    }

    //
    // ------------------------------ facts and rules ------------------------------
    //

    fn fact(&mut self, id: SubgoalId, fact: Clause, origin: Origin) -> Result<()> {
        let is_root = self.root == Some(id);
        let sg = &mut self.table.subgoals[id.0];
        if sg.is_capped() {
            return Ok(());
        }
        let Some(fast) = sg.add_fact(&fact, origin) else {
            return Ok(());
        };
        self.stats.facts += 1;
        if fast {
            self.stats.bloom_fast_path += 1;
        }
        if is_root && self.max_samples.is_some_and(|n| sg.fact_count() >= n) {
            sg.mark_capped();
        }
        trace!(subgoal = %sg.literal(), fact = %fact, "fact");

        let waiters = sg.waiters.clone();
        for waiter in waiters {
            if self.done() {
                break;
            }
            self.ground(waiter.subgoal, waiter.derivation, &fact)?;
        }
        Ok(())
    }

    fn rule(&mut self, id: SubgoalId, deriv: Derivation) -> Result<()> {
        let Some(first) = deriv.rule.body().first().cloned() else {
            return Err(Error::Internal(format!("rule `{}` has nothing left to resolve", deriv.rule)));
        };

        if first.is_primitive() {
            for answer in self.run_primitive(&first) {
                self.ground(id, deriv.clone(), &Clause::fact(answer))?;
            }
            return Ok(());
        }
        if first.is_negated() && !first.is_semi_grounded() {
            return Err(Error::NonGroundedNegation(format!("{first} in `{}`", deriv.rule)));
        }

        let (child, created) = self.subgoal_for(&first);
        if self.table.subgoals[child.0].is_unprovable() {
            trace!(rule = %deriv.rule, "waits on an unprovable subgoal");
            return Ok(());
        }
        self.table.subgoals[id.0].trie.open(deriv.node, &first)?;
        let waiter = Waiter { subgoal: id, derivation: deriv.clone() };
        if created {
            self.table.subgoals[child.0].waiters.push(waiter);
            return self.search(child);
        }

        let known = self.table.subgoals[child.0].facts();
        self.table.subgoals[child.0].waiters.push(waiter);
        for fact in known {
            if self.done() {
                break;
            }
            self.ground(id, deriv.clone(), &fact)?;
        }
        Ok(())
    }

    /// Resolves the derivation's next literal against `fact`.
    fn ground(&mut self, id: SubgoalId, deriv: Derivation, fact: &Clause) -> Result<()> {
        let Some(rest) = deriv.rule.resolve(fact.head()) else {
            return Ok(());
        };
        let node = self.table.subgoals[id.0].trie.update(deriv.node, fact.head().clone())?;
        trace!(rule = %rest, "resolved {}", fact.head());

        if rest.body().is_empty() {
            let head = rest.head().clone();
            if !head.is_semi_grounded() {
                warn!(head = %head, "derived head is not grounded");
                return Ok(());
            }
            let sg = &mut self.table.subgoals[id.0];
            let grounded = sg.trie.complete(node, head.clone())?;
            if sg.record_grounded(grounded) {
                self.stats.rules_grounded += 1;
            }
            return self.fact(id, Clause::fact(head), Origin::Derived);
        }
        self.rule(id, Derivation { rule: rest, node })
    }

    /// Grounded instances of a primitive literal: one per output.
    fn run_primitive(&mut self, lit: &Literal) -> Vec<Literal> {
        let Some(name) = lit.predicate().primitive_name() else {
            return Vec::new();
        };
        let kb = self.kb;
        let primitives = kb.primitives();
        let kind = primitives.kind(name);
        let inputs = match kind {
            PrimitiveKind::Function => lit.terms().get(1..).unwrap_or(&[]),
            PrimitiveKind::Test => lit.terms(),
        };
        let args: Option<Vec<Constant>> = inputs.iter().map(|t| t.as_const().cloned()).collect();

        self.stats.primitives += 1;
        let result = match args {
            Some(args) => primitives.call(name, &args),
            None => Err(PrimitiveError::Unbound { name: name.to_string() }),
        };
        let outputs = match result {
            Ok(Output::None) => Vec::new(),
            Ok(Output::One(c)) => vec![c],
            Ok(Output::Many(cs)) => cs,
            Err(err) => {
                self.stats.primitive_failures += 1;
                warn!(literal = %lit, error = %err, "primitive failed");
                return Vec::new();
            }
        };

        match kind {
            PrimitiveKind::Test => outputs
                .iter()
                .any(|c| c.as_bool() == Some(true))
                .then(|| lit.clone())
                .into_iter()
                .collect(),
            PrimitiveKind::Function => outputs
                .into_iter()
                .filter_map(|value| {
                    let mut terms = Vec::with_capacity(lit.terms().len());
                    terms.push(Term::Const(value));
                    terms.extend(inputs.iter().cloned());
                    let grounded = Literal::new(lit.predicate().clone(), terms);
                    lit.unify(&grounded).map(|_| grounded)
                })
                .collect(),
        }
    }
}

pub(crate) fn round(value: f64, digits: u32) -> f64 {
    let scale = 10f64.powi(digits as i32);
    (value * scale).round() / scale
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins::Primitives;
    use crate::parser::parse_query;

    fn kb(text: &str) -> KnowledgeBase {
        let mut kb = KnowledgeBase::new();
        kb.load_program(text).unwrap();
        kb
    }

    fn answers(kb: &KnowledgeBase, query: &str) -> Vec<String> {
        let mut solver = Solver::new(kb);
        let mut out: Vec<String> =
            solver.solve(&parse_query(query).unwrap(), None).unwrap().iter().map(|c| c.to_string()).collect();
        out.sort();
        out
    }

    #[test]
    fn facts_and_simple_rules() {
        let kb = kb("parent(ann, bob).\nparent(bob, cid).\ngrand(X, Z) :- parent(X, Y), parent(Y, Z).");
        assert_eq!(answers(&kb, "grand(ann, W)"), vec!["grand(ann, cid)"]);
        assert_eq!(answers(&kb, "parent(X, Y)").len(), 2);
        assert!(answers(&kb, "grand(bob, W)").is_empty());
    }

    #[test]
    fn left_recursion_terminates() {
        let kb = kb(
            "edge(a, b).\nedge(b, c).\nedge(c, a).
             path(X, Y) :- path(X, Z), edge(Z, Y).
             path(X, Y) :- edge(X, Y).",
        );
        assert_eq!(answers(&kb, "path(a, Y)"), vec!["path(a, a)", "path(a, b)", "path(a, c)"]);
    }

    #[test]
    fn primitives_compute_and_filter() {
        let kb = kb(
            "age(ann, 30).\nage(bob, 12).
             adult(X) :- age(X, A), A >= 18.
             next_year(X, B) :- age(X, A), B is fn_add(A, 1).
             counted(N) :- N is fn_range(1, 3).",
        );
        assert_eq!(answers(&kb, "adult(X)"), vec!["adult(ann)"]);
        assert_eq!(answers(&kb, "next_year(bob, B)"), vec!["next_year(bob, 13)"]);
        assert_eq!(answers(&kb, "counted(N)").len(), 3);
    }

    #[test]
    fn failing_primitives_degrade_to_no_result() {
        let prims = Primitives::new().register("boom", false, |_| {
            Err(PrimitiveError::Failed { name: "boom".into(), msg: "offline".into() })
        });
        let mut kb = KnowledgeBase::with_primitives(prims);
        kb.load_program("item(a).\nfetched(X, Y) :- item(X), Y is fn_boom(X).\nok(X) :- item(X).")
            .unwrap();
        let mut solver = Solver::new(&kb);
        assert!(solver.solve(&parse_query("fetched(a, Y)").unwrap(), None).unwrap().is_empty());
        assert_eq!(solver.stats().primitive_failures, 1);
        assert_eq!(solver.solve(&parse_query("ok(a)").unwrap(), None).unwrap().len(), 1);
    }

    #[test]
    fn negation_as_failure() {
        let kb = kb(
            "person(ann).\nperson(bob).\nfriend(ann, bob).
             lonely(X) :- person(X), ~friend(X, _).",
        );
        assert_eq!(answers(&kb, "lonely(X)"), vec!["lonely(bob)"]);
        assert_eq!(answers(&kb, "~friend(bob, _)"), vec!["~friend(bob, _)"]);
        assert!(answers(&kb, "~friend(ann, bob)").is_empty());
    }

    #[test]
    fn weighted_negation_takes_the_complement() {
        let kb = kb("0.4::p(1).");
        assert_eq!(answers(&kb, "~p(1)"), vec!["0.6::~p(1)"]);
    }

    #[test]
    fn sample_size_caps_the_root() {
        let kb = kb("n(1).\nn(2).\nn(3).\nn(4).");
        let mut solver = Solver::new(&kb);
        let sample = solver.solve(&parse_query("n(X)").unwrap(), Some(2)).unwrap();
        assert_eq!(sample.len(), 2);
        let all = solver.solve(&parse_query("n(X)").unwrap(), None).unwrap();
        assert_eq!(all.len(), 4);
    }

    #[test]
    fn runs_are_independent() {
        let kb = kb("edge(a, b).\nedge(b, c).\npath(X, Y) :- edge(X, Y).\npath(X, Y) :- edge(X, Z), path(Z, Y).");
        let mut solver = Solver::new(&kb);
        let q = parse_query("path(a, Y)").unwrap();
        let first = solver.solve(&q, None).unwrap();
        let stats = solver.stats().clone();
        let second = solver.solve(&q, None).unwrap();
        assert_eq!(first, second);
        assert_eq!(&stats, solver.stats());
    }

    #[test]
    fn unprovable_subgoals_are_marked() {
        let kb = kb("p(X) :- q(X), r(X).\nq(a).");
        let mut solver = Solver::new(&kb);
        assert!(solver.solve(&parse_query("p(X)").unwrap(), None).unwrap().is_empty());
        assert_eq!(solver.stats().unprovable, 1);
    }

    #[test]
    fn repeated_variables_get_their_own_subgoal() {
        let facts = "e(a, a).\ne(a, b).\n";
        let diagonal_first = kb(&format!("{facts}r(X, Y) :- e(Z, Z), e(X, Y)."));
        let general_first = kb(&format!("{facts}r(X, Y) :- e(X, Y), e(Z, Z)."));
        for kb in [&diagonal_first, &general_first] {
            assert_eq!(answers(kb, "r(X, Y)"), vec!["r(a, a)", "r(a, b)"]);
        }
        assert_eq!(answers(&diagonal_first, "e(X, X)"), vec!["e(a, a)"]);
    }

    #[test]
    fn unprovable_subgoals_are_searched_once() {
        let kb = kb("p(X) :- q(X), r(X).\ns(X) :- q(X), r(X), t(X).\nq(a).\ngo(X) :- p(X).\ngo(X) :- s(X).");
        let mut solver = Solver::new(&kb);
        assert!(solver.solve(&parse_query("go(X)").unwrap(), None).unwrap().is_empty());
        assert_eq!(solver.stats().unprovable, 1);
    }
}
