use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, trace, warn};

use crate::bdd::{Bdd, BddManager};
use crate::clause::Clause;
use crate::config::EngineConfig;
use crate::literal::Literal;
use crate::proof::ProofSet;
use crate::solver::round;

/// A proof set compiled into one BDD.
#[derive(Debug)]
pub struct Compiled {
    pub manager: BddManager,
    pub root: Bdd,
    /// Probability of each BDD variable.
    pub weights: Vec<f64>,
    /// Literal id behind each BDD variable.
    pub labels: Vec<String>,
}

impl Compiled {
    pub fn probability(&self) -> f64 {
        self.manager.probability(self.root, |v| self.weights.get(v as usize).copied().unwrap_or(1.0))
    }
}

/// Exact probability of a literal from its proofs, by weighted model
/// counting over a BDD of the proof set.
///
/// A negation leaf `~L` compiles to the complement of the BDD of `L`'s
/// proofs, so it shares variables with the facts it negates.
#[derive(Debug, Clone)]
pub struct Estimator {
    proofs: ProofSet,
    config: EngineConfig,
}

impl Estimator {
    pub fn new(proofs: impl Into<ProofSet>) -> Self {
        Self::with_config(proofs, EngineConfig::default())
    }

    pub fn with_config(proofs: impl Into<ProofSet>, config: EngineConfig) -> Self {
        Self { proofs: proofs.into(), config }
    }

    pub fn proofs(&self) -> &[Clause] {
        self.proofs.proofs()
    }

    /// Proofs whose head unifies with `lit`.
    fn relevant<'a>(&'a self, lit: &'a Literal) -> impl Iterator<Item = &'a Clause> + 'a {
        self.proofs()
            .iter()
            .filter(move |p| lit.is_relevant(p.head()) && lit.unify(p.head()).is_some())
    }

    /// Builds the BDD of the proofs of `lit`: each proof a conjunction of
    /// its weighted literals, the set their disjunction.
    pub fn compile(&self, lit: &Literal) -> Compiled {
        let mut builder = Builder::new(&self.proofs, &self.config);
        let root = builder.disjunction(self.relevant(lit));
        let Builder { mut manager, weights, labels, .. } = builder;

        if self.config.sift_before_count && !root.is_terminal() {
            manager.ref_root(root);
            if let Err(err) = manager.sift() {
                warn!(%err, "sifting skipped");
            }
        }
        debug!(literal = %lit, vars = weights.len(), nodes = manager.size(root), "compiled");
        Compiled { manager, root, weights, labels }
    }

    /// `P(lit)`, rounded to `digits` decimals when given.
    pub fn probability(&self, lit: &Literal, digits: Option<u32>) -> f64 {
        let p = self.compile(lit).probability();
        match digits {
            Some(d) => round(p, d),
            None => p,
        }
    }
}

struct Builder<'a> {
    set: &'a ProofSet,
    manager: BddManager,
    vars: FxHashMap<String, u32>,
    weights: Vec<f64>,
    labels: Vec<String>,
    negations: FxHashMap<String, Bdd>,
    open: FxHashSet<String>,
}

impl<'a> Builder<'a> {
    fn new(set: &'a ProofSet, config: &EngineConfig) -> Self {
        Self {
            set,
            manager: BddManager::new(config),
            vars: FxHashMap::default(),
            weights: Vec::new(),
            labels: Vec::new(),
            negations: FxHashMap::default(),
            open: FxHashSet::default(),
        }
    }

    fn disjunction(&mut self, proofs: impl IntoIterator<Item = &'a Clause>) -> Bdd {
        let mut disjuncts = Vec::new();
        for proof in proofs {
            let mut conjuncts = Vec::new();
            for b in proof.body() {
                if b.is_negated() {
                    let f = self.negation(b);
                    conjuncts.push(f);
                } else if !b.is_certain() {
                    let f = self.var(b);
                    conjuncts.push(f);
                }
            }
            disjuncts.push(self.manager.and_all(conjuncts));
        }
        self.manager.or_all(disjuncts)
    }

    fn var(&mut self, lit: &Literal) -> Bdd {
        let key = lit.id();
        let var = match self.vars.get(&key) {
            Some(&var) => var,
            None => {
                let var = self.weights.len() as u32;
                self.weights.push(lit.probability());
                self.labels.push(key.clone());
                self.vars.insert(key, var);
                var
            }
        };
        self.manager.var(var)
    }

    /// `not(proofs of L)` for the leaf `~L`. An uncertain leaf without
    /// recorded base proofs, or one reached again while its own base is
    /// being compiled, stays an independent variable.
    fn negation(&mut self, leaf: &Literal) -> Bdd {
        let key = leaf.id();
        if let Some(&f) = self.negations.get(&key) {
            return f;
        }
        let set = self.set;
        let Some(base) = set.negation(leaf) else {
            return if leaf.is_certain() { Bdd::TRUE } else { self.var(leaf) };
        };
        if !self.open.insert(key.clone()) {
            trace!(leaf = %leaf, "negation cycle");
            return self.var(leaf);
        }
        let holds = self.disjunction(base);
        let f = self.manager.not(holds);
        self.open.remove(&key);
        self.negations.insert(key, f);
        f
    }
}
