use std::fmt;
use std::fmt::Write as _;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::error::{Error, Result};
use crate::term::{Subst, Term, Var, VarPool};

pub const NEGATION_MARKER: char = '~';
pub const PRIMITIVE_PREFIX: &str = "fn_";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Predicate {
    name: Arc<str>,
    arity: usize,
}

impl Predicate {
    /// `name` may start with the negation marker. Negated primitives are
    /// rejected.
    pub fn new(name: impl Into<Arc<str>>, arity: usize) -> Result<Self> {
        let pred = Self { name: name.into(), arity };
        if pred.is_negated() && pred.is_primitive() {
            return Err(Error::NegatedPrimitive(pred.to_string()));
        }
        Ok(pred)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn is_negated(&self) -> bool {
        self.name.starts_with(NEGATION_MARKER)
    }

    pub fn is_primitive(&self) -> bool {
        self.base_name().starts_with(PRIMITIVE_PREFIX)
    }

    /// Name without the negation marker.
    pub fn base_name(&self) -> &str {
        self.name.strip_prefix(NEGATION_MARKER).unwrap_or(&self.name)
    }

    /// Name without the `fn_` prefix, for primitives.
    pub fn primitive_name(&self) -> Option<&str> {
        self.base_name().strip_prefix(PRIMITIVE_PREFIX)
    }

    /// Toggles the negation marker.
    pub fn negate(&self) -> Result<Self> {
        if self.is_negated() {
            Self::new(self.base_name(), self.arity)
        } else {
            Self::new(format!("{NEGATION_MARKER}{}", self.name), self.arity)
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.arity)
    }
}

/// Weighted atom `probability::predicate(terms)`.
///
/// Equality and hashing look at the probability and the
/// [`variant`](Self::variant) only, so literals equal up to variable
/// renaming compare equal.
#[derive(Debug, Clone)]
pub struct Literal {
    probability: f64,
    predicate: Predicate,
    terms: Vec<Term>,
}

impl Literal {
    pub fn new(predicate: Predicate, terms: Vec<Term>) -> Self {
        Self { probability: 1.0, predicate, terms }
    }

    /// Convenience constructor; `name` may carry the negation marker.
    pub fn atom(name: &str, terms: Vec<Term>) -> Result<Self> {
        Ok(Self::new(Predicate::new(name, terms.len())?, terms))
    }

    pub fn with_probability(mut self, probability: f64) -> Self {
        self.probability = probability;
        self
    }

    pub fn probability(&self) -> f64 {
        self.probability
    }

    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }

    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    pub fn is_negated(&self) -> bool {
        self.predicate.is_negated()
    }

    pub fn is_primitive(&self) -> bool {
        self.predicate.is_primitive()
    }

    pub fn is_certain(&self) -> bool {
        self.probability == 1.0
    }

    pub fn is_grounded(&self) -> bool {
        self.terms.iter().all(Term::is_const)
    }

    /// Only constants and wildcards.
    pub fn is_semi_grounded(&self) -> bool {
        self.terms.iter().all(|t| t.is_const() || t.is_wildcard())
    }

    pub fn vars(&self) -> impl Iterator<Item = Var> + '_ {
        self.terms.iter().filter_map(Term::as_var).filter(|v| !v.is_wildcard())
    }

    /// Same literal with the negation marker toggled, certain.
    pub fn negate(&self) -> Result<Self> {
        Ok(Self::new(self.predicate.negate()?, self.terms.clone()))
    }

    /// Predicate and terms, every variable printed as `_`.
    pub fn tag(&self) -> String {
        let mut out = String::with_capacity(16 + self.terms.len() * 8);
        out.push_str(self.predicate.name());
        if !self.terms.is_empty() {
            out.push('(');
            for (i, t) in self.terms.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                match t {
                    Term::Const(c) => out.push_str(c.as_str()),
                    Term::Var(_) => out.push('_'),
                }
            }
            out.push(')');
        }
        out
    }

    /// Predicate and terms with variables numbered by first occurrence. Two
    /// literals share a key exactly when one is a renaming of the other.
    pub fn variant(&self) -> String {
        let mut out = String::with_capacity(16 + self.terms.len() * 8);
        out.push_str(self.predicate.name());
        if !self.terms.is_empty() {
            out.push('(');
            for (i, (t, n)) in self.terms.iter().zip(self.var_numbers()).enumerate() {
                if i > 0 {
                    out.push(',');
                }
                match (t, n) {
                    (Term::Const(c), _) => out.push_str(c.as_str()),
                    (Term::Var(_), n) => {
                        let _ = write!(out, "?{}", n.unwrap_or_default());
                    }
                }
            }
            out.push(')');
        }
        out
    }

    /// First-occurrence number of each variable term, `None` for
    /// constants. Every wildcard is a variable of its own.
    fn var_numbers(&self) -> Vec<Option<usize>> {
        let mut seen: FxHashMap<Var, usize> = FxHashMap::default();
        let mut next = 0;
        self.terms
            .iter()
            .map(|t| {
                let v = t.as_var()?;
                let n = if v.is_wildcard() { next } else { *seen.entry(v).or_insert(next) };
                if n == next {
                    next += 1;
                }
                Some(n)
            })
            .collect()
    }

    /// Full structural fingerprint: probability, predicate and terms
    /// including variable identities.
    pub fn id(&self) -> String {
        let mut out = String::new();
        let _ = write!(out, "{}::{}", self.probability, self.predicate.name());
        if !self.terms.is_empty() {
            out.push('(');
            for (i, t) in self.terms.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                match t {
                    Term::Const(c) => out.push_str(c.as_str()),
                    Term::Var(v) if v.is_wildcard() => out.push('_'),
                    Term::Var(v) => {
                        let _ = write!(out, "?{}", v.id());
                    }
                }
            }
            out.push(')');
        }
        out
    }

    /// Cheap pre-filter: same predicate and equal wherever both sides are
    /// constants. Never rejects a literal that would unify.
    pub fn is_relevant(&self, other: &Literal) -> bool {
        self.predicate == other.predicate
            && self.terms.iter().zip(&other.terms).all(|(a, b)| match (a, b) {
                (Term::Const(x), Term::Const(y)) => x == y,
                _ => true,
            })
    }

    pub fn unify_into(&self, other: &Literal, subst: &mut Subst) -> bool {
        self.predicate == other.predicate
            && self
                .terms
                .iter()
                .zip(&other.terms)
                .all(|(a, b)| Term::unify(a, b, subst))
    }

    pub fn unify(&self, other: &Literal) -> Option<Subst> {
        let mut subst = Subst::new();
        self.unify_into(other, &mut subst).then_some(subst)
    }

    pub fn subst(&self, subst: &Subst) -> Literal {
        if subst.is_empty() {
            return self.clone();
        }
        Literal {
            probability: self.probability,
            predicate: self.predicate.clone(),
            terms: self.terms.iter().map(|t| subst.chase(t)).collect(),
        }
    }

    /// α-renamed copy; `map` is shared so a whole clause renames
    /// consistently. Wildcards are kept as they are.
    pub(crate) fn rename_with(&self, pool: &VarPool, map: &mut FxHashMap<Var, Var>) -> Literal {
        let terms = self
            .terms
            .iter()
            .map(|t| match t {
                Term::Var(v) if !v.is_wildcard() => {
                    Term::Var(*map.entry(*v).or_insert_with(|| pool.fresh()))
                }
                other => other.clone(),
            })
            .collect();
        Literal { probability: self.probability, predicate: self.predicate.clone(), terms }
    }

    pub fn rename(&self, pool: &VarPool) -> Literal {
        self.rename_with(pool, &mut FxHashMap::default())
    }

    /// Like [`rename`](Self::rename) but every wildcard also gets a fresh id.
    pub fn shuffle(&self, pool: &VarPool) -> Literal {
        let mut map = FxHashMap::default();
        let terms = self
            .terms
            .iter()
            .map(|t| match t {
                Term::Var(v) if v.is_wildcard() => Term::Var(pool.wildcard()),
                Term::Var(v) => Term::Var(*map.entry(*v).or_insert_with(|| pool.fresh())),
                other => other.clone(),
            })
            .collect();
        Literal { probability: self.probability, predicate: self.predicate.clone(), terms }
    }

    /// Same literal with `term` appended, arity adjusted.
    pub(crate) fn extended(&self, term: Term) -> Literal {
        let mut terms = self.terms.clone();
        terms.push(term);
        let predicate = Predicate { name: self.predicate.name.clone(), arity: terms.len() };
        Literal { probability: self.probability, predicate, terms }
    }
}

impl PartialEq for Literal {
    fn eq(&self, other: &Self) -> bool {
        self.probability.to_bits() == other.probability.to_bits()
            && self.predicate == other.predicate
            && self.terms.len() == other.terms.len()
            && self.terms.iter().zip(&other.terms).all(|(a, b)| match (a, b) {
                (Term::Const(x), Term::Const(y)) => x == y,
                (Term::Var(_), Term::Var(_)) => true,
                _ => false,
            })
            && self.var_numbers() == other.var_numbers()
    }
}

impl Eq for Literal {}

impl Hash for Literal {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.probability.to_bits().hash(state);
        self.predicate.hash(state);
        for t in &self.terms {
            match t {
                Term::Const(c) => c.hash(state),
                Term::Var(_) => '_'.hash(state),
            }
        }
        self.var_numbers().hash(state);
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_certain() {
            write!(f, "{}::", self.probability)?;
        }
        f.write_str(self.predicate.name())?;
        if !self.terms.is_empty() {
            f.write_str("(")?;
            for (i, t) in self.terms.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{t}")?;
            }
            f.write_str(")")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(s: &str) -> Term {
        Term::constant(s)
    }

    #[test]
    fn predicate_flags() {
        let p = Predicate::new("~edge", 2).unwrap();
        assert!(p.is_negated());
        assert_eq!(p.base_name(), "edge");
        assert!(!p.negate().unwrap().is_negated());

        let f = Predicate::new("fn_add", 3).unwrap();
        assert!(f.is_primitive());
        assert_eq!(f.primitive_name(), Some("add"));
        assert!(matches!(Predicate::new("~fn_add", 3), Err(Error::NegatedPrimitive(_))));
        assert!(f.negate().is_err());
    }

    #[test]
    fn tag_canonicalizes_variables() {
        let pool = VarPool::new();
        let x = Term::Var(pool.fresh());
        let y = Term::Var(pool.fresh());
        let a = Literal::atom("p", vec![x.clone(), c("a")]).unwrap();
        let b = Literal::atom("p", vec![y.clone(), c("a")]).unwrap();
        assert_eq!(a.tag(), "p(_,a)");
        assert_eq!(a, b);
        assert_ne!(a.id(), b.id());

        let weighted = b.clone().with_probability(0.5);
        assert_ne!(a, weighted);
    }

    #[test]
    fn variants_keep_repeated_variables_apart() {
        let pool = VarPool::new();
        let (x, y, z) = (Term::Var(pool.fresh()), Term::Var(pool.fresh()), Term::Var(pool.fresh()));
        let diagonal = Literal::atom("e", vec![z.clone(), z]).unwrap();
        let general = Literal::atom("e", vec![x.clone(), y.clone()]).unwrap();
        assert_eq!(diagonal.tag(), general.tag());
        assert_eq!(diagonal.variant(), "e(?0,?0)");
        assert_eq!(general.variant(), "e(?0,?1)");
        assert_ne!(diagonal, general);

        let swapped = Literal::atom("e", vec![y, x]).unwrap();
        assert_eq!(swapped.variant(), general.variant());
        assert_eq!(swapped, general);

        let wild = Literal::atom("e", vec![Term::Var(pool.wildcard()), Term::Var(pool.wildcard())]).unwrap();
        assert_eq!(wild.variant(), general.variant());
    }

    #[test]
    fn relevance_is_a_sound_prefilter() {
        let pool = VarPool::new();
        let x = Term::Var(pool.fresh());
        let goal = Literal::atom("edge", vec![c("a"), x]).unwrap();
        let hit = Literal::atom("edge", vec![c("a"), c("b")]).unwrap();
        let miss = Literal::atom("edge", vec![c("b"), c("b")]).unwrap();
        assert!(goal.is_relevant(&hit));
        assert!(!goal.is_relevant(&miss));
        assert!(goal.unify(&hit).is_some());
        assert!(goal.unify(&miss).is_none());
    }

    #[test]
    fn repeated_variables_must_agree() {
        let pool = VarPool::new();
        let x = Term::Var(pool.fresh());
        let goal = Literal::atom("same", vec![x.clone(), x]).unwrap();
        assert!(goal.unify(&Literal::atom("same", vec![c("a"), c("a")]).unwrap()).is_some());
        assert!(goal.unify(&Literal::atom("same", vec![c("a"), c("b")]).unwrap()).is_none());
    }

    #[test]
    fn rename_and_shuffle_produce_fresh_variables() {
        let pool = VarPool::new();
        let x = Term::Var(pool.fresh());
        let w = Term::Var(pool.wildcard());
        let lit = Literal::atom("p", vec![x.clone(), x, w.clone()]).unwrap();

        let renamed = lit.rename(&pool);
        assert_eq!(renamed.terms()[0], renamed.terms()[1]);
        assert_ne!(renamed.terms()[0], lit.terms()[0]);
        assert_eq!(renamed.terms()[2], w);

        let shuffled = lit.shuffle(&pool);
        assert!(shuffled.terms()[2].is_wildcard());
        assert_ne!(shuffled.terms()[2], w);
        assert_eq!(shuffled, lit);
    }

    #[test]
    fn display_round_trips_probability() {
        let lit = Literal::atom("p", vec![c("1")]).unwrap().with_probability(0.3);
        assert_eq!(lit.to_string(), "0.3::p(1)");
        let prop = Literal::atom("rain", vec![]).unwrap();
        assert_eq!(prop.to_string(), "rain");
    }
}
