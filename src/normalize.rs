use std::cmp::Ordering;

use rustc_hash::FxHashSet;

use crate::builtins::{PrimitiveKind, Primitives};
use crate::clause::Clause;
use crate::error::{Error, Result};
use crate::literal::Literal;
use crate::term::{Term, Var};

/// What a body literal binds and what it needs bound beforehand.
#[derive(Debug)]
struct Flow {
    class: Class,
    materializing: bool,
    produces: FxHashSet<Var>,
    consumes: FxHashSet<Var>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Class {
    Ordinary,
    Negated,
    Primitive,
}

impl Flow {
    fn of(lit: &Literal, primitives: &Primitives) -> Flow {
        let vars = |terms: &[Term]| -> FxHashSet<Var> {
            terms
                .iter()
                .filter_map(Term::as_var)
                .filter(|v| !v.is_wildcard())
                .collect()
        };

        if let Some(name) = lit.predicate().primitive_name() {
            let materializing = primitives.is_materializing(name);
            return match primitives.kind(name) {
                PrimitiveKind::Test => Flow {
                    class: Class::Primitive,
                    materializing,
                    produces: FxHashSet::default(),
                    consumes: vars(lit.terms()),
                },
                PrimitiveKind::Function => {
                    let (out, ins) = lit.terms().split_first().map_or((None, &[][..]), |(o, i)| (Some(o), i));
                    let mut produces = FxHashSet::default();
                    if let Some(v) = out.and_then(Term::as_var).filter(|v| !v.is_wildcard()) {
                        produces.insert(v);
                    }
                    let consumes: FxHashSet<Var> =
                        vars(ins).into_iter().filter(|v| !produces.contains(v)).collect();
                    Flow { class: Class::Primitive, materializing, produces, consumes }
                }
            };
        }

        if lit.is_negated() {
            Flow {
                class: Class::Negated,
                materializing: false,
                produces: FxHashSet::default(),
                consumes: vars(lit.terms()),
            }
        } else {
            Flow {
                class: Class::Ordinary,
                materializing: false,
                produces: vars(lit.terms()),
                consumes: FxHashSet::default(),
            }
        }
    }

    fn feeds(&self, other: &Flow) -> bool {
        self.produces.iter().any(|v| other.consumes.contains(v))
    }
}

/// Pairwise ordering constraint. `Less` means `a` must come first, `None`
/// means the pair is unconstrained. Not transitive. Preferences (negations
/// early, materialising primitives first) are left to the tie-break so they
/// never close a cycle.
fn constraint(a: &Flow, b: &Flow) -> Option<Ordering> {
    use Class::*;
    match (a.class, b.class) {
        (Primitive, Primitive) => match (a.feeds(b), b.feeds(a)) {
            (true, true) => Some(Ordering::Equal),
            (true, false) => Some(Ordering::Less),
            (false, true) => Some(Ordering::Greater),
            (false, false) => None,
        },
        (Primitive, Ordinary) => Some(Ordering::Greater),
        (Ordinary, Primitive) => Some(Ordering::Less),
        (Primitive, Negated) => a.feeds(b).then_some(Ordering::Less),
        (Negated, Primitive) => b.feeds(a).then_some(Ordering::Greater),
        (Negated, Ordinary) => b.feeds(a).then_some(Ordering::Greater),
        (Ordinary, Negated) => a.feeds(b).then_some(Ordering::Less),
        (Ordinary, Ordinary) | (Negated, Negated) => None,
    }
}

/// Reorders a rule body so every literal runs after whatever binds its
/// inputs.
///
/// Constraints are collected pairwise and the resulting graph is sorted
/// topologically, ties broken by (class, original position). A dependency
/// cycle is fatal.
pub fn reorder_body(clause: Clause, primitives: &Primitives) -> Result<Clause> {
    let n = clause.body().len();
    if n < 2 {
        return Ok(clause);
    }

    let flows: Vec<Flow> = clause.body().iter().map(|l| Flow::of(l, primitives)).collect();
    let mut succ: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut indegree = vec![0usize; n];

    for i in 0..n {
        for j in (i + 1)..n {
            match constraint(&flows[i], &flows[j]) {
                Some(Ordering::Less) => {
                    succ[i].push(j);
                    indegree[j] += 1;
                }
                Some(Ordering::Greater) => {
                    succ[j].push(i);
                    indegree[i] += 1;
                }
                Some(Ordering::Equal) => return Err(Error::DependencyCycle(clause.to_string())),
                None => {}
            }
        }
    }

    let mut order = Vec::with_capacity(n);
    let mut done = vec![false; n];
    while order.len() < n {
        let next = (0..n)
            .filter(|&i| !done[i] && indegree[i] == 0)
            .min_by_key(|&i| (flows[i].class, !flows[i].materializing, i));
        let Some(i) = next else {
            return Err(Error::DependencyCycle(clause.to_string()));
        };
        done[i] = true;
        order.push(i);
        for &j in &succ[i] {
            indegree[j] -= 1;
        }
    }

    if order.iter().enumerate().all(|(pos, &i)| pos == i) {
        return Ok(clause);
    }
    let (head, body) = clause.into_parts();
    let reordered = order.into_iter().map(|i| body[i].clone()).collect();
    Ok(Clause::new(head, reordered))
}

/// Checks that a rule is range restricted: head variables and variables of
/// negated literals or primitive inputs are bound by some positive literal
/// or primitive output of the body.
pub fn check_rule(clause: &Clause, primitives: &Primitives) -> Result<()> {
    if !clause.is_safe() {
        return Err(Error::UnsafeClause(clause.to_string()));
    }
    let flows: Vec<Flow> = clause.body().iter().map(|l| Flow::of(l, primitives)).collect();
    let bound: FxHashSet<Var> = flows.iter().flat_map(|f| f.produces.iter().copied()).collect();
    let unbound = flows.iter().flat_map(|f| f.consumes.iter()).any(|v| !bound.contains(v));
    if unbound {
        return Err(Error::UnsafeClause(clause.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term::VarPool;

    fn lit(name: &str, terms: Vec<Term>) -> Literal {
        Literal::atom(name, terms).unwrap()
    }

    fn names(c: &Clause) -> Vec<String> {
        c.body().iter().map(|l| l.predicate().name().to_string()).collect()
    }

    #[test]
    fn primitives_follow_their_producers() {
        let pool = VarPool::new();
        let (x, y, u) = (Term::Var(pool.fresh()), Term::Var(pool.fresh()), Term::Var(pool.fresh()));
        let rule = Clause::new(
            lit("big", vec![x.clone()]),
            vec![
                lit("fn_is_true", vec![u.clone()]),
                lit("fn_gt", vec![u, y.clone(), Term::constant("10")]),
                lit("size", vec![x, y]),
            ],
        );
        let ordered = reorder_body(rule, &Primitives::new()).unwrap();
        assert_eq!(names(&ordered), vec!["size", "fn_gt", "fn_is_true"]);
    }

    #[test]
    fn negation_follows_whatever_grounds_it() {
        let pool = VarPool::new();
        let (x, y) = (Term::Var(pool.fresh()), Term::Var(pool.fresh()));
        let rule = Clause::new(
            lit("lonely", vec![x.clone()]),
            vec![
                lit("~friend", vec![x.clone(), y.clone()]),
                lit("fn_identity", vec![y, Term::constant("bob")]),
                lit("person", vec![x]),
            ],
        );
        let ordered = reorder_body(rule, &Primitives::new()).unwrap();
        assert_eq!(names(&ordered), vec!["person", "fn_identity", "~friend"]);
    }

    #[test]
    fn materializing_primitives_go_first_among_independent_primitives() {
        let pool = VarPool::new();
        let (x, y) = (Term::Var(pool.fresh()), Term::Var(pool.fresh()));
        let rule = Clause::new(
            lit("pair", vec![x.clone(), y.clone()]),
            vec![
                lit("fn_identity", vec![y, Term::constant("a")]),
                lit("fn_range", vec![x, Term::constant("1"), Term::constant("3")]),
            ],
        );
        let ordered = reorder_body(rule, &Primitives::new()).unwrap();
        assert_eq!(names(&ordered), vec!["fn_range", "fn_identity"]);
    }

    #[test]
    fn primitive_chains_feeding_a_negation_are_not_cycles() {
        let pool = VarPool::new();
        let (x, y, z) = (Term::Var(pool.fresh()), Term::Var(pool.fresh()), Term::Var(pool.fresh()));
        let rule = Clause::new(
            lit("p", vec![x.clone()]),
            vec![
                lit("~r", vec![y.clone()]),
                lit("fn_mul", vec![y, z.clone(), Term::constant("2")]),
                lit("fn_add", vec![z, x.clone(), Term::constant("1")]),
                lit("q", vec![x]),
            ],
        );
        let ordered = reorder_body(rule, &Primitives::new()).unwrap();
        assert_eq!(names(&ordered), vec!["q", "fn_add", "fn_mul", "~r"]);
    }

    #[test]
    fn mutual_primitive_dependency_is_a_cycle() {
        let pool = VarPool::new();
        let (x, y) = (Term::Var(pool.fresh()), Term::Var(pool.fresh()));
        let rule = Clause::new(
            lit("p", vec![x.clone()]),
            vec![
                lit("fn_identity", vec![x.clone(), y.clone()]),
                lit("fn_identity", vec![y, x]),
            ],
        );
        assert!(matches!(reorder_body(rule, &Primitives::new()), Err(Error::DependencyCycle(_))));
    }

    #[test]
    fn range_restriction() {
        let pool = VarPool::new();
        let (x, y) = (Term::Var(pool.fresh()), Term::Var(pool.fresh()));
        let ok = Clause::new(
            lit("p", vec![x.clone()]),
            vec![lit("q", vec![x.clone()]), lit("~r", vec![x.clone()])],
        );
        assert!(check_rule(&ok, &Primitives::new()).is_ok());

        let dangling = Clause::new(
            lit("p", vec![x.clone()]),
            vec![lit("q", vec![x]), lit("~r", vec![y])],
        );
        assert!(matches!(check_rule(&dangling, &Primitives::new()), Err(Error::UnsafeClause(_))));
    }
}
