use std::fmt;
use std::fmt::Write as _;
use std::hash::{Hash, Hasher};

use rustc_hash::{FxHashMap, FxHashSet};

use crate::literal::Literal;
use crate::term::{Subst, Term, Var, VarPool};

/// `head :- body`. A fact has an empty body and a grounded head.
///
/// Clauses compare by their α-normalised fingerprint, so two rules that only
/// differ in variable ids are the same clause.
#[derive(Debug, Clone)]
pub struct Clause {
    head: Literal,
    body: Vec<Literal>,
}

impl Clause {
    pub fn new(head: Literal, body: Vec<Literal>) -> Self {
        Self { head, body }
    }

    pub fn fact(head: Literal) -> Self {
        Self { head, body: Vec::new() }
    }

    pub fn head(&self) -> &Literal {
        &self.head
    }

    pub fn body(&self) -> &[Literal] {
        &self.body
    }

    pub fn into_parts(self) -> (Literal, Vec<Literal>) {
        (self.head, self.body)
    }

    pub fn is_fact(&self) -> bool {
        self.body.is_empty() && self.head.is_grounded()
    }

    pub fn is_rule(&self) -> bool {
        !self.body.is_empty()
    }

    pub fn is_grounded(&self) -> bool {
        self.head.is_grounded() && self.body.iter().all(Literal::is_grounded)
    }

    /// Every head variable occurs in the body.
    pub fn is_safe(&self) -> bool {
        let body_vars: FxHashSet<Var> = self.body.iter().flat_map(Literal::vars).collect();
        self.head.vars().all(|v| body_vars.contains(&v))
    }

    pub fn with_head(mut self, head: Literal) -> Self {
        self.head = head;
        self
    }

    pub fn with_body(mut self, body: Vec<Literal>) -> Self {
        self.body = body;
        self
    }

    pub fn subst(&self, subst: &Subst) -> Clause {
        Clause {
            head: self.head.subst(subst),
            body: self.body.iter().map(|l| l.subst(subst)).collect(),
        }
    }

    pub fn rename(&self, pool: &VarPool) -> Clause {
        let mut map = FxHashMap::default();
        let head = self.head.rename_with(pool, &mut map);
        let body = self.body.iter().map(|l| l.rename_with(pool, &mut map)).collect();
        Clause { head, body }
    }

    /// One SLD step: unify the first body literal with `fact`, substitute
    /// through the rest and drop the resolved literal.
    pub fn resolve(&self, fact: &Literal) -> Option<Clause> {
        let (first, rest) = self.body.split_first()?;
        let subst = first.unify(fact)?;
        Some(Clause {
            head: self.head.subst(&subst),
            body: rest.iter().map(|l| l.subst(&subst)).collect(),
        })
    }

    /// Structural fingerprint with variables numbered by first occurrence.
    pub fn fingerprint(&self) -> String {
        let mut numbering: FxHashMap<Var, usize> = FxHashMap::default();
        let mut out = String::new();
        write_canonical(&self.head, &mut numbering, &mut out);
        for (i, lit) in self.body.iter().enumerate() {
            out.push_str(if i == 0 { ":-" } else { "," });
            write_canonical(lit, &mut numbering, &mut out);
        }
        out
    }
}

fn write_canonical(lit: &Literal, numbering: &mut FxHashMap<Var, usize>, out: &mut String) {
    let _ = write!(out, "{}::{}(", lit.probability(), lit.predicate().name());
    for (i, t) in lit.terms().iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        match t {
            Term::Const(c) => out.push_str(c.as_str()),
            Term::Var(v) if v.is_wildcard() => out.push('_'),
            Term::Var(v) => {
                let next = numbering.len();
                let n = *numbering.entry(*v).or_insert(next);
                let _ = write!(out, "?{n}");
            }
        }
    }
    out.push(')');
}

impl PartialEq for Clause {
    fn eq(&self, other: &Self) -> bool {
        self.body.len() == other.body.len() && self.fingerprint() == other.fingerprint()
    }
}

impl Eq for Clause {}

impl Hash for Clause {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.fingerprint().hash(state);
    }
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.head)?;
        for (i, lit) in self.body.iter().enumerate() {
            f.write_str(if i == 0 { " :- " } else { ", " })?;
            write!(f, "{lit}")?;
        }
        Ok(())
    }
}
