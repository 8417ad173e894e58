use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::NaiveDate;
use rustc_hash::FxHashMap;

/// Prefix marking a constant whose text went through the base64 wrap.
pub const B64_PREFIX: &str = "b64_";

/// Logic variable. Only equal to itself: the id is issued by a [`VarPool`]
/// and carries no name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Var {
    id: u64,
    wildcard: bool,
}

impl Var {
    pub fn id(self) -> u64 {
        self.id
    }

    pub fn is_wildcard(self) -> bool {
        self.wildcard
    }
}

/// Session-scoped source of variable ids.
///
/// Variables are scoped to the clause they occur in. Whoever mixes clauses
/// from different pools (the solver does) renames them into its own pool
/// first.
#[derive(Debug, Default)]
pub struct VarPool {
    next: AtomicU64,
}

impl VarPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fresh(&self) -> Var {
        Var { id: self.next.fetch_add(1, Ordering::Relaxed), wildcard: false }
    }

    pub fn wildcard(&self) -> Var {
        Var { id: self.next.fetch_add(1, Ordering::Relaxed), wildcard: true }
    }

    pub fn issued(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

/// Constant value, compared by its printed form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Constant(Arc<str>);

impl Constant {
    /// Takes `value` as printed text, no quoting applied.
    pub fn new(value: impl Into<Arc<str>>) -> Self {
        Self(value.into())
    }

    /// Builds a constant from arbitrary text, wrapping it in base64 when it
    /// would not survive being printed and parsed back as a bare word.
    pub fn from_text(text: &str) -> Self {
        if is_bare_constant(text) {
            Self::new(text)
        } else {
            Self::new(format!("{B64_PREFIX}{}", URL_SAFE_NO_PAD.encode(text)))
        }
    }

    pub fn from_f64(n: f64) -> Self {
        if n.fract() == 0.0 && n.abs() < 1e15 {
            Self::new(format!("{}", n as i64))
        } else {
            Self::new(format!("{n}"))
        }
    }

    pub fn from_bool(b: bool) -> Self {
        Self::new(if b { "true" } else { "false" })
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Text with the base64 wrap undone.
    pub fn as_text(&self) -> String {
        self.0
            .strip_prefix(B64_PREFIX)
            .and_then(|enc| URL_SAFE_NO_PAD.decode(enc).ok())
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .unwrap_or_else(|| self.0.to_string())
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.0.parse::<f64>().ok().filter(|n| n.is_finite())
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.0.parse::<i64>().ok()
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.0.as_ref() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(&self.as_text(), "%Y-%m-%d").ok()
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub(crate) fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

fn is_number(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    let mut parts = digits.splitn(2, '.');
    let int_ok = parts
        .next()
        .map(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
        .unwrap_or(false);
    let frac_ok = parts
        .next()
        .map(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
        .unwrap_or(true);
    int_ok && frac_ok
}

fn is_bare_constant(s: &str) -> bool {
    if s.starts_with(B64_PREFIX) {
        return false;
    }
    if is_number(s) {
        return true;
    }
    match s.chars().next() {
        Some(first) if !first.is_ascii_uppercase() && first != '_' => {
            s.chars().all(is_word_char)
        }
        _ => false,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Term {
    Const(Constant),
    Var(Var),
}

impl Term {
    pub fn constant(value: impl Into<Arc<str>>) -> Self {
        Term::Const(Constant::new(value))
    }

    pub fn is_const(&self) -> bool {
        matches!(self, Term::Const(_))
    }

    pub fn is_var(&self) -> bool {
        matches!(self, Term::Var(_))
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, Term::Var(v) if v.is_wildcard())
    }

    pub fn as_const(&self) -> Option<&Constant> {
        match self {
            Term::Const(c) => Some(c),
            Term::Var(_) => None,
        }
    }

    pub fn as_var(&self) -> Option<Var> {
        match self {
            Term::Var(v) => Some(*v),
            Term::Const(_) => None,
        }
    }

    /// Syntactic unification of two flat terms, extending `subst`.
    /// Wildcards match anything and are never bound.
    pub fn unify(a: &Term, b: &Term, subst: &mut Subst) -> bool {
        let a = subst.chase(a);
        let b = subst.chase(b);

        match (&a, &b) {
            (Term::Var(x), _) if x.is_wildcard() => true,
            (_, Term::Var(y)) if y.is_wildcard() => true,
            (Term::Var(x), Term::Var(y)) if x == y => true,
            (Term::Var(x), t) | (t, Term::Var(x)) => {
                subst.bind(*x, t.clone());
                true
            }
            (Term::Const(c), Term::Const(d)) => c == d,
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Const(c) => write!(f, "{c}"),
            Term::Var(v) if v.is_wildcard() => f.write_str("_"),
            Term::Var(v) => write!(f, "V{}", v.id),
        }
    }
}

impl From<Constant> for Term {
    fn from(c: Constant) -> Self {
        Term::Const(c)
    }
}

impl From<Var> for Term {
    fn from(v: Var) -> Self {
        Term::Var(v)
    }
}

/// Variable bindings produced by unification.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Subst {
    bindings: FxHashMap<Var, Term>,
}

impl Subst {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, var: Var, term: Term) {
        if !var.is_wildcard() {
            self.bindings.insert(var, term);
        }
    }

    pub fn get(&self, var: Var) -> Option<&Term> {
        self.bindings.get(&var)
    }

    /// Follows variable bindings until reaching a constant or an unbound
    /// variable.
    pub fn chase(&self, term: &Term) -> Term {
        let mut cur = term;
        // bindings never form cycles: unify only binds chased roots
        while let Term::Var(v) = cur {
            match self.bindings.get(v) {
                Some(next) => cur = next,
                None => break,
            }
        }
        cur.clone()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Var, &Term)> {
        self.bindings.iter()
    }
}
