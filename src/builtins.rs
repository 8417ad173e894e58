use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::term::Constant;

/// How a primitive literal uses its arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveKind {
    /// `fn_f(Out, In1, .., InN)`: the result is unified with the first
    /// argument.
    Function,
    /// `fn_f(In1, .., InN)`: every argument is an input and the literal
    /// holds iff the result is `true`.
    Test,
}

/// Result of one primitive call.
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    None,
    One(Constant),
    /// Materialised collection: one derivation per element.
    Many(Vec<Constant>),
}

#[derive(Debug, Error)]
pub enum PrimitiveError {
    #[error("unknown primitive `fn_{0}`")]
    Unknown(String),
    #[error("`fn_{name}` expects {expected} argument(s), got {got}")]
    Arity { name: String, expected: String, got: usize },
    #[error("`fn_{name}`: {msg}")]
    Type { name: String, msg: String },
    #[error("`fn_{name}` input is not grounded")]
    Unbound { name: String },
    #[error("`fn_{name}` failed: {msg}")]
    Failed { name: String, msg: String },
}

pub type PrimitiveResult = Result<Output, PrimitiveError>;

/// Extension primitive supplied by the embedding application.
pub type ExtensionFn = Arc<dyn Fn(&[Constant]) -> PrimitiveResult + Send + Sync>;

/// The closed set of primitives every knowledge base understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    IsTrue,
    IsFalse,
    Eq,
    Lt,
    Lte,
    Gt,
    Gte,
    Add,
    Sub,
    Mul,
    Div,
    Identity,
    Concat,
    Lower,
    Upper,
    Strlen,
    ToInt,
    ToDecimal,
    DateDiffDays,
    Split,
    Range,
}

impl Builtin {
    pub const ALL: [Builtin; 21] = [
        Builtin::IsTrue,
        Builtin::IsFalse,
        Builtin::Eq,
        Builtin::Lt,
        Builtin::Lte,
        Builtin::Gt,
        Builtin::Gte,
        Builtin::Add,
        Builtin::Sub,
        Builtin::Mul,
        Builtin::Div,
        Builtin::Identity,
        Builtin::Concat,
        Builtin::Lower,
        Builtin::Upper,
        Builtin::Strlen,
        Builtin::ToInt,
        Builtin::ToDecimal,
        Builtin::DateDiffDays,
        Builtin::Split,
        Builtin::Range,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Builtin::IsTrue => "is_true",
            Builtin::IsFalse => "is_false",
            Builtin::Eq => "eq",
            Builtin::Lt => "lt",
            Builtin::Lte => "lte",
            Builtin::Gt => "gt",
            Builtin::Gte => "gte",
            Builtin::Add => "add",
            Builtin::Sub => "sub",
            Builtin::Mul => "mul",
            Builtin::Div => "div",
            Builtin::Identity => "identity",
            Builtin::Concat => "concat",
            Builtin::Lower => "lower",
            Builtin::Upper => "upper",
            Builtin::Strlen => "strlen",
            Builtin::ToInt => "to_int",
            Builtin::ToDecimal => "to_decimal",
            Builtin::DateDiffDays => "date_diff_days",
            Builtin::Split => "split",
            Builtin::Range => "range",
        }
    }

    /// `name` without the `fn_` prefix.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|b| b.name() == name)
    }

    pub fn kind(self) -> PrimitiveKind {
        match self {
            Builtin::IsTrue | Builtin::IsFalse => PrimitiveKind::Test,
            _ => PrimitiveKind::Function,
        }
    }

    pub fn is_materializing(self) -> bool {
        matches!(self, Builtin::Split | Builtin::Range)
    }

    pub fn call(self, args: &[Constant]) -> PrimitiveResult {
        let name = self.name();
        match self {
            Builtin::IsTrue | Builtin::IsFalse => {
                let [x] = exact::<1>(name, args)?;
                let b = x.as_bool().ok_or_else(|| type_err(name, "expects a boolean"))?;
                Ok(Output::One(Constant::from_bool(b == (self == Builtin::IsTrue))))
            }
            Builtin::Eq => {
                let [a, b] = exact::<2>(name, args)?;
                Ok(Output::One(Constant::from_bool(compare(a, b) == Ordering::Equal)))
            }
            Builtin::Lt | Builtin::Lte | Builtin::Gt | Builtin::Gte => {
                let [a, b] = exact::<2>(name, args)?;
                let ord = compare(a, b);
                let holds = match self {
                    Builtin::Lt => ord == Ordering::Less,
                    Builtin::Lte => ord != Ordering::Greater,
                    Builtin::Gt => ord == Ordering::Greater,
                    _ => ord != Ordering::Less,
                };
                Ok(Output::One(Constant::from_bool(holds)))
            }
            Builtin::Add | Builtin::Mul => {
                if args.is_empty() {
                    return Err(arity(name, "at least 1", 0));
                }
                let nums = numbers(name, args)?;
                let v = if self == Builtin::Add {
                    nums.iter().sum()
                } else {
                    nums.iter().product()
                };
                Ok(Output::One(Constant::from_f64(v)))
            }
            Builtin::Sub | Builtin::Div => {
                let [a, b] = exact::<2>(name, args)?;
                let (a, b) = (number(name, a)?, number(name, b)?);
                if self == Builtin::Div && b == 0.0 {
                    return Err(PrimitiveError::Failed { name: name.into(), msg: "division by zero".into() });
                }
                Ok(Output::One(Constant::from_f64(if self == Builtin::Sub { a - b } else { a / b })))
            }
            Builtin::Identity => {
                let [a] = exact::<1>(name, args)?;
                Ok(Output::One(a.clone()))
            }
            Builtin::Concat => {
                let text: String = args.iter().map(Constant::as_text).collect();
                Ok(Output::One(Constant::from_text(&text)))
            }
            Builtin::Lower => {
                let [a] = exact::<1>(name, args)?;
                Ok(Output::One(Constant::from_text(&a.as_text().to_lowercase())))
            }
            Builtin::Upper => {
                let [a] = exact::<1>(name, args)?;
                Ok(Output::One(Constant::from_text(&a.as_text().to_uppercase())))
            }
            Builtin::Strlen => {
                let [a] = exact::<1>(name, args)?;
                Ok(Output::One(Constant::from_f64(a.as_text().chars().count() as f64)))
            }
            Builtin::ToInt => {
                let [a] = exact::<1>(name, args)?;
                Ok(Output::One(Constant::from_f64(number(name, a)?.trunc())))
            }
            Builtin::ToDecimal => {
                let [a] = exact::<1>(name, args)?;
                Ok(Output::One(Constant::from_f64(number(name, a)?)))
            }
            Builtin::DateDiffDays => {
                let [a, b] = exact::<2>(name, args)?;
                let from = a.as_date().ok_or_else(|| type_err(name, "expects ISO dates"))?;
                let to = b.as_date().ok_or_else(|| type_err(name, "expects ISO dates"))?;
                Ok(Output::One(Constant::from_f64((to - from).num_days() as f64)))
            }
            Builtin::Split => {
                let [text, sep] = exact::<2>(name, args)?;
                let sep = sep.as_text();
                if sep.is_empty() {
                    return Err(type_err(name, "separator must not be empty"));
                }
                let parts = text.as_text().split(sep.as_str()).map(Constant::from_text).collect();
                Ok(Output::Many(parts))
            }
            Builtin::Range => {
                let [from, to] = exact::<2>(name, args)?;
                let from = from.as_i64().ok_or_else(|| type_err(name, "expects integers"))?;
                let to = to.as_i64().ok_or_else(|| type_err(name, "expects integers"))?;
                Ok(Output::Many((from..=to).map(|i| Constant::new(i.to_string())).collect()))
            }
        }
    }
}

impl fmt::Display for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn_{}", self.name())
    }
}

/// Numbers compare numerically, ISO dates chronologically, anything else
/// by text.
fn compare(a: &Constant, b: &Constant) -> Ordering {
    if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
        return x.partial_cmp(&y).unwrap_or(Ordering::Equal);
    }
    if let (Some(x), Some(y)) = (a.as_date(), b.as_date()) {
        return x.cmp(&y);
    }
    a.as_text().cmp(&b.as_text())
}

fn exact<'a, const N: usize>(name: &str, args: &'a [Constant]) -> Result<&'a [Constant; N], PrimitiveError> {
    args.try_into().map_err(|_| arity(name, &N.to_string(), args.len()))
}

fn arity(name: &str, expected: &str, got: usize) -> PrimitiveError {
    PrimitiveError::Arity { name: name.into(), expected: expected.into(), got }
}

fn type_err(name: &str, msg: &str) -> PrimitiveError {
    PrimitiveError::Type { name: name.into(), msg: msg.into() }
}

fn number(name: &str, c: &Constant) -> Result<f64, PrimitiveError> {
    c.as_f64().ok_or_else(|| type_err(name, &format!("`{c}` is not a number")))
}

fn numbers(name: &str, args: &[Constant]) -> Result<Vec<f64>, PrimitiveError> {
    args.iter().map(|c| number(name, c)).collect()
}

#[derive(Clone)]
struct Extension {
    func: ExtensionFn,
    materializing: bool,
}

/// Primitive registry: the built-ins plus extensions registered before the
/// knowledge base is built. Immutable afterwards.
#[derive(Clone, Default)]
pub struct Primitives {
    extensions: FxHashMap<String, Extension>,
}

impl Primitives {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an extension under `name` (without the `fn_` prefix). Built-in
    /// names cannot be shadowed.
    pub fn register<F>(mut self, name: &str, materializing: bool, func: F) -> Self
    where
        F: Fn(&[Constant]) -> PrimitiveResult + Send + Sync + 'static,
    {
        if Builtin::from_name(name).is_none() {
            self.extensions
                .insert(name.to_string(), Extension { func: Arc::new(func), materializing });
        }
        self
    }

    pub fn kind(&self, name: &str) -> PrimitiveKind {
        Builtin::from_name(name).map(Builtin::kind).unwrap_or(PrimitiveKind::Function)
    }

    pub fn is_materializing(&self, name: &str) -> bool {
        match Builtin::from_name(name) {
            Some(b) => b.is_materializing(),
            None => self.extensions.get(name).is_some_and(|e| e.materializing),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        Builtin::from_name(name).is_some() || self.extensions.contains_key(name)
    }

    pub fn call(&self, name: &str, args: &[Constant]) -> PrimitiveResult {
        if let Some(builtin) = Builtin::from_name(name) {
            return builtin.call(args);
        }
        match self.extensions.get(name) {
            Some(ext) => (ext.func)(args),
            None => Err(PrimitiveError::Unknown(name.to_string())),
        }
    }
}

impl fmt::Debug for Primitives {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.extensions.keys().collect();
        names.sort();
        f.debug_struct("Primitives").field("extensions", &names).finish()
    }
}
