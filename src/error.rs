use thiserror::Error;

use crate::parser::Rule;

pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while parsing, asserting or solving.
///
/// Malformed input and broken invariants both surface here. Failures inside
/// primitives never do: they are logged and treated as "no result".
#[derive(Debug, Error)]
pub enum Error {
    #[error("parse error: {0}")]
    Parse(#[from] Box<pest::error::Error<Rule>>),

    #[error("syntax error in `{text}`: {msg}")]
    Syntax { text: String, msg: String },

    #[error("unsafe clause `{0}`: every head variable must occur in the body")]
    UnsafeClause(String),

    #[error("fact `{0}` is not grounded")]
    NonGroundedFact(String),

    #[error("negated literal `{0}` must be semi-grounded")]
    NonGroundedNegation(String),

    #[error("clause `{0}` has a negated head")]
    NegatedHead(String),

    #[error("probability {probability} of `{text}` is outside (0, 1]")]
    InvalidProbability { probability: f64, text: String },

    #[error("body literal `{0}` carries a probability")]
    WeightedBodyLiteral(String),

    #[error("primitive `{0}` cannot be negated")]
    NegatedPrimitive(String),

    #[error("dependency cycle while ordering the body of `{0}`")]
    DependencyCycle(String),

    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<pest::error::Error<Rule>> for Error {
    fn from(err: pest::error::Error<Rule>) -> Self {
        Error::Parse(Box::new(err))
    }
}
