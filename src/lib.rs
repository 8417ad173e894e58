//! Tabled probabilistic logic programming.
//!
//! Clauses carry probabilities (`0.7::edge(a, b).`). A [`Solver`] answers
//! queries by SLG-style tabled resolution over a [`KnowledgeBase`], the
//! [`ProofAssistant`] turns a run into explicit proofs, and the
//! [`Estimator`] computes their exact probability over a BDD.

mod bdd;
mod builtins;
mod clause;
mod config;
mod error;
mod estimator;
mod kb;
mod literal;
mod normalize;
mod parser;
mod proof;
mod solver;
mod store;
mod subgoal;
mod term;

pub use bdd::{Bdd, BddManager, DecisionGraph, DecisionNode, IteCache};
pub use builtins::{Builtin, ExtensionFn, Output, PrimitiveError, PrimitiveKind, PrimitiveResult, Primitives};
pub use clause::Clause;
pub use config::EngineConfig;
pub use error::{Error, Result};
pub use estimator::{Compiled, Estimator};
pub use kb::{KnowledgeBase, PROBA_PREFIX};
pub use literal::{Literal, Predicate, NEGATION_MARKER, PRIMITIVE_PREFIX};
pub use normalize::{check_rule, reorder_body};
pub use parser::{parse_clause, parse_program, parse_query, Parser, Program, Rule, Statement};
pub use proof::{ProofAssistant, ProofSet, Snapshot};
pub use solver::{Solver, SolverStats};
pub use store::{memory_store_factory, BloomFilter, FactStore, MemoryFactStore, StoreFactory};
pub use subgoal::{NodeId, Origin, RuleTrie, SubgoalId};
pub use term::{Constant, Subst, Term, Var, VarPool};
