use pest::iterators::Pair;
use pest::Parser as PestParser; // <- trait (gives ClauseGrammar::parse)
use rustc_hash::FxHashMap;

use crate::builtins::Primitives;
use crate::clause::Clause;
use crate::error::{Error, Result};
use crate::literal::{Literal, Predicate, NEGATION_MARKER};
use crate::normalize::{check_rule, reorder_body};
use crate::term::{Constant, Term, Var, VarPool};

#[derive(pest_derive::Parser)]
#[grammar = "clause.pest"]
struct ClauseGrammar;

/// Clauses and queries of one program text, in source order.
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub clauses: Vec<Clause>,
    pub queries: Vec<Literal>,
}

#[derive(Debug, Clone)]
pub enum Statement {
    Clause(Clause),
    Query(Literal),
}

/// Turns clause text into the data model.
///
/// Variable names are scoped to their statement; every statement gets fresh
/// ids from the parser's pool.
#[derive(Debug, Default)]
pub struct Parser {
    primitives: Primitives,
    pool: VarPool,
}

impl Parser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Primitive kinds decide how bodies are reordered, so extensions must
    /// be known here.
    pub fn with_primitives(primitives: Primitives) -> Self {
        Self { primitives, pool: VarPool::new() }
    }

    pub fn parse_program(&self, input: &str) -> Result<Program> {
        let mut pairs = ClauseGrammar::parse(Rule::program, input)?;
        let mut program = Program::default();
        let Some(root) = pairs.next() else {
            return Ok(program);
        };
        for item in root.into_inner() {
            if item.as_rule() != Rule::statement {
                continue;
            }
            match self.build_statement(item)? {
                Statement::Clause(c) => program.clauses.push(c),
                Statement::Query(q) => program.queries.push(q),
            }
        }
        Ok(program)
    }

    pub fn parse_statement(&self, input: &str) -> Result<Statement> {
        let mut pairs = ClauseGrammar::parse(Rule::single, input)?;
        let stmt = pairs
            .next()
            .and_then(|single| single.into_inner().find(|p| p.as_rule() == Rule::statement))
            .ok_or_else(|| syntax(input, "expected one statement"))?;
        self.build_statement(stmt)
    }

    pub fn parse_clause(&self, input: &str) -> Result<Clause> {
        match self.parse_statement(input)? {
            Statement::Clause(c) => Ok(c),
            Statement::Query(_) => Err(syntax(input, "expected a clause, found a query")),
        }
    }

    /// The trailing `?` is optional here.
    pub fn parse_query(&self, input: &str) -> Result<Literal> {
        let trimmed = input.trim();
        let text = if trimmed.ends_with('?') {
            trimmed.to_string()
        } else {
            format!("{trimmed}?")
        };
        match self.parse_statement(&text)? {
            Statement::Query(q) => Ok(q),
            Statement::Clause(_) => Err(syntax(input, "expected a query")),
        }
    }

    fn build_statement(&self, pair: Pair<Rule>) -> Result<Statement> {
        let text = pair.as_str().trim().to_string();
        let mut scope = Scope::new(&self.pool);

        let mut probability = None;
        let mut head = None;
        let mut body = None;
        let mut query = false;
        for p in pair.into_inner() {
            match p.as_rule() {
                Rule::probability => probability = Some(build_probability(p, &text)?),
                Rule::head => head = Some(build_head(p, &mut scope)?),
                Rule::query_mark => query = true,
                Rule::body => body = Some(self.build_body(p, &mut scope)?),
                _ => {}
            }
        }
        let head = head.ok_or_else(|| syntax(&text, "missing head"))?;

        if query {
            if probability.is_some() {
                return Err(syntax(&text, "queries carry no probability"));
            }
            if head.is_negated() && !head.is_semi_grounded() {
                return Err(Error::NonGroundedNegation(head.to_string()));
            }
            return Ok(Statement::Query(head));
        }

        let head = head.with_probability(probability.unwrap_or(1.0));
        match body {
            None => {
                if !head.is_grounded() {
                    return Err(Error::NonGroundedFact(text));
                }
                Ok(Statement::Clause(Clause::fact(head)))
            }
            Some(body) => {
                let rule = Clause::new(head, body);
                check_rule(&rule, &self.primitives)?;
                Ok(Statement::Clause(reorder_body(rule, &self.primitives)?))
            }
        }
    }

    fn build_body(&self, pair: Pair<Rule>, scope: &mut Scope) -> Result<Vec<Literal>> {
        let mut out = Vec::new();
        for item in pair.into_inner() {
            match item.as_rule() {
                Rule::body_atom => {
                    let lit = build_atom(item, scope, &mut out)?;
                    out.push(lit);
                }
                Rule::comparison => build_comparison(item, scope, &mut out)?,
                Rule::assignment => build_assignment(item, scope, &mut out)?,
                _ => {}
            }
        }
        Ok(out)
    }
}

/// Statement-local variable names.
struct Scope<'a> {
    pool: &'a VarPool,
    names: FxHashMap<String, Var>,
}

impl<'a> Scope<'a> {
    fn new(pool: &'a VarPool) -> Self {
        Self { pool, names: FxHashMap::default() }
    }

    fn named(&mut self, name: &str) -> Var {
        let pool = self.pool;
        *self.names.entry(name.to_string()).or_insert_with(|| pool.fresh())
    }

    fn fresh(&self) -> Term {
        Term::Var(self.pool.fresh())
    }
}

fn syntax(text: &str, msg: &str) -> Error {
    Error::Syntax { text: text.to_string(), msg: msg.to_string() }
}

fn build_probability(pair: Pair<Rule>, text: &str) -> Result<f64> {
    let raw = pair.as_str().trim();
    let p: f64 = raw.parse().map_err(|_| syntax(text, "malformed probability"))?;
    if !(p > 0.0 && p <= 1.0) {
        return Err(Error::InvalidProbability { probability: p, text: text.to_string() });
    }
    Ok(p)
}

fn predicate_name(negated: bool, name: &str) -> String {
    if negated {
        format!("{NEGATION_MARKER}{name}")
    } else {
        name.to_string()
    }
}

fn build_head(pair: Pair<Rule>, scope: &mut Scope) -> Result<Literal> {
    let mut negated = false;
    let mut name = "";
    let mut terms = Vec::new();
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::negation => negated = true,
            Rule::name => name = p.as_str(),
            _ => terms.push(build_term(p, scope)?),
        }
    }
    let predicate = Predicate::new(predicate_name(negated, name), terms.len())?;
    Ok(Literal::new(predicate, terms))
}

/// Body atom; nested calls among its arguments are emitted into `out`
/// before it.
fn build_atom(pair: Pair<Rule>, scope: &mut Scope, out: &mut Vec<Literal>) -> Result<Literal> {
    let mut negated = false;
    let mut name = "";
    let mut terms = Vec::new();
    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::negation => negated = true,
            Rule::name => name = p.as_str(),
            _ => terms.push(build_operand(p, scope, out)?),
        }
    }
    let predicate = Predicate::new(predicate_name(negated, name), terms.len())?;
    Ok(Literal::new(predicate, terms))
}

/// `A op B` becomes `fn_op(U, A, B), fn_is_true(U)`; `!=` and `<>` check
/// `fn_eq` with `fn_is_false`.
fn build_comparison(pair: Pair<Rule>, scope: &mut Scope, out: &mut Vec<Literal>) -> Result<()> {
    let text = pair.as_str().to_string();
    let mut it = pair.into_inner();
    let (Some(lhs), Some(op), Some(rhs)) = (it.next(), it.next(), it.next()) else {
        return Err(syntax(&text, "incomplete comparison"));
    };
    let lhs = build_operand(lhs, scope, out)?;
    let rhs = build_operand(rhs, scope, out)?;
    let (builtin, check) = match op.as_str() {
        "=" => ("fn_eq", "fn_is_true"),
        "!=" | "<>" => ("fn_eq", "fn_is_false"),
        "<" => ("fn_lt", "fn_is_true"),
        "<=" => ("fn_lte", "fn_is_true"),
        ">" => ("fn_gt", "fn_is_true"),
        ">=" => ("fn_gte", "fn_is_true"),
        other => return Err(syntax(&text, &format!("unknown operator `{other}`"))),
    };
    let flag = scope.fresh();
    out.push(Literal::atom(builtin, vec![flag.clone(), lhs, rhs])?);
    out.push(Literal::atom(check, vec![flag])?);
    Ok(())
}

/// `X is fn_f(..)` binds the call's output to `X`; `X is t` becomes
/// `fn_identity(X, t)`.
fn build_assignment(pair: Pair<Rule>, scope: &mut Scope, out: &mut Vec<Literal>) -> Result<()> {
    let text = pair.as_str().to_string();
    let mut it = pair.into_inner();
    let (Some(target), Some(value)) = (it.next(), it.next()) else {
        return Err(syntax(&text, "incomplete assignment"));
    };
    let target = Term::Var(scope.named(target.as_str()));
    if value.as_rule() == Rule::call {
        build_call(value, Some(target), scope, out)?;
    } else {
        let value = build_term(value, scope)?;
        out.push(Literal::atom("fn_identity", vec![target, value])?);
    }
    Ok(())
}

fn build_operand(pair: Pair<Rule>, scope: &mut Scope, out: &mut Vec<Literal>) -> Result<Term> {
    if pair.as_rule() == Rule::call {
        build_call(pair, None, scope, out)
    } else {
        build_term(pair, scope)
    }
}

/// Flattens a call left to right, inner calls first. Returns the term that
/// holds the call's output.
fn build_call(
    pair: Pair<Rule>,
    output: Option<Term>,
    scope: &mut Scope,
    out: &mut Vec<Literal>,
) -> Result<Term> {
    let mut it = pair.into_inner();
    let name = it.next().map(|p| p.as_str().to_string()).unwrap_or_default();
    let mut args = Vec::new();
    for arg in it {
        args.push(build_operand(arg, scope, out)?);
    }
    let output = output.unwrap_or_else(|| scope.fresh());
    let mut terms = Vec::with_capacity(args.len() + 1);
    terms.push(output.clone());
    terms.extend(args);
    out.push(Literal::atom(&name, terms)?);
    Ok(output)
}

fn build_term(pair: Pair<Rule>, scope: &mut Scope) -> Result<Term> {
    let raw = pair.as_str();
    match pair.as_rule() {
        Rule::variable => Ok(Term::Var(scope.named(raw))),
        Rule::wildcard => Ok(Term::Var(scope.pool.wildcard())),
        Rule::number | Rule::constant => Ok(Term::Const(Constant::new(raw))),
        Rule::string => {
            let inner = pair.into_inner().next().map(|p| p.as_str()).unwrap_or("");
            Ok(Term::Const(Constant::from_text(&unescape_string(inner))))
        }
        other => Err(syntax(raw, &format!("unexpected {other:?}"))),
    }
}

fn unescape_string(raw: &str) -> String {
    raw.replace("\\n", "\n")
        .replace("\\t", "\t")
        .replace("\\r", "\r")
        .replace("\\\"", "\"")
        .replace("\\'", "'")
        .replace("\\\\", "\\")
}

pub fn parse_program(input: &str) -> Result<Program> {
    Parser::new().parse_program(input)
}

pub fn parse_clause(input: &str) -> Result<Clause> {
    Parser::new().parse_clause(input)
}

pub fn parse_query(input: &str) -> Result<Literal> {
    Parser::new().parse_query(input)
}
