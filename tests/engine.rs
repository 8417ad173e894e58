use std::collections::BTreeSet;

use problite::{
    parse_query, Constant, EngineConfig, Error, Estimator, KnowledgeBase, Output, Primitives, Solver,
};

fn load(text: &str) -> KnowledgeBase {
    let mut kb = KnowledgeBase::new();
    kb.load_program(text).unwrap();
    kb
}

fn probability(kb: &KnowledgeBase, query: &str) -> f64 {
    let q = parse_query(query).unwrap();
    let proofs = Solver::new(kb).proofs(&q).unwrap();
    Estimator::new(proofs).probability(&q, Some(9))
}

fn answers(kb: &KnowledgeBase, query: &str) -> BTreeSet<String> {
    Solver::new(kb)
        .solve(&parse_query(query).unwrap(), None)
        .unwrap()
        .iter()
        .map(|c| c.to_string())
        .collect()
}

fn rounded(p: f64) -> f64 {
    (p * 1e9).round() / 1e9
}

// ---- recursion against brute force ----

const EDGES: &[(&str, &str, f64)] = &[
    ("a", "b", 0.6),
    ("b", "c", 0.7),
    ("a", "c", 0.3),
    ("c", "d", 0.8),
    ("b", "d", 0.4),
    ("c", "a", 0.5),
];

fn edge_program(rules: &str) -> String {
    let mut text: String = EDGES.iter().map(|(x, y, p)| format!("{p}::edge({x}, {y}).\n")).collect();
    text.push_str(rules);
    text
}

/// `to` can be reached from `from` over one or more edges present in `world`.
fn reaches(world: u32, from: &str, to: &str) -> bool {
    let mut seen = BTreeSet::new();
    let mut frontier = vec![from];
    while let Some(node) = frontier.pop() {
        for (i, (x, y, _)) in EDGES.iter().enumerate() {
            if world >> i & 1 == 1 && *x == node && seen.insert(*y) {
                frontier.push(*y);
            }
        }
    }
    seen.contains(to)
}

fn brute_force(from: &str, to: &str) -> f64 {
    (0..1u32 << EDGES.len())
        .filter(|w| reaches(*w, from, to))
        .map(|w| {
            EDGES
                .iter()
                .enumerate()
                .map(|(i, (_, _, p))| if w >> i & 1 == 1 { *p } else { 1.0 - p })
                .product::<f64>()
        })
        .sum()
}

#[test]
fn left_recursive_paths_match_possible_worlds() {
    let kb = load(&edge_program(
        "path(X, Y) :- edge(X, Y).\npath(X, Y) :- path(X, Z), edge(Z, Y).",
    ));
    for (from, to) in [("a", "d"), ("b", "a"), ("c", "d"), ("a", "a")] {
        let query = format!("path({from}, {to})");
        assert_eq!(rounded(probability(&kb, &query)), rounded(brute_force(from, to)), "{query}");
    }
}

#[test]
fn right_recursive_paths_match_possible_worlds() {
    let kb = load(&edge_program(
        "path(X, Y) :- edge(X, Y).\npath(X, Y) :- edge(X, Z), path(Z, Y).",
    ));
    for (from, to) in [("a", "d"), ("c", "b"), ("d", "a")] {
        let query = format!("path({from}, {to})");
        assert_eq!(rounded(probability(&kb, &query)), rounded(brute_force(from, to)), "{query}");
    }
}

#[test]
fn recursive_answers_match_the_fixpoint() {
    let kb = load(&edge_program(
        "path(X, Y) :- edge(X, Y).\npath(X, Y) :- path(X, Z), edge(Z, Y).",
    ));
    let all_edges = (1u32 << EDGES.len()) - 1;
    let mut expected = BTreeSet::new();
    for from in ["a", "b", "c", "d"] {
        for to in ["a", "b", "c", "d"] {
            if reaches(all_edges, from, to) {
                expected.insert(format!("path({from}, {to})"));
            }
        }
    }
    assert_eq!(answers(&kb, "path(X, Y)"), expected);
}

// ---- probabilities ----

#[test]
fn independent_alternatives_and_conjunctions() {
    let kb = load("0.5::a.\n0.6::b.\nc :- a.\nc :- b.\nd :- a, b.");
    assert_eq!(probability(&kb, "c"), 0.8);
    assert_eq!(probability(&kb, "d"), 0.3);
}

#[test]
fn negated_queries_take_the_complement() {
    let kb = load("0.4::p(1).");
    assert_eq!(probability(&kb, "~p(1)"), 0.6);
    assert_eq!(probability(&kb, "\\+p(2)"), 1.0);
}

#[test]
fn negation_over_derived_literals() {
    let kb = load("0.5::a.\n0.6::b.\nc :- a.\nc :- b.\nnone :- ~c.");
    assert_eq!(probability(&kb, "none"), 0.2);
}

#[test]
fn negation_shares_variables_with_its_base() {
    let kb = load("0.5::a.\n0.6::b.\nc :- a.\nc :- b.\ng :- ~c.\nh :- g.\nh :- a.");
    assert_eq!(probability(&kb, "h"), 0.7);
}

#[test]
fn negated_rule_instances_stay_independent() {
    let kb = load("a(1).\na(2).\n0.7::c(X) :- a(X).\nnone :- ~c(1), ~c(2).\nboth :- c(1), c(2).");
    assert_eq!(probability(&kb, "none"), 0.09);
    assert_eq!(probability(&kb, "both"), 0.49);
}

#[test]
fn negation_over_many_alternatives() {
    let mut text = String::new();
    for i in 0..20 {
        text.push_str(&format!("0.5::x{i}.\n0.5::y{i}.\nt :- x{i}, y{i}.\n"));
    }
    text.push_str("q :- ~t.");
    let kb = load(&text);
    assert_eq!(probability(&kb, "q"), rounded(0.75f64.powi(20)));
}

#[test]
fn repeated_variables_keep_every_answer() {
    let kb = load("e(a, a).\ne(a, b).\nr(X, Y) :- e(Z, Z), e(X, Y).\ns(X, Y) :- e(X, Y), e(Z, Z).");
    let expected = |name: &str| BTreeSet::from([format!("{name}(a, a)"), format!("{name}(a, b)")]);
    assert_eq!(answers(&kb, "r(X, Y)"), expected("r"));
    assert_eq!(answers(&kb, "s(X, Y)"), expected("s"));
}

#[test]
fn duplicate_facts_are_stored_once() {
    let mut kb = load("0.3::p(1).\n0.6::p(1).");
    let before = kb.len();
    kb.load_program("0.3::p(1).").unwrap();
    assert_eq!(kb.len(), before);
    assert_eq!(probability(&kb, "p(1)"), 0.72);
}

#[test]
fn rule_probabilities_multiply() {
    let kb = load("0.5::a.\n0.9::d :- a.\n0.5::e :- d.");
    assert_eq!(probability(&kb, "d"), 0.45);
    assert_eq!(probability(&kb, "e"), 0.225);

    // one draw of the rule weight, whichever way `c` holds
    let kb = load("0.5::a.\n0.6::b.\nc :- a.\nc :- b.\n0.9::d :- c.");
    assert_eq!(probability(&kb, "d"), 0.72);
}

// ---- runs ----

#[test]
fn solving_is_idempotent() {
    let kb = load(&edge_program(
        "path(X, Y) :- edge(X, Y).\npath(X, Y) :- path(X, Z), edge(Z, Y).",
    ));
    let q = parse_query("path(a, Y)").unwrap();
    let mut solver = Solver::new(&kb);
    let first = solver.solve(&q, None).unwrap();
    let second = solver.solve(&q, None).unwrap();
    assert_eq!(first, second);
    assert_eq!(probability(&kb, "path(a, d)"), probability(&kb, "path(a, d)"));
}

#[test]
fn configured_sample_size() {
    let kb = load("n(1).\nn(2).\nn(3).");
    let config = EngineConfig::from_json_str(r#"{ "max_samples": 1 }"#).unwrap();
    let mut solver = Solver::with_config(&kb, config);
    assert_eq!(solver.solve(&parse_query("n(X)").unwrap(), None).unwrap().len(), 1);
    assert_eq!(solver.solve(&parse_query("n(X)").unwrap(), Some(2)).unwrap().len(), 2);
}

#[test]
fn extension_primitives_materialise() {
    let prims = Primitives::new().register("neighbours", true, |args| {
        let base = args.first().and_then(Constant::as_i64).unwrap_or(0);
        Ok(Output::Many(vec![Constant::from_f64((base - 1) as f64), Constant::from_f64((base + 1) as f64)]))
    });
    let mut kb = KnowledgeBase::with_primitives(prims);
    kb.load_program("seed(10).\nnear(Y) :- seed(X), Y is fn_neighbours(X).").unwrap();
    assert_eq!(
        answers(&kb, "near(Y)"),
        BTreeSet::from(["near(11)".to_string(), "near(9)".to_string()])
    );
}

// ---- errors ----

#[test]
fn malformed_programs_are_rejected() {
    let mut kb = KnowledgeBase::new();
    assert!(matches!(kb.load_program("p(X)."), Err(Error::NonGroundedFact(_))));
    assert!(matches!(kb.load_program("p(X) :- q(Y)."), Err(Error::UnsafeClause(_))));
    assert!(matches!(kb.load_program("p(a"), Err(Error::Parse(_))));
    assert!(matches!(kb.load_program("0.5::p(a)?"), Err(Error::Syntax { .. })));
    assert!(matches!(kb.load_program("1.5::p(a)."), Err(Error::InvalidProbability { .. })));
    assert!(kb.is_empty());
}
