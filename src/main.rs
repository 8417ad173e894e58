use std::{env, fs, process};

use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use problite::{EngineConfig, Estimator, KnowledgeBase, Literal, Solver, SolverStats};

const USAGE: &str = "usage: problite <program> [--config <file.json>] [--digits <n>] [--json]";

#[derive(Debug, Default)]
struct Options {
    program: String,
    config: Option<String>,
    digits: Option<u32>,
    json: bool,
}

#[derive(Debug, Serialize)]
struct Answer {
    literal: String,
    probability: f64,
}

#[derive(Debug, Serialize)]
struct Report {
    query: String,
    answers: Vec<Answer>,
    proofs: usize,
    stats: SolverStats,
}

fn parse_args() -> Result<Options, String> {
    let mut opts = Options::default();
    let mut program = None;
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--json" => opts.json = true,
            "--config" => opts.config = Some(args.next().ok_or("--config needs a file")?),
            "--digits" => {
                let n = args.next().ok_or("--digits needs a number")?;
                opts.digits = Some(n.parse().map_err(|_| format!("bad digit count `{n}`"))?);
            }
            _ if program.is_none() => program = Some(arg),
            _ => return Err(format!("unexpected argument `{arg}`")),
        }
    }
    opts.program = program.ok_or("missing program file")?;
    Ok(opts)
}

fn answer(kb: &KnowledgeBase, config: &EngineConfig, query: &Literal, digits: Option<u32>) -> problite::Result<Report> {
    let mut solver = Solver::with_config(kb, config.clone());
    let proofs = solver.proofs(query)?;
    let estimator = Estimator::with_config(proofs, config.clone());

    let mut tags: Vec<(String, Literal)> = Vec::new();
    for proof in estimator.proofs() {
        let head = proof.head();
        if !tags.iter().any(|(t, _)| *t == head.tag()) {
            tags.push((head.tag(), head.clone().with_probability(1.0)));
        }
    }
    tags.sort_by(|a, b| a.0.cmp(&b.0));

    let answers = tags
        .into_iter()
        .map(|(tag, lit)| Answer { literal: tag, probability: estimator.probability(&lit, digits) })
        .collect();
    Ok(Report {
        query: query.to_string(),
        answers,
        proofs: estimator.proofs().len(),
        stats: solver.stats().clone(),
    })
}

fn run(opts: &Options) -> Result<(), Box<dyn std::error::Error>> {
    let config = match &opts.config {
        Some(path) => EngineConfig::from_json_str(&fs::read_to_string(path)?)?,
        None => EngineConfig::default(),
    };
    let text = fs::read_to_string(&opts.program)?;
    let mut kb = KnowledgeBase::new();
    let queries = kb.load_program(&text)?;
    info!(program = %opts.program, clauses = kb.len(), queries = queries.len(), "loaded");

    for query in &queries {
        let report = answer(&kb, &config, query, opts.digits)?;
        if opts.json {
            println!("{}", serde_json::to_string(&report)?);
            continue;
        }
        println!("% {}?", report.query);
        if report.answers.is_empty() {
            println!("no");
        }
        for a in &report.answers {
            println!("{}: {}", a.literal, a.probability);
        }
    }
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("problite=info")))
        .with_writer(std::io::stderr)
        .init();

    let opts = match parse_args() {
        Ok(opts) => opts,
        Err(msg) => {
            eprintln!("{msg}\n{USAGE}");
            process::exit(2);
        }
    };
    if let Err(err) = run(&opts) {
        eprintln!("problite: {err}");
        process::exit(1);
    }
}
