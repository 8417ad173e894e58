use rustc_hash::FxHashMap;

use super::{Bdd, BddManager};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionNode {
    Terminal(bool),
    Branch { var: u32, low: usize, high: usize },
}

/// An unreduced decision graph. Children are added before their parents,
/// so node indices form a topological order.
#[derive(Debug, Clone, Default)]
pub struct DecisionGraph {
    nodes: Vec<DecisionNode>,
}

impl DecisionGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn terminal(&mut self, value: bool) -> usize {
        self.nodes.push(DecisionNode::Terminal(value));
        self.nodes.len() - 1
    }

    pub fn branch(&mut self, var: u32, low: usize, high: usize) -> usize {
        self.nodes.push(DecisionNode::Branch { var, low, high });
        self.nodes.len() - 1
    }

    /// Full decision tree of a truth table over `vars` variables, bit `i`
    /// of the row index giving variable `i`.
    pub fn from_truth_table(vars: u32, table: &[bool]) -> (Self, usize) {
        let mut graph = Self::new();
        let root = graph.tree(0, vars, 0, table);
        (graph, root)
    }

    fn tree(&mut self, var: u32, vars: u32, row: usize, table: &[bool]) -> usize {
        if var == vars {
            let value = table.get(row).copied().unwrap_or(false);
            return self.terminal(value);
        }
        let low = self.tree(var + 1, vars, row, table);
        let high = self.tree(var + 1, vars, row | 1 << var, table);
        self.branch(var, low, high)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, index: usize) -> Option<&DecisionNode> {
        self.nodes.get(index)
    }
}

impl BddManager {
    /// Canonical BDD of the function `graph` computes from `root`: redundant
    /// tests removed, isomorphic subgraphs merged.
    pub fn reduce(&mut self, graph: &DecisionGraph, root: usize) -> Result<Bdd> {
        if root >= graph.len() {
            return Err(Error::Internal(format!("no node {root} in decision graph")));
        }
        let mut done: FxHashMap<usize, Bdd> = FxHashMap::default();
        for (index, node) in graph.nodes.iter().enumerate().take(root + 1) {
            let r = match *node {
                DecisionNode::Terminal(value) => self.constant(value),
                DecisionNode::Branch { var, low, high } => {
                    let (Some(&lo), Some(&hi)) = (done.get(&low), done.get(&high)) else {
                        return Err(Error::Internal(format!(
                            "decision node {index} points forward"
                        )));
                    };
                    self.ensure_vars(var + 1);
                    let level = self.var_level[var as usize];
                    if lo == hi {
                        lo
                    } else if level < self.level(lo) && level < self.level(hi) {
                        self.mk(var, lo, hi)
                    } else {
                        let x = self.var(var);
                        self.ite(x, hi, lo)
                    }
                }
            };
            done.insert(index, r);
        }
        done.get(&root)
            .copied()
            .ok_or_else(|| Error::Internal("decision graph root not reduced".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_subtrees_merge() {
        let mut m = BddManager::default();
        let table: Vec<bool> = (0..8).map(|row| row & 1 == 1 && row & 4 == 4).collect();
        let (graph, root) = DecisionGraph::from_truth_table(3, &table);
        let f = m.reduce(&graph, root).unwrap();
        let (a, c) = (m.var(0), m.var(2));
        assert_eq!(f, m.and(a, c));
        assert_eq!(m.size(f), 2);
    }

    #[test]
    fn out_of_order_graphs_fall_back_to_ite() {
        let mut m = BddManager::default();
        let mut g = DecisionGraph::new();
        let f = g.terminal(false);
        let t = g.terminal(true);
        let inner = g.branch(0, f, t);
        let root = g.branch(1, f, inner);
        let r = m.reduce(&g, root).unwrap();
        let (a, b) = (m.var(0), m.var(1));
        assert_eq!(r, m.and(a, b));
    }

    #[test]
    fn rejects_forward_edges() {
        let mut m = BddManager::default();
        let mut g = DecisionGraph::new();
        let root = g.branch(0, 1, 2);
        g.terminal(false);
        g.terminal(true);
        assert!(m.reduce(&g, root).is_err());
    }
}
