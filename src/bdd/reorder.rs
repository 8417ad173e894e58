use tracing::debug;

use super::{Bdd, BddManager, Node};
use crate::error::{Error, Result};

// ---- adjacent swap ----

impl BddManager {
    /// Exchanges the variables at `level` and `level + 1`.
    ///
    /// Nodes keep their handles: every node of the upper variable that tests
    /// the lower one is rewritten in place, so roots held by callers still
    /// denote the same functions afterwards.
    pub fn swap(&mut self, level: u32) -> Result<()> {
        let lvl = level as usize;
        if lvl + 1 >= self.level_var.len() {
            return Err(Error::Internal(format!(
                "cannot swap level {level} of {} variables",
                self.level_var.len()
            )));
        }
        let x = self.level_var[lvl];
        let y = self.level_var[lvl + 1];

        let mut targets: Vec<Bdd> = self
            .unique
            .iter()
            .filter(|((var, low, high), _)| {
                *var == x && (self.node(*low).var == y || self.node(*high).var == y)
            })
            .map(|(_, id)| *id)
            .collect();
        targets.sort();

        for id in targets {
            let Node { low: f0, high: f1, .. } = self.node(id);
            let (f00, f01) = self.cofactors(f0, y);
            let (f10, f11) = self.cofactors(f1, y);
            let low = self.mk(x, f00, f10);
            let high = self.mk(x, f01, f11);
            self.unique.remove(&(x, f0, f1));
            self.nodes[id.index()] = Node { var: y, low, high };
            self.unique.insert((y, low, high), id);
        }

        self.level_var.swap(lvl, lvl + 1);
        self.var_level[x as usize] = level + 1;
        self.var_level[y as usize] = level;
        Ok(())
    }

    /// Moves `var` to `target` through adjacent swaps.
    pub fn move_var(&mut self, var: u32, target: u32) -> Result<()> {
        let Some(mut at) = self.level_of(var) else {
            return Err(Error::Internal(format!("unknown variable {var}")));
        };
        while at < target {
            self.swap(at)?;
            at += 1;
        }
        while at > target {
            self.swap(at - 1)?;
            at -= 1;
        }
        Ok(())
    }

    // ---- sifting ----

    /// Rudell sifting over the referenced roots: each variable, most
    /// populous first, is tried at every level and left where the rooted
    /// size was smallest. Returns the final rooted size.
    pub fn sift(&mut self) -> Result<usize> {
        let count = self.var_count();
        if count < 2 {
            return Ok(self.rooted_size());
        }
        self.gc();
        let before = self.rooted_size();

        let mut population = vec![0usize; count as usize];
        for (var, _, _) in self.unique.keys() {
            population[*var as usize] += 1;
        }
        let mut vars: Vec<u32> = (0..count).collect();
        vars.sort_by_key(|v| std::cmp::Reverse(population[*v as usize]));

        for var in vars {
            self.sift_var(var)?;
        }
        self.gc();
        let after = self.rooted_size();
        debug!(before, after, "sifted");
        Ok(after)
    }

    fn sift_var(&mut self, var: u32) -> Result<()> {
        let last = self.var_count() - 1;
        let Some(start) = self.level_of(var) else {
            return Ok(());
        };
        let mut best = self.rooted_size();
        let mut best_level = start;
        let limit = |best: usize, growth: f64| (best as f64 * growth).ceil() as usize;

        let mut at = start;
        while at < last {
            self.swap(at)?;
            at += 1;
            let size = self.rooted_size();
            if size < best {
                best = size;
                best_level = at;
            } else if size > limit(best, self.max_growth) {
                break;
            }
        }
        while at > 0 {
            self.swap(at - 1)?;
            at -= 1;
            let size = self.rooted_size();
            if size < best {
                best = size;
                best_level = at;
            } else if at < start && size > limit(best, self.max_growth) {
                break;
            }
        }
        self.move_var(var, best_level)
    }
}
