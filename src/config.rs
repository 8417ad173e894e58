use serde::Deserialize;

use crate::error::Result;

/// Tunables shared by the solver, the proof assistant and the BDD engine.
///
/// Every field has a default, so a JSON document only needs to name the
/// values it overrides.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Stop the root subgoal once it holds this many facts.
    pub max_samples: Option<usize>,
    /// A negation whose complement probability rounds to zero at this many
    /// digits is dropped.
    pub negation_digits: u32,
    /// Keep only the shortest of the alternative proofs made of certain
    /// literals only.
    pub prune_certain_proofs: bool,
    pub bloom_expected_items: usize,
    pub bloom_false_positive_rate: f64,
    pub ite_cache_capacity: usize,
    /// Sifting abandons a direction once the BDD grows past
    /// `best * sifting_max_growth`.
    pub sifting_max_growth: f64,
    pub sift_before_count: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_samples: None,
            negation_digits: 6,
            prune_certain_proofs: true,
            bloom_expected_items: 1024,
            bloom_false_positive_rate: 0.01,
            ite_cache_capacity: 1 << 16,
            sifting_max_growth: 1.2,
            sift_before_count: false,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}
