//! # Optimizer Configuration
//!
//! Session-level knobs for the search. The defaults suit interactive queries;
//! every field can be overridden from a serialized config because the struct is
//! `#[serde(default)]`.
//!
//! ## Search Stages
//!
//! A session runs one or more search stages. Each stage explores, implements and
//! optimizes the root group again, so later stages can see alternatives produced by
//! additional transformations. A stage may carry a cost threshold: once the best
//! plan is at or below it, the remaining stages are skipped.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Upper bound on the number of groups the memo may contain. Exploration stops
    /// applying rules once it is reached.
    pub max_memo_groups: usize,
    /// Upper bound on the total number of rule applications across all stages.
    pub max_iterations: usize,
    /// Number of execution hosts. Row counts of execution-partitioned results are
    /// divided by this when building costing inputs.
    pub segments: u32,
    /// Enables branch-and-bound pruning with partial-plan lower bounds.
    pub enable_space_pruning: bool,
    /// After exploration, derive statistics for every group that still has none.
    pub derive_stats_for_all_groups: bool,
    pub stages: Vec<SearchStageConfig>,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_memo_groups: 100_000,
            max_iterations: 1_000_000,
            segments: 3,
            enable_space_pruning: true,
            derive_stats_for_all_groups: true,
            stages: vec![SearchStageConfig::default()],
        }
    }
}

impl OptimizerConfig {
    pub fn num_stages(&self) -> usize {
        self.stages.len().max(1)
    }

    pub fn stage(&self, index: usize) -> SearchStageConfig {
        self.stages.get(index).cloned().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchStageConfig {
    /// Stop the search after this stage if the best plan costs at most this much.
    pub cost_threshold: Option<f64>,
    /// Cap on rule applications within this stage.
    pub max_xform_applications: Option<usize>,
}
