//! # Cost Model Contract
//!
//! The core never computes operator costs itself. A [`CostModel`] turns an
//! [`ExprHandle`] plus a small [`CostingInputs`] summary into a [`Cost`]; the same
//! input summary is built both for full costing of a cost context and for the
//! partial-plan lower bounds used by branch-and-bound pruning, so a cost model is
//! pruning-safe as long as it is monotone in its child costs.
//!
//! ## Cost Accumulation
//!
//! Costs are **additive**: the cost a model returns for a node includes the costs of
//! its children, which are passed in [`ChildCostInput::cost`].

use crate::handle::ExprHandle;
use serde::{Deserialize, Serialize};

/// Cost is a single comparable value representing the estimated expense of a plan.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Cost {
    /// Lower is better. `f64::MAX` represents infinity (an infeasible or not-yet-costed plan).
    pub total: f64,
}

impl Cost {
    pub fn zero() -> Self {
        Self { total: 0.0 }
    }

    pub fn new(total: f64) -> Self {
        Self { total }
    }

    pub fn infinite() -> Self {
        Self { total: f64::MAX }
    }

    pub fn is_infinite(&self) -> bool {
        self.total == f64::MAX
    }

    /// `self - other`, never below zero.
    pub fn saturating_sub(&self, other: Cost) -> Cost {
        if self.is_infinite() {
            return *self;
        }
        Cost::new((self.total - other.total).max(0.0))
    }

    /// Strictly cheaper, beyond floating-point noise.
    pub fn is_lower_than(&self, other: &Cost) -> bool {
        self.total < other.total && self != other
    }
}

/// Epsilon-based equality to handle floating-point imprecision in cost comparisons.
impl PartialEq for Cost {
    fn eq(&self, other: &Self) -> bool {
        (self.total - other.total).abs() < f64::EPSILON
    }
}

impl PartialOrd for Cost {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        self.total.partial_cmp(&other.total)
    }
}

impl std::fmt::Display for Cost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_infinite() {
            write!(f, "inf")
        } else {
            write!(f, "{:.3}", self.total)
        }
    }
}

/// What a cost model knows about one child of the node being costed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChildCostInput {
    /// Rows per host when the child's delivered distribution is partitioned.
    pub rows: f64,
    pub width: f64,
    pub rebinds: f64,
    pub cost: Cost,
}

/// Summary handed to [`CostModel::cost`].
#[derive(Debug, Clone, PartialEq)]
pub struct CostingInputs {
    /// Output rows of the node itself (per host when partitioned).
    pub rows: f64,
    pub width: f64,
    pub rebinds: f64,
    /// One entry per relational child; scalar children are omitted.
    pub children: Vec<ChildCostInput>,
    pub segments: u32,
}

impl CostingInputs {
    pub fn children_cost(&self) -> f64 {
        self.children.iter().map(|c| c.cost.total).sum()
    }
}

/// Trait for pluggable cost models.
pub trait CostModel: Send + Sync {
    /// Total cost of the node described by `handle`, including its children.
    fn cost(&self, handle: &ExprHandle<'_>, inputs: &CostingInputs) -> Cost;

    /// Fixed charge a node can pay regardless of its inputs. Partial plans subtract it once so
    /// that a lower bound never overshoots.
    fn fixed_node_cost(&self) -> Cost {
        Cost::zero()
    }
}
