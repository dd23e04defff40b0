//! # Optimization and Cost Contexts
//!
//! An [`OptimizationContext`] is the search key *(group, required properties, stage)*.
//! It remembers the single best [`CostContext`] found for that key so far.
//!
//! A [`CostContext`] is one costed instantiation of an alternative: which request
//! index was tried, which child contexts supplied the inputs, which properties the
//! result delivers, the statistics it was costed with and the resulting cost. Cost
//! contexts are built completely before they are published to the memo, and are
//! immutable afterwards.
//!
//! ## Choosing Between Plans
//!
//! [`CostContext::better_than`] decides whether one plan replaces another as the best
//! of a context. Cheaper always wins. On a cost tie:
//!
//! 1. A plan whose output is split across hosts (hashed or random) beats one that is not.
//! 2. Hashed output beats random output.
//! 3. Between two join plans whose outer and inner inputs all have the same row
//!    estimate, the one whose inner input has fewer joins wins.
//!
//! Anything else is no preference, and the plan already recorded is kept.

use crate::cost::Cost;
use crate::memo::{CostCtxId, GroupExprId, GroupId, Memo, OptCtxId};
use crate::properties::{DerivedPlanProps, DistributionSpec, ReqdPlanProps};
use crate::stats::Statistics;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptContextState {
    Init,
    Optimizing,
    Optimized,
}

#[derive(Debug)]
struct OptContextInner {
    best: Option<CostCtxId>,
    state: OptContextState,
    multi_stage_agg: bool,
}

#[derive(Debug)]
pub struct OptimizationContext {
    id: OptCtxId,
    group: GroupId,
    reqd: Arc<ReqdPlanProps>,
    stage: usize,
    inner: Mutex<OptContextInner>,
}

impl OptimizationContext {
    pub(crate) fn new(id: OptCtxId, group: GroupId, reqd: Arc<ReqdPlanProps>, stage: usize) -> Self {
        Self {
            id,
            group,
            reqd,
            stage,
            inner: Mutex::new(OptContextInner {
                best: None,
                state: OptContextState::Init,
                multi_stage_agg: false,
            }),
        }
    }

    pub fn id(&self) -> OptCtxId {
        self.id
    }

    pub fn group(&self) -> GroupId {
        self.group
    }

    pub fn reqd(&self) -> &Arc<ReqdPlanProps> {
        &self.reqd
    }

    pub fn stage(&self) -> usize {
        self.stage
    }

    pub fn best(&self) -> Option<CostCtxId> {
        self.inner.lock().best
    }

    pub fn state(&self) -> OptContextState {
        self.inner.lock().state
    }

    pub(crate) fn set_state(&self, state: OptContextState) {
        self.inner.lock().state = state;
    }

    /// Whether the current best plan uses a multi-stage aggregate.
    pub fn has_multi_stage_agg(&self) -> bool {
        self.inner.lock().multi_stage_agg
    }

    /// Install `new` as best if the best is still `expected`.
    pub(crate) fn replace_best(&self, expected: Option<CostCtxId>, new: CostCtxId, multi_stage_agg: bool) -> bool {
        let mut inner = self.inner.lock();
        if inner.best != expected {
            return false;
        }
        inner.best = Some(new);
        inner.multi_stage_agg = multi_stage_agg;
        true
    }
}

impl fmt::Display for OptimizationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}[stage {}] {}", self.id, self.group, self.stage, self.reqd)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CostContextState {
    Uncosted,
    Costing,
    Costed,
}

#[derive(Debug)]
pub struct CostContext {
    id: CostCtxId,
    gexpr: GroupExprId,
    opt_ctx: OptCtxId,
    request: usize,
    /// One entry per child; `None` for scalar children.
    child_contexts: Vec<Option<OptCtxId>>,
    derived: Option<Arc<DerivedPlanProps>>,
    stats: Option<Arc<Statistics>>,
    cost: Cost,
    state: CostContextState,
    pruned: bool,
}

/// Everything needed to publish a cost context.
#[derive(Debug, Clone)]
pub struct CostContextParts {
    pub gexpr: GroupExprId,
    pub opt_ctx: OptCtxId,
    pub request: usize,
    pub child_contexts: Vec<Option<OptCtxId>>,
    pub derived: Option<Arc<DerivedPlanProps>>,
    pub stats: Option<Arc<Statistics>>,
    pub cost: Cost,
    pub pruned: bool,
}

impl CostContext {
    pub(crate) fn new(id: CostCtxId, parts: CostContextParts) -> Self {
        let state = if parts.pruned {
            CostContextState::Uncosted
        } else {
            CostContextState::Costed
        };
        Self {
            id,
            gexpr: parts.gexpr,
            opt_ctx: parts.opt_ctx,
            request: parts.request,
            child_contexts: parts.child_contexts,
            derived: parts.derived,
            stats: parts.stats,
            cost: parts.cost,
            state,
            pruned: parts.pruned,
        }
    }

    pub fn id(&self) -> CostCtxId {
        self.id
    }

    pub fn gexpr(&self) -> GroupExprId {
        self.gexpr
    }

    pub fn opt_ctx(&self) -> OptCtxId {
        self.opt_ctx
    }

    pub fn request(&self) -> usize {
        self.request
    }

    pub fn child_contexts(&self) -> &[Option<OptCtxId>] {
        &self.child_contexts
    }

    pub fn derived(&self) -> Option<&Arc<DerivedPlanProps>> {
        self.derived.as_ref()
    }

    pub fn stats(&self) -> Option<&Arc<Statistics>> {
        self.stats.as_ref()
    }

    /// Valid only when costed. A pruned context carries the lower bound that
    /// pruned it.
    pub fn cost(&self) -> Cost {
        self.cost
    }

    pub fn state(&self) -> CostContextState {
        self.state
    }

    pub fn is_pruned(&self) -> bool {
        self.pruned
    }

    pub fn is_costed(&self) -> bool {
        self.state == CostContextState::Costed
    }

    fn distribution(&self) -> Option<&DistributionSpec> {
        self.derived.as_deref().map(|d| &d.distribution)
    }

    /// Should `self` replace `other` as the best plan of a context?
    pub fn better_than(&self, other: &CostContext, memo: &Memo) -> bool {
        if self.cost.is_lower_than(&other.cost) {
            return true;
        }
        if self.cost != other.cost {
            return false;
        }

        if let (Some(mine), Some(theirs)) = (self.distribution(), other.distribution()) {
            if mine.is_execution_partitioned() != theirs.is_execution_partitioned() {
                return mine.is_execution_partitioned();
            }
            match (mine, theirs) {
                (DistributionSpec::Hashed { .. }, DistributionSpec::Random) => return true,
                (DistributionSpec::Random, DistributionSpec::Hashed { .. }) => return false,
                _ => {}
            }
        }

        self.better_join_shape(other, memo)
    }

    fn better_join_shape(&self, other: &CostContext, memo: &Memo) -> bool {
        let is_join = |cc: &CostContext| {
            memo.gexpr(cc.gexpr)
                .op()
                .as_physical()
                .is_some_and(|op| op.is_join())
        };
        if !is_join(self) || !is_join(other) {
            return false;
        }
        let (Some((outer_a, inner_a, depth_a)), Some((outer_b, inner_b, depth_b))) =
            (self.join_inputs(memo), other.join_inputs(memo))
        else {
            return false;
        };
        if outer_a == inner_a && outer_b == inner_b && inner_a == inner_b {
            return depth_a < depth_b;
        }
        false
    }

    /// Outer rows, inner rows and the inner group's join depth.
    fn join_inputs(&self, memo: &Memo) -> Option<(f64, f64, u32)> {
        let mut relational = self.child_contexts.iter().flatten();
        let outer = relational.next()?;
        let inner = relational.next()?;
        let rows = |ctx: &OptCtxId| -> Option<f64> {
            let best = memo.opt_context(*ctx).best()?;
            memo.cost_context(best).stats().map(|s| s.rows())
        };
        let inner_group = memo.opt_context(*inner).group();
        let depth = memo.group(memo.resolve(inner_group)).logical().join_depth;
        Some((rows(outer)?, rows(inner)?, depth))
    }
}

impl fmt::Display for CostContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} expr={} ctx={} req={} cost={}{}",
            self.id,
            self.gexpr,
            self.opt_ctx,
            self.request,
            self.cost,
            if self.pruned { " (pruned)" } else { "" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::{ColRef, ColumnSet};
    use crate::memo::Memo;
    use crate::properties::DistributionSpec;
    use crate::testing;
    use proptest::prelude::*;

    fn costed(memo: &Memo, cost: f64, distribution: DistributionSpec) -> Arc<CostContext> {
        let (gexpr, group) = testing::scan_alternative(memo, 1);
        let oc = memo.lookup_or_create_context(group, &Arc::new(ReqdPlanProps::any(ColumnSet::new())), 0).0;
        let derived = DerivedPlanProps {
            distribution,
            ..DerivedPlanProps::default()
        };
        memo.publish_cost_context(CostContextParts {
            gexpr,
            opt_ctx: oc,
            request: 0,
            child_contexts: vec![],
            derived: Some(Arc::new(derived)),
            stats: None,
            cost: Cost::new(cost),
            pruned: false,
        })
    }

    #[test]
    fn test_cheaper_wins_regardless_of_distribution() {
        let memo = Memo::new();
        let cheap = costed(&memo, 1.0, DistributionSpec::Singleton);
        let pricey = costed(&memo, 2.0, DistributionSpec::hashed(vec![ColRef(1)]));
        assert!(cheap.better_than(&pricey, &memo));
        assert!(!pricey.better_than(&cheap, &memo));
    }

    #[test]
    fn test_tie_prefers_partitioned_then_hashed() {
        let memo = Memo::new();
        let singleton = costed(&memo, 5.0, DistributionSpec::Singleton);
        let random = costed(&memo, 5.0, DistributionSpec::Random);
        let hashed = costed(&memo, 5.0, DistributionSpec::hashed(vec![ColRef(1)]));
        assert!(random.better_than(&singleton, &memo));
        assert!(!singleton.better_than(&random, &memo));
        assert!(hashed.better_than(&random, &memo));
        assert!(!random.better_than(&hashed, &memo));
        assert!(!hashed.better_than(&hashed, &memo));
    }

    #[test]
    fn test_tie_prefers_shallower_inner_join() {
        // Scenario C: both joins cost the same and every input has 100 rows; the plan
        // whose inner side is a plain scan beats the one whose inner side is a join.
        let memo = Memo::new();
        let env = testing::two_join_plans(&memo, 100.0);
        let shallow = memo.cost_context(env.shallow_inner);
        let deep = memo.cost_context(env.deep_inner);
        assert_eq!(shallow.cost(), deep.cost());
        assert!(shallow.better_than(&deep, &memo));
        assert!(!deep.better_than(&shallow, &memo));
    }

    fn arb_distribution() -> impl Strategy<Value = DistributionSpec> {
        prop_oneof![
            Just(DistributionSpec::Singleton),
            Just(DistributionSpec::Random),
            Just(DistributionSpec::Replicated),
            Just(DistributionSpec::hashed(vec![ColRef(1)])),
        ]
    }

    proptest! {
        #[test]
        fn prop_better_than_is_antisymmetric(
            ca in 0..4u8, cb in 0..4u8, da in arb_distribution(), db in arb_distribution()
        ) {
            let memo = Memo::new();
            let a = costed(&memo, f64::from(ca), da);
            let b = costed(&memo, f64::from(cb), db);
            prop_assert!(!(a.better_than(&b, &memo) && b.better_than(&a, &memo)));
            prop_assert!(!a.better_than(&a, &memo));
        }
    }
}
