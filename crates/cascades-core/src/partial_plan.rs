//! # Partial Plans
//!
//! A partial plan is an alternative under a requirement, optionally with one child
//! already costed. Its lower bound is a cost no completed plan rooted at that
//! alternative can beat, which is what branch-and-bound pruning compares against the
//! best plan known for the group.
//!
//! ## Bound Construction
//!
//! - The costed child contributes exactly what full costing would use: the rows,
//!   width and rebinds of its statistics snapshot and its real cost.
//! - Every other relational child contributes its group's statistics at rows per
//!   host and the group's own lower bound under the requirement request 0 would pass
//!   it ([`group_lower_bound`]).
//! - The node itself is described by its group's statistics at rows per host.
//!
//! The cost model is then asked for the node's cost, and its fixed per-node constant
//! is subtracted once when the node has children. Bounds are cached on the
//! alternative (per requirement and costed child) and on the group (per
//! requirement); both caches are dropped when the group's statistics are reset.

use crate::column::ColumnSet;
use crate::context::CostContext;
use crate::cost::{ChildCostInput, Cost, CostModel, CostingInputs};
use crate::handle::ExprHandle;
use crate::memo::{CostCtxId, GroupExprId, GroupId, Memo, OptCtxId, PartialPlanKey};
use crate::properties::ReqdPlanProps;
use crate::stats::Statistics;
use std::sync::Arc;
use tracing::trace;

/// Costing input for a child whose plan is the cost context `cc`.
pub(crate) fn cost_context_input(memo: &Memo, segments: u32, cc: &CostContext) -> ChildCostInput {
    let oc = memo.opt_context(cc.opt_ctx());
    let empty = Statistics::empty();
    let stats = cc.stats().map_or(&empty, |s| s.as_ref());
    let partitioned = cc
        .derived()
        .is_some_and(|d| d.distribution.is_execution_partitioned());
    ChildCostInput {
        rows: if partitioned {
            stats.rows_per_host(segments)
        } else {
            stats.rows()
        },
        width: stats.width(&oc.reqd().columns),
        rebinds: stats.rebinds(),
        cost: cc.cost(),
    }
}

/// Costing input for the best plan of `opt_ctx`, if it has one.
pub(crate) fn best_plan_input(memo: &Memo, segments: u32, opt_ctx: OptCtxId) -> Option<ChildCostInput> {
    let best = memo.opt_context(opt_ctx).best()?;
    Some(cost_context_input(memo, segments, &memo.cost_context(best)))
}

fn group_stats_input(stats: Option<&Statistics>, columns: &ColumnSet, segments: u32, cost: Cost) -> ChildCostInput {
    match stats {
        Some(s) => ChildCostInput {
            rows: s.rows_per_host(segments),
            width: s.width(columns),
            rebinds: s.rebinds(),
            cost,
        },
        None => ChildCostInput {
            rows: 0.0,
            width: 0.0,
            rebinds: 1.0,
            cost,
        },
    }
}

/// Lower bound on any completed plan rooted at `gexpr` under `reqd`.
pub fn lower_bound(
    memo: &Memo,
    model: &dyn CostModel,
    segments: u32,
    gexpr: GroupExprId,
    reqd: &Arc<ReqdPlanProps>,
    costed_child: Option<(usize, CostCtxId)>,
) -> Cost {
    let expr = memo.gexpr(gexpr);
    let key = PartialPlanKey {
        reqd: Arc::clone(reqd),
        costed_child,
    };
    if let Some(cached) = expr.partial_plan_cache().get(&key) {
        return *cached.value();
    }
    let Some(op) = expr.op().as_physical().cloned() else {
        return Cost::infinite();
    };

    let handle = ExprHandle::new(memo, gexpr).with_required(Arc::clone(reqd));
    let mut children = Vec::with_capacity(handle.arity());
    let mut bound = None;
    for index in 0..handle.arity() {
        if handle.is_scalar_child(index) {
            continue;
        }
        if let Some((costed, cc)) = costed_child {
            if costed == index {
                children.push(cost_context_input(memo, segments, &memo.cost_context(cc)));
                continue;
            }
        }
        let Some(child_group) = handle.child_group(index) else {
            continue;
        };
        let child_reqd = ReqdPlanProps::compute_child(op.as_ref(), &handle, reqd, index, &[], 0);
        let child_bound = group_lower_bound(memo, model, segments, child_group, &child_reqd);
        if child_bound.is_infinite() {
            bound = Some(Cost::infinite());
            break;
        }
        let stats = handle.child_group_stats(index);
        children.push(group_stats_input(stats.as_deref(), &child_reqd.columns, segments, child_bound));
    }

    let bound = bound.unwrap_or_else(|| {
        let stats = handle.group_stats();
        let node = group_stats_input(stats.as_deref(), &reqd.columns, segments, Cost::zero());
        let has_children = !children.is_empty();
        let inputs = CostingInputs {
            rows: node.rows,
            width: node.width,
            rebinds: node.rebinds,
            children,
            segments,
        };
        let cost = model.cost(&handle, &inputs);
        if has_children {
            cost.saturating_sub(model.fixed_node_cost())
        } else {
            cost
        }
    });
    trace!("Lower bound of expr {} under {}: {}", gexpr, reqd, bound);
    expr.partial_plan_cache().insert(key, bound);
    bound
}

/// Smallest lower bound over the group's physical alternatives, enforcers excluded.
/// Infinite when the group has no such alternative.
pub fn group_lower_bound(
    memo: &Memo,
    model: &dyn CostModel,
    segments: u32,
    group: GroupId,
    reqd: &ReqdPlanProps,
) -> Cost {
    let g = memo.group(memo.resolve(group));
    if let Some(cached) = g.lower_bound_cache().get(reqd) {
        return *cached.value();
    }
    let shared = Arc::new(reqd.clone());
    let mut best = Cost::infinite();
    for alt in g.alternatives() {
        let gexpr = memo.gexpr(alt);
        if !gexpr.is_physical() || gexpr.op().is_enforcer() {
            continue;
        }
        let bound = lower_bound(memo, model, segments, alt, &shared, None);
        if bound.is_lower_than(&best) {
            best = bound;
        }
    }
    g.lower_bound_cache().insert(reqd.clone(), best);
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::AbortSignal;
    use crate::testing::{self, TestCostModel};

    fn close(a: Cost, b: f64) -> bool {
        (a.total - b).abs() < 1e-9
    }

    #[test]
    fn test_leaf_bound_uses_rows_per_host() {
        let memo = Memo::new();
        let (scan, group) = testing::scan_alternative(&memo, 1);
        let cols = ColumnSet::from([1]);
        memo.derive_stats(group, &cols, &AbortSignal::new()).unwrap();
        let reqd = Arc::new(ReqdPlanProps::any(cols));

        let bound = lower_bound(&memo, &TestCostModel, 2, scan, &reqd, None);
        // 200 rows over two hosts, 4 bytes wide.
        assert!(close(bound, 1.0 + 100.0 * 4.0 / 1000.0));
        assert_eq!(memo.gexpr(scan).partial_plan_cache().len(), 1);
        assert_eq!(lower_bound(&memo, &TestCostModel, 2, scan, &reqd, None), bound);
    }

    #[test]
    fn test_join_bound_adds_child_bounds_and_drops_fixed_cost() {
        let memo = Memo::new();
        let signal = AbortSignal::new();
        let (_, a) = testing::scan_alternative(&memo, 1);
        let b = memo.insert(testing::scan(2, &[2]), vec![], None, None).unwrap().group;
        memo.insert(testing::phys_scan(2, &[2]), vec![], Some(b), None).unwrap();
        let ab = memo.insert(testing::join(), vec![a, b], None, None).unwrap().group;
        let join = memo.insert(testing::phys_join(), vec![a, b], Some(ab), None).unwrap().gexpr;
        let cols = ColumnSet::from([1, 2]);
        let stats = memo.derive_stats(ab, &cols, &signal).unwrap();

        let lb_a = group_lower_bound(&memo, &TestCostModel, 3, a, &ReqdPlanProps::any(ColumnSet::from([1])));
        let lb_b = group_lower_bound(&memo, &TestCostModel, 3, b, &ReqdPlanProps::any(ColumnSet::from([2])));
        let bound = lower_bound(&memo, &TestCostModel, 3, join, &Arc::new(ReqdPlanProps::any(cols.clone())), None);
        let node = 1.0 + stats.rows_per_host(3) * stats.width(&cols) / 1000.0;
        assert!(close(bound, node + lb_a.total + lb_b.total - 1.0));
    }

    #[test]
    fn test_missing_implementation_makes_bound_infinite() {
        let memo = Memo::new();
        let (_, a) = testing::scan_alternative(&memo, 1);
        let b = memo.insert(testing::scan(2, &[2]), vec![], None, None).unwrap().group;
        let ab = memo.insert(testing::join(), vec![a, b], None, None).unwrap().group;
        let join = memo.insert(testing::phys_join(), vec![a, b], Some(ab), None).unwrap().gexpr;
        let reqd = ReqdPlanProps::any(ColumnSet::from([1, 2]));
        assert!(group_lower_bound(&memo, &TestCostModel, 3, b, &reqd).is_infinite());
        assert!(lower_bound(&memo, &TestCostModel, 3, join, &Arc::new(reqd), None).is_infinite());
    }
}
