//! # Plan Extraction
//!
//! Once search is done, the chosen plan exists only as a web of cost contexts: each
//! records the alternative it costed and, per child, the optimization context whose
//! best plan fed it. [`extract_plan`] walks that web from the root and rehydrates a
//! concrete [`PlanNode`] tree.
//!
//! ## Rehydration
//!
//! 1. The root context is the best one for the requirement over all stages run.
//! 2. Each relational child is extracted from the child context its parent's best
//!    cost context recorded.
//! 3. Scalar children carry no costing state; their subtrees are bound with a
//!    `Tree` pattern and copied in as they are.
//! 4. Plan properties are derived again bottom-up from the extracted children and
//!    checked against the requirement of the context the node was chosen for.
//!
//! A node without a best plan yields `NoPlanFound`; a node whose re-derived
//! properties miss its requirement yields `UnsatisfiedRequiredProperties`.

use crate::binding::{Binding, BoundExpr};
use crate::cost::Cost;
use crate::error::{OptimizerError, Result};
use crate::handle::ExprHandle;
use crate::memo::{GroupExprId, GroupId, Memo, OptCtxId};
use crate::operator::Operator;
use crate::pattern::Pattern;
use crate::properties::{DerivedPlanProps, ReqdPlanProps};
use crate::stats::Statistics;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// One node of an extracted plan.
#[derive(Debug, Clone)]
pub struct PlanNode {
    pub op: Operator,
    pub group: GroupId,
    pub gexpr: GroupExprId,
    /// Total cost of the subtree. Zero for scalar nodes.
    pub cost: Cost,
    /// Re-derived plan properties; `None` for scalar nodes.
    pub derived: Option<Arc<DerivedPlanProps>>,
    pub stats: Option<Arc<Statistics>>,
    pub children: Vec<PlanNode>,
}

impl PlanNode {
    pub fn is_scalar(&self) -> bool {
        self.op.is_scalar()
    }

    /// Number of nodes in the subtree, scalar nodes included.
    pub fn num_nodes(&self) -> usize {
        1 + self.children.iter().map(PlanNode::num_nodes).sum::<usize>()
    }

    /// Pre-order walk over the subtree.
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a PlanNode)) {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
    }

    /// Kind ids in pre-order, handy for asserting plan shapes.
    pub fn kinds(&self) -> Vec<&'static str> {
        let mut kinds = Vec::new();
        self.walk(&mut |n| kinds.push(n.op.kind_id()));
        kinds
    }

    fn fmt_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        write!(f, "{:indent$}{}", "", self.op, indent = depth * 2)?;
        if !self.is_scalar() {
            write!(f, " (cost={}", self.cost)?;
            if let Some(stats) = &self.stats {
                write!(f, ", rows={:.1}", stats.rows())?;
            }
            write!(f, ")")?;
        }
        writeln!(f)?;
        for child in &self.children {
            child.fmt_indented(f, depth + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for PlanNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_indented(f, 0)
    }
}

/// Rehydrate the best plan of `root` under `reqd` found in stages `0..stages`.
pub fn extract_plan(memo: &Memo, root: GroupId, reqd: &Arc<ReqdPlanProps>, stages: usize) -> Result<PlanNode> {
    let root = memo.resolve(root);
    let Some(oc) = memo.lookup_best_context(root, reqd, stages.max(1)) else {
        return Err(OptimizerError::no_plan(root, reqd, "no costed plan in any stage"));
    };
    let plan = extract_context(memo, oc)?;
    debug!("Extracted plan for group {}: cost={}, nodes={}", root, plan.cost, plan.num_nodes());
    Ok(plan)
}

fn extract_context(memo: &Memo, opt_ctx: OptCtxId) -> Result<PlanNode> {
    let oc = memo.opt_context(opt_ctx);
    let Some(best) = oc.best() else {
        return Err(OptimizerError::no_plan(oc.group(), oc.reqd(), "context has no best plan"));
    };
    let cc = memo.cost_context(best);
    let gexpr = memo.gexpr(cc.gexpr());
    let Some(op) = gexpr.op().as_physical().cloned() else {
        return Err(OptimizerError::no_plan(oc.group(), oc.reqd(), "best plan is not physical"));
    };
    trace!("Extracting expr {} for context {}", gexpr.id(), opt_ctx);

    let mut handle = ExprHandle::new(memo, gexpr.id()).with_required(Arc::clone(oc.reqd()));
    let mut children = Vec::with_capacity(gexpr.arity());
    for index in 0..gexpr.arity() {
        let child_group = memo.resolve(gexpr.children()[index]);
        if handle.is_scalar_child(index) {
            children.push(extract_scalar(memo, child_group)?);
            continue;
        }
        let Some(child_ctx) = cc.child_contexts().get(index).copied().flatten() else {
            return Err(OptimizerError::no_plan(child_group, oc.reqd(), "no child context recorded"));
        };
        let child = extract_context(memo, child_ctx)?;
        if let Some(derived) = &child.derived {
            handle = handle.with_child_plan(index, Arc::clone(derived), child.stats.clone());
        }
        children.push(child);
    }

    let derived = DerivedPlanProps::derive(op.as_ref(), &handle);
    if !oc.reqd().is_satisfied_by(handle.logical(), &derived) {
        return Err(OptimizerError::UnsatisfiedRequiredProperties {
            group: oc.group(),
            requirement: oc.reqd().to_string(),
        });
    }
    Ok(PlanNode {
        op: gexpr.op().clone(),
        group: oc.group(),
        gexpr: gexpr.id(),
        cost: cc.cost(),
        derived: Some(Arc::new(derived)),
        stats: cc.stats().cloned(),
        children,
    })
}

fn extract_scalar(memo: &Memo, group: GroupId) -> Result<PlanNode> {
    match Binding::for_group(memo, group, Pattern::Tree).next() {
        Some(tree) => scalar_node(&tree),
        None => Err(OptimizerError::no_plan(group, "scalar", "no scalar expression to bind")),
    }
}

fn scalar_node(tree: &BoundExpr) -> Result<PlanNode> {
    match tree {
        BoundExpr::Node { gexpr, group, op, children } => Ok(PlanNode {
            op: op.clone(),
            group: *group,
            gexpr: *gexpr,
            cost: Cost::zero(),
            derived: None,
            stats: None,
            children: children.iter().map(scalar_node).collect::<Result<_>>()?,
        }),
        // Tree patterns expand every child.
        BoundExpr::Leaf(group) => Err(OptimizerError::no_plan(*group, "scalar", "unexpanded scalar subtree")),
    }
}
