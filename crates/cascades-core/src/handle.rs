//! # Expression Handle
//!
//! Operator callbacks never touch the memo directly. They receive an [`ExprHandle`]
//! describing the alternative being worked on: its group's logical properties and
//! statistics, the properties of each child group, and, once children have been
//! optimized, the plan properties and statistics the chosen child plans deliver.
//!
//! A handle is a cheap snapshot; it holds `Arc`s to the groups involved so that the
//! references it hands out stay valid without any memo lock.

use crate::column::ColumnSet;
use crate::memo::group::EMPTY_LOGICAL;
use crate::memo::{Group, GroupExpression, GroupExprId, GroupId, Memo, OptCtxId};
use crate::operator::{Operator, PhysicalOperator};
use crate::properties::{DerivedPlanProps, GroupProps, LogicalProps, ReqdPlanProps, ScalarProps};
use crate::stats::Statistics;
use std::sync::Arc;

pub struct ExprHandle<'a> {
    memo: &'a Memo,
    gexpr: Arc<GroupExpression>,
    group: Arc<Group>,
    children: Vec<Arc<Group>>,
    child_plans: Vec<Option<Arc<DerivedPlanProps>>>,
    child_stats: Vec<Option<Arc<Statistics>>>,
    reqd: Option<Arc<ReqdPlanProps>>,
}

impl<'a> ExprHandle<'a> {
    pub fn new(memo: &'a Memo, gexpr: GroupExprId) -> Self {
        let gexpr = memo.gexpr(gexpr);
        let group = memo.group(memo.resolve(gexpr.group()));
        let children: Vec<Arc<Group>> = gexpr
            .children()
            .iter()
            .map(|c| memo.group(memo.resolve(*c)))
            .collect();
        let arity = children.len();
        Self {
            memo,
            gexpr,
            group,
            children,
            child_plans: vec![None; arity],
            child_stats: vec![None; arity],
            reqd: None,
        }
    }

    /// Attach the best plans of the given child contexts.
    pub fn with_child_contexts(mut self, contexts: &[Option<OptCtxId>]) -> Self {
        for (index, ctx) in contexts.iter().enumerate().take(self.children.len()) {
            let Some(best) = ctx.and_then(|c| self.memo.opt_context(c).best()) else {
                continue;
            };
            let cc = self.memo.cost_context(best);
            self.child_plans[index] = cc.derived().cloned();
            self.child_stats[index] = cc.stats().cloned();
        }
        self
    }

    /// Attach child plan properties directly (plan extraction re-derives bottom-up).
    pub fn with_child_plans(mut self, plans: Vec<Option<Arc<DerivedPlanProps>>>) -> Self {
        for (slot, plan) in self.child_plans.iter_mut().zip(plans) {
            *slot = plan;
        }
        self
    }

    pub fn with_child_plan(mut self, index: usize, plan: Arc<DerivedPlanProps>, stats: Option<Arc<Statistics>>) -> Self {
        if index < self.child_plans.len() {
            self.child_plans[index] = Some(plan);
            self.child_stats[index] = stats;
        }
        self
    }

    pub fn with_required(mut self, reqd: Arc<ReqdPlanProps>) -> Self {
        self.reqd = Some(reqd);
        self
    }

    pub fn memo(&self) -> &'a Memo {
        self.memo
    }

    pub fn gexpr(&self) -> &Arc<GroupExpression> {
        &self.gexpr
    }

    pub fn op(&self) -> &Operator {
        self.gexpr.op()
    }

    pub fn physical(&self) -> Option<&Arc<dyn PhysicalOperator>> {
        self.gexpr.op().as_physical()
    }

    pub fn group_id(&self) -> GroupId {
        self.group.id()
    }

    pub fn arity(&self) -> usize {
        self.children.len()
    }

    /// Master of child group `index`.
    pub fn child_group(&self, index: usize) -> Option<GroupId> {
        self.children.get(index).map(|g| g.id())
    }

    pub fn is_scalar_child(&self, index: usize) -> bool {
        self.children.get(index).is_some_and(|g| g.is_scalar())
    }

    pub fn logical(&self) -> &LogicalProps {
        self.group.logical()
    }

    pub fn child_props(&self, index: usize) -> Option<&GroupProps> {
        self.children.get(index).map(|g| g.props())
    }

    /// Logical properties of child `index`; empty for scalar or missing children.
    pub fn child_logical(&self, index: usize) -> &LogicalProps {
        self.children.get(index).map_or(&EMPTY_LOGICAL, |g| g.logical())
    }

    pub fn child_scalar(&self, index: usize) -> Option<&ScalarProps> {
        self.children.get(index).and_then(|g| g.scalar())
    }

    /// Columns used by all scalar children.
    pub fn scalar_used_columns(&self) -> ColumnSet {
        let mut used = ColumnSet::new();
        for scalar in self.children.iter().filter_map(|g| g.scalar()) {
            used.extend(&scalar.used_columns);
        }
        used
    }

    /// `(required ∪ columns used by scalar children) ∩ child output`.
    pub fn default_child_columns(&self, required: &ColumnSet, child: usize) -> ColumnSet {
        let mut wanted = required.clone();
        wanted.extend(&self.scalar_used_columns());
        wanted.intersection(&self.child_logical(child).output_columns)
    }

    pub fn child_plan(&self, index: usize) -> Option<&DerivedPlanProps> {
        self.child_plans.get(index).and_then(|p| p.as_deref())
    }

    /// Plans of the relational children that have one, in child order.
    pub fn child_plans(&self) -> impl Iterator<Item = &DerivedPlanProps> {
        self.child_plans.iter().filter_map(|p| p.as_deref())
    }

    pub fn first_relational_child_plan(&self) -> Option<&DerivedPlanProps> {
        self.children
            .iter()
            .zip(&self.child_plans)
            .find(|(g, _)| !g.is_scalar())
            .and_then(|(_, p)| p.as_deref())
    }

    pub fn child_stats(&self, index: usize) -> Option<&Arc<Statistics>> {
        self.child_stats.get(index).and_then(|s| s.as_ref())
    }

    pub fn group_stats(&self) -> Option<Arc<Statistics>> {
        self.group.stats()
    }

    pub fn child_group_stats(&self, index: usize) -> Option<Arc<Statistics>> {
        self.children.get(index).and_then(|g| g.stats())
    }

    pub fn required(&self) -> Option<&ReqdPlanProps> {
        self.reqd.as_deref()
    }
}
