//! # Optimizer Entry Points
//!
//! [`Optimizer`] is the object a scheduler drives. It borrows the shared memo and
//! exposes two operations:
//!
//! - [`Optimizer::optimize`]: find the best plan of a group under a requirement.
//! - [`Optimizer::cost`]: cost one alternative under one context, given the child
//!   contexts whose best plans supply its inputs.
//!
//! Both take `&self`, and any number of threads may call them on the same memo.
//! All shared state lives in the memo's concurrent tables: contexts are created
//! insert-if-absent, cost contexts are published insert-best, and the best plan of
//! a context only ever moves to a strictly better one.
//!
//! ## Optimizing a Group
//!
//! Physical alternatives are visited by optimization level, highest first. The
//! alternative list is re-read during each pass, so enforcers appended while the
//! pass runs are optimized too. For each alternative and each request index:
//!
//! 1. Skip the request if it already has a cost context.
//! 2. Prune it when its lower bound is already worse than the best plan any stage
//!    so far found for the requirement.
//! 3. Check the operator can be used for the requirement at all.
//! 4. Optimize the children in the operator's preferred order, each under the
//!    requirement derived from the parent's and from the siblings already done.
//! 5. Derive the delivered properties and decide enforcement. Enforcers needed to
//!    meet the requirement are added to the group; the alternative itself is costed
//!    only when nothing needs enforcing.
//! 6. Cost it and try to install it as the context's best.
//!
//! ## Concurrency
//!
//! Each call keeps the chain of contexts it is currently inside. Reaching a context
//! on its own chain returns that context's current best instead of recursing. A
//! context another thread is still working on is worked on here as well; every step
//! above is idempotent, so both threads converge on the same best plan.

use crate::cancel::AbortSignal;
use crate::config::OptimizerConfig;
use crate::context::{CostContext, CostContextParts, OptContextState, OptimizationContext};
use crate::cost::{Cost, CostModel, CostingInputs};
use crate::enforcer::{EnforcerFactory, EnforcingDecision};
use crate::error::Result;
use crate::handle::ExprHandle;
use crate::memo::{CostCtxId, GroupExprId, GroupExpression, GroupId, Memo, OptCtxId, Provenance};
use crate::operator::{EnforcerKind, MotionKind, PhysicalOperator};
use crate::partial_plan::{self, best_plan_input};
use crate::properties::{DerivedPlanProps, DistributionSpec, PropertySpec, ReqdPlanProps, RewindabilitySpec};
use std::sync::Arc;
use tracing::{debug, trace};

/// Provenance rule name of enforcers added during optimization.
pub const ENFORCER_RULE: &str = "enforcer";

pub struct Optimizer<'a> {
    memo: &'a Memo,
    cost_model: &'a dyn CostModel,
    enforcers: &'a dyn EnforcerFactory,
    config: &'a OptimizerConfig,
    abort: &'a AbortSignal,
    stage: usize,
}

impl<'a> Optimizer<'a> {
    pub fn new(
        memo: &'a Memo,
        cost_model: &'a dyn CostModel,
        enforcers: &'a dyn EnforcerFactory,
        config: &'a OptimizerConfig,
        abort: &'a AbortSignal,
    ) -> Self {
        Self {
            memo,
            cost_model,
            enforcers,
            config,
            abort,
            stage: 0,
        }
    }

    /// Optimize in search stage `stage`. Contexts are keyed by stage.
    pub fn with_stage(mut self, stage: usize) -> Self {
        self.stage = stage;
        self
    }

    pub fn stage(&self) -> usize {
        self.stage
    }

    /// Best plan of `group` under `reqd`, as the best cost context of the context
    /// for that requirement. `Ok(None)` means no alternative can deliver it.
    pub fn optimize(&self, group: GroupId, reqd: &Arc<ReqdPlanProps>) -> Result<Option<CostCtxId>> {
        let mut path = Vec::new();
        let oc = self.optimize_group(group, reqd, None, &mut path)?;
        Ok(self.memo.opt_context(oc).best())
    }

    fn optimize_group(
        &self,
        group: GroupId,
        reqd: &Arc<ReqdPlanProps>,
        parent: Option<&GroupExpression>,
        path: &mut Vec<OptCtxId>,
    ) -> Result<OptCtxId> {
        self.abort.check()?;
        let group = self.memo.resolve(group);
        let (oc_id, created) = self.memo.lookup_or_create_context(group, reqd, self.stage);
        let oc = self.memo.opt_context(oc_id);
        if !created && (oc.state() == OptContextState::Optimized || path.contains(&oc_id)) {
            return Ok(oc_id);
        }

        trace!("Optimizing group {} under {}", group, reqd);
        oc.set_state(OptContextState::Optimizing);
        path.push(oc_id);
        let g = self.memo.group(group);
        let parent_op = parent.and_then(|p| p.op().as_physical().cloned());
        let mut level = Some(g.max_optimization_level());
        while let Some(current) = level {
            let mut seen = 0;
            loop {
                let alternatives = g.alternatives();
                if seen >= alternatives.len() {
                    break;
                }
                for alt in &alternatives[seen..] {
                    if parent.is_some_and(|p| p.id() == *alt) {
                        continue;
                    }
                    let gexpr = self.memo.gexpr(*alt);
                    if gexpr.optimization_level() != current {
                        continue;
                    }
                    let Some(op) = gexpr.op().as_physical() else {
                        continue;
                    };
                    if !op.should_optimize(parent_op.as_deref(), reqd) {
                        continue;
                    }
                    self.optimize_alternative(&gexpr, &oc, path)?;
                }
                seen = alternatives.len();
            }
            level = current.damp();
        }
        path.pop();
        oc.set_state(OptContextState::Optimized);
        match oc.best() {
            Some(best) => debug!("Best plan for group {}: {}", group, self.memo.cost_context(best)),
            None => debug!("No plan for group {} under {}", group, reqd),
        }
        Ok(oc_id)
    }

    fn optimize_alternative(
        &self,
        gexpr: &Arc<GroupExpression>,
        oc: &Arc<OptimizationContext>,
        path: &mut Vec<OptCtxId>,
    ) -> Result<()> {
        let Some(op) = gexpr.op().as_physical().cloned() else {
            return Ok(());
        };
        for request in 0..op.num_requests() {
            self.abort.check()?;
            if self.install_existing(gexpr, oc, request) {
                continue;
            }
            if self.config.enable_space_pruning {
                if let Some(bound) = self.prune_bound(gexpr.id(), oc, None) {
                    self.record_pruned(gexpr.id(), oc, request, bound, vec![None; gexpr.arity()]);
                    continue;
                }
            }
            let handle = ExprHandle::new(self.memo, gexpr.id()).with_required(Arc::clone(oc.reqd()));
            if !Self::check_required_props(op.as_ref(), &handle, oc.reqd()) {
                continue;
            }
            let Some(children) = self.optimize_children(gexpr, op.as_ref(), oc, request, path)? else {
                continue;
            };
            if !self.check_enforced_props(gexpr, op.as_ref(), oc, &children)? {
                continue;
            }
            if let Some(cc) = self.cost(gexpr.id(), oc.id(), request, &children)? {
                self.memo.update_best(&cc);
            } else {
                self.install_existing(gexpr, oc, request);
            }
        }
        Ok(())
    }

    /// Offer the cost context already recorded for `request` as the best, in case the
    /// thread that published it has not done so yet. Returns whether one exists.
    fn install_existing(&self, gexpr: &GroupExpression, oc: &OptimizationContext, request: usize) -> bool {
        match gexpr.cost_context(oc.id(), request) {
            Some(existing) => {
                self.memo.update_best(&self.memo.cost_context(existing));
                true
            }
            None => false,
        }
    }

    /// The lower bound of the partial plan when the best plan for the requirement,
    /// over this stage and every earlier one, already beats it.
    fn prune_bound(
        &self,
        gexpr: GroupExprId,
        oc: &OptimizationContext,
        costed_child: Option<(usize, CostCtxId)>,
    ) -> Option<Cost> {
        let best_oc = self.memo.lookup_best_context(oc.group(), oc.reqd(), self.stage + 1)?;
        let best = self.memo.cost_context(self.memo.opt_context(best_oc).best()?).cost();
        let bound = partial_plan::lower_bound(
            self.memo,
            self.cost_model,
            self.config.segments,
            gexpr,
            oc.reqd(),
            costed_child,
        );
        best.is_lower_than(&bound).then_some(bound)
    }

    fn record_pruned(
        &self,
        gexpr: GroupExprId,
        oc: &OptimizationContext,
        request: usize,
        bound: Cost,
        child_contexts: Vec<Option<OptCtxId>>,
    ) {
        trace!("Pruned expr {} request {} under {}: lower bound {}", gexpr, request, oc, bound);
        self.memo.insert_cost_context(CostContextParts {
            gexpr,
            opt_ctx: oc.id(),
            request,
            child_contexts,
            derived: None,
            stats: None,
            cost: bound,
            pruned: true,
        });
    }

    /// Can `op` be used for `reqd` at all? Enforcers are only tried for a
    /// requirement they can help with.
    fn check_required_props(op: &dyn PhysicalOperator, handle: &ExprHandle<'_>, reqd: &ReqdPlanProps) -> bool {
        if !op.provides_required_columns(handle, &reqd.columns) {
            return false;
        }
        match op.enforcer_kind() {
            Some(EnforcerKind::Sort) => !reqd.order.spec.is_empty(),
            Some(EnforcerKind::Motion(_)) => reqd.distribution.spec != DistributionSpec::Any,
            Some(EnforcerKind::Spool) => reqd.rewindability.spec != RewindabilitySpec::NotRewindable,
            Some(EnforcerKind::PartitionSelector) => reqd.partition.spec.is_required(),
            None => true,
        }
    }

    /// Optimize the children of `gexpr` for `request`. `None` abandons the request.
    fn optimize_children(
        &self,
        gexpr: &Arc<GroupExpression>,
        op: &dyn PhysicalOperator,
        oc: &OptimizationContext,
        request: usize,
        path: &mut Vec<OptCtxId>,
    ) -> Result<Option<Vec<Option<OptCtxId>>>> {
        let handle = ExprHandle::new(self.memo, gexpr.id()).with_required(Arc::clone(oc.reqd()));
        let arity = handle.arity();
        let mut child_contexts = vec![None; arity];
        let mut siblings: Vec<Arc<DerivedPlanProps>> = Vec::with_capacity(arity);
        let mut first = true;
        for index in op.child_optimization_order(arity) {
            if index >= arity || handle.is_scalar_child(index) {
                continue;
            }
            let Some(child_group) = handle.child_group(index) else {
                continue;
            };
            let child_reqd = Arc::new(ReqdPlanProps::compute_child(
                op,
                &handle,
                oc.reqd(),
                index,
                &siblings,
                request,
            ));
            if child_group == oc.group() && child_reqd == *oc.reqd() {
                trace!("Expr {} would wait on its own context {}", gexpr.id(), oc.id());
                return Ok(None);
            }
            let child_oc = self.optimize_group(child_group, &child_reqd, Some(gexpr), path)?;
            let Some(best) = self.memo.opt_context(child_oc).best() else {
                trace!("Expr {} request {}: child {} has no plan", gexpr.id(), request, index);
                return Ok(None);
            };
            child_contexts[index] = Some(child_oc);
            if let Some(derived) = self.memo.cost_context(best).derived() {
                siblings.push(Arc::clone(derived));
            }
            if first && self.config.enable_space_pruning {
                if let Some(bound) = self.prune_bound(gexpr.id(), oc, Some((index, best))) {
                    self.record_pruned(gexpr.id(), oc, request, bound, child_contexts);
                    return Ok(None);
                }
            }
            first = false;
        }
        Ok(Some(child_contexts))
    }

    /// Decide enforcement for the plan the children deliver. Returns whether the
    /// alternative itself should be costed.
    fn check_enforced_props(
        &self,
        gexpr: &GroupExpression,
        op: &dyn PhysicalOperator,
        oc: &OptimizationContext,
        children: &[Option<OptCtxId>],
    ) -> Result<bool> {
        let reqd = oc.reqd();
        let handle = ExprHandle::new(self.memo, gexpr.id())
            .with_child_contexts(children)
            .with_required(Arc::clone(reqd));
        let derived = DerivedPlanProps::derive(op, &handle);

        if !op.provides_required_ctes(&handle, &derived.cte_map, &reqd.cte) {
            return Ok(false);
        }
        if matches!(op.enforcer_kind(), Some(EnforcerKind::Motion(_)))
            && derived.partition.part_index_map.contains_unresolved()
        {
            return Ok(false);
        }
        if derived
            .partition
            .part_index_map
            .contains_redundant_selectors(&reqd.partition.spec.part_index_map)
        {
            return Ok(false);
        }

        let decision = EnforcingDecision::decide(op, &handle, reqd, &derived);
        if decision.any_prohibited() {
            return Ok(false);
        }
        let group = oc.group();
        for enforcer in decision.enforcers(self.enforcers, reqd, &derived) {
            let origin = Provenance {
                rule: ENFORCER_RULE.to_string(),
                source: gexpr.id(),
            };
            let outcome = self.memo.insert(enforcer, vec![group], Some(group), Some(origin))?;
            if outcome.inserted {
                trace!(
                    "Added enforcer {} to group {} for expr {}",
                    self.memo.gexpr(outcome.gexpr).op(),
                    group,
                    gexpr.id()
                );
            }
        }
        Ok(decision.allows_costing())
    }

    /// Core-level validity of a combination of child plans.
    fn valid_context(op: &dyn PhysicalOperator, handle: &ExprHandle<'_>) -> bool {
        if let Some(EnforcerKind::Motion(MotionKind::Gather | MotionKind::GatherMerge)) = op.enforcer_kind() {
            if handle
                .first_relational_child_plan()
                .is_some_and(|p| p.distribution.is_singleton())
            {
                return false;
            }
        }
        let plans: Vec<&DerivedPlanProps> = handle.child_plans().collect();
        for (i, a) in plans.iter().enumerate() {
            if plans[i + 1..]
                .iter()
                .any(|b| !a.distribution.is_compatible_with(&b.distribution))
            {
                return false;
            }
        }
        op.valid_context(handle)
    }

    /// Cost `gexpr` for `request` under `opt_ctx` with the given child contexts, and
    /// publish the result. `Ok(None)` when the combination is invalid, does not
    /// satisfy the requirement, or loses against an identical or better context.
    pub fn cost(
        &self,
        gexpr: GroupExprId,
        opt_ctx: OptCtxId,
        request: usize,
        children: &[Option<OptCtxId>],
    ) -> Result<Option<Arc<CostContext>>> {
        self.abort.check()?;
        let expr = self.memo.gexpr(gexpr);
        let Some(op) = expr.op().as_physical().cloned() else {
            return Ok(None);
        };
        if let Some(existing) = expr.cost_context(opt_ctx, request) {
            if self.memo.cost_context(existing).child_contexts() == children {
                return Ok(None);
            }
        }
        let oc = self.memo.opt_context(opt_ctx);
        let handle = ExprHandle::new(self.memo, gexpr)
            .with_child_contexts(children)
            .with_required(Arc::clone(oc.reqd()));
        if !Self::valid_context(op.as_ref(), &handle) {
            trace!("Expr {}: invalid child combination for {}", gexpr, oc);
            return Ok(None);
        }
        let derived = DerivedPlanProps::derive(op.as_ref(), &handle);
        if !oc.reqd().is_satisfied_by(handle.logical(), &derived) {
            trace!("Expr {} delivers {} which does not satisfy {}", gexpr, derived, oc.reqd());
            return Ok(None);
        }

        let stats = self.memo.context_stats(opt_ctx, self.abort)?;
        let segments = self.config.segments;
        let mut inputs = Vec::with_capacity(children.len());
        for child in children.iter().flatten() {
            let Some(input) = best_plan_input(self.memo, segments, *child) else {
                return Ok(None);
            };
            inputs.push(input);
        }
        let rows = if derived.distribution.is_execution_partitioned() {
            stats.rows_per_host(segments)
        } else {
            stats.rows()
        };
        let costing = CostingInputs {
            rows,
            width: stats.width(&oc.reqd().columns),
            rebinds: stats.rebinds(),
            children: inputs,
            segments,
        };
        let cost = self.cost_model.cost(&handle, &costing);
        let cc = self.memo.insert_cost_context(CostContextParts {
            gexpr,
            opt_ctx,
            request,
            child_contexts: children.to_vec(),
            derived: Some(Arc::new(derived)),
            stats: Some(stats),
            cost,
            pruned: false,
        });
        if let Some(cc) = &cc {
            trace!("Costed {}", cc);
        }
        Ok(cc)
    }
}
