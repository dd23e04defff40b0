//! Group expressions: one operator over an ordered list of child groups.

use super::{GroupExprId, GroupId, Memo, OptCtxId, CostCtxId};
use crate::cost::Cost;
use crate::operator::{OptimizationLevel, Operator};
use crate::properties::ReqdPlanProps;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Which rule produced an alternative, and from which source alternative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    pub rule: String,
    pub source: GroupExprId,
}

/// Cache key of a partial-plan lower bound.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartialPlanKey {
    pub reqd: Arc<ReqdPlanProps>,
    /// Index and cost context of the child already costed, if any.
    pub costed_child: Option<(usize, CostCtxId)>,
}

#[derive(Debug, Default)]
struct ExprState {
    explored: bool,
    implemented: bool,
    applied_rules: HashSet<u64>,
}

#[derive(Debug)]
pub struct GroupExpression {
    id: GroupExprId,
    op: Operator,
    children: Vec<GroupId>,
    /// Owning group and position in it; both are rewritten when groups merge.
    group: AtomicU32,
    local_index: AtomicU32,
    origin: Option<Provenance>,
    level: OptimizationLevel,
    hash: u64,
    state: Mutex<ExprState>,
    cost_contexts: DashMap<(OptCtxId, usize), CostCtxId>,
    partial_plans: DashMap<PartialPlanKey, Cost>,
}

impl GroupExpression {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: GroupExprId,
        op: Operator,
        children: Vec<GroupId>,
        group: GroupId,
        local_index: usize,
        origin: Option<Provenance>,
        level: OptimizationLevel,
        hash: u64,
    ) -> Self {
        Self {
            id,
            op,
            children,
            group: AtomicU32::new(group.0),
            local_index: AtomicU32::new(local_index as u32),
            origin,
            level,
            hash,
            state: Mutex::new(ExprState::default()),
            cost_contexts: DashMap::new(),
            partial_plans: DashMap::new(),
        }
    }

    pub fn id(&self) -> GroupExprId {
        self.id
    }

    pub fn op(&self) -> &Operator {
        &self.op
    }

    /// Child groups as recorded at insertion. Resolve through [`Memo::resolve`] to
    /// reach the current masters.
    pub fn children(&self) -> &[GroupId] {
        &self.children
    }

    pub fn arity(&self) -> usize {
        self.children.len()
    }

    pub fn group(&self) -> GroupId {
        GroupId(self.group.load(Ordering::Acquire))
    }

    pub fn local_index(&self) -> usize {
        self.local_index.load(Ordering::Acquire) as usize
    }

    pub(crate) fn set_owner(&self, group: GroupId, local_index: usize) {
        self.group.store(group.0, Ordering::Release);
        self.local_index.store(local_index as u32, Ordering::Release);
    }

    pub fn origin(&self) -> Option<&Provenance> {
        self.origin.as_ref()
    }

    pub fn optimization_level(&self) -> OptimizationLevel {
        self.level
    }

    pub fn expr_hash(&self) -> u64 {
        self.hash
    }

    pub fn is_explored(&self) -> bool {
        self.state.lock().explored
    }

    pub fn set_explored(&self) {
        self.state.lock().explored = true;
    }

    pub fn is_implemented(&self) -> bool {
        self.state.lock().implemented
    }

    pub fn set_implemented(&self) {
        self.state.lock().implemented = true;
    }

    pub fn rule_applied(&self, rule_hash: u64) -> bool {
        self.state.lock().applied_rules.contains(&rule_hash)
    }

    /// Returns `false` if the rule had already been recorded.
    pub fn mark_rule_applied(&self, rule_hash: u64) -> bool {
        self.state.lock().applied_rules.insert(rule_hash)
    }

    pub fn cost_context(&self, opt_ctx: OptCtxId, request: usize) -> Option<CostCtxId> {
        self.cost_contexts.get(&(opt_ctx, request)).map(|e| *e.value())
    }

    /// Every cost context recorded for `opt_ctx`, in request order.
    pub fn cost_contexts_for(&self, opt_ctx: OptCtxId) -> Vec<(usize, CostCtxId)> {
        let mut out: Vec<_> = self
            .cost_contexts
            .iter()
            .filter(|e| e.key().0 == opt_ctx)
            .map(|e| (e.key().1, *e.value()))
            .collect();
        out.sort_unstable();
        out
    }

    pub(crate) fn cost_context_table(&self) -> &DashMap<(OptCtxId, usize), CostCtxId> {
        &self.cost_contexts
    }

    pub(crate) fn partial_plan_cache(&self) -> &DashMap<PartialPlanKey, Cost> {
        &self.partial_plans
    }

    /// Dedup match: same operator and the same child groups, pairwise for
    /// order-sensitive operators and as multisets otherwise. Children on both sides
    /// are resolved to their masters first.
    pub fn matches(&self, op: &Operator, children: &[GroupId], memo: &Memo) -> bool {
        if self.children.len() != children.len() || !self.op.matches(op) {
            return false;
        }
        let mut mine: Vec<GroupId> = self.children.iter().map(|c| memo.resolve(*c)).collect();
        let mut theirs: Vec<GroupId> = children.iter().map(|c| memo.resolve(*c)).collect();
        if !self.op.is_input_order_sensitive() {
            mine.sort_unstable();
            theirs.sort_unstable();
        }
        mine == theirs
    }

    pub fn is_logical(&self) -> bool {
        self.op.is_logical()
    }

    pub fn is_physical(&self) -> bool {
        self.op.is_physical()
    }
}
