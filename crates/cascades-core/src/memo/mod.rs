//! # Memo
//!
//! The memo stores every explored alternative compactly. Alternatives that compute
//! the same result live in the same [`Group`]; each alternative is a
//! [`GroupExpression`] whose children are groups, never other expressions.
//!
//! ## Arenas and Ids
//!
//! Groups, group expressions, optimization contexts and cost contexts live in flat
//! append-only arenas and refer to each other by integer id. Nothing is ever removed
//! from an arena, so an id stays valid for the lifetime of the memo. Entries are
//! wrapped in `Arc` only so that worker threads can hold on to them without keeping
//! an arena lock.
//!
//! ## Deduplication
//!
//! [`Memo::insert`] never creates an alternative twice. Candidates are bucketed by a
//! hash of the operator and its (master) child groups; inside a bucket, the
//! [`GroupExpression::matches`] test decides. When the new alternative was meant for a
//! different group than the one already owning its twin, the two groups compute the
//! same result and are recorded as duplicates.
//!
//! ## Duplicate Groups
//!
//! Duplicate groups form a union-find forest over an atomic `duplicate_of` link.
//! [`Memo::add_duplicate`] links the current masters of two groups with a
//! compare-and-swap, lower id to higher id, retrying until both resolve to the same
//! master; [`Memo::resolve`] follows the chain with path compression. Moving
//! alternatives between groups ([`Memo::merge_into`], [`Memo::merge_duplicates`])
//! needs `&mut Memo` and therefore only happens while no search task is running.
//!
//! ## Lock Order
//!
//! A dashmap shard lock may be held while taking an arena lock, and an arena lock is
//! never held while taking a group mutex.

mod derive;
pub mod group;
pub mod group_expr;

pub use group::{ContextKey, Group, GroupPhase};
pub use group_expr::{GroupExpression, PartialPlanKey, Provenance};

use self::group::NO_DUPLICATE;
use crate::context::{CostContext, CostContextParts, OptimizationContext};
use crate::error::{OptimizerError, Result};
use crate::operator::{OptimizationLevel, Operator};
use crate::properties::{CteKind, GroupProps, ReqdPlanProps};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, trace};

macro_rules! arena_id {
    ($(#[$doc:meta])* $name:ident, $prefix:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub u32);

        impl $name {
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

arena_id!(
    /// Identifier of a group in the memo.
    GroupId,
    "g"
);
arena_id!(
    /// Identifier of a group expression in the memo.
    GroupExprId,
    "e"
);
arena_id!(OptCtxId, "oc");
arena_id!(CostCtxId, "cc");

/// Result of [`Memo::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertOutcome {
    pub gexpr: GroupExprId,
    /// Master of the group owning `gexpr`.
    pub group: GroupId,
    /// `false` when an identical alternative already existed.
    pub inserted: bool,
}

#[derive(Debug, Default)]
pub struct Memo {
    groups: RwLock<Vec<Arc<Group>>>,
    exprs: RwLock<Vec<Arc<GroupExpression>>>,
    opt_contexts: RwLock<Vec<Arc<OptimizationContext>>>,
    cost_contexts: RwLock<Vec<Arc<CostContext>>>,
    expr_index: DashMap<u64, Vec<GroupExprId>>,
    root: Mutex<Option<GroupId>>,
}

fn expr_hash(op: &Operator, children: &[GroupId]) -> u64 {
    let mut ids = children.to_vec();
    if !op.is_input_order_sensitive() {
        ids.sort_unstable();
    }
    let mut hasher = DefaultHasher::new();
    op.op_hash().hash(&mut hasher);
    ids.hash(&mut hasher);
    hasher.finish()
}

impl Memo {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- arena access ----

    /// Panics if `id` was not handed out by this memo.
    pub fn group(&self, id: GroupId) -> Arc<Group> {
        Arc::clone(&self.groups.read()[id.index()])
    }

    pub fn gexpr(&self, id: GroupExprId) -> Arc<GroupExpression> {
        Arc::clone(&self.exprs.read()[id.index()])
    }

    pub fn opt_context(&self, id: OptCtxId) -> Arc<OptimizationContext> {
        Arc::clone(&self.opt_contexts.read()[id.index()])
    }

    pub fn cost_context(&self, id: CostCtxId) -> Arc<CostContext> {
        Arc::clone(&self.cost_contexts.read()[id.index()])
    }

    pub fn num_groups(&self) -> usize {
        self.groups.read().len()
    }

    pub fn num_exprs(&self) -> usize {
        self.exprs.read().len()
    }

    pub fn num_cost_contexts(&self) -> usize {
        self.cost_contexts.read().len()
    }

    pub fn group_ids(&self) -> impl Iterator<Item = GroupId> {
        (0..self.num_groups() as u32).map(GroupId)
    }

    pub fn root(&self) -> Option<GroupId> {
        (*self.root.lock()).map(|g| self.resolve(g))
    }

    pub fn set_root(&self, group: GroupId) {
        *self.root.lock() = Some(group);
    }

    // ---- insertion ----

    /// Insert `op` over `children` into `target`, or into a new group when `target`
    /// is `None`. Physical operators always need a target.
    pub fn insert(
        &self,
        op: Operator,
        children: Vec<GroupId>,
        target: Option<GroupId>,
        origin: Option<Provenance>,
    ) -> Result<InsertOutcome> {
        let num_groups = self.num_groups();
        if let Some(bad) = children.iter().chain(target.iter()).find(|g| g.index() >= num_groups) {
            return Err(OptimizerError::invalid_insert(format!("group {} does not exist", bad)));
        }
        if let Some(arity) = op.arity() {
            if arity != children.len() {
                return Err(OptimizerError::invalid_insert(format!(
                    "{} expects {} children, got {}",
                    op,
                    arity,
                    children.len()
                )));
            }
        }
        if op.is_physical() && target.is_none() {
            return Err(OptimizerError::invalid_insert(format!(
                "physical alternative {} inserted without a target group",
                op
            )));
        }

        let children: Vec<GroupId> = children.iter().map(|c| self.resolve(*c)).collect();
        let target = target.map(|t| self.resolve(t));
        let hash = expr_hash(&op, &children);

        let mut bucket = self.expr_index.entry(hash).or_default();
        for id in bucket.iter() {
            let existing = self.gexpr(*id);
            if existing.matches(&op, &children, self) {
                let group = self.resolve(existing.group());
                if let Some(target) = target {
                    if target != group {
                        self.add_duplicate(target, group);
                    }
                }
                trace!("Found existing expr {} in group {} for {}", id, group, op);
                return Ok(InsertOutcome {
                    gexpr: *id,
                    group: self.resolve(group),
                    inserted: false,
                });
            }
        }

        let group_id = match target {
            Some(t) => t,
            None => self.create_group(&op, &children)?,
        };
        let level = self.initial_level(&op, &children);
        let is_logical = op.is_logical();
        let cte = op.cte_role().map(|(_, kind)| kind);
        let gexpr = {
            let mut exprs = self.exprs.write();
            let id = GroupExprId(exprs.len() as u32);
            exprs.push(Arc::new(GroupExpression::new(
                id, op, children, group_id, 0, origin, level, hash,
            )));
            Arc::clone(&exprs[id.index()])
        };
        bucket.push(gexpr.id());
        drop(bucket);

        let index = self.group(group_id).insert(gexpr.id(), is_logical, cte, level);
        gexpr.set_owner(group_id, index);
        trace!("Created new expr {} in group {}: {}", gexpr.id(), group_id, gexpr.op());
        Ok(InsertOutcome {
            gexpr: gexpr.id(),
            group: group_id,
            inserted: true,
        })
    }

    fn create_group(&self, op: &Operator, children: &[GroupId]) -> Result<GroupId> {
        let child_groups: Vec<Arc<Group>> = children.iter().map(|c| self.group(*c)).collect();
        let child_props: Vec<&GroupProps> = child_groups.iter().map(|g| g.props()).collect();
        let props = match op {
            Operator::Logical(l) => GroupProps::Relational(l.derive_logical_props(&child_props)),
            Operator::Scalar(s) => GroupProps::Scalar(s.derive_scalar_props(&child_props)),
            Operator::Physical(_) => {
                return Err(OptimizerError::invalid_insert(format!("cannot create a group for {}", op)))
            }
        };
        let mut groups = self.groups.write();
        let id = GroupId(groups.len() as u32);
        groups.push(Arc::new(Group::new(id, props)));
        debug!("Created group {} for {}", id, op);
        Ok(id)
    }

    fn initial_level(&self, op: &Operator, children: &[GroupId]) -> OptimizationLevel {
        match op.as_physical() {
            Some(p)
                if p.is_sequence()
                    && children.first().is_some_and(|c| self.group(*c).has_cte_producer()) =>
            {
                OptimizationLevel::High
            }
            Some(p) => p.optimization_level(),
            None => OptimizationLevel::Low,
        }
    }

    // ---- optimization contexts ----

    /// Insert-if-absent on the group's context table. The flag is `true` when this
    /// call created the context.
    pub fn lookup_or_create_context(
        &self,
        group: GroupId,
        reqd: &Arc<ReqdPlanProps>,
        stage: usize,
    ) -> (OptCtxId, bool) {
        let group = self.resolve(group);
        let g = self.group(group);
        let key = ContextKey {
            reqd: Arc::clone(reqd),
            stage,
        };
        let result = match g.context_table().entry(key) {
            Entry::Occupied(e) => (*e.get(), false),
            Entry::Vacant(e) => {
                let mut arena = self.opt_contexts.write();
                let id = OptCtxId(arena.len() as u32);
                arena.push(Arc::new(OptimizationContext::new(id, group, Arc::clone(reqd), stage)));
                drop(arena);
                e.insert(id);
                trace!("Created optimization context {} for group {}", id, group);
                (id, true)
            }
        };
        result
    }

    pub fn lookup_context(&self, group: GroupId, reqd: &Arc<ReqdPlanProps>, stage: usize) -> Option<OptCtxId> {
        self.group(self.resolve(group)).lookup_context(reqd, stage)
    }

    /// Best context for `reqd` over stages `0..stages`.
    pub fn lookup_best_context(&self, group: GroupId, reqd: &Arc<ReqdPlanProps>, stages: usize) -> Option<OptCtxId> {
        let mut best: Option<(OptCtxId, Arc<CostContext>)> = None;
        for stage in 0..stages {
            let Some(oc) = self.lookup_context(group, reqd, stage) else {
                continue;
            };
            let Some(cc) = self.opt_context(oc).best() else {
                continue;
            };
            let cc = self.cost_context(cc);
            let replace = match &best {
                None => true,
                Some((_, current)) => cc.better_than(current, self),
            };
            if replace {
                best = Some((oc, cc));
            }
        }
        best.map(|(oc, _)| oc)
    }

    /// Make `cc` the best of its context if there is none yet or `cc` is better.
    pub fn update_best(&self, cc: &Arc<CostContext>) -> bool {
        if cc.is_pruned() || !cc.is_costed() {
            return false;
        }
        let oc = self.opt_context(cc.opt_ctx());
        let multi_stage = self
            .gexpr(cc.gexpr())
            .op()
            .as_physical()
            .is_some_and(|op| op.is_multi_stage_agg());
        loop {
            let current = oc.best();
            if let Some(current) = current {
                if current == cc.id() || !cc.better_than(&self.cost_context(current), self) {
                    return false;
                }
            }
            if oc.replace_best(current, cc.id(), multi_stage) {
                trace!("New best for {}: {}", oc, cc);
                return true;
            }
        }
    }

    // ---- cost contexts ----

    /// Publish a cost context to the arena without registering it anywhere.
    pub(crate) fn publish_cost_context(&self, parts: CostContextParts) -> Arc<CostContext> {
        let mut arena = self.cost_contexts.write();
        let id = CostCtxId(arena.len() as u32);
        let cc = Arc::new(CostContext::new(id, parts));
        arena.push(Arc::clone(&cc));
        cc
    }

    /// Register a cost context on its alternative with insert-best semantics. Returns
    /// `None` when an identical or better context already holds the slot.
    pub fn insert_cost_context(&self, parts: CostContextParts) -> Option<Arc<CostContext>> {
        let gexpr = self.gexpr(parts.gexpr);
        let key = (parts.opt_ctx, parts.request);
        let result = match gexpr.cost_context_table().entry(key) {
            Entry::Vacant(e) => {
                let cc = self.publish_cost_context(parts);
                e.insert(cc.id());
                Some(cc)
            }
            Entry::Occupied(mut e) => {
                let old = self.cost_context(*e.get());
                if !old.is_pruned() {
                    if old.child_contexts() == parts.child_contexts.as_slice() || parts.pruned {
                        return None;
                    }
                    let candidate = CostContext::new(CostCtxId(u32::MAX), parts.clone());
                    if !candidate.better_than(&old, self) {
                        return None;
                    }
                }
                let cc = self.publish_cost_context(parts);
                e.insert(cc.id());
                let multi_stage = gexpr.op().as_physical().is_some_and(|op| op.is_multi_stage_agg());
                self.opt_context(cc.opt_ctx()).replace_best(Some(old.id()), cc.id(), multi_stage);
                Some(cc)
            }
        };
        result
    }

    // ---- duplicate groups ----

    /// Canonical master of `group`, compressing the path behind it.
    pub fn resolve(&self, group: GroupId) -> GroupId {
        let mut root = group;
        while let Some(next) = self.group(root).duplicate_of() {
            root = next;
        }
        let mut current = group;
        while current != root {
            let g = self.group(current);
            let next = g.duplicate_link().load(Ordering::Acquire);
            if next == NO_DUPLICATE {
                break;
            }
            let _ = g
                .duplicate_link()
                .compare_exchange(next, root.0, Ordering::AcqRel, Ordering::Acquire);
            current = GroupId(next);
        }
        root
    }

    /// Record that `a` and `b` compute the same result.
    pub fn add_duplicate(&self, a: GroupId, b: GroupId) {
        loop {
            let (ra, rb) = (self.resolve(a), self.resolve(b));
            if ra == rb {
                return;
            }
            let (lower, higher) = if ra < rb { (ra, rb) } else { (rb, ra) };
            if self
                .group(lower)
                .duplicate_link()
                .compare_exchange(NO_DUPLICATE, higher.0, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                debug!("Group {} is a duplicate of group {}", lower, higher);
                return;
            }
        }
    }

    /// Merge `source` into `target`: link the master of `source` under the master of
    /// `target`, then move every live alternative along the chain into the master.
    pub fn merge_into(&mut self, source: GroupId, target: GroupId) {
        let (rs, rt) = (self.resolve(source), self.resolve(target));
        if rs != rt {
            self.group(rs).duplicate_link().store(rt.0, Ordering::Release);
            debug!("Merging group {} into group {}", rs, rt);
        }
        let master = self.group(rt);
        let mut current = source;
        while current != rt {
            let from = self.group(current);
            self.move_alternatives(&from, &master);
            match from.duplicate_of() {
                Some(next) => current = next,
                None => break,
            }
        }
    }

    fn move_alternatives(&self, from: &Group, to: &Group) {
        let (moved, dups, stats, producer, consumer) = {
            let mut state = from.state();
            (
                std::mem::take(&mut state.alternatives),
                std::mem::take(&mut state.duplicates),
                state.stats.take(),
                state.has_cte_producer,
                state.has_cte_consumer,
            )
        };
        if moved.is_empty() && dups.is_empty() {
            return;
        }
        let exprs: Vec<_> = moved.iter().map(|id| self.gexpr(*id)).collect();
        let mut state = to.state();
        for gexpr in exprs {
            state.alternatives.push(gexpr.id());
            gexpr.set_owner(to.id(), state.alternatives.len() - 1);
            if gexpr.is_logical() {
                state.has_new_logical = true;
            }
        }
        for id in dups {
            let gexpr = self.gexpr(id);
            gexpr.set_owner(to.id(), gexpr.local_index());
            state.duplicates.push(id);
        }
        if state.stats.is_none() {
            state.stats = stats;
        }
        state.has_cte_producer |= producer;
        state.has_cte_consumer |= consumer;
        trace!("Moved {} alternatives from group {} to group {}", moved.len(), from.id(), to.id());
    }

    /// Merge every duplicate group into its master, then move alternatives that have
    /// become identical inside a master onto its duplicate list.
    pub fn merge_duplicates(&mut self) {
        let ids: Vec<GroupId> = self.group_ids().collect();
        for id in &ids {
            if self.group(*id).is_duplicate() && self.group(*id).num_alternatives() > 0 {
                let master = self.resolve(*id);
                self.merge_into(*id, master);
            }
        }
        for id in ids {
            let group = self.group(id);
            if group.is_duplicate() {
                continue;
            }
            let alternatives = group.alternatives();
            let mut kept: Vec<Arc<GroupExpression>> = Vec::with_capacity(alternatives.len());
            let mut dropped = Vec::new();
            for alt in alternatives {
                let gexpr = self.gexpr(alt);
                if kept.iter().any(|k| k.matches(gexpr.op(), gexpr.children(), self)) {
                    dropped.push(alt);
                } else {
                    kept.push(gexpr);
                }
            }
            if dropped.is_empty() {
                continue;
            }
            let mut state = group.state();
            state.alternatives = kept.iter().map(|g| g.id()).collect();
            for (index, gexpr) in kept.iter().enumerate() {
                gexpr.set_owner(id, index);
            }
            debug!("Group {}: {} alternatives became duplicates", id, dropped.len());
            state.duplicates.extend(dropped);
        }
    }

    /// Discard statistics of groups reachable from the root that gained logical
    /// alternatives since their statistics were derived, or whose children did.
    pub fn reset_stats(&self) {
        if let Some(root) = self.root() {
            let mut visited = HashMap::new();
            self.reset_group_stats(root, &mut visited);
        }
    }

    fn reset_group_stats(&self, group: GroupId, visited: &mut HashMap<GroupId, bool>) -> bool {
        let group = self.resolve(group);
        if let Some(done) = visited.get(&group) {
            return *done;
        }
        visited.insert(group, false);
        let g = self.group(group);
        let mut child_reset = false;
        for alt in g.alternatives() {
            let gexpr = self.gexpr(alt);
            if !gexpr.is_logical() {
                continue;
            }
            for child in gexpr.children() {
                child_reset |= self.reset_group_stats(*child, visited);
            }
        }
        let reset = {
            let mut state = g.state();
            let reset = state.has_new_logical || child_reset;
            if reset {
                state.stats = None;
                state.has_new_logical = false;
            }
            reset
        };
        if reset {
            g.context_stats_cache().clear();
            g.lower_bound_cache().clear();
            for alt in g.alternatives() {
                self.gexpr(alt).partial_plan_cache().clear();
            }
            trace!("Reset statistics of group {}", group);
        }
        visited.insert(group, reset);
        reset
    }

    /// Does any alternative in the group produce or consume a CTE?
    pub fn group_cte_kind(&self, group: GroupId) -> Option<CteKind> {
        let g = self.group(self.resolve(group));
        if g.has_cte_producer() {
            Some(CteKind::Producer)
        } else if g.has_cte_consumer() {
            Some(CteKind::Consumer)
        } else {
            None
        }
    }
}
