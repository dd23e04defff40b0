//! Groups: equivalence classes of alternatives.

use super::{GroupExprId, GroupId, OptCtxId};
use crate::column::ColumnSet;
use crate::cost::Cost;
use crate::operator::OptimizationLevel;
use crate::properties::{CteKind, GroupProps, LogicalProps, MaxCard, ReqdPlanProps, ScalarProps};
use crate::stats::Statistics;
use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;

pub(crate) const NO_DUPLICATE: u32 = u32::MAX;

pub(crate) static EMPTY_LOGICAL: LogicalProps = LogicalProps {
    output_columns: ColumnSet::EMPTY,
    outer_references: ColumnSet::EMPTY,
    max_card: MaxCard(None),
    join_depth: 0,
    partition_consumers: BTreeSet::new(),
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GroupPhase {
    Unexplored,
    Exploring,
    Explored,
    Implementing,
    Implemented,
}

/// Key of a group's optimization-context table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContextKey {
    pub reqd: Arc<ReqdPlanProps>,
    pub stage: usize,
}

#[derive(Debug)]
pub(crate) struct GroupState {
    pub(crate) alternatives: Vec<GroupExprId>,
    pub(crate) duplicates: Vec<GroupExprId>,
    pub(crate) stats: Option<Arc<Statistics>>,
    pub(crate) phase: GroupPhase,
    pub(crate) has_new_logical: bool,
    pub(crate) has_cte_producer: bool,
    pub(crate) has_cte_consumer: bool,
}

#[derive(Debug)]
pub struct Group {
    id: GroupId,
    props: GroupProps,
    state: Mutex<GroupState>,
    duplicate_of: AtomicU32,
    contexts: DashMap<ContextKey, OptCtxId>,
    lower_bounds: DashMap<ReqdPlanProps, Cost>,
    context_stats: DashMap<OptCtxId, Arc<Statistics>>,
    max_level: AtomicU8,
}

impl Group {
    pub(crate) fn new(id: GroupId, props: GroupProps) -> Self {
        Self {
            id,
            props,
            state: Mutex::new(GroupState {
                alternatives: Vec::new(),
                duplicates: Vec::new(),
                stats: None,
                phase: GroupPhase::Unexplored,
                has_new_logical: false,
                has_cte_producer: false,
                has_cte_consumer: false,
            }),
            duplicate_of: AtomicU32::new(NO_DUPLICATE),
            contexts: DashMap::new(),
            lower_bounds: DashMap::new(),
            context_stats: DashMap::new(),
            max_level: AtomicU8::new(OptimizationLevel::Low as u8),
        }
    }

    pub fn id(&self) -> GroupId {
        self.id
    }

    pub fn props(&self) -> &GroupProps {
        &self.props
    }

    pub fn is_scalar(&self) -> bool {
        self.props.is_scalar()
    }

    /// Logical properties; empty for scalar groups.
    pub fn logical(&self) -> &LogicalProps {
        self.props.relational().unwrap_or(&EMPTY_LOGICAL)
    }

    pub fn scalar(&self) -> Option<&ScalarProps> {
        self.props.scalar()
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, GroupState> {
        self.state.lock()
    }

    /// Append an alternative, updating the CTE flags and the level watermark.
    /// Returns the alternative's position in the group.
    pub(crate) fn insert(
        &self,
        gexpr: GroupExprId,
        is_logical: bool,
        cte: Option<CteKind>,
        level: OptimizationLevel,
    ) -> usize {
        let mut state = self.state.lock();
        state.alternatives.push(gexpr);
        if is_logical {
            state.has_new_logical = true;
        }
        match cte {
            Some(CteKind::Producer) => state.has_cte_producer = true,
            Some(CteKind::Consumer) => state.has_cte_consumer = true,
            None => {}
        }
        self.max_level.fetch_max(level as u8, Ordering::AcqRel);
        state.alternatives.len() - 1
    }

    /// Snapshot of the live alternatives.
    pub fn alternatives(&self) -> Vec<GroupExprId> {
        self.state.lock().alternatives.clone()
    }

    pub fn num_alternatives(&self) -> usize {
        self.state.lock().alternatives.len()
    }

    /// Alternatives found identical to a live one; kept for bookkeeping only.
    pub fn duplicates(&self) -> Vec<GroupExprId> {
        self.state.lock().duplicates.clone()
    }

    pub fn stats(&self) -> Option<Arc<Statistics>> {
        self.state.lock().stats.clone()
    }

    pub fn phase(&self) -> GroupPhase {
        self.state.lock().phase
    }

    pub fn set_phase(&self, phase: GroupPhase) {
        self.state.lock().phase = phase;
    }

    pub fn has_cte_producer(&self) -> bool {
        self.state.lock().has_cte_producer
    }

    pub fn has_cte_consumer(&self) -> bool {
        self.state.lock().has_cte_consumer
    }

    pub fn has_new_logical(&self) -> bool {
        self.state.lock().has_new_logical
    }

    pub fn max_optimization_level(&self) -> OptimizationLevel {
        if self.max_level.load(Ordering::Acquire) == OptimizationLevel::High as u8 {
            OptimizationLevel::High
        } else {
            OptimizationLevel::Low
        }
    }

    /// The group this one was found to duplicate, one step along the chain.
    pub fn duplicate_of(&self) -> Option<GroupId> {
        match self.duplicate_of.load(Ordering::Acquire) {
            NO_DUPLICATE => None,
            id => Some(GroupId(id)),
        }
    }

    pub(crate) fn duplicate_link(&self) -> &AtomicU32 {
        &self.duplicate_of
    }

    pub fn is_duplicate(&self) -> bool {
        self.duplicate_of().is_some()
    }

    pub fn lookup_context(&self, reqd: &Arc<ReqdPlanProps>, stage: usize) -> Option<OptCtxId> {
        let key = ContextKey {
            reqd: Arc::clone(reqd),
            stage,
        };
        self.contexts.get(&key).map(|e| *e.value())
    }

    pub(crate) fn context_table(&self) -> &DashMap<ContextKey, OptCtxId> {
        &self.contexts
    }

    /// All optimization contexts of this group.
    pub fn contexts(&self) -> Vec<OptCtxId> {
        let mut ids: Vec<_> = self.contexts.iter().map(|e| *e.value()).collect();
        ids.sort_unstable();
        ids
    }

    pub(crate) fn lower_bound_cache(&self) -> &DashMap<ReqdPlanProps, Cost> {
        &self.lower_bounds
    }

    pub(crate) fn context_stats_cache(&self) -> &DashMap<OptCtxId, Arc<Statistics>> {
        &self.context_stats
    }
}
