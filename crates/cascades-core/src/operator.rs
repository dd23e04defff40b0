//! # Operator Capability Interface
//!
//! The core never knows which concrete operators exist. It sees an [`Operator`], a
//! sum type over three trait-object payloads, and calls only the behaviour declared
//! here: identity (kind, equality, hash), logical property and statistics
//! derivation for logical operators, scalar property derivation for scalar
//! operators, and property request/derive/enforce callbacks for physical operators.
//!
//! ## Physical Requests
//!
//! A physical operator may try several ways of asking its children for properties
//! (e.g. a hash join may ask for co-located hashing or for a broadcast inner side).
//! Each property kind declares how many variants it has; a single *request index*
//! enumerates their cross product and [`PhysicalOperator::lookup_request`] splits it
//! back into per-property indices.
//!
//! ## Defaults
//!
//! Most callbacks have defaults that suit a pass-through operator: no order or
//! distribution requirement on children, child 0's derived properties passed up,
//! partition and CTE maps combined across children. Enforcers and joins override them.

use crate::column::ColumnSet;
use crate::error::Result;
use crate::handle::ExprHandle;
use crate::properties::partition::PartitionPropagationSpec;
use crate::properties::required::{push_through_partition, RequestIndices};
use crate::properties::{
    CteId, CteKind, CteMap, CteRequirement, DerivedPlanProps, DistributionSpec, Enforced, EnforcingType,
    GroupProps, LogicalProps, MatchDiscipline, OrderSpec, ReqdPlanProps, RewindabilitySpec, ScalarProps,
};
use crate::stats::Statistics;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Identity shared by every operator kind.
pub trait OperatorCore: fmt::Debug + Send + Sync + 'static {
    fn kind_id(&self) -> &'static str;

    /// Display name; the kind id unless overridden.
    fn name(&self) -> &'static str {
        self.kind_id()
    }

    /// Fixed number of children, or `None` when variadic.
    fn arity(&self) -> Option<usize> {
        None
    }

    /// Value equality against another operator of any kind.
    fn equals(&self, other: &dyn Any) -> bool;

    fn op_hash(&self) -> u64;

    /// Whether swapping children changes the result. Order-insensitive operators are
    /// deduplicated on the multiset of their children.
    fn is_input_order_sensitive(&self) -> bool {
        true
    }

    /// CTE produced or consumed by this operator.
    fn cte_role(&self) -> Option<(CteId, CteKind)> {
        None
    }

    fn as_any(&self) -> &dyn Any;
}

/// `equals` for operators that implement `PartialEq`.
pub fn equals_by_value<T: PartialEq + 'static>(this: &T, other: &dyn Any) -> bool {
    other.downcast_ref::<T>().is_some_and(|o| o == this)
}

/// `op_hash` for operators that implement `Hash`.
pub fn hash_by_value<T: Hash>(kind: &str, this: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    kind.hash(&mut hasher);
    this.hash(&mut hasher);
    hasher.finish()
}

/// How promising an alternative is as the source of a group's statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StatPromise {
    None,
    Low,
    Medium,
    High,
}

/// Inputs to logical statistics derivation.
pub struct StatsInput<'a> {
    /// Columns the statistics must cover.
    pub required: &'a ColumnSet,
    pub logical: &'a LogicalProps,
    /// Child statistics; `None` for scalar children.
    pub children: &'a [Option<Arc<Statistics>>],
    pub child_props: &'a [&'a GroupProps],
    /// Operator of each scalar child; `None` for relational children.
    pub scalars: &'a [Option<Operator>],
}

impl StatsInput<'_> {
    pub fn child_rows(&self, child: usize) -> f64 {
        self.children
            .get(child)
            .and_then(|s| s.as_ref())
            .map_or(0.0, |s| s.rows())
    }

    pub fn scalar_child(&self, child: usize) -> Option<&ScalarProps> {
        self.child_props.get(child).and_then(|p| p.scalar())
    }

    pub fn scalar_op(&self, child: usize) -> Option<&Operator> {
        self.scalars.get(child).and_then(|s| s.as_ref())
    }
}

pub trait LogicalOperator: OperatorCore {
    fn derive_logical_props(&self, children: &[&GroupProps]) -> LogicalProps;

    fn stat_promise(&self) -> StatPromise {
        StatPromise::High
    }

    fn is_join(&self) -> bool {
        false
    }

    /// Columns whose statistics are needed from `child` to derive `required`.
    fn required_stat_columns(&self, required: &ColumnSet, child: usize, children: &[&GroupProps]) -> ColumnSet {
        let Some(child_props) = children.get(child).and_then(|p| p.relational()) else {
            return ColumnSet::new();
        };
        let mut wanted = required.clone();
        for scalar in children.iter().filter_map(|p| p.scalar()) {
            wanted.extend(&scalar.used_columns);
        }
        wanted.intersection(&child_props.output_columns)
    }

    fn derive_statistics(&self, input: &StatsInput<'_>) -> Result<Statistics>;
}

pub trait ScalarOperator: OperatorCore {
    fn derive_scalar_props(&self, children: &[&GroupProps]) -> ScalarProps;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MotionKind {
    Gather,
    /// Gather preserving a sort order.
    GatherMerge,
    Redistribute,
    Broadcast,
    Random,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EnforcerKind {
    Sort,
    Motion(MotionKind),
    Spool,
    PartitionSelector,
}

/// Alternatives with a higher level are optimized first within their group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum OptimizationLevel {
    #[default]
    Low,
    High,
}

impl OptimizationLevel {
    /// The next lower level, or `None` after the lowest.
    pub fn damp(self) -> Option<OptimizationLevel> {
        match self {
            OptimizationLevel::High => Some(OptimizationLevel::Low),
            OptimizationLevel::Low => None,
        }
    }
}

pub trait PhysicalOperator: OperatorCore {
    // ---- request enumeration ----

    fn order_requests(&self) -> usize {
        1
    }

    fn distribution_requests(&self) -> usize {
        1
    }

    fn rewindability_requests(&self) -> usize {
        1
    }

    fn partition_requests(&self) -> usize {
        1
    }

    fn num_requests(&self) -> usize {
        self.order_requests().max(1)
            * self.distribution_requests().max(1)
            * self.rewindability_requests().max(1)
            * self.partition_requests().max(1)
    }

    fn lookup_request(&self, request: usize) -> RequestIndices {
        RequestIndices::decompose(
            request,
            [
                self.order_requests(),
                self.distribution_requests(),
                self.rewindability_requests(),
                self.partition_requests(),
            ],
        )
    }

    /// Order in which children are optimized. The first one is the child whose
    /// exact cost feeds early pruning.
    fn child_optimization_order(&self, arity: usize) -> Vec<usize> {
        (0..arity).collect()
    }

    // ---- child requirements ----

    fn required_columns(&self, handle: &ExprHandle<'_>, required: &ColumnSet, child: usize) -> ColumnSet {
        handle.default_child_columns(required, child)
    }

    fn required_order(
        &self,
        _handle: &ExprHandle<'_>,
        _required: &OrderSpec,
        _child: usize,
        _siblings: &[Arc<DerivedPlanProps>],
        _request: usize,
    ) -> OrderSpec {
        OrderSpec::any()
    }

    fn order_matching(&self, _child: usize, _request: usize) -> MatchDiscipline {
        MatchDiscipline::Satisfy
    }

    fn required_distribution(
        &self,
        _handle: &ExprHandle<'_>,
        _required: &DistributionSpec,
        _child: usize,
        _siblings: &[Arc<DerivedPlanProps>],
        _request: usize,
    ) -> DistributionSpec {
        DistributionSpec::Any
    }

    fn distribution_matching(&self, _child: usize, _request: usize) -> MatchDiscipline {
        MatchDiscipline::Satisfy
    }

    fn required_rewindability(
        &self,
        _handle: &ExprHandle<'_>,
        _required: &RewindabilitySpec,
        _child: usize,
        _siblings: &[Arc<DerivedPlanProps>],
        _request: usize,
    ) -> RewindabilitySpec {
        RewindabilitySpec::NotRewindable
    }

    fn rewindability_matching(&self, _child: usize, _request: usize) -> MatchDiscipline {
        MatchDiscipline::Satisfy
    }

    fn required_partition_propagation(
        &self,
        handle: &ExprHandle<'_>,
        required: &PartitionPropagationSpec,
        child: usize,
        _siblings: &[Arc<DerivedPlanProps>],
        _request: usize,
    ) -> PartitionPropagationSpec {
        push_through_partition(handle, required, child)
    }

    fn required_cte(
        &self,
        _handle: &ExprHandle<'_>,
        required: &CteRequirement,
        _child: usize,
        _siblings: &[Arc<DerivedPlanProps>],
    ) -> CteRequirement {
        required.all_optional()
    }

    // ---- derivation ----

    fn derive_order(&self, _handle: &ExprHandle<'_>) -> OrderSpec {
        OrderSpec::any()
    }

    fn derive_distribution(&self, handle: &ExprHandle<'_>) -> DistributionSpec {
        handle
            .first_relational_child_plan()
            .map_or(DistributionSpec::Singleton, |p| p.distribution.clone())
    }

    fn derive_rewindability(&self, handle: &ExprHandle<'_>) -> RewindabilitySpec {
        handle
            .first_relational_child_plan()
            .map_or(RewindabilitySpec::NotRewindable, |p| p.rewindability)
    }

    fn derive_partition(&self, handle: &ExprHandle<'_>) -> PartitionPropagationSpec {
        handle.child_plans().fold(PartitionPropagationSpec::none(), |acc, p| {
            PartitionPropagationSpec::new(
                acc.part_index_map.combine(&p.partition.part_index_map),
                acc.part_filter_map.combine(&p.partition.part_filter_map),
            )
        })
    }

    fn derive_cte_map(&self, handle: &ExprHandle<'_>) -> CteMap {
        let combined = handle.child_plans().fold(CteMap::new(), |acc, p| acc.combine(&p.cte_map));
        match self.cte_role() {
            Some((id, kind)) => combined.combine(&CteMap::single(id, kind)),
            None => combined,
        }
    }

    // ---- enforcement ----

    fn order_enforcing(
        &self,
        _handle: &ExprHandle<'_>,
        required: &Enforced<OrderSpec>,
        derived: &OrderSpec,
    ) -> EnforcingType {
        required.enforcing_type(derived)
    }

    fn distribution_enforcing(
        &self,
        _handle: &ExprHandle<'_>,
        required: &Enforced<DistributionSpec>,
        derived: &DistributionSpec,
    ) -> EnforcingType {
        required.enforcing_type(derived)
    }

    fn rewindability_enforcing(
        &self,
        _handle: &ExprHandle<'_>,
        required: &Enforced<RewindabilitySpec>,
        derived: &RewindabilitySpec,
    ) -> EnforcingType {
        required.enforcing_type(derived)
    }

    fn partition_enforcing(
        &self,
        _handle: &ExprHandle<'_>,
        required: &Enforced<PartitionPropagationSpec>,
        derived: &PartitionPropagationSpec,
    ) -> EnforcingType {
        required.enforcing_type(derived)
    }

    fn provides_required_columns(&self, handle: &ExprHandle<'_>, required: &ColumnSet) -> bool {
        required.is_subset(&handle.logical().output_columns)
    }

    fn provides_required_ctes(&self, _handle: &ExprHandle<'_>, derived: &CteMap, required: &CteRequirement) -> bool {
        derived.satisfies(required)
    }

    // ---- classification ----

    fn enforcer_kind(&self) -> Option<EnforcerKind> {
        None
    }

    fn is_join(&self) -> bool {
        false
    }

    fn is_hash_join(&self) -> bool {
        false
    }

    fn is_sequence(&self) -> bool {
        false
    }

    fn is_multi_stage_agg(&self) -> bool {
        false
    }

    fn optimization_level(&self) -> OptimizationLevel {
        if self.is_hash_join() {
            OptimizationLevel::High
        } else {
            OptimizationLevel::Low
        }
    }

    /// Veto optimizing this alternative for `required` when requested by `parent`.
    fn should_optimize(&self, _parent: Option<&dyn PhysicalOperator>, _required: &ReqdPlanProps) -> bool {
        true
    }

    /// Veto a combination of costed children.
    fn valid_context(&self, _handle: &ExprHandle<'_>) -> bool {
        true
    }
}

/// An operator as stored in the memo.
#[derive(Clone)]
pub enum Operator {
    Logical(Arc<dyn LogicalOperator>),
    Physical(Arc<dyn PhysicalOperator>),
    Scalar(Arc<dyn ScalarOperator>),
}

impl Operator {
    pub fn logical(op: impl LogicalOperator) -> Self {
        Operator::Logical(Arc::new(op))
    }

    pub fn physical(op: impl PhysicalOperator) -> Self {
        Operator::Physical(Arc::new(op))
    }

    pub fn scalar(op: impl ScalarOperator) -> Self {
        Operator::Scalar(Arc::new(op))
    }

    pub fn kind_id(&self) -> &'static str {
        match self {
            Operator::Logical(op) => op.kind_id(),
            Operator::Physical(op) => op.kind_id(),
            Operator::Scalar(op) => op.kind_id(),
        }
    }

    pub fn arity(&self) -> Option<usize> {
        match self {
            Operator::Logical(op) => op.arity(),
            Operator::Physical(op) => op.arity(),
            Operator::Scalar(op) => op.arity(),
        }
    }

    pub fn op_hash(&self) -> u64 {
        match self {
            Operator::Logical(op) => op.op_hash(),
            Operator::Physical(op) => op.op_hash(),
            Operator::Scalar(op) => op.op_hash(),
        }
    }

    pub fn is_input_order_sensitive(&self) -> bool {
        match self {
            Operator::Logical(op) => op.is_input_order_sensitive(),
            Operator::Physical(op) => op.is_input_order_sensitive(),
            Operator::Scalar(op) => op.is_input_order_sensitive(),
        }
    }

    pub fn cte_role(&self) -> Option<(CteId, CteKind)> {
        match self {
            Operator::Logical(op) => op.cte_role(),
            Operator::Physical(op) => op.cte_role(),
            Operator::Scalar(op) => op.cte_role(),
        }
    }

    /// Same variant and equal payloads.
    pub fn matches(&self, other: &Operator) -> bool {
        match (self, other) {
            (Operator::Logical(a), Operator::Logical(b)) => a.equals(b.as_any()),
            (Operator::Physical(a), Operator::Physical(b)) => a.equals(b.as_any()),
            (Operator::Scalar(a), Operator::Scalar(b)) => a.equals(b.as_any()),
            _ => false,
        }
    }

    pub fn as_logical(&self) -> Option<&dyn LogicalOperator> {
        match self {
            Operator::Logical(op) => Some(op.as_ref()),
            _ => None,
        }
    }

    pub fn as_physical(&self) -> Option<&Arc<dyn PhysicalOperator>> {
        match self {
            Operator::Physical(op) => Some(op),
            _ => None,
        }
    }

    pub fn as_scalar(&self) -> Option<&dyn ScalarOperator> {
        match self {
            Operator::Scalar(op) => Some(op.as_ref()),
            _ => None,
        }
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, Operator::Logical(_))
    }

    pub fn is_physical(&self) -> bool {
        matches!(self, Operator::Physical(_))
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self, Operator::Scalar(_))
    }

    pub fn is_enforcer(&self) -> bool {
        self.as_physical().is_some_and(|op| op.enforcer_kind().is_some())
    }
}

impl fmt::Debug for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operator::Logical(op) => write!(f, "Logical({:?})", op),
            Operator::Physical(op) => write!(f, "Physical({:?})", op),
            Operator::Scalar(op) => write!(f, "Scalar({:?})", op),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind_id())
    }
}
