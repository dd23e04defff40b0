//! # Enforcers
//!
//! An enforcer is a physical operator whose sole purpose is to deliver a required
//! physical property that the plans of a group don't natively provide. The
//! optimizer inserts enforcers into the group they serve, with that same group as
//! their only child, so an enforcer competes with every other alternative of the
//! group on cost.
//!
//! ## Enforcers by Property
//!
//! - **Order**: [`Sort`]. Sorting is O(n log n) CPU; an index scan or an
//!   order-preserving join that already delivers the order can beat it.
//! - **Distribution**: [`Motion`] in its flavours. A gather collects all rows on
//!   a single host (a gather-merge keeps a sort order while doing so); a
//!   redistribute hashes rows to hosts; a broadcast copies every row to every host;
//!   a random motion spreads a singleton stream.
//! - **Rewindability**: [`Spool`] materializes its input so it can be re-read.
//! - **Partition propagation**: [`PartitionSelector`] selects the partitions a
//!   partitioned scan below it reads.
//!
//! [`Enforcers`] is the [`EnforcerFactory`] handing these out.

use cascades_core::column::ColRef;
use cascades_core::enforcer::EnforcerFactory;
use cascades_core::handle::ExprHandle;
use cascades_core::operator::{
    equals_by_value, hash_by_value, EnforcerKind, MotionKind, Operator, OperatorCore, PhysicalOperator,
};
use cascades_core::properties::{
    DerivedPlanProps, DistributionSpec, Enforced, OrderSpec, PartManipulator, PartitionPropagationSpec,
    RewindabilitySpec, ScanId,
};
use std::any::Any;
use std::sync::Arc;

fn child_order(handle: &ExprHandle<'_>) -> OrderSpec {
    handle.child_plan(0).map_or_else(OrderSpec::any, |p| p.order.clone())
}

// ---- sort ----

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Sort {
    pub order: OrderSpec,
}

impl OperatorCore for Sort {
    fn kind_id(&self) -> &'static str {
        "Sort"
    }

    fn arity(&self) -> Option<usize> {
        Some(1)
    }

    fn equals(&self, other: &dyn Any) -> bool {
        equals_by_value(self, other)
    }

    fn op_hash(&self) -> u64 {
        hash_by_value("Sort", self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl PhysicalOperator for Sort {
    fn required_distribution(
        &self,
        _handle: &ExprHandle<'_>,
        required: &DistributionSpec,
        _child: usize,
        _siblings: &[Arc<DerivedPlanProps>],
        _request: usize,
    ) -> DistributionSpec {
        required.clone()
    }

    fn derive_order(&self, _handle: &ExprHandle<'_>) -> OrderSpec {
        self.order.clone()
    }

    /// A sort materializes its input.
    fn derive_rewindability(&self, _handle: &ExprHandle<'_>) -> RewindabilitySpec {
        RewindabilitySpec::Rewindable
    }

    fn enforcer_kind(&self) -> Option<EnforcerKind> {
        Some(EnforcerKind::Sort)
    }
}

// ---- motions ----

/// Moves rows between hosts to deliver `target`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Motion {
    pub kind: MotionKind,
    pub target: DistributionSpec,
    /// Order kept by a gather-merge; empty otherwise.
    pub order: OrderSpec,
}

impl Motion {
    pub fn gather() -> Self {
        Self {
            kind: MotionKind::Gather,
            target: DistributionSpec::Singleton,
            order: OrderSpec::any(),
        }
    }

    pub fn gather_merge(order: OrderSpec) -> Self {
        Self {
            kind: MotionKind::GatherMerge,
            target: DistributionSpec::Singleton,
            order,
        }
    }

    pub fn redistribute(columns: Vec<ColRef>) -> Self {
        Self {
            kind: MotionKind::Redistribute,
            target: DistributionSpec::hashed(columns),
            order: OrderSpec::any(),
        }
    }

    pub fn broadcast() -> Self {
        Self {
            kind: MotionKind::Broadcast,
            target: DistributionSpec::Replicated,
            order: OrderSpec::any(),
        }
    }

    pub fn random() -> Self {
        Self {
            kind: MotionKind::Random,
            target: DistributionSpec::Random,
            order: OrderSpec::any(),
        }
    }
}

impl OperatorCore for Motion {
    fn kind_id(&self) -> &'static str {
        match self.kind {
            MotionKind::Gather => "Gather",
            MotionKind::GatherMerge => "GatherMerge",
            MotionKind::Redistribute => "Redistribute",
            MotionKind::Broadcast => "Broadcast",
            MotionKind::Random => "RandomMotion",
        }
    }

    fn arity(&self) -> Option<usize> {
        Some(1)
    }

    fn equals(&self, other: &dyn Any) -> bool {
        equals_by_value(self, other)
    }

    fn op_hash(&self) -> u64 {
        hash_by_value("Motion", self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl PhysicalOperator for Motion {
    fn required_order(
        &self,
        _handle: &ExprHandle<'_>,
        _required: &OrderSpec,
        _child: usize,
        _siblings: &[Arc<DerivedPlanProps>],
        _request: usize,
    ) -> OrderSpec {
        self.order.clone()
    }

    fn derive_order(&self, handle: &ExprHandle<'_>) -> OrderSpec {
        if self.kind == MotionKind::GatherMerge {
            child_order(handle)
        } else {
            OrderSpec::any()
        }
    }

    fn derive_distribution(&self, _handle: &ExprHandle<'_>) -> DistributionSpec {
        self.target.clone()
    }

    fn derive_rewindability(&self, _handle: &ExprHandle<'_>) -> RewindabilitySpec {
        RewindabilitySpec::NotRewindable
    }

    fn enforcer_kind(&self) -> Option<EnforcerKind> {
        Some(EnforcerKind::Motion(self.kind))
    }
}

// ---- spool ----

/// Materializes its input so it can be rescanned.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Spool {
    pub rewindability: RewindabilitySpec,
}

impl OperatorCore for Spool {
    fn kind_id(&self) -> &'static str {
        "Spool"
    }

    fn arity(&self) -> Option<usize> {
        Some(1)
    }

    fn equals(&self, other: &dyn Any) -> bool {
        equals_by_value(self, other)
    }

    fn op_hash(&self) -> u64 {
        hash_by_value("Spool", self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl PhysicalOperator for Spool {
    fn required_order(
        &self,
        _handle: &ExprHandle<'_>,
        required: &OrderSpec,
        _child: usize,
        _siblings: &[Arc<DerivedPlanProps>],
        _request: usize,
    ) -> OrderSpec {
        required.clone()
    }

    fn required_distribution(
        &self,
        _handle: &ExprHandle<'_>,
        required: &DistributionSpec,
        _child: usize,
        _siblings: &[Arc<DerivedPlanProps>],
        _request: usize,
    ) -> DistributionSpec {
        required.clone()
    }

    fn derive_order(&self, handle: &ExprHandle<'_>) -> OrderSpec {
        child_order(handle)
    }

    fn derive_rewindability(&self, _handle: &ExprHandle<'_>) -> RewindabilitySpec {
        self.rewindability
    }

    fn enforcer_kind(&self) -> Option<EnforcerKind> {
        Some(EnforcerKind::Spool)
    }
}

// ---- partition selector ----

/// Selects the partitions scan `scan_id` reads. Resolves that scan's consumer
/// entry in the part index map.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartitionSelector {
    pub scan_id: ScanId,
    pub relation: u64,
    pub part_keys: Vec<ColRef>,
}

impl OperatorCore for PartitionSelector {
    fn kind_id(&self) -> &'static str {
        "PartitionSelector"
    }

    fn arity(&self) -> Option<usize> {
        Some(1)
    }

    fn equals(&self, other: &dyn Any) -> bool {
        equals_by_value(self, other)
    }

    fn op_hash(&self) -> u64 {
        hash_by_value("PartitionSelector", self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl PhysicalOperator for PartitionSelector {
    fn required_order(
        &self,
        _handle: &ExprHandle<'_>,
        required: &OrderSpec,
        _child: usize,
        _siblings: &[Arc<DerivedPlanProps>],
        _request: usize,
    ) -> OrderSpec {
        required.clone()
    }

    fn required_distribution(
        &self,
        _handle: &ExprHandle<'_>,
        required: &DistributionSpec,
        _child: usize,
        _siblings: &[Arc<DerivedPlanProps>],
        _request: usize,
    ) -> DistributionSpec {
        required.clone()
    }

    fn required_partition_propagation(
        &self,
        _handle: &ExprHandle<'_>,
        _required: &PartitionPropagationSpec,
        _child: usize,
        _siblings: &[Arc<DerivedPlanProps>],
        _request: usize,
    ) -> PartitionPropagationSpec {
        PartitionPropagationSpec::none()
    }

    fn derive_order(&self, handle: &ExprHandle<'_>) -> OrderSpec {
        child_order(handle)
    }

    fn derive_partition(&self, handle: &ExprHandle<'_>) -> PartitionPropagationSpec {
        let child = handle
            .child_plan(0)
            .map_or_else(PartitionPropagationSpec::none, |p| p.partition.clone());
        PartitionPropagationSpec::new(child.part_index_map.with_selector(self.scan_id, 0), child.part_filter_map)
    }

    fn enforcer_kind(&self) -> Option<EnforcerKind> {
        Some(EnforcerKind::PartitionSelector)
    }
}

// ---- factory ----

/// Hands out the enforcers above.
#[derive(Debug, Clone, Default)]
pub struct Enforcers {
    /// Offer only the plain gather for singleton requirements, even when an order
    /// is required as well.
    pub disable_gather_merge: bool,
}

impl Enforcers {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EnforcerFactory for Enforcers {
    fn sort(&self, order: &OrderSpec) -> Option<Operator> {
        (!order.is_empty()).then(|| Operator::physical(Sort { order: order.clone() }))
    }

    fn motions(&self, required: &Enforced<DistributionSpec>, derived: &DistributionSpec, order: &OrderSpec) -> Vec<Operator> {
        match &required.spec {
            DistributionSpec::Singleton => {
                let mut out = vec![Operator::physical(Motion::gather())];
                if !order.is_empty() && !self.disable_gather_merge {
                    out.push(Operator::physical(Motion::gather_merge(order.clone())));
                }
                out
            }
            DistributionSpec::Hashed { columns, .. } => vec![Operator::physical(Motion::redistribute(columns.clone()))],
            DistributionSpec::Replicated => vec![Operator::physical(Motion::broadcast())],
            DistributionSpec::Random | DistributionSpec::NonSingleton if !derived.is_execution_partitioned() => {
                vec![Operator::physical(Motion::random())]
            }
            _ => vec![],
        }
    }

    fn spool(&self, required: &RewindabilitySpec) -> Option<Operator> {
        (*required != RewindabilitySpec::NotRewindable).then(|| {
            Operator::physical(Spool {
                rewindability: *required,
            })
        })
    }

    fn partition_selectors(&self, required: &PartitionPropagationSpec, derived: &PartitionPropagationSpec) -> Vec<Operator> {
        required
            .part_index_map
            .iter()
            .filter(|(id, reqd)| {
                reqd.manipulator == PartManipulator::Consumer
                    && derived.part_index_map.get(*id).is_some_and(|d| {
                        d.manipulator == PartManipulator::Consumer && d.expected_propagators == Some(0)
                    })
            })
            .map(|(scan_id, reqd)| {
                Operator::physical(PartitionSelector {
                    scan_id,
                    relation: reqd.relation,
                    part_keys: reqd.part_keys.clone(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascades_core::properties::{MatchDiscipline, PartIndexEntry, PartIndexMap};

    fn kinds(ops: &[Operator]) -> Vec<&'static str> {
        ops.iter().map(|o| o.kind_id()).collect()
    }

    #[test]
    fn test_motions_per_target() {
        let factory = Enforcers::new();
        let order = OrderSpec::ascending(&[ColRef(1)]);
        let singleton = Enforced::satisfy(DistributionSpec::Singleton);
        let hashed = DistributionSpec::hashed(vec![ColRef(1)]);
        assert_eq!(kinds(&factory.motions(&singleton, &hashed, &OrderSpec::any())), vec!["Gather"]);
        assert_eq!(kinds(&factory.motions(&singleton, &hashed, &order)), vec!["Gather", "GatherMerge"]);
        assert_eq!(
            kinds(&factory.motions(&Enforced::new(hashed.clone(), MatchDiscipline::Exact), &DistributionSpec::Random, &order)),
            vec!["Redistribute"]
        );
        assert_eq!(
            kinds(&factory.motions(&Enforced::satisfy(DistributionSpec::Replicated), &hashed, &order)),
            vec!["Broadcast"]
        );
        let non_singleton = Enforced::satisfy(DistributionSpec::NonSingleton);
        assert_eq!(kinds(&factory.motions(&non_singleton, &DistributionSpec::Singleton, &order)), vec!["RandomMotion"]);
        assert!(factory.motions(&non_singleton, &hashed, &order).is_empty());

        let no_merge = Enforcers {
            disable_gather_merge: true,
        };
        assert_eq!(kinds(&no_merge.motions(&singleton, &hashed, &order)), vec!["Gather"]);
    }

    #[test]
    fn test_sort_and_spool_only_for_real_requirements() {
        let factory = Enforcers::new();
        assert!(factory.sort(&OrderSpec::any()).is_none());
        assert_eq!(factory.sort(&OrderSpec::ascending(&[ColRef(2)])).unwrap().kind_id(), "Sort");
        assert!(factory.spool(&RewindabilitySpec::NotRewindable).is_none());
        assert!(factory.spool(&RewindabilitySpec::Rewindable).unwrap().is_enforcer());
    }

    #[test]
    fn test_selectors_for_waiting_consumers() {
        let consumer = |expected| PartIndexEntry::consumer(9, vec![ColRef(1)], expected);
        let mut reqd = PartIndexMap::new();
        reqd.insert(1, consumer(Some(0)));
        reqd.insert(2, consumer(Some(0)));
        let mut derived = PartIndexMap::new();
        derived.insert(1, consumer(Some(0)));
        derived.insert(2, consumer(None));

        let ops = Enforcers::new().partition_selectors(
            &PartitionPropagationSpec::new(reqd, Default::default()),
            &PartitionPropagationSpec::new(derived.clone(), Default::default()),
        );
        assert_eq!(ops.len(), 1);
        let selector = crate::payload::<PartitionSelector>(&ops[0]).unwrap();
        assert_eq!(selector.scan_id, 1);
        assert_eq!(selector.relation, 9);

        let resolved = derived.with_selector(1, 0);
        assert_eq!(resolved.get(1).unwrap().manipulator, PartManipulator::Resolver);
    }

    #[test]
    fn test_motion_identity_includes_target() {
        let a = Operator::physical(Motion::redistribute(vec![ColRef(1)]));
        let b = Operator::physical(Motion::redistribute(vec![ColRef(2)]));
        assert!(!a.matches(&b));
        assert!(a.matches(&Operator::physical(Motion::redistribute(vec![ColRef(1)]))));
        assert_eq!(a.kind_id(), "Redistribute");
    }
}
