//! # Physical Operators
//!
//! Implementations of the logical algebra, each describing what it asks of its
//! children and what it delivers. Enforcers live in [`crate::enforcer`].
//!
//! ## Distribution Requests
//!
//! Joins and aggregates try several child distributions; each is one request
//! index the optimizer enumerates:
//!
//! | operator       | request 0                    | request 1                  | request 2          |
//! |----------------|------------------------------|----------------------------|--------------------|
//! | `HashJoin`     | co-located hashing on keys   | any outer, replicated inner| singleton on both  |
//! | `NLJoin`       | any outer, replicated inner  | singleton on both          |                    |
//! | `HashAgg`      | hashed on grouping columns   | singleton                  |                    |
//! | `StreamAgg`    | hashed on grouping columns   | singleton                  |                    |
//!
//! Global aggregates (no grouping columns) only have the singleton request.
//!
//! ## Rewindability
//!
//! Base-table scans can be re-read and derive `Rewindable`. The inner side of a
//! nested-loop join must be rewindable; anything else gets a spool.

use crate::catalog::{IndexDescriptor, TableDescriptor};
use cascades_core::column::{ColRef, ColumnSet};
use cascades_core::handle::ExprHandle;
use cascades_core::operator::{equals_by_value, hash_by_value, Operator, OperatorCore, PhysicalOperator};
use cascades_core::properties::{
    DerivedPlanProps, DistributionSpec, MatchDiscipline, OrderSpec, PartIndexEntry, PartIndexMap,
    PartitionPropagationSpec, RewindabilitySpec, ScanId,
};
use std::any::Any;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

macro_rules! physical_core {
    ($kind:literal, $arity:expr) => {
        fn kind_id(&self) -> &'static str {
            $kind
        }

        fn arity(&self) -> Option<usize> {
            Some($arity)
        }

        fn equals(&self, other: &dyn Any) -> bool {
            equals_by_value(self, other)
        }

        fn op_hash(&self) -> u64 {
            hash_by_value($kind, self)
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    };
}

/// Part index map of a scan over a partitioned table: one consumer still waiting
/// for its selector.
fn consumer_map(table: &TableDescriptor, scan_id: Option<ScanId>) -> PartitionPropagationSpec {
    let mut map = PartIndexMap::new();
    if let Some(scan_id) = scan_id.filter(|_| table.is_partitioned()) {
        map.insert(
            scan_id,
            PartIndexEntry::consumer(u64::from(table.id), table.partition_keys.clone(), Some(0)),
        );
    }
    PartitionPropagationSpec::new(map, Default::default())
}

fn child_order(handle: &ExprHandle<'_>, child: usize) -> OrderSpec {
    handle.child_plan(child).map_or_else(OrderSpec::any, |p| p.order.clone())
}

// ---- scans ----

/// Full scan of a base table.
#[derive(Debug, Clone)]
pub struct TableScan {
    pub table: Arc<TableDescriptor>,
    pub columns: Vec<ColRef>,
    pub scan_id: Option<ScanId>,
}

impl PartialEq for TableScan {
    fn eq(&self, other: &Self) -> bool {
        self.table.id == other.table.id && self.columns == other.columns && self.scan_id == other.scan_id
    }
}

impl Eq for TableScan {}

impl Hash for TableScan {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.table.id.hash(state);
        self.columns.hash(state);
        self.scan_id.hash(state);
    }
}

impl OperatorCore for TableScan {
    physical_core!("TableScan", 0);
}

impl PhysicalOperator for TableScan {
    fn derive_distribution(&self, _handle: &ExprHandle<'_>) -> DistributionSpec {
        self.table.distribution.clone()
    }

    fn derive_rewindability(&self, _handle: &ExprHandle<'_>) -> RewindabilitySpec {
        RewindabilitySpec::Rewindable
    }

    fn derive_partition(&self, _handle: &ExprHandle<'_>) -> PartitionPropagationSpec {
        consumer_map(&self.table, self.scan_id)
    }
}

/// Scan through an index, delivering the index order.
#[derive(Debug, Clone)]
pub struct IndexScan {
    pub table: Arc<TableDescriptor>,
    pub index: IndexDescriptor,
    pub columns: Vec<ColRef>,
    pub scan_id: Option<ScanId>,
}

impl PartialEq for IndexScan {
    fn eq(&self, other: &Self) -> bool {
        self.table.id == other.table.id
            && self.index == other.index
            && self.columns == other.columns
            && self.scan_id == other.scan_id
    }
}

impl Eq for IndexScan {}

impl Hash for IndexScan {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.table.id.hash(state);
        self.index.hash(state);
        self.columns.hash(state);
        self.scan_id.hash(state);
    }
}

impl OperatorCore for IndexScan {
    physical_core!("IndexScan", 0);
}

impl PhysicalOperator for IndexScan {
    fn derive_order(&self, _handle: &ExprHandle<'_>) -> OrderSpec {
        self.index.order()
    }

    fn derive_distribution(&self, _handle: &ExprHandle<'_>) -> DistributionSpec {
        self.table.distribution.clone()
    }

    fn derive_rewindability(&self, _handle: &ExprHandle<'_>) -> RewindabilitySpec {
        RewindabilitySpec::Rewindable
    }

    fn derive_partition(&self, _handle: &ExprHandle<'_>) -> PartitionPropagationSpec {
        consumer_map(&self.table, self.scan_id)
    }
}

// ---- filter ----

/// Applies its scalar predicate child to the relation child. Order, distribution
/// and rewindability pass straight through.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Filter;

impl OperatorCore for Filter {
    physical_core!("Filter", 2);
}

impl PhysicalOperator for Filter {
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

    fn required_rewindability(
        &self,
        _handle: &ExprHandle<'_>,
        required: &RewindabilitySpec,
        _child: usize,
        _siblings: &[Arc<DerivedPlanProps>],
        _request: usize,
    ) -> RewindabilitySpec {
        *required
    }

    fn derive_order(&self, handle: &ExprHandle<'_>) -> OrderSpec {
        child_order(handle, 0)
    }
}

// ---- joins ----

/// Inner hash join; child 0 probes, child 1 builds.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HashJoin {
    pub outer_keys: Vec<ColRef>,
    pub inner_keys: Vec<ColRef>,
}

impl HashJoin {
    pub fn new(keys: &[(ColRef, ColRef)]) -> Self {
        Self {
            outer_keys: keys.iter().map(|(o, _)| *o).collect(),
            inner_keys: keys.iter().map(|(_, i)| *i).collect(),
        }
    }

    /// Inner hash columns co-located with the outer side's delivered hashing. Falls
    /// back to the inner keys when the outer side is not hashed on join keys.
    fn matching_inner_keys(&self, outer: Option<&DerivedPlanProps>) -> Vec<ColRef> {
        let Some(hashed) = outer.and_then(|p| p.distribution.hash_columns()) else {
            return self.inner_keys.clone();
        };
        let mapped: Option<Vec<ColRef>> = hashed
            .iter()
            .map(|c| {
                self.outer_keys
                    .iter()
                    .position(|k| k == c)
                    .and_then(|pos| self.inner_keys.get(pos).copied())
            })
            .collect();
        mapped.unwrap_or_else(|| self.inner_keys.clone())
    }
}

impl OperatorCore for HashJoin {
    physical_core!("HashJoin", 3);
}

impl PhysicalOperator for HashJoin {
    fn distribution_requests(&self) -> usize {
        3
    }

    fn required_distribution(
        &self,
        _handle: &ExprHandle<'_>,
        _required: &DistributionSpec,
        child: usize,
        siblings: &[Arc<DerivedPlanProps>],
        request: usize,
    ) -> DistributionSpec {
        match (self.lookup_request(request).distribution, child) {
            (0, 0) => DistributionSpec::hashed(self.outer_keys.clone()),
            (0, _) => DistributionSpec::hashed(self.matching_inner_keys(siblings.first().map(|p| p.as_ref()))),
            (1, 0) => DistributionSpec::Any,
            (1, _) => DistributionSpec::Replicated,
            _ => DistributionSpec::Singleton,
        }
    }

    fn distribution_matching(&self, child: usize, request: usize) -> MatchDiscipline {
        if self.lookup_request(request).distribution == 0 && child == 1 {
            MatchDiscipline::Exact
        } else {
            MatchDiscipline::Satisfy
        }
    }

    fn derive_distribution(&self, handle: &ExprHandle<'_>) -> DistributionSpec {
        let outer = handle.child_plan(0).map(|p| p.distribution.clone());
        match outer {
            Some(DistributionSpec::Replicated | DistributionSpec::Universal) => handle
                .child_plan(1)
                .map_or(DistributionSpec::Singleton, |p| p.distribution.clone()),
            Some(d) => d,
            None => DistributionSpec::Singleton,
        }
    }

    fn is_join(&self) -> bool {
        true
    }

    fn is_hash_join(&self) -> bool {
        true
    }
}

/// Inner nested-loop join; child 1 is re-scanned for every outer row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct NLJoin;

impl OperatorCore for NLJoin {
    physical_core!("NLJoin", 3);
}

impl PhysicalOperator for NLJoin {
    fn distribution_requests(&self) -> usize {
        2
    }

    fn required_order(
        &self,
        _handle: &ExprHandle<'_>,
        required: &OrderSpec,
        child: usize,
        _siblings: &[Arc<DerivedPlanProps>],
        _request: usize,
    ) -> OrderSpec {
        if child == 0 {
            required.clone()
        } else {
            OrderSpec::any()
        }
    }

    fn required_distribution(
        &self,
        _handle: &ExprHandle<'_>,
        _required: &DistributionSpec,
        child: usize,
        _siblings: &[Arc<DerivedPlanProps>],
        request: usize,
    ) -> DistributionSpec {
        match (self.lookup_request(request).distribution, child) {
            (0, 0) => DistributionSpec::Any,
            (0, _) => DistributionSpec::Replicated,
            _ => DistributionSpec::Singleton,
        }
    }

    fn required_rewindability(
        &self,
        _handle: &ExprHandle<'_>,
        _required: &RewindabilitySpec,
        child: usize,
        _siblings: &[Arc<DerivedPlanProps>],
        _request: usize,
    ) -> RewindabilitySpec {
        if child == 1 {
            RewindabilitySpec::Rewindable
        } else {
            RewindabilitySpec::NotRewindable
        }
    }

    fn derive_order(&self, handle: &ExprHandle<'_>) -> OrderSpec {
        child_order(handle, 0)
    }

    fn is_join(&self) -> bool {
        true
    }
}

// ---- aggregates ----

fn aggregate_distribution_requests(grouping: &[ColRef]) -> usize {
    if grouping.is_empty() {
        1
    } else {
        2
    }
}

fn aggregate_child_distribution(grouping: &[ColRef], request: usize) -> DistributionSpec {
    if grouping.is_empty() || request > 0 {
        DistributionSpec::Singleton
    } else {
        DistributionSpec::hashed(grouping.to_vec())
    }
}

fn aggregate_child_columns(handle: &ExprHandle<'_>, grouping: &[ColRef], aggregates: &[ColRef], required: &ColumnSet) -> ColumnSet {
    let produced: ColumnSet = aggregates.iter().copied().collect();
    let mut wanted: ColumnSet = grouping.iter().copied().collect();
    wanted.extend(&required.difference(&produced));
    wanted.intersection(&handle.child_logical(0).output_columns)
}

/// Hash aggregate; delivers no order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HashAgg {
    pub grouping: Vec<ColRef>,
    pub aggregates: Vec<ColRef>,
}

impl OperatorCore for HashAgg {
    physical_core!("HashAgg", 1);
}

impl PhysicalOperator for HashAgg {
    fn distribution_requests(&self) -> usize {
        aggregate_distribution_requests(&self.grouping)
    }

    fn required_columns(&self, handle: &ExprHandle<'_>, required: &ColumnSet, _child: usize) -> ColumnSet {
        aggregate_child_columns(handle, &self.grouping, &self.aggregates, required)
    }

    fn required_distribution(
        &self,
        _handle: &ExprHandle<'_>,
        _required: &DistributionSpec,
        _child: usize,
        _siblings: &[Arc<DerivedPlanProps>],
        request: usize,
    ) -> DistributionSpec {
        aggregate_child_distribution(&self.grouping, self.lookup_request(request).distribution)
    }
}

/// Streaming aggregate over input sorted on the grouping columns; preserves
/// that order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamAgg {
    pub grouping: Vec<ColRef>,
    pub aggregates: Vec<ColRef>,
}

impl OperatorCore for StreamAgg {
    physical_core!("StreamAgg", 1);
}

impl PhysicalOperator for StreamAgg {
    fn distribution_requests(&self) -> usize {
        aggregate_distribution_requests(&self.grouping)
    }

    fn required_columns(&self, handle: &ExprHandle<'_>, required: &ColumnSet, _child: usize) -> ColumnSet {
        aggregate_child_columns(handle, &self.grouping, &self.aggregates, required)
    }

    fn required_order(
        &self,
        _handle: &ExprHandle<'_>,
        _required: &OrderSpec,
        _child: usize,
        _siblings: &[Arc<DerivedPlanProps>],
        _request: usize,
    ) -> OrderSpec {
        OrderSpec::ascending(&self.grouping)
    }

    fn required_distribution(
        &self,
        _handle: &ExprHandle<'_>,
        _required: &DistributionSpec,
        _child: usize,
        _siblings: &[Arc<DerivedPlanProps>],
        request: usize,
    ) -> DistributionSpec {
        aggregate_child_distribution(&self.grouping, self.lookup_request(request).distribution)
    }

    fn derive_order(&self, handle: &ExprHandle<'_>) -> OrderSpec {
        let grouping: ColumnSet = self.grouping.iter().copied().collect();
        child_order(handle, 0).restricted_to(&grouping)
    }
}

// ---- constructors ----

pub fn table_scan(table: &Arc<TableDescriptor>, columns: &[ColRef], scan_id: Option<ScanId>) -> Operator {
    Operator::physical(TableScan {
        table: Arc::clone(table),
        columns: columns.to_vec(),
        scan_id,
    })
}

pub fn filter() -> Operator {
    Operator::physical(Filter)
}

pub fn hash_join(keys: &[(ColRef, ColRef)]) -> Operator {
    Operator::physical(HashJoin::new(keys))
}

pub fn nl_join() -> Operator {
    Operator::physical(NLJoin)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascades_core::properties::PartManipulator;

    fn keys() -> Vec<(ColRef, ColRef)> {
        vec![(ColRef(1), ColRef(10)), (ColRef(2), ColRef(20))]
    }

    fn derived(distribution: DistributionSpec) -> DerivedPlanProps {
        DerivedPlanProps {
            distribution,
            ..DerivedPlanProps::default()
        }
    }

    #[test]
    fn test_hash_join_inner_follows_outer_hashing() {
        let join = HashJoin::new(&keys());
        let outer = derived(DistributionSpec::hashed(vec![ColRef(2)]));
        assert_eq!(join.matching_inner_keys(Some(&outer)), vec![ColRef(20)]);

        let unrelated = derived(DistributionSpec::hashed(vec![ColRef(3)]));
        assert_eq!(join.matching_inner_keys(Some(&unrelated)), vec![ColRef(10), ColRef(20)]);
        assert_eq!(join.matching_inner_keys(None), vec![ColRef(10), ColRef(20)]);
        assert_eq!(join.matching_inner_keys(Some(&derived(DistributionSpec::Random))), vec![ColRef(10), ColRef(20)]);
    }

    #[test]
    fn test_hash_join_requests() {
        let join = HashJoin::new(&keys());
        assert_eq!(join.num_requests(), 3);
        assert_eq!(join.distribution_matching(1, 0), MatchDiscipline::Exact);
        assert_eq!(join.distribution_matching(0, 0), MatchDiscipline::Satisfy);
        assert_eq!(join.distribution_matching(1, 1), MatchDiscipline::Satisfy);
        assert!(join.is_hash_join());
    }

    #[test]
    fn test_aggregate_requests() {
        assert_eq!(aggregate_distribution_requests(&[]), 1);
        assert_eq!(aggregate_distribution_requests(&[ColRef(1)]), 2);
        assert_eq!(aggregate_child_distribution(&[], 0), DistributionSpec::Singleton);
        assert_eq!(
            aggregate_child_distribution(&[ColRef(1)], 0),
            DistributionSpec::hashed(vec![ColRef(1)])
        );
        assert_eq!(aggregate_child_distribution(&[ColRef(1)], 1), DistributionSpec::Singleton);
    }

    #[test]
    fn test_partitioned_scan_derives_waiting_consumer() {
        let table = TableDescriptor::new(4, "sales", 10.0).with_column(1, "region", 2.0, 4.0);
        assert!(consumer_map(&table, Some(1)).part_index_map.is_empty());

        let table = table.partitioned_by(&[1]);
        let spec = consumer_map(&table, Some(1));
        let entry = spec.part_index_map.get(1).unwrap();
        assert_eq!(entry.manipulator, PartManipulator::Consumer);
        assert_eq!(entry.expected_propagators, Some(0));
        assert!(spec.part_index_map.contains_unresolved_zero_propagators());
        assert!(consumer_map(&table, None).part_index_map.is_empty());
    }
}
