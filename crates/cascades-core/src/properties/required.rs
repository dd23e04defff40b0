//! Required plan properties and their propagation to children.

use super::{
    CteRequirement, DerivedPlanProps, DistributionSpec, Enforced, LogicalProps, MatchDiscipline, OrderSpec,
    PartitionPropagationSpec, RewindabilitySpec,
};
use crate::column::ColumnSet;
use crate::handle::ExprHandle;
use crate::operator::PhysicalOperator;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// A request index split into one index per property kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RequestIndices {
    pub order: usize,
    pub distribution: usize,
    pub rewindability: usize,
    pub partition: usize,
}

impl RequestIndices {
    /// Mixed-radix split of `request`; order varies fastest.
    pub fn decompose(request: usize, radices: [usize; 4]) -> Self {
        let mut rest = request;
        let mut digits = [0usize; 4];
        for (digit, radix) in digits.iter_mut().zip(radices) {
            let radix = radix.max(1);
            *digit = rest % radix;
            rest /= radix;
        }
        RequestIndices {
            order: digits[0],
            distribution: digits[1],
            rewindability: digits[2],
            partition: digits[3],
        }
    }
}

/// What a parent requires from a group: the columns it reads and the physical
/// properties it needs delivered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReqdPlanProps {
    pub columns: ColumnSet,
    pub order: Enforced<OrderSpec>,
    pub distribution: Enforced<DistributionSpec>,
    pub rewindability: Enforced<RewindabilitySpec>,
    pub partition: Enforced<PartitionPropagationSpec>,
    pub cte: CteRequirement,
}

impl ReqdPlanProps {
    /// No physical requirement beyond producing `columns`.
    pub fn any(columns: ColumnSet) -> Self {
        Self {
            columns,
            order: Enforced::satisfy(OrderSpec::any()),
            distribution: Enforced::satisfy(DistributionSpec::Any),
            rewindability: Enforced::satisfy(RewindabilitySpec::NotRewindable),
            partition: Enforced::satisfy(PartitionPropagationSpec::none()),
            cte: CteRequirement::new(),
        }
    }

    pub fn with_order(mut self, order: OrderSpec) -> Self {
        self.order = Enforced::satisfy(order);
        self
    }

    pub fn with_distribution(mut self, distribution: DistributionSpec, matching: MatchDiscipline) -> Self {
        self.distribution = Enforced::new(distribution, matching);
        self
    }

    pub fn with_rewindability(mut self, rewindability: RewindabilitySpec) -> Self {
        self.rewindability = Enforced::satisfy(rewindability);
        self
    }

    pub fn with_partition(mut self, partition: PartitionPropagationSpec) -> Self {
        self.partition = Enforced::satisfy(partition);
        self
    }

    pub fn with_cte(mut self, cte: CteRequirement) -> Self {
        self.cte = cte;
        self
    }

    /// Requirement for child `child` of the expression behind `handle`, given the
    /// parent's requirement, the derived properties of already-optimized siblings and
    /// the request index being tried.
    pub fn compute_child(
        op: &dyn PhysicalOperator,
        handle: &ExprHandle<'_>,
        parent: &ReqdPlanProps,
        child: usize,
        siblings: &[Arc<DerivedPlanProps>],
        request: usize,
    ) -> ReqdPlanProps {
        let columns = op.required_columns(handle, &parent.columns, child);
        let order = Enforced::new(
            op.required_order(handle, &parent.order.spec, child, siblings, request),
            op.order_matching(child, request),
        );
        let distribution = Enforced::new(
            op.required_distribution(handle, &parent.distribution.spec, child, siblings, request),
            op.distribution_matching(child, request),
        );
        let rewindability = Enforced::new(
            op.required_rewindability(handle, &parent.rewindability.spec, child, siblings, request),
            op.rewindability_matching(child, request),
        );
        let mut partition =
            op.required_partition_propagation(handle, &parent.partition.spec, child, siblings, request);
        for sibling in siblings {
            partition.part_filter_map = partition.part_filter_map.combine(&sibling.partition.part_filter_map);
        }
        let cte = op.required_cte(handle, &parent.cte, child, siblings);
        ReqdPlanProps {
            columns,
            order,
            distribution,
            rewindability,
            partition: Enforced::satisfy(partition),
            cte,
        }
    }

    /// Does a plan with `derived` properties, producing a result described by
    /// `logical`, meet this requirement? Order is irrelevant for at most one row.
    pub fn is_satisfied_by(&self, logical: &LogicalProps, derived: &DerivedPlanProps) -> bool {
        self.columns.is_subset(&logical.output_columns)
            && (logical.max_card.at_most_one() || self.order.is_satisfied_by(&derived.order))
            && self.distribution.is_satisfied_by(&derived.distribution)
            && self.rewindability.is_satisfied_by(&derived.rewindability)
            && self.partition.is_satisfied_by(&derived.partition)
            && derived.cte_map.satisfies(&self.cte)
    }
}

/// Pass the parent's partition requirement to `child`, keeping only the consumers
/// that live in the child's subtree.
pub fn push_through_partition(
    handle: &ExprHandle<'_>,
    required: &PartitionPropagationSpec,
    child: usize,
) -> PartitionPropagationSpec {
    let consumers = &handle.child_logical(child).partition_consumers;
    PartitionPropagationSpec::new(
        required.part_index_map.restricted_to(consumers),
        required.part_filter_map.clone(),
    )
}

impl fmt::Display for ReqdPlanProps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cols={} order={} dist={} rewind={} part={} cte={}",
            self.columns, self.order, self.distribution, self.rewindability, self.partition, self.cte
        )
    }
}
