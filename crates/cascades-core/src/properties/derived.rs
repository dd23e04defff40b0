//! Properties a costed plan actually delivers.

use super::{CteMap, DistributionSpec, OrderSpec, PartitionPropagationSpec, RewindabilitySpec};
use crate::handle::ExprHandle;
use crate::operator::PhysicalOperator;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DerivedPlanProps {
    pub order: OrderSpec,
    pub distribution: DistributionSpec,
    pub rewindability: RewindabilitySpec,
    pub partition: PartitionPropagationSpec,
    pub cte_map: CteMap,
}

impl Default for DerivedPlanProps {
    fn default() -> Self {
        Self {
            order: OrderSpec::any(),
            distribution: DistributionSpec::Singleton,
            rewindability: RewindabilitySpec::NotRewindable,
            partition: PartitionPropagationSpec::none(),
            cte_map: CteMap::new(),
        }
    }
}

impl DerivedPlanProps {
    /// Ask `op` for each property, with the children's delivered properties already
    /// attached to `handle`.
    pub fn derive(op: &dyn PhysicalOperator, handle: &ExprHandle<'_>) -> Self {
        Self {
            order: op.derive_order(handle),
            distribution: op.derive_distribution(handle),
            rewindability: op.derive_rewindability(handle),
            partition: op.derive_partition(handle),
            cte_map: op.derive_cte_map(handle),
        }
    }
}

impl fmt::Display for DerivedPlanProps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "order={} dist={} rewind={} part={}",
            self.order, self.distribution, self.rewindability, self.partition
        )
    }
}
