//! # Property Enforcement
//!
//! After an alternative's children are optimized, the alternative derives the
//! properties it actually delivers and compares them with what its context requires.
//! Each property gets an [`EnforcingType`]. When some property needs enforcing, the
//! [`EnforcerFactory`] supplies physical operators (sort, motion, spool, partition
//! selector) that are added to the *same* group with the group itself as their only
//! child; they are optimized like any other alternative and find the unenforced plan
//! through the context for the weaker requirement they pass down.

use crate::handle::ExprHandle;
use crate::operator::{Operator, PhysicalOperator};
use crate::properties::{
    DerivedPlanProps, DistributionSpec, Enforced, EnforcingType, OrderSpec, PartitionPropagationSpec, ReqdPlanProps,
    RewindabilitySpec,
};

/// Builds enforcer operators. Supplied by the operator catalogue.
pub trait EnforcerFactory: Send + Sync {
    /// A sort producing `order`.
    fn sort(&self, order: &OrderSpec) -> Option<Operator>;

    /// Motions turning `derived` into something satisfying `required`. `order` is the
    /// order the parent also needs, for order-preserving gathers.
    fn motions(&self, required: &Enforced<DistributionSpec>, derived: &DistributionSpec, order: &OrderSpec) -> Vec<Operator>;

    fn spool(&self, required: &RewindabilitySpec) -> Option<Operator>;

    fn partition_selectors(&self, required: &PartitionPropagationSpec, derived: &PartitionPropagationSpec) -> Vec<Operator>;
}

/// Enforcing type of every property for one alternative under one requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnforcingDecision {
    pub order: EnforcingType,
    pub distribution: EnforcingType,
    pub rewindability: EnforcingType,
    pub partition: EnforcingType,
}

impl EnforcingDecision {
    pub fn decide(
        op: &dyn PhysicalOperator,
        handle: &ExprHandle<'_>,
        reqd: &ReqdPlanProps,
        derived: &DerivedPlanProps,
    ) -> Self {
        let order = if handle.logical().max_card.at_most_one() {
            EnforcingType::Unnecessary
        } else {
            op.order_enforcing(handle, &reqd.order, &derived.order)
        };
        Self {
            order,
            distribution: op.distribution_enforcing(handle, &reqd.distribution, &derived.distribution),
            rewindability: op.rewindability_enforcing(handle, &reqd.rewindability, &derived.rewindability),
            partition: op.partition_enforcing(handle, &reqd.partition, &derived.partition),
        }
    }

    fn all(&self) -> [EnforcingType; 4] {
        [self.order, self.distribution, self.rewindability, self.partition]
    }

    pub fn any_prohibited(&self) -> bool {
        self.all().iter().any(|e| e.is_prohibited())
    }

    /// The alternative itself is costed only when nothing needs enforcing.
    pub fn allows_costing(&self) -> bool {
        self.all().iter().all(|e| e.allows_costing())
    }

    /// Enforcers to add for every `Required` property.
    pub fn enforcers(
        &self,
        factory: &dyn EnforcerFactory,
        reqd: &ReqdPlanProps,
        derived: &DerivedPlanProps,
    ) -> Vec<Operator> {
        let mut out = Vec::new();
        if self.order == EnforcingType::Required {
            out.extend(factory.sort(&reqd.order.spec));
        }
        if self.distribution == EnforcingType::Required {
            out.extend(factory.motions(&reqd.distribution, &derived.distribution, &reqd.order.spec));
        }
        if self.rewindability == EnforcingType::Required {
            out.extend(factory.spool(&reqd.rewindability.spec));
        }
        if self.partition == EnforcingType::Required {
            out.extend(factory.partition_selectors(&reqd.partition.spec, &derived.partition));
        }
        out
    }
}
