//! # Physical Property Framework
//!
//! A physical property describes something about *how* a result is produced rather
//! than *what* it contains: the order of its rows, how they are spread across
//! execution hosts, whether the stream can be rewound, which partition selectors
//! it still depends on, and which common table expressions it produces or consumes.
//!
//! ## Required vs. Derived
//!
//! Parents *require* properties of their children ([`ReqdPlanProps`]); a costed
//! instantiation *derives* the properties it actually delivers ([`DerivedPlanProps`]).
//! Every spec type answers one question: does a derived value satisfy a required
//! value under a given [`MatchDiscipline`]?
//!
//! ## Enforcement
//!
//! When a derived property falls short, the operator decides an [`EnforcingType`]:
//!
//! - `Unnecessary`: the requirement is already met.
//! - `Required`: an enforcer (sort, motion, spool, partition selector) must be added
//!   above this alternative. The enforcer becomes a new alternative of the same group.
//! - `Prohibited`: this alternative must not be used for the requirement at all.

pub mod cte;
pub mod derived;
pub mod distribution;
pub mod logical;
pub mod order;
pub mod partition;
pub mod required;
pub mod rewindability;

pub use cte::{CteId, CteKind, CteMap, CteRequirement};
pub use derived::DerivedPlanProps;
pub use distribution::DistributionSpec;
pub use logical::{GroupProps, LogicalProps, MaxCard, ScalarProps};
pub use order::{OrderSpec, SortKey};
pub use partition::{PartFilterMap, PartIndexEntry, PartIndexMap, PartManipulator, PartitionPropagationSpec, ScanId};
pub use required::{ReqdPlanProps, RequestIndices};
pub use rewindability::RewindabilitySpec;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;

/// How strictly a child must match a requirement passed down to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchDiscipline {
    /// Derived must equal required.
    Exact,
    /// Derived must be sufficient for required.
    Satisfy,
    /// Derived may be a subset of required (hashed distributions only).
    Subset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EnforcingType {
    Unnecessary,
    Required,
    Prohibited,
}

impl EnforcingType {
    pub fn is_prohibited(self) -> bool {
        self == EnforcingType::Prohibited
    }

    /// An alternative is costed for a requirement only when nothing needs enforcing.
    pub fn allows_costing(self) -> bool {
        self == EnforcingType::Unnecessary
    }
}

/// Common behaviour of the physical property specs.
pub trait PropertySpec: Clone + fmt::Debug + PartialEq + Eq + Hash {
    /// `self` is a derived value; does it meet `required` under `matching`?
    fn satisfies(&self, required: &Self, matching: MatchDiscipline) -> bool;

    /// True when the spec imposes a requirement at all.
    fn is_required(&self) -> bool;
}

/// A required spec together with its matching discipline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Enforced<S> {
    pub spec: S,
    pub matching: MatchDiscipline,
}

impl<S: PropertySpec> Enforced<S> {
    pub fn new(spec: S, matching: MatchDiscipline) -> Self {
        Self { spec, matching }
    }

    pub fn satisfy(spec: S) -> Self {
        Self::new(spec, MatchDiscipline::Satisfy)
    }

    pub fn is_satisfied_by(&self, derived: &S) -> bool {
        derived.satisfies(&self.spec, self.matching)
    }

    /// Default enforcement decision: nothing to do when satisfied, otherwise enforce.
    pub fn enforcing_type(&self, derived: &S) -> EnforcingType {
        if !self.spec.is_required() || self.is_satisfied_by(derived) {
            EnforcingType::Unnecessary
        } else {
            EnforcingType::Required
        }
    }
}

impl<S: fmt::Display> fmt::Display for Enforced<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.matching {
            MatchDiscipline::Exact => "exact",
            MatchDiscipline::Satisfy => "satisfy",
            MatchDiscipline::Subset => "subset",
        };
        write!(f, "{}({})", tag, self.spec)
    }
}
