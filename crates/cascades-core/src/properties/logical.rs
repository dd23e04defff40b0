//! Derived logical and scalar properties of a group.
//!
//! These are computed once, from the first alternative inserted into a group, and
//! never change afterwards: every alternative of a group produces the same result.

use super::partition::ScanId;
use crate::column::ColumnSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Upper bound on the number of rows a relational expression can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MaxCard(pub Option<u64>);

impl MaxCard {
    pub fn unbounded() -> Self {
        MaxCard(None)
    }

    pub fn at_most(n: u64) -> Self {
        MaxCard(Some(n))
    }

    pub fn at_most_one(&self) -> bool {
        matches!(self.0, Some(n) if n <= 1)
    }

    pub fn times(&self, other: &MaxCard) -> MaxCard {
        match (self.0, other.0) {
            (Some(a), Some(b)) => MaxCard(a.checked_mul(b)),
            _ => MaxCard(None),
        }
    }
}

impl Default for MaxCard {
    fn default() -> Self {
        MaxCard::unbounded()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogicalProps {
    pub output_columns: ColumnSet,
    /// Columns referenced but produced outside this expression.
    pub outer_references: ColumnSet,
    pub max_card: MaxCard,
    /// Number of joins in the subtree.
    pub join_depth: u32,
    /// Scan ids of partitioned scans in the subtree.
    pub partition_consumers: BTreeSet<ScanId>,
}

impl LogicalProps {
    pub fn with_columns(output_columns: ColumnSet) -> Self {
        Self {
            output_columns,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScalarProps {
    pub used_columns: ColumnSet,
    /// Number of top-level conjuncts when the scalar is a predicate.
    pub conjuncts: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GroupProps {
    Relational(LogicalProps),
    Scalar(ScalarProps),
}

impl GroupProps {
    pub fn relational(&self) -> Option<&LogicalProps> {
        match self {
            GroupProps::Relational(p) => Some(p),
            GroupProps::Scalar(_) => None,
        }
    }

    pub fn scalar(&self) -> Option<&ScalarProps> {
        match self {
            GroupProps::Scalar(p) => Some(p),
            GroupProps::Relational(_) => None,
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self, GroupProps::Scalar(_))
    }
}
