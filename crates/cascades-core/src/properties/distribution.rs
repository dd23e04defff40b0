//! # Distribution Specs
//!
//! Describes how the rows of a result are spread across execution hosts.
//!
//! `Any` and `NonSingleton` only appear as requirements; `Universal` (every host
//! can produce the full result, e.g. a constant) only appears as a derived value.
//! Every other variant can be both.
//!
//! ## Satisfaction
//!
//! | required          | satisfied by (Satisfy discipline)                    |
//! |-------------------|------------------------------------------------------|
//! | `Any`             | everything                                           |
//! | `NonSingleton`    | `Hashed`, `Random`, `Replicated`, `Universal`        |
//! | `Singleton`       | `Singleton`, `Universal`                             |
//! | `Hashed(cols)`    | `Hashed(d)` with `d` a non-empty subset of `cols`    |
//! | `Random`          | `Random`, `Hashed`                                   |
//! | `Replicated`      | `Replicated`, `Universal`                            |
//!
//! Under `Exact`, a hashed requirement needs the same columns in the same order; under
//! `Subset`, hashed columns may be any non-empty subset regardless of order.

use super::{MatchDiscipline, PropertySpec};
use crate::column::{ColRef, ColumnSet};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DistributionSpec {
    Any,
    NonSingleton,
    Singleton,
    Hashed {
        columns: Vec<ColRef>,
        /// Rows with NULL keys land on the same host.
        nulls_colocated: bool,
    },
    Random,
    Replicated,
    Universal,
}

impl Default for DistributionSpec {
    fn default() -> Self {
        DistributionSpec::Any
    }
}

impl DistributionSpec {
    pub fn hashed(columns: Vec<ColRef>) -> Self {
        DistributionSpec::Hashed {
            columns,
            nulls_colocated: true,
        }
    }

    /// Output is split across hosts, so each host sees only part of the rows.
    pub fn is_execution_partitioned(&self) -> bool {
        matches!(self, DistributionSpec::Hashed { .. } | DistributionSpec::Random)
    }

    pub fn is_hashed(&self) -> bool {
        matches!(self, DistributionSpec::Hashed { .. })
    }

    pub fn is_singleton(&self) -> bool {
        matches!(self, DistributionSpec::Singleton)
    }

    pub fn hash_columns(&self) -> Option<&[ColRef]> {
        match self {
            DistributionSpec::Hashed { columns, .. } => Some(columns),
            _ => None,
        }
    }

    /// Can two children delivering `self` and `other` be combined by one operator
    /// without a motion? A singleton stream cannot meet a partitioned one.
    pub fn is_compatible_with(&self, other: &DistributionSpec) -> bool {
        !((self.is_singleton() && other.is_execution_partitioned())
            || (other.is_singleton() && self.is_execution_partitioned()))
    }

    fn hashed_subset(derived: &[ColRef], derived_nulls: bool, required: &[ColRef], required_nulls: bool) -> bool {
        if derived.is_empty() || (required_nulls && !derived_nulls) {
            return false;
        }
        let required: ColumnSet = required.iter().copied().collect();
        derived.iter().all(|c| required.contains(*c))
    }
}

impl PropertySpec for DistributionSpec {
    fn satisfies(&self, required: &Self, matching: MatchDiscipline) -> bool {
        use DistributionSpec::*;

        if matches!(required, Any) {
            return true;
        }

        match (self, required) {
            (
                Hashed {
                    columns: d,
                    nulls_colocated: dn,
                },
                Hashed {
                    columns: r,
                    nulls_colocated: rn,
                },
            ) => match matching {
                MatchDiscipline::Exact => d == r && (dn == rn || !*rn),
                MatchDiscipline::Satisfy | MatchDiscipline::Subset => Self::hashed_subset(d, *dn, r, *rn),
            },
            _ if matching == MatchDiscipline::Exact => self == required,
            (_, NonSingleton) => matches!(self, Hashed { .. } | Random | Replicated | Universal),
            (Singleton | Universal, Singleton) => true,
            (Random | Hashed { .. }, Random) => true,
            (Replicated | Universal, Replicated) => true,
            (Universal, Universal) => true,
            _ => false,
        }
    }

    fn is_required(&self) -> bool {
        !matches!(self, DistributionSpec::Any)
    }
}

impl fmt::Display for DistributionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DistributionSpec::Any => write!(f, "any"),
            DistributionSpec::NonSingleton => write!(f, "non-singleton"),
            DistributionSpec::Singleton => write!(f, "singleton"),
            DistributionSpec::Hashed { columns, .. } => {
                write!(f, "hashed(")?;
                for (i, c) in columns.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", c)?;
                }
                write!(f, ")")
            }
            DistributionSpec::Random => write!(f, "random"),
            DistributionSpec::Replicated => write!(f, "replicated"),
            DistributionSpec::Universal => write!(f, "universal"),
        }
    }
}
