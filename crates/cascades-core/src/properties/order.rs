//! Sort order specs.
//!
//! A derived order satisfies a required order when the required keys are a prefix
//! of the derived keys. The empty order is "no requirement".

use super::{MatchDiscipline, PropertySpec};
use crate::column::{ColRef, ColumnSet};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortKey {
    pub column: ColRef,
    pub descending: bool,
    pub nulls_first: bool,
}

impl SortKey {
    pub fn asc(column: ColRef) -> Self {
        Self {
            column,
            descending: false,
            nulls_first: false,
        }
    }

    pub fn desc(column: ColRef) -> Self {
        Self {
            column,
            descending: true,
            nulls_first: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderSpec {
    keys: Vec<SortKey>,
}

impl OrderSpec {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn new(keys: Vec<SortKey>) -> Self {
        Self { keys }
    }

    pub fn ascending(columns: &[ColRef]) -> Self {
        Self::new(columns.iter().copied().map(SortKey::asc).collect())
    }

    pub fn keys(&self) -> &[SortKey] {
        &self.keys
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn columns(&self) -> ColumnSet {
        self.keys.iter().map(|k| k.column).collect()
    }

    /// The longest prefix of this order whose columns are all in `available`.
    pub fn restricted_to(&self, available: &ColumnSet) -> OrderSpec {
        OrderSpec::new(
            self.keys
                .iter()
                .take_while(|k| available.contains(k.column))
                .copied()
                .collect(),
        )
    }
}

impl PropertySpec for OrderSpec {
    fn satisfies(&self, required: &Self, matching: MatchDiscipline) -> bool {
        match matching {
            MatchDiscipline::Exact => self == required,
            MatchDiscipline::Satisfy | MatchDiscipline::Subset => {
                required.keys.len() <= self.keys.len()
                    && required.keys.iter().zip(&self.keys).all(|(r, d)| r == d)
            }
        }
    }

    fn is_required(&self) -> bool {
        !self.keys.is_empty()
    }
}

impl fmt::Display for OrderSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.keys.is_empty() {
            return write!(f, "<any>");
        }
        for (i, k) in self.keys.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}{}", k.column, if k.descending { " desc" } else { "" })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_satisfaction() {
        let derived = OrderSpec::ascending(&[ColRef(1), ColRef(2)]);
        assert!(derived.satisfies(&OrderSpec::ascending(&[ColRef(1)]), MatchDiscipline::Satisfy));
        assert!(derived.satisfies(&OrderSpec::any(), MatchDiscipline::Satisfy));
        assert!(!derived.satisfies(&OrderSpec::ascending(&[ColRef(2)]), MatchDiscipline::Satisfy));
        assert!(!derived.satisfies(&OrderSpec::ascending(&[ColRef(1)]), MatchDiscipline::Exact));
    }

    #[test]
    fn test_direction_matters() {
        let derived = OrderSpec::new(vec![SortKey::desc(ColRef(1))]);
        assert!(!derived.satisfies(&OrderSpec::ascending(&[ColRef(1)]), MatchDiscipline::Satisfy));
    }

    #[test]
    fn test_restricted_to_keeps_leading_keys() {
        let order = OrderSpec::ascending(&[ColRef(1), ColRef(2), ColRef(3)]);
        let restricted = order.restricted_to(&ColumnSet::from([1, 3]));
        assert_eq!(restricted, OrderSpec::ascending(&[ColRef(1)]));
    }
}
