//! Column references and column sets.
//!
//! Columns are identified by a session-wide integer. Sets are ordered so that
//! they hash deterministically inside requirement keys.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ColRef(pub u32);

impl fmt::Display for ColRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnSet(BTreeSet<ColRef>);

impl ColumnSet {
    pub const EMPTY: ColumnSet = ColumnSet(BTreeSet::new());

    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, col: ColRef) -> bool {
        self.0.insert(col)
    }

    pub fn contains(&self, col: ColRef) -> bool {
        self.0.contains(&col)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = ColRef> + '_ {
        self.0.iter().copied()
    }

    pub fn is_subset(&self, other: &ColumnSet) -> bool {
        self.0.is_subset(&other.0)
    }

    pub fn union(&self, other: &ColumnSet) -> ColumnSet {
        ColumnSet(self.0.union(&other.0).copied().collect())
    }

    pub fn intersection(&self, other: &ColumnSet) -> ColumnSet {
        ColumnSet(self.0.intersection(&other.0).copied().collect())
    }

    pub fn difference(&self, other: &ColumnSet) -> ColumnSet {
        ColumnSet(self.0.difference(&other.0).copied().collect())
    }

    pub fn extend(&mut self, other: &ColumnSet) {
        self.0.extend(other.0.iter().copied());
    }
}

impl FromIterator<ColRef> for ColumnSet {
    fn from_iter<I: IntoIterator<Item = ColRef>>(iter: I) -> Self {
        ColumnSet(iter.into_iter().collect())
    }
}

impl<const N: usize> From<[u32; N]> for ColumnSet {
    fn from(ids: [u32; N]) -> Self {
        ids.into_iter().map(ColRef).collect()
    }
}

impl fmt::Display for ColumnSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, col) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", col)?;
        }
        write!(f, "}}")
    }
}
