//! Common table expression scoping.
//!
//! A derived [`CteMap`] records which CTEs a subtree produces or consumes. A
//! [`CteRequirement`] lists what a parent expects, each entry either required or
//! optional. A consumer must always be announced by the requirement, because its
//! producer has to be placed above it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub type CteId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CteKind {
    Producer,
    Consumer,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CteMap {
    entries: BTreeMap<CteId, CteKind>,
}

impl CteMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(id: CteId, kind: CteKind) -> Self {
        let mut map = Self::new();
        map.insert(id, kind);
        map
    }

    pub fn insert(&mut self, id: CteId, kind: CteKind) {
        self.entries.insert(id, kind);
    }

    pub fn get(&self, id: CteId) -> Option<CteKind> {
        self.entries.get(&id).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Union of two sibling maps. A producer next to a consumer of the same CTE
    /// resolves it, so the combined entry is the producer.
    pub fn combine(&self, other: &CteMap) -> CteMap {
        let mut out = self.clone();
        for (id, kind) in &other.entries {
            match out.entries.get(id) {
                Some(CteKind::Producer) => {}
                _ => {
                    out.entries.insert(*id, *kind);
                }
            }
        }
        out
    }

    pub fn satisfies(&self, required: &CteRequirement) -> bool {
        let announced = required.entries.iter().all(|(id, (kind, is_required))| match self.entries.get(id) {
            Some(derived) => derived == kind,
            None => !is_required,
        });
        let consumers_known = self
            .entries
            .iter()
            .filter(|(_, k)| **k == CteKind::Consumer)
            .all(|(id, _)| required.entries.contains_key(id));
        announced && consumers_known
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CteRequirement {
    entries: BTreeMap<CteId, (CteKind, bool)>,
}

impl CteRequirement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require(mut self, id: CteId, kind: CteKind) -> Self {
        self.entries.insert(id, (kind, true));
        self
    }

    pub fn allow(mut self, id: CteId, kind: CteKind) -> Self {
        self.entries.insert(id, (kind, false));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: CteId) -> Option<(CteKind, bool)> {
        self.entries.get(&id).copied()
    }

    /// The same entries, none of them mandatory.
    pub fn all_optional(&self) -> CteRequirement {
        CteRequirement {
            entries: self.entries.iter().map(|(id, (k, _))| (*id, (*k, false))).collect(),
        }
    }
}

impl fmt::Display for CteRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, (id, (kind, reqd))) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}:{:?}{}", id, kind, if *reqd { "" } else { "?" })?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_entries_must_be_present() {
        let req = CteRequirement::new().require(1, CteKind::Producer);
        assert!(CteMap::single(1, CteKind::Producer).satisfies(&req));
        assert!(!CteMap::new().satisfies(&req));
        assert!(!CteMap::single(1, CteKind::Consumer).satisfies(&req));
    }

    #[test]
    fn test_unannounced_consumer_is_rejected() {
        let map = CteMap::single(2, CteKind::Consumer);
        assert!(!map.satisfies(&CteRequirement::new()));
        assert!(map.satisfies(&CteRequirement::new().allow(2, CteKind::Consumer)));
        assert!(CteMap::new().satisfies(&CteRequirement::new().allow(2, CteKind::Consumer)));
    }

    #[test]
    fn test_producer_resolves_consumer_on_combine() {
        let combined = CteMap::single(1, CteKind::Consumer).combine(&CteMap::single(1, CteKind::Producer));
        assert_eq!(combined.get(1), Some(CteKind::Producer));
        let kept = CteMap::single(1, CteKind::Producer).combine(&CteMap::single(1, CteKind::Consumer));
        assert_eq!(kept.get(1), Some(CteKind::Producer));
    }
}
