//! # Partition Propagation
//!
//! A partitioned table scan (a *consumer*) only reads the partitions selected by a
//! partition selector (a *propagator*) somewhere else in the plan. The part index map
//! tracks, per scan id, whether a subtree contains the consumer, a propagator or both
//! (a *resolver*), and how many propagators the consumer still expects.
//!
//! ## Expected Propagators
//!
//! `expected_propagators` is `None` when the count is unbounded. A consumer expecting
//! zero propagators has no selector placed above it yet; requirements carrying such
//! consumers are what make partition propagation "required".
//!
//! ## Combining Maps
//!
//! When two subtrees are combined, a propagator on one side resolves a consumer on the
//! other, decrementing the consumer's expected count. When the count reaches zero the
//! entry becomes a resolver.

use super::{MatchDiscipline, PropertySpec};
use crate::column::{ColRef, ColumnSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub type ScanId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PartManipulator {
    Consumer,
    Propagator,
    Resolver,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartIndexEntry {
    pub manipulator: PartManipulator,
    pub expected_propagators: Option<u32>,
    /// Identifier of the partitioned relation.
    pub relation: u64,
    pub part_keys: Vec<ColRef>,
}

impl PartIndexEntry {
    pub fn consumer(relation: u64, part_keys: Vec<ColRef>, expected_propagators: Option<u32>) -> Self {
        Self {
            manipulator: PartManipulator::Consumer,
            expected_propagators,
            relation,
            part_keys,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartIndexMap {
    entries: BTreeMap<ScanId, PartIndexEntry>,
}

impl PartIndexMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, scan_id: ScanId, entry: PartIndexEntry) {
        self.entries.insert(scan_id, entry);
    }

    pub fn get(&self, scan_id: ScanId) -> Option<&PartIndexEntry> {
        self.entries.get(&scan_id)
    }

    pub fn contains(&self, scan_id: ScanId) -> bool {
        self.entries.contains_key(&scan_id)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ScanId, &PartIndexEntry)> {
        self.entries.iter().map(|(id, e)| (*id, e))
    }

    pub fn scan_ids(&self, consumers_only: bool) -> Vec<ScanId> {
        self.entries
            .iter()
            .filter(|(_, e)| !consumers_only || e.manipulator == PartManipulator::Consumer)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn contains_unresolved(&self) -> bool {
        self.entries.values().any(|e| e.manipulator == PartManipulator::Consumer)
    }

    pub fn contains_unresolved_zero_propagators(&self) -> bool {
        self.entries
            .values()
            .any(|e| e.manipulator == PartManipulator::Consumer && e.expected_propagators == Some(0))
    }

    /// Entries restricted to the given scan ids.
    pub fn restricted_to<'a>(&self, scan_ids: impl IntoIterator<Item = &'a ScanId>) -> PartIndexMap {
        let mut out = PartIndexMap::new();
        for id in scan_ids {
            if let Some(e) = self.entries.get(id) {
                out.insert(*id, e.clone());
            }
        }
        out
    }

    /// Combine the maps of two sibling subtrees.
    pub fn combine(&self, other: &PartIndexMap) -> PartIndexMap {
        let mut out = PartIndexMap::new();
        Self::add_unresolved(self, other, &mut out);
        Self::add_unresolved(other, self, &mut out);
        out
    }

    fn add_unresolved(first: &PartIndexMap, second: &PartIndexMap, out: &mut PartIndexMap) {
        for (scan_id, entry) in &first.entries {
            if out.contains(*scan_id) {
                continue;
            }
            let mut combined = entry.clone();
            if let Some(other) = second.entries.get(scan_id) {
                let (manipulator, expected) = Self::resolve_propagator(
                    entry.manipulator,
                    entry.expected_propagators,
                    other.manipulator,
                    other.expected_propagators,
                );
                combined.manipulator = manipulator;
                combined.expected_propagators = expected;
            }
            out.insert(*scan_id, combined);
        }
    }

    fn resolve_propagator(
        first: PartManipulator,
        first_expected: Option<u32>,
        second: PartManipulator,
        second_expected: Option<u32>,
    ) -> (PartManipulator, Option<u32>) {
        use PartManipulator::*;
        let consumer_expected = match (first, second) {
            (Propagator, Consumer) => second_expected,
            (Consumer, Propagator) => first_expected,
            _ => return (first, first_expected),
        };
        match consumer_expected {
            Some(n) if n > 0 => {
                let manipulator = if n == 1 { Resolver } else { Consumer };
                (manipulator, Some(n - 1))
            }
            _ => (Consumer, None),
        }
    }

    /// Every entry of `self` appears in `other` with the same manipulator and count.
    pub fn is_subset(&self, other: &PartIndexMap) -> bool {
        self.entries.len() <= other.entries.len()
            && self.entries.iter().all(|(id, e)| {
                other
                    .entries
                    .get(id)
                    .is_some_and(|o| o.manipulator == e.manipulator && o.expected_propagators == e.expected_propagators)
            })
    }

    /// A derived propagator that nothing above asked for.
    pub fn contains_redundant_selectors(&self, required: &PartIndexMap) -> bool {
        self.entries
            .iter()
            .any(|(id, e)| e.manipulator == PartManipulator::Propagator && !required.contains(*id))
    }

    /// Does this derived map meet the required map?
    pub fn satisfies_required(&self, required: &PartIndexMap) -> bool {
        if !required.contains_unresolved() {
            return true;
        }
        required.entries.iter().all(|(id, reqd)| match self.entries.get(id) {
            Some(derived) => Self::satisfies_entry(reqd, derived),
            None => true,
        })
    }

    fn satisfies_entry(required: &PartIndexEntry, derived: &PartIndexEntry) -> bool {
        if matches!(derived.manipulator, PartManipulator::Resolver | PartManipulator::Propagator) {
            return true;
        }
        match derived.expected_propagators {
            None => true,
            Some(0) => false,
            Some(n) => Some(n) == required.expected_propagators,
        }
    }

    /// Map derived by a partition selector for `scan_id` with `expected_from_request`
    /// more selectors still expected above it.
    pub fn with_selector(&self, scan_id: ScanId, expected_from_request: u32) -> PartIndexMap {
        let mut out = self.clone();
        if let Some(entry) = out.entries.get_mut(&scan_id) {
            if expected_from_request == 0 {
                entry.manipulator = PartManipulator::Resolver;
                entry.expected_propagators = Some(0);
            } else {
                entry.manipulator = PartManipulator::Consumer;
                entry.expected_propagators = Some(expected_from_request);
            }
        }
        out
    }
}

impl fmt::Display for PartIndexMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, (id, e)) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}:{:?}", id, e.manipulator)?;
        }
        write!(f, "]")
    }
}

/// Per scan id, the columns of filters usable for partition elimination.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartFilterMap {
    filters: BTreeMap<ScanId, ColumnSet>,
}

impl PartFilterMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, scan_id: ScanId, columns: &ColumnSet) {
        self.filters.entry(scan_id).or_default().extend(columns);
    }

    pub fn get(&self, scan_id: ScanId) -> Option<&ColumnSet> {
        self.filters.get(&scan_id)
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn combine(&self, other: &PartFilterMap) -> PartFilterMap {
        let mut out = self.clone();
        for (id, cols) in &other.filters {
            out.add(*id, cols);
        }
        out
    }
}

/// Required partition propagation: the consumers that must be resolved below, and the
/// filters available to the selectors that resolve them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionPropagationSpec {
    pub part_index_map: PartIndexMap,
    pub part_filter_map: PartFilterMap,
}

impl PartitionPropagationSpec {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn new(part_index_map: PartIndexMap, part_filter_map: PartFilterMap) -> Self {
        Self {
            part_index_map,
            part_filter_map,
        }
    }
}

/// Derived values use the same shape: the index map and filter map a subtree delivers.
impl PropertySpec for PartitionPropagationSpec {
    fn satisfies(&self, required: &Self, _matching: MatchDiscipline) -> bool {
        self.part_index_map.satisfies_required(&required.part_index_map)
    }

    fn is_required(&self) -> bool {
        self.part_index_map.contains_unresolved_zero_propagators()
    }
}

impl fmt::Display for PartitionPropagationSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.part_index_map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn consumer(expected: Option<u32>) -> PartIndexEntry {
        PartIndexEntry::consumer(7, vec![ColRef(1)], expected)
    }

    fn propagator() -> PartIndexEntry {
        PartIndexEntry {
            manipulator: PartManipulator::Propagator,
            ..consumer(Some(0))
        }
    }

    #[test]
    fn test_propagator_resolves_single_expected_consumer() {
        let mut left = PartIndexMap::new();
        left.insert(1, consumer(Some(1)));
        let mut right = PartIndexMap::new();
        right.insert(1, propagator());
        right.insert(2, consumer(Some(0)));

        let combined = left.combine(&right);
        assert_eq!(combined.get(1).unwrap().manipulator, PartManipulator::Resolver);
        assert_eq!(combined.get(1).unwrap().expected_propagators, Some(0));
        assert_eq!(combined.get(2).unwrap().manipulator, PartManipulator::Consumer);
        assert!(combined.contains_unresolved_zero_propagators());
    }

    #[test]
    fn test_consumer_with_zero_expected_becomes_unbounded() {
        let mut left = PartIndexMap::new();
        left.insert(1, consumer(Some(0)));
        let mut right = PartIndexMap::new();
        right.insert(1, propagator());
        let combined = right.combine(&left);
        let entry = combined.get(1).unwrap();
        assert_eq!(entry.manipulator, PartManipulator::Consumer);
        assert_eq!(entry.expected_propagators, None);
    }

    #[test]
    fn test_satisfaction_and_redundancy() {
        let mut required = PartIndexMap::new();
        required.insert(1, consumer(Some(0)));

        let mut derived = PartIndexMap::new();
        derived.insert(1, consumer(Some(0)));
        assert!(!derived.satisfies_required(&required));

        let resolved = derived.with_selector(1, 0);
        assert!(resolved.satisfies_required(&required));

        let mut stray = PartIndexMap::new();
        stray.insert(9, propagator());
        assert!(stray.contains_redundant_selectors(&required));
        assert!(!resolved.contains_redundant_selectors(&required));
        assert!(PartIndexMap::new().satisfies_required(&PartIndexMap::new()));
    }

    #[test]
    fn test_subset() {
        let mut small = PartIndexMap::new();
        small.insert(1, consumer(Some(1)));
        let mut big = small.clone();
        big.insert(2, consumer(Some(0)));
        assert!(small.is_subset(&big));
        assert!(!big.is_subset(&small));
    }

    fn arb_entry() -> impl Strategy<Value = PartIndexEntry> {
        (0..3u8, proptest::option::of(0..3u32)).prop_map(|(kind, expected)| PartIndexEntry {
            manipulator: match kind {
                0 => PartManipulator::Consumer,
                1 => PartManipulator::Propagator,
                _ => PartManipulator::Resolver,
            },
            expected_propagators: expected,
            relation: 1,
            part_keys: vec![],
        })
    }

    fn arb_map() -> impl Strategy<Value = PartIndexMap> {
        proptest::collection::btree_map(0..4u32, arb_entry(), 0..4)
            .prop_map(|entries| PartIndexMap { entries })
    }

    proptest! {
        #[test]
        fn prop_combine_covers_both_sides(a in arb_map(), b in arb_map()) {
            let combined = a.combine(&b);
            for id in a.scan_ids(false).into_iter().chain(b.scan_ids(false)) {
                prop_assert!(combined.contains(id));
            }
            prop_assert_eq!(combined.scan_ids(false), b.combine(&a).scan_ids(false));
        }

        #[test]
        fn prop_satisfaction_is_idempotent(a in arb_map(), b in arb_map()) {
            prop_assert_eq!(a.satisfies_required(&b), a.satisfies_required(&b));
        }
    }
}
