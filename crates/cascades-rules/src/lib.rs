//! # cascades-rules: Reference Operator Catalogue
//!
//! This crate plugs a concrete relational algebra into `cascades-core`: operators,
//! the rules that explore and implement them, the enforcers that repair missing
//! physical properties, and a GPDB-style cost model. Everything the core needs from
//! a catalogue comes from here.
//!
//! ## Operators
//!
//! - **Logical** (`logical`): `Get`, `Select`, `InnerJoin`, `GbAgg`.
//! - **Scalar** (`scalar`): `Predicate`, wrapping an expression tree.
//! - **Physical** (`physical`): `TableScan`, `IndexScan`, `Filter`, `HashJoin`,
//!   `NLJoin`, `HashAgg`, `StreamAgg`.
//! - **Enforcers** (`enforcer`): `Sort`, the motions, `Spool`, `PartitionSelector`.
//!
//! ## Transformation Rules (Logical -> Logical)
//!
//! These rules expand the search space by generating equivalent logical alternatives:
//!
//! - **`JoinCommutativityRule`**: Swaps the sides of inner joins (A JOIN B -> B JOIN A).
//!   Lets the cost model choose which side builds the hash table.
//! - **`JoinAssociativityRule`**: Changes join grouping
//!   ((A JOIN B) JOIN C -> A JOIN (B JOIN C)), creating the new intermediate group.
//! - **`PredicatePushdownRule`**: Merges a selection above a join into the join
//!   predicate and pushes single-side conjuncts below the join.
//!
//! ## Implementation Rules (Logical -> Physical)
//!
//! - **`ImplTableScanRule`** / **`ImplIndexScanRule`**: Full scan and one index scan
//!   per index of the table.
//! - **`ImplFilterRule`**: Selection as a filter.
//! - **`ImplHashJoinRule`**: Equi-joins as hash joins.
//! - **`ImplNestedLoopJoinRule`**: Any join as a nested-loop join (universal fallback).
//! - **`ImplHashAggregateRule`** / **`ImplStreamAggregateRule`**: Aggregation with a
//!   hash table or over sorted input.

pub mod catalog;
pub mod cost_model;
pub mod enforcer;
pub mod impl_agg;
pub mod impl_join;
pub mod impl_scan;
pub mod join_associativity;
pub mod join_commutativity;
pub mod logical;
pub mod physical;
pub mod predicate_pushdown;
pub mod scalar;

#[cfg(test)]
pub(crate) mod testing;

use cascades_core::operator::Operator;
use cascades_core::rule::RuleRegistry;

/// The concrete operator struct behind `op`, if it is a `T`.
pub fn payload<T: 'static>(op: &Operator) -> Option<&T> {
    match op {
        Operator::Logical(l) => l.as_any().downcast_ref(),
        Operator::Physical(p) => p.as_any().downcast_ref(),
        Operator::Scalar(s) => s.as_any().downcast_ref(),
    }
}

/// Create a default rule registry with all built-in rules.
///
/// This is the standard configuration for the optimizer. Further rules can be
/// added to the returned registry with `add_rule()`.
pub fn default_rule_registry() -> RuleRegistry {
    let mut registry = RuleRegistry::new();

    // Transformation rules: expand the logical search space.
    registry.add_rule(Box::new(join_commutativity::JoinCommutativityRule));
    registry.add_rule(Box::new(join_associativity::JoinAssociativityRule));
    registry.add_rule(Box::new(predicate_pushdown::PredicatePushdownRule));

    // Implementation rules: map logical operators to physical alternatives.
    registry.add_rule(Box::new(impl_scan::ImplTableScanRule));
    registry.add_rule(Box::new(impl_scan::ImplIndexScanRule));
    registry.add_rule(Box::new(impl_scan::ImplFilterRule));
    registry.add_rule(Box::new(impl_join::ImplHashJoinRule));
    registry.add_rule(Box::new(impl_join::ImplNestedLoopJoinRule));
    registry.add_rule(Box::new(impl_agg::ImplHashAggregateRule));
    registry.add_rule(Box::new(impl_agg::ImplStreamAggregateRule));

    registry
}
