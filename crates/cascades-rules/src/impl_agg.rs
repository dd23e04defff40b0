//! # Aggregate Implementation Rules
//!
//! This module provides two implementation rules for the logical `GbAgg` operator:
//!
//! ## Hash Aggregate (`ImplHashAggregateRule`)
//!
//! Uses a hash table keyed by the grouping columns. Each input row is hashed and
//! routed to the corresponding bucket, where the aggregate accumulators are updated.
//! Works with any input ordering.
//!
//! **Cost trade-off**: O(n) CPU + O(groups) memory. The memory cost can be significant
//! for high-cardinality grouping columns, but it is the go-to choice when the input
//! is not pre-sorted.
//!
//! ## Stream Aggregate (`ImplStreamAggregateRule`)
//!
//! Processes input rows in a single pass, detecting group boundaries from the sorted
//! order. When the grouping columns change, the current group is finalized and emitted.
//!
//! **Cost trade-off**: O(n) CPU + O(1) memory. Cheaper than hash aggregate but requires
//! input sorted on the grouping columns. The optimizer adds a Sort when the child
//! cannot deliver that order; an index scan on the grouping columns makes it free.

use crate::logical::GbAgg;
use crate::payload;
use crate::physical::{HashAgg, StreamAgg};
use cascades_core::binding::BoundExpr;
use cascades_core::error::Result;
use cascades_core::operator::Operator;
use cascades_core::pattern::Pattern;
use cascades_core::rule::{Rule, RuleContext, RuleResult, RuleType};

fn bound_agg(expr: &BoundExpr) -> Option<&GbAgg> {
    expr.op().and_then(payload::<GbAgg>)
}

/// Implement a logical aggregate as a hash aggregate.
pub struct ImplHashAggregateRule;

impl Rule for ImplHashAggregateRule {
    fn name(&self) -> &str {
        "ImplHashAggregate"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Implementation
    }

    fn pattern(&self) -> Pattern {
        Pattern::kind_over_leaves("GbAgg", 1)
    }

    fn apply(&self, expr: &BoundExpr, _ctx: &RuleContext<'_>) -> Result<Vec<RuleResult>> {
        let Some(agg) = bound_agg(expr) else {
            return Ok(vec![]);
        };
        let op = Operator::physical(HashAgg {
            grouping: agg.grouping.clone(),
            aggregates: agg.aggregates.clone(),
        });
        Ok(vec![RuleResult::Substitution(op, expr.child_groups())])
    }
}

/// Implement a logical aggregate as a stream aggregate over sorted input.
///
/// A global aggregate needs no order, so the stream variant applies there too.
pub struct ImplStreamAggregateRule;

impl Rule for ImplStreamAggregateRule {
    fn name(&self) -> &str {
        "ImplStreamAggregate"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Implementation
    }

    fn pattern(&self) -> Pattern {
        Pattern::kind_over_leaves("GbAgg", 1)
    }

    fn apply(&self, expr: &BoundExpr, _ctx: &RuleContext<'_>) -> Result<Vec<RuleResult>> {
        let Some(agg) = bound_agg(expr) else {
            return Ok(vec![]);
        };
        let op = Operator::physical(StreamAgg {
            grouping: agg.grouping.clone(),
            aggregates: agg.aggregates.clone(),
        });
        Ok(vec![RuleResult::Substitution(op, expr.child_groups())])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logical::gb_agg;
    use crate::testing;
    use cascades_core::column::ColRef;
    use cascades_core::memo::Memo;

    #[test]
    fn test_both_aggregates_keep_grouping() {
        let memo = Memo::new();
        let input = testing::insert_get(&memo, &testing::table(1, 100.0, &[(1, 10.0), (2, 50.0)]));
        let agg = memo.insert(gb_agg(&[1], &[9]), vec![input], None, None).unwrap().gexpr;

        let hash = testing::apply(&memo, agg, &ImplHashAggregateRule);
        let RuleResult::Substitution(op, children) = &hash[0] else {
            panic!("expected a substitution");
        };
        assert_eq!(children, &vec![input]);
        assert_eq!(payload::<HashAgg>(op).unwrap().grouping, vec![ColRef(1)]);

        let stream = testing::apply(&memo, agg, &ImplStreamAggregateRule);
        let RuleResult::Substitution(op, _) = &stream[0] else {
            panic!("expected a substitution");
        };
        let stream_agg = payload::<StreamAgg>(op).unwrap();
        assert_eq!(stream_agg.aggregates, vec![ColRef(9)]);
    }
}
