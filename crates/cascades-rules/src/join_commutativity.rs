//! # Join Commutativity Rule
//!
//! This rule implements the algebraic identity: `A JOIN B = B JOIN A` for inner joins.
//!
//! ## Why Commutativity Matters
//!
//! In a cost-based optimizer, the order of join inputs significantly affects performance:
//!
//! - **Hash join build side**: The smaller relation should be the build side to minimize
//!   memory usage. Commutativity lets the optimizer consider both orientations and pick
//!   the one where the smaller table is built into the hash table.
//!
//! - **Join reordering**: Combined with associativity, commutativity enables exploring
//!   every join ordering of a multi-table query.
//!
//! ## Predicate Group
//!
//! The join predicate lives in its own scalar group and equality is symmetric, so
//! the swapped join reuses that group unchanged. The memo then recognises the
//! swapped-back join as the original expression, which stops the rule from
//! ping-ponging.

use cascades_core::binding::BoundExpr;
use cascades_core::error::Result;
use cascades_core::pattern::Pattern;
use cascades_core::rule::{Rule, RuleContext, RuleResult, RuleType};

use crate::logical::inner_join;

/// Join commutativity: A JOIN B -> B JOIN A.
pub struct JoinCommutativityRule;

impl Rule for JoinCommutativityRule {
    fn name(&self) -> &str {
        "JoinCommutativity"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::kind_over_leaves("InnerJoin", 3)
    }

    fn apply(&self, expr: &BoundExpr, _ctx: &RuleContext<'_>) -> Result<Vec<RuleResult>> {
        let children = expr.child_groups();
        let [outer, inner, predicate] = children[..] else {
            return Ok(vec![]);
        };
        Ok(vec![RuleResult::Substitution(inner_join(), vec![inner, outer, predicate])])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scalar::Expr;
    use crate::testing;
    use cascades_core::memo::Memo;
    use cascades_core::rule::insert_rule_result;

    #[test]
    fn test_swaps_children_and_keeps_predicate() {
        let memo = Memo::new();
        let a = testing::insert_get(&memo, &testing::table(1, 100.0, &[(1, 10.0)]));
        let b = testing::insert_get(&memo, &testing::table(2, 100.0, &[(2, 10.0)]));
        let (join, group) = testing::insert_join(&memo, a, b, Expr::col_eq(1, 2));

        let results = testing::apply(&memo, join, &JoinCommutativityRule);
        assert_eq!(results.len(), 1);
        let RuleResult::Substitution(op, children) = &results[0] else {
            panic!("expected a substitution");
        };
        assert_eq!(op.kind_id(), "InnerJoin");
        let original = memo.gexpr(join);
        assert_eq!(children, &vec![b, a, original.children()[2]]);

        let swapped = insert_rule_result(&memo, group, join, "JoinCommutativity", results[0].clone()).unwrap();
        assert!(swapped.inserted);
        assert_eq!(swapped.group, group);

        // swapping back finds the original expression
        let back = testing::apply(&memo, swapped.gexpr, &JoinCommutativityRule);
        let again = insert_rule_result(&memo, group, swapped.gexpr, "JoinCommutativity", back[0].clone()).unwrap();
        assert!(!again.inserted);
        assert_eq!(again.gexpr, join);
    }
}
