//! # Join Implementation Rules
//!
//! This module provides two implementation rules that map a logical inner join
//! to physical join operators. Each physical join has different cost
//! characteristics and applicability constraints:
//!
//! ## Hash Join (`ImplHashJoinRule`)
//!
//! The workhorse join algorithm. Builds a hash table on the inner side and
//! probes it with rows from the outer side. Commutativity produces the swapped
//! logical join, so this rule only implements the orientation it is given and
//! the cost model compares both build sides.
//!
//! **Requires**: at least one equality conjunct between an outer and an inner
//! column. The remaining conjuncts are evaluated as a residual on matches.
//! **Cost**: O(inner_rows) memory + O(inner_rows + outer_rows) CPU.
//!
//! ## Nested Loop Join (`ImplNestedLoopJoinRule`)
//!
//! The universal fallback: for each outer row, rescans the inner side. Always
//! applicable (works with any join condition, including non-equi predicates and
//! cross joins), but O(n * m) makes it prohibitively expensive for large inputs.
//! The inner side must be rewindable, so the optimizer adds a spool unless the
//! inner plan can be re-read.
//!
//! **Requires**: nothing (always applicable).
//! **Cost**: O(outer_rows * inner_rows) CPU.

use crate::physical::{hash_join, nl_join};
use crate::scalar::bound_predicate;
use cascades_core::binding::BoundExpr;
use cascades_core::error::Result;
use cascades_core::pattern::{OpMatcher, Pattern};
use cascades_core::rule::{Rule, RuleContext, RuleResult, RuleType};

fn join_pattern() -> Pattern {
    Pattern::Op(
        OpMatcher::Kind("InnerJoin"),
        vec![Pattern::Leaf, Pattern::Leaf, Pattern::Tree],
    )
}

/// Implement an inner equi-join as a hash join.
pub struct ImplHashJoinRule;

impl Rule for ImplHashJoinRule {
    fn name(&self) -> &str {
        "ImplHashJoin"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Implementation
    }

    fn pattern(&self) -> Pattern {
        join_pattern()
    }

    fn apply(&self, expr: &BoundExpr, ctx: &RuleContext<'_>) -> Result<Vec<RuleResult>> {
        let (Some(outer), Some(inner)) = (expr.child_group(0), expr.child_group(1)) else {
            return Ok(vec![]);
        };
        let outer_cols = ctx.memo.group(outer).logical().output_columns.clone();
        let inner_cols = ctx.memo.group(inner).logical().output_columns.clone();
        let keys = bound_predicate(expr, 2).equi_join_keys(&outer_cols, &inner_cols);
        if keys.is_empty() {
            return Ok(vec![]);
        }
        Ok(vec![RuleResult::Substitution(hash_join(&keys), expr.child_groups())])
    }
}

/// Implement any inner join as a nested-loop join.
pub struct ImplNestedLoopJoinRule;

impl Rule for ImplNestedLoopJoinRule {
    fn name(&self) -> &str {
        "ImplNestedLoopJoin"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Implementation
    }

    fn pattern(&self) -> Pattern {
        join_pattern()
    }

    fn apply(&self, expr: &BoundExpr, _ctx: &RuleContext<'_>) -> Result<Vec<RuleResult>> {
        Ok(vec![RuleResult::Substitution(nl_join(), expr.child_groups())])
    }
}
