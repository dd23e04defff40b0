//! # Join Associativity Rule
//!
//! This rule implements the algebraic identity for inner joins:
//! `(A JOIN_1 B) JOIN_2 C = A JOIN_1 (B JOIN_2 C)`
//!
//! ## Why Associativity Matters
//!
//! Associativity changes the *shape* of the join tree (left-deep vs right-deep vs bushy).
//! Combined with commutativity, it enables exploring the full space of join orderings.
//! For a 3-table join `(A ⋈ B) ⋈ C`:
//! - Without associativity: only commutativity swaps are explored (A⋈B)⋈C vs C⋈(A⋈B).
//! - With associativity: the optimizer also considers A⋈(B⋈C), which may be much cheaper
//!   if B and C are small and A is large.
//!
//! ## Implementation
//!
//! The rule returns [`RuleResult::NewChildren`] with [`RuleChild::NewExpr`] children
//! for the new intermediate join and for both new predicates. Memo deduplication
//! reuses existing groups when `B ⋈ C` was already produced by another application.
//!
//! ## Predicate Handling
//!
//! For inner joins, conjuncts can be moved freely as long as each lands on a join
//! where all its columns are available. The outer join's predicate is split into:
//!
//! 1. **B-C conjuncts**: only columns of B and C, at least one of each. These move
//!    to the new inner join.
//! 2. **Remaining conjuncts**: everything else. These stay on the new outer join,
//!    together with the original inner predicate.
//!
//! The transformation only fires when there is at least one B-C conjunct; otherwise
//! the new inner join would be a cross product.
//!
//! ## Both Orientations
//!
//! The rule tries both orientations of the inner join expression:
//! - `(A ⋈₁ B) ⋈₂ C → A ⋈ (B ⋈ C)` when `cond₂` connects B and C
//! - `(A ⋈₁ B) ⋈₂ C → B ⋈ (A ⋈ C)` when `cond₂` connects A and C

use crate::logical::inner_join;
use crate::scalar::{bound_predicate, predicate, Expr};
use cascades_core::binding::BoundExpr;
use cascades_core::column::ColumnSet;
use cascades_core::error::Result;
use cascades_core::memo::GroupId;
use cascades_core::pattern::{OpMatcher, Pattern};
use cascades_core::rule::{Rule, RuleChild, RuleContext, RuleResult, RuleType};

/// Join associativity: `(A ⋈₁ B) ⋈₂ C → A ⋈ (B ⋈ C)`.
pub struct JoinAssociativityRule;

impl Rule for JoinAssociativityRule {
    fn name(&self) -> &str {
        "JoinAssociativity"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        // Join(Join(A, B, pred), C, pred): the outer child is itself a join.
        Pattern::Op(
            OpMatcher::Kind("InnerJoin"),
            vec![
                Pattern::Op(
                    OpMatcher::Kind("InnerJoin"),
                    vec![Pattern::Leaf, Pattern::Leaf, Pattern::Tree],
                ),
                Pattern::Leaf,
                Pattern::Tree,
            ],
        )
    }

    fn apply(&self, expr: &BoundExpr, ctx: &RuleContext<'_>) -> Result<Vec<RuleResult>> {
        let Some(lower) = expr.child(0) else {
            return Ok(vec![]);
        };
        let (Some(a), Some(b), Some(c)) = (lower.child_group(0), lower.child_group(1), expr.child_group(1)) else {
            return Ok(vec![]);
        };
        let upper_pred = bound_predicate(expr, 2);
        let lower_pred = bound_predicate(lower, 2);
        let columns = |g: GroupId| ctx.memo.group(g).logical().output_columns.clone();
        let (a_cols, b_cols, c_cols) = (columns(a), columns(b), columns(c));

        Ok([(a, b, &b_cols), (b, a, &a_cols)]
            .into_iter()
            .filter_map(|(stay, moved, moved_cols)| {
                try_reassociate(&upper_pred, &lower_pred, stay, moved, c, moved_cols, &c_cols)
            })
            .collect())
    }
}

/// `(stay ⋈_lower moved) ⋈_upper c  →  stay ⋈ (moved ⋈ c)`, or `None` when no
/// conjunct of `upper` connects `moved` with `c`.
fn try_reassociate(
    upper: &Expr,
    lower: &Expr,
    stay: GroupId,
    moved: GroupId,
    c: GroupId,
    moved_cols: &ColumnSet,
    c_cols: &ColumnSet,
) -> Option<RuleResult> {
    let reachable = moved_cols.union(c_cols);
    let (new_inner, remaining): (Vec<&Expr>, Vec<&Expr>) = upper.conjuncts().into_iter().partition(|conjunct| {
        let cols = conjunct.columns();
        cols.is_subset(&reachable)
            && !cols.intersection(moved_cols).is_empty()
            && !cols.intersection(c_cols).is_empty()
    });
    if new_inner.is_empty() {
        return None;
    }

    let new_inner = Expr::and(new_inner.into_iter().cloned().collect());
    let mut outer_parts: Vec<Expr> = lower.conjuncts().into_iter().cloned().collect();
    outer_parts.extend(remaining.into_iter().cloned());
    let new_outer = Expr::and(outer_parts);

    Some(RuleResult::NewChildren(
        inner_join(),
        vec![
            RuleChild::Group(stay),
            RuleChild::NewExpr(
                inner_join(),
                vec![
                    RuleChild::Group(moved),
                    RuleChild::Group(c),
                    RuleChild::NewExpr(predicate(new_inner), vec![]),
                ],
            ),
            RuleChild::NewExpr(predicate(new_outer), vec![]),
        ],
    ))
}
