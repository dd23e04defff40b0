//! # Predicate Pushdown Rule
//!
//! Predicate pushdown is one of the most impactful optimization rules because it
//! reduces the amount of data flowing through the plan as early as possible.
//!
//! ## What It Does
//!
//! When a selection sits on top of an inner join, this rule splits the selection
//! predicate into its conjuncts and sends each one as far down as its columns allow:
//!
//! ```text
//! Before: Select(Join(A, B, cond), p_A AND p_B AND p_AB)
//! After:  Join(Select(A, p_A), Select(B, p_B), cond AND p_AB)
//! ```
//!
//! - conjuncts over outer columns only become a selection on the outer side;
//! - conjuncts over inner columns only become a selection on the inner side;
//! - everything else merges into the join condition.
//!
//! ## Why This Helps
//!
//! - **Reduces intermediate data**: rows are filtered before the join rather than
//!   after it, producing fewer rows to build and probe.
//! - **Enables better cost estimates**: the merged condition gives the join a more
//!   selective predicate and may introduce the equality a hash join needs.
//!
//! ## Memo-Based Approach
//!
//! In a rewrite-based optimizer, predicate pushdown would physically restructure
//! the plan tree. In the memo we instead add a *new equivalent expression* to the
//! selection's group. The original Select-over-Join stays in the memo as an
//! alternative, and the cost model chooses the cheaper option.

use crate::logical::{inner_join, select};
use crate::scalar::{bound_predicate, predicate, Expr};
use cascades_core::binding::BoundExpr;
use cascades_core::column::ColumnSet;
use cascades_core::error::Result;
use cascades_core::memo::GroupId;
use cascades_core::pattern::{OpMatcher, Pattern};
use cascades_core::rule::{Rule, RuleChild, RuleContext, RuleResult, RuleType};

/// Push selection conjuncts into and below an inner join.
pub struct PredicatePushdownRule;

impl Rule for PredicatePushdownRule {
    fn name(&self) -> &str {
        "PredicatePushdown"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        // Select(Join(A, B, cond), pred)
        Pattern::Op(
            OpMatcher::Kind("Select"),
            vec![
                Pattern::Op(
                    OpMatcher::Kind("InnerJoin"),
                    vec![Pattern::Leaf, Pattern::Leaf, Pattern::Tree],
                ),
                Pattern::Tree,
            ],
        )
    }

    fn apply(&self, expr: &BoundExpr, ctx: &RuleContext<'_>) -> Result<Vec<RuleResult>> {
        let Some(join) = expr.child(0) else {
            return Ok(vec![]);
        };
        let (Some(outer), Some(inner)) = (join.child_group(0), join.child_group(1)) else {
            return Ok(vec![]);
        };
        let outer_cols = ctx.memo.group(outer).logical().output_columns.clone();
        let inner_cols = ctx.memo.group(inner).logical().output_columns.clone();

        let split = SplitPredicate::new(&bound_predicate(expr, 1), &outer_cols, &inner_cols);
        let mut join_parts: Vec<Expr> = bound_predicate(join, 2).conjuncts().into_iter().cloned().collect();
        join_parts.extend(split.join);

        Ok(vec![RuleResult::NewChildren(
            inner_join(),
            vec![
                filtered(outer, split.outer),
                filtered(inner, split.inner),
                RuleChild::NewExpr(predicate(Expr::and(join_parts)), vec![]),
            ],
        )])
    }
}

/// Conjuncts of a selection predicate sorted by where they can be evaluated.
#[derive(Debug, Default)]
struct SplitPredicate {
    outer: Vec<Expr>,
    inner: Vec<Expr>,
    join: Vec<Expr>,
}

impl SplitPredicate {
    fn new(pred: &Expr, outer_cols: &ColumnSet, inner_cols: &ColumnSet) -> Self {
        let mut split = SplitPredicate::default();
        for conjunct in pred.conjuncts() {
            let cols = conjunct.columns();
            if cols.is_subset(outer_cols) {
                split.outer.push(conjunct.clone());
            } else if cols.is_subset(inner_cols) {
                split.inner.push(conjunct.clone());
            } else {
                split.join.push(conjunct.clone());
            }
        }
        split
    }
}

/// `group` itself, or a new selection over it when conjuncts were pushed there.
fn filtered(group: GroupId, conjuncts: Vec<Expr>) -> RuleChild {
    if conjuncts.is_empty() {
        return RuleChild::Group(group);
    }
    RuleChild::NewExpr(
        select(),
        vec![
            RuleChild::Group(group),
            RuleChild::NewExpr(predicate(Expr::and(conjuncts)), vec![]),
        ],
    )
}
