//! Memo fixtures for rule unit tests.

use crate::catalog::TableDescriptor;
use crate::logical::{get, inner_join, select};
use crate::scalar::{predicate, Expr};
use cascades_core::binding::{Binding, BoundExpr};
use cascades_core::cancel::AbortSignal;
use cascades_core::memo::{GroupExprId, GroupId, Memo};
use cascades_core::rule::{Rule, RuleContext, RuleResult};
use std::sync::Arc;

/// Table `id` with 4-byte columns of the given NDVs.
pub fn table(id: u32, rows: f64, cols: &[(u32, f64)]) -> Arc<TableDescriptor> {
    let t = cols
        .iter()
        .fold(TableDescriptor::new(id, format!("t{}", id), rows), |t, (c, ndv)| {
            t.with_column(*c, format!("c{}", c), *ndv, 4.0)
        });
    Arc::new(t)
}

pub fn insert_get(memo: &Memo, table: &Arc<TableDescriptor>) -> GroupId {
    memo.insert(get(table), vec![], None, None).unwrap().group
}

pub fn insert_predicate(memo: &Memo, expr: Expr) -> GroupId {
    memo.insert(predicate(expr), vec![], None, None).unwrap().group
}

pub fn insert_join(memo: &Memo, outer: GroupId, inner: GroupId, expr: Expr) -> (GroupExprId, GroupId) {
    let pred = insert_predicate(memo, expr);
    let outcome = memo.insert(inner_join(), vec![outer, inner, pred], None, None).unwrap();
    (outcome.gexpr, outcome.group)
}

pub fn insert_select(memo: &Memo, input: GroupId, expr: Expr) -> (GroupExprId, GroupId) {
    let pred = insert_predicate(memo, expr);
    let outcome = memo.insert(select(), vec![input, pred], None, None).unwrap();
    (outcome.gexpr, outcome.group)
}

/// Every binding of `rule`'s pattern rooted at `gexpr`.
pub fn bind(memo: &Memo, gexpr: GroupExprId, rule: &dyn Rule) -> Vec<BoundExpr> {
    Binding::for_expr(memo, gexpr, rule.pattern()).collect()
}

/// Apply `rule` to every binding rooted at `gexpr`.
pub fn apply(memo: &Memo, gexpr: GroupExprId, rule: &dyn Rule) -> Vec<RuleResult> {
    let abort = AbortSignal::new();
    let ctx = RuleContext { memo, abort: &abort };
    bind(memo, gexpr, rule)
        .iter()
        .flat_map(|b| rule.apply(b, &ctx).unwrap())
        .collect()
}
