//! # Scan and Filter Implementation Rules
//!
//! A logical `Get` is implemented as a full `TableScan` and, for every index
//! of the table, as an `IndexScan`. The index scan reads the same rows but
//! delivers them in index-key order, which the optimizer can use to satisfy an
//! order requirement without a Sort.
//!
//! Both scans keep the `Get`'s scan id, so scans of partitioned tables derive a
//! consumer in their part index map and the optimizer places a partition
//! selector above them when the query asks for it.
//!
//! A logical `Select` is implemented as a `Filter` over the same two children:
//! the input group and the predicate group.

use crate::logical::Get;
use crate::payload;
use crate::physical::{filter, table_scan, IndexScan};
use cascades_core::binding::BoundExpr;
use cascades_core::error::Result;
use cascades_core::operator::Operator;
use cascades_core::pattern::Pattern;
use cascades_core::rule::{Rule, RuleContext, RuleResult, RuleType};
use std::sync::Arc;

fn bound_get(expr: &BoundExpr) -> Option<&Get> {
    expr.op().and_then(payload::<Get>)
}

/// Implement a logical `Get` as a full table scan.
pub struct ImplTableScanRule;

impl Rule for ImplTableScanRule {
    fn name(&self) -> &str {
        "ImplTableScan"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Implementation
    }

    fn pattern(&self) -> Pattern {
        Pattern::kind_over_leaves("Get", 0)
    }

    fn apply(&self, expr: &BoundExpr, _ctx: &RuleContext<'_>) -> Result<Vec<RuleResult>> {
        let Some(get) = bound_get(expr) else {
            return Ok(vec![]);
        };
        Ok(vec![RuleResult::Substitution(
            table_scan(&get.table, &get.columns, get.scan_id),
            vec![],
        )])
    }
}

/// Implement a logical `Get` as one index scan per index of its table.
pub struct ImplIndexScanRule;

impl Rule for ImplIndexScanRule {
    fn name(&self) -> &str {
        "ImplIndexScan"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Implementation
    }

    fn pattern(&self) -> Pattern {
        Pattern::kind_over_leaves("Get", 0)
    }

    fn apply(&self, expr: &BoundExpr, _ctx: &RuleContext<'_>) -> Result<Vec<RuleResult>> {
        let Some(get) = bound_get(expr) else {
            return Ok(vec![]);
        };
        Ok(get
            .table
            .indexes
            .iter()
            .map(|index| {
                let scan = IndexScan {
                    table: Arc::clone(&get.table),
                    index: index.clone(),
                    columns: get.columns.clone(),
                    scan_id: get.scan_id,
                };
                RuleResult::Substitution(Operator::physical(scan), vec![])
            })
            .collect())
    }
}

/// Implement a logical `Select` as a `Filter` over the same children.
pub struct ImplFilterRule;

impl Rule for ImplFilterRule {
    fn name(&self) -> &str {
        "ImplFilter"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Implementation
    }

    fn pattern(&self) -> Pattern {
        Pattern::kind_over_leaves("Select", 2)
    }

    fn apply(&self, expr: &BoundExpr, _ctx: &RuleContext<'_>) -> Result<Vec<RuleResult>> {
        Ok(vec![RuleResult::Substitution(filter(), expr.child_groups())])
    }
}
