//! # Rule System
//!
//! This module defines the rule trait and rule registry that drive exploration and
//! implementation. The core ships no rules of its own; catalogues register theirs.
//!
//! ## Rule Types
//!
//! There are two kinds of rules:
//!
//! - **Transformation rules** (`RuleType::Transformation`): Rewrite a logical
//!   expression into an equivalent logical expression, e.g. join commutativity
//!   (A JOIN B -> B JOIN A). Results land in the same group as the source.
//!
//! - **Implementation rules** (`RuleType::Implementation`): Map a logical operator to
//!   physical operators, e.g. a logical join to a hash join and a nested-loop join.
//!
//! ## Pattern Matching
//!
//! Each rule declares a [`Pattern`]. The search driver runs a [`Binding`] over every
//! alternative and hands each matched tree to [`Rule::apply`] as a [`BoundExpr`].
//!
//! ## Rule Deduplication
//!
//! Each rule has a `rule_hash()` fingerprint. Every alternative remembers which rules
//! were applied to it, so commutativity does not swap back and forth forever.
//!
//! [`Binding`]: crate::binding::Binding

use crate::binding::BoundExpr;
use crate::cancel::AbortSignal;
use crate::error::Result;
use crate::memo::{GroupExprId, GroupId, InsertOutcome, Memo, Provenance};
use crate::operator::Operator;
use crate::pattern::Pattern;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use tracing::trace;

/// Classification of optimization rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleType {
    /// Logical → Logical transformation (e.g., join commutativity).
    Transformation,
    /// Logical → Physical implementation (e.g., join → hash join).
    Implementation,
}

/// Context passed to rules during application.
pub struct RuleContext<'a> {
    pub memo: &'a Memo,
    pub abort: &'a AbortSignal,
}

/// A child reference in a rule result: either an existing group or a new
/// sub-expression.
///
/// This is what lets join associativity create an intermediate group:
///
/// ```text
/// (A ⋈ B) ⋈ C  →  A ⋈ (B ⋈ C)
/// ```
///
/// The rule returns `RuleChild::NewExpr(Join, [Group(B), Group(C)])` and the new
/// group for `B ⋈ C` is created when the result is inserted.
#[derive(Debug, Clone)]
pub enum RuleChild {
    Group(GroupId),
    /// A new sub-expression that goes into a new group, unless memo deduplication
    /// finds it in an existing one.
    NewExpr(Operator, Vec<RuleChild>),
}

/// Result of applying a rule to an expression.
#[derive(Debug, Clone)]
pub enum RuleResult {
    /// A new alternative of the source group over existing child groups.
    Substitution(Operator, Vec<GroupId>),
    /// A new alternative whose children may themselves be new sub-expressions.
    NewChildren(Operator, Vec<RuleChild>),
}

/// A rule transforms or implements expressions.
pub trait Rule: Send + Sync {
    /// Unique name of this rule.
    fn name(&self) -> &str;

    fn rule_type(&self) -> RuleType;

    /// Pattern that this rule matches against.
    fn pattern(&self) -> Pattern;

    /// Apply the rule to a matched tree.
    ///
    /// Most rules return `RuleResult::Substitution`. Rules that need new intermediate
    /// groups return `RuleResult::NewChildren`.
    fn apply(&self, expr: &BoundExpr, ctx: &RuleContext<'_>) -> Result<Vec<RuleResult>>;

    /// Hash for fingerprinting (to avoid re-applying rules).
    fn rule_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.name().hash(&mut hasher);
        hasher.finish()
    }
}

/// Insert `result` as a new alternative of `group`, materializing new
/// sub-expressions bottom-up first.
pub fn insert_rule_result(
    memo: &Memo,
    group: GroupId,
    source: GroupExprId,
    rule: &str,
    result: RuleResult,
) -> Result<InsertOutcome> {
    let origin = || Provenance {
        rule: rule.to_string(),
        source,
    };
    let (op, children) = match result {
        RuleResult::Substitution(op, children) => (op, children),
        RuleResult::NewChildren(op, children) => {
            let mut groups = Vec::with_capacity(children.len());
            for child in children {
                groups.push(materialize(memo, child, &origin)?);
            }
            (op, groups)
        }
    };
    let outcome = memo.insert(op, children, Some(group), Some(origin()))?;
    if outcome.inserted {
        trace!("Rule {} added expr {} to group {}", rule, outcome.gexpr, outcome.group);
    }
    Ok(outcome)
}

fn materialize(memo: &Memo, child: RuleChild, origin: &dyn Fn() -> Provenance) -> Result<GroupId> {
    match child {
        RuleChild::Group(g) => Ok(memo.resolve(g)),
        RuleChild::NewExpr(op, children) => {
            let mut groups = Vec::with_capacity(children.len());
            for c in children {
                groups.push(materialize(memo, c, origin)?);
            }
            Ok(memo.insert(op, groups, None, Some(origin()))?.group)
        }
    }
}

/// Registry of optimization rules.
#[derive(Default)]
pub struct RuleRegistry {
    rules: Vec<Box<dyn Rule>>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_rule(&mut self, rule: Box<dyn Rule>) {
        self.rules.push(rule);
    }

    pub fn rules(&self) -> impl Iterator<Item = &dyn Rule> {
        self.rules.iter().map(|r| r.as_ref())
    }

    pub fn transformation_rules(&self) -> Vec<&dyn Rule> {
        self.rules()
            .filter(|r| r.rule_type() == RuleType::Transformation)
            .collect()
    }

    pub fn implementation_rules(&self) -> Vec<&dyn Rule> {
        self.rules()
            .filter(|r| r.rule_type() == RuleType::Implementation)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    struct Commute;

    impl Rule for Commute {
        fn name(&self) -> &str {
            "Commute"
        }

        fn rule_type(&self) -> RuleType {
            RuleType::Transformation
        }

        fn pattern(&self) -> Pattern {
            Pattern::kind_over_leaves("TestJoin", 2)
        }

        fn apply(&self, expr: &BoundExpr, _ctx: &RuleContext<'_>) -> Result<Vec<RuleResult>> {
            let children = expr.child_groups();
            Ok(vec![RuleResult::Substitution(testing::join(), vec![children[1], children[0]])])
        }
    }

    #[test]
    fn test_registry_filters_by_type() {
        let mut registry = RuleRegistry::new();
        registry.add_rule(Box::new(Commute));
        assert_eq!(registry.transformation_rules().len(), 1);
        assert!(registry.implementation_rules().is_empty());
        assert_ne!(Commute.rule_hash(), 0);
    }

    #[test]
    fn test_new_children_create_groups_bottom_up() {
        let memo = Memo::new();
        let a = memo.insert(testing::scan(1, &[1]), vec![], None, None).unwrap().group;
        let b = memo.insert(testing::scan(2, &[2]), vec![], None, None).unwrap().group;
        let c = memo.insert(testing::scan(3, &[3]), vec![], None, None).unwrap().group;
        let ab = memo.insert(testing::join(), vec![a, b], None, None).unwrap().group;
        let top = memo.insert(testing::join(), vec![ab, c], None, None).unwrap();

        let result = RuleResult::NewChildren(
            testing::join(),
            vec![
                RuleChild::Group(a),
                RuleChild::NewExpr(testing::join(), vec![RuleChild::Group(b), RuleChild::Group(c)]),
            ],
        );
        let outcome = insert_rule_result(&memo, top.group, top.gexpr, "Assoc", result).unwrap();
        assert!(outcome.inserted);
        assert_eq!(outcome.group, top.group);
        let gexpr = memo.gexpr(outcome.gexpr);
        assert_eq!(gexpr.origin().map(|p| p.rule.as_str()), Some("Assoc"));
        let bc = gexpr.children()[1];
        assert_eq!(memo.group(bc).logical().join_depth, 1);
        assert_eq!(memo.num_groups(), 6);
    }

    #[test]
    fn test_rediscovered_expression_is_not_inserted() {
        let memo = Memo::new();
        let a = memo.insert(testing::scan(1, &[1]), vec![], None, None).unwrap().group;
        let b = memo.insert(testing::scan(2, &[2]), vec![], None, None).unwrap().group;
        let ab = memo.insert(testing::join(), vec![a, b], None, None).unwrap();
        let ctx = RuleContext {
            memo: &memo,
            abort: &AbortSignal::new(),
        };
        let bound = crate::binding::Binding::for_expr(&memo, ab.gexpr, Commute.pattern())
            .next()
            .unwrap();
        for result in Commute.apply(&bound, &ctx).unwrap() {
            assert!(insert_rule_result(&memo, ab.group, ab.gexpr, "Commute", result).unwrap().inserted);
        }
        let ba = memo.group(ab.group).alternatives()[1];
        let bound = crate::binding::Binding::for_expr(&memo, ba, Commute.pattern()).next().unwrap();
        for result in Commute.apply(&bound, &ctx).unwrap() {
            assert!(!insert_rule_result(&memo, ab.group, ba, "Commute", result).unwrap().inserted);
        }
        assert_eq!(memo.group(ab.group).num_alternatives(), 2);
    }
}
