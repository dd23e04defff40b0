//! # Declarative Patterns
//!
//! Each rule declares a [`Pattern`] describing the shape of expression trees it can
//! transform. The [`crate::binding`] module walks the memo and produces every concrete
//! tree that matches.
//!
//! ## Pattern Language
//!
//! - `Pattern::Op(matcher, children)`: an alternative whose operator satisfies
//!   `matcher` and whose children match `children` position by position. This is used
//!   for structural matching (e.g., "a join whose left child is also a join").
//!
//! - `Pattern::Leaf`: binds a child group without expanding it. The rule sees only
//!   the group id. This is the most common child pattern.
//!
//! - `Pattern::MultiLeaf`: binds every remaining child as a leaf. Only valid as the
//!   last child pattern; lets a rule match variadic operators.
//!
//! - `Pattern::Tree`: expands a whole subtree. Every combination of non-physical
//!   alternatives is enumerated; no alternative is favoured.
//!
//! - `Pattern::MultiTree`: every remaining child as a `Tree`.

use crate::operator::Operator;

/// Matcher for the operator at one pattern node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpMatcher {
    /// Operator with this kind id, whatever its variant.
    Kind(&'static str),
    AnyLogical,
    AnyPhysical,
    AnyScalar,
}

impl OpMatcher {
    pub fn matches(&self, op: &Operator) -> bool {
        match self {
            OpMatcher::Kind(kind) => op.kind_id() == *kind,
            OpMatcher::AnyLogical => op.is_logical(),
            OpMatcher::AnyPhysical => op.is_physical(),
            OpMatcher::AnyScalar => op.is_scalar(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    Op(OpMatcher, Vec<Pattern>),
    Leaf,
    MultiLeaf,
    Tree,
    MultiTree,
}

static TREE: Pattern = Pattern::Tree;

impl Pattern {
    /// `kind` over `children` leaf children.
    pub fn kind_over_leaves(kind: &'static str, children: usize) -> Self {
        Pattern::Op(OpMatcher::Kind(kind), vec![Pattern::Leaf; children])
    }

    /// `kind` over any number of leaf children.
    pub fn kind_over_multi_leaf(kind: &'static str) -> Self {
        Pattern::Op(OpMatcher::Kind(kind), vec![Pattern::MultiLeaf])
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Pattern::Leaf | Pattern::MultiLeaf)
    }

    pub fn is_multi(&self) -> bool {
        matches!(self, Pattern::MultiLeaf | Pattern::MultiTree)
    }

    /// Pattern for child `index` of an alternative matched by `self`.
    pub fn child(&self, index: usize) -> Option<&Pattern> {
        match self {
            Pattern::Op(_, children) => match children.get(index) {
                Some(p) => Some(p),
                None => children.last().filter(|p| p.is_multi()),
            },
            Pattern::Tree | Pattern::MultiTree => Some(&TREE),
            Pattern::Leaf | Pattern::MultiLeaf => None,
        }
    }

    /// Does `op` with `arity` children match the top of this pattern?
    pub fn matches_top(&self, op: &Operator, arity: usize) -> bool {
        match self {
            Pattern::Op(matcher, children) => {
                if !matcher.matches(op) {
                    return false;
                }
                match children.last() {
                    Some(last) if last.is_multi() => arity + 1 >= children.len(),
                    _ => arity == children.len(),
                }
            }
            Pattern::Tree | Pattern::MultiTree => !op.is_physical(),
            Pattern::Leaf | Pattern::MultiLeaf => true,
        }
    }
}
