//! # Binding
//!
//! A [`Binding`] enumerates the concrete expression trees of the memo that match a
//! [`Pattern`], starting either from a whole group or from one alternative. Rules
//! receive these trees as [`BoundExpr`] values; plan extraction uses a `Tree` binding
//! to materialize scalar subtrees.
//!
//! ## Cursor State
//!
//! The iterator is an odometer. Each expanded pattern node keeps a cursor over the
//! alternatives of its group, and each matched alternative keeps one cursor per child.
//! Advancing tries the last child first; when a child wraps around it is reset and
//! the child before it advances. All of that state lives inside the iterator, so a
//! binding can be dropped at any point and restarted by building a new one.
//!
//! Alternative lists are snapshotted when a cursor is created. Child groups are
//! resolved to their masters, and duplicate alternatives are never bound.

use crate::memo::{GroupExprId, GroupId, Memo};
use crate::operator::Operator;
use crate::pattern::Pattern;

/// One matched expression tree.
#[derive(Debug, Clone)]
pub enum BoundExpr {
    /// A child group bound without expansion.
    Leaf(GroupId),
    Node {
        gexpr: GroupExprId,
        group: GroupId,
        op: Operator,
        children: Vec<BoundExpr>,
    },
}

impl BoundExpr {
    /// Group the bound tree belongs to.
    pub fn group(&self) -> GroupId {
        match self {
            BoundExpr::Leaf(g) => *g,
            BoundExpr::Node { group, .. } => *group,
        }
    }

    pub fn gexpr(&self) -> Option<GroupExprId> {
        match self {
            BoundExpr::Leaf(_) => None,
            BoundExpr::Node { gexpr, .. } => Some(*gexpr),
        }
    }

    pub fn op(&self) -> Option<&Operator> {
        match self {
            BoundExpr::Leaf(_) => None,
            BoundExpr::Node { op, .. } => Some(op),
        }
    }

    pub fn children(&self) -> &[BoundExpr] {
        match self {
            BoundExpr::Leaf(_) => &[],
            BoundExpr::Node { children, .. } => children,
        }
    }

    pub fn child(&self, index: usize) -> Option<&BoundExpr> {
        self.children().get(index)
    }

    /// Group of child `index`.
    pub fn child_group(&self, index: usize) -> Option<GroupId> {
        self.child(index).map(BoundExpr::group)
    }

    pub fn child_groups(&self) -> Vec<GroupId> {
        self.children().iter().map(BoundExpr::group).collect()
    }
}

enum ChildCursor {
    Leaf(GroupId),
    Group(GroupCursor),
}

impl ChildCursor {
    fn current(&self) -> BoundExpr {
        match self {
            ChildCursor::Leaf(g) => BoundExpr::Leaf(*g),
            ChildCursor::Group(c) => c.current(),
        }
    }
}

/// Bindings of one alternative.
struct ExprCursor {
    gexpr: GroupExprId,
    group: GroupId,
    op: Operator,
    children: Vec<ChildCursor>,
}

impl ExprCursor {
    /// `None` when the alternative cannot produce any binding.
    fn new(memo: &Memo, gexpr: GroupExprId, pattern: &Pattern) -> Option<Self> {
        let expr = memo.gexpr(gexpr);
        if !pattern.matches_top(expr.op(), expr.arity()) {
            return None;
        }
        let mut children = Vec::with_capacity(expr.arity());
        for (index, child) in expr.children().iter().enumerate() {
            let child_group = memo.resolve(*child);
            let child_pattern = pattern.child(index)?;
            if child_pattern.is_leaf() {
                children.push(ChildCursor::Leaf(child_group));
            } else {
                let alternatives = memo.group(child_group).alternatives();
                children.push(ChildCursor::Group(GroupCursor::new(
                    memo,
                    alternatives,
                    child_pattern.clone(),
                )?));
            }
        }
        Some(Self {
            gexpr,
            group: memo.resolve(expr.group()),
            op: expr.op().clone(),
            children,
        })
    }

    fn current(&self) -> BoundExpr {
        BoundExpr::Node {
            gexpr: self.gexpr,
            group: self.group,
            op: self.op.clone(),
            children: self.children.iter().map(ChildCursor::current).collect(),
        }
    }

    /// Step the odometer. Returns `false` once every combination was produced.
    fn advance(&mut self, memo: &Memo) -> bool {
        for child in self.children.iter_mut().rev() {
            if let ChildCursor::Group(cursor) = child {
                if cursor.advance(memo) {
                    return true;
                }
                cursor.reset(memo);
            }
        }
        false
    }
}

/// Bindings over a list of alternatives, one alternative at a time.
struct GroupCursor {
    pattern: Pattern,
    alternatives: Vec<GroupExprId>,
    position: usize,
    current: Box<ExprCursor>,
}

impl GroupCursor {
    fn new(memo: &Memo, alternatives: Vec<GroupExprId>, pattern: Pattern) -> Option<Self> {
        let (position, current) = Self::first_from(memo, &alternatives, &pattern, 0)?;
        Some(Self {
            pattern,
            alternatives,
            position,
            current: Box::new(current),
        })
    }

    fn first_from(
        memo: &Memo,
        alternatives: &[GroupExprId],
        pattern: &Pattern,
        start: usize,
    ) -> Option<(usize, ExprCursor)> {
        alternatives
            .iter()
            .enumerate()
            .skip(start)
            .find_map(|(i, alt)| ExprCursor::new(memo, *alt, pattern).map(|c| (i, c)))
    }

    fn current(&self) -> BoundExpr {
        self.current.current()
    }

    fn advance(&mut self, memo: &Memo) -> bool {
        if self.current.advance(memo) {
            return true;
        }
        match Self::first_from(memo, &self.alternatives, &self.pattern, self.position + 1) {
            Some((position, cursor)) => {
                self.position = position;
                *self.current = cursor;
                true
            }
            None => false,
        }
    }

    /// Back to the first binding. A cursor that was built once always has one.
    fn reset(&mut self, memo: &Memo) {
        if let Some((position, cursor)) = Self::first_from(memo, &self.alternatives, &self.pattern, 0) {
            self.position = position;
            *self.current = cursor;
        }
    }
}

/// Iterator over the trees matching a pattern.
pub struct Binding<'m> {
    memo: &'m Memo,
    cursor: Option<GroupCursor>,
    started: bool,
}

impl<'m> Binding<'m> {
    /// Bindings rooted at any live alternative of `group`.
    pub fn for_group(memo: &'m Memo, group: GroupId, pattern: Pattern) -> Self {
        let alternatives = memo.group(memo.resolve(group)).alternatives();
        Self {
            memo,
            cursor: GroupCursor::new(memo, alternatives, pattern),
            started: false,
        }
    }

    /// Bindings rooted at `gexpr` only.
    pub fn for_expr(memo: &'m Memo, gexpr: GroupExprId, pattern: Pattern) -> Self {
        Self {
            memo,
            cursor: GroupCursor::new(memo, vec![gexpr], pattern),
            started: false,
        }
    }
}

impl Iterator for Binding<'_> {
    type Item = BoundExpr;

    fn next(&mut self) -> Option<BoundExpr> {
        let cursor = self.cursor.as_mut()?;
        if !self.started {
            self.started = true;
            return Some(cursor.current());
        }
        if cursor.advance(self.memo) {
            Some(cursor.current())
        } else {
            self.cursor = None;
            None
        }
    }
}
