//! # Scalar Expressions
//!
//! Predicates live in their own scalar groups. A scalar group holds a single
//! [`Predicate`] alternative wrapping an [`Expr`] tree; relational operators that
//! filter (Select, InnerJoin, Filter, the physical joins) take that group as their
//! last child. The core only sees the columns a predicate uses and how many
//! conjuncts it has; everything else here serves rules, statistics and costing.
//!
//! ## Selectivity
//!
//! Conjuncts are assumed independent, so the selectivity of a conjunction is the
//! product of the selectivities of its parts:
//!
//! - `col = literal`: 1 / NDV(col).
//! - `col = col`: 1 / max(NDV) of the two columns.
//! - range comparisons: [`DEFAULT_INEQUALITY_SELECTIVITY`].
//! - anything else: [`DEFAULT_FILTER_SELECTIVITY`].

use cascades_core::binding::BoundExpr;
use cascades_core::column::{ColRef, ColumnSet};
use cascades_core::operator::{equals_by_value, hash_by_value, Operator, OperatorCore, ScalarOperator};
use cascades_core::properties::{GroupProps, ScalarProps};
use cascades_core::stats::{equality_selectivity, Statistics, DEFAULT_FILTER_SELECTIVITY};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;

/// Selectivity of `<`, `<=`, `>` and `>=` without histogram information.
pub const DEFAULT_INEQUALITY_SELECTIVITY: f64 = 1.0 / 3.0;

/// Constant values appearing in predicates.
///
/// `OrderedFloat` keeps floating-point literals hashable, which memo deduplication
/// of predicate groups relies on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarValue {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(OrderedFloat<f64>),
    Utf8(String),
    /// Days since 1970-01-01.
    Date(i32),
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Null => write!(f, "NULL"),
            ScalarValue::Bool(v) => write!(f, "{}", v),
            ScalarValue::Int64(v) => write!(f, "{}", v),
            ScalarValue::Float64(v) => write!(f, "{}", v),
            ScalarValue::Utf8(v) => write!(f, "'{}'", v),
            ScalarValue::Date(v) => write!(f, "date({})", v),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl CompareOp {
    /// The operator with its operands swapped: `a < b` is `b > a`.
    pub fn commuted(self) -> CompareOp {
        match self {
            CompareOp::Lt => CompareOp::Gt,
            CompareOp::LtEq => CompareOp::GtEq,
            CompareOp::Gt => CompareOp::Lt,
            CompareOp::GtEq => CompareOp::LtEq,
            other => other,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::NotEq => "<>",
            CompareOp::Lt => "<",
            CompareOp::LtEq => "<=",
            CompareOp::Gt => ">",
            CompareOp::GtEq => ">=",
        }
    }
}

/// A scalar expression tree. Conjunctions are kept flat.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Expr {
    Column(ColRef),
    Literal(ScalarValue),
    Compare {
        op: CompareOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    IsNull(Box<Expr>),
    Not(Box<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
}

impl Expr {
    pub fn col(id: u32) -> Expr {
        Expr::Column(ColRef(id))
    }

    pub fn int(v: i64) -> Expr {
        Expr::Literal(ScalarValue::Int64(v))
    }

    pub fn float(v: f64) -> Expr {
        Expr::Literal(ScalarValue::Float64(OrderedFloat(v)))
    }

    pub fn true_() -> Expr {
        Expr::Literal(ScalarValue::Bool(true))
    }

    pub fn compare(op: CompareOp, left: Expr, right: Expr) -> Expr {
        Expr::Compare {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn eq(left: Expr, right: Expr) -> Expr {
        Expr::compare(CompareOp::Eq, left, right)
    }

    /// `left = right` over two columns.
    pub fn col_eq(left: u32, right: u32) -> Expr {
        Expr::eq(Expr::col(left), Expr::col(right))
    }

    /// Conjunction of `conjuncts`, flattened. An empty list is `true`; a single
    /// conjunct is returned as is.
    pub fn and(conjuncts: Vec<Expr>) -> Expr {
        let mut flat: Vec<Expr> = Vec::with_capacity(conjuncts.len());
        for c in conjuncts {
            match c {
                Expr::And(inner) => flat.extend(inner),
                e if e.is_true() => {}
                e => flat.push(e),
            }
        }
        match flat.len() {
            0 => Expr::true_(),
            1 => flat.pop().unwrap_or_else(Expr::true_),
            _ => Expr::And(flat),
        }
    }

    pub fn is_true(&self) -> bool {
        matches!(self, Expr::Literal(ScalarValue::Bool(true)))
    }

    /// Columns referenced anywhere in the expression.
    pub fn columns(&self) -> ColumnSet {
        let mut cols = ColumnSet::new();
        self.collect_columns(&mut cols);
        cols
    }

    fn collect_columns(&self, out: &mut ColumnSet) {
        match self {
            Expr::Column(c) => {
                out.insert(*c);
            }
            Expr::Literal(_) => {}
            Expr::Compare { left, right, .. } => {
                left.collect_columns(out);
                right.collect_columns(out);
            }
            Expr::IsNull(e) | Expr::Not(e) => e.collect_columns(out),
            Expr::And(exprs) | Expr::Or(exprs) => {
                for e in exprs {
                    e.collect_columns(out);
                }
            }
        }
    }

    /// Top-level conjuncts. `true` has none.
    pub fn conjuncts(&self) -> Vec<&Expr> {
        match self {
            Expr::And(exprs) => exprs.iter().flat_map(|e| e.conjuncts()).collect(),
            e if e.is_true() => vec![],
            other => vec![other],
        }
    }

    /// `(outer, inner)` column pairs of the equality conjuncts that compare a column
    /// of `outer` with a column of `inner`, in either orientation.
    pub fn equi_join_keys(&self, outer: &ColumnSet, inner: &ColumnSet) -> Vec<(ColRef, ColRef)> {
        self.conjuncts()
            .into_iter()
            .filter_map(|c| match c {
                Expr::Compare {
                    op: CompareOp::Eq,
                    left,
                    right,
                } => match (left.as_ref(), right.as_ref()) {
                    (Expr::Column(l), Expr::Column(r)) if outer.contains(*l) && inner.contains(*r) => Some((*l, *r)),
                    (Expr::Column(l), Expr::Column(r)) if inner.contains(*l) && outer.contains(*r) => Some((*r, *l)),
                    _ => None,
                },
                _ => None,
            })
            .collect()
    }

    /// The same predicate with `a = b` written as `b = a` and comparisons mirrored.
    pub fn commuted(&self) -> Expr {
        match self {
            Expr::Compare { op, left, right } => Expr::Compare {
                op: op.commuted(),
                left: right.clone(),
                right: left.clone(),
            },
            Expr::And(exprs) => Expr::And(exprs.iter().map(Expr::commuted).collect()),
            other => other.clone(),
        }
    }

    /// Estimated fraction of rows of `stats` for which the predicate holds.
    pub fn selectivity(&self, stats: &Statistics) -> f64 {
        self.conjuncts()
            .into_iter()
            .map(|c| conjunct_selectivity(c, stats))
            .product()
    }
}

fn conjunct_selectivity(conjunct: &Expr, stats: &Statistics) -> f64 {
    match conjunct {
        Expr::Compare { op, left, right } => match (op, left.as_ref(), right.as_ref()) {
            (CompareOp::Eq, Expr::Column(l), Expr::Column(r)) => 1.0 / stats.distinct(*l).max(stats.distinct(*r)).max(1.0),
            (CompareOp::Eq, Expr::Column(c), Expr::Literal(_)) | (CompareOp::Eq, Expr::Literal(_), Expr::Column(c)) => {
                equality_selectivity(stats, *c)
            }
            (CompareOp::NotEq, Expr::Column(c), Expr::Literal(_)) => 1.0 - equality_selectivity(stats, *c),
            (CompareOp::Lt | CompareOp::LtEq | CompareOp::Gt | CompareOp::GtEq, _, _) => DEFAULT_INEQUALITY_SELECTIVITY,
            _ => DEFAULT_FILTER_SELECTIVITY,
        },
        Expr::Or(exprs) => {
            let none = exprs
                .iter()
                .map(|e| 1.0 - conjunct_selectivity(e, stats))
                .product::<f64>();
            1.0 - none
        }
        Expr::Literal(ScalarValue::Bool(false)) => 0.0,
        _ => DEFAULT_FILTER_SELECTIVITY,
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let list = |f: &mut fmt::Formatter<'_>, exprs: &[Expr], sep: &str| -> fmt::Result {
            write!(f, "(")?;
            for (i, e) in exprs.iter().enumerate() {
                if i > 0 {
                    write!(f, " {} ", sep)?;
                }
                write!(f, "{}", e)?;
            }
            write!(f, ")")
        };
        match self {
            Expr::Column(c) => write!(f, "{}", c),
            Expr::Literal(v) => write!(f, "{}", v),
            Expr::Compare { op, left, right } => write!(f, "{} {} {}", left, op.symbol(), right),
            Expr::IsNull(e) => write!(f, "{} IS NULL", e),
            Expr::Not(e) => write!(f, "NOT {}", e),
            Expr::And(exprs) => list(f, exprs, "AND"),
            Expr::Or(exprs) => list(f, exprs, "OR"),
        }
    }
}

/// Scalar operator holding a whole predicate tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Predicate {
    pub expr: Expr,
}

impl Predicate {
    pub fn new(expr: Expr) -> Self {
        Self { expr }
    }

    /// The predicate behind a scalar operator, if it is one.
    pub fn of(op: &Operator) -> Option<&Expr> {
        crate::payload::<Predicate>(op).map(|p| &p.expr)
    }
}

impl OperatorCore for Predicate {
    fn kind_id(&self) -> &'static str {
        "Predicate"
    }

    fn arity(&self) -> Option<usize> {
        Some(0)
    }

    fn equals(&self, other: &dyn Any) -> bool {
        equals_by_value(self, other)
    }

    fn op_hash(&self) -> u64 {
        hash_by_value("Predicate", self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl ScalarOperator for Predicate {
    fn derive_scalar_props(&self, _children: &[&GroupProps]) -> ScalarProps {
        ScalarProps {
            used_columns: self.expr.columns(),
            conjuncts: self.expr.conjuncts().len(),
        }
    }
}

pub fn predicate(expr: Expr) -> Operator {
    Operator::scalar(Predicate::new(expr))
}

/// Predicate bound at child `index` of a matched tree; `true` when the child was
/// bound as a leaf or is not a predicate.
pub(crate) fn bound_predicate(expr: &BoundExpr, index: usize) -> Expr {
    expr.child(index)
        .and_then(BoundExpr::op)
        .and_then(Predicate::of)
        .cloned()
        .unwrap_or_else(Expr::true_)
}
