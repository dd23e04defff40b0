//! # Logical Operators
//!
//! The relational algebra the rules explore: table access, selection, inner joins
//! and grouping aggregates. Predicates are not stored on the operators; `Select`
//! and `InnerJoin` take a scalar [`Predicate`](crate::scalar::Predicate) group as
//! their last child so that equal predicates share one group.
//!
//! | operator    | children                         |
//! |-------------|----------------------------------|
//! | `Get`       | none                             |
//! | `Select`    | relation, predicate              |
//! | `InnerJoin` | outer, inner, predicate          |
//! | `GbAgg`     | relation                         |

use crate::catalog::TableDescriptor;
use crate::scalar::{Expr, Predicate};
use cascades_core::column::{ColRef, ColumnSet};
use cascades_core::error::Result;
use cascades_core::operator::{equals_by_value, hash_by_value, LogicalOperator, Operator, OperatorCore, StatsInput};
use cascades_core::properties::{GroupProps, LogicalProps, MaxCard, ScanId};
use cascades_core::stats::{
    derive_aggregate_stats, derive_filter_stats, derive_join_stats, ColumnStatistics, Statistics, DEFAULT_COLUMN_WIDTH,
};
use std::any::Any;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Statistics of relational child `index`, or empty ones when it has none.
pub(crate) fn child_stats(input: &StatsInput<'_>, index: usize) -> Arc<Statistics> {
    input
        .children
        .get(index)
        .cloned()
        .flatten()
        .unwrap_or_else(|| Arc::new(Statistics::empty()))
}

/// Predicate of scalar child `index`; `true` when absent.
pub(crate) fn child_predicate(input: &StatsInput<'_>, index: usize) -> Expr {
    input
        .scalar_op(index)
        .and_then(Predicate::of)
        .cloned()
        .unwrap_or_else(Expr::true_)
}

fn relational<'a>(children: &'a [&GroupProps], index: usize) -> LogicalProps {
    children
        .get(index)
        .and_then(|c| c.relational())
        .cloned()
        .unwrap_or_default()
}

// ---- Get ----

/// Scan of a base table. Equality is by table id, columns and scan id; the shared
/// descriptor only carries metadata.
#[derive(Debug, Clone)]
pub struct Get {
    pub table: Arc<TableDescriptor>,
    pub columns: Vec<ColRef>,
    /// Identifies this scan among the partitioned scans of a query.
    pub scan_id: Option<ScanId>,
}

impl Get {
    /// Scan of every column of `table`.
    pub fn new(table: Arc<TableDescriptor>) -> Self {
        let columns = table.columns.iter().map(|c| c.col).collect();
        Self {
            table,
            columns,
            scan_id: None,
        }
    }

    pub fn with_scan_id(mut self, scan_id: ScanId) -> Self {
        self.scan_id = Some(scan_id);
        self
    }

    /// Scan id when this scan reads a partitioned table.
    pub fn partition_scan(&self) -> Option<ScanId> {
        self.scan_id.filter(|_| self.table.is_partitioned())
    }
}

impl PartialEq for Get {
    fn eq(&self, other: &Self) -> bool {
        self.table.id == other.table.id && self.columns == other.columns && self.scan_id == other.scan_id
    }
}

impl Eq for Get {}

impl Hash for Get {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.table.id.hash(state);
        self.columns.hash(state);
        self.scan_id.hash(state);
    }
}

impl OperatorCore for Get {
    fn kind_id(&self) -> &'static str {
        "Get"
    }

    fn arity(&self) -> Option<usize> {
        Some(0)
    }

    fn equals(&self, other: &dyn Any) -> bool {
        equals_by_value(self, other)
    }

    fn op_hash(&self) -> u64 {
        hash_by_value("Get", self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl LogicalOperator for Get {
    fn derive_logical_props(&self, _children: &[&GroupProps]) -> LogicalProps {
        let mut props = LogicalProps::with_columns(self.columns.iter().copied().collect());
        if let Some(scan_id) = self.partition_scan() {
            props.partition_consumers.insert(scan_id);
        }
        props
    }

    fn derive_statistics(&self, input: &StatsInput<'_>) -> Result<Statistics> {
        let available: ColumnSet = self.columns.iter().copied().collect();
        Ok(self.table.statistics(&input.required.intersection(&available)))
    }
}

// ---- Select ----

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Select;

impl OperatorCore for Select {
    fn kind_id(&self) -> &'static str {
        "Select"
    }

    fn arity(&self) -> Option<usize> {
        Some(2)
    }

    fn equals(&self, other: &dyn Any) -> bool {
        equals_by_value(self, other)
    }

    fn op_hash(&self) -> u64 {
        hash_by_value("Select", self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl LogicalOperator for Select {
    fn derive_logical_props(&self, children: &[&GroupProps]) -> LogicalProps {
        relational(children, 0)
    }

    fn derive_statistics(&self, input: &StatsInput<'_>) -> Result<Statistics> {
        let child = child_stats(input, 0);
        let predicate = child_predicate(input, 1);
        Ok(derive_filter_stats(&child, predicate.selectivity(&child)))
    }
}

// ---- InnerJoin ----

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct InnerJoin;

impl OperatorCore for InnerJoin {
    fn kind_id(&self) -> &'static str {
        "InnerJoin"
    }

    fn arity(&self) -> Option<usize> {
        Some(3)
    }

    fn equals(&self, other: &dyn Any) -> bool {
        equals_by_value(self, other)
    }

    fn op_hash(&self) -> u64 {
        hash_by_value("InnerJoin", self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl LogicalOperator for InnerJoin {
    fn derive_logical_props(&self, children: &[&GroupProps]) -> LogicalProps {
        let outer = relational(children, 0);
        let inner = relational(children, 1);
        let mut partition_consumers = outer.partition_consumers.clone();
        partition_consumers.extend(inner.partition_consumers.iter().copied());
        LogicalProps {
            output_columns: outer.output_columns.union(&inner.output_columns),
            outer_references: outer.outer_references.union(&inner.outer_references),
            max_card: outer.max_card.times(&inner.max_card),
            join_depth: outer.join_depth + inner.join_depth + 1,
            partition_consumers,
        }
    }

    fn is_join(&self) -> bool {
        true
    }

    fn derive_statistics(&self, input: &StatsInput<'_>) -> Result<Statistics> {
        let outer = child_stats(input, 0);
        let inner = child_stats(input, 1);
        let predicate = child_predicate(input, 2);
        let outer_cols = input.child_props.first().and_then(|p| p.relational()).map(|p| &p.output_columns);
        let inner_cols = input.child_props.get(1).and_then(|p| p.relational()).map(|p| &p.output_columns);
        let keys = match (outer_cols, inner_cols) {
            (Some(o), Some(i)) => predicate.equi_join_keys(o, i),
            _ => Vec::new(),
        };
        let joined = derive_join_stats(&outer, &inner, &keys);

        let residual: Vec<Expr> = predicate
            .conjuncts()
            .into_iter()
            .filter(|c| !is_key_conjunct(c, &keys))
            .cloned()
            .collect();
        if residual.is_empty() {
            return Ok(joined);
        }
        let residual = Expr::and(residual);
        Ok(derive_filter_stats(&joined, residual.selectivity(&joined)))
    }
}

fn is_key_conjunct(conjunct: &Expr, keys: &[(ColRef, ColRef)]) -> bool {
    let cols = conjunct.columns();
    matches!(conjunct, Expr::Compare { .. })
        && cols.len() == 2
        && keys.iter().any(|(o, i)| cols.contains(*o) && cols.contains(*i))
}

// ---- GbAgg ----

/// Grouping aggregate. Each aggregate produces one new output column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GbAgg {
    pub grouping: Vec<ColRef>,
    pub aggregates: Vec<ColRef>,
}

impl GbAgg {
    pub fn new(grouping: &[u32], aggregates: &[u32]) -> Self {
        Self {
            grouping: grouping.iter().copied().map(ColRef).collect(),
            aggregates: aggregates.iter().copied().map(ColRef).collect(),
        }
    }

    pub fn is_global(&self) -> bool {
        self.grouping.is_empty()
    }
}

impl OperatorCore for GbAgg {
    fn kind_id(&self) -> &'static str {
        "GbAgg"
    }

    fn arity(&self) -> Option<usize> {
        Some(1)
    }

    fn equals(&self, other: &dyn Any) -> bool {
        equals_by_value(self, other)
    }

    fn op_hash(&self) -> u64 {
        hash_by_value("GbAgg", self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl LogicalOperator for GbAgg {
    fn derive_logical_props(&self, children: &[&GroupProps]) -> LogicalProps {
        let child = relational(children, 0);
        LogicalProps {
            output_columns: self.grouping.iter().chain(&self.aggregates).copied().collect(),
            outer_references: child.outer_references,
            max_card: if self.is_global() { MaxCard::at_most(1) } else { child.max_card },
            join_depth: child.join_depth,
            partition_consumers: child.partition_consumers,
        }
    }

    fn required_stat_columns(&self, _required: &ColumnSet, child: usize, children: &[&GroupProps]) -> ColumnSet {
        let available = relational(children, child).output_columns;
        self.grouping.iter().copied().filter(|c| available.contains(*c)).collect()
    }

    fn derive_statistics(&self, input: &StatsInput<'_>) -> Result<Statistics> {
        let child = child_stats(input, 0);
        let grouped = derive_aggregate_stats(&child, &self.grouping);
        let rows = grouped.rows();
        Ok(self
            .aggregates
            .iter()
            .filter(|c| input.required.contains(**c))
            .fold(grouped, |stats, c| {
                stats.with_column(*c, ColumnStatistics::new(rows, DEFAULT_COLUMN_WIDTH))
            }))
    }
}

// ---- constructors ----

pub fn get(table: &Arc<TableDescriptor>) -> Operator {
    Operator::logical(Get::new(Arc::clone(table)))
}

pub fn select() -> Operator {
    Operator::logical(Select)
}

pub fn inner_join() -> Operator {
    Operator::logical(InnerJoin)
}

pub fn gb_agg(grouping: &[u32], aggregates: &[u32]) -> Operator {
    Operator::logical(GbAgg::new(grouping, aggregates))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scalar::{predicate, CompareOp};
    use cascades_core::properties::ScalarProps;

    fn table(id: u32, rows: f64, cols: &[(u32, f64)]) -> Arc<TableDescriptor> {
        let t = cols.iter().fold(TableDescriptor::new(id, format!("t{}", id), rows), |t, (c, ndv)| {
            t.with_column(*c, format!("c{}", c), *ndv, 4.0)
        });
        Arc::new(t)
    }

    fn input<'a>(
        required: &'a ColumnSet,
        logical: &'a LogicalProps,
        children: &'a [Option<Arc<Statistics>>],
        child_props: &'a [&'a GroupProps],
        scalars: &'a [Option<Operator>],
    ) -> StatsInput<'a> {
        StatsInput {
            required,
            logical,
            children,
            child_props,
            scalars,
        }
    }

    #[test]
    fn test_get_equality_ignores_descriptor_identity() {
        let a = Get::new(table(1, 10.0, &[(1, 10.0)]));
        let b = Get::new(table(1, 99.0, &[(1, 10.0)]));
        assert_eq!(a, b);
        assert_eq!(a.op_hash(), b.op_hash());
        assert_ne!(a, b.clone().with_scan_id(3));
    }

    #[test]
    fn test_partitioned_get_registers_consumer() {
        let t = Arc::new(
            TableDescriptor::new(1, "sales", 100.0)
                .with_column(1, "region", 4.0, 4.0)
                .partitioned_by(&[1]),
        );
        let props = Get::new(Arc::clone(&t)).with_scan_id(7).derive_logical_props(&[]);
        assert!(props.partition_consumers.contains(&7));
        assert!(Get::new(t).derive_logical_props(&[]).partition_consumers.is_empty());
    }

    #[test]
    fn test_join_props_and_stats() {
        let outer = GroupProps::Relational(LogicalProps::with_columns(ColumnSet::from([1, 2])));
        let inner = GroupProps::Relational(LogicalProps::with_columns(ColumnSet::from([3])));
        let pred_props = GroupProps::Scalar(ScalarProps::default());
        let children = [&outer, &inner, &pred_props];
        let props = InnerJoin.derive_logical_props(&children);
        assert_eq!(props.output_columns, ColumnSet::from([1, 2, 3]));
        assert_eq!(props.join_depth, 1);

        let outer_stats = Statistics::new(1000.0)
            .with_column(ColRef(1), ColumnStatistics::new(100.0, 4.0))
            .with_column(ColRef(2), ColumnStatistics::new(10.0, 4.0));
        let inner_stats = Statistics::new(50.0).with_column(ColRef(3), ColumnStatistics::new(50.0, 4.0));
        let stats_in = [Some(Arc::new(outer_stats)), Some(Arc::new(inner_stats)), None];
        let scalars = [
            None,
            None,
            Some(predicate(Expr::and(vec![
                Expr::col_eq(3, 1),
                Expr::eq(Expr::col(2), Expr::int(1)),
            ]))),
        ];
        let required = ColumnSet::from([1, 2, 3]);
        let stats = InnerJoin
            .derive_statistics(&input(&required, &props, &stats_in, &children, &scalars))
            .unwrap();
        // 1000 * 50 / 100, then the residual equality keeps a tenth
        assert!((stats.rows() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_select_applies_predicate_selectivity() {
        let rel = GroupProps::Relational(LogicalProps::with_columns(ColumnSet::from([1])));
        let pred_props = GroupProps::Scalar(ScalarProps::default());
        let children = [&rel, &pred_props];
        let child = Statistics::new(900.0).with_column(ColRef(1), ColumnStatistics::new(90.0, 4.0));
        let stats_in = [Some(Arc::new(child)), None];
        let range = Expr::compare(CompareOp::Lt, Expr::col(1), Expr::int(5));
        let scalars = [None, Some(predicate(range))];
        let logical = Select.derive_logical_props(&children);
        let required = ColumnSet::from([1]);
        let stats = Select
            .derive_statistics(&input(&required, &logical, &stats_in, &children, &scalars))
            .unwrap();
        assert!((stats.rows() - 300.0).abs() < 1e-9);
    }

    #[test]
    fn test_global_aggregate_is_single_row() {
        let rel = GroupProps::Relational(LogicalProps::with_columns(ColumnSet::from([1, 2])));
        let children = [&rel];
        let agg = GbAgg::new(&[], &[10]);
        let props = agg.derive_logical_props(&children);
        assert!(props.max_card.at_most_one());
        assert_eq!(props.output_columns, ColumnSet::from([10]));

        let stats_in = [Some(Arc::new(Statistics::new(500.0)))];
        let required = ColumnSet::from([10]);
        let stats = agg.derive_statistics(&input(&required, &props, &stats_in, &children, &[])).unwrap();
        assert_eq!(stats.rows(), 1.0);
        assert!(stats.column(ColRef(10)).is_some());
    }
}
