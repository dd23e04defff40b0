//! Minimal operator catalogue for unit tests.

use crate::column::{ColRef, ColumnSet};
use crate::context::CostContextParts;
use crate::cost::{Cost, CostModel, CostingInputs};
use crate::enforcer::EnforcerFactory;
use crate::error::Result;
use crate::handle::ExprHandle;
use crate::memo::{CostCtxId, GroupExprId, GroupId, Memo, OptCtxId};
use crate::operator::{
    equals_by_value, hash_by_value, EnforcerKind, LogicalOperator, MotionKind, Operator, OperatorCore,
    PhysicalOperator, ScalarOperator, StatPromise, StatsInput,
};
use crate::properties::{
    DerivedPlanProps, DistributionSpec, Enforced, GroupProps, LogicalProps, OrderSpec, PartitionPropagationSpec,
    ReqdPlanProps, RewindabilitySpec, ScalarProps,
};
use crate::stats::{self, ColumnStatistics, Statistics};
use std::any::Any;
use std::sync::Arc;

macro_rules! core_by_value {
    ($kind:literal, $arity:expr) => {
        fn kind_id(&self) -> &'static str {
            $kind
        }

        fn arity(&self) -> Option<usize> {
            $arity
        }

        fn equals(&self, other: &dyn Any) -> bool {
            equals_by_value(self, other)
        }

        fn op_hash(&self) -> u64 {
            hash_by_value($kind, self)
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    };
}

pub fn table_rows(table: u32) -> f64 {
    100.0 * f64::from(table + 1)
}

fn relational<'a>(children: &'a [&GroupProps]) -> impl Iterator<Item = &'a LogicalProps> {
    children.iter().filter_map(|c| c.relational())
}

// ---- logical ----

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TestGet {
    pub table: u32,
    pub columns: Vec<u32>,
    pub promise: StatPromise,
    pub filtered: bool,
}

impl OperatorCore for TestGet {
    core_by_value!("TestGet", Some(0));
}

impl LogicalOperator for TestGet {
    fn derive_logical_props(&self, _children: &[&GroupProps]) -> LogicalProps {
        LogicalProps::with_columns(self.columns.iter().copied().map(ColRef).collect())
    }

    fn stat_promise(&self) -> StatPromise {
        self.promise
    }

    fn derive_statistics(&self, input: &StatsInput<'_>) -> Result<Statistics> {
        let rows = table_rows(self.table);
        Ok(input.required.iter().fold(Statistics::new(rows), |s, c| {
            s.with_column(c, ColumnStatistics::new(rows / 2.0, 4.0))
        }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct TestJoin;

impl OperatorCore for TestJoin {
    core_by_value!("TestJoin", Some(2));
}

impl LogicalOperator for TestJoin {
    fn derive_logical_props(&self, children: &[&GroupProps]) -> LogicalProps {
        let mut props = LogicalProps::default();
        for child in relational(children) {
            props.output_columns.extend(&child.output_columns);
            props.join_depth += child.join_depth;
        }
        props.join_depth += 1;
        props
    }

    fn is_join(&self) -> bool {
        true
    }

    fn derive_statistics(&self, input: &StatsInput<'_>) -> Result<Statistics> {
        let child = |i: usize| input.children.get(i).cloned().flatten().unwrap_or_else(|| Arc::new(Statistics::empty()));
        Ok(stats::derive_join_stats(&child(0), &child(1), &[]))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct TestUnionAll;

impl OperatorCore for TestUnionAll {
    core_by_value!("TestUnionAll", None);

    fn is_input_order_sensitive(&self) -> bool {
        false
    }
}

impl LogicalOperator for TestUnionAll {
    fn derive_logical_props(&self, children: &[&GroupProps]) -> LogicalProps {
        relational(children).next().cloned().unwrap_or_default()
    }

    fn derive_statistics(&self, input: &StatsInput<'_>) -> Result<Statistics> {
        let rows = (0..input.children.len()).map(|c| input.child_rows(c)).sum();
        Ok(Statistics::new(rows))
    }
}

// ---- scalar ----

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TestPredicate {
    pub columns: Vec<u32>,
    pub conjuncts: usize,
}

impl OperatorCore for TestPredicate {
    core_by_value!("TestPredicate", Some(0));
}

impl ScalarOperator for TestPredicate {
    fn derive_scalar_props(&self, _children: &[&GroupProps]) -> ScalarProps {
        ScalarProps {
            used_columns: self.columns.iter().copied().map(ColRef).collect(),
            conjuncts: self.conjuncts,
        }
    }
}

// ---- physical ----

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TestScan {
    pub table: u32,
    pub columns: Vec<u32>,
    /// Hash key of the delivered distribution; singleton when `None`.
    pub hashed_on: Option<u32>,
}

impl TestScan {
    pub fn new(table: u32, columns: &[u32]) -> Self {
        Self {
            table,
            columns: columns.to_vec(),
            hashed_on: None,
        }
    }
}

impl OperatorCore for TestScan {
    core_by_value!("TestScan", Some(0));
}

impl PhysicalOperator for TestScan {
    fn derive_distribution(&self, _handle: &ExprHandle<'_>) -> DistributionSpec {
        self.hashed_on
            .map_or(DistributionSpec::Singleton, |c| DistributionSpec::hashed(vec![ColRef(c)]))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct TestPhysJoin;

impl OperatorCore for TestPhysJoin {
    core_by_value!("TestPhysJoin", Some(2));
}

impl PhysicalOperator for TestPhysJoin {
    fn is_join(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TestSort {
    pub order: OrderSpec,
}

impl OperatorCore for TestSort {
    core_by_value!("TestSort", Some(1));
}

impl PhysicalOperator for TestSort {
    fn required_distribution(
        &self,
        _handle: &ExprHandle<'_>,
        required: &DistributionSpec,
        _child: usize,
        _siblings: &[Arc<DerivedPlanProps>],
        _request: usize,
    ) -> DistributionSpec {
        required.clone()
    }

    fn derive_order(&self, _handle: &ExprHandle<'_>) -> OrderSpec {
        self.order.clone()
    }

    fn enforcer_kind(&self) -> Option<EnforcerKind> {
        Some(EnforcerKind::Sort)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct TestGather;

impl OperatorCore for TestGather {
    core_by_value!("TestGather", Some(1));
}

impl PhysicalOperator for TestGather {
    fn derive_distribution(&self, _handle: &ExprHandle<'_>) -> DistributionSpec {
        DistributionSpec::Singleton
    }

    fn enforcer_kind(&self) -> Option<EnforcerKind> {
        Some(EnforcerKind::Motion(MotionKind::Gather))
    }
}

// ---- constructors ----

pub fn scan(table: u32, cols: &[u32]) -> Operator {
    Operator::logical(TestGet {
        table,
        columns: cols.to_vec(),
        promise: StatPromise::High,
        filtered: false,
    })
}

/// A different leaf operator producing the same columns as `scan`.
pub fn filter_scan(table: u32, cols: &[u32]) -> Operator {
    Operator::logical(TestGet {
        table,
        columns: cols.to_vec(),
        promise: StatPromise::Medium,
        filtered: true,
    })
}

/// A scan that cannot derive statistics.
pub fn opaque_scan(table: u32) -> Operator {
    Operator::logical(TestGet {
        table,
        columns: vec![1],
        promise: StatPromise::None,
        filtered: false,
    })
}

pub fn phys_scan(table: u32, cols: &[u32]) -> Operator {
    Operator::physical(TestScan::new(table, cols))
}

pub fn hashed_scan(table: u32, cols: &[u32], key: u32) -> Operator {
    Operator::physical(TestScan {
        hashed_on: Some(key),
        ..TestScan::new(table, cols)
    })
}

pub fn join() -> Operator {
    Operator::logical(TestJoin)
}

pub fn phys_join() -> Operator {
    Operator::physical(TestPhysJoin)
}

pub fn union_all() -> Operator {
    Operator::logical(TestUnionAll)
}

pub fn predicate(cols: &[u32], conjuncts: usize) -> Operator {
    Operator::scalar(TestPredicate {
        columns: cols.to_vec(),
        conjuncts,
    })
}

// ---- cost model and enforcers ----

/// One unit per node, plus rows times width in thousandths, plus the children.
pub struct TestCostModel;

impl CostModel for TestCostModel {
    fn cost(&self, _handle: &ExprHandle<'_>, inputs: &CostingInputs) -> Cost {
        Cost::new(1.0 + inputs.rows * inputs.width / 1000.0 + inputs.children_cost())
    }

    fn fixed_node_cost(&self) -> Cost {
        Cost::new(1.0)
    }
}

pub struct TestEnforcers;

impl EnforcerFactory for TestEnforcers {
    fn sort(&self, order: &OrderSpec) -> Option<Operator> {
        Some(Operator::physical(TestSort { order: order.clone() }))
    }

    fn motions(&self, required: &Enforced<DistributionSpec>, _derived: &DistributionSpec, _order: &OrderSpec) -> Vec<Operator> {
        match required.spec {
            DistributionSpec::Singleton => vec![Operator::physical(TestGather)],
            _ => vec![],
        }
    }

    fn spool(&self, _required: &RewindabilitySpec) -> Option<Operator> {
        None
    }

    fn partition_selectors(&self, _required: &PartitionPropagationSpec, _derived: &PartitionPropagationSpec) -> Vec<Operator> {
        vec![]
    }
}

// ---- memo fixtures ----

/// A logical scan of `table` over column 1 and its physical implementation.
pub fn scan_alternative(memo: &Memo, table: u32) -> (GroupExprId, GroupId) {
    let group = memo.insert(scan(table, &[1]), vec![], None, None).unwrap().group;
    let gexpr = memo.insert(phys_scan(table, &[1]), vec![], Some(group), None).unwrap().gexpr;
    (gexpr, group)
}

/// Install a costed best plan for `group` under "no requirement" with the given
/// output row estimate.
fn install_best(memo: &Memo, gexpr: GroupExprId, group: GroupId, rows: f64, children: Vec<Option<OptCtxId>>) -> OptCtxId {
    let reqd = Arc::new(ReqdPlanProps::any(ColumnSet::new()));
    let oc = memo.lookup_or_create_context(group, &reqd, 0).0;
    let cc = memo.publish_cost_context(CostContextParts {
        gexpr,
        opt_ctx: oc,
        request: 0,
        child_contexts: children,
        derived: Some(Arc::new(DerivedPlanProps::default())),
        stats: Some(Arc::new(Statistics::new(rows))),
        cost: Cost::new(rows),
        pruned: false,
    });
    memo.update_best(&cc);
    oc
}

pub struct TwoJoins {
    /// The join whose inner input is a plain scan.
    pub shallow_inner: CostCtxId,
    /// The join whose inner input is itself a join.
    pub deep_inner: CostCtxId,
}

/// Two equal-cost join plans in one group whose inputs all estimate `rows` rows.
pub fn two_join_plans(memo: &Memo, rows: f64) -> TwoJoins {
    let (scan_a, a) = scan_alternative(memo, 1);
    let (scan_b, b) = scan_alternative(memo, 2);
    let (scan_c, c) = scan_alternative(memo, 3);
    let bc = memo.insert(join(), vec![b, c], None, None).unwrap().group;
    let bc_phys = memo.insert(phys_join(), vec![b, c], Some(bc), None).unwrap().gexpr;
    let top = memo.insert(join(), vec![a, bc], None, None).unwrap().group;

    let oc_b = install_best(memo, scan_b, b, rows, vec![]);
    let oc_c = install_best(memo, scan_c, c, rows, vec![]);
    let oc_a = install_best(memo, scan_a, a, rows, vec![]);
    let oc_bc = install_best(memo, bc_phys, bc, rows, vec![Some(oc_b), Some(oc_c)]);

    let top_oc = memo
        .lookup_or_create_context(top, &Arc::new(ReqdPlanProps::any(ColumnSet::new())), 0)
        .0;
    let deep = memo.insert(phys_join(), vec![a, bc], Some(top), None).unwrap().gexpr;
    let shallow = memo.insert(phys_join(), vec![bc, a], Some(top), None).unwrap().gexpr;
    let publish = |gexpr, children| {
        memo.publish_cost_context(CostContextParts {
            gexpr,
            opt_ctx: top_oc,
            request: 0,
            child_contexts: children,
            derived: Some(Arc::new(DerivedPlanProps::default())),
            stats: Some(Arc::new(Statistics::new(rows))),
            cost: Cost::new(10.0 * rows),
            pruned: false,
        })
        .id()
    };
    TwoJoins {
        deep_inner: publish(deep, vec![Some(oc_a), Some(oc_bc)]),
        shallow_inner: publish(shallow, vec![Some(oc_bc), Some(oc_a)]),
    }
}
