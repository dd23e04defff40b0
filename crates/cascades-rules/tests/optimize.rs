//! End-to-end optimization with the reference catalogue.
//!
//! These tests build logical trees directly in the memo, run the full search with
//! the default rules, the GPDB cost model and the built-in enforcers, and check
//! the shape and cost of the extracted plan.
//!
//! ## What These Tests Verify
//! - Index scans satisfy order requirements without a Sort
//! - Distribution requirements are met with the right motion
//! - Predicate pushdown turns a filtered cross product into a hash join
//! - Join associativity only ever improves the best plan
//! - Branch-and-bound pruning never changes the best cost
//! - Concurrent optimization of one memo converges on the sequential result
//! - Partition selectors are placed below motions

use cascades_core::cancel::AbortSignal;
use cascades_core::column::{ColRef, ColumnSet};
use cascades_core::config::OptimizerConfig;
use cascades_core::error::OptimizerError;
use cascades_core::memo::{GroupId, Memo};
use cascades_core::operator::Operator;
use cascades_core::optimizer::Optimizer;
use cascades_core::plan::PlanNode;
use cascades_core::properties::{
    DistributionSpec, MatchDiscipline, OrderSpec, PartIndexEntry, PartIndexMap, PartitionPropagationSpec,
    ReqdPlanProps,
};
use cascades_core::rule::RuleRegistry;
use cascades_core::search::CascadesSearch;
use cascades_rules::catalog::{Catalog, InMemoryCatalog, TableDescriptor};
use cascades_rules::cost_model::GpdbCostModel;
use cascades_rules::enforcer::Enforcers;
use cascades_rules::logical::{gb_agg, get, inner_join, select, Get};
use cascades_rules::scalar::{predicate, Expr};
use cascades_rules::{default_rule_registry, impl_join, impl_scan, join_commutativity};
use proptest::prelude::*;
use std::sync::Arc;
use std::thread;
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Table `id` with 4-byte columns of the given NDVs.
fn table(id: u32, rows: f64, cols: &[(u32, f64)]) -> TableDescriptor {
    cols.iter()
        .fold(TableDescriptor::new(id, format!("t{}", id), rows), |t, (c, ndv)| {
            t.with_column(*c, format!("c{}", c), *ndv, 4.0)
        })
}

fn insert_get(memo: &Memo, table: TableDescriptor) -> GroupId {
    memo.insert(get(&Arc::new(table)), vec![], None, None).unwrap().group
}

fn insert_join(memo: &Memo, outer: GroupId, inner: GroupId, expr: Expr) -> GroupId {
    let pred = memo.insert(predicate(expr), vec![], None, None).unwrap().group;
    memo.insert(inner_join(), vec![outer, inner, pred], None, None).unwrap().group
}

fn insert_select(memo: &Memo, input: GroupId, expr: Expr) -> GroupId {
    let pred = memo.insert(predicate(expr), vec![], None, None).unwrap().group;
    memo.insert(select(), vec![input, pred], None, None).unwrap().group
}

fn search_with(memo: Memo, rules: RuleRegistry, config: OptimizerConfig) -> CascadesSearch {
    CascadesSearch::new(
        memo,
        Arc::new(rules),
        Arc::new(GpdbCostModel::default()),
        Arc::new(Enforcers::new()),
        config,
    )
}

fn search(memo: Memo) -> CascadesSearch {
    search_with(memo, default_rule_registry(), OptimizerConfig::default())
}

fn singleton(cols: &[u32]) -> ReqdPlanProps {
    ReqdPlanProps::any(cols.iter().copied().map(ColRef).collect::<ColumnSet>())
        .with_distribution(DistributionSpec::Singleton, MatchDiscipline::Satisfy)
}

/// `((fact ⋈ d1) ⋈ d2) ⋈ d3` written in query order, fact table first.
fn star(memo: &Memo, fact_rows: f64, dim_rows: [f64; 3]) -> GroupId {
    let mut catalog = InMemoryCatalog::new();
    catalog.add_table(table(1, fact_rows, &[(1, 100.0), (2, 10.0), (3, 1000.0)]));
    for (i, rows) in dim_rows.iter().enumerate() {
        let id = i as u32 + 2;
        catalog.add_table(table(id, *rows, &[(id + 2, *rows)]));
    }
    let scan = |name: &str| {
        let t = catalog.table(name).unwrap();
        memo.insert(get(&t), vec![], None, None).unwrap().group
    };
    let (fact, d1, d2, d3) = (scan("t1"), scan("t2"), scan("t3"), scan("t4"));
    let j1 = insert_join(memo, fact, d1, Expr::col_eq(1, 4));
    let j2 = insert_join(memo, j1, d2, Expr::col_eq(2, 5));
    insert_join(memo, j2, d3, Expr::col_eq(3, 6))
}

const STAR_COLUMNS: [u32; 6] = [1, 2, 3, 4, 5, 6];

fn assert_close(a: f64, b: f64) {
    assert!((a - b).abs() <= 1e-9 * a.abs().max(1.0), "{} != {}", a, b);
}

fn contains(plan: &PlanNode, kind: &str) -> bool {
    plan.kinds().iter().any(|k| *k == kind)
}

// ---------------------------------------------------------------------------
// Scans and enforcers
// ---------------------------------------------------------------------------

#[test]
fn test_index_scan_satisfies_order_without_sort() {
    init_tracing();
    let memo = Memo::new();
    let root = insert_get(&memo, table(1, 10_000.0, &[(1, 10_000.0), (2, 50.0)]).with_index("t1_pk", &[1]));
    let reqd = Arc::new(singleton(&[1, 2]).with_order(OrderSpec::ascending(&[ColRef(1)])));

    let plan = search(memo).optimize(root, &reqd).unwrap();
    assert!(contains(&plan, "IndexScan"), "{}", plan);
    assert!(!contains(&plan, "Sort"), "{}", plan);
    assert_eq!(plan.kinds()[0], "GatherMerge");
}

#[test]
fn test_sort_added_without_index() {
    let memo = Memo::new();
    let root = insert_get(&memo, table(1, 10_000.0, &[(1, 10_000.0), (2, 50.0)]));
    let reqd = Arc::new(singleton(&[1, 2]).with_order(OrderSpec::ascending(&[ColRef(2)])));

    let plan = search(memo).optimize(root, &reqd).unwrap();
    assert!(contains(&plan, "Sort"), "{}", plan);
    let derived = plan.derived.as_ref().unwrap();
    assert!(derived.distribution.is_singleton());
    assert_eq!(derived.order, OrderSpec::ascending(&[ColRef(2)]));
}

#[test]
fn test_exact_hash_requirement_redistributes() {
    let memo = Memo::new();
    let root = insert_get(&memo, table(1, 1000.0, &[(1, 100.0), (2, 10.0)]));
    let reqd = Arc::new(
        ReqdPlanProps::any(ColumnSet::from([1, 2]))
            .with_distribution(DistributionSpec::hashed(vec![ColRef(1)]), MatchDiscipline::Exact),
    );

    let plan = search(memo).optimize(root, &reqd).unwrap();
    assert_eq!(plan.kinds(), vec!["Redistribute", "TableScan"]);
}

#[test]
fn test_global_aggregate_gathers_its_input() {
    let memo = Memo::new();
    let input = insert_get(&memo, table(1, 1000.0, &[(1, 100.0)]));
    let root = memo.insert(gb_agg(&[], &[9]), vec![input], None, None).unwrap().group;
    let reqd = Arc::new(singleton(&[9]));

    let plan = search(memo).optimize(root, &reqd).unwrap();
    let kinds = plan.kinds();
    assert!(matches!(kinds[0], "HashAgg" | "StreamAgg"), "{}", plan);
    assert_eq!(kinds[1], "Gather");
    assert_eq!(plan.stats.as_ref().unwrap().rows(), 1.0);
}

// ---------------------------------------------------------------------------
// Joins
// ---------------------------------------------------------------------------

#[test]
fn test_pushdown_turns_cross_product_into_hash_join() {
    let memo = Memo::new();
    let a = insert_get(&memo, table(1, 1000.0, &[(1, 1000.0)]));
    let b = insert_get(&memo, table(2, 1000.0, &[(2, 1000.0)]));
    let cross = insert_join(&memo, a, b, Expr::true_());
    let root = insert_select(&memo, cross, Expr::col_eq(1, 2));

    let plan = search(memo).optimize(root, &Arc::new(singleton(&[1, 2]))).unwrap();
    assert!(contains(&plan, "HashJoin"), "{}", plan);
    assert!(!contains(&plan, "NLJoin"), "{}", plan);
    assert!(!contains(&plan, "Filter"), "{}", plan);
}

#[test]
fn test_associativity_never_worsens_best_plan() {
    init_tracing();
    let mut pairwise = RuleRegistry::new();
    pairwise.add_rule(Box::new(join_commutativity::JoinCommutativityRule));
    pairwise.add_rule(Box::new(impl_scan::ImplTableScanRule));
    pairwise.add_rule(Box::new(impl_join::ImplHashJoinRule));
    pairwise.add_rule(Box::new(impl_join::ImplNestedLoopJoinRule));

    let memo = Memo::new();
    let root = star(&memo, 1_000_000.0, [100.0, 10.0, 1000.0]);
    let mut narrow = search_with(memo, pairwise, OptimizerConfig::default());
    let narrow_plan = narrow.optimize(root, &Arc::new(singleton(&STAR_COLUMNS))).unwrap();

    let memo = Memo::new();
    let root = star(&memo, 1_000_000.0, [100.0, 10.0, 1000.0]);
    let mut full = search(memo);
    let full_plan = full.optimize(root, &Arc::new(singleton(&STAR_COLUMNS))).unwrap();

    assert!(full.memo.num_groups() > narrow.memo.num_groups());
    assert!(full_plan.cost.total <= narrow_plan.cost.total * (1.0 + 1e-9));
    assert_eq!(full_plan.kinds().iter().filter(|k| **k == "HashJoin").count(), 3);
}

#[test]
fn test_pruning_keeps_best_cost() {
    let best = |pruning: bool| {
        let memo = Memo::new();
        let root = star(&memo, 100_000.0, [1000.0, 50.0, 5.0]);
        let config = OptimizerConfig {
            enable_space_pruning: pruning,
            ..OptimizerConfig::default()
        };
        search_with(memo, default_rule_registry(), config)
            .optimize(root, &Arc::new(singleton(&STAR_COLUMNS)))
            .unwrap()
            .cost
            .total
    };
    assert_close(best(true), best(false));
}

#[test]
fn test_concurrent_optimize_matches_search() {
    let memo = Memo::new();
    let root = star(&memo, 100_000.0, [1000.0, 50.0, 5.0]);
    let reqd = Arc::new(singleton(&STAR_COLUMNS));
    let mut search = search(memo);
    let expected = search.optimize(root, &reqd).unwrap().cost;

    // a fresh stage over the explored memo, optimized by several threads at once
    let root = search.memo.resolve(root);
    let config = OptimizerConfig::default();
    let abort = AbortSignal::new();
    let cost_model = GpdbCostModel::default();
    let enforcers = Enforcers::new();
    let optimizer = Optimizer::new(&search.memo, &cost_model, &enforcers, &config, &abort).with_stage(1);
    let results = thread::scope(|s| {
        let handles: Vec<_> = (0..6)
            .map(|_| s.spawn(|| optimizer.optimize(root, &reqd).unwrap()))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect::<Vec<_>>()
    });
    for result in results {
        let cost = search.memo.cost_context(result.unwrap()).cost();
        assert_close(cost.total, expected.total);
    }
}

#[test]
fn test_abort_before_search() {
    let memo = Memo::new();
    let root = star(&memo, 1000.0, [10.0, 10.0, 10.0]);
    let abort = AbortSignal::new();
    abort.request_abort();
    let mut search = search(memo).with_abort_signal(abort);
    assert_eq!(
        search.optimize(root, &Arc::new(singleton(&STAR_COLUMNS))).unwrap_err(),
        OptimizerError::AbortRequested
    );
}

// ---------------------------------------------------------------------------
// Partitioned scans
// ---------------------------------------------------------------------------

fn partitioned_scan(memo: &Memo) -> GroupId {
    let t = Arc::new(table(1, 1000.0, &[(1, 12.0), (2, 1000.0)]).partitioned_by(&[1]));
    let scan = Get::new(t).with_scan_id(1);
    memo.insert(Operator::logical(scan), vec![], None, None).unwrap().group
}

fn partition_requirement() -> PartitionPropagationSpec {
    let mut map = PartIndexMap::new();
    map.insert(1, PartIndexEntry::consumer(1, vec![ColRef(1)], Some(0)));
    PartitionPropagationSpec::new(map, Default::default())
}

#[test]
fn test_partition_selector_resolves_consumer() {
    let memo = Memo::new();
    let root = partitioned_scan(&memo);
    let reqd = Arc::new(ReqdPlanProps::any(ColumnSet::from([1, 2])).with_partition(partition_requirement()));

    let plan = search(memo).optimize(root, &reqd).unwrap();
    assert_eq!(plan.kinds(), vec!["PartitionSelector", "TableScan"]);
}

#[test]
fn test_partition_selector_stays_below_motion() {
    let memo = Memo::new();
    let root = partitioned_scan(&memo);
    let reqd = Arc::new(singleton(&[1, 2]).with_partition(partition_requirement()));

    let plan = search(memo).optimize(root, &reqd).unwrap();
    assert_eq!(plan.kinds(), vec!["Gather", "PartitionSelector", "TableScan"]);
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn prop_pruning_is_sound(
        fact in 1_000u32..200_000,
        d1 in 1u32..5_000,
        d2 in 1u32..5_000,
        d3 in 1u32..5_000,
    ) {
        let best = |pruning: bool| {
            let memo = Memo::new();
            let root = star(&memo, f64::from(fact), [f64::from(d1), f64::from(d2), f64::from(d3)]);
            let config = OptimizerConfig {
                enable_space_pruning: pruning,
                ..OptimizerConfig::default()
            };
            search_with(memo, default_rule_registry(), config)
                .optimize(root, &Arc::new(singleton(&STAR_COLUMNS)))
                .unwrap()
                .cost
                .total
        };
        let (pruned, exhaustive) = (best(true), best(false));
        prop_assert!((pruned - exhaustive).abs() <= 1e-9 * exhaustive.max(1.0));
    }
}
