//! # Cascades Search Driver
//!
//! [`CascadesSearch`] is a sequential driver over the core. It owns the memo and runs
//! one or more search stages against the root group, returning the best plan found.
//! A parallel scheduler would drive [`Optimizer`] directly; this driver is what tests
//! and single-threaded embedders use.
//!
//! ## Stages
//!
//! Each stage goes through the same steps:
//!
//! 1. **Explore** (`explore_group`): apply transformation rules, children before
//!    parents, until no group gains an alternative. Every rule is applied at most
//!    once per alternative, so commutativity cannot ping-pong.
//! 2. **Finalize exploration**: merge groups found to be duplicates, drop statistics
//!    made stale by new logical alternatives, and derive statistics for the root's
//!    required columns (and optionally for every group still lacking them).
//! 3. **Implement** (`implement_group`): apply implementation rules to every logical
//!    alternative reachable from the root.
//! 4. **Optimize** the root under the required properties, with contexts keyed by
//!    the stage index.
//! 5. **Extract** the best plan over the stages run so far.
//!
//! The search stops after the last stage, or early once a stage's cost threshold is
//! met.
//!
//! ## Termination
//!
//! `max_iterations` bounds rule applications over the whole session and
//! `max_xform_applications` bounds transformations within a stage. Once either is
//! exhausted, or the memo reaches `max_memo_groups`, exploration stops applying
//! rules and the stage continues with what the memo already holds.

use crate::binding::{Binding, BoundExpr};
use crate::cancel::AbortSignal;
use crate::config::OptimizerConfig;
use crate::cost::CostModel;
use crate::enforcer::EnforcerFactory;
use crate::error::{OptimizerError, Result};
use crate::memo::{GroupExprId, GroupId, GroupPhase, Memo};
use crate::optimizer::Optimizer;
use crate::plan::{extract_plan, PlanNode};
use crate::properties::ReqdPlanProps;
use crate::rule::{insert_rule_result, Rule, RuleContext, RuleRegistry};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, trace};

/// The Cascades search engine.
pub struct CascadesSearch {
    /// The memo table storing all groups and expressions in the search space.
    pub memo: Memo,
    pub rule_registry: Arc<RuleRegistry>,
    pub cost_model: Arc<dyn CostModel>,
    /// Builds sort, motion, spool and partition-selector enforcers.
    pub enforcers: Arc<dyn EnforcerFactory>,
    pub config: OptimizerConfig,
    abort: AbortSignal,
    /// Rule applications across all stages.
    iterations: usize,
}

/// Transformation budget of the stage being run.
struct StageBudget {
    applied: usize,
    limit: Option<usize>,
}

impl CascadesSearch {
    pub fn new(
        memo: Memo,
        rule_registry: Arc<RuleRegistry>,
        cost_model: Arc<dyn CostModel>,
        enforcers: Arc<dyn EnforcerFactory>,
        config: OptimizerConfig,
    ) -> Self {
        Self {
            memo,
            rule_registry,
            cost_model,
            enforcers,
            config,
            abort: AbortSignal::new(),
            iterations: 0,
        }
    }

    /// Use `abort` instead of the search's own signal, so the caller can cancel.
    pub fn with_abort_signal(mut self, abort: AbortSignal) -> Self {
        self.abort = abort;
        self
    }

    pub fn abort_signal(&self) -> &AbortSignal {
        &self.abort
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Run every stage for `root_group` and return the best plan satisfying
    /// `required_props`.
    pub fn optimize(&mut self, root_group: GroupId, required_props: &Arc<ReqdPlanProps>) -> Result<PlanNode> {
        debug!(
            "Starting Cascades optimization: root_group={}, groups={}, exprs={}, stages={}",
            root_group,
            self.memo.num_groups(),
            self.memo.num_exprs(),
            self.config.num_stages()
        );
        self.memo.set_root(root_group);

        let mut best: Option<PlanNode> = None;
        for stage in 0..self.config.num_stages() {
            let stage_config = self.config.stage(stage);
            let mut budget = StageBudget {
                applied: 0,
                limit: stage_config.max_xform_applications,
            };
            debug!("Search stage {}: iterations so far={}", stage, self.iterations);

            let root = self.memo.resolve(root_group);
            self.explore_group(root, &mut budget, &mut HashSet::new())?;
            let root = self.finalize_exploration(root, required_props)?;
            self.implement_group(root, &mut HashSet::new())?;

            let optimizer = Optimizer::new(
                &self.memo,
                self.cost_model.as_ref(),
                self.enforcers.as_ref(),
                &self.config,
                &self.abort,
            )
            .with_stage(stage);
            optimizer.optimize(root, required_props)?;

            match extract_plan(&self.memo, root, required_props, stage + 1) {
                Ok(plan) => {
                    debug!("Stage {} best plan: cost={}", stage, plan.cost);
                    best = Some(plan);
                }
                Err(OptimizerError::NoPlanFound { .. }) => {
                    debug!("Stage {} found no plan", stage);
                }
                Err(e) => return Err(e),
            }

            if let (Some(threshold), Some(plan)) = (stage_config.cost_threshold, &best) {
                if plan.cost.total <= threshold {
                    debug!(
                        "Cost threshold {} met after stage {}: cost={}",
                        threshold, stage, plan.cost
                    );
                    break;
                }
            }
        }

        match best {
            Some(plan) => {
                debug!(
                    "Optimization complete: cost={}, iterations={}, groups={}",
                    plan.cost,
                    self.iterations,
                    self.memo.num_groups()
                );
                Ok(plan)
            }
            None => {
                debug!("Optimization failed: no valid plan found");
                Err(OptimizerError::no_plan(
                    self.memo.resolve(root_group),
                    required_props,
                    "no stage produced a plan",
                ))
            }
        }
    }

    fn can_apply(&self, budget: &StageBudget) -> bool {
        if self.iterations >= self.config.max_iterations {
            debug!("Hit iteration limit");
            return false;
        }
        if budget.limit.is_some_and(|limit| budget.applied >= limit) {
            debug!("Hit stage transformation limit");
            return false;
        }
        if self.memo.num_groups() >= self.config.max_memo_groups {
            debug!("Hit memo group limit");
            return false;
        }
        true
    }

    /// Explore a group: apply transformation rules to its logical alternatives until
    /// it stops growing. Child groups are explored before the parent's rules fire, so
    /// rules matching deeper patterns see complete child groups.
    ///
    /// Each group is visited once per stage. A group that gains alternatives after
    /// its visit, through a merge or a rule fired higher up, is picked up by the
    /// next stage. When the budget runs out the group goes back to the phase it had
    /// before the visit.
    fn explore_group(&mut self, group: GroupId, budget: &mut StageBudget, visited: &mut HashSet<GroupId>) -> Result<()> {
        let group = self.memo.resolve(group);
        if !visited.insert(group) {
            return Ok(());
        }
        let registry = Arc::clone(&self.rule_registry);
        let rules = registry.transformation_rules();
        let g = self.memo.group(group);
        let previous = g.phase();
        g.set_phase(GroupPhase::Exploring);
        loop {
            self.abort.check()?;
            let mut progressed = false;
            for alt in g.alternatives() {
                let gexpr = self.memo.gexpr(alt);
                if !gexpr.is_logical() {
                    continue;
                }
                for child in gexpr.children().to_vec() {
                    self.explore_group(child, budget, visited)?;
                }
                for rule in &rules {
                    if gexpr.rule_applied(rule.rule_hash()) {
                        continue;
                    }
                    if !self.can_apply(budget) {
                        g.set_phase(previous);
                        return Ok(());
                    }
                    gexpr.mark_rule_applied(rule.rule_hash());
                    budget.applied += 1;
                    progressed |= self.fire(*rule, alt, group)?;
                }
                gexpr.set_explored();
            }
            // Anything new is picked up by the next pass.
            if !progressed {
                break;
            }
        }
        g.set_phase(GroupPhase::Explored);
        trace!("Explored group {}: {} alternatives", group, g.num_alternatives());
        Ok(())
    }

    /// Apply `rule` to every binding rooted at `source`. Returns whether anything
    /// new entered the memo.
    fn fire(&mut self, rule: &dyn Rule, source: GroupExprId, group: GroupId) -> Result<bool> {
        let bindings: Vec<BoundExpr> = Binding::for_expr(&self.memo, source, rule.pattern()).collect();
        let mut inserted = false;
        for bound in bindings {
            self.abort.check()?;
            self.iterations += 1;
            trace!("Applying rule '{}' to expr {}", rule.name(), source);
            let ctx = RuleContext {
                memo: &self.memo,
                abort: &self.abort,
            };
            for result in rule.apply(&bound, &ctx)? {
                let outcome = insert_rule_result(&self.memo, group, source, rule.name(), result)?;
                inserted |= outcome.inserted;
            }
        }
        Ok(inserted)
    }

    /// Merge duplicates, reset stale statistics and derive fresh ones. Returns the
    /// root's master group.
    fn finalize_exploration(&mut self, root: GroupId, required_props: &ReqdPlanProps) -> Result<GroupId> {
        self.memo.merge_duplicates();
        let root = self.memo.resolve(root);
        self.memo.set_root(root);
        self.memo.reset_stats();
        self.memo.derive_stats(root, &required_props.columns, &self.abort)?;

        if self.config.derive_stats_for_all_groups {
            let groups: Vec<GroupId> = self.memo.group_ids().collect();
            for id in groups {
                let g = self.memo.group(id);
                if g.is_duplicate() || g.is_scalar() || g.stats().is_some() {
                    continue;
                }
                let columns = g.logical().output_columns.clone();
                match self.memo.derive_stats(id, &columns, &self.abort) {
                    Ok(_) => {}
                    Err(OptimizerError::AbortRequested) => return Err(OptimizerError::AbortRequested),
                    Err(e) => trace!("Statistics of group {} left underived: {}", id, e),
                }
            }
        }
        Ok(root)
    }

    /// Implement every group reachable from `group`, children first.
    fn implement_group(&mut self, group: GroupId, visited: &mut HashSet<GroupId>) -> Result<()> {
        let group = self.memo.resolve(group);
        if !visited.insert(group) {
            return Ok(());
        }
        let registry = Arc::clone(&self.rule_registry);
        let rules = registry.implementation_rules();
        let g = self.memo.group(group);
        g.set_phase(GroupPhase::Implementing);
        for alt in g.alternatives() {
            self.abort.check()?;
            let gexpr = self.memo.gexpr(alt);
            if !gexpr.is_logical() {
                continue;
            }
            for child in gexpr.children().to_vec() {
                self.implement_group(child, visited)?;
            }
            if gexpr.is_implemented() {
                continue;
            }
            for rule in &rules {
                if gexpr.rule_applied(rule.rule_hash()) {
                    continue;
                }
                if self.iterations >= self.config.max_iterations {
                    debug!("Hit iteration limit");
                    return Ok(());
                }
                gexpr.mark_rule_applied(rule.rule_hash());
                self.fire(*rule, alt, group)?;
            }
            gexpr.set_implemented();
        }
        g.set_phase(GroupPhase::Implemented);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::ColumnSet;
    use crate::operator::Operator;
    use crate::pattern::Pattern;
    use crate::rule::{RuleResult, RuleType};
    use crate::config::SearchStageConfig;
    use crate::testing::{self, TestCostModel, TestEnforcers, TestGet};

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

    struct ImplGet;

    impl Rule for ImplGet {
        fn name(&self) -> &str {
            "ImplGet"
        }

        fn rule_type(&self) -> RuleType {
            RuleType::Implementation
        }

        fn pattern(&self) -> Pattern {
            Pattern::kind_over_leaves("TestGet", 0)
        }

        fn apply(&self, expr: &BoundExpr, _ctx: &RuleContext<'_>) -> Result<Vec<RuleResult>> {
            let get = expr
                .op()
                .and_then(Operator::as_logical)
                .and_then(|op| op.as_any().downcast_ref::<TestGet>());
            Ok(get
                .map(|g| RuleResult::Substitution(testing::phys_scan(g.table, &g.columns), vec![]))
                .into_iter()
                .collect())
        }
    }

    struct ImplJoin;

    impl Rule for ImplJoin {
        fn name(&self) -> &str {
            "ImplJoin"
        }

        fn rule_type(&self) -> RuleType {
            RuleType::Implementation
        }

        fn pattern(&self) -> Pattern {
            Pattern::kind_over_leaves("TestJoin", 2)
        }

        fn apply(&self, expr: &BoundExpr, _ctx: &RuleContext<'_>) -> Result<Vec<RuleResult>> {
            Ok(vec![RuleResult::Substitution(testing::phys_join(), expr.child_groups())])
        }
    }

    fn registry(with_impl: bool) -> Arc<RuleRegistry> {
        let mut registry = RuleRegistry::new();
        registry.add_rule(Box::new(Commute));
        if with_impl {
            registry.add_rule(Box::new(ImplGet));
            registry.add_rule(Box::new(ImplJoin));
        }
        Arc::new(registry)
    }

    fn search(memo: Memo, config: OptimizerConfig, with_impl: bool) -> CascadesSearch {
        CascadesSearch::new(
            memo,
            registry(with_impl),
            Arc::new(TestCostModel),
            Arc::new(TestEnforcers),
            config,
        )
    }

    /// `(t1 JOIN t2) JOIN t3` over single-column tables.
    fn three_way(memo: &Memo) -> GroupId {
        let a = memo.insert(testing::scan(1, &[1]), vec![], None, None).unwrap().group;
        let b = memo.insert(testing::scan(2, &[2]), vec![], None, None).unwrap().group;
        let c = memo.insert(testing::scan(3, &[3]), vec![], None, None).unwrap().group;
        let ab = memo.insert(testing::join(), vec![a, b], None, None).unwrap().group;
        memo.insert(testing::join(), vec![ab, c], None, None).unwrap().group
    }

    fn all_columns() -> Arc<ReqdPlanProps> {
        Arc::new(ReqdPlanProps::any(ColumnSet::from([1, 2, 3])))
    }

    #[test]
    fn test_search_finds_plan() {
        let memo = Memo::new();
        let root = three_way(&memo);
        let mut search = search(memo, OptimizerConfig::default(), true);

        let plan = search.optimize(root, &all_columns()).unwrap();
        assert_eq!(plan.kinds().iter().filter(|k| **k == "TestScan").count(), 3);
        assert_eq!(plan.kinds()[0], "TestPhysJoin");
        assert!(plan.cost.total > 0.0);
        assert!(search.iterations() > 0);
        assert_eq!(search.memo.group(root).phase(), GroupPhase::Implemented);
    }

    #[test]
    fn test_commutativity_reaches_fixpoint() {
        let memo = Memo::new();
        let root = three_way(&memo);
        let mut search = search(memo, OptimizerConfig::default(), true);
        search.optimize(root, &all_columns()).unwrap();

        let logical = |g: GroupId| {
            search
                .memo
                .group(g)
                .alternatives()
                .into_iter()
                .filter(|a| search.memo.gexpr(*a).is_logical())
                .count()
        };
        assert_eq!(logical(root), 2);
        let iterations = search.iterations();
        // A second run finds every rule already applied.
        search.optimize(root, &all_columns()).unwrap();
        assert_eq!(search.iterations(), iterations);
    }

    #[test]
    fn test_stage_transformation_limit() {
        let memo = Memo::new();
        let root = three_way(&memo);
        let config = OptimizerConfig {
            stages: vec![
                SearchStageConfig {
                    max_xform_applications: Some(0),
                    ..SearchStageConfig::default()
                },
                SearchStageConfig::default(),
            ],
            ..OptimizerConfig::default()
        };
        let mut search = search(memo, config, true);

        search.optimize(root, &all_columns()).unwrap();
        // Stage 0 applied nothing; stage 1 explored fully.
        assert_eq!(search.memo.group(root).alternatives().iter().filter(|a| search.memo.gexpr(**a).is_logical()).count(), 2);
        assert!(search.memo.lookup_context(root, &all_columns(), 0).is_some());
        assert!(search.memo.lookup_context(root, &all_columns(), 1).is_some());
    }

    #[test]
    fn test_exhausted_budget_restores_group_phase() {
        let memo = Memo::new();
        let root = three_way(&memo);
        let mut search = search(memo, OptimizerConfig::default(), true);

        let mut budget = StageBudget {
            applied: 0,
            limit: Some(0),
        };
        search.explore_group(root, &mut budget, &mut HashSet::new()).unwrap();
        assert_eq!(search.memo.group(root).phase(), GroupPhase::Unexplored);
        assert_eq!(search.memo.group(root).num_alternatives(), 1);

        let mut budget = StageBudget {
            applied: 0,
            limit: None,
        };
        search.explore_group(root, &mut budget, &mut HashSet::new()).unwrap();
        assert_eq!(search.memo.group(root).phase(), GroupPhase::Explored);
        assert_eq!(search.memo.group(root).num_alternatives(), 2);
    }

    #[test]
    fn test_cost_threshold_skips_later_stages() {
        let memo = Memo::new();
        let root = three_way(&memo);
        let config = OptimizerConfig {
            stages: vec![
                SearchStageConfig {
                    cost_threshold: Some(f64::MAX),
                    ..SearchStageConfig::default()
                },
                SearchStageConfig::default(),
            ],
            ..OptimizerConfig::default()
        };
        let mut search = search(memo, config, true);
        search.optimize(root, &all_columns()).unwrap();
        assert!(search.memo.lookup_context(root, &all_columns(), 1).is_none());
    }

    #[test]
    fn test_no_implementation_rules_means_no_plan() {
        let memo = Memo::new();
        let root = three_way(&memo);
        let mut search = search(memo, OptimizerConfig::default(), false);
        assert!(matches!(
            search.optimize(root, &all_columns()),
            Err(OptimizerError::NoPlanFound { .. })
        ));
    }

    #[test]
    fn test_iteration_limit_stops_rule_application() {
        let memo = Memo::new();
        let root = three_way(&memo);
        let config = OptimizerConfig {
            max_iterations: 0,
            ..OptimizerConfig::default()
        };
        let mut search = search(memo, config, true);
        assert!(search.optimize(root, &all_columns()).is_err());
        assert_eq!(search.iterations(), 0);
    }

    #[test]
    fn test_abort_requested() {
        let memo = Memo::new();
        let root = three_way(&memo);
        let abort = AbortSignal::new();
        let mut search = search(memo, OptimizerConfig::default(), true).with_abort_signal(abort.clone());
        abort.request_abort();
        assert_eq!(search.optimize(root, &all_columns()).unwrap_err(), OptimizerError::AbortRequested);
    }
}
