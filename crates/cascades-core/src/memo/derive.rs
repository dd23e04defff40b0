//! Lazy statistics derivation over the memo.

use super::{Group, GroupExprId, GroupId, Memo};
use crate::cancel::AbortSignal;
use crate::column::ColumnSet;
use crate::error::{OptimizerError, Result};
use crate::operator::{StatPromise, StatsInput};
use crate::properties::GroupProps;
use crate::stats::Statistics;
use std::sync::Arc;
use tracing::trace;

impl Memo {
    /// Statistics of `group` covering at least `required` (restricted to the group's
    /// output columns). Existing statistics are reused when they already cover the
    /// request; otherwise the most promising logical alternative derives the missing
    /// columns, recursively deriving what it needs from its children.
    pub fn derive_stats(&self, group: GroupId, required: &ColumnSet, abort: &AbortSignal) -> Result<Arc<Statistics>> {
        abort.check()?;
        let master = self.resolve(group);
        let g = self.group(master);
        let Some(logical) = g.props().relational() else {
            let mut state = g.state();
            let empty = state.stats.get_or_insert_with(|| Arc::new(Statistics::empty()));
            return Ok(Arc::clone(empty));
        };
        let required = required.intersection(&logical.output_columns);
        if let Some(existing) = g.stats() {
            if existing.covers(&required) {
                return Ok(existing);
            }
        }

        let Some(chosen) = self.best_stats_alternative(&g) else {
            return Err(OptimizerError::no_plan(
                master,
                &required,
                "could not choose a group expression for statistics derivation",
            ));
        };
        let gexpr = self.gexpr(chosen);
        let Some(op) = gexpr.op().as_logical() else {
            return Err(OptimizerError::no_plan(
                master,
                &required,
                "could not choose a group expression for statistics derivation",
            ));
        };

        let child_groups: Vec<Arc<Group>> =
            gexpr.children().iter().map(|c| self.group(self.resolve(*c))).collect();
        let child_props: Vec<&GroupProps> = child_groups.iter().map(|c| c.props()).collect();
        let mut child_stats = Vec::with_capacity(child_groups.len());
        let mut scalars = Vec::with_capacity(child_groups.len());
        for (index, child) in child_groups.iter().enumerate() {
            if child.is_scalar() {
                child_stats.push(None);
                scalars.push(
                    child
                        .alternatives()
                        .first()
                        .map(|alt| self.gexpr(*alt).op().clone()),
                );
                continue;
            }
            let columns = op.required_stat_columns(&required, index, &child_props);
            child_stats.push(Some(self.derive_stats(child.id(), &columns, abort)?));
            scalars.push(None);
        }

        let derived = op.derive_statistics(&StatsInput {
            required: &required,
            logical,
            children: &child_stats,
            child_props: &child_props,
            scalars: &scalars,
        })?;
        trace!(
            "Derived statistics for group {} from expr {}: rows={:.1}, columns={}",
            master,
            chosen,
            derived.rows(),
            derived.column_set()
        );

        let mut state = g.state();
        let merged = match state.stats.as_deref() {
            None => Arc::new(derived),
            Some(existing) => {
                let mut merged = existing.clone();
                merged.append(&derived);
                Arc::new(merged)
            }
        };
        state.stats = Some(Arc::clone(&merged));
        Ok(merged)
    }

    /// Highest-promise logical alternative. A group with outer references caps every
    /// promise at `Low`; between two joins of equal promise, fewer conjuncts wins.
    fn best_stats_alternative(&self, group: &Group) -> Option<GroupExprId> {
        let has_outer_refs = !group.logical().outer_references.is_empty();
        let mut best: Option<(GroupExprId, StatPromise, bool, usize)> = None;
        for alt in group.alternatives() {
            let gexpr = self.gexpr(alt);
            let Some(op) = gexpr.op().as_logical() else {
                continue;
            };
            let mut promise = op.stat_promise();
            if promise == StatPromise::None {
                continue;
            }
            if has_outer_refs {
                promise = promise.min(StatPromise::Low);
            }
            let conjuncts: usize = gexpr
                .children()
                .iter()
                .filter_map(|c| self.group(self.resolve(*c)).scalar().map(|s| s.conjuncts))
                .sum();
            let candidate = (alt, promise, op.is_join(), conjuncts);
            best = match best {
                None => Some(candidate),
                Some(current) if promise > current.1 => Some(candidate),
                Some(current) if promise == current.1 && candidate.2 && current.2 && conjuncts < current.3 => {
                    Some(candidate)
                }
                keep => keep,
            };
        }
        best.map(|(id, ..)| id)
    }

    /// Statistics snapshot used when costing under `opt_ctx`: the group's statistics
    /// for the context's required columns, cached per context.
    pub fn context_stats(&self, opt_ctx: super::OptCtxId, abort: &AbortSignal) -> Result<Arc<Statistics>> {
        let oc = self.opt_context(opt_ctx);
        let group = self.group(self.resolve(oc.group()));
        if let Some(cached) = group.context_stats_cache().get(&opt_ctx) {
            return Ok(Arc::clone(cached.value()));
        }
        let stats = self.derive_stats(group.id(), &oc.reqd().columns, abort)?;
        group.context_stats_cache().insert(opt_ctx, Arc::clone(&stats));
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn test_derive_appends_columns() {
        let memo = Memo::new();
        let signal = AbortSignal::new();
        let g = memo.insert(testing::scan(1, &[1, 2, 3]), vec![], None, None).unwrap().group;

        let first = memo.derive_stats(g, &ColumnSet::from([1]), &signal).unwrap();
        assert!(first.covers(&ColumnSet::from([1])));
        assert!(!first.covers(&ColumnSet::from([2])));

        let second = memo.derive_stats(g, &ColumnSet::from([2, 9]), &signal).unwrap();
        assert!(second.covers(&ColumnSet::from([1, 2])));
        assert_eq!(second.rows(), first.rows());

        let again = memo.derive_stats(g, &ColumnSet::from([1]), &signal).unwrap();
        assert!(Arc::ptr_eq(&again, &second));
    }

    #[test]
    fn test_scalar_group_gets_empty_stats() {
        let memo = Memo::new();
        let signal = AbortSignal::new();
        let p = memo.insert(testing::predicate(&[1], 1), vec![], None, None).unwrap().group;
        assert_eq!(memo.derive_stats(p, &ColumnSet::from([1]), &signal).unwrap().rows(), 0.0);
    }

    #[test]
    fn test_no_promising_alternative_fails() {
        let memo = Memo::new();
        let signal = AbortSignal::new();
        let g = memo.insert(testing::opaque_scan(1), vec![], None, None).unwrap().group;
        let err = memo.derive_stats(g, &ColumnSet::from([1]), &signal).unwrap_err();
        assert!(matches!(err, OptimizerError::NoPlanFound { .. }));
        assert!(err.to_string().contains("could not choose a group expression for statistics derivation"));
    }

    #[test]
    fn test_abort_is_checked_first() {
        let memo = Memo::new();
        let signal = AbortSignal::new();
        let g = memo.insert(testing::scan(1, &[1]), vec![], None, None).unwrap().group;
        signal.request_abort();
        assert_eq!(
            memo.derive_stats(g, &ColumnSet::from([1]), &signal).unwrap_err(),
            OptimizerError::AbortRequested
        );
    }

    #[test]
    fn test_duplicate_group_delegates_to_master() {
        let memo = Memo::new();
        let signal = AbortSignal::new();
        let a = memo.insert(testing::scan(1, &[1]), vec![], None, None).unwrap().group;
        let b = memo.insert(testing::scan(2, &[1]), vec![], None, None).unwrap().group;
        memo.add_duplicate(a, b);
        let from_a = memo.derive_stats(a, &ColumnSet::from([1]), &signal).unwrap();
        let from_b = memo.derive_stats(b, &ColumnSet::from([1]), &signal).unwrap();
        assert!(Arc::ptr_eq(&from_a, &from_b));
    }
}
