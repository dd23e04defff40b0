//! # GPDB-Style Cost Model
//!
//! A calibrated per-operator cost model for a shared-nothing cluster. Every node's
//! local cost is proportional to the rows and bytes it touches, multiplied by the
//! number of times it is re-executed (rebinds), plus the cost of its children:
//!
//! ```text
//! total = rebinds * local(rows, width, children) + Σ child cost
//! ```
//!
//! Rows are per host when the node's output is spread across hosts, so a plan that
//! keeps work partitioned is cheaper than one that gathers early.
//!
//! ## Per-Operator Formulas
//!
//! | operator        | local cost                                                             |
//! |-----------------|------------------------------------------------------------------------|
//! | `TableScan`     | init + rows·table_width·scan_unit + rows·width·output_unit             |
//! | `IndexScan`     | rows·(keys·index_filter_unit + table_width·index_tup_unit) + random    |
//! | `Filter`        | in_rows·predicate_cols·filter_col_unit                                 |
//! | `HashJoin`      | build + feed + match + rows·width·join_output_unit                     |
//! | `NLJoin`        | (feed + rescans + output + children) · nlj_factor                      |
//! | `Gather`        | out_rows·out_width·(send + hosts·recv)                                 |
//! | `Redistribute`  | out_rows·out_width·send + rows·width·recv                              |
//! | `Broadcast`     | out_rows·out_width·(send + hosts·recv)                                 |
//! | `Sort`          | rows·log2(rows)·width·sort_unit                                        |
//! | `HashAgg`       | in_rows·grp_cols·(col_unit + width·width_unit) + rows·width·out_unit   |
//! | `StreamAgg`     | in_rows·in_width·tup_unit + rows·width·out_unit                        |
//! | `Spool`         | rows·width·materialize_unit                                            |
//!
//! A hash join whose build side exceeds `hj_spilling_mem_threshold` bytes pays a
//! hash-table initialisation cost and uses the spilling cost units.

use crate::enforcer::Motion;
use crate::physical::{HashAgg, IndexScan, TableScan};
use cascades_core::cost::{ChildCostInput, Cost, CostModel, CostingInputs};
use cascades_core::handle::ExprHandle;
use cascades_core::operator::MotionKind;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Calibrated cost units. All fields can be overridden from a serialized config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostModelParams {
    pub init_scan_factor: f64,
    pub table_scan_cost_unit: f64,
    pub index_filter_cost_unit: f64,
    pub index_scan_tup_cost_unit: f64,
    pub index_scan_tup_random_factor: f64,
    pub filter_col_cost_unit: f64,
    pub output_tup_cost_unit: f64,
    pub gather_send_cost_unit: f64,
    pub gather_recv_cost_unit: f64,
    pub redistribute_send_cost_unit: f64,
    pub redistribute_recv_cost_unit: f64,
    pub broadcast_send_cost_unit: f64,
    pub broadcast_recv_cost_unit: f64,
    pub join_feeding_tup_column_cost_unit: f64,
    pub join_feeding_tup_width_cost_unit: f64,
    pub join_output_tup_cost_unit: f64,
    /// Build-side bytes above which a hash join spills.
    pub hj_spilling_mem_threshold: f64,
    pub hj_hash_table_init_cost_factor: f64,
    pub hj_hash_table_column_cost_unit: f64,
    pub hj_hash_table_width_cost_unit: f64,
    pub hj_hashing_tup_width_cost_unit: f64,
    pub hj_feeding_tup_column_spilling_cost_unit: f64,
    pub hj_feeding_tup_width_spilling_cost_unit: f64,
    pub hj_hashing_tup_width_spilling_cost_unit: f64,
    pub hash_agg_input_tup_column_cost_unit: f64,
    pub hash_agg_input_tup_width_cost_unit: f64,
    pub hash_agg_output_tup_width_cost_unit: f64,
    pub sort_tup_width_cost_unit: f64,
    pub tup_default_proc_cost_unit: f64,
    pub materialize_cost_unit: f64,
    /// Penalty applied to nested-loop joins so they only win on tiny inputs.
    pub nlj_factor: f64,
}

impl Default for CostModelParams {
    fn default() -> Self {
        Self {
            init_scan_factor: 431.0,
            table_scan_cost_unit: 5.50e-7,
            index_filter_cost_unit: 1.65e-4,
            index_scan_tup_cost_unit: 3.66e-6,
            index_scan_tup_random_factor: 6.0,
            filter_col_cost_unit: 3.29e-5,
            output_tup_cost_unit: 1.86e-6,
            gather_send_cost_unit: 4.58e-6,
            gather_recv_cost_unit: 2.20e-6,
            redistribute_send_cost_unit: 2.33e-6,
            redistribute_recv_cost_unit: 8.0e-7,
            broadcast_send_cost_unit: 4.965e-5,
            broadcast_recv_cost_unit: 1.35e-6,
            join_feeding_tup_column_cost_unit: 8.69e-5,
            join_feeding_tup_width_cost_unit: 6.09e-7,
            join_output_tup_cost_unit: 3.50e-6,
            hj_spilling_mem_threshold: 50.0 * 1024.0 * 1024.0,
            hj_hash_table_init_cost_factor: 500.0,
            hj_hash_table_column_cost_unit: 5.0e-5,
            hj_hash_table_width_cost_unit: 3.0e-6,
            hj_hashing_tup_width_cost_unit: 1.97e-5,
            hj_feeding_tup_column_spilling_cost_unit: 1.97e-4,
            hj_feeding_tup_width_spilling_cost_unit: 3.0e-6,
            hj_hashing_tup_width_spilling_cost_unit: 1.97e-5,
            hash_agg_input_tup_column_cost_unit: 1.20e-4,
            hash_agg_input_tup_width_cost_unit: 1.12e-7,
            hash_agg_output_tup_width_cost_unit: 5.61e-7,
            sort_tup_width_cost_unit: 5.67e-6,
            tup_default_proc_cost_unit: 1.0e-6,
            materialize_cost_unit: 4.68e-6,
            nlj_factor: 1024.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GpdbCostModel {
    pub params: CostModelParams,
}

impl GpdbCostModel {
    pub fn new(params: CostModelParams) -> Self {
        Self { params }
    }

    fn scan(&self, table_width: f64, inputs: &CostingInputs) -> f64 {
        let p = &self.params;
        p.init_scan_factor
            + inputs.rows * table_width * p.table_scan_cost_unit
            + inputs.rows * inputs.width * p.output_tup_cost_unit
    }

    fn index_scan(&self, keys: usize, table_width: f64, inputs: &CostingInputs) -> f64 {
        let p = &self.params;
        let per_row = keys as f64 * p.index_filter_cost_unit + table_width * p.index_scan_tup_cost_unit;
        inputs.rows * per_row + p.index_scan_tup_random_factor
    }

    fn filter(&self, predicate_columns: usize, input: &ChildCostInput) -> f64 {
        input.rows * predicate_columns.max(1) as f64 * self.params.filter_col_cost_unit
    }

    fn hash_join(&self, columns_used: usize, outer: &ChildCostInput, inner: &ChildCostInput, inputs: &CostingInputs) -> f64 {
        let p = &self.params;
        let cols = columns_used.max(1) as f64;
        let spills = inner.rows * inner.width > p.hj_spilling_mem_threshold;
        let (init, feed_col, feed_width, hashing) = if spills {
            (
                p.hj_hash_table_init_cost_factor,
                p.hj_feeding_tup_column_spilling_cost_unit,
                p.hj_feeding_tup_width_spilling_cost_unit,
                p.hj_hashing_tup_width_spilling_cost_unit,
            )
        } else {
            (
                0.0,
                p.join_feeding_tup_column_cost_unit,
                p.join_feeding_tup_width_cost_unit,
                p.hj_hashing_tup_width_cost_unit,
            )
        };
        let build = inner.rows * (cols * p.hj_hash_table_column_cost_unit + inner.width * p.hj_hash_table_width_cost_unit);
        let feed = cols * outer.rows * feed_col + outer.width * outer.rows * feed_width;
        let matching = inner.width * inner.rows * hashing;
        let output = inputs.rows * inputs.width * p.join_output_tup_cost_unit;
        init + build + feed + matching + output
    }

    fn nl_join(&self, columns_used: usize, outer: &ChildCostInput, inner: &ChildCostInput, inputs: &CostingInputs) -> f64 {
        let p = &self.params;
        let cols = columns_used.max(1) as f64;
        let feed = cols * outer.rows * p.join_feeding_tup_column_cost_unit
            + outer.width * outer.rows * p.join_feeding_tup_width_cost_unit;
        let rescans = outer.rows
            * (inner.rows * inner.width * p.table_scan_cost_unit + inner.rows * cols * p.filter_col_cost_unit);
        let output = inputs.rows * inner.width * p.output_tup_cost_unit
            + inputs.rows * inputs.width * p.join_output_tup_cost_unit;
        feed + p.init_scan_factor + rescans + output
    }

    fn motion(&self, kind: MotionKind, input: &ChildCostInput, inputs: &CostingInputs) -> f64 {
        let p = &self.params;
        let hosts = f64::from(inputs.segments.max(1));
        let sent = input.rows * input.width;
        match kind {
            MotionKind::Gather | MotionKind::GatherMerge => {
                sent * p.gather_send_cost_unit + sent * hosts * p.gather_recv_cost_unit
            }
            MotionKind::Broadcast => sent * p.broadcast_send_cost_unit + sent * hosts * p.broadcast_recv_cost_unit,
            MotionKind::Redistribute | MotionKind::Random => {
                sent * p.redistribute_send_cost_unit + inputs.rows * inputs.width * p.redistribute_recv_cost_unit
            }
        }
    }

    fn sort(&self, inputs: &CostingInputs) -> f64 {
        let rows = inputs.rows.max(1.0);
        rows * rows.log2().max(1.0) * inputs.width * self.params.sort_tup_width_cost_unit
    }

    fn hash_agg(&self, grouping: usize, input: &ChildCostInput, inputs: &CostingInputs) -> f64 {
        let p = &self.params;
        let cols = grouping.max(1) as f64;
        input.rows * cols * p.hash_agg_input_tup_column_cost_unit
            + input.rows * cols * inputs.width * p.hash_agg_input_tup_width_cost_unit
            + inputs.rows * inputs.width * p.hash_agg_output_tup_width_cost_unit
    }

    fn stream_agg(&self, input: &ChildCostInput, inputs: &CostingInputs) -> f64 {
        let p = &self.params;
        input.rows * input.width * p.tup_default_proc_cost_unit + inputs.rows * inputs.width * p.hash_agg_output_tup_width_cost_unit
    }

    fn unary(&self, input: &ChildCostInput) -> f64 {
        input.rows * input.width * self.params.tup_default_proc_cost_unit
    }
}

impl CostModel for GpdbCostModel {
    fn cost(&self, handle: &ExprHandle<'_>, inputs: &CostingInputs) -> Cost {
        let op = handle.op();
        let empty = ChildCostInput {
            rows: 0.0,
            width: 0.0,
            rebinds: 1.0,
            cost: Cost::zero(),
        };
        let outer = inputs.children.first().copied().unwrap_or(empty);
        let inner = inputs.children.get(1).copied().unwrap_or(empty);
        let predicate_columns = handle.scalar_used_columns().len();

        let local = match op.kind_id() {
            "TableScan" => {
                let width = crate::payload::<TableScan>(op).map_or(inputs.width, |s| s.table.width());
                self.scan(width, inputs)
            }
            "IndexScan" => match crate::payload::<IndexScan>(op) {
                Some(s) => self.index_scan(s.index.keys.len(), s.table.width(), inputs),
                None => self.scan(inputs.width, inputs),
            },
            "Filter" => self.filter(predicate_columns, &outer),
            "HashJoin" => self.hash_join(predicate_columns, &outer, &inner, inputs),
            "NLJoin" => {
                let local = self.nl_join(predicate_columns, &outer, &inner, inputs);
                let total = (local * inputs.rebinds.max(1.0) + inputs.children_cost()) * self.params.nlj_factor;
                trace!("NLJoin {} costs {}", handle.gexpr().id(), total);
                return Cost::new(total);
            }
            "Sort" => self.sort(inputs),
            "HashAgg" => {
                let grouping = crate::payload::<HashAgg>(op).map_or(1, |a| a.grouping.len());
                self.hash_agg(grouping, &outer, inputs)
            }
            "StreamAgg" => self.stream_agg(&outer, inputs),
            "Spool" => inputs.rows * inputs.width * self.params.materialize_cost_unit,
            _ => match crate::payload::<Motion>(op) {
                Some(m) => self.motion(m.kind, &outer, inputs),
                None => self.unary(&outer),
            },
        };
        Cost::new(local * inputs.rebinds.max(1.0) + inputs.children_cost())
    }

    /// Start-up charge of a scan. Nested-loop joins pay it again for their rescans.
    fn fixed_node_cost(&self) -> Cost {
        Cost::new(self.params.init_scan_factor)
    }
}
