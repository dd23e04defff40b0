//! # Statistics
//!
//! A [`Statistics`] value describes the output of a group: how many rows it produces,
//! how many times it is expected to be re-executed (rebinds), and per-column
//! information for the columns some consumer asked about. Group statistics are
//! derived lazily and only for the columns requested so far; later requests for more
//! columns *append* to the existing value instead of replacing it.
//!
//! ## Derivation Formulas
//!
//! The helpers at the bottom of this module are shared by the operator catalogue:
//!
//! - **Filter**: output_rows = input_rows * selectivity. Column NDVs are scaled by the
//!   same ratio.
//! - **Join**: output_rows = |A| * |B| / max(NDV(A.key), NDV(B.key)) per equi-join pair,
//!   with pairs combined under the independence assumption.
//! - **Aggregate**: output_rows = product of grouping-column NDVs, capped at input rows.
//!
//! ## Selectivity Estimation
//!
//! - **Equality**: 1 / NDV (uniform distribution assumption).
//! - **Default**: 0.1 when no better estimate is available.

use crate::column::{ColRef, ColumnSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Width assumed for a column without statistics, in bytes.
pub const DEFAULT_COLUMN_WIDTH: f64 = 8.0;

/// Default filter selectivity when we can't determine it.
pub const DEFAULT_FILTER_SELECTIVITY: f64 = 0.1;

/// Per-column statistics used for selectivity estimation and cost modeling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnStatistics {
    /// Number of distinct values (NDV). Used for equality selectivity: sel = 1/NDV.
    pub distinct_count: f64,
    /// Average width of a value in bytes.
    pub width: f64,
    /// Fraction of rows that are NULL [0.0, 1.0].
    pub null_fraction: f64,
}

impl ColumnStatistics {
    pub fn new(distinct_count: f64, width: f64) -> Self {
        Self {
            distinct_count,
            width,
            null_fraction: 0.0,
        }
    }
}

/// Statistics for a group in the memo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    rows: f64,
    rebinds: f64,
    columns: BTreeMap<ColRef, ColumnStatistics>,
}

impl Statistics {
    pub fn new(rows: f64) -> Self {
        Self {
            rows,
            rebinds: 1.0,
            columns: BTreeMap::new(),
        }
    }

    /// Statistics for scalar groups: no rows, no columns.
    pub fn empty() -> Self {
        Self::new(0.0)
    }

    pub fn with_column(mut self, col: ColRef, stats: ColumnStatistics) -> Self {
        self.columns.insert(col, stats);
        self
    }

    pub fn with_rebinds(mut self, rebinds: f64) -> Self {
        self.rebinds = rebinds;
        self
    }

    pub fn rows(&self) -> f64 {
        self.rows
    }

    pub fn rebinds(&self) -> f64 {
        self.rebinds
    }

    pub fn column(&self, col: ColRef) -> Option<&ColumnStatistics> {
        self.columns.get(&col)
    }

    pub fn columns(&self) -> impl Iterator<Item = (ColRef, &ColumnStatistics)> {
        self.columns.iter().map(|(c, s)| (*c, s))
    }

    pub fn column_set(&self) -> ColumnSet {
        self.columns.keys().copied().collect()
    }

    /// Average output row width over `cols`. Columns without statistics count with
    /// the default width.
    pub fn width(&self, cols: &ColumnSet) -> f64 {
        cols.iter()
            .map(|c| self.columns.get(&c).map_or(DEFAULT_COLUMN_WIDTH, |s| s.width))
            .sum()
    }

    /// NDV of `col`, falling back to the row count.
    pub fn distinct(&self, col: ColRef) -> f64 {
        self.columns.get(&col).map_or(self.rows, |s| s.distinct_count)
    }

    pub fn covers(&self, cols: &ColumnSet) -> bool {
        cols.iter().all(|c| self.columns.contains_key(&c))
    }

    pub fn missing(&self, cols: &ColumnSet) -> ColumnSet {
        cols.iter().filter(|c| !self.columns.contains_key(c)).collect()
    }

    /// Add the column statistics of `other` that this value does not have yet.
    /// Existing columns and the row count are left untouched.
    pub fn append(&mut self, other: &Statistics) {
        for (col, stats) in &other.columns {
            self.columns.entry(*col).or_insert_with(|| stats.clone());
        }
    }

    /// Rows scaled by `factor`, NDVs clamped to the new row count.
    pub fn scaled(&self, factor: f64) -> Statistics {
        let rows = (self.rows * factor).max(1.0);
        let columns = self
            .columns
            .iter()
            .map(|(c, s)| {
                let mut s = s.clone();
                s.distinct_count = (s.distinct_count * factor).max(1.0).min(rows);
                (*c, s)
            })
            .collect();
        Statistics {
            rows,
            rebinds: self.rebinds,
            columns,
        }
    }

    /// Rows handled by each of `segments` hosts.
    pub fn rows_per_host(&self, segments: u32) -> f64 {
        self.rows / f64::from(segments.max(1))
    }

    /// Keep only the statistics for `cols`.
    pub fn project(&self, cols: &ColumnSet) -> Statistics {
        Statistics {
            rows: self.rows,
            rebinds: self.rebinds,
            columns: self
                .columns
                .iter()
                .filter(|(c, _)| cols.contains(**c))
                .map(|(c, s)| (*c, s.clone()))
                .collect(),
        }
    }
}

/// Derive statistics for a filter with the given selectivity.
pub fn derive_filter_stats(input: &Statistics, selectivity: f64) -> Statistics {
    let ratio = if input.rows > 0.0 {
        (input.rows * selectivity).max(1.0) / input.rows
    } else {
        1.0
    };
    input.scaled(ratio)
}

/// Derive statistics for an equi-join on `keys` (outer column, inner column).
///
/// When NDV information is unavailable for a column, the relation's row count is
/// used (all values distinct).
pub fn derive_join_stats(outer: &Statistics, inner: &Statistics, keys: &[(ColRef, ColRef)]) -> Statistics {
    let mut selectivity = 1.0_f64;
    for (o, i) in keys {
        let max_ndv = outer.distinct(*o).max(inner.distinct(*i)).max(1.0);
        selectivity /= max_ndv;
    }
    let rows = (outer.rows * inner.rows * selectivity).max(1.0);

    let mut columns = BTreeMap::new();
    for (col, stats) in outer.columns.iter().chain(inner.columns.iter()) {
        let mut s = stats.clone();
        s.distinct_count = s.distinct_count.min(rows);
        columns.insert(*col, s);
    }
    Statistics {
        rows,
        rebinds: outer.rebinds,
        columns,
    }
}

/// Derive statistics for a grouping aggregate.
///
/// A global aggregate (no grouping columns) produces exactly one row.
pub fn derive_aggregate_stats(input: &Statistics, grouping: &[ColRef]) -> Statistics {
    let mut rows = 1.0_f64;
    for col in grouping {
        rows *= input.distinct(*col);
    }
    let rows = rows.min(input.rows).max(1.0);
    let columns = grouping
        .iter()
        .filter_map(|c| {
            input.columns.get(c).map(|s| {
                let mut s = s.clone();
                s.distinct_count = s.distinct_count.min(rows);
                (*c, s)
            })
        })
        .collect();
    Statistics {
        rows,
        rebinds: input.rebinds,
        columns,
    }
}

/// Estimate selectivity for an equality predicate: `sel = 1 / NDV`.
pub fn equality_selectivity(stats: &Statistics, col: ColRef) -> f64 {
    stats
        .column(col)
        .map_or(DEFAULT_FILTER_SELECTIVITY, |cs| 1.0 / cs.distinct_count.max(1.0))
}
