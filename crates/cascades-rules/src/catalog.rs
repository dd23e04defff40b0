//! # Catalog Interface
//!
//! The catalog gives the operator catalogue what it needs to know about base
//! tables: their columns with per-column statistics, row counts, how the rows are
//! spread across execution hosts, and which indexes exist. Logical scans hold a
//! shared [`TableDescriptor`] so that statistics derivation, implementation rules
//! and the cost model all read the same metadata.
//!
//! ## Key Lookups
//!
//! Tables are identified by name. [`InMemoryCatalog`] is populated programmatically
//! and serves tests and tooling; other backends implement [`Catalog`].

use cascades_core::column::{ColRef, ColumnSet};
use cascades_core::properties::{DistributionSpec, OrderSpec};
use cascades_core::stats::{ColumnStatistics, Statistics, DEFAULT_COLUMN_WIDTH};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

pub type TableId = u32;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub col: ColRef,
    pub name: String,
    /// Number of distinct values.
    pub distinct: f64,
    /// Average width in bytes.
    pub width: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexDescriptor {
    pub name: String,
    pub keys: Vec<ColRef>,
}

impl IndexDescriptor {
    /// Order an index scan over this index delivers.
    pub fn order(&self) -> OrderSpec {
        OrderSpec::ascending(&self.keys)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub id: TableId,
    pub name: String,
    pub rows: f64,
    pub columns: Vec<ColumnDescriptor>,
    /// Distribution a full scan delivers.
    pub distribution: DistributionSpec,
    pub indexes: Vec<IndexDescriptor>,
    /// Partitioning columns; empty for unpartitioned tables.
    pub partition_keys: Vec<ColRef>,
}

impl TableDescriptor {
    /// A randomly distributed table without columns or indexes.
    pub fn new(id: TableId, name: impl Into<String>, rows: f64) -> Self {
        Self {
            id,
            name: name.into(),
            rows,
            columns: Vec::new(),
            distribution: DistributionSpec::Random,
            indexes: Vec::new(),
            partition_keys: Vec::new(),
        }
    }

    pub fn with_column(mut self, col: u32, name: impl Into<String>, distinct: f64, width: f64) -> Self {
        self.columns.push(ColumnDescriptor {
            col: ColRef(col),
            name: name.into(),
            distinct,
            width,
        });
        self
    }

    pub fn distributed_by(mut self, distribution: DistributionSpec) -> Self {
        self.distribution = distribution;
        self
    }

    pub fn with_index(mut self, name: impl Into<String>, keys: &[u32]) -> Self {
        self.indexes.push(IndexDescriptor {
            name: name.into(),
            keys: keys.iter().copied().map(ColRef).collect(),
        });
        self
    }

    pub fn partitioned_by(mut self, keys: &[u32]) -> Self {
        self.partition_keys = keys.iter().copied().map(ColRef).collect();
        self
    }

    pub fn is_partitioned(&self) -> bool {
        !self.partition_keys.is_empty()
    }

    pub fn column(&self, col: ColRef) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.col == col)
    }

    pub fn column_set(&self) -> ColumnSet {
        self.columns.iter().map(|c| c.col).collect()
    }

    /// Width of a full row.
    pub fn width(&self) -> f64 {
        self.columns.iter().map(|c| c.width).sum()
    }

    /// Base-table statistics for the requested columns. Unknown columns get the
    /// row count as NDV and the default width.
    pub fn statistics(&self, required: &ColumnSet) -> Statistics {
        required.iter().fold(Statistics::new(self.rows), |stats, col| {
            let column = match self.column(col) {
                Some(c) => ColumnStatistics::new(c.distinct.min(self.rows).max(1.0), c.width),
                None => ColumnStatistics::new(self.rows.max(1.0), DEFAULT_COLUMN_WIDTH),
            };
            stats.with_column(col, column)
        })
    }
}

/// Catalog provides table metadata by name.
pub trait Catalog: Send + Sync {
    fn table(&self, name: &str) -> Option<Arc<TableDescriptor>>;
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    tables: HashMap<String, Arc<TableDescriptor>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `table`, replacing any table of the same name.
    pub fn add_table(&mut self, table: TableDescriptor) -> Arc<TableDescriptor> {
        let table = Arc::new(table);
        self.tables.insert(table.name.clone(), Arc::clone(&table));
        table
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

impl Catalog for InMemoryCatalog {
    fn table(&self, name: &str) -> Option<Arc<TableDescriptor>> {
        self.tables.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orders() -> TableDescriptor {
        TableDescriptor::new(1, "orders", 1000.0)
            .with_column(1, "o_orderkey", 1000.0, 8.0)
            .with_column(2, "o_custkey", 100.0, 8.0)
            .distributed_by(DistributionSpec::hashed(vec![ColRef(1)]))
            .with_index("orders_pk", &[1])
    }

    #[test]
    fn test_statistics_cover_requested_columns() {
        let stats = orders().statistics(&ColumnSet::from([2, 9]));
        assert_eq!(stats.rows(), 1000.0);
        assert_eq!(stats.column(ColRef(2)).unwrap().distinct_count, 100.0);
        assert_eq!(stats.column(ColRef(9)).unwrap().width, DEFAULT_COLUMN_WIDTH);
        assert!(stats.column(ColRef(1)).is_none());
    }

    #[test]
    fn test_lookup_by_name() {
        let mut catalog = InMemoryCatalog::new();
        let added = catalog.add_table(orders());
        let found = catalog.table("orders").unwrap();
        assert!(Arc::ptr_eq(&added, &found));
        assert!(catalog.table("lineitem").is_none());
        assert_eq!(found.width(), 16.0);
        assert_eq!(found.indexes[0].order(), OrderSpec::ascending(&[ColRef(1)]));
        assert!(!found.is_partitioned());
        assert!(orders().partitioned_by(&[2]).is_partitioned());
    }
}
