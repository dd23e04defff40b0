//! # cascades-core: Cascades Search and Costing Core
//!
//! This crate implements the memo, property framework and costing machinery of a
//! Cascades-style cost-based query optimizer. Concrete operators, rules and cost
//! formulas are supplied from outside through a small set of traits; the
//! `cascades-rules` crate provides a reference catalogue.
//!
//! ## Module Overview
//!
//! - **`memo`**: Groups, group expressions and the duplicate-group union-find. Groups and
//!   expressions live in flat arenas and refer to each other by integer id.
//! - **`context`**: Optimization contexts (group + requirement + stage) and cost contexts
//!   (one costed instantiation), including the `better_than` tie-breaking order.
//! - **`properties`**: Order, distribution, rewindability, partition propagation and CTE
//!   specs, the required/derived bundles and the enforcement decision.
//! - **`handle`**: The expression handle handed to operator callbacks.
//! - **`operator`**: The operator capability traits and the `Operator` sum type.
//! - **`binding`**: Restartable extraction of expression trees matching a `pattern`.
//! - **`partial_plan`**: Branch-and-bound lower bounds.
//! - **`optimizer`**: The `optimize` / `cost` entry points driven by a scheduler.
//! - **`search`**: A sequential multi-stage driver (explore, implement, optimize, extract).
//! - **`plan`**: Rehydration of the chosen plan.
//! - **`cost`**, **`stats`**: The cost-model contract and the statistics container.
//! - **`rule`**, **`enforcer`**: Transformation engine and enforcer factory contracts.
//! - **`config`**, **`error`**, **`cancel`**: Session configuration, error taxonomy and
//!   cooperative cancellation.

pub mod binding;
pub mod cancel;
pub mod column;
pub mod config;
pub mod context;
pub mod cost;
pub mod enforcer;
pub mod error;
pub mod handle;
pub mod memo;
pub mod operator;
pub mod optimizer;
pub mod partial_plan;
pub mod pattern;
pub mod plan;
pub mod properties;
pub mod rule;
pub mod search;
pub mod stats;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{OptimizerError, Result};
