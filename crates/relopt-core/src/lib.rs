//! # relopt-core: Relational Rewrite Engine Core
//!
//! This crate implements the data structures and algorithms that rule-based
//! rewriting of relational plans is built on. The rules themselves live in
//! `relopt-rules`.
//!
//! ## Module Overview
//!
//! - **`fieldset`**: Immutable, ordered sets of column ordinals.
//! - **`mapping`**: Partial column mappings used to renumber fields.
//! - **`types`**: Data types and row types.
//! - **`rex`**: Scalar expressions (`RexNode`) with null-rejection analysis.
//! - **`shuttle`**: Closure-driven expression rewriting and the prebuilt shuttles.
//! - **`rel`**: The relational operators (`RelNode`) and row-type derivation.
//! - **`properties`**: Collations and trait sets.
//! - **`explain`**: Text and JSON rendering of plans, and node digests.
//! - **`metadata`**: Metadata queries (row-count bounds, uniqueness, predicates).
//! - **`pattern`**: Declarative operand patterns and the matcher.
//! - **`rule`**: The Rule trait, rule calls and the rule registry.
//! - **`builder`**: Stack-based construction of relational expressions.
//! - **`plan_util`**: Filter classification and outer-join strengthening.
//! - **`planner`**: A heuristic fixpoint driver.
//! - **`catalog`**: Catalog trait for resolving table names.
//! - **`testing`**: Shared fixtures for tests.

pub mod builder;
pub mod catalog;
pub mod error;
pub mod explain;
pub mod fieldset;
pub mod mapping;
pub mod metadata;
pub mod pattern;
pub mod plan_util;
pub mod planner;
pub mod properties;
pub mod rel;
pub mod rex;
pub mod rule;
pub mod shuttle;
pub mod testing;
pub mod types;

pub use builder::{GroupKey, RelBuilder};
pub use error::{PlanError, Result};
pub use fieldset::FieldSet;
pub use mapping::{FunctionMapping, Mapping, ShiftBlock};
pub use pattern::Operand;
pub use planner::{HepPlanner, PlannerConfig};
pub use rel::{RelKind, RelNode, RelRef};
pub use rex::RexNode;
pub use rule::{Rule, RuleCall, RuleRegistry, RuleSet};
