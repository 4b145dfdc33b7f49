//! # Built-in Rewrite Rules
//!
//! This crate provides the default set of algebraic rewrite rules for the
//! `relopt-core` engine. Every rule rewrites a logical plan into an equivalent
//! logical plan with the same row type.
//!
//! ## Filter placement
//!
//! - **`filter`**: `FilterMergeRule`, `FilterProjectTransposeRule`,
//!   `FilterAggregateTransposeRule` (grouping-set aware), `FilterSetOpTransposeRule`,
//!   `FilterCorrelateRule`.
//! - **`filter_join`**: `FilterIntoJoinRule` and `JoinConditionPushRule`, which push
//!   conjuncts into join inputs and strengthen outer joins.
//!
//! ## Join shape
//!
//! - **`join_commutativity`**: `JoinCommuteRule` (A JOIN B -> B JOIN A).
//! - **`join_associativity`**: `JoinAssociateRule` ((A JOIN B) JOIN C ->
//!   A JOIN (B JOIN C)) and `JoinPushThroughJoinRule`.
//! - **`join`**: `JoinProjectTransposeRule`, `JoinExtractFilterRule`,
//!   `JoinToCorrelateRule`.
//! - **`multi_join`**: `JoinToMultiJoinRule` flattens inner join trees into a
//!   `MultiJoin`; `MultiJoinOptimizeBushyRule` rebuilds a bushy join tree from it.
//!
//! ## Normalisation
//!
//! - **`project`**: `ProjectMergeRule`, `ProjectRemoveRule`.
//! - **`aggregate`**: `AggregateRemoveRule`, `AggregateProjectMergeRule`,
//!   `AggregateExtractProjectRule`, `AggregateReduceFunctionsRule`.
//! - **`aggregate_join`**: `AggregateJoinTransposeRule`, which pushes an aggregate
//!   below an inner equi-join.
//! - **`set_op`**: `UnionMergeRule`, `UnionEliminateRule`, `UnionToDistinctRule`.
//! - **`sort`**: `SortRemoveRule`, `SortProjectTransposeRule`.
//! - **`calc`**: `FilterToCalcRule`, `ProjectToCalcRule`, `CalcMergeRule`.
//! - **`prune_empty`**: `PruneEmptyRule`, one instance per operator shape.
//!
//! Rules that can undo each other or grow the plan (join reordering, lowering of
//! joins, calc conversion, aggregate trimming, aggregate push-down) are registered in named rule sets
//! instead of the base rules, and only run when a planner asks for them.

pub mod aggregate;
pub mod aggregate_join;
pub mod calc;
pub mod filter;
pub mod filter_join;
pub mod join;
pub mod join_associativity;
pub mod join_commutativity;
pub mod multi_join;
pub mod project;
pub mod prune_empty;
pub mod set_op;
pub mod sort;

use prune_empty::{PruneEmpty, PruneEmptyRule};
use relopt_core::rule::{RuleRegistry, RuleSet};

/// Rule set with the join reordering rules.
pub const JOIN_REORDER: &str = "join_reorder";
/// Rule set that turns joins into filters over cross products and correlates.
pub const JOIN_LOWERING: &str = "join_lowering";
/// Rule set that converts filters and projects to calcs and merges them.
pub const CALC: &str = "calc";
/// Rule set that narrows aggregate inputs to the fields they read.
pub const TRIM: &str = "trim";
/// Rule set that pushes aggregates below joins.
pub const AGGREGATE_PUSHDOWN: &str = "aggregate_pushdown";
/// Rule set that flattens inner join trees into multi-joins.
pub const MULTI_JOIN: &str = "multi_join";
/// Rule set that turns multi-joins back into bushy join trees. Runs after
/// [`MULTI_JOIN`], in a separate phase.
pub const BUSHY_JOIN: &str = "bushy_join";

/// Create a default rule registry with all built-in rules.
///
/// The base rules always run; the named sets ([`JOIN_REORDER`], [`JOIN_LOWERING`],
/// [`CALC`], [`TRIM`], [`AGGREGATE_PUSHDOWN`], [`MULTI_JOIN`], [`BUSHY_JOIN`]) run
/// when listed in the planner configuration.
pub fn default_rule_registry() -> RuleRegistry {
    let mut registry = RuleRegistry::new();

    // Filter placement.
    registry.add_rule(Box::new(filter::FilterMergeRule));
    registry.add_rule(Box::new(filter::FilterProjectTransposeRule));
    registry.add_rule(Box::new(filter::FilterAggregateTransposeRule));
    registry.add_rule(Box::new(filter::FilterSetOpTransposeRule));
    registry.add_rule(Box::new(filter::FilterCorrelateRule));
    registry.add_rule(Box::new(filter_join::FilterIntoJoinRule));
    registry.add_rule(Box::new(filter_join::JoinConditionPushRule));
    registry.add_rule(Box::new(join::JoinProjectTransposeRule));

    // Normalisation.
    registry.add_rule(Box::new(project::ProjectMergeRule));
    registry.add_rule(Box::new(project::ProjectRemoveRule));
    registry.add_rule(Box::new(aggregate::AggregateRemoveRule));
    registry.add_rule(Box::new(aggregate::AggregateProjectMergeRule));
    registry.add_rule(Box::new(aggregate::AggregateReduceFunctionsRule));
    registry.add_rule(Box::new(set_op::UnionMergeRule));
    registry.add_rule(Box::new(set_op::UnionEliminateRule));
    registry.add_rule(Box::new(set_op::UnionToDistinctRule));
    registry.add_rule(Box::new(sort::SortRemoveRule));
    registry.add_rule(Box::new(sort::SortProjectTransposeRule));

    // Empty propagation.
    for variant in PruneEmpty::ALL {
        registry.add_rule(Box::new(PruneEmptyRule(variant)));
    }

    registry.add_rule_set(RuleSet::new(
        JOIN_REORDER,
        vec![
            Box::new(join_commutativity::JoinCommuteRule::default()),
            Box::new(join_associativity::JoinAssociateRule::default()),
            Box::new(join_associativity::JoinPushThroughJoinRule),
        ],
    ));
    registry.add_rule_set(RuleSet::new(
        JOIN_LOWERING,
        vec![
            Box::new(join::JoinExtractFilterRule),
            Box::new(join::JoinToCorrelateRule),
        ],
    ));
    registry.add_rule_set(RuleSet::new(
        CALC,
        vec![
            Box::new(calc::FilterToCalcRule),
            Box::new(calc::ProjectToCalcRule),
            Box::new(calc::CalcMergeRule),
        ],
    ));
    registry.add_rule_set(RuleSet::new(
        TRIM,
        vec![Box::new(aggregate::AggregateExtractProjectRule)],
    ));
    registry.add_rule_set(RuleSet::new(
        AGGREGATE_PUSHDOWN,
        vec![Box::new(aggregate_join::AggregateJoinTransposeRule::extended())],
    ));
    registry.add_rule_set(RuleSet::new(
        MULTI_JOIN,
        vec![Box::new(multi_join::JoinToMultiJoinRule)],
    ));
    registry.add_rule_set(RuleSet::new(
        BUSHY_JOIN,
        vec![Box::new(multi_join::MultiJoinOptimizeBushyRule)],
    ));

    registry
}
