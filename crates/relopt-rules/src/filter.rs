//! # Filter Transposition Rules
//!
//! These rules move filters closer to the data they test, so that fewer rows flow
//! through the operators above:
//!
//! ```text
//! Filter(c2, Filter(c1, X))      ->  Filter(c1 AND c2, X)                 FilterMerge
//! Filter(c, Project(e, X))       ->  Project(e, Filter(c[e], X))          FilterProjectTranspose
//! Filter(c, Aggregate(X))        ->  Aggregate(Filter(c', X))             FilterAggregateTranspose
//! Filter(c, Union(X, Y))         ->  Union(Filter(c, X), Filter(c, Y))    FilterSetOpTranspose
//! Filter(c, Correlate(L, R))     ->  Correlate(Filter(c, L), R)           FilterCorrelate
//! ```
//!
//! Filters above joins are handled by [`crate::filter_join`].
//!
//! ## Grouping sets
//!
//! A filter above an aggregate only sees group-key columns and aggregate results.
//! A conjunct over group keys can be evaluated before grouping, but only if every
//! column it reads is part of *every* grouping set: in a grouping set that rolls a
//! column up, that column is NULL in the output, so the filter would have tested a
//! different value above the aggregate than below it. For the same reason nothing
//! is pushed below an aggregate with an empty grouping set (the grand total row
//! exists even when no input row survives).

use relopt_core::error::Result;
use relopt_core::fieldset::FieldSet;
use relopt_core::pattern::Operand;
use relopt_core::rel::{Aggregate, Correlate, Filter, JoinType, Project, RelKind, SetOp};
use relopt_core::rex::RexNode;
use relopt_core::rule::{Rule, RuleCall};
use relopt_core::shuttle::{convert_inputs, push_past_project, shift};
use tracing::trace;

fn filter_over(kind: RelKind) -> Operand {
    Operand::of(RelKind::Filter).exact(vec![Operand::of(kind)])
}

fn condition(call: &RuleCall<'_>) -> RexNode {
    call.rel(0)
        .payload::<Filter>()
        .map(|f| f.condition.clone())
        .unwrap_or_else(RexNode::true_literal)
}

/// `Filter(Filter(X))` -> `Filter(X)` on the conjunction of both conditions.
pub struct FilterMergeRule;

impl Rule for FilterMergeRule {
    fn name(&self) -> &str {
        "FilterMerge"
    }

    fn operand(&self) -> Operand {
        filter_over(RelKind::Filter)
    }

    fn on_match(&self, call: &mut RuleCall<'_>) -> Result<()> {
        let top = condition(call);
        let mut b = call.builder();
        // the builder merges a filter into a filter on top of its stack
        let merged = b.push(call.rel(1).clone()).filter([top])?.build()?;
        call.transform_to(merged)
    }
}

/// Pushes a filter below a projection by substituting the projected expressions
/// into the condition.
pub struct FilterProjectTransposeRule;

impl Rule for FilterProjectTransposeRule {
    fn name(&self) -> &str {
        "FilterProjectTranspose"
    }

    fn operand(&self) -> Operand {
        filter_over(RelKind::Project)
    }

    fn on_match(&self, call: &mut RuleCall<'_>) -> Result<()> {
        let cond = condition(call);
        let project_rel = call.rel(1).clone();
        let Some(project) = project_rel.payload::<Project>() else {
            return Ok(());
        };
        if cond.references_correlation(None) {
            trace!("FilterProjectTranspose: condition is correlated");
            return Ok(());
        }
        let read = cond.referenced_fields();
        if read.iter().any(|i| !project.exprs[i].is_deterministic()) {
            return Ok(());
        }

        let pushed = push_past_project(&cond, &project.exprs);
        let mut b = call.builder();
        let rel = b
            .push(project_rel.input(0).clone())
            .filter([pushed])?
            .project_named(project.exprs.clone(), project.names.clone(), false)?
            .build()?;
        call.transform_to(rel)
    }
}

/// Pushes the conjuncts of a filter that only read columns common to every
/// grouping set below an aggregate.
pub struct FilterAggregateTransposeRule;

impl Rule for FilterAggregateTransposeRule {
    fn name(&self) -> &str {
        "FilterAggregateTranspose"
    }

    fn operand(&self) -> Operand {
        filter_over(RelKind::Aggregate)
    }

    fn on_match(&self, call: &mut RuleCall<'_>) -> Result<()> {
        let cond = condition(call);
        let agg_rel = call.rel(1).clone();
        let Some(aggregate) = agg_rel.payload::<Aggregate>() else {
            return Ok(());
        };
        let input = agg_rel.input(0);
        let group_count = aggregate.group_count();
        let common = aggregate.common_group_keys();

        // aggregate output position -> input ordinal, for the group keys
        let mut adjustments = vec![0isize; agg_rel.field_count()];
        for (pos, key) in aggregate.group_set.iter().enumerate() {
            adjustments[pos] = key as isize - pos as isize;
        }

        let mut pushed = Vec::new();
        let mut remaining = Vec::new();
        for conjunct in cond.conjunctions() {
            let refs = conjunct.referenced_fields();
            let keys = FieldSet::of(
                refs.iter()
                    .filter(|&r| r < group_count)
                    .filter_map(|r| aggregate.group_set.nth(r)),
            );
            let pushable = refs.iter().all(|r| r < group_count)
                && common.contains_all(&keys)
                && !aggregate.has_empty_group()
                && conjunct.is_deterministic();
            if pushable {
                pushed.push(convert_inputs(
                    &conjunct,
                    &adjustments,
                    Some(&input.row_type().fields),
                ));
            } else {
                remaining.push(conjunct);
            }
        }
        if pushed.is_empty() {
            trace!("FilterAggregateTranspose: no conjunct within the common group keys");
            return Ok(());
        }

        let mut b = call.builder();
        let filtered = b.push(input.clone()).filter(pushed)?.build()?;
        let new_agg = agg_rel.copy(vec![filtered])?;
        let rel = b.push(new_agg).filter(remaining)?.build()?;
        call.transform_to(rel)
    }
}

/// Pushes a filter into every input of a set operation.
pub struct FilterSetOpTransposeRule;

impl Rule for FilterSetOpTransposeRule {
    fn name(&self) -> &str {
        "FilterSetOpTranspose"
    }

    fn operand(&self) -> Operand {
        filter_over(RelKind::SetOp)
    }

    fn on_match(&self, call: &mut RuleCall<'_>) -> Result<()> {
        let cond = condition(call);
        let set_op = call.rel(1).clone();
        if set_op.payload::<SetOp>().is_none() {
            return Ok(());
        }
        let adjustments = vec![0isize; set_op.field_count()];
        let mut b = call.builder();
        let mut inputs = Vec::with_capacity(set_op.inputs().len());
        for input in set_op.inputs() {
            // retype against the input, whose columns may be narrower than the union's
            let retyped = convert_inputs(&cond, &adjustments, Some(&input.row_type().fields));
            inputs.push(b.push(input.clone()).filter([retyped])?.build()?);
        }
        call.transform_to(set_op.copy(inputs)?)
    }
}

/// Pushes the conjuncts of a filter above a correlate that read only the left
/// input into the left input (and, for inner correlates, right-only conjuncts into
/// the right input).
pub struct FilterCorrelateRule;

impl Rule for FilterCorrelateRule {
    fn name(&self) -> &str {
        "FilterCorrelate"
    }

    fn operand(&self) -> Operand {
        filter_over(RelKind::Correlate)
    }

    fn on_match(&self, call: &mut RuleCall<'_>) -> Result<()> {
        let cond = condition(call);
        let correlate = call.rel(1).clone();
        let Some(payload) = correlate.payload::<Correlate>() else {
            return Ok(());
        };
        let left = correlate.input(0);
        let right = correlate.input(1);
        let left_width = left.field_count();
        let left_bits = FieldSet::range_to(left_width);
        let right_bits = FieldSet::range(left_width, left_width + right.field_count());

        let mut to_left = Vec::new();
        let mut to_right = Vec::new();
        let mut remaining = Vec::new();
        for conjunct in cond.conjunctions() {
            let refs = conjunct.referenced_fields();
            if left_bits.contains_all(&refs) {
                to_left.push(conjunct);
            } else if payload.join_type == JoinType::Inner && right_bits.contains_all(&refs) {
                to_right.push(shift(&conjunct, -(left_width as isize)));
            } else {
                remaining.push(conjunct);
            }
        }
        if to_left.is_empty() && to_right.is_empty() {
            return Ok(());
        }

        let mut b = call.builder();
        let new_left = b.push(left.clone()).filter(to_left)?.build()?;
        let new_right = b.push(right.clone()).filter(to_right)?.build()?;
        let rel = b
            .push(correlate.copy(vec![new_left, new_right])?)
            .filter(remaining)?
            .build()?;
        call.transform_to(rel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relopt_core::builder::{GroupKey, RelBuilder};
    use crate::test_util::fire;
    use relopt_core::rel::{AggFunc, AggregateCall, RelNode};
    use relopt_core::rex::Op;
    use relopt_core::testing::{emp_scan, eq, field, gt, lit};

    #[test]
    fn test_filter_merge() {
        let mut b = RelBuilder::new();
        b.push(emp_scan());
        let c1 = gt(b.field(0).unwrap(), lit(1));
        let c2 = gt(b.field(5).unwrap(), lit(2));
        let inner = b.filter([c1.clone()]).unwrap().build().unwrap();
        let top = RelNode::filter(inner, c2.clone()).unwrap();
        let result = fire(&FilterMergeRule, &top);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].input(0).kind(), RelKind::Scan);
        assert_eq!(
            result[0].payload::<Filter>().unwrap().condition,
            RexNode::and([c1, c2])
        );
    }

    #[test]
    fn test_filter_project_transpose() {
        let emp = emp_scan();
        let project = RelNode::project(
            emp.clone(),
            vec![field(&emp, 7, 0), field(&emp, 5, 0)],
            vec!["d".into(), "s".into()],
        )
        .unwrap();
        let filter = RelNode::filter(project.clone(), gt(field(&project, 1, 0), lit(1000))).unwrap();
        let result = fire(&FilterProjectTransposeRule, &filter);
        assert_eq!(result.len(), 1);
        let rel = &result[0];
        assert_eq!(rel.kind(), RelKind::Project);
        let pushed = rel.input(0).payload::<Filter>().unwrap();
        assert_eq!(pushed.condition.referenced_fields(), FieldSet::of([5]));
        assert_eq!(rel.row_type(), filter.row_type());
    }

    #[test]
    fn test_filter_aggregate_pushes_group_key_conjunct() {
        let emp = emp_scan();
        let sum = AggregateCall::create(AggFunc::Sum, false, vec![5], None, None, emp.row_type(), 1);
        let mut b = RelBuilder::new();
        let agg = b
            .push(emp.clone())
            .aggregate(GroupKey::of([7]), vec![sum])
            .unwrap()
            .build()
            .unwrap();
        let on_key = eq(field(&agg, 0, 0), lit(10));
        let on_sum = gt(field(&agg, 1, 0), lit(5000));
        let filter = RelNode::filter(agg.clone(), RexNode::and([on_key, on_sum.clone()])).unwrap();

        let result = fire(&FilterAggregateTransposeRule, &filter);
        assert_eq!(result.len(), 1);
        let rel = &result[0];
        assert_eq!(rel.payload::<Filter>().unwrap().condition, on_sum);
        let below = rel.input(0).input(0).payload::<Filter>().unwrap();
        assert_eq!(below.condition.referenced_fields(), FieldSet::of([7]));
    }

    #[test]
    fn test_filter_aggregate_respects_grouping_sets() {
        let emp = emp_scan();
        // GROUPING SETS ((deptno, job), (deptno))
        let key = GroupKey::with_sets(FieldSet::of([2, 7]), vec![FieldSet::of([2, 7]), FieldSet::of([7])]);
        let mut b = RelBuilder::new();
        let agg = b.push(emp).aggregate(key, vec![]).unwrap().build().unwrap();

        // job is rolled up in the second grouping set
        let on_job = RexNode::call(Op::IsNull, vec![field(&agg, 0, 0)]);
        let filter = RelNode::filter(agg.clone(), on_job).unwrap();
        assert!(fire(&FilterAggregateTransposeRule, &filter).is_empty());

        // deptno is in every grouping set
        let on_dept = eq(field(&agg, 1, 0), lit(10));
        let filter = RelNode::filter(agg, on_dept).unwrap();
        let result = fire(&FilterAggregateTransposeRule, &filter);
        assert_eq!(result.len(), 1);
        let below = result[0].input(0).payload::<Filter>().unwrap();
        assert_eq!(below.condition.referenced_fields(), FieldSet::of([7]));
        assert_eq!(result[0].row_type(), filter.row_type());
    }

    #[test]
    fn test_filter_not_pushed_below_grand_total() {
        let emp = emp_scan();
        let count = AggregateCall::create(AggFunc::Count, false, vec![], None, None, emp.row_type(), 0);
        let mut b = RelBuilder::new();
        let agg = b.push(emp).aggregate(GroupKey::empty(), vec![count]).unwrap().build().unwrap();
        let filter = RelNode::filter(agg, eq(lit(1), lit(1))).unwrap();
        assert!(fire(&FilterAggregateTransposeRule, &filter).is_empty());
    }

    #[test]
    fn test_filter_set_op_transpose() {
        let emp = emp_scan();
        let union = RelNode::set_op(relopt_core::rel::SetOpKind::Union, true, vec![emp.clone(), emp.clone()]).unwrap();
        let filter = RelNode::filter(union, gt(field(&emp, 0, 0), lit(1))).unwrap();
        let result = fire(&FilterSetOpTransposeRule, &filter);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].kind(), RelKind::SetOp);
        assert!(result[0].inputs().iter().all(|i| i.kind() == RelKind::Filter));
    }
}
