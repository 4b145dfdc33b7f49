//! # Aggregate Rules
//!
//! | rule | rewrite |
//! |---|---|
//! | [`AggregateRemoveRule`] | `Aggregate(keys, no calls, X)` -> `Project(keys, X)` when `keys` are unique in X |
//! | [`AggregateProjectMergeRule`] | `Aggregate(Project(refs, X))` -> `Aggregate(X)` |
//! | [`AggregateExtractProjectRule`] | `Aggregate(X)` -> `Aggregate(Project(used, X))` |
//! | [`AggregateReduceFunctionsRule`] | `AVG(x)` -> `CAST(SUM(x) / COUNT(x))` |
//!
//! Whenever the output order or the names of the rewritten aggregate differ from
//! the original, a projection on top restores them.
//!
//! `AggregateExtractProjectRule` undoes `AggregateProjectMergeRule`; it lives in the
//! `trim` rule set and is meant to run on its own, before a plan is handed to
//! something that benefits from narrow aggregate inputs.

use relopt_core::error::Result;
use relopt_core::fieldset::FieldSet;
use relopt_core::mapping::Mapping;
use relopt_core::pattern::Operand;
use relopt_core::rel::{AggFunc, Aggregate, AggregateCall, Project, RelKind, RelNode};
use relopt_core::rex::{Op, RexNode};
use relopt_core::rule::{Rule, RuleCall};
use std::collections::HashSet;
use tracing::trace;

/// Every input field an aggregate reads: its group keys and the fields of its calls.
fn used_fields(aggregate: &Aggregate) -> FieldSet {
    let mut used = aggregate.group_set.rebuild();
    for call in &aggregate.agg_calls {
        used.add_all(&call.referenced_fields());
    }
    used.build()
}

fn remap_aggregate(aggregate: &Aggregate, mapping: &Mapping) -> Aggregate {
    Aggregate {
        group_set: mapping.apply_set(&aggregate.group_set),
        group_sets: aggregate.group_sets.iter().map(|s| mapping.apply_set(s)).collect(),
        agg_calls: aggregate.agg_calls.iter().map(|c| c.remap(mapping)).collect(),
    }
}

/// Removes an aggregate that groups on a unique key and computes nothing.
pub struct AggregateRemoveRule;

impl Rule for AggregateRemoveRule {
    fn name(&self) -> &str {
        "AggregateRemove"
    }

    fn operand(&self) -> Operand {
        Operand::with::<Aggregate>(|a| a.agg_calls.is_empty() && a.is_simple() && !a.group_set.is_empty())
    }

    fn matches(&self, call: &RuleCall<'_>) -> bool {
        let rel = call.rel(0);
        rel.payload::<Aggregate>().is_some_and(|aggregate| {
            call.metadata()
                .are_columns_unique(rel.input(0), &aggregate.group_set)
                == Some(true)
        })
    }

    fn on_match(&self, call: &mut RuleCall<'_>) -> Result<()> {
        let rel = call.rel(0).clone();
        let Some(aggregate) = rel.payload::<Aggregate>() else {
            return Ok(());
        };
        let input = rel.input(0);
        let mut builder = call.builder();
        builder.push(input.clone());
        let keys = builder.fields_of(&aggregate.group_set.to_vec())?;
        builder.project_named(keys, rel.row_type().field_names(), false)?;
        let result = builder.build()?;
        call.transform_to(result)
    }
}

/// Merges a projection of plain columns into the aggregate above it.
///
/// Not applied if two group keys come from the same input column.
pub struct AggregateProjectMergeRule;

impl Rule for AggregateProjectMergeRule {
    fn name(&self) -> &str {
        "AggregateProjectMerge"
    }

    fn operand(&self) -> Operand {
        Operand::of(RelKind::Aggregate).exact(vec![Operand::of(RelKind::Project)])
    }

    fn on_match(&self, call: &mut RuleCall<'_>) -> Result<()> {
        let (agg_rel, project_rel) = (call.rel(0).clone(), call.rel(1).clone());
        let (Some(aggregate), Some(project)) = (agg_rel.payload::<Aggregate>(), project_rel.payload::<Project>()) else {
            return Ok(());
        };
        let input = project_rel.input(0);

        let used = used_fields(aggregate);
        let mut mapping = Mapping::partial(project.exprs.len(), input.field_count());
        let mut seen = HashSet::new();
        for i in used.iter() {
            let Some(source) = project.exprs[i].as_input_ref() else {
                trace!("AggregateProjectMerge: ${i} is not a plain column");
                return Ok(());
            };
            if !seen.insert(source) {
                trace!("AggregateProjectMerge: column ${source} is projected twice");
                return Ok(());
            }
            mapping.set(i, source);
        }

        let new_aggregate = remap_aggregate(aggregate, &mapping);
        let new_agg_rel = RelNode::aggregate(input.clone(), new_aggregate.clone())?;

        // group keys come out in input order, which the projection may have changed
        let exprs: Vec<RexNode> = aggregate
            .group_set
            .iter()
            .map(|key| new_aggregate.group_set.index_of(mapping.target_of(key)).unwrap_or(key))
            .chain(new_aggregate.group_count()..new_agg_rel.field_count())
            .map(|i| RexNode::input_ref(i, new_agg_rel.row_type().field_type(i)))
            .collect();
        let mut builder = call.builder();
        builder
            .push(new_agg_rel)
            .project_named(exprs, agg_rel.row_type().field_names(), false)?;
        let result = builder.build()?;
        call.transform_to(result)
    }
}

/// Inserts a projection below an aggregate that keeps only the fields the
/// aggregate reads.
pub struct AggregateExtractProjectRule;

impl Rule for AggregateExtractProjectRule {
    fn name(&self) -> &str {
        "AggregateExtractProject"
    }

    fn operand(&self) -> Operand {
        Operand::of(RelKind::Aggregate).predicate(|rel| rel.input(0).kind() != RelKind::Project)
    }

    fn on_match(&self, call: &mut RuleCall<'_>) -> Result<()> {
        let rel = call.rel(0).clone();
        let Some(aggregate) = rel.payload::<Aggregate>() else {
            return Ok(());
        };
        let input = rel.input(0);
        let used = used_fields(aggregate);
        if used.is_empty() || used.len() == input.field_count() {
            return Ok(());
        }

        let mapping = Mapping::target(&used, input.field_count());
        let names = input.row_type().field_names();
        let project = RelNode::project(
            input.clone(),
            used.iter()
                .map(|i| RexNode::input_ref(i, input.row_type().field_type(i)))
                .collect(),
            used.iter().map(|i| names[i].clone()).collect(),
        )?;
        let result = RelNode::aggregate(project, remap_aggregate(aggregate, &mapping))?;
        call.transform_to(result)
    }
}

/// Replaces `AVG(x)` by `SUM(x) / COUNT(x)`, cast back to the type of the
/// average. The sums and counts are shared with identical calls already present.
pub struct AggregateReduceFunctionsRule;

impl AggregateReduceFunctionsRule {
    /// Position of `call` among `calls`, adding it if no equivalent call exists.
    fn register(calls: &mut Vec<AggregateCall>, call: AggregateCall) -> usize {
        let unnamed = call.clone().with_name(None);
        if let Some(pos) = calls.iter().position(|c| c.clone().with_name(None) == unnamed) {
            return pos;
        }
        calls.push(call);
        calls.len() - 1
    }
}

impl Rule for AggregateReduceFunctionsRule {
    fn name(&self) -> &str {
        "AggregateReduceFunctions"
    }

    fn operand(&self) -> Operand {
        Operand::with::<Aggregate>(|a| a.agg_calls.iter().any(|c| c.func == AggFunc::Avg))
    }

    fn on_match(&self, call: &mut RuleCall<'_>) -> Result<()> {
        let rel = call.rel(0).clone();
        let Some(aggregate) = rel.payload::<Aggregate>() else {
            return Ok(());
        };
        let input = rel.input(0);
        let group_count = aggregate.group_count();

        // non-AVG calls first, so that AVG can share them
        let mut calls: Vec<AggregateCall> = Vec::new();
        let mut positions: Vec<Option<usize>> = Vec::new();
        for agg_call in &aggregate.agg_calls {
            if agg_call.func == AggFunc::Avg {
                positions.push(None);
            } else {
                positions.push(Some(Self::register(&mut calls, agg_call.clone())));
            }
        }
        let mut averages = Vec::new();
        for agg_call in aggregate.agg_calls.iter().filter(|c| c.func == AggFunc::Avg) {
            let derive = |func| {
                let mut derived = AggregateCall::create(
                    func,
                    agg_call.distinct,
                    agg_call.args.clone(),
                    agg_call.filter_arg,
                    None,
                    input.row_type(),
                    group_count,
                );
                derived.collation = agg_call.collation.clone();
                derived
            };
            let sum = Self::register(&mut calls, derive(AggFunc::Sum));
            let count = Self::register(&mut calls, derive(AggFunc::Count));
            averages.push((sum, count, agg_call.data_type));
        }

        let new_aggregate = Aggregate {
            group_set: aggregate.group_set.clone(),
            group_sets: aggregate.group_sets.clone(),
            agg_calls: calls,
        };
        let new_agg_rel = RelNode::aggregate(input.clone(), new_aggregate)?;
        let field = |i: usize| RexNode::input_ref(i, new_agg_rel.row_type().field_type(i));

        let mut exprs: Vec<RexNode> = (0..group_count).map(field).collect();
        let mut averages = averages.into_iter();
        for position in positions {
            match position {
                Some(pos) => exprs.push(field(group_count + pos)),
                None => {
                    let Some((sum, count, data_type)) = averages.next() else {
                        return Ok(());
                    };
                    let quotient = RexNode::call(
                        Op::Div,
                        vec![field(group_count + sum), field(group_count + count)],
                    );
                    exprs.push(RexNode::cast(quotient, data_type));
                }
            }
        }

        let mut builder = call.builder();
        builder
            .push(new_agg_rel.clone())
            .project_named(exprs, rel.row_type().field_names(), false)?;
        let result = builder.build()?;
        call.transform_to(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::fire;
    use relopt_core::builder::{GroupKey, RelBuilder};
    use relopt_core::rel::RelRef;
    use relopt_core::testing::{emp_scan, field};
    use std::sync::Arc;

    fn call(func: AggFunc, args: Vec<usize>, input: &RelRef, group_count: usize) -> AggregateCall {
        AggregateCall::create(func, false, args, None, None, input.row_type(), group_count)
    }

    fn aggregate(input: &RelRef, keys: &[usize], calls: Vec<AggregateCall>) -> RelRef {
        RelNode::aggregate(input.clone(), Aggregate::simple(FieldSet::of(keys.iter().copied()), calls)).unwrap()
    }

    #[test]
    fn test_remove_aggregate_on_unique_key() {
        let emp = emp_scan();
        let agg = aggregate(&emp, &[0], vec![]);
        let result = fire(&AggregateRemoveRule, &agg);
        assert_eq!(result.len(), 1);
        let rel = &result[0];
        assert_eq!(rel.kind(), RelKind::Project);
        assert!(Arc::ptr_eq(rel.input(0), &emp));
        assert_eq!(rel.row_type(), agg.row_type());
    }

    #[test]
    fn test_keep_aggregate_on_non_unique_key() {
        let emp = emp_scan();
        assert!(fire(&AggregateRemoveRule, &aggregate(&emp, &[7], vec![])).is_empty());
        let count = call(AggFunc::Count, vec![], &emp, 1);
        assert!(fire(&AggregateRemoveRule, &aggregate(&emp, &[0], vec![count])).is_empty());
    }

    #[test]
    fn test_merge_projection_of_columns() {
        let emp = emp_scan();
        // Project(sal, deptno), then GROUP BY deptno with SUM(sal)
        let project = RelNode::project(
            emp.clone(),
            vec![field(&emp, 5, 0), field(&emp, 7, 0)],
            vec!["s".into(), "d".into()],
        )
        .unwrap();
        let sum = call(AggFunc::Sum, vec![0], &project, 1);
        let agg = aggregate(&project, &[1], vec![sum]);

        let result = fire(&AggregateProjectMergeRule, &agg);
        assert_eq!(result.len(), 1);
        let rel = &result[0];
        assert!(rel.row_type().same_types(agg.row_type()));
        assert_eq!(rel.row_type().field_names(), agg.row_type().field_names());
        let merged = rel.input(0).payload::<Aggregate>().unwrap();
        assert_eq!(merged.group_set, FieldSet::of([7]));
        assert_eq!(merged.agg_calls[0].args, vec![5]);
        assert!(Arc::ptr_eq(rel.input(0).input(0), &emp));
    }

    #[test]
    fn test_merge_restores_key_order() {
        let emp = emp_scan();
        let project = RelNode::project(
            emp.clone(),
            vec![field(&emp, 7, 0), field(&emp, 2, 0)],
            vec!["deptno".into(), "job".into()],
        )
        .unwrap();
        let agg = aggregate(&project, &[0, 1], vec![]);
        let result = fire(&AggregateProjectMergeRule, &agg);
        assert_eq!(result.len(), 1);
        let rel = &result[0];
        assert_eq!(rel.row_type(), agg.row_type());
        let restore = rel.payload::<Project>().unwrap();
        assert_eq!(restore.exprs[0].as_input_ref(), Some(1));
        assert_eq!(restore.exprs[1].as_input_ref(), Some(0));
    }

    #[test]
    fn test_merge_skips_computed_key() {
        let emp = emp_scan();
        let project = RelNode::project(
            emp.clone(),
            vec![RexNode::call(Op::Add, vec![field(&emp, 5, 0), field(&emp, 6, 0)])],
            vec!["total".into()],
        )
        .unwrap();
        let agg = aggregate(&project, &[0], vec![]);
        assert!(fire(&AggregateProjectMergeRule, &agg).is_empty());
    }

    #[test]
    fn test_extract_project_keeps_used_fields() {
        let emp = emp_scan();
        let sum = call(AggFunc::Sum, vec![5], &emp, 1);
        let agg = aggregate(&emp, &[7], vec![sum]);

        let result = fire(&AggregateExtractProjectRule, &agg);
        assert_eq!(result.len(), 1);
        let rel = &result[0];
        assert_eq!(rel.row_type(), agg.row_type());
        let new_agg = rel.payload::<Aggregate>().unwrap();
        assert_eq!(new_agg.group_set, FieldSet::of([1]));
        assert_eq!(new_agg.agg_calls[0].args, vec![0]);
        assert_eq!(rel.input(0).field_count(), 2);

        // the projection it inserted blocks a second application
        assert!(fire(&AggregateExtractProjectRule, rel).is_empty());
    }

    #[test]
    fn test_reduce_avg_shares_sum() {
        let emp = emp_scan();
        let mut b = RelBuilder::new();
        b.push(emp.clone());
        let avg = call(AggFunc::Avg, vec![5], &emp, 1);
        let sum = call(AggFunc::Sum, vec![5], &emp, 1);
        let agg = b
            .aggregate(GroupKey::of([7]), vec![avg, sum])
            .unwrap()
            .build()
            .unwrap();

        let result = fire(&AggregateReduceFunctionsRule, &agg);
        assert_eq!(result.len(), 1);
        let rel = &result[0];
        assert_eq!(rel.row_type(), agg.row_type());
        let reduced = rel.input(0).payload::<Aggregate>().unwrap();
        let funcs: Vec<AggFunc> = reduced.agg_calls.iter().map(|c| c.func).collect();
        assert_eq!(funcs, vec![AggFunc::Sum, AggFunc::Count]);

        assert!(fire(&AggregateReduceFunctionsRule, rel).is_empty());
    }
}
