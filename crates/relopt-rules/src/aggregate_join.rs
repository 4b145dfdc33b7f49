//! # Aggregate-Join Transpose
//!
//! [`AggregateJoinTransposeRule`] pushes an aggregate below an inner equi-join, so
//! that each join input is reduced to one row per key before it is joined.
//!
//! ```text
//! Before: Aggregate(group=[name], COUNT(*), SUM(sal),
//!             Join(emps, depts, emps.deptno = depts.deptno))
//! After:  Aggregate(group=[name], $SUM0(c), SUM(s),
//!             Join(Aggregate(group=[deptno], c=COUNT(*), s=SUM(sal), emps),
//!                  depts, $0 = $3))
//! ```
//!
//! ## Sides
//!
//! Every join input is grouped on the columns it contributes to the group key or to
//! the join condition. An input that is already unique on those columns is only
//! projected; the others get an aggregate of their own. Each aggregate call is
//! split into a partial call on the input that holds its arguments and, for `COUNT`
//! and `SUM`, a `COUNT(*)` on an aggregated input that does not. An aggregate on
//! top combines the partial results:
//!
//! | call | partial | combined |
//! |---|---|---|
//! | `COUNT` | `COUNT` | `$SUM0` of the product of the partial counts |
//! | `SUM`, `$SUM0` | same call, `COUNT(*)` on the other side | same call over `sum * count` |
//! | `MIN`, `MAX` | same call | same call |
//!
//! The rule does not fire when both inputs are already unique: nothing is gained,
//! and the aggregate and join may be the result of an earlier application.

use relopt_core::builder::GroupKey;
use relopt_core::error::Result;
use relopt_core::fieldset::FieldSet;
use relopt_core::mapping::Mapping;
use relopt_core::pattern::Operand;
use relopt_core::rel::{AggFunc, Aggregate, AggregateCall, Join, JoinType, RelRef};
use relopt_core::rex::{LiteralValue, Op, RexNode};
use relopt_core::rule::{Rule, RuleCall};
use relopt_core::shuttle::permute_inputs;
use relopt_core::types::DataType;
use std::collections::HashMap;
use tracing::trace;

/// Pushes an aggregate below an inner equi-join.
///
/// Without `allow_functions` only aggregates that compute nothing (a `DISTINCT`
/// over the join) are pushed.
#[derive(Default)]
pub struct AggregateJoinTransposeRule {
    pub allow_functions: bool,
}

impl AggregateJoinTransposeRule {
    /// The rule with aggregate calls allowed.
    pub fn extended() -> Self {
        Self {
            allow_functions: true,
        }
    }
}

fn is_supported(aggregate: &Aggregate, allow_functions: bool) -> bool {
    aggregate.is_simple()
        && (allow_functions || aggregate.agg_calls.is_empty())
        && aggregate.agg_calls.iter().all(|c| {
            c.func.is_splittable() && !c.distinct && c.filter_arg.is_none() && c.collation.is_empty()
        })
}

/// Whether every conjunct of `condition` equates a left column with a right one.
fn is_equi_join(condition: &RexNode, left_width: usize) -> bool {
    condition.conjunctions().iter().all(|conjunct| match conjunct {
        RexNode::Call {
            op: Op::Eq,
            operands,
            ..
        } => match (operands[0].as_input_ref(), operands[1].as_input_ref()) {
            (Some(a), Some(b)) => (a < left_width) != (b < left_width),
            _ => false,
        },
        _ => false,
    })
}

/// Value of a call over a group of exactly one row holding `arg`.
fn singleton(func: AggFunc, arg: RexNode) -> RexNode {
    if func != AggFunc::Count {
        return arg;
    }
    let one = RexNode::literal(LiteralValue::Int(1), DataType::bigint());
    if !arg.data_type().nullable {
        return one;
    }
    let zero = RexNode::literal(LiteralValue::Int(0), DataType::bigint());
    RexNode::call(Op::Case, vec![RexNode::call(Op::IsNull, vec![arg]), zero, one])
}

/// Position of `item` in `list`, appending it if absent.
fn register<T: PartialEq>(list: &mut Vec<T>, item: T) -> usize {
    match list.iter().position(|e| *e == item) {
        Some(pos) => pos,
        None => {
            list.push(item);
            list.len() - 1
        }
    }
}

/// A join input after the rewrite, and where each call's partial result ended up.
struct Side {
    input: RelRef,
    aggregated: bool,
    /// Call index in the original aggregate -> field of `input`.
    split: HashMap<usize, usize>,
}

impl Rule for AggregateJoinTransposeRule {
    fn name(&self) -> &str {
        if self.allow_functions {
            "AggregateJoinTransposeExtended"
        } else {
            "AggregateJoinTranspose"
        }
    }

    fn operand(&self) -> Operand {
        let allow_functions = self.allow_functions;
        Operand::with::<Aggregate>(move |a| is_supported(a, allow_functions))
            .exact(vec![Operand::with::<Join>(|j| j.join_type == JoinType::Inner)])
    }

    fn on_match(&self, call: &mut RuleCall<'_>) -> Result<()> {
        let (agg_rel, join_rel) = (call.rel(0).clone(), call.rel(1).clone());
        let (Some(aggregate), Some(join)) = (agg_rel.payload::<Aggregate>(), join_rel.payload::<Join>()) else {
            return Ok(());
        };
        let left_width = join_rel.input(0).field_count();
        if !join.condition.is_deterministic() || !is_equi_join(&join.condition, left_width) {
            trace!("{}: not an equi-join", call.rule_name());
            return Ok(());
        }
        let below = aggregate.group_set.union(&join.condition.referenced_fields());

        let md = call.metadata();
        let mut pairs = Vec::new();
        let mut sides = Vec::with_capacity(2);
        let mut below_offset = 0;
        for (s, offset) in [(0, 0), (1, left_width)] {
            let input = join_rel.input(s);
            let range = FieldSet::range(offset, offset + input.field_count());
            let key_columns = below.intersect(&range);
            if key_columns.is_empty() {
                trace!("{}: input {s} has no key", call.rule_name());
                return Ok(());
            }
            for (i, column) in key_columns.iter().enumerate() {
                pairs.push((column, below_offset + i));
            }
            let key = key_columns.shift(-(offset as isize));
            let field = |i: usize| RexNode::input_ref(i, input.row_type().field_type(i));
            let local_args = |c: &AggregateCall| -> Vec<usize> { c.args.iter().map(|a| a - offset).collect() };
            let in_side = |c: &AggregateCall| c.args.iter().all(|a| range.contains(*a));

            let mut split = HashMap::new();
            let mut b = call.builder();
            let aggregated = md.are_columns_unique(input, &key) != Some(true);
            if aggregated {
                let mut calls: Vec<AggregateCall> = Vec::new();
                for (i, agg_call) in aggregate.agg_calls.iter().enumerate() {
                    let partial = if in_side(agg_call) {
                        agg_call.func
                    } else if matches!(agg_call.func, AggFunc::Count | AggFunc::Sum | AggFunc::Sum0) {
                        AggFunc::Count
                    } else {
                        continue;
                    };
                    let args = if in_side(agg_call) { local_args(agg_call) } else { vec![] };
                    let partial = AggregateCall::create(partial, false, args, None, None, input.row_type(), key.len());
                    split.insert(i, key.len() + register(&mut calls, partial));
                }
                b.push(input.clone()).aggregate(GroupKey::of(key.iter()), calls)?;
            } else {
                let mut exprs: Vec<RexNode> = key.iter().map(field).collect();
                for (i, agg_call) in aggregate.agg_calls.iter().enumerate() {
                    if agg_call.args.is_empty() || !in_side(agg_call) {
                        continue;
                    }
                    let value = singleton(agg_call.func, field(local_args(agg_call)[0]));
                    let position = match value.as_input_ref().and_then(|i| key.index_of(i)) {
                        Some(position) => position,
                        None => register(&mut exprs, value),
                    };
                    split.insert(i, position);
                }
                b.push(input.clone()).project(exprs)?;
            }
            let new_input = b.build()?;
            below_offset += new_input.field_count();
            sides.push(Side {
                input: new_input,
                aggregated,
                split,
            });
        }
        if sides.iter().all(|side| !side.aggregated) {
            trace!("{}: both inputs are already unique", call.rule_name());
            return Ok(());
        }

        let mut mapping = Mapping::partial(join_rel.field_count(), below_offset);
        for (source, target) in pairs {
            mapping.set(source, target);
        }
        let condition = permute_inputs(&join.condition, &mapping);
        let mut b = call.builder();
        b.push(sides[0].input.clone())
            .push(sides[1].input.clone())
            .join(JoinType::Inner, condition)?;
        let joined = b.peek()?.row_type().clone();
        let new_left_width = sides[0].input.field_count();

        // (function, projected field, name) of each combining call
        let mut projects = RexNode::input_refs(&joined, 0);
        let mut combined = Vec::with_capacity(aggregate.agg_calls.len());
        for (i, agg_call) in aggregate.agg_calls.iter().enumerate() {
            let merges: Vec<RexNode> = [
                sides[0].split.get(&i).copied(),
                sides[1].split.get(&i).map(|r| r + new_left_width),
            ]
            .into_iter()
            .flatten()
            .map(|f| RexNode::input_ref(f, joined.field_type(f)))
            .collect();
            let (func, value) = match (agg_call.func, merges.as_slice()) {
                (AggFunc::Min | AggFunc::Max, [value]) => (agg_call.func, value.clone()),
                (AggFunc::Count | AggFunc::Sum | AggFunc::Sum0, [value]) => (top_func(agg_call.func), value.clone()),
                (AggFunc::Count | AggFunc::Sum | AggFunc::Sum0, [left, right]) => (
                    top_func(agg_call.func),
                    RexNode::call(Op::Mul, vec![left.clone(), right.clone()]),
                ),
                _ => {
                    trace!("{}: cannot combine {agg_call}", call.rule_name());
                    return Ok(());
                }
            };
            combined.push((func, register(&mut projects, value), agg_call.name.clone()));
        }
        b.project(projects)?;

        let group_set = mapping.apply_set(&aggregate.group_set);
        let projected = b.peek()?.row_type().clone();
        let calls = combined
            .into_iter()
            .map(|(func, arg, name)| AggregateCall::create(func, false, vec![arg], None, name, &projected, group_set.len()))
            .collect();
        b.aggregate(GroupKey::of(group_set.iter()), calls)?
            .convert(agg_rel.row_type(), true)?;
        let result = b.build()?;
        call.transform_to(result)
    }
}

/// Function that combines partial results of `func`.
fn top_func(func: AggFunc) -> AggFunc {
    match func {
        AggFunc::Count => AggFunc::Sum0,
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::fire;
    use relopt_core::rel::{Project, RelKind, RelNode};
    use relopt_core::testing::{dept_scan, emp_scan, eq, field, gt, EMP_WIDTH};

    fn emp_join_dept(condition: impl FnOnce(&RelRef, &RelRef) -> RexNode) -> RelRef {
        let (emp, dept) = (emp_scan(), dept_scan());
        let cond = condition(&emp, &dept);
        RelNode::join(emp, dept, JoinType::Inner, cond).unwrap()
    }

    fn on_deptno(emp: &RelRef, dept: &RelRef) -> RexNode {
        eq(field(emp, 7, 0), field(dept, 0, EMP_WIDTH))
    }

    fn aggregate(input: &RelRef, keys: &[usize], calls: Vec<AggregateCall>) -> RelRef {
        RelNode::aggregate(input.clone(), Aggregate::simple(FieldSet::of(keys.iter().copied()), calls)).unwrap()
    }

    #[test]
    fn test_distinct_pushed_to_non_unique_side() {
        // SELECT DISTINCT d.name FROM emps e JOIN depts d ON e.deptno = d.deptno
        let join = emp_join_dept(on_deptno);
        let agg = aggregate(&join, &[EMP_WIDTH + 1], vec![]);
        let result = fire(&AggregateJoinTransposeRule::default(), &agg);
        assert_eq!(result.len(), 1);
        let rel = &result[0];
        assert_eq!(rel.kind(), RelKind::Aggregate);
        assert!(rel.row_type().same_types(agg.row_type()));

        let new_join = rel.input(0);
        assert_eq!(new_join.kind(), RelKind::Join);
        let left = new_join.input(0).payload::<Aggregate>().unwrap();
        assert_eq!(left.group_set, FieldSet::of([7]));
        // depts is unique on deptno and its projection keeps every column
        assert_eq!(new_join.input(1).kind(), RelKind::Scan);
        assert_eq!(
            new_join.payload::<Join>().unwrap().condition.referenced_fields(),
            FieldSet::of([0, 1])
        );
        assert_eq!(rel.payload::<Aggregate>().unwrap().group_set, FieldSet::of([2]));
    }

    #[test]
    fn test_calls_split_across_join() {
        // SELECT d.name, COUNT(*), SUM(e.sal) ... GROUP BY d.name
        let join = emp_join_dept(on_deptno);
        let count = AggregateCall::create(AggFunc::Count, false, vec![], None, Some("c".into()), join.row_type(), 1);
        let sum = AggregateCall::create(AggFunc::Sum, false, vec![5], None, Some("s".into()), join.row_type(), 1);
        let agg = aggregate(&join, &[EMP_WIDTH + 1], vec![count, sum]);

        assert!(fire(&AggregateJoinTransposeRule::default(), &agg).is_empty());
        let result = fire(&AggregateJoinTransposeRule::extended(), &agg);
        assert_eq!(result.len(), 1);
        let rel = &result[0];
        assert!(rel.row_type().same_types(agg.row_type()));
        assert_eq!(rel.row_type().field_names(), agg.row_type().field_names());

        let top = rel.payload::<Aggregate>().unwrap();
        let funcs: Vec<AggFunc> = top.agg_calls.iter().map(|c| c.func).collect();
        assert_eq!(funcs, vec![AggFunc::Sum0, AggFunc::Sum]);

        let below = rel.input(0).input(0).payload::<Aggregate>().unwrap();
        let funcs: Vec<AggFunc> = below.agg_calls.iter().map(|c| c.func).collect();
        assert_eq!(funcs, vec![AggFunc::Count, AggFunc::Sum]);
        assert_eq!(below.agg_calls[1].args, vec![5]);
    }

    #[test]
    fn test_count_multiplies_partial_counts() {
        // both sides aggregated: GROUP BY e.job with COUNT(*) over a join on dept name
        let join = emp_join_dept(|emp, dept| eq(field(emp, 2, 0), field(dept, 1, EMP_WIDTH)));
        let count = AggregateCall::create(AggFunc::Count, false, vec![], None, Some("c".into()), join.row_type(), 1);
        let agg = aggregate(&join, &[2], vec![count]);
        let result = fire(&AggregateJoinTransposeRule::extended(), &agg);
        assert_eq!(result.len(), 1);
        let rel = &result[0];
        assert!(rel.row_type().same_types(agg.row_type()));

        let project = rel.input(0).payload::<Project>().unwrap();
        let product = project.exprs.last().unwrap();
        assert!(matches!(product, RexNode::Call { op: Op::Mul, .. }));
        let new_join = rel.input(0).input(0);
        assert_eq!(new_join.input(0).kind(), RelKind::Aggregate);
        assert_eq!(new_join.input(1).kind(), RelKind::Aggregate);
    }

    #[test]
    fn test_not_applied() {
        // both sides unique on their keys
        let join = emp_join_dept(on_deptno);
        let agg = aggregate(&join, &[0, EMP_WIDTH], vec![]);
        assert!(fire(&AggregateJoinTransposeRule::default(), &agg).is_empty());

        // non-equi condition
        let theta = emp_join_dept(|emp, dept| gt(field(emp, 7, 0), field(dept, 0, EMP_WIDTH)));
        assert!(fire(&AggregateJoinTransposeRule::default(), &aggregate(&theta, &[EMP_WIDTH + 1], vec![])).is_empty());

        // outer join
        let (emp, dept) = (emp_scan(), dept_scan());
        let left = RelNode::join(emp.clone(), dept.clone(), JoinType::Left, on_deptno(&emp, &dept)).unwrap();
        assert!(fire(&AggregateJoinTransposeRule::default(), &aggregate(&left, &[EMP_WIDTH + 1], vec![])).is_empty());

        // a side without key columns
        let cross = emp_join_dept(|_, _| RexNode::true_literal());
        assert!(fire(&AggregateJoinTransposeRule::default(), &aggregate(&cross, &[0], vec![])).is_empty());
    }
}
