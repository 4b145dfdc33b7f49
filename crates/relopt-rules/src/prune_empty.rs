//! # Empty Propagation
//!
//! An operator over an input that provably produces no rows (as reported by
//! [`RelMetadataQuery::is_empty`], typically an empty `Values`) often produces no
//! rows itself and can be replaced by an empty `Values` of its row type. The
//! replacement then makes the operator above it empty in turn.
//!
//! [`PruneEmptyRule`] is one rule type instantiated once per [`PruneEmpty`] shape.
//!
//! ## Exceptions
//!
//! - An aggregate with an empty grouping set returns its grand-total row even over
//!   empty input.
//! - An outer join keeps the rows of its preserved side when the other side is
//!   empty; an anti join with an empty right input returns its left input.
//! - Set operations only lose their empty inputs, except that an empty first input
//!   of `MINUS` or any empty input of `INTERSECT` empties the whole operation.
//!
//! [`RelMetadataQuery::is_empty`]: relopt_core::metadata::RelMetadataQuery::is_empty

use relopt_core::error::Result;
use relopt_core::metadata::RelMetadataQuery;
use relopt_core::pattern::Operand;
use relopt_core::rel::{
    Aggregate, Correlate, Filter, Join, JoinType, RelKind, RelNode, RelRef, SetOp, SetOpKind, Sort,
};
use relopt_core::rule::{Rule, RuleCall};
use tracing::trace;

/// The operator shapes empty propagation applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PruneEmpty {
    Project,
    Filter,
    Sort,
    Calc,
    /// Aggregate without an empty grouping set.
    Aggregate,
    /// Join whose left input is empty.
    JoinLeft,
    /// Join whose right input is empty.
    JoinRight,
    Union,
    Intersect,
    Minus,
    Correlate,
    /// Sort with `FETCH 0`, whatever its input.
    SortFetchZero,
    /// Filter on an always-false condition, whatever its input.
    FilterFalse,
}

impl PruneEmpty {
    pub const ALL: [PruneEmpty; 13] = [
        PruneEmpty::Project,
        PruneEmpty::Filter,
        PruneEmpty::Sort,
        PruneEmpty::Calc,
        PruneEmpty::Aggregate,
        PruneEmpty::JoinLeft,
        PruneEmpty::JoinRight,
        PruneEmpty::Union,
        PruneEmpty::Intersect,
        PruneEmpty::Minus,
        PruneEmpty::Correlate,
        PruneEmpty::SortFetchZero,
        PruneEmpty::FilterFalse,
    ];
}

fn set_op(kind: SetOpKind) -> Operand {
    Operand::with::<SetOp>(move |s| s.kind == kind)
}

fn any_input_empty(md: &dyn RelMetadataQuery, rel: &RelNode) -> bool {
    rel.inputs().iter().any(|i| md.is_empty(i))
}

/// Replaces an operator by an empty `Values` when its result is provably empty.
pub struct PruneEmptyRule(pub PruneEmpty);

impl Rule for PruneEmptyRule {
    fn name(&self) -> &str {
        match self.0 {
            PruneEmpty::Project => "PruneEmptyProject",
            PruneEmpty::Filter => "PruneEmptyFilter",
            PruneEmpty::Sort => "PruneEmptySort",
            PruneEmpty::Calc => "PruneEmptyCalc",
            PruneEmpty::Aggregate => "PruneEmptyAggregate",
            PruneEmpty::JoinLeft => "PruneEmptyJoinLeft",
            PruneEmpty::JoinRight => "PruneEmptyJoinRight",
            PruneEmpty::Union => "PruneEmptyUnion",
            PruneEmpty::Intersect => "PruneEmptyIntersect",
            PruneEmpty::Minus => "PruneEmptyMinus",
            PruneEmpty::Correlate => "PruneEmptyCorrelate",
            PruneEmpty::SortFetchZero => "PruneEmptySortFetchZero",
            PruneEmpty::FilterFalse => "PruneEmptyFilterFalse",
        }
    }

    fn operand(&self) -> Operand {
        let single = |kind| Operand::of(kind).exact(vec![Operand::any_node()]);
        match self.0 {
            PruneEmpty::Project => single(RelKind::Project),
            PruneEmpty::Filter => single(RelKind::Filter),
            PruneEmpty::Sort => single(RelKind::Sort),
            PruneEmpty::Calc => single(RelKind::Calc),
            PruneEmpty::Aggregate => Operand::with::<Aggregate>(|a| !a.has_empty_group())
                .exact(vec![Operand::any_node()]),
            PruneEmpty::JoinLeft | PruneEmpty::JoinRight => {
                Operand::of(RelKind::Join).exact(vec![Operand::any_node(), Operand::any_node()])
            }
            PruneEmpty::Union => set_op(SetOpKind::Union),
            PruneEmpty::Intersect => set_op(SetOpKind::Intersect),
            PruneEmpty::Minus => set_op(SetOpKind::Minus),
            PruneEmpty::Correlate => Operand::of(RelKind::Correlate),
            PruneEmpty::SortFetchZero => Operand::with::<Sort>(|s| s.fetch == Some(0)),
            PruneEmpty::FilterFalse => Operand::with::<Filter>(|f| f.condition.is_always_false()),
        }
    }

    fn matches(&self, call: &RuleCall<'_>) -> bool {
        let md = call.metadata();
        let rel = call.rel(0);
        match self.0 {
            PruneEmpty::Project
            | PruneEmpty::Filter
            | PruneEmpty::Sort
            | PruneEmpty::Calc
            | PruneEmpty::Aggregate
            | PruneEmpty::JoinLeft => md.is_empty(call.rel(1)),
            PruneEmpty::JoinRight => md.is_empty(call.rel(2)),
            PruneEmpty::Union | PruneEmpty::Intersect | PruneEmpty::Minus | PruneEmpty::Correlate => {
                any_input_empty(md, rel)
            }
            PruneEmpty::SortFetchZero | PruneEmpty::FilterFalse => true,
        }
    }

    fn on_match(&self, call: &mut RuleCall<'_>) -> Result<()> {
        let rel = call.rel(0).clone();
        let replacement = match self.0 {
            PruneEmpty::Project
            | PruneEmpty::Filter
            | PruneEmpty::Sort
            | PruneEmpty::Calc
            | PruneEmpty::Aggregate
            | PruneEmpty::SortFetchZero
            | PruneEmpty::FilterFalse => Some(empty(&rel)?),
            PruneEmpty::JoinLeft => {
                let join_type = rel.payload::<Join>().map(|j| j.join_type);
                match join_type {
                    Some(jt) if !jt.generates_nulls_on_left() => Some(empty(&rel)?),
                    _ => None,
                }
            }
            PruneEmpty::JoinRight => {
                let join_type = rel.payload::<Join>().map(|j| j.join_type);
                empty_right(call, &rel, join_type)?
            }
            PruneEmpty::Correlate => {
                let join_type = rel.payload::<Correlate>().map(|c| c.join_type);
                if call.metadata().is_empty(rel.input(0)) {
                    Some(empty(&rel)?)
                } else {
                    empty_right(call, &rel, join_type)?
                }
            }
            PruneEmpty::Union | PruneEmpty::Intersect | PruneEmpty::Minus => prune_set_op(call, &rel)?,
        };
        match replacement {
            Some(replacement) => call.transform_to(replacement),
            None => {
                trace!("{}: output is not empty", self.name());
                Ok(())
            }
        }
    }
}

fn empty(rel: &RelRef) -> Result<RelRef> {
    RelNode::empty(rel.row_type().clone())
}

/// Replacement of a join or correlate whose right input is empty.
fn empty_right(call: &RuleCall<'_>, rel: &RelRef, join_type: Option<JoinType>) -> Result<Option<RelRef>> {
    match join_type {
        // every left row survives an anti join with nothing
        Some(JoinType::Anti) => {
            let mut builder = call.builder();
            builder.push(rel.input(0).clone()).convert(rel.row_type(), true)?;
            Ok(Some(builder.build()?))
        }
        Some(jt) if !jt.generates_nulls_on_right() => Ok(Some(empty(rel)?)),
        _ => Ok(None),
    }
}

fn prune_set_op(call: &RuleCall<'_>, rel: &RelRef) -> Result<Option<RelRef>> {
    let Some(payload) = rel.payload::<SetOp>() else {
        return Ok(None);
    };
    let md = call.metadata();
    let inputs = rel.inputs();
    let survivors: Vec<RelRef> = match payload.kind {
        SetOpKind::Intersect => return Ok(Some(empty(rel)?)),
        SetOpKind::Minus if md.is_empty(&inputs[0]) => return Ok(Some(empty(rel)?)),
        SetOpKind::Minus => std::iter::once(inputs[0].clone())
            .chain(inputs[1..].iter().filter(|i| !md.is_empty(i)).cloned())
            .collect(),
        SetOpKind::Union => inputs.iter().filter(|i| !md.is_empty(i)).cloned().collect(),
    };
    if survivors.is_empty() {
        return Ok(Some(empty(rel)?));
    }

    let mut builder = call.builder();
    if survivors.len() > 1 {
        builder.push(RelNode::set_op(payload.kind, payload.all, survivors)?);
    } else {
        builder.push(survivors[0].clone());
        if !payload.all {
            builder.distinct()?;
        }
    }
    builder.convert(rel.row_type(), true)?;
    Ok(Some(builder.build()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::fire;
    use relopt_core::builder::{GroupKey, RelBuilder};
    use relopt_core::rel::{AggFunc, AggregateCall};
    use relopt_core::rex::RexNode;
    use relopt_core::testing::{dept_scan, emp_scan, empty_like, eq, field, int_scan, lit, EMP_WIDTH};
    use std::sync::Arc;

    fn prune(variant: PruneEmpty, rel: &RelRef) -> Vec<RelRef> {
        fire(&PruneEmptyRule(variant), rel)
    }

    fn join(left: RelRef, right: RelRef, join_type: JoinType) -> RelRef {
        let cond = eq(field(&left, 7, 0), field(&right, 0, EMP_WIDTH));
        RelNode::join(left, right, join_type, cond).unwrap()
    }

    #[test]
    fn test_project_over_empty() {
        let empty = empty_like(&emp_scan());
        let project = RelNode::project(empty.clone(), vec![field(&empty, 0, 0)], vec!["x".into()]).unwrap();
        let result = prune(PruneEmpty::Project, &project);
        assert_eq!(result.len(), 1);
        assert!(result[0].is_empty_values());
        assert_eq!(result[0].row_type(), project.row_type());

        assert!(prune(PruneEmpty::Project, &RelNode::project(emp_scan(), vec![lit(1)], vec!["x".into()]).unwrap()).is_empty());
    }

    #[test]
    fn test_aggregate_grand_total_survives_empty_input() {
        let empty = empty_like(&emp_scan());
        let count = AggregateCall::create(AggFunc::Count, false, vec![], None, None, empty.row_type(), 0);
        let mut b = RelBuilder::new();
        let total = b
            .push(empty.clone())
            .aggregate(GroupKey::empty(), vec![count.clone()])
            .unwrap()
            .build()
            .unwrap();
        assert!(prune(PruneEmpty::Aggregate, &total).is_empty());

        let grouped = b
            .push(empty)
            .aggregate(GroupKey::of([7]), vec![count])
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(prune(PruneEmpty::Aggregate, &grouped).len(), 1);
    }

    #[test]
    fn test_inner_join_with_empty_side_is_empty() {
        let empty_dept = empty_like(&dept_scan());
        let inner = join(emp_scan(), empty_dept, JoinType::Inner);
        let result = prune(PruneEmpty::JoinRight, &inner);
        assert_eq!(result.len(), 1);
        assert!(result[0].is_empty_values());
    }

    #[test]
    fn test_left_join_keeps_preserved_side() {
        let emp = emp_scan();
        let left = join(emp.clone(), empty_like(&dept_scan()), JoinType::Left);
        assert!(prune(PruneEmpty::JoinRight, &left).is_empty());

        // an empty preserved side still empties the join
        let left = join(empty_like(&emp), dept_scan(), JoinType::Left);
        assert_eq!(prune(PruneEmpty::JoinLeft, &left).len(), 1);

        let right = join(empty_like(&emp), dept_scan(), JoinType::Right);
        assert!(prune(PruneEmpty::JoinLeft, &right).is_empty());
    }

    #[test]
    fn test_anti_join_with_empty_right_returns_left() {
        let emp = emp_scan();
        let anti = join(emp.clone(), empty_like(&dept_scan()), JoinType::Anti);
        let result = prune(PruneEmpty::JoinRight, &anti);
        assert_eq!(result.len(), 1);
        assert!(Arc::ptr_eq(&result[0], &emp));
    }

    #[test]
    fn test_union_drops_empty_inputs() {
        let (a, b) = (int_scan("a", 1), int_scan("b", 1));
        let union = RelNode::set_op(SetOpKind::Union, true, vec![a.clone(), empty_like(&b), b]).unwrap();
        let result = prune(PruneEmpty::Union, &union);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].inputs().len(), 2);
        assert_eq!(result[0].row_type(), union.row_type());

        let single = RelNode::set_op(SetOpKind::Union, true, vec![empty_like(&a), a.clone()]).unwrap();
        let result = prune(PruneEmpty::Union, &single);
        assert!(Arc::ptr_eq(&result[0], &a));
    }

    #[test]
    fn test_intersect_and_minus() {
        let (a, b) = (int_scan("a", 1), int_scan("b", 1));
        let intersect = RelNode::set_op(SetOpKind::Intersect, false, vec![a.clone(), empty_like(&b)]).unwrap();
        assert!(prune(PruneEmpty::Intersect, &intersect)[0].is_empty_values());

        let minus_first = RelNode::set_op(SetOpKind::Minus, true, vec![empty_like(&a), b.clone()]).unwrap();
        assert!(prune(PruneEmpty::Minus, &minus_first)[0].is_empty_values());

        let minus_second = RelNode::set_op(SetOpKind::Minus, true, vec![a.clone(), empty_like(&b)]).unwrap();
        let result = prune(PruneEmpty::Minus, &minus_second);
        assert_eq!(result[0].row_type(), minus_second.row_type());
        assert!(!result[0].is_empty_values());
    }

    #[test]
    fn test_fetch_zero_and_false_filter() {
        let emp = emp_scan();
        let sort = RelNode::sort(emp.clone(), Default::default(), None, Some(0)).unwrap();
        assert!(prune(PruneEmpty::SortFetchZero, &sort)[0].is_empty_values());

        let filter = RelNode::filter(emp, RexNode::false_literal()).unwrap();
        assert!(prune(PruneEmpty::FilterFalse, &filter)[0].is_empty_values());
        // the replacement does not match again
        assert!(prune(PruneEmpty::FilterFalse, &empty_like(&filter)).is_empty());
    }
}
