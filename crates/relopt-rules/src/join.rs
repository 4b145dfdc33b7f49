//! # Join Rewrites
//!
//! - [`JoinProjectTransposeRule`] pulls projections out of join inputs so that the
//!   join sees the raw columns, which exposes more join conditions to pushdown and
//!   reordering rules.
//! - [`JoinExtractFilterRule`] turns an inner join into a filter over a cross
//!   product.
//! - [`JoinToCorrelateRule`] turns a join into a correlate whose right input reads
//!   the left row through a correlation variable, i.e. a nested loop.
//!
//! The last two only change how a join is expressed and are meant for lowering;
//! they are registered in the `join_lowering` rule set.

use relopt_core::error::Result;
use relopt_core::fieldset::FieldSet;
use relopt_core::pattern::Operand;
use relopt_core::plan_util::next_correlation_id;
use relopt_core::rel::{Join, JoinType, Project, RelKind, RelRef};
use relopt_core::rex::RexNode;
use relopt_core::rule::{Rule, RuleCall};
use relopt_core::shuttle::{push_past_project, shift, RexShuttle};
use tracing::trace;

/// `Join(Project(A), Project(B))` -> `Project(Join(A, B))`.
///
/// Either input may be a projection. A projection is only pulled out of a side the
/// join does not pad with NULLs: above the join, a computed expression would be
/// evaluated on padded rows and could produce a value where NULL is expected.
pub struct JoinProjectTransposeRule;

impl JoinProjectTransposeRule {
    /// The projection of `input`, if it can be pulled above a join that
    /// `generates_nulls` on that side.
    fn pullable(input: &RelRef, generates_nulls: bool) -> Option<&Project> {
        if generates_nulls {
            return None;
        }
        let project = input.payload::<Project>()?;
        project
            .exprs
            .iter()
            .all(RexNode::is_deterministic)
            .then_some(project)
    }
}

impl Rule for JoinProjectTransposeRule {
    fn name(&self) -> &str {
        "JoinProjectTranspose"
    }

    fn operand(&self) -> Operand {
        Operand::with::<Join>(|j| j.join_type.projects_right())
            .some(vec![Operand::any_node(), Operand::any_node()])
            .predicate(|rel| rel.inputs().iter().any(|i| i.kind() == RelKind::Project))
    }

    fn on_match(&self, call: &mut RuleCall<'_>) -> Result<()> {
        let rel = call.rel(0).clone();
        let Some(join) = rel.payload::<Join>() else {
            return Ok(());
        };
        let (left, right) = (rel.input(0), rel.input(1));
        let left_project = Self::pullable(left, join.join_type.generates_nulls_on_left());
        let right_project = Self::pullable(right, join.join_type.generates_nulls_on_right());
        if left_project.is_none() && right_project.is_none() {
            trace!("JoinProjectTranspose: no projection can be pulled up");
            return Ok(());
        }

        let new_left = if left_project.is_some() { left.input(0) } else { left };
        let new_right = if right_project.is_some() { right.input(0) } else { right };
        let new_left_width = new_left.field_count();

        // the old join's fields expressed over the new join's inputs
        let mut exprs: Vec<RexNode> = match left_project {
            Some(project) => project.exprs.clone(),
            None => RexNode::input_refs(left.row_type(), 0),
        };
        match right_project {
            Some(project) => exprs.extend(project.exprs.iter().map(|e| shift(e, new_left_width as isize))),
            None => exprs.extend(RexNode::input_refs(right.row_type(), new_left_width)),
        }
        let condition = push_past_project(&join.condition, &exprs);

        let mut builder = call.builder();
        builder
            .push(new_left.clone())
            .push(new_right.clone())
            .join(join.join_type, condition)?;
        // a side that is not pulled keeps the join's (possibly nullable) field types
        let joined = builder.peek()?.row_type().clone();
        let top: Vec<RexNode> = exprs
            .into_iter()
            .enumerate()
            .map(|(i, e)| {
                let pulled = if i < left.field_count() {
                    left_project.is_some()
                } else {
                    right_project.is_some()
                };
                match e.as_input_ref() {
                    Some(index) if !pulled => RexNode::input_ref(index, joined.field_type(index)),
                    _ => e,
                }
            })
            .collect();
        builder.project_named(top, rel.row_type().field_names(), false)?;
        let result = builder.build()?;
        call.transform_to(result)
    }
}

/// Inner `Join(A, B, c)` -> `Filter(c, Join(A, B, TRUE))`.
pub struct JoinExtractFilterRule;

impl Rule for JoinExtractFilterRule {
    fn name(&self) -> &str {
        "JoinExtractFilter"
    }

    fn operand(&self) -> Operand {
        Operand::with::<Join>(|j| j.join_type == JoinType::Inner && !j.condition.is_always_true())
    }

    fn on_match(&self, call: &mut RuleCall<'_>) -> Result<()> {
        let rel = call.rel(0).clone();
        let Some(join) = rel.payload::<Join>() else {
            return Ok(());
        };
        let mut builder = call.builder();
        builder
            .push(rel.input(0).clone())
            .push(rel.input(1).clone())
            .join(JoinType::Inner, RexNode::true_literal())?
            .filter([join.condition.clone()])?;
        let result = builder.build()?;
        call.transform_to(result)
    }
}

/// `Join(A, B, c)` -> `Correlate(A, Filter(c', B))`, where `c'` reads the columns
/// of A through a fresh correlation variable.
///
/// Only join types a correlate supports are converted (inner, left, semi, anti).
pub struct JoinToCorrelateRule;

impl Rule for JoinToCorrelateRule {
    fn name(&self) -> &str {
        "JoinToCorrelate"
    }

    fn operand(&self) -> Operand {
        Operand::with::<Join>(|j| {
            matches!(
                j.join_type,
                JoinType::Inner | JoinType::Left | JoinType::Semi | JoinType::Anti
            )
        })
    }

    fn on_match(&self, call: &mut RuleCall<'_>) -> Result<()> {
        let rel = call.rel(0).clone();
        let Some(join) = rel.payload::<Join>() else {
            return Ok(());
        };
        let left = rel.input(0);
        let left_width = left.field_count();
        let id = next_correlation_id(&rel);
        let correl = RexNode::correl(id, left.row_type().clone());

        let mut required = FieldSet::builder();
        let condition = RexShuttle::new()
            .with_input_ref(|index, data_type| {
                if index < left_width {
                    required.set(index);
                    RexNode::field_access(correl.clone(), index)
                } else {
                    RexNode::input_ref(index - left_width, data_type)
                }
            })
            .apply(&join.condition);
        let required = required.build();

        let mut builder = call.builder();
        builder
            .push(left.clone())
            .push(rel.input(1).clone())
            .filter([condition])?
            .correlate(join.join_type, id, required)?;
        let result = builder.build()?;
        call.transform_to(result)
    }
}
