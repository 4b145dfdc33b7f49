//! # Calc Rules
//!
//! A `Calc` fuses a filter and a projection over one input. These rules convert
//! filters and projections to calcs and merge adjacent calcs, so that a chain of
//! row-wise operators collapses into a single node:
//!
//! ```text
//! Project(e, Filter(c, X))  ->  Calc(e, c, X)
//! ```
//!
//! They are registered in the `calc` rule set.

use relopt_core::error::Result;
use relopt_core::pattern::Operand;
use relopt_core::rel::{Calc, Filter, Project, RelKind};
use relopt_core::rex::RexNode;
use relopt_core::rule::{Rule, RuleCall};
use relopt_core::shuttle::{push_past_project, push_past_project_all};
use tracing::trace;

/// `Filter(c, X)` -> `Calc(X.*, c, X)`.
pub struct FilterToCalcRule;

impl Rule for FilterToCalcRule {
    fn name(&self) -> &str {
        "FilterToCalc"
    }

    fn operand(&self) -> Operand {
        Operand::of(RelKind::Filter)
    }

    fn on_match(&self, call: &mut RuleCall<'_>) -> Result<()> {
        let rel = call.rel(0).clone();
        let Some(filter) = rel.payload::<Filter>() else {
            return Ok(());
        };
        let input = rel.input(0);
        let mut builder = call.builder();
        builder.push(input.clone()).calc(
            RexNode::input_refs(input.row_type(), 0),
            Some(filter.condition.clone()),
            input.row_type().field_names(),
        )?;
        let result = builder.build()?;
        call.transform_to(result)
    }
}

/// `Project(e, X)` -> `Calc(e, X)`.
pub struct ProjectToCalcRule;

impl Rule for ProjectToCalcRule {
    fn name(&self) -> &str {
        "ProjectToCalc"
    }

    fn operand(&self) -> Operand {
        Operand::of(RelKind::Project)
    }

    fn on_match(&self, call: &mut RuleCall<'_>) -> Result<()> {
        let rel = call.rel(0).clone();
        let Some(project) = rel.payload::<Project>() else {
            return Ok(());
        };
        let mut builder = call.builder();
        builder
            .push(rel.input(0).clone())
            .calc(project.exprs.clone(), None, project.names.clone())?;
        let result = builder.build()?;
        call.transform_to(result)
    }
}

/// `Calc(e2, c2, Calc(e1, c1, X))` -> `Calc(e2[e1], c1 AND c2[e1], X)`.
///
/// Not applied when the bottom calc computes a non-deterministic expression.
pub struct CalcMergeRule;

impl Rule for CalcMergeRule {
    fn name(&self) -> &str {
        "CalcMerge"
    }

    fn operand(&self) -> Operand {
        Operand::of(RelKind::Calc).exact(vec![Operand::of(RelKind::Calc)])
    }

    fn on_match(&self, call: &mut RuleCall<'_>) -> Result<()> {
        let (top_rel, bottom_rel) = (call.rel(0).clone(), call.rel(1).clone());
        let (Some(top), Some(bottom)) = (top_rel.payload::<Calc>(), bottom_rel.payload::<Calc>()) else {
            return Ok(());
        };
        if !bottom.exprs.iter().all(RexNode::is_deterministic) {
            trace!("CalcMerge: bottom calc is not deterministic");
            return Ok(());
        }

        let exprs = push_past_project_all(&top.exprs, &bottom.exprs);
        let condition = RexNode::and(
            bottom
                .condition
                .iter()
                .cloned()
                .chain(top.condition.iter().map(|c| push_past_project(c, &bottom.exprs))),
        );
        let mut builder = call.builder();
        builder
            .push(bottom_rel.input(0).clone())
            .calc(exprs, Some(condition), top.names.clone())?;
        let result = builder.build()?;
        call.transform_to(result)
    }
}
