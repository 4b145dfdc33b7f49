//! # Projection Rules
//!
//! - [`ProjectMergeRule`]: `Project(e2, Project(e1, X))` -> `Project(e2[e1], X)`,
//!   substituting the bottom expressions into the top ones.
//! - [`ProjectRemoveRule`]: a projection that returns its input unchanged is
//!   replaced by the input.
//!
//! Both rules are idempotent: their output never matches them again.

use relopt_core::error::Result;
use relopt_core::pattern::Operand;
use relopt_core::rel::{Project, RelKind};
use relopt_core::rex::RexNode;
use relopt_core::rule::{Rule, RuleCall};
use relopt_core::shuttle::push_past_project_all;
use tracing::trace;

/// Merges two adjacent projections.
///
/// The merge is skipped when a bottom expression is not deterministic: after
/// substitution it could be evaluated more than once per row.
pub struct ProjectMergeRule;

impl Rule for ProjectMergeRule {
    fn name(&self) -> &str {
        "ProjectMerge"
    }

    fn operand(&self) -> Operand {
        Operand::of(RelKind::Project).exact(vec![Operand::of(RelKind::Project)])
    }

    fn on_match(&self, call: &mut RuleCall<'_>) -> Result<()> {
        let (top_rel, bottom_rel) = (call.rel(0).clone(), call.rel(1).clone());
        let (Some(top), Some(bottom)) = (top_rel.payload::<Project>(), bottom_rel.payload::<Project>()) else {
            return Ok(());
        };
        if !bottom.exprs.iter().all(RexNode::is_deterministic) {
            trace!("ProjectMerge: bottom projection is not deterministic");
            return Ok(());
        }

        let merged = push_past_project_all(&top.exprs, &bottom.exprs);
        let mut builder = call.builder();
        builder
            .push(bottom_rel.input(0).clone())
            .project_named(merged, top.names.clone(), false)?;
        let rel = builder.build()?;
        call.transform_to(rel)
    }
}

/// Removes a projection that returns its input unchanged.
pub struct ProjectRemoveRule;

impl Rule for ProjectRemoveRule {
    fn name(&self) -> &str {
        "ProjectRemove"
    }

    fn operand(&self) -> Operand {
        Operand::of(RelKind::Project).predicate(|rel| {
            rel.payload::<Project>()
                .is_some_and(|p| p.is_trivial(rel.input(0).field_count()))
        })
    }

    fn on_match(&self, call: &mut RuleCall<'_>) -> Result<()> {
        let input = call.rel(0).input(0).clone();
        call.transform_to(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::fire;
    use relopt_core::rel::RelNode;
    use relopt_core::rex::Op;
    use relopt_core::testing::{emp_scan, field, lit};
    use relopt_core::types::DataType;
    use std::sync::Arc;

    #[test]
    fn test_merge_substitutes_bottom_expressions() {
        let emp = emp_scan();
        let bottom = RelNode::project(
            emp.clone(),
            vec![
                field(&emp, 5, 0),
                RexNode::call(Op::Add, vec![field(&emp, 6, 0), lit(1)]),
            ],
            vec!["sal".into(), "comm1".into()],
        )
        .unwrap();
        let top = RelNode::project(
            bottom.clone(),
            vec![field(&bottom, 1, 0), field(&bottom, 0, 0)],
            vec!["c".into(), "s".into()],
        )
        .unwrap();

        let result = fire(&ProjectMergeRule, &top);
        assert_eq!(result.len(), 1);
        let rel = &result[0];
        assert!(Arc::ptr_eq(rel.input(0), &emp));
        let merged = rel.payload::<Project>().unwrap();
        assert_eq!(merged.exprs[0], RexNode::call(Op::Add, vec![field(&emp, 6, 0), lit(1)]));
        assert_eq!(merged.exprs[1].as_input_ref(), Some(5));
        assert_eq!(rel.row_type(), top.row_type());

        // the merged projection no longer sits on a projection
        assert!(fire(&ProjectMergeRule, rel).is_empty());
    }

    #[test]
    fn test_merge_skips_volatile_bottom() {
        let emp = emp_scan();
        let rand = RexNode::call_typed(Op::Function("RAND".into()), vec![], DataType::double());
        let bottom = RelNode::project(emp, vec![rand], vec!["r".into()]).unwrap();
        let top = RelNode::project(bottom.clone(), vec![field(&bottom, 0, 0)], vec!["x".into()]).unwrap();
        assert!(fire(&ProjectMergeRule, &top).is_empty());
    }

    #[test]
    fn test_remove_identity_projection() {
        let emp = emp_scan();
        let renamed: Vec<String> = (0..emp.field_count()).map(|i| format!("c{i}")).collect();
        let project = RelNode::project(emp.clone(), RexNode::input_refs(emp.row_type(), 0), renamed).unwrap();

        let result = fire(&ProjectRemoveRule, &project);
        assert_eq!(result.len(), 1);
        assert!(Arc::ptr_eq(&result[0], &emp));
        assert!(fire(&ProjectRemoveRule, &result[0]).is_empty());
    }

    #[test]
    fn test_remove_keeps_permutation() {
        let emp = emp_scan();
        let mut exprs = RexNode::input_refs(emp.row_type(), 0);
        exprs.swap(0, 1);
        let names = emp.row_type().field_names();
        let project = RelNode::project(emp, exprs, names).unwrap();
        assert!(fire(&ProjectRemoveRule, &project).is_empty());
    }
}
