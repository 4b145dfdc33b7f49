//! # Join Commutativity Rule
//!
//! This rule implements the algebraic identity `A JOIN B = B JOIN A`.
//!
//! ## Why Commutativity Matters
//!
//! The order of join inputs matters to whatever executes the plan (the build side
//! of a hash join, the outer side of a nested loop). Combined with associativity,
//! commutativity also lets the rewrite explore different join orderings for
//! multi-table queries.
//!
//! ## Applicability
//!
//! Inner and full joins swap as they are. Left and right joins swap into each
//! other, and only if [`JoinCommuteRule::swap_outer`] is set. Semi and anti joins
//! have fixed left/right semantics and are left alone.
//!
//! ## Field order
//!
//! The swapped join produces the fields of B before those of A, so the condition is
//! renumbered through [`swap_join_mapping`] and a projection on top restores the
//! original order:
//!
//! ```text
//! Join(A, B, $1 = $3)   ->   Project($2, $3, $0, $1; Join(B, A, $3 = $1))
//! ```
//!
//! The swapped join is also registered as equivalent to the original join under the
//! inverse projection, so a driver that reaches `B JOIN A` from elsewhere can relate
//! it to the join it started from.

use relopt_core::error::Result;
use relopt_core::pattern::Operand;
use relopt_core::plan_util::{swap_join_mapping, swapped_join_exprs};
use relopt_core::rel::{Join, RelKind, RelNode};
use relopt_core::rule::{Rule, RuleCall};
use relopt_core::shuttle::permute_inputs;
use tracing::trace;

/// Join commutativity: `A JOIN B -> Project(B JOIN A)`.
pub struct JoinCommuteRule {
    /// Whether left and right outer joins are swapped as well.
    pub swap_outer: bool,
}

impl Default for JoinCommuteRule {
    fn default() -> Self {
        Self { swap_outer: true }
    }
}

impl Rule for JoinCommuteRule {
    fn name(&self) -> &str {
        "JoinCommute"
    }

    fn operand(&self) -> Operand {
        Operand::of(RelKind::Join)
    }

    fn on_match(&self, call: &mut RuleCall<'_>) -> Result<()> {
        let rel = call.rel(0).clone();
        let Some(join) = rel.payload::<Join>() else {
            return Ok(());
        };
        let Some(swapped_type) = join.join_type.swap() else {
            trace!("{}: {:?} join cannot be swapped", call.rule_name(), join.join_type);
            return Ok(());
        };
        if swapped_type != join.join_type && !self.swap_outer {
            return Ok(());
        }

        let left = rel.input(0);
        let right = rel.input(1);
        let (left_width, right_width) = (left.field_count(), right.field_count());
        let condition = permute_inputs(&join.condition, &swap_join_mapping(left_width, right_width));
        let new_join = RelNode::join(right.clone(), left.clone(), swapped_type, condition)?;

        let mut builder = call.builder();
        builder
            .push(new_join.clone())
            .project_named(swapped_join_exprs(&new_join, left_width), rel.row_type().field_names(), false)?;
        let swapped = builder.build()?;

        builder
            .push(rel.clone())
            .project_named(swapped_join_exprs(&rel, right_width), new_join.row_type().field_names(), false)?;
        let original_swapped = builder.build()?;

        call.transform_to_with(swapped, vec![(new_join, original_swapped)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::fire;
    use relopt_core::fieldset::FieldSet;
    use relopt_core::rel::{JoinType, RelRef};
    use relopt_core::testing::{dept_scan, emp_scan, eq, field, EMP_WIDTH};
    use std::sync::Arc;

    fn emp_dept(join_type: JoinType) -> RelRef {
        let (emp, dept) = (emp_scan(), dept_scan());
        let cond = eq(field(&emp, 7, 0), field(&dept, 0, EMP_WIDTH));
        RelNode::join(emp, dept, join_type, cond).unwrap()
    }

    #[test]
    fn test_swaps_inner_join() {
        let join = emp_dept(JoinType::Inner);
        let result = fire(&JoinCommuteRule::default(), &join);
        assert_eq!(result.len(), 1);
        let rel = &result[0];
        assert_eq!(rel.kind(), RelKind::Project);
        assert_eq!(rel.row_type(), join.row_type());

        let new_join = rel.input(0);
        assert_eq!(new_join.input(0).digest(), dept_scan().digest());
        // emp.deptno moves from 7 to 9, dept.deptno from 9 to 0
        let condition = &new_join.payload::<Join>().unwrap().condition;
        assert_eq!(condition.referenced_fields(), FieldSet::of([0, 9]));
    }

    #[test]
    fn test_left_join_becomes_right_join() {
        let join = emp_dept(JoinType::Left);
        let result = fire(&JoinCommuteRule::default(), &join);
        assert_eq!(result.len(), 1);
        let new_join = result[0].input(0);
        assert_eq!(new_join.payload::<Join>().unwrap().join_type, JoinType::Right);
        assert!(result[0].row_type().same_types(join.row_type()));
    }

    #[test]
    fn test_outer_join_kept_when_disabled() {
        let rule = JoinCommuteRule { swap_outer: false };
        assert!(fire(&rule, &emp_dept(JoinType::Left)).is_empty());
        assert_eq!(fire(&rule, &emp_dept(JoinType::Full)).len(), 1);
    }

    #[test]
    fn test_semi_join_not_swapped() {
        assert!(fire(&JoinCommuteRule::default(), &emp_dept(JoinType::Semi)).is_empty());
        assert!(fire(&JoinCommuteRule::default(), &emp_dept(JoinType::Anti)).is_empty());
    }

    #[test]
    fn test_registers_swapped_join_equivalence() {
        let join = emp_dept(JoinType::Inner);
        let rule = JoinCommuteRule::default();
        let md = relopt_core::metadata::DefaultRelMetadata;
        let mut call = RuleCall::new(rule.name(), vec![join.clone()], &md);
        rule.on_match(&mut call).unwrap();
        let (new_join, original) = &call.equivalences()[0];
        assert!(Arc::ptr_eq(new_join, call.results()[0].input(0)));
        assert_eq!(original.kind(), RelKind::Project);
        assert!(Arc::ptr_eq(original.input(0), &join));
        assert!(original.row_type().same_types(new_join.row_type()));
        // dept columns come first
        assert_eq!(original.payload::<relopt_core::rel::Project>().unwrap().exprs[0].as_input_ref(), Some(EMP_WIDTH));
    }
}
