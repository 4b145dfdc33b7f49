//! # Filter-Join Pushdown Rules
//!
//! Predicate pushdown through joins is one of the most impactful rewrites because
//! it reduces the amount of data flowing through the plan as early as possible.
//!
//! ## What It Does
//!
//! [`FilterIntoJoinRule`] matches a Filter on top of a Join;
//! [`JoinConditionPushRule`] matches a Join on its own. Both run the same
//! procedure:
//!
//! 1. **Strengthening.** If a conjunct of the filter above an outer join rejects
//!    the NULL-padded rows of a side, the join stops generating NULLs on that side
//!    (`LEFT` becomes `INNER`, `FULL` becomes `LEFT` or `RIGHT`).
//! 2. **Classification.** Conjuncts of the filter above and of the join condition
//!    are sorted into those that read only the left input, only the right input,
//!    or both.
//! 3. **Pushing.** Single-side conjuncts become filters on that input; conjuncts of
//!    the filter above that read both sides join the condition of an inner join;
//!    the rest stay above.
//!
//! ```text
//! Before: Filter(e.sal > 1000 AND d.name = 'x', Join(LEFT, e, d, e.deptno = d.deptno))
//! After:  Join(INNER, Filter(sal > 1000, e), Filter(name = 'x', d), e.deptno = d.deptno)
//! ```
//!
//! ## Safety
//!
//! A conjunct is never pushed into the side an outer join pads with NULLs, and a
//! filter above an outer join never moves into its ON clause: either would turn
//! rows the join must keep into rows it drops. Conjuncts the target input already
//! guarantees (its pulled-up predicates) are dropped instead of being pushed again.
//!
//! When strengthening changes the nullability of the join's columns, a casting
//! projection restores the original row type on top, and the conjuncts that stay
//! in or above the join read the new join's field types.

use relopt_core::error::Result;
use relopt_core::pattern::Operand;
use relopt_core::plan_util::{classify_filters, simplify_join_type, PushTargets};
use relopt_core::rel::{join_row_type, Filter, Join, JoinType, RelKind, RelRef};
use relopt_core::rex::RexNode;
use relopt_core::rule::{Rule, RuleCall};
use relopt_core::shuttle::convert_inputs;
use relopt_core::types::RowType;
use tracing::trace;

/// Pushes the conditions of a filter above a join into the join and its inputs.
pub struct FilterIntoJoinRule;

impl Rule for FilterIntoJoinRule {
    fn name(&self) -> &str {
        "FilterIntoJoin"
    }

    fn operand(&self) -> Operand {
        Operand::of(RelKind::Filter).exact(vec![Operand::of(RelKind::Join)])
    }

    fn on_match(&self, call: &mut RuleCall<'_>) -> Result<()> {
        let filter = call.rel(0).clone();
        let join = call.rel(1).clone();
        perform(call, Some(&filter), &join)
    }
}

/// Pushes the single-side conjuncts of a join condition into the join inputs.
pub struct JoinConditionPushRule;

impl Rule for JoinConditionPushRule {
    fn name(&self) -> &str {
        "JoinConditionPush"
    }

    fn operand(&self) -> Operand {
        Operand::of(RelKind::Join)
    }

    fn on_match(&self, call: &mut RuleCall<'_>) -> Result<()> {
        let join = call.rel(0).clone();
        perform(call, None, &join)
    }
}

fn perform(call: &mut RuleCall<'_>, filter: Option<&RelRef>, join_rel: &RelRef) -> Result<()> {
    let Some(join) = join_rel.payload::<Join>() else {
        return Ok(());
    };
    let above: Vec<RexNode> = filter
        .and_then(|f| f.payload::<Filter>())
        .map(|f| f.condition.conjunctions())
        .unwrap_or_default();
    let on: Vec<RexNode> = join.condition.conjunctions();
    if above.iter().chain(&on).any(|c| !c.is_deterministic()) {
        trace!("{}: non-deterministic condition", call.rule_name());
        return Ok(());
    }

    let left = join_rel.input(0);
    let right = join_rel.input(1);
    let join_type = if above.is_empty() {
        join.join_type
    } else {
        simplify_join_type(&above, join.join_type, left.field_count(), right.field_count())
    };

    let above_classified = classify_filters(join_rel, above, PushTargets::for_filter_above(join_type), &on);
    let on_classified = classify_filters(join_rel, on, PushTargets::for_join_condition(join_type), &[]);

    if !above_classified.changed() && !on_classified.changed() && join_type == join.join_type {
        trace!("{}: nothing to push", call.rule_name());
        return Ok(());
    }

    let md = call.metadata();
    let drop_known = |input: &RelRef, conjuncts: Vec<RexNode>| -> Vec<RexNode> {
        let known = md.pulled_up_predicates(input);
        conjuncts.into_iter().filter(|c| !known.contains(c)).collect()
    };
    let left_filters = drop_known(
        left,
        above_classified.left.into_iter().chain(on_classified.left).collect(),
    );
    let right_filters = drop_known(
        right,
        above_classified.right.into_iter().chain(on_classified.right).collect(),
    );
    let both = join_row_type(left.row_type(), right.row_type(), JoinType::Inner);
    let condition = RexNode::and(retype(
        on_classified.remaining.into_iter().chain(above_classified.join),
        &both,
    ));
    let remaining = retype(
        above_classified.remaining,
        &join_row_type(left.row_type(), right.row_type(), join_type),
    );

    let mut b = call.builder();
    b.push(left.clone()).filter(left_filters)?;
    b.push(right.clone()).filter(right_filters)?;
    b.join(join_type, condition)?
        .filter(remaining)?
        .convert(call.rel(0).row_type(), false)?;
    let rel = b.build()?;
    call.transform_to(rel)
}

/// Gives every input reference in `conjuncts` the type of its field in `row_type`.
fn retype(conjuncts: impl IntoIterator<Item = RexNode>, row_type: &RowType) -> Vec<RexNode> {
    let adjustments = vec![0; row_type.width()];
    conjuncts
        .into_iter()
        .map(|c| convert_inputs(&c, &adjustments, Some(&row_type.fields)))
        .collect()
}
