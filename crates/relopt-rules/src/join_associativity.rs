//! # Join Associativity Rules
//!
//! These rules change the *shape* of a tree of inner joins. Combined with
//! [`crate::join_commutativity`], they enable exploring join orderings for
//! multi-table queries.
//!
//! ## JoinAssociate
//!
//! `(A ⋈₁ B) ⋈₂ C → A ⋈ (B ⋈ C)`
//!
//! Conjuncts of both conditions are redistributed:
//!
//! 1. **A predicates**: conjuncts that read any column of A stay on the new top join.
//!    The output order A, B, C is unchanged, so their ordinals are kept as they are.
//! 2. **B-C predicates**: all other conjuncts move to the new bottom join, shifted
//!    down by the width of A.
//!
//! The rule does not fire if no conjunct connects B and C, unless
//! [`JoinAssociateRule::allow_cartesian`] is set: the new bottom join would be a
//! cross product.
//!
//! ## JoinPushThroughJoin
//!
//! `(A ⋈₁ B) ⋈₂ C → (A ⋈ C) ⋈ B`
//!
//! Moves C below the join with B when part of the top condition relates C to A
//! alone. Conjuncts of the top condition that do not read B go to the new bottom
//! join; everything else goes on top. The new output order is A, C, B, so a
//! projection restores A, B, C.
//!
//! ## Applicability
//!
//! Both rules only fire for inner joins. Outer join associativity has ordering
//! constraints (e.g., `(A LEFT JOIN B) LEFT JOIN C ≠ A LEFT JOIN (B LEFT JOIN C)`)
//! that require additional validity checks.

use relopt_core::error::Result;
use relopt_core::fieldset::FieldSet;
use relopt_core::mapping::{Mapping, ShiftBlock};
use relopt_core::pattern::Operand;
use relopt_core::rel::{Join, JoinType};
use relopt_core::rex::RexNode;
use relopt_core::rule::{Rule, RuleCall};
use relopt_core::shuttle::permute_inputs;
use tracing::trace;

fn inner_join() -> Operand {
    Operand::with::<Join>(|j| j.join_type == JoinType::Inner)
}

/// `Join(Join(A, B), C)` with both joins inner.
fn join_over_left_join() -> Operand {
    inner_join().exact(vec![inner_join(), Operand::any_node()])
}

/// Conjuncts of the conditions of the matched top and bottom joins, against the
/// concatenated fields of A, B and C.
fn conjuncts(call: &RuleCall<'_>) -> (Vec<RexNode>, Vec<RexNode>) {
    let condition = |i: usize| {
        call.rel(i)
            .payload::<Join>()
            .map(|j| j.condition.conjunctions())
            .unwrap_or_default()
    };
    (condition(0), condition(1))
}

/// Join associativity: `(A ⋈₁ B) ⋈₂ C → A ⋈ (B ⋈ C)`.
#[derive(Default)]
pub struct JoinAssociateRule {
    /// Whether the rule may produce `B ⋈ C` with no condition.
    pub allow_cartesian: bool,
}

impl Rule for JoinAssociateRule {
    fn name(&self) -> &str {
        "JoinAssociate"
    }

    fn operand(&self) -> Operand {
        join_over_left_join()
    }

    fn on_match(&self, call: &mut RuleCall<'_>) -> Result<()> {
        let top = call.rel(0).clone();
        let bottom = call.rel(1).clone();
        let (rel_a, rel_b, rel_c) = (bottom.input(0).clone(), bottom.input(1).clone(), call.rel(2).clone());
        let (a, b, c) = (rel_a.field_count(), rel_b.field_count(), rel_c.field_count());
        let a_bits = FieldSet::range_to(a);

        let (top_conjuncts, bottom_conjuncts) = conjuncts(call);
        let (on_top, on_bottom): (Vec<RexNode>, Vec<RexNode>) = top_conjuncts
            .into_iter()
            .chain(bottom_conjuncts)
            .partition(|conjunct| conjunct.referenced_fields().intersects(&a_bits));

        // B ⋈ C sees B at 0 and C at b
        let bottom_mapping = Mapping::shift(
            a + b + c,
            &[ShiftBlock::new(0, a, b), ShiftBlock::new(b, a + b, c)],
        );
        let new_bottom_condition =
            RexNode::and(on_bottom.iter().map(|conjunct| permute_inputs(conjunct, &bottom_mapping)));
        if new_bottom_condition.is_always_true() && !self.allow_cartesian {
            trace!("{}: B and C are not connected", call.rule_name());
            return Ok(());
        }

        let mut builder = call.builder();
        builder
            .push(rel_a)
            .push(rel_b)
            .push(rel_c)
            .join(JoinType::Inner, new_bottom_condition)?
            .join(JoinType::Inner, RexNode::and(on_top))?
            .convert(top.row_type(), true)?;
        let rel = builder.build()?;
        call.transform_to(rel)
    }
}

/// `(A ⋈₁ B) ⋈₂ C → (A ⋈ C) ⋈ B`, pushing C below the join with B.
pub struct JoinPushThroughJoinRule;

impl Rule for JoinPushThroughJoinRule {
    fn name(&self) -> &str {
        "JoinPushThroughJoin"
    }

    fn operand(&self) -> Operand {
        join_over_left_join()
    }

    fn on_match(&self, call: &mut RuleCall<'_>) -> Result<()> {
        let top = call.rel(0).clone();
        let bottom = call.rel(1).clone();
        let (rel_a, rel_b, rel_c) = (bottom.input(0).clone(), bottom.input(1).clone(), call.rel(2).clone());
        let (a, b, c) = (rel_a.field_count(), rel_b.field_count(), rel_c.field_count());
        let b_bits = FieldSet::range(a, a + b);

        let (top_conjuncts, bottom_conjuncts) = conjuncts(call);
        let (intersecting, non_intersecting): (Vec<RexNode>, Vec<RexNode>) = top_conjuncts
            .into_iter()
            .partition(|conjunct| conjunct.referenced_fields().intersects(&b_bits));
        if non_intersecting.is_empty() {
            trace!("{}: every top conjunct reads B", call.rule_name());
            return Ok(());
        }

        // A ⋈ C sees A at 0 and C at a
        let bottom_mapping = Mapping::shift(
            a + b + c,
            &[ShiftBlock::new(0, 0, a), ShiftBlock::new(a, a + b, c)],
        );
        // (A ⋈ C) ⋈ B sees A at 0, C at a and B at a + c
        let top_mapping = Mapping::shift(
            a + b + c,
            &[
                ShiftBlock::new(0, 0, a),
                ShiftBlock::new(a + c, a, b),
                ShiftBlock::new(a, a + b, c),
            ],
        );
        let new_bottom_condition =
            RexNode::and(non_intersecting.iter().map(|conjunct| permute_inputs(conjunct, &bottom_mapping)));
        let new_top_condition = RexNode::and(
            intersecting
                .iter()
                .chain(&bottom_conjuncts)
                .map(|conjunct| permute_inputs(conjunct, &top_mapping)),
        );

        let mut builder = call.builder();
        builder
            .push(rel_a)
            .push(rel_c)
            .join(JoinType::Inner, new_bottom_condition)?
            .push(rel_b)
            .join(JoinType::Inner, new_top_condition)?;
        let new_top = builder.peek()?.clone();
        let restore = (0..a + b + c)
            .map(|i| {
                let source = top_mapping.target_of(i);
                RexNode::input_ref(source, new_top.row_type().field_type(source))
            })
            .collect();
        builder.project_named(restore, top.row_type().field_names(), false)?;
        let rel = builder.build()?;
        call.transform_to(rel)
    }
}
