//! # Plan Utilities
//!
//! Helpers shared by the join rules: classification of conjuncts by the join input
//! they read, outer-join strengthening, and the field renumbering that goes with
//! swapping join inputs.
//!
//! ## Null rejection
//!
//! Outer-join strengthening and the ON-clause push rules agree on one predicate,
//! [`conjunct_rejects_nulls`]: a conjunct rejects NULLs from a side when it cannot
//! evaluate to `TRUE` for a row in which every column of that side is NULL. A
//! filter with such a conjunct above a `LEFT` join discards every NULL-padded row,
//! so the join is equivalent to an `INNER` join.

use crate::fieldset::FieldSet;
use crate::mapping::{Mapping, ShiftBlock};
use crate::pattern::collect_nodes;
use crate::rel::{Correlate, JoinType, RelNode, RelRef};
use crate::rex::{CorrelationId, RexNode};
use crate::shuttle::{convert_inputs, RexShuttle};
use crate::types::Field;

/// Where conjuncts may go when they are classified against a join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushTargets {
    /// Conjuncts that fit neither side become part of the join condition.
    pub into_join: bool,
    pub left: bool,
    pub right: bool,
}

impl PushTargets {
    /// Targets for a filter sitting above a join of type `join_type`. Nothing is
    /// pushed into a side that generates NULLs, and only inner joins absorb the
    /// rest into their condition.
    pub fn for_filter_above(join_type: JoinType) -> Self {
        Self {
            into_join: join_type == JoinType::Inner,
            left: !join_type.generates_nulls_on_left(),
            right: !join_type.generates_nulls_on_right() && join_type.projects_right(),
        }
    }

    /// Targets for conjuncts of the join's own condition. A conjunct over the
    /// preserved side of an outer join (or the left side of an anti join) must stay
    /// in the condition.
    pub fn for_join_condition(join_type: JoinType) -> Self {
        Self {
            into_join: false,
            left: !join_type.generates_nulls_on_right() && join_type != JoinType::Anti,
            right: !join_type.generates_nulls_on_left(),
        }
    }
}

/// Conjuncts sorted by destination. Left and right conjuncts are already expressed
/// against the respective input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassifiedFilters {
    pub join: Vec<RexNode>,
    pub left: Vec<RexNode>,
    pub right: Vec<RexNode>,
    /// Conjuncts that could not be placed.
    pub remaining: Vec<RexNode>,
}

impl ClassifiedFilters {
    /// Whether any conjunct moved.
    pub fn changed(&self) -> bool {
        !self.join.is_empty() || !self.left.is_empty() || !self.right.is_empty()
    }
}

/// Sorts `filters`, written against the concatenated fields of `join`'s inputs,
/// into conjuncts for the left input, the right input and the join condition.
///
/// Always-true conjuncts that fit a side are dropped. A conjunct already present in
/// `join_condition` is not added twice.
pub fn classify_filters(
    join: &RelNode,
    filters: Vec<RexNode>,
    targets: PushTargets,
    join_condition: &[RexNode],
) -> ClassifiedFilters {
    let left_fields = &join.input(0).row_type().fields;
    let right_fields = &join.input(1).row_type().fields;
    let left_width = left_fields.len();
    let total = left_width + right_fields.len();
    let left_bits = FieldSet::range_to(left_width);
    let right_bits = FieldSet::range(left_width, total);

    let mut out = ClassifiedFilters::default();
    for filter in filters {
        let refs = filter.referenced_fields();
        if targets.left && left_bits.contains_all(&refs) {
            if !filter.is_always_true() {
                out.left.push(shift_side(&filter, 0, left_width, 0, total, left_fields));
            }
        } else if targets.right && right_bits.contains_all(&refs) {
            if !filter.is_always_true() {
                out.right.push(shift_side(
                    &filter,
                    left_width,
                    total,
                    -(left_width as isize),
                    total,
                    right_fields,
                ));
            }
        } else if targets.into_join {
            if !join_condition.contains(&filter) && !out.join.contains(&filter) {
                out.join.push(filter);
            }
        } else {
            out.remaining.push(filter);
        }
    }
    out
}

fn shift_side(
    filter: &RexNode,
    start: usize,
    end: usize,
    offset: isize,
    total: usize,
    dest: &[Field],
) -> RexNode {
    let mut adjustments = vec![0; total];
    for a in &mut adjustments[start..end] {
        *a = offset;
    }
    convert_inputs(filter, &adjustments, Some(dest))
}

/// Splits the conjuncts of `predicate` into those that read only `child_fields`
/// and the rest.
pub fn split_filters(child_fields: &FieldSet, predicate: &RexNode) -> (Vec<RexNode>, Vec<RexNode>) {
    predicate
        .conjunctions()
        .into_iter()
        .partition(|c| child_fields.contains_all(&c.referenced_fields()))
}

/// Whether `conjunct` cannot be `TRUE` for a row in which every column of
/// `side_fields` is NULL.
pub fn conjunct_rejects_nulls(conjunct: &RexNode, side_fields: &FieldSet) -> bool {
    conjunct.is_not_true_when(side_fields)
}

/// Strengthens an outer join given the conjuncts of a filter applied to its
/// output: a NULL-generating side whose padded rows the filter rejects no longer
/// generates NULLs.
pub fn simplify_join_type(
    conjuncts: &[RexNode],
    join_type: JoinType,
    left_width: usize,
    right_width: usize,
) -> JoinType {
    let mut join_type = join_type;
    if join_type.generates_nulls_on_right() {
        let right = FieldSet::range(left_width, left_width + right_width);
        if conjuncts.iter().any(|c| conjunct_rejects_nulls(c, &right)) {
            join_type = join_type.cancel_nulls_on_right();
        }
    }
    if join_type.generates_nulls_on_left() {
        let left = FieldSet::range_to(left_width);
        if conjuncts.iter().any(|c| conjunct_rejects_nulls(c, &left)) {
            join_type = join_type.cancel_nulls_on_left();
        }
    }
    join_type
}

/// Renumbering of a join's fields when its inputs are swapped: left fields move
/// behind the right ones.
pub fn swap_join_mapping(left_width: usize, right_width: usize) -> Mapping {
    Mapping::shift(
        left_width + right_width,
        &[
            ShiftBlock::new(right_width, 0, left_width),
            ShiftBlock::new(0, left_width, right_width),
        ],
    )
}

/// References that restore the original field order on top of `swapped`, a join
/// whose inputs were exchanged; `left_width` is the width of the original left
/// input.
pub fn swapped_join_exprs(swapped: &RelNode, left_width: usize) -> Vec<RexNode> {
    let width = swapped.field_count();
    let right_width = width - left_width;
    (0..width)
        .map(|i| {
            let source = (i + right_width) % width;
            RexNode::input_ref(source, swapped.row_type().field_type(source))
        })
        .collect()
}

/// A correlation id not used anywhere in the plan rooted at `root`.
pub fn next_correlation_id(root: &RelRef) -> CorrelationId {
    let mut max: Option<u32> = None;
    for rel in collect_nodes(root) {
        if let Some(correlate) = rel.payload::<Correlate>() {
            max = max.max(Some(correlate.id.0));
        }
        let mut shuttle = RexShuttle::new().with_correl(|id, row_type| {
            max = max.max(Some(id.0));
            RexNode::correl(id, row_type.clone())
        });
        for expr in rel.op().expressions() {
            shuttle.apply(expr);
        }
    }
    CorrelationId(max.map_or(0, |m| m + 1))
}
