//! # Expression Shuttle
//!
//! [`RexShuttle`] is a single recursive rewrite over [`RexNode`] trees. Instead of a
//! visitor trait with one method per node kind, callers inject closures for the
//! cases they care about; every other node is rebuilt from its rewritten children.
//! With no overrides the shuttle is the identity: `RexShuttle::new().apply(e) == e`.
//!
//! The free functions at the bottom are the shuttles that rules actually use:
//!
//! | function | rewrite |
//! |---|---|
//! | [`shift`] | every `$i` becomes `$(i + offset)` |
//! | [`convert_inputs`] | every `$i` becomes `$(i + adjustments[i])`, optionally retyped |
//! | [`permute_inputs`] | every `$i` becomes `$(mapping.target_of(i))` |
//! | [`push_past_project`] | every `$i` becomes the `i`-th projected expression |

use crate::mapping::Mapping;
use crate::rex::{CorrelationId, Op, RexNode};
use crate::types::{DataType, Field, RowType};

type InputRefFn<'a> = Box<dyn FnMut(usize, DataType) -> RexNode + 'a>;
type CallFn<'a> = Box<dyn FnMut(&Op, Vec<RexNode>, DataType) -> RexNode + 'a>;
type CorrelFn<'a> = Box<dyn FnMut(CorrelationId, &RowType) -> RexNode + 'a>;
type FieldAccessFn<'a> = Box<dyn FnMut(RexNode, usize, DataType) -> RexNode + 'a>;

/// Recursive expression rewrite with injected per-case overrides.
///
/// Call overrides receive the operands *after* they have been rewritten, so a
/// call override composes with an input-reference override. Field-access
/// overrides likewise receive the rewritten inner expression.
#[derive(Default)]
pub struct RexShuttle<'a> {
    on_input_ref: Option<InputRefFn<'a>>,
    on_call: Option<CallFn<'a>>,
    on_correl: Option<CorrelFn<'a>>,
    on_field_access: Option<FieldAccessFn<'a>>,
}

impl<'a> RexShuttle<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_input_ref(mut self, f: impl FnMut(usize, DataType) -> RexNode + 'a) -> Self {
        self.on_input_ref = Some(Box::new(f));
        self
    }

    pub fn with_call(
        mut self,
        f: impl FnMut(&Op, Vec<RexNode>, DataType) -> RexNode + 'a,
    ) -> Self {
        self.on_call = Some(Box::new(f));
        self
    }

    pub fn with_correl(mut self, f: impl FnMut(CorrelationId, &RowType) -> RexNode + 'a) -> Self {
        self.on_correl = Some(Box::new(f));
        self
    }

    pub fn with_field_access(
        mut self,
        f: impl FnMut(RexNode, usize, DataType) -> RexNode + 'a,
    ) -> Self {
        self.on_field_access = Some(Box::new(f));
        self
    }

    pub fn apply(&mut self, expr: &RexNode) -> RexNode {
        match expr {
            RexNode::InputRef { index, data_type } => match self.on_input_ref.as_mut() {
                Some(f) => f(*index, *data_type),
                None => expr.clone(),
            },
            RexNode::Literal { .. } => expr.clone(),
            RexNode::Call {
                op,
                operands,
                data_type,
            } => {
                let operands = self.apply_all(operands);
                match self.on_call.as_mut() {
                    Some(f) => f(op, operands, *data_type),
                    None => RexNode::call_typed(op.clone(), operands, *data_type),
                }
            }
            RexNode::CorrelVariable { id, row_type } => match self.on_correl.as_mut() {
                Some(f) => f(*id, row_type),
                None => expr.clone(),
            },
            RexNode::FieldAccess {
                expr: inner,
                field,
                data_type,
            } => {
                let inner = self.apply(inner);
                match self.on_field_access.as_mut() {
                    Some(f) => f(inner, *field, *data_type),
                    None => RexNode::FieldAccess {
                        expr: Box::new(inner),
                        field: *field,
                        data_type: *data_type,
                    },
                }
            }
        }
    }

    pub fn apply_all(&mut self, exprs: &[RexNode]) -> Vec<RexNode> {
        exprs.iter().map(|e| self.apply(e)).collect()
    }
}

/// Moves every input reference by `offset`.
///
/// # Panics
/// If a reference would become negative.
pub fn shift(expr: &RexNode, offset: isize) -> RexNode {
    if offset == 0 {
        return expr.clone();
    }
    RexShuttle::new()
        .with_input_ref(|index, data_type| {
            let shifted = index as isize + offset;
            assert!(shifted >= 0, "shifting ${index} by {offset} is negative");
            RexNode::input_ref(shifted as usize, data_type)
        })
        .apply(expr)
}

pub fn shift_all(exprs: &[RexNode], offset: isize) -> Vec<RexNode> {
    exprs.iter().map(|e| shift(e, offset)).collect()
}

/// Per-ordinal renumbering: `$i` becomes `$(i + adjustments[i])`. When
/// `dest_fields` is given the reference takes the type of its destination field,
/// which is how references are retargeted at a side whose nullability changed.
///
/// # Panics
/// If a referenced ordinal has no adjustment, or the result is negative or
/// outside `dest_fields`.
pub fn convert_inputs(expr: &RexNode, adjustments: &[isize], dest_fields: Option<&[Field]>) -> RexNode {
    RexShuttle::new()
        .with_input_ref(|index, data_type| {
            assert!(
                index < adjustments.len(),
                "no adjustment for ${index} ({} known)",
                adjustments.len()
            );
            let target = index as isize + adjustments[index];
            assert!(target >= 0, "adjusting ${index} is negative");
            let target = target as usize;
            let data_type = match dest_fields {
                Some(fields) => fields[target].data_type,
                None => data_type,
            };
            RexNode::input_ref(target, data_type)
        })
        .apply(expr)
}

/// Renumbers every input reference through `mapping`.
///
/// # Panics
/// If a referenced ordinal is unmapped.
pub fn permute_inputs(expr: &RexNode, mapping: &Mapping) -> RexNode {
    RexShuttle::new()
        .with_input_ref(|index, data_type| RexNode::input_ref(mapping.target_of(index), data_type))
        .apply(expr)
}

pub fn permute_inputs_all(exprs: &[RexNode], mapping: &Mapping) -> Vec<RexNode> {
    exprs.iter().map(|e| permute_inputs(e, mapping)).collect()
}

/// Expresses `expr`, written against the output of a projection, directly against
/// the projection's input by substituting each `$i` with `project_exprs[i]`.
///
/// # Panics
/// If `expr` references a column the projection does not produce.
pub fn push_past_project(expr: &RexNode, project_exprs: &[RexNode]) -> RexNode {
    RexShuttle::new()
        .with_input_ref(|index, _| {
            assert!(
                index < project_exprs.len(),
                "${index} is outside a projection of {} expression(s)",
                project_exprs.len()
            );
            project_exprs[index].clone()
        })
        .apply(expr)
}

pub fn push_past_project_all(exprs: &[RexNode], project_exprs: &[RexNode]) -> Vec<RexNode> {
    exprs.iter().map(|e| push_past_project(e, project_exprs)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fieldset::FieldSet;
    use crate::mapping::ShiftBlock;
    use crate::types::TypeKind;

    fn col(i: usize) -> RexNode {
        RexNode::input_ref(i, DataType::integer())
    }

    fn gt(a: RexNode, b: RexNode) -> RexNode {
        RexNode::call(Op::Gt, vec![a, b])
    }

    #[test]
    fn test_identity_shuttle() {
        let e = RexNode::and([gt(col(0), RexNode::int_literal(1)), gt(col(2), col(1))]);
        assert_eq!(RexShuttle::new().apply(&e), e);
    }

    #[test]
    fn test_shift() {
        let e = gt(col(3), col(5));
        assert_eq!(shift(&e, -3), gt(col(0), col(2)));
        assert_eq!(shift(&e, 2).referenced_fields(), FieldSet::of([5, 7]));
    }

    #[test]
    #[should_panic(expected = "is negative")]
    fn test_shift_negative_panics() {
        shift(&col(1), -2);
    }

    #[test]
    fn test_convert_inputs_retypes() {
        let dest = vec![
            Field::new("a", DataType::nullable(TypeKind::Integer)),
            Field::new("b", DataType::nullable(TypeKind::Integer)),
        ];
        let converted = convert_inputs(&col(2), &[0, 0, -1], Some(&dest));
        assert_eq!(
            converted,
            RexNode::input_ref(1, DataType::nullable(TypeKind::Integer))
        );
    }

    #[test]
    fn test_permute_inputs() {
        let mapping = Mapping::shift(3, &[ShiftBlock::new(0, 1, 2), ShiftBlock::new(2, 0, 1)]);
        assert_eq!(permute_inputs(&gt(col(0), col(2)), &mapping), gt(col(2), col(1)));
    }

    #[test]
    fn test_push_past_project() {
        let project = vec![col(4), RexNode::call(Op::Add, vec![col(0), RexNode::int_literal(1)])];
        let pushed = push_past_project(&gt(col(1), col(0)), &project);
        assert_eq!(pushed, gt(project[1].clone(), col(4)));
    }

    #[test]
    fn test_call_override_sees_rewritten_operands() {
        let mut count = 0;
        let e = gt(col(0), col(1));
        let rewritten = RexShuttle::new()
            .with_input_ref(|i, t| RexNode::input_ref(i + 10, t))
            .with_call(|op, operands, t| {
                count += 1;
                assert_eq!(operands[0], col(10));
                RexNode::call_typed(op.clone(), operands, t)
            })
            .apply(&e);
        assert_eq!(count, 1);
        assert_eq!(rewritten.referenced_fields(), FieldSet::of([10, 11]));
    }
}
