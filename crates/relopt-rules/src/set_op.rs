//! # Set Operation Rules
//!
//! Normalisation of unions:
//!
//! ```text
//! Union(Union(A, B), C)     ->  Union(A, B, C)            UnionMerge
//! Union ALL(A)              ->  A                         UnionEliminate
//! Union(A, B)               ->  Aggregate(Union ALL(A, B)) UnionToDistinct
//! ```
//!
//! A distinct union absorbs any child union; a `UNION ALL` only absorbs children
//! that are `UNION ALL` themselves, since a distinct child removes duplicates the
//! merged union would keep.

use relopt_core::error::Result;
use relopt_core::pattern::Operand;
use relopt_core::rel::{RelNode, RelRef, SetOp, SetOpKind};
use relopt_core::rule::{Rule, RuleCall};

fn union() -> Operand {
    Operand::with::<SetOp>(|s| s.kind == SetOpKind::Union)
}

fn as_union(rel: &RelRef) -> Option<&SetOp> {
    rel.payload::<SetOp>().filter(|s| s.kind == SetOpKind::Union)
}

/// Flattens unions nested directly under a union.
pub struct UnionMergeRule;

impl UnionMergeRule {
    fn absorbs(top_all: bool, child: &RelRef) -> bool {
        as_union(child).is_some_and(|c| !top_all || c.all)
    }
}

impl Rule for UnionMergeRule {
    fn name(&self) -> &str {
        "UnionMerge"
    }

    fn operand(&self) -> Operand {
        union().predicate(|rel| {
            let top_all = rel.payload::<SetOp>().is_some_and(|s| s.all);
            rel.inputs().iter().any(|i| Self::absorbs(top_all, i))
        })
    }

    fn on_match(&self, call: &mut RuleCall<'_>) -> Result<()> {
        let rel = call.rel(0).clone();
        let Some(top) = rel.payload::<SetOp>() else {
            return Ok(());
        };
        let mut inputs = Vec::new();
        for input in rel.inputs() {
            if Self::absorbs(top.all, input) {
                inputs.extend(input.inputs().iter().cloned());
            } else {
                inputs.push(input.clone());
            }
        }
        let merged = RelNode::set_op(SetOpKind::Union, top.all, inputs)?;
        let mut builder = call.builder();
        builder.push(merged).convert(rel.row_type(), true)?;
        let result = builder.build()?;
        call.transform_to(result)
    }
}

/// Replaces a `UNION ALL` of a single input by that input.
pub struct UnionEliminateRule;

impl Rule for UnionEliminateRule {
    fn name(&self) -> &str {
        "UnionEliminate"
    }

    fn operand(&self) -> Operand {
        Operand::with::<SetOp>(|s| s.kind == SetOpKind::Union && s.all)
            .predicate(|rel| rel.inputs().len() == 1)
    }

    fn on_match(&self, call: &mut RuleCall<'_>) -> Result<()> {
        let rel = call.rel(0).clone();
        let mut builder = call.builder();
        builder.push(rel.input(0).clone()).convert(rel.row_type(), true)?;
        let result = builder.build()?;
        call.transform_to(result)
    }
}

/// Rewrites a distinct union as an aggregate over a `UNION ALL`.
pub struct UnionToDistinctRule;

impl Rule for UnionToDistinctRule {
    fn name(&self) -> &str {
        "UnionToDistinct"
    }

    fn operand(&self) -> Operand {
        Operand::with::<SetOp>(|s| s.kind == SetOpKind::Union && !s.all)
    }

    fn on_match(&self, call: &mut RuleCall<'_>) -> Result<()> {
        let rel = call.rel(0).clone();
        let mut builder = call.builder();
        for input in rel.inputs() {
            builder.push(input.clone());
        }
        builder
            .union(true, rel.inputs().len())?
            .distinct()?
            .convert(rel.row_type(), true)?;
        let result = builder.build()?;
        call.transform_to(result)
    }
}
